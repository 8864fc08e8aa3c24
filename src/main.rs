use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use lazyq::api::{
  BlogApi, HttpBlogApi, HttpLazyDaysApi, HttpSwapiApi, LazyDaysApi, Post, SwapiApi, User,
};
use lazyq::cache::{MirrorStorage, NoopStorage, QueryCache, QueryKey, SqliteStorage};
use lazyq::config::Config;
use lazyq::features::{
  cancel_appointment, prefetch_treatments, People, PostDetail, Posts, Treatments, UserAppointments,
  UserStore,
};
use lazyq::logging;
use lazyq::mirror::PersistenceMirror;
use lazyq::notify::RecordingNotifier;

#[derive(Parser, Debug)]
#[command(name = "lazyq")]
#[command(about = "Query cache demo client for the clinic, blog and people APIs")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lazyq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Clinic server URL
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Signed-in user
  User {
    #[command(subcommand)]
    action: UserAction,
  },
  /// Appointments held by the signed-in user
  Appointments,
  /// Free one of the signed-in user's appointments
  CancelAppointment {
    #[arg(long)]
    id: u64,
  },
  /// Treatments offered by the clinic
  Treatments,
  /// One page of blog posts
  Posts {
    #[arg(long, default_value_t = 1)]
    page: u32,
  },
  /// Comments on a blog post
  Comments {
    #[arg(long)]
    post: u64,
  },
  /// Delete a blog post
  DeletePost {
    #[arg(long)]
    post: u64,
  },
  /// Star Wars characters
  People {
    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: u32,
  },
}

#[derive(Subcommand, Debug)]
enum UserAction {
  /// Print the stored user, refreshed from the server
  Show,
  /// Store a user and token obtained from the clinic server
  Login {
    #[arg(long)]
    id: u64,
    #[arg(long)]
    token: String,
    #[arg(long)]
    email: Option<String>,
  },
  /// Edit the profile of the signed-in user
  Update {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    phone: Option<String>,
  },
  /// Forget the stored user
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override the clinic server if specified on command line
  let config = if let Some(url) = args.api_url {
    let mut config = config;
    config.api.url = url;
    config
  } else {
    config
  };

  let _log_guard = logging::init(&config.logging)?;

  let notifier = Arc::new(RecordingNotifier::new());
  let cache = QueryCache::new(config.cache.options()).with_notifier(notifier.clone());

  let storage: Arc<dyn MirrorStorage> = if config.storage.enabled {
    Arc::new(SqliteStorage::open_at(&config.storage.resolved_path()?)?)
  } else {
    Arc::new(NoopStorage)
  };
  let clinic: Arc<dyn LazyDaysApi> = Arc::new(HttpLazyDaysApi::new(&config.api.url)?);
  let users = UserStore::new(&cache, clinic.clone(), Some(PersistenceMirror::new(storage)));

  let outcome = run(args.command, &config, &cache, clinic, &users).await;

  // Let background refetches land before exiting
  cache.settled(&QueryKey::default()).await;
  for toast in notifier.drain() {
    println!("[{:?}] {}", toast.status, toast.title);
  }

  outcome
}

async fn run(
  command: Command,
  config: &Config,
  cache: &QueryCache,
  clinic: Arc<dyn LazyDaysApi>,
  users: &UserStore,
) -> Result<()> {
  info!(?command, "running command");

  match command {
    Command::User { action } => run_user(action, cache, users).await,
    Command::Appointments => {
      let appointments = UserAppointments::new(cache, clinic, Some(signed_in(users)?));
      appointments.settled().await;
      for appointment in appointments.appointments() {
        println!(
          "{:>5}  {}  {}",
          appointment.id,
          appointment.date_time.format("%Y-%m-%d %H:%M"),
          appointment.treatment_name
        );
      }
      Ok(())
    }
    Command::CancelAppointment { id } => {
      let appointments = UserAppointments::new(cache, clinic.clone(), Some(signed_in(users)?));
      appointments.settled().await;
      let appointment = appointments
        .appointments()
        .into_iter()
        .find(|a| a.id == id)
        .ok_or_else(|| eyre!("Appointment {} is not held by the signed-in user", id))?;
      cancel_appointment(cache, clinic).mutate_async(appointment).await?;
      Ok(())
    }
    Command::Treatments => {
      prefetch_treatments(cache, clinic.clone());
      let treatments = Treatments::new(cache, clinic);
      cache.settled(&QueryKey::default()).await;
      for treatment in treatments.treatments() {
        println!(
          "{:<20} {:>4} min  {}",
          treatment.name, treatment.duration_in_minutes, treatment.description
        );
      }
      Ok(())
    }
    Command::Posts { page } => {
      let blog: Arc<dyn BlogApi> = Arc::new(HttpBlogApi::new(&config.blog.url)?);
      let posts = Posts::new(cache, blog, page);
      cache.settled(&QueryKey::default()).await;
      let snapshot = posts.snapshot();
      if let Some(error) = snapshot.error {
        return Err(error.into());
      }
      println!("Page {} of {}", posts.page(), lazyq::features::MAX_POST_PAGE);
      for post in snapshot.data.unwrap_or_default() {
        println!("{:>4}  {}", post.id, post.title);
      }
      Ok(())
    }
    Command::Comments { post } => {
      let blog: Arc<dyn BlogApi> = Arc::new(HttpBlogApi::new(&config.blog.url)?);
      let detail = PostDetail::new(cache, blog.clone(), find_post(cache, blog, post).await?);
      detail.settled().await;
      println!("{}\n\n{}\n", detail.post().title, detail.post().body);
      for comment in detail.comments().data.unwrap_or_default() {
        println!("- {}: {}", comment.email, comment.body);
      }
      Ok(())
    }
    Command::DeletePost { post } => {
      let blog: Arc<dyn BlogApi> = Arc::new(HttpBlogApi::new(&config.blog.url)?);
      let detail = PostDetail::new(cache, blog.clone(), find_post(cache, blog, post).await?);
      detail.delete().await?;
      println!("Post deleted");
      Ok(())
    }
    Command::People { pages } => {
      let swapi = HttpSwapiApi::new(&config.swapi.url)?;
      let first_page = swapi.first_page();
      let people = People::new(cache, Arc::new(swapi) as Arc<dyn SwapiApi>, first_page);
      people.settled().await;
      let mut loaded = 1;
      while loaded < pages && people.fetch_next_page() {
        people.settled().await;
        loaded += 1;
      }
      for person in people.people() {
        println!(
          "{:<25} hair: {:<15} eyes: {}",
          person.name, person.hair_color, person.eye_color
        );
      }
      Ok(())
    }
  }
}

async fn run_user(action: UserAction, cache: &QueryCache, users: &UserStore) -> Result<()> {
  match action {
    UserAction::Show => {
      users.refresh();
      cache.settled(&QueryKey::default()).await;
      match users.user() {
        Some(user) => print_user(&user),
        None => println!("Not signed in"),
      }
    }
    UserAction::Login { id, token, email } => {
      users.update_user(&User {
        id,
        email: email.unwrap_or_default(),
        name: None,
        address: None,
        phone: None,
        token: Some(token),
      });
      // Replace the placeholder profile with the server's copy
      users.refresh();
      cache.settled(&QueryKey::default()).await;
      if let Some(user) = users.user() {
        print_user(&user);
      }
    }
    UserAction::Update {
      name,
      email,
      address,
      phone,
    } => {
      let current = signed_in(users)?;
      let updated = User {
        name: name.or_else(|| current.name.clone()),
        email: email.unwrap_or_else(|| current.email.clone()),
        address: address.or_else(|| current.address.clone()),
        phone: phone.or_else(|| current.phone.clone()),
        ..current
      };
      users
        .patch_user(updated)
        .await
        .map_err(|e| eyre!("Update task failed: {}", e))??;
      cache.settled(&QueryKey::default()).await;
      if let Some(user) = users.user() {
        print_user(&user);
      }
    }
    UserAction::Logout => {
      users.clear_user();
      println!("Signed out");
    }
  }
  Ok(())
}

fn signed_in(users: &UserStore) -> Result<User> {
  users
    .user()
    .ok_or_else(|| eyre!("Not signed in. Run `lazyq user login` first."))
}

fn print_user(user: &User) {
  println!("id:      {}", user.id);
  println!("email:   {}", user.email);
  println!("name:    {}", user.name.as_deref().unwrap_or("-"));
  println!("address: {}", user.address.as_deref().unwrap_or("-"));
  println!("phone:   {}", user.phone.as_deref().unwrap_or("-"));
}

/// Look a post up on the listing page that contains it.
async fn find_post(cache: &QueryCache, blog: Arc<dyn BlogApi>, post_id: u64) -> Result<Post> {
  let page = u32::try_from(post_id.saturating_sub(1) / 10 + 1).unwrap_or(u32::MAX);
  let mut posts = Posts::new(cache, blog, page);
  posts.query().settled().await;
  posts
    .snapshot()
    .data
    .unwrap_or_default()
    .into_iter()
    .find(|post| post.id == post_id)
    .ok_or_else(|| eyre!("Post {} not found", post_id))
}
