mod api;
mod app;
mod config;
mod error;
mod net;
mod presenter;
mod push;
mod session;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "storyshare")]
#[command(about = "Offline-first client for the story sharing API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storyshare/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create an account
  Register {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Login and store the session
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Clear the stored session
  Logout,
  /// Load the story list (remote first, local store when offline)
  List,
  /// Submit a new story
  Add {
    #[arg(long)]
    description: String,
    /// Path to the photo file
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    lat: Option<f64>,
    #[arg(long)]
    lon: Option<f64>,
  },
  /// Download a story's photo through the caching layer
  Photo {
    id: String,
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Locally saved stories
  Saved {
    #[command(subcommand)]
    action: SavedAction,
  },
  /// Favorite stories
  Favorites {
    #[command(subcommand)]
    action: FavoritesAction,
  },
  /// Push notification subscription
  Push {
    #[command(subcommand)]
    action: PushAction,
  },
}

#[derive(Subcommand, Debug)]
enum SavedAction {
  List,
  Remove { id: String },
  /// Empty both the saved and favorites collections
  Clear,
}

#[derive(Subcommand, Debug)]
enum FavoritesAction {
  List,
  Add { id: String },
  Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum PushAction {
  Status,
  Subscribe,
  Unsubscribe,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storyshare=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let mut app = app::App::new(config)?;

  match args.command {
    Command::Register {
      name,
      email,
      password,
    } => app.register(&name, &email, &password).await,
    Command::Login { email, password } => app.login(&email, &password).await,
    Command::Logout => {
      app.logout();
      Ok(())
    }
    Command::List => app.list_stories().await,
    Command::Add {
      description,
      photo,
      lat,
      lon,
    } => app.add_story(&description, &photo, lat, lon).await,
    Command::Photo { id, output } => app.fetch_photo(&id, output.as_deref()).await,
    Command::Saved { action } => match action {
      SavedAction::List => app.saved_list(),
      SavedAction::Remove { id } => app.saved_remove(&id),
      SavedAction::Clear => app.saved_clear(),
    },
    Command::Favorites { action } => match action {
      FavoritesAction::List => app.favorites_list(),
      FavoritesAction::Add { id } => app.favorite_add(&id).await,
      FavoritesAction::Remove { id } => app.favorite_remove(&id),
    },
    Command::Push { action } => match action {
      PushAction::Status => app.push_status(),
      PushAction::Subscribe => app.push_subscribe().await,
      PushAction::Unsubscribe => app.push_unsubscribe().await,
    },
  }
}
