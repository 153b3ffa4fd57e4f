use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use tajsync::app::App;
use tajsync::config::Config;
use tajsync::logging;
use tajsync::reviews::NewReview;

#[derive(Parser, Debug)]
#[command(name = "tajsync")]
#[command(about = "Keeps a local cache of Taj Mahal restaurant reviews in sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tajsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the scheduled refresh and print updates until Ctrl-C
  Run,
  /// Sync once
  Sync {
    /// Fetch even if the cache is recent; Ctrl-C cancels
    #[arg(short, long)]
    force: bool,
  },
  /// Print the cached reviews
  Show,
  /// Print the rating distribution
  Stats,
  /// Add a review locally
  Add {
    #[arg(long)]
    author: String,
    #[arg(long)]
    content: String,
    /// Stars, 1 to 5
    #[arg(long)]
    rating: i64,
    #[arg(long)]
    avatar_url: Option<String>,
  },
  /// Remove the scheduled refresh registration
  Unregister,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let app = App::new(config)?;

  match args.command {
    Command::Run => app.run().await?,
    Command::Sync { force } => app.sync(force).await?,
    Command::Show => app.show(),
    Command::Stats => app.stats(),
    Command::Add {
      author,
      content,
      rating,
      avatar_url,
    } => {
      app
        .add(NewReview {
          author,
          avatar_url,
          content,
          rating,
        })
        .await?
    }
    Command::Unregister => app.unregister()?,
  }

  Ok(())
}
