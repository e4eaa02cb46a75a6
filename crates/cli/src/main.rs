//! `socialtodo` -- shared to-do lists from the terminal.
//!
//! Signs in against the social to-do backend, manages lists and items,
//! and follows a list live over the channel provider.
//!
//! # Environment variables
//!
//! | Variable                   | Default                                 |
//! |----------------------------|-----------------------------------------|
//! | `SOCIAL_TODO_ENV`          | `development`                           |
//! | `SOCIAL_TODO_API_URL`      | per environment                         |
//! | `SOCIAL_TODO_SESSION_FILE` | `<config dir>/social-todo/session.json` |
//! | `PUSHER_KEY`               | app key of the hosted backend           |
//! | `PUSHER_CLUSTER`           | `eu`                                    |
//! | `REALTIME_RECONNECT`       | `backoff`                               |
//! | `RUST_LOG`                 | `socialtodo=info`                       |

use std::io::Write;

use clap::Parser;
use socialtodo_cli::commands::{self, App, Cli};
use socialtodo_cli::store::FileStore;
use socialtodo_client::api::ApiError;
use socialtodo_client::config::ClientConfig;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "socialtodo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<ApiError>() {
            Some(api_error) => eprintln!("{}", api_error.user_message(&format!("{e:#}"))),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;
    let store = FileStore::at_or_default(cli.session_file)?;
    tracing::debug!(
        api_url = %config.api_url,
        session_file = %store.path().display(),
        "Starting socialtodo",
    );

    let app = App::new(config, Box::new(store))?;
    let mut stdout = std::io::stdout().lock();
    commands::run(&app, cli.command, &mut stdout).await?;
    stdout.flush()?;
    Ok(())
}
