//! Command line client for the mangahub API. Tokens persist in a JSON file so
//! consecutive invocations share one session.
//!
//! $ cargo run --bin mangahub_client -- login alice@example.com secret1
//! $ cargo run --bin mangahub_client -- me

use clap::{Parser, Subcommand};
use mangahub::client::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "mangahub_client")]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    base_url: String,
    #[arg(long, default_value = ".mangahub/session.json")]
    session_file: String,
    #[arg(long, default_value_t = 15)]
    refresh_timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Register {
        username: String,
        email: String,
        password: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    /// Show the logged in user.
    Me,
    ChangePassword {
        current_password: String,
        new_password: String,
    },
    /// GET an arbitrary API path with the stored session.
    Get {
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer())
        .init();

    let args = Args::parse();
    let transport = Arc::new(ReqwestTransport::new(
        args.base_url.clone(),
        Duration::from_secs(30),
    )?);
    let storage = Arc::new(FileTokenStorage::new(&args.session_file));
    let client = ApiClient::new(transport, storage)?
        .with_refresh_timeout(Duration::from_secs(args.refresh_timeout_secs));

    match args.command {
        Command::Register {
            username,
            email,
            password,
        } => {
            client.register(&username, &email, &password).await?;
            println!("registered and logged in as {username}");
        }
        Command::Login { email, password } => {
            client.login(&email, &password).await?;
            println!("logged in as {email}");
        }
        Command::Logout => {
            client.logout().await?;
            println!("logged out");
        }
        Command::Me => {
            let profile = client.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::ChangePassword {
            current_password,
            new_password,
        } => {
            let msg = client
                .change_password(&current_password, &new_password)
                .await?;
            println!("{msg}");
        }
        Command::Get { path } => {
            let body = client.get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    if client.session_state() == SessionState::LoggedOut {
        tracing::info!("no active session");
    }
    Ok(())
}
