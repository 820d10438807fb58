//! authdesk CLI — drive the account workflow from a terminal.

use anyhow::Result;
use authdesk::auth::{AuthClient, AuthService};
use authdesk::config::Config;
use authdesk::gateway;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "authdesk", version, about = "Account sign-in for desktop clients")]
struct Cli {
    /// Path to config.toml (defaults to the app data directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new account.
    Register {
        username: String,
        email: String,
    },
    /// Sign in and (optionally) persist the session.
    Login {
        username: String,
        /// Keep the session across restarts.
        #[arg(long)]
        remember: bool,
    },
    /// Sign out and clear the persisted session.
    Logout,
    /// Show the currently signed-in user.
    Whoami,
    /// Request a password-reset token by email.
    ForgotPassword { email: String },
    /// Consume a password-reset token.
    ResetPassword { token: String },
    /// Change the current account's password.
    ChangePassword,
    /// Run the credential worker locally.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Query the worker's /status endpoint.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Register { username, email } => {
            let password = dialoguer::Password::new()
                .with_prompt("Password")
                .with_confirmation("Confirm password", "Passwords do not match")
                .interact()?;
            let service = AuthService::new(&config)?;
            let response = service.register(&username, &email, &password, &password).await;
            finish(response.success, &response.message);
        }
        Command::Login { username, remember } => {
            let (service, restored) = AuthService::bootstrap(&config).await?;
            if restored {
                let user = service.current_user().and_then(|u| u.username);
                println!(
                    "Already signed in as {} — run `authdesk logout` first.",
                    user.as_deref().unwrap_or("<unknown>")
                );
                return Ok(());
            }
            let password = dialoguer::Password::new().with_prompt("Password").interact()?;
            let response = service.login(&username, &password, remember).await;
            finish(response.success, &response.message);
        }
        Command::Logout => {
            let (service, restored) = AuthService::bootstrap(&config).await?;
            if !restored {
                println!("Not signed in.");
                return Ok(());
            }
            let response = service.logout().await;
            finish(response.success, &response.message);
        }
        Command::Whoami => {
            let (service, restored) = AuthService::bootstrap(&config).await?;
            if !restored {
                println!("Not signed in.");
                std::process::exit(1);
            }
            let user = service.current_user().unwrap_or_default();
            println!(
                "{} <{}>",
                user.username.as_deref().unwrap_or("<unknown>"),
                user.email.as_deref().unwrap_or("?")
            );
        }
        Command::ForgotPassword { email } => {
            let service = AuthService::new(&config)?;
            let response = service.forgot_password(&email).await;
            finish(response.success, &response.message);
        }
        Command::ResetPassword { token } => {
            let password = dialoguer::Password::new()
                .with_prompt("New password")
                .with_confirmation("Confirm new password", "Passwords do not match")
                .interact()?;
            let service = AuthService::new(&config)?;
            let response = service.reset_password(&token, &password).await;
            finish(response.success, &response.message);
        }
        Command::ChangePassword => {
            let (service, restored) = AuthService::bootstrap(&config).await?;
            if !restored {
                println!("Not signed in.");
                std::process::exit(1);
            }
            let old_password = dialoguer::Password::new()
                .with_prompt("Current password")
                .interact()?;
            let new_password = dialoguer::Password::new()
                .with_prompt("New password")
                .with_confirmation("Confirm new password", "Passwords do not match")
                .interact()?;
            let response = service
                .change_password(&old_password, &new_password, &new_password)
                .await;
            finish(response.success, &response.message);
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            gateway::run_gateway(&host, port, &config).await?;
        }
        Command::Status => {
            let client = AuthClient::new(&config)?;
            let response = client.service_status().await;
            finish(response.success, &response.message);
        }
    }

    Ok(())
}

/// Print the outcome and exit non-zero on failure.
fn finish(success: bool, message: &str) {
    if success {
        println!("✅ {message}");
    } else {
        eprintln!("❌ {message}");
        std::process::exit(1);
    }
}
