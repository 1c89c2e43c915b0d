//! Command-line driver for the Lumi session lifecycle.
//!
//! Reads `LUMI_API_*` variables, mounts a session controller and runs one
//! auth flow against the configured backend.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mockable::DefaultEnv;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use lumi_auth_client::{
    auth::user_message, create_api_clients, AuthAction, BuildMode, ClientConfig, RegisterRequest,
    SessionController, SessionView,
};

#[derive(Parser)]
#[command(name = "lumi-auth", about = "Check, sign in to or register with a Lumi backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether the backend considers this client signed in.
    Check,
    /// Sign in, show the session, then sign out again.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account and sign in with it.
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = ClientConfig::from_env(&DefaultEnv::new(), BuildMode::from_debug_assertions())?;

    let default_level = if config.logging_enabled() { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if let Err(e) = fmt().with_env_filter(filter).try_init() {
        warn!(error = %e, "tracing init failed");
    }

    let clients = create_api_clients(config)?;
    let session = SessionController::new(clients.auth.clone());
    session.mount().await?;
    report(&session.view());

    let outcome = match cli.command {
        Command::Check => return Ok(ExitCode::SUCCESS),
        Command::Login { email, password } => session
            .login(&email, &password)
            .await
            .map_err(|err| user_message(AuthAction::Login, &err)),
        Command::Register {
            first_name,
            last_name,
            username,
            email,
            password,
        } => {
            let request = RegisterRequest {
                first_name,
                last_name,
                username,
                email,
                password,
            };
            session
                .register_and_login(&request)
                .await
                .map_err(|err| user_message(AuthAction::Register, &err))
        }
    };

    match outcome {
        Ok(_) => {
            report(&session.view());
            println!("API base: {}", clients.http.base_url().await);
            session.logout().await;
            report(&session.view());
            Ok(ExitCode::SUCCESS)
        }
        Err(message) => {
            eprintln!("{message}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report(view: &SessionView) {
    match view {
        SessionView::Checking => println!("Checking authentication..."),
        SessionView::Unauthenticated => println!("Not signed in"),
        SessionView::Authenticated(user) => {
            println!("Authenticated as {} ({})", user.username, user.email);
        }
    }
}
