pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    AppState, CommandError, create_block_impl, list_blocks_impl, list_users_impl,
    notification_for_impl, register_user_impl, resolve_owner_impl, run_sweep_impl,
    send_email_impl, serve_impl,
};
use application::users::NewUser;
use clap::{Args, Parser, Subcommand};
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "quietblock",
    version,
    about = "Time blocks with email reminders before they start"
)]
struct Cli {
    /// Workspace holding config/, state/ and logs/ (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct OwnerArgs {
    #[arg(long, conflicts_with = "credential")]
    user_id: Option<String>,
    /// Identity provider access token; resolves the user through the provider.
    #[arg(long)]
    credential: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the workspace layout and print its paths.
    Init,
    RegisterUser {
        #[arg(long)]
        identity_id: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        time_zone: Option<String>,
        /// Opt out of email reminders.
        #[arg(long)]
        no_email: bool,
    },
    ListUsers,
    CreateBlock {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// RFC3339 start instant.
        #[arg(long)]
        start: String,
        /// RFC3339 end instant.
        #[arg(long)]
        end: String,
    },
    ListBlocks {
        #[command(flatten)]
        owner: OwnerArgs,
        /// all | upcoming | ongoing | previous
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show the reminder delivery record of one block.
    Notification {
        #[command(flatten)]
        owner: OwnerArgs,
        #[arg(long)]
        block_id: String,
    },
    /// Run one reminder sweep and print its counts.
    Sweep,
    /// Sweep periodically until interrupted.
    Serve,
    SendEmail {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::RegisterUser { .. } => "register_user",
            Self::ListUsers => "list_users",
            Self::CreateBlock { .. } => "create_block",
            Self::ListBlocks { .. } => "list_blocks",
            Self::Notification { .. } => "notification",
            Self::Sweep => "sweep",
            Self::Serve => "serve",
            Self::SendEmail { .. } => "send_email",
        }
    }
}

#[derive(Debug, Serialize)]
struct InitResponse {
    workspace_root: String,
    database_path: String,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("failed to resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("failed to initialize workspace: {error}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = match init_logging(state.logs_dir(), &state.settings().log_level) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("failed to initialize logging: {error}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let command_name = cli.command.name();
    match runtime.block_on(execute(&state, cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            state.command_error(command_name, &error);
            ExitCode::FAILURE
        }
    }
}

async fn execute(state: &AppState, command: Command) -> Result<(), CommandError> {
    match command {
        Command::Init => print_json(&InitResponse {
            workspace_root: state.workspace_root().display().to_string(),
            database_path: state.database_path().display().to_string(),
        }),
        Command::RegisterUser {
            identity_id,
            email,
            display_name,
            time_zone,
            no_email,
        } => print_json(&register_user_impl(
            state,
            NewUser {
                identity_id,
                email,
                display_name,
                time_zone,
                email_notifications: Some(!no_email),
            },
        )?),
        Command::ListUsers => print_json(&list_users_impl(state)?),
        Command::CreateBlock {
            owner,
            title,
            description,
            start,
            end,
        } => {
            let owner_id = resolve_owner_impl(state, owner.user_id, owner.credential).await?;
            print_json(&create_block_impl(
                state,
                owner_id,
                title,
                description,
                start,
                end,
            )?)
        }
        Command::ListBlocks { owner, filter } => {
            let owner_id = resolve_owner_impl(state, owner.user_id, owner.credential).await?;
            print_json(&list_blocks_impl(state, owner_id, filter)?)
        }
        Command::Notification { owner, block_id } => {
            let owner_id = resolve_owner_impl(state, owner.user_id, owner.credential).await?;
            print_json(&notification_for_impl(state, owner_id, block_id)?)
        }
        Command::Sweep => print_json(&run_sweep_impl(state).await?),
        Command::Serve => serve_impl(state).await,
        Command::SendEmail { to, subject, body } => {
            send_email_impl(state, to, subject, body).await
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CommandError> {
    let rendered = serde_json::to_string_pretty(value).map_err(InfraError::from)?;
    println!("{rendered}");
    Ok(())
}
