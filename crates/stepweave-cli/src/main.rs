//! Stepweave CLI — create, drive and inspect resumable workflow sessions.
//!
//! Every command reuses the stepweave-core engine over a SQLite database, so
//! a session started here can be resumed by any other process.

mod commands;

use clap::{Parser, Subcommand};

/// Stepweave — resumable multi-step workflow sessions
#[derive(Parser)]
#[command(name = "stepweave", version, about = "Stepweave — resumable multi-step workflow sessions")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "STEPWEAVE_DB_PATH", default_value = "stepweave.db")]
    db: String,

    /// Engine configuration YAML (iteration cap, retries, turn timeout)
    #[arg(long, env = "STEPWEAVE_CONFIG")]
    config: Option<String>,

    /// Workflow definition YAML; defaults to the built-in wizard builder
    #[arg(long, env = "STEPWEAVE_WORKFLOW")]
    workflow: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, run and inspect sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Replay a recording against a fresh in-memory session
    Replay {
        /// Recording file (YAML, or JSON with a .json extension)
        file: String,
        /// Run the recording twice and fail if the runs differ
        #[arg(long)]
        verify: bool,
    },

    /// Inspect workflow definitions
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a new empty session
    New {
        /// Session ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Drive a session interactively until it completes or you quit
    Run {
        /// Session ID
        id: String,
    },
    /// Feed a single answer and run until more input is needed
    Step {
        /// Session ID
        id: String,
        /// The answer for the pending step
        #[arg(long)]
        input: String,
    },
    /// Print the stored session document
    Show {
        /// Session ID
        id: String,
        /// Include the turn history
        #[arg(long)]
        turns: bool,
    },
    /// Print the next step without dispatching it
    Resolve {
        /// Session ID
        id: String,
    },
    /// Jump back to a step (EDIT mode)
    Edit {
        /// Session ID
        id: String,
        /// Step to edit
        #[arg(long)]
        step: String,
    },
    /// Enter REVIEW mode
    Review {
        /// Session ID
        id: String,
    },
    /// List stored sessions
    List,
    /// Delete a session and its history
    Delete {
        /// Session ID
        id: String,
    },
    /// Export the inputs a session consumed as a replay recording
    Export {
        /// Session ID
        id: String,
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Validate a workflow YAML file
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },
    /// List the steps of the active workflow in resolution order
    Steps,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepweave_core=warn,stepweave_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Session { action } => {
                let state =
                    commands::init_state(&cli.db, cli.config.as_deref(), cli.workflow.as_deref());
                match action {
                    SessionAction::New { id } => commands::session::new(&state, id.as_deref()).await,
                    SessionAction::Run { id } => commands::session::run(&state, &id).await,
                    SessionAction::Step { id, input } => {
                        commands::session::step(&state, &id, &input).await
                    }
                    SessionAction::Show { id, turns } => {
                        commands::session::show(&state, &id, turns).await
                    }
                    SessionAction::Resolve { id } => commands::session::resolve(&state, &id).await,
                    SessionAction::Edit { id, step } => {
                        commands::session::edit(&state, &id, &step).await
                    }
                    SessionAction::Review { id } => commands::session::review(&state, &id).await,
                    SessionAction::List => commands::session::list(&state).await,
                    SessionAction::Delete { id } => commands::session::delete(&state, &id).await,
                    SessionAction::Export { id, out } => {
                        commands::session::export(&state, &id, out.as_deref()).await
                    }
                }
            }

            Commands::Replay { file, verify } => {
                let state = commands::init_state(":memory:", cli.config.as_deref(), cli.workflow.as_deref());
                commands::replay::run(&state, &file, verify).await
            }

            Commands::Workflow { action } => match action {
                WorkflowAction::Validate { file } => commands::workflow::validate(&file).await,
                WorkflowAction::Steps => {
                    let state =
                        commands::init_state(":memory:", cli.config.as_deref(), cli.workflow.as_deref());
                    commands::workflow::steps(&state).await
                }
            },
        }
    } else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
