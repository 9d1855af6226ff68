//! fleetops — operator CLI for the fleet control plane.
//!
//! # Quick Start
//!
//! ```bash
//! fleetops register --server 127.0.0.1:7443
//! fleetops list --server 127.0.0.1:7443
//! fleetops reboot m-1 --server 127.0.0.1:7443
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

const DEFAULT_SERVER: &str = "http://127.0.0.1:7443";

/// fleetops — operator CLI for the fleet control plane.
#[derive(Parser)]
#[command(name = "fleetops")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new machine, returning its assigned id.
    Register {
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// List all registered machines.
    List {
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Fetch a single machine by id.
    Get {
        machine_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Reboot a machine (requires phase READY or MAINTENANCE).
    Reboot {
        machine_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Idempotency key; a random one is generated if omitted.
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Reimage a machine (requires phase MAINTENANCE).
    Reimage {
        machine_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Image reference; defaults to the server's built-in default image.
        #[arg(long)]
        image_ref: Option<String>,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Move a machine into MAINTENANCE.
    EnterMaintenance {
        machine_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Move a machine out of MAINTENANCE back to READY.
    ExitMaintenance {
        machine_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,

        #[arg(long)]
        request_id: Option<String>,
    },

    /// Cancel a running operation.
    Cancel {
        operation_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },

    /// Tail the live operation event stream.
    Watch {
        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Restrict to a single machine's operations.
        #[arg(long)]
        machine_id: Option<String>,
    },

    /// Tail an operation's log output.
    Logs {
        operation_id: String,

        #[arg(short, long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register { server } => commands::machine::register(&server).await,
        Commands::List { server } => commands::machine::list(&server).await,
        Commands::Get { machine_id, server } => commands::machine::get(&server, &machine_id).await,
        Commands::Reboot { machine_id, server, request_id } => {
            commands::lifecycle::reboot(&server, &machine_id, request_id).await
        }
        Commands::Reimage { machine_id, server, image_ref, request_id } => {
            commands::lifecycle::reimage(&server, &machine_id, image_ref, request_id).await
        }
        Commands::EnterMaintenance { machine_id, server, request_id } => {
            commands::lifecycle::enter_maintenance(&server, &machine_id, request_id).await
        }
        Commands::ExitMaintenance { machine_id, server, request_id } => {
            commands::lifecycle::exit_maintenance(&server, &machine_id, request_id).await
        }
        Commands::Cancel { operation_id, server } => commands::lifecycle::cancel(&server, &operation_id).await,
        Commands::Watch { server, machine_id } => commands::watch::run(&server, machine_id).await,
        Commands::Logs { operation_id, server } => commands::logs::run(&server, &operation_id).await,
    }
}
