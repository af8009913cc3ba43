mod commands;
mod handlers;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tally_types::Role;

/// Tally -- chat command processing core.
#[derive(Parser, Debug)]
#[command(name = "tally", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered commands
    Commands {
        /// Only show commands this role may run
        #[arg(long)]
        role: Option<Role>,
    },

    /// Run one command through the dispatcher
    Dispatch {
        /// Actor issuing the command
        #[arg(long)]
        actor: String,

        /// Scope (room) the command is issued in
        #[arg(long)]
        scope: String,

        /// Role the actor holds in the scope
        #[arg(long, default_value = "member")]
        role: Role,

        /// Originating chat message id, recorded in the audit trail
        #[arg(long)]
        message_id: Option<String>,

        /// Handler timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Raw command text, e.g. `/alert AAPL ">150"`
        #[arg(trailing_var_arg = true, required = true)]
        raw: Vec<String>,
    },

    /// Show recent audit events
    Audit {
        /// Number of events to show
        #[arg(long, default_value_t = 20)]
        last: usize,

        /// Only show events for this actor
        #[arg(long)]
        actor: Option<String>,
    },

    /// Verify the audit ledger hash chain
    Verify,

    /// Show the effective configuration and where each value came from
    Config,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Commands { role } => commands::list::run(role),
        Commands::Dispatch {
            actor,
            scope,
            role,
            message_id,
            timeout_ms,
            raw,
        } => commands::dispatch::run(commands::dispatch::DispatchArgs {
            actor,
            scope,
            role,
            message_id,
            timeout_ms,
            raw: raw.join(" "),
        }),
        Commands::Audit { last, actor } => commands::audit::show(last, actor.as_deref()),
        Commands::Verify => commands::audit::verify(),
        Commands::Config => commands::config::show(),
    }
}
