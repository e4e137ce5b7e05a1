//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Slumber - scale-to-zero game server operator
#[derive(Parser, Debug)]
#[command(name = "slumber")]
#[command(version)]
#[command(about = "Keeps game servers converged and puts idle ones to sleep")]
#[command(
    long_about = "Slumber reconciles the volumes, configuration, workload and network endpoint of every declared game server, probes each one for connected players, and disables servers that stay empty past their idle timeout."
)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. `debug` or `slumber_controller=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against an in-memory store loaded from a seed file
    Run {
        /// Controller settings (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed document (YAML) with operator configuration and instances
        #[arg(short, long)]
        seed: PathBuf,
    },

    /// Query a server's status once and print the report as JSON
    Probe {
        /// Host name or address
        host: String,

        /// Service port
        #[arg(short, long, default_value_t = slumber_core::SERVICE_PORT)]
        port: u16,

        /// Deadline for the whole exchange, in milliseconds
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,
    },

    /// Print the configuration content hash of every instance in a seed file
    Hash {
        /// Seed document (YAML)
        #[arg(short, long)]
        seed: PathBuf,
    },
}
