//! # CLI Commands
//! A module for all the commands that can be run from the CLI

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one diagnostic operation against the server
    Check {
        /// Operation name, e.g. monitorReplicationLag (see `operations`)
        operation: String,

        /// Minimum severity to report: critical, warning or info
        #[arg(short, long, default_value = "info")]
        severity: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every diagnostic operation except the response time benchmark
    Sweep {
        /// Minimum severity to report: critical, warning or info
        #[arg(short, long, default_value = "info")]
        severity: String,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the available diagnostic operations
    Operations {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Serve the diagnostics and read-only query tools over MCP (streamable HTTP)
    Serve {
        /// Address to listen on (default from settings: 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default from settings: 4100)
        #[arg(short, long)]
        port: Option<u16>,
    },
}
