//! Command-line surface of the console binary.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "castellan",
    version,
    about = "Operations console for a MediaMTX streaming host"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Subcommand)]
pub(crate) enum Command {
    /// Serve the HTTP console (the default).
    #[default]
    Serve,
    /// Restart the console on a freshly swapped binary and roll back when it
    /// does not come up healthy. Launched outside the console unit after an
    /// update.
    FinalizeUpdate,
}
