//! The `version` subcommand.

use crate::schemas::resources::API_VERSION;

/// Prints the engine version and the schema apiVersion it speaks.
pub fn run() {
    println!("toolsmith {}", env!("CARGO_PKG_VERSION"));
    println!("apiVersion {API_VERSION}");
}
