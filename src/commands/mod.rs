// Subcommand implementations; each exposes a `run` entry the CLI
// dispatcher calls.

pub mod apply;
pub mod doctor;
pub mod remove;
pub mod schema;
pub mod version;
