//! CLI subcommand implementations

pub mod optimize;
pub mod space;
