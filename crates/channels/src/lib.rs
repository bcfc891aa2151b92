//! Interactive gateways for Ragline.
//!
//! - **CLI** — one prompt per stdin line, answers on stdout

pub mod cli;

pub use cli::CliGateway;
