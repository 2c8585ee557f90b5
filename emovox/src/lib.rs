//! emovox: command line front end for emovox-core.
//!
//! One module per subcommand, each with an `Args` struct (clap), a resolved
//! `Config` built via `TryFrom<Args>`, and an `execute` function.

pub mod cli;
pub mod config;
pub mod listen;
pub mod predict;
pub mod preprocess;
pub mod serve;
pub mod train;
