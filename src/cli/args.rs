//! Defines the command-line arguments and subcommands for the sass-compat
//! CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "sass-compat",
    version,
    about = "Cross-implementation compatibility matrix for CSS-preprocessor engines."
)]
pub struct CompatArgs {
    /// Path to the engine declaration file.
    #[arg(long, default_value = "engines.yml")]
    pub engines: PathBuf,

    /// Root of the test fixture catalog.
    #[arg(long, default_value = "spec")]
    pub catalog: PathBuf,

    /// Directory holding persisted build artifacts.
    #[arg(long, default_value = "_build")]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision engines, compile the catalog, and build derived
    /// artifacts up to a target (all, support, stats, or fragment).
    Build {
        #[arg(default_value = "all")]
        target: String,
    },
    /// Delete derived artifacts whose key starts with a prefix.
    Clean {
        #[arg(default_value = "")]
        pattern: String,
    },
    /// Print the persisted per-engine stats table.
    Stats,
}
