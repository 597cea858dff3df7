//! The sass-compat command-line interface.
//!
//! This is a thin boundary over the core operations: `build` provisions
//! the declared engine runtimes, drives the task graph to a target, and
//! prints the report; `clean` removes derived artifacts; `stats` prints
//! the persisted table. All algorithmic content lives in the library
//! modules.

use clap::Parser;
use std::process;

use crate::catalog::{Catalog, TestId};
use crate::cli::args::{Command, CompatArgs};
use crate::cli::output::Progress;
use crate::engines::{EngineRegistry, EngineVersionId};
use crate::errors::{print_error, Result};
use crate::graph::{Builder, Target};
use crate::runtime::{CompileService, RuntimeContext};
use crate::stats::StatsTable;
use crate::store::ArtifactStore;

pub mod args;
pub mod output;

/// The main entry point for the CLI.
pub fn run() {
    let args = CompatArgs::parse();
    match execute(args) {
        Ok(code) => process::exit(code),
        Err(error) => {
            print_error(error);
            process::exit(1);
        }
    }
}

/// Decorates the real runtime with a
/// `[N/M] Compiling <test> for <engine> <version>` feed, one line per
/// compile request.
struct LoggingService<'a> {
    inner: &'a RuntimeContext,
    progress: Progress,
}

impl CompileService for LoggingService<'_> {
    fn compile(&self, id: &EngineVersionId, test: &TestId, input: &str) -> Result<Vec<u8>> {
        eprintln!("{}", output::compile_line(&self.progress.step(), test, id));
        self.inner.compile(id, test, input)
    }
}

fn execute(args: CompatArgs) -> Result<i32> {
    let store = ArtifactStore::open(&args.store)?;

    match args.command {
        Command::Build { target } => {
            let target: Target = match target.parse() {
                Ok(target) => target,
                Err(message) => {
                    eprintln!("{message}");
                    return Ok(2);
                }
            };

            // Catalog availability is a precondition, checked before any
            // engine is launched.
            let catalog = Catalog::load(&args.catalog)?;
            let registry = EngineRegistry::load(&args.engines)?;
            let versions = registry.version_ids();

            let runtime = RuntimeContext::provision_all(&registry)?;
            let service = LoggingService {
                inner: &runtime,
                progress: Progress::new(catalog.total() * versions.len()),
            };

            let builder = Builder::new(&catalog, versions, &service, &store);
            let report = builder.build_target(target)?;
            output::print_report(&report);
            Ok(if report.is_complete() { 0 } else { 1 })
        }

        Command::Clean { pattern } => {
            let removed = store.clean(&pattern)?;
            println!("Removed {removed} artifacts.");
            Ok(0)
        }

        Command::Stats => match store.load("stats.yml")? {
            Some(bytes) => {
                let stats: StatsTable = serde_yaml::from_str(&String::from_utf8_lossy(&bytes))
                    .map_err(|e| {
                        crate::errors::CompatError::store(
                            args.store.join("stats.yml"),
                            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                        )
                    })?;
                output::print_stats(&stats);
                Ok(0)
            }
            None => {
                eprintln!("No stats built yet; run `sass-compat build stats` first.");
                Ok(1)
            }
        },
    }
}
