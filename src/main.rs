mod annotations;
mod classify;
mod cli;
mod error;
mod manifest;
mod plots;
mod reconcile;
mod repair;
mod types;
mod util;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::classify::DiskInventory;
use crate::cli::{Cli, Command};
use crate::error::Result;
use crate::manifest::ManifestStore;
use crate::reconcile::collect_discrepancies;
use crate::repair::{run_repair, RepairOutcome};

// Exit codes: 0 = clean or converged, 1 = findings remain, 2 = fatal error.
const EXIT_CLEAN: i32 = 0;
const EXIT_FINDINGS: i32 = 1;
const EXIT_FATAL: i32 = 2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Check {
            dataset_dir,
            max_size,
            report,
            fix,
        } => {
            let inventory = DiskInventory::scan(&dataset_dir, max_size);
            let mut store = ManifestStore::load(&dataset_dir)?;
            let errors = collect_discrepancies(&inventory, &store);
            info!(count = errors.len(), "reconciliation finished");

            if report {
                for error in &errors {
                    println!("{}", error.message());
                }
            }

            if fix {
                let outcome = run_repair(&inventory, &mut store)?;
                return Ok(match outcome.outcome {
                    RepairOutcome::Converged => EXIT_CLEAN,
                    RepairOutcome::Stuck(remaining) => {
                        eprintln!("could not fix all errors:");
                        for error in &remaining {
                            eprintln!("{}", error.message());
                        }
                        EXIT_FINDINGS
                    }
                });
            }

            Ok(if errors.is_empty() {
                EXIT_CLEAN
            } else {
                EXIT_FINDINGS
            })
        }

        Command::AnnotatePlots {
            dataset_dir,
            max_size,
        } => {
            let inventory = DiskInventory::scan(&dataset_dir, max_size);
            let mut store = ManifestStore::load(&dataset_dir)?;
            let annotated = plots::annotate_plots(&inventory, &mut store)?;
            println!("annotated {annotated} plot file(s)");
            Ok(EXIT_CLEAN)
        }
    }
}
