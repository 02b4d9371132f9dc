use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::util::parse_size;

#[derive(Parser)]
#[command(name = "scafcheck")]
#[command(about = "Audit and repair scaffold annotations for a structured dataset", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Check scaffold annotations against the files on disk.
    Check {
        /// Dataset directory to check.
        dataset_dir: PathBuf,
        /// Max size for metadata files, e.g. 2MiB or 400B.
        #[arg(short, long, default_value = "2MiB", value_parser = parse_size)]
        max_size: u64,
        /// Report any errors that were found.
        #[arg(short, long)]
        report: bool,
        /// Fix any errors that were found.
        #[arg(short, long)]
        fix: bool,
    },

    /// Infer plot models for delimited files under primary/ and annotate
    /// them in the manifest.
    AnnotatePlots {
        /// Dataset directory to annotate.
        dataset_dir: PathBuf,
        /// Max size for metadata files, e.g. 2MiB or 400B.
        #[arg(short, long, default_value = "2MiB", value_parser = parse_size)]
        max_size: u64,
    },
}
