//! Command-line argument definitions.

use clap::Parser;
use std::path::PathBuf;

use crate::merge::MergeOptions;

/// Merge capture files into one chronologically ordered capture.
#[derive(Parser, Debug)]
#[command(name = "mungecap")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Only keep packets matching this filter expression (e.g. "tcp port 80")
    #[arg(short = 'f', long = "filter", value_name = "EXPR")]
    pub filter: Option<String>,

    /// Output capture file (compressed if it ends in .gz)
    #[arg(short = 'w', long = "write", value_name = "OUTPUT_FILE")]
    pub output: PathBuf,

    /// Capture files to merge, earlier files win timestamp ties
    #[arg(value_name = "FILE", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,

    /// Fail if an input's link type differs from the first input's
    #[arg(long = "strict-link-type")]
    pub strict_link_type: bool,

    /// Do not show the packet counter
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Log level selected by the `-v` count.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Convert into options for [`crate::merge::merge_files`].
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            inputs: self.inputs.clone(),
            output: self.output.clone(),
            filter: self.filter.clone(),
            strict_link_type: self.strict_link_type,
            show_progress: !self.quiet,
        }
    }
}
