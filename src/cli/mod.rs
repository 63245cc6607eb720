//! Command-line interface module.
//!
//! Argument parsing via clap. The parsed [`Args`] are turned into
//! [`crate::merge::MergeOptions`] so the library never sees clap types.

mod args;

pub use args::Args;
