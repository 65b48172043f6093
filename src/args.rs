use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Resample telescope frame telemetry onto a uniform time grid",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  tsresample scan /data/tel cam1 UT20240212T12:10 +02:05 0.01\n  tsresample apply cam1.resample.txt /data/tel\n"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a frame manifest for a time window
    Scan(ScanArgs),
    /// Assemble the resampled output cube from a manifest
    Apply(ApplyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Telescope data root containing YYYYMMDD day directories
    pub teldir: PathBuf,

    /// Stream name (subdirectory and file prefix)
    pub stream: String,

    /// Window start: UTYYYYMMDDTHH[:MM[:SS.fff]] or epoch seconds
    pub tstart: String,

    /// Window end: UT timestamp, epoch seconds, or +offset from tstart
    #[arg(allow_hyphen_values = true)]
    pub tend: String,

    /// Output sampling interval in seconds
    pub dt: f64,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Manifest produced by the scan stage
    pub manifest: PathBuf,

    /// Telescope data root; defaults to the manifest's directory
    pub teldir: Option<PathBuf>,
}
