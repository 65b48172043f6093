mod apply;
mod args;
mod cube;
mod manifest;
mod scan;
mod timing;
mod tparse;
mod utils;

use clap::Parser;

use args::{Cli, Command};
use utils::DynError;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), DynError> {
    match cli.command {
        Command::Scan(scan_args) => {
            let tstart = tparse::parse_time_arg(&scan_args.tstart, None)
                .map_err(|e| format!("error parsing tstart: {e}"))?;
            let tend = tparse::parse_time_arg(&scan_args.tend, Some(tstart))
                .map_err(|e| format!("error parsing tend: {e}"))?;
            if tstart >= tend {
                return Err("tstart must precede tend".into());
            }
            if !(scan_args.dt > 0.0 && scan_args.dt.is_finite()) {
                return Err("dt must be a positive number of seconds".into());
            }
            scan::run(&scan::ScanQuery {
                teldir: scan_args.teldir,
                stream: scan_args.stream,
                tstart,
                tend,
                dt: scan_args.dt,
            })
        }
        Command::Apply(apply_args) => apply::run(&apply::ApplyConfig {
            manifest_path: apply_args.manifest,
            teldir: apply_args.teldir,
        }),
    }
}
