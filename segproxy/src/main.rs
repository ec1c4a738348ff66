use crate::app::App;
use crate::cli::{rules_summary, StartOptions};
use crate::config::{load_dispatching, ProxySettings};
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;

mod adapter;
mod app;
mod cli;
mod common;
mod config;
mod dispatch;
mod external;
mod network;
mod proxy;

#[derive(Debug, Parser)]
#[command(
    name = "segproxy",
    about = "HTTP/HTTPS forward proxy with rule-based upstream segmentation"
)]
struct ProgramArgs {
    #[command(flatten)]
    pub start: StartOptions,
    /// Load and print the effective rules, then exit
    #[arg(long)]
    pub validate_rules: bool,
}

fn main() -> ExitCode {
    let args: ProgramArgs = ProgramArgs::parse();
    let settings = match ProxySettings::load(&args.start) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if args.validate_rules {
        return match load_dispatching(&settings) {
            Ok(dispatching) => {
                print!("{}", rules_summary(&dispatching));
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let app = match rt.block_on(App::create(settings)) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    rt.block_on(app.serve_command());
    tracing::info!("Exiting...");
    rt.shutdown_timeout(Duration::from_millis(300));
    ExitCode::SUCCESS
}
