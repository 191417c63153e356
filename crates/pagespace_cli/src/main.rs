//! CLI entry point for the static site exporter.

use std::env;
use std::process::ExitCode;

use clap::Parser;
use pagespace_engine::{export, ClientSettings};
use pagespace_logging::{level_for, ps_debug, ps_error, ps_warn};
use tokio_util::sync::CancellationToken;

mod cli;

use cli::{Cli, Command, StaticArgs, BANNER};

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit with status 2 from here.
    let cli = Cli::parse();

    match cli.command {
        Command::Static(args) => run_static(args).await,
    }
}

async fn run_static(args: StaticArgs) -> ExitCode {
    println!("{BANNER}");
    pagespace_logging::initialize(args.log_destination(), level_for(args.verbose));
    ps_debug!("Options: {}", args.describe());

    let source_dir = match env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            ps_error!("Could not read the working directory: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ps_warn!("Interrupted, finishing up...");
            on_interrupt.cancel();
        }
    });

    let config = args.export_config(source_dir);
    match export(&config, ClientSettings::default(), cancel).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            ps_error!("Static site generation failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
