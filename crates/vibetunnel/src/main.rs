// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod bootstrap;
mod config;
mod fwd;

use clap::Parser;
use tracing::error;

use config::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => {
            if let Err(err) = args.validate() {
                eprintln!("error: {err}");
                std::process::exit(2);
            }
            bootstrap::run(args).await
        }
        Commands::Fwd(args) => fwd::run(args).await,
        Commands::Version => {
            println!("vibetunnel {}", env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("fatal: {err:#}");
            std::process::exit(1);
        }
    }
}
