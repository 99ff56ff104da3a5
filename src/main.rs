mod cli;
mod config;
mod encode;
mod error;
mod frame;
mod server;
mod source;
mod stream;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve(args) => {
            let config = args.into_config()?;
            server::start_server(config).await?;
        }
        Commands::Displays => {
            list_displays()?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("screen_mirror={},warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn list_displays() -> Result<()> {
    let displays = source::capture::list_displays().context("Failed to enumerate displays")?;
    if displays.is_empty() {
        println!("No displays found");
        return Ok(());
    }
    for d in displays {
        println!("{}: {}x{}", d.index, d.width, d.height);
    }
    Ok(())
}
