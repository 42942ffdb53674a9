use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use outmonitor::config::MonitorConfig;
use outmonitor::monitor::Monitor;
use outmonitor::util::logging;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "outmonitor", version, about = "Run a command and commit its output to files")]
struct Args {
    /// Configuration file (json, toml or yaml)
    #[arg(short, long = "cfg", default_value = "config.json")]
    config: PathBuf,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = MonitorConfig::load(&args.config)?;

    if args.check {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    logging::init(&config.log_level, config.log_file().as_deref())?;
    log::info!("outmonitor {}", outmonitor::VERSION);

    let monitor = Monitor::new(config).await?;
    let status = monitor.run().await?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
