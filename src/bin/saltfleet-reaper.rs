//! DigitalOcean teardown tool for saltfleet.
//!
//! This binary lists every droplet visible to the supplied API token and
//! destroys each one, printing one result line per droplet.

use clap::Parser;
use saltfleet::{DoApi, DoConfig, Reaper};
use std::io::Write as _;

#[derive(Debug, Parser)]
#[command(
    name = "saltfleet-reaper",
    about = "Destroy every droplet visible to the API token"
)]
struct Cli {
    /// DigitalOcean API token.
    #[arg(long, env = "DIGITALOCEAN_TOKEN")]
    token: String,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    let config = DoConfig::load_without_cli_args().map_err(|err| err.to_string())?;
    let provider = DoApi::new(cli.token, &config).map_err(|err| err.to_string())?;
    let reaper = Reaper::new(provider);
    let mut stdout = std::io::stdout();
    let summary = reaper
        .sweep(&mut stdout)
        .await
        .map_err(|err| err.to_string())?;
    writeln!(
        stdout,
        "reaper sweep complete: destroyed={}, failed={}",
        summary.destroyed, summary.failed
    )
    .map_err(|err| err.to_string())?;
    Ok(())
}
