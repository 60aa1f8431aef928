//! Command-line interface definitions for the `saltfleet` binary.
//!
//! This module centralises the clap parser structure so both the main binary
//! and the build script can reuse it when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// CLI for the `saltfleet` provisioning tool.
#[derive(Debug, Parser)]
#[command(
    name = "saltfleet",
    about = "Provision a fleet of DigitalOcean droplets and bootstrap Salt over SSH"
)]
pub(crate) struct Cli {
    /// First index of the fleet, inclusive.
    #[arg(long, default_value_t = 0)]
    pub(crate) min: i64,
    /// Last index of the fleet, inclusive.
    #[arg(long, default_value_t = 1)]
    pub(crate) max: i64,
    /// Name prefix; droplets are named `prefix + index`.
    #[arg(long, default_value = "node")]
    pub(crate) prefix: String,
    /// Size slug for every droplet.
    #[arg(long, default_value = "2gb")]
    pub(crate) plan: String,
    /// Region slug droplets are created in.
    #[arg(long, default_value = "fra1")]
    pub(crate) location: String,
    /// Image slug used for the boot disk.
    #[arg(long, default_value = "debian-7-0-x64")]
    pub(crate) image: String,
    /// Root password used for SSH authentication; key auth when omitted.
    #[arg(long)]
    pub(crate) password: Option<String>,
    /// Public key file. Parsed for compatibility but currently unused.
    #[arg(long, value_name = "PATH")]
    pub(crate) pubkeyfile: Option<Utf8PathBuf>,
    /// Mark this fleet as hosting the Salt master.
    #[arg(long)]
    pub(crate) saltmaster: bool,
    /// Address of the Salt master, passed to the bootstrap script.
    #[arg(long = "saltmaster_address", default_value = "127.0.0.1")]
    pub(crate) saltmaster_address: String,
    /// DigitalOcean API token.
    #[arg(long, env = "DIGITALOCEAN_TOKEN")]
    pub(crate) token: String,
    /// Comma-separated SSH key identifiers authorised on each droplet.
    #[arg(
        long = "ssh-keys",
        value_delimiter = ',',
        required = true,
        value_name = "IDS"
    )]
    pub(crate) ssh_keys: Vec<u64>,
    /// URL of the bootstrap script each droplet fetches and runs.
    #[arg(long = "script-url", value_name = "URL")]
    pub(crate) script_url: String,
}
