//! Remote bootstrap command construction.
//!
//! The orchestrator needs to stage the bootstrap script on each droplet and
//! launch it detached so the polling loop never blocks on a long-running
//! Salt install. This module centralises the remote string building so the
//! fleet module stays focused on orchestration.

use shell_escape::unix::escape;

/// Remote path the bootstrap script is staged at before launch.
pub const BOOTSTRAP_SCRIPT_PATH: &str = "/var/tmp/bootstrap.sh";

/// Remote log file capturing the install-script download.
pub const PREPARE_LOG_PATH: &str = "/tmp/prepare.log";

/// Remote log file capturing the detached bootstrap run.
pub const BOOTSTRAP_LOG_PATH: &str = "/tmp/vm-bootstrap.log";

/// Builds the remote command that fetches `source_url` to `remote_path`.
///
/// The script is fetched by the droplet itself rather than streamed from the
/// operator host, so only the URL crosses the wire.
#[must_use]
pub fn stage_command(source_url: &str, remote_path: &str) -> String {
    let url = escape(source_url.into());
    let path = escape(remote_path.into());
    format!("wget -q {url} -O {path}")
}

/// Builds the single shell command dispatched to every newly ready droplet.
///
/// Structure, in order: disable interactive package prompts, best-effort
/// install of `screen` via apt with a yum fallback, download the install
/// script with logged output, then launch the staged bootstrap script
/// detached inside `screen` with the Salt master address as its sole
/// argument. The apt failure is intentionally swallowed by `||` with no
/// verification that yum succeeded; behaviour on a double failure is
/// unspecified upstream and is reproduced as-is.
#[must_use]
pub fn bootstrap_command(script_url: &str, master_address: &str) -> String {
    let url = escape(script_url.into());
    let master = escape(master_address.into());
    format!(
        concat!(
            "export DEBIAN_FRONTEND=noninteractive; ",
            "apt-get install -qy screen || yum install -y screen; ",
            "wget -q {url} -O prepare.sh 2>&1 1>{prepare_log}; ",
            "screen -dmS root bash {script} {master} &> {bootstrap_log}"
        ),
        url = url,
        prepare_log = PREPARE_LOG_PATH,
        script = BOOTSTRAP_SCRIPT_PATH,
        master = master,
        bootstrap_log = BOOTSTRAP_LOG_PATH,
    )
}
