use clap::Parser;
use serde::Serialize;

/// Keeps a GL.iNet router on the newest firmware build of one release channel.
///
/// Queries the vendor firmware api, and if the channel carries a build newer than the one
/// recorded in the state file, downloads the image, verifies its sha256 checksum, records the
/// new build id and hands the image to `sysupgrade`. The router reboots into the new firmware,
/// so a successful run never returns.
///
/// Meant to be run from cron. Only one instance runs at a time.
#[derive(Debug, Parser, Serialize)]
#[command(author, version)]
pub struct Args {
    /// The path to the config file.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    /// The firmware api endpoint, without the `model` query parameter.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// The device model, e.g. `mt6000`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The release channel to follow, e.g. `SNAPSHOT`, `TESTING` or `RELEASE`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// The path to the file recording the last applied build id.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// The path to the run lock file.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
    /// Where the firmware image is downloaded to.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// The list of paths preserved across a sysupgrade.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survival_manifest: Option<String>,
    /// The firmware flashing executable.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash_command: Option<String>,
    /// Number of attempts for fetching release info and for downloading the image.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Seconds to wait between two attempts.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// Downloads and verifies a newer image, but neither records it nor flashes it.
    #[arg(long)]
    // Serialization is skipped if not set because command line args always take
    // precedence over env vars and a config file. This would otherwise make it
    // impossible to set this config option outside of cli args.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub noupdate: bool,
}
