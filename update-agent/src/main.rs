//! `glinet-update-agent` keeps a GL.iNet router on the newest firmware build of one release
//! channel. It is meant to be started periodically by cron and performs a single run:
//!
//! 1. make sure the flashing primitive is present and take the run lock;
//! 2. register its own executable and state file in the sysupgrade survival manifest;
//! 3. fetch the model info from the vendor firmware api and select the configured channel;
//! 4. compare the channel's build id against the last applied one, and stop if it is not newer;
//! 5. check for free space, download the image and verify its sha256 checksum;
//! 6. record the new build id, release the lock and exec `sysupgrade` on the image.
use std::{borrow::Cow, path::Path};

use clap::Parser as _;
use eyre::WrapErr as _;
use glinet_update_agent::{
    flash::Sysupgrade,
    lock::{FileLockStore, SignalCleanup, SignalProbe},
    retry::ThreadSleep,
    state::FileStateStore,
    Agent, Args, Outcome, Settings,
};
use tracing::{debug, error, info, warn};

mod update_agent_result;
use update_agent_result::UpdateAgentResult;

const CFG_DEFAULT_PATH: &str = "/etc/glinet-update-agent.toml";
const ENV_VAR_PREFIX: &str = "GLINET_UPDATE_AGENT_";
const CFG_ENV_VAR: &str = const_format::concatcp!(ENV_VAR_PREFIX, "CONFIG");
const SYSLOG_IDENTIFIER: &str = "glinet-update-agent";

fn main() -> UpdateAgentResult {
    let telemetry = glinet_telemetry::TelemetryConfig::new()
        .with_syslog(SYSLOG_IDENTIFIER)
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(_) => {
            telemetry.flush_blocking();
            UpdateAgentResult::Success
        }
        Err(err) => {
            error!("{err:?}");
            telemetry.flush_blocking();
            err.into()
        }
    }
}

fn get_config_source(args: &Args) -> Cow<'_, Path> {
    if let Some(config) = &args.config {
        info!("using config provided by command line argument: `{config}`");
        Cow::Borrowed(config.as_ref())
    } else if let Some(config) = figment::providers::Env::var(CFG_ENV_VAR) {
        info!("using config set in environment variable `{CFG_ENV_VAR}={config}`");
        Cow::Owned(std::path::PathBuf::from(config))
    } else {
        info!("using default config at `{CFG_DEFAULT_PATH}`");
        Cow::Borrowed(CFG_DEFAULT_PATH.as_ref())
    }
}

fn run(args: &Args) -> eyre::Result<()> {
    let config_path = get_config_source(args);

    let settings = Settings::get(args, config_path, ENV_VAR_PREFIX)
        .wrap_err("failed reading settings")?;

    let settings_ser = match serde_json::to_string(&settings) {
        Ok(ser) => ser,
        Err(e) => {
            warn!("failed serializing settings as json, printing debug string: {e:?}");
            format!("{settings:?}")
        }
    };
    debug!("running with the following settings: {settings_ser}");

    // Must happen before any other thread is spawned, so that they all inherit the blocked mask.
    let cleanup = SignalCleanup::install(FileLockStore::new(&settings.lock))
        .wrap_err("failed installing signal handling")?;

    let flasher = Sysupgrade::new(&settings.flash_command, settings.flash_args.clone())
        .with_blocked_signals(cleanup.signals());
    let state = FileStateStore::new(&settings.state);
    let agent = Agent::new(&settings, &state, &flasher, &ThreadSleep)
        .wrap_err("failed setting up the update agent")?;

    match agent
        .run(FileLockStore::new(&settings.lock), &SignalProbe)
        .wrap_err("update run failed")?
    {
        Outcome::UpToDate {
            remote,
            last_applied,
        } => info!(
            "nothing to do: latest `{}` build {remote} is not newer than applied build \
             {last_applied}",
            settings.channel
        ),
        Outcome::Verified { release } => info!(
            "verified build {} of version {} at `{}`; not flashing because noupdate is set",
            release.build_id,
            release.version,
            settings.image.display()
        ),
    }
    Ok(())
}
