use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::providers::Format as _;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use url::Url;

mod args;
pub use args::Args;


pub const DEFAULT_API_URL: &str = "https://firmware-api.gl-inet.com/cloud-api/model/info";

/// `Settings` are the configurable options for running the update agent.
///
/// The only entry point to construct `Settings` is `Settings::get`.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Model info endpoint of the firmware api; `model` is appended as a query parameter.
    pub api_url: Url,
    pub model: String,
    /// Release channel to follow, compared exactly against the api's `stage` field.
    pub channel: String,
    /// File holding the build id of the last image handed to the flashing primitive.
    pub state: PathBuf,
    pub lock: PathBuf,
    /// Staging path of the downloaded image. Free space is checked on its volume.
    pub image: PathBuf,
    /// Paths listed in this file survive a sysupgrade.
    pub survival_manifest: PathBuf,
    pub flash_command: PathBuf,
    pub flash_args: Vec<String>,
    /// Attempts per network operation, not retries after the first one.
    pub max_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_delay: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub fetch_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub download_timeout: Duration,
    /// Bytes required on top of the image size before a download is started.
    pub space_margin: u64,
    pub https_only: bool,
    pub noupdate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default api url is valid"),
            model: "mt6000".into(),
            channel: "SNAPSHOT".into(),
            state: "/etc/glinet-update-agent/build_id".into(),
            lock: "/var/run/glinet-update-agent.lock".into(),
            image: "/tmp/glinet-firmware.bin".into(),
            survival_manifest: "/etc/sysupgrade.conf".into(),
            flash_command: "/sbin/sysupgrade".into(),
            flash_args: vec!["-v".into()],
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            space_margin: crate::space::DEFAULT_MARGIN,
            https_only: true,
            noupdate: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed extracting settings")]
    Extract(#[from] Box<figment::Error>),
    #[error("`max_retries` must be at least 1")]
    NoAttempts,
    #[error("`channel` must not be empty")]
    EmptyChannel,
    #[error("`model` must not be empty")]
    EmptyModel,
}

impl Settings {
    /// Constructs `Settings` from built-in defaults, a config file, environment variables, and
    /// command line arguments. Command line arguments always take precedence over environment
    /// variables, which in turn take precedence over the config file. A missing config file is
    /// not an error.
    pub fn get<P: AsRef<Path>>(
        args: &Args,
        config: P,
        env_prefix: &str,
    ) -> Result<Settings, Error> {
        let settings: Settings = figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(Settings::default()))
            .merge(figment::providers::Toml::file(config))
            .merge(figment::providers::Env::prefixed(env_prefix))
            .merge(figment::providers::Serialized::defaults(args))
            .extract()
            .map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.max_retries == 0 {
            return Err(Error::NoAttempts);
        }
        if self.channel.trim().is_empty() {
            return Err(Error::EmptyChannel);
        }
        if self.model.trim().is_empty() {
            return Err(Error::EmptyModel);
        }
        Ok(())
    }

    /// The directory the image is staged in, whose volume must hold the download.
    pub fn image_volume(&self) -> &Path {
        match self.image.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}
