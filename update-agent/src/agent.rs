//! One run of the update agent, from taking the lock to handing the image to the flasher.

use std::{fs, io, path::PathBuf};

use glinet_update_agent_core::{release, should_update, BuildId, ReleaseDescriptor};
use reqwest::blocking::Client;
use tracing::{info, warn};

use crate::{
    client, download, fetch, flash,
    flash::Flasher,
    lock::{self, LockStore, ProcessProbe, RunLock},
    persistence,
    retry::{RetryPolicy, Sleep},
    space,
    state::{self, StateStore},
    util, Settings,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("flashing is not possible on this system")]
    DependencyMissing(#[from] flash::Error),
    #[error("failed taking the run lock")]
    Lock(#[from] lock::Error),
    #[error(transparent)]
    Client(#[from] client::Error),
    #[error(transparent)]
    FetchFailed(#[from] fetch::Error),
    #[error("failed parsing release info")]
    ParseFailed(#[from] release::Error),
    #[error("failed preparing staging directory `{path}`")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    CapacityInsufficient(#[from] space::Error),
    #[error(transparent)]
    DownloadFailed(#[from] download::Error),
    #[error("firmware image failed verification")]
    Verify(#[from] util::Error),
    #[error("failed reading or recording the applied build id")]
    State(#[from] state::Error),
    #[error("failed starting `{command}`")]
    Flash {
        command: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How a run ended, short of replacing the process with the flasher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The channel has nothing newer than what was applied last.
    UpToDate {
        remote: BuildId,
        last_applied: BuildId,
    },
    /// A newer image was downloaded and verified, but `noupdate` is set.
    Verified { release: ReleaseDescriptor },
}

pub struct Agent<'a> {
    settings: &'a Settings,
    client: Client,
    state: &'a dyn StateStore,
    flasher: &'a dyn Flasher,
    sleep: &'a dyn Sleep,
    /// Files registered in the survival manifest, besides the state file.
    persist: Vec<PathBuf>,
}

impl<'a> Agent<'a> {
    pub fn new(
        settings: &'a Settings,
        state: &'a dyn StateStore,
        flasher: &'a dyn Flasher,
        sleep: &'a dyn Sleep,
    ) -> Result<Self, Error> {
        let client = client::build(settings.https_only)?;
        let persist = match std::env::current_exe() {
            Ok(exe) => vec![exe],
            Err(e) => {
                warn!("failed locating own executable, it will not survive upgrades: {e}");
                vec![]
            }
        };
        Ok(Self {
            settings,
            client,
            state,
            flasher,
            sleep,
            persist,
        })
    }

    /// Overrides the files registered in the survival manifest besides the state file.
    #[must_use]
    pub fn with_persisted_files(self, persist: Vec<PathBuf>) -> Self {
        Self { persist, ..self }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.settings.max_retries, self.settings.retry_delay)
    }

    /// Runs the whole pipeline once.
    ///
    /// If a newer build was verified and `noupdate` is not set, this only returns on error: the
    /// lock is released and the process replaced by the flasher.
    pub fn run(
        &self,
        lock_store: impl LockStore + 'static,
        probe: &dyn ProcessProbe,
    ) -> Result<Outcome, Error> {
        self.flasher.preflight()?;
        let mut lock = RunLock::acquire(lock_store, probe)?;

        let mut persist = self.persist.clone();
        persist.push(self.settings.state.clone());
        persistence::register(&self.settings.survival_manifest, &persist);

        let last_applied = self.state.load()?;
        info!(
            "last applied build: {last_applied} ({})",
            last_applied.compile_time()
        );

        let release = self.fetch_release()?;
        info!(
            "latest `{}` build: {} ({}), version {}",
            release.channel,
            release.build_id,
            release.build_id.compile_time(),
            release.version,
        );
        if !should_update(release.build_id, last_applied) {
            info!("already up to date");
            return Ok(Outcome::UpToDate {
                remote: release.build_id,
                last_applied,
            });
        }
        info!(
            "build {} is newer than {last_applied}; updating to version {}",
            release.build_id, release.version
        );

        self.stage(&release)?;

        if self.settings.noupdate {
            info!("noupdate is set; leaving verified image at `{}`", self.settings.image.display());
            return Ok(Outcome::Verified { release });
        }

        self.state.commit(release.build_id)?;
        lock.release();
        let source = self.flasher.exec(&self.settings.image);
        Err(Error::Flash {
            command: self.settings.flash_command.clone(),
            source,
        })
    }

    fn fetch_release(&self) -> Result<ReleaseDescriptor, Error> {
        let url = fetch::api_url(&self.settings.api_url, &self.settings.model);
        let body = fetch::fetch(
            &self.client,
            &url,
            self.policy(),
            self.settings.fetch_timeout,
            self.sleep,
        )?;
        Ok(release::select(&body, &self.settings.channel)?)
    }

    /// Downloads and verifies the image of `release` at the staging path.
    fn stage(&self, release: &ReleaseDescriptor) -> Result<(), Error> {
        let volume = self.settings.image_volume();
        fs::create_dir_all(volume).map_err(|source| Error::Staging {
            path: volume.to_owned(),
            source,
        })?;
        space::check(volume, release.size_bytes, self.settings.space_margin)?;

        if let Some(name) = &release.file_name {
            info!("downloading `{name}`");
        }
        download::download(
            &self.client,
            &release.download_url,
            &self.settings.image,
            self.policy(),
            self.settings.download_timeout,
            self.sleep,
        )?;
        util::verify(&self.settings.image, &release.checksum)?;
        Ok(())
    }
}
