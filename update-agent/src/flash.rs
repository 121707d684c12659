use std::{
    fs, io,
    os::unix::{fs::PermissionsExt as _, process::CommandExt as _},
    path::{Path, PathBuf},
    process::Command,
};

use nix::sys::signal::SigSet;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("required executable `{0}` does not exist")]
    MissingDependency(PathBuf),
    #[error("required executable `{0}` is not an executable file")]
    NotExecutable(PathBuf),
}

/// Hands a verified image to the firmware flashing primitive.
pub trait Flasher {
    /// Checks that flashing can be started at all. Called before anything else happens.
    fn preflight(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Replaces the current process with the flashing primitive.
    ///
    /// Like [`CommandExt::exec`], this only returns if the primitive could not be started.
    fn exec(&self, image: &Path) -> io::Error;
}

/// OpenWrt's `sysupgrade`, or whatever is configured in its place.
#[derive(Debug)]
pub struct Sysupgrade {
    command: PathBuf,
    args: Vec<String>,
    blocked_signals: Option<SigSet>,
}

impl Sysupgrade {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            blocked_signals: None,
        }
    }

    /// Signals to unblock right before exec, so the primitive does not inherit a blocked mask.
    #[must_use]
    pub fn with_blocked_signals(self, signals: SigSet) -> Self {
        Self {
            blocked_signals: Some(signals),
            ..self
        }
    }
}

impl Flasher for Sysupgrade {
    fn preflight(&self) -> Result<(), Error> {
        check_available(&self.command)
    }

    fn exec(&self, image: &Path) -> io::Error {
        if let Some(signals) = &self.blocked_signals
            && let Err(e) = signals.thread_unblock()
        {
            warn!("failed restoring signal mask before flashing: {e}");
        }
        info!(
            "handing `{}` over to `{}` {:?}",
            image.display(),
            self.command.display(),
            self.args
        );
        Command::new(&self.command)
            .args(&self.args)
            .arg(image)
            .exec()
    }
}

/// Fails unless `command` is an existing file with at least one execute bit set.
pub fn check_available(command: &Path) -> Result<(), Error> {
    let metadata = match fs::metadata(command) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::MissingDependency(command.to_owned()));
        }
        Err(e) => {
            warn!("failed inspecting `{}`: {e}", command.display());
            return Err(Error::MissingDependency(command.to_owned()));
        }
    };
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(Error::NotExecutable(command.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let command = dir.path().join("sysupgrade");
        assert!(matches!(
            check_available(&command),
            Err(Error::MissingDependency(path)) if path == command
        ));
    }

    #[test]
    fn non_executable_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let command = dir.path().join("sysupgrade");
        fs::write(&command, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&command, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            check_available(&command),
            Err(Error::NotExecutable(_))
        ));
        assert!(matches!(
            check_available(dir.path()),
            Err(Error::NotExecutable(_))
        ));
    }

    #[test]
    fn executable_command_passes() {
        let dir = tempfile::tempdir().unwrap();
        let command = dir.path().join("sysupgrade");
        fs::write(&command, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&command, fs::Permissions::from_mode(0o755)).unwrap();
        check_available(&command).unwrap();
        Sysupgrade::new(&command, vec![]).preflight().unwrap();
    }

    #[test]
    fn failing_exec_returns_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let flasher = Sysupgrade::new(dir.path().join("missing"), vec!["-v".into()]);
        let err = flasher.exec(Path::new("/tmp/image.bin"));
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
