use std::{
    fs, io,
    io::Write as _,
    path::{Path, PathBuf},
};

use glinet_update_agent_core::BuildId;
use tempfile::NamedTempFile;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading state file `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed creating state directory `{path}`")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed writing build id to a temporary file in `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed replacing state file `{path}`")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the build id of the last image handed to the flashing primitive is kept.
pub trait StateStore {
    /// The last applied build id, [`BuildId::NONE`] if nothing is recorded or the record is
    /// unparsable. A record that exists but cannot be read is an error.
    fn load(&self) -> Result<BuildId, Error>;

    /// Records `build_id` as applied. Either the old or the new value is visible afterwards,
    /// never a partial write.
    fn commit(&self, build_id: BuildId) -> Result<(), Error>;
}

/// A state file holding a single decimal integer.
#[derive(Clone, Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<BuildId, Error> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(
                    "no state file at `{}`; assuming nothing was applied yet",
                    self.path.display()
                );
                return Ok(BuildId::NONE);
            }
            Err(source) => {
                return Err(Error::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(contents.parse().unwrap_or_else(|e| {
            warn!(
                "state file `{}` is corrupt, assuming nothing was applied yet: {e}",
                self.path.display()
            );
            BuildId::NONE
        }))
    }

    fn commit(&self, build_id: BuildId) -> Result<(), Error> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|source| Error::CreateDir {
            path: dir.to_owned(),
            source,
        })?;
        let write_err = |source| Error::Write {
            path: dir.to_owned(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        writeln!(tmp, "{build_id}").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| Error::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;
        info!("recorded build id {build_id} in `{}`", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("build_id"));
        assert_eq!(store.load().unwrap(), BuildId::NONE);
    }

    #[test]
    fn corrupt_state_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build_id");
        fs::write(&path, "yesterday\n").unwrap();
        assert_eq!(FileStateStore::new(&path).load().unwrap(), BuildId::NONE);
    }

    #[test]
    fn unreadable_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build_id");
        // reading a directory fails regardless of permissions
        fs::create_dir(&path).unwrap();
        match FileStateStore::new(&path).load() {
            Err(Error::Read { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn commit_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("build_id");
        let store = FileStateStore::new(&path);
        store.commit(BuildId::new(1_700_000_000)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1700000000\n");
        assert_eq!(store.load().unwrap(), BuildId::new(1_700_000_000));
    }

    #[test]
    fn commit_replaces_previous_value_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build_id");
        fs::write(&path, "42\n").unwrap();
        let store = FileStateStore::new(&path);
        assert_eq!(store.load().unwrap(), BuildId::new(42));
        store.commit(BuildId::new(43)).unwrap();
        assert_eq!(store.load().unwrap(), BuildId::new(43));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
