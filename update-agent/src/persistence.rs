//! Keeps the agent alive across the very upgrades it performs.
//!
//! `sysupgrade` wipes the root overlay except for the paths listed in the survival manifest
//! (`/etc/sysupgrade.conf` on OpenWrt). The agent's executable and its state file are added
//! there; entries are only ever appended.

use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading survival manifest `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed appending to survival manifest `{path}`")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Appends every path in `paths` not yet listed in `manifest`. Returns the paths that were added.
///
/// Running this twice with the same paths adds nothing the second time. A missing manifest is
/// created.
pub fn ensure<P: AsRef<Path>>(manifest: &Path, paths: &[P]) -> Result<Vec<PathBuf>, Error> {
    let contents = match fs::read_to_string(manifest) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(Error::Read {
                path: manifest.to_owned(),
                source,
            });
        }
    };
    let listed: HashSet<&str> = contents.lines().map(str::trim).collect();

    let mut missing = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let line = path.to_string_lossy();
        if listed.contains(line.as_ref()) || missing.iter().any(|p: &PathBuf| p == path) {
            debug!("`{}` already survives upgrades", path.display());
            continue;
        }
        missing.push(path.to_owned());
    }
    if missing.is_empty() {
        return Ok(missing);
    }

    let mut addition = String::new();
    if !contents.is_empty() && !contents.ends_with('\n') {
        addition.push('\n');
    }
    for path in &missing {
        addition.push_str(&path.to_string_lossy());
        addition.push('\n');
    }

    let append_err = |source| Error::Append {
        path: manifest.to_owned(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(manifest)
        .map_err(append_err)?;
    file.write_all(addition.as_bytes()).map_err(append_err)?;
    file.sync_all().map_err(append_err)?;
    Ok(missing)
}

/// Best effort [`ensure`]: relative paths are made absolute and failures only logged.
pub fn register<P: AsRef<Path>>(manifest: &Path, paths: &[P]) {
    let mut absolute = Vec::with_capacity(paths.len());
    for path in paths {
        match std::path::absolute(path) {
            Ok(path) => absolute.push(path),
            Err(e) => warn!(
                "failed resolving `{}`, it will not survive upgrades: {e}",
                path.as_ref().display()
            ),
        }
    }
    match ensure(manifest, &absolute) {
        Ok(added) if added.is_empty() => {
            debug!("survival manifest `{}` is up to date", manifest.display());
        }
        Ok(added) => {
            for path in added {
                info!(
                    "registered `{}` in survival manifest `{}`",
                    path.display(),
                    manifest.display()
                );
            }
        }
        Err(e) => warn!("files may not survive the next upgrade: {e:?}"),
    }
}
