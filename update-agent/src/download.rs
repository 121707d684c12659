use std::{
    fs::{remove_file, File},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::{blocking::Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::retry::{Exhausted, RetryPolicy, Sleep};

/// Why a single download attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("failed removing previous image at `{0}`: {1}")]
    RemovePrevious(PathBuf, io::Error),
    #[error("request failed: {0}")]
    Send(reqwest::Error),
    #[error("server responded with status code `{0}`, expected range 200-299")]
    Status(StatusCode),
    #[error("failed opening `{0}` for writing: {1}")]
    OpenWriteTarget(PathBuf, io::Error),
    #[error("failed streaming response body into `{0}`: {1}")]
    Transfer(PathBuf, io::Error),
    #[error("server sent an empty image")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed downloading `{url}` after {attempts} attempt(s)")]
    DownloadFailed {
        url: Url,
        attempts: u32,
        #[source]
        last: AttemptError,
    },
}

/// Downloads `url` to `dest`, retrying according to `policy`. Returns the number of bytes written.
///
/// Partial downloads are never resumed: `dest` is removed before every attempt, and again if all
/// attempts fail.
pub fn download(
    client: &Client,
    url: &Url,
    dest: &Path,
    policy: RetryPolicy,
    timeout: Duration,
    sleep: &dyn Sleep,
) -> Result<u64, Error> {
    info!("downloading `{url}` to `{}`", dest.display());
    let result = policy.run(sleep, "downloading firmware image", |attempt| {
        debug!("downloading firmware image, attempt {attempt}");
        download_once(client, url, dest, timeout)
    });
    match result {
        Ok(bytes) => {
            info!("downloaded {bytes} bytes to `{}`", dest.display());
            Ok(bytes)
        }
        Err(Exhausted { attempts, last }) => {
            remove_if_exists(dest).unwrap_or_else(|e| {
                warn!("failed removing partial image `{}`: {e}", dest.display());
            });
            Err(Error::DownloadFailed {
                url: url.clone(),
                attempts,
                last,
            })
        }
    }
}

fn download_once(
    client: &Client,
    url: &Url,
    dest: &Path,
    timeout: Duration,
) -> Result<u64, AttemptError> {
    remove_if_exists(dest).map_err(|e| AttemptError::RemovePrevious(dest.to_owned(), e))?;

    let mut response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .map_err(AttemptError::Send)?;
    let status = response.status();
    if !status.is_success() {
        return Err(AttemptError::Status(status));
    }

    let mut file =
        File::create(dest).map_err(|e| AttemptError::OpenWriteTarget(dest.to_owned(), e))?;
    let bytes = io::copy(&mut response, &mut file)
        .and_then(|bytes| file.sync_all().map(|()| bytes))
        .map_err(|e| AttemptError::Transfer(dest.to_owned(), e))?;
    if bytes == 0 {
        return Err(AttemptError::Empty);
    }
    Ok(bytes)
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_a_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        remove_if_exists(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn removing_an_existing_file_deletes_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        std::fs::write(&path, b"stale").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
