use std::path::{Path, PathBuf};

use nix::sys::statvfs;
use tracing::{info, warn};

/// Headroom required on top of the image size.
pub const DEFAULT_MARGIN: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "not enough space on `{volume}` to download the image: {required} bytes required, \
         {available} bytes available"
    )]
    InsufficientSpace {
        volume: PathBuf,
        required: u64,
        available: u64,
    },
}

pub fn has_space(required: u64, available: u64) -> bool {
    available >= required
}

/// Bytes available to unprivileged users on the volume holding `path`.
///
/// `None` if the file system reports neither a fragment nor a block size.
pub fn available_bytes<P: AsRef<Path>>(path: P) -> Result<Option<u64>, nix::Error> {
    let stats = statvfs::statvfs(path.as_ref())?;
    #[allow(clippy::useless_conversion, reason = "field widths differ between targets")]
    let available = usable_bytes(
        u64::from(stats.blocks_available()),
        u64::from(stats.fragment_size()),
        u64::from(stats.block_size()),
    );
    Ok(available)
}

fn usable_bytes(blocks_available: u64, fragment_size: u64, block_size: u64) -> Option<u64> {
    let piece_size = if fragment_size == 0 {
        block_size
    } else {
        fragment_size
    };
    (piece_size != 0).then(|| blocks_available.saturating_mul(piece_size))
}

/// Checks that an image of `size_bytes` plus `margin` fits on `volume`.
///
/// Without a known size there is nothing to check. If the volume cannot be queried, enough space
/// is assumed and the download itself will fail if it runs out.
pub fn check(volume: &Path, size_bytes: Option<u64>, margin: u64) -> Result<(), Error> {
    let Some(size) = size_bytes else {
        info!("image size unknown; skipping free space check");
        return Ok(());
    };
    let available = match available_bytes(volume) {
        Ok(Some(available)) => available,
        Ok(None) => {
            warn!(
                "statvfs at `{}` reports a block size of 0. Assuming: enough space and continue",
                volume.display()
            );
            return Ok(());
        }
        Err(e) => {
            warn!(
                "failed to get statvfs at `{}`: {e:?}. Assuming: enough space and continue",
                volume.display()
            );
            return Ok(());
        }
    };
    let required = size.saturating_add(margin);
    if !has_space(required, available) {
        return Err(Error::InsufficientSpace {
            volume: volume.to_owned(),
            required,
            available,
        });
    }
    info!(
        "{available} bytes available on `{}`, {required} bytes required",
        volume.display()
    );
    Ok(())
}
