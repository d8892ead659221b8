use std::{io, path::Path, thread, time::Duration};

use tracing::{debug, warn};

pub const REMOVE_ATTEMPTS: usize = 10;
pub const REMOVE_BACKOFF: Duration = Duration::from_millis(200);

/// Remove a file that another process (the media player, a lingering engine
/// instance) may still hold open. A file that is already gone counts as
/// removed.
#[inline]
pub fn remove_file_with_retry(path: &Path) -> io::Result<()> {
    remove_file_with(path, REMOVE_ATTEMPTS, REMOVE_BACKOFF)
}

#[inline]
pub fn remove_file_with(path: &Path, attempts: usize, backoff: Duration) -> io::Result<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                return Ok(());
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) if attempt < attempts => {
                warn!(
                    "Failed to remove {} (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    attempts,
                    err
                );
                thread::sleep(backoff);
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}
