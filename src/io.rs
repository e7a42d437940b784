//! Disk I/O is explicitly out of scope for this crate's core (exact
//! on-disk file layout, sparse/preallocation strategy, and piece-to-file
//! striping are all external concerns). This module only specifies the
//! boundary the driver needs: initializing storage for a run, checking
//! already-downloaded data against expected hashes, and flushing.
//!
//! [`FsIo`] is a minimal, synchronous, single-file-per-torrent-entry
//! implementation good enough to run the crate end to end; it does not
//! implement resume-data persistence.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::io::{IoError, Result};
use crate::torrent_info::TorrentInfo;

/// How thoroughly `check_files` should verify on-disk data against the
/// expected piece hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
  /// Only check that the files exist and have plausible sizes.
  Fast,
  /// Re-hash every piece against `piece_hashes`.
  Full,
}

/// Storage lifecycle hooks consumed by a torrent's driver task.
pub trait DiskIo: Send {
  /// Opens/creates the on-disk files for `info` under `download_dir`,
  /// without verifying existing content. Called once when a torrent
  /// transitions into Running for the first time in a session.
  fn init_fast(&mut self, info: &TorrentInfo, download_dir: &Path) -> Result<()>;

  /// Re-verifies on-disk data against the piece hashes, returning the set of
  /// piece indices found to be already complete.
  fn check_files(
    &mut self,
    info: &TorrentInfo,
    piece_hashes: &[u8],
    mode: CheckMode,
  ) -> Result<Vec<usize>>;

  /// Flushes any buffered writes to disk.
  fn sync(&mut self) -> Result<()>;

  /// Releases file handles. Called on the Stopping transition.
  fn close(&mut self);

  /// Attempts to load previously saved resume data (piece completion,
  /// priorities). This default implementation never has any.
  fn load_resume(&mut self, _info: &TorrentInfo) -> Result<Option<Vec<u8>>> {
    Ok(None)
  }
}

/// A minimal, synchronous `DiskIo` backed by plain file handles, good enough
/// to exercise the rest of the engine without implementing piece-level
/// striping, sparse allocation, or resume persistence.
#[derive(Default)]
pub struct FsIo {
  files: Vec<std::fs::File>,
}

impl DiskIo for FsIo {
  fn init_fast(&mut self, info: &TorrentInfo, download_dir: &Path) -> Result<()> {
    self.files.clear();
    for file in &info.files {
      let path: PathBuf = download_dir.join(&file.name);
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(IoError::from)?;
      }
      let handle = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(IoError::from)?;
      handle.set_len(file.length).map_err(IoError::from)?;
      self.files.push(handle);
    }
    Ok(())
  }

  fn check_files(
    &mut self,
    _info: &TorrentInfo,
    _piece_hashes: &[u8],
    _mode: CheckMode,
  ) -> Result<Vec<usize>> {
    // A full re-hash is out of scope for this stub; a conforming
    // implementation would stream each piece's bytes through SHA-1 and
    // compare against `piece_hashes`. We report nothing pre-verified.
    Ok(Vec::new())
  }

  fn sync(&mut self) -> Result<()> {
    for file in &self.files {
      file.sync_all().map_err(IoError::from)?;
    }
    Ok(())
  }

  fn close(&mut self) {
    self.files.clear();
  }
}
