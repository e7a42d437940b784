//! Parses a bencoded `.torrent` byte buffer into a [`TorrentInfo`] plus the
//! list of announce URLs and per-piece SHA-1 hashes found in it.
//!
//! Adapted from the teacher's bencode-backed metainfo parser; this version
//! produces the richer [`TorrentInfo`]/[`FileEntry`] shape (with derived
//! piece ranges and priorities) instead of a flat file list.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::metainfo::MetainfoError;
use crate::torrent_info::{FileEntry, TorrentFlags, TorrentInfo};
use crate::Sha1Hash;

pub(crate) type Result<T> = std::result::Result<T, MetainfoError>;

/// The result of parsing a `.torrent` file: the static content description
/// plus the concatenated per-piece SHA-1 hashes (used by the out-of-scope
/// `DiskIo::check_files` to verify downloaded data) and announce URLs.
#[derive(Clone)]
pub struct Metainfo {
  pub info: TorrentInfo,
  /// Concatenation of each piece's 20-byte SHA-1 hash.
  pub piece_hashes: Vec<u8>,
  /// HTTP(S) tracker announce URLs, in tier order (tiers flattened).
  pub trackers: Vec<Url>,
}

impl Metainfo {
  /// Parses from a byte buffer, or returns an error describing the invalid
  /// format, syntax, or bencode-level problem.
  ///
  /// Validation performed:
  /// - the bencode format and syntax must be correct.
  /// - `pieces` must be a multiple of 20 bytes.
  /// - the info dict must not contain both `length` (single file) and
  ///   `files` (multi file).
  /// - every file's `length` must be non-zero and its path non-empty,
  ///   non-absolute and not the filesystem root.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    let metainfo: raw::Metainfo = serde_bencode::from_bytes(bytes)?;

    if metainfo.info.pieces.len() % 20 != 0 {
      return Err(MetainfoError::InvalidMetainfo);
    }

    let mut files = Vec::new();
    let mut total_size = 0u64;
    if let Some(len) = metainfo.info.len {
      if metainfo.info.files.is_some() {
        log::warn!("Metainfo cannot contain both `length` and `files`");
        return Err(MetainfoError::InvalidMetainfo);
      }
      if len == 0 {
        log::warn!("File length is 0");
        return Err(MetainfoError::InvalidMetainfo);
      }
      total_size = len;
      files.push(raw_file(metainfo.info.name.clone().into(), len));
    } else if let Some(raw_files) = &metainfo.info.files {
      if raw_files.is_empty() {
        log::warn!("Metainfo files must not be empty");
        return Err(MetainfoError::InvalidMetainfo);
      }

      files.reserve_exact(raw_files.len());
      for file in raw_files.iter() {
        if file.len == 0 {
          log::warn!("File {:?} length is 0", file.path);
          return Err(MetainfoError::InvalidMetainfo);
        }

        let path: PathBuf = file.path.iter().collect();
        if path.as_os_str().is_empty() {
          log::warn!("Path in metainfo is empty");
          return Err(MetainfoError::InvalidMetainfo);
        }
        if path.is_absolute() {
          log::warn!("Path {:?} is absolute", path);
          return Err(MetainfoError::InvalidMetainfo);
        }
        if path == Path::new("/") {
          log::warn!("Path {:?} is root", path);
          return Err(MetainfoError::InvalidMetainfo);
        }

        total_size += file.len;
        files.push(raw_file(path, file.len));
      }
    } else {
      log::warn!("No `length` or `files` key present in metainfo");
      return Err(MetainfoError::InvalidMetainfo);
    }

    let trackers = collect_trackers(&metainfo);
    if trackers.is_empty() {
      log::warn!("No HTTP trackers in metainfo");
    }

    let hash = metainfo.crate_info_hash()?;

    let mut flags = TorrentFlags::empty();
    if metainfo.info.private.unwrap_or(0) != 0 {
      flags |= TorrentFlags::PRIVATE;
    }

    let info = TorrentInfo::new(
      hash,
      metainfo.info.name,
      metainfo.info.piece_len as u32,
      total_size,
      files,
      flags,
    );

    Ok(Self {
      info,
      piece_hashes: metainfo.info.pieces,
      trackers,
    })
  }

  pub fn is_archive(&self) -> bool {
    self.info.files.len() > 1
  }

  pub fn hash(&self) -> Sha1Hash {
    self.info.hash
  }
}

fn raw_file(path: PathBuf, len: u64) -> FileEntry {
  FileEntry {
    name: path,
    length: len,
    offset: 0,
    first_piece: 0,
    last_piece: 0,
    priority: crate::torrent_info::Priority::Normal,
  }
}

fn collect_trackers(metainfo: &raw::Metainfo) -> Vec<Url> {
  let mut trackers = Vec::new();
  if !metainfo.announce_list.is_empty() {
    for tier in metainfo.announce_list.iter() {
      for tracker in tier.iter() {
        if let Ok(url) = Url::parse(tracker) {
          if url.scheme() == "http" || url.scheme() == "https" {
            trackers.push(url);
          }
        }
      }
    }
  } else if let Some(tracker) = &metainfo.announce {
    if let Ok(url) = Url::parse(tracker) {
      if url.scheme() == "http" || url.scheme() == "https" {
        trackers.push(url);
      }
    }
  }
  trackers
}

mod raw {
  //! Only for `serde_bencode` to deserialize into.
  use serde_derive::{Deserialize, Serialize};
  use sha1::Digest;

  use super::*;

  #[derive(Debug, Deserialize)]
  pub struct Metainfo {
    pub info: Info,
    pub announce: Option<String>,
    #[serde(default)]
    #[serde(rename = "announce-list")]
    pub announce_list: Vec<Vec<String>>,
  }

  impl Metainfo {
    pub fn crate_info_hash(&self) -> Result<Sha1Hash> {
      let info = serde_bencode::to_bytes(&self.info)?;
      let digest = sha1::Sha1::digest(&info);
      let mut info_hash = [0; 20];
      info_hash.copy_from_slice(&digest);
      Ok(info_hash)
    }
  }

  #[derive(Debug, Serialize, Deserialize)]
  pub struct Info {
    pub name: String,
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,
    #[serde(rename = "piece length")]
    pub piece_len: usize,
    #[serde(rename = "length")]
    pub len: Option<u64>,
    pub files: Option<Vec<File>>,
    pub private: Option<u8>,
  }

  #[derive(Debug, Serialize, Deserialize)]
  pub struct File {
    pub path: Vec<String>,
    #[serde(rename = "length")]
    pub len: u64,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bencode_single_file() -> Vec<u8> {
    let mut pieces = Vec::new();
    pieces.extend_from_slice(&[1u8; 20]);
    let mut buf = Vec::new();
    buf.extend_from_slice(b"d8:announce17:http://tracker/a4:infod6:lengthi10e4:name5:a.txt12:piece lengthi16e6:pieces20:");
    buf.extend_from_slice(&pieces);
    buf.extend_from_slice(b"ee");
    buf
  }

  #[test]
  fn parses_single_file_torrent() {
    let bytes = bencode_single_file();
    let metainfo = Metainfo::from_bytes(&bytes).unwrap();
    assert_eq!(metainfo.info.files.len(), 1);
    assert_eq!(metainfo.info.total_size, 10);
    assert_eq!(metainfo.trackers.len(), 1);
    assert!(!metainfo.is_archive());
  }

  #[test]
  fn rejects_pieces_not_multiple_of_twenty() {
    let mut buf = Vec::new();
    buf.extend_from_slice(
      b"d4:infod6:lengthi10e4:name5:a.txt12:piece lengthi16e6:pieces3:abcee",
    );
    let err = Metainfo::from_bytes(&buf).unwrap_err();
    assert!(matches!(err, MetainfoError::InvalidMetainfo));
  }
}
