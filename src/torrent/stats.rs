//! Point-in-time torrent status, returned by value from [`super::Torrent::stat`].
//!
//! The original flips between two statically-allocated buffers so a reader
//! never observes a struct being written into concurrently. Returning
//! `TorrentStat` by value from under the reader lock makes that trick
//! unnecessary: every field here was read at the same lock acquisition, and
//! the value is the caller's own copy once the lock is released.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::completion::CpStatus;
use crate::error::torrent::ErrorCode;
use crate::torrent::RunStatus;
use crate::{Sha1Hash, TorrentId};

/// Sentinel returned by `ratio` when nothing has been downloaded yet, so the
/// division has no sensible value.
pub const RATIO_NA: f64 = -1.0;

#[derive(Debug, Clone)]
pub struct TorrentStat {
  pub id: TorrentId,
  pub info_hash: Sha1Hash,
  pub name: String,
  pub destination: PathBuf,

  pub run_status: RunStatus,
  pub cp_status: CpStatus,
  pub error: ErrorCode,
  pub error_string: String,

  pub total_size: u64,
  pub left_until_done: u64,
  pub downloaded_valid: u64,
  pub percent_done: f64,
  pub percent_complete: f64,

  pub downloaded: u64,
  pub uploaded: u64,
  pub download_rate: f64,
  pub upload_rate: f64,
  pub swarm_speed: f64,

  /// Seconds until completion at the current download rate, or `-1` if the
  /// rate is too low to extrapolate from (< 0.1 bytes/sec).
  pub eta: i64,
  /// `uploaded / max(downloaded, downloadedValid)`, or [`RATIO_NA`].
  pub ratio: f64,

  pub peer_count: usize,
  pub cannot_connect: bool,
  pub seeders: Option<usize>,
  pub leechers: Option<usize>,

  pub start_date: Option<SystemTime>,
  pub stop_date: Option<SystemTime>,
  pub activity_date: Option<SystemTime>,
}

/// A single peer's externally-visible state, used by [`super::Torrent::peers`].
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
  pub addr: std::net::Ipv4Addr,
  pub port: u16,
  pub from: crate::peer::PeerSource,
  pub is_connected: bool,
  pub am_choking: bool,
  pub is_choking: bool,
  pub am_interested: bool,
  pub is_interested: bool,
  pub progress: f64,
  pub upload_rate: f64,
  pub download_rate: f64,
  pub client: Option<String>,
}
