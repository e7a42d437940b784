//! A driver-owned wrapper around [`super::tracker::Tracker`] that tracks the
//! last-known scrape counts and connectivity state a torrent's `stat`
//! exposes, so the driver loop doesn't need to thread that bookkeeping
//! through every call site.

use reqwest::Url;

use crate::error::tracker::TrackerError;
use crate::{PeerId, Sha1Hash};

use super::announce::{Announce, Event};
use super::tracker::Tracker;

/// Owns the HTTP tracker client plus the torrent-visible state derived from
/// it (`cannotConnect`, `seeders`, `leechers`, `downloaded`). Exclusively
/// owned by the driver task per the torrent-level concurrency model; never
/// touched by external callers.
pub struct TrackerSession {
  tracker: Tracker,
  cannot_connect: bool,
  seeders: Option<usize>,
  leechers: Option<usize>,
  downloaded: Option<usize>,
  tracker_id: Option<String>,
}

impl TrackerSession {
  pub fn init(url: Url) -> Self {
    Self {
      tracker: Tracker::new(url),
      cannot_connect: false,
      seeders: None,
      leechers: None,
      downloaded: None,
      tracker_id: None,
    }
  }

  /// Regular announce. Returns the compact peer list on success; on failure
  /// sets `cannotConnect` and returns an empty list rather than propagating
  /// the error, since tracker errors never stop a torrent (see the error
  /// taxonomy).
  pub async fn pulse(&mut self, mut params: Announce) -> Vec<(std::net::Ipv4Addr, u16)> {
    params.tracker_id = self.tracker_id.clone();
    match self.tracker.announce(params).await {
      Ok(resp) => {
        self.cannot_connect = false;
        self.seeders = resp.seeder_count;
        self.leechers = resp.leecher_count;
        if resp.tracker_id.is_some() {
          self.tracker_id = resp.tracker_id;
        }
        resp
          .peers
          .into_iter()
          .filter_map(|addr| match addr {
            std::net::SocketAddr::V4(v4) => Some((*v4.ip(), v4.port())),
            std::net::SocketAddr::V6(_) => None,
          })
          .collect()
      }
      Err(_) => {
        self.cannot_connect = true;
        Vec::new()
      }
    }
  }

  /// Final "stopped" announce issued once while the torrent transitions to
  /// Stopping. Errors are ignored: there's no one left to retry for.
  pub async fn stopped(&mut self, mut params: Announce) {
    params.event = Some(Event::Stopped);
    params.tracker_id = self.tracker_id.clone();
    let _ = self.tracker.announce(params).await;
  }

  pub async fn completed(&mut self, mut params: Announce) {
    params.event = Some(Event::Completed);
    params.tracker_id = self.tracker_id.clone();
    let _ = self.tracker.announce(params).await;
  }

  pub async fn scrape(&mut self, info_hash: &Sha1Hash) -> Result<(), TrackerError> {
    let entry = self.tracker.scrape(info_hash).await?;
    self.seeders = Some(entry.complete);
    self.leechers = Some(entry.incomplete);
    self.downloaded = Some(entry.downloaded);
    Ok(())
  }

  pub fn cannot_connect(&self) -> bool {
    self.cannot_connect
  }

  pub fn seeders(&self) -> Option<usize> {
    self.seeders
  }

  pub fn leechers(&self) -> Option<usize> {
    self.leechers
  }

  pub fn downloaded(&self) -> Option<usize> {
    self.downloaded
  }

  pub fn close(self) {}
}

pub fn announce(
  info_hash: Sha1Hash,
  peer_id: PeerId,
  port: u16,
  downloaded: u64,
  uploaded: u64,
  left: u64,
  peer_count: Option<usize>,
) -> Announce {
  Announce {
    info_hash,
    peer_id,
    port,
    ip: None,
    downloaded,
    uploaded,
    left,
    peer_count,
    tracker_id: None,
    event: None,
  }
}
