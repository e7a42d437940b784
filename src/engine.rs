//! The top-level coordinator: the process-wide registry of active torrents.
//!
//! Unlike a channel-driven actor, admission and enumeration here go through
//! a plain `RwLock<HashMap<..>>` guarded directly by the caller's thread
//! (see the concurrency model this crate follows): duplicate detection has
//! to observe a consistent view of the whole registry, which a
//! fire-and-forget command queue cannot offer without round-tripping a
//! reply channel for every admission.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::alert::{AlertReceiver, AlertSender};
use crate::conf::{Conf, TorrentConf};
use crate::error::engine::NewTorrentError;
use crate::metainfo::Metainfo;
use crate::peer::{Peer, PeerConnector, PeerSource, NullConnector};
use crate::torrent::{Torrent, TorrentParams as DriverParams};
use crate::{PeerId, Sha1Hash, TorrentId};

/// Port a fresh engine binds to the first time any torrent is admitted.
pub const DEFAULT_PORT: u16 = 6881;

/// Parameters for admitting a new torrent, gathered from a parsed
/// [`Metainfo`] plus the caller's placement and seeding choices.
pub struct TorrentParams {
  pub metainfo: Metainfo,
  /// If set, overrides the engine's default `TorrentConf` for this torrent.
  pub conf: Option<TorrentConf>,
  pub mode: Mode,
  /// Defaults to `download_dir/<name>` if not given.
  pub destination: Option<PathBuf>,
}

/// Whether a freshly admitted torrent starts out wanting data (Download) or
/// already has it all (Seed).
#[derive(Debug)]
pub enum Mode {
  Download { seeds: Vec<SocketAddr> },
  Seed,
}

impl Mode {
  fn own_pieces(&self, piece_count: usize) -> Vec<usize> {
    match self {
      Mode::Download { .. } => Vec::new(),
      Mode::Seed => (0..piece_count).collect(),
    }
  }

  fn seeds(&self) -> &[SocketAddr] {
    match self {
      Mode::Download { seeds } => seeds,
      Mode::Seed => &[],
    }
  }
}

struct TorrentEntry {
  torrent: Torrent,
  join_handle: JoinHandle<()>,
}

struct EngineInner {
  torrents: RwLock<HashMap<TorrentId, TorrentEntry>>,
  check_files_mutex: Arc<std::sync::Mutex<()>>,
  /// `0` means no torrent has been admitted yet and the port is unbound.
  listen_port: AtomicU16,
  client_id: PeerId,
  download_dir: PathBuf,
  default_torrent_conf: TorrentConf,
  alert_tx: AlertSender,
  connector: Arc<dyn PeerConnector>,
}

/// A cheap, cloneable handle to the torrent registry.
#[derive(Clone)]
pub struct Engine {
  inner: Arc<EngineInner>,
}

impl Engine {
  /// Builds a fresh, empty engine and returns it alongside the alert
  /// channel its torrents will report to.
  pub fn spawn(conf: Conf) -> (Self, AlertReceiver) {
    log::info!("Spawning engine");

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();

    let engine = Self {
      inner: Arc::new(EngineInner {
        torrents: RwLock::new(HashMap::new()),
        check_files_mutex: Arc::new(std::sync::Mutex::new(())),
        listen_port: AtomicU16::new(0),
        client_id: conf.engine.client_id,
        download_dir: conf.engine.download_dir,
        default_torrent_conf: conf.torrent,
        alert_tx,
        connector: Arc::new(NullConnector),
      }),
    };

    (engine, alert_rx)
  }

  /// Returns the engine's listen port, binding it to [`DEFAULT_PORT`] on
  /// first use.
  fn ensure_port_bound(&self) -> u16 {
    let current = self.inner.listen_port.load(Ordering::Acquire);
    if current != 0 {
      return current;
    }
    match self.inner.listen_port.compare_exchange(0, DEFAULT_PORT, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => DEFAULT_PORT,
      Err(bound) => bound,
    }
  }

  /// Admits a new torrent: rejects an identical info hash (`Duplicate`,
  /// carrying the hash of the already-registered torrent) or a colliding
  /// `(name, destination)` pair (`DupDownload`); otherwise builds the
  /// torrent's derived geometry, spawns its driver task, and registers it.
  pub fn create_torrent(&self, params: TorrentParams) -> Result<TorrentId, NewTorrentError> {
    let destination = params
      .destination
      .unwrap_or_else(|| self.inner.download_dir.join(&params.metainfo.info.name));

    let mut torrents = self.inner.torrents.write().unwrap();

    if let Some(dup) = torrents.values().find(|e| e.torrent.info_hash() == params.metainfo.info.hash) {
      return Err(NewTorrentError::Duplicate(dup.torrent.info_hash()));
    }
    if torrents.values().any(|e| {
      let stat = e.torrent.stat();
      stat.name == params.metainfo.info.name && stat.destination == destination
    }) {
      return Err(NewTorrentError::DupDownload);
    }

    let listen_port = self.ensure_port_bound();
    let id = TorrentId::new();
    let own_pieces = params.mode.own_pieces(params.metainfo.info.piece_count);
    let seeds: Vec<SocketAddr> = params.mode.seeds().to_vec();

    // `Metainfo` carries `url::Url` (the bencode parser's dependency);
    // the tracker client is built on `reqwest`, which has its own `Url`
    // type with no direct conversion between the two.
    let trackers: Vec<reqwest::Url> = params
      .metainfo
      .trackers
      .iter()
      .filter_map(|url| match reqwest::Url::parse(url.as_str()) {
        Ok(url) => Some(url),
        Err(e) => {
          log::warn!("torrent {}: dropping unparseable tracker url {}: {}", id, url, e);
          None
        }
      })
      .collect();

    let torrent = Torrent::new(
      id,
      DriverParams {
        info: params.metainfo.info,
        piece_hashes: params.metainfo.piece_hashes,
        trackers,
        destination,
        client_id: self.inner.client_id,
        listen_port,
        conf: params.conf.unwrap_or_else(|| self.inner.default_torrent_conf.clone()),
        alert_tx: self.inner.alert_tx.clone(),
        check_files_mutex: self.inner.check_files_mutex.clone(),
        connector: self.inner.connector.clone(),
        own_pieces,
      },
    );

    for seed in seeds {
      if let SocketAddr::V4(addr) = seed {
        let connection = self.inner.connector.connect(*addr.ip(), addr.port(), PeerSource::Manual);
        let peer = Peer::new(*addr.ip(), addr.port(), PeerSource::Manual, connection);
        torrent.attach_peer(peer);
      } else {
        log::warn!("torrent {}: ignoring non-IPv4 seed {}", id, seed);
      }
    }

    let join_handle = torrent.spawn();
    torrents.insert(id, TorrentEntry { torrent, join_handle });

    log::info!("Torrent {} admitted", id);
    Ok(id)
  }

  pub fn torrent(&self, id: TorrentId) -> Option<Torrent> {
    self.inner.torrents.read().unwrap().get(&id).map(|e| e.torrent.clone())
  }

  pub fn torrent_ids(&self) -> Vec<TorrentId> {
    self.inner.torrents.read().unwrap().keys().copied().collect()
  }

  /// Removes a torrent from the registry, closing it first. Does not wait
  /// for its driver task to finish; callers that need that guarantee should
  /// use [`Engine::shutdown`] instead.
  pub fn remove_torrent(&self, id: TorrentId) {
    if let Some(entry) = self.inner.torrents.write().unwrap().remove(&id) {
      entry.torrent.close();
    }
  }

  /// Closes every registered torrent and waits for all their driver tasks
  /// to finish before returning.
  pub async fn shutdown(&self) {
    log::info!("Shutting down engine");

    let entries: Vec<TorrentEntry> = self.inner.torrents.write().unwrap().drain().map(|(_, e)| e).collect();

    for entry in &entries {
      entry.torrent.close();
    }
    for entry in entries {
      if let Err(e) = entry.join_handle.await {
        log::error!("torrent driver task panicked: {}", e);
      }
    }

    log::info!("Engine shut down");
  }
}

/// Constructs the hash-lookup error variant without exposing
/// [`NewTorrentError`]'s internals to callers that only want to recover the
/// hash out of a `Duplicate` rejection.
pub fn duplicate_hash(err: &NewTorrentError) -> Option<Sha1Hash> {
  match err {
    NewTorrentError::Duplicate(hash) => Some(*hash),
    _ => None,
  }
}
