//! The central per-torrent aggregate and its driver task.
//!
//! Structured the way the teacher's `torrent` module separates the
//! channel-facing handle from the actual state: `Torrent` is a cheap,
//! cloneable handle around an `Arc<Shared>`; the driver task owns the
//! non-shareable collaborators (disk I/O, the tracker session) locally and
//! only ever touches `Shared` through the reader/writer lock described in
//! the engine's concurrency model.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use reqwest::Url;
use tokio::sync::Notify;

use crate::alert::{Alert, AlertSender};
use crate::completion::{CompletionMap, CpStatus};
use crate::conf::TorrentConf;
use crate::error::torrent::ErrorCode;
use crate::io::{CheckMode, DiskIo, FsIo};
use crate::peer::{CompactPeerError, Peer, PeerConnector, PeerSource, parse_compact_peers};
use crate::tracker::announce::{Announce, Event};
use crate::tracker::session::TrackerSession;
use crate::torrent_info::{Priority, TorrentFlags, TorrentInfo};
use crate::{PeerId, Sha1Hash, TorrentId};

pub mod stats;

use stats::{PeerSnapshot, TorrentStat, RATIO_NA};

/// Hard cap on the number of peers a single torrent will keep attached.
pub const MAX_PEER_COUNT: usize = 50;

/// Driver wake-up interval.
const TICK: Duration = Duration::from_millis(100);

/// The run-status half of the Stopped/Running/Stopping/Checking state
/// machine driven by [`run_driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
  Stopped,
  Running,
  Stopping,
  Checking,
}

/// Everything a torrent's driver needs to construct itself and hand off to
/// the engine, gathered from a parsed [`crate::metainfo::Metainfo`].
pub struct TorrentParams {
  pub info: TorrentInfo,
  pub piece_hashes: Vec<u8>,
  pub trackers: Vec<Url>,
  pub destination: PathBuf,
  pub client_id: PeerId,
  pub listen_port: u16,
  pub conf: TorrentConf,
  pub alert_tx: AlertSender,
  pub check_files_mutex: Arc<std::sync::Mutex<()>>,
  pub connector: Arc<dyn PeerConnector>,
  /// Pieces the torrent starts with already marked complete (seeding mode).
  pub own_pieces: Vec<usize>,
}

struct TorrentState {
  info: TorrentInfo,
  piece_hashes: Vec<u8>,
  completion: CompletionMap,
  cp_status: CpStatus,
  status_change: Option<CpStatus>,

  destination: PathBuf,
  io_loaded: bool,

  peers: Vec<Peer>,
  pex_disabled: bool,

  upload: crate::rate::RateCounter,
  download: crate::rate::RateCounter,
  swarm_speed: crate::rate::RateCounter,

  uploaded_cur: u64,
  uploaded_prev: u64,
  downloaded_cur: u64,
  downloaded_prev: u64,

  run_status: RunStatus,
  recheck_requested: bool,

  error: ErrorCode,
  error_string: String,

  cannot_connect: bool,
  tracker_seeders: Option<usize>,
  tracker_leechers: Option<usize>,

  start_date: Option<SystemTime>,
  stop_date: Option<SystemTime>,
  activity_date: Option<SystemTime>,
}

struct Shared {
  id: TorrentId,
  info_hash: Sha1Hash,
  client_id: PeerId,
  listen_port: u16,
  conf: TorrentConf,
  alert_tx: AlertSender,
  trackers: Vec<Url>,
  connector: Arc<dyn PeerConnector>,
  check_files_mutex: Arc<std::sync::Mutex<()>>,
  die_flag: AtomicBool,
  notify: Notify,
  state: RwLock<TorrentState>,
}

/// A cheap, cloneable handle to a torrent. All public operations lock
/// `Shared::state` internally for exactly as long as the operation needs.
#[derive(Clone)]
pub struct Torrent {
  shared: Arc<Shared>,
}

impl Torrent {
  pub fn new(id: TorrentId, params: TorrentParams) -> Self {
    let block_size = params.info.piece_size.min(crate::BLOCK_LEN);
    let mut completion = CompletionMap::new(
      params.info.total_size,
      params.info.piece_size,
      block_size,
      params.info.piece_count,
    );
    for (index, piece) in params.info.pieces.iter().enumerate() {
      completion.set_piece_priority(index, piece.priority);
    }
    for piece in params.own_pieces {
      completion.add_piece(piece);
    }
    let cp_status = completion.status();

    let state = TorrentState {
      info: params.info,
      piece_hashes: params.piece_hashes,
      completion,
      cp_status,
      status_change: None,
      destination: params.destination,
      io_loaded: false,
      peers: Vec::new(),
      pex_disabled: false,
      upload: crate::rate::RateCounter::new(),
      download: crate::rate::RateCounter::new(),
      swarm_speed: crate::rate::RateCounter::new(),
      uploaded_cur: 0,
      uploaded_prev: 0,
      downloaded_cur: 0,
      downloaded_prev: 0,
      run_status: RunStatus::Stopped,
      recheck_requested: false,
      error: ErrorCode::Ok,
      error_string: String::new(),
      cannot_connect: false,
      tracker_seeders: None,
      tracker_leechers: None,
      start_date: None,
      stop_date: None,
      activity_date: None,
    };

    let info_hash = state.info.hash;
    let shared = Arc::new(Shared {
      id,
      info_hash,
      client_id: params.client_id,
      listen_port: params.listen_port,
      conf: params.conf,
      alert_tx: params.alert_tx,
      trackers: params.trackers,
      connector: params.connector,
      check_files_mutex: params.check_files_mutex,
      die_flag: AtomicBool::new(false),
      notify: Notify::new(),
      state: RwLock::new(state),
    });

    Self { shared }
  }

  pub fn id(&self) -> TorrentId {
    self.shared.id
  }

  pub fn info_hash(&self) -> Sha1Hash {
    self.shared.info_hash
  }

  /// Percent-encoded 60-char form of the info hash, ready to embed in a
  /// tracker query string.
  pub fn escaped_info_hash(&self) -> String {
    let mut s = String::with_capacity(60);
    for byte in self.shared.info_hash {
      s.push('%');
      s.push_str(&format!("{:02x}", byte));
    }
    s
  }

  pub fn start(&self) {
    self.shared.state.write().unwrap().run_status = RunStatus::Running;
    self.shared.notify.notify_one();
  }

  pub fn stop(&self) {
    self.shared.state.write().unwrap().run_status = RunStatus::Stopping;
    self.shared.notify.notify_one();
  }

  /// Requests Stopping and marks the torrent for teardown once the driver's
  /// Stopping transition completes. Cooperative: wakes a sleeping driver
  /// immediately rather than waiting for the next scheduled tick.
  pub fn close(&self) {
    self.stop();
    self.shared.die_flag.store(true, Ordering::Release);
    self.shared.notify.notify_one();
  }

  /// Replaces the destination directory. If resume state hasn't been loaded
  /// yet, attempts a lazy load; on failure (or absence of resume data)
  /// `io_loaded` stays false and the next `set_folder` call (or the running
  /// driver's own fast-init) will try again.
  pub fn set_folder(&self, path: impl Into<PathBuf>) {
    let mut state = self.shared.state.write().unwrap();
    state.destination = path.into();
    if !state.io_loaded {
      let mut disk = FsIo::default();
      match disk.load_resume(&state.info) {
        Ok(Some(_resume)) => state.io_loaded = true,
        Ok(None) => {}
        Err(e) => log::warn!("torrent {}: failed loading resume data: {}", self.shared.id, e),
      }
    }
  }

  pub fn set_has_piece(&self, piece: usize, have: bool) {
    let mut state = self.shared.state.write().unwrap();
    if have {
      state.completion.add_piece(piece);
    } else {
      state.completion.remove_piece(piece);
    }
  }

  pub fn set_file_priority(&self, file_index: usize, priority: Priority) {
    let mut state = self.shared.state.write().unwrap();
    state.info.set_file_priority(file_index, priority);
    sync_piece_priorities(&mut state);
  }

  pub fn set_file_priorities(&self, priorities: &[Priority]) {
    let mut state = self.shared.state.write().unwrap();
    state.info.set_file_priorities(priorities);
    sync_piece_priorities(&mut state);
  }

  /// No-op if the torrent is private; otherwise propagates the privacy flag
  /// to every currently attached peer immediately.
  pub fn disable_pex(&self, disabled: bool) {
    let mut state = self.shared.state.write().unwrap();
    if state.info.flags.contains(TorrentFlags::PRIVATE) {
      return;
    }
    state.pex_disabled = disabled;
    for peer in &state.peers {
      peer.set_private(disabled);
    }
  }

  pub fn recheck(&self) {
    self.shared.state.write().unwrap().recheck_requested = true;
  }

  pub fn reset_transfer_stats(&self) {
    let mut state = self.shared.state.write().unwrap();
    roll_transfer_stats(&mut state);
  }

  /// Admits `peer` if under [`MAX_PEER_COUNT`] and no existing peer shares
  /// its IPv4 address; returns 1 if admitted, 0 if rejected (the candidate
  /// is simply dropped).
  pub fn attach_peer(&self, peer: Peer) -> usize {
    let mut state = self.shared.state.write().unwrap();
    attach_peer_locked(&mut state, peer)
  }

  pub fn add_compact_peers(&self, from: PeerSource, buf: &[u8], count: usize) -> Result<usize, CompactPeerError> {
    let entries = parse_compact_peers(buf, count)?;
    let mut added = 0;
    for (addr, port) in entries {
      let connection = self.shared.connector.connect(addr, port, from);
      let peer = Peer::new(addr, port, from, connection);
      added += self.attach_peer(peer);
    }
    Ok(added)
  }

  pub fn stat(&self) -> TorrentStat {
    let state = self.shared.state.read().unwrap();
    build_stat(&self.shared, &state)
  }

  pub fn peers(&self) -> Vec<PeerSnapshot> {
    let state = self.shared.state.read().unwrap();
    state
      .peers
      .iter()
      .map(|p| PeerSnapshot {
        addr: p.address(),
        port: p.port(),
        from: p.source(),
        is_connected: p.is_connected(),
        am_choking: p.am_choking(),
        is_choking: p.is_choking(),
        am_interested: p.am_interested(),
        is_interested: p.is_interested(),
        progress: p.progress(),
        upload_rate: p.upload_rate(),
        download_rate: p.download_rate(),
        client: p.client().map(str::to_owned),
      })
      .collect()
  }

  /// Histogram of peer-owned copies of pieces, sampled at stride
  /// `pieceCount / size` (with replacement if `size > pieceCount`). Already
  /// complete pieces are reported as `-1`.
  pub fn availability(&self, size: usize) -> Vec<i32> {
    let state = self.shared.state.read().unwrap();
    let piece_count = state.info.piece_count;
    if piece_count == 0 || size == 0 {
      return Vec::new();
    }
    (0..size)
      .map(|i| {
        let piece = (i * piece_count) / size;
        if state.completion.has_piece(piece) {
          -1
        } else {
          state.peers.iter().filter(|p| p.has_piece(piece)).count() as i32
        }
      })
      .collect()
  }

  pub fn completion_per_file(&self) -> Vec<f64> {
    let state = self.shared.state.read().unwrap();
    state
      .info
      .files
      .iter()
      .map(|f| {
        if f.length == 0 {
          1.0
        } else {
          state.completion.file_bytes_completed(f) as f64 / f.length as f64
        }
      })
      .collect()
  }

  pub fn amount_finished(&self, size: usize) -> Vec<f64> {
    let state = self.shared.state.read().unwrap();
    let piece_count = state.info.piece_count;
    if piece_count == 0 || size == 0 {
      return Vec::new();
    }
    (0..size)
      .map(|i| {
        let piece = (i * piece_count) / size;
        state.completion.percent_blocks_in_piece(piece)
      })
      .collect()
  }

  /// Consumes the one-shot completion-status-change slot if it currently
  /// holds `status`, returning whether it matched.
  pub fn did_state_change_to(&self, status: CpStatus) -> bool {
    let mut state = self.shared.state.write().unwrap();
    if state.status_change == Some(status) {
      state.status_change = None;
      true
    } else {
      false
    }
  }

  /// Spawns the driver task and returns its join handle. Consumes a clone of
  /// the handle so the caller (the engine) can keep its own `Torrent` for
  /// issuing further operations.
  pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
    let shared = self.shared.clone();
    tokio::task::spawn(async move { run_driver(shared).await })
  }
}

fn attach_peer_locked(state: &mut TorrentState, peer: Peer) -> usize {
  if state.peers.len() >= MAX_PEER_COUNT {
    return 0;
  }
  if state.peers.iter().any(|p| p.address() == peer.address()) {
    return 0;
  }
  let private = state.info.flags.contains(TorrentFlags::PRIVATE) || state.pex_disabled;
  peer.set_private(private);
  state.peers.push(peer);
  1
}

fn sync_piece_priorities(state: &mut TorrentState) {
  for (index, piece) in state.info.pieces.iter().enumerate() {
    state.completion.set_piece_priority(index, piece.priority);
  }
}

fn roll_transfer_stats(state: &mut TorrentState) {
  state.downloaded_prev += state.downloaded_cur;
  state.downloaded_cur = 0;
  state.uploaded_prev += state.uploaded_cur;
  state.uploaded_cur = 0;
}

fn build_stat(shared: &Shared, state: &TorrentState) -> TorrentStat {
  let downloaded = state.downloaded_cur + state.downloaded_prev;
  let uploaded = state.uploaded_cur + state.uploaded_prev;
  let downloaded_valid = state.completion.downloaded_valid();

  let download_rate = if state.run_status == RunStatus::Running {
    state.download.rate()
  } else {
    0.0
  };

  let eta = if download_rate < 0.1 {
    -1
  } else {
    (state.completion.left_until_done() as f64 / download_rate / 1024.0) as i64
  };

  let ratio_denom = downloaded.max(downloaded_valid);
  let ratio = if ratio_denom == 0 { RATIO_NA } else { uploaded as f64 / ratio_denom as f64 };

  TorrentStat {
    id: shared.id,
    info_hash: shared.info_hash,
    name: state.info.name.clone(),
    destination: state.destination.clone(),
    run_status: state.run_status,
    cp_status: state.cp_status,
    error: state.error,
    error_string: state.error_string.clone(),
    total_size: state.info.total_size,
    left_until_done: state.completion.left_until_done(),
    downloaded_valid,
    percent_done: state.completion.percent_done(),
    percent_complete: state.completion.percent_complete(),
    downloaded,
    uploaded,
    download_rate,
    upload_rate: state.upload.rate(),
    swarm_speed: state.swarm_speed.rate(),
    eta,
    ratio,
    peer_count: state.peers.len(),
    cannot_connect: state.cannot_connect,
    seeders: state.tracker_seeders,
    leechers: state.tracker_leechers,
    start_date: state.start_date,
    stop_date: state.stop_date,
    activity_date: state.activity_date,
  }
}

fn set_error(state: &mut TorrentState, code: ErrorCode, message: String) {
  state.error = code;
  state.error_string = message.chars().take(256).collect();
}

fn snapshot_announce(shared: &Shared, state: &TorrentState, event: Option<Event>) -> Announce {
  Announce {
    info_hash: shared.info_hash,
    peer_id: shared.client_id,
    port: shared.listen_port,
    ip: None,
    downloaded: state.downloaded_cur + state.downloaded_prev,
    uploaded: state.uploaded_cur + state.uploaded_prev,
    left: state.completion.left_until_done(),
    peer_count: Some(shared.conf.min_requested_peer_count),
    tracker_id: None,
    event,
  }
}

async fn sleep_or_notified(shared: &Shared) {
  tokio::select! {
    _ = tokio::time::sleep(TICK) => {}
    _ = shared.notify.notified() => {}
  }
}

/// Attempts the file-recheck transition for this tick. Returns `true` if a
/// check ran (whether or not it found anything), so the caller skips the
/// rest of the tick's work; returns `false` (without touching run-status) if
/// no recheck was requested or the process-wide mutex was contended.
async fn maybe_check_files(shared: &Shared, disk: &mut Box<dyn DiskIo>) -> bool {
  let recheck_requested = shared.state.read().unwrap().recheck_requested;
  if !recheck_requested {
    return false;
  }

  let _guard = match shared.check_files_mutex.try_lock() {
    Ok(guard) => guard,
    Err(_) => return false,
  };

  let (prior_status, info, piece_hashes) = {
    let mut state = shared.state.write().unwrap();
    state.recheck_requested = false;
    let prior_status = state.run_status;
    state.run_status = RunStatus::Checking;
    (prior_status, state.info.clone(), state.piece_hashes.clone())
  };

  let result = disk.check_files(&info, &piece_hashes, CheckMode::Fast);

  {
    let mut state = shared.state.write().unwrap();
    match result {
      Ok(pieces) => {
        for piece in pieces {
          state.completion.add_piece(piece);
        }
      }
      Err(e) => log::warn!("torrent {}: file recheck failed: {}", shared.id, e),
    }
    state.run_status = prior_status;
  }

  true
}

async fn do_stopping(shared: &Shared, disk: &mut Box<dyn DiskIo>, tracker: &mut Option<TrackerSession>) {
  disk.close();

  if let Some(mut session) = tracker.take() {
    let params = {
      let state = shared.state.read().unwrap();
      snapshot_announce(shared, &state, Some(Event::Stopped))
    };
    session.stopped(params).await;
    session.close();
  }

  let mut state = shared.state.write().unwrap();
  state.peers.clear();
  state.upload.close();
  state.download.close();
  state.swarm_speed.close();
  state.stop_date = Some(SystemTime::now());
  state.run_status = RunStatus::Stopped;
}

async fn do_running_tick(shared: &Shared, disk: &mut Box<dyn DiskIo>, tracker: &mut Option<TrackerSession>) {
  if tracker.is_none() {
    {
      let mut state = shared.state.write().unwrap();
      roll_transfer_stats(&mut state);
      state.start_date = Some(SystemTime::now());
    }

    let (info, destination) = {
      let state = shared.state.read().unwrap();
      (state.info.clone(), state.destination.clone())
    };
    if let Err(e) = disk.init_fast(&info, &destination) {
      log::warn!("torrent {}: fast-init failed, requesting recheck: {}", shared.id, e);
      shared.state.write().unwrap().recheck_requested = true;
    }

    *tracker = shared.trackers.first().cloned().map(TrackerSession::init);
  }

  let (changed, completed_transition) = {
    let mut state = shared.state.write().unwrap();
    let new_status = state.completion.status();
    let changed = new_status != state.cp_status;
    if changed {
      state.cp_status = new_status;
      state.status_change = Some(new_status);
    }
    (changed, changed && new_status == CpStatus::Complete)
  };
  if changed {
    if let Err(e) = disk.sync() {
      log::warn!("torrent {}: disk sync failed: {}", shared.id, e);
    }
  }
  if completed_transition {
    let _ = shared.alert_tx.send(Alert::TorrentComplete(shared.id));
  }

  if let Some(session) = tracker.as_mut() {
    if completed_transition {
      let params = {
        let state = shared.state.read().unwrap();
        snapshot_announce(shared, &state, Some(Event::Completed))
      };
      session.completed(params).await;
    }

    let params = {
      let state = shared.state.read().unwrap();
      snapshot_announce(shared, &state, None)
    };
    let compact_peers = session.pulse(params).await;

    {
      let mut state = shared.state.write().unwrap();
      state.cannot_connect = session.cannot_connect();
      state.tracker_seeders = session.seeders();
      state.tracker_leechers = session.leechers();
      for (addr, port) in compact_peers {
        let connection = shared.connector.connect(addr, port, PeerSource::Tracker);
        let peer = Peer::new(addr, port, PeerSource::Tracker, connection);
        attach_peer_locked(&mut state, peer);
      }
    }
  }

  // Rotation and eviction bookkeeping need the writer lock, but the pulses
  // themselves do real (simulated) I/O and must run outside it so readers
  // (`stat`, `peers`, ...) aren't blocked for the whole loop.
  let mut peers = {
    let mut state = shared.state.write().unwrap();
    if state.peers.len() > 1 {
      state.peers.rotate_left(1);
    }
    std::mem::take(&mut state.peers)
  };

  let mut fatal_code = None;
  let mut i = 0;
  while i < peers.len() {
    let code = peers[i].pulse();
    if code.is_fatal() {
      fatal_code = Some(code);
      break;
    } else if !code.is_ok() {
      peers.remove(i);
    } else {
      i += 1;
    }
  }

  {
    let mut state = shared.state.write().unwrap();
    // Peers attached concurrently while the lock was released (e.g. via
    // `attach_peer`/`add_compact_peers`) landed in `state.peers`; keep them.
    peers.append(&mut state.peers);
    state.peers = peers;
    state.activity_date = Some(SystemTime::now());
  }

  if let Some(code) = fatal_code {
    let mut state = shared.state.write().unwrap();
    set_error(&mut state, ErrorCode::Io, format!("fatal peer io error: {:#x}", code.0));
    state.run_status = RunStatus::Stopping;
  }

  if shared.conf.alerts.peers {
    let stats = {
      let state = shared.state.read().unwrap();
      build_stat(shared, &state)
    };
    let _ = shared.alert_tx.send(Alert::TorrentStats { id: shared.id, stats: Box::new(stats) });
  }
}

/// The per-torrent driver task: wakes every [`TICK`] and, depending on
/// run-status, performs a stop-shutdown, a file-recheck, or a running tick.
/// Exits once `dieFlag` is set and run-status has settled to `Stopped`.
async fn run_driver(shared: Arc<Shared>) {
  let mut disk: Box<dyn DiskIo> = Box::new(FsIo::default());
  let mut tracker: Option<TrackerSession> = None;

  loop {
    let run_status = shared.state.read().unwrap().run_status;
    if shared.die_flag.load(Ordering::Acquire) && run_status == RunStatus::Stopped {
      break;
    }

    if maybe_check_files(&shared, &mut disk).await {
      sleep_or_notified(&shared).await;
      continue;
    }

    match run_status {
      RunStatus::Stopped | RunStatus::Checking => sleep_or_notified(&shared).await,
      RunStatus::Stopping => do_stopping(&shared, &mut disk, &mut tracker).await,
      RunStatus::Running => {
        do_running_tick(&shared, &mut disk, &mut tracker).await;
        sleep_or_notified(&shared).await;
      }
    }
  }

  disk.close();
}
