//! Set of module Error
pub mod crypto;
pub mod engine;
pub mod io;
pub mod metainfo;
pub mod torrent;
pub mod tracker;

pub use crypto::CryptoError;
pub use engine::NewTorrentError;
pub use io::IoError as DiskIoError;
pub use metainfo::MetainfoError;
pub use tokio::{io::Error as IoError, sync::mpsc::error::SendError};
pub use torrent::{ErrorCode, Result as TorrentResult, TorrentError};
pub use tracker::{Result as TrackerResult, TrackerError};

use crate::TorrentId;

pub type EngineResult<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
  #[error("channel error")]
  /// The channel on which some component in engine was listening or sending died.
  Channel,

  #[error("invalid download path")]
  /// The torrent download location is not valid.
  InvalidDownloadPath,

  #[error("invalid torrent id")]
  /// The torrent ID did not correspond to any entry.
  /// This is returned when user specified a torrent that does not exist.
  InvalidTorrentId,

  #[error("{0}")]
  /// Holds global IO related errors.
  Io(IoError),

  #[error("torrent {id} error: {error}")]
  /// An error specific to a torrent
  Torrent { id: TorrentId, error: TorrentError },

  #[error("torrent {id} tracker error: {error}")]
  /// An error that occurred while a torrent was announcing to tracker.
  Tracker { id: TorrentId, error: TrackerError },

  #[error("could not admit torrent: {0}")]
  /// An error that occurred while admitting a new torrent into the engine.
  Admission(#[from] NewTorrentError),

  #[error("invalid metainfo: {0}")]
  Metainfo(#[from] MetainfoError),
}

impl From<IoError> for Error {
  fn from(value: IoError) -> Self {
    Self::Io(value)
  }
}

impl<T> From<SendError<T>> for Error {
  fn from(_: SendError<T>) -> Self {
    Self::Channel
  }
}
