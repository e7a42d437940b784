use tokio::io::Error as IoError;
use tokio::sync::mpsc::error::SendError;

pub type Result<T, E = TorrentError> = std::result::Result<T, E>;

/// A compact error code mirroring the original implementation's taxonomy, so
/// that `TorrentStat::error` can be compared cheaply and serialized to a UI
/// without needing the full [`TorrentError`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
  #[default]
  Ok,
  Other,
  Invalid,
  Duplicate,
  DupDownload,
  Io,
}

/// Bit tested against a peer's `pulse` return code to decide whether the
/// failure is fatal to the whole torrent (as opposed to just that peer).
pub const ERROR_IO_MASK: u32 = 1 << 31;

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
  #[error("channel error")]
  /// The channel on which some component in engine was
  /// listening or sending died.
  Channel,

  #[error("{0}")]
  /// An Io error occurred.
  Io(std::io::Error),

  #[error("a fatal peer io error stopped the torrent: {0:#x}")]
  /// A peer's `pulse` returned a code with [`ERROR_IO_MASK`] set.
  FatalPeerIo(u32),
}

impl TorrentError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Channel => ErrorCode::Other,
      Self::Io(_) => ErrorCode::Io,
      Self::FatalPeerIo(_) => ErrorCode::Io,
    }
  }
}

impl From<IoError> for TorrentError {
  fn from(value: IoError) -> Self {
    Self::Io(value)
  }
}

impl<T> From<SendError<T>> for TorrentError {
  fn from(_: SendError<T>) -> Self {
    Self::Channel
  }
}
