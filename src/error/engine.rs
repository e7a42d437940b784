use crate::Sha1Hash;

pub type Result<T, E = NewTorrentError> = std::result::Result<T, E>;

/// Error returned when the engine refuses to admit a torrent.
///
/// This mirrors the original implementation's construction-time error codes.
/// It is deliberately kept separate from [`crate::error::torrent::TorrentError`]
/// (which describes failures of an already-running torrent), since admission
/// failures never spawn a driver task.
#[derive(Debug, thiserror::Error)]
pub enum NewTorrentError {
  #[error("torrent is invalid")]
  /// The parsed `TorrentInfo` failed a structural invariant.
  Invalid,

  #[error("a torrent with this info hash is already registered")]
  /// An identical info hash is already present in the registry. Carries the
  /// hash back so the caller can look up the existing entry.
  Duplicate(Sha1Hash),

  #[error("a different torrent with the same name and destination already exists")]
  /// The `(name, destination)` pair collides with an existing torrent of a
  /// different info hash.
  DupDownload,

  #[error("invalid download path")]
  InvalidDownloadPath,

  #[error("{0}")]
  Io(std::io::Error),
}

impl From<std::io::Error> for NewTorrentError {
  fn from(value: std::io::Error) -> Self {
    Self::Io(value)
  }
}
