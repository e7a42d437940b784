/// Errors surfaced by the [`crate::io::DiskIo`] abstraction.
///
/// This crate does not specify on-disk file layout or allocation strategy;
/// these are the error cases a conforming implementation must be able to
/// report.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
  #[error("{0}")]
  Io(std::io::Error),

  #[error("torrent data missing for the requested range")]
  MissingData,
}

impl From<std::io::Error> for IoError {
  fn from(value: std::io::Error) -> Self {
    Self::Io(value)
  }
}

pub type Result<T, E = IoError> = std::result::Result<T, E>;
