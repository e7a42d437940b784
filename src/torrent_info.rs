//! Torrent-level static metadata: files, pieces, and priorities.
//!
//! Geometry and priority derivation are ported directly from
//! `libtransmission/torrent.c`'s `getBytePiece`, `initFilePieces` and
//! `calculatePiecePriority`.

use std::path::PathBuf;

use bitflags::bitflags;

use crate::Sha1Hash;

/// A file or piece's download priority.
///
/// Ordered so that `max` (used when deriving piece priority from overlapping
/// files) picks the more-wanted priority, with [`Priority::Dnd`] as the
/// floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
  /// "Do not download" -- excluded from completion accounting in
  /// `percent_done`.
  #[default]
  Dnd,
  Low,
  Normal,
  High,
}

bitflags! {
  /// Torrent-level flags taken from the info dictionary.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct TorrentFlags: u8 {
    /// Set when the info dictionary's `private` field is non-zero. Disables
    /// peer exchange regardless of what the caller requests.
    const PRIVATE = 1 << 0;
  }
}

/// A single file within a (possibly multi-file) torrent.
#[derive(Debug, Clone)]
pub struct FileEntry {
  pub name: PathBuf,
  pub length: u64,
  /// Byte offset of this file's first byte within the concatenated torrent
  /// content.
  pub offset: u64,
  pub first_piece: usize,
  pub last_piece: usize,
  pub priority: Priority,
}

/// A single piece's derived metadata.
#[derive(Debug, Clone, Copy)]
pub struct PieceDescriptor {
  pub priority: Priority,
}

/// Static, externally-produced description of a torrent's content layout.
#[derive(Debug, Clone)]
pub struct TorrentInfo {
  pub hash: Sha1Hash,
  pub name: String,
  pub piece_size: u32,
  pub piece_count: usize,
  pub total_size: u64,
  pub files: Vec<FileEntry>,
  pub pieces: Vec<PieceDescriptor>,
  pub flags: TorrentFlags,
}

impl TorrentInfo {
  /// Builds a `TorrentInfo` from the raw fields a metainfo parser produces,
  /// computing file piece ranges and initial (all-`Normal`) piece
  /// priorities.
  pub fn new(
    hash: Sha1Hash,
    name: String,
    piece_size: u32,
    total_size: u64,
    mut files: Vec<FileEntry>,
    flags: TorrentFlags,
  ) -> Self {
    let piece_count = piece_count(total_size, piece_size);

    let mut offset = 0u64;
    for file in files.iter_mut() {
      file.offset = offset;
      let (first, last) = file_piece_range(offset, file.length, piece_size);
      file.first_piece = first;
      file.last_piece = last;
      file.priority = Priority::Normal;
      offset += file.length;
    }

    let mut pieces = vec![PieceDescriptor { priority: Priority::Dnd }; piece_count];
    recompute_piece_priorities(&files, &mut pieces);

    Self {
      hash,
      name,
      piece_size,
      piece_count,
      total_size,
      files,
      pieces,
      flags,
    }
  }

  /// Sets a single file's priority and recomputes priority for every piece
  /// that file overlaps.
  pub fn set_file_priority(&mut self, file_index: usize, priority: Priority) {
    self.files[file_index].priority = priority;
    recompute_piece_priorities(&self.files, &mut self.pieces);
  }

  /// Sets all file priorities at once (bulk form of
  /// [`TorrentInfo::set_file_priority`]).
  ///
  /// The original implementation iterated this loop by piece count rather
  /// than file count, which was a bug whenever `pieceCount != fileCount`;
  /// this port iterates by file count.
  pub fn set_file_priorities(&mut self, priorities: &[Priority]) {
    for (file, priority) in self.files.iter_mut().zip(priorities.iter()) {
      file.priority = *priority;
    }
    recompute_piece_priorities(&self.files, &mut self.pieces);
  }
}

fn piece_count(total_size: u64, piece_size: u32) -> usize {
  if total_size == 0 {
    return 0;
  }
  ((total_size + piece_size as u64 - 1) / piece_size as u64) as usize
}

/// Returns `(first_piece, last_piece)` for a file at `offset` of `length`
/// bytes. A zero-length file still occupies exactly one piece.
fn file_piece_range(offset: u64, length: u64, piece_size: u32) -> (usize, usize) {
  let piece_size = piece_size as u64;
  let first = (offset / piece_size) as usize;
  let last_byte = offset + length.max(1) - 1;
  let last = (last_byte / piece_size) as usize;
  (first, last)
}

/// Recomputes every piece's priority as the max over all overlapping files'
/// priorities, with [`Priority::Dnd`] as the floor for pieces with no
/// overlapping file (shouldn't happen for a well-formed torrent, but is safe
/// regardless).
fn recompute_piece_priorities(files: &[FileEntry], pieces: &mut [PieceDescriptor]) {
  for piece in pieces.iter_mut() {
    piece.priority = Priority::Dnd;
  }
  if pieces.is_empty() {
    return;
  }
  for file in files {
    let last = file.last_piece.min(pieces.len() - 1);
    if file.first_piece > last {
      continue;
    }
    for piece in &mut pieces[file.first_piece..=last] {
      piece.priority = piece.priority.max(file.priority);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn file(name: &str, length: u64) -> FileEntry {
    FileEntry {
      name: name.into(),
      length,
      offset: 0,
      first_piece: 0,
      last_piece: 0,
      priority: Priority::Normal,
    }
  }

  #[test]
  fn piece_priority_is_max_over_overlapping_files() {
    let files = vec![file("a", 100), file("b", 100)];
    let mut info = TorrentInfo::new([0; 20], "t".into(), 80, 200, files, TorrentFlags::empty());
    // file a: pieces [0,1], file b: pieces [1,2]
    assert_eq!(info.files[0].first_piece, 0);
    assert_eq!(info.files[0].last_piece, 1);
    assert_eq!(info.files[1].first_piece, 1);
    assert_eq!(info.files[1].last_piece, 2);

    info.set_file_priority(0, Priority::High);
    info.set_file_priority(1, Priority::Low);

    assert_eq!(info.pieces[0].priority, Priority::High);
    assert_eq!(info.pieces[1].priority, Priority::High);
    assert_eq!(info.pieces[2].priority, Priority::Low);
  }

  #[test]
  fn zero_length_file_occupies_a_single_piece() {
    let files = vec![file("empty", 0)];
    let info = TorrentInfo::new([0; 20], "t".into(), 80, 0, files, TorrentFlags::empty());
    assert_eq!(info.files[0].first_piece, info.files[0].last_piece);
  }

  #[test]
  fn file_offsets_are_cumulative() {
    let files = vec![file("a", 50), file("b", 70), file("c", 10)];
    let info = TorrentInfo::new([0; 20], "t".into(), 64, 130, files, TorrentFlags::empty());
    assert_eq!(info.files[0].offset, 0);
    assert_eq!(info.files[1].offset, 50);
    assert_eq!(info.files[2].offset, 120);
  }
}
