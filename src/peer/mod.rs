//! A torrent's view of a single remote peer.
//!
//! The teacher's `peer` module drove an actual async socket session
//! (`peer::session`) and reported progress back to its torrent with a
//! `SessionTick`. The real wire-level session is out of scope here; a
//! `pulse` operation and a set of predicate queries stand in for it, with the
//! actual byte-pushing hidden behind the [`PeerConnection`] trait so the
//! driver loop (`crate::torrent`) can be written and tested without a real
//! socket.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::torrent::ERROR_IO_MASK;
use crate::PieceIndex;

/// Where a peer's address was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSource {
  Tracker,
  Pex,
  /// Added directly by a caller (e.g. via a magnet link's `x.pe` param).
  Manual,
  IncomingConnection,
}

/// Result of a single `pulse`. Bit 31 (`ERROR_IO_MASK`) marks the error as
/// fatal to the owning torrent rather than local to this peer; all other set
/// bits are implementation-defined diagnostic flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseCode(pub u32);

impl PulseCode {
  pub const OK: PulseCode = PulseCode(0);

  pub fn is_ok(self) -> bool {
    self.0 == 0
  }

  pub fn is_fatal(self) -> bool {
    self.0 & ERROR_IO_MASK != 0
  }
}

/// The wire-level session behind a peer. A production implementation speaks
/// the peer wire protocol (handshake, choke/interested, request pipelining)
/// over a real socket; this crate only specifies the contract the driver
/// loop relies on.
pub trait PeerConnection: Send {
  /// Services the connection once: flushes pending writes, processes
  /// available reads, and returns a code describing the outcome.
  fn pulse(&mut self) -> PulseCode;

  fn is_connected(&self) -> bool;
  fn am_choking(&self) -> bool;
  fn is_choking(&self) -> bool;
  fn am_interested(&self) -> bool;
  fn is_interested(&self) -> bool;
  /// Fraction, in `[0, 1]`, of the torrent's pieces this peer has reported.
  fn progress(&self) -> f64;
  fn upload_rate(&self) -> f64;
  fn download_rate(&self) -> f64;
  fn has_piece(&self, piece: PieceIndex) -> bool;
  /// The peer's self-reported client string (from the handshake), if known.
  fn client(&self) -> Option<&str>;
}

/// A peer attached to a torrent: its address, provenance, and the wire
/// session that services it.
pub struct Peer {
  addr: Ipv4Addr,
  port: u16,
  from: PeerSource,
  /// Set by the torrent on admission from `(info.flags & PRIVATE) ||
  /// pex_disabled`, and readable/writable without the torrent's lock since
  /// `PeerConnection` implementations may consult it off the driver thread.
  private: AtomicBool,
  connection: Box<dyn PeerConnection>,
}

impl Peer {
  pub fn new(addr: Ipv4Addr, port: u16, from: PeerSource, connection: Box<dyn PeerConnection>) -> Self {
    Self {
      addr,
      port,
      from,
      private: AtomicBool::new(false),
      connection,
    }
  }

  pub fn address(&self) -> Ipv4Addr {
    self.addr
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn is_from(&self, source: PeerSource) -> bool {
    self.from == source
  }

  pub fn source(&self) -> PeerSource {
    self.from
  }

  pub fn set_private(&self, private: bool) {
    self.private.store(private, Ordering::Relaxed);
  }

  pub fn is_private(&self) -> bool {
    self.private.load(Ordering::Relaxed)
  }

  pub fn pulse(&mut self) -> PulseCode {
    self.connection.pulse()
  }

  pub fn is_connected(&self) -> bool {
    self.connection.is_connected()
  }

  pub fn am_choking(&self) -> bool {
    self.connection.am_choking()
  }

  pub fn is_choking(&self) -> bool {
    self.connection.is_choking()
  }

  pub fn am_interested(&self) -> bool {
    self.connection.am_interested()
  }

  pub fn is_interested(&self) -> bool {
    self.connection.is_interested()
  }

  pub fn progress(&self) -> f64 {
    self.connection.progress()
  }

  pub fn upload_rate(&self) -> f64 {
    self.connection.upload_rate()
  }

  pub fn download_rate(&self) -> f64 {
    self.connection.download_rate()
  }

  pub fn has_piece(&self, piece: PieceIndex) -> bool {
    self.connection.has_piece(piece)
  }

  pub fn client(&self) -> Option<&str> {
    self.connection.client()
  }
}

/// Dials a `PeerConnection` for a freshly learned address.
///
/// A real implementation would open a TCP socket and run the MSE handshake
/// ([`crate::crypto::CryptoSession`]) before returning; that wire-level work
/// is out of scope here (see [`PeerConnection`]). [`NullConnector`] is the
/// default, dependency-free stand-in.
pub trait PeerConnector: Send + Sync {
  fn connect(&self, addr: Ipv4Addr, port: u16, from: PeerSource) -> Box<dyn PeerConnection>;
}

/// A connector that never actually dials out; every connection it produces
/// reports itself as not connected and never transfers anything. Lets the
/// rest of the torrent driver (admission, rotation, eviction) run and be
/// tested without a real network stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConnector;

struct NullConnection;

impl PeerConnection for NullConnection {
  fn pulse(&mut self) -> PulseCode {
    PulseCode::OK
  }
  fn is_connected(&self) -> bool {
    false
  }
  fn am_choking(&self) -> bool {
    true
  }
  fn is_choking(&self) -> bool {
    true
  }
  fn am_interested(&self) -> bool {
    false
  }
  fn is_interested(&self) -> bool {
    false
  }
  fn progress(&self) -> f64 {
    0.0
  }
  fn upload_rate(&self) -> f64 {
    0.0
  }
  fn download_rate(&self) -> f64 {
    0.0
  }
  fn has_piece(&self, _piece: PieceIndex) -> bool {
    false
  }
  fn client(&self) -> Option<&str> {
    None
  }
}

impl PeerConnector for NullConnector {
  fn connect(&self, _addr: Ipv4Addr, _port: u16, _from: PeerSource) -> Box<dyn PeerConnection> {
    Box::new(NullConnection)
  }
}

/// Parses `count` compact peer entries (`{ipv4[4], port[2]}`, network byte
/// order) out of `buf`. Unlike the original, which trusted the caller's
/// `count` against the buffer length, this returns an error rather than
/// reading out of bounds if the two disagree.
pub fn parse_compact_peers(buf: &[u8], count: usize) -> Result<Vec<(Ipv4Addr, u16)>, CompactPeerError> {
  const ENTRY_LEN: usize = 6;
  if buf.len() != count * ENTRY_LEN {
    return Err(CompactPeerError::Truncated);
  }
  Ok(
    buf
      .chunks_exact(ENTRY_LEN)
      .map(|entry| {
        let addr = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        let port = u16::from_be_bytes([entry[4], entry[5]]);
        (addr, port)
      })
      .collect(),
  )
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompactPeerError {
  #[error("compact peer buffer length does not match the declared count")]
  Truncated,
}

#[cfg(test)]
mod tests {
  use super::*;

  struct MockConnection {
    pulse_result: PulseCode,
    connected: bool,
  }

  impl PeerConnection for MockConnection {
    fn pulse(&mut self) -> PulseCode {
      self.pulse_result
    }
    fn is_connected(&self) -> bool {
      self.connected
    }
    fn am_choking(&self) -> bool {
      true
    }
    fn is_choking(&self) -> bool {
      true
    }
    fn am_interested(&self) -> bool {
      false
    }
    fn is_interested(&self) -> bool {
      false
    }
    fn progress(&self) -> f64 {
      0.0
    }
    fn upload_rate(&self) -> f64 {
      0.0
    }
    fn download_rate(&self) -> f64 {
      0.0
    }
    fn has_piece(&self, _piece: PieceIndex) -> bool {
      false
    }
    fn client(&self) -> Option<&str> {
      None
    }
  }

  #[test]
  fn pulse_with_io_mask_bit_is_fatal() {
    let mut peer = Peer::new(
      Ipv4Addr::new(1, 2, 3, 4),
      6881,
      PeerSource::Tracker,
      Box::new(MockConnection {
        pulse_result: PulseCode(ERROR_IO_MASK | 1),
        connected: true,
      }),
    );
    assert!(peer.pulse().is_fatal());
  }

  #[test]
  fn ok_pulse_is_not_fatal() {
    let mut peer = Peer::new(
      Ipv4Addr::new(1, 2, 3, 4),
      6881,
      PeerSource::Pex,
      Box::new(MockConnection {
        pulse_result: PulseCode::OK,
        connected: true,
      }),
    );
    assert!(!peer.pulse().is_fatal());
    assert!(peer.pulse().is_ok());
  }

  #[test]
  fn parses_compact_peer_list() {
    let buf = [1, 2, 3, 4, 0x1a, 0xe1, 5, 6, 7, 8, 0x1a, 0xe2];
    let peers = parse_compact_peers(&buf, 2).unwrap();
    assert_eq!(peers, vec![(Ipv4Addr::new(1, 2, 3, 4), 6881), (Ipv4Addr::new(5, 6, 7, 8), 6882)]);
  }

  #[test]
  fn rejects_truncated_compact_peer_buffer() {
    let buf = [1, 2, 3, 4, 0x1a];
    assert_eq!(parse_compact_peers(&buf, 1).unwrap_err(), CompactPeerError::Truncated);
  }

  #[test]
  fn set_private_is_readable_without_mutable_access() {
    let peer = Peer::new(
      Ipv4Addr::new(1, 2, 3, 4),
      6881,
      PeerSource::Manual,
      Box::new(MockConnection {
        pulse_result: PulseCode::OK,
        connected: false,
      }),
    );
    assert!(!peer.is_private());
    peer.set_private(true);
    assert!(peer.is_private());
  }
}
