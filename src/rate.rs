//! A sliding-window throughput meter with an optional rate cap.
//!
//! Built on the same weighted-running-average idiom as [`crate::avg::SlidingAvg`]
//! (itself ported from libtorrent's blog post on running averages), adapted
//! to accumulate bytes-per-tick samples into a bytes/second rate rather than
//! a generic scalar mean.

use crate::avg::SlidingAvg;

/// Number of ticks (at the driver's 100ms tick rate) the average spans before
/// reaching full weight; chosen so the window covers roughly one second.
const DEFAULT_INVERTED_GAIN: usize = 10;

/// A closable, sliding-window rate counter.
///
/// `close()` lets a [`crate::torrent::Torrent`] drop its rate counters
/// deterministically on the Stopping transition without wrapping every
/// counter field in `Option`.
#[derive(Debug)]
pub struct RateCounter {
  avg: SlidingAvg,
  limit: Option<u64>,
  closed: bool,
}

impl RateCounter {
  pub fn new() -> Self {
    Self {
      avg: SlidingAvg::new(DEFAULT_INVERTED_GAIN),
      limit: None,
      closed: false,
    }
  }

  /// Records `n` bytes transferred in the most recent tick.
  ///
  /// Drops the timestamp a general-purpose rate counter would take,
  /// since every caller here is the 100ms driver tick and a sample always
  /// means "one tick's worth of bytes." If a caller ever needs to record
  /// at a non-tick cadence, this will need to take a `when` and weight the
  /// sample by elapsed time instead of assuming a fixed tick.
  pub fn record(&mut self, n: u64) {
    if self.closed {
      return;
    }
    self.avg.update(n as i64);
  }

  /// Returns the current rate estimate, in bytes/second.
  ///
  /// The underlying average is a per-tick sample; at the driver's 100ms tick
  /// rate this converts directly to a bytes/second rate by a factor of 10.
  pub fn rate(&self) -> f64 {
    if self.closed {
      return 0.0;
    }
    (self.avg.mean().max(0) as f64) * 10.0
  }

  pub fn set_limit(&mut self, bytes_per_sec: Option<u64>) {
    self.limit = bytes_per_sec;
  }

  pub fn limit(&self) -> Option<u64> {
    self.limit
  }

  pub fn reset(&mut self) {
    self.avg = SlidingAvg::new(DEFAULT_INVERTED_GAIN);
  }

  pub fn close(&mut self) {
    self.closed = true;
  }
}

impl Default for RateCounter {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_counter_has_zero_rate() {
    let c = RateCounter::new();
    assert_eq!(c.rate(), 0.0);
  }

  #[test]
  fn records_accumulate_into_a_rate() {
    let mut c = RateCounter::new();
    for _ in 0..20 {
      c.record(1000);
    }
    assert!(c.rate() > 0.0);
  }

  #[test]
  fn closed_counter_ignores_records_and_reports_zero() {
    let mut c = RateCounter::new();
    c.record(1000);
    c.close();
    c.record(1000);
    assert_eq!(c.rate(), 0.0);
  }

  #[test]
  fn reset_clears_accumulated_rate() {
    let mut c = RateCounter::new();
    for _ in 0..20 {
      c.record(5000);
    }
    assert!(c.rate() > 0.0);
    c.reset();
    assert_eq!(c.rate(), 0.0);
  }
}
