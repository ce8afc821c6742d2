// Copyright © 2024 the secs1 authors
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

//! ## LINK
//!
//! A byte-oriented, half-duplex serial link. [`Link`] doesn't care whether
//! the underlying medium is a real serial port, a pty, or (as provided here
//! for tests) an in-memory pipe — [`crate::state_machine::StateMachine`]
//! owns the ENQ/EOT/ACK/NAK handshake on top of it.

use std::io;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

/// A half-duplex byte link: writes go out whole, reads come back one byte
/// at a time so the caller can apply SECS-I's per-byte (T1) and
/// per-handshake (T2) timeouts independently.
pub trait Link: Send + Sync {
  /// Writes `data` in full.
  fn write_all(&self, data: &[u8]) -> io::Result<()>;

  /// Reads a single byte, or times out after `timeout` (`None` blocks
  /// indefinitely). A timeout is reported as `io::ErrorKind::TimedOut`.
  fn read_byte(&self, timeout: Option<Duration>) -> io::Result<u8>;
}

impl Link for Box<dyn Link> {
  fn write_all(&self, data: &[u8]) -> io::Result<()> {
    (**self).write_all(data)
  }

  fn read_byte(&self, timeout: Option<Duration>) -> io::Result<u8> {
    (**self).read_byte(timeout)
  }
}

/// An in-memory [`Link`] pair for tests: bytes written to one
/// [`Endpoint`] are read from the other. Supports injecting a fixed
/// per-write delay or dropping the first few bytes of a write, to
/// exercise retry and timeout paths without a real serial port.
pub struct MemoryLink;

impl MemoryLink {
  /// Creates a connected pair of endpoints.
  pub fn pair() -> (Endpoint, Endpoint) {
    let (tx_a, rx_a) = sync_channel::<u8>(4096);
    let (tx_b, rx_b) = sync_channel::<u8>(4096);
    let a = Endpoint {
      tx: tx_a,
      rx: Mutex::new(rx_b),
      drop_next: Mutex::new(0),
      fixed_delay: Mutex::new(None),
    };
    let b = Endpoint {
      tx: tx_b,
      rx: Mutex::new(rx_a),
      drop_next: Mutex::new(0),
      fixed_delay: Mutex::new(None),
    };
    (a, b)
  }
}

/// One side of a [`MemoryLink`] pair.
pub struct Endpoint {
  tx: SyncSender<u8>,
  rx: Mutex<Receiver<u8>>,
  drop_next: Mutex<usize>,
  fixed_delay: Mutex<Option<Duration>>,
}

impl Endpoint {
  /// Drops the next `n` bytes this endpoint attempts to write, simulating
  /// a lossy link for retry testing.
  pub fn drop_next(&self, n: usize) {
    *self.drop_next.lock().unwrap() = n;
  }

  /// Delays every subsequent write by `delay`, or clears the delay if
  /// `None`.
  pub fn set_fixed_delay(&self, delay: Option<Duration>) {
    *self.fixed_delay.lock().unwrap() = delay;
  }
}

impl Link for Endpoint {
  fn write_all(&self, data: &[u8]) -> io::Result<()> {
    if let Some(delay) = *self.fixed_delay.lock().unwrap() {
      std::thread::sleep(delay);
    }
    let mut drop_next = self.drop_next.lock().unwrap();
    for &byte in data {
      if *drop_next > 0 {
        *drop_next -= 1;
        continue;
      }
      self
        .tx
        .send(byte)
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"))?;
    }
    Ok(())
  }

  fn read_byte(&self, timeout: Option<Duration>) -> io::Result<u8> {
    let rx = self.rx.lock().unwrap();
    let result = match timeout {
      Some(timeout) => rx.recv_timeout(timeout),
      None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    result.map_err(|err| match err {
      RecvTimeoutError::Timeout => io::Error::new(io::ErrorKind::TimedOut, "read_byte timed out"),
      RecvTimeoutError::Disconnected => io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pair_relays_bytes() {
    let (a, b) = MemoryLink::pair();
    a.write_all(b"hi").unwrap();
    assert_eq!(b.read_byte(None).unwrap(), b'h');
    assert_eq!(b.read_byte(None).unwrap(), b'i');
  }

  #[test]
  fn read_times_out_with_no_data() {
    let (_a, b) = MemoryLink::pair();
    let err = b.read_byte(Some(Duration::from_millis(10))).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
  }

  #[test]
  fn drop_next_discards_leading_bytes() {
    let (a, b) = MemoryLink::pair();
    a.drop_next(2);
    a.write_all(b"abc").unwrap();
    assert_eq!(b.read_byte(None).unwrap(), b'c');
  }
}
