//! ## GROWABLE BUFFER
//!
//! A `Vec<u8>`-backed buffer that keeps a read cursor separate from the
//! write end, so that [`Buffer::consume`] is a pointer bump rather than a
//! `memmove` of the remaining bytes. The buffer only compacts (moves the
//! unread tail back to index 0) when it actually needs the room back, which
//! keeps streaming reassembly loops (read some bytes, consume a decoded
//! frame, read some more) cheap in the common case.

/// ### BUFFER
///
/// A growable byte buffer suited to streaming protocol decoding: bytes are
/// appended at the tail with [`Buffer::extend`], and a frame decoder consumes
/// bytes from the head with [`Buffer::consume`] once it has parsed them.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
  data: Vec<u8>,
  read_pos: usize,
}

impl Buffer {
  /// Creates an empty buffer.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates an empty buffer that can hold `capacity` bytes without
  /// reallocating.
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      data: Vec::with_capacity(capacity),
      read_pos: 0,
    }
  }

  /// The number of unread bytes currently held.
  pub fn len(&self) -> usize {
    self.data.len() - self.read_pos
  }

  /// Whether there are no unread bytes.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// A view of the unread bytes.
  pub fn as_slice(&self) -> &[u8] {
    &self.data[self.read_pos..]
  }

  /// Appends `bytes` to the tail of the buffer, compacting first if the
  /// already-consumed head has grown large relative to the unread tail.
  pub fn extend(&mut self, bytes: &[u8]) {
    if self.read_pos > 0 && self.read_pos >= self.data.len() / 2 {
      self.compact();
    }
    self.data.extend_from_slice(bytes);
  }

  /// Discards `n` bytes from the head of the unread region. `n` must not
  /// exceed [`Buffer::len`].
  ///
  /// # Panics
  /// Panics if `n > self.len()`.
  pub fn consume(&mut self, n: usize) {
    assert!(n <= self.len(), "consume() past the end of the buffer");
    self.read_pos += n;
    if self.read_pos == self.data.len() {
      self.data.clear();
      self.read_pos = 0;
    }
  }

  /// Moves the unread tail back to index 0, reclaiming the reserved head.
  pub fn compact(&mut self) {
    if self.read_pos == 0 {
      return;
    }
    self.data.drain(0..self.read_pos);
    self.read_pos = 0;
  }

  /// Discards all bytes, unread or not.
  pub fn clear(&mut self) {
    self.data.clear();
    self.read_pos = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extend_then_consume_is_visible() {
    let mut buf = Buffer::new();
    buf.extend(b"hello");
    assert_eq!(buf.as_slice(), b"hello");
    buf.consume(2);
    assert_eq!(buf.as_slice(), b"llo");
    assert_eq!(buf.len(), 3);
  }

  #[test]
  fn full_consume_resets_to_empty() {
    let mut buf = Buffer::new();
    buf.extend(b"abc");
    buf.consume(3);
    assert!(buf.is_empty());
    buf.extend(b"def");
    assert_eq!(buf.as_slice(), b"def");
  }

  #[test]
  fn compact_reclaims_head_room() {
    let mut buf = Buffer::with_capacity(8);
    buf.extend(b"12345678");
    buf.consume(6);
    buf.compact();
    assert_eq!(buf.as_slice(), b"78");
    buf.extend(b"9");
    assert_eq!(buf.as_slice(), b"789");
  }

  #[test]
  #[should_panic]
  fn consume_past_end_panics() {
    let mut buf = Buffer::new();
    buf.extend(b"ab");
    buf.consume(3);
  }
}
