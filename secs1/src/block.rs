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

//! ## BLOCK
//! **Based on SEMI E4§8-9**
//!
//! A SECS-I Block is the atomic unit exchanged between two serial link
//! endpoints: a one-byte Length field, a 10-byte [Header], up to 244 bytes
//! of data, and a 2-byte checksum. This module is pure byte-level encoding,
//! decoding, checksum validation, and multi-block message fragmentation and
//! reassembly — it does not touch the ENQ/EOT/ACK/NAK handshake, which lives
//! in [`crate::state_machine`].
//!
//! [Header]: Header

use std::fmt;

pub const ENQ: u8 = 0x05;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

pub const HEADER_SIZE: usize = 10;
pub const MAX_BLOCK_DATA_SIZE: usize = 244;
pub const MAX_BLOCK_LENGTH: usize = HEADER_SIZE + MAX_BLOCK_DATA_SIZE;
pub const MAX_BLOCK_FRAME_SIZE: usize = 1 + MAX_BLOCK_LENGTH + 2;

/// Everything that can go wrong framing or reassembling SECS-I blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
  /// A header field value can't be represented in the wire encoding, or a
  /// Length byte was outside the allowed range.
  InvalidBlock,
  /// The received checksum did not match the computed checksum.
  ChecksumMismatch,
  /// A block's Device ID did not match the link's configured Device ID, or
  /// changed mid-message.
  DeviceIdMismatch,
  /// A block matched the in-progress message's sequence number but
  /// disagreed on Stream, Function, or the R/W bits.
  ProtocolError,
  /// A block arrived with an unexpected Block Number.
  BlockSequenceError,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::InvalidBlock => write!(f, "invalid block"),
      Error::ChecksumMismatch => write!(f, "checksum mismatch"),
      Error::DeviceIdMismatch => write!(f, "device id mismatch"),
      Error::ProtocolError => write!(f, "protocol error"),
      Error::BlockSequenceError => write!(f, "block sequence error"),
    }
  }
}

impl std::error::Error for Error {}

/// ### HEADER
/// **Based on SEMI E4§9.3**
///
/// The 10-byte Block Header. `block_number` is stored as the full 8-bit
/// wire value used by this implementation — bit 7 of byte 5 (`end_bit`) is
/// kept separate rather than folded into a 15-bit block number, matching
/// the single-byte block-number layout this link uses in practice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
  pub reverse_bit: bool,
  /// 15-bit Device ID (bit 15 is `reverse_bit`).
  pub device_id: u16,
  pub wait_bit: bool,
  /// 7-bit Stream code.
  pub stream: u8,
  pub function: u8,
  /// Set on the last block of a message.
  pub end_bit: bool,
  pub block_number: u8,
  pub system_bytes: u32,
}

/// A decoded block: its [`Header`] plus a borrowed view of its data field.
#[derive(Clone, Copy, Debug)]
pub struct DecodedBlock<'a> {
  pub header: Header,
  pub data: &'a [u8],
}

/// Sums every byte mod 65536 — the SECS-I block checksum.
pub fn checksum(bytes: &[u8]) -> u16 {
  let mut sum: u32 = 0;
  for &b in bytes {
    sum += b as u32;
  }
  (sum & 0xFFFF) as u16
}

/// Encodes one complete block frame: `Length(1) + Header(10) + Data(N) +
/// Checksum(2)`.
pub fn encode_block(header: &Header, data: &[u8]) -> Result<Vec<u8>, Error> {
  if header.device_id > 0x7FFF {
    return Err(Error::InvalidBlock);
  }
  if data.len() > MAX_BLOCK_DATA_SIZE {
    return Err(Error::InvalidBlock);
  }

  let length = HEADER_SIZE + data.len();
  if length > MAX_BLOCK_LENGTH {
    return Err(Error::InvalidBlock);
  }

  let mut out = Vec::with_capacity(1 + length + 2);
  out.push(length as u8);

  let dev_hi = ((header.device_id >> 8) & 0x7F) as u8;
  let dev_lo = (header.device_id & 0xFF) as u8;
  out.push((if header.reverse_bit { 0x80 } else { 0x00 }) | dev_hi);
  out.push(dev_lo);

  out.push((if header.wait_bit { 0x80 } else { 0x00 }) | (header.stream & 0x7F));
  out.push(header.function);

  out.push(if header.end_bit { 0x80 } else { 0x00 });
  out.push(header.block_number);

  out.extend_from_slice(&header.system_bytes.to_be_bytes());
  out.extend_from_slice(data);

  let cs = checksum(&out[1..]);
  out.extend_from_slice(&cs.to_be_bytes());
  Ok(out)
}

/// Decodes and validates one complete block frame (Length byte through the
/// trailing checksum, all present in `frame`).
pub fn decode_block(frame: &[u8]) -> Result<DecodedBlock<'_>, Error> {
  if frame.len() > MAX_BLOCK_FRAME_SIZE || frame.len() < 1 + HEADER_SIZE + 2 {
    return Err(Error::InvalidBlock);
  }

  let length = frame[0] as usize;
  if length < HEADER_SIZE || length > MAX_BLOCK_LENGTH {
    return Err(Error::InvalidBlock);
  }
  if frame.len() != 1 + length + 2 {
    return Err(Error::InvalidBlock);
  }

  let payload = &frame[1..1 + length];
  let cs_recv = u16::from_be_bytes([frame[1 + length], frame[1 + length + 1]]);
  let cs_calc = checksum(payload);
  if cs_recv != cs_calc {
    return Err(Error::ChecksumMismatch);
  }

  let (b1, b2, b3, b4, b5, b6) = (payload[0], payload[1], payload[2], payload[3], payload[4], payload[5]);
  if b5 & 0x7F != 0 {
    return Err(Error::InvalidBlock);
  }

  let header = Header {
    reverse_bit: b1 & 0x80 != 0,
    device_id: (((b1 & 0x7F) as u16) << 8) | b2 as u16,
    wait_bit: b3 & 0x80 != 0,
    stream: b3 & 0x7F,
    function: b4,
    end_bit: b5 & 0x80 != 0,
    block_number: b6,
    system_bytes: u32::from_be_bytes([payload[6], payload[7], payload[8], payload[9]]),
  };

  Ok(DecodedBlock {
    header,
    data: &payload[HEADER_SIZE..length],
  })
}

/// Splits `payload` into ≤244-byte chunks and encodes each as a block,
/// overwriting `end_bit` and `block_number` in `base_header` as it goes.
/// Empty payloads still produce a single zero-data, `end_bit`-set block.
/// Returns an empty `Vec` if the payload would need more than 255 blocks.
pub fn fragment_message(mut base_header: Header, payload: &[u8]) -> Vec<Vec<u8>> {
  if !payload.is_empty() {
    let blocks = payload.len().div_ceil(MAX_BLOCK_DATA_SIZE);
    if blocks > 0xFF {
      return Vec::new();
    }
  }

  if payload.is_empty() {
    base_header.block_number = 1;
    base_header.end_bit = true;
    return vec![encode_block(&base_header, &[]).expect("validated header")];
  }

  let mut out = Vec::new();
  let mut offset = 0usize;
  let mut block_number: u8 = 1;
  while offset < payload.len() {
    let remaining = payload.len() - offset;
    let chunk = remaining.min(MAX_BLOCK_DATA_SIZE);
    let is_last = offset + chunk == payload.len();

    let mut hdr = base_header;
    hdr.block_number = block_number;
    hdr.end_bit = is_last;

    out.push(encode_block(&hdr, &payload[offset..offset + chunk]).expect("validated header"));
    offset += chunk;
    block_number = block_number.wrapping_add(1);
  }
  out
}

/// ### REASSEMBLER
/// **Based on SEMI E4§9.4**
///
/// Accumulates a sequence of blocks sharing a Device ID, Stream/Function,
/// System Bytes, and R/W bits into one reassembled message, checking Block
/// Number sequencing (blocks must arrive in order starting from 1) along
/// the way.
#[derive(Debug, Default)]
pub struct Reassembler {
  expected_device_id: Option<u16>,
  header: Option<Header>,
  next_block: u8,
  body: Vec<u8>,
}

impl Reassembler {
  pub fn new(expected_device_id: Option<u16>) -> Self {
    Self {
      expected_device_id,
      header: None,
      next_block: 1,
      body: Vec::new(),
    }
  }

  /// Clears all in-progress state, discarding any partially reassembled
  /// message.
  pub fn reset(&mut self) {
    self.header = None;
    self.next_block = 1;
    self.body.clear();
  }

  /// Whether a complete message (its final block's `end_bit` set) has been
  /// accumulated.
  pub fn has_message(&self) -> bool {
    matches!(self.header, Some(h) if h.end_bit)
  }

  /// The header of the in-progress or completed message. Only meaningful
  /// once at least one block has been accepted.
  pub fn message_header(&self) -> Header {
    self.header.unwrap_or_default()
  }

  /// The reassembled body accumulated so far.
  pub fn message_body(&self) -> &[u8] {
    &self.body
  }

  /// Folds one decoded block into the in-progress message.
  pub fn accept(&mut self, block: &DecodedBlock<'_>) -> Result<(), Error> {
    if let Some(expected) = self.expected_device_id {
      if block.header.device_id != expected {
        return Err(Error::DeviceIdMismatch);
      }
    }

    match self.header {
      None => {
        if block.header.block_number != 1 {
          return Err(Error::BlockSequenceError);
        }
        self.header = Some(block.header);
        self.next_block = block.header.block_number.wrapping_add(1);
        self.body.clear();
        self.body.extend_from_slice(block.data);
        Ok(())
      },
      Some(mut current) => {
        if block.header.device_id != current.device_id {
          return Err(Error::DeviceIdMismatch);
        }
        if block.header.system_bytes != current.system_bytes {
          return Err(Error::ProtocolError);
        }
        if block.header.stream != current.stream || block.header.function != current.function {
          return Err(Error::ProtocolError);
        }
        if block.header.reverse_bit != current.reverse_bit || block.header.wait_bit != current.wait_bit {
          return Err(Error::ProtocolError);
        }
        if block.header.block_number != self.next_block {
          return Err(Error::BlockSequenceError);
        }

        self.body.extend_from_slice(block.data);
        current.end_bit = block.header.end_bit;
        self.header = Some(current);
        self.next_block = self.next_block.wrapping_add(1);
        Ok(())
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_header() -> Header {
    Header {
      reverse_bit: false,
      device_id: 0x1234 & 0x7FFF,
      wait_bit: true,
      stream: 1,
      function: 1,
      end_bit: false,
      block_number: 1,
      system_bytes: 0xDEAD_BEEF,
    }
  }

  #[test]
  fn encode_decode_roundtrip() {
    let header = sample_header();
    let data = b"hello secs-i";
    let frame = encode_block(&header, data).unwrap();
    let decoded = decode_block(&frame).unwrap();
    assert_eq!(decoded.header, header);
    assert_eq!(decoded.data, data);
  }

  #[test]
  fn checksum_mismatch_is_detected() {
    let header = sample_header();
    let mut frame = encode_block(&header, b"x").unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    assert_eq!(decode_block(&frame).unwrap_err(), Error::ChecksumMismatch);
  }

  #[test]
  fn fragment_message_empty_payload_produces_one_block() {
    let frames = fragment_message(sample_header(), &[]);
    assert_eq!(frames.len(), 1);
    let decoded = decode_block(&frames[0]).unwrap();
    assert!(decoded.header.end_bit);
    assert_eq!(decoded.header.block_number, 1);
    assert!(decoded.data.is_empty());
  }

  #[test]
  fn fragment_message_splits_on_244_byte_boundary() {
    let payload = vec![0xAAu8; 500];
    let frames = fragment_message(sample_header(), &payload);
    assert_eq!(frames.len(), 3);
    for (i, frame) in frames.iter().enumerate() {
      let decoded = decode_block(frame).unwrap();
      assert_eq!(decoded.header.block_number, (i + 1) as u8);
      assert_eq!(decoded.header.end_bit, i == frames.len() - 1);
    }
  }

  #[test]
  fn reassembler_rebuilds_fragmented_message() {
    let payload = vec![0x42u8; 500];
    let frames = fragment_message(sample_header(), &payload);
    let mut reassembler = Reassembler::new(None);
    for frame in &frames {
      let decoded = decode_block(frame).unwrap();
      reassembler.accept(&decoded).unwrap();
    }
    assert!(reassembler.has_message());
    assert_eq!(reassembler.message_body(), payload.as_slice());
  }

  #[test]
  fn reassembler_rejects_out_of_order_block() {
    let payload = vec![0x01u8; 500];
    let frames = fragment_message(sample_header(), &payload);
    let mut reassembler = Reassembler::new(None);
    reassembler.accept(&decode_block(&frames[0]).unwrap()).unwrap();
    let err = reassembler.accept(&decode_block(&frames[2]).unwrap()).unwrap_err();
    assert_eq!(err, Error::BlockSequenceError);
  }

  #[test]
  fn reassembler_rejects_device_id_mismatch() {
    let mut reassembler = Reassembler::new(Some(1));
    let header = Header {
      device_id: 2,
      block_number: 1,
      end_bit: true,
      ..Default::default()
    };
    let decoded = DecodedBlock { header, data: &[] };
    assert_eq!(reassembler.accept(&decoded).unwrap_err(), Error::DeviceIdMismatch);
  }
}
