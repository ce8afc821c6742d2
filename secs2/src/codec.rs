// Copyright © 2024 the secs2 authors
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

//! ## CODEC
//! **Based on SEMI E5§9.2, §9.4**
//!
//! Encoding and decoding between [`Item`] trees and their SECS-II wire
//! representation: a one-byte format code, a 1-3 byte big-endian length
//! field, and the payload.

use std::fmt;

use crate::format;
use crate::item::Item;

/// The largest value a 3-byte length field can hold.
const MAX_LENGTH_FIELD_VALUE: usize = 0x00FF_FFFF;

/// Resource bounds applied while decoding untrusted input. Every bound is
/// checked before the corresponding allocation is made, so a hostile or
/// corrupt stream cannot force unbounded memory growth ahead of rejection.
#[derive(Clone, Debug)]
pub struct DecodeLimits {
  /// Maximum list nesting depth. The top-level item is depth 0.
  pub max_depth: usize,
  /// Maximum number of items (lists and scalars combined) across an entire
  /// decode.
  pub max_total_items: usize,
  /// Maximum number of payload bytes across an entire decode, summed over
  /// every scalar item's payload.
  pub max_total_bytes: usize,
  /// Maximum element count for any single list.
  pub max_list_elements: usize,
  /// Maximum payload length for any single scalar item.
  pub max_payload_len: usize,
}

impl Default for DecodeLimits {
  fn default() -> Self {
    Self {
      max_depth: 64,
      max_total_items: 65536,
      max_total_bytes: 64 * 1024 * 1024,
      max_list_elements: 65535,
      max_payload_len: 16 * 1024 * 1024,
    }
  }
}

/// Everything that can go wrong encoding or decoding an [`Item`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
  /// The input ended before a complete header or payload could be read.
  Truncated,
  /// The format byte's low 2 bits claimed a length-field width of 0, which
  /// SEMI E5 does not define.
  InvalidHeader,
  /// The format byte's high 6 bits did not match any known variant code.
  InvalidFormat(u8),
  /// A length value would not fit in the number of bytes available to
  /// encode it (greater than `0xFFFFFF`).
  LengthOverflow,
  /// A scalar item's payload length was not a multiple of its element
  /// width.
  LengthMismatch,
  /// `encode_to` was given a destination slice too small for the encoded
  /// item.
  BufferOverflow,
  /// A list's declared element count exceeded [`DecodeLimits::max_list_elements`].
  ListTooLarge,
  /// A scalar item's declared payload length exceeded
  /// [`DecodeLimits::max_payload_len`].
  PayloadTooLarge,
  /// Decoding would exceed [`DecodeLimits::max_total_items`],
  /// [`DecodeLimits::max_total_bytes`], or [`DecodeLimits::max_depth`].
  TotalBudgetExceeded,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Truncated => write!(f, "input ended before a complete item could be read"),
      Error::InvalidHeader => write!(f, "format byte declared a zero-width length field"),
      Error::InvalidFormat(code) => write!(f, "unrecognized item format code {code:#04o}"),
      Error::LengthOverflow => write!(f, "length value exceeds the 3-byte length field"),
      Error::LengthMismatch => write!(f, "payload length is not a multiple of the element width"),
      Error::BufferOverflow => write!(f, "destination buffer is too small"),
      Error::ListTooLarge => write!(f, "list element count exceeds the configured limit"),
      Error::PayloadTooLarge => write!(f, "item payload length exceeds the configured limit"),
      Error::TotalBudgetExceeded => write!(f, "decode exceeded a cumulative resource limit"),
    }
  }
}

impl std::error::Error for Error {}

/// The number of bytes needed to encode `length` in a SECS-II length field
/// (1, 2, or 3 bytes), or [`Error::LengthOverflow`] if it doesn't fit in 3.
fn length_field_bytes(length: usize) -> Result<u8, Error> {
  if length > MAX_LENGTH_FIELD_VALUE {
    Err(Error::LengthOverflow)
  } else if length <= 0xFF {
    Ok(1)
  } else if length <= 0xFFFF {
    Ok(2)
  } else {
    Ok(3)
  }
}

/// The number of bytes this item occupies on the wire: 1 header byte, plus
/// the length field width, plus the payload (recursively, for lists).
pub fn encoded_size(item: &Item) -> Result<usize, Error> {
  let length = item.length_field_value();
  let length_bytes = length_field_bytes(length)? as usize;
  let header_size = 1 + length_bytes;
  match item {
    Item::List(children) => {
      let mut total = header_size;
      for child in children {
        total += encoded_size(child)?;
      }
      Ok(total)
    },
    _ => Ok(header_size + length),
  }
}

/// Encodes `item` into a freshly allocated buffer sized exactly to fit.
pub fn encode(item: &Item) -> Result<Vec<u8>, Error> {
  let size = encoded_size(item)?;
  let mut out = vec![0u8; size];
  let written = encode_to(&mut out, item)?;
  debug_assert_eq!(written, size);
  Ok(out)
}

/// Encodes `item` into `out`, returning the number of bytes written.
/// Fails with [`Error::BufferOverflow`] if `out` is too small.
pub fn encode_to(out: &mut [u8], item: &Item) -> Result<usize, Error> {
  let mut pos = 0;
  encode_into(out, &mut pos, item)?;
  Ok(pos)
}

fn encode_into(out: &mut [u8], pos: &mut usize, item: &Item) -> Result<(), Error> {
  let length = item.length_field_value();
  let length_bytes = length_field_bytes(length)?;
  write_header(out, pos, item.format_code(), length_bytes, length)?;

  match item {
    Item::List(children) => {
      for child in children {
        encode_into(out, pos, child)?;
      }
    },
    Item::Ascii(bytes) | Item::Binary(bytes) | Item::U1(bytes) => write_bytes(out, pos, bytes)?,
    Item::Boolean(values) => {
      for &value in values {
        write_bytes(out, pos, &[value as u8])?;
      }
    },
    Item::I1(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::I2(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::I4(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::I8(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::U2(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::U4(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::U8(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_be_bytes())?;
      }
    },
    Item::F4(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_bits().to_be_bytes())?;
      }
    },
    Item::F8(values) => {
      for &value in values {
        write_bytes(out, pos, &value.to_bits().to_be_bytes())?;
      }
    },
  }
  Ok(())
}

fn write_header(
  out: &mut [u8],
  pos: &mut usize,
  format_code: u8,
  length_bytes: u8,
  length: usize,
) -> Result<(), Error> {
  let header_byte = format_code | (length_bytes - 1);
  write_bytes(out, pos, &[header_byte])?;
  let length_be = (length as u32).to_be_bytes();
  write_bytes(out, pos, &length_be[4 - length_bytes as usize..])
}

fn write_bytes(out: &mut [u8], pos: &mut usize, bytes: &[u8]) -> Result<(), Error> {
  let end = pos.checked_add(bytes.len()).ok_or(Error::BufferOverflow)?;
  let dest = out.get_mut(*pos..end).ok_or(Error::BufferOverflow)?;
  dest.copy_from_slice(bytes);
  *pos = end;
  Ok(())
}

/// Decoding budget tracked across one top-level [`decode_one`] call, shared
/// by every recursive descent into a list's children.
struct Budget<'a> {
  limits: &'a DecodeLimits,
  items_remaining: usize,
  bytes_remaining: usize,
}

/// Decodes a single item (recursively, through any nested lists) from the
/// front of `input`, returning the item and the number of bytes consumed.
/// Remaining bytes in `input` beyond the item are left untouched; callers
/// decoding a stream should re-invoke with `input[consumed..]`.
pub fn decode_one(input: &[u8], limits: &DecodeLimits) -> Result<(Item, usize), Error> {
  let mut budget = Budget {
    limits,
    items_remaining: limits.max_total_items,
    bytes_remaining: limits.max_total_bytes,
  };
  let mut pos = 0;
  let item = decode_into(input, &mut pos, &mut budget, 0)?;
  Ok((item, pos))
}

fn decode_into(input: &[u8], pos: &mut usize, budget: &mut Budget, depth: usize) -> Result<Item, Error> {
  if depth > budget.limits.max_depth {
    return Err(Error::TotalBudgetExceeded);
  }
  if budget.items_remaining == 0 {
    return Err(Error::TotalBudgetExceeded);
  }
  budget.items_remaining -= 1;

  let header_byte = *read_bytes(input, pos, 1)?.first().ok_or(Error::Truncated)?;
  if (header_byte & format::LENGTH_BYTES_MASK) == 0b11 {
    return Err(Error::InvalidHeader);
  }
  let length_bytes = (header_byte & format::LENGTH_BYTES_MASK) + 1;
  let format_code = header_byte & format::CODE_MASK;
  let length_field = read_bytes(input, pos, length_bytes as usize)?;
  let mut length: usize = 0;
  for &byte in length_field {
    length = (length << 8) | byte as usize;
  }

  if format_code == format::LIST {
    if length > budget.limits.max_list_elements {
      return Err(Error::ListTooLarge);
    }
    let mut children = Vec::with_capacity(length.min(1024));
    for _ in 0..length {
      children.push(decode_into(input, pos, budget, depth + 1)?);
    }
    return Ok(Item::List(children));
  }

  if length > budget.limits.max_payload_len {
    return Err(Error::PayloadTooLarge);
  }
  if length > budget.bytes_remaining {
    return Err(Error::TotalBudgetExceeded);
  }
  budget.bytes_remaining -= length;

  let payload = read_bytes(input, pos, length)?;
  decode_scalar(format_code, payload)
}

fn decode_scalar(format_code: u8, payload: &[u8]) -> Result<Item, Error> {
  match format_code {
    format::ASCII => Ok(Item::Ascii(payload.to_vec())),
    format::BIN => Ok(Item::Binary(payload.to_vec())),
    format::BOOL => Ok(Item::Boolean(payload.iter().map(|&b| b != 0).collect())),
    format::I1 => Ok(Item::I1(payload.iter().map(|&b| b as i8).collect())),
    format::U1 => Ok(Item::U1(payload.to_vec())),
    format::I2 => decode_fixed_width(payload, 2, |chunk| {
      i16::from_be_bytes(chunk.try_into().unwrap())
    })
    .map(Item::I2),
    format::U2 => decode_fixed_width(payload, 2, |chunk| {
      u16::from_be_bytes(chunk.try_into().unwrap())
    })
    .map(Item::U2),
    format::I4 => decode_fixed_width(payload, 4, |chunk| {
      i32::from_be_bytes(chunk.try_into().unwrap())
    })
    .map(Item::I4),
    format::U4 => decode_fixed_width(payload, 4, |chunk| {
      u32::from_be_bytes(chunk.try_into().unwrap())
    })
    .map(Item::U4),
    format::I8 => decode_fixed_width(payload, 8, |chunk| {
      i64::from_be_bytes(chunk.try_into().unwrap())
    })
    .map(Item::I8),
    format::U8 => decode_fixed_width(payload, 8, |chunk| {
      u64::from_be_bytes(chunk.try_into().unwrap())
    })
    .map(Item::U8),
    format::F4 => decode_fixed_width(payload, 4, |chunk| {
      f32::from_bits(u32::from_be_bytes(chunk.try_into().unwrap()))
    })
    .map(Item::F4),
    format::F8 => decode_fixed_width(payload, 8, |chunk| {
      f64::from_bits(u64::from_be_bytes(chunk.try_into().unwrap()))
    })
    .map(Item::F8),
    other => Err(Error::InvalidFormat(other)),
  }
}

fn decode_fixed_width<T>(
  payload: &[u8],
  width: usize,
  convert: impl Fn(&[u8]) -> T,
) -> Result<Vec<T>, Error> {
  if payload.len() % width != 0 {
    return Err(Error::LengthMismatch);
  }
  Ok(payload.chunks_exact(width).map(convert).collect())
}

fn read_bytes<'a>(input: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], Error> {
  let end = pos.checked_add(n).ok_or(Error::Truncated)?;
  let slice = input.get(*pos..end).ok_or(Error::Truncated)?;
  *pos = end;
  Ok(slice)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn roundtrip(item: Item) {
    let encoded = encode(&item).unwrap();
    let (decoded, consumed) = decode_one(&encoded, &DecodeLimits::default()).unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded, item);
  }

  #[test]
  fn roundtrips_scalars() {
    roundtrip(Item::ascii("HELLO"));
    roundtrip(Item::bin(0xAB));
    roundtrip(Item::boolean(true));
    roundtrip(Item::i4(-12345));
    roundtrip(Item::u8(u64::MAX));
    roundtrip(Item::f4(3.25));
    roundtrip(Item::f8(-0.0));
  }

  #[test]
  fn roundtrips_nested_lists() {
    let item = Item::List(vec![
      Item::ascii("A"),
      Item::List(vec![Item::u1(1), Item::u2(2)]),
      Item::boolean(false),
    ]);
    roundtrip(item);
  }

  #[test]
  fn empty_list_roundtrips() {
    roundtrip(Item::List(vec![]));
  }

  #[test]
  fn header_byte_encodes_smallest_length_field() {
    let encoded = encode(&Item::u1(7)).unwrap();
    // format byte low bits = 0 => 1-byte length field
    assert_eq!(encoded[0] & format::LENGTH_BYTES_MASK, 0);
    assert_eq!(encoded[1], 1);
  }

  #[test]
  fn truncated_header_is_rejected() {
    let err = decode_one(&[], &DecodeLimits::default()).unwrap_err();
    assert_eq!(err, Error::Truncated);
  }

  #[test]
  fn truncated_payload_is_rejected() {
    // U4 item claiming 4 bytes of payload but only 2 are present.
    let bytes = [format::U4, 4, 0, 0];
    let err = decode_one(&bytes, &DecodeLimits::default()).unwrap_err();
    assert_eq!(err, Error::Truncated);
  }

  #[test]
  fn mismatched_payload_width_is_rejected() {
    let bytes = [format::U4, 3, 1, 2, 3];
    let err = decode_one(&bytes, &DecodeLimits::default()).unwrap_err();
    assert_eq!(err, Error::LengthMismatch);
  }

  #[test]
  fn unknown_format_code_is_rejected() {
    let bytes = [0b000011_00, 0];
    let err = decode_one(&bytes, &DecodeLimits::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));
  }

  #[test]
  fn list_over_element_limit_is_rejected() {
    let limits = DecodeLimits {
      max_list_elements: 1,
      ..DecodeLimits::default()
    };
    let item = Item::List(vec![Item::u1(1), Item::u1(2)]);
    let encoded = encode(&item).unwrap();
    let err = decode_one(&encoded, &limits).unwrap_err();
    assert_eq!(err, Error::ListTooLarge);
  }

  #[test]
  fn payload_over_limit_is_rejected() {
    let limits = DecodeLimits {
      max_payload_len: 2,
      ..DecodeLimits::default()
    };
    let item = Item::Binary(vec![0u8; 10]);
    let encoded = encode(&item).unwrap();
    let err = decode_one(&encoded, &limits).unwrap_err();
    assert_eq!(err, Error::PayloadTooLarge);
  }

  #[test]
  fn depth_over_limit_is_rejected() {
    let limits = DecodeLimits {
      max_depth: 1,
      ..DecodeLimits::default()
    };
    let item = Item::List(vec![Item::List(vec![Item::List(vec![])])]);
    let encoded = encode(&item).unwrap();
    let err = decode_one(&encoded, &limits).unwrap_err();
    assert_eq!(err, Error::TotalBudgetExceeded);
  }

  #[test]
  fn encode_to_reports_buffer_overflow() {
    let item = Item::u4(1);
    let mut small = [0u8; 2];
    let err = encode_to(&mut small, &item).unwrap_err();
    assert_eq!(err, Error::BufferOverflow);
  }

  #[test]
  fn length_overflow_is_rejected_on_encode() {
    // Can't practically allocate a >16MiB Vec in a unit test to prove
    // LengthOverflow; length_field_bytes is exercised directly instead.
    assert_eq!(length_field_bytes(0x0100_0000).unwrap_err(), Error::LengthOverflow);
    assert_eq!(length_field_bytes(0xFF).unwrap(), 1);
    assert_eq!(length_field_bytes(0x100).unwrap(), 2);
    assert_eq!(length_field_bytes(0x1_0000).unwrap(), 3);
  }
}
