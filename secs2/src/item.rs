//! ## ITEM
//! **Based on SEMI E5§9.3, §9.6**

use crate::format;

/// ## ITEM
/// **Based on SEMI E5§9.3**
///
/// A SECS-II data item: a tagged union over 14 variants, with [`Item::List`]
/// recursively containing further [`Item`]s. Numeric, [`Item::Boolean`], and
/// [`Item::Binary`] variants carry an ordered sequence of primitive values
/// rather than a single scalar, matching the wire format's "N values of
/// width W" shape.
#[derive(Clone, Debug)]
pub enum Item {
  /// A [List] is an ordered sequence of [`Item`]s. Its length field counts
  /// elements, not bytes.
  ///
  /// [List]: Item::List
  List(Vec<Item>),
  /// ASCII character string, carried as raw bytes (no charset validation is
  /// performed — SECS-II does not require `Ascii` payloads to be 7-bit
  /// clean).
  Ascii(Vec<u8>),
  /// Opaque, untyped bytes.
  Binary(Vec<u8>),
  /// Each element is one byte on the wire: zero is `false`, any nonzero
  /// value is `true`.
  Boolean(Vec<bool>),
  /// 1-byte two's-complement integers.
  I1(Vec<i8>),
  /// 2-byte two's-complement integers, big-endian on the wire.
  I2(Vec<i16>),
  /// 4-byte two's-complement integers, big-endian on the wire.
  I4(Vec<i32>),
  /// 8-byte two's-complement integers, big-endian on the wire.
  I8(Vec<i64>),
  /// 1-byte unsigned integers.
  U1(Vec<u8>),
  /// 2-byte unsigned integers, big-endian on the wire.
  U2(Vec<u16>),
  /// 4-byte unsigned integers, big-endian on the wire.
  U4(Vec<u32>),
  /// 8-byte unsigned integers, big-endian on the wire.
  U8(Vec<u64>),
  /// IEEE-754 single-precision floats, transmitted as their big-endian bit
  /// pattern.
  F4(Vec<f32>),
  /// IEEE-754 double-precision floats, transmitted as their big-endian bit
  /// pattern.
  F8(Vec<f64>),
}

impl Item {
  /// The high-6-bit format code for this variant (see [`crate::format`]).
  pub(crate) fn format_code(&self) -> u8 {
    match self {
      Item::List(_) => format::LIST,
      Item::Ascii(_) => format::ASCII,
      Item::Binary(_) => format::BIN,
      Item::Boolean(_) => format::BOOL,
      Item::I1(_) => format::I1,
      Item::I2(_) => format::I2,
      Item::I4(_) => format::I4,
      Item::I8(_) => format::I8,
      Item::U1(_) => format::U1,
      Item::U2(_) => format::U2,
      Item::U4(_) => format::U4,
      Item::U8(_) => format::U8,
      Item::F4(_) => format::F4,
      Item::F8(_) => format::F8,
    }
  }

  /// The Item Length field value: element count for [`Item::List`], payload
  /// byte count for everything else.
  pub(crate) fn length_field_value(&self) -> usize {
    match self {
      Item::List(items) => items.len(),
      Item::Ascii(bytes) | Item::Binary(bytes) => bytes.len(),
      Item::Boolean(values) => values.len(),
      Item::I1(values) | Item::U1(values) => values.len(),
      Item::I2(values) => values.len() * 2,
      Item::U2(values) => values.len() * 2,
      Item::I4(values) => values.len() * 4,
      Item::U4(values) => values.len() * 4,
      Item::F4(values) => values.len() * 4,
      Item::I8(values) => values.len() * 8,
      Item::U8(values) => values.len() * 8,
      Item::F8(values) => values.len() * 8,
    }
  }

  /// Creates an [`Item::Ascii`] from anything that converts to bytes.
  pub fn ascii(value: impl Into<Vec<u8>>) -> Self {
    Item::Ascii(value.into())
  }

  /// Creates an [`Item::Binary`] with a single byte.
  pub fn bin(value: u8) -> Self {
    Item::Binary(vec![value])
  }

  /// Creates an [`Item::Boolean`] with a single value.
  pub fn boolean(value: bool) -> Self {
    Item::Boolean(vec![value])
  }

  /// Creates an [`Item::I1`] with a single value.
  pub fn i1(value: i8) -> Self {
    Item::I1(vec![value])
  }

  /// Creates an [`Item::I2`] with a single value.
  pub fn i2(value: i16) -> Self {
    Item::I2(vec![value])
  }

  /// Creates an [`Item::I4`] with a single value.
  pub fn i4(value: i32) -> Self {
    Item::I4(vec![value])
  }

  /// Creates an [`Item::I8`] with a single value.
  pub fn i8(value: i64) -> Self {
    Item::I8(vec![value])
  }

  /// Creates an [`Item::U1`] with a single value.
  pub fn u1(value: u8) -> Self {
    Item::U1(vec![value])
  }

  /// Creates an [`Item::U2`] with a single value.
  pub fn u2(value: u16) -> Self {
    Item::U2(vec![value])
  }

  /// Creates an [`Item::U4`] with a single value.
  pub fn u4(value: u32) -> Self {
    Item::U4(vec![value])
  }

  /// Creates an [`Item::U8`] with a single value.
  pub fn u8(value: u64) -> Self {
    Item::U8(vec![value])
  }

  /// Creates an [`Item::F4`] with a single value.
  pub fn f4(value: f32) -> Self {
    Item::F4(vec![value])
  }

  /// Creates an [`Item::F8`] with a single value.
  pub fn f8(value: f64) -> Self {
    Item::F8(vec![value])
  }

  /// Whether this Item is a [`Item::List`].
  pub fn is_list(&self) -> bool {
    matches!(self, Item::List(_))
  }
}

/// Bitwise equality: floats compare by bit pattern (`f32::to_bits` /
/// `f64::to_bits`), so `-0.0 != 0.0` and distinct NaN payloads compare
/// unequal, matching SEMI E5's "these are just bytes on the wire" model
/// rather than IEEE-754 comparison semantics.
impl PartialEq for Item {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Item::List(a), Item::List(b)) => a == b,
      (Item::Ascii(a), Item::Ascii(b)) => a == b,
      (Item::Binary(a), Item::Binary(b)) => a == b,
      (Item::Boolean(a), Item::Boolean(b)) => a == b,
      (Item::I1(a), Item::I1(b)) => a == b,
      (Item::I2(a), Item::I2(b)) => a == b,
      (Item::I4(a), Item::I4(b)) => a == b,
      (Item::I8(a), Item::I8(b)) => a == b,
      (Item::U1(a), Item::U1(b)) => a == b,
      (Item::U2(a), Item::U2(b)) => a == b,
      (Item::U4(a), Item::U4(b)) => a == b,
      (Item::U8(a), Item::U8(b)) => a == b,
      (Item::F4(a), Item::F4(b)) => {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
      },
      (Item::F8(a), Item::F8(b)) => {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
      },
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn float_equality_is_bitwise() {
    assert_ne!(Item::f4(0.0), Item::f4(-0.0));
    assert_eq!(Item::f4(1.5), Item::f4(1.5));
    let nan_a = Item::F8(vec![f64::from_bits(0x7ff8000000000001)]);
    let nan_b = Item::F8(vec![f64::from_bits(0x7ff8000000000002)]);
    assert_ne!(nan_a, nan_b);
  }

  #[test]
  fn list_length_field_counts_elements_not_bytes() {
    let list = Item::List(vec![Item::u1(1), Item::u4(2)]);
    assert_eq!(list.length_field_value(), 2);
  }
}
