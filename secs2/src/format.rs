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

//! ## ITEM FORMAT CODES
//! **Based on SEMI E5§9.2.2**
//!
//! The high 6 bits of an Item's format byte. Kept as free-standing
//! constants, rather than folded into an enum discriminant, so they can be
//! combined with the low 2 "length field bytes minus one" bits without a
//! cast.

/// **Format Code 0o00** — List.
pub const LIST: u8 = 0b000000_00;
/// **Format Code 0o10** — Binary.
pub const BIN: u8 = 0b001000_00;
/// **Format Code 0o11** — Boolean.
pub const BOOL: u8 = 0b001001_00;
/// **Format Code 0o20** — ASCII.
pub const ASCII: u8 = 0b010000_00;
/// **Format Code 0o30** — 8-byte signed integer.
pub const I8: u8 = 0b011000_00;
/// **Format Code 0o31** — 1-byte signed integer.
pub const I1: u8 = 0b011001_00;
/// **Format Code 0o32** — 2-byte signed integer.
pub const I2: u8 = 0b011010_00;
/// **Format Code 0o34** — 4-byte signed integer.
pub const I4: u8 = 0b011100_00;
/// **Format Code 0o40** — 8-byte floating point.
pub const F8: u8 = 0b100000_00;
/// **Format Code 0o44** — 4-byte floating point.
pub const F4: u8 = 0b100100_00;
/// **Format Code 0o50** — 8-byte unsigned integer.
pub const U8: u8 = 0b101000_00;
/// **Format Code 0o51** — 1-byte unsigned integer.
pub const U1: u8 = 0b101001_00;
/// **Format Code 0o52** — 2-byte unsigned integer.
pub const U2: u8 = 0b101010_00;
/// **Format Code 0o54** — 4-byte unsigned integer.
pub const U4: u8 = 0b101100_00;

/// Mask over the high 6 bits of a format byte (the variant code).
pub const CODE_MASK: u8 = 0b1111_1100;
/// Mask over the low 2 bits of a format byte (length-field-bytes minus one).
pub const LENGTH_BYTES_MASK: u8 = 0b0000_0011;
