// Copyright © 2024 the hsms authors
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

//! ## MESSAGE
//! **Based on SEMI E37-1109§8.2**
//!
//! The wire-level HSMS message: a 4-byte length prefix, a 10-byte header,
//! and a data field whose meaning depends on the header's Session Type.
//! This module only knows about the header layout and the control-message
//! Session Types — it says nothing about the selection state machine that
//! gives them meaning, which lives in [`crate::session`].

/// ### SESSION TYPE
/// **Based on SEMI E37-1109§8.2.6.5-8.2.6.6**
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionType {
  DataMessage = 0,
  SelectRequest = 1,
  SelectResponse = 2,
  DeselectRequest = 3,
  DeselectResponse = 4,
  LinktestRequest = 5,
  LinktestResponse = 6,
  RejectRequest = 7,
  SeparateRequest = 9,
}

impl SessionType {
  /// Reconstructs a [`SessionType`] from its wire value, if recognized.
  pub fn from_byte(byte: u8) -> Option<Self> {
    match byte {
      0 => Some(SessionType::DataMessage),
      1 => Some(SessionType::SelectRequest),
      2 => Some(SessionType::SelectResponse),
      3 => Some(SessionType::DeselectRequest),
      4 => Some(SessionType::DeselectResponse),
      5 => Some(SessionType::LinktestRequest),
      6 => Some(SessionType::LinktestResponse),
      7 => Some(SessionType::RejectRequest),
      9 => Some(SessionType::SeparateRequest),
      _ => None,
    }
  }
}

/// ### SELECT STATUS
/// **Based on SEMI E37-1109§8.2.6.4 (response to Select Request)**
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectStatus {
  Ok = 0,
  AlreadyActive = 1,
  NotReady = 2,
  ExhaustedEntities = 3,
}

impl SelectStatus {
  pub fn from_byte(byte: u8) -> Option<Self> {
    match byte {
      0 => Some(SelectStatus::Ok),
      1 => Some(SelectStatus::AlreadyActive),
      2 => Some(SelectStatus::NotReady),
      3 => Some(SelectStatus::ExhaustedEntities),
      _ => None,
    }
  }
}

/// ### REJECT REASON
/// **Based on SEMI E37-1109§8.2.6.3 (byte 3 of a Reject.req)**
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
  SessionTypeNotSupported = 1,
  PresentationTypeNotSupported = 2,
  TransactionNotOpen = 3,
  EntityNotSelected = 4,
}

/// ### MESSAGE HEADER
/// **Based on SEMI E37-1109§8.2.5-8.2.6**
///
/// The fixed 10-byte header preceding every message's data field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
  pub session_id: u16,
  pub byte_2: u8,
  pub byte_3: u8,
  pub presentation_type: u8,
  pub session_type: u8,
  pub system: u32,
}

impl MessageHeader {
  pub fn to_bytes(self) -> [u8; 10] {
    let mut bytes = [0u8; 10];
    bytes[0..2].copy_from_slice(&self.session_id.to_be_bytes());
    bytes[2] = self.byte_2;
    bytes[3] = self.byte_3;
    bytes[4] = self.presentation_type;
    bytes[5] = self.session_type;
    bytes[6..10].copy_from_slice(&self.system.to_be_bytes());
    bytes
  }

  pub fn from_bytes(bytes: [u8; 10]) -> Self {
    Self {
      session_id: u16::from_be_bytes([bytes[0], bytes[1]]),
      byte_2: bytes[2],
      byte_3: bytes[3],
      presentation_type: bytes[4],
      session_type: bytes[5],
      system: u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
    }
  }

  pub fn wait_bit(&self) -> bool {
    self.byte_2 & 0x80 != 0
  }

  pub fn stream(&self) -> u8 {
    self.byte_2 & 0x7F
  }

  pub fn function(&self) -> u8 {
    self.byte_3
  }
}

/// A complete wire message: header plus data field. The 4-byte length
/// prefix used on the wire is not stored here — it is derived from
/// `text.len() + 10` when framing, and validated away when parsing.
#[derive(Clone, Debug)]
pub struct Message {
  pub header: MessageHeader,
  pub text: Vec<u8>,
}

impl Message {
  fn control(session_id: u16, byte_2: u8, byte_3: u8, session_type: SessionType, system: u32) -> Self {
    Self {
      header: MessageHeader {
        session_id,
        byte_2,
        byte_3,
        presentation_type: 0,
        session_type: session_type as u8,
        system,
      },
      text: Vec::new(),
    }
  }

  pub fn select_request(system: u32) -> Self {
    Self::control(0xFFFF, 0, 0, SessionType::SelectRequest, system)
  }

  pub fn select_response(system: u32, status: SelectStatus) -> Self {
    Self::control(0xFFFF, 0, status as u8, SessionType::SelectResponse, system)
  }

  pub fn deselect_request(system: u32) -> Self {
    Self::control(0xFFFF, 0, 0, SessionType::DeselectRequest, system)
  }

  pub fn deselect_response(system: u32, status: u8) -> Self {
    Self::control(0xFFFF, 0, status, SessionType::DeselectResponse, system)
  }

  pub fn linktest_request(system: u32) -> Self {
    Self::control(0xFFFF, 0, 0, SessionType::LinktestRequest, system)
  }

  pub fn linktest_response(system: u32) -> Self {
    Self::control(0xFFFF, 0, 0, SessionType::LinktestResponse, system)
  }

  pub fn separate_request(system: u32) -> Self {
    Self::control(0xFFFF, 0, 0, SessionType::SeparateRequest, system)
  }

  pub fn reject_request(session_id: u16, rejected_session_type: u8, reason: RejectReason, system: u32) -> Self {
    Self::control(session_id, rejected_session_type, reason as u8, SessionType::RejectRequest, system)
  }

  pub fn data(session_id: u16, wait_bit: bool, stream: u8, function: u8, system: u32, body: Vec<u8>) -> Self {
    Self {
      header: MessageHeader {
        session_id,
        byte_2: (if wait_bit { 0x80 } else { 0x00 }) | (stream & 0x7F),
        byte_3: function,
        presentation_type: 0,
        session_type: SessionType::DataMessage as u8,
        system,
      },
      text: body,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_roundtrips_through_bytes() {
    let header = MessageHeader {
      session_id: 0x1234,
      byte_2: 0x81,
      byte_3: 2,
      presentation_type: 0,
      session_type: SessionType::DataMessage as u8,
      system: 0xDEADBEEF,
    };
    assert_eq!(MessageHeader::from_bytes(header.to_bytes()), header);
  }

  #[test]
  fn header_extracts_wait_bit_and_stream() {
    let header = MessageHeader {
      session_id: 0,
      byte_2: 0x81,
      byte_3: 3,
      presentation_type: 0,
      session_type: 0,
      system: 0,
    };
    assert!(header.wait_bit());
    assert_eq!(header.stream(), 1);
    assert_eq!(header.function(), 3);
  }

  #[test]
  fn select_request_uses_reserved_session_id() {
    let msg = Message::select_request(42);
    assert_eq!(msg.header.session_id, 0xFFFF);
    assert_eq!(msg.header.session_type, SessionType::SelectRequest as u8);
    assert_eq!(msg.header.system, 42);
  }
}
