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

//! ## STATE MACHINE
//! **Based on SEMI E4§7-9**
//!
//! The SECS-I transport state machine: the ENQ/EOT/ACK/NAK handshake,
//! block-by-block transmission and reception with retry, and the T1-T4
//! timers, layered on top of a [`Link`].

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use crate::block::{self, Header, Reassembler};
use crate::link::Link;

/// SECS-I transport timers (SEMI E4§8).
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
  /// T1: maximum gap between successive bytes of one block.
  pub t1_intercharacter: Duration,
  /// T2: maximum wait for a handshake reply (EOT/ACK/NAK).
  pub t2_protocol: Duration,
  /// T3: maximum wait for a reply message to a primary message.
  pub t3_reply: Duration,
  /// T4: maximum gap between successive blocks of one message.
  pub t4_interblock: Duration,
}

impl Default for Timeouts {
  fn default() -> Self {
    Self {
      t1_intercharacter: Duration::from_secs(1),
      t2_protocol: Duration::from_secs(3),
      t3_reply: Duration::from_secs(45),
      t4_interblock: Duration::from_secs(45),
    }
  }
}

/// Everything that can go wrong running the transport state machine, layered
/// over [`block::Error`] and the [`Link`]'s own I/O errors.
#[derive(Debug)]
pub enum Error {
  Block(block::Error),
  Io(io::Error),
  /// The handshake or a block transmission exhausted its retry budget.
  TooManyRetries,
  /// `async_send`/`async_receive` was called while the state machine was
  /// already mid-transaction.
  NotIdle,
  /// A handshake byte was neither EOT/ACK/NAK nor a timeout.
  ProtocolError,
}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::Block(err) => write!(f, "{err}"),
      Error::Io(err) => write!(f, "{err}"),
      Error::TooManyRetries => write!(f, "exceeded retry limit"),
      Error::NotIdle => write!(f, "state machine is not idle"),
      Error::ProtocolError => write!(f, "unexpected response during handshake"),
    }
  }
}

impl std::error::Error for Error {}

impl From<block::Error> for Error {
  fn from(err: block::Error) -> Self {
    Error::Block(err)
  }
}

impl From<io::Error> for Error {
  fn from(err: io::Error) -> Self {
    Error::Io(err)
  }
}

fn is_timeout(err: &io::Error) -> bool {
  err.kind() == io::ErrorKind::TimedOut
}

/// The transport state machine's current phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
  Idle,
  WaitEot,
  WaitBlock,
  WaitCheck,
}

/// A fully reassembled incoming message.
#[derive(Clone, Debug, Default)]
pub struct ReceivedMessage {
  pub header: Header,
  pub body: Vec<u8>,
}

/// ### STATE MACHINE
/// **Based on SEMI E4§7-9**
///
/// Drives one [`Link`] through the SECS-I handshake, block framing, and
/// T1-T4 timers. A single `StateMachine` only supports one in-flight
/// operation at a time — [`StateMachine::send`] and
/// [`StateMachine::receive`] both return [`Error::NotIdle`] if called while
/// another is in progress.
pub struct StateMachine<L: Link> {
  link: L,
  expected_device_id: Option<u16>,
  timeouts: Timeouts,
  retry_limit: usize,
  state: Mutex<State>,
}

impl<L: Link> StateMachine<L> {
  pub fn new(link: L, expected_device_id: Option<u16>, timeouts: Timeouts, retry_limit: usize) -> Self {
    Self {
      link,
      expected_device_id,
      timeouts,
      retry_limit,
      state: Mutex::new(State::Idle),
    }
  }

  pub fn state(&self) -> State {
    *self.state.lock().unwrap()
  }

  pub fn timeouts(&self) -> Timeouts {
    self.timeouts
  }

  fn enter(&self, state: State) -> Result<(), Error> {
    let mut current = self.state.lock().unwrap();
    if *current != State::Idle {
      return Err(Error::NotIdle);
    }
    *current = state;
    Ok(())
  }

  fn set_state(&self, state: State) {
    *self.state.lock().unwrap() = state;
  }

  fn send_control(&self, byte: u8) -> io::Result<()> {
    self.link.write_all(&[byte])
  }

  /// Sends `body` as `header`, fragmenting across multiple blocks as
  /// needed, retrying the ENQ handshake and each block up to
  /// `retry_limit` times.
  pub fn send(&self, header: &Header, body: &[u8]) -> Result<(), Error> {
    self.enter(State::WaitEot)?;
    let result = self.send_inner(header, body);
    self.set_state(State::Idle);
    result
  }

  fn send_inner(&self, header: &Header, body: &[u8]) -> Result<(), Error> {
    let mut handshake_ok = false;
    for _ in 0..self.retry_limit {
      self.send_control(block::ENQ)?;
      match self.link.read_byte(Some(self.timeouts.t2_protocol)) {
        Ok(resp) if resp == block::EOT || resp == block::ACK => {
          handshake_ok = true;
          break;
        },
        Ok(resp) if resp == block::NAK => {
          log::warn!("secs1: ENQ handshake NAK'd, retrying");
          continue;
        },
        Err(err) if is_timeout(&err) => {
          log::warn!("secs1: ENQ handshake timed out, retrying");
          continue;
        },
        Err(err) => return Err(err.into()),
        Ok(_) => return Err(Error::ProtocolError),
      }
    }
    if !handshake_ok {
      log::warn!("secs1: ENQ handshake exhausted retry limit of {}", self.retry_limit);
      return Err(Error::TooManyRetries);
    }

    let frames = block::fragment_message(*header, body);
    for (index, frame) in frames.iter().enumerate() {
      self.set_state(State::WaitCheck);
      let mut attempts = 0;
      loop {
        self.link.write_all(frame)?;
        match self.link.read_byte(Some(self.timeouts.t2_protocol)) {
          Ok(resp) if resp == block::ACK => break,
          Ok(resp) if resp == block::NAK => {
            attempts += 1;
            log::warn!("secs1: block {index} NAK'd, retry {attempts}/{}", self.retry_limit);
            if attempts >= self.retry_limit {
              log::warn!("secs1: block {index} exhausted retry limit of {}", self.retry_limit);
              return Err(Error::TooManyRetries);
            }
          },
          Err(err) if is_timeout(&err) => {
            attempts += 1;
            log::warn!("secs1: block {index} reply timed out, retry {attempts}/{}", self.retry_limit);
            if attempts >= self.retry_limit {
              log::warn!("secs1: block {index} exhausted retry limit of {}", self.retry_limit);
              return Err(Error::TooManyRetries);
            }
          },
          Err(err) => return Err(err.into()),
          Ok(_) => return Err(Error::ProtocolError),
        }
      }
    }
    Ok(())
  }

  /// Waits for the peer to initiate the ENQ handshake and reassembles the
  /// message it sends, NAK-ing and retrying on bad blocks.
  pub fn receive(&self, timeout: Option<Duration>) -> Result<ReceivedMessage, Error> {
    self.enter(State::WaitBlock)?;
    let result = self.receive_inner(timeout);
    self.set_state(State::Idle);
    result
  }

  fn receive_inner(&self, timeout: Option<Duration>) -> Result<ReceivedMessage, Error> {
    loop {
      let byte = self.link.read_byte(timeout)?;
      if byte == block::ENQ {
        break;
      }
    }

    self.send_control(block::EOT)?;

    let mut reassembler = Reassembler::new(self.expected_device_id);
    let mut nack_count = 0usize;
    let mut next_block_timeout = self.timeouts.t2_protocol;

    while !reassembler.has_message() {
      let length_byte = self.link.read_byte(Some(next_block_timeout))?;
      let length = length_byte as usize;
      if length < block::HEADER_SIZE || length > block::MAX_BLOCK_LENGTH {
        self.send_control(block::NAK)?;
        log::warn!("secs1: NAK'd block, length byte {length} out of range");
        return Err(block::Error::InvalidBlock.into());
      }

      let mut frame = Vec::with_capacity(1 + length + 2);
      frame.push(length_byte);
      for _ in 0..length + 2 {
        frame.push(self.link.read_byte(Some(self.timeouts.t1_intercharacter))?);
      }

      let decoded = match block::decode_block(&frame) {
        Ok(decoded) => decoded,
        Err(err) => {
          self.send_control(block::NAK)?;
          nack_count += 1;
          log::warn!("secs1: NAK'd block, retry {nack_count}/{}: {err}", self.retry_limit);
          if nack_count >= self.retry_limit {
            log::warn!("secs1: receive exhausted retry limit of {}", self.retry_limit);
            return Err(Error::TooManyRetries);
          }
          continue;
        },
      };

      if let Err(err) = reassembler.accept(&decoded) {
        self.send_control(block::NAK)?;
        log::warn!("secs1: NAK'd block, reassembly rejected it: {err}");
        return Err(err.into());
      }

      nack_count = 0;
      self.send_control(block::ACK)?;
      next_block_timeout = self.timeouts.t4_interblock;
    }

    Ok(ReceivedMessage {
      header: reassembler.message_header(),
      body: reassembler.message_body().to_vec(),
    })
  }

  /// Sends `body` as `header`, then waits up to T3 for the reply message.
  pub fn transact(&self, header: &Header, body: &[u8]) -> Result<ReceivedMessage, Error> {
    self.send(header, body)?;
    self.receive(Some(self.timeouts.t3_reply))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::link::MemoryLink;
  use std::sync::Arc;
  use std::thread;

  fn quick_timeouts() -> Timeouts {
    Timeouts {
      t1_intercharacter: Duration::from_millis(200),
      t2_protocol: Duration::from_millis(200),
      t3_reply: Duration::from_millis(500),
      t4_interblock: Duration::from_millis(200),
    }
  }

  #[test]
  fn send_and_receive_roundtrip() {
    let (a, b) = MemoryLink::pair();
    let sender = Arc::new(StateMachine::new(a, None, quick_timeouts(), 3));
    let receiver = Arc::new(StateMachine::new(b, None, quick_timeouts(), 3));

    let header = Header {
      device_id: 1,
      stream: 1,
      function: 1,
      system_bytes: 42,
      ..Default::default()
    };
    let body = b"hello".to_vec();

    let receiver_clone = receiver.clone();
    let handle = thread::spawn(move || receiver_clone.receive(Some(Duration::from_secs(2))).unwrap());

    sender.send(&header, &body).unwrap();
    let received = handle.join().unwrap();
    assert_eq!(received.header.stream, 1);
    assert_eq!(received.body, body);
  }

  #[test]
  fn transact_returns_peer_reply() {
    let (a, b) = MemoryLink::pair();
    let initiator = Arc::new(StateMachine::new(a, None, quick_timeouts(), 3));
    let responder = Arc::new(StateMachine::new(b, None, quick_timeouts(), 3));

    let request_header = Header {
      device_id: 1,
      stream: 1,
      function: 1,
      wait_bit: true,
      system_bytes: 7,
      ..Default::default()
    };
    let reply_header = Header {
      device_id: 1,
      stream: 1,
      function: 2,
      system_bytes: 7,
      ..Default::default()
    };

    let responder_clone = responder.clone();
    let handle = thread::spawn(move || {
      let request = responder_clone.receive(Some(Duration::from_secs(2))).unwrap();
      assert_eq!(request.body, b"ping");
      responder_clone.send(&reply_header, b"pong").unwrap();
    });

    let reply = initiator.transact(&request_header, b"ping").unwrap();
    handle.join().unwrap();
    assert_eq!(reply.body, b"pong");
  }

  #[test]
  fn send_retries_through_nak() {
    let (a, b) = MemoryLink::pair();
    let sender = Arc::new(StateMachine::new(a, None, quick_timeouts(), 3));
    let responder_link = b;

    let header = Header {
      device_id: 1,
      ..Default::default()
    };

    let handle = thread::spawn(move || {
      // First handshake byte gets NAK'd, second gets EOT.
      assert_eq!(responder_link.read_byte(None).unwrap(), block::ENQ);
      responder_link.write_all(&[block::NAK]).unwrap();
      assert_eq!(responder_link.read_byte(None).unwrap(), block::ENQ);
      responder_link.write_all(&[block::EOT]).unwrap();
      // One block follows; read the whole frame and ACK it.
      let length = responder_link.read_byte(None).unwrap();
      let mut frame = vec![length];
      for _ in 0..(length as usize + 2) {
        frame.push(responder_link.read_byte(None).unwrap());
      }
      block::decode_block(&frame).unwrap();
      responder_link.write_all(&[block::ACK]).unwrap();
    });

    sender.send(&header, b"retry-me").unwrap();
    handle.join().unwrap();
  }
}
