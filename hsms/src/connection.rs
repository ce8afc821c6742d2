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

//! ## CONNECTION
//!
//! Framing of [`Message`]s over a duplex byte stream: a 4-byte big-endian
//! length (covering the 10-byte header plus data), followed by the header
//! and data themselves. [`Connection`] abstracts over the concrete
//! transport — a [`TcpStream`] in production, an in-memory pipe in tests —
//! the way the [`Link`](crate) abstraction does for SECS-I.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

use crate::message::{Message, MessageHeader};

/// A framed duplex connection carrying HSMS messages. T8 (inter-character
/// timeout) is enforced by the concrete implementation's read/write
/// timeout, configured once via [`Connection::set_timeout`].
pub trait Connection: Send + Sync {
  fn send(&self, message: &Message) -> io::Result<()>;

  /// Reads one complete message, or `Ok(None)` if no data arrived within
  /// the configured timeout (a T8-compliant idle lull, not an error).
  fn receive(&self) -> io::Result<Option<Message>>;

  fn set_timeout(&self, timeout: Duration) -> io::Result<()>;

  fn shutdown(&self);
}

fn encode_frame(message: &Message) -> Vec<u8> {
  let header_bytes = message.header.to_bytes();
  let length = (header_bytes.len() + message.text.len()) as u32;
  let mut out = Vec::with_capacity(4 + header_bytes.len() + message.text.len());
  out.extend_from_slice(&length.to_be_bytes());
  out.extend_from_slice(&header_bytes);
  out.extend_from_slice(&message.text);
  out
}

/// A [`Connection`] backed by a TCP socket, using `TcpStream`'s
/// read/write timeout as T8.
pub struct TcpConnection {
  stream: Mutex<TcpStream>,
}

impl TcpConnection {
  pub fn new(stream: TcpStream) -> Self {
    Self {
      stream: Mutex::new(stream),
    }
  }
}

impl Connection for TcpConnection {
  fn send(&self, message: &Message) -> io::Result<()> {
    let frame = encode_frame(message);
    self.stream.lock().unwrap().write_all(&frame)
  }

  fn receive(&self) -> io::Result<Option<Message>> {
    let mut stream = self.stream.lock().unwrap();

    let mut length_buf = [0u8; 4];
    match stream.read_exact(&mut length_buf) {
      Ok(()) => {},
      Err(err) if err.kind() == io::ErrorKind::TimedOut || err.kind() == io::ErrorKind::WouldBlock => {
        return Ok(None)
      },
      Err(err) => return Err(err),
    }
    let length = u32::from_be_bytes(length_buf) as usize;
    if length < 10 {
      return Err(io::Error::new(io::ErrorKind::InvalidData, "message length shorter than header"));
    }

    let mut header_buf = [0u8; 10];
    stream.read_exact(&mut header_buf)?;
    let header = MessageHeader::from_bytes(header_buf);

    let mut text = vec![0u8; length - 10];
    if !text.is_empty() {
      stream.read_exact(&mut text)?;
    }

    Ok(Some(Message { header, text }))
  }

  fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
    let stream = self.stream.lock().unwrap();
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
  }

  fn shutdown(&self) {
    let _ = self.stream.lock().unwrap().shutdown(std::net::Shutdown::Both);
  }
}

/// An in-memory [`Connection`] pair for tests, carrying framed messages
/// over an `mpsc` channel rather than raw bytes — equivalent in behavior
/// to a TCP loopback, but without the socket.
pub struct MemoryConnection {
  tx: SyncSender<Vec<u8>>,
  rx: Mutex<Receiver<Vec<u8>>>,
  timeout: Mutex<Duration>,
}

impl MemoryConnection {
  pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (tx_a, rx_a) = sync_channel(1024);
    let (tx_b, rx_b) = sync_channel(1024);
    let default_timeout = Duration::from_secs(5);
    (
      MemoryConnection {
        tx: tx_a,
        rx: Mutex::new(rx_b),
        timeout: Mutex::new(default_timeout),
      },
      MemoryConnection {
        tx: tx_b,
        rx: Mutex::new(rx_a),
        timeout: Mutex::new(default_timeout),
      },
    )
  }
}

impl Connection for MemoryConnection {
  fn send(&self, message: &Message) -> io::Result<()> {
    self
      .tx
      .send(encode_frame(message))
      .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer connection dropped"))
  }

  fn receive(&self) -> io::Result<Option<Message>> {
    let timeout = *self.timeout.lock().unwrap();
    let rx = self.rx.lock().unwrap();
    match rx.recv_timeout(timeout) {
      Ok(frame) => {
        let header = MessageHeader::from_bytes(frame[4..14].try_into().unwrap());
        Ok(Some(Message {
          header,
          text: frame[14..].to_vec(),
        }))
      },
      Err(RecvTimeoutError::Timeout) => Ok(None),
      Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer connection dropped")),
    }
  }

  fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
    *self.timeout.lock().unwrap() = timeout;
    Ok(())
  }

  fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn memory_connection_roundtrips_a_message() {
    let (a, b) = MemoryConnection::pair();
    let msg = Message::linktest_request(7);
    a.send(&msg).unwrap();
    let received = b.receive().unwrap().unwrap();
    assert_eq!(received.header.system, 7);
    assert_eq!(received.header.session_type, msg.header.session_type);
  }

  #[test]
  fn memory_connection_times_out_with_no_data() {
    let (_a, b) = MemoryConnection::pair();
    b.set_timeout(Duration::from_millis(10)).unwrap();
    assert!(b.receive().unwrap().is_none());
  }
}
