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

//! # secs1
//!
//! SEMI Equipment Communications Standard 1 (SECS-I): half-duplex serial
//! framing with ENQ/EOT/ACK/NAK handshaking, block fragmentation, and the
//! T1-T4 timers. Carries [`secs2`](https://docs.rs/secs2) data items as its
//! message body.

mod block;
mod link;
mod state_machine;

pub use block::{
  checksum, decode_block, encode_block, fragment_message, DecodedBlock, Error as BlockError, Header,
  Reassembler, ACK, ENQ, EOT, HEADER_SIZE, MAX_BLOCK_DATA_SIZE, MAX_BLOCK_FRAME_SIZE, MAX_BLOCK_LENGTH, NAK,
};
pub use link::{Endpoint, Link, MemoryLink};
pub use state_machine::{Error, ReceivedMessage, State, StateMachine, Timeouts};
