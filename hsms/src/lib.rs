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

//! # hsms
//!
//! High-Speed SECS Message Services, Single-Session mode (HSMS-SS): a
//! full-duplex TCP framing and session layer for exchanging
//! [`secs2`](https://docs.rs/secs2) data items, serving the same role that
//! [`secs1`](https://docs.rs/secs1) fills over a serial link.

mod connection;
mod message;
mod session;

pub use connection::{Connection, MemoryConnection, TcpConnection};
pub use message::{Message, MessageHeader, RejectReason, SelectStatus, SessionType};
pub use session::{reject_for, ConnectionMode, Error, Session, SessionOptions, SelectionState};
