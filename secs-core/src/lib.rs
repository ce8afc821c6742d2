// Copyright © 2024 the secs-core authors
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

//! # SECS/HSMS CORE PRIMITIVES
//!
//! Small, dependency-light building blocks shared by [`secs1`], [`hsms`], and
//! [`secs-proto`]:
//!
//! - [`Buffer`]: a growable byte buffer with a reserved head, so that
//!   discarding already-consumed bytes from the front is cheap until the
//!   reserved region is exhausted.
//! - [`Event`]: a manual-reset, single-producer signal supporting bounded
//!   waits and explicit cancellation, distinguishing "timed out" from
//!   "cancelled" as distinct terminal outcomes.
//!
//! [`secs1`]:       https://docs.rs/secs1
//! [`hsms`]:        https://docs.rs/hsms
//! [`secs-proto`]:  https://docs.rs/secs-proto

mod buffer;
mod event;

pub use buffer::Buffer;
pub use event::{Event, WaitOutcome};
