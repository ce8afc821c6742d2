//! # secs-proto
//!
//! A backend-agnostic request/response layer over [`hsms`](https://docs.rs/hsms)
//! or [`secs1`](https://docs.rs/secs1): [`Session`] correlates primary
//! messages with their secondary replies by System Bytes, a [`Router`]
//! dispatches inbound primaries to registered (Stream, Function) handlers
//! and synthesizes their W=1 auto-replies, and [`SystemBytes`] allocates the
//! transaction identifiers that tie the two together.
//!
//! Decoding and encoding message bodies is left to the caller — this crate
//! passes `Vec<u8>` payloads through untouched. Compose it with
//! [`secs2::decode_one`]/[`secs2::encode`](https://docs.rs/secs2).

mod router;
mod session;
mod system_bytes;

pub use router::{DataMessage, Handler, HandlerResult, Router};
pub use session::{Error, Session, SessionOptions};
pub use system_bytes::{Error as SystemBytesError, SystemBytes};
