//! ## ROUTER
//!
//! Dispatches an inbound primary Data Message to the handler registered
//! for its (Stream, Function), or a default fallback if none matches.
//! Grounded on `original_source/include/secs/protocol/router.hpp`'s
//! `DataMessage`/`Router`, re-expressed without the coroutine `Handler`
//! signature — there is no async runtime here, so a handler is a plain
//! `Fn` called synchronously from [`crate::Session`]'s run loop.

use std::collections::HashMap;
use std::sync::Mutex;

/// One decoded Data Message: Stream/Function, the W-Bit, its System Bytes,
/// and the raw `secs2`-encoded body. The router and session layer pass
/// bodies around undecoded — decoding with [`secs2::decode_one`] is the
/// handler's job, matching spec.md's boundary between transport and data
/// representation.
#[derive(Clone, Debug)]
pub struct DataMessage {
  pub stream: u8,
  pub function: u8,
  pub w_bit: bool,
  pub system_bytes: u32,
  pub body: Vec<u8>,
}

impl DataMessage {
  /// A primary message carries odd-numbered functions (SEMI E5§6.4).
  pub fn is_primary(&self) -> bool {
    self.function % 2 == 1
  }

  /// A secondary message carries even-numbered functions.
  pub fn is_secondary(&self) -> bool {
    self.function % 2 == 0
  }
}

/// What a [`Handler`] returns: either the encoded body of the secondary
/// reply to send back (only meaningful when the request's W-Bit was set),
/// or an error to log and, where the backend supports it, report upstream
/// as a reject.
pub type HandlerResult = Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;

/// A handler for one (Stream, Function). Boxed rather than generic since
/// the router stores a heterogeneous collection of them.
pub type Handler = Box<dyn Fn(&DataMessage) -> HandlerResult + Send + Sync>;

fn key(stream: u8, function: u8) -> u16 {
  ((stream as u16) << 8) | function as u16
}

/// ### ROUTER
///
/// A mutex-guarded `(Stream, Function) -> Handler` table plus an optional
/// default, consulted when no specific handler is registered.
#[derive(Default)]
pub struct Router {
  handlers: Mutex<HashMap<u16, Handler>>,
  default: Mutex<Option<Handler>>,
}

impl Router {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers (or replaces) the handler for `(stream, function)`.
  pub fn set(&self, stream: u8, function: u8, handler: Handler) {
    self.handlers.lock().unwrap().insert(key(stream, function), handler);
  }

  /// Removes the handler for `(stream, function)`, if any.
  pub fn erase(&self, stream: u8, function: u8) {
    self.handlers.lock().unwrap().remove(&key(stream, function));
  }

  /// Removes every registered handler, including the default.
  pub fn clear(&self) {
    self.handlers.lock().unwrap().clear();
    *self.default.lock().unwrap() = None;
  }

  /// Registers the fallback invoked when no specific handler matches.
  pub fn set_default(&self, handler: Handler) {
    *self.default.lock().unwrap() = Some(handler);
  }

  /// Runs the handler registered for `message`'s (Stream, Function), or
  /// the default if none is registered. Returns `None` if neither exists.
  pub fn dispatch(&self, message: &DataMessage) -> Option<HandlerResult> {
    let k = key(message.stream, message.function);
    {
      let handlers = self.handlers.lock().unwrap();
      if let Some(handler) = handlers.get(&k) {
        return Some(handler(message));
      }
    }
    let default = self.default.lock().unwrap();
    default.as_ref().map(|handler| handler(message))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn msg(stream: u8, function: u8) -> DataMessage {
    DataMessage {
      stream,
      function,
      w_bit: true,
      system_bytes: 1,
      body: Vec::new(),
    }
  }

  #[test]
  fn odd_function_is_primary() {
    assert!(msg(1, 1).is_primary());
    assert!(msg(1, 2).is_secondary());
  }

  #[test]
  fn dispatch_finds_exact_match() {
    let router = Router::new();
    router.set(1, 1, Box::new(|_m| Ok(vec![0xAA])));
    let result = router.dispatch(&msg(1, 1)).unwrap().unwrap();
    assert_eq!(result, vec![0xAA]);
  }

  #[test]
  fn dispatch_falls_back_to_default() {
    let router = Router::new();
    router.set_default(Box::new(|_m| Ok(vec![0xFF])));
    let result = router.dispatch(&msg(9, 9)).unwrap().unwrap();
    assert_eq!(result, vec![0xFF]);
  }

  #[test]
  fn dispatch_returns_none_without_match_or_default() {
    let router = Router::new();
    assert!(router.dispatch(&msg(1, 1)).is_none());
  }

  #[test]
  fn erase_removes_a_registered_handler() {
    let router = Router::new();
    router.set(1, 1, Box::new(|_m| Ok(Vec::new())));
    router.erase(1, 1);
    assert!(router.dispatch(&msg(1, 1)).is_none());
  }

  #[test]
  fn clear_removes_handlers_and_default() {
    let router = Router::new();
    router.set(1, 1, Box::new(|_m| Ok(Vec::new())));
    router.set_default(Box::new(|_m| Ok(Vec::new())));
    router.clear();
    assert!(router.dispatch(&msg(1, 1)).is_none());
    assert!(router.dispatch(&msg(2, 2)).is_none());
  }
}
