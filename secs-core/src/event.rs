//! ## MANUAL-RESET EVENT
//!
//! A single-producer, multi-waiter signal. `set()` wakes every current and
//! future waiter until `reset()` is called; `cancel()` wakes waiters without
//! marking the event set. Ported from the generation-counter technique in
//! the original asio-coroutine implementation (`secs::core::Event`): each
//! waiter snapshots the current set/cancel generation before blocking, then
//! compares against the latest generation on wake to decide whether it was
//! really set, merely cancelled, or simply timed out — which keeps the
//! set/cancel/timeout races from being order-dependent.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The outcome of a call to [`Event::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
  /// The event was (or became) set before the deadline.
  Set,
  /// The event was cancelled while this call was waiting.
  Cancelled,
  /// Neither set nor cancelled occurred before the deadline.
  TimedOut,
}

#[derive(Default)]
struct State {
  signaled: bool,
  set_generation: u64,
  cancel_generation: u64,
}

/// ### EVENT
///
/// A manual-reset signal with bounded waits and explicit cancellation.
pub struct Event {
  state: Mutex<State>,
  condvar: Condvar,
}

impl Default for Event {
  fn default() -> Self {
    Self::new()
  }
}

impl Event {
  /// Creates an unset event.
  pub fn new() -> Self {
    Self {
      state: Mutex::new(State::default()),
      condvar: Condvar::new(),
    }
  }

  /// Sets the event and wakes every waiter. Idempotent.
  pub fn set(&self) {
    let mut state = self.state.lock().unwrap();
    state.signaled = true;
    state.set_generation += 1;
    self.condvar.notify_all();
  }

  /// Clears the set state. Does not wake or affect in-progress waiters.
  pub fn reset(&self) {
    let mut state = self.state.lock().unwrap();
    state.signaled = false;
  }

  /// Wakes every current waiter with [`WaitOutcome::Cancelled`], without
  /// marking the event set.
  pub fn cancel(&self) {
    let mut state = self.state.lock().unwrap();
    state.cancel_generation += 1;
    self.condvar.notify_all();
  }

  /// Whether the event is currently set.
  pub fn is_set(&self) -> bool {
    self.state.lock().unwrap().signaled
  }

  /// Blocks until the event is set, cancelled, or `timeout` elapses.
  /// `None` waits indefinitely for a set or a cancel.
  pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
    let mut state = self.state.lock().unwrap();
    if state.signaled {
      return WaitOutcome::Set;
    }
    let local_set_generation = state.set_generation;
    let local_cancel_generation = state.cancel_generation;

    let deadline = timeout.map(|d| Instant::now() + d);
    loop {
      if state.set_generation != local_set_generation {
        return WaitOutcome::Set;
      }
      if state.cancel_generation != local_cancel_generation {
        return WaitOutcome::Cancelled;
      }
      let remaining = match deadline {
        Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
          Some(remaining) if !remaining.is_zero() => remaining,
          _ => return WaitOutcome::TimedOut,
        },
        None => Duration::from_secs(u32::MAX as u64),
      };
      let (guard, wait_result) = self.condvar.wait_timeout(state, remaining).unwrap();
      state = guard;
      if wait_result.timed_out() && deadline.is_some() {
        // Re-check generations below before giving up: a spurious wake that
        // raced with set()/cancel() at exactly the deadline must not be
        // misreported as a timeout.
        if state.set_generation != local_set_generation {
          return WaitOutcome::Set;
        }
        if state.cancel_generation != local_cancel_generation {
          return WaitOutcome::Cancelled;
        }
        return WaitOutcome::TimedOut;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn wait_returns_immediately_once_set() {
    let event = Event::new();
    event.set();
    assert_eq!(event.wait(Some(Duration::from_millis(10))), WaitOutcome::Set);
  }

  #[test]
  fn wait_times_out_when_never_set() {
    let event = Event::new();
    assert_eq!(event.wait(Some(Duration::from_millis(20))), WaitOutcome::TimedOut);
  }

  #[test]
  fn set_wakes_a_blocked_waiter() {
    let event = Arc::new(Event::new());
    let waiter = {
      let event = event.clone();
      thread::spawn(move || event.wait(Some(Duration::from_secs(5))))
    };
    thread::sleep(Duration::from_millis(20));
    event.set();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Set);
  }

  #[test]
  fn cancel_wakes_a_blocked_waiter_without_setting() {
    let event = Arc::new(Event::new());
    let waiter = {
      let event = event.clone();
      thread::spawn(move || event.wait(Some(Duration::from_secs(5))))
    };
    thread::sleep(Duration::from_millis(20));
    event.cancel();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
    assert!(!event.is_set());
  }

  #[test]
  fn reset_clears_signaled_state() {
    let event = Event::new();
    event.set();
    event.reset();
    assert!(!event.is_set());
  }
}
