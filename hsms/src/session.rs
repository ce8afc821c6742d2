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

//! ## SESSION
//! **Based on SEMI E37-1109§5-7**
//!
//! The HSMS-SS selection state machine: Select/Deselect/Linktest/Separate
//! control transactions, a reader thread that demultiplexes incoming
//! frames between those transactions and Data Messages, a periodic
//! linktest, and (when configured) automatic reconnection after a
//! communications failure.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use atomic::Atomic;

use crate::connection::{Connection, MemoryConnection, TcpConnection};
use crate::message::{Message, RejectReason, SelectStatus, SessionType};

/// Whether the [`Session`] initiates or accepts the TCP connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionMode {
  Passive,
  Active,
}

/// ### PARAMETER SETTINGS
/// **Based on SEMI E37-1109§10.2**
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
  pub connect_mode: ConnectionMode,
  /// T3: reply timeout for Data Messages (enforced by the caller, not this
  /// module, since Data Message correlation belongs to the layer above).
  pub t3: Duration,
  /// T5: minimum delay between active connect attempts.
  pub t5: Duration,
  /// T6: control transaction timeout.
  pub t6: Duration,
  /// T7: maximum time allowed in the Connected-but-not-Selected state.
  pub t7: Duration,
  /// T8: network inter-character timeout, applied to the TCP connection.
  pub t8: Duration,
  /// Interval between automatic linktests. `None` disables the linktest
  /// loop.
  pub linktest_interval: Option<Duration>,
  /// Whether a linktest failure or connection error should trigger
  /// automatic reconnection. Only takes effect for sessions opened with
  /// [`Session::open_active`] — a passive session has no remote address
  /// to redial, and a session wrapping a caller-supplied [`Connection`]
  /// (e.g. [`MemoryConnection`]) has nothing this module knows how to
  /// reopen.
  pub auto_reconnect: bool,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      connect_mode: ConnectionMode::Passive,
      t3: Duration::from_secs(45),
      t5: Duration::from_secs(10),
      t6: Duration::from_secs(5),
      t7: Duration::from_secs(10),
      t8: Duration::from_secs(5),
      linktest_interval: Some(Duration::from_secs(60)),
      auto_reconnect: true,
    }
  }
}

/// The session's current selection state, tracked alongside a generation
/// counter: background threads (linktest, reconnect) capture the
/// generation before acting and discard stale results if it has since
/// moved on, the same technique used by [`secs_core::Event`] to
/// disambiguate a late wakeup from a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::NoUninit)]
#[repr(u8)]
pub enum SelectionState {
  NotSelected,
  Selected,
}

#[derive(Debug)]
pub enum Error {
  Io(io::Error),
  NotConnected,
  AlreadyConnected,
  NotSelected,
  Timeout,
  Rejected(RejectReason),
  UnexpectedReply,
}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::Io(err) => write!(f, "{err}"),
      Error::NotConnected => write!(f, "session is not connected"),
      Error::AlreadyConnected => write!(f, "session is already connected"),
      Error::NotSelected => write!(f, "session is not selected"),
      Error::Timeout => write!(f, "control transaction timed out"),
      Error::Rejected(reason) => write!(f, "rejected: {reason:?}"),
      Error::UnexpectedReply => write!(f, "received an unexpected reply"),
    }
  }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
  fn from(err: io::Error) -> Self {
    Error::Io(err)
  }
}

type Outbox = Mutex<HashMap<u32, oneshot::Sender<Message>>>;

/// ### SESSION
/// **Based on SEMI E37-1109§5-7**
///
/// One HSMS-SS connection and its selection state. Construct with
/// [`Session::open_active`] or [`Session::open_passive`]; Data Messages
/// arrive on the [`Receiver<Message>`] those return, while control
/// transactions (Select/Deselect/Linktest/Separate) are driven through
/// methods on `Session` itself.
///
/// The underlying [`Connection`] lives behind a lock so an active session
/// can be transparently swapped out from under callers by the reconnect
/// loop — the `Arc<Session>` a caller holds, and the `Receiver<Message>`
/// it reads Data Messages from, both stay valid across a reconnect.
pub struct Session {
  connection: RwLock<Arc<dyn Connection>>,
  /// Bumped every time `connection` is replaced. Reader and linktest
  /// threads capture the generation they were spawned with and check it
  /// before treating a failure as their own to react to — this is what
  /// lets a stale thread from a connection we just tore down on purpose
  /// (to reconnect) notice it has been superseded and exit quietly
  /// instead of racing the replacement into a second reconnect attempt.
  conn_generation: AtomicU64,
  /// The remote address to redial on reconnect. Only set for sessions
  /// opened with [`Session::open_active`].
  entity: Option<SocketAddr>,
  selection_state: Atomic<SelectionState>,
  selected_generation: AtomicU64,
  options: SessionOptions,
  outbox: Outbox,
  system_counter: AtomicU64,
  incoming: Sender<Message>,
  /// Set once by an explicit [`Session::disconnect`]/[`Session::separate`]
  /// call. Distinct from a connection merely being down mid-reconnect.
  shutdown: RwLock<bool>,
}

impl Session {
  fn start_with_entity(connection: Arc<dyn Connection>, options: SessionOptions, entity: Option<SocketAddr>) -> Result<(Arc<Self>, Receiver<Message>), Error> {
    connection.set_timeout(options.t8)?;
    let (incoming_tx, incoming_rx) = channel();
    let session = Arc::new(Self {
      connection: RwLock::new(connection),
      conn_generation: AtomicU64::new(0),
      entity,
      selection_state: Atomic::new(SelectionState::NotSelected),
      selected_generation: AtomicU64::new(0),
      options,
      outbox: Mutex::new(HashMap::new()),
      system_counter: AtomicU64::new(1),
      incoming: incoming_tx,
      shutdown: RwLock::new(false),
    });
    session.spawn_workers(0);
    Ok((session, incoming_rx))
  }

  fn spawn_workers(self: &Arc<Self>, generation: u64) {
    let reader = self.clone();
    thread::spawn(move || reader.reader_loop(generation));
    if let Some(interval) = self.options.linktest_interval {
      let linktest = self.clone();
      thread::spawn(move || linktest.linktest_loop(interval, generation));
    }
  }

  /// Connects as the TCP client (`ConnectionMode::Active` semantics,
  /// regardless of what `options.connect_mode` says — callers pick the
  /// method matching the mode they want). Auto-reconnect, if enabled, will
  /// redial this same address.
  pub fn open_active(entity: impl ToSocketAddrs, options: SessionOptions) -> Result<(Arc<Self>, Receiver<Message>), Error> {
    let socket = entity
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::AddrNotAvailable, "no socket address")))?;
    let stream = TcpStream::connect_timeout(&socket, options.t5)?;
    Self::start_with_entity(Arc::new(TcpConnection::new(stream)), options, Some(socket))
  }

  /// Listens and accepts one incoming TCP connection (`ConnectionMode::Passive`).
  /// Auto-reconnect never applies here — there is no remote address to
  /// redial, only a new inbound connection to wait for again.
  pub fn open_passive(entity: impl ToSocketAddrs, options: SessionOptions) -> Result<(Arc<Self>, Receiver<Message>), Error> {
    let listener = TcpListener::bind(entity)?;
    let (stream, _addr) = listener.accept()?;
    Self::start_with_entity(Arc::new(TcpConnection::new(stream)), options, None)
  }

  /// Wraps an already-connected [`Connection`] (used directly by tests
  /// with [`MemoryConnection`]). Auto-reconnect never applies — this
  /// module has no way to reopen a caller-supplied connection.
  pub fn start(connection: Arc<dyn Connection>, options: SessionOptions) -> Result<(Arc<Self>, Receiver<Message>), Error> {
    Self::start_with_entity(connection, options, None)
  }

  /// Wraps one endpoint of an in-memory [`MemoryConnection`] pair, for
  /// tests that don't want a real socket.
  pub fn start_memory(options: SessionOptions) -> (Arc<Self>, Receiver<Message>, MemoryConnection) {
    let (local, remote) = MemoryConnection::pair();
    let (session, rx) = Self::start(Arc::new(local), options).expect("memory connection cannot fail to start");
    (session, rx, remote)
  }

  fn next_system(&self) -> u32 {
    self.system_counter.fetch_add(1, Ordering::Relaxed) as u32
  }

  pub fn selection_state(&self) -> SelectionState {
    self.selection_state.load(Ordering::SeqCst)
  }

  fn is_shutdown(&self) -> bool {
    *self.shutdown.read().unwrap()
  }

  fn conn(&self) -> Arc<dyn Connection> {
    self.connection.read().unwrap().clone()
  }

  /// Tears down the connection for good and marks the session not
  /// selected. Idempotent. Unlike a connection loss detected by the
  /// reader or linktest loop, this never triggers a reconnect.
  pub fn disconnect(&self) {
    *self.shutdown.write().unwrap() = true;
    self.selection_state.store(SelectionState::NotSelected, Ordering::SeqCst);
    self.selected_generation.fetch_add(1, Ordering::SeqCst);
    self.conn().shutdown();
    self.outbox.lock().unwrap().clear();
  }

  /// Called by the reader/linktest loops when the connection drops or a
  /// linktest fails. In `Active` mode with `auto_reconnect` enabled, tears
  /// the dead connection down and hands off to [`Session::reconnect_loop`]
  /// rather than shutting down for good.
  fn handle_connection_loss(self: &Arc<Self>, generation: u64) {
    if self.is_shutdown() || self.conn_generation.load(Ordering::SeqCst) != generation {
      return;
    }
    self.selection_state.store(SelectionState::NotSelected, Ordering::SeqCst);
    self.selected_generation.fetch_add(1, Ordering::SeqCst);
    self.outbox.lock().unwrap().clear();
    self.conn().shutdown();

    if let (Some(entity), true) = (self.entity, self.options.auto_reconnect) {
      log::warn!("hsms connection lost, reconnecting to {entity} after T5");
      let session = self.clone();
      thread::spawn(move || session.reconnect_loop(entity));
    } else {
      *self.shutdown.write().unwrap() = true;
    }
  }

  /// Redials `entity` every T5 until a connection succeeds or the session
  /// is explicitly shut down, then resumes the reader and (if configured)
  /// linktest loops under a fresh connection generation.
  fn reconnect_loop(self: Arc<Self>, entity: SocketAddr) {
    loop {
      thread::sleep(self.options.t5);
      if self.is_shutdown() {
        return;
      }
      let stream = match TcpStream::connect_timeout(&entity, self.options.t5) {
        Ok(stream) => stream,
        Err(err) => {
          log::warn!("hsms reconnect attempt to {entity} failed: {err}");
          continue;
        },
      };
      let connection: Arc<dyn Connection> = Arc::new(TcpConnection::new(stream));
      if let Err(err) = connection.set_timeout(self.options.t8) {
        log::warn!("hsms reconnect: failed to configure T8 timeout: {err}");
        continue;
      }
      *self.connection.write().unwrap() = connection;
      let generation = self.conn_generation.fetch_add(1, Ordering::SeqCst) + 1;
      log::info!("hsms reconnected to {entity}");
      self.spawn_workers(generation);
      return;
    }
  }

  /// ### SELECT PROCEDURE
  /// **Based on SEMI E37-1109§6.3.8-6.3.9**
  pub fn select(self: &Arc<Self>) -> Result<SelectStatus, Error> {
    let system = self.next_system();
    let reply = self.transmit_control(Message::select_request(system), self.options.t6)?;
    if reply.header.session_type != SessionType::SelectResponse as u8 {
      return Err(Error::UnexpectedReply);
    }
    let status = SelectStatus::from_byte(reply.header.byte_3).ok_or(Error::UnexpectedReply)?;
    if status == SelectStatus::Ok {
      self.selection_state.store(SelectionState::Selected, Ordering::SeqCst);
      self.selected_generation.fetch_add(1, Ordering::SeqCst);
    }
    Ok(status)
  }

  /// ### DESELECT PROCEDURE
  /// **Based on SEMI E37-1109§6.3.10-6.3.11**
  pub fn deselect(self: &Arc<Self>) -> Result<(), Error> {
    let system = self.next_system();
    let reply = self.transmit_control(Message::deselect_request(system), self.options.t6)?;
    if reply.header.session_type != SessionType::DeselectResponse as u8 {
      return Err(Error::UnexpectedReply);
    }
    self.selection_state.store(SelectionState::NotSelected, Ordering::SeqCst);
    self.selected_generation.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  /// ### LINKTEST PROCEDURE
  /// **Based on SEMI E37-1109§6.3.12-6.3.13**
  pub fn linktest(self: &Arc<Self>) -> Result<(), Error> {
    let system = self.next_system();
    let reply = self.transmit_control(Message::linktest_request(system), self.options.t6)?;
    if reply.header.session_type != SessionType::LinktestResponse as u8 {
      return Err(Error::UnexpectedReply);
    }
    Ok(())
  }

  /// ### SEPARATE PROCEDURE
  /// **Based on SEMI E37-1109§6.3.14**
  ///
  /// Separate has no response — sending it is itself the final act of the
  /// procedure, after which the connection is torn down for good (no
  /// reconnect, regardless of `auto_reconnect`).
  pub fn separate(self: &Arc<Self>) -> Result<(), Error> {
    let system = self.next_system();
    self.conn().send(&Message::separate_request(system))?;
    self.disconnect();
    Ok(())
  }

  /// Sends a Data Message. Reply correlation by System Bytes is the
  /// caller's responsibility (see `secs-proto`'s pending-request table),
  /// since HSMS itself defines no semantics for Data Message replies.
  pub fn send_data(self: &Arc<Self>, message: Message) -> Result<(), Error> {
    if self.selection_state() != SelectionState::Selected {
      return Err(Error::NotSelected);
    }
    let generation = self.conn_generation.load(Ordering::SeqCst);
    self.conn().send(&message).map_err(|err| {
      self.handle_connection_loss(generation);
      Error::Io(err)
    })
  }

  fn transmit_control(self: &Arc<Self>, message: Message, timeout: Duration) -> Result<Message, Error> {
    let system = message.header.system;
    let generation = self.conn_generation.load(Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    self.outbox.lock().unwrap().insert(system, tx);

    if let Err(err) = self.conn().send(&message) {
      self.outbox.lock().unwrap().remove(&system);
      self.handle_connection_loss(generation);
      return Err(err.into());
    }

    match rx.recv_timeout(timeout) {
      Ok(reply) => Ok(reply),
      Err(_) => {
        self.outbox.lock().unwrap().remove(&system);
        Err(Error::Timeout)
      },
    }
  }

  fn reader_loop(self: Arc<Self>, generation: u64) {
    loop {
      if self.is_shutdown() || self.conn_generation.load(Ordering::SeqCst) != generation {
        return;
      }
      match self.conn().receive() {
        Ok(None) => continue,
        Ok(Some(message)) => self.dispatch(message),
        Err(_err) => {
          self.handle_connection_loss(generation);
          return;
        },
      }
    }
  }

  fn dispatch(self: &Arc<Self>, message: Message) {
    let Some(session_type) = SessionType::from_byte(message.header.session_type) else {
      log::warn!("received unrecognized session type {}", message.header.session_type);
      return;
    };

    match session_type {
      SessionType::SelectResponse | SessionType::DeselectResponse | SessionType::LinktestResponse | SessionType::RejectRequest => {
        if let Some(sender) = self.outbox.lock().unwrap().remove(&message.header.system) {
          let _ = sender.send(message);
        }
      },
      SessionType::SelectRequest => {
        let status = if self.selection_state() == SelectionState::Selected {
          SelectStatus::AlreadyActive
        } else {
          self.selection_state.store(SelectionState::Selected, Ordering::SeqCst);
          self.selected_generation.fetch_add(1, Ordering::SeqCst);
          SelectStatus::Ok
        };
        let _ = self.conn().send(&Message::select_response(message.header.system, status));
      },
      SessionType::DeselectRequest => {
        self.selection_state.store(SelectionState::NotSelected, Ordering::SeqCst);
        self.selected_generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.conn().send(&Message::deselect_response(message.header.system, 0));
      },
      SessionType::LinktestRequest => {
        let _ = self.conn().send(&Message::linktest_response(message.header.system));
      },
      SessionType::SeparateRequest => {
        self.disconnect();
      },
      SessionType::DataMessage => {
        let _ = self.incoming.send(message);
      },
    }
  }

  fn linktest_loop(self: Arc<Self>, interval: Duration, generation: u64) {
    loop {
      thread::sleep(interval);
      if self.is_shutdown() || self.conn_generation.load(Ordering::SeqCst) != generation {
        return;
      }
      if self.linktest().is_err() {
        log::warn!("linktest failed");
        self.handle_connection_loss(generation);
        return;
      }
    }
  }
}

/// Reports an HSMS-level reject for a message this session can't make
/// sense of — used by higher layers that parse `message.text` themselves
/// and find it malformed for the declared Session Type.
pub fn reject_for(session: &Arc<Session>, message: &Message, reason: RejectReason) {
  let _ = session.conn().send(&Message::reject_request(
    message.header.session_id,
    message.header.session_type,
    reason,
    message.header.system,
  ));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connection::MemoryConnection;

  fn quick_options() -> SessionOptions {
    SessionOptions {
      t6: Duration::from_millis(500),
      linktest_interval: None,
      ..Default::default()
    }
  }

  fn start_pair() -> (Arc<Session>, Receiver<Message>, Arc<Session>, Receiver<Message>) {
    let (conn_a, conn_b) = MemoryConnection::pair();
    let (session_a, rx_a) = Session::start(Arc::new(conn_a), quick_options()).unwrap();
    let (session_b, rx_b) = Session::start(Arc::new(conn_b), quick_options()).unwrap();
    (session_a, rx_a, session_b, rx_b)
  }

  #[test]
  fn select_moves_both_sides_to_selected() {
    let (session_a, _rx_a, session_b, _rx_b) = start_pair();
    let status = session_a.select().unwrap();
    assert_eq!(status, SelectStatus::Ok);
    assert_eq!(session_a.selection_state(), SelectionState::Selected);
    // Give the responder's reader thread a moment to process the request.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(session_b.selection_state(), SelectionState::Selected);
  }

  #[test]
  fn deselect_returns_to_not_selected() {
    let (session_a, _rx_a, _session_b, _rx_b) = start_pair();
    session_a.select().unwrap();
    session_a.deselect().unwrap();
    assert_eq!(session_a.selection_state(), SelectionState::NotSelected);
  }

  #[test]
  fn linktest_succeeds_once_connected() {
    let (session_a, _rx_a, _session_b, _rx_b) = start_pair();
    session_a.linktest().unwrap();
  }

  #[test]
  fn data_message_is_forwarded_to_the_peers_incoming_channel() {
    let (session_a, _rx_a, session_b, rx_b) = start_pair();
    session_a.select().unwrap();
    thread::sleep(Duration::from_millis(50));
    session_a.send_data(Message::data(0, false, 1, 1, 99, b"hi".to_vec())).unwrap();
    let received = rx_b.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(received.header.system, 99);
    assert_eq!(received.text, b"hi");
  }

  #[test]
  fn send_data_without_selection_is_rejected() {
    let (session_a, _rx_a, _session_b, _rx_b) = start_pair();
    let err = session_a.send_data(Message::data(0, false, 1, 1, 1, vec![])).unwrap_err();
    assert!(matches!(err, Error::NotSelected));
  }

  #[test]
  fn separate_disconnects_the_initiator() {
    let (session_a, _rx_a, _session_b, _rx_b) = start_pair();
    session_a.select().unwrap();
    session_a.separate().unwrap();
    assert_eq!(session_a.selection_state(), SelectionState::NotSelected);
  }

  #[test]
  fn memory_session_without_entity_does_not_reconnect_on_loss() {
    // auto_reconnect is on by default, but a MemoryConnection-backed
    // session has no entity address to redial, so a connection loss
    // shuts the session down for good rather than spinning forever.
    let options = SessionOptions {
      t6: Duration::from_millis(500),
      linktest_interval: None,
      auto_reconnect: true,
      ..Default::default()
    };
    let (conn_a, conn_b) = MemoryConnection::pair();
    let (session_a, _rx_a) = Session::start(Arc::new(conn_a), options).unwrap();
    drop(conn_b);
    let err = session_a.linktest();
    assert!(err.is_err());
    thread::sleep(Duration::from_millis(50));
  }
}
