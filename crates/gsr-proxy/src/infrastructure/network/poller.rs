//! The background network thread.
//!
//! One [`Poller`] owns up to four TCP connections, one per [`Role`], and a
//! dedicated thread named `gsr-poller` that drives them.  The thread runs a
//! single-threaded tokio runtime; each iteration waits (at most one poll
//! interval) for the first of:
//!
//! - data on any open connection,
//! - a command from a caller thread (send a request, close a slot),
//! - the poll interval elapsing,
//!
//! then sends a keep-alive if one is due and expires stale requests.
//!
//! # Threading (for beginners)
//!
//! Callers never touch the sockets.  They connect a blocking
//! [`std::net::TcpStream`] on their own thread, then hand it to the poller
//! through [`Poller::send`] together with the first payload.  A small table
//! behind a mutex records each slot's [`ConnectionState`] and a generation
//! counter so a connection closed on the poller thread never clobbers the
//! state of a newer connection a caller has just opened.
//!
//! All protocol meaning lives in the [`ProtocolHandler`].  The poller locks
//! it for each event and runs the returned deliveries after unlocking.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gsr_core::{split_messages, Role};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{ConnectionState, NetworkError};
use crate::application::dispatch::{run_deliveries, CloseReason, ProtocolHandler};

/// Name of the background thread.
pub const THREAD_NAME: &str = "gsr-poller";

/// Timing and sizing knobs for the poller.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Upper bound on one wait; also bounds shutdown latency.
    pub poll_interval: Duration,
    /// How often the handler is asked for a keep-alive.
    pub heartbeat_interval: Duration,
    /// Age after which an outstanding request is expired.
    pub request_timeout: Duration,
    /// Bytes read from a connection at once.
    pub read_buffer: usize,
    /// How long [`Poller::stop`] waits for the thread to finish.
    pub shutdown_grace: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            read_buffer: 4096,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// A send the poller refused, handing the request back to the caller.
pub struct Rejected<R> {
    pub error: NetworkError,
    pub request: Option<R>,
}

impl<R> fmt::Debug for Rejected<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("has_request", &self.request.is_some())
            .finish()
    }
}

// ── Shared slot table ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SlotTable {
    state: [ConnectionState; Role::COUNT],
    generation: [u64; Role::COUNT],
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Command<R> {
    Send {
        role: Role,
        stream: Option<(std::net::TcpStream, u64)>,
        payload: Vec<u8>,
        request: Option<R>,
    },
    Close {
        role: Role,
        reason: CloseReason,
    },
}

// ── Caller-side handle ────────────────────────────────────────────────────────

/// Exclusive right to set up one role's connection.
///
/// Obtained from [`Poller::connect_gate`].  Hold it from
/// [`Poller::reserve`] until the new stream has been handed to
/// [`Poller::send`] or the reservation released.
pub struct ConnectGate<'a> {
    role: Role,
    _guard: MutexGuard<'a, ()>,
}

impl ConnectGate<'_> {
    pub fn role(&self) -> Role {
        self.role
    }
}

/// Handle to a running network thread.
///
/// Every method takes `&self`; the handle can be shared between the caller
/// threads of a backend.
pub struct Poller<H: ProtocolHandler> {
    commands: mpsc::UnboundedSender<Command<H::Request>>,
    slots: Arc<Mutex<SlotTable>>,
    gates: [Mutex<()>; Role::COUNT],
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    done: Mutex<Option<std_mpsc::Receiver<()>>>,
    shutdown_grace: Duration,
}

impl<H: ProtocolHandler> Poller<H> {
    /// Spawns the network thread driving `handler`.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Runtime`] if the async runtime cannot be built,
    /// [`NetworkError::Spawn`] if the thread cannot be created.
    pub fn start(handler: Arc<Mutex<H>>, settings: PollerSettings) -> Result<Self, NetworkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(NetworkError::Runtime)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let slots = Arc::new(Mutex::new(SlotTable::default()));
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = std_mpsc::channel();
        let shutdown_grace = settings.shutdown_grace;

        let worker = Worker {
            handler,
            settings,
            slots: Arc::clone(&slots),
            running: Arc::clone(&running),
        };

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(worker.run(command_rx));
                drop(runtime);
                let _ = done_tx.send(());
            })
            .map_err(NetworkError::Spawn)?;

        Ok(Self {
            commands,
            slots,
            gates: Default::default(),
            running,
            thread: Mutex::new(Some(thread)),
            done: Mutex::new(Some(done_rx)),
            shutdown_grace,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current state of `role`'s slot.
    pub fn state(&self, role: Role) -> ConnectionState {
        lock(&self.slots).state[role.index()]
    }

    /// Waits for exclusive connection setup on `role`.
    ///
    /// Callers that may dial take the gate first, so a second caller for
    /// the same role waits for the first one's connection and then finds the
    /// slot `Connected` instead of dialling again.  The network thread never
    /// takes a gate.
    pub fn connect_gate(&self, role: Role) -> ConnectGate<'_> {
        ConnectGate {
            role,
            _guard: lock(&self.gates[role.index()]),
        }
    }

    /// Claims the gated role's slot for a new connection.
    ///
    /// Returns `false` when the slot is already connected and should be
    /// reused; otherwise marks it `Connecting` and returns `true`.
    pub fn reserve(&self, gate: &ConnectGate<'_>) -> bool {
        let mut slots = lock(&self.slots);
        let state = &mut slots.state[gate.role.index()];
        if *state == ConnectionState::Connected {
            return false;
        }
        *state = ConnectionState::Connecting;
        true
    }

    /// Gives up a reservation after a failed connect.
    pub fn release(&self, gate: &ConnectGate<'_>) {
        let mut slots = lock(&self.slots);
        let state = &mut slots.state[gate.role.index()];
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Queues `payload` for `role`.
    ///
    /// With `stream`, the stream becomes the role's connection (replacing
    /// any previous one) before the payload is written.  Without it, the
    /// payload goes out on the existing connection.  When written, `request`
    /// is handed to [`ProtocolHandler::on_request_sent`].
    ///
    /// # Errors
    ///
    /// The request comes back inside [`Rejected`] when the role has no open
    /// connection or the poller has stopped.
    pub fn send(
        &self,
        role: Role,
        stream: Option<std::net::TcpStream>,
        payload: impl Into<Vec<u8>>,
        request: Option<H::Request>,
    ) -> Result<(), Rejected<H::Request>> {
        if !self.is_running() {
            return Err(Rejected {
                error: NetworkError::PollerStopped,
                request,
            });
        }

        let mut slots = lock(&self.slots);
        let idx = role.index();
        let stream = match stream {
            Some(stream) => {
                slots.generation[idx] += 1;
                slots.state[idx] = ConnectionState::Connected;
                Some((stream, slots.generation[idx]))
            }
            None if slots.state[idx] == ConnectionState::Connected => None,
            None => {
                return Err(Rejected {
                    error: NetworkError::NotConnected(role),
                    request,
                })
            }
        };

        // Queued while the table is locked so commands reach the thread in
        // the same order as the generation changes.
        let command = Command::Send {
            role,
            stream,
            payload: payload.into(),
            request,
        };
        self.commands.send(command).map_err(|mpsc::error::SendError(command)| {
            slots.state[idx] = ConnectionState::Disconnected;
            let request = match command {
                Command::Send { request, .. } => request,
                Command::Close { .. } => None,
            };
            Rejected {
                error: NetworkError::PollerStopped,
                request,
            }
        })
    }

    /// Closes `role`'s connection.  Requests outstanding on it are failed by
    /// the handler.
    pub fn close(&self, role: Role) {
        let mut slots = lock(&self.slots);
        let idx = role.index();
        slots.generation[idx] += 1;
        slots.state[idx] = ConnectionState::Disconnected;
        let _ = self.commands.send(Command::Close {
            role,
            reason: CloseReason::Requested,
        });
    }

    /// Stops the thread and closes every connection.  Idempotent.
    ///
    /// Waits up to the shutdown grace period for the thread to wind down.
    /// The thread is joined only once it has already exited, so stopping
    /// from a context that blocks thread exit (such as a DLL unload
    /// notification) cannot deadlock.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let Some(thread) = lock(&self.thread).take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            debug!("poller stopped from its own thread; not joining");
            return;
        }

        let finished = lock(&self.done)
            .take()
            .is_some_and(|done| done.recv_timeout(self.shutdown_grace).is_ok());

        if !finished {
            warn!(
                "network thread did not stop within {:?}; detaching it",
                self.shutdown_grace
            );
        } else if thread.is_finished() {
            if thread.join().is_err() {
                error!("network thread panicked");
            }
        } else {
            debug!("network thread finished its loop; not waiting for exit");
        }
    }
}

impl<H: ProtocolHandler> Drop for Poller<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Thread side ───────────────────────────────────────────────────────────────

struct Slot {
    stream: TcpStream,
    generation: u64,
}

enum Event<R> {
    Read(Role, io::Result<usize>),
    Command(Command<R>),
    CallersGone,
    Tick,
}

struct Worker<H: ProtocolHandler> {
    handler: Arc<Mutex<H>>,
    settings: PollerSettings,
    slots: Arc<Mutex<SlotTable>>,
    running: Arc<AtomicBool>,
}

/// Reads from an open slot; never completes for an empty one.
async fn read_chunk(slot: &mut Option<Slot>, buf: &mut [u8]) -> io::Result<usize> {
    match slot {
        Some(slot) => slot.stream.read(buf).await,
        None => std::future::pending().await,
    }
}

impl<H: ProtocolHandler> Worker<H> {
    fn handler(&self) -> MutexGuard<'_, H> {
        lock(&self.handler)
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command<H::Request>>) {
        let mut open: [Option<Slot>; Role::COUNT] = Default::default();
        let mut buffers: [Vec<u8>; Role::COUNT] =
            std::array::from_fn(|_| vec![0; self.settings.read_buffer.max(1)]);
        let mut last_heartbeat = Instant::now();

        info!("network poller started");
        while self.running.load(Ordering::Acquire) {
            let event = {
                let [login, master, chat, nat] = &mut open;
                let [login_buf, master_buf, chat_buf, nat_buf] = &mut buffers;
                tokio::select! {
                    read = read_chunk(login, login_buf) => Event::Read(Role::Login, read),
                    read = read_chunk(master, master_buf) => Event::Read(Role::Master, read),
                    read = read_chunk(chat, chat_buf) => Event::Read(Role::Chat, read),
                    read = read_chunk(nat, nat_buf) => Event::Read(Role::Nat, read),
                    command = commands.recv() => match command {
                        Some(command) => Event::Command(command),
                        None => Event::CallersGone,
                    },
                    () = tokio::time::sleep(self.settings.poll_interval) => Event::Tick,
                }
            };

            match event {
                Event::Read(role, Ok(0)) => self.close(&mut open, role, CloseReason::PeerClosed),
                Event::Read(role, Ok(n)) => {
                    let chunk = &buffers[role.index()][..n];
                    trace!("{role} received {n} bytes");
                    self.dispatch(role, chunk);
                }
                Event::Read(role, Err(e)) => {
                    warn!("{role} read failed: {e}");
                    self.close(&mut open, role, CloseReason::ReadFailed);
                }
                Event::Command(command) => self.execute(&mut open, command).await,
                Event::CallersGone => break,
                Event::Tick => {}
            }

            self.housekeeping(&mut open, &mut last_heartbeat).await;
        }

        for role in Role::ALL {
            self.close(&mut open, role, CloseReason::Shutdown);
        }
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Send {
                role,
                request: Some(request),
                ..
            } = command
            {
                let deliveries = self
                    .handler()
                    .on_request_failed(role, request, CloseReason::Shutdown);
                run_deliveries(deliveries);
            }
        }
        info!("network poller stopped");
    }

    fn dispatch(&self, role: Role, chunk: &[u8]) {
        for message in split_messages(chunk) {
            let deliveries = self.handler().on_message(role, message);
            run_deliveries(deliveries);
        }
    }

    async fn execute(&self, open: &mut [Option<Slot>; Role::COUNT], command: Command<H::Request>) {
        match command {
            Command::Close { role, reason } => self.close(open, role, reason),
            Command::Send {
                role,
                stream,
                payload,
                request,
            } => {
                if let Some((stream, generation)) = stream {
                    self.close(open, role, CloseReason::Replaced);
                    match TcpStream::from_std(stream) {
                        Ok(stream) => {
                            debug!("{role} connection handed to poller");
                            open[role.index()] = Some(Slot { stream, generation });
                        }
                        Err(e) => {
                            warn!("cannot register {role} connection: {e}");
                            self.mark_disconnected(role, generation);
                        }
                    }
                }

                let written = match open[role.index()].as_mut() {
                    Some(slot) => slot.stream.write_all(&payload).await,
                    None => Err(io::ErrorKind::NotConnected.into()),
                };

                match written {
                    Ok(()) => {
                        trace!("{role} sent {} bytes", payload.len());
                        if let Some(request) = request {
                            self.handler().on_request_sent(role, request, Instant::now());
                        }
                    }
                    Err(e) => {
                        let reason = if e.kind() == io::ErrorKind::NotConnected {
                            CloseReason::NotConnected
                        } else {
                            CloseReason::WriteFailed
                        };
                        warn!("{role} send failed: {e}");
                        if let Some(request) = request {
                            let deliveries = self.handler().on_request_failed(role, request, reason);
                            run_deliveries(deliveries);
                        }
                        self.close(open, role, reason);
                    }
                }
            }
        }
    }

    async fn housekeeping(&self, open: &mut [Option<Slot>; Role::COUNT], last_heartbeat: &mut Instant) {
        let now = Instant::now();

        if now.duration_since(*last_heartbeat) >= self.settings.heartbeat_interval {
            *last_heartbeat = now;
            let beat = self.handler().heartbeat();
            if let Some((role, message)) = beat {
                let written = match open[role.index()].as_mut() {
                    Some(slot) => Some(slot.stream.write_all(message.encode().as_bytes()).await),
                    None => None,
                };
                match written {
                    Some(Ok(())) => debug!("keep-alive sent on {role}"),
                    Some(Err(e)) => {
                        warn!("keep-alive on {role} failed: {e}");
                        self.close(open, role, CloseReason::WriteFailed);
                    }
                    None => debug!("no {role} connection for keep-alive"),
                }
            }
        }

        let (expired, deliveries) = self.handler().expire(now, self.settings.request_timeout);
        run_deliveries(deliveries);
        for role in expired {
            self.close(open, role, CloseReason::TimedOut);
        }
    }

    fn close(&self, open: &mut [Option<Slot>; Role::COUNT], role: Role, reason: CloseReason) {
        let Some(slot) = open[role.index()].take() else {
            return;
        };
        drop(slot.stream);
        self.mark_disconnected(role, slot.generation);

        let deliveries = self.handler().on_closed(role, reason);
        run_deliveries(deliveries);
        match reason {
            CloseReason::Replaced | CloseReason::Requested | CloseReason::Shutdown => {
                debug!("{role} connection closed: {reason}")
            }
            _ => info!("{role} connection closed: {reason}"),
        }
    }

    /// Marks the slot disconnected unless a caller has opened a newer
    /// connection in the meantime.
    fn mark_disconnected(&self, role: Role, generation: u64) {
        let mut slots = lock(&self.slots);
        if slots.generation[role.index()] == generation {
            slots.state[role.index()] = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::Delivery;
    use gsr_core::Message;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// What the recording handler saw, in order.
    #[derive(Debug, PartialEq)]
    enum Seen {
        Sent(Role, u32),
        Failed(Role, u32, CloseReason),
        Message(Role, Option<String>),
        Closed(Role, CloseReason),
    }

    struct Recorder {
        events: std_mpsc::Sender<Seen>,
        beat: Option<(Role, Message)>,
        expire_role: Option<Role>,
    }

    impl ProtocolHandler for Recorder {
        type Request = u32;

        fn on_request_sent(&mut self, role: Role, request: u32, _now: Instant) {
            let _ = self.events.send(Seen::Sent(role, request));
        }

        fn on_request_failed(&mut self, role: Role, request: u32, reason: CloseReason) -> Vec<Delivery> {
            let _ = self.events.send(Seen::Failed(role, request, reason));
            Vec::new()
        }

        fn on_message(&mut self, role: Role, message: Message) -> Vec<Delivery> {
            let name = message.command_name().map(str::to_string);
            let _ = self.events.send(Seen::Message(role, name));
            Vec::new()
        }

        fn on_closed(&mut self, role: Role, reason: CloseReason) -> Vec<Delivery> {
            let _ = self.events.send(Seen::Closed(role, reason));
            Vec::new()
        }

        fn heartbeat(&self) -> Option<(Role, Message)> {
            self.beat.clone()
        }

        fn expire(&mut self, _now: Instant, _timeout: Duration) -> (Vec<Role>, Vec<Delivery>) {
            (self.expire_role.take().into_iter().collect(), Vec::new())
        }
    }

    fn fast_settings() -> PollerSettings {
        PollerSettings {
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    fn start(settings: PollerSettings, beat: Option<(Role, Message)>) -> (Poller<Recorder>, std_mpsc::Receiver<Seen>) {
        let (tx, rx) = std_mpsc::channel();
        let handler = Arc::new(Mutex::new(Recorder {
            events: tx,
            beat,
            expire_role: None,
        }));
        (Poller::start(handler, settings).expect("start poller"), rx)
    }

    fn connected_pair() -> (std::net::TcpStream, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).expect("connect");
        client.set_nonblocking(true).expect("nonblocking");
        let (server, _) = listener.accept().expect("accept");
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        (client, server)
    }

    fn next(rx: &std_mpsc::Receiver<Seen>) -> Seen {
        rx.recv_timeout(Duration::from_secs(5)).expect("handler event")
    }

    fn wait_for_state(poller: &Poller<Recorder>, role: Role, state: ConnectionState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while poller.state(role) != state {
            assert!(Instant::now() < deadline, "{role} never reached {state:?}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_send_with_stream_writes_payload_and_reports_sent() {
        // Arrange
        let (poller, rx) = start(fast_settings(), None);
        let (client, mut server) = connected_pair();

        // Act
        poller
            .send(Role::Master, Some(client), "\\list\\\\final\\", Some(7))
            .expect("send");

        // Assert
        let mut buf = [0u8; 64];
        let n = server.read(&mut buf).expect("server read");
        assert_eq!(&buf[..n], b"\\list\\\\final\\");
        assert_eq!(next(&rx), Seen::Sent(Role::Master, 7));
        assert_eq!(poller.state(Role::Master), ConnectionState::Connected);
    }

    #[test]
    fn test_reply_is_decoded_and_dispatched_by_role() {
        // Arrange
        let (poller, rx) = start(fast_settings(), None);
        let (client, mut server) = connected_pair();
        poller.send(Role::Nat, Some(client), "x", Some(1)).expect("send");
        assert_eq!(next(&rx), Seen::Sent(Role::Nat, 1));

        // Act
        server.write_all(b"\\natneg\\\\ip\\1.2.3.4\\final\\").expect("reply");

        // Assert
        assert_eq!(next(&rx), Seen::Message(Role::Nat, Some("natneg".to_string())));
    }

    #[test]
    fn test_peer_close_marks_slot_disconnected() {
        // Arrange
        let (poller, rx) = start(fast_settings(), None);
        let (client, server) = connected_pair();
        poller.send(Role::Login, Some(client), "x", None).expect("send");

        // Act
        drop(server);

        // Assert
        assert_eq!(next(&rx), Seen::Closed(Role::Login, CloseReason::PeerClosed));
        wait_for_state(&poller, Role::Login, ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_without_connection_hands_request_back() {
        // Arrange
        let (poller, _rx) = start(fast_settings(), None);

        // Act
        let rejected = poller.send(Role::Master, None, "x", Some(9)).unwrap_err();

        // Assert
        assert!(matches!(rejected.error, NetworkError::NotConnected(Role::Master)));
        assert_eq!(rejected.request, Some(9));
    }

    #[test]
    fn test_reserve_and_release_follow_connection_state() {
        let (poller, _rx) = start(fast_settings(), None);
        let gate = poller.connect_gate(Role::Master);

        assert!(poller.reserve(&gate));
        assert_eq!(poller.state(Role::Master), ConnectionState::Connecting);
        poller.release(&gate);
        assert_eq!(poller.state(Role::Master), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reserve_on_connected_slot_means_reuse() {
        let (poller, _rx) = start(fast_settings(), None);
        let (client, _server) = connected_pair();
        poller.send(Role::Master, Some(client), "x", None).expect("send");

        assert!(!poller.reserve(&poller.connect_gate(Role::Master)));
        assert_eq!(poller.state(Role::Master), ConnectionState::Connected);
    }

    #[test]
    fn test_connect_gate_makes_a_waiting_caller_reuse_the_new_connection() {
        // Arrange: the first caller holds the gate while it "connects".
        let (poller, rx) = start(fast_settings(), None);
        let poller = Arc::new(poller);
        let (client, _server) = connected_pair();
        let gate = poller.connect_gate(Role::Master);
        assert!(poller.reserve(&gate));

        // Act: a second caller for the same role arrives meanwhile.
        let second = {
            let poller = Arc::clone(&poller);
            std::thread::spawn(move || {
                let gate = poller.connect_gate(Role::Master);
                let claimed = poller.reserve(&gate);
                drop(gate);
                claimed
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        poller
            .send(Role::Master, Some(client), "x", Some(1))
            .expect("send");
        drop(gate);

        // Assert
        assert!(!second.join().expect("second caller"), "second caller dialled again");
        assert_eq!(next(&rx), Seen::Sent(Role::Master, 1));
        assert_eq!(poller.state(Role::Master), ConnectionState::Connected);
    }

    #[test]
    fn test_gates_for_different_roles_are_independent() {
        let (poller, _rx) = start(fast_settings(), None);
        let master = poller.connect_gate(Role::Master);

        let login = poller.connect_gate(Role::Login);

        assert!(poller.reserve(&master));
        assert!(poller.reserve(&login));
        assert_eq!(login.role(), Role::Login);
    }

    #[test]
    fn test_new_stream_replaces_previous_connection() {
        // Arrange
        let (poller, rx) = start(fast_settings(), None);
        let (first, _first_server) = connected_pair();
        let (second, _second_server) = connected_pair();
        poller.send(Role::Login, Some(first), "a", Some(1)).expect("first");
        assert_eq!(next(&rx), Seen::Sent(Role::Login, 1));

        // Act
        poller.send(Role::Login, Some(second), "b", Some(2)).expect("second");

        // Assert
        assert_eq!(next(&rx), Seen::Closed(Role::Login, CloseReason::Replaced));
        assert_eq!(next(&rx), Seen::Sent(Role::Login, 2));
        assert_eq!(poller.state(Role::Login), ConnectionState::Connected);
    }

    #[test]
    fn test_close_is_reported_as_requested() {
        let (poller, rx) = start(fast_settings(), None);
        let (client, _server) = connected_pair();
        poller.send(Role::Login, Some(client), "x", None).expect("send");

        poller.close(Role::Login);

        assert_eq!(next(&rx), Seen::Closed(Role::Login, CloseReason::Requested));
        assert_eq!(poller.state(Role::Login), ConnectionState::Disconnected);
    }

    #[test]
    fn test_heartbeat_is_written_on_its_role() {
        // Arrange
        let settings = PollerSettings {
            heartbeat_interval: Duration::from_millis(20),
            ..fast_settings()
        };
        let beat = Message::command("heartbeat").with("sesskey", 1234);
        let (poller, _rx) = start(settings, Some((Role::Master, beat)));
        let (client, mut server) = connected_pair();
        poller.send(Role::Master, Some(client), "", None).expect("send");

        // Act
        let mut buf = [0u8; 128];
        let n = server.read(&mut buf).expect("keep-alive");

        // Assert
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("\\heartbeat\\\\sesskey\\1234\\final\\"), "{text}");
    }

    #[test]
    fn test_expired_role_is_closed_as_timed_out() {
        // Arrange
        let (tx, rx) = std_mpsc::channel();
        let handler = Arc::new(Mutex::new(Recorder {
            events: tx,
            beat: None,
            expire_role: None,
        }));
        let poller = Poller::start(Arc::clone(&handler), fast_settings()).expect("start");
        let (client, _server) = connected_pair();
        poller.send(Role::Nat, Some(client), "x", None).expect("send");
        wait_for_state(&poller, Role::Nat, ConnectionState::Connected);

        // Act
        handler.lock().unwrap().expire_role = Some(Role::Nat);

        // Assert
        assert_eq!(next(&rx), Seen::Closed(Role::Nat, CloseReason::TimedOut));
        wait_for_state(&poller, Role::Nat, ConnectionState::Disconnected);
    }

    #[test]
    fn test_stop_closes_connections_and_is_idempotent() {
        // Arrange
        let (poller, rx) = start(fast_settings(), None);
        let (client, _server) = connected_pair();
        poller.send(Role::Chat, Some(client), "x", None).expect("send");
        wait_for_state(&poller, Role::Chat, ConnectionState::Connected);

        // Act
        poller.stop();
        poller.stop();

        // Assert
        assert!(!poller.is_running());
        assert_eq!(next(&rx), Seen::Closed(Role::Chat, CloseReason::Shutdown));
        assert_eq!(poller.state(Role::Chat), ConnectionState::Disconnected);
        assert!(matches!(
            poller.send(Role::Chat, None, "x", Some(3)),
            Err(Rejected { error: NetworkError::PollerStopped, request: Some(3) })
        ));
    }
}
