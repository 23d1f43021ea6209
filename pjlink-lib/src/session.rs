//! PJLink session state machine.
//!
//! Lifecycle:
//! - `Disconnected`: no socket. The next command opens one.
//! - `Connecting`: socket open, waiting for the greeting. Commands queue up,
//!   except the one that opened the connection, which rides along with the
//!   greeting response.
//! - `Ready`: greeting resolved. At most one command is on the wire; the rest
//!   wait in the queue until a reply line (or a poll tick) frees the link.
//! - `AuthRejected`: the projector refused the password. Nothing is sent
//!   until the password changes.
//!
//! The session never blocks or sleeps. The owning task feeds it socket data,
//! close notifications and ticks, always passing the current `Instant`.

use log::{debug, error, info, warn};
use std::io;
use std::mem;
use std::time::Instant;

use crate::auth::{AuthPrefix, Greeting};
use crate::config::Timing;
use crate::event::{ConnectionStatus, EventSender, SessionEvent};
use crate::framer::LineFramer;
use crate::queue::{Command, CommandQueue};
use crate::response::Response;
use crate::status::{StatusStore, CLASS2_STATIC_QUERIES, POWER_KEY, STATIC_QUERIES};

/// Write half of an open connection
pub trait Link {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Close the connection; further reads on it end
    fn close(&mut self);
}

/// Opens connections to the projector
pub trait Connector {
    type Link: Link;
    fn connect(&mut self) -> io::Result<Self::Link>;
}

/// Whether a command is outstanding on a ready connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingReply,
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready(Phase),
    AuthRejected,
}

enum State<L> {
    Disconnected,
    Connecting {
        link: L,
        /// Command that opened the connection, sent with the greeting response
        pending: Option<Command>,
    },
    Ready {
        link: L,
        prefix: AuthPrefix,
        phase: Phase,
    },
    AuthRejected,
}

impl<L> State<L> {
    fn into_link(self) -> Option<L> {
        match self {
            Self::Connecting { link, .. } | Self::Ready { link, .. } => Some(link),
            Self::Disconnected | Self::AuthRejected => None,
        }
    }
}

/// One projector connection and everything it owns
pub struct Session<C: Connector> {
    connector: C,
    password: Option<String>,
    timing: Timing,
    state: State<C::Link>,
    framer: LineFramer,
    queue: CommandQueue,
    store: StatusStore,
    events: EventSender,
    last_activity: Instant,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, password: Option<String>, timing: Timing, events: EventSender) -> Self {
        Self {
            connector,
            password: password.filter(|p| !p.is_empty()),
            timing,
            state: State::Disconnected,
            framer: LineFramer::new(),
            queue: CommandQueue::new(),
            store: StatusStore::new(events.clone()),
            events,
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.state {
            State::Disconnected => SessionState::Disconnected,
            State::Connecting { .. } => SessionState::Connecting,
            State::Ready { phase, .. } => SessionState::Ready(*phase),
            State::AuthRejected => SessionState::AuthRejected,
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Number of commands waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Request a command. Fire-and-forget: any reply updates the store later.
    pub fn send(&mut self, command: Command, now: Instant) {
        match self.state() {
            SessionState::Disconnected => self.open(Some(command), now),
            SessionState::Connecting | SessionState::Ready(Phase::AwaitingReply) => {
                debug!("Queueing {command} ({} waiting)", self.queue.len() + 1);
                self.queue.enqueue(command);
            }
            SessionState::Ready(Phase::Idle) => self.transmit(&command, now),
            SessionState::AuthRejected => {
                error!("Dropping {command}: projector rejected the password");
            }
        }
    }

    /// Send several commands in order.
    ///
    /// Stops early if the connection cannot be opened, so an unreachable
    /// projector costs one connect timeout rather than one per command.
    pub fn send_all<I>(&mut self, commands: I, now: Instant)
    where
        I: IntoIterator<Item = Command>,
    {
        for command in commands {
            self.send(command, now);
            if matches!(
                self.state(),
                SessionState::Disconnected | SessionState::AuthRejected
            ) {
                debug!("Connection unavailable, dropping remaining commands");
                break;
            }
        }
    }

    /// Open a connection without a command of our own
    pub fn connect(&mut self, now: Instant) {
        if self.state() == SessionState::Disconnected {
            self.open(None, now);
        }
    }

    /// Queue the static class 1 queries and a full status poll
    pub fn start(&mut self, now: Instant) {
        let mut commands: Vec<Command> = STATIC_QUERIES.iter().map(|q| Command::new(*q)).collect();
        commands.extend(self.store.poll_commands());
        self.send_all(commands, now);
    }

    /// Re-send the status poll set
    pub fn refresh(&mut self, now: Instant) {
        let commands = self.store.poll_commands();
        self.send_all(commands, now);
    }

    /// Replace the password. Drops the current connection and clears a
    /// previous rejection; the next command reconnects.
    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password.filter(|p| !p.is_empty());
        match self.state() {
            SessionState::AuthRejected => self.state = State::Disconnected,
            SessionState::Disconnected => {}
            _ => self.teardown(ConnectionStatus::Disconnected, "Password changed"),
        }
    }

    /// Close the connection for good (task shutdown)
    pub fn shutdown(&mut self) {
        if matches!(
            self.state(),
            SessionState::Connecting | SessionState::Ready(_)
        ) {
            self.teardown(ConnectionStatus::Disconnected, "Shut down");
        }
    }

    fn open(&mut self, pending: Option<Command>, now: Instant) {
        self.emit_connection(ConnectionStatus::Connecting, "Connecting");

        match self.connector.connect() {
            Ok(link) => {
                self.framer.clear();
                self.last_activity = now;
                self.state = State::Connecting { link, pending };
                info!("Connected to projector");
                self.emit_connection(ConnectionStatus::Connected, "Connected");
            }
            Err(e) => {
                error!("Network error: {e}");
                if let Some(command) = pending {
                    debug!("Dropping {command}");
                }
                self.emit_connection(ConnectionStatus::TransportError, &format!("Network error: {e}"));
            }
        }
    }

    /// Bytes received on the current connection
    pub fn on_data(&mut self, bytes: &[u8], now: Instant) {
        for line in self.framer.push(bytes) {
            self.on_line(&line, now);
        }
    }

    /// The current connection ended (EOF or socket error)
    pub fn on_closed(&mut self, error: Option<&io::Error>, _now: Instant) {
        if !matches!(
            self.state(),
            SessionState::Connecting | SessionState::Ready(_)
        ) {
            return;
        }
        match error {
            Some(e) => {
                error!("Network error: {e}");
                self.teardown(ConnectionStatus::TransportError, &format!("Network error: {e}"));
            }
            None => {
                debug!("Disconnected");
                self.teardown(ConnectionStatus::Disconnected, "Connection closed by projector");
            }
        }
    }

    /// Handle one framed line
    pub fn on_line(&mut self, line: &str, now: Instant) {
        if matches!(
            self.state(),
            SessionState::Disconnected | SessionState::AuthRejected
        ) {
            debug!("Ignoring line without a connection: {line:?}");
            return;
        }

        self.last_activity = now;
        debug!("PJLINK: < {line}");

        match Response::parse(line) {
            Response::Greeting(Greeting::Rejected) => {
                self.reject_auth();
                return;
            }
            Response::Greeting(greeting) => {
                self.on_greeting(&greeting, now);
                return;
            }
            Response::Ack { key } => debug!("{key} accepted"),
            Response::Error { key, error } => warn!("Command error: {key}={} ({error})", error.wire_value()),
            Response::Status { key, value } => {
                if self.store.set(&key, &value) {
                    info!("Projector supports class 2, querying class 2 information");
                    for query in CLASS2_STATIC_QUERIES {
                        self.queue.enqueue(Command::new(*query));
                    }
                }
            }
            Response::Unknown => debug!("Ignoring unrecognized line"),
        }

        if let State::Ready { phase, .. } = &mut self.state {
            *phase = Phase::Idle;
        }
        self.drain_next(now);
    }

    fn on_greeting(&mut self, greeting: &Greeting, now: Instant) {
        let (link, pending) = match mem::replace(&mut self.state, State::Disconnected) {
            State::Connecting { link, pending } => (link, pending),
            other => {
                debug!("Ignoring greeting on an established connection");
                self.state = other;
                return;
            }
        };

        let Some(prefix) = greeting.prefix(self.password.as_deref()) else {
            self.state = State::Connecting { link, pending };
            self.reject_auth();
            return;
        };

        // The challenge response must carry a command, so fall back to a
        // power query when nothing is pending
        let first = if prefix.is_empty() {
            debug!("Projector does not need a password");
            pending
        } else {
            debug!("Projector requested authentication");
            pending.or_else(|| Some(Command::query(POWER_KEY)))
        };

        self.state = State::Ready {
            link,
            prefix,
            phase: Phase::Idle,
        };

        match first {
            Some(command) => self.transmit(&command, now),
            None => {
                self.drain_next(now);
            }
        }
    }

    fn reject_auth(&mut self) {
        error!("Authentication error. Password not accepted by projector");
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("Discarded {dropped} queued commands");
        }
        let old = mem::replace(&mut self.state, State::AuthRejected);
        if let Some(mut link) = old.into_link() {
            link.close();
        }
        self.framer.clear();
        self.emit_connection(ConnectionStatus::AuthFailed, "Authentication error");
    }

    /// Poll tick: drain trigger first, liveness only if nothing was sent
    pub fn tick(&mut self, now: Instant) {
        if !self.drain_tick(now) {
            self.liveness_tick(now);
        }
    }

    /// Send the next queued command if the link is idle. Returns whether a
    /// command went out.
    pub fn drain_tick(&mut self, now: Instant) -> bool {
        self.drain_next(now)
    }

    /// Idle handling: close after `idle_timeout`, re-poll after
    /// `refresh_interval` while idle
    pub fn liveness_tick(&mut self, now: Instant) {
        let idle = now.saturating_duration_since(self.last_activity);
        match self.state() {
            SessionState::Disconnected | SessionState::AuthRejected => {}
            _ if idle > self.timing.idle_timeout() => {
                debug!("Closing connection after {}ms without activity", idle.as_millis());
                self.teardown(ConnectionStatus::Disconnected, "Idle timeout");
            }
            SessionState::Ready(Phase::Idle) if idle > self.timing.refresh_interval() => {
                debug!("Refreshing status after {}ms without activity", idle.as_millis());
                self.refresh(now);
            }
            _ => {}
        }
    }

    fn drain_next(&mut self, now: Instant) -> bool {
        if self.state() != SessionState::Ready(Phase::Idle) {
            return false;
        }
        let Some(command) = self.queue.dequeue_next() else {
            return false;
        };
        self.transmit(&command, now);
        true
    }

    fn transmit(&mut self, command: &Command, now: Instant) {
        let State::Ready { link, prefix, phase } = &mut self.state else {
            warn!("Cannot send {command}: connection not ready");
            return;
        };

        debug!("PJLINK: > {command}");
        let wire = format!("{}{command}\r", prefix.as_str());
        match link.write_all(wire.as_bytes()) {
            Ok(()) => {
                *phase = Phase::AwaitingReply;
                self.last_activity = now;
            }
            Err(e) => {
                error!("Network error: {e}");
                self.teardown(ConnectionStatus::TransportError, &format!("Network error: {e}"));
            }
        }
    }

    /// Close the link, discard the queue and report `status`
    fn teardown(&mut self, status: ConnectionStatus, detail: &str) {
        let old = mem::replace(&mut self.state, State::Disconnected);
        if let Some(mut link) = old.into_link() {
            link.close();
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("Discarded {dropped} queued commands");
        }
        self.framer.clear();
        self.emit_connection(status, detail);
    }

    fn emit_connection(&self, status: ConnectionStatus, detail: &str) {
        let _ = self.events.send(SessionEvent::ConnectionChanged {
            status,
            detail: detail.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::challenge_response;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    /// Everything written to the fake projector, one entry per write
    #[derive(Default)]
    struct Wire {
        writes: Vec<String>,
        connects: usize,
        closes: usize,
        refuse_connect: bool,
        fail_writes: bool,
    }

    type SharedWire = Rc<RefCell<Wire>>;

    struct FakeLink(SharedWire);

    impl Link for FakeLink {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            let mut wire = self.0.borrow_mut();
            if wire.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            wire.writes.push(String::from_utf8_lossy(bytes).into_owned());
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closes += 1;
        }
    }

    struct FakeConnector(SharedWire);

    impl Connector for FakeConnector {
        type Link = FakeLink;

        fn connect(&mut self) -> io::Result<FakeLink> {
            let mut wire = self.0.borrow_mut();
            if wire.refuse_connect {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            wire.connects += 1;
            Ok(FakeLink(self.0.clone()))
        }
    }

    struct Harness {
        session: Session<FakeConnector>,
        wire: SharedWire,
        events: Receiver<SessionEvent>,
        t0: Instant,
    }

    impl Harness {
        fn new(password: Option<&str>) -> Self {
            let wire = SharedWire::default();
            let (tx, events) = mpsc::channel();
            let session = Session::new(
                FakeConnector(wire.clone()),
                password.map(str::to_string),
                Timing::default(),
                tx,
            );
            Self {
                session,
                wire,
                events,
                t0: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn send(&mut self, command: &str, ms: u64) {
            let now = self.at(ms);
            self.session.send(Command::from(command), now);
        }

        fn receive(&mut self, data: &str, ms: u64) {
            let now = self.at(ms);
            self.session.on_data(data.as_bytes(), now);
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.session.tick(now);
        }

        fn writes(&self) -> Vec<String> {
            self.wire.borrow().writes.clone()
        }

        fn events(&self) -> Vec<SessionEvent> {
            self.events.try_iter().collect()
        }

        fn connection_events(&self) -> Vec<ConnectionStatus> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    SessionEvent::ConnectionChanged { status, .. } => Some(status),
                    SessionEvent::StatusChanged { .. } => None,
                })
                .collect()
        }

        /// Connect with `PJLINK 0` and answer the first command
        fn ready(password: Option<&str>) -> Self {
            let mut harness = Self::new(password);
            harness.send("%1POWR ?", 0);
            harness.receive("PJLINK 0\r", 10);
            harness.receive("%1POWR=0\r", 20);
            harness.wire.borrow_mut().writes.clear();
            let _ = harness.events();
            harness
        }
    }

    #[test]
    fn test_send_connects_and_waits_for_greeting() {
        let mut h = Harness::new(None);
        h.send("%1POWR 1", 0);
        assert_eq!(h.session.state(), SessionState::Connecting);
        assert_eq!(h.wire.borrow().connects, 1);
        assert!(h.writes().is_empty());
        assert_eq!(
            h.connection_events(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );

        h.receive("PJLINK 0\r", 5);
        assert_eq!(h.writes(), vec!["%1POWR 1\r"]);
        assert_eq!(h.session.state(), SessionState::Ready(Phase::AwaitingReply));
    }

    #[test]
    fn test_no_auth_prefix_stays_empty() {
        let mut h = Harness::new(Some("unused"));
        h.send("%1POWR ?", 0);
        h.send("%1INPT ?", 1);
        h.receive("PJLINK 0\r", 5);
        h.receive("%1POWR=1\r", 10);
        assert_eq!(h.writes(), vec!["%1POWR ?\r", "%1INPT ?\r"]);
    }

    #[test]
    fn test_challenge_prefixes_every_write() {
        let mut h = Harness::new(Some("secret"));
        h.send("%1INPT 31", 0);
        h.send("%1AVMT ?", 1);
        h.receive("PJLINK 1 abc123\r", 5);
        h.receive("%1INPT=OK\r", 10);

        let digest = challenge_response("abc123", "secret");
        assert_eq!(digest, "38d4588fdbc729ba5f07c49b42d195a0");
        assert_eq!(
            h.writes(),
            vec![format!("{digest}%1INPT 31\r"), format!("{digest}%1AVMT ?\r")]
        );
    }

    #[test]
    fn test_explicit_connect_sends_power_query_with_challenge() {
        let mut h = Harness::new(Some("secret"));
        h.session.connect(h.at(0));
        h.receive("PJLINK 1 abc123\r", 5);
        assert_eq!(
            h.writes(),
            vec!["38d4588fdbc729ba5f07c49b42d195a0%1POWR ?\r".to_string()]
        );
    }

    #[test]
    fn test_explicit_connect_without_auth_drains_queue() {
        let mut h = Harness::new(None);
        h.session.connect(h.at(0));
        h.send("%1LAMP ?", 1);
        h.receive("PJLINK 0\r", 5);
        assert_eq!(h.writes(), vec!["%1LAMP ?\r"]);
    }

    #[test]
    fn test_auth_rejected_clears_queue_and_stops_writing() {
        let mut h = Harness::new(Some("wrong"));
        h.send("%1POWR 1", 0);
        h.send("%1INPT 31", 1);
        h.send("%1AVMT 31", 2);
        assert_eq!(h.session.queued(), 2);

        h.receive("PJLINK ERRA\r", 5);
        assert_eq!(h.session.state(), SessionState::AuthRejected);
        assert_eq!(h.session.queued(), 0);
        assert_eq!(h.wire.borrow().closes, 1);
        assert!(h.writes().is_empty());
        assert_eq!(
            h.connection_events().last(),
            Some(&ConnectionStatus::AuthFailed)
        );

        h.send("%1POWR 0", 100);
        h.tick(200);
        h.tick(5000);
        assert!(h.writes().is_empty());
        assert_eq!(h.wire.borrow().connects, 1);
    }

    #[test]
    fn test_auth_rejected_after_digest() {
        let mut h = Harness::new(Some("wrong"));
        h.send("%1POWR 1", 0);
        h.send("%1INPT 31", 1);
        h.receive("PJLINK 1 abc123\r", 5);
        assert_eq!(h.writes().len(), 1);

        h.receive("PJLINK ERRA\r", 10);
        assert_eq!(h.session.state(), SessionState::AuthRejected);
        assert_eq!(h.session.queued(), 0);
        assert_eq!(h.writes().len(), 1);
    }

    #[test]
    fn test_new_password_allows_reconnect() {
        let mut h = Harness::new(Some("wrong"));
        h.send("%1POWR 1", 0);
        h.receive("PJLINK ERRA\r", 5);

        h.session.set_password(Some("secret".to_string()));
        assert_eq!(h.session.state(), SessionState::Disconnected);
        h.send("%1POWR 1", 100);
        h.receive("PJLINK 1 abc123\r", 105);
        assert_eq!(h.wire.borrow().connects, 2);
        assert_eq!(
            h.writes(),
            vec!["38d4588fdbc729ba5f07c49b42d195a0%1POWR 1\r".to_string()]
        );
    }

    #[test]
    fn test_one_command_in_flight() {
        let mut h = Harness::ready(None);
        h.send("%1POWR 1", 100);
        h.send("%1INPT 31", 101);
        h.send("%1AVMT 30", 102);
        assert_eq!(h.writes(), vec!["%1POWR 1\r"]);
        assert_eq!(h.session.queued(), 2);

        h.tick(150);
        assert_eq!(h.writes().len(), 1);

        h.receive("%1POWR=OK\r", 200);
        assert_eq!(h.writes(), vec!["%1POWR 1\r", "%1INPT 31\r"]);

        h.receive("%1INPT=OK\r", 300);
        h.receive("%1AVMT=OK\r", 400);
        assert_eq!(h.writes().len(), 3);
        assert_eq!(h.session.state(), SessionState::Ready(Phase::Idle));
    }

    #[test]
    fn test_error_reply_moves_on() {
        let mut h = Harness::ready(None);
        h.send("%1INPT 99", 100);
        h.send("%1AVMT 31", 101);
        h.receive("%1INPT=ERR2\r", 150);
        assert_eq!(h.writes(), vec!["%1INPT 99\r", "%1AVMT 31\r"]);
        assert_eq!(h.session.store().get("%1INPT"), None);
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_status_reply_updates_store_once() {
        let mut h = Harness::ready(None);
        h.send("%1POWR ?", 100);
        h.receive("%1POWR=1\r", 150);
        assert_eq!(h.session.store().get("%1POWR"), Some("1"));
        assert_eq!(
            h.events(),
            vec![SessionEvent::StatusChanged {
                key: "%1POWR".to_string(),
                value: "1".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_line_frees_the_link() {
        let mut h = Harness::ready(None);
        h.send("%1POWR ?", 100);
        h.send("%1LAMP ?", 101);
        h.receive("%1XYZW\r", 150);
        assert_eq!(h.writes(), vec!["%1POWR ?\r", "%1LAMP ?\r"]);
    }

    #[test]
    fn test_class2_queries_enqueued_once() {
        let mut h = Harness::ready(None);
        h.send("%1CLSS ?", 100);
        h.receive("%1CLSS=2\r", 110);
        assert!(h.session.store().is_known("%2SNUM"));
        assert!(h.session.store().is_known("%2SVER"));
        assert!(h.session.store().is_known("%2FREZ"));
        assert_eq!(h.writes().last().map(String::as_str), Some("%2SNUM ?\r"));
        assert_eq!(h.session.queued(), CLASS2_STATIC_QUERIES.len() - 1);

        h.receive("%1CLSS=2\r", 120);
        assert_eq!(h.session.queued(), CLASS2_STATIC_QUERIES.len() - 2);
        for (i, ms) in (130..).step_by(10).take(4).enumerate() {
            h.receive("%2SVER=1.0\r", ms);
            assert_eq!(h.session.queued(), 2_usize.saturating_sub(i));
        }
        let class2_queries = h.writes().iter().filter(|w| w.starts_with("%2")).count();
        assert_eq!(class2_queries, CLASS2_STATIC_QUERIES.len());
    }

    #[test]
    fn test_idle_tick_drains_queue() {
        let mut h = Harness::new(None);
        h.session.connect(h.at(0));
        h.receive("PJLINK 0\r", 5);
        assert_eq!(h.session.state(), SessionState::Ready(Phase::Idle));

        h.session.queue.enqueue(Command::from("%1ERST ?"));
        assert!(h.session.drain_tick(h.at(50)));
        assert_eq!(h.writes(), vec!["%1ERST ?\r"]);
        assert!(!h.session.drain_tick(h.at(60)));
    }

    #[test]
    fn test_refresh_once_per_threshold_crossing() {
        let mut h = Harness::ready(None);
        for ms in (100..=1000).step_by(100) {
            h.tick(ms);
        }
        assert!(h.writes().is_empty());

        // Last activity was the reply at 20ms
        h.tick(1100);
        assert_eq!(h.writes(), vec!["%1POWR ?\r"]);
        assert_eq!(h.session.queued(), 4);

        for ms in (1200..=2000).step_by(100) {
            h.tick(ms);
        }
        assert_eq!(h.writes().len(), 1);

        let replies = ["%1POWR=0", "%1INPT=31", "%1AVMT=30", "%1ERST=000000", "%1LAMP=120 0"];
        for (i, reply) in replies.iter().enumerate() {
            let ms = 2100 + 10 * u64::try_from(i).expect("small index");
            h.receive(&format!("{reply}\r"), ms);
        }
        assert_eq!(h.writes().len(), 5);
        assert_eq!(h.session.state(), SessionState::Ready(Phase::Idle));

        // Next crossing is measured from the last reply at 2140ms
        h.tick(3100);
        assert_eq!(h.writes().len(), 5);
        h.tick(3200);
        assert_eq!(h.writes().len(), 6);
    }

    #[test]
    fn test_idle_timeout_disconnects_and_keeps_store() {
        let mut h = Harness::ready(None);
        h.send("%1POWR ?", 100);
        h.receive("%1POWR=1\r", 150);
        let _ = h.events();

        h.tick(4200);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.wire.borrow().closes, 1);
        assert_eq!(h.connection_events(), vec![ConnectionStatus::Disconnected]);
        assert_eq!(h.session.store().get("%1POWR"), Some("1"));

        h.send("%1POWR ?", 4300);
        assert_eq!(h.wire.borrow().connects, 2);
        assert_eq!(h.session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_silent_projector_times_out_while_awaiting() {
        let mut h = Harness::ready(None);
        h.send("%1POWR 1", 100);
        h.send("%1INPT 31", 110);
        h.tick(2000);
        assert_eq!(h.session.state(), SessionState::Ready(Phase::AwaitingReply));
        h.tick(4200);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.queued(), 0);
    }

    #[test]
    fn test_missing_greeting_times_out() {
        let mut h = Harness::new(None);
        h.send("%1POWR ?", 0);
        h.tick(3000);
        assert_eq!(h.session.state(), SessionState::Connecting);
        h.tick(4100);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(h.writes().is_empty());
    }

    #[test]
    fn test_connect_failure_reports_transport_error() {
        let mut h = Harness::new(None);
        h.wire.borrow_mut().refuse_connect = true;
        h.session.start(h.at(0));
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(
            h.connection_events(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::TransportError]
        );

        h.wire.borrow_mut().refuse_connect = false;
        h.send("%1POWR ?", 100);
        assert_eq!(h.wire.borrow().connects, 1);
    }

    #[test]
    fn test_write_failure_tears_down() {
        let mut h = Harness::ready(None);
        h.wire.borrow_mut().fail_writes = true;
        h.send("%1POWR 1", 100);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.connection_events(), vec![ConnectionStatus::TransportError]);
    }

    #[test]
    fn test_peer_close_discards_queue() {
        let mut h = Harness::ready(None);
        h.send("%1POWR 1", 100);
        h.send("%1INPT 31", 101);
        h.session.on_closed(None, h.at(150));
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.queued(), 0);
        assert_eq!(h.connection_events(), vec![ConnectionStatus::Disconnected]);

        // A second close for the same socket is ignored
        h.session.on_closed(None, h.at(160));
        assert!(h.connection_events().is_empty());
    }

    #[test]
    fn test_socket_error_reports_transport_error() {
        let mut h = Harness::ready(None);
        h.send("%1POWR 1", 100);
        h.send("%1INPT 31", 101);
        h.send("%1AVMT 30", 102);
        assert_eq!(h.session.queued(), 2);

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        h.session.on_closed(Some(&reset), h.at(150));
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.queued(), 0);
        assert_eq!(h.wire.borrow().closes, 1);
        assert_eq!(h.connection_events(), vec![ConnectionStatus::TransportError]);

        // The next command reconnects
        h.send("%1POWR ?", 200);
        assert_eq!(h.wire.borrow().connects, 2);
    }

    #[test]
    fn test_start_sends_static_then_poll_queries() {
        let mut h = Harness::new(None);
        h.session.start(h.at(0));
        assert_eq!(
            h.session.queued(),
            STATIC_QUERIES.len() + h.session.store().poll_commands().len() - 1
        );
        h.receive("PJLINK 0\r", 5);
        assert_eq!(h.writes(), vec!["%1NAME ?\r"]);
    }

    #[test]
    fn test_partial_lines_across_chunks() {
        let mut h = Harness::new(None);
        h.send("%1NAME ?", 0);
        h.receive("PJLI", 1);
        h.receive("NK 0\r%1NA", 2);
        assert_eq!(h.writes(), vec!["%1NAME ?\r"]);
        h.receive("ME=Hall A\r", 3);
        assert_eq!(h.session.store().get("%1NAME"), Some("Hall A"));
    }
}
