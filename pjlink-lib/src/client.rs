//! Projector task: owns the TCP connection and drives a [`Session`].
//!
//! Each connection gets a reader thread that forwards received chunks to the
//! task channel, so socket data, caller requests and the poll ticker are all
//! handled on one thread in arrival order.

use log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{ProjectorConfig, Timing};
use crate::error::Error;
use crate::event::EventSender;
use crate::queue::Command;
use crate::session::{Connector, Link, Session};
use crate::status::Parameter;

const READ_BUFFER_SIZE: usize = 512;

/// Message to the projector task
pub enum TaskMessage {
    /// Fire-and-forget command
    Command(Command),
    /// Re-send the status poll set
    Refresh,
    SetPassword(Option<String>),
    /// Reply with a copy of the status store
    Snapshot(oneshot::Sender<Vec<Parameter>>),
    /// Bytes from the reader thread of connection `generation`
    Received { generation: u64, data: Vec<u8> },
    /// Connection `generation` reached EOF or failed
    Closed {
        generation: u64,
        error: Option<io::Error>,
    },
    Shutdown,
}

pub type TaskSender = Sender<TaskMessage>;
pub type TaskReceiver = Receiver<TaskMessage>;

/// Opens TCP connections and starts a reader thread for each
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
    tx: TaskSender,
    generation: u64,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr, timeout: Duration, tx: TaskSender) -> Self {
        Self {
            addr,
            timeout,
            tx,
            generation: 0,
        }
    }

    /// Generation of the most recent connection; messages tagged with an
    /// older one belong to a socket that has already been dropped
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Connector for TcpConnector {
    type Link = TcpLink;

    fn connect(&mut self) -> io::Result<TcpLink> {
        info!(
            "Connecting to projector at {} (timeout: {}ms)",
            self.addr,
            self.timeout.as_millis()
        );
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.timeout))?;
        let reader = stream.try_clone()?;

        self.generation += 1;
        let generation = self.generation;
        let tx = self.tx.clone();
        thread::Builder::new()
            .name("pjlink-reader".to_string())
            .spawn(move || read_loop(reader, generation, &tx))?;

        Ok(TcpLink { stream })
    }
}

fn read_loop(mut stream: TcpStream, generation: u64, tx: &TaskSender) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let message = match stream.read(&mut buf) {
            Ok(0) => TaskMessage::Closed {
                generation,
                error: None,
            },
            Ok(n) => TaskMessage::Received {
                generation,
                data: buf[..n].to_vec(),
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => TaskMessage::Closed {
                generation,
                error: Some(e),
            },
        };
        let closed = matches!(message, TaskMessage::Closed { .. });
        if tx.send(message).is_err() || closed {
            break;
        }
    }
    debug!("Reader for connection {generation} finished");
}

pub struct TcpLink {
    stream: TcpStream,
}

impl Link for TcpLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Socket shutdown failed: {e}");
        }
    }
}

/// Handle to a running projector task. Dropping it stops the task.
pub struct ProjectorHandle {
    tx: TaskSender,
    thread: Option<JoinHandle<()>>,
}

impl ProjectorHandle {
    /// Queue a command such as `%1POWR 1`; replies land in the status store
    pub fn request_command(&self, command: impl Into<Command>) {
        let command = command.into();
        if self.send(TaskMessage::Command(command)).is_err() {
            warn!("Projector task has stopped, dropping command");
        }
    }

    pub fn refresh(&self) {
        if self.send(TaskMessage::Refresh).is_err() {
            warn!("Projector task has stopped, not refreshing");
        }
    }

    /// Use a new password from the next connection on
    pub fn set_password(&self, password: Option<String>) {
        if self.send(TaskMessage::SetPassword(password)).is_err() {
            warn!("Projector task has stopped, password not updated");
        }
    }

    /// Copy of every known parameter
    pub fn snapshot(&self, timeout: Duration) -> Result<Vec<Parameter>, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(TaskMessage::Snapshot(reply_tx))?;
        reply_rx.recv_timeout(timeout).map_err(|_| Error::TaskStopped)
    }

    /// Close the connection and wait for the task to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, message: TaskMessage) -> Result<(), Error> {
        self.tx.send(message).map_err(|_| Error::TaskStopped)
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(TaskMessage::Shutdown);
            if thread.join().is_err() {
                warn!("Projector task panicked");
            }
        }
    }
}

impl Drop for ProjectorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Validate `config`, start the projector task and queue the startup queries.
///
/// Status and connection changes are reported on `events`.
pub fn start_projector_task(
    config: &ProjectorConfig,
    events: EventSender,
) -> Result<ProjectorHandle, Error> {
    config.validate()?;
    let addr = config.socket_addr()?;
    let timing = config.timing;
    let (tx, rx) = mpsc::channel();

    let connector = TcpConnector::new(addr, timing.connect_timeout(), tx.clone());
    let session = Session::new(
        connector,
        config.password().map(str::to_string),
        timing,
        events,
    );

    let thread = thread::Builder::new()
        .name("pjlink".to_string())
        .spawn(move || projector_task(session, &rx, timing))?;

    Ok(ProjectorHandle {
        tx,
        thread: Some(thread),
    })
}

/// Run the projector task until shut down
pub fn projector_task(mut session: Session<TcpConnector>, rx: &TaskReceiver, timing: Timing) {
    info!("Projector task starting...");
    let tick = timing.tick();
    session.start(Instant::now());
    let mut next_tick = Instant::now() + tick;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(TaskMessage::Shutdown) => {
                info!("Projector task shutting down");
                break;
            }
            Ok(message) => handle_message(&mut session, message),
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                session.tick(now);
                next_tick += tick;
                if next_tick < now {
                    // Fell behind (blocking connect), skip the missed ticks
                    next_tick = now + tick;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                info!("Projector task channel closed, shutting down");
                break;
            }
        }
    }

    session.shutdown();
}

fn handle_message(session: &mut Session<TcpConnector>, message: TaskMessage) {
    let now = Instant::now();
    match message {
        TaskMessage::Command(command) => session.send(command, now),
        TaskMessage::Refresh => session.refresh(now),
        TaskMessage::SetPassword(password) => session.set_password(password),
        TaskMessage::Snapshot(reply_tx) => {
            let _ = reply_tx.send(session.store().snapshot());
        }
        TaskMessage::Received { generation, data } => {
            if generation == session.connector().generation() {
                session.on_data(&data, now);
            } else {
                debug!("Dropping {} bytes from stale connection {generation}", data.len());
            }
        }
        TaskMessage::Closed { generation, error } => {
            if generation == session.connector().generation() {
                session.on_closed(error.as_ref(), now);
            }
        }
        TaskMessage::Shutdown => {}
    }
}
