//! PJLink projector control
//!
//! This library implements the client side of the PJLink protocol (TCP port
//! 4352): line framing, MD5 challenge authentication, a one-command-in-flight
//! session with idle polling, and a store of the last-known projector status.
//! It also carries an emulated projector for tests and the mock server.
//!
//! Start a projector with [`start_projector_task`] and talk to it through the
//! returned [`ProjectorHandle`].

pub mod auth;
pub mod client;
pub mod config;
pub mod emulator;
pub mod error;
pub mod event;
pub mod framer;
pub mod queue;
pub mod response;
pub mod session;
pub mod status;

pub use client::{start_projector_task, ProjectorHandle};
pub use config::{LogLevel, ProjectorConfig, Timing, DEFAULT_PORT};
pub use error::{CommandError, Error};
pub use event::{ConnectionStatus, SessionEvent};
pub use queue::Command;
pub use status::{Parameter, PowerState};
