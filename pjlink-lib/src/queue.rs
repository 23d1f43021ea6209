//! Outbound commands and the FIFO they wait in.

use std::collections::VecDeque;
use std::fmt;

/// An outbound PJLink command such as `%1POWR 1` (without prefix or CR).
///
/// Commands are opaque: any reply arrives later as a separate keyed line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Query for a parameter key, e.g. `%1POWR ?`
    pub fn query(key: &str) -> Self {
        Self(format!("{key} ?"))
    }

    /// Set a parameter, e.g. `%1INPT 31`
    pub fn set(key: &str, param: &str) -> Self {
        Self(format!("{key} {param}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Commands waiting for the connection to become idle.
///
/// Pure FIFO: no deduplication, no priorities.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn dequeue_next(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Discard everything, returning how many commands were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.commands.len();
        self.commands.clear();
        dropped
    }
}
