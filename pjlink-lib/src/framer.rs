//! Splits the projector byte stream into CR-terminated protocol lines.

/// Reassembles protocol lines across arbitrary chunk boundaries.
///
/// No line length limit is enforced; a peer that never sends a CR grows the
/// carry-over buffer until it does.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, in arrival order.
    ///
    /// The CR terminator is stripped. A trailing partial line stays in the
    /// carry-over buffer for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            match byte {
                b'\r' => {
                    lines.push(String::from_utf8_lossy(&self.carry).into_owned());
                    self.carry.clear();
                }
                // Some firmware terminates with CR LF
                b'\n' => {}
                _ => self.carry.push(byte),
            }
        }

        lines
    }

    /// Drop any partial line (used when a new connection starts)
    pub fn clear(&mut self) {
        self.carry.clear();
    }

    /// Number of bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}
