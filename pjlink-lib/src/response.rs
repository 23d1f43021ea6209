//! Classification of lines received from the projector.

use crate::auth::Greeting;
use crate::error::CommandError;

/// One received line, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `PJLINK 0`, `PJLINK 1 <nonce>` or `PJLINK ERRA`
    Greeting(Greeting),
    /// `%1POWR=OK`: a set command was accepted
    Ack { key: String },
    /// `%1INPT=ERR2`: the command was refused
    Error { key: String, error: CommandError },
    /// `%1POWR=1`: a parameter value
    Status { key: String, value: String },
    /// Anything else; ignored so newer parameters don't break old clients
    Unknown,
}

impl Response {
    /// Classify a line (CR already stripped).
    ///
    /// Greetings take precedence, then acknowledgements, then errors, then
    /// plain status values.
    pub fn parse(line: &str) -> Self {
        if let Some(greeting) = Greeting::parse(line) {
            return Self::Greeting(greeting);
        }

        let Some((key, value)) = split_status(line) else {
            return Self::Unknown;
        };
        let key = key.to_string();

        if value == "OK" {
            Self::Ack { key }
        } else if let Some(code) = value.strip_prefix("ERR") {
            Self::Error {
                key,
                error: CommandError::from_code(code),
            }
        } else {
            Self::Status {
                key,
                value: value.to_string(),
            }
        }
    }
}

/// Split `%<class><CODE>=<value>` into key and value.
///
/// The class must be 1 or 2 and the code four ASCII letters or digits
/// (`INF1` and `INF2` carry digits).
fn split_status(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let bytes = key.as_bytes();
    let valid = bytes.len() == 6
        && bytes[0] == b'%'
        && matches!(bytes[1], b'1' | b'2')
        && bytes[2..].iter().all(u8::is_ascii_alphanumeric);
    valid.then_some((key, value))
}
