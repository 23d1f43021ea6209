//! Greeting handling and the MD5 challenge response.
//!
//! A projector opens every connection with one of three greetings:
//!
//! ```text
//! PJLINK 0            no authentication
//! PJLINK 1 <nonce>    send MD5(nonce + password) in front of every command
//! PJLINK ERRA         password rejected
//! ```

use md5::{Digest, Md5};

/// The three greeting outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Greeting {
    /// `PJLINK 0`
    NoAuth,
    /// `PJLINK 1 <nonce>`
    Challenge { nonce: String },
    /// `PJLINK ERRA`
    Rejected,
}

impl Greeting {
    /// Recognize a greeting line. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        if line.starts_with("PJLINK ERRA") {
            return Some(Self::Rejected);
        }
        if line.starts_with("PJLINK 0") {
            return Some(Self::NoAuth);
        }
        let rest = line.strip_prefix("PJLINK 1 ")?;
        let nonce = rest.split(char::is_whitespace).next()?;
        if nonce.is_empty() {
            return None;
        }
        Some(Self::Challenge {
            nonce: nonce.to_string(),
        })
    }

    /// Resolve the write prefix for this greeting.
    ///
    /// Returns `None` when the projector rejected the password. A missing
    /// password answers a challenge with the digest of the bare nonce.
    pub fn prefix(&self, password: Option<&str>) -> Option<AuthPrefix> {
        match self {
            Self::NoAuth => Some(AuthPrefix::none()),
            Self::Challenge { nonce } => Some(AuthPrefix::from_challenge(
                nonce,
                password.unwrap_or_default(),
            )),
            Self::Rejected => None,
        }
    }
}

/// Text prepended to every outbound write on an authenticated connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPrefix(String);

impl AuthPrefix {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_challenge(nonce: &str, password: &str) -> Self {
        Self(challenge_response(nonce, password))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lowercase hex MD5 of the nonce immediately followed by the password
pub fn challenge_response(nonce: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(nonce.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
