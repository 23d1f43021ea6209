use derive_more::{Display, Error, From};

/// Errors from configuring or talking to the projector task
#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display("IO error: {_0}")]
    #[from]
    Io(std::io::Error),
    #[display("Invalid projector address '{host}': expected an IP address")]
    InvalidHost { host: String },
    #[display("Invalid timing: {field} must be greater than zero")]
    InvalidTiming { field: &'static str },
    #[display("Invalid configuration: {_0}")]
    #[from]
    Config(serde_json::Error),
    #[display("Projector task has stopped")]
    TaskStopped,
}

/// Error code carried by a `%xCODE=ERRn` reply.
///
/// These are recoverable: the projector rejected one command and the session
/// carries on with the next.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum CommandError {
    #[display("undefined command")]
    UndefinedCommand,
    #[display("out of parameter")]
    OutOfParameter,
    #[display("unavailable time")]
    UnavailableTime,
    #[display("projector/display failure")]
    ProjectorFailure,
    #[display("authorization error")]
    Authorization,
    #[display("unknown error code '{code}'")]
    Other { code: String },
}

impl CommandError {
    /// Decode the text following `ERR` (e.g. `"2"` or `"A"`)
    pub fn from_code(code: &str) -> Self {
        match code {
            "1" => Self::UndefinedCommand,
            "2" => Self::OutOfParameter,
            "3" => Self::UnavailableTime,
            "4" => Self::ProjectorFailure,
            "A" | "a" => Self::Authorization,
            other => Self::Other {
                code: other.to_string(),
            },
        }
    }

    /// Wire form of the error value, e.g. `ERR2`
    pub fn wire_value(&self) -> String {
        match self {
            Self::UndefinedCommand => "ERR1".to_string(),
            Self::OutOfParameter => "ERR2".to_string(),
            Self::UnavailableTime => "ERR3".to_string(),
            Self::ProjectorFailure => "ERR4".to_string(),
            Self::Authorization => "ERRA".to_string(),
            Self::Other { code } => format!("ERR{code}"),
        }
    }
}
