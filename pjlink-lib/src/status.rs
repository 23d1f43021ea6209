//! Last-known projector parameters and the query sets that refresh them.

use indexmap::IndexMap;
use log::debug;
use serde::Serialize;

use crate::event::{EventSender, SessionEvent};
use crate::queue::Command;

pub const POWER_KEY: &str = "%1POWR";
pub const INPUT_KEY: &str = "%1INPT";
pub const CLASS_KEY: &str = "%1CLSS";
pub const INPUT_NAME_KEY: &str = "%2INNM";

/// Class 1 parameters and their labels
pub const CLASS1_PARAMETERS: &[(&str, &str)] = &[
    ("%1POWR", "Power status"),
    ("%1INPT", "Input switch"),
    ("%1AVMT", "Mute status"),
    ("%1ERST", "Error status"),
    ("%1LAMP", "Lamp hours"),
    ("%1INST", "Input list"),
    ("%1NAME", "Projector name"),
    ("%1INF1", "Manufacturer name"),
    ("%1INF2", "Product name"),
    ("%1INFO", "Other info"),
    ("%1CLSS", "Class info"),
];

/// Parameters added once the projector reports class 2
pub const CLASS2_PARAMETERS: &[(&str, &str)] = &[
    ("%2SNUM", "Serial number"),
    ("%2SVER", "Software version"),
    ("%2INNM", "Input terminal name"),
    ("%2IRES", "Input resolution"),
    ("%2RRES", "Recommended resolution"),
    ("%2FILT", "Filter usage time"),
    ("%2RLMP", "Lamp model number"),
    ("%2RFIL", "Filter model number"),
    ("%2FREZ", "Freeze status"),
];

/// Values that don't change while the projector runs; queried once at start
pub const STATIC_QUERIES: &[&str] = &[
    "%1NAME ?", "%1INST ?", "%1INF1 ?", "%1INF2 ?", "%1INFO ?", "%1CLSS ?",
];

/// Static class 2 values; queried when class 2 is first detected
pub const CLASS2_STATIC_QUERIES: &[&str] =
    &["%2SNUM ?", "%2SVER ?", "%2RRES ?", "%2RLMP ?", "%2RFIL ?"];

const CLASS1_POLL_QUERIES: &[&str] =
    &["%1POWR ?", "%1INPT ?", "%1AVMT ?", "%1ERST ?", "%1LAMP ?"];

const CLASS2_POLL_QUERIES: &[&str] = &["%2IRES ?", "%2FILT ?", "%2FREZ ?"];

/// Decoded `%1POWR` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
    Cooling,
    WarmingUp,
}

impl PowerState {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "0" => Some(Self::Off),
            "1" => Some(Self::On),
            "2" => Some(Self::Cooling),
            "3" => Some(Self::WarmingUp),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Off => "0",
            Self::On => "1",
            Self::Cooling => "2",
            Self::WarmingUp => "3",
        }
    }
}

/// One parameter as exposed to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub key: String,
    pub label: &'static str,
    /// `None` until the projector has reported it
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    label: &'static str,
    value: Option<String>,
}

/// Key → last-known value, in definition order.
///
/// Every write is forwarded as [`SessionEvent::StatusChanged`], even when the
/// value did not change. Keys are never removed and nothing is cleared on
/// disconnect, so stale values stay visible until overwritten.
#[derive(Debug)]
pub struct StatusStore {
    entries: IndexMap<String, Entry>,
    class2: bool,
    events: EventSender,
}

impl StatusStore {
    pub fn new(events: EventSender) -> Self {
        let mut store = Self {
            entries: IndexMap::new(),
            class2: false,
            events,
        };
        store.define(CLASS1_PARAMETERS);
        store
    }

    fn define(&mut self, parameters: &[(&'static str, &'static str)]) {
        for &(key, label) in parameters {
            self.entries
                .entry(key.to_string())
                .and_modify(|entry| entry.label = label)
                .or_insert(Entry { label, value: None });
        }
    }

    /// Overwrite a value and notify collaborators.
    ///
    /// Returns `true` when this write moved the projector into class 2; the
    /// class 2 parameters are defined at that point and the caller should
    /// queue [`CLASS2_STATIC_QUERIES`]. Repeated class reports return `false`.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| entry.value = Some(value.to_string()))
            .or_insert(Entry {
                label: "",
                value: Some(value.to_string()),
            });

        let _ = self.events.send(SessionEvent::StatusChanged {
            key: key.to_string(),
            value: value.to_string(),
        });

        if key != CLASS_KEY || self.class2 {
            return false;
        }
        match parse_class(value) {
            Some(class) if class >= 2 => {
                debug!("Projector class {class}, adding class 2 parameters");
                self.class2 = true;
                self.define(CLASS2_PARAMETERS);
                true
            }
            _ => false,
        }
    }

    /// Last value for `key`, `None` while unset or unknown
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key)?.value.as_deref()
    }

    /// Whether `key` is in the known-parameter set
    pub fn is_known(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Class from the last `%1CLSS` report
    pub fn projector_class(&self) -> Option<u8> {
        self.get(CLASS_KEY).and_then(parse_class)
    }

    pub fn class2_enabled(&self) -> bool {
        self.class2
    }

    pub fn power(&self) -> Option<PowerState> {
        self.get(POWER_KEY).and_then(PowerState::from_value)
    }

    /// Ordered copy of every known parameter
    pub fn snapshot(&self) -> Vec<Parameter> {
        self.entries
            .iter()
            .map(|(key, entry)| Parameter {
                key: key.clone(),
                label: entry.label,
                value: entry.value.clone(),
            })
            .collect()
    }

    /// The periodic status poll set for the current class.
    ///
    /// The input terminal name query needs the current input, so it is
    /// skipped until `%1INPT` is known.
    pub fn poll_commands(&self) -> Vec<Command> {
        let mut commands: Vec<Command> = CLASS1_POLL_QUERIES
            .iter()
            .map(|q| Command::new(*q))
            .collect();

        if self.class2 {
            if let Some(input) = self.get(INPUT_KEY).filter(|input| !input.is_empty()) {
                commands.push(Command::new(format!("{INPUT_NAME_KEY} ?{input}")));
            }
            commands.extend(CLASS2_POLL_QUERIES.iter().map(|q| Command::new(*q)));
        }

        commands
    }
}

fn parse_class(value: &str) -> Option<u8> {
    value.trim().parse().ok()
}
