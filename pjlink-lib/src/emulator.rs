//! Projector side of the protocol, for the mock projector and tests.
//!
//! Answers class 1 and class 2 queries from a shared [`DeviceState`] and
//! checks the authentication prefix on every line when a password is set.

use log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::auth::challenge_response;
use crate::framer::LineFramer;
use crate::status::PowerState;

/// Length of the hex MD5 digest in front of authenticated commands
const DIGEST_LEN: usize = 32;

/// Everything the emulated projector reports
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// PJLink class reported by `%1CLSS`
    pub class: u8,
    pub power: PowerState,
    pub input: String,
    /// Input code and terminal name
    pub inputs: Vec<(String, String)>,
    pub mute: String,
    pub freeze: String,
    pub error_status: String,
    pub lamp_hours: u32,
    pub filter_hours: u32,
    pub name: String,
    pub manufacturer: String,
    pub product: String,
    pub info: String,
    pub serial: String,
    pub software_version: String,
    pub lamp_model: String,
    pub filter_model: String,
    pub resolution: String,
    pub recommended_resolution: String,
}

impl Default for DeviceState {
    fn default() -> Self {
        let inputs = [
            ("11", "RGB1"),
            ("12", "RGB2"),
            ("31", "DVI-D"),
            ("32", "HDMI"),
            ("33", "Digital link"),
            ("34", "SDI1"),
            ("35", "SDI2"),
        ];
        Self {
            class: 2,
            power: PowerState::Off,
            input: "31".to_string(),
            inputs: inputs
                .iter()
                .map(|(code, name)| ((*code).to_string(), (*name).to_string()))
                .collect(),
            mute: "30".to_string(),
            freeze: "0".to_string(),
            error_status: "000000".to_string(),
            lamp_hours: 1234,
            filter_hours: 567,
            name: "Emulated projector".to_string(),
            manufacturer: "PJLINK".to_string(),
            product: "Emulator".to_string(),
            info: "Protocol test device".to_string(),
            serial: "EMU0001".to_string(),
            software_version: "1.0.0".to_string(),
            lamp_model: "LMP-1".to_string(),
            filter_model: "FLT-1".to_string(),
            resolution: "1920x1080".to_string(),
            recommended_resolution: "1920x1200".to_string(),
        }
    }
}

impl DeviceState {
    fn input_name(&self, code: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, name)| name.as_str())
    }

    /// Answer one command body such as `%1POWR ?` or `%2FREZ 1`
    pub fn handle_command(&mut self, body: &str) -> Option<String> {
        let (key, param) = body.split_once(' ').unwrap_or((body, ""));
        let bytes = key.as_bytes();
        if bytes.len() != 6 || bytes[0] != b'%' || !key.is_ascii() {
            debug!("Ignoring malformed command {body:?}");
            return None;
        }
        let class = bytes[1];
        let code = key[2..].to_ascii_uppercase();

        let value = match class {
            b'1' => self.class1(&code, param),
            b'2' if self.class >= 2 => self.class2(&code, param),
            _ => Err("ERR1"),
        };
        Some(format!("{key}={}", value.unwrap_or_else(str::to_string)))
    }

    fn class1(&mut self, code: &str, param: &str) -> Result<String, &'static str> {
        let query = param == "?";
        let powered = self.power == PowerState::On;
        match code {
            "POWR" if query => Ok(self.power.code().to_string()),
            "POWR" => {
                self.power = match param {
                    "0" => PowerState::Off,
                    "1" => PowerState::On,
                    _ => return Err("ERR2"),
                };
                Ok("OK".to_string())
            }
            "INPT" if query => Ok(self.input.clone()),
            "INPT" if !powered => Err("ERR3"),
            "INPT" => {
                if self.input_name(param).is_none() {
                    return Err("ERR2");
                }
                self.input = param.to_string();
                Ok("OK".to_string())
            }
            "AVMT" if query => Ok(self.mute.clone()),
            "AVMT" if !powered => Err("ERR3"),
            "AVMT" => {
                if !matches!(param, "10" | "11" | "20" | "21" | "30" | "31") {
                    return Err("ERR2");
                }
                self.mute = param.to_string();
                Ok("OK".to_string())
            }
            _ if !query => Err("ERR1"),
            "ERST" => Ok(self.error_status.clone()),
            "LAMP" => Ok(format!("{} {}", self.lamp_hours, u8::from(powered))),
            "INST" => Ok(self
                .inputs
                .iter()
                .map(|(code, _)| code.as_str())
                .collect::<Vec<_>>()
                .join(" ")),
            "NAME" => Ok(self.name.clone()),
            "INF1" => Ok(self.manufacturer.clone()),
            "INF2" => Ok(self.product.clone()),
            "INFO" => Ok(self.info.clone()),
            "CLSS" => Ok(self.class.to_string()),
            _ => Err("ERR1"),
        }
    }

    fn class2(&mut self, code: &str, param: &str) -> Result<String, &'static str> {
        let query = param.starts_with('?');
        match code {
            "FREZ" if query => Ok(self.freeze.clone()),
            "FREZ" if self.power != PowerState::On => Err("ERR3"),
            "FREZ" => {
                if !matches!(param, "0" | "1") {
                    return Err("ERR2");
                }
                self.freeze = param.to_string();
                Ok("OK".to_string())
            }
            "INNM" if query => self
                .input_name(&param[1..])
                .map(str::to_string)
                .ok_or("ERR2"),
            _ if !query => Err("ERR1"),
            "SNUM" => Ok(self.serial.clone()),
            "SVER" => Ok(self.software_version.clone()),
            "IRES" if self.power != PowerState::On => Err("ERR3"),
            "IRES" => Ok(self.resolution.clone()),
            "RRES" => Ok(self.recommended_resolution.clone()),
            "FILT" => Ok(self.filter_hours.to_string()),
            "RLMP" => Ok(self.lamp_model.clone()),
            "RFIL" => Ok(self.filter_model.clone()),
            "POWR" | "INPT" | "AVMT" | "ERST" | "LAMP" | "INST" | "NAME" | "INF1" | "INF2"
            | "INFO" | "CLSS" => self.class1(code, param),
            _ => Err("ERR1"),
        }
    }
}

/// What to do with one received line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Line(String),
    /// Send `PJLINK ERRA` and close the connection
    Reject,
    /// Nothing to send
    Silent,
}

/// A shared emulated projector; clones share the same device state
#[derive(Debug, Clone)]
pub struct ProjectorEmulator {
    state: Arc<Mutex<DeviceState>>,
    password: Option<String>,
}

impl ProjectorEmulator {
    pub fn new(state: DeviceState, password: Option<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-connection protocol state with a fresh nonce
    pub fn connection(&self) -> EmulatorConnection {
        let nonce = self.password.as_ref().map(|_| new_nonce());
        EmulatorConnection {
            emulator: self.clone(),
            nonce,
            authenticated: false,
        }
    }

    /// Accept clients forever, one thread each
    pub fn run(&self, listener: &TcpListener) -> io::Result<()> {
        info!("Mock projector listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let emulator = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = emulator.serve(stream) {
                            warn!("Client error: {e}");
                        }
                    });
                }
                Err(e) => warn!("Connection error: {e}"),
            }
        }
        Ok(())
    }

    /// Talk to one client until it disconnects or fails authentication
    pub fn serve(&self, mut stream: TcpStream) -> io::Result<()> {
        let peer = stream.peer_addr()?;
        info!("Client connected: {peer}");
        let mut connection = self.connection();
        stream.write_all(format!("{}\r", connection.greeting()).as_bytes())?;

        let mut framer = LineFramer::new();
        let mut buf = [0u8; 256];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                info!("Client disconnected: {peer}");
                return Ok(());
            }
            for line in framer.push(&buf[..n]) {
                debug!("RX: {line}");
                match connection.handle_line(&line) {
                    Reply::Line(reply) => {
                        debug!("TX: {reply}");
                        stream.write_all(format!("{reply}\r").as_bytes())?;
                    }
                    Reply::Reject => {
                        warn!("Client {peer} failed authentication");
                        stream.write_all(b"PJLINK ERRA\r")?;
                        return Ok(());
                    }
                    Reply::Silent => {}
                }
            }
        }
    }
}

/// Protocol state of one client connection
pub struct EmulatorConnection {
    emulator: ProjectorEmulator,
    nonce: Option<String>,
    authenticated: bool,
}

impl EmulatorConnection {
    pub fn greeting(&self) -> String {
        match &self.nonce {
            Some(nonce) => format!("PJLINK 1 {nonce}"),
            None => "PJLINK 0".to_string(),
        }
    }

    /// Check authentication and answer one line
    pub fn handle_line(&mut self, line: &str) -> Reply {
        let line = line.trim();
        if line.is_empty() {
            return Reply::Silent;
        }
        let (digest, body) = match line.find('%') {
            Some(at) => line.split_at(at),
            None => (line, ""),
        };

        if let (Some(nonce), Some(password)) = (&self.nonce, &self.emulator.password) {
            let expected = challenge_response(nonce, password);
            let valid = if digest.is_empty() {
                self.authenticated
            } else {
                digest.len() == DIGEST_LEN && digest.eq_ignore_ascii_case(&expected)
            };
            if !valid {
                return Reply::Reject;
            }
            self.authenticated = true;
        } else if !digest.is_empty() {
            debug!("Ignoring unexpected prefix {digest:?}");
        }

        match self.emulator.state().handle_command(body) {
            Some(reply) => Reply::Line(reply),
            None => Reply::Silent,
        }
    }
}

fn new_nonce() -> String {
    format!("{:08x}", rand::random::<u32>())
}
