use crate::config::{ConfigDocument, ConfigError, ConfigKey, ConfigStore, UpdateMode};
use crate::context::SharedContext;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const MAX_COMMAND_SIZE: usize = 512;

pub const STATUS_RECONFIGURING: &str = "Reconfiguring device";
pub const STATUS_RESETTING: &str = "Resetting device";
pub const STATUS_INVALID_PAYLOAD: &str = "Error: Message is an invalid JSON string";
pub const STATUS_INVALID_COMMAND: &str = "Error: CMD is invalid";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reconfigure(Map<String, Value>),
    Reset,
    Ping,
    /// Well-formed document with a missing or unrecognised `CMD`.
    Unknown(Option<String>),
}

impl Command {
    pub const RECONFIGURE: &'static str = "CNFG";
    pub const RESET: &'static str = "RST";
    pub const PING: &'static str = "PNG";

    /// Wire form, used by the operator console.
    pub fn to_json(&self) -> Value {
        match self {
            Command::Reconfigure(fields) => serde_json::json!({
                "CMD": Self::RECONFIGURE,
                "CNFG": fields,
            }),
            Command::Reset => serde_json::json!({ "CMD": Self::RESET }),
            Command::Ping => serde_json::json!({ "CMD": Self::PING }),
            Command::Unknown(Some(keyword)) => serde_json::json!({ "CMD": keyword }),
            Command::Unknown(None) => Value::Object(Map::new()),
        }
    }
}

/// Decodes an inbound document keyed by `CMD`:
///
/// ```text
/// {"CMD":"CNFG","CNFG":{"SITE":"north","VTHRESHOLD":"130.0"}}
/// {"CMD":"RST"}
/// {"CMD":"PNG"}
/// ```
pub fn decode_command(payload: &[u8]) -> Result<Command, CommandError> {
    if payload.len() > MAX_COMMAND_SIZE {
        return Err(CommandError::InvalidPayload(format!(
            "{} bytes exceeds {MAX_COMMAND_SIZE}",
            payload.len()
        )));
    }

    let document: Value =
        serde_json::from_slice(payload).map_err(|e| CommandError::InvalidPayload(e.to_string()))?;
    let Value::Object(mut root) = document else {
        return Err(CommandError::InvalidPayload("not a JSON object".into()));
    };

    let keyword = match root.get("CMD") {
        Some(Value::String(keyword)) => keyword.clone(),
        _ => return Ok(Command::Unknown(None)),
    };

    match keyword.as_str() {
        Command::RECONFIGURE => match root.remove(Command::RECONFIGURE) {
            Some(Value::Object(fields)) => Ok(Command::Reconfigure(fields)),
            _ => Err(CommandError::InvalidPayload("CNFG must carry a configuration object".into())),
        },
        Command::RESET => Ok(Command::Reset),
        Command::PING => Ok(Command::Ping),
        _ => Ok(Command::Unknown(Some(keyword))),
    }
}

/// What the publisher must do after a command was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    /// Message for the info topic, if any.
    pub status: Option<&'static str>,
    pub restart: bool,
}

impl CommandOutcome {
    fn status(status: &'static str) -> Self {
        Self {
            status: Some(status),
            restart: false,
        }
    }

    fn restart(status: &'static str) -> Self {
        Self {
            status: Some(status),
            restart: true,
        }
    }
}

pub struct CommandHandler {
    store: Box<dyn ConfigStore>,
    ctx: Arc<SharedContext>,
}

impl CommandHandler {
    pub fn new(store: Box<dyn ConfigStore>, ctx: Arc<SharedContext>) -> Self {
        Self { store, ctx }
    }

    pub fn handle(&mut self, payload: &[u8]) -> CommandOutcome {
        let command = match decode_command(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "rejecting inbound message");
                return CommandOutcome::status(STATUS_INVALID_PAYLOAD);
            }
        };

        match command {
            Command::Reconfigure(fields) => {
                info!(fields = fields.len(), "reconfiguration requested");
                if let Err(e) = self.reconfigure(&fields) {
                    error!(error = %e, "failed to commit configuration update");
                }
                CommandOutcome::restart(STATUS_RECONFIGURING)
            }
            Command::Reset => {
                info!("reset requested");
                CommandOutcome::restart(STATUS_RESETTING)
            }
            Command::Ping => {
                self.ctx.request_ping();
                CommandOutcome::default()
            }
            Command::Unknown(keyword) => {
                warn!(cmd = ?keyword, "unrecognised command");
                CommandOutcome::status(STATUS_INVALID_COMMAND)
            }
        }
    }

    fn reconfigure(&mut self, fields: &Map<String, Value>) -> Result<Vec<ConfigKey>, ConfigError> {
        let mut document = self.store.load()?;
        let applied = apply_remote(&mut document, fields);
        self.store.commit(&document)?;
        info!(applied = ?applied, "configuration committed");
        Ok(applied)
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }
}

fn apply_remote(document: &mut ConfigDocument, fields: &Map<String, Value>) -> Vec<ConfigKey> {
    let mode = UpdateMode::Remote;
    document.apply_update(fields, |key, value| {
        info!(?mode, %key, value, "updating field");
        true
    })
}
