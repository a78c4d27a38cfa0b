use crate::config::{ConfigError, ConfigKey, ConfigStore, UpdateMode};
use colored::*;
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lines from a blocking input, read on a helper thread so callers can wait
/// with a timeout.
///
/// The helper reads one line at a time and hands it over only when asked, so
/// dropping the reader releases the input after at most one further line.
pub struct LineReader {
    lines: Receiver<String>,
}

impl LineReader {
    pub fn spawn<R>(input: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(0);
        thread::Builder::new().name("vtc-console".into()).spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
        Ok(Self { lines: rx })
    }

    pub fn stdin() -> io::Result<Self> {
        Self::spawn(io::BufReader::new(io::stdin()))
    }

    /// Next trimmed line, or `None` on timeout or end of input.
    pub fn read_line(&self, timeout: Duration) -> Option<String> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Some(line.trim().to_string()),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    TimedOut,
    Declined,
    InvalidJson,
    Committed(Vec<ConfigKey>),
}

fn is_yes(answer: Option<&str>) -> bool {
    matches!(answer, Some("Y") | Some("y"))
}

/// Offers to change the stored configuration. Serial updates are committed
/// without restarting; the boot sequence simply continues with the new
/// document.
pub fn run_boot_prompt<W: Write>(
    reader: &LineReader,
    out: &mut W,
    store: &mut dyn ConfigStore,
    timeout: Duration,
) -> Result<PromptOutcome, ConfigError> {
    writeln!(out, "{} {}", "Change config?".bright_cyan().bold(), "(Y/N)".dimmed())?;
    out.flush()?;

    let answer = reader.read_line(timeout);
    if answer.is_none() {
        debug!("no answer at config prompt");
        return Ok(PromptOutcome::TimedOut);
    }
    if !is_yes(answer.as_deref()) {
        return Ok(PromptOutcome::Declined);
    }

    writeln!(out, "{}", "Enter config JSON:".bright_cyan())?;
    out.flush()?;
    let Some(line) = reader.read_line(timeout) else {
        return Ok(PromptOutcome::TimedOut);
    };
    let update = match serde_json::from_str::<Value>(&line) {
        Ok(Value::Object(update)) => update,
        _ => {
            writeln!(out, "{}", "Error: Config string is an invalid JSON string".red())?;
            warn!("config prompt received invalid JSON");
            return Ok(PromptOutcome::InvalidJson);
        }
    };

    let mode = UpdateMode::Serial;
    let mut document = store.load()?;
    let mut write_error = None;
    let applied = document.apply_update(&update, |key, value| {
        let asked = writeln!(out, "\nConfirm {} = {}\n{}", key.as_str().bold(), value.yellow(), "(Y/N)".dimmed())
            .and_then(|()| out.flush());
        if let Err(e) = asked {
            write_error.get_or_insert(e);
            return false;
        }
        is_yes(reader.read_line(timeout).as_deref())
    });
    if let Some(e) = write_error {
        return Err(e.into());
    }

    store.commit(&document)?;
    writeln!(out, "{}", "Committed new config information".green())?;
    info!(?mode, applied = ?applied, "configuration committed from console");
    Ok(PromptOutcome::Committed(applied))
}
