//! Console host command processor.
//!
//! A minimal host for running scriptmill standalone: messages go to a text
//! sink (stdout by default) instead of connected players.

use std::io::{self, Write};

use anyhow::{Context as _, bail};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::host::CommandProcessor;

/// [`CommandProcessor`] understanding `say`, `echo`, `tellraw` and `time`.
pub struct ConsoleProcessor {
    out: Box<dyn Write + Send>,
}

impl ConsoleProcessor {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    fn emit(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }
}

/// Extract the display text of a JSON text component
fn component_text(component: &Value) -> String {
    match component {
        Value::String(s) => s.clone(),
        Value::Object(fields) => {
            let mut text = fields
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(Value::Array(extra)) = fields.get("extra") {
                for part in extra {
                    text.push_str(&component_text(part));
                }
            }
            text
        }
        Value::Array(parts) => parts.iter().map(component_text).collect(),
        other => other.to_string(),
    }
}

impl CommandProcessor for ConsoleProcessor {
    fn perform_command(&mut self, command: &str) -> anyhow::Result<i32> {
        let command = command.trim().trim_start_matches('/');
        let (verb, rest) = command.split_once(' ').unwrap_or((command, ""));

        match verb {
            "say" => {
                self.broadcast(&format!("[Server] {}", rest));
                Ok(1)
            }
            "echo" => {
                self.emit(rest)?;
                Ok(1)
            }
            "tellraw" => {
                let (target, json) = rest
                    .split_once(' ')
                    .context("Usage: tellraw <target> <json>")?;
                let component: Value =
                    serde_json::from_str(json).context("Invalid text component")?;
                info!(recipient = target, "tellraw");
                self.broadcast(&component_text(&component));
                Ok(1)
            }
            "time" => {
                self.emit(&Utc::now().to_rfc3339())?;
                Ok(1)
            }
            "" => bail!("Empty command"),
            other => bail!("Unknown command: {}", other),
        }
    }

    fn broadcast(&mut self, message: &str) {
        info!("Broadcast: {}", message);
        if let Err(e) = self.emit(message) {
            warn!(error = %e, "Failed to write broadcast");
        }
    }
}
