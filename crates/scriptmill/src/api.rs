//! Script Binding Objects
//!
//! Host objects installed into every script's global scope:
//!
//! - `server`: the host runtime (`getName`, `isAvailable`)
//! - `console`: leveled logging
//! - `global`: `print` and a cancellable `sleep`
//! - `c` / `context`: commands, messages and `tellraw` helpers

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use scriptmill_engine::{CancelToken, HostObject};

use crate::host::HostBridge;

/// Log target for script-originated output
pub const SCRIPT_LOG_TARGET: &str = "scriptmill.script";

/// Render arguments the way `console.log` would: strings verbatim, other
/// values as JSON, separated by spaces.
fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn string_arg(method: &str, args: &[Value], index: usize) -> Result<String, String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(format!("{method}: missing argument {}", index + 1)),
        Some(other) => Ok(other.to_string()),
    }
}

fn unknown(method: &str) -> Result<Value, String> {
    Err(format!("Unknown method: {method}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// server
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only view of the host runtime.
pub struct ServerApi {
    bridge: HostBridge,
}

impl ServerApi {
    pub fn new(bridge: HostBridge) -> Self {
        Self { bridge }
    }
}

impl HostObject for ServerApi {
    fn methods(&self) -> &[&'static str] {
        &["getName", "isAvailable"]
    }

    fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, String> {
        let runtime = self.bridge.current_runtime();
        match method {
            "getName" => Ok(runtime.map_or(Value::Null, |r| Value::String(r.name().to_string()))),
            "isAvailable" => Ok(Value::Bool(runtime.is_some())),
            _ => unknown(method),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// console
// ─────────────────────────────────────────────────────────────────────────────

pub struct ScriptConsole {
    script: String,
}

impl ScriptConsole {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl HostObject for ScriptConsole {
    fn methods(&self) -> &[&'static str] {
        &["log", "info", "warn", "error", "debug"]
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, String> {
        let msg = join_args(args);
        let script = self.script.as_str();
        match method {
            "log" | "info" => info!(target: SCRIPT_LOG_TARGET, script, "{}", msg),
            "warn" => warn!(target: SCRIPT_LOG_TARGET, script, "{}", msg),
            "error" => error!(target: SCRIPT_LOG_TARGET, script, "{}", msg),
            "debug" => debug!(target: SCRIPT_LOG_TARGET, script, "{}", msg),
            _ => return unknown(method),
        }
        Ok(Value::Null)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// global
// ─────────────────────────────────────────────────────────────────────────────

/// `print` and `sleep`. Sleeping is cut short when the script is stopped.
pub struct GlobalApi {
    script: String,
    cancel: CancelToken,
}

impl GlobalApi {
    pub fn new(script: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            script: script.into(),
            cancel,
        }
    }
}

impl HostObject for GlobalApi {
    fn methods(&self) -> &[&'static str] {
        &["print", "sleep"]
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, String> {
        match method {
            "print" => {
                info!(target: SCRIPT_LOG_TARGET, script = %self.script, "{}", join_args(args));
                Ok(Value::Null)
            }
            "sleep" => {
                let millis = match args.first() {
                    None | Some(Value::Null) => 0.0,
                    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0).max(0.0),
                    Some(other) => {
                        return Err(format!("sleep: expected milliseconds, got {other}"));
                    }
                };
                if self.cancel.wait_timeout(Duration::from_millis(millis as u64)) {
                    return Err("Script execution was interrupted".to_string());
                }
                Ok(Value::Null)
            }
            _ => unknown(method),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// c / context
// ─────────────────────────────────────────────────────────────────────────────

/// Per-script context handed to the entry point.
pub struct ScriptContextApi {
    script: String,
    bridge: HostBridge,
}

impl ScriptContextApi {
    pub fn new(script: impl Into<String>, bridge: HostBridge) -> Self {
        Self {
            script: script.into(),
            bridge,
        }
    }

    pub fn execute_command(&self, command: &str) -> bool {
        debug!(script = %self.script, command, "Executing command");
        let success = self.bridge.execute_command(command);
        debug!(script = %self.script, command, success, "Command finished");
        success
    }

    /// Send a raw JSON text component to all players
    pub fn tellraw(&self, component: &str) -> bool {
        self.execute_command(&format!("tellraw @a {component}"))
    }

    fn tellraw_colored(&self, text: &str, color: Option<&str>) -> bool {
        let component = match color {
            Some(color) => json!({ "text": text, "color": color }),
            None => json!({ "text": text }),
        };
        self.tellraw(&component.to_string())
    }
}

impl HostObject for ScriptContextApi {
    fn methods(&self) -> &[&'static str] {
        &[
            "executeCommand",
            "exec",
            "command",
            "sendMessage",
            "tellraw",
            "tellrawText",
            "tellrawGold",
            "tellrawRed",
            "tellrawGreen",
            "log",
            "error",
            "getScriptName",
        ]
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, String> {
        let result = match method {
            "executeCommand" | "exec" | "command" => {
                Value::Bool(self.execute_command(&string_arg(method, args, 0)?))
            }
            "sendMessage" => {
                self.bridge.broadcast(&join_args(args));
                Value::Null
            }
            "tellraw" => {
                // Accept both a JSON string and a component object
                let component = match args.first() {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) if !other.is_null() => other.to_string(),
                    _ => return Err("tellraw: missing argument 1".to_string()),
                };
                Value::Bool(self.tellraw(&component))
            }
            "tellrawText" => Value::Bool(self.tellraw_colored(&string_arg(method, args, 0)?, None)),
            "tellrawGold" => {
                Value::Bool(self.tellraw_colored(&string_arg(method, args, 0)?, Some("gold")))
            }
            "tellrawRed" => {
                Value::Bool(self.tellraw_colored(&string_arg(method, args, 0)?, Some("red")))
            }
            "tellrawGreen" => {
                Value::Bool(self.tellraw_colored(&string_arg(method, args, 0)?, Some("green")))
            }
            "log" => {
                info!(target: SCRIPT_LOG_TARGET, script = %self.script, "{}", join_args(args));
                Value::Null
            }
            "error" => {
                error!(target: SCRIPT_LOG_TARGET, script = %self.script, "{}", join_args(args));
                Value::Null
            }
            "getScriptName" => Value::String(self.script.clone()),
            _ => return unknown(method),
        };
        Ok(result)
    }
}
