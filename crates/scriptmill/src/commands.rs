//! `script` Command Surface
//!
//! Text commands for operators:
//!
//! ```text
//! script list
//! script exec <name>
//! script stop <name>
//! script reload <name>
//! ```

use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::CommandError;
use crate::manager::ScriptManager;

/// Root command word
pub const COMMAND_ROOT: &str = "script";

/// A parsed `script` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    List,
    Exec(String),
    Stop(String),
    Reload(String),
}

impl ScriptCommand {
    /// Parse a command line. The leading `script` word is optional.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace().peekable();
        if words.peek() == Some(&COMMAND_ROOT) {
            words.next();
        }

        let sub = words.next().ok_or(CommandError::Empty)?;
        let mut name = |usage: &'static str| {
            words
                .next()
                .map(str::to_string)
                .ok_or(CommandError::MissingName(usage))
        };

        match sub {
            "list" => Ok(Self::List),
            "exec" => Ok(Self::Exec(name("exec")?)),
            "stop" => Ok(Self::Stop(name("stop")?)),
            "reload" => Ok(Self::Reload(name("reload")?)),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl FromStr for ScriptCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Result of running a command: feedback lines plus the numeric result
/// (script count for `list`, 1/0 otherwise).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub lines: Vec<String>,
    pub count: i32,
}

impl CommandOutcome {
    fn ok(line: String) -> Self {
        Self {
            success: true,
            lines: vec![line],
            count: 1,
        }
    }

    fn failed(line: String) -> Self {
        Self {
            success: false,
            lines: vec![line],
            count: 0,
        }
    }
}

/// Parse and run a command line
pub fn execute_line(manager: &ScriptManager, line: &str) -> CommandOutcome {
    match ScriptCommand::parse(line) {
        Ok(command) => dispatch(manager, command),
        Err(e) => CommandOutcome::failed(e.to_string()),
    }
}

/// Run a parsed command against `manager`
pub fn dispatch(manager: &ScriptManager, command: ScriptCommand) -> CommandOutcome {
    debug!(?command, "Dispatching script command");
    match command {
        ScriptCommand::List => list(manager),
        ScriptCommand::Exec(name) => exec(manager, &name),
        ScriptCommand::Stop(name) => stop(manager, &name),
        ScriptCommand::Reload(name) => reload(manager, &name),
    }
}

fn list(manager: &ScriptManager) -> CommandOutcome {
    let scripts = match manager.list() {
        Ok(scripts) => scripts,
        Err(e) => {
            warn!(error = %e, "Failed to list scripts");
            return CommandOutcome::failed(format!("Failed to list scripts: {e}"));
        }
    };

    if scripts.is_empty() {
        return CommandOutcome {
            success: true,
            lines: vec!["No scripts found".to_string()],
            count: 0,
        };
    }

    let mut lines = Vec::with_capacity(scripts.len() + 1);
    lines.push("Scripts:".to_string());
    for script in scripts.values() {
        let status = if script.running { "running" } else { "stopped" };
        lines.push(format!("- {} {}", script.name, status));
    }

    CommandOutcome {
        success: true,
        lines,
        count: scripts.len() as i32,
    }
}

fn exec(manager: &ScriptManager, name: &str) -> CommandOutcome {
    if !manager.script_exists(name) {
        return CommandOutcome::failed(format!("Script not found: {name}"));
    }
    if manager.is_script_running(name) {
        return CommandOutcome::failed(format!("Script already running: {name}"));
    }

    if manager.execute_script(name) {
        CommandOutcome::ok(format!("Script started: {name}"))
    } else {
        CommandOutcome::failed(format!("Failed to start script: {name}"))
    }
}

fn stop(manager: &ScriptManager, name: &str) -> CommandOutcome {
    if manager.stop_script(name) {
        CommandOutcome::ok(format!("Script stopped: {name}"))
    } else {
        CommandOutcome::failed(format!("Script not running: {name}"))
    }
}

/// Stop then start. On failure the error is reported once; if the script had
/// been running, one more start is attempted without further reporting.
fn reload(manager: &ScriptManager, name: &str) -> CommandOutcome {
    if !manager.script_exists(name) {
        return CommandOutcome::failed(format!("Script not found: {name}"));
    }

    let was_running = manager.is_script_running(name);
    manager.stop_script(name);

    if manager.execute_script(name) {
        return CommandOutcome::ok(format!("Script reloaded: {name}"));
    }

    if was_running {
        let restarted = manager.execute_script(name);
        debug!(script = %name, restarted, "Retried start after failed reload");
    }
    CommandOutcome::failed(format!("Failed to reload script: {name}"))
}
