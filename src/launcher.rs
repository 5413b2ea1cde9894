//! JSON-lines launcher feeding the loopback collaborators.
//!
//! One command per line:
//!
//! ```text
//! {"event":"start","payload":{"__K_ALLOWED_BG__":"ALLOWED_BG"}}
//! {"condition":"memory/sysman/low_memory","int":2}
//! {"condition":"db/menu_widget/language","text":"en_US.UTF-8"}
//! {"freeze":"thawed"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::thread;

use serde::Deserialize;
use tracing::{debug, info, warn};

use svcagent_core::{
    Bundle, FreezeNotice, FreezeState, LaunchEvent, LaunchEventKind, LoopbackConditionSource,
    LoopbackFreezeChannel, LoopbackLaunchTransport, NotificationValue,
};

/// One parsed launcher command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum LauncherCommand {
    Launch {
        event: LaunchEventKind,
        #[serde(default)]
        payload: Bundle,
    },
    Condition {
        condition: String,
        #[serde(default)]
        int: Option<i32>,
        #[serde(default)]
        text: Option<String>,
    },
    Freeze {
        freeze: FreezeState,
        #[serde(default)]
        pid: Option<u32>,
    },
}

/// Parse one input line. `Ok(None)` for blank lines and comments.
pub(crate) fn parse_line(line: &str) -> Result<Option<LauncherCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Drives the loopback collaborators from parsed commands.
#[derive(Clone)]
pub(crate) struct Launcher {
    pub transport: LoopbackLaunchTransport,
    pub source: LoopbackConditionSource,
    pub freeze: LoopbackFreezeChannel,
    pub pid: u32,
}

impl Launcher {
    /// Apply one command. Returns whether it reached the agent.
    pub fn apply(&self, command: LauncherCommand) -> bool {
        match command {
            LauncherCommand::Launch { event, payload } => self
                .transport
                .send(LaunchEvent::with_bundle(event, payload)),
            LauncherCommand::Condition {
                condition,
                int,
                text,
            } => {
                let value = match (int, text) {
                    (Some(v), None) => NotificationValue::Int(v),
                    (None, Some(v)) => NotificationValue::Text(v),
                    _ => {
                        warn!("Launcher: condition '{}' needs exactly one of int/text", condition);
                        return false;
                    }
                };
                self.source.publish(&condition, value)
            }
            LauncherCommand::Freeze { freeze, pid } => self.freeze.broadcast(FreezeNotice {
                pid: pid.unwrap_or(self.pid),
                state: freeze,
            }),
        }
    }

    /// Read commands from `input` until EOF, then ask the agent to terminate.
    pub fn run<R: BufRead>(&self, input: R) {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Launcher: read failed: {}", e);
                    break;
                }
            };
            match parse_line(&line) {
                Ok(Some(command)) => {
                    debug!("Launcher: {:?}", command);
                    if !self.apply(command) {
                        debug!("Launcher: command not delivered");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Launcher: ignoring '{}': {}", line, e),
            }
        }
        info!("Launcher: input closed, terminating");
        self.transport
            .send(LaunchEvent::new(LaunchEventKind::Terminate));
    }

    /// Read stdin on a background thread.
    pub fn spawn_stdin(self) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let stdin = std::io::stdin();
            self.run(stdin.lock());
        })
    }
}
