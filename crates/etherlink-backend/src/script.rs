//! Host network configuration script invoked around the tun/tap interface lifetime.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    Up,
    Down,
}

impl ScriptAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptAction::Up => "up",
            ScriptAction::Down => "down",
        }
    }
}

impl fmt::Display for ScriptAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("cannot execute {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{} {interface} {action}` exited with {status}", .path.display())]
    Failed {
        path: PathBuf,
        interface: String,
        action: ScriptAction,
        status: ExitStatus,
    },
}

/// `<script> <ifname> up|down`.
#[derive(Debug, Clone)]
pub struct NetworkScript {
    path: PathBuf,
    interface: String,
}

impl NetworkScript {
    pub fn new(path: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn run(&self, action: ScriptAction) -> Result<(), ScriptError> {
        tracing::debug!(
            script = %self.path.display(),
            interface = %self.interface,
            %action,
            "running network configuration script"
        );
        let status = Command::new(&self.path)
            .arg(&self.interface)
            .arg(action.as_str())
            .status()
            .map_err(|source| ScriptError::Spawn {
                path: self.path.clone(),
                source,
            })?;
        if !status.success() {
            return Err(ScriptError::Failed {
                path: self.path.clone(),
                interface: self.interface.clone(),
                action,
                status,
            });
        }
        Ok(())
    }
}
