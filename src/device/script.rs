//! targetcli script construction and execution
//!
//! Every operation against the kernel target is expressed as a batch of
//! interactive targetcli commands fed through stdin, ending in `exit`. The
//! runner is a trait so the command layer can be exercised against a
//! recorded-output fake.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

// =============================================================================
// Script
// =============================================================================

/// An ordered batch of targetcli commands
#[derive(Debug, Clone, Default)]
pub struct TargetCliScript {
    lines: Vec<String>,
}

impl TargetCliScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    pub fn cd(&mut self, path: &str) -> &mut Self {
        self.push(format!("cd {path}"))
    }

    pub fn create(&mut self, name: &str) -> &mut Self {
        self.push(format!("create {name}"))
    }

    pub fn create_with(&mut self, args: &str) -> &mut Self {
        self.push(format!("create {args}"))
    }

    pub fn delete(&mut self, name: &str) -> &mut Self {
        self.push(format!("delete {name}"))
    }

    pub fn set_auth_userid(&mut self, userid: &str) -> &mut Self {
        self.push(format!("set auth userid={userid}"))
    }

    pub fn set_auth_password(&mut self, password: &str) -> &mut Self {
        self.push(format!("set auth password={password}"))
    }

    pub fn ls(&mut self) -> &mut Self {
        self.push("ls")
    }

    /// Render to the stdin payload, always terminated by `exit`
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("exit\n");
        out
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Executes a script and returns the combined textual output
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script: &TargetCliScript) -> Result<String>;
}

pub type ScriptRunnerRef = Arc<dyn ScriptRunner>;

/// Runs scripts against the real targetcli binary
pub struct TargetCliRunner {
    program: String,
}

impl TargetCliRunner {
    pub fn new() -> Self {
        Self {
            program: "targetcli".to_string(),
        }
    }
}

impl Default for TargetCliRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRunner for TargetCliRunner {
    async fn run(&self, script: &TargetCliScript) -> Result<String> {
        let payload = script.render();
        debug!(program = %self.program, %payload, "running target script");

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::DeviceCommand(text));
        }
        Ok(text)
    }
}
