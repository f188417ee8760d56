//! Node reboot

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::manager::RelayManager;

/// Reboots the node
#[async_trait]
pub trait RebootHandler: Send + Sync + 'static {
    /// Whether nothing critical is in progress
    async fn is_safe(&self) -> bool;

    /// Start the reboot; returns once it has been initiated
    async fn reboot(&self) -> Result<()>;
}

/// Runs a reboot command (default `sudo reboot`)
pub struct SystemReboot {
    command: Vec<String>,
    manager: Arc<RelayManager>,
}

impl SystemReboot {
    pub fn new(command: Vec<String>, manager: Arc<RelayManager>) -> Self {
        Self { command, manager }
    }
}

#[async_trait]
impl RebootHandler for SystemReboot {
    /// Unsafe while a relay operation (such as a pulse) is in flight
    async fn is_safe(&self) -> bool {
        self.manager.is_idle()
    }

    async fn reboot(&self) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("No reboot command configured");
        };

        info!("Initiating system reboot: {}", self.command.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", program))?;

        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => {},
                Ok(output) => error!(
                    "Reboot command failed ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!("Reboot command did not complete: {}", e),
            }
        });
        Ok(())
    }
}
