//! Command execution and status reporting

use std::sync::Arc;
use std::time::Duration;

use fleet_model::{Clock, CloudGateway, CommandStatus, CommandStatusReport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::reboot::RebootHandler;
use super::RelayCommand;
use crate::manager::RelayManager;

const STATUS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Executes commands against the relay manager and reboot handler
pub struct CommandExecutor {
    manager: Arc<RelayManager>,
    reboot: Arc<dyn RebootHandler>,
    gateway: Arc<dyn CloudGateway>,
    clock: Arc<dyn Clock>,
}

impl CommandExecutor {
    pub fn new(
        manager: Arc<RelayManager>,
        reboot: Arc<dyn RebootHandler>,
        gateway: Arc<dyn CloudGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            reboot,
            gateway,
            clock,
        }
    }

    /// Run `command` and report the outcome for `job_id`
    ///
    /// A relay already in the requested state is a success. Cancelling
    /// `token` aborts a pending reboot delay.
    pub async fn execute(
        &self,
        job_id: &str,
        command: RelayCommand,
        token: &CancellationToken,
    ) -> CommandStatusReport {
        info!("Executing job {} ({})", job_id, command.operation());
        let result = match command {
            RelayCommand::RelayOn { relay_id } => self.switch(&relay_id, true).await,
            RelayCommand::RelayOff { relay_id } => self.switch(&relay_id, false).await,
            RelayCommand::Reboot { delay_secs, force } => {
                self.reboot(delay_secs, force, token).await
            },
        };

        match result {
            Ok(()) => self.succeed(job_id).await,
            Err(reason) => self.fail(job_id, &reason).await,
        }
    }

    /// Report a job that could not be executed
    pub async fn reject(&self, job_id: &str, reason: &str) -> CommandStatusReport {
        self.fail(job_id, reason).await
    }

    async fn switch(&self, relay_id: &str, on: bool) -> Result<(), String> {
        if !self.manager.contains(relay_id) {
            return Err(format!("Relay {} not found", relay_id));
        }
        if on {
            self.manager.set_on(relay_id).await;
        } else {
            self.manager.set_off(relay_id).await;
        }
        if self.manager.read_state(relay_id).await == on {
            Ok(())
        } else {
            Err(format!(
                "Relay {} could not be turned {}",
                relay_id,
                if on { "ON" } else { "OFF" }
            ))
        }
    }

    async fn reboot(
        &self,
        delay_secs: u64,
        force: bool,
        token: &CancellationToken,
    ) -> Result<(), String> {
        if delay_secs > 0 {
            info!("Waiting {} seconds before reboot", delay_secs);
            tokio::select! {
                _ = token.cancelled() => return Err("Reboot cancelled by shutdown".into()),
                _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {},
            }
        }
        if !force && !self.reboot.is_safe().await {
            return Err("Unsafe to reboot - relay operations in progress".into());
        }
        self.reboot
            .reboot()
            .await
            .map_err(|e| format!("Reboot operation failed: {:#}", e))
    }

    async fn succeed(&self, job_id: &str) -> CommandStatusReport {
        let report =
            CommandStatusReport::new(job_id, CommandStatus::Succeeded, self.clock.now_utc())
                .with_detail("completion_time", self.local_time());
        info!("Job {} succeeded", job_id);
        self.report(report).await
    }

    async fn fail(&self, job_id: &str, reason: &str) -> CommandStatusReport {
        let report = CommandStatusReport::new(job_id, CommandStatus::Failed, self.clock.now_utc())
            .with_detail("error", reason)
            .with_detail("failure_time", self.local_time());
        error!("Job {} failed: {}", job_id, reason);
        self.report(report).await
    }

    async fn report(&self, report: CommandStatusReport) -> CommandStatusReport {
        if let Err(e) = self.gateway.report_status(report.clone()).await {
            warn!("Failed to update status of job {}: {}", report.job_id, e);
        }
        report
    }

    fn local_time(&self) -> String {
        self.clock.now_local().format(STATUS_TIME_FORMAT).to_string()
    }
}
