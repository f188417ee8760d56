//! Inbound commands
//!
//! Remote jobs arrive as JSON documents:
//!
//! ```json
//! {"job_id": "j-42", "operation": "relay_on", "relay_id": "router"}
//! {"job_id": "j-43", "operation": "reboot", "delay": 30, "force": false}
//! ```
//!
//! Every job with a readable `job_id` gets exactly one status report.

pub mod executor;
pub mod listener;
pub mod reboot;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use executor::CommandExecutor;
pub use listener::{CommandListener, JobQueue, MemoryJobQueue, RedisJobQueue, COMMAND_QUEUE};
pub use reboot::{RebootHandler, SystemReboot};

/// Operations this node executes
pub const SUPPORTED_OPERATIONS: [&str; 3] = ["relay_on", "relay_off", "reboot"];

/// A command resolved from a job document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum RelayCommand {
    RelayOn {
        relay_id: String,
    },
    RelayOff {
        relay_id: String,
    },
    Reboot {
        /// Wait before rebooting, in seconds
        #[serde(default, alias = "delay")]
        delay_secs: u64,
        /// Skip the safety check
        #[serde(default)]
        force: bool,
    },
}

impl RelayCommand {
    pub fn operation(&self) -> &'static str {
        match self {
            RelayCommand::RelayOn { .. } => "relay_on",
            RelayCommand::RelayOff { .. } => "relay_off",
            RelayCommand::Reboot { .. } => "reboot",
        }
    }
}

/// Documents that cannot be reported on
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Malformed job document: {0}")]
    Malformed(String),

    #[error("Job document has no job_id")]
    MissingJobId,
}

/// A job document after parsing
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedJob {
    Valid {
        job_id: String,
        command: RelayCommand,
    },
    /// Identifiable but not executable; reported as failed
    Rejected {
        job_id: String,
        reason: String,
    },
}

/// Parse a raw job document
pub fn parse_job(raw: &str) -> Result<ParsedJob, CommandError> {
    let document: Value =
        serde_json::from_str(raw).map_err(|e| CommandError::Malformed(e.to_string()))?;
    let job_id = document
        .get("job_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(CommandError::MissingJobId)?
        .to_string();

    let Some(operation) = document.get("operation").and_then(Value::as_str) else {
        return Ok(ParsedJob::Rejected {
            job_id,
            reason: "Job document missing 'operation' field".into(),
        });
    };
    if !SUPPORTED_OPERATIONS.contains(&operation) {
        return Ok(ParsedJob::Rejected {
            job_id,
            reason: format!("Unsupported operation: {}", operation),
        });
    }

    match serde_json::from_value::<RelayCommand>(document.clone()) {
        Ok(command) => Ok(ParsedJob::Valid { job_id, command }),
        Err(e) => Ok(ParsedJob::Rejected {
            reason: format!("Invalid {} job: {}", operation, e),
            job_id,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_relay_commands() {
        let job = parse_job(r#"{"job_id":"j-1","operation":"relay_on","relay_id":"router"}"#).unwrap();
        assert_eq!(
            job,
            ParsedJob::Valid {
                job_id: "j-1".into(),
                command: RelayCommand::RelayOn {
                    relay_id: "router".into()
                },
            }
        );

        let job = parse_job(r#"{"job_id":"j-2","operation":"relay_off","relay_id":"camera"}"#).unwrap();
        assert!(matches!(
            job,
            ParsedJob::Valid {
                command: RelayCommand::RelayOff { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_parse_reboot_defaults_and_alias() {
        let job = parse_job(r#"{"job_id":"j-3","operation":"reboot"}"#).unwrap();
        assert_eq!(
            job,
            ParsedJob::Valid {
                job_id: "j-3".into(),
                command: RelayCommand::Reboot {
                    delay_secs: 0,
                    force: false
                },
            }
        );

        let job = parse_job(r#"{"job_id":"j-4","operation":"reboot","delay":30,"force":true}"#).unwrap();
        assert_eq!(
            job,
            ParsedJob::Valid {
                job_id: "j-4".into(),
                command: RelayCommand::Reboot {
                    delay_secs: 30,
                    force: true
                },
            }
        );
    }

    #[test]
    fn test_rejected_jobs() {
        let job = parse_job(r#"{"job_id":"j-5","operation":"file_download"}"#).unwrap();
        assert_eq!(
            job,
            ParsedJob::Rejected {
                job_id: "j-5".into(),
                reason: "Unsupported operation: file_download".into(),
            }
        );

        let job = parse_job(r#"{"job_id":"j-6"}"#).unwrap();
        assert!(matches!(job, ParsedJob::Rejected { .. }));

        let job = parse_job(r#"{"job_id":"j-7","operation":"relay_on"}"#).unwrap();
        match job {
            ParsedJob::Rejected { reason, .. } => assert!(reason.starts_with("Invalid relay_on job")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_unreportable_documents() {
        assert!(matches!(
            parse_job("not json"),
            Err(CommandError::Malformed(_))
        ));
        assert_eq!(
            parse_job(r#"{"operation":"reboot"}"#),
            Err(CommandError::MissingJobId)
        );
    }

    #[test]
    fn test_operation_names() {
        for op in SUPPORTED_OPERATIONS {
            let raw = format!(r#"{{"job_id":"x","operation":"{}","relay_id":"r"}}"#, op);
            match parse_job(&raw).unwrap() {
                ParsedJob::Valid { command, .. } => assert_eq!(command.operation(), op),
                other => panic!("expected valid job, got {:?}", other),
            }
        }
    }
}
