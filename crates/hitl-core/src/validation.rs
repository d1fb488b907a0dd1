//! Validation for status coordinator configuration.

use serde::{Deserialize, Serialize};

use crate::config::StatusConfig;

const SHORT_INTERVAL_MS: u64 = 500;
const SHORT_REQUEST_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for StatusConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let polling = &self.polling;

        if polling.interval_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "polling.interval.zero",
                message: "poll interval cannot be 0".to_string(),
            });
        } else if polling.interval_ms < SHORT_INTERVAL_MS {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "polling.interval.low",
                message: format!(
                    "poll interval {}ms is very low and will hammer the human input service",
                    polling.interval_ms
                ),
            });
        }

        if polling.max_iterations == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "polling.max_iterations.zero",
                message: "max_iterations must be greater than zero".to_string(),
            });
        }

        if !polling.idle_stop_enabled() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "polling.idle_stop.disabled",
                message: "idle auto-stop is disabled; polling only ends on max_iterations"
                    .to_string(),
            });
        } else if polling.idle_stop_threshold > polling.max_iterations {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "polling.idle_stop.unreachable",
                message: format!(
                    "idle_stop_threshold {} exceeds max_iterations {}; auto-stop can never trigger",
                    polling.idle_stop_threshold, polling.max_iterations
                ),
            });
        }

        let timeout_ms = self.service.request_timeout_ms;
        if timeout_ms > 0 && timeout_ms < SHORT_REQUEST_TIMEOUT_MS {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "service.request_timeout.low",
                message: format!(
                    "request timeout {timeout_ms}ms is very low; slow responses will be reported as failures"
                ),
            });
        }

        issues
    }
}
