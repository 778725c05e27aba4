//! Sanity checks for loaded configuration.

use serde::{Deserialize, Serialize};

use crate::config::FleetConfig;

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

impl Validate for FleetConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (code, value) in [
            ("concurrency.classify.zero", self.concurrency.classify),
            ("concurrency.bulk.zero", self.concurrency.bulk),
            ("concurrency.remote_lookups.zero", self.concurrency.remote_lookups),
        ] {
            if value == 0 {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code,
                    message: format!("{} must be greater than zero", code.trim_end_matches(".zero")),
                });
            }
        }

        if self.git.timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "git.timeout.zero",
                message: "git timeout of 0s would kill every command immediately".to_string(),
            });
        }

        if self.review.timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "review.timeout.zero",
                message: "review CLI timeout of 0s would kill every command immediately"
                    .to_string(),
            });
        }

        if self.git.binary.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "git.binary.empty",
                message: "git binary path is empty".to_string(),
            });
        }

        if self.review.binary.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "review.binary.empty",
                message: "review CLI binary path is empty".to_string(),
            });
        }

        if self.git.default_remote.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "git.default_remote.empty",
                message: "default remote name is empty".to_string(),
            });
        }

        if !(3..=6).contains(&self.feature.number_width) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "feature.number_width.range",
                message: format!(
                    "feature number width {} is outside the supported range 3..=6",
                    self.feature.number_width
                ),
            });
        }

        if self.scan.max_depth == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "scan.max_depth.zero",
                message: "scan depth 0 only inspects the scan root itself".to_string(),
            });
        }

        if self.review.search_limit == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "review.search_limit.zero",
                message: "search limit 0 means no pull requests are ever listed".to_string(),
            });
        }

        if self.concurrency.bulk > 64 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "concurrency.bulk.high",
                message: format!(
                    "bulk concurrency {} may exhaust process slots or hit remote rate limits",
                    self.concurrency.bulk
                ),
            });
        }

        issues
    }
}
