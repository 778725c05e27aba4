use fleet_git::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review CLI is not authenticated (`{command}`): {detail}")]
    AuthenticationRequired { command: String, detail: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("review command failed (`{command}`), status={status:?}, stderr={stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("review command contract violation: {message}")]
    ContractViolation { message: String },
    #[error("failed to decode {context}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ReviewError {
    pub fn is_authentication_required(&self) -> bool {
        matches!(self, ReviewError::AuthenticationRequired { .. })
    }

    /// One-line text for a per-target result.
    pub fn detail(&self) -> String {
        match self {
            ReviewError::CommandFailed { stdout, stderr, .. } => {
                let text = if stderr.trim().is_empty() { stdout } else { stderr };
                text.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}

pub fn looks_like_auth_failure(stdout: &str, stderr: &str) -> bool {
    let combined = format!("{stdout}\n{stderr}").to_ascii_lowercase();
    let markers = [
        "gh auth login",
        "not logged in",
        "authentication required",
        "requires authentication",
        "bad credentials",
        "http 401",
    ];
    markers.iter().any(|marker| combined.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::{looks_like_auth_failure, ReviewError};

    #[test]
    fn detects_auth_failures() {
        assert!(looks_like_auth_failure(
            "",
            "To get started with GitHub CLI, please run:  gh auth login"
        ));
        assert!(looks_like_auth_failure("", "HTTP 401: Bad credentials"));
        assert!(!looks_like_auth_failure("", "GraphQL: Could not resolve to a PullRequest"));
    }

    #[test]
    fn detail_prefers_stderr() {
        let err = ReviewError::CommandFailed {
            command: "gh pr close 1".to_string(),
            status: Some(1),
            stdout: "out".to_string(),
            stderr: "  already closed\n".to_string(),
        };
        assert_eq!(err.detail(), "already closed");
        assert!(!err.is_authentication_required());
    }
}
