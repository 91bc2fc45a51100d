//! Engine error types.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while talking to the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The named service or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine command failed.
    #[error("engine {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Failed to parse engine output.
    #[error("failed to parse engine output: {0}")]
    Parse(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The call worker has shut down.
    #[error("engine call worker is no longer running")]
    WorkerUnavailable,

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error means the requested object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    /// Classify a failed CLI invocation from its stderr.
    ///
    /// Only the engine's own "object is missing" messages count as `NotFound`;
    /// every other failure, including daemon or proxy errors that happen to
    /// say "not found", is a `CommandFailed`.
    pub(crate) fn from_stderr(command: &str, stderr: &str) -> Self {
        let mut lines = stderr.lines().filter(|l| !l.trim().is_empty()).peekable();
        if lines.peek().is_some() && lines.all(is_missing_object) {
            return EngineError::NotFound(stderr.trim().to_string());
        }
        EngineError::CommandFailed {
            command: command.to_string(),
            message: stderr.trim().to_string(),
        }
    }
}

/// Whether one stderr line reports a missing service or task.
///
/// Recognises `No such service: x`, `No such task: x` and `service x not found`,
/// with or without the CLI's `Error:` / daemon response prefix.
pub(crate) fn is_missing_object(line: &str) -> bool {
    let mut msg = line.trim().to_ascii_lowercase();
    for prefix in ["error response from daemon:", "error:"] {
        if let Some(rest) = msg.strip_prefix(prefix) {
            msg = rest.trim_start().to_string();
        }
    }

    if msg.starts_with("no such service") || msg.starts_with("no such task") {
        return true;
    }

    ["service ", "task "].iter().any(|kind| {
        msg.strip_prefix(kind)
            .and_then(|rest| rest.strip_suffix(" not found"))
            .is_some_and(|name| !name.is_empty() && !name.contains(' '))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_with_missing_service_is_not_found() {
        let err = EngineError::from_stderr("service rm", "Error: No such service: notebook-alice\n");
        assert!(err.is_not_found());
    }

    #[test]
    fn daemon_not_found_forms_are_not_found() {
        assert!(EngineError::from_stderr("service rm", "service notebook-alice not found").is_not_found());
        assert!(
            EngineError::from_stderr(
                "service ps",
                "Error response from daemon: service notebook-alice not found\n",
            )
            .is_not_found()
        );
        assert!(EngineError::from_stderr("inspect", "Error: No such task: t_old\n").is_not_found());
    }

    #[test]
    fn unrelated_not_found_text_is_command_failure() {
        for stderr in [
            "Error response from daemon: page not found",
            "error during connect: Get \"http://proxy/v1.44/services\": 404 not found",
            "docker: command not found",
            "",
        ] {
            let err = EngineError::from_stderr("service ls", stderr);
            assert!(!err.is_not_found(), "{stderr:?} classified as not found");
            assert!(matches!(err, EngineError::CommandFailed { .. }));
        }
    }

    #[test]
    fn mixed_stderr_is_command_failure() {
        let stderr = "Error: No such task: t_old\nError response from daemon: connection reset";
        assert!(!EngineError::from_stderr("inspect", stderr).is_not_found());
    }

    #[test]
    fn other_stderr_is_command_failure() {
        let err = EngineError::from_stderr(
            "service ls",
            "Error response from daemon: This node is not a swarm manager.",
        );
        assert!(!err.is_not_found());
        assert!(matches!(err, EngineError::CommandFailed { ref command, .. } if command == "service ls"));
    }
}
