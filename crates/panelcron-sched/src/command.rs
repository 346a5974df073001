//! Command allow-list validation.
//!
//! User-authored cron commands are checked against a fixed list of base
//! commands before anything is spawned. Only the first whitespace token is
//! inspected; pipes, redirections, and other shell syntax are not parsed.
//! That coarseness is acceptable because the executor spawns the tokenized
//! argv directly without a shell, so metacharacters are never interpreted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("empty command line")]
    EmptyCommand,
    #[error("command '{0}' is not allowed")]
    DisallowedCommand(String),
}

/// Base commands permitted by default for panel cron jobs.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "php", "curl", "wget", "mysql", "mysqldump", "rsync", "tar", "gzip", "find", "ls", "cat",
    "grep", "awk", "sed", "sort", "uniq",
];

/// Allow-list policy for job command lines.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Check that the base command (first whitespace token) is allowed.
    pub fn validate(&self, command: &str) -> Result<(), ValidateError> {
        let base = command
            .split_whitespace()
            .next()
            .ok_or(ValidateError::EmptyCommand)?;
        if self.allowed.iter().any(|a| a == base) {
            Ok(())
        } else {
            Err(ValidateError::DisallowedCommand(base.to_string()))
        }
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect())
    }
}

/// Tokenize a command line into argv on whitespace. The executor invokes
/// the result directly, with no shell interpreter in between.
pub fn split_argv(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}
