//! Error types for flowsync operations.

use std::io;
use thiserror::Error;

/// Result type alias for flowsync operations.
pub type Result<T> = std::result::Result<T, FlowsyncError>;

/// Errors that can occur while compiling rules or programming flows.
#[derive(Debug, Error)]
pub enum FlowsyncError {
    /// Malformed security-rule text.
    #[error("Invalid security rule '{rule}': {message}")]
    RuleParse {
        /// The offending rule text.
        rule: String,
        /// What was wrong with it.
        message: String,
    },

    /// Failed to spawn a shell command.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Guest description or host configuration could not be read or parsed.
    #[error("Configuration error for {subject}: {message}")]
    Config {
        /// The file or entity that failed.
        subject: String,
        /// Error message.
        message: String,
    },

    /// Host-local or guest flow preparation failed for a bridge.
    #[error("Flow preparation failed for bridge '{bridge}': {message}")]
    FlowPrep {
        /// The bridge whose flows could not be prepared.
        bridge: String,
        /// Error message.
        message: String,
    },

    /// The filesystem watch mechanism failed; unrecoverable for the driver.
    #[error("Filesystem watch failed: {0}")]
    WatchFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FlowsyncError {
    /// Creates a rule parse error.
    pub fn rule_parse(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleParse {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Creates a flow preparation error.
    pub fn flow_prep(bridge: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FlowPrep {
            bridge: bridge.into(),
            message: message.into(),
        }
    }

    /// Returns true if the driver must escalate this error to the
    /// composition root instead of skipping and retrying next pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowsyncError::WatchFailed(_))
    }
}
