//! Backend collaborator interfaces
//!
//! The data-access layer produces [`Command`]s; a backend turns them into rows
//! or affected-row counts. Backends implement [`Connector`] and [`Connection`]
//! using RPITIT async methods, so no `async_trait` is required.
//!
//! Releasing a connection is dropping it. Each non-transactional operation
//! holds its connection only for the duration of one command.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::query::{is_identifier, Parameters};
use crate::row::Row;

/// Default per-operation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How the backend should interpret [`Command::text`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Free-text SQL with `@name` placeholders
    #[default]
    Text,
    /// Name of a stored procedure; parameters are passed by name
    StoredProcedure,
}

/// A statement ready for a backend round trip
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Statement text or procedure name
    pub text: String,
    /// Interpretation of `text`
    pub kind: CommandKind,
    /// Maximum time the round trip may take
    pub timeout: Duration,
    /// Values for the statement's placeholders or procedure arguments
    pub parameters: Parameters,
}

impl Command {
    /// A free-text command with no parameters
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            timeout: DEFAULT_TIMEOUT,
            parameters: Parameters::new(),
        }
    }

    /// A stored-procedure command
    ///
    /// The name may be schema-qualified (`billing.close_period`); every
    /// segment must be a plain identifier.
    pub fn procedure(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.split('.').any(|segment| !is_identifier(segment)) {
            return Err(Error::InvalidRequest(format!(
                "'{}' is not a valid procedure name",
                name
            )));
        }
        Ok(Self {
            text: name,
            kind: CommandKind::StoredProcedure,
            timeout: DEFAULT_TIMEOUT,
            parameters: Parameters::new(),
        })
    }

    /// Replace the parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An open connection owned by exactly one operation or transaction
pub trait Connection: Send {
    /// Run a command and return its rows
    fn fetch(&mut self, command: &Command) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Run a command and return the number of rows it affected
    fn execute(&mut self, command: &Command) -> impl Future<Output = Result<u64>> + Send;

    /// Begin a transaction on this connection
    fn begin(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Commit the open transaction
    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Roll back the open transaction
    fn rollback(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Source of connections
pub trait Connector: Send + Sync {
    /// Connection type produced by this connector
    type Connection: Connection;

    /// Acquire a connection
    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_defaults() {
        let command = Command::text("SELECT 1");
        assert_eq!(command.kind, CommandKind::Text);
        assert_eq!(command.timeout, DEFAULT_TIMEOUT);
        assert!(command.parameters.is_empty());
    }

    #[test]
    fn test_procedure_names() {
        let command = Command::procedure("billing.close_period").unwrap();
        assert_eq!(command.kind, CommandKind::StoredProcedure);
        assert!(Command::procedure("close_period; DROP TABLE x").is_err());
        assert!(Command::procedure("billing.").is_err());
        assert!(Command::procedure("").is_err());
    }
}
