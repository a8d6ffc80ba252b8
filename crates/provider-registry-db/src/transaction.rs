//! Nested transaction scopes
//!
//! The outermost scope is a real database transaction; every scope opened
//! inside it is a savepoint. Committing an inner scope releases its
//! savepoint, rolling it back returns to the savepoint without touching the
//! enclosing scope.

use std::fmt;

use crate::error::{DbError, DbResult};

/// Prefix of generated savepoint names
const SAVEPOINT_PREFIX: &str = "ingest_sp";

/// Statement a session must execute to open or close a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionCommand {
    Begin,
    Savepoint(String),
    ReleaseSavepoint(String),
    RollbackToSavepoint(String),
    Commit,
    Rollback,
}

impl TransactionCommand {
    /// SQL text for the command
    pub fn sql(&self) -> String {
        match self {
            Self::Begin => "BEGIN".to_string(),
            Self::Savepoint(name) => format!("SAVEPOINT {}", name),
            Self::ReleaseSavepoint(name) => format!("RELEASE SAVEPOINT {}", name),
            Self::RollbackToSavepoint(name) => format!("ROLLBACK TO SAVEPOINT {}", name),
            Self::Commit => "COMMIT".to_string(),
            Self::Rollback => "ROLLBACK".to_string(),
        }
    }

    /// Whether the command ends the outermost transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Commit | Self::Rollback)
    }
}

impl fmt::Display for TransactionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// Depth bookkeeping for nested scopes
#[derive(Debug, Clone, Default)]
pub struct TransactionStack {
    depth: usize,
}

impl TransactionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open scopes
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether a database transaction is open
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Open a scope
    pub fn begin(&mut self) -> TransactionCommand {
        self.depth += 1;
        if self.depth == 1 {
            TransactionCommand::Begin
        } else {
            TransactionCommand::Savepoint(savepoint_name(self.depth))
        }
    }

    /// Close the innermost scope, keeping its writes
    pub fn commit(&mut self) -> DbResult<TransactionCommand> {
        let command = match self.depth {
            0 => {
                return Err(DbError::Transaction(
                    "commit without an open transaction".to_string(),
                ))
            }
            1 => TransactionCommand::Commit,
            depth => TransactionCommand::ReleaseSavepoint(savepoint_name(depth)),
        };
        self.depth -= 1;
        Ok(command)
    }

    /// Close the innermost scope, discarding its writes
    pub fn rollback(&mut self) -> DbResult<TransactionCommand> {
        let command = match self.depth {
            0 => {
                return Err(DbError::Transaction(
                    "rollback without an open transaction".to_string(),
                ))
            }
            1 => TransactionCommand::Rollback,
            depth => TransactionCommand::RollbackToSavepoint(savepoint_name(depth)),
        };
        self.depth -= 1;
        Ok(command)
    }

    /// Forget every open scope, used when the connection is abandoned
    pub fn reset(&mut self) {
        self.depth = 0;
    }
}

fn savepoint_name(depth: usize) -> String {
    format!("{}_{}", SAVEPOINT_PREFIX, depth)
}
