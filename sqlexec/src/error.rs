//! Engine-wide error type and result alias.
//!
//! Every layer of the engine returns [`Error`]; the frontends map it onto the
//! MySQL error surface via [`Error::code`] and [`Error::sqlstate`]. Errors are
//! `Clone` and serializable so they can cross session and protocol boundaries
//! without loss.

use serde_derive::{Deserialize, Serialize};

/// A result type returning the crate-wide [`Error`].
pub type CResult<T> = std::result::Result<T, Error>;

/// Engine errors. Constraint and conflict errors abort the transaction but
/// leave the session alive; protocol-level mapping never exposes internal
/// detail for remote clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Statement could not be parsed or planned.
    Parse(String),

    /// No such table.
    NoTable(String),
    /// No such column.
    NoColumn(String),
    /// Any other schema mismatch (type error, bad generated expression, ...).
    Schema(String),

    /// Unique constraint violated: (table, column, offending value rendering).
    UniqueViolation(String, String, String),
    /// Not-null constraint violated: (table, column).
    NullViolation(String, String),
    /// A table with this name already exists.
    AlreadyExists(String),

    /// Two transactions raced on the same row; the loser must retry.
    WriteConflict(String),
    /// A source below the required capability was refused a downgrade.
    DowngradeRefused(String),
    /// A pure write targeted a source that cannot version rows.
    WriteRequiresMvcc(String),
    /// Commit/rollback on a transaction that is not in progress.
    InvalidTxnState(String),

    /// The transaction manager has been closed.
    ManagerClosed,
    /// Active transaction cap reached.
    TooManyTransactions(usize),

    /// The operation was cancelled by the caller.
    Cancelled,

    /// Write attempted on a read-only source.
    ReadOnly(String),
    /// Operation on a source that is not connected.
    NotConnected(String),
    /// A filter referenced something the source cannot evaluate.
    Filter(String),

    /// File or network failure inside an adapter.
    Io(String),
    /// Payload could not be encoded or decoded.
    Serialization(String),

    /// Invariant violation. Logged at the site, surfaced generically.
    Internal(String),
}

impl Error {
    /// The stable MySQL error code for this error.
    pub fn code(&self) -> u16 {
        match self {
            Error::Parse(_) => 1064,
            Error::NoTable(_) => 1146,
            Error::NoColumn(_) => 1054,
            Error::Schema(_) => 1105,
            Error::UniqueViolation(..) => 1062,
            Error::NullViolation(..) => 1048,
            Error::AlreadyExists(_) => 1050,
            Error::WriteConflict(_) => 1213,
            Error::DowngradeRefused(_)
            | Error::WriteRequiresMvcc(_)
            | Error::InvalidTxnState(_) => 1568,
            Error::ManagerClosed => 1053,
            Error::TooManyTransactions(_) => 1040,
            Error::Cancelled => 1317,
            Error::ReadOnly(_) => 1036,
            Error::NotConnected(_) | Error::Io(_) => 1105,
            Error::Filter(_) => 1054,
            Error::Serialization(_) => 1105,
            Error::Internal(_) => 1105,
        }
    }

    /// The SQLstate paired with [`Error::code`].
    pub fn sqlstate(&self) -> &'static str {
        match self {
            Error::Parse(_) => "42000",
            Error::NoTable(_) => "42S02",
            Error::NoColumn(_) | Error::Filter(_) => "42S22",
            Error::UniqueViolation(..) => "23000",
            Error::NullViolation(..) => "23000",
            Error::AlreadyExists(_) => "42S01",
            Error::WriteConflict(_) => "40001",
            Error::Cancelled => "70100",
            Error::TooManyTransactions(_) => "08004",
            Error::ManagerClosed | Error::NotConnected(_) => "08S01",
            _ => "HY000",
        }
    }

    /// True when the transaction manager should abort the surrounding
    /// transaction on this error.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            Error::UniqueViolation(..)
                | Error::NullViolation(..)
                | Error::WriteConflict(_)
                | Error::Cancelled
        )
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "parse error: {}", msg),
            Error::NoTable(table) => write!(f, "table '{}' doesn't exist", table),
            Error::NoColumn(column) => write!(f, "unknown column '{}'", column),
            Error::Schema(msg) => write!(f, "schema error: {}", msg),
            Error::UniqueViolation(table, column, value) => {
                write!(f, "duplicate entry '{}' for key '{}.{}'", value, table, column)
            }
            Error::NullViolation(table, column) => {
                write!(f, "column '{}.{}' cannot be null", table, column)
            }
            Error::AlreadyExists(table) => write!(f, "table '{}' already exists", table),
            Error::WriteConflict(msg) => write!(f, "write conflict: {}", msg),
            Error::DowngradeRefused(source) => {
                write!(f, "source '{}' does not support MVCC and downgrade is disabled", source)
            }
            Error::WriteRequiresMvcc(source) => {
                write!(f, "write requires MVCC but source '{}' cannot version rows", source)
            }
            Error::InvalidTxnState(msg) => write!(f, "invalid transaction state: {}", msg),
            Error::ManagerClosed => write!(f, "transaction manager is closed"),
            Error::TooManyTransactions(max) => {
                write!(f, "too many active transactions (max {})", max)
            }
            Error::Cancelled => write!(f, "query execution was interrupted"),
            Error::ReadOnly(source) => write!(f, "source '{}' is read-only", source),
            Error::NotConnected(source) => write!(f, "source '{}' is not connected", source),
            Error::Filter(msg) => write!(f, "filter error: {}", msg),
            Error::Io(msg) => write!(f, "io error: {}", msg),
            Error::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Poisoned locks only happen after a panic elsewhere; surface them instead of
/// unwrapping so callers can shut down cleanly.
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("lock poisoned: {}", err))
    }
}
