// ⚠️ Error taxonomy for the ingestion pipeline
// Per-line errors are local to one row; store and audit errors abort the batch.

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// PER-LINE ERRORS (row is rejected, batch continues)
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum LineError {
    /// Too few tab-separated fields, or a required field is empty
    #[error("format error: {0}")]
    Format(String),

    /// GADS descriptor is not `<Gender> <Grade> <Level>/<Tier>`
    #[error("decode error: {0}")]
    Decode(String),

    /// Division level missing, not an integer, or outside 1..=4
    #[error("division error: {0}")]
    Division(String),

    /// A numeric column holds something other than an allowed integer
    #[error("numeric error in {field}: {value:?}")]
    Numeric { field: &'static str, value: String },
}

// ============================================================================
// NON-FATAL WARNINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DerivedField {
    GoalDifferential,
    Points,
}

impl DerivedField {
    pub fn name(&self) -> &str {
        match self {
            DerivedField::GoalDifferential => "goal_differential",
            DerivedField::Points => "points",
        }
    }
}

/// A supplied derived value disagrees with the value computed from the row.
/// The supplied value is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyWarning {
    pub field: DerivedField,
    pub supplied: i64,
    pub computed: i64,
}

impl std::fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} supplied as {} but computes to {}",
            self.field.name(),
            self.supplied,
            self.computed
        )
    }
}

// ============================================================================
// BATCH-FATAL ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store busy: another import holds the append lock")]
    Busy,

    #[error("append aborted before commit")]
    Aborted,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row in store: {0}")]
    Corrupt(String),

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// SQLITE_BUSY / SQLITE_LOCKED from another process counts as busy
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Busy
            }
            other => StoreError::Sqlite(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit log io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed audit header: {0}")]
    Header(String),
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("unknown town code: {0}")]
    UnknownTown(String),

    #[error("audit write failed, nothing was parsed: {0}")]
    Audit(#[from] AuditError),

    #[error("store failure, batch rolled back: {0}")]
    Store(#[from] StoreError),

    #[error("import cancelled before commit")]
    Cancelled,
}

impl ImportError {
    pub fn is_busy(&self) -> bool {
        matches!(self, ImportError::Store(StoreError::Busy))
    }
}
