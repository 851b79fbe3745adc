// Standings Ingest - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod record;
pub mod grade;
pub mod division;
pub mod parser;   // Line tokenizer + GADS descriptor
pub mod builder;  // Record builder + consistency checks
pub mod dedup;    // Natural key + season key
pub mod store;    // SQLite-backed record store
pub mod audit;    // Append-only raw paste log
pub mod config;
pub mod logging;
pub mod import;   // Batch import orchestrator

// Re-export commonly used types
pub use error::{
    AuditError, ConsistencyWarning, DerivedField, ImportError, LineError, StoreError,
};
pub use record::{Gender, SeasonPeriod, TeamSeasonRecord};
pub use grade::normalize_grade;
pub use division::Division;
pub use parser::{data_lines, Gads, RawRow};
pub use builder::{build_record, BatchContext, BuiltRecord};
pub use dedup::{DedupKey, SeasonKey};
pub use store::{
    setup_database, insert_event,
    AppendOutcome, Event, LockPolicy, SeasonCount, Store, StoreSummary,
};
pub use audit::{AuditEntry, AuditLog};
pub use config::{Config, TownInfo};
pub use import::{
    BatchState, CancelToken, ImportResult, Importer, LineWarning, RejectedLine,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
