// 🚚 Batch Import Orchestrator
//
// RECEIVED → AUDITED → PARSED → VALIDATED → COMMITTED
//
// Lines can be rejected at PARSED (tokenizer) or VALIDATED (record builder)
// without stopping the batch. Audit and store failures stop it, and nothing
// reaches the store unless the whole batch commits.

use crate::audit::{AuditEntry, AuditLog};
use crate::builder::{build_record, BatchContext};
use crate::config::{Config, TownInfo};
use crate::dedup::SeasonKey;
use crate::error::{ConsistencyWarning, ImportError, LineError, StoreError};
use crate::parser::{data_lines, RawRow};
use crate::record::{SeasonPeriod, TeamSeasonRecord};
use crate::store::Store;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// BATCH STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Received,
    Audited,
    Parsed,
    Validated,
    Committed,
}

// ============================================================================
// RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub line_number: usize,
    pub reason: LineError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineWarning {
    pub line_number: usize,
    pub warning: ConsistencyWarning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub batch_id: String,
    pub season: SeasonKey,
    /// Non-blank, non-header lines in the raw block
    pub total_lines: usize,
    pub accepted_count: usize,
    pub skipped_duplicate_count: usize,
    pub rejected_lines: Vec<RejectedLine>,
    pub warnings: Vec<LineWarning>,
    pub state: BatchState,
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared flag checked between stages and right before commit
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ImportError> {
        if self.is_cancelled() {
            Err(ImportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct Importer {
    store: Arc<Store>,
    audit: AuditLog,
    towns: BTreeMap<String, TownInfo>,
}

impl Importer {
    pub fn new(store: Arc<Store>, audit: AuditLog, towns: BTreeMap<String, TownInfo>) -> Self {
        Importer { store, audit, towns }
    }

    /// Open the store and audit log named in the config
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store = Store::open(&config.store.path, config.import.lock)?;
        Ok(Importer::new(
            Arc::new(store),
            AuditLog::new(config.audit.path.clone()),
            config.towns.clone(),
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Import entry point for every caller (CLI, server, replay)
    pub fn import(
        &self,
        raw_text: &str,
        town_code: &str,
        season_year: i32,
        season_period: SeasonPeriod,
    ) -> Result<ImportResult, ImportError> {
        self.import_with_cancel(raw_text, town_code, season_year, season_period, &CancelToken::new())
    }

    pub fn import_with_cancel(
        &self,
        raw_text: &str,
        town_code: &str,
        season_year: i32,
        season_period: SeasonPeriod,
        cancel: &CancelToken,
    ) -> Result<ImportResult, ImportError> {
        let season = SeasonKey {
            town_code: town_code.trim().to_ascii_uppercase(),
            season_year,
            season_period,
        };
        let entry = AuditEntry::new(season, raw_text);
        self.run(&entry, true, cancel)
    }

    /// Re-import audited blocks whose season has no rows in the store.
    /// Blocks for towns missing from the registry are skipped.
    pub fn replay_missing(&self) -> Result<Vec<ImportResult>, ImportError> {
        let missing = self.audit.missing_seasons(&self.store)?;
        info!(count = missing.len(), "replaying missing seasons from audit log");

        let cancel = CancelToken::new();
        let mut results = Vec::with_capacity(missing.len());
        for entry in &missing {
            match self.run(entry, false, &cancel) {
                Ok(result) => results.push(result),
                Err(ImportError::UnknownTown(code)) => {
                    warn!(town = %code, season = %entry.season, "skipping audited block for unknown town");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }

    fn run(
        &self,
        entry: &AuditEntry,
        write_audit: bool,
        cancel: &CancelToken,
    ) -> Result<ImportResult, ImportError> {
        let town = self
            .towns
            .get(&entry.season.town_code)
            .ok_or_else(|| ImportError::UnknownTown(entry.season.town_code.clone()))?;

        let batch_id = uuid::Uuid::new_v4().to_string();
        debug!(batch_id = %batch_id, season = %entry.season, state = ?BatchState::Received, "batch received");
        cancel.check()?;

        // AUDITED: raw text is durable before any parsing happens
        if write_audit {
            self.audit.append(entry)?;
        }
        debug!(batch_id = %batch_id, state = ?BatchState::Audited, "batch audited");

        let outcome = self.process(entry, town, batch_id, cancel);

        // Replay skips entries with a cancellation marker
        if write_audit && matches!(outcome, Err(ImportError::Cancelled)) {
            self.audit.mark_cancelled(entry)?;
            info!(season = %entry.season, "cancelled batch marked in audit log");
        }

        outcome
    }

    /// PARSED → VALIDATED → COMMITTED for an already audited entry
    fn process(
        &self,
        entry: &AuditEntry,
        town: &TownInfo,
        batch_id: String,
        cancel: &CancelToken,
    ) -> Result<ImportResult, ImportError> {
        cancel.check()?;
        let season = entry.season.clone();

        // PARSED
        let mut rejected_lines = Vec::new();
        let mut rows: Vec<RawRow> = Vec::new();
        let mut total_lines = 0;
        for (line_number, line) in data_lines(&entry.raw_text) {
            total_lines += 1;
            match RawRow::tokenize(line_number, line) {
                Ok(row) => rows.push(row),
                Err(reason) => reject(&mut rejected_lines, line_number, reason),
            }
        }
        debug!(batch_id = %batch_id, state = ?BatchState::Parsed, rows = rows.len(), "batch parsed");
        cancel.check()?;

        // VALIDATED
        let ctx = BatchContext {
            town_code: season.town_code.clone(),
            town_name: town.name.clone(),
            town_population: town.population,
            season_year: season.season_year,
            season_period: season.season_period,
            ingestion_timestamp: Utc::now(),
        };

        let mut records: Vec<TeamSeasonRecord> = Vec::with_capacity(rows.len());
        let mut warnings = Vec::new();
        for row in &rows {
            match build_record(row, &ctx) {
                Ok(built) => {
                    warnings.extend(built.warnings.into_iter().map(|warning| LineWarning {
                        line_number: row.line_number,
                        warning,
                    }));
                    records.push(built.record);
                }
                Err(reason) => reject(&mut rejected_lines, row.line_number, reason),
            }
        }
        rejected_lines.sort_by_key(|r| r.line_number);
        debug!(batch_id = %batch_id, state = ?BatchState::Validated, records = records.len(), "batch validated");
        cancel.check()?;

        // COMMITTED
        let outcome = self
            .store
            .append_batch_as(&records, &batch_id, || cancel.is_cancelled())
            .map_err(|e| match e {
                StoreError::Aborted => ImportError::Cancelled,
                other => ImportError::Store(other),
            })?;

        let result = ImportResult {
            batch_id,
            season,
            total_lines,
            accepted_count: outcome.accepted,
            skipped_duplicate_count: outcome.duplicates.len(),
            rejected_lines,
            warnings,
            state: BatchState::Committed,
        };

        info!(
            batch_id = %result.batch_id,
            season = %result.season,
            accepted = result.accepted_count,
            skipped = result.skipped_duplicate_count,
            rejected = result.rejected_lines.len(),
            warnings = result.warnings.len(),
            "import committed"
        );

        Ok(result)
    }
}

fn reject(rejected: &mut Vec<RejectedLine>, line_number: usize, reason: LineError) {
    warn!(line = line_number, "line rejected: {}", reason);
    rejected.push(RejectedLine { line_number, reason });
}
