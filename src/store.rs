// 🗄️ Persistent Store - SQLite + WAL, append-only, duplicate-safe
//
// The durable table is the source of truth. At open it is loaded into an
// in-memory arena (rows in insertion order) plus an index keyed by DedupKey.
// Only the holder of the writer connection mutates either of them, and the
// arena is updated only after the SQL transaction has committed.

use crate::dedup::{DedupKey, SeasonKey};
use crate::error::StoreError;
use crate::record::{Gender, SeasonPeriod, TeamSeasonRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, TryLockError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Column order of the flat table, shared by the SQL schema and CSV export
pub const COLUMNS: [&str; 23] = [
    "town_code",
    "town_name",
    "town_population",
    "season_year",
    "season_period",
    "team_name",
    "division_level",
    "division_tier",
    "division_full",
    "grade_group",
    "gender",
    "wins",
    "losses",
    "ties",
    "goals_for",
    "goals_against",
    "goal_differential",
    "points",
    "final_rank",
    "total_teams_in_division",
    "head_coach",
    "assistant_coach",
    "ingestion_timestamp",
];

/// How long a blocking writer waits on another process's SQLite lock
const BLOCKING_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// LOCK POLICY
// ============================================================================

/// What a second concurrent import does when the append lock is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Return `StoreError::Busy` immediately
    #[default]
    FailFast,
    /// Wait for the current writer to finish
    Block,
}

// ============================================================================
// EVENTS (audit trail of store mutations)
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of one `append_batch` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    pub accepted: usize,
    /// Positions (in the submitted slice) of records rejected as duplicates
    pub duplicates: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub total_records: usize,
    pub towns: usize,
    pub seasons: usize,
    pub grade_groups: usize,
    pub divisions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonCount {
    pub season: SeasonKey,
    pub teams: usize,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery and snapshot reads
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS team_seasons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dedup_hash TEXT UNIQUE NOT NULL,
            batch_id TEXT NOT NULL,
            town_code TEXT NOT NULL,
            town_name TEXT NOT NULL,
            town_population INTEGER NOT NULL,
            season_year INTEGER NOT NULL,
            season_period TEXT NOT NULL,
            team_name TEXT NOT NULL,
            division_level INTEGER NOT NULL CHECK (division_level BETWEEN 1 AND 4),
            division_tier TEXT,
            division_full TEXT NOT NULL,
            grade_group TEXT NOT NULL,
            gender TEXT NOT NULL,
            wins INTEGER NOT NULL CHECK (wins >= 0),
            losses INTEGER NOT NULL CHECK (losses >= 0),
            ties INTEGER NOT NULL CHECK (ties >= 0),
            goals_for INTEGER NOT NULL CHECK (goals_for >= 0),
            goals_against INTEGER NOT NULL CHECK (goals_against >= 0),
            goal_differential INTEGER NOT NULL,
            points INTEGER NOT NULL,
            final_rank INTEGER,
            total_teams_in_division INTEGER,
            head_coach TEXT,
            assistant_coach TEXT,
            ingestion_timestamp TEXT NOT NULL
        )",
        [],
    )?;

    // Audit trail of store mutations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_team_seasons_season
         ON team_seasons(town_code, season_year, season_period)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)
        .map_err(|e| StoreError::Corrupt(format!("event data: {}", e)))?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn insert_record(
    conn: &Connection,
    record: &TeamSeasonRecord,
    key: &DedupKey,
    batch_id: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO team_seasons (
            dedup_hash, batch_id,
            town_code, town_name, town_population, season_year, season_period,
            team_name, division_level, division_tier, division_full, grade_group, gender,
            wins, losses, ties, goals_for, goals_against, goal_differential, points,
            final_rank, total_teams_in_division, head_coach, assistant_coach,
            ingestion_timestamp
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                  ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            key.fingerprint(),
            batch_id,
            record.town_code,
            record.town_name,
            record.town_population,
            record.season_year,
            record.season_period.name(),
            record.team_name,
            record.division_level,
            record.division_tier,
            record.division_full(),
            record.grade_group,
            record.gender.name(),
            record.wins,
            record.losses,
            record.ties,
            record.goals_for,
            record.goals_against,
            record.goal_differential,
            record.points,
            record.final_rank,
            record.total_teams_in_division,
            record.head_coach,
            record.assistant_coach,
            record.ingestion_timestamp.to_rfc3339(),
        ],
    )
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn load_records(conn: &Connection) -> rusqlite::Result<Vec<TeamSeasonRecord>> {
    let mut stmt = conn.prepare(
        "SELECT town_code, town_name, town_population, season_year, season_period,
                team_name, division_level, division_tier, grade_group, gender,
                wins, losses, ties, goals_for, goals_against, goal_differential, points,
                final_rank, total_teams_in_division, head_coach, assistant_coach,
                ingestion_timestamp
         FROM team_seasons
         ORDER BY id",
    )?;

    let records = stmt
        .query_map([], |row| {
            let period: String = row.get(4)?;
            let gender: String = row.get(9)?;
            let timestamp: String = row.get(21)?;

            Ok(TeamSeasonRecord {
                town_code: row.get(0)?,
                town_name: row.get(1)?,
                town_population: row.get(2)?,
                season_year: row.get(3)?,
                season_period: period
                    .parse::<SeasonPeriod>()
                    .map_err(|e| conversion_error(4, e))?,
                team_name: row.get(5)?,
                division_level: row.get(6)?,
                division_tier: row.get(7)?,
                grade_group: row.get(8)?,
                gender: gender.parse::<Gender>().map_err(|e| conversion_error(9, e))?,
                wins: row.get(10)?,
                losses: row.get(11)?,
                ties: row.get(12)?,
                goals_for: row.get(13)?,
                goals_against: row.get(14)?,
                goal_differential: row.get(15)?,
                points: row.get(16)?,
                final_rank: row.get(17)?,
                total_teams_in_division: row.get(18)?,
                head_coach: row.get(19)?,
                assistant_coach: row.get(20)?,
                ingestion_timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| conversion_error(21, e.to_string()))?
                    .with_timezone(&Utc),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

// ============================================================================
// ARENA + INDEX
// ============================================================================

#[derive(Debug, Default)]
struct Arena {
    rows: Vec<TeamSeasonRecord>,
    index: HashMap<DedupKey, usize>,
}

impl Arena {
    fn from_rows(rows: Vec<TeamSeasonRecord>) -> Self {
        let mut arena = Arena::default();
        for row in rows {
            arena.push(row);
        }
        arena
    }

    fn push(&mut self, record: TeamSeasonRecord) {
        let key = DedupKey::of(&record);
        if self.index.contains_key(&key) {
            // The UNIQUE column makes this unreachable for rows we loaded
            warn!(team = %record.team_name, "duplicate key in arena ignored");
            return;
        }
        self.index.insert(key, self.rows.len());
        self.rows.push(record);
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct Store {
    /// Writer connection; holding this mutex is holding the append lock
    writer: Mutex<Connection>,
    arena: RwLock<Arena>,
    lock_policy: LockPolicy,
}

impl Store {
    pub fn open(path: &Path, lock_policy: LockPolicy) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, lock_policy)
    }

    pub fn open_in_memory(lock_policy: LockPolicy) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, lock_policy)
    }

    fn from_connection(conn: Connection, lock_policy: LockPolicy) -> Result<Self, StoreError> {
        conn.busy_timeout(match lock_policy {
            LockPolicy::FailFast => Duration::ZERO,
            LockPolicy::Block => BLOCKING_BUSY_TIMEOUT,
        })?;
        setup_database(&conn)?;

        let rows = load_records(&conn)?;
        let arena = Arena::from_rows(rows);
        info!(records = arena.rows.len(), "store opened, index rebuilt");

        Ok(Store {
            writer: Mutex::new(conn),
            arena: RwLock::new(arena),
            lock_policy,
        })
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    fn acquire_writer(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        match self.lock_policy {
            LockPolicy::FailFast => match self.writer.try_lock() {
                Ok(guard) => Ok(guard),
                Err(TryLockError::WouldBlock) => Err(StoreError::Busy),
                Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            },
            LockPolicy::Block => Ok(self.writer.lock().unwrap_or_else(PoisonError::into_inner)),
        }
    }

    #[cfg(test)]
    pub(crate) fn writer_lock_for_test(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_arena(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Append a batch. First occurrence of a key wins; later ones (against the
    /// persisted index or earlier in the same batch) are reported as
    /// duplicates. Either every accepted row commits or none does.
    pub fn append_batch(&self, records: &[TeamSeasonRecord]) -> Result<AppendOutcome, StoreError> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        self.append_batch_as(records, &batch_id, || false)
    }

    /// `append_batch` with a caller-supplied batch id and an abort check that
    /// is consulted right before commit.
    pub fn append_batch_as<F>(
        &self,
        records: &[TeamSeasonRecord],
        batch_id: &str,
        aborted: F,
    ) -> Result<AppendOutcome, StoreError>
    where
        F: Fn() -> bool,
    {
        let mut conn = self.acquire_writer()?;

        // Dedup against the persisted index and within the batch
        let mut outcome = AppendOutcome::default();
        let mut pending: Vec<(usize, DedupKey)> = Vec::new();
        {
            let arena = self.read_arena();
            let mut seen: HashSet<DedupKey> = HashSet::new();
            for (pos, record) in records.iter().enumerate() {
                let key = DedupKey::of(record);
                if arena.index.contains_key(&key) || !seen.insert(key.clone()) {
                    outcome.duplicates.push(pos);
                } else {
                    pending.push((pos, key));
                }
            }
        }

        if pending.is_empty() {
            debug!(batch_id, duplicates = outcome.duplicates.len(), "nothing new to append");
            return Ok(outcome);
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from_sqlite)?;

        let mut committed: Vec<usize> = Vec::with_capacity(pending.len());
        for (pos, key) in &pending {
            match insert_record(&tx, &records[*pos], key, batch_id) {
                Ok(_) => committed.push(*pos),
                // Another process appended the same key since we loaded
                Err(rusqlite::Error::SqliteFailure(err, Some(ref msg)))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation
                        && msg.contains("dedup_hash") =>
                {
                    outcome.duplicates.push(*pos);
                }
                Err(e) => return Err(StoreError::from_sqlite(e)),
            }
        }

        outcome.accepted = committed.len();
        outcome.duplicates.sort_unstable();

        let event = Event::new(
            "batch_committed",
            "batch",
            batch_id,
            serde_json::json!({
                "accepted": outcome.accepted,
                "duplicates": outcome.duplicates.len(),
            }),
            "importer",
        );
        insert_event(&tx, &event)?;

        if aborted() {
            // Dropping the transaction rolls it back
            drop(tx);
            return Err(StoreError::Aborted);
        }

        tx.commit().map_err(StoreError::from_sqlite)?;

        {
            let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
            for pos in committed {
                arena.push(records[pos].clone());
            }
        }

        debug!(
            batch_id,
            accepted = outcome.accepted,
            duplicates = outcome.duplicates.len(),
            "batch committed"
        );

        Ok(outcome)
    }

    /// Administrative removal of one season, outside the ingestion path.
    /// Returns the number of rows deleted.
    pub fn purge_season(&self, season: &SeasonKey, actor: &str) -> Result<usize, StoreError> {
        let mut conn = self.acquire_writer()?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from_sqlite)?;

        let deleted = tx.execute(
            "DELETE FROM team_seasons
             WHERE town_code = ?1 AND season_year = ?2 AND season_period = ?3",
            params![season.town_code, season.season_year, season.season_period.name()],
        )?;

        let event = Event::new(
            "season_purged",
            "season",
            &season.to_string(),
            serde_json::json!({ "deleted": deleted }),
            actor,
        );
        insert_event(&tx, &event)?;
        tx.commit().map_err(StoreError::from_sqlite)?;

        {
            let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
            let rows = std::mem::take(&mut arena.rows);
            *arena = Arena::from_rows(
                rows.into_iter()
                    .filter(|r| DedupKey::of(r).season() != *season)
                    .collect(),
            );
        }

        warn!(season = %season, deleted, actor, "season purged");
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Reads (arena snapshot, never touch the writer connection)
    // ------------------------------------------------------------------------

    pub fn exists(&self, key: &DedupKey) -> bool {
        self.read_arena().index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read_arena().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of every record, in insertion order
    pub fn snapshot(&self) -> Vec<TeamSeasonRecord> {
        self.read_arena().rows.clone()
    }

    pub fn get(&self, key: &DedupKey) -> Option<TeamSeasonRecord> {
        let arena = self.read_arena();
        arena.index.get(key).map(|&i| arena.rows[i].clone())
    }

    pub fn season_keys(&self) -> HashSet<SeasonKey> {
        self.read_arena()
            .index
            .keys()
            .map(DedupKey::season)
            .collect()
    }

    pub fn has_season(&self, season: &SeasonKey) -> bool {
        self.read_arena().index.keys().any(|k| k.season() == *season)
    }

    pub fn summary(&self) -> StoreSummary {
        let arena = self.read_arena();
        let rows = &arena.rows;

        StoreSummary {
            total_records: rows.len(),
            towns: rows.iter().map(|r| &r.town_code).collect::<HashSet<_>>().len(),
            seasons: rows
                .iter()
                .map(|r| (r.season_year, r.season_period))
                .collect::<HashSet<_>>()
                .len(),
            grade_groups: rows.iter().map(|r| &r.grade_group).collect::<HashSet<_>>().len(),
            divisions: rows
                .iter()
                .map(|r| r.division_full())
                .collect::<HashSet<_>>()
                .len(),
        }
    }

    /// Team counts per (town, year, period), newest season first
    pub fn season_counts(&self) -> Vec<SeasonCount> {
        let mut counts: BTreeMap<SeasonKey, usize> = BTreeMap::new();
        for key in self.read_arena().index.keys() {
            *counts.entry(key.season()).or_insert(0) += 1;
        }

        let mut out: Vec<SeasonCount> = counts
            .into_iter()
            .map(|(season, teams)| SeasonCount { season, teams })
            .collect();
        out.sort_by(|a, b| {
            a.season
                .town_code
                .cmp(&b.season.town_code)
                .then(b.season.season_year.cmp(&a.season.season_year))
                .then(b.season.season_period.cmp(&a.season.season_period))
        });
        out
    }

    // ------------------------------------------------------------------------
    // Diagnostics and export
    // ------------------------------------------------------------------------

    /// Row count straight from SQLite (waits for the writer lock)
    pub fn verify_count(&self) -> Result<i64, StoreError> {
        let conn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM team_seasons", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>, StoreError> {
        let conn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY id",
        )?;

        let events = stmt
            .query_map(params![entity_type, entity_id], |row| {
                let timestamp: String = row.get(1)?;
                let data_json: String = row.get(5)?;

                Ok(Event {
                    event_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map_err(|e| conversion_error(1, e.to_string()))?
                        .with_timezone(&Utc),
                    event_type: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    data: serde_json::from_str(&data_json)
                        .map_err(|e| conversion_error(5, e.to_string()))?,
                    actor: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Batch id under which a record was stored
    pub fn batch_of(&self, key: &DedupKey) -> Result<Option<String>, StoreError> {
        let conn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = conn
            .query_row(
                "SELECT batch_id FROM team_seasons WHERE dedup_hash = ?1",
                [key.fingerprint()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(batch)
    }

    /// Write the flat table as CSV, header first
    pub fn export_csv_to<W: Write>(&self, writer: W) -> Result<usize, StoreError> {
        let rows = self.snapshot();

        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        wtr.write_record(COLUMNS)?;
        for record in &rows {
            wtr.write_record(flat_row(record))?;
        }
        wtr.flush()?;

        Ok(rows.len())
    }

    pub fn export_csv(&self, path: &Path) -> Result<usize, StoreError> {
        let file = std::fs::File::create(path)?;
        let written = self.export_csv_to(file)?;
        info!(path = %path.display(), rows = written, "exported store to csv");
        Ok(written)
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// One record in `COLUMNS` order
fn flat_row(r: &TeamSeasonRecord) -> [String; 23] {
    [
        r.town_code.clone(),
        r.town_name.clone(),
        r.town_population.to_string(),
        r.season_year.to_string(),
        r.season_period.name().to_string(),
        r.team_name.clone(),
        r.division_level.to_string(),
        opt(&r.division_tier),
        r.division_full(),
        r.grade_group.clone(),
        r.gender.name().to_string(),
        r.wins.to_string(),
        r.losses.to_string(),
        r.ties.to_string(),
        r.goals_for.to_string(),
        r.goals_against.to_string(),
        r.goal_differential.to_string(),
        r.points.to_string(),
        opt(&r.final_rank),
        opt(&r.total_teams_in_division),
        opt(&r.head_coach),
        opt(&r.assistant_coach),
        r.ingestion_timestamp.to_rfc3339(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;
    use std::sync::Arc;

    #[test]
    fn test_idempotency_append_twice() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        let batch = vec![sample_record("Barracuda"), sample_record("Sharks")];

        let first = store.append_batch(&batch).unwrap();
        assert_eq!(first.accepted, 2);
        assert!(first.duplicates.is_empty());

        let second = store.append_batch(&batch).unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, vec![0, 1]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.verify_count().unwrap(), 2);

        println!("✅ Idempotency test PASSED: 0 duplicates inserted on second append");
    }

    #[test]
    fn test_duplicate_within_batch_keeps_first() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        let first = sample_record("Barracuda");
        let mut second = sample_record("Barracuda");
        second.wins = 9;

        let outcome = store.append_batch(&[first, second]).unwrap();
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.duplicates, vec![1]);

        let key = DedupKey::of(&sample_record("Barracuda"));
        assert!(store.exists(&key));
        assert_eq!(store.get(&key).unwrap().wins, 4);
    }

    #[test]
    fn test_failed_append_leaves_store_untouched() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        store.append_batch(&[sample_record("Existing")]).unwrap();

        // Simulate a storage failure partway through the batch
        store
            .writer
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_on_boom BEFORE INSERT ON team_seasons
                 WHEN NEW.team_name = 'Boom'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let batch = vec![sample_record("Alpha"), sample_record("Boom"), sample_record("Omega")];
        let err = store.append_batch(&batch).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));

        assert_eq!(store.len(), 1);
        assert_eq!(store.verify_count().unwrap(), 1);
        assert!(!store.exists(&DedupKey::of(&sample_record("Alpha"))));
    }

    #[test]
    fn test_aborted_append_rolls_back() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        let err = store
            .append_batch_as(&[sample_record("Alpha")], "batch-1", || true)
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted));
        assert!(store.is_empty());
        assert_eq!(store.verify_count().unwrap(), 0);
        assert!(store.events_for_entity("batch", "batch-1").unwrap().is_empty());
    }

    #[test]
    fn test_fail_fast_when_writer_held() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        let _guard = store.writer.lock().unwrap();

        let err = store.append_batch(&[sample_record("Alpha")]).unwrap_err();
        assert!(matches!(err, StoreError::Busy));

        // Readers are not blocked by the writer
        assert!(!store.exists(&DedupKey::of(&sample_record("Alpha"))));
    }

    #[test]
    fn test_blocking_policy_waits_for_writer() {
        let store = Arc::new(Store::open_in_memory(LockPolicy::Block).unwrap());

        let guard = store.writer.lock().unwrap();
        let worker = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.append_batch(&[sample_record("Alpha")]))
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(guard);

        let outcome = worker.join().unwrap().unwrap();
        assert_eq!(outcome.accepted, 1);
    }

    #[test]
    fn test_index_rebuilt_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("standings.db");

        {
            let store = Store::open(&path, LockPolicy::FailFast).unwrap();
            store.append_batch(&[sample_record("Barracuda")]).unwrap();
        }

        let store = Store::open(&path, LockPolicy::FailFast).unwrap();
        assert_eq!(store.len(), 1);
        let reloaded = store.snapshot().remove(0);
        assert_eq!(reloaded.team_name, "Barracuda");
        assert_eq!(reloaded.division_tier.as_deref(), Some("E"));
        assert_eq!(reloaded.goal_differential, -4);

        let outcome = store.append_batch(&[sample_record("Barracuda")]).unwrap();
        assert_eq!(outcome.accepted, 0);
    }

    #[test]
    fn test_batch_event_recorded() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        store
            .append_batch_as(&[sample_record("Alpha")], "batch-42", || false)
            .unwrap();

        let events = store.events_for_entity("batch", "batch-42").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "batch_committed");
        assert_eq!(events[0].data["accepted"], 1);

        let key = DedupKey::of(&sample_record("Alpha"));
        assert_eq!(store.batch_of(&key).unwrap().as_deref(), Some("batch-42"));
    }

    #[test]
    fn test_purge_season() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        let mut spring = sample_record("Alpha");
        spring.season_period = SeasonPeriod::Spring;
        store
            .append_batch(&[sample_record("Alpha"), sample_record("Beta"), spring])
            .unwrap();

        let fall = DedupKey::of(&sample_record("Alpha")).season();
        let deleted = store.purge_season(&fall, "test").unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len(), 1);
        assert!(!store.has_season(&fall));
        assert_eq!(store.verify_count().unwrap(), 1);

        // The purged season can be ingested again
        let outcome = store.append_batch(&[sample_record("Alpha")]).unwrap();
        assert_eq!(outcome.accepted, 1);
    }

    #[test]
    fn test_summary_and_season_counts() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        let mut other_town = sample_record("Hawks");
        other_town.town_code = "FOX".to_string();
        other_town.grade_group = "grade 5".to_string();
        store
            .append_batch(&[sample_record("Alpha"), sample_record("Beta"), other_town])
            .unwrap();

        let summary = store.summary();
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.towns, 2);
        assert_eq!(summary.seasons, 1);
        assert_eq!(summary.grade_groups, 2);
        assert_eq!(summary.divisions, 1);

        let counts = store.season_counts();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].season.town_code, "ASH");
        assert_eq!(counts[0].teams, 2);
        assert_eq!(counts[1].teams, 1);
    }

    #[test]
    fn test_export_csv() {
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();
        store.append_batch(&[sample_record("Barracuda")]).unwrap();

        let mut buf = Vec::new();
        let written = store.export_csv_to(&mut buf).unwrap();
        assert_eq!(written, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with("ASH,Ashland Youth Soccer,18832,2025,Fall,Barracuda,3,E,Division 3E,combined 7/8,Girls,4,5,1,15,19,-4,13,,,Keith Elwell,,"));
    }
}
