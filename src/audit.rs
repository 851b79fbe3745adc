// 🧾 Audit Log - every raw block is appended here before any parsing
//
// File layout, one block per submission:
//
//   ================================================================================
//   INGESTED: 2025-10-16T12:00:00.123456+00:00 TOWN=ASH SEASON=Fall 2025
//   ================================================================================
//   <raw text>
//
// A batch cancelled after its block was written gets a marker block with the
// same timestamp and season and no body:
//
//   ================================================================================
//   CANCELLED: 2025-10-16T12:00:00.123456+00:00 TOWN=ASH SEASON=Fall 2025
//   ================================================================================
//
// Raw lines that read as a delimiter (after any leading backslashes) get one
// extra backslash on write, removed again on read.

use crate::dedup::SeasonKey;
use crate::error::AuditError;
use crate::record::SeasonPeriod;
use crate::store::Store;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

pub const DELIMITER: &str =
    "================================================================================";
const HEADER_PREFIX: &str = "INGESTED:";
const CANCELLED_PREFIX: &str = "CANCELLED:";
const ESCAPE: char = '\\';

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Microsecond precision; together with the season it names the entry
    pub timestamp: DateTime<Utc>,
    pub season: SeasonKey,
    /// Raw text as submitted, minus one trailing newline
    pub raw_text: String,
}

impl AuditEntry {
    pub fn new(season: SeasonKey, raw_text: &str) -> Self {
        AuditEntry {
            timestamp: Utc::now().trunc_subsecs(6),
            season,
            raw_text: raw_text.strip_suffix('\n').unwrap_or(raw_text).to_string(),
        }
    }

    pub fn header(&self) -> String {
        format_header(HEADER_PREFIX, &self.timestamp, &self.season)
    }

    pub fn parse_header(line: &str) -> Result<(DateTime<Utc>, SeasonKey), AuditError> {
        parse_header_line(HEADER_PREFIX, line)
    }

    fn marker(&self) -> (DateTime<Utc>, SeasonKey) {
        (self.timestamp, self.season.clone())
    }
}

fn format_header(prefix: &str, timestamp: &DateTime<Utc>, season: &SeasonKey) -> String {
    format!(
        "{} {} TOWN={} SEASON={} {}",
        prefix,
        timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
        season.town_code,
        season.season_period,
        season.season_year
    )
}

fn parse_header_line(prefix: &str, line: &str) -> Result<(DateTime<Utc>, SeasonKey), AuditError> {
    let bad = || AuditError::Header(line.to_string());

    let rest = line.strip_prefix(prefix).ok_or_else(bad)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() != 4 {
        return Err(bad());
    }

    let timestamp = DateTime::parse_from_rfc3339(tokens[0])
        .map_err(|_| bad())?
        .with_timezone(&Utc);
    let town_code = tokens[1].strip_prefix("TOWN=").ok_or_else(bad)?;
    let period: SeasonPeriod = tokens[2]
        .strip_prefix("SEASON=")
        .ok_or_else(bad)?
        .parse()
        .map_err(|_| bad())?;
    let year: i32 = tokens[3].parse().map_err(|_| bad())?;

    Ok((
        timestamp,
        SeasonKey {
            town_code: town_code.to_string(),
            season_year: year,
            season_period: period,
        },
    ))
}

// ============================================================================
// BODY ESCAPING
// ============================================================================

fn is_delimiter_like(line: &str) -> bool {
    line.trim_start_matches(ESCAPE) == DELIMITER
}

fn escape_body(raw_text: &str) -> String {
    raw_text
        .split('\n')
        .map(|line| {
            if is_delimiter_like(line) {
                format!("{}{}", ESCAPE, line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_line(line: &str) -> &str {
    if is_delimiter_like(line) {
        line.strip_prefix(ESCAPE).unwrap_or(line)
    } else {
        line
    }
}

// ============================================================================
// LOG
// ============================================================================

pub struct AuditLog {
    path: PathBuf,
    /// Serializes appends from importers sharing this log
    write_lock: Mutex<()>,
}

/// Everything read back from the file
#[derive(Debug, Default)]
struct ParsedLog {
    entries: Vec<AuditEntry>,
    cancelled: HashSet<(DateTime<Utc>, SeasonKey)>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLog {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn write_block(&self, block: &str) -> Result<(), AuditError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        file.write_all(block.as_bytes()).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Append and fsync. Returns only once the block is on disk.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let block = format!(
            "{delim}\n{header}\n{delim}\n{raw}\n",
            delim = DELIMITER,
            header = entry.header(),
            raw = escape_body(&entry.raw_text)
        );
        self.write_block(&block)?;

        debug!(season = %entry.season, bytes = block.len(), "raw block audited");
        Ok(())
    }

    /// Record that `entry` was cancelled before commit, so replay skips it.
    pub fn mark_cancelled(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let block = format!(
            "{delim}\n{header}\n{delim}\n",
            delim = DELIMITER,
            header = format_header(CANCELLED_PREFIX, &entry.timestamp, &entry.season)
        );
        self.write_block(&block)?;

        debug!(season = %entry.season, "cancellation marker audited");
        Ok(())
    }

    fn read(&self) -> Result<ParsedLog, AuditError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_blocks(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ParsedLog::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// All submitted blocks in file order, cancelled ones included.
    /// Blocks with an unreadable header are skipped.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.read()?.entries)
    }

    /// Latest non-cancelled block for every (town, year, period) that has no
    /// rows in the store, newest first.
    pub fn missing_seasons(&self, store: &Store) -> Result<Vec<AuditEntry>, AuditError> {
        let log = self.read()?;
        let present = store.season_keys();
        let mut seen: HashSet<SeasonKey> = HashSet::new();

        let missing = log
            .entries
            .into_iter()
            .rev()
            .filter(|entry| !log.cancelled.contains(&entry.marker()))
            .filter(|entry| !present.contains(&entry.season))
            .filter(|entry| seen.insert(entry.season.clone()))
            .collect();

        Ok(missing)
    }
}

fn is_block_start(lines: &[&str], i: usize) -> bool {
    i + 2 < lines.len()
        && lines[i] == DELIMITER
        && (lines[i + 1].starts_with(HEADER_PREFIX) || lines[i + 1].starts_with(CANCELLED_PREFIX))
        && lines[i + 2] == DELIMITER
}

fn parse_blocks(content: &str) -> ParsedLog {
    let mut lines: Vec<&str> = content.split('\n').collect();
    // Content ends with '\n', which leaves one empty trailing element
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let mut log = ParsedLog::default();
    let mut i = 0;
    while i < lines.len() {
        if !is_block_start(&lines, i) {
            i += 1;
            continue;
        }

        let header = lines[i + 1];
        let body_start = i + 3;
        let mut body_end = body_start;
        while body_end < lines.len() && !is_block_start(&lines, body_end) {
            body_end += 1;
        }

        if header.starts_with(CANCELLED_PREFIX) {
            match parse_header_line(CANCELLED_PREFIX, header) {
                Ok(marker) => {
                    log.cancelled.insert(marker);
                }
                Err(e) => warn!("skipping cancellation marker: {}", e),
            }
        } else {
            match AuditEntry::parse_header(header) {
                Ok((timestamp, season)) => log.entries.push(AuditEntry {
                    timestamp,
                    season,
                    raw_text: lines[body_start..body_end]
                        .iter()
                        .map(|line| unescape_line(line))
                        .collect::<Vec<_>>()
                        .join("\n"),
                }),
                Err(e) => warn!("skipping audit block: {}", e),
            }
        }

        i = body_end;
    }

    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;
    use crate::store::LockPolicy;

    fn season(town: &str, year: i32, period: SeasonPeriod) -> SeasonKey {
        SeasonKey {
            town_code: town.to_string(),
            season_year: year,
            season_period: period,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let entry = AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), "x");
        let header = entry.header();
        assert!(header.starts_with("INGESTED: "));
        assert!(header.ends_with("TOWN=ASH SEASON=Fall 2025"));

        let (ts, key) = AuditEntry::parse_header(&header).unwrap();
        assert_eq!(ts, entry.timestamp);
        assert_eq!(key, entry.season);
    }

    #[test]
    fn test_bad_header() {
        assert!(AuditEntry::parse_header("INGESTED: yesterday TOWN=ASH SEASON=Fall 2025").is_err());
        assert!(AuditEntry::parse_header("INGESTED: 2025-10-16T12:00:00+00:00 ASH Fall 2025").is_err());
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("pastes").join("audit.log"));

        let raw1 = "Team\tTeam#\tGADS\nBarracuda\t10952\tGirls 8 3/E\t4\t5\t1\t0\t13\t15\t19\t-4\tKeith Elwell\n";
        let raw2 = "Sharks\t1\tBoys 6 2/A";
        log.append(&AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), raw1)).unwrap();
        log.append(&AuditEntry::new(season("FOX", 2024, SeasonPeriod::Spring), raw2)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].season.town_code, "ASH");
        assert_eq!(entries[0].raw_text, raw1.trim_end_matches('\n'));
        assert_eq!(entries[1].season, season("FOX", 2024, SeasonPeriod::Spring));
        assert_eq!(entries[1].raw_text, raw2);
    }

    #[test]
    fn test_raw_text_with_delimiter_line_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        let raw = format!("line one\n{}\nline three", DELIMITER);
        log.append(&AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), &raw)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_text, raw);
    }

    #[test]
    fn test_forged_header_inside_raw_text_stays_in_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        let raw = format!(
            "Barracuda\t10952\tGirls 8 3/E\n{d}\nINGESTED: 2020-01-01T00:00:00+00:00 TOWN=FOX SEASON=Spring 2020\n{d}\nSharks\t1\tBoys 6 2/A",
            d = DELIMITER
        );
        log.append(&AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), &raw)).unwrap();
        log.append(&AuditEntry::new(season("HOP", 2024, SeasonPeriod::Spring), "next")).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].season, season("ASH", 2025, SeasonPeriod::Fall));
        assert_eq!(entries[0].raw_text, raw);
        assert_eq!(entries[1].raw_text, "next");
    }

    #[test]
    fn test_backslashed_delimiter_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        let raw = format!("\\{d}\n\\\\{d}\n\\not a delimiter", d = DELIMITER);
        log.append(&AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), &raw)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_text, raw);
    }

    #[test]
    fn test_cancelled_entry_is_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();

        let first = AuditEntry::new(season("FOX", 2024, SeasonPeriod::Fall), "first paste");
        log.append(&first).unwrap();
        let mut second = AuditEntry::new(season("FOX", 2024, SeasonPeriod::Fall), "second paste");
        // Distinct from `first` even if the clock did not move
        second.timestamp = first.timestamp + chrono::Duration::microseconds(1);
        log.append(&second).unwrap();
        let hop = AuditEntry::new(season("HOP", 2023, SeasonPeriod::Spring), "hop paste");
        log.append(&hop).unwrap();

        log.mark_cancelled(&second).unwrap();
        log.mark_cancelled(&hop).unwrap();

        // Markers are not entries
        assert_eq!(log.entries().unwrap().len(), 3);

        let missing = log.missing_seasons(&store).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].raw_text, "first paste");

        println!("✅ Cancelled audit entries are not replayed");
    }

    #[test]
    fn test_missing_file_has_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("nope.log"));
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn test_missing_seasons_latest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        let store = Store::open_in_memory(LockPolicy::FailFast).unwrap();

        // ASH Fall 2025 is in the store
        store.append_batch(&[sample_record("Barracuda")]).unwrap();

        log.append(&AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), "a")).unwrap();
        log.append(&AuditEntry::new(season("FOX", 2024, SeasonPeriod::Fall), "old paste")).unwrap();
        log.append(&AuditEntry::new(season("HOP", 2023, SeasonPeriod::Spring), "b")).unwrap();
        log.append(&AuditEntry::new(season("FOX", 2024, SeasonPeriod::Fall), "new paste")).unwrap();

        let missing = log.missing_seasons(&store).unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].season.town_code, "FOX");
        assert_eq!(missing[0].raw_text, "new paste");
        assert_eq!(missing[1].season.town_code, "HOP");
    }

    #[test]
    fn test_unwritable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for append
        let log = AuditLog::new(dir.path());
        let err = log
            .append(&AuditEntry::new(season("ASH", 2025, SeasonPeriod::Fall), "x"))
            .unwrap_err();
        assert!(matches!(err, AuditError::Io { .. }));
    }
}
