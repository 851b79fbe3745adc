// 🏗️ Wire-Format Tokenizer & GADS Decoder
// One tab-delimited standings row → positional fields; "Girls 8 3/E" → Gads

use crate::division::Division;
use crate::error::LineError;
use crate::grade::normalize_grade;
use crate::record::Gender;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Team | Team# | GADS | W | L | T | F | PTS | GF | GA | +/- | Coach | [A. Coach]
pub const MIN_FIELDS: usize = 11;

pub mod column {
    pub const TEAM_NAME: usize = 0;
    pub const TEAM_NUMBER: usize = 1;
    pub const GADS: usize = 2;
    pub const WINS: usize = 3;
    pub const LOSSES: usize = 4;
    pub const TIES: usize = 5;
    pub const FORFEITS: usize = 6;
    pub const POINTS: usize = 7;
    pub const GOALS_FOR: usize = 8;
    pub const GOALS_AGAINST: usize = 9;
    pub const GOAL_DIFFERENTIAL: usize = 10;
    pub const HEAD_COACH: usize = 11;
    pub const ASSISTANT_COACH: usize = 12;
}

/// Values that mean "no coach listed"
const EMPTY_MARKERS: [&str; 3] = ["", "None", "none"];

// ============================================================================
// RAW ROW
// ============================================================================

/// RawRow - tokenizer output, fields still as text
/// Numeric columns are parsed by the record builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub line_number: usize,
    pub fields: Vec<String>,
}

impl RawRow {
    /// Split one line on tabs. Each field is trimmed of surrounding spaces.
    pub fn tokenize(line_number: usize, line: &str) -> Result<RawRow, LineError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();

        if fields.len() < MIN_FIELDS {
            return Err(LineError::Format(format!(
                "only {} tab-separated fields, need at least {}",
                fields.len(),
                MIN_FIELDS
            )));
        }

        if fields[column::TEAM_NAME].is_empty() {
            return Err(LineError::Format("team name is empty".to_string()));
        }

        Ok(RawRow { line_number, fields })
    }

    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn team_name(&self) -> &str {
        self.field(column::TEAM_NAME)
    }

    pub fn gads(&self) -> &str {
        self.field(column::GADS)
    }

    /// (head, assistant). A lone "A/B" coach column with no assistant
    /// column is split into both.
    pub fn coaches(&self) -> (Option<String>, Option<String>) {
        let head = non_empty(self.field(column::HEAD_COACH));
        let assistant = non_empty(self.field(column::ASSISTANT_COACH));

        match (head, assistant) {
            (Some(h), None) if h.contains('/') => {
                let (first, second) = h.split_once('/').unwrap_or((h.as_str(), ""));
                (non_empty(first), non_empty(second))
            }
            other => other,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if EMPTY_MARKERS.contains(&value) {
        None
    } else {
        Some(value.to_string())
    }
}

/// A line that should not be treated as data: blank, or the table header
pub fn is_skippable(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return true;
    }
    let first = line.split('\t').next().unwrap_or("").trim();
    first.eq_ignore_ascii_case("team")
}

/// Data lines of a raw block with their 1-based line numbers
pub fn data_lines(raw_text: &str) -> impl Iterator<Item = (usize, &str)> {
    raw_text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !is_skippable(line))
}

// ============================================================================
// GADS DESCRIPTOR
// ============================================================================

/// Gender / grade / division descriptor, e.g. "Girls 8 3/E"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gads {
    pub gender: Gender,
    /// Raw grade token as it appeared on the wire
    pub grade: String,
    pub division: Division,
}

impl Gads {
    /// Requires exactly three whitespace-separated tokens.
    pub fn decode(descriptor: &str) -> Result<Gads, LineError> {
        let tokens: Vec<&str> = descriptor.split_whitespace().collect();

        if tokens.len() != 3 {
            return Err(LineError::Decode(format!(
                "expected 3 tokens in {:?}, found {}",
                descriptor,
                tokens.len()
            )));
        }

        let gender = Gender::from_str(tokens[0]).map_err(LineError::Decode)?;
        let division = Division::decode(tokens[2])?;

        Ok(Gads {
            gender,
            grade: tokens[1].to_string(),
            division,
        })
    }

    pub fn grade_group(&self) -> String {
        normalize_grade(&self.grade)
    }
}

impl fmt::Display for Gads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.gender, self.grade, self.division)
    }
}

impl FromStr for Gads {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gads::decode(s)
    }
}
