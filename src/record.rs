// 📋 Canonical team-season record
// One row of a standings table after decoding, normalization and derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SEASON PERIOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeasonPeriod {
    Fall,
    Spring,
}

impl SeasonPeriod {
    pub fn name(&self) -> &'static str {
        match self {
            SeasonPeriod::Fall => "Fall",
            SeasonPeriod::Spring => "Spring",
        }
    }
}

impl fmt::Display for SeasonPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SeasonPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fall" => Ok(SeasonPeriod::Fall),
            "spring" => Ok(SeasonPeriod::Spring),
            other => Err(format!("season period must be Fall or Spring, got {:?}", other)),
        }
    }
}

// ============================================================================
// GENDER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Boys,
    Girls,
    Coed,
}

impl Gender {
    pub fn name(&self) -> &'static str {
        match self {
            Gender::Boys => "Boys",
            Gender::Girls => "Girls",
            Gender::Coed => "Coed",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boys" => Ok(Gender::Boys),
            "girls" => Ok(Gender::Girls),
            "coed" => Ok(Gender::Coed),
            other => Err(format!("unknown gender {:?}", other)),
        }
    }
}

// ============================================================================
// TEAM SEASON RECORD
// ============================================================================

/// Immutable once persisted. Corrections go through the administrative
/// purge path in the store, never through import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeasonRecord {
    // Batch context
    pub town_code: String,
    pub town_name: String,
    pub town_population: u32,
    pub season_year: i32,
    pub season_period: SeasonPeriod,

    // Identity within the season
    pub team_name: String,
    pub gender: Gender,
    pub grade_group: String,
    pub division_level: u8,
    pub division_tier: Option<String>,

    // Results
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    pub goal_differential: i64,
    pub points: i64,

    // Never present in pasted standings; kept for the flat table layout
    pub final_rank: Option<u32>,
    pub total_teams_in_division: Option<u32>,

    pub head_coach: Option<String>,
    pub assistant_coach: Option<String>,

    pub ingestion_timestamp: DateTime<Utc>,
}

impl TeamSeasonRecord {
    /// "Division 3E", or "Division 3" when there is no tier
    pub fn division_full(&self) -> String {
        format!(
            "Division {}{}",
            self.division_level,
            self.division_tier.as_deref().unwrap_or("")
        )
    }

    pub fn computed_goal_differential(&self) -> i64 {
        self.goals_for as i64 - self.goals_against as i64
    }

    pub fn computed_points(&self) -> i64 {
        3 * self.wins as i64 + self.ties as i64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Test fixture shared by other modules' tests
    pub(crate) fn sample_record(team_name: &str) -> TeamSeasonRecord {
        TeamSeasonRecord {
            town_code: "ASH".to_string(),
            town_name: "Ashland Youth Soccer".to_string(),
            town_population: 18832,
            season_year: 2025,
            season_period: SeasonPeriod::Fall,
            team_name: team_name.to_string(),
            gender: Gender::Girls,
            grade_group: "combined 7/8".to_string(),
            division_level: 3,
            division_tier: Some("E".to_string()),
            wins: 4,
            losses: 5,
            ties: 1,
            goals_for: 15,
            goals_against: 19,
            goal_differential: -4,
            points: 13,
            final_rank: None,
            total_teams_in_division: None,
            head_coach: Some("Keith Elwell".to_string()),
            assistant_coach: None,
            ingestion_timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_division_full() {
        let mut rec = sample_record("Barracuda");
        assert_eq!(rec.division_full(), "Division 3E");

        rec.division_tier = None;
        assert_eq!(rec.division_full(), "Division 3");
    }

    #[test]
    fn test_computed_fields() {
        let rec = sample_record("Barracuda");
        assert_eq!(rec.computed_goal_differential(), -4);
        assert_eq!(rec.computed_points(), 13);
    }

    #[test]
    fn test_period_and_gender_parse_case_insensitive() {
        assert_eq!("fall".parse::<SeasonPeriod>().unwrap(), SeasonPeriod::Fall);
        assert_eq!(" SPRING ".parse::<SeasonPeriod>().unwrap(), SeasonPeriod::Spring);
        assert!("Summer".parse::<SeasonPeriod>().is_err());

        assert_eq!("GIRLS".parse::<Gender>().unwrap(), Gender::Girls);
        assert_eq!("coed".parse::<Gender>().unwrap(), Gender::Coed);
        assert!("Mixed".parse::<Gender>().is_err());
    }
}
