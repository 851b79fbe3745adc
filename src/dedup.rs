// 🔑 Dedup Key Function
// Composite identity of a team-season row. Two rows with equal keys are the
// same team in the same season; the later one is a duplicate.

use crate::record::{Gender, SeasonPeriod, TeamSeasonRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub town_code: String,
    pub season_year: i32,
    pub season_period: SeasonPeriod,
    pub team_name: String,
    pub grade_group: String,
    pub gender: Gender,
    pub division_level: u8,
    /// Empty string when the division has no tier
    pub division_tier: String,
}

impl DedupKey {
    pub fn of(record: &TeamSeasonRecord) -> Self {
        DedupKey {
            town_code: record.town_code.clone(),
            season_year: record.season_year,
            season_period: record.season_period,
            team_name: record.team_name.clone(),
            grade_group: record.grade_group.clone(),
            gender: record.gender,
            division_level: record.division_level,
            division_tier: record.division_tier.clone().unwrap_or_default(),
        }
    }

    /// Stable SHA-256 hex digest, stored in the UNIQUE `dedup_hash` column.
    /// Fields are joined with a unit separator so "AB"+"C" ≠ "A"+"BC".
    pub fn fingerprint(&self) -> String {
        let year = self.season_year.to_string();
        let level = self.division_level.to_string();
        let parts: [&str; 8] = [
            &self.town_code,
            &year,
            self.season_period.name(),
            &self.team_name,
            &self.grade_group,
            self.gender.name(),
            &level,
            &self.division_tier,
        ];

        let mut hasher = Sha256::new();
        hasher.update(parts.join("\u{1f}"));
        format!("{:x}", hasher.finalize())
    }

    pub fn season(&self) -> SeasonKey {
        SeasonKey {
            town_code: self.town_code.clone(),
            season_year: self.season_year,
            season_period: self.season_period,
        }
    }
}

/// (town, year, period) - the unit of one batch and of audit replay
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeasonKey {
    pub town_code: String,
    pub season_year: i32,
    pub season_period: SeasonPeriod,
}

impl std::fmt::Display for SeasonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.town_code, self.season_period, self.season_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;

    #[test]
    fn test_key_ignores_results_and_coaches() {
        let a = sample_record("Barracuda");
        let mut b = sample_record("Barracuda");
        b.wins = 9;
        b.head_coach = None;
        assert_eq!(DedupKey::of(&a), DedupKey::of(&b));
        assert_eq!(DedupKey::of(&a).fingerprint(), DedupKey::of(&b).fingerprint());
    }

    #[test]
    fn test_key_distinguishes_tier() {
        let a = sample_record("Mustangs");
        let mut b = sample_record("Mustangs");
        b.division_tier = Some("F".to_string());
        assert_ne!(DedupKey::of(&a), DedupKey::of(&b));
        assert_ne!(DedupKey::of(&a).fingerprint(), DedupKey::of(&b).fingerprint());
    }

    #[test]
    fn test_missing_tier_is_empty_string() {
        let mut rec = sample_record("Mustangs");
        rec.division_tier = None;
        assert_eq!(DedupKey::of(&rec).division_tier, "");
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        let fp = DedupKey::of(&sample_record("Barracuda")).fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
