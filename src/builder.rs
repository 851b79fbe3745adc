// 🧱 Record Builder
// Tokenized row + batch context → TeamSeasonRecord, with derived fields
// computed only when the wire left them blank.

use crate::error::{ConsistencyWarning, DerivedField, LineError};
use crate::parser::{column, Gads, RawRow};
use crate::record::{SeasonPeriod, TeamSeasonRecord};
use chrono::{DateTime, Utc};
use tracing::warn;

// ============================================================================
// BATCH CONTEXT
// ============================================================================

/// Metadata shared by every row of one raw block
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub town_code: String,
    pub town_name: String,
    pub town_population: u32,
    pub season_year: i32,
    pub season_period: SeasonPeriod,
    pub ingestion_timestamp: DateTime<Utc>,
}

/// Builder output: the record plus any non-fatal warnings
#[derive(Debug, Clone)]
pub struct BuiltRecord {
    pub record: TeamSeasonRecord,
    pub warnings: Vec<ConsistencyWarning>,
}

// ============================================================================
// NUMERIC FIELD PARSING
// ============================================================================

fn count(row: &RawRow, index: usize, field: &'static str) -> Result<u32, LineError> {
    let value = row.field(index);
    value.parse::<u32>().map_err(|_| LineError::Numeric {
        field,
        value: value.to_string(),
    })
}

/// Blank → None; otherwise must be an integer (sign allowed)
fn optional_int(row: &RawRow, index: usize, field: &'static str) -> Result<Option<i64>, LineError> {
    let value = row.field(index);
    if value.is_empty() {
        return Ok(None);
    }
    // Some exports write a leading '+' on positive goal differentials
    let digits = value.strip_prefix('+').unwrap_or(value);
    digits.parse::<i64>().map(Some).map_err(|_| LineError::Numeric {
        field,
        value: value.to_string(),
    })
}

// ============================================================================
// BUILD
// ============================================================================

pub fn build_record(row: &RawRow, ctx: &BatchContext) -> Result<BuiltRecord, LineError> {
    let gads = Gads::decode(row.gads())?;

    let wins = count(row, column::WINS, "wins")?;
    let losses = count(row, column::LOSSES, "losses")?;
    let ties = count(row, column::TIES, "ties")?;
    let goals_for = count(row, column::GOALS_FOR, "goals_for")?;
    let goals_against = count(row, column::GOALS_AGAINST, "goals_against")?;

    // Forfeits are validated but not persisted
    if !row.field(column::FORFEITS).is_empty() {
        count(row, column::FORFEITS, "forfeits")?;
    }

    let supplied_points = optional_int(row, column::POINTS, "points")?;
    let supplied_gd = optional_int(row, column::GOAL_DIFFERENTIAL, "goal_differential")?;

    let computed_gd = goals_for as i64 - goals_against as i64;
    let computed_points = 3 * wins as i64 + ties as i64;

    let mut warnings = Vec::new();
    let goal_differential =
        reconcile(DerivedField::GoalDifferential, supplied_gd, computed_gd, &mut warnings);
    let points = reconcile(DerivedField::Points, supplied_points, computed_points, &mut warnings);

    for w in &warnings {
        warn!(
            line = row.line_number,
            team = row.team_name(),
            "consistency warning: {}",
            w
        );
    }

    let (head_coach, assistant_coach) = row.coaches();

    let record = TeamSeasonRecord {
        town_code: ctx.town_code.clone(),
        town_name: ctx.town_name.clone(),
        town_population: ctx.town_population,
        season_year: ctx.season_year,
        season_period: ctx.season_period,
        team_name: row.team_name().to_string(),
        gender: gads.gender,
        grade_group: gads.grade_group(),
        division_level: gads.division.level,
        division_tier: gads.division.tier,
        wins,
        losses,
        ties,
        goals_for,
        goals_against,
        goal_differential,
        points,
        final_rank: None,
        total_teams_in_division: None,
        head_coach,
        assistant_coach,
        ingestion_timestamp: ctx.ingestion_timestamp,
    };

    Ok(BuiltRecord { record, warnings })
}

/// The wire value wins when present; a disagreement only warns.
fn reconcile(
    field: DerivedField,
    supplied: Option<i64>,
    computed: i64,
    warnings: &mut Vec<ConsistencyWarning>,
) -> i64 {
    match supplied {
        Some(value) => {
            if value != computed {
                warnings.push(ConsistencyWarning {
                    field,
                    supplied: value,
                    computed,
                });
            }
            value
        }
        None => computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Gender;

    fn ctx() -> BatchContext {
        BatchContext {
            town_code: "ASH".to_string(),
            town_name: "Ashland Youth Soccer".to_string(),
            town_population: 18832,
            season_year: 2025,
            season_period: SeasonPeriod::Fall,
            ingestion_timestamp: Utc::now(),
        }
    }

    fn build(line: &str) -> Result<BuiltRecord, LineError> {
        let row = RawRow::tokenize(1, line)?;
        build_record(&row, &ctx())
    }

    #[test]
    fn test_barracuda_example() {
        let built = build(
            "Barracuda\t10952\tGirls 8 3/E\t4\t5\t1\t0\t13\t15\t19\t-4\tKeith Elwell\tEric Appelstein",
        )
        .unwrap();
        let rec = built.record;

        assert_eq!(rec.grade_group, "combined 7/8");
        assert_eq!(rec.gender, Gender::Girls);
        assert_eq!(rec.division_level, 3);
        assert_eq!(rec.division_tier.as_deref(), Some("E"));
        assert_eq!(rec.goal_differential, -4);
        assert_eq!(rec.points, 13);
        assert_eq!(rec.head_coach.as_deref(), Some("Keith Elwell"));
        assert_eq!(rec.assistant_coach.as_deref(), Some("Eric Appelstein"));
        assert_eq!(rec.town_code, "ASH");
        assert!(built.warnings.is_empty());
    }

    #[test]
    fn test_blank_derived_fields_are_computed() {
        let built = build("Sharks\t1\tBoys 6 2/A\t3\t2\t2\t0\t\t10\t4\t\tSmith").unwrap();
        assert_eq!(built.record.goal_differential, 6);
        assert_eq!(built.record.points, 11);
        assert!(built.warnings.is_empty());
    }

    #[test]
    fn test_supplied_goal_differential_kept_with_warning() {
        let built = build("Sharks\t1\tBoys 6 2/A\t3\t2\t2\t0\t11\t10\t4\t5\tSmith").unwrap();
        assert_eq!(built.record.goal_differential, 5);
        assert_eq!(
            built.warnings,
            vec![ConsistencyWarning {
                field: DerivedField::GoalDifferential,
                supplied: 5,
                computed: 6,
            }]
        );
    }

    #[test]
    fn test_plus_sign_goal_differential() {
        let built = build("Sharks\t1\tBoys 6 2/A\t3\t2\t2\t0\t11\t10\t4\t+6\tSmith").unwrap();
        assert_eq!(built.record.goal_differential, 6);
        assert!(built.warnings.is_empty());
    }

    #[test]
    fn test_negative_count_is_numeric_error() {
        let err = build("Sharks\t1\tBoys 6 2/A\t-3\t2\t2\t0\t11\t10\t4\t6\tSmith").unwrap_err();
        assert_eq!(
            err,
            LineError::Numeric {
                field: "wins",
                value: "-3".to_string()
            }
        );
    }

    #[test]
    fn test_non_integer_field_is_numeric_error() {
        let err = build("Sharks\t1\tBoys 6 2/A\t3\t2\t2\t0\t11\tten\t4\t6\tSmith").unwrap_err();
        assert!(matches!(err, LineError::Numeric { field: "goals_for", .. }));
    }

    #[test]
    fn test_bad_gads_propagates() {
        let err = build("Sharks\t1\tBoys 6\t3\t2\t2\t0\t11\t10\t4\t6\tSmith").unwrap_err();
        assert!(matches!(err, LineError::Decode(_)));

        let err = build("Sharks\t1\tBoys 6 7/A\t3\t2\t2\t0\t11\t10\t4\t6\tSmith").unwrap_err();
        assert!(matches!(err, LineError::Division(_)));
    }
}
