// 🪜 Division Decoder
// "<Level>/<Tier>" → level 1..=4 plus optional tier letter

use crate::error::LineError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Division {
    pub level: u8,
    pub tier: Option<String>,
}

impl Division {
    /// Decode a division token.
    ///
    /// No '/' means the whole token is the level. An empty tier ("3/")
    /// is treated as absent. Tiers are upper-cased.
    pub fn decode(token: &str) -> Result<Division, LineError> {
        let token = token.trim();

        let (level_str, tier_str) = match token.split_once('/') {
            Some((level, tier)) => (level.trim(), Some(tier.trim())),
            None => (token, None),
        };

        let level: i64 = level_str
            .parse()
            .map_err(|_| LineError::Division(format!("level {:?} is not an integer", level_str)))?;

        if level < MIN_LEVEL as i64 || level > MAX_LEVEL as i64 {
            return Err(LineError::Division(format!(
                "level {} outside {}..={}",
                level, MIN_LEVEL, MAX_LEVEL
            )));
        }

        let tier = match tier_str {
            None | Some("") => None,
            Some(t) if t.chars().all(|c| c.is_ascii_alphanumeric()) => Some(t.to_ascii_uppercase()),
            Some(t) => {
                return Err(LineError::Division(format!("tier {:?} is not alphanumeric", t)));
            }
        };

        Ok(Division {
            level: level as u8,
            tier,
        })
    }
}

impl fmt::Display for Division {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tier {
            Some(tier) => write!(f, "{}/{}", self.level, tier),
            None => write!(f, "{}", self.level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_and_tier() {
        let d = Division::decode("3/E").unwrap();
        assert_eq!(d.level, 3);
        assert_eq!(d.tier.as_deref(), Some("E"));
        assert_eq!(d.to_string(), "3/E");
    }

    #[test]
    fn test_level_only() {
        let d = Division::decode("1").unwrap();
        assert_eq!(d.level, 1);
        assert_eq!(d.tier, None);

        let d = Division::decode("2/").unwrap();
        assert_eq!(d.tier, None);
    }

    #[test]
    fn test_tier_uppercased() {
        let d = Division::decode("4/g").unwrap();
        assert_eq!(d.tier.as_deref(), Some("G"));
    }

    #[test]
    fn test_out_of_range_level() {
        assert!(matches!(Division::decode("5/A"), Err(LineError::Division(_))));
        assert!(matches!(Division::decode("0"), Err(LineError::Division(_))));
    }

    #[test]
    fn test_non_integer_level() {
        assert!(matches!(Division::decode("X/A"), Err(LineError::Division(_))));
        assert!(matches!(Division::decode(""), Err(LineError::Division(_))));
    }
}
