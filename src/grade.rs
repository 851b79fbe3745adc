// 🎓 Grade Normalizer
// Maps the grade token of a GADS descriptor to its competitive bracket label.

use tracing::warn;

pub const COMBINED_7_8: &str = "combined 7/8";
pub const COMBINED_1_2: &str = "combined 1/2";

/// High-school markers that play in the same bracket as grades 1 and 2
const HIGH_SCHOOL_MARKERS: [&str; 3] = ["912", "9-12", "hs"];

/// Normalize a raw grade token.
///
/// - "7" / "8" → `combined 7/8`
/// - "1" / "2" / high-school marker → `combined 1/2`
/// - any other numeral N → `grade N`
/// - anything else is returned unchanged
pub fn normalize_grade(token: &str) -> String {
    let token = token.trim();

    match token {
        "7" | "8" => return COMBINED_7_8.to_string(),
        "1" | "2" => return COMBINED_1_2.to_string(),
        _ => {}
    }

    let lower = token.to_ascii_lowercase();
    if HIGH_SCHOOL_MARKERS.contains(&lower.as_str()) {
        return COMBINED_1_2.to_string();
    }

    if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        return format!("grade {}", token);
    }

    warn!(grade = token, "unrecognized grade token kept as-is");
    token.to_string()
}
