//! Engine-level statistics: catalog-wide pass/fail counts and
//! percentages, plus the derived SCSS display fragment.
//!
//! Stats are computed over all test cases in the catalog, not per
//! feature. A test whose compile failed counts as `incomplete`, never as
//! a failed match, so `passed + failed + incomplete` always equals the
//! catalog total and an incomplete run is visibly incomplete.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-engine-version row of the stats artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub passed: usize,
    pub failed: usize,
    #[serde(default)]
    pub incomplete: usize,
    /// `passed / total * 100`, rounded to two decimals.
    pub percentage: f64,
    /// Integer-rounded percentage for compact display.
    pub rounded: u32,
}

impl EngineStats {
    pub fn new(passed: usize, failed: usize, incomplete: usize, total: usize) -> EngineStats {
        let percentage = if total == 0 {
            0.0
        } else {
            round2(passed as f64 / total as f64 * 100.0)
        };
        EngineStats {
            passed,
            failed,
            incomplete,
            percentage,
            rounded: percentage.round() as u32,
        }
    }
}

/// The stats artifact: version label → row.
pub type StatsTable = BTreeMap<String, EngineStats>;

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Renders the SCSS display fragment consumed by the external report
/// generator:
///
/// ```scss
/// $stats: (
///   'libsass_3_2': 87,
///   'ruby_sass_3_4': 100,
/// );
/// ```
pub fn stats_fragment(stats: &StatsTable) -> String {
    let mut out = String::from("$stats: (\n");
    for (label, row) in stats {
        out.push_str(&format!("  '{}': {},\n", label, row.rounded));
    }
    out.push_str(");\n");
    out
}
