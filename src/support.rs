//! Support aggregation: per-test booleans folded into per-feature
//! tri-state values.
//!
//! A feature is a named group of test cases from the catalog hierarchy.
//! For each (feature, engine version) the aggregator collects the
//! `matches` boolean of every member test and reduces:
//!
//! - [`Support::Supported`] — every collected value is true;
//! - [`Support::Unsupported`] — none is true;
//! - [`Support::Mixed`] — at least one of each;
//! - [`Support::Undefined`] — nothing was collected. An empty set used to
//!   read as vacuously "supported"; it is reported as its own state
//!   instead so an engine with no completed results never shows full
//!   support.
//!
//! Tests whose compile never produced output are carried in `incomplete`
//! lists and excluded from the reduction; they are never folded in as
//! `false`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tri-state support value (plus the empty-set case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    Supported,
    Unsupported,
    Mixed,
    Undefined,
}

/// Reduces collected per-test booleans to a tri-state value.
pub fn aggregate(values: &[bool]) -> Support {
    if values.is_empty() {
        Support::Undefined
    } else if values.iter().all(|&v| v) {
        Support::Supported
    } else if values.iter().any(|&v| v) {
        Support::Mixed
    } else {
        Support::Unsupported
    }
}

/// Per-test artifact: version label → `matches`, plus the labels whose
/// compile failed and therefore have no defined result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportRecord {
    pub results: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<String>,
}

/// One engine version's standing within a feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEngineSupport {
    pub support: Support,
    pub tests: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incomplete: Vec<String>,
}

/// Per-feature artifact: version label → aggregated standing.
pub type FeatureAggregate = BTreeMap<String, FeatureEngineSupport>;

/// Builds a feature aggregate from the member tests' support records.
///
/// `labels` is the full set of declared engine versions, so an engine
/// appears in the aggregate even when every one of its results is
/// missing. `records` pairs each member test id with its record, or
/// `None` when the record itself could not be built — which marks the
/// test incomplete for every engine.
pub fn aggregate_feature(
    labels: &[String],
    records: &[(String, Option<&SupportRecord>)],
) -> FeatureAggregate {
    let mut feature = FeatureAggregate::new();
    for label in labels {
        let mut tests = BTreeMap::new();
        let mut incomplete = Vec::new();
        for (test, record) in records {
            match record {
                Some(record) => {
                    if let Some(&matches) = record.results.get(label) {
                        tests.insert(test.clone(), matches);
                    } else {
                        incomplete.push(test.clone());
                    }
                }
                None => incomplete.push(test.clone()),
            }
        }
        let values: Vec<bool> = tests.values().copied().collect();
        feature.insert(
            label.clone(),
            FeatureEngineSupport {
                support: aggregate(&values),
                tests,
                incomplete,
            },
        );
    }
    feature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tri_state_law() {
        assert_eq!(aggregate(&[true, true]), Support::Supported);
        assert_eq!(aggregate(&[false, false]), Support::Unsupported);
        assert_eq!(aggregate(&[true, false]), Support::Mixed);
        assert_eq!(aggregate(&[true]), Support::Supported);
        assert_eq!(aggregate(&[false]), Support::Unsupported);
    }

    #[test]
    fn empty_set_is_undefined_not_vacuously_supported() {
        assert_eq!(aggregate(&[]), Support::Undefined);
    }

    #[test]
    fn feature_aggregation_separates_incomplete_from_failed() {
        let mut record_a = SupportRecord::default();
        record_a.results.insert("libsass_3_2".into(), true);
        record_a.incomplete.push("ruby_sass_3_4".into());
        let mut record_b = SupportRecord::default();
        record_b.results.insert("libsass_3_2".into(), false);
        record_b.results.insert("ruby_sass_3_4".into(), true);

        let labels = vec!["libsass_3_2".to_string(), "ruby_sass_3_4".to_string()];
        let records = vec![
            ("f/a".to_string(), Some(&record_a)),
            ("f/b".to_string(), Some(&record_b)),
        ];
        let feature = aggregate_feature(&labels, &records);

        let libsass = &feature["libsass_3_2"];
        assert_eq!(libsass.support, Support::Mixed);
        assert!(libsass.incomplete.is_empty());

        // ruby-sass never compiled f/a: one defined result, one
        // incomplete, and the tri-state only reflects the defined one.
        let ruby = &feature["ruby_sass_3_4"];
        assert_eq!(ruby.support, Support::Supported);
        assert_eq!(ruby.incomplete, vec!["f/a".to_string()]);
    }

    #[test]
    fn unbuilt_record_marks_every_engine_incomplete() {
        let labels = vec!["libsass_3_2".to_string()];
        let records = vec![("f/a".to_string(), None)];
        let feature = aggregate_feature(&labels, &records);
        assert_eq!(feature["libsass_3_2"].support, Support::Undefined);
        assert_eq!(feature["libsass_3_2"].incomplete, vec!["f/a".to_string()]);
    }

    #[test]
    fn support_serializes_as_lowercase_yaml() {
        let yaml = serde_yaml::to_string(&Support::Mixed).unwrap();
        assert_eq!(yaml.trim(), "mixed");
        let back: Support = serde_yaml::from_str("undefined").unwrap();
        assert_eq!(back, Support::Undefined);
    }
}
