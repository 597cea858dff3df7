//! Incremental compilation task graph.
//!
//! Every derived value in the matrix — cleaned expected output, per-engine
//! normalized output, per-test support record, per-feature aggregate, the
//! stats table and its display fragment — is an artifact with a stable
//! key, a set of prerequisite artifacts, and a production rule. Building a
//! key builds its prerequisites depth-first, then runs the rule only when
//! the persisted stamp no longer matches the prerequisite values
//! (content-hash staleness, see [`crate::store`]).
//!
//! # Failure propagation
//!
//! A scoped failure (a compile request that died mid-flight) marks that
//! one artifact [`Outcome::Failed`]; artifacts that depend on it come out
//! [`Outcome::Unbuilt`] and are reported as incomplete, never silently
//! substituted or counted as non-matching. Fatal errors (provisioning,
//! store I/O, a prerequisite that should exist but does not) abort the
//! build with the specific failing key named.
//!
//! # Parallelism
//!
//! Compile artifacts fan out across one worker per engine version, which
//! serializes requests per handle by construction while distinct versions
//! proceed concurrently. Aggregation stages run on the calling thread
//! afterwards; artifact keys are partitioned across workers, so no key is
//! ever built twice concurrently.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::thread;

use crate::catalog::{Catalog, TestId};
use crate::engines::EngineVersionId;
use crate::errors::{CompatError, Result};
use crate::normalize::normalize;
use crate::runtime::CompileService;
use crate::stats::{stats_fragment, EngineStats, StatsTable};
use crate::store::{stamp_of, ArtifactStore};
use crate::support::{aggregate_feature, SupportRecord};

/// Stable identity of one derived artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKey {
    ExpectedClean { test: TestId },
    EngineOutput { test: TestId, version: EngineVersionId },
    SupportRecord { test: TestId },
    FeatureSupport { feature: String },
    Stats,
    StatsFragment,
}

impl ArtifactKey {
    /// The artifact's path inside the store, also its user-facing name.
    pub fn storage_key(&self) -> String {
        match self {
            ArtifactKey::ExpectedClean { test } => {
                format!("tests/{test}/expected_output_clean.css")
            }
            ArtifactKey::EngineOutput { test, version } => {
                format!("tests/{test}/output.{}.css", version.label())
            }
            ArtifactKey::SupportRecord { test } => format!("tests/{test}/support.yml"),
            ArtifactKey::FeatureSupport { feature } => format!("features/{feature}/support.yml"),
            ArtifactKey::Stats => "stats.yml".into(),
            ArtifactKey::StatsFragment => "stats.scss".into(),
        }
    }

    /// Side path for the raw (pre-normalization) compiler output.
    fn raw_key(&self) -> Option<String> {
        match self {
            ArtifactKey::EngineOutput { test, version } => {
                Some(format!("tests/{test}/output.{}.raw", version.label()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Result of building one artifact.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The artifact is present and fresh. `rebuilt` is false when the
    /// persisted value was reused unchanged.
    Built { rebuilt: bool },
    /// The production rule itself failed (scoped, e.g. transport).
    Failed { reason: String },
    /// A prerequisite failed, so the rule was never run.
    Unbuilt { missing: String },
}

impl Outcome {
    pub fn is_built(&self) -> bool {
        matches!(self, Outcome::Built { .. })
    }
}

/// High-level build targets exposed to the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every feature aggregate, the stats table, and the fragment.
    All,
    Support,
    Stats,
    Fragment,
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Target, String> {
        match s {
            "all" => Ok(Target::All),
            "support" => Ok(Target::Support),
            "stats" => Ok(Target::Stats),
            "fragment" => Ok(Target::Fragment),
            other => Err(format!(
                "unknown target '{other}' (expected all, support, stats, or fragment)"
            )),
        }
    }
}

/// Summary of one build run, keyed by storage paths.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub reused: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub unbuilt: Vec<(String, String)>,
}

impl BuildReport {
    /// True when every requested artifact was produced.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unbuilt.is_empty()
    }
}

/// The incremental builder for one run.
pub struct Builder<'a> {
    catalog: &'a Catalog,
    versions: Vec<EngineVersionId>,
    service: &'a dyn CompileService,
    store: &'a ArtifactStore,
    memo: Mutex<BTreeMap<ArtifactKey, Outcome>>,
}

impl<'a> Builder<'a> {
    pub fn new(
        catalog: &'a Catalog,
        versions: Vec<EngineVersionId>,
        service: &'a dyn CompileService,
        store: &'a ArtifactStore,
    ) -> Builder<'a> {
        Builder {
            catalog,
            versions,
            service,
            store,
            memo: Mutex::new(BTreeMap::new()),
        }
    }

    /// Builds a target and reports what was produced, reused, or left
    /// incomplete. Fatal errors abort with `Err`; scoped failures land in
    /// the report.
    pub fn build_target(&self, target: Target) -> Result<BuildReport> {
        self.compile_fan_out()?;
        for key in self.target_keys(target) {
            self.build(&key)?;
        }
        Ok(self.report())
    }

    fn target_keys(&self, target: Target) -> Vec<ArtifactKey> {
        let features = || {
            self.catalog
                .features()
                .keys()
                .map(|feature| ArtifactKey::FeatureSupport {
                    feature: feature.clone(),
                })
                .collect::<Vec<_>>()
        };
        match target {
            Target::Support => features(),
            Target::Stats => vec![ArtifactKey::Stats],
            Target::Fragment => vec![ArtifactKey::StatsFragment],
            Target::All => {
                let mut keys = features();
                keys.push(ArtifactKey::Stats);
                keys.push(ArtifactKey::StatsFragment);
                keys
            }
        }
    }

    /// Parallel compile phase: one worker per engine version walks the
    /// whole catalog. Distinct versions compile concurrently; requests
    /// against one handle are serialized because only its own worker
    /// issues them.
    fn compile_fan_out(&self) -> Result<()> {
        thread::scope(|scope| {
            let workers: Vec<_> = self
                .versions
                .iter()
                .map(|version| {
                    let worker = scope.spawn(move || -> Result<()> {
                        for test in self.catalog.tests() {
                            self.build(&ArtifactKey::EngineOutput {
                                test: test.id.clone(),
                                version: version.clone(),
                            })?;
                        }
                        Ok(())
                    });
                    (version.clone(), worker)
                })
                .collect();

            for (version, worker) in workers {
                worker.join().map_err(|_| {
                    CompatError::provision(
                        &version.engine,
                        &version.version,
                        "compile worker panicked",
                    )
                })??;
            }
            Ok(())
        })
    }

    /// Builds one artifact: prerequisites first, then the production rule
    /// if the persisted value is stale. Memoized per run.
    pub fn build(&self, key: &ArtifactKey) -> Result<Outcome> {
        if let Some(done) = self.memoized(key) {
            return Ok(done);
        }
        let outcome = match key {
            ArtifactKey::ExpectedClean { test } => self.build_expected_clean(key, test)?,
            ArtifactKey::EngineOutput { test, version } => {
                self.build_engine_output(key, test, version)?
            }
            ArtifactKey::SupportRecord { test } => self.build_support_record(key, test)?,
            ArtifactKey::FeatureSupport { feature } => self.build_feature_support(key, feature)?,
            ArtifactKey::Stats => self.build_stats(key)?,
            ArtifactKey::StatsFragment => self.build_stats_fragment(key)?,
        };
        self.memoize(key, outcome.clone());
        Ok(outcome)
    }

    // =====================
    // Production rules
    // =====================

    fn build_expected_clean(&self, key: &ArtifactKey, test: &TestId) -> Result<Outcome> {
        let case = self.test_case(key, test)?;
        let raw = case.expected_raw()?;
        let stamp = stamp_of("expected-clean:v1", &[&raw]);
        self.finish(key, &stamp, || Ok(normalize(&raw).into_bytes()))
    }

    fn build_engine_output(
        &self,
        key: &ArtifactKey,
        test: &TestId,
        version: &EngineVersionId,
    ) -> Result<Outcome> {
        let case = self.test_case(key, test)?;
        let input = case.input()?;
        let label = version.label();
        let stamp = stamp_of("engine-output:v1", &[label.as_bytes(), input.as_bytes()]);
        let storage = key.storage_key();
        if self.store.is_fresh(&storage, &stamp) {
            return Ok(Outcome::Built { rebuilt: false });
        }

        match self.service.compile(version, test, &input) {
            Ok(raw) => {
                if let Some(raw_key) = key.raw_key() {
                    self.store.save_side(&raw_key, &raw)?;
                }
                self.store
                    .save(&storage, normalize(&raw).as_bytes(), &stamp)?;
                Ok(Outcome::Built { rebuilt: true })
            }
            Err(error) if !error.is_fatal() => Ok(Outcome::Failed {
                reason: error.to_string(),
            }),
            Err(error) => Err(error),
        }
    }

    fn build_support_record(&self, key: &ArtifactKey, test: &TestId) -> Result<Outcome> {
        let expected_key = ArtifactKey::ExpectedClean { test: test.clone() };
        if !self.build(&expected_key)?.is_built() {
            return Ok(Outcome::Unbuilt {
                missing: expected_key.storage_key(),
            });
        }
        let expected = self.require_value(key, &expected_key)?;

        let mut record = SupportRecord::default();
        let mut stamp_parts: Vec<Vec<u8>> = vec![expected.clone()];
        for version in &self.versions {
            let output_key = ArtifactKey::EngineOutput {
                test: test.clone(),
                version: version.clone(),
            };
            let label = version.label();
            stamp_parts.push(label.clone().into_bytes());
            if self.build(&output_key)?.is_built() {
                let output = self.require_value(key, &output_key)?;
                record.results.insert(label, output == expected);
                stamp_parts.push(output);
            } else {
                record.incomplete.push(label);
                stamp_parts.push(b"<incomplete>".to_vec());
            }
        }

        let parts: Vec<&[u8]> = stamp_parts.iter().map(Vec::as_slice).collect();
        let stamp = stamp_of("support-record:v1", &parts);
        self.finish(key, &stamp, || to_yaml(key, &record))
    }

    fn build_feature_support(&self, key: &ArtifactKey, feature: &str) -> Result<Outcome> {
        let Some(tests) = self.catalog.features().get(feature) else {
            return Err(CompatError::MissingPrerequisite {
                dependent: key.storage_key(),
                missing: format!("feature '{feature}' in the catalog"),
            });
        };

        let mut loaded: Vec<(String, Option<SupportRecord>)> = Vec::new();
        let mut stamp_parts: Vec<Vec<u8>> = Vec::new();
        for test in tests {
            let record_key = ArtifactKey::SupportRecord { test: test.clone() };
            if self.build(&record_key)?.is_built() {
                let bytes = self.require_value(key, &record_key)?;
                let record: SupportRecord = from_yaml(&record_key, &bytes)?;
                stamp_parts.push(bytes);
                loaded.push((test.to_string(), Some(record)));
            } else {
                stamp_parts.push(b"<unbuilt>".to_vec());
                loaded.push((test.to_string(), None));
            }
        }

        let labels: Vec<String> = self.versions.iter().map(EngineVersionId::label).collect();
        let records: Vec<(String, Option<&SupportRecord>)> = loaded
            .iter()
            .map(|(test, record)| (test.clone(), record.as_ref()))
            .collect();
        let aggregate = aggregate_feature(&labels, &records);

        stamp_parts.push(labels.join(",").into_bytes());
        let parts: Vec<&[u8]> = stamp_parts.iter().map(Vec::as_slice).collect();
        let stamp = stamp_of("feature-support:v1", &parts);
        self.finish(key, &stamp, || to_yaml(key, &aggregate))
    }

    fn build_stats(&self, key: &ArtifactKey) -> Result<Outcome> {
        let total = self.catalog.total();
        let mut passed: BTreeMap<String, usize> = BTreeMap::new();
        let mut failed: BTreeMap<String, usize> = BTreeMap::new();
        let mut incomplete: BTreeMap<String, usize> = BTreeMap::new();
        let labels: Vec<String> = self.versions.iter().map(EngineVersionId::label).collect();

        let mut stamp_parts: Vec<Vec<u8>> = vec![labels.join(",").into_bytes()];
        for test in self.catalog.tests() {
            let record_key = ArtifactKey::SupportRecord {
                test: test.id.clone(),
            };
            let record = if self.build(&record_key)?.is_built() {
                let bytes = self.require_value(key, &record_key)?;
                let record: SupportRecord = from_yaml(&record_key, &bytes)?;
                stamp_parts.push(bytes);
                Some(record)
            } else {
                stamp_parts.push(b"<unbuilt>".to_vec());
                None
            };

            for label in &labels {
                let result = record.as_ref().and_then(|r| r.results.get(label).copied());
                let tally = match result {
                    Some(true) => &mut passed,
                    Some(false) => &mut failed,
                    None => &mut incomplete,
                };
                *tally.entry(label.clone()).or_default() += 1;
            }
        }

        let mut stats = StatsTable::new();
        for label in &labels {
            stats.insert(
                label.clone(),
                EngineStats::new(
                    passed.get(label).copied().unwrap_or(0),
                    failed.get(label).copied().unwrap_or(0),
                    incomplete.get(label).copied().unwrap_or(0),
                    total,
                ),
            );
        }

        let parts: Vec<&[u8]> = stamp_parts.iter().map(Vec::as_slice).collect();
        let stamp = stamp_of("stats:v1", &parts);
        self.finish(key, &stamp, || to_yaml(key, &stats))
    }

    fn build_stats_fragment(&self, key: &ArtifactKey) -> Result<Outcome> {
        let stats_key = ArtifactKey::Stats;
        if !self.build(&stats_key)?.is_built() {
            return Ok(Outcome::Unbuilt {
                missing: stats_key.storage_key(),
            });
        }
        let bytes = self.require_value(key, &stats_key)?;
        let stats: StatsTable = from_yaml(&stats_key, &bytes)?;
        let stamp = stamp_of("stats-fragment:v1", &[&bytes]);
        self.finish(key, &stamp, || Ok(stats_fragment(&stats).into_bytes()))
    }

    // =====================
    // Shared plumbing
    // =====================

    /// Runs the production rule unless the stored artifact carries the
    /// same stamp.
    fn finish(
        &self,
        key: &ArtifactKey,
        stamp: &str,
        produce: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<Outcome> {
        let storage = key.storage_key();
        if self.store.is_fresh(&storage, stamp) {
            return Ok(Outcome::Built { rebuilt: false });
        }
        let value = produce()?;
        self.store.save(&storage, &value, stamp)?;
        Ok(Outcome::Built { rebuilt: true })
    }

    /// Loads a prerequisite that the graph just reported built. Absence
    /// at this point is a dependency-order bug, reported with the missing
    /// key.
    fn require_value(&self, dependent: &ArtifactKey, prerequisite: &ArtifactKey) -> Result<Vec<u8>> {
        self.store
            .load(&prerequisite.storage_key())?
            .ok_or_else(|| CompatError::MissingPrerequisite {
                dependent: dependent.storage_key(),
                missing: prerequisite.storage_key(),
            })
    }

    fn test_case(&self, key: &ArtifactKey, test: &TestId) -> Result<&crate::catalog::TestCase> {
        self.catalog
            .test(test)
            .ok_or_else(|| CompatError::MissingPrerequisite {
                dependent: key.storage_key(),
                missing: format!("test '{test}' in the catalog"),
            })
    }

    fn memoized(&self, key: &ArtifactKey) -> Option<Outcome> {
        let memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        memo.get(key).cloned()
    }

    fn memoize(&self, key: &ArtifactKey, outcome: Outcome) {
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        memo.insert(key.clone(), outcome);
    }

    fn report(&self) -> BuildReport {
        let memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        let mut report = BuildReport::default();
        for (key, outcome) in memo.iter() {
            let name = key.storage_key();
            match outcome {
                Outcome::Built { rebuilt: true } => report.built.push(name),
                Outcome::Built { rebuilt: false } => report.reused.push(name),
                Outcome::Failed { reason } => report.failed.push((name, reason.clone())),
                Outcome::Unbuilt { missing } => report.unbuilt.push((name, missing.clone())),
            }
        }
        report
    }
}

fn to_yaml<T: serde::Serialize>(key: &ArtifactKey, value: &T) -> Result<Vec<u8>> {
    serde_yaml::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| yaml_error(key, e))
}

fn from_yaml<T: serde::de::DeserializeOwned>(key: &ArtifactKey, bytes: &[u8]) -> Result<T> {
    serde_yaml::from_str(&String::from_utf8_lossy(bytes)).map_err(|e| yaml_error(key, e))
}

fn yaml_error(key: &ArtifactKey, error: serde_yaml::Error) -> CompatError {
    CompatError::store(
        key.storage_key(),
        std::io::Error::new(std::io::ErrorKind::InvalidData, error),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Scripted compile service: answers from a fixed table and counts
    /// calls, so tests can assert memoization and scoped failure.
    struct Scripted {
        outputs: Map<(String, String), Option<&'static str>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new() -> Scripted {
            Scripted {
                outputs: Map::new(),
                calls: Mutex::new(0),
            }
        }

        fn answer(mut self, version: &EngineVersionId, test_input: &str, output: &'static str) -> Self {
            self.outputs
                .insert((version.label(), test_input.to_string()), Some(output));
            self
        }

        fn fail(mut self, version: &EngineVersionId, test_input: &str) -> Self {
            self.outputs
                .insert((version.label(), test_input.to_string()), None);
            self
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl CompileService for Scripted {
        fn compile(&self, id: &EngineVersionId, test: &TestId, input: &str) -> Result<Vec<u8>> {
            *self.calls.lock().unwrap() += 1;
            let context = format!("{test} for {id}");
            match self.outputs.get(&(id.label(), input.to_string())) {
                Some(Some(output)) => Ok(output.as_bytes().to_vec()),
                Some(None) => Err(CompatError::transport(context, "scripted failure")),
                None => Err(CompatError::transport(context, "no scripted output")),
            }
        }
    }

    fn scratch(name: &str) -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!(
            "sass-compat-graph-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&base);
        let catalog = base.join("spec");
        let store = base.join("build");
        fs::create_dir_all(&catalog).unwrap();
        (catalog, store)
    }

    fn add_test(root: &std::path::Path, rel: &str, input: &str, expected: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("input.scss"), input).unwrap();
        fs::write(dir.join("expected_output.css"), expected).unwrap();
    }

    fn x() -> EngineVersionId {
        EngineVersionId::new("libsass", "3.2")
    }

    #[test]
    fn rebuild_reuses_every_artifact_and_compiles_nothing() {
        let (catalog_root, store_root) = scratch("reuse");
        add_test(&catalog_root, "f/a", "a { color: red; }", "a {\ncolor: red;\n}");

        let service = Scripted::new().answer(&x(), "a { color: red; }", "a{color:red;}");
        let catalog = Catalog::load(&catalog_root).unwrap();
        let store = ArtifactStore::open(&store_root).unwrap();

        let builder = Builder::new(&catalog, vec![x()], &service, &store);
        let report = builder.build_target(Target::All).unwrap();
        assert!(report.is_complete());
        assert!(!report.built.is_empty());
        assert_eq!(service.calls(), 1);

        // Fresh builder, same store: everything is reused, no compiles.
        let builder = Builder::new(&catalog, vec![x()], &service, &store);
        let report = builder.build_target(Target::All).unwrap();
        assert!(report.is_complete());
        assert!(report.built.is_empty());
        assert_eq!(report.reused.len(), 6);
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn matched_output_is_byte_exact_after_normalization() {
        let (catalog_root, store_root) = scratch("match");
        add_test(&catalog_root, "f/a", "a { color: red; }", "a {\n  color: red; }\n");

        let service = Scripted::new().answer(&x(), "a { color: red; }", "a{color:red}");
        let catalog = Catalog::load(&catalog_root).unwrap();
        let store = ArtifactStore::open(&store_root).unwrap();
        let builder = Builder::new(&catalog, vec![x()], &service, &store);
        builder.build_target(Target::All).unwrap();

        let record: SupportRecord = serde_yaml::from_slice(
            &store.load("tests/f/a/support.yml").unwrap().unwrap(),
        )
        .unwrap();
        // "a{color:red}" and "a { color: red; }" normalize differently
        // (missing semicolon), so this is a definitive failed match.
        assert_eq!(record.results["libsass_3_2"], false);
    }

    #[test]
    fn transport_failure_marks_artifact_failed_and_dependents_carry_incomplete() {
        let (catalog_root, store_root) = scratch("failure");
        add_test(&catalog_root, "f/a", "a {}", "");

        let service = Scripted::new().fail(&x(), "a {}");
        let catalog = Catalog::load(&catalog_root).unwrap();
        let store = ArtifactStore::open(&store_root).unwrap();
        let builder = Builder::new(&catalog, vec![x()], &service, &store);
        let report = builder.build_target(Target::All).unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.contains("output.libsass_3_2.css"));

        // The support record still builds, with the engine listed as
        // incomplete rather than false.
        let record: SupportRecord = serde_yaml::from_slice(
            &store.load("tests/f/a/support.yml").unwrap().unwrap(),
        )
        .unwrap();
        assert!(record.results.is_empty());
        assert_eq!(record.incomplete, vec!["libsass_3_2".to_string()]);
    }

    #[test]
    fn unknown_feature_is_a_fatal_missing_prerequisite() {
        let (catalog_root, store_root) = scratch("ghost");
        add_test(&catalog_root, "f/a", "a {}", "a {}");

        let service = Scripted::new().answer(&x(), "a {}", "a {}");
        let catalog = Catalog::load(&catalog_root).unwrap();
        let store = ArtifactStore::open(&store_root).unwrap();
        let builder = Builder::new(&catalog, vec![x()], &service, &store);

        let err = builder
            .build(&ArtifactKey::FeatureSupport {
                feature: "ghost".into(),
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, CompatError::MissingPrerequisite { .. }));
    }

    #[test]
    fn target_parses_from_cli_strings() {
        assert_eq!("all".parse::<Target>().unwrap(), Target::All);
        assert_eq!("stats".parse::<Target>().unwrap(), Target::Stats);
        assert!("everything".parse::<Target>().is_err());
    }
}
