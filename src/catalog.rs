//! Test catalog discovery.
//!
//! The catalog is an external, read-only fixture tree. A test case is any
//! directory containing an `expected_output.css` file together with an
//! `input.scss` (or `input.disabled.scss`) source. Tests are grouped into
//! named features by the top-level directory component of their path
//! relative to the catalog root.
//!
//! The catalog must exist before any build proceeds; its absence is a
//! fatal precondition, not a build-time failure.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::errors::{CompatError, Result};

const EXPECTED_FILE: &str = "expected_output.css";
const INPUT_FILES: [&str; 2] = ["input.scss", "input.disabled.scss"];

/// Stable identity of a test case: its catalog-relative path with `/`
/// separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestId(String);

impl TestId {
    pub fn new(id: impl Into<String>) -> Self {
        TestId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The feature this test belongs to: the top-level path component.
    pub fn feature(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single test case: an input source and its expected output, immutable
/// once loaded from the fixture tree.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub id: TestId,
    input_path: PathBuf,
    expected_path: PathBuf,
}

impl TestCase {
    /// Reads the input source text.
    pub fn input(&self) -> Result<String> {
        fs::read_to_string(&self.input_path).map_err(|e| CompatError::Catalog {
            path: self.input_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Reads the raw expected output bytes. Raw: normalization happens in
    /// the build graph, where the cleaned version is a persisted artifact.
    pub fn expected_raw(&self) -> Result<Vec<u8>> {
        fs::read(&self.expected_path).map_err(|e| CompatError::Catalog {
            path: self.expected_path.clone(),
            reason: e.to_string(),
        })
    }
}

/// The discovered catalog: all test cases in deterministic order, plus the
/// feature grouping derived from the directory hierarchy.
#[derive(Debug)]
pub struct Catalog {
    root: PathBuf,
    tests: Vec<TestCase>,
    index: BTreeMap<TestId, usize>,
    features: BTreeMap<String, Vec<TestId>>,
}

impl Catalog {
    /// Scans `root` for test directories.
    ///
    /// Fails fast if the root does not exist. The scan is sorted so that
    /// build order, artifact layout, and reports are deterministic.
    pub fn load(root: impl AsRef<Path>) -> Result<Catalog> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(CompatError::Catalog {
                path: root,
                reason: "directory does not exist".into(),
            });
        }

        let mut tests = Vec::new();
        let mut index: BTreeMap<TestId, usize> = BTreeMap::new();
        let mut features: BTreeMap<String, Vec<TestId>> = BTreeMap::new();

        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| CompatError::Catalog {
                path: root.clone(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let dir = entry.path();
            let expected = dir.join(EXPECTED_FILE);
            if !expected.is_file() {
                continue;
            }
            let Some(input) = find_input(dir) else {
                continue;
            };

            let rel = dir.strip_prefix(&root).unwrap_or(dir);
            let id = TestId::new(path_to_key(rel));
            features
                .entry(id.feature().to_string())
                .or_default()
                .push(id.clone());
            index.insert(id.clone(), tests.len());
            tests.push(TestCase {
                id,
                input_path: input,
                expected_path: expected,
            });
        }

        Ok(Catalog {
            root,
            tests,
            index,
            features,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Total test count across the whole catalog; the denominator for
    /// engine-level percentages.
    pub fn total(&self) -> usize {
        self.tests.len()
    }

    pub fn test(&self, id: &TestId) -> Option<&TestCase> {
        self.index.get(id).map(|&i| &self.tests[i])
    }

    /// Feature name → member tests, in deterministic order.
    pub fn features(&self) -> &BTreeMap<String, Vec<TestId>> {
        &self.features
    }
}

fn find_input(dir: &Path) -> Option<PathBuf> {
    INPUT_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn path_to_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_catalog(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "sass-compat-catalog-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn add_test(root: &Path, rel: &str, input: &str, expected: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("input.scss"), input).unwrap();
        fs::write(dir.join("expected_output.css"), expected).unwrap();
    }

    #[test]
    fn discovers_tests_and_groups_by_top_level_feature() {
        let root = scratch_catalog("groups");
        add_test(&root, "selectors/attr", "a {}", "a {}");
        add_test(&root, "selectors/child", "b {}", "b {}");
        add_test(&root, "variables/basic", "c {}", "c {}");

        let catalog = Catalog::load(&root).unwrap();
        assert_eq!(catalog.total(), 3);
        assert_eq!(
            catalog.features().keys().collect::<Vec<_>>(),
            ["selectors", "variables"]
        );
        assert_eq!(catalog.features()["selectors"].len(), 2);
    }

    #[test]
    fn disabled_input_still_counts_as_a_test() {
        let root = scratch_catalog("disabled");
        let dir = root.join("misc/disabled");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("input.disabled.scss"), "x {}").unwrap();
        fs::write(dir.join("expected_output.css"), "x {}").unwrap();

        let catalog = Catalog::load(&root).unwrap();
        assert_eq!(catalog.total(), 1);
        assert_eq!(catalog.tests()[0].input().unwrap(), "x {}");
    }

    #[test]
    fn directories_without_fixtures_are_skipped() {
        let root = scratch_catalog("skip");
        add_test(&root, "a/real", "a {}", "a {}");
        fs::create_dir_all(root.join("a/not-a-test")).unwrap();
        fs::write(root.join("a/not-a-test/readme.md"), "hi").unwrap();

        let catalog = Catalog::load(&root).unwrap();
        assert_eq!(catalog.total(), 1);
        assert_eq!(catalog.tests()[0].id.as_str(), "a/real");
    }

    #[test]
    fn lookup_by_id_finds_the_case() {
        let root = scratch_catalog("lookup");
        add_test(&root, "selectors/attr", "a {}", "a {}");
        add_test(&root, "variables/basic", "b {}", "b {}");

        let catalog = Catalog::load(&root).unwrap();
        let id = TestId::new("selectors/attr");
        assert_eq!(catalog.test(&id).unwrap().id, id);
        assert!(catalog.test(&TestId::new("selectors/ghost")).is_none());
    }

    #[test]
    fn missing_root_is_a_fatal_precondition() {
        let err = Catalog::load("/nonexistent/sass-compat-fixtures").unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, CompatError::Catalog { .. }));
    }
}
