//! Per-project test declarations.
//!
//! Each project may carry a `test_config.json` with a `tests` array. A
//! missing file means the project contributes zero work items; a malformed
//! file is a configuration error and fails the run before anything executes.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Test declaration file name inside each project directory.
pub const TEST_FILE: &str = "test_config.json";

/// Default simulated-cycle budget when a test does not declare one.
pub const DEFAULT_TIMEOUT_CYCLES: u64 = 10_000;

/// One declared test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    /// Human-readable description, also the test's identity in reports.
    pub description: String,

    /// Core names this test applies to.
    pub cores: Vec<String>,

    /// Substrings that must appear in the captured UART stream.
    pub expected_output: Vec<String>,

    /// When true, expected substrings must match in declaration order.
    pub ordered: bool,

    /// Simulated-cycle budget for one run of this test.
    pub timeout: u64,

    /// Extra arguments appended to the firmware build invocation.
    pub build_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTestFile {
    #[serde(default)]
    tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    description: String,
    cores: Vec<String>,
    #[serde(default)]
    expected_output: Vec<String>,
    #[serde(default)]
    ordered: bool,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default)]
    build_args: Vec<String>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_CYCLES
}

/// Parse the test declarations of one project directory.
pub fn parse_tests(project_dir: &Path, contents: &str) -> Result<Vec<TestCase>, SchemaError> {
    let file = project_dir.join(TEST_FILE).display().to_string();
    let raw: RawTestFile = serde_json::from_str(contents).map_err(|e| SchemaError::Malformed {
        file: file.clone(),
        message: e.to_string(),
    })?;

    raw.tests
        .into_iter()
        .map(|t| {
            if t.description.trim().is_empty() {
                return Err(SchemaError::Malformed {
                    file: file.clone(),
                    message: "test description must not be empty".to_string(),
                });
            }
            if t.timeout == 0 {
                return Err(SchemaError::Malformed {
                    file: file.clone(),
                    message: format!("test '{}' declares a zero cycle budget", t.description),
                });
            }
            Ok(TestCase {
                description: t.description,
                cores: t.cores,
                expected_output: t.expected_output,
                ordered: t.ordered,
                timeout: t.timeout,
                build_args: t.build_args,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"{
        "tests": [
            {
                "description": "hello world banner",
                "cores": ["picorv32"],
                "expected_output": ["Hello, World from Rust on PicoRV32!"],
                "timeout": 10000
            },
            {
                "description": "echo loop",
                "cores": ["picorv32", "femtorv"],
                "expected_output": ["ready", "ok"],
                "ordered": true,
                "build_args": ["--features", "echo"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_declarations() {
        let tests = parse_tests(Path::new("projects/hello"), HELLO).unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].cores, vec!["picorv32"]);
        assert!(!tests[0].ordered);
        assert_eq!(tests[0].timeout, 10_000);
        assert!(tests[1].ordered);
        assert_eq!(tests[1].timeout, DEFAULT_TIMEOUT_CYCLES);
        assert_eq!(tests[1].build_args, vec!["--features", "echo"]);
    }

    #[test]
    fn test_empty_tests_array() {
        let tests = parse_tests(Path::new("projects/quiet"), r#"{"tests": []}"#).unwrap();
        assert!(tests.is_empty());
    }

    #[test]
    fn test_missing_tests_key_is_empty() {
        let tests = parse_tests(Path::new("projects/quiet"), "{}").unwrap();
        assert!(tests.is_empty());
    }

    #[test]
    fn test_malformed_json_is_schema_error() {
        let err = parse_tests(Path::new("projects/bad"), "{not json").unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { .. }));
    }

    #[test]
    fn test_missing_description_rejects_file() {
        let text = r#"{"tests": [{"cores": ["picorv32"], "expected_output": []}]}"#;
        assert!(parse_tests(Path::new("projects/bad"), text).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let text = r#"{"tests": [{"description": "t", "cores": ["c"], "timeout": 0}]}"#;
        let err = parse_tests(Path::new("projects/bad"), text).unwrap_err();
        assert!(err.to_string().contains("zero cycle budget"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let text = r#"{"tests": [{"description": "t", "cores": ["c"], "retries": 3}]}"#;
        let tests = parse_tests(Path::new("projects/ok"), text).unwrap();
        assert_eq!(tests.len(), 1);
    }
}
