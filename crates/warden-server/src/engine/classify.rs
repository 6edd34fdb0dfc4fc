// crates/warden-server/src/engine/classify.rs
// Test / infrastructure / production path classification

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classification of a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathClass {
    Test,
    Infrastructure,
    Production,
}

impl PathClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathClass::Test => "test",
            PathClass::Infrastructure => "infrastructure",
            PathClass::Production => "production",
        }
    }
}

static TEST_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|/)(tests?|__tests__|spec)/").expect("fixed pattern"));
static TEST_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(_test\.[^/.]+|\.test\.[^/.]+|\.spec\.[^/.]+)$").expect("fixed pattern"));
static INFRA_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|/)(infra|deploy|terraform|k8s|migrations)/").expect("fixed pattern"));

/// Classify a path. Test markers win over infrastructure markers so a
/// `deploy/spec/` helper counts as test code.
pub fn classify_path(path: &str) -> PathClass {
    if TEST_DIR.is_match(path) || TEST_FILE.is_match(path) {
        PathClass::Test
    } else if INFRA_DIR.is_match(path) {
        PathClass::Infrastructure
    } else {
        PathClass::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_paths() {
        for path in [
            "tests/unit_test.go",
            "src/__tests__/app.tsx",
            "spec/models/user_spec.rb",
            "pkg/server_test.go",
            "src/app.test.ts",
            "src/app.spec.ts",
            "deploy/spec/pipeline.yml",
        ] {
            assert_eq!(classify_path(path), PathClass::Test, "{path}");
        }
    }

    #[test]
    fn test_infrastructure_paths() {
        for path in [
            "infra/main.tf",
            "deploy/helm/values.yaml",
            "terraform/vpc.tf",
            "k8s/deployment.yaml",
            "migrations/0001_init.sql",
            "services/api/migrations/0002.sql",
        ] {
            assert_eq!(classify_path(path), PathClass::Infrastructure, "{path}");
        }
    }

    #[test]
    fn test_production_paths() {
        for path in ["src/main.rs", "cmd/server/main.go", "lib/index.js", "testdata.rs"] {
            assert_eq!(classify_path(path), PathClass::Production, "{path}");
        }
    }

    #[test]
    fn test_attest_is_not_a_test_dir() {
        // "attests/" must not match the tests?/ directory rule
        assert_eq!(classify_path("attests/report.go"), PathClass::Production);
    }
}
