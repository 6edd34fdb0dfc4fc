// crates/warden-server/src/engine/scope.rs
// Scope matching: affected_files entries are glob patterns; a bare path is
// an exact-match glob.

use warden_types::ScopeDefinition;

/// Whether `path` falls inside the declared scope.
///
/// A session with no scope definition is unconstrained: every path is
/// in scope until `guardrail_declare_scope` narrows it.
pub fn path_in_scope(scope: Option<&ScopeDefinition>, path: &str) -> bool {
    let Some(scope) = scope else { return true };
    if scope.affected_files.is_empty() {
        return true;
    }
    scope
        .affected_files
        .iter()
        .any(|entry| glob_matches(entry, path))
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(path),
        Err(e) => {
            // A malformed pattern constrains nothing; it only ever matched
            // itself via the exact-path check above.
            tracing::warn!(pattern, "invalid scope glob: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(files: &[&str]) -> ScopeDefinition {
        ScopeDefinition {
            session_id: "s".into(),
            task_id: None,
            scope_description: "test".into(),
            scope_boundaries: String::new(),
            affected_files: files.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_no_scope_allows_everything() {
        assert!(path_in_scope(None, "anything/at/all.rs"));
    }

    #[test]
    fn test_glob_scope() {
        let s = scope(&["src/**"]);
        assert!(path_in_scope(Some(&s), "src/main.rs"));
        assert!(path_in_scope(Some(&s), "src/deep/nested/mod.rs"));
        assert!(!path_in_scope(Some(&s), "tests/unit_test.go"));
        assert!(!path_in_scope(Some(&s), "Cargo.toml"));
    }

    #[test]
    fn test_exact_path_scope() {
        let s = scope(&["README.md"]);
        assert!(path_in_scope(Some(&s), "README.md"));
        assert!(!path_in_scope(Some(&s), "docs/README.md"));
    }

    #[test]
    fn test_multiple_entries() {
        let s = scope(&["src/**", "Cargo.toml"]);
        assert!(path_in_scope(Some(&s), "Cargo.toml"));
        assert!(path_in_scope(Some(&s), "src/lib.rs"));
        assert!(!path_in_scope(Some(&s), "build.rs"));
    }

    #[test]
    fn test_empty_scope_list_allows_everything() {
        let s = scope(&[]);
        assert!(path_in_scope(Some(&s), "src/lib.rs"));
    }
}
