// crates/warden-server/src/rules/compiler.rs
// Regex compilation and evaluation under explicit limits.
//
// Rules may use lookaround (e.g. `--force(?!-with-lease)`), so patterns
// compile with fancy-regex, whose backtracking engine is exactly why every
// evaluation runs behind a deadline and a backtrack limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::PatternConfig;
use crate::observability::metrics;

/// Backtracking step budget per evaluation. This bounds the worker thread
/// even after the async deadline has given up on it.
const BACKTRACK_LIMIT: usize = 1_000_000;

/// Rejection reasons at rule admission time.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("pattern is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("pattern failed to compile: {0}")]
    Invalid(String),

    #[error("pattern compilation took {elapsed_ms}ms, limit is {max_ms}ms")]
    CompileBudget { elapsed_ms: u64, max_ms: u64 },

    #[error("unsupported flag {0:?} (supported: i, m, s)")]
    UnsupportedFlag(char),
}

/// Outcome of one pattern evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    Match { line: u32, column: u32 },
    NoMatch,
    /// Evaluation exceeded the per-input deadline or the backtrack budget.
    /// Counted as a rule-engine timeout, never as a violation.
    Timeout,
}

/// An immutable compiled pattern, shared through the hash-keyed cache.
#[derive(Debug)]
pub struct CompiledPattern {
    pub source: String,
    pub flags: String,
    pub hash: String,
    regex: fancy_regex::Regex,
}

/// Deterministic hash binding a pattern to its flags.
pub fn pattern_hash(pattern: &str, flags: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pattern.as_bytes());
    hasher.update(b"\n");
    hasher.update(flags.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn inline_flags(flags: &str) -> Result<String, CompileError> {
    let mut prefix = String::new();
    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' => prefix.push(flag),
            other => return Err(CompileError::UnsupportedFlag(other)),
        }
    }
    Ok(if prefix.is_empty() {
        String::new()
    } else {
        format!("(?{prefix})")
    })
}

impl CompiledPattern {
    /// Compile under the admission limits: source length first, then a
    /// wall-clock budget on the compile itself.
    pub fn compile(
        pattern: &str,
        flags: &str,
        limits: &PatternConfig,
    ) -> Result<Arc<Self>, CompileError> {
        if pattern.len() > limits.max_source {
            return Err(CompileError::TooLong {
                len: pattern.len(),
                max: limits.max_source,
            });
        }

        let prefixed = format!("{}{}", inline_flags(flags)?, pattern);
        let started = Instant::now();
        let regex = fancy_regex::RegexBuilder::new(&prefixed)
            .backtrack_limit(BACKTRACK_LIMIT)
            .build()
            .map_err(|e| CompileError::Invalid(e.to_string()))?;
        let elapsed = started.elapsed();

        if elapsed > Duration::from_millis(limits.max_compile_ms) {
            return Err(CompileError::CompileBudget {
                elapsed_ms: elapsed.as_millis() as u64,
                max_ms: limits.max_compile_ms,
            });
        }

        Ok(Arc::new(Self {
            source: pattern.to_string(),
            flags: flags.to_string(),
            hash: pattern_hash(pattern, flags),
            regex,
        }))
    }

    /// Evaluate against `input` under the per-input deadline.
    ///
    /// The match runs on a blocking thread; if the deadline fires first the
    /// caller gets `Timeout` while the backtrack limit bounds how much
    /// longer the abandoned thread can spin.
    pub async fn find_match(
        self: &Arc<Self>,
        input: &str,
        rule_id: &str,
        deadline: Duration,
    ) -> EvalOutcome {
        let pattern = self.clone();
        let haystack = input.to_string();

        let eval = tokio::task::spawn_blocking(move || match pattern.regex.find(&haystack) {
            Ok(Some(m)) => {
                let (line, column) = position_of(&haystack, m.start());
                EvalOutcome::Match { line, column }
            }
            Ok(None) => EvalOutcome::NoMatch,
            // Backtrack limit exceeded surfaces as a runtime error.
            Err(_) => EvalOutcome::Timeout,
        });

        match tokio::time::timeout(deadline, eval).await {
            Ok(Ok(outcome)) => {
                if outcome == EvalOutcome::Timeout {
                    metrics::record_rule_engine_timeout(rule_id);
                }
                outcome
            }
            Ok(Err(join_err)) => {
                tracing::error!(rule_id, "pattern evaluation panicked: {}", join_err);
                metrics::record_panic("pattern_eval");
                EvalOutcome::Timeout
            }
            Err(_) => {
                metrics::record_rule_engine_timeout(rule_id);
                EvalOutcome::Timeout
            }
        }
    }
}

/// 1-based line/column of a byte offset.
fn position_of(haystack: &str, offset: usize) -> (u32, u32) {
    let before = &haystack[..offset];
    let line = before.bytes().filter(|b| *b == b'\n').count() as u32 + 1;
    let column = match before.rfind('\n') {
        Some(nl) => offset - nl,
        None => offset + 1,
    } as u32;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PatternConfig {
        PatternConfig::default()
    }

    fn eval_deadline() -> Duration {
        Duration::from_millis(limits().max_eval_ms)
    }

    #[test]
    fn test_hash_deterministic_and_flag_sensitive() {
        let a = pattern_hash("foo", "i");
        let b = pattern_hash("foo", "i");
        let c = pattern_hash("foo", "");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_source_length_limit() {
        let long = "a".repeat(2000);
        let err = CompiledPattern::compile(&long, "", &limits()).unwrap_err();
        assert!(matches!(err, CompileError::TooLong { .. }));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = CompiledPattern::compile("(unclosed", "", &limits()).unwrap_err();
        assert!(matches!(err, CompileError::Invalid(_)));
    }

    #[test]
    fn test_unsupported_flag_rejected() {
        let err = CompiledPattern::compile("a", "x", &limits()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedFlag('x')));
    }

    #[tokio::test]
    async fn test_lookahead_pattern_matches() {
        let p = CompiledPattern::compile(
            r"git\s+push\s+--force(?!-with-lease)",
            "",
            &limits(),
        )
        .expect("compile");
        let outcome = p.find_match("git push --force origin main", "PREVENT-GIT-001", eval_deadline()).await;
        assert_eq!(outcome, EvalOutcome::Match { line: 1, column: 1 });

        let outcome = p
            .find_match(
                "git push --force-with-lease origin main",
                "PREVENT-GIT-001",
                eval_deadline(),
            )
            .await;
        assert_eq!(outcome, EvalOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_case_insensitive_flag() {
        let p = CompiledPattern::compile("drop\\s+table", "i", &limits()).expect("compile");
        let outcome = p.find_match("DROP TABLE users;", "SQL-001", eval_deadline()).await;
        assert!(matches!(outcome, EvalOutcome::Match { .. }));
    }

    #[tokio::test]
    async fn test_match_position_reports_line_and_column() {
        let p = CompiledPattern::compile("secret", "", &limits()).expect("compile");
        let outcome = p.find_match("line one\nthe secret here", "R-1", eval_deadline()).await;
        assert_eq!(outcome, EvalOutcome::Match { line: 2, column: 5 });
    }

    #[tokio::test]
    async fn test_catastrophic_backtracking_times_out() {
        // Classic pathological pattern; 30 'a's with no '!' forces
        // exponential backtracking in a backtracking engine.
        let p = CompiledPattern::compile("(a+)+!", "", &limits()).expect("compile");
        let input = format!("{}#", "a".repeat(30));
        let outcome = p.find_match(&input, "EVIL-001", eval_deadline()).await;
        assert_eq!(outcome, EvalOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_nul_bytes_do_not_panic() {
        let p = CompiledPattern::compile("rm -rf", "", &limits()).expect("compile");
        let outcome = p.find_match("echo \0\0 rm -rf /", "R-2", eval_deadline()).await;
        assert!(matches!(outcome, EvalOutcome::Match { .. }));
    }
}
