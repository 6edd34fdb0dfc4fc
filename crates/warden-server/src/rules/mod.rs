// crates/warden-server/src/rules/mod.rs
// Rule store: cached active-rule lookups, hash-keyed compiled patterns,
// write-through invalidation.

pub mod compiler;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use warden_types::{PreventionRule, RuleCategory};

pub use compiler::{CompileError, CompiledPattern, EvalOutcome, pattern_hash};

use crate::cache::CacheHandle;
use crate::config::{CacheTtlConfig, PatternConfig};
use crate::error::{Result, WardenError};
use crate::resilience::Resilience;
use crate::stores::{ProjectStore, RuleStore as RuleStorePort, Stores};

/// Shared-keyspace key for a project's active rule list.
fn project_rules_key(slug: &str) -> String {
    format!("rules:project:{slug}")
}

/// Component owning rule lookups and pattern compilation.
///
/// Compiled patterns are immutable and cached by `pattern_hash`; a rule
/// edit produces a new hash, so stale compiled entries are unreachable
/// rather than invalid. Project rule lists live in the shared cache under
/// a short TTL and are flushed on any rule write.
pub struct RuleCatalog {
    stores: Stores,
    resilience: Resilience,
    cache: CacheHandle,
    compiled: moka::future::Cache<String, Arc<CompiledPattern>>,
    limits: PatternConfig,
    rules_ttl: Duration,
}

impl RuleCatalog {
    pub fn new(
        stores: Stores,
        resilience: Resilience,
        cache: CacheHandle,
        limits: PatternConfig,
        ttl: &CacheTtlConfig,
    ) -> Self {
        Self {
            stores,
            resilience,
            cache,
            compiled: moka::future::Cache::new(4096),
            limits,
            rules_ttl: ttl.rules,
        }
    }

    pub fn limits(&self) -> &PatternConfig {
        &self.limits
    }

    /// Per-input evaluation deadline for compiled patterns.
    pub fn eval_deadline(&self) -> Duration {
        Duration::from_millis(self.limits.max_eval_ms.max(1))
    }

    /// Active rules for a project: shared cache first, then the database
    /// under the breaker. Cache failures never fail the lookup.
    pub async fn active_rules(
        &self,
        cancel: &CancellationToken,
        slug: &str,
    ) -> Result<Vec<PreventionRule>> {
        let key = project_rules_key(slug);
        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<Vec<PreventionRule>>(&raw) {
                Ok(rules) => return Ok(rules),
                Err(e) => {
                    tracing::warn!(slug, "corrupt cached rule list, refetching: {}", e);
                    self.cache.del(&key).await;
                }
            }
        }

        let stores = self.stores.clone();
        let slug_owned = slug.to_string();
        let rules = self
            .resilience
            .db
            .read(cancel, || {
                let stores = stores.clone();
                let slug = slug_owned.clone();
                async move { stores.projects.get_active_rules(&slug).await }
            })
            .await?;

        if let Ok(raw) = serde_json::to_string(&rules) {
            self.cache.set(&key, &raw, self.rules_ttl).await;
        }
        Ok(rules)
    }

    /// Active rules filtered by tool category. `General` rules apply to
    /// every category.
    pub async fn active_rules_for_category(
        &self,
        cancel: &CancellationToken,
        slug: &str,
        category: RuleCategory,
    ) -> Result<Vec<PreventionRule>> {
        let rules = self.active_rules(cancel, slug).await?;
        Ok(rules
            .into_iter()
            .filter(|r| r.category == category || r.category == RuleCategory::General)
            .collect())
    }

    /// All enabled rules regardless of project (read-only resources).
    pub async fn list_enabled(
        &self,
        cancel: &CancellationToken,
        category: Option<RuleCategory>,
    ) -> Result<Vec<PreventionRule>> {
        let stores = self.stores.clone();
        self.resilience
            .db
            .read(cancel, || {
                let stores = stores.clone();
                async move { stores.rules.list_enabled(category).await }
            })
            .await
    }

    /// Compiled form of a rule, via the hash-keyed cache. A rule whose
    /// stored hash no longer matches its pattern is recompiled and logged;
    /// the stored hash is authoritative only for cache addressing.
    pub async fn compiled(&self, rule: &PreventionRule) -> Result<Arc<CompiledPattern>> {
        let expected = pattern_hash(&rule.pattern, &rule.flags);
        if expected != rule.pattern_hash {
            tracing::warn!(
                rule_id = %rule.rule_id,
                "stored pattern_hash is stale; recompiling under current hash"
            );
        }
        self.compile_source(&rule.pattern, &rule.flags).await
    }

    /// Compile an arbitrary pattern (failure-registry regression filters
    /// share the compiled cache with rules).
    pub async fn compile_source(&self, pattern: &str, flags: &str) -> Result<Arc<CompiledPattern>> {
        let hash = pattern_hash(pattern, flags);
        let limits = self.limits.clone();
        let pattern = pattern.to_string();
        let flags = flags.to_string();
        self.compiled
            .try_get_with(hash, async move {
                CompiledPattern::compile(&pattern, &flags, &limits)
            })
            .await
            .map_err(|e: Arc<CompileError>| WardenError::InvalidInput(e.to_string()))
    }

    /// Admit and persist a rule: compile under the limits, recompute the
    /// hash, write through the breaker, flush the project rule lists.
    pub async fn upsert_rule(&self, mut rule: PreventionRule) -> Result<PreventionRule> {
        CompiledPattern::compile(&rule.pattern, &rule.flags, &self.limits)
            .map_err(|e| WardenError::InvalidInput(e.to_string()))?;
        rule.pattern_hash = pattern_hash(&rule.pattern, &rule.flags);

        let stores = self.stores.clone();
        let to_store = rule.clone();
        self.resilience
            .db
            .write(async move { stores.rules.upsert(&to_store).await })
            .await?;

        self.invalidate_all().await;
        Ok(rule)
    }

    /// Delete a rule and flush the project rule lists.
    pub async fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        let stores = self.stores.clone();
        let rule_id = rule_id.to_string();
        let existed = self
            .resilience
            .db
            .write(async move { stores.rules.delete(&rule_id).await })
            .await?;
        self.invalidate_all().await;
        Ok(existed)
    }

    /// Flush every cached project rule list. Compiled patterns stay: they
    /// are addressed by content hash and cannot go stale.
    pub async fn invalidate_all(&self) {
        self.cache.del_prefix("rules:project:").await;
    }

    /// Flush one project's cached rule list.
    pub async fn invalidate_project(&self, slug: &str) {
        self.cache.del(&project_rules_key(slug)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::Config;
    use crate::stores::RuleStore;
    use crate::stores::memory::MemoryStores;
    use serde_json::Value;
    use uuid::Uuid;
    use warden_types::{Project, Severity};

    fn rule(id: &str, pattern: &str) -> PreventionRule {
        PreventionRule {
            rule_id: id.to_string(),
            name: id.to_string(),
            pattern: pattern.to_string(),
            flags: String::new(),
            pattern_hash: String::new(),
            message: format!("{id} matched"),
            severity: Severity::Error,
            enabled: true,
            category: RuleCategory::Bash,
            suggestion: None,
        }
    }

    fn catalog(stores: &MemoryStores) -> RuleCatalog {
        let config = Config::default();
        RuleCatalog::new(
            stores.bundle(),
            Resilience::new(&config),
            CacheHandle::new(Arc::new(MemoryCache::default())),
            config.pattern.clone(),
            &config.cache_ttl,
        )
    }

    fn project(slug: &str, rules: &[&str]) -> Project {
        Project {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: slug.to_string(),
            guardrail_context: String::new(),
            active_rules: rules.iter().map(|s| s.to_string()).collect(),
            metadata: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_upsert_computes_hash_and_admits() {
        let stores = MemoryStores::new();
        let catalog = catalog(&stores);

        let stored = catalog.upsert_rule(rule("R-1", "rm\\s+-rf")).await.unwrap();
        assert_eq!(stored.pattern_hash, pattern_hash("rm\\s+-rf", ""));
        assert!(
            stores
                .rules
                .get_by_rule_id("R-1")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_upsert_rejects_oversized_pattern() {
        let stores = MemoryStores::new();
        let catalog = catalog(&stores);
        let err = catalog
            .upsert_rule(rule("R-2", &"a".repeat(5000)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        // Never persisted
        assert!(stores.rules.get_by_rule_id("R-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_rules_cached_then_invalidated() {
        let stores = MemoryStores::new();
        let catalog = catalog(&stores);
        let cancel = CancellationToken::new();

        catalog.upsert_rule(rule("R-1", "foo")).await.unwrap();
        stores.projects.insert(project("p", &["R-1"]));

        let first = catalog.active_rules(&cancel, "p").await.unwrap();
        assert_eq!(first.len(), 1);

        // A write that bypassed the cache would be invisible until TTL;
        // upsert_rule flushes, so the next read sees the change.
        catalog.upsert_rule(rule("R-2", "bar")).await.unwrap();
        stores.projects.insert(project("p", &["R-1", "R-2"]));
        let second = catalog.active_rules(&cancel, "p").await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_category_filter_includes_general() {
        let stores = MemoryStores::new();
        let catalog = catalog(&stores);
        let cancel = CancellationToken::new();

        let mut bash = rule("B-1", "foo");
        bash.category = RuleCategory::Bash;
        let mut git = rule("G-1", "bar");
        git.category = RuleCategory::Git;
        let mut general = rule("ALL-1", "baz");
        general.category = RuleCategory::General;
        for r in [bash, git, general] {
            catalog.upsert_rule(r).await.unwrap();
        }
        stores.projects.insert(project("p", &["B-1", "G-1", "ALL-1"]));

        let rules = catalog
            .active_rules_for_category(&cancel, "p", RuleCategory::Bash)
            .await
            .unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["B-1", "ALL-1"]);
    }

    #[tokio::test]
    async fn test_delete_rule_flushes_project_lists() {
        let stores = MemoryStores::new();
        let catalog = catalog(&stores);
        let cancel = CancellationToken::new();

        catalog.upsert_rule(rule("R-1", "foo")).await.unwrap();
        stores.projects.insert(project("p", &["R-1"]));
        assert_eq!(catalog.active_rules(&cancel, "p").await.unwrap().len(), 1);
        assert_eq!(catalog.list_enabled(&cancel, None).await.unwrap().len(), 1);

        assert!(catalog.delete_rule("R-1").await.unwrap());
        assert!(!catalog.delete_rule("R-1").await.unwrap());
        assert!(catalog.active_rules(&cancel, "p").await.unwrap().is_empty());
        assert!(catalog.list_enabled(&cancel, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compiled_cache_shares_by_hash() {
        let stores = MemoryStores::new();
        let catalog = catalog(&stores);

        let a = catalog.compile_source("same", "").await.unwrap();
        let b = catalog.compile_source("same", "").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = catalog.compile_source("same", "i").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
