//! Configuration validation rules.
//!
//! Every proposed [`InstanceConfig`] runs through the full active rule set before it is
//! applied. Rules never short-circuit each other: the report carries the outcome of
//! every rule. Overall validity is decided by `error`-severity rules only; `warning`
//! and `info` rules contribute issues, suggestions and score.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::InstanceConfig;

/// Hard capacity ceiling accepted by `capacity_bounds`
pub const MAX_CAPACITY: usize = 1_000_000;

/// Longest default TTL accepted by `ttl_bounds` (7 days)
pub const MAX_DEFAULT_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Shortest cleanup interval accepted by `cleanup_interval`
pub const MIN_CLEANUP_INTERVAL_MS: u64 = 100;

/// Default aggregate memory budget for all instances (256 MiB)
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Rule severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    Error,
    Warning,
    Info,
}

/// Rule category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Capacity,
    Expiration,
    Maintenance,
    Resources,
    Profile,
    Custom,
}

/// A single finding, tied to the config field it refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub severity: RuleSeverity,
    pub message: String,
}

/// Result of evaluating one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub valid: bool,
    /// 0 - 100
    pub score: f64,
    pub issues: Vec<ValidationIssue>,
    pub suggestions: Vec<String>,
}

impl RuleOutcome {
    /// Passing outcome with full score
    pub fn pass() -> Self {
        Self {
            valid: true,
            score: 100.0,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Failing outcome with zero score and one issue
    pub fn fail(field: &str, severity: RuleSeverity, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            score: 0.0,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
        .with_issue(field, severity, message)
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 100.0);
        self
    }

    pub fn with_issue(mut self, field: &str, severity: RuleSeverity, message: impl Into<String>) -> Self {
        self.issues.push(ValidationIssue {
            field: field.to_string(),
            severity,
            message: message.into(),
        });
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }
}

/// Cross-instance context handed to every rule
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Live configs of every other instance
    pub others: Vec<InstanceConfig>,
    /// Aggregate memory budget across all instances
    pub memory_budget_bytes: usize,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            others: Vec::new(),
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
        }
    }
}

impl ValidationContext {
    pub fn with_others(mut self, others: Vec<InstanceConfig>) -> Self {
        self.others = others;
        self
    }
}

/// A pluggable validation rule
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn severity(&self) -> RuleSeverity;

    fn category(&self) -> RuleCategory;

    fn evaluate(&self, config: &InstanceConfig, ctx: &ValidationContext) -> RuleOutcome;
}

/// Outcome of one rule inside a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: String,
    pub severity: RuleSeverity,
    pub category: RuleCategory,
    pub outcome: RuleOutcome,
}

/// Aggregated validation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub instance: String,
    /// AND of every error-severity rule
    pub valid: bool,
    /// Mean rule score
    pub score: f64,
    pub results: Vec<RuleResult>,
}

impl ValidationReport {
    fn from_results(instance: &str, results: Vec<RuleResult>) -> Self {
        let valid = results
            .iter()
            .filter(|r| r.severity == RuleSeverity::Error)
            .all(|r| r.outcome.valid);
        let score = if results.is_empty() {
            100.0
        } else {
            results.iter().map(|r| r.outcome.score).sum::<f64>() / results.len() as f64
        };

        Self {
            instance: instance.to_string(),
            valid,
            score,
            results,
        }
    }

    /// All issues across every rule
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.results.iter().flat_map(|r| r.outcome.issues.iter())
    }

    /// Issues raised by failing error-severity rules
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.results
            .iter()
            .filter(|r| r.severity == RuleSeverity::Error && !r.outcome.valid)
            .flat_map(|r| r.outcome.issues.iter())
            .filter(|i| i.severity == RuleSeverity::Error)
            .collect()
    }

    /// Whether any issue refers to `field`
    pub fn has_issue_on(&self, field: &str) -> bool {
        self.issues().any(|i| i.field == field)
    }

    pub fn suggestions(&self) -> Vec<&str> {
        self.results
            .iter()
            .flat_map(|r| r.outcome.suggestions.iter().map(String::as_str))
            .collect()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        let errors = self.errors();
        if errors.is_empty() {
            return format!(
                "{} rule(s) passed, score {:.0}",
                self.results.len(),
                self.score
            );
        }
        let details: Vec<String> = errors
            .iter()
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect();
        format!("{} (score {:.0})", details.join("; "), self.score)
    }
}

/// Ordered set of active rules
#[derive(Clone)]
pub struct Validator {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::with_builtin_rules()
    }
}

impl Validator {
    /// Validator with no rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Validator with every built-in rule
    pub fn with_builtin_rules() -> Self {
        Self {
            rules: vec![
                Arc::new(CapacityBoundsRule),
                Arc::new(TtlBoundsRule),
                Arc::new(CleanupIntervalRule),
                Arc::new(MemoryBudgetRule),
                Arc::new(InstanceProfileRule),
            ],
        }
    }

    /// Add a rule, replacing any rule with the same name
    pub fn add_rule(&mut self, rule: Arc<dyn ValidationRule>) {
        if let Some(pos) = self.rules.iter().position(|r| r.name() == rule.name()) {
            self.rules[pos] = rule;
        } else {
            self.rules.push(rule);
        }
    }

    /// Remove a rule by name
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != name);
        before != self.rules.len()
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name().to_string()).collect()
    }

    /// Evaluate `config` against the active rules
    ///
    /// When `only` is given, just the named rules run; unknown names are ignored.
    pub fn validate(
        &self,
        config: &InstanceConfig,
        ctx: &ValidationContext,
        only: Option<&[&str]>,
    ) -> ValidationReport {
        let results = self
            .rules
            .iter()
            .filter(|rule| only.map(|names| names.contains(&rule.name())).unwrap_or(true))
            .map(|rule| RuleResult {
                rule: rule.name().to_string(),
                severity: rule.severity(),
                category: rule.category(),
                outcome: rule.evaluate(config, ctx),
            })
            .collect();

        ValidationReport::from_results(&config.instance_type, results)
    }
}

// -------------------------------------------------------------------------
// Built-in rules
// -------------------------------------------------------------------------

/// `max_size` must be within `1..=MAX_CAPACITY`
#[derive(Debug, Default)]
pub struct CapacityBoundsRule;

impl ValidationRule for CapacityBoundsRule {
    fn name(&self) -> &str {
        "capacity_bounds"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Error
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Capacity
    }

    fn evaluate(&self, config: &InstanceConfig, _ctx: &ValidationContext) -> RuleOutcome {
        if config.max_size == 0 {
            return RuleOutcome::fail("max_size", RuleSeverity::Error, "max_size must be at least 1")
                .with_suggestion("use a max_size of at least 100 for a useful hit rate");
        }
        if config.max_size > MAX_CAPACITY {
            return RuleOutcome::fail(
                "max_size",
                RuleSeverity::Error,
                format!("max_size {} exceeds the limit of {}", config.max_size, MAX_CAPACITY),
            );
        }
        if config.max_size < 10 {
            return RuleOutcome::pass()
                .with_score(80.0)
                .with_suggestion(format!(
                    "max_size {} is very small; most entries will be evicted",
                    config.max_size
                ));
        }
        RuleOutcome::pass()
    }
}

/// A default TTL, when set, must be in `(0, 7 days]`
#[derive(Debug, Default)]
pub struct TtlBoundsRule;

impl ValidationRule for TtlBoundsRule {
    fn name(&self) -> &str {
        "ttl_bounds"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Error
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Expiration
    }

    fn evaluate(&self, config: &InstanceConfig, _ctx: &ValidationContext) -> RuleOutcome {
        match config.default_ttl_ms {
            Some(0) => RuleOutcome::fail(
                "default_ttl",
                RuleSeverity::Error,
                "default_ttl must be greater than zero",
            ),
            Some(ttl) if ttl > MAX_DEFAULT_TTL_MS => RuleOutcome::fail(
                "default_ttl",
                RuleSeverity::Error,
                format!("default_ttl {}ms exceeds 7 days", ttl),
            ),
            Some(_) => RuleOutcome::pass(),
            None => RuleOutcome::pass()
                .with_score(90.0)
                .with_suggestion("no default_ttl: entries only expire when written with an explicit TTL"),
        }
    }
}

/// Cleanup interval must be at least 100ms and should not exceed the default TTL
#[derive(Debug, Default)]
pub struct CleanupIntervalRule;

impl ValidationRule for CleanupIntervalRule {
    fn name(&self) -> &str {
        "cleanup_interval"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Error
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Maintenance
    }

    fn evaluate(&self, config: &InstanceConfig, _ctx: &ValidationContext) -> RuleOutcome {
        if config.cleanup_interval_ms < MIN_CLEANUP_INTERVAL_MS {
            return RuleOutcome::fail(
                "cleanup_interval",
                RuleSeverity::Error,
                format!(
                    "cleanup_interval {}ms is below the minimum of {}ms",
                    config.cleanup_interval_ms, MIN_CLEANUP_INTERVAL_MS
                ),
            );
        }

        match config.default_ttl_ms {
            Some(ttl) if config.cleanup_interval_ms > ttl => RuleOutcome::pass()
                .with_score(70.0)
                .with_issue(
                    "cleanup_interval",
                    RuleSeverity::Warning,
                    format!(
                        "cleanup_interval {}ms is longer than default_ttl {}ms; expired entries linger",
                        config.cleanup_interval_ms, ttl
                    ),
                )
                .with_suggestion("set cleanup_interval to at most the default TTL"),
            _ => RuleOutcome::pass(),
        }
    }
}

/// Aggregate estimated memory of all instances must fit the budget
#[derive(Debug, Default)]
pub struct MemoryBudgetRule;

impl ValidationRule for MemoryBudgetRule {
    fn name(&self) -> &str {
        "memory_budget"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Warning
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Resources
    }

    fn evaluate(&self, config: &InstanceConfig, ctx: &ValidationContext) -> RuleOutcome {
        let others: usize = ctx
            .others
            .iter()
            .filter(|c| c.instance_type != config.instance_type)
            .map(InstanceConfig::estimated_memory_usage)
            .sum();
        let total = others.saturating_add(config.estimated_memory_usage());
        let budget = ctx.memory_budget_bytes.max(1);

        if total <= budget {
            return RuleOutcome::pass();
        }

        let over = total as f64 / budget as f64;
        RuleOutcome::pass()
            .invalid()
            .with_score(100.0 / over)
            .with_issue(
                "max_size",
                RuleSeverity::Warning,
                format!(
                    "estimated memory of all instances ({} bytes) exceeds budget ({} bytes)",
                    total, budget
                ),
            )
            .with_suggestion("reduce max_size or raise the memory budget")
    }
}

/// Per-instance-type guidance
#[derive(Debug, Default)]
pub struct InstanceProfileRule;

impl ValidationRule for InstanceProfileRule {
    fn name(&self) -> &str {
        "instance_profile"
    }

    fn severity(&self) -> RuleSeverity {
        RuleSeverity::Info
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Profile
    }

    fn evaluate(&self, config: &InstanceConfig, _ctx: &ValidationContext) -> RuleOutcome {
        let mut outcome = RuleOutcome::pass();
        let ttl = config.default_ttl_ms;

        match config.instance_type.as_str() {
            "session" => {
                if ttl.map(|t| t < 5 * 60 * 1000).unwrap_or(false) {
                    outcome = outcome
                        .invalid()
                        .with_score(80.0)
                        .with_issue(
                            "default_ttl",
                            RuleSeverity::Info,
                            "session caches usually keep entries for at least 5 minutes",
                        )
                        .with_suggestion("raise default_ttl to 30 minutes for session data");
                }
            }
            "api" => {
                if ttl.map(|t| t > 10 * 60 * 1000).unwrap_or(true) {
                    outcome = outcome
                        .invalid()
                        .with_score(85.0)
                        .with_issue(
                            "default_ttl",
                            RuleSeverity::Info,
                            "api response caches usually expire within 10 minutes",
                        )
                        .with_suggestion("use a short default_ttl (about 1 minute) for api responses");
                }
            }
            "user" => {
                if config.max_size < 100 {
                    outcome = outcome
                        .with_score(90.0)
                        .with_suggestion("user caches benefit from max_size of at least 100");
                }
            }
            _ => {}
        }

        outcome
    }
}
