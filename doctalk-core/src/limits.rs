//! Tiered usage limits.
//!
//! Pure admission decisions over a static, process-wide tier table.
//! The engine owns no counters and reads no clock: callers pull a
//! usage snapshot from their store and pass it in, so the same inputs
//! always produce the same result.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Subscription tier, ordered cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Starter,
    Pro,
    Enterprise,
}

impl Tier {
    /// All tiers in ascending price order
    pub const ORDERED: [Tier; 3] = [Tier::Starter, Tier::Pro, Tier::Enterprise];

    /// The limit table for this tier
    pub fn limits(self) -> &'static TierLimits {
        match self {
            Tier::Starter => &STARTER_LIMITS,
            Tier::Pro => &PRO_LIMITS,
            Tier::Enterprise => &ENTERPRISE_LIMITS,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Starter => write!(f, "starter"),
            Tier::Pro => write!(f, "pro"),
            Tier::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Numeric ceilings and feature flags for one tier.
///
/// Invariant: every ceiling and every flag is monotonic non-decreasing
/// across `Tier::ORDERED`. The upgrade-suggestion scan relies on it.
#[derive(Debug, Clone, Serialize)]
pub struct TierLimits {
    pub seats: u64,
    pub documents: u64,
    pub storage_bytes: u64,
    pub monthly_tokens: u64,
    pub requests_per_minute: u64,
    pub connectors: bool,
    pub compliance_exports: bool,
    pub billing_portal: bool,
    pub sandbox_environments: bool,
    pub api_keys: bool,
}

impl TierLimits {
    /// Limit table for starter organizations
    #[must_use]
    pub const fn starter() -> Self {
        Self {
            seats: 3,
            documents: 10,
            storage_bytes: 100 * 1024 * 1024,
            monthly_tokens: 100_000,
            requests_per_minute: 10,
            connectors: false,
            compliance_exports: false,
            billing_portal: false,
            sandbox_environments: false,
            api_keys: false,
        }
    }

    /// Limit table for pro organizations
    #[must_use]
    pub const fn pro() -> Self {
        Self {
            seats: 10,
            documents: 200,
            storage_bytes: 10 * 1024 * 1024 * 1024,
            monthly_tokens: 2_000_000,
            requests_per_minute: 60,
            connectors: true,
            compliance_exports: false,
            billing_portal: true,
            sandbox_environments: false,
            api_keys: true,
        }
    }

    /// Limit table for enterprise organizations
    #[must_use]
    pub const fn enterprise() -> Self {
        Self {
            seats: 100,
            documents: 5_000,
            storage_bytes: 1024 * 1024 * 1024 * 1024,
            monthly_tokens: 50_000_000,
            requests_per_minute: 600,
            connectors: true,
            compliance_exports: true,
            billing_portal: true,
            sandbox_environments: true,
            api_keys: true,
        }
    }

    /// Ceiling for a numeric metric; `None` for feature flags
    pub fn ceiling(&self, metric: LimitMetric) -> Option<u64> {
        match metric {
            LimitMetric::SeatsCount => Some(self.seats),
            LimitMetric::DocumentsCount => Some(self.documents),
            LimitMetric::StorageBytes => Some(self.storage_bytes),
            LimitMetric::MonthlyTokens => Some(self.monthly_tokens),
            LimitMetric::RequestsPerMinute => Some(self.requests_per_minute),
            _ => None,
        }
    }

    /// Flag value for a feature metric; `None` for numeric ceilings
    pub fn feature(&self, metric: LimitMetric) -> Option<bool> {
        match metric {
            LimitMetric::Connectors => Some(self.connectors),
            LimitMetric::ComplianceExports => Some(self.compliance_exports),
            LimitMetric::BillingPortal => Some(self.billing_portal),
            LimitMetric::SandboxEnvironments => Some(self.sandbox_environments),
            LimitMetric::ApiKeys => Some(self.api_keys),
            _ => None,
        }
    }

    /// Whether this tier admits the projected value for `metric`
    fn admits(&self, metric: LimitMetric, projected: u64) -> bool {
        match self.ceiling(metric) {
            Some(limit) => projected <= limit,
            None => self.feature(metric).unwrap_or(false),
        }
    }
}

static STARTER_LIMITS: TierLimits = TierLimits::starter();
static PRO_LIMITS: TierLimits = TierLimits::pro();
static ENTERPRISE_LIMITS: TierLimits = TierLimits::enterprise();

/// A metered action or gated feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitMetric {
    SeatsCount,
    DocumentsCount,
    StorageBytes,
    MonthlyTokens,
    RequestsPerMinute,
    Connectors,
    ComplianceExports,
    BillingPortal,
    SandboxEnvironments,
    ApiKeys,
}

impl LimitMetric {
    /// Whether this metric is a boolean feature flag rather than a
    /// numeric ceiling
    pub fn is_feature(self) -> bool {
        matches!(
            self,
            LimitMetric::Connectors
                | LimitMetric::ComplianceExports
                | LimitMetric::BillingPortal
                | LimitMetric::SandboxEnvironments
                | LimitMetric::ApiKeys
        )
    }

    /// Fixed metric-to-error-code mapping for denial responses
    pub fn error_code(self) -> LimitErrorCode {
        match self {
            LimitMetric::SeatsCount => LimitErrorCode::SeatsExceeded,
            LimitMetric::DocumentsCount => LimitErrorCode::DocumentsExceeded,
            LimitMetric::StorageBytes => LimitErrorCode::StorageExceeded,
            LimitMetric::MonthlyTokens => LimitErrorCode::TokensExceeded,
            LimitMetric::RequestsPerMinute => LimitErrorCode::RateLimited,
            LimitMetric::Connectors
            | LimitMetric::ComplianceExports
            | LimitMetric::BillingPortal
            | LimitMetric::SandboxEnvironments
            | LimitMetric::ApiKeys => LimitErrorCode::FeatureUnavailable,
        }
    }
}

/// Machine-readable denial code, derived from the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitErrorCode {
    SeatsExceeded,
    DocumentsExceeded,
    StorageExceeded,
    TokensExceeded,
    RateLimited,
    FeatureUnavailable,
    /// Generic code for metrics outside the fixed mapping
    LimitExceeded,
}

/// Outcome of a limit check.
///
/// A denial always carries the exceeded metric, the usage/limit pair,
/// and (when a higher tier would admit the action) an upgrade
/// suggestion, so callers can render a specific prompt rather than a
/// bare "forbidden".
#[derive(Debug, Clone, Serialize)]
pub struct LimitCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceeded_metric: Option<LimitMetric>,
    pub current_usage: u64,
    pub limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<LimitErrorCode>,
}

impl LimitCheckResult {
    fn allowed(current_usage: u64, limit: u64) -> Self {
        Self {
            allowed: true,
            exceeded_metric: None,
            current_usage,
            limit,
            suggested_tier: None,
            error_code: None,
        }
    }
}

/// Decide whether an organization on `tier` may perform a metered
/// action.
///
/// For a numeric metric the projected value is `current_usage +
/// increment`; for a feature flag the snapshot and increment are
/// ignored and the flag alone decides. On denial, `suggested_tier` is
/// the cheapest tier strictly above the current one that would admit
/// the action, if any.
///
/// Pure over its arguments and the static tier table: no clock, no
/// counters, no side effects beyond a `warn!` on denial.
pub fn check_limit(
    tier: Tier,
    metric: LimitMetric,
    current_usage: u64,
    increment: u64,
) -> LimitCheckResult {
    let limits = tier.limits();

    if let Some(enabled) = limits.feature(metric) {
        if enabled {
            return LimitCheckResult::allowed(0, 0);
        }
        warn!(%tier, ?metric, "feature not available on tier");
        return LimitCheckResult {
            allowed: false,
            exceeded_metric: Some(metric),
            current_usage: 0,
            limit: 0,
            suggested_tier: suggest_upgrade(tier, metric, 0),
            error_code: Some(metric.error_code()),
        };
    }

    let limit = limits.ceiling(metric).unwrap_or(0);
    let projected = current_usage.saturating_add(increment);

    if projected <= limit {
        return LimitCheckResult::allowed(current_usage, limit);
    }

    warn!(
        %tier,
        ?metric,
        current_usage,
        limit,
        "usage limit exceeded"
    );
    LimitCheckResult {
        allowed: false,
        exceeded_metric: Some(metric),
        current_usage,
        limit,
        suggested_tier: suggest_upgrade(tier, metric, projected),
        error_code: Some(metric.error_code()),
    }
}

/// Convenience wrapper for the common single-unit increment.
pub fn check_limit_one(tier: Tier, metric: LimitMetric, current_usage: u64) -> LimitCheckResult {
    check_limit(tier, metric, current_usage, 1)
}

/// First tier strictly above `tier` that admits `projected` for
/// `metric`. Relies on the monotonicity invariant: once a tier
/// admits, every higher tier does too, so the first hit is the
/// cheapest remedy.
fn suggest_upgrade(tier: Tier, metric: LimitMetric, projected: u64) -> Option<Tier> {
    Tier::ORDERED
        .into_iter()
        .filter(|candidate| *candidate > tier)
        .find(|candidate| candidate.limits().admits(metric, projected))
}

/// Percentage of a ceiling consumed, capped at 100. Display only.
pub fn usage_percent(current: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    ((current as f64 / limit as f64) * 100.0).min(100.0)
}

/// Whether usage has crossed the 80% warning threshold. Display only.
pub fn approaching_limit(current: u64, limit: u64) -> bool {
    usage_percent(current, limit) >= 80.0
}

/// Format a byte count with the largest unit that is >= 1, one
/// decimal place above bytes.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
