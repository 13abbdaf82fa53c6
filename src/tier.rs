//! Subscription tier → caching policy.
//!
//! | Tier         | Strategy        | Default TTL | Force live |
//! |--------------|-----------------|-------------|------------|
//! | starter      | cache-only      | 90 days     | no         |
//! | professional | cache-preferred | 45 days     | no         |
//! | enterprise   | live-refresh    | 21 days     | yes        |
//! | compliance   | live-refresh    | 14 days     | yes        |
//!
//! TTL precedence is explicit seconds, then explicit days, then the table
//! default, and the result never drops below [`MIN_TTL_SECONDS`]. Overrides
//! come from configuration (`tiers.<tier>.ttl_seconds|ttl_days`) and from
//! `<PREFIX>_<TIER>_SECONDS|_DAYS` environment variables, the latter winning.

use crate::config::{TierTtlConfig, TiersConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Floor applied to every TTL, resolved or stored
pub const MIN_TTL_SECONDS: u64 = 60;

pub const DEFAULT_TTL_ENV_PREFIX: &str = "PROSPECT_CACHE_TTL";

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Starter,
    #[default]
    Professional,
    Enterprise,
    Compliance,
}

impl Tier {
    /// Match order for substring resolution
    pub const ALL: [Tier; 4] = [
        Tier::Starter,
        Tier::Professional,
        Tier::Enterprise,
        Tier::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Starter => "starter",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
            Tier::Compliance => "compliance",
        }
    }

    /// Resolve a free-form tier identifier such as `"Enterprise-Annual"`.
    ///
    /// Case-insensitive substring match in [`Tier::ALL`] order; anything
    /// unrecognized, empty or absent resolves to `Professional`.
    pub fn from_identifier(identifier: Option<&str>) -> Tier {
        let Some(identifier) = identifier else {
            return Tier::default();
        };
        let lowered = identifier.to_lowercase();
        Tier::ALL
            .into_iter()
            .find(|tier| lowered.contains(tier.as_str()))
            .unwrap_or_default()
    }

    pub fn strategy(&self) -> CacheStrategy {
        match self {
            Tier::Starter => CacheStrategy::CacheOnly,
            Tier::Professional => CacheStrategy::CachePreferred,
            Tier::Enterprise | Tier::Compliance => CacheStrategy::LiveRefresh,
        }
    }

    pub fn default_ttl_days(&self) -> u32 {
        match self {
            Tier::Starter => 90,
            Tier::Professional => 45,
            Tier::Enterprise => 21,
            Tier::Compliance => 14,
        }
    }

    pub fn force_live_lookup(&self) -> bool {
        matches!(self, Tier::Enterprise | Tier::Compliance)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Serve any unexpired cached value; never call the live service
    CacheOnly,
    /// Serve cache when present, otherwise call live and refresh
    CachePreferred,
    /// Always call live and refresh the cache
    LiveRefresh,
}

impl CacheStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStrategy::CacheOnly => "cache-only",
            CacheStrategy::CachePreferred => "cache-preferred",
            CacheStrategy::LiveRefresh => "live-refresh",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCachePolicy {
    pub tier: Tier,
    pub strategy: CacheStrategy,
    pub ttl_seconds: u64,
    pub force_live_lookup: bool,
}

impl TierCachePolicy {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Whether the cache is consulted before any live call
    pub fn reads_cache_first(&self) -> bool {
        !(self.strategy == CacheStrategy::LiveRefresh && self.force_live_lookup)
    }

    /// Whether a live call may be made at all
    pub fn allows_live_call(&self) -> bool {
        self.strategy != CacheStrategy::CacheOnly
    }
}

/// Seconds/days override for one tier
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TierTtlOverride {
    pub seconds: Option<f64>,
    pub days: Option<f64>,
}

impl TierTtlOverride {
    fn from_config(config: &TierTtlConfig) -> Self {
        Self {
            seconds: config.ttl_seconds.filter(|v| usable(*v)),
            days: config.ttl_days.filter(|v| usable(*v)),
        }
    }

    /// Field-wise overlay; values present in `other` win
    fn overlay(self, other: TierTtlOverride) -> Self {
        Self {
            seconds: other.seconds.or(self.seconds),
            days: other.days.or(self.days),
        }
    }
}

fn usable(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn days_to_seconds(days: f64) -> u64 {
    (days * SECONDS_PER_DAY).round() as u64
}

/// Per-tier TTL overrides collected from configuration and environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierTtlOverrides {
    overrides: HashMap<Tier, TierTtlOverride>,
}

impl TierTtlOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TiersConfig) -> Self {
        let mut overrides = HashMap::new();
        for (tier, ttl) in [
            (Tier::Starter, &config.starter),
            (Tier::Professional, &config.professional),
            (Tier::Enterprise, &config.enterprise),
            (Tier::Compliance, &config.compliance),
        ] {
            let parsed = TierTtlOverride::from_config(ttl);
            if parsed != TierTtlOverride::default() {
                overrides.insert(tier, parsed);
            }
        }
        Self { overrides }
    }

    /// Read `<prefix>_<TIER>_SECONDS` and `<prefix>_<TIER>_DAYS` from the process environment
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Same as [`TierTtlOverrides::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: String| -> Option<f64> {
            let raw = lookup(&name)?;
            match raw.trim().parse::<f64>() {
                Ok(value) if usable(value) => Some(value),
                _ => {
                    warn!(variable = %name, value = %raw, "Ignoring invalid tier TTL override");
                    None
                }
            }
        };

        let mut overrides = HashMap::new();
        for tier in Tier::ALL {
            let upper = tier.as_str().to_uppercase();
            let parsed = TierTtlOverride {
                seconds: parse(format!("{prefix}_{upper}_SECONDS")),
                days: parse(format!("{prefix}_{upper}_DAYS")),
            };
            if parsed != TierTtlOverride::default() {
                overrides.insert(tier, parsed);
            }
        }
        Self { overrides }
    }

    /// Configuration overrides with environment overrides layered on top
    pub fn layered(config: &TiersConfig) -> Self {
        Self::from_config(config).overlay(&Self::from_env(&config.ttl_env_prefix))
    }

    pub fn overlay(mut self, other: &TierTtlOverrides) -> Self {
        for (tier, ttl) in &other.overrides {
            let merged = self.get(*tier).overlay(*ttl);
            self.overrides.insert(*tier, merged);
        }
        self
    }

    pub fn with_seconds(mut self, tier: Tier, seconds: f64) -> Self {
        let entry = self.overrides.entry(tier).or_default();
        entry.seconds = usable(seconds).then_some(seconds);
        self
    }

    pub fn with_days(mut self, tier: Tier, days: f64) -> Self {
        let entry = self.overrides.entry(tier).or_default();
        entry.days = usable(days).then_some(days);
        self
    }

    pub fn get(&self, tier: Tier) -> TierTtlOverride {
        self.overrides.get(&tier).copied().unwrap_or_default()
    }

    /// Effective TTL for a tier: seconds, then days, then default; floored at 60s
    pub fn ttl_seconds_for(&self, tier: Tier) -> u64 {
        let ttl = self.get(tier);
        let seconds = match (ttl.seconds, ttl.days) {
            (Some(seconds), _) => seconds.round() as u64,
            (None, Some(days)) => days_to_seconds(days),
            (None, None) => days_to_seconds(f64::from(tier.default_ttl_days())),
        };
        seconds.max(MIN_TTL_SECONDS)
    }
}

/// Maps tier identifiers to caching policies
#[derive(Debug, Clone, Default)]
pub struct TierPolicyResolver {
    overrides: TierTtlOverrides,
}

impl TierPolicyResolver {
    pub fn new(overrides: TierTtlOverrides) -> Self {
        Self { overrides }
    }

    /// Resolver with configuration and environment overrides applied
    pub fn from_config(config: &TiersConfig) -> Self {
        Self::new(TierTtlOverrides::layered(config))
    }

    pub fn overrides(&self) -> &TierTtlOverrides {
        &self.overrides
    }

    pub fn resolve(&self, tier_identifier: Option<&str>) -> TierCachePolicy {
        self.resolve_tier(Tier::from_identifier(tier_identifier))
    }

    pub fn resolve_tier(&self, tier: Tier) -> TierCachePolicy {
        TierCachePolicy {
            tier,
            strategy: tier.strategy(),
            ttl_seconds: self.overrides.ttl_seconds_for(tier),
            force_live_lookup: tier.force_live_lookup(),
        }
    }
}

/// Resolve a policy using only environment overrides under the default prefix.
///
/// The environment is re-read on every call.
pub fn resolve_tier_cache_policy(tier_identifier: Option<&str>) -> TierCachePolicy {
    TierPolicyResolver::new(TierTtlOverrides::from_env(DEFAULT_TTL_ENV_PREFIX))
        .resolve(tier_identifier)
}
