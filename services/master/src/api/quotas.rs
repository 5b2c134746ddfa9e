//! Instance quotas, checked against the cached `/scheduled-stats` aggregate.

use std::collections::BTreeMap;

use treadmill_store::{json, Backend};

use crate::config::QuotaLimits;
use crate::{paths, MasterResult, QuotaExceeded};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDimension {
    Total,
    Proid,
}

impl QuotaDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Proid => "proid",
        }
    }

    pub fn limit(&self, limits: &QuotaLimits) -> u64 {
        match self {
            Self::Total => limits.total,
            Self::Proid => limits.per_proid,
        }
    }
}

/// Scheduled instance counts by proid, as last published by the master.
pub async fn scheduled_stats(store: &dyn Backend) -> MasterResult<BTreeMap<String, u64>> {
    Ok(json::get_json(store, paths::SCHEDULED_STATS)
        .await?
        .unwrap_or_default())
}

pub fn current_usage(
    stats: &BTreeMap<String, u64>,
    proid: &str,
    dimension: QuotaDimension,
) -> u64 {
    match dimension {
        QuotaDimension::Total => stats.values().fold(0u64, |acc, n| acc.saturating_add(*n)),
        QuotaDimension::Proid => stats.get(proid).copied().unwrap_or_default(),
    }
}

/// Checks the total quota, then the proid quota.
pub fn check_quota(
    stats: &BTreeMap<String, u64>,
    limits: &QuotaLimits,
    proid: &str,
    requested_delta: u64,
) -> Option<QuotaExceeded> {
    [QuotaDimension::Total, QuotaDimension::Proid]
        .into_iter()
        .find_map(|dimension| {
            let limit = dimension.limit(limits);
            let current_usage = current_usage(stats, proid, dimension);
            (current_usage.saturating_add(requested_delta) > limit).then(|| QuotaExceeded {
                dimension: match dimension {
                    QuotaDimension::Total => dimension.as_str().to_string(),
                    QuotaDimension::Proid => format!("{}:{proid}", dimension.as_str()),
                },
                limit,
                current_usage,
                requested_delta,
            })
        })
}
