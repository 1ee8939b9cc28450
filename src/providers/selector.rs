//! # Provider Selector
//!
//! Ranks the enabled providers of a channel and picks one.
//!
//! `score = priority + 1000 / max(avg_response_ms, 1)`; the highest score
//! wins and configuration order breaks ties. A provider counts as available
//! when its circuit admits traffic and it is not inside a failure cool-down.
//! When nothing is available the selector still returns the provider that
//! has gone longest without failing, so a fully degraded channel is never
//! locked out permanently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ProviderEntry, ProvidersConfig};
use crate::constants::selection;
use crate::error::{GatewayError, Result};
use crate::models::{Channel, ProviderHealthRecord};
use crate::resilience::HealthMonitor;

/// A ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProvider {
    pub id: String,
    pub priority: i64,
    pub average_response_time_ms: f64,
    pub score: f64,
}

/// Selection score of a provider
pub fn provider_score(priority: i64, average_response_time_ms: f64) -> f64 {
    priority as f64 + selection::LATENCY_WEIGHT / average_response_time_ms.max(1.0)
}

#[derive(Debug, Clone)]
pub struct ProviderSelector {
    providers: ProvidersConfig,
    health: HealthMonitor,
}

impl ProviderSelector {
    pub fn new(providers: ProvidersConfig, health: HealthMonitor) -> Self {
        Self { providers, health }
    }

    pub fn providers(&self) -> &ProvidersConfig {
        &self.providers
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Whether `provider` may receive traffic now
    pub async fn is_available(&self, provider: &str) -> bool {
        if !self.health.is_available(provider).await {
            return false;
        }
        let record = self.health.record(provider).await;
        !self.health.in_failure_cooldown(&record)
    }

    /// Pick a provider for `channel`
    pub async fn select(&self, channel: Channel) -> Result<String> {
        self.select_excluding(channel, &[])
            .await?
            .ok_or_else(|| GatewayError::NoProviderAvailable {
                channel: channel.to_string(),
            })
    }

    /// Use `pinned` when it is configured for the channel and available,
    /// otherwise select normally
    pub async fn select_pinned(&self, channel: Channel, pinned: &str) -> Result<String> {
        match self.providers.entry(channel, pinned) {
            Some(entry) if entry.enabled => {
                if self.is_available(pinned).await {
                    debug!(provider = %pinned, channel = %channel, "📌 Using pinned provider");
                    return Ok(pinned.to_string());
                }
                warn!(
                    provider = %pinned,
                    channel = %channel,
                    "Pinned provider unavailable - selecting another"
                );
                self.select(channel).await
            }
            _ => Err(GatewayError::Validation(format!(
                "provider {pinned} is not enabled for channel {channel}"
            ))),
        }
    }

    /// Pick among providers not in `exclude`; `None` when every enabled
    /// provider is excluded
    pub async fn select_excluding(
        &self,
        channel: Channel,
        exclude: &[String],
    ) -> Result<Option<String>> {
        let candidates: Vec<&ProviderEntry> = self
            .providers
            .enabled_for_channel(channel)
            .filter(|p| !exclude.contains(&p.id))
            .collect();

        if candidates.is_empty() {
            if exclude.is_empty() {
                return Err(GatewayError::NoProviderAvailable {
                    channel: channel.to_string(),
                });
            }
            return Ok(None);
        }

        let ranked = self.rank(&candidates).await;
        if let Some(best) = ranked.first() {
            debug!(
                provider = %best.id,
                channel = %channel,
                score = best.score,
                candidates = ranked.len(),
                "🎯 Provider selected"
            );
            return Ok(Some(best.id.clone()));
        }

        let fallback = self.fallback(&candidates).await;
        warn!(
            provider = %fallback,
            channel = %channel,
            "No provider available - falling back to the longest-recovered provider"
        );
        Ok(Some(fallback))
    }

    /// Available providers of `channel` not in `exclude`, best first
    pub async fn available_providers(
        &self,
        channel: Channel,
        exclude: &[String],
    ) -> Vec<ScoredProvider> {
        let candidates: Vec<&ProviderEntry> = self
            .providers
            .enabled_for_channel(channel)
            .filter(|p| !exclude.contains(&p.id))
            .collect();
        self.rank(&candidates).await
    }

    async fn rank(&self, candidates: &[&ProviderEntry]) -> Vec<ScoredProvider> {
        let mut ranked = Vec::with_capacity(candidates.len());
        for entry in candidates {
            if !self.health.is_available(&entry.id).await {
                continue;
            }
            let record = self.health.record(&entry.id).await;
            if self.health.in_failure_cooldown(&record) {
                continue;
            }
            ranked.push(ScoredProvider {
                id: entry.id.clone(),
                priority: entry.priority,
                average_response_time_ms: record.average_response_time_ms,
                score: provider_score(entry.priority, record.average_response_time_ms),
            });
        }
        // Stable sort keeps configuration order for equal scores
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    async fn fallback(&self, candidates: &[&ProviderEntry]) -> String {
        let mut records: Vec<(String, ProviderHealthRecord)> = Vec::new();
        for entry in candidates {
            records.push((entry.id.clone(), self.health.record(&entry.id).await));
        }
        pick_longest_recovered(&records)
            .unwrap_or_else(|| candidates[0].id.clone())
    }
}

/// Never-failed providers first (configuration order), then the oldest
/// `last_failure`
fn pick_longest_recovered(records: &[(String, ProviderHealthRecord)]) -> Option<String> {
    if let Some((id, _)) = records.iter().find(|(_, r)| r.last_failure.is_none()) {
        return Some(id.clone());
    }
    records
        .iter()
        .filter_map(|(id, r)| r.last_failure.map(|at: DateTime<Utc>| (id, at)))
        .min_by_key(|(_, at)| *at)
        .map(|(id, _)| id.clone())
}
