//! Quota guard
//!
//! Accept/reject/warn decision for a pending write of `required` bytes.
//! Reaching the limit exactly counts as exceeded.

use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::QuotaConfig;
use crate::error::{QuotaError, StoreError};
use crate::quota::cache::UsageCache;
use crate::quota::results::QuotaInfo;
use crate::watch::{EventBus, StoreEvent};

/// Outcome of an accepted check.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    Accept,
    /// Accepted, but the projected usage crosses the warning threshold.
    Warn(QuotaInfo),
}

pub struct QuotaGuard {
    config: QuotaConfig,
    cache: Arc<UsageCache>,
    events: Arc<EventBus>,
    cache_ttl: Duration,
}

impl QuotaGuard {
    pub fn new(
        config: QuotaConfig,
        cache: Arc<UsageCache>,
        events: Arc<EventBus>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            config,
            cache,
            events,
            cache_ttl,
        }
    }

    /// Pure decision against a known usage figure.
    pub fn check(
        config: &QuotaConfig,
        current: u64,
        required: u64,
    ) -> Result<QuotaDecision, QuotaError> {
        if !config.enforce() {
            return Ok(QuotaDecision::Accept);
        }
        let max = config.max_bytes();
        let projected = current.saturating_add(required);
        if projected >= max {
            return Err(QuotaError::Exceeded {
                requested: required,
                available: max.saturating_sub(current),
            });
        }
        let warn_at = max as f64 * config.warning_threshold();
        if projected as f64 >= warn_at {
            return Ok(QuotaDecision::Warn(QuotaInfo::new(current, max)));
        }
        Ok(QuotaDecision::Accept)
    }

    pub async fn info(&self, cancel: &CancellationToken) -> Result<QuotaInfo, StoreError> {
        let current = self.cache.current_usage(self.cache_ttl, cancel).await?;
        Ok(QuotaInfo::new(current, self.config.max_bytes()))
    }

    /// Checks `required` against current usage, raising a warning event
    /// when the threshold is crossed.
    pub async fn validate(
        &self,
        required: u64,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if !self.config.enforce() {
            return Ok(());
        }
        let info = self.info(cancel).await?;
        match Self::check(&self.config, info.current_usage_bytes, required)? {
            QuotaDecision::Accept => {}
            QuotaDecision::Warn(info) => {
                warn!(
                    "Quota warning: {} of {} bytes used ({:.1}%), {} more requested",
                    info.current_usage_bytes,
                    info.max_quota_bytes,
                    info.usage_percentage * 100.0,
                    required
                );
                self.events.publish(StoreEvent::quota_warning(&info));
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }
}
