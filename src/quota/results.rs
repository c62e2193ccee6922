//! Quota result types

/// Usage snapshot derived from the usage cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaInfo {
    pub current_usage_bytes: u64,
    pub max_quota_bytes: u64,
    /// Fraction of the quota in use, `current / max`.
    pub usage_percentage: f64,
    pub is_exceeded: bool,
}

impl QuotaInfo {
    pub fn new(current_usage_bytes: u64, max_quota_bytes: u64) -> Self {
        let usage_percentage = if max_quota_bytes == 0 {
            1.0
        } else {
            current_usage_bytes as f64 / max_quota_bytes as f64
        };
        Self {
            current_usage_bytes,
            max_quota_bytes,
            usage_percentage,
            is_exceeded: current_usage_bytes >= max_quota_bytes,
        }
    }

    pub fn available_bytes(&self) -> u64 {
        self.max_quota_bytes.saturating_sub(self.current_usage_bytes)
    }
}
