//! Quota accounting
//!
//! Cached usage totals and the accept/reject/warn guard built on them.

pub mod cache;
pub mod guard;
pub mod results;

pub use cache::{Mutation, UsageCache, UsageWalker};
pub use guard::{QuotaDecision, QuotaGuard};
pub use results::QuotaInfo;
