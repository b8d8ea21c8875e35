//! Tenant quota checking
//!
//! Ingestion bills one unit per root span ("delta"). The receiver runs a
//! cached best-effort check; the tracing worker re-runs it authoritatively
//! before persisting. Both go through this trait so deployments can plug
//! in their entitlements service.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("quota backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u64,
    pub limit: Option<u64>,
}

#[async_trait]
pub trait QuotaChecker: Send + Sync {
    /// Check whether `organization_id` may consume `delta` more units of
    /// `counter`. `use_cache` selects the soft (receiver) path; the
    /// authoritative path also records the consumption.
    async fn check(
        &self,
        organization_id: Uuid,
        counter: &str,
        delta: u64,
        use_cache: bool,
    ) -> Result<QuotaDecision, QuotaError>;
}

/// No-limit checker for single-tenant deployments.
pub struct UnmeteredQuota;

#[async_trait]
impl QuotaChecker for UnmeteredQuota {
    async fn check(
        &self,
        _organization_id: Uuid,
        _counter: &str,
        _delta: u64,
        _use_cache: bool,
    ) -> Result<QuotaDecision, QuotaError> {
        Ok(QuotaDecision {
            allowed: true,
            used: 0,
            limit: None,
        })
    }
}

/// Fixed per-organization limit with in-process counters. Used in tests
/// and as a sane default when no entitlements service is wired up.
pub struct FixedQuota {
    limit: u64,
    used: Mutex<HashMap<Uuid, u64>>,
}

impl FixedQuota {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl QuotaChecker for FixedQuota {
    async fn check(
        &self,
        organization_id: Uuid,
        _counter: &str,
        delta: u64,
        use_cache: bool,
    ) -> Result<QuotaDecision, QuotaError> {
        let mut used = self.used.lock();
        let entry = used.entry(organization_id).or_insert(0);
        let allowed = *entry + delta <= self.limit;
        // Only the authoritative path consumes the counter
        if allowed && !use_cache {
            *entry += delta;
        }
        Ok(QuotaDecision {
            allowed,
            used: *entry,
            limit: Some(self.limit),
        })
    }
}
