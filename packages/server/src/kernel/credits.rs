//! Credit ledger and pricing seams.
//!
//! The ledger is the shared balance authority: deductions are single
//! compare-and-decrement operations (never read-then-write), refunds are
//! idempotent by reference, and the per-owner daily render counter backs the
//! free-tier quota gate. The in-memory implementation is the dev/test
//! backing; production deployments plug a persistent adapter behind the same
//! trait.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::common::settings::RenderSettings;
use crate::common::{DomainError, DomainResult};

// =============================================================================
// Pricing
// =============================================================================

/// Pluggable cost function consumed by the broker at admission.
pub trait PricingPolicy: Send + Sync {
    fn cost(&self, settings: &RenderSettings) -> u32;
}

/// Default policy: one credit per started minute of output, doubled above
/// 1080p.
pub struct ResolutionPricing;

impl PricingPolicy for ResolutionPricing {
    fn cost(&self, settings: &RenderSettings) -> u32 {
        let minutes = settings.duration_secs().div_ceil(60).max(1);
        let multiplier = if settings.height > 1080 { 2 } else { 1 };
        minutes * multiplier
    }
}

/// Fixed-cost policy, handy in tests and internal environments.
pub struct FixedPricing(pub u32);

impl PricingPolicy for FixedPricing {
    fn cost(&self, _settings: &RenderSettings) -> u32 {
        self.0
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Deduct `amount` conditional on the balance covering it, in a single
    /// compare-and-decrement. Returns the new balance, or
    /// `InsufficientCredits` without mutating anything.
    async fn deduct(&self, owner_id: Uuid, amount: u32, reference: &str) -> DomainResult<i64>;

    /// Credit `amount` back. Idempotent by `reference`: replays return the
    /// current balance without applying a second refund.
    async fn refund(&self, owner_id: Uuid, amount: u32, reference: &str) -> DomainResult<i64>;

    async fn balance(&self, owner_id: Uuid) -> DomainResult<i64>;

    /// Renders submitted by the owner in the current UTC day, minus those
    /// released back (cancelled or terminally failed).
    async fn daily_count(&self, owner_id: Uuid) -> DomainResult<u32>;

    /// Record a submission against today's counter.
    async fn record_render(&self, owner_id: Uuid, reference: &str) -> DomainResult<()>;

    /// Release a previously recorded submission (idempotent).
    async fn release_render(&self, owner_id: Uuid, reference: &str) -> DomainResult<()>;
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Uuid, i64>,
    applied_refunds: HashSet<String>,
    daily_renders: HashMap<Uuid, HashMap<String, NaiveDate>>,
}

/// In-memory ledger used by tests and credential-less environments.
#[derive(Default)]
pub struct InMemoryCreditLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, owner_id: Uuid, balance: i64) {
        let mut state = self.state.lock().await;
        state.balances.insert(owner_id, balance);
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn deduct(&self, owner_id: Uuid, amount: u32, _reference: &str) -> DomainResult<i64> {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(owner_id).or_insert(0);
        if *balance < amount as i64 {
            return Err(DomainError::InsufficientCredits {
                required: amount,
                available: *balance,
            });
        }
        *balance -= amount as i64;
        Ok(*balance)
    }

    async fn refund(&self, owner_id: Uuid, amount: u32, reference: &str) -> DomainResult<i64> {
        let mut state = self.state.lock().await;
        if state.applied_refunds.insert(reference.to_string()) {
            let balance = state.balances.entry(owner_id).or_insert(0);
            *balance += amount as i64;
        }
        Ok(*state.balances.entry(owner_id).or_insert(0))
    }

    async fn balance(&self, owner_id: Uuid) -> DomainResult<i64> {
        let state = self.state.lock().await;
        Ok(state.balances.get(&owner_id).copied().unwrap_or(0))
    }

    async fn daily_count(&self, owner_id: Uuid) -> DomainResult<u32> {
        let today = Utc::now().date_naive();
        let state = self.state.lock().await;
        let count = state
            .daily_renders
            .get(&owner_id)
            .map(|renders| renders.values().filter(|date| **date == today).count())
            .unwrap_or(0);
        Ok(count as u32)
    }

    async fn record_render(&self, owner_id: Uuid, reference: &str) -> DomainResult<()> {
        let mut state = self.state.lock().await;
        state
            .daily_renders
            .entry(owner_id)
            .or_default()
            .insert(reference.to_string(), Utc::now().date_naive());
        Ok(())
    }

    async fn release_render(&self, owner_id: Uuid, reference: &str) -> DomainResult<()> {
        let mut state = self.state.lock().await;
        if let Some(renders) = state.daily_renders.get_mut(&owner_id) {
            renders.remove(reference);
        }
        Ok(())
    }
}
