//! Broker dependencies (using traits for testability)
//!
//! This module provides the central dependency container threaded into the
//! broker, workers, routes, and tests. All external services sit behind
//! trait abstractions; tests instantiate a fresh container per case instead
//! of sharing module-level globals.

use std::sync::Arc;
use std::time::Duration;

use crate::kernel::accounts::AccountStore;
use crate::kernel::credits::{CreditLedger, PricingPolicy};
use crate::kernel::jobs::queue::TierQueues;
use crate::kernel::jobs::store::JobStore;
use crate::kernel::storage::ObjectStorage;
use crate::kernel::stream_hub::StreamHub;

/// Knobs the broker and reaper need beyond their collaborators.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Base delay for retry backoff (`base · 2^attempt`).
    pub retry_backoff_base: Duration,
    /// Renders a free-tier owner may submit per UTC day.
    pub free_daily_render_limit: u32,
    /// Tallest output a free-tier owner may request.
    pub free_max_height: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            retry_backoff_base: Duration::from_secs(5),
            free_daily_render_limit: 3,
            free_max_height: 720,
        }
    }
}

/// Dependency container for the broker side of the system.
#[derive(Clone)]
pub struct BrokerDeps {
    pub store: Arc<dyn JobStore>,
    pub queues: Arc<TierQueues>,
    pub ledger: Arc<dyn CreditLedger>,
    pub accounts: Arc<dyn AccountStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub pricing: Arc<dyn PricingPolicy>,
    /// In-process pub/sub hub feeding the SSE endpoints.
    pub hub: StreamHub,
    pub config: BrokerConfig,
}

impl BrokerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        queues: Arc<TierQueues>,
        ledger: Arc<dyn CreditLedger>,
        accounts: Arc<dyn AccountStore>,
        storage: Arc<dyn ObjectStorage>,
        pricing: Arc<dyn PricingPolicy>,
        hub: StreamHub,
        config: BrokerConfig,
    ) -> Self {
        Self {
            store,
            queues,
            ledger,
            accounts,
            storage,
            pricing,
            hub,
            config,
        }
    }
}
