// Kernel - core infrastructure with dependency injection
//
// The kernel holds the broker's infrastructure (state store, tier queues,
// ledger, storage, stream hub) and provides dependency injection through
// traits for testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// The render pipeline itself lives in the domains layer.

pub mod accounts;
pub mod credits;
pub mod deps;
pub mod jobs;
pub mod storage;
pub mod stream_hub;

pub use accounts::{Account, AccountStore, InMemoryAccountStore, PlanTier};
pub use credits::{
    CreditLedger, FixedPricing, InMemoryCreditLedger, PricingPolicy, ResolutionPricing,
};
pub use deps::{BrokerConfig, BrokerDeps};
pub use storage::{HttpObjectStore, ObjectStorage, PlaceholderStore};
pub use stream_hub::StreamHub;
