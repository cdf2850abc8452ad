//! Account directory: resolves an owner to their subscription plan.
//!
//! Admission reads the plan and balance together; the plan decides the queue
//! tier, which is frozen onto the job at submission. Plan changes never
//! re-route a live job.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::common::{DomainError, DomainResult};
use crate::kernel::jobs::job::QueueTier;

/// Subscription plan attached to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Team,
    Enterprise,
}

impl PlanTier {
    /// Queue routing: team plans share the enterprise queue.
    pub fn queue_tier(&self) -> QueueTier {
        match self {
            PlanTier::Enterprise | PlanTier::Team => QueueTier::Enterprise,
            PlanTier::Pro => QueueTier::Pro,
            PlanTier::Free => QueueTier::Free,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub plan: PlanTier,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, owner_id: Uuid) -> DomainResult<Account>;
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, account: Account) {
        let mut accounts = self.accounts.lock().await;
        accounts.insert(account.id, account);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, owner_id: Uuid) -> DomainResult<Account> {
        let accounts = self.accounts.lock().await;
        accounts
            .get(&owner_id)
            .cloned()
            .ok_or(DomainError::NotFound("account"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_plans_route_to_enterprise_queue() {
        assert_eq!(PlanTier::Team.queue_tier(), QueueTier::Enterprise);
        assert_eq!(PlanTier::Enterprise.queue_tier(), QueueTier::Enterprise);
        assert_eq!(PlanTier::Pro.queue_tier(), QueueTier::Pro);
        assert_eq!(PlanTier::Free.queue_tier(), QueueTier::Free);
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let store = InMemoryAccountStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound("account")));
    }
}
