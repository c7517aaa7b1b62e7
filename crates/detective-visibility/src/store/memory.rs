use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DetectiveStore, PackageStore, StoreError};
use crate::domain::{
    Detective, DetectiveId, DetectiveRecord, PackageId, RatingAggregate, ServiceRecord,
    SubscriptionPackage, VisibilityOverride,
};

#[derive(Default)]
struct MemoryState {
    detectives: BTreeMap<DetectiveId, Detective>,
    visibility: HashMap<DetectiveId, VisibilityOverride>,
    ratings: HashMap<DetectiveId, RatingAggregate>,
    services: Vec<ServiceRecord>,
    packages: HashMap<PackageId, SubscriptionPackage>,
}

/// Process-local store backing the demo service and tests.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }

    pub fn insert_package(&self, package: SubscriptionPackage) {
        if let Ok(mut state) = self.lock() {
            state.packages.insert(package.id.clone(), package);
        }
    }

    /// Seed a detective, bypassing the revision check.
    pub fn insert_detective(&self, detective: Detective) {
        if let Ok(mut state) = self.lock() {
            state.detectives.insert(detective.id.clone(), detective);
        }
    }

    pub fn set_rating(&self, id: &DetectiveId, rating: RatingAggregate) {
        if let Ok(mut state) = self.lock() {
            state.ratings.insert(id.clone(), rating);
        }
    }

    fn record(state: &MemoryState, detective: &Detective) -> DetectiveRecord {
        DetectiveRecord {
            detective: detective.clone(),
            visibility: state
                .visibility
                .get(&detective.id)
                .copied()
                .unwrap_or_default(),
            rating: state
                .ratings
                .get(&detective.id)
                .copied()
                .unwrap_or_default(),
            services: state
                .services
                .iter()
                .filter(|service| service.detective_id == detective.id)
                .cloned()
                .collect(),
        }
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn package(&self, id: &PackageId) -> Result<Option<SubscriptionPackage>, StoreError> {
        let state = self.lock()?;
        Ok(state.packages.get(id).cloned())
    }
}

#[async_trait]
impl DetectiveStore for MemoryStore {
    async fn fetch(&self, id: &DetectiveId) -> Result<Option<Detective>, StoreError> {
        let state = self.lock()?;
        Ok(state.detectives.get(id).cloned())
    }

    async fn fetch_record(
        &self,
        id: &DetectiveId,
    ) -> Result<Option<DetectiveRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .detectives
            .get(id)
            .map(|detective| Self::record(&state, detective)))
    }

    async fn list_records(&self) -> Result<Vec<DetectiveRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .detectives
            .values()
            .map(|detective| Self::record(&state, detective))
            .collect())
    }

    async fn save(&self, mut detective: Detective) -> Result<Detective, StoreError> {
        let mut state = self.lock()?;
        let current = state
            .detectives
            .get(&detective.id)
            .ok_or(StoreError::NotFound)?;
        if current.revision != detective.revision {
            return Err(StoreError::Conflict);
        }
        detective.revision += 1;
        state
            .detectives
            .insert(detective.id.clone(), detective.clone());
        Ok(detective)
    }

    async fn expired_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DetectiveId>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .detectives
            .values()
            .filter(|detective| detective.subscription.is_expired_at(now))
            .map(|detective| detective.id.clone())
            .collect())
    }

    async fn set_visibility(
        &self,
        id: &DetectiveId,
        visibility: VisibilityOverride,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.detectives.contains_key(id) {
            return Err(StoreError::NotFound);
        }
        state.visibility.insert(id.clone(), visibility);
        Ok(())
    }

    async fn insert_service(&self, service: ServiceRecord) -> Result<ServiceRecord, StoreError> {
        let mut state = self.lock()?;
        if !state.detectives.contains_key(&service.detective_id) {
            return Err(StoreError::NotFound);
        }
        if state
            .services
            .iter()
            .any(|existing| existing.id == service.id)
        {
            return Err(StoreError::Conflict);
        }
        state.services.push(service.clone());
        Ok(service)
    }
}
