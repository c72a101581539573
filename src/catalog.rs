use async_trait::async_trait;
use dashmap::DashMap;

use crate::engine::StoreError;
use crate::model::*;

/// Listing catalog lookup: who owns or serves a property/service.
#[async_trait]
pub trait ListingCatalog: Send + Sync {
    /// `Ok(None)` when the subject is unknown to the catalog.
    async fn resolve_provider(&self, subject: &Subject) -> Result<Option<UserId>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    owners: DashMap<Subject, UserId>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, subject: Subject, provider: UserId) {
        self.owners.insert(subject, provider);
    }

    pub fn unlist(&self, subject: &Subject) {
        self.owners.remove(subject);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[async_trait]
impl ListingCatalog for InMemoryCatalog {
    async fn resolve_provider(&self, subject: &Subject) -> Result<Option<UserId>, StoreError> {
        Ok(self.owners.get(subject).map(|e| *e.value()))
    }
}
