use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::StoreError;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

/// Category of submitted proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    IdentityDocument,
    ProofOfOwnership,
    BusinessLicense,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub user: UserId,
    /// `None` for identity verification, the property for ownership proofs.
    pub property: Option<PropertyId>,
    pub doc_type: DocType,
    pub status: VerificationStatus,
    #[serde(default)]
    pub submitted_at: Ms,
    pub admin_note: Option<String>,
}

/// Read side of the verification-submission store. Records are written by
/// the human review process, never by the booking core.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn get_verification(
        &self,
        user: UserId,
        property: Option<PropertyId>,
    ) -> Result<Option<VerificationRecord>, StoreError>;
}

/// Store kept in process memory. Used by the server binary (seeded at start)
/// and by tests.
#[derive(Debug, Default)]
pub struct InMemoryVerificationStore {
    records: DashMap<(UserId, Option<PropertyId>), VerificationRecord>,
}

impl InMemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `(record.user, record.property)`.
    pub fn put(&self, record: VerificationRecord) {
        self.records.insert((record.user, record.property), record);
    }

    /// Record a review decision on an existing submission.
    pub fn review(
        &self,
        user: UserId,
        property: Option<PropertyId>,
        status: VerificationStatus,
        admin_note: Option<String>,
    ) -> bool {
        match self.records.get_mut(&(user, property)) {
            Some(mut rec) => {
                rec.status = status;
                rec.admin_note = admin_note;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn get_verification(
        &self,
        user: UserId,
        property: Option<PropertyId>,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        Ok(self.records.get(&(user, property)).map(|r| r.value().clone()))
    }
}

/// Which step is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// A missing or pending record is fine; only `rejected` blocks.
    Creation,
    /// Requires `approved`. Property viewings also need the provider's
    /// ownership proof for that property approved.
    Confirmation,
}

/// Who must be verified for a given booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parties {
    pub tenant: UserId,
    pub provider: UserId,
    pub subject: Subject,
}

impl Parties {
    pub fn of(booking: &Booking) -> Self {
        Self {
            tenant: booking.tenant,
            provider: booking.provider,
            subject: booking.subject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Eligible,
    /// `field` is `"tenant"` or `"provider"`.
    Ineligible { user: UserId, field: &'static str },
}

#[derive(Clone)]
pub struct VerificationGate {
    store: Arc<dyn VerificationStore>,
}

impl VerificationGate {
    pub fn new(store: Arc<dyn VerificationStore>) -> Self {
        Self { store }
    }

    pub async fn evaluate(&self, parties: &Parties, purpose: Purpose) -> Result<Verdict, StoreError> {
        let identity = self.store.get_verification(parties.tenant, None).await?;
        let tenant_ok = match purpose {
            Purpose::Creation => {
                !matches!(identity, Some(ref r) if r.status == VerificationStatus::Rejected)
            }
            Purpose::Confirmation => is_approved(identity.as_ref()),
        };
        if !tenant_ok {
            return Ok(Verdict::Ineligible {
                user: parties.tenant,
                field: "tenant",
            });
        }

        if purpose == Purpose::Confirmation
            && let Subject::Property(property) = parties.subject
        {
            let ownership = self
                .store
                .get_verification(parties.provider, Some(property))
                .await?;
            if !is_approved(ownership.as_ref()) {
                return Ok(Verdict::Ineligible {
                    user: parties.provider,
                    field: "provider",
                });
            }
        }
        Ok(Verdict::Eligible)
    }

    pub async fn is_eligible(&self, parties: &Parties, purpose: Purpose) -> Result<bool, StoreError> {
        Ok(self.evaluate(parties, purpose).await? == Verdict::Eligible)
    }
}

fn is_approved(record: Option<&VerificationRecord>) -> bool {
    record.is_some_and(|r| r.status == VerificationStatus::Approved)
}
