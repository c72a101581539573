//! Startup data for the in-memory catalog and verification store.
//!
//! ```json
//! {
//!   "listings": [{ "subject": { "property": "01J..." }, "provider": "01J..." }],
//!   "verifications": [{ "user": "01J...", "property": null,
//!                       "doc_type": "identity_document", "status": "approved" }]
//! }
//! ```

use std::fmt;
use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::catalog::InMemoryCatalog;
use crate::model::{Subject, UserId};
use crate::verification::{InMemoryVerificationStore, VerificationRecord};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Listing {
    pub subject: Subject,
    pub provider: UserId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub listings: Vec<Listing>,
    #[serde(default)]
    pub verifications: Vec<VerificationRecord>,
}

#[derive(Debug)]
pub enum SeedError {
    Io(io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "cannot read seed file: {e}"),
            SeedError::Parse(e) => write!(f, "invalid seed file: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl Seed {
    pub fn parse(json: &str) -> Result<Self, SeedError> {
        serde_json::from_str(json).map_err(SeedError::Parse)
    }

    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let json = std::fs::read_to_string(path).map_err(SeedError::Io)?;
        Self::parse(&json)
    }

    /// Populate the stores. Later entries for the same key replace earlier ones.
    pub fn apply(self, catalog: &InMemoryCatalog, verifications: &InMemoryVerificationStore) {
        for listing in self.listings {
            catalog.list(listing.subject, listing.provider);
        }
        for record in self.verifications {
            verifications.put(record);
        }
    }
}
