mod mem;

#[cfg(test)]
mod tests;

pub use mem::InMemoryStore;

use crate::async_trait;
use mule_bpv7::{bundle::Bundle, eid::Eid};
use thiserror::Error;

/// A specialized `Result` type for store operations.
pub type Result<T> = core::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No bundle with id {0}")]
    BundleNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid data in store: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Processing-state constraints attached to a stored bundle.
///
/// A set bit means the bundle is being held for that reason; a bundle with
/// no constraints is a candidate for janitor removal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Constraints(u8);

impl Constraints {
    pub const DISPATCH_PENDING: Constraints = Constraints(1 << 0);
    pub const FORWARD_PENDING: Constraints = Constraints(1 << 1);
    pub const REASSEMBLY_PENDING: Constraints = Constraints(1 << 2);
    pub const CONTRAINDICATED: Constraints = Constraints(1 << 3);
    pub const DELETED: Constraints = Constraints(1 << 4);

    pub fn none() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, other: Constraints) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Constraints) {
        self.0 &= !other.0;
    }

    pub fn contains(&self, other: Constraints) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

impl std::fmt::Display for Constraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (bit, name) in [
            (Self::DISPATCH_PENDING, "dispatch-pending"),
            (Self::FORWARD_PENDING, "forward-pending"),
            (Self::REASSEMBLY_PENDING, "reassembly-pending"),
            (Self::CONTRAINDICATED, "contraindicated"),
            (Self::DELETED, "deleted"),
        ] {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// The in-store descriptor of a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePack {
    /// Canonical bundle id `<source>-<creation millis>-<sequence>`.
    pub id: String,
    pub source: Eid,
    pub destination: Eid,
    /// Creation time, DTN milliseconds.
    pub creation_time: u64,
    /// Encoded size in bytes.
    pub size: u64,
    pub constraints: Constraints,
}

impl BundlePack {
    pub fn new(bundle: &Bundle, size: u64) -> Self {
        Self {
            id: bundle.id().to_string(),
            source: bundle.primary.source.clone(),
            destination: bundle.primary.destination.clone(),
            creation_time: bundle.primary.timestamp.time.millisecs(),
            size,
            constraints: Constraints::none(),
        }
    }
}

/// The bundle store contract.
///
/// Mutations are serialized per store; readers see consistent snapshots.
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Idempotent on bundle id: the first push creates the metadata entry,
    /// later pushes replace the bytes but leave constraints untouched.
    async fn push(&self, bundle: &Bundle) -> Result<()>;

    /// Fails with `BundleNotFound` if the id was never pushed.
    async fn update_metadata(&self, pack: &BundlePack) -> Result<()>;

    /// Marks the metadata deleted and removes the bytes.
    async fn remove(&self, id: &str) -> Result<()>;

    async fn count(&self) -> u64;
    async fn all_ids(&self) -> Vec<String>;
    async fn all_bundles(&self) -> Vec<BundlePack>;
    async fn has_item(&self, id: &str) -> bool;
    async fn get_bundle(&self, id: &str) -> Option<Bundle>;
    async fn get_metadata(&self, id: &str) -> Option<BundlePack>;
}
