//! # NodeFlow Catalog
//!
//! Signed command catalog for NodeFlow nodes: publishers contribute
//! command lists fingerprinted with SHA-256 and signed with ed25519; the
//! [`CatalogManager`] refreshes from a registry or loads from its cache
//! file, verifies every signature, applies a visibility policy, and
//! answers command queries.
//!
//! ## Trust model
//!
//! A contribution is trusted only when its stored fingerprint equals the
//! fingerprint recomputed over its commands and its signature verifies
//! against the embedded public key. Tampering with commands, fingerprint,
//! or signature fails both `refresh` and `load` and leaves no partial
//! state.

mod contribution;
mod error;
mod fingerprint;
mod manager;
mod policy;
mod signature;

pub use contribution::{
    validate_command_id, CliContribution, CommandEntry, CommandRisk, CommandVisibility,
    CONTRACT_TYPE_V1,
};
pub use error::{CatalogError, Result};
pub use fingerprint::{canonical_json, Fingerprint};
pub use manager::{
    CatalogCacheFile, CatalogDiff, CatalogManager, ContributionRegistry, PublisherSignature,
    StaticRegistry,
};
pub use policy::CatalogPolicy;
pub use signature::{verify_signature, SigningKeyPair};
