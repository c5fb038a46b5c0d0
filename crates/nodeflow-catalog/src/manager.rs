//! Catalog manager: refresh from a registry, load from the cache file,
//! policy filtering, diffing, and command queries.
//!
//! `refresh` pulls signed contributions, validates their fingerprints and
//! signatures, writes the cache file atomically, and reports a diff
//! against the previous cache. `load` works offline: it reads the cache,
//! re-verifies every stored signature and fingerprint, and checks the CLI
//! version pin. Signature failures abort both paths and leave no partial
//! state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contribution::{CliContribution, CommandEntry, CommandVisibility};
use crate::error::{CatalogError, Result};
use crate::fingerprint::Fingerprint;
use crate::policy::CatalogPolicy;
use crate::signature::verify_signature;

/// Source of signed contributions for `refresh`.
pub trait ContributionRegistry: Send + Sync {
    fn fetch_contributions(&self) -> Result<Vec<CliContribution>>;
}

/// In-memory registry, for tests and embedded hosts.
#[derive(Default)]
pub struct StaticRegistry {
    contributions: RwLock<Vec<CliContribution>>,
}

impl StaticRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contribution. A publisher may not appear twice unless
    /// `replace` is set.
    pub fn publish(&self, contribution: CliContribution, replace: bool) -> Result<()> {
        let mut contributions = self.contributions.write();
        let existing = contributions
            .iter()
            .position(|c| c.publisher == contribution.publisher);
        match existing {
            Some(index) if replace => contributions[index] = contribution,
            Some(_) => {
                return Err(CatalogError::Validation(format!(
                    "publisher {} already has a contribution (use replace)",
                    contribution.publisher
                )))
            }
            None => contributions.push(contribution),
        }
        Ok(())
    }
}

impl ContributionRegistry for StaticRegistry {
    fn fetch_contributions(&self) -> Result<Vec<CliContribution>> {
        Ok(self.contributions.read().clone())
    }
}

/// Per-publisher signature material stored in the cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSignature {
    pub fingerprint: String,
    pub signature: String,
    pub signer_public_key: String,
    pub version: String,
}

/// On-disk cache layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogCacheFile {
    pub commands: BTreeMap<String, CommandEntry>,
    pub signatures: BTreeMap<String, PublisherSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_version: Option<String>,
}

/// Difference between two catalog states, by command id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub deprecated: Vec<String>,
}

impl CatalogDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.deprecated.is_empty()
    }
}

/// Signed catalog manager.
pub struct CatalogManager {
    registry: Option<Box<dyn ContributionRegistry>>,
    cache_path: PathBuf,
    policy: CatalogPolicy,
    state: RwLock<Option<CatalogCacheFile>>,
}

impl CatalogManager {
    /// Load-only manager (no registry; `refresh` fails).
    #[must_use]
    pub fn new(cache_path: impl Into<PathBuf>, policy: CatalogPolicy) -> Self {
        Self {
            registry: None,
            cache_path: cache_path.into(),
            policy,
            state: RwLock::new(None),
        }
    }

    /// Attach a registry, enabling `refresh`.
    #[must_use]
    pub fn with_registry(mut self, registry: Box<dyn ContributionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Pull contributions, validate them, rewrite the cache, and return
    /// the diff against the previous cache state.
    pub fn refresh(&self) -> Result<CatalogDiff> {
        let registry = self.registry.as_ref().ok_or_else(|| {
            CatalogError::Load("no contribution registry configured for refresh".to_string())
        })?;

        let contributions = registry.fetch_contributions()?;

        let mut seen_publishers = BTreeMap::new();
        let mut commands: BTreeMap<String, CommandEntry> = BTreeMap::new();
        let mut signatures: BTreeMap<String, PublisherSignature> = BTreeMap::new();
        for contribution in &contributions {
            contribution.validate()?;
            if seen_publishers
                .insert(contribution.publisher.clone(), ())
                .is_some()
            {
                return Err(CatalogError::Validation(format!(
                    "publisher {} appears twice in the registry",
                    contribution.publisher
                )));
            }

            for command in &contribution.commands {
                if let Some(existing) = commands.get(&command.id) {
                    return Err(CatalogError::Validation(format!(
                        "command id '{}' published by both {} and {}",
                        command.id, existing.publisher, command.publisher
                    )));
                }
                commands.insert(command.id.clone(), command.clone());
            }
            signatures.insert(
                contribution.publisher.clone(),
                PublisherSignature {
                    fingerprint: contribution.fingerprint.clone(),
                    signature: contribution.signature.clone(),
                    signer_public_key: contribution.signer_public_key.clone(),
                    version: contribution.version.clone(),
                },
            );
        }

        let cache = CatalogCacheFile {
            commands,
            signatures,
            cli_version: (!self.policy.cli_version.is_empty())
                .then(|| self.policy.cli_version.clone()),
        };

        let previous = self
            .state
            .read()
            .clone()
            .or_else(|| self.read_cache_file().ok());
        let diff = compute_diff(
            previous.as_ref().map(|c| &c.commands),
            &cache.commands,
        );

        self.write_cache_file(&cache)?;
        *self.state.write() = Some(cache);
        info!(
            cache = %self.cache_path.display(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "catalog refreshed"
        );
        Ok(diff)
    }

    /// Read the cache file, verify every signature and fingerprint, and
    /// check the CLI version pin.
    pub fn load(&self) -> Result<()> {
        let cache = self.read_cache_file()?;
        verify_cache(&cache)?;

        if !self.policy.cli_version.is_empty() {
            let found = cache.cli_version.clone().unwrap_or_else(|| "none".to_string());
            if found != self.policy.cli_version {
                return Err(CatalogError::VersionMismatch {
                    expected: self.policy.cli_version.clone(),
                    found,
                });
            }
        }

        debug!(commands = cache.commands.len(), "catalog loaded from cache");
        *self.state.write() = Some(cache);
        Ok(())
    }

    /// A visible command by id.
    #[must_use]
    pub fn get_command(&self, id: &str) -> Option<CommandEntry> {
        self.state
            .read()
            .as_ref()
            .and_then(|cache| cache.commands.get(id).cloned())
            .filter(|command| self.policy.is_visible(command))
    }

    /// Visible commands, optionally filtered by group, ordered by id.
    #[must_use]
    pub fn list_commands(&self, group: Option<&str>) -> Vec<CommandEntry> {
        let state = self.state.read();
        let Some(cache) = state.as_ref() else {
            return Vec::new();
        };
        cache
            .commands
            .values()
            .filter(|command| self.policy.is_visible(command))
            .filter(|command| group.map_or(true, |g| command.group.as_deref() == Some(g)))
            .cloned()
            .collect()
    }

    /// Whether a command exists and passes the policy.
    #[must_use]
    pub fn is_visible(&self, id: &str) -> bool {
        self.get_command(id).is_some()
    }

    /// SHA-256 over the visible command index.
    pub fn cache_key(&self) -> Result<String> {
        let visible: BTreeMap<String, CommandEntry> = self
            .list_commands(None)
            .into_iter()
            .map(|command| (command.id.clone(), command))
            .collect();
        Ok(Fingerprint::compute(&visible)?.as_hex().to_string())
    }

    fn read_cache_file(&self) -> Result<CatalogCacheFile> {
        if !self.cache_path.exists() {
            return Err(CatalogError::Load(format!(
                "cache file missing: {}",
                self.cache_path.display()
            )));
        }
        let content = std::fs::read_to_string(&self.cache_path)?;
        serde_json::from_str(&content)
            .map_err(|e| CatalogError::Load(format!("corrupt cache file: {e}")))
    }

    fn write_cache_file(&self, cache: &CatalogCacheFile) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = temp_sibling(&self.cache_path);
        let encoded = serde_json::to_string_pretty(cache)?;
        std::fs::write(&temp_path, encoded)?;
        std::fs::rename(&temp_path, &self.cache_path)?;
        Ok(())
    }
}

impl std::fmt::Debug for CatalogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogManager")
            .field("cache_path", &self.cache_path)
            .field("has_registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

/// Verify every stored signature and recompute every fingerprint.
fn verify_cache(cache: &CatalogCacheFile) -> Result<()> {
    let mut by_publisher: BTreeMap<&str, Vec<&CommandEntry>> = BTreeMap::new();
    for command in cache.commands.values() {
        by_publisher
            .entry(command.publisher.as_str())
            .or_default()
            .push(command);
    }

    for (publisher, commands) in &by_publisher {
        let Some(stored) = cache.signatures.get(*publisher) else {
            return Err(CatalogError::Signature(format!(
                "no signature stored for publisher {publisher}"
            )));
        };

        let stored_fingerprint = Fingerprint::from_hex(&stored.fingerprint)?;
        // Commands iterate in id order, matching the canonical
        // contribution order the fingerprint was computed over.
        let recomputed = Fingerprint::compute(commands)?;
        if stored_fingerprint != recomputed {
            return Err(CatalogError::Signature(format!(
                "fingerprint mismatch for publisher {publisher}"
            )));
        }
        verify_signature(
            &stored_fingerprint,
            &stored.signature,
            &stored.signer_public_key,
        )?;
    }
    Ok(())
}

fn compute_diff(
    previous: Option<&BTreeMap<String, CommandEntry>>,
    next: &BTreeMap<String, CommandEntry>,
) -> CatalogDiff {
    let empty = BTreeMap::new();
    let previous = previous.unwrap_or(&empty);

    let mut diff = CatalogDiff::default();
    for (id, command) in next {
        match previous.get(id) {
            None => diff.added.push(id.clone()),
            Some(old) => {
                let newly_deprecated = old.visibility != CommandVisibility::Deprecated
                    && command.visibility == CommandVisibility::Deprecated;
                if newly_deprecated {
                    diff.deprecated.push(id.clone());
                } else if old != command {
                    diff.updated.push(id.clone());
                }
            }
        }
    }
    for id in previous.keys() {
        if !next.contains_key(id) {
            diff.removed.push(id.clone());
        }
    }
    diff
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}
