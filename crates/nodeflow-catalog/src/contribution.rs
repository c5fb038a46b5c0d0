//! Signed command contributions.
//!
//! A contribution is one publisher's command list plus the cryptographic
//! material binding it: a SHA-256 fingerprint over the canonical encoding
//! of the commands and an ed25519 signature over that fingerprint.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::fingerprint::Fingerprint;
use crate::signature::{verify_signature, SigningKeyPair};

/// Contract type tag for v1 contributions.
pub const CONTRACT_TYPE_V1: &str = "cli_contribution_v1";

/// Visibility class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandVisibility {
    Public,
    Internal,
    Experimental,
    Deprecated,
}

/// Risk class of a command. `Critical` commands require human-in-the-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandRisk {
    Low,
    Medium,
    High,
    Critical,
}

/// One command in a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    /// Dot-separated id, at least two lowercase segments.
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group: Option<String>,
    pub publisher: String,
    pub visibility: CommandVisibility,
    pub risk: CommandRisk,
    /// Role and org tags consulted by the policy filter.
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub requires_hitl: bool,
}

impl CommandEntry {
    /// Validate the id namespace and the risk/HITL coupling.
    pub fn validate(&self) -> Result<()> {
        validate_command_id(&self.id)?;
        if self.display_name.is_empty() {
            return Err(CatalogError::Validation(format!(
                "command {} has an empty display name",
                self.id
            )));
        }
        if self.risk == CommandRisk::Critical && !self.requires_hitl {
            return Err(CatalogError::Validation(format!(
                "command {} is CRITICAL risk and must set requires_hitl",
                self.id
            )));
        }
        Ok(())
    }
}

/// Validate a command id: dot-separated, at least two segments, each
/// non-empty and limited to `[a-z0-9_]`.
pub fn validate_command_id(id: &str) -> Result<()> {
    let segments: Vec<&str> = id.split('.').collect();
    let well_formed = segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
    if well_formed {
        Ok(())
    } else {
        Err(CatalogError::Validation(format!(
            "invalid command id '{id}': expected dot-separated lowercase segments"
        )))
    }
}

/// A publisher's signed command list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliContribution {
    pub contract_type: String,
    /// Semver version of the contribution.
    pub version: String,
    pub publisher: String,
    /// SHA-256 hex over the canonical encoding of `commands`.
    pub fingerprint: String,
    /// base64(ed25519) over the fingerprint.
    pub signature: String,
    /// base64 public key of the signer.
    pub signer_public_key: String,
    pub commands: Vec<CommandEntry>,
}

impl CliContribution {
    /// Build and sign a contribution for `publisher`.
    pub fn build(
        publisher: impl Into<String>,
        version: impl Into<String>,
        commands: Vec<CommandEntry>,
        keypair: &SigningKeyPair,
    ) -> Result<Self> {
        let publisher = publisher.into();
        let version = version.into();
        let mut commands = commands;
        // Canonical command order: sorted by id. Keeps the fingerprint
        // recomputable from any store that indexes commands by id.
        commands.sort_by(|a, b| a.id.cmp(&b.id));
        for command in &commands {
            command.validate()?;
            if command.publisher != publisher {
                return Err(CatalogError::Validation(format!(
                    "command {} names publisher {}, expected {}",
                    command.id, command.publisher, publisher
                )));
            }
        }

        let fingerprint = Fingerprint::compute(&commands)?;
        let signature = keypair.sign(&fingerprint);
        let contribution = Self {
            contract_type: CONTRACT_TYPE_V1.to_string(),
            version,
            publisher,
            fingerprint: fingerprint.as_hex().to_string(),
            signature,
            signer_public_key: keypair.public_key_base64(),
            commands,
        };
        contribution.validate()?;
        Ok(contribution)
    }

    /// Full validation: contract type, semver, command entries, duplicate
    /// ids, fingerprint recomputation, and signature verification.
    pub fn validate(&self) -> Result<()> {
        if self.contract_type != CONTRACT_TYPE_V1 {
            return Err(CatalogError::Validation(format!(
                "unsupported contract type '{}'",
                self.contract_type
            )));
        }
        semver::Version::parse(&self.version).map_err(|e| {
            CatalogError::Validation(format!("invalid version '{}': {e}", self.version))
        })?;
        if self.publisher.is_empty() {
            return Err(CatalogError::Validation(
                "contribution publisher must not be empty".to_string(),
            ));
        }

        let mut seen_ids = std::collections::BTreeSet::new();
        for command in &self.commands {
            command.validate()?;
            if !seen_ids.insert(&command.id) {
                return Err(CatalogError::Validation(format!(
                    "duplicate command id '{}' in contribution from {}",
                    command.id, self.publisher
                )));
            }
        }

        let stored = Fingerprint::from_hex(&self.fingerprint)?;
        let mut sorted = self.commands.clone();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let recomputed = Fingerprint::compute(&sorted)?;
        if stored != recomputed {
            return Err(CatalogError::Signature(format!(
                "fingerprint mismatch for publisher {}: stored {}, recomputed {}",
                self.publisher, stored, recomputed
            )));
        }

        verify_signature(&stored, &self.signature, &self.signer_public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn command(id: &str, publisher: &str) -> CommandEntry {
        CommandEntry {
            id: id.to_string(),
            display_name: format!("Command {id}"),
            description: String::new(),
            group: None,
            publisher: publisher.to_string(),
            visibility: CommandVisibility::Public,
            risk: CommandRisk::Low,
            permissions: Vec::new(),
            requires_hitl: false,
        }
    }

    #[test]
    fn test_command_id_namespace() {
        assert!(validate_command_id("deploy.rollout").is_ok());
        assert!(validate_command_id("org.tools.sync_v2").is_ok());

        assert!(validate_command_id("single").is_err());
        assert!(validate_command_id("Upper.case").is_err());
        assert!(validate_command_id("trailing.").is_err());
        assert!(validate_command_id(".leading").is_err());
        assert!(validate_command_id("spa ce.cmd").is_err());
    }

    #[test]
    fn test_critical_requires_hitl() {
        let mut entry = command("danger.wipe", "ops");
        entry.risk = CommandRisk::Critical;
        assert!(entry.validate().is_err());

        entry.requires_hitl = true;
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_build_produces_valid_contribution() {
        let keypair = SigningKeyPair::generate();
        let contribution = CliContribution::build(
            "ops",
            "1.2.0",
            vec![command("deploy.rollout", "ops"), command("deploy.halt", "ops")],
            &keypair,
        )
        .unwrap();

        assert_eq!(contribution.contract_type, CONTRACT_TYPE_V1);
        assert_eq!(contribution.fingerprint.len(), 64);
        contribution.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_semver() {
        let keypair = SigningKeyPair::generate();
        let err = CliContribution::build("ops", "not-a-version", vec![], &keypair).unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let keypair = SigningKeyPair::generate();
        let err = CliContribution::build(
            "ops",
            "1.0.0",
            vec![command("deploy.rollout", "ops"), command("deploy.rollout", "ops")],
            &keypair,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate command id"));
    }

    #[test]
    fn test_tampered_commands_fail_fingerprint() {
        let keypair = SigningKeyPair::generate();
        let mut contribution = CliContribution::build(
            "ops",
            "1.0.0",
            vec![command("deploy.rollout", "ops")],
            &keypair,
        )
        .unwrap();

        contribution.commands[0].display_name = "Tampered".to_string();
        let err = contribution.validate().unwrap_err();
        assert!(matches!(err, CatalogError::Signature(_)));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let keypair = SigningKeyPair::generate();
        let mut contribution = CliContribution::build(
            "ops",
            "1.0.0",
            vec![command("deploy.rollout", "ops")],
            &keypair,
        )
        .unwrap();

        let flipped = if contribution.signature.starts_with('A') { "B" } else { "A" };
        contribution.signature.replace_range(0..1, flipped);
        let err = contribution.validate().unwrap_err();
        assert!(matches!(err, CatalogError::Signature(_)));
    }

    #[test]
    fn test_wrong_publisher_on_command() {
        let keypair = SigningKeyPair::generate();
        let err = CliContribution::build(
            "ops",
            "1.0.0",
            vec![command("deploy.rollout", "someone_else")],
            &keypair,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }
}
