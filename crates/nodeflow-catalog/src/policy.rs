//! Visibility policy applied to catalog commands.

use serde::{Deserialize, Serialize};

use crate::contribution::{CommandEntry, CommandVisibility};

/// Policy filter deciding which catalog commands are visible.
///
/// Precedence: the allowlist overrides the denylist. With a non-empty
/// `allowed_roles`, a command must share at least one permission with it
/// (no permissions means hidden). Any blocked org tag in a command's
/// permissions hides it, and deprecated/experimental commands can be
/// hidden by visibility class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogPolicy {
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub blocked_org_tags: Vec<String>,
    #[serde(default)]
    pub hide_deprecated: bool,
    #[serde(default)]
    pub hide_experimental: bool,
    #[serde(default)]
    pub command_allowlist: Vec<String>,
    #[serde(default)]
    pub command_denylist: Vec<String>,
    /// When non-empty, the cache's CLI version must match exactly.
    #[serde(default)]
    pub cli_version: String,
}

impl CatalogPolicy {
    /// A policy that shows everything.
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Whether `command` passes this policy.
    #[must_use]
    pub fn is_visible(&self, command: &CommandEntry) -> bool {
        if self.command_allowlist.iter().any(|id| *id == command.id) {
            return true;
        }
        if self.command_denylist.iter().any(|id| *id == command.id) {
            return false;
        }

        if !self.allowed_roles.is_empty() {
            let has_role = command
                .permissions
                .iter()
                .any(|p| self.allowed_roles.contains(p));
            if !has_role {
                return false;
            }
        }

        if command
            .permissions
            .iter()
            .any(|p| self.blocked_org_tags.contains(p))
        {
            return false;
        }

        match command.visibility {
            CommandVisibility::Deprecated if self.hide_deprecated => false,
            CommandVisibility::Experimental if self.hide_experimental => false,
            _ => true,
        }
    }
}
