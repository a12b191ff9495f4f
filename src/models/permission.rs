//! Result of a reset-password permission check

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of [`PermissionVerifier::run_permission_check`](crate::core::PermissionVerifier::run_permission_check)
///
/// `is_successful` is true only when `error_message` is empty. Per-group
/// answers in `target_group_permissions` stay individually usable even when
/// the overall check failed. A `false` entry means no grant was found among
/// the sampled members, not that none exists anywhere in the group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheckResult {
    pub is_successful: bool,
    /// Multi-line, append-only during a run
    pub error_message: String,
    pub has_full_permission: bool,
    pub is_highly_privileged: bool,
    /// Requested group name (as given) to verdict
    pub target_group_permissions: BTreeMap<String, bool>,
    /// Well-known administrative groups the caller belongs to
    #[serde(default)]
    pub privileged_groups: Vec<String>,
    /// Group-level problems recorded under the per-group aggregate policy
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PermissionCheckResult {
    /// Append one line to the error text
    pub fn append_error(&mut self, message: impl AsRef<str>) {
        if !self.error_message.is_empty() {
            self.error_message.push('\n');
        }
        self.error_message.push_str(message.as_ref());
    }

    /// Derive the success flag from the accumulated error text
    pub fn finalize(&mut self) {
        self.is_successful = self.error_message.trim().is_empty();
    }

    /// Groups the caller was found to be able to reset
    pub fn permitted_groups(&self) -> impl Iterator<Item = &str> {
        self.target_group_permissions
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_tracks_error_text() {
        let mut result = PermissionCheckResult::default();
        result.finalize();
        assert!(result.is_successful);

        result.append_error("Target group 'A' not found.");
        result.append_error("User lacks permission for group 'B'.");
        result.finalize();
        assert!(!result.is_successful);
        assert_eq!(
            result.error_message,
            "Target group 'A' not found.\nUser lacks permission for group 'B'."
        );
    }

    #[test]
    fn test_permitted_groups() {
        let mut result = PermissionCheckResult::default();
        result.target_group_permissions.insert("A".into(), true);
        result.target_group_permissions.insert("B".into(), false);
        assert_eq!(result.permitted_groups().collect::<Vec<_>>(), vec!["A"]);
    }
}
