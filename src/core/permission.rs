//! Reset-password permission check
//!
//! Three phases against one domain:
//!
//! 1. Bind and locate the caller's user object. Failure stops the check.
//! 2. Resolve the caller's authorization SIDs and look for well-known
//!    administrative groups. Failure stops the check.
//! 3. For each target group, sample up to `sample_size` direct members and
//!    look for an Allow ACE granting a password reset to one of the caller's
//!    SIDs. Failures are recorded per group and the loop continues.
//!
//! A privileged caller skips phase 3 entirely: every target group is
//! answered `true` without any directory lookup.
//!
//! Sampling makes a `true` verdict certain and a `false` verdict advisory.
//! See [`PermissionCheckResult`].

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use super::security::{grants_password_reset, privileged_memberships, Sid};
use super::session::{DirectoryProvider, DirectorySession, ObjectCategory};
use super::validation::{validate_check_request, CheckRequest};
use crate::constants::MEMBER_SAMPLE_SIZE;
use crate::logger::{LogLevel, LogSink};
use crate::models::{PermissionCheckResult, SecureString};
use crate::normalize::account_name;
use crate::utils::{panic_message, GroupCheckError, LookupError};

/// How per-group failures affect the overall verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregatePolicy {
    /// Any group failure is appended to the error text and fails the check
    #[default]
    Strict,
    /// Group failures become warnings; only bind/user/privilege failures
    /// fail the check
    PerGroup,
}

impl fmt::Display for AggregatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatePolicy::Strict => f.write_str("strict"),
            AggregatePolicy::PerGroup => f.write_str("per-group"),
        }
    }
}

impl FromStr for AggregatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(AggregatePolicy::Strict),
            "per-group" | "pergroup" | "per_group" => Ok(AggregatePolicy::PerGroup),
            other => Err(format!(
                "unknown aggregate policy '{}' (expected 'strict' or 'per-group')",
                other
            )),
        }
    }
}

/// Tuning of [`PermissionVerifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheckOptions {
    /// Members whose ACL is read per target group
    pub sample_size: usize,
    pub policy: AggregatePolicy,
    /// Fixed seed for member sampling; entropy when `None`
    pub seed: Option<u64>,
}

impl Default for PermissionCheckOptions {
    fn default() -> Self {
        PermissionCheckOptions {
            sample_size: MEMBER_SAMPLE_SIZE,
            policy: AggregatePolicy::Strict,
            seed: None,
        }
    }
}

/// Runs reset-password permission checks
///
/// Every progress line goes to the log sink and, when attached, to the output
/// channel in the order it was produced.
pub struct PermissionVerifier {
    provider: Arc<dyn DirectoryProvider>,
    log: Arc<dyn LogSink>,
    options: PermissionCheckOptions,
    output: Option<UnboundedSender<String>>,
}

impl PermissionVerifier {
    pub fn new(provider: Arc<dyn DirectoryProvider>, log: Arc<dyn LogSink>) -> Self {
        PermissionVerifier {
            provider,
            log,
            options: PermissionCheckOptions::default(),
            output: None,
        }
    }

    pub fn with_options(mut self, options: PermissionCheckOptions) -> Self {
        self.options = options;
        self
    }

    /// Mirror every progress line into `output`
    pub fn with_output(mut self, output: UnboundedSender<String>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn options(&self) -> &PermissionCheckOptions {
        &self.options
    }

    fn emit(&self, level: LogLevel, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.log.log(level, message);
        if let Some(output) = &self.output {
            let _ = output.send(message.to_string());
        }
    }

    /// Check whether `username` can reset passwords of members of `target_groups`
    ///
    /// Never fails: every problem, including a panic inside a directory call,
    /// ends up in the returned result's error text.
    pub async fn run_permission_check(
        &self,
        domain: &str,
        username: &str,
        secret: &SecureString,
        target_groups: &[String],
    ) -> PermissionCheckResult {
        let mut result = PermissionCheckResult::default();
        self.emit(
            LogLevel::Info,
            format!(
                "Starting permission check for user '{}' on domain '{}'...",
                username, domain
            ),
        );

        match validate_check_request(domain, username, secret, target_groups) {
            Ok(request) => {
                let phases = AssertUnwindSafe(self.run_phases(&request, secret, &mut result))
                    .catch_unwind()
                    .await;
                if let Err(panic) = phases {
                    let message = format!(
                        "Error: A critical unhandled error occurred during permission check: {}",
                        panic_message(panic.as_ref())
                    );
                    self.emit(LogLevel::Error, &message);
                    result.error_message = message;
                }
            }
            Err(e) => {
                let message = format!("Error: {}", e);
                self.emit(LogLevel::Error, &message);
                result.append_error(message);
            }
        }

        result.finalize();
        self.emit(
            LogLevel::Info,
            format!("Permission check for '{}' completed.", username),
        );
        result
    }

    async fn run_phases(
        &self,
        request: &CheckRequest,
        secret: &SecureString,
        result: &mut PermissionCheckResult,
    ) {
        // Phase 1
        self.emit(LogLevel::Info, "--- Phase 1: Domain and User Validation ---");
        self.emit(
            LogLevel::Info,
            format!(
                "Attempting to bind to domain '{}' with user '{}'...",
                request.domain, request.username
            ),
        );
        let session = match self
            .provider
            .bind(&request.domain, &request.username, secret)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let message = format!("Error: {}", e);
                self.emit(LogLevel::Error, &message);
                result.append_error(message);
                return;
            }
        };
        self.emit(
            LogLevel::Info,
            format!("Successfully bound to domain '{}'.", session.domain()),
        );

        self.check_user(session.as_ref(), request, result).await;
        session.unbind().await;
    }

    async fn check_user(
        &self,
        session: &dyn DirectorySession,
        request: &CheckRequest,
        result: &mut PermissionCheckResult,
    ) {
        let account = account_name(&request.username);
        let user = match session.find_object(account, ObjectCategory::User).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let message = format!(
                    "Error: User '{}' not found in domain '{}'.",
                    account, request.domain
                );
                self.emit(LogLevel::Error, &message);
                result.append_error(message);
                return;
            }
            Err(e) => {
                let message = format!("Error: Failed to look up user '{}': {}", account, e);
                self.emit(LogLevel::Error, &message);
                result.append_error(message);
                return;
            }
        };
        self.emit(
            LogLevel::Info,
            format!("User object '{}' found (DN: {}).", account, user.dn),
        );

        // Phase 2
        self.emit(LogLevel::Info, "--- Phase 2: User Privilege Analysis ---");
        self.emit(
            LogLevel::Info,
            format!("Enumerating group memberships for '{}'...", account),
        );
        let sids = match session.get_authorization_sids(&user).await {
            Ok(sids) => sids,
            Err(e) => {
                let message = format!("Error enumerating group memberships: {}", e);
                self.emit(LogLevel::Error, &message);
                result.append_error(message);
                return;
            }
        };
        self.emit(
            LogLevel::Info,
            format!(
                "Found {} total security group memberships (SIDs).",
                sids.len()
            ),
        );

        let privileged = privileged_memberships(&sids);
        result.is_highly_privileged = !privileged.is_empty();
        result.privileged_groups = privileged.iter().map(|g| g.to_string()).collect();
        if result.is_highly_privileged {
            result.has_full_permission = true;
            self.emit(
                LogLevel::Info,
                format!(
                    "User IS a member of highly-privileged group(s): {}.",
                    result.privileged_groups.join(", ")
                ),
            );
            self.emit(LogLevel::Info, "--> Assuming full permissions for all target groups.");
        } else {
            self.emit(LogLevel::Info, "User is NOT a member of highly-privileged groups.");
            self.emit(LogLevel::Info, "--> Proceeding with specific ACL checks.");
        }

        // Phase 3
        self.emit(LogLevel::Info, "--- Phase 3: Target Group Permission Checks ---");
        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        for group in &request.groups {
            self.emit(
                LogLevel::Info,
                format!("--- Processing Target Group: {} ---", group),
            );
            if result.is_highly_privileged {
                self.emit(
                    LogLevel::Info,
                    "  -> Conclusion: User has assumed permissions (is Admin).",
                );
                result.target_group_permissions.insert(group.clone(), true);
                continue;
            }

            match self.check_group(session, group, &sids, &mut rng).await {
                Ok(()) => {
                    result.target_group_permissions.insert(group.clone(), true);
                }
                Err(err) => {
                    result.target_group_permissions.insert(group.clone(), false);
                    self.record_group_failure(result, &err);
                }
            }
        }
    }

    async fn check_group(
        &self,
        session: &dyn DirectorySession,
        name: &str,
        sids: &HashSet<Sid>,
        rng: &mut StdRng,
    ) -> Result<(), GroupCheckError> {
        let group = match session.find_object(name, ObjectCategory::Group).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                self.emit(
                    LogLevel::Warning,
                    format!("  Warning: Target group '{}' not found. Skipping.", name),
                );
                return Err(GroupCheckError::GroupNotFound(name.to_string()));
            }
            Err(e) => {
                self.emit(
                    LogLevel::Warning,
                    format!("  Warning: Lookup of target group '{}' failed: {}", name, e),
                );
                return Err(GroupCheckError::Lookup {
                    group: name.to_string(),
                    detail: e.to_string(),
                });
            }
        };
        self.emit(LogLevel::Info, format!("  Found target group: {}", group.dn));

        let members = match session.list_group_members(&group).await {
            Ok(members) => members,
            Err(e) => {
                self.emit(
                    LogLevel::Debug,
                    format!("  Member enumeration of '{}' failed: {}", name, e),
                );
                Vec::new()
            }
        };
        if members.is_empty() {
            self.emit(
                LogLevel::Warning,
                format!(
                    "  Warning: Group '{}' has no members or they could not be enumerated.",
                    name
                ),
            );
            return Err(GroupCheckError::NoMembers(name.to_string()));
        }

        self.emit(
            LogLevel::Info,
            format!(
                "  Found {} members. Sampling up to {} to check ACLs.",
                members.len(),
                self.options.sample_size
            ),
        );
        let sample: Vec<String> = members
            .choose_multiple(rng, self.options.sample_size)
            .cloned()
            .collect();
        self.emit(
            LogLevel::Info,
            format!(
                "  Checking 'Reset Password' ACL for {} random user(s) in group '{}'.",
                sample.len(),
                name
            ),
        );

        for member_dn in &sample {
            match session.get_access_control_entries(member_dn).await {
                Ok(aces) => {
                    self.emit(
                        LogLevel::Info,
                        format!("    Checking ACL for user: {}", member_dn),
                    );
                    if grants_password_reset(&aces, sids) {
                        self.emit(
                            LogLevel::Info,
                            format!("      Permission found for {}.", member_dn),
                        );
                        self.emit(
                            LogLevel::Info,
                            format!(
                                "  -> Conclusion for '{}': YES, user has 'Reset Password' permission for sampled members.",
                                name
                            ),
                        );
                        return Ok(());
                    }
                }
                Err(LookupError::ObjectNotFound(_)) => self.emit(
                    LogLevel::Warning,
                    format!(
                        "    Warning: Could not find member object '{}'. It may have been deleted. Skipping.",
                        member_dn
                    ),
                ),
                Err(e) => self.emit(
                    LogLevel::Warning,
                    format!(
                        "    Warning: An error occurred while reading the ACL of member '{}'. Skipping. Error: {}",
                        member_dn, e
                    ),
                ),
            }
        }

        self.emit(
            LogLevel::Warning,
            format!(
                "  -> Conclusion for '{}': NO, user does not have permission for sampled members.",
                name
            ),
        );
        Err(GroupCheckError::NoAclMatch(name.to_string()))
    }

    fn record_group_failure(&self, result: &mut PermissionCheckResult, err: &GroupCheckError) {
        match self.options.policy {
            AggregatePolicy::Strict => result.append_error(err.to_string()),
            AggregatePolicy::PerGroup => result.warnings.push(err.to_string()),
        }
    }
}
