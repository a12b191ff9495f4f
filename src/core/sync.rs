//! Concurrent roster synchronization
//!
//! One task per (credential, group) pair. Tasks are awaited in completion
//! order so that progress advances as each one settles; only this loop
//! touches the accumulator, so merging needs no locking.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::credential::{CredentialStore, RosterStore};
use super::roster::GroupRosterFetcher;
use super::session::DirectoryProvider;
use crate::constants::PROGRESS_FETCH_CEILING;
use crate::logger::LogSink;
use crate::models::{Credential, ProgressReport, ProgressSink, UserKey, UserRecord};
use crate::utils::{panic_message, TaskError};

/// Tuning of [`SynchronizationCoordinator`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound on one fetch task; unbounded when `None`
    pub task_timeout: Option<Duration>,
}

/// Merge `users` into `accumulator`, collapsing duplicate identities
pub fn merge_users(accumulator: &mut HashMap<UserKey, UserRecord>, users: Vec<UserRecord>) {
    for user in users {
        match accumulator.get_mut(&user.key()) {
            Some(existing) => existing.merge(user),
            None => {
                accumulator.insert(user.key(), user);
            }
        }
    }
}

/// Deduplicate by (domain, account name) and sort by that identity
pub fn dedupe_users(users: impl IntoIterator<Item = UserRecord>) -> Vec<UserRecord> {
    let mut merged: HashMap<UserKey, UserRecord> = HashMap::new();
    merge_users(&mut merged, users.into_iter().collect());
    let mut users: Vec<UserRecord> = merged.into_values().collect();
    for user in &mut users {
        user.sort_groups();
    }
    users.sort_by_key(|u| u.key());
    users
}

/// Pulls every configured group roster and persists the merged result
pub struct SynchronizationCoordinator {
    fetcher: GroupRosterFetcher,
    credentials: Arc<dyn CredentialStore>,
    roster_store: Arc<dyn RosterStore>,
    log: Arc<dyn LogSink>,
    options: SyncOptions,
}

impl SynchronizationCoordinator {
    pub fn new(
        provider: Arc<dyn DirectoryProvider>,
        credentials: Arc<dyn CredentialStore>,
        roster_store: Arc<dyn RosterStore>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        SynchronizationCoordinator {
            fetcher: GroupRosterFetcher::new(provider, Arc::clone(&log)),
            credentials,
            roster_store,
            log,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one synchronization
    ///
    /// Never fails. Reports to `progress` with non-decreasing percentages and
    /// always finishes with a 100% report.
    pub async fn sync(&self, progress: &dyn ProgressSink) -> Vec<UserRecord> {
        let credentials = match self.credentials.load().await {
            Ok(credentials) => credentials,
            Err(e) => {
                self.log
                    .error(&format!("Failed to load credentials for synchronization: {}", e));
                progress.report(&ProgressReport::new(
                    100,
                    format!("Synchronization failed: {}", e),
                ));
                return Vec::new();
            }
        };

        let pairs = self.build_pairs(credentials);
        if pairs.is_empty() {
            self.log.info("No groups to sync.");
            progress.report(&ProgressReport::new(100, "No groups to sync."));
            return Vec::new();
        }

        progress.report(&ProgressReport::new(0, "Queueing group processing..."));
        let total = pairs.len();
        self.log
            .info(&format!("Starting synchronization of {} group(s).", total));

        let mut pending: FuturesUnordered<_> = pairs
            .into_iter()
            .map(|(credential, group)| {
                let label = format!(
                    "group '{}' in domain '{}' (as '{}')",
                    group,
                    credential.domain(),
                    credential.username()
                );
                let handle = tokio::spawn(run_fetch(
                    self.fetcher.clone(),
                    credential,
                    group,
                    self.options.task_timeout,
                ));
                async move { (label, handle.await) }
            })
            .collect();

        let mut accumulator: HashMap<UserKey, UserRecord> = HashMap::new();
        let mut completed = 0usize;
        while let Some((label, joined)) = pending.next().await {
            completed += 1;
            match joined {
                Ok(Ok(users)) => merge_users(&mut accumulator, users),
                Ok(Err(e)) => self.log.warn(&format!(
                    "Fetch of {} did not finish: {}. It contributes no users.",
                    label, e
                )),
                Err(join_error) => {
                    let e = if join_error.is_panic() {
                        TaskError::Faulted(panic_message(&*join_error.into_panic()))
                    } else {
                        TaskError::Cancelled
                    };
                    self.log.error(&format!(
                        "Fetch of {} ended abnormally: {}. It contributes no users.",
                        label, e
                    ));
                }
            }

            let percent = completed * PROGRESS_FETCH_CEILING / total;
            progress.report(&ProgressReport::new(
                percent as u8,
                format!("Processed {} of {} groups...", completed, total),
            ));
        }
        // Every task has settled and dropped its Arc<Credential>; the secrets
        // are scrubbed at this point.
        drop(pending);
        self.log.debug("All fetch tasks settled; credential secrets released.");

        let users = dedupe_users(accumulator.into_values());
        progress.report(&ProgressReport::new(
            PROGRESS_FETCH_CEILING as u8,
            "Finalizing and saving user list...",
        ));

        if let Err(e) = self.roster_store.save_roster(&users).await {
            self.log.error(&format!("Failed to save user list: {}", e));
        }

        let summary = format!(
            "Synchronization complete. Found {} unique users.",
            users.len()
        );
        self.log.info(&summary);
        progress.report(&ProgressReport::new(100, summary));
        users
    }

    fn build_pairs(&self, credentials: Vec<Credential>) -> Vec<(Arc<Credential>, String)> {
        let mut pairs = Vec::new();
        for credential in credentials {
            if credential.secret().is_empty() {
                self.log.warn(&format!(
                    "Skipping credential '{}' for domain '{}': password is empty.",
                    credential.username(),
                    credential.domain()
                ));
                continue;
            }
            let credential = Arc::new(credential);
            for group in credential.groups().iter() {
                pairs.push((Arc::clone(&credential), group.clone()));
            }
        }
        pairs
    }
}

async fn run_fetch(
    fetcher: GroupRosterFetcher,
    credential: Arc<Credential>,
    group: String,
    timeout: Option<Duration>,
) -> Result<Vec<UserRecord>, TaskError> {
    let fetch = fetcher.fetch_group_members(&credential, &group);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fetch)
            .await
            .map_err(|_| TaskError::TimedOut(limit)),
        None => Ok(fetch.await),
    }
}
