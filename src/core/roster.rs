//! Enabled-user roster of one group under one credential

use std::sync::Arc;

use super::session::{DirectoryProvider, DirectorySession, ObjectCategory};
use crate::logger::LogSink;
use crate::models::{Credential, UserRecord};
use crate::utils::RosterError;

/// Fetches the enabled members of a group, including nested members
///
/// One call binds once, resolves the group's DN once, and runs a single
/// paged search. A failure never escapes [`fetch_group_members`]: it is
/// logged as a warning and yields an empty roster, so one broken
/// credential/group pair cannot spoil the others.
///
/// [`fetch_group_members`]: GroupRosterFetcher::fetch_group_members
#[derive(Clone)]
pub struct GroupRosterFetcher {
    provider: Arc<dyn DirectoryProvider>,
    log: Arc<dyn LogSink>,
}

impl GroupRosterFetcher {
    pub fn new(provider: Arc<dyn DirectoryProvider>, log: Arc<dyn LogSink>) -> Self {
        GroupRosterFetcher { provider, log }
    }

    /// Enabled users of `group` in the credential's domain; empty on any failure
    pub async fn fetch_group_members(&self, credential: &Credential, group: &str) -> Vec<UserRecord> {
        match self.try_fetch(credential, group).await {
            Ok(users) => users,
            Err(e) => {
                self.log.warn(&format!(
                    "Failed to fetch members of group '{}' in domain '{}' as '{}': {}",
                    group,
                    credential.domain(),
                    credential.username(),
                    e
                ));
                Vec::new()
            }
        }
    }

    /// Same as [`fetch_group_members`](Self::fetch_group_members) but surfaces the error
    pub async fn try_fetch(
        &self,
        credential: &Credential,
        group: &str,
    ) -> Result<Vec<UserRecord>, RosterError> {
        if credential.secret().is_empty() {
            return Err(RosterError::EmptySecret {
                domain: credential.domain().to_string(),
                username: credential.username().to_string(),
            });
        }

        let session = self
            .provider
            .bind(
                credential.domain(),
                credential.username().as_str(),
                credential.secret(),
            )
            .await?;
        let result = self.fetch_with(session.as_ref(), credential, group).await;
        session.unbind().await;
        result
    }

    async fn fetch_with(
        &self,
        session: &dyn DirectorySession,
        credential: &Credential,
        group: &str,
    ) -> Result<Vec<UserRecord>, RosterError> {
        let group_ref = session
            .find_object(group, ObjectCategory::Group)
            .await?
            .ok_or_else(|| RosterError::GroupNotFound {
                group: group.to_string(),
                domain: credential.domain().to_string(),
            })?;

        let mut users = session.list_enabled_group_members(&group_ref.dn).await?;
        for user in &mut users {
            if user.domain.is_empty() {
                user.domain = credential.domain().to_string();
            }
            user.user_groups = vec![group.to_string()];
        }

        self.log.info(&format!(
            "Fetched {} enabled users from group '{}' in domain '{}'.",
            users.len(),
            group,
            credential.domain()
        ));
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_session::{MockDirectory, MockGroup, MockUser};
    use crate::logger::{LogLevel, MemoryLogSink};
    use crate::models::{GroupSet, SecureString, Username};
    use crate::utils::BindErrorKind;

    const DOMAIN: &str = "corp.example.com";

    fn credential(domain: &str, secret: &str) -> Credential {
        Credential::new(
            domain,
            Username::new("svc-sync").unwrap(),
            SecureString::new(secret),
            GroupSet::new(),
        )
    }

    fn fetcher(directory: &MockDirectory) -> (GroupRosterFetcher, Arc<MemoryLogSink>) {
        let log = Arc::new(MemoryLogSink::new());
        (
            GroupRosterFetcher::new(Arc::new(directory.clone()), log.clone()),
            log,
        )
    }

    #[tokio::test]
    async fn test_fetch_tags_users_with_group() {
        let directory = MockDirectory::builder(DOMAIN)
            .user(MockUser::new("jdoe"))
            .user(MockUser::new("asmith").disabled())
            .group(MockGroup::new("Sales").members(&["jdoe", "asmith"]))
            .build();
        let (fetcher, _) = fetcher(&directory);

        let users = fetcher
            .fetch_group_members(&credential(DOMAIN, "pw"), "Sales")
            .await;

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].account_name, "jdoe");
        assert_eq!(users[0].domain, DOMAIN);
        assert_eq!(users[0].user_groups, vec!["Sales"]);
    }

    #[tokio::test]
    async fn test_missing_group_yields_empty_with_warning() {
        let directory = MockDirectory::builder(DOMAIN).build();
        let (fetcher, log) = fetcher(&directory);

        let users = fetcher
            .fetch_group_members(&credential(DOMAIN, "pw"), "Ghosts")
            .await;

        assert!(users.is_empty());
        let warnings = log.messages_at(LogLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'Ghosts'"));
        assert!(warnings[0].contains(DOMAIN));
    }

    #[tokio::test]
    async fn test_bind_failure_yields_empty() {
        let directory = MockDirectory::builder(DOMAIN)
            .fail_bind(BindErrorKind::AuthenticationFailed)
            .build();
        let (fetcher, log) = fetcher(&directory);

        let users = fetcher
            .fetch_group_members(&credential(DOMAIN, "pw"), "Sales")
            .await;

        assert!(users.is_empty());
        assert!(log.messages_at(LogLevel::Warning)[0].contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_empty_secret_does_not_bind() {
        let directory = MockDirectory::builder(DOMAIN).build();
        let (fetcher, _) = fetcher(&directory);

        let err = fetcher
            .try_fetch(&credential(DOMAIN, ""), "Sales")
            .await
            .unwrap_err();

        assert!(matches!(err, RosterError::EmptySecret { .. }));
        assert_eq!(directory.bind_count(), 0);
    }
}
