//! Password reset with stored administrative credentials

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use super::credential::CredentialStore;
use super::session::{DirectoryProvider, DirectorySession, ObjectCategory, ObjectRef};
use crate::logger::LogSink;
use crate::models::{Credential, SecureString, UserRecord};
use crate::normalize::{account_name, same_domain};
use crate::utils::ResetError;

/// Temporary password for `date`, formatted `<prefix>@DD.MM.YYYY`
pub fn temp_password_for_date(prefix: &str, date: NaiveDate) -> SecureString {
    SecureString::new(format!("{}@{}", prefix, date.format("%d.%m.%Y")))
}

/// Resets directory passwords to a date-derived temporary value
pub struct PasswordResetService {
    provider: Arc<dyn DirectoryProvider>,
    credentials: Arc<dyn CredentialStore>,
    log: Arc<dyn LogSink>,
    prefix: String,
}

impl PasswordResetService {
    pub fn new(
        provider: Arc<dyn DirectoryProvider>,
        credentials: Arc<dyn CredentialStore>,
        log: Arc<dyn LogSink>,
        prefix: impl Into<String>,
    ) -> Self {
        PasswordResetService {
            provider,
            credentials,
            log,
            prefix: prefix.into(),
        }
    }

    /// Reset `user`'s password to the temporary password for `date`
    ///
    /// The user must change it at next logon. Returns the password that was
    /// set so the caller can hand it over.
    pub async fn reset(&self, user: &UserRecord, date: NaiveDate) -> Result<SecureString, ResetError> {
        let credential = self.select_credential(user).await?;
        let password = temp_password_for_date(&self.prefix, date);

        let session = self.bind(&credential).await?;
        let result = async {
            let target = locate_user(session.as_ref(), user).await?;
            session.reset_password(&target, &password, true).await?;
            Ok::<_, ResetError>(())
        }
        .await;
        session.unbind().await;
        result?;

        self.log.info(&format!(
            "Password for '{}' ({}) in domain '{}' was reset; change required at next logon.",
            user.display_name, user.account_name, user.domain
        ));
        Ok(password)
    }

    /// When `user`'s password was last set, if ever
    pub async fn last_password_set(
        &self,
        user: &UserRecord,
    ) -> Result<Option<DateTime<Utc>>, ResetError> {
        let credential = self.select_credential(user).await?;
        let session = self.bind(&credential).await?;
        let result = async {
            let target = locate_user(session.as_ref(), user).await?;
            Ok::<_, ResetError>(session.last_password_set(&target).await?)
        }
        .await;
        session.unbind().await;
        result
    }

    async fn select_credential(&self, user: &UserRecord) -> Result<Credential, ResetError> {
        if user.account_name.trim().is_empty() {
            return Err(ResetError::EmptyAccount);
        }

        let mut credentials = self.credentials.load().await?;
        if credentials.is_empty() {
            return Err(ResetError::NoCredentials);
        }

        match credentials
            .iter()
            .position(|c| same_domain(c.domain(), &user.domain))
        {
            Some(index) => Ok(credentials.swap_remove(index)),
            None => {
                let fallback = credentials.swap_remove(0);
                self.log.warn(&format!(
                    "No credential configured for domain '{}'. Using the credential for '{}'.",
                    user.domain,
                    fallback.domain()
                ));
                Ok(fallback)
            }
        }
    }

    async fn bind(&self, credential: &Credential) -> Result<Box<dyn DirectorySession>, ResetError> {
        Ok(self
            .provider
            .bind(
                credential.domain(),
                credential.username().as_str(),
                credential.secret(),
            )
            .await?)
    }
}

async fn locate_user(
    session: &dyn DirectorySession,
    user: &UserRecord,
) -> Result<ObjectRef, ResetError> {
    let account = account_name(&user.account_name);
    session
        .find_object(account, ObjectCategory::User)
        .await?
        .ok_or_else(|| ResetError::UserNotFound {
            account: account.to_string(),
            domain: user.domain.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_session::{MockDirectory, MockUser};
    use crate::logger::{LogLevel, MemoryLogSink};
    use crate::models::{GroupSet, Username};
    use crate::utils::{BindErrorKind, CredentialError};
    use chrono::TimeZone;

    struct StaticCredentials(Vec<Credential>);

    #[async_trait::async_trait]
    impl CredentialStore for StaticCredentials {
        async fn load(&self) -> Result<Vec<Credential>, CredentialError> {
            Ok(self.0.clone())
        }

        async fn save(&self, _credentials: &[Credential]) -> Result<(), CredentialError> {
            Ok(())
        }

        async fn clear(&self) -> Result<(), CredentialError> {
            Ok(())
        }
    }

    fn credential(domain: &str, username: &str) -> Credential {
        Credential::new(
            domain,
            Username::new(username).unwrap(),
            SecureString::new("pw"),
            GroupSet::new(),
        )
    }

    fn service(
        directory: &MockDirectory,
        credentials: Vec<Credential>,
    ) -> (PasswordResetService, Arc<MemoryLogSink>) {
        let log = Arc::new(MemoryLogSink::new());
        let service = PasswordResetService::new(
            Arc::new(directory.clone()),
            Arc::new(StaticCredentials(credentials)),
            log.clone(),
            "Reset",
        );
        (service, log)
    }

    fn user(domain: &str, account: &str) -> UserRecord {
        UserRecord {
            domain: domain.into(),
            account_name: account.into(),
            display_name: "Jane Doe".into(),
            ..Default::default()
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    #[test]
    fn test_temp_password_format() {
        assert_eq!(temp_password_for_date("Reset", date()).as_str(), "Reset@07.03.2024");
        let new_year = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        assert_eq!(temp_password_for_date("Gyre", new_year).as_str(), "Gyre@31.12.2025");
    }

    #[tokio::test]
    async fn test_reset_uses_matching_domain_credential() {
        let directory = MockDirectory::builder("corp.example.com")
            .user(MockUser::new("jdoe"))
            .domain("emea.example.com")
            .user(MockUser::new("jdoe"))
            .build();
        let (service, log) = service(
            &directory,
            vec![
                credential("corp.example.com", "admin-corp"),
                credential("EMEA.example.com", "admin-emea"),
            ],
        );

        let password = service
            .reset(&user("emea.example.com", "jdoe"), date())
            .await
            .unwrap();

        assert_eq!(password.as_str(), "Reset@07.03.2024");
        assert_eq!(
            directory.binds(),
            vec![("EMEA.example.com".to_string(), "admin-emea".to_string())]
        );
        let resets = directory.password_resets();
        assert_eq!(resets.len(), 1);
        assert_eq!(resets[0].0, directory.dn_of("emea.example.com", "jdoe").unwrap());
        assert_eq!(resets[0].1, "Reset@07.03.2024");
        assert!(resets[0].2);
        assert!(log.messages_at(LogLevel::Warning).is_empty());
    }

    #[tokio::test]
    async fn test_reset_falls_back_to_first_credential() {
        let directory = MockDirectory::builder("corp.example.com")
            .user(MockUser::new("jdoe"))
            .build();
        let (service, log) = service(&directory, vec![credential("corp.example.com", "admin")]);

        service
            .reset(&user("CORP", "jdoe"), date())
            .await
            .unwrap();

        let warnings = log.messages_at(LogLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'CORP'"));
        assert_eq!(directory.password_resets().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_without_credentials() {
        let directory = MockDirectory::builder("corp.example.com").build();
        let (service, _) = service(&directory, Vec::new());

        let err = service
            .reset(&user("corp.example.com", "jdoe"), date())
            .await
            .unwrap_err();

        assert!(matches!(err, ResetError::NoCredentials));
        assert_eq!(directory.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_reset_unknown_user() {
        let directory = MockDirectory::builder("corp.example.com").build();
        let (service, _) = service(&directory, vec![credential("corp.example.com", "admin")]);

        let err = service
            .reset(&user("corp.example.com", "ghost"), date())
            .await
            .unwrap_err();

        assert!(matches!(err, ResetError::UserNotFound { ref account, .. } if account == "ghost"));
        assert!(directory.password_resets().is_empty());
    }

    #[tokio::test]
    async fn test_reset_bind_failure() {
        let directory = MockDirectory::builder("corp.example.com")
            .fail_bind(BindErrorKind::AuthenticationFailed)
            .build();
        let (service, _) = service(&directory, vec![credential("corp.example.com", "admin")]);

        let err = service
            .reset(&user("corp.example.com", "jdoe"), date())
            .await
            .unwrap_err();

        assert!(matches!(err, ResetError::Bind(_)));
    }

    #[tokio::test]
    async fn test_reset_rejects_blank_account() {
        let directory = MockDirectory::builder("corp.example.com").build();
        let (service, _) = service(&directory, vec![credential("corp.example.com", "admin")]);

        let err = service
            .reset(&user("corp.example.com", "  "), date())
            .await
            .unwrap_err();

        assert!(matches!(err, ResetError::EmptyAccount));
    }

    #[tokio::test]
    async fn test_last_password_set() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
        let directory = MockDirectory::builder("corp.example.com")
            .user(MockUser::new("jdoe").password_last_set(at))
            .user(MockUser::new("asmith"))
            .build();
        let (service, _) = service(&directory, vec![credential("corp.example.com", "admin")]);

        assert_eq!(
            service
                .last_password_set(&user("corp.example.com", "jdoe"))
                .await
                .unwrap(),
            Some(at)
        );
        assert_eq!(
            service
                .last_password_set(&user("corp.example.com", "asmith"))
                .await
                .unwrap(),
            None
        );
    }
}
