//! Directory user records produced by roster synchronization

use serde::{Deserialize, Serialize};
use std::fmt;

/// One enabled directory user, as persisted in the roster file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub domain: String,
    /// sAMAccountName
    pub account_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Groups this user was synchronized through
    #[serde(default)]
    pub user_groups: Vec<String>,
}

/// Case-insensitive (domain, account name) identity of a [`UserRecord`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey {
    domain: String,
    account_name: String,
}

impl UserRecord {
    pub fn key(&self) -> UserKey {
        UserKey {
            domain: self.domain.trim().to_lowercase(),
            account_name: self.account_name.trim().to_lowercase(),
        }
    }

    /// Same directory account, ignoring case
    pub fn same_identity(&self, other: &UserRecord) -> bool {
        self.key() == other.key()
    }

    /// Fold the group names of a duplicate record into this one
    ///
    /// Keeps the list sorted case-insensitively without case-variant
    /// duplicates so that the merged content is independent of arrival order.
    pub fn absorb_groups(&mut self, other: &UserRecord) {
        for group in &other.user_groups {
            if !self
                .user_groups
                .iter()
                .any(|g| g.eq_ignore_ascii_case(group))
            {
                self.user_groups.push(group.clone());
            }
        }
        self.sort_groups();
    }

    /// Merge a duplicate record of the same identity into this one
    ///
    /// Group names are unioned. Where the two records disagree on any other
    /// field, the record that sorts first wins, so merging A into B and B
    /// into A give the same content.
    pub fn merge(&mut self, mut other: UserRecord) {
        if other.attributes() < self.attributes() {
            std::mem::swap(self, &mut other);
        }
        self.absorb_groups(&other);
    }

    fn attributes(&self) -> [&str; 8] {
        [
            self.domain.as_str(),
            self.account_name.as_str(),
            self.display_name.as_str(),
            self.given_name.as_str(),
            self.surname.as_str(),
            self.mail.as_str(),
            self.title.as_str(),
            self.description.as_str(),
        ]
    }

    pub fn sort_groups(&mut self) {
        self.user_groups
            .sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {}, {}",
            self.domain, self.account_name, self.display_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(domain: &str, account: &str, groups: &[&str]) -> UserRecord {
        UserRecord {
            domain: domain.to_string(),
            account_name: account.to_string(),
            display_name: account.to_uppercase(),
            user_groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_ignores_case() {
        let a = user("CORP.example.com", "JDoe", &[]);
        let b = user("corp.example.com", "jdoe", &[]);
        let c = user("corp.example.com", "jsmith", &[]);
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn test_absorb_groups_is_order_independent() {
        let mut left = user("corp", "jdoe", &["Support"]);
        left.absorb_groups(&user("corp", "jdoe", &["sales", "SUPPORT"]));

        let mut right = user("corp", "jdoe", &["sales"]);
        right.absorb_groups(&user("corp", "jdoe", &["Support"]));

        assert_eq!(left.user_groups, vec!["sales", "Support"]);
        assert_eq!(left.user_groups, right.user_groups);
    }

    #[test]
    fn test_merge_is_symmetric() {
        let mut a = user("corp", "jdoe", &["Sales"]);
        a.display_name = "Doe, John".into();
        let mut b = user("CORP", "JDOE", &["Support"]);
        b.display_name = "John Doe".into();

        let mut left = a.clone();
        left.merge(b.clone());
        let mut right = b;
        right.merge(a);

        assert_eq!(left, right);
        assert_eq!(left.user_groups, vec!["Sales", "Support"]);
    }

    #[test]
    fn test_missing_optional_fields_deserialize() {
        let json = r#"{"domain":"corp","account_name":"jdoe"}"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.account_name, "jdoe");
        assert!(record.user_groups.is_empty());
        assert_eq!(record.to_string(), "corp | jdoe, ");
    }
}
