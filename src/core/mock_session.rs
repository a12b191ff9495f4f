//! Mock directory for testing without a domain controller
//!
//! Builds small in-memory domains (users, nested groups, ACLs) and counts the
//! calls made against them, so tests can assert both on results and on which
//! directory operations were (or were not) performed.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::security::{rights, AccessControlEntry, Sid, WellKnownGroup};
use super::session::{DirectoryProvider, DirectorySession, ObjectCategory, ObjectRef};
use crate::constants::RESET_PASSWORD_RIGHT;
use crate::models::{SecureString, UserRecord};
use crate::normalize::format_base_dn;
use crate::utils::{BindError, BindErrorKind, LookupError};

/// Simulated user object
#[derive(Debug, Clone)]
pub struct MockUser {
    account: String,
    display_name: String,
    mail: String,
    enabled: bool,
    well_known: Vec<WellKnownGroup>,
    reset_grantees: Vec<String>,
    aces: Vec<AccessControlEntry>,
    acl_error: bool,
    pwd_last_set: Option<DateTime<Utc>>,
}

impl MockUser {
    pub fn new(account: &str) -> Self {
        MockUser {
            account: account.to_string(),
            display_name: format!("{} (display)", account),
            mail: format!("{}@example.com", account),
            enabled: true,
            well_known: Vec::new(),
            reset_grantees: Vec::new(),
            aces: Vec::new(),
            acl_error: false,
            pwd_last_set: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.display_name = name.to_string();
        self
    }

    /// Put the user in a well-known administrative group
    pub fn member_of_well_known(mut self, group: WellKnownGroup) -> Self {
        self.well_known.push(group);
        self
    }

    /// Grant the "Reset Password" right on this user to another account or group
    pub fn grants_reset_to(mut self, trustee: &str) -> Self {
        self.reset_grantees.push(trustee.to_string());
        self
    }

    pub fn aces(mut self, aces: Vec<AccessControlEntry>) -> Self {
        self.aces = aces;
        self
    }

    pub fn fail_acl_read(mut self) -> Self {
        self.acl_error = true;
        self
    }

    pub fn password_last_set(mut self, at: DateTime<Utc>) -> Self {
        self.pwd_last_set = Some(at);
        self
    }
}

/// Simulated group object
#[derive(Debug, Clone)]
pub struct MockGroup {
    name: String,
    members: Vec<String>,
    roster_error: Option<String>,
    roster_panic: bool,
    roster_delay: Option<Duration>,
}

impl MockGroup {
    pub fn new(name: &str) -> Self {
        MockGroup {
            name: name.to_string(),
            members: Vec::new(),
            roster_error: None,
            roster_panic: false,
            roster_delay: None,
        }
    }

    /// Direct members by account name (users or groups)
    pub fn members(mut self, members: &[&str]) -> Self {
        self.members = members.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn fail_roster(mut self, message: &str) -> Self {
        self.roster_error = Some(message.to_string());
        self
    }

    pub fn panic_roster(mut self) -> Self {
        self.roster_panic = true;
        self
    }

    pub fn roster_delay(mut self, delay: Duration) -> Self {
        self.roster_delay = Some(delay);
        self
    }
}

#[derive(Debug)]
struct Stored<T> {
    item: T,
    dn: String,
    sid: Sid,
}

#[derive(Debug)]
struct MockDomain {
    name: String,
    base_dn: String,
    domain_sid: Sid,
    next_rid: u32,
    bind_error: Option<BindErrorKind>,
    fail_sids: bool,
    users: Vec<Stored<MockUser>>,
    groups: Vec<Stored<MockGroup>>,
}

impl MockDomain {
    fn new(name: &str, index: u32) -> Self {
        let domain_sid = Sid::new(5, &[21, 1000 + index, 2000 + index, 3000 + index]);
        MockDomain {
            name: name.to_string(),
            base_dn: format_base_dn(name).unwrap_or_default(),
            domain_sid,
            next_rid: 1100,
            bind_error: None,
            fail_sids: false,
            users: Vec::new(),
            groups: Vec::new(),
        }
    }

    fn allocate_sid(&mut self) -> Sid {
        self.next_rid += 1;
        Sid::with_rid(&self.domain_sid, self.next_rid).unwrap_or_else(|| Sid::new(5, &[self.next_rid]))
    }

    fn user(&self, account: &str) -> Option<&Stored<MockUser>> {
        self.users
            .iter()
            .find(|u| u.item.account.eq_ignore_ascii_case(account))
    }

    fn group(&self, name: &str) -> Option<&Stored<MockGroup>> {
        self.groups
            .iter()
            .find(|g| g.item.name.eq_ignore_ascii_case(name))
    }

    fn sid_of(&self, account: &str) -> Option<Sid> {
        self.user(account)
            .map(|u| u.sid.clone())
            .or_else(|| self.group(account).map(|g| g.sid.clone()))
    }

    fn dn_of(&self, account: &str) -> Option<String> {
        self.user(account)
            .map(|u| u.dn.clone())
            .or_else(|| self.group(account).map(|g| g.dn.clone()))
    }

    /// Groups that contain `account` directly or through nesting
    fn groups_containing(&self, account: &str) -> Vec<&Stored<MockGroup>> {
        let mut found: Vec<&Stored<MockGroup>> = Vec::new();
        let mut frontier = vec![account.to_string()];
        while let Some(name) = frontier.pop() {
            for group in &self.groups {
                let contains = group.item.members.iter().any(|m| m.eq_ignore_ascii_case(&name));
                if contains && !found.iter().any(|g| g.item.name == group.item.name) {
                    found.push(group);
                    frontier.push(group.item.name.clone());
                }
            }
        }
        found
    }

    /// Users under `group`, through nested groups
    fn users_under(&self, group: &Stored<MockGroup>) -> Vec<&Stored<MockUser>> {
        let mut visited = HashSet::new();
        let mut users: Vec<&Stored<MockUser>> = Vec::new();
        let mut frontier = vec![group];
        while let Some(current) = frontier.pop() {
            if !visited.insert(current.item.name.to_lowercase()) {
                continue;
            }
            for member in &current.item.members {
                if let Some(user) = self.user(member) {
                    if !users.iter().any(|u| u.item.account == user.item.account) {
                        users.push(user);
                    }
                } else if let Some(nested) = self.group(member) {
                    frontier.push(nested);
                }
            }
        }
        users
    }

    fn well_known_sid(&self, group: WellKnownGroup) -> Option<Sid> {
        match group {
            WellKnownGroup::DomainAdmins => Sid::with_rid(&self.domain_sid, 512),
            WellKnownGroup::EnterpriseAdmins => Sid::with_rid(&self.domain_sid, 519),
            WellKnownGroup::BuiltinAdministrators => Some(Sid::builtin_administrators()),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    domains: HashMap<String, MockDomain>,
    bind_calls: AtomicUsize,
    roster_calls: AtomicUsize,
    binds: Mutex<Vec<(String, String)>>,
    acl_reads: Mutex<Vec<String>>,
    password_resets: Mutex<Vec<(String, String, bool)>>,
}

/// Builder for [`MockDirectory`]
pub struct MockDirectoryBuilder {
    domains: Vec<MockDomain>,
    current: usize,
}

impl MockDirectoryBuilder {
    /// Switch to (or create) another domain; later calls apply to it
    pub fn domain(mut self, name: &str) -> Self {
        match self
            .domains
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case(name))
        {
            Some(index) => self.current = index,
            None => {
                let index = self.domains.len();
                self.domains.push(MockDomain::new(name, index as u32));
                self.current = index;
            }
        }
        self
    }

    pub fn user(mut self, user: MockUser) -> Self {
        let domain = &mut self.domains[self.current];
        let sid = domain.allocate_sid();
        let dn = format!("CN={},OU=Users,{}", user.account, domain.base_dn);
        domain.users.push(Stored { item: user, dn, sid });
        self
    }

    pub fn group(mut self, group: MockGroup) -> Self {
        let domain = &mut self.domains[self.current];
        let sid = domain.allocate_sid();
        let dn = format!("CN={},OU=Groups,{}", group.name, domain.base_dn);
        domain.groups.push(Stored { item: group, dn, sid });
        self
    }

    pub fn fail_bind(mut self, kind: BindErrorKind) -> Self {
        self.domains[self.current].bind_error = Some(kind);
        self
    }

    pub fn fail_authorization_sids(mut self) -> Self {
        self.domains[self.current].fail_sids = true;
        self
    }

    pub fn build(self) -> MockDirectory {
        let domains = self
            .domains
            .into_iter()
            .map(|d| (d.name.to_lowercase(), d))
            .collect();
        MockDirectory {
            state: Arc::new(MockState {
                domains,
                ..MockState::default()
            }),
        }
    }
}

/// In-memory [`DirectoryProvider`]
///
/// Binding to a domain that was never configured fails as unreachable.
#[derive(Clone)]
pub struct MockDirectory {
    state: Arc<MockState>,
}

impl MockDirectory {
    pub fn builder(domain: &str) -> MockDirectoryBuilder {
        MockDirectoryBuilder {
            domains: Vec::new(),
            current: 0,
        }
        .domain(domain)
    }

    pub fn bind_count(&self) -> usize {
        self.state.bind_calls.load(Ordering::SeqCst)
    }

    /// (domain, username) of every bind attempt
    pub fn binds(&self) -> Vec<(String, String)> {
        self.state.binds.lock().unwrap().clone()
    }

    pub fn roster_call_count(&self) -> usize {
        self.state.roster_calls.load(Ordering::SeqCst)
    }

    /// DNs whose ACL was read, in order
    pub fn acl_reads(&self) -> Vec<String> {
        self.state.acl_reads.lock().unwrap().clone()
    }

    /// (dn, password, must_change) of every password write
    pub fn password_resets(&self) -> Vec<(String, String, bool)> {
        self.state.password_resets.lock().unwrap().clone()
    }

    pub fn sid_of(&self, domain: &str, account: &str) -> Option<Sid> {
        self.state.domains.get(&domain.to_lowercase())?.sid_of(account)
    }

    pub fn dn_of(&self, domain: &str, account: &str) -> Option<String> {
        self.state.domains.get(&domain.to_lowercase())?.dn_of(account)
    }
}

#[async_trait::async_trait]
impl DirectoryProvider for MockDirectory {
    async fn bind(
        &self,
        domain: &str,
        username: &str,
        _secret: &SecureString,
    ) -> Result<Box<dyn DirectorySession>, BindError> {
        self.state.bind_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .binds
            .lock()
            .unwrap()
            .push((domain.to_string(), username.to_string()));

        let key = domain.to_lowercase();
        let Some(data) = self.state.domains.get(&key) else {
            return Err(BindError::new(
                BindErrorKind::ServerUnreachable,
                domain,
                username,
                "The server is not operational.",
            ));
        };
        if let Some(kind) = data.bind_error {
            return Err(BindError::new(kind, domain, username, "simulated bind failure"));
        }
        Ok(Box::new(MockSession {
            domain: data.name.clone(),
            key,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    domain: String,
    key: String,
    state: Arc<MockState>,
}

impl MockSession {
    fn data(&self) -> Result<&MockDomain, LookupError> {
        self.state
            .domains
            .get(&self.key)
            .ok_or_else(|| LookupError::Query(format!("domain '{}' vanished", self.domain)))
    }
}

#[async_trait::async_trait]
impl DirectorySession for MockSession {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn find_object(
        &self,
        account_name: &str,
        category: ObjectCategory,
    ) -> Result<Option<ObjectRef>, LookupError> {
        let data = self.data()?;
        let found = match category {
            ObjectCategory::User => data.user(account_name).map(|u| ObjectRef {
                dn: u.dn.clone(),
                account_name: u.item.account.clone(),
                category,
                sid: Some(u.sid.clone()),
            }),
            ObjectCategory::Group => data.group(account_name).map(|g| ObjectRef {
                dn: g.dn.clone(),
                account_name: g.item.name.clone(),
                category,
                sid: Some(g.sid.clone()),
            }),
        };
        Ok(found)
    }

    async fn list_group_members(&self, group: &ObjectRef) -> Result<Vec<String>, LookupError> {
        let data = self.data()?;
        let stored = data
            .group(&group.account_name)
            .ok_or_else(|| LookupError::ObjectNotFound(group.dn.clone()))?;
        Ok(stored
            .item
            .members
            .iter()
            .filter_map(|m| data.dn_of(m))
            .collect())
    }

    async fn list_enabled_group_members(
        &self,
        group_dn: &str,
    ) -> Result<Vec<UserRecord>, LookupError> {
        self.state.roster_calls.fetch_add(1, Ordering::SeqCst);
        let data = self.data()?;
        let group = data
            .groups
            .iter()
            .find(|g| g.dn.eq_ignore_ascii_case(group_dn))
            .ok_or_else(|| LookupError::ObjectNotFound(group_dn.to_string()))?;

        if let Some(delay) = group.item.roster_delay {
            tokio::time::sleep(delay).await;
        }
        if group.item.roster_panic {
            panic!("simulated roster panic for {}", group.item.name);
        }
        if let Some(message) = &group.item.roster_error {
            return Err(LookupError::Query(message.clone()));
        }

        Ok(data
            .users_under(group)
            .into_iter()
            .filter(|u| u.item.enabled)
            .map(|u| UserRecord {
                domain: self.domain.clone(),
                account_name: u.item.account.clone(),
                display_name: u.item.display_name.clone(),
                mail: u.item.mail.clone(),
                ..Default::default()
            })
            .collect())
    }

    async fn get_access_control_entries(
        &self,
        dn: &str,
    ) -> Result<Vec<AccessControlEntry>, LookupError> {
        self.state.acl_reads.lock().unwrap().push(dn.to_string());
        let data = self.data()?;
        let user = data
            .users
            .iter()
            .find(|u| u.dn.eq_ignore_ascii_case(dn))
            .ok_or_else(|| LookupError::ObjectNotFound(dn.to_string()))?;
        if user.item.acl_error {
            return Err(LookupError::Query("insufficient access to nTSecurityDescriptor".into()));
        }

        let mut aces = user.item.aces.clone();
        for trustee in &user.item.reset_grantees {
            if let Some(sid) = data.sid_of(trustee) {
                aces.push(AccessControlEntry::allow_object(
                    sid,
                    rights::CONTROL_ACCESS,
                    RESET_PASSWORD_RIGHT,
                ));
            }
        }
        Ok(aces)
    }

    async fn get_authorization_sids(&self, user: &ObjectRef) -> Result<HashSet<Sid>, LookupError> {
        let data = self.data()?;
        if data.fail_sids {
            return Err(LookupError::Query("tokenGroups unavailable".into()));
        }
        let stored = data
            .user(&user.account_name)
            .ok_or_else(|| LookupError::ObjectNotFound(user.dn.clone()))?;

        let mut sids: HashSet<Sid> = HashSet::new();
        sids.insert(stored.sid.clone());
        for group in data.groups_containing(&stored.item.account) {
            sids.insert(group.sid.clone());
        }
        for well_known in &stored.item.well_known {
            if let Some(sid) = data.well_known_sid(*well_known) {
                sids.insert(sid);
            }
        }
        Ok(sids)
    }

    async fn reset_password(
        &self,
        user: &ObjectRef,
        new_password: &SecureString,
        must_change: bool,
    ) -> Result<(), LookupError> {
        self.state.password_resets.lock().unwrap().push((
            user.dn.clone(),
            new_password.as_str().to_string(),
            must_change,
        ));
        Ok(())
    }

    async fn last_password_set(
        &self,
        user: &ObjectRef,
    ) -> Result<Option<DateTime<Utc>>, LookupError> {
        let data = self.data()?;
        let stored = data
            .user(&user.account_name)
            .ok_or_else(|| LookupError::ObjectNotFound(user.dn.clone()))?;
        Ok(stored.item.pwd_last_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MockDirectory {
        MockDirectory::builder("corp.example.com")
            .user(MockUser::new("jdoe"))
            .user(MockUser::new("asmith").disabled())
            .user(MockUser::new("bwayne"))
            .group(MockGroup::new("Support").members(&["bwayne"]))
            .group(MockGroup::new("Sales").members(&["jdoe", "asmith", "Support"]))
            .build()
    }

    #[tokio::test]
    async fn test_unknown_domain_is_unreachable() {
        let dir = sample();
        let err = dir
            .bind("other.example.com", "admin", &SecureString::new("pw"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, BindErrorKind::ServerUnreachable);
        assert_eq!(dir.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_nested_roster_excludes_disabled() {
        let dir = sample();
        let session = dir
            .bind("corp.example.com", "admin", &SecureString::new("pw"))
            .await
            .unwrap();
        let group = session
            .find_object("sales", ObjectCategory::Group)
            .await
            .unwrap()
            .unwrap();

        let direct = session.list_group_members(&group).await.unwrap();
        assert_eq!(direct.len(), 3);

        let mut names: Vec<_> = session
            .list_enabled_group_members(&group.dn)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.account_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["bwayne", "jdoe"]);
    }

    #[tokio::test]
    async fn test_authorization_sids_follow_nesting() {
        let dir = sample();
        let session = dir
            .bind("corp.example.com", "admin", &SecureString::new("pw"))
            .await
            .unwrap();
        let user = session
            .find_object("bwayne", ObjectCategory::User)
            .await
            .unwrap()
            .unwrap();
        let sids = session.get_authorization_sids(&user).await.unwrap();
        assert!(sids.contains(&dir.sid_of("corp.example.com", "Support").unwrap()));
        assert!(sids.contains(&dir.sid_of("corp.example.com", "Sales").unwrap()));
        assert_eq!(sids.len(), 3);
    }
}
