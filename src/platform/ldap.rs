//! LDAP directory provider
//!
//! Implements [`DirectoryProvider`] and [`DirectorySession`] on top of the
//! async `ldap3` client. One [`LdapSession`] wraps one bound connection; the
//! connection driver runs on its own tokio task until the session unbinds.
//!
//! Every bind failure is classified in one place ([`classify_ldap_error`] and
//! [`classify_result_code`]) so callers see a [`BindErrorKind`] and never an
//! LDAP result code.

use chrono::{DateTime, Utc};
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::controls::RawControl;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::TcpStream;

use crate::config::LdapSettings;
use crate::constants::{
    MEMBER_RANGE_STEP, OID_MATCHING_RULE_BIT_AND, OID_MATCHING_RULE_IN_CHAIN, OID_SD_FLAGS_CONTROL,
    ROSTER_ATTRIBUTES, SD_FLAGS_DACL, UF_ACCOUNTDISABLE,
};
use crate::core::{
    AccessControlEntry, DirectoryProvider, DirectorySession, ObjectCategory, ObjectRef,
    SecurityDescriptor, Sid,
};
use crate::logger::LogSink;
use crate::models::{SecureString, UserRecord};
use crate::normalize::{build_bind_username, escape_ldap_filter, format_base_dn};
use crate::utils::{BindError, BindErrorKind, LookupError};

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Map an LDAP result code to a bind failure kind
///
/// - 49 `invalidCredentials`
/// - 51 `busy`, 52 `unavailable`, 81 `serverDown`, 91 `connectError`
pub fn classify_result_code(rc: u32) -> BindErrorKind {
    match rc {
        49 => BindErrorKind::AuthenticationFailed,
        51 | 52 | 81 | 91 => BindErrorKind::ServerUnreachable,
        _ => BindErrorKind::Other,
    }
}

/// Map an `ldap3` error raised while connecting or binding
pub fn classify_ldap_error(err: &LdapError) -> BindErrorKind {
    match err {
        LdapError::LdapResult { result } => classify_result_code(result.rc),
        LdapError::Io { .. }
        | LdapError::Timeout { .. }
        | LdapError::EndOfStream { .. }
        | LdapError::ResultRecv { .. } => BindErrorKind::ServerUnreachable,
        _ => BindErrorKind::Other,
    }
}

/// Windows FILETIME (100 ns ticks since 1601) to UTC; zero or negative is `None`
pub fn filetime_to_utc(filetime: i64) -> Option<DateTime<Utc>> {
    if filetime <= 0 {
        return None;
    }
    let secs = filetime / 10_000_000 - FILETIME_UNIX_OFFSET_SECS;
    let nanos = (filetime % 10_000_000) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
}

/// `unicodePwd` value: the password in double quotes, UTF-16LE encoded
///
/// Domain controllers only accept this write over an encrypted connection.
pub fn encode_unicode_pwd(password: &str) -> Vec<u8> {
    format!("\"{}\"", password)
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Filter matching one object of `category` by sAMAccountName
pub fn object_filter(account_name: &str, category: ObjectCategory) -> String {
    format!(
        "(&(objectCategory={})(sAMAccountName={}))",
        category.as_str(),
        escape_ldap_filter(account_name)
    )
}

/// Filter matching enabled users whose membership chain reaches `group_dn`
pub fn enabled_members_filter(group_dn: &str) -> String {
    format!(
        "(&(objectCategory=person)(objectClass=user)(memberOf:{}:={})(!(userAccountControl:{}:={})))",
        OID_MATCHING_RULE_IN_CHAIN,
        escape_ldap_filter(group_dn),
        OID_MATCHING_RULE_BIT_AND,
        UF_ACCOUNTDISABLE
    )
}

/// Outcome of one ranged `member` read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRange {
    /// Last chunk (`member;range=N-*` or plain `member`)
    Final,
    /// More values follow, starting at this index
    Continue(usize),
}

/// Parse the attribute name the server returned for a ranged `member` read
pub fn parse_member_range(attr_name: &str) -> Option<MemberRange> {
    let lower = attr_name.to_ascii_lowercase();
    if lower == "member" {
        return Some(MemberRange::Final);
    }
    let range = lower.strip_prefix("member;range=")?;
    let (_, end) = range.split_once('-')?;
    if end == "*" {
        return Some(MemberRange::Final);
    }
    end.parse::<usize>().ok().map(|end| MemberRange::Continue(end + 1))
}

/// Case-insensitive first value of a text attribute
fn first_value<'a>(attrs: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// Every raw value of `name`, whichever map the entry filed it under
///
/// `SearchEntry::construct` keeps an attribute in `attrs` when all of its
/// values are valid UTF-8, which short SIDs often are.
fn binary_values(entry: &SearchEntry, name: &str) -> Vec<Vec<u8>> {
    let binary = entry
        .bin_attrs
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .flat_map(|(_, values)| values.iter().cloned());
    let text = entry
        .attrs
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .flat_map(|(_, values)| values.iter().map(|value| value.clone().into_bytes()));
    binary.chain(text).collect()
}

fn first_binary(entry: &SearchEntry, name: &str) -> Option<Vec<u8>> {
    binary_values(entry, name).into_iter().next()
}

/// SD flags control asking for the DACL only (BER `SEQUENCE { INTEGER }`)
fn sd_flags_control() -> RawControl {
    RawControl {
        ctype: OID_SD_FLAGS_CONTROL.to_string(),
        crit: true,
        val: Some(vec![0x30, 0x03, 0x02, 0x01, SD_FLAGS_DACL]),
    }
}

/// `tokenGroups` and `objectSid` of a user entry
fn entry_sids(entry: &SearchEntry) -> Result<HashSet<Sid>, LookupError> {
    let mut sids = HashSet::new();
    for name in ["tokenGroups", "objectSid"] {
        for value in binary_values(entry, name) {
            sids.insert(Sid::from_bytes(&value)?);
        }
    }
    Ok(sids)
}

/// Build a roster record from a search entry's attributes
///
/// `extensionAttribute2` carries the job title in this directory layout.
pub fn user_from_attrs(domain: &str, attrs: &HashMap<String, Vec<String>>) -> UserRecord {
    let get = |name: &str| first_value(attrs, name).unwrap_or_default().to_string();
    UserRecord {
        domain: domain.to_string(),
        account_name: get("sAMAccountName"),
        display_name: get("displayName"),
        given_name: get("givenName"),
        surname: get("sn"),
        mail: get("mail"),
        title: get("extensionAttribute2"),
        description: get("description"),
        user_groups: Vec::new(),
    }
}

/// LDAP-backed directory provider
pub struct LdapDirectory {
    settings: LdapSettings,
    log: Arc<dyn LogSink>,
}

impl LdapDirectory {
    pub fn new(settings: LdapSettings, log: Arc<dyn LogSink>) -> Self {
        LdapDirectory { settings, log }
    }

    /// Advisory TCP probe of the LDAP port; only ever warns
    async fn probe_reachability(&self, domain: &str) {
        let target = (domain, self.settings.port);
        match tokio::time::timeout(self.settings.reachability_timeout, TcpStream::connect(target))
            .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => self.log.warn(&format!(
                "Domain '{}' port {} is not reachable: {}",
                domain, self.settings.port, e
            )),
            Err(_) => self.log.warn(&format!(
                "Domain '{}' port {} did not answer within {:?}",
                domain, self.settings.port, self.settings.reachability_timeout
            )),
        }
    }

    async fn read_base_dn(ldap: &mut Ldap, domain: &str) -> String {
        let from_root_dse = async {
            let (entries, _) = ldap
                .search("", Scope::Base, "(objectClass=*)", vec!["defaultNamingContext"])
                .await?
                .success()?;
            Ok::<_, LdapError>(entries.into_iter().next().and_then(|e| {
                first_value(&SearchEntry::construct(e).attrs, "defaultNamingContext")
                    .map(str::to_string)
            }))
        };
        match from_root_dse.await {
            Ok(Some(dn)) if !dn.is_empty() => dn,
            _ => format_base_dn(domain).unwrap_or_default(),
        }
    }
}

#[async_trait::async_trait]
impl DirectoryProvider for LdapDirectory {
    async fn bind(
        &self,
        domain: &str,
        username: &str,
        secret: &SecureString,
    ) -> Result<Box<dyn DirectorySession>, BindError> {
        let domain = domain.trim();
        self.probe_reachability(domain).await;

        let url = self.settings.url_for(domain);
        tracing::debug!(url = %url, "Connecting to LDAP server");

        let conn_settings = LdapConnSettings::new().set_conn_timeout(self.settings.connect_timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &url)
            .await
            .map_err(|e| BindError::new(classify_ldap_error(&e), domain, username, e.to_string()))?;

        let log = Arc::clone(&self.log);
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                log.debug(&format!("LDAP connection driver ended: {}", e));
            }
        });

        let bind_name = build_bind_username(username, domain);
        let result = ldap
            .simple_bind(&bind_name, secret.as_str())
            .await
            .map_err(|e| BindError::new(classify_ldap_error(&e), domain, username, e.to_string()))?;
        if result.rc != 0 {
            let _ = ldap.unbind().await;
            return Err(BindError::new(
                classify_result_code(result.rc),
                domain,
                username,
                format!("LDAP bind failed with code {}: {}", result.rc, result.text),
            ));
        }

        let base_dn = Self::read_base_dn(&mut ldap, domain).await;
        tracing::debug!(domain = %domain, base_dn = %base_dn, "LDAP bind established");

        Ok(Box::new(LdapSession {
            domain: domain.to_string(),
            base_dn,
            page_size: self.settings.page_size,
            ldap,
        }))
    }
}

/// One bound LDAP connection
pub struct LdapSession {
    domain: String,
    base_dn: String,
    page_size: i32,
    ldap: Ldap,
}

impl LdapSession {
    /// Operation handle; controls set on it apply to its next request only
    fn handle(&self) -> Ldap {
        self.ldap.clone()
    }
}

/// Attributes of the single object at `dn`
async fn read_entry(ldap: &mut Ldap, dn: &str, attrs: Vec<&str>) -> Result<SearchEntry, LookupError> {
    let (entries, _) = ldap
        .search(dn, Scope::Base, "(objectClass=*)", attrs)
        .await
        .and_then(|r| r.success())
        .map_err(|e| match &e {
            // noSuchObject
            LdapError::LdapResult { result } if result.rc == 32 => {
                LookupError::ObjectNotFound(dn.to_string())
            }
            _ => LookupError::Query(format!("Read of '{}' failed: {}", dn, e)),
        })?;
    entries
        .into_iter()
        .next()
        .map(SearchEntry::construct)
        .ok_or_else(|| LookupError::ObjectNotFound(dn.to_string()))
}

#[async_trait::async_trait]
impl DirectorySession for LdapSession {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn find_object(
        &self,
        account_name: &str,
        category: ObjectCategory,
    ) -> Result<Option<ObjectRef>, LookupError> {
        let mut ldap = self.handle();
        let filter = object_filter(account_name, category);
        let (entries, _) = ldap
            .search(
                &self.base_dn,
                Scope::Subtree,
                &filter,
                vec!["sAMAccountName", "objectSid"],
            )
            .await
            .and_then(|r| r.success())
            .map_err(|e| LookupError::Query(format!("Search {} failed: {}", filter, e)))?;

        if entries.len() != 1 {
            return Ok(None);
        }
        let Some(entry) = entries.into_iter().next().map(SearchEntry::construct) else {
            return Ok(None);
        };

        let sid = first_binary(&entry, "objectSid")
            .map(|bytes| Sid::from_bytes(&bytes))
            .transpose()?;
        Ok(Some(ObjectRef {
            account_name: first_value(&entry.attrs, "sAMAccountName")
                .unwrap_or(account_name)
                .to_string(),
            dn: entry.dn,
            category,
            sid,
        }))
    }

    async fn list_group_members(&self, group: &ObjectRef) -> Result<Vec<String>, LookupError> {
        let mut ldap = self.handle();
        let mut members = Vec::new();
        let mut start = 0usize;

        loop {
            let range_attr = format!("member;range={}-{}", start, start + MEMBER_RANGE_STEP - 1);
            let entry = read_entry(&mut ldap, &group.dn, vec![range_attr.as_str()]).await?;

            let Some((name, values)) = entry
                .attrs
                .into_iter()
                .find(|(name, _)| parse_member_range(name).is_some())
            else {
                break;
            };
            members.extend(values);

            match parse_member_range(&name) {
                Some(MemberRange::Continue(next)) if next > start => start = next,
                _ => break,
            }
        }

        tracing::debug!(group = %group.dn, count = members.len(), "Read group members");
        Ok(members)
    }

    async fn list_enabled_group_members(
        &self,
        group_dn: &str,
    ) -> Result<Vec<UserRecord>, LookupError> {
        let mut ldap = self.handle();
        let filter = enabled_members_filter(group_dn);
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(self.page_size)),
        ];
        let query_error = |e: LdapError| {
            LookupError::Query(format!("Roster search under '{}' failed: {}", group_dn, e))
        };

        let mut search = ldap
            .streaming_search_with(
                adapters,
                &self.base_dn,
                Scope::Subtree,
                &filter,
                ROSTER_ATTRIBUTES.to_vec(),
            )
            .await
            .map_err(query_error)?;

        let mut users = Vec::new();
        while let Some(entry) = search.next().await.map_err(query_error)? {
            let entry = SearchEntry::construct(entry);
            let user = user_from_attrs(&self.domain, &entry.attrs);
            if !user.account_name.is_empty() {
                users.push(user);
            }
        }
        search.finish().await.success().map_err(query_error)?;
        Ok(users)
    }

    async fn get_access_control_entries(
        &self,
        dn: &str,
    ) -> Result<Vec<AccessControlEntry>, LookupError> {
        let mut ldap = self.handle();
        // Without the SD flags control a non-owner may get nothing back
        ldap.with_controls(vec![sd_flags_control()]);
        let entry = read_entry(&mut ldap, dn, vec!["nTSecurityDescriptor"]).await?;
        let bytes = first_binary(&entry, "nTSecurityDescriptor").ok_or_else(|| {
            LookupError::Decode(format!("No nTSecurityDescriptor returned for '{}'", dn))
        })?;
        Ok(SecurityDescriptor::parse(&bytes)?.dacl)
    }

    async fn get_authorization_sids(&self, user: &ObjectRef) -> Result<HashSet<Sid>, LookupError> {
        let mut ldap = self.handle();
        let entry = read_entry(&mut ldap, &user.dn, vec!["tokenGroups", "objectSid"]).await?;

        let mut sids = entry_sids(&entry)?;
        if let Some(sid) = &user.sid {
            sids.insert(sid.clone());
        }
        Ok(sids)
    }

    async fn reset_password(
        &self,
        user: &ObjectRef,
        new_password: &SecureString,
        must_change: bool,
    ) -> Result<(), LookupError> {
        let mut ldap = self.handle();
        ldap.modify(
            &user.dn,
            vec![Mod::Replace(
                b"unicodePwd".to_vec(),
                HashSet::from([encode_unicode_pwd(new_password.as_str())]),
            )],
        )
        .await
        .and_then(|r| r.success())
        .map_err(|e| {
            LookupError::Write(format!("Password write on '{}' failed: {}", user.dn, e))
        })?;

        if must_change {
            ldap.modify(
                &user.dn,
                vec![Mod::Replace(
                    b"pwdLastSet".to_vec(),
                    HashSet::from([b"0".to_vec()]),
                )],
            )
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                LookupError::Write(format!("Setting pwdLastSet on '{}' failed: {}", user.dn, e))
            })?;
        }
        Ok(())
    }

    async fn last_password_set(
        &self,
        user: &ObjectRef,
    ) -> Result<Option<DateTime<Utc>>, LookupError> {
        let mut ldap = self.handle();
        let entry = read_entry(&mut ldap, &user.dn, vec!["pwdLastSet"]).await?;
        let Some(raw) = first_value(&entry.attrs, "pwdLastSet") else {
            return Ok(None);
        };
        let filetime = raw
            .parse::<i64>()
            .map_err(|_| LookupError::Decode(format!("Invalid pwdLastSet '{}'", raw)))?;
        Ok(filetime_to_utc(filetime))
    }

    async fn unbind(&self) {
        let mut ldap = self.handle();
        if let Err(e) = ldap.unbind().await {
            tracing::debug!(error = %e, "LDAP unbind failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::privileged_memberships;
    use chrono::TimeZone;

    #[test]
    fn test_classify_result_codes() {
        assert_eq!(classify_result_code(49), BindErrorKind::AuthenticationFailed);
        assert_eq!(classify_result_code(52), BindErrorKind::ServerUnreachable);
        assert_eq!(classify_result_code(81), BindErrorKind::ServerUnreachable);
        assert_eq!(classify_result_code(50), BindErrorKind::Other);
    }

    #[test]
    fn test_classify_transport_errors() {
        let io = LdapError::Io {
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(classify_ldap_error(&io), BindErrorKind::ServerUnreachable);
        assert_eq!(
            classify_ldap_error(&LdapError::EndOfStream),
            BindErrorKind::ServerUnreachable
        );
    }

    #[test]
    fn test_filetime_conversion() {
        // 2024-01-15T08:30:00Z
        let filetime = (1_705_307_400 + FILETIME_UNIX_OFFSET_SECS) * 10_000_000;
        assert_eq!(
            filetime_to_utc(filetime),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap())
        );
        assert_eq!(filetime_to_utc(0), None);
        assert_eq!(filetime_to_utc(-1), None);
    }

    #[test]
    fn test_unicode_pwd_encoding() {
        assert_eq!(
            encode_unicode_pwd("ab"),
            vec![0x22, 0x00, 0x61, 0x00, 0x62, 0x00, 0x22, 0x00]
        );
    }

    #[test]
    fn test_filters_escape_values() {
        assert_eq!(
            object_filter("j*doe", ObjectCategory::User),
            "(&(objectCategory=user)(sAMAccountName=j\\2adoe))"
        );
        let filter = enabled_members_filter("CN=Sales (EU),OU=Groups,DC=corp,DC=example,DC=com");
        assert!(filter.contains("memberOf:1.2.840.113556.1.4.1941:=CN=Sales \\28EU\\29,OU=Groups"));
        assert!(filter.ends_with("(!(userAccountControl:1.2.840.113556.1.4.803:=2)))"));
    }

    #[test]
    fn test_member_range_parsing() {
        assert_eq!(parse_member_range("member"), Some(MemberRange::Final));
        assert_eq!(
            parse_member_range("member;range=0-1499"),
            Some(MemberRange::Continue(1500))
        );
        assert_eq!(
            parse_member_range("Member;Range=1500-*"),
            Some(MemberRange::Final)
        );
        assert_eq!(parse_member_range("memberOf"), None);
        assert_eq!(parse_member_range("member;range=oops"), None);
    }

    #[test]
    fn test_user_from_attrs_maps_title() {
        let mut attrs = HashMap::new();
        attrs.insert("sAMAccountName".to_string(), vec!["jdoe".to_string()]);
        attrs.insert("displayname".to_string(), vec!["Jane Doe".to_string()]);
        attrs.insert("extensionAttribute2".to_string(), vec!["Engineer".to_string()]);

        let user = user_from_attrs("corp.example.com", &attrs);
        assert_eq!(user.account_name, "jdoe");
        assert_eq!(user.display_name, "Jane Doe");
        assert_eq!(user.title, "Engineer");
        assert_eq!(user.mail, "");
        assert!(user.user_groups.is_empty());
    }

    fn entry(attrs: Vec<(&str, Vec<u8>)>, bin_attrs: Vec<(&str, Vec<u8>)>) -> SearchEntry {
        SearchEntry {
            dn: "CN=alice,OU=Staff,DC=corp,DC=example,DC=com".to_string(),
            attrs: attrs
                .into_iter()
                .map(|(name, value)| {
                    (name.to_string(), vec![String::from_utf8(value).unwrap()])
                })
                .collect(),
            bin_attrs: bin_attrs
                .into_iter()
                .map(|(name, value)| (name.to_string(), vec![value]))
                .collect(),
        }
    }

    #[test]
    fn test_sd_flags_control_requests_dacl_only() {
        let control = sd_flags_control();
        assert_eq!(control.ctype, "1.2.840.113556.1.4.801");
        assert!(control.crit);
        assert_eq!(control.val, Some(vec![0x30, 0x03, 0x02, 0x01, 0x04]));
    }

    #[test]
    fn test_entry_sids_reads_utf8_valid_sids_from_text_attrs() {
        // Every byte of this SID is below 0x80, so ldap3 files it as text
        let admins: Sid = "S-1-5-21-1-2-3-512".parse().unwrap();
        let user: Sid = "S-1-5-21-1-2-3-1104".parse().unwrap();
        let entry = entry(
            vec![("tokenGroups", admins.to_bytes())],
            vec![("objectSid", user.to_bytes())],
        );

        let sids = entry_sids(&entry).unwrap();

        assert_eq!(sids.len(), 2);
        assert!(sids.contains(&admins));
        assert!(sids.contains(&user));
        assert!(!privileged_memberships(&sids).is_empty());
    }

    #[test]
    fn test_first_binary_falls_back_to_text_attrs() {
        let sid: Sid = "S-1-5-21-1-2-3-1104".parse().unwrap();
        let entry = entry(vec![("objectSID", sid.to_bytes())], vec![]);

        let bytes = first_binary(&entry, "objectSid").unwrap();

        assert_eq!(Sid::from_bytes(&bytes).unwrap(), sid);
        assert!(first_binary(&entry, "nTSecurityDescriptor").is_none());
    }
}
