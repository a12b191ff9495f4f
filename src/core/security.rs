//! Security identifiers, access control entries, and the reset-password test
//!
//! Decodes the self-relative `nTSecurityDescriptor` blob returned by the
//! directory (MS-DTYP 2.4.6) far enough to answer one question: does any
//! Allow entry for one of the caller's SIDs grant a password reset?

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::{RESET_PASSWORD_RIGHT, UNICODE_PWD_ATTRIBUTE};
use crate::utils::SecurityDescriptorError;

/// Access mask bits (MS-DTYP 2.4.3, MS-ADTS 5.1.3.2)
pub mod rights {
    pub const WRITE_PROPERTY: u32 = 0x0000_0020;
    pub const CONTROL_ACCESS: u32 = 0x0000_0100;
    pub const GENERIC_ALL: u32 = 0x1000_0000;
}

const NT_AUTHORITY: u64 = 5;
const SECURITY_NT_NON_UNIQUE: u32 = 21;
const SECURITY_BUILTIN_DOMAIN_RID: u32 = 32;
const DOMAIN_ALIAS_RID_ADMINS: u32 = 544;
const DOMAIN_GROUP_RID_ADMINS: u32 = 512;
const DOMAIN_GROUP_RID_ENTERPRISE_ADMINS: u32 = 519;

const ACE_OBJECT_TYPE_PRESENT: u32 = 0x1;
const ACE_INHERITED_OBJECT_TYPE_PRESENT: u32 = 0x2;

/// Security identifier
///
/// Parsed from the binary form stored in `objectSid`/`tokenGroups` or from
/// the `S-1-5-...` string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub const MAX_SUB_AUTHORITIES: usize = 15;

    pub fn new(authority: u64, sub_authorities: &[u32]) -> Self {
        Sid {
            revision: 1,
            authority,
            sub_authorities: sub_authorities.to_vec(),
        }
    }

    /// `S-1-5-32-544`
    pub fn builtin_administrators() -> Self {
        Sid::new(NT_AUTHORITY, &[SECURITY_BUILTIN_DOMAIN_RID, DOMAIN_ALIAS_RID_ADMINS])
    }

    /// SID of `rid` inside the domain identified by `domain`
    ///
    /// Returns `None` when `domain` is not a domain SID (`S-1-5-21-a-b-c`).
    pub fn with_rid(domain: &Sid, rid: u32) -> Option<Self> {
        if !domain.is_domain_sid() {
            return None;
        }
        let mut subs = domain.sub_authorities.clone();
        subs.push(rid);
        Some(Sid::new(NT_AUTHORITY, &subs))
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Last sub-authority
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }

    fn is_domain_sid(&self) -> bool {
        self.authority == NT_AUTHORITY
            && self.sub_authorities.len() == 4
            && self.sub_authorities[0] == SECURITY_NT_NON_UNIQUE
    }

    /// Account or group inside a domain: `S-1-5-21-a-b-c-rid`
    fn is_domain_account(&self) -> bool {
        self.authority == NT_AUTHORITY
            && self.sub_authorities.len() == 5
            && self.sub_authorities[0] == SECURITY_NT_NON_UNIQUE
    }

    /// Decode a SID from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecurityDescriptorError> {
        Self::read_at(bytes, 0).map(|(sid, _)| sid)
    }

    /// Decode a SID at `offset`, returning it with its encoded length
    pub(crate) fn read_at(
        bytes: &[u8],
        offset: usize,
    ) -> Result<(Self, usize), SecurityDescriptorError> {
        let header = slice(bytes, offset, 8)?;
        let revision = header[0];
        if revision != 1 {
            return Err(SecurityDescriptorError::UnsupportedRevision(revision));
        }
        let count = header[1] as usize;
        if count > Self::MAX_SUB_AUTHORITIES {
            return Err(SecurityDescriptorError::InvalidSid(format!(
                "{} sub-authorities",
                count
            )));
        }
        let authority = header[2..8]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        let subs = slice(bytes, offset + 8, count * 4)?;
        let sub_authorities = subs
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok((
            Sid {
                revision,
                authority,
                sub_authorities,
            },
            8 + count * 4,
        ))
    }

    /// Binary form as stored by the directory
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.sub_authorities.len() * 4);
        out.push(self.revision);
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..8]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority >= 1 << 32 {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = SecurityDescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SecurityDescriptorError::InvalidSid(s.to_string());
        let mut parts = s.trim().split('-');
        if !matches!(parts.next(), Some(p) if p.eq_ignore_ascii_case("S")) {
            return Err(invalid());
        }
        let revision: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if revision != 1 {
            return Err(SecurityDescriptorError::UnsupportedRevision(revision));
        }
        let authority_text = parts.next().ok_or_else(invalid)?;
        let authority = match authority_text
            .strip_prefix("0x")
            .or_else(|| authority_text.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
            None => authority_text.parse::<u64>().map_err(|_| invalid())?,
        };
        if authority >= 1 << 48 {
            return Err(invalid());
        }
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        if sub_authorities.len() > Self::MAX_SUB_AUTHORITIES {
            return Err(invalid());
        }
        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl TryFrom<String> for Sid {
    type Error = SecurityDescriptorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Sid> for String {
    fn from(value: Sid) -> Self {
        value.to_string()
    }
}

/// Highly-privileged groups whose members can reset any password
///
/// Recognised from the SID structure, so a domain whose identifier happens to
/// end in `512` is not mistaken for Domain Admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WellKnownGroup {
    DomainAdmins,
    BuiltinAdministrators,
    EnterpriseAdmins,
}

impl WellKnownGroup {
    pub const ALL: [WellKnownGroup; 3] = [
        WellKnownGroup::DomainAdmins,
        WellKnownGroup::BuiltinAdministrators,
        WellKnownGroup::EnterpriseAdmins,
    ];

    pub fn classify(sid: &Sid) -> Option<Self> {
        if *sid == Sid::builtin_administrators() {
            return Some(WellKnownGroup::BuiltinAdministrators);
        }
        if sid.is_domain_account() {
            return match sid.rid() {
                Some(DOMAIN_GROUP_RID_ADMINS) => Some(WellKnownGroup::DomainAdmins),
                Some(DOMAIN_GROUP_RID_ENTERPRISE_ADMINS) => Some(WellKnownGroup::EnterpriseAdmins),
                _ => None,
            };
        }
        None
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WellKnownGroup::DomainAdmins => "Domain Admins",
            WellKnownGroup::BuiltinAdministrators => "Administrators",
            WellKnownGroup::EnterpriseAdmins => "Enterprise Admins",
        }
    }
}

impl fmt::Display for WellKnownGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Well-known privileged groups represented in `sids`, in a stable order
pub fn privileged_memberships(sids: &HashSet<Sid>) -> Vec<WellKnownGroup> {
    WellKnownGroup::ALL
        .into_iter()
        .filter(|group| sids.iter().any(|sid| WellKnownGroup::classify(sid) == Some(*group)))
        .collect()
}

/// ACE type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AceKind {
    AccessAllowed,
    AccessDenied,
    AccessAllowedObject,
    AccessDeniedObject,
    Other(u8),
}

impl AceKind {
    fn from_byte(b: u8) -> Self {
        match b {
            0x00 => AceKind::AccessAllowed,
            0x01 => AceKind::AccessDenied,
            0x05 => AceKind::AccessAllowedObject,
            0x06 => AceKind::AccessDeniedObject,
            other => AceKind::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            AceKind::AccessAllowed => 0x00,
            AceKind::AccessDenied => 0x01,
            AceKind::AccessAllowedObject => 0x05,
            AceKind::AccessDeniedObject => 0x06,
            AceKind::Other(b) => b,
        }
    }

    pub fn is_allow(self) -> bool {
        matches!(self, AceKind::AccessAllowed | AceKind::AccessAllowedObject)
    }

    fn is_object(self) -> bool {
        matches!(self, AceKind::AccessAllowedObject | AceKind::AccessDeniedObject)
    }
}

/// One entry of a DACL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControlEntry {
    pub kind: AceKind,
    pub flags: u8,
    pub mask: u32,
    /// Extended right, property, or property set the entry applies to
    pub object_type: Option<Uuid>,
    pub inherited_object_type: Option<Uuid>,
    pub trustee: Sid,
}

impl AccessControlEntry {
    /// Allow entry without an object type
    pub fn allow(trustee: Sid, mask: u32) -> Self {
        AccessControlEntry {
            kind: AceKind::AccessAllowed,
            flags: 0,
            mask,
            object_type: None,
            inherited_object_type: None,
            trustee,
        }
    }

    /// Allow entry scoped to one object type
    pub fn allow_object(trustee: Sid, mask: u32, object_type: Uuid) -> Self {
        AccessControlEntry {
            kind: AceKind::AccessAllowedObject,
            flags: 0,
            mask,
            object_type: Some(object_type),
            inherited_object_type: None,
            trustee,
        }
    }

    /// Deny entry scoped to one object type
    pub fn deny_object(trustee: Sid, mask: u32, object_type: Uuid) -> Self {
        AccessControlEntry {
            kind: AceKind::AccessDeniedObject,
            object_type: Some(object_type),
            ..AccessControlEntry::allow(trustee, mask)
        }
    }

    fn has(&self, bits: u32) -> bool {
        self.mask & bits == bits
    }

    /// Whether this entry, taken alone, grants a password reset
    ///
    /// Accepts the "Reset Password" extended right, "All Extended Rights"
    /// (control access with no object type), write access to `unicodePwd`,
    /// and generic all. Deny entries never grant.
    pub fn grants_password_reset(&self) -> bool {
        if !self.kind.is_allow() {
            return false;
        }
        if self.has(rights::GENERIC_ALL) {
            return true;
        }
        let reset_right = self.has(rights::CONTROL_ACCESS)
            && match self.object_type {
                None => true,
                Some(guid) => guid == RESET_PASSWORD_RIGHT || guid.is_nil(),
            };
        let write_password = self.has(rights::WRITE_PROPERTY)
            && self.object_type == Some(UNICODE_PWD_ATTRIBUTE);
        reset_right || write_password
    }
}

/// Whether any entry is an Allow grant of a password reset to one of `sids`
pub fn grants_password_reset(aces: &[AccessControlEntry], sids: &HashSet<Sid>) -> bool {
    aces.iter()
        .any(|ace| sids.contains(&ace.trustee) && ace.grants_password_reset())
}

/// DACL of a self-relative security descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityDescriptor {
    pub dacl: Vec<AccessControlEntry>,
}

impl SecurityDescriptor {
    /// Decode a self-relative `SECURITY_DESCRIPTOR`
    ///
    /// Only the DACL is decoded. A descriptor without a DACL yields no
    /// entries. Unknown ACE types are kept as [`AceKind::Other`] with an
    /// anonymous trustee so offsets stay aligned.
    pub fn parse(bytes: &[u8]) -> Result<Self, SecurityDescriptorError> {
        let header = slice(bytes, 0, 20)?;
        if header[0] != 1 {
            return Err(SecurityDescriptorError::UnsupportedRevision(header[0]));
        }
        let dacl_offset = read_u32(bytes, 16)? as usize;
        if dacl_offset == 0 {
            return Ok(SecurityDescriptor::default());
        }
        Ok(SecurityDescriptor {
            dacl: parse_acl(bytes, dacl_offset)?,
        })
    }
}

fn parse_acl(bytes: &[u8], offset: usize) -> Result<Vec<AccessControlEntry>, SecurityDescriptorError> {
    let header = slice(bytes, offset, 8)?;
    let revision = header[0];
    if revision != 2 && revision != 4 {
        return Err(SecurityDescriptorError::UnsupportedRevision(revision));
    }
    let ace_count = u16::from_le_bytes([header[4], header[5]]) as usize;

    let mut aces = Vec::with_capacity(ace_count);
    let mut cursor = offset + 8;
    for _ in 0..ace_count {
        let ace_header = slice(bytes, cursor, 4)?;
        let kind = AceKind::from_byte(ace_header[0]);
        let flags = ace_header[1];
        let size = u16::from_le_bytes([ace_header[2], ace_header[3]]) as usize;
        if size < 4 {
            return Err(SecurityDescriptorError::Truncated {
                offset: cursor,
                needed: 4,
                available: size,
            });
        }
        let body = slice(bytes, cursor, size)?;

        let entry = match kind {
            AceKind::Other(_) => AccessControlEntry {
                kind,
                flags,
                mask: read_u32(body, 4).unwrap_or(0),
                object_type: None,
                inherited_object_type: None,
                trustee: Sid::new(0, &[0]),
            },
            _ => parse_ace_body(body, kind, flags)?,
        };
        aces.push(entry);
        cursor += size;
    }
    Ok(aces)
}

fn parse_ace_body(
    body: &[u8],
    kind: AceKind,
    flags: u8,
) -> Result<AccessControlEntry, SecurityDescriptorError> {
    let mask = read_u32(body, 4)?;
    let mut pos = 8;
    let mut object_type = None;
    let mut inherited_object_type = None;

    if kind.is_object() {
        let object_flags = read_u32(body, pos)?;
        pos += 4;
        if object_flags & ACE_OBJECT_TYPE_PRESENT != 0 {
            object_type = Some(read_guid(body, pos)?);
            pos += 16;
        }
        if object_flags & ACE_INHERITED_OBJECT_TYPE_PRESENT != 0 {
            inherited_object_type = Some(read_guid(body, pos)?);
            pos += 16;
        }
    }

    let (trustee, _) = Sid::read_at(body, pos)?;
    Ok(AccessControlEntry {
        kind,
        flags,
        mask,
        object_type,
        inherited_object_type,
        trustee,
    })
}

fn slice(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], SecurityDescriptorError> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(SecurityDescriptorError::Truncated {
            offset,
            needed: len,
            available: bytes.len().saturating_sub(offset),
        })
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, SecurityDescriptorError> {
    let b = slice(bytes, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_guid(bytes: &[u8], offset: usize) -> Result<Uuid, SecurityDescriptorError> {
    let b = slice(bytes, offset, 16)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(b);
    Ok(Uuid::from_bytes_le(raw))
}
