//! Input normalisation helpers for domains, account names, and LDAP filters.
//!
//! Every user-supplied string passes through one of these functions before it
//! reaches a directory query, so a group typed as `  Sales ` and an account
//! typed as `CORP\jdoe` end up in the same canonical form.

/// Normalise a DNS domain name: trim whitespace and a trailing root dot.
///
/// Case is preserved; directory comparisons are case-insensitive anyway and
/// messages should echo what the operator typed.
pub fn normalize_domain(input: &str) -> Result<String, String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err("Domain is required".to_string());
    }
    if trimmed
        .split('.')
        .any(|label| label.is_empty() || label.chars().any(char::is_whitespace))
    {
        return Err(format!("Domain '{}' is not a valid DNS name", trimmed));
    }
    Ok(trimmed.to_string())
}

/// Extract the sAMAccountName from `user`, `DOMAIN\user`, or `user@domain`.
pub fn account_name(username: &str) -> &str {
    let trimmed = username.trim();
    if let Some((_, user)) = trimmed.rsplit_once('\\') {
        return user.trim();
    }
    if let Some((user, _)) = trimmed.split_once('@') {
        return user.trim();
    }
    trimmed
}

/// Normalise a group name: trim whitespace; reject blanks.
pub fn normalize_group_name(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("Group name cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}

/// `DC=` components of a DNS domain, e.g. `DC=corp,DC=example,DC=com`.
pub fn format_base_dn(domain: &str) -> Result<String, String> {
    let parts: Vec<&str> = domain
        .trim()
        .split('.')
        .filter(|p| !p.trim().is_empty())
        .collect();
    if parts.is_empty() {
        return Err("Domain is required".to_string());
    }
    Ok(parts
        .into_iter()
        .map(|p| format!("DC={}", p.trim()))
        .collect::<Vec<String>>()
        .join(","))
}

/// Bind name for a simple bind: UPN or down-level names pass through, bare
/// names become `user@domain`.
pub fn build_bind_username(username: &str, domain: &str) -> String {
    let username = username.trim();
    if username.contains('@') || username.contains('\\') {
        username.to_string()
    } else {
        format!("{}@{}", username, domain.trim())
    }
}

/// Escape a value for use inside an LDAP search filter (RFC 4515).
pub fn escape_ldap_filter(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Whether two domain names refer to the same domain.
pub fn same_domain(a: &str, b: &str) -> bool {
    a.trim().trim_end_matches('.').to_lowercase() == b.trim().trim_end_matches('.').to_lowercase()
}
