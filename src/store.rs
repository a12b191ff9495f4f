//! # File Persistence
//!
//! JSON list files for the synchronized roster and the credential list, plus
//! a portable file-backed [`SecretVault`].
//!
//! ## Layout
//!
//! - `<data_dir>/UsersLists/UserList.json`: roster written by synchronization
//! - `<data_dir>/credentials.json`: domain, username and groups per credential
//! - `<data_dir>/secrets.json`: secrets keyed by [`CredentialProfile`], used
//!   when Windows Credential Manager is not available
//!
//! ## Durability
//!
//! Every write goes to a sibling `.tmp` file that is then renamed over the
//! target, so readers never observe a half-written list.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::{CredentialStore, RosterStore, SecretVault};
use crate::logger::LogSink;
use crate::models::{Credential, CredentialProfile, GroupSet, SecureString, UserRecord, Username};
use crate::utils::{CredentialError, StoreError};

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.display().to_string(),
        source,
    }
}

/// Write `bytes` to `path` through a temp file and rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    // Clear a leftover temp file from an interrupted write
    match fs::remove_file(&tmp) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(io_error(&tmp, e)),
        _ => {}
    }
    let mut file = create_private(&tmp).map_err(|e| io_error(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| io_error(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

/// Create a file that only its owner can read, for files that may hold secrets
#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

/// Read a JSON list
///
/// # Returns
/// * `Ok(vec![])` - If the file is missing or blank (not an error)
/// * `Err(StoreError)` - If the file cannot be read or is not a JSON list of `T`
pub fn read_from_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(path, e)),
    };
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&data).map_err(|e| json_error(path, e))
}

/// Write a JSON list, either replacing the file or appending to its list
///
/// Returns the number of items now in the file.
pub fn save_to_json<T>(items: &[T], path: &Path, overwrite: bool) -> Result<usize, StoreError>
where
    T: Serialize + DeserializeOwned + Clone,
{
    let to_save: Vec<T> = if overwrite {
        items.to_vec()
    } else {
        let mut existing: Vec<T> = read_from_json(path)?;
        existing.extend_from_slice(items);
        existing
    };

    let json = serde_json::to_vec_pretty(&to_save).map_err(|e| json_error(path, e))?;
    write_atomic(path, &json)?;
    Ok(to_save.len())
}

/// Roster persisted as a JSON list of [`UserRecord`]
pub struct JsonRosterStore {
    path: PathBuf,
    log: Arc<dyn LogSink>,
}

impl JsonRosterStore {
    pub fn new(path: impl Into<PathBuf>, log: Arc<dyn LogSink>) -> Self {
        JsonRosterStore {
            path: path.into(),
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl RosterStore for JsonRosterStore {
    async fn save_roster(&self, users: &[UserRecord]) -> Result<(), StoreError> {
        let count = save_to_json(users, &self.path, true)?;
        self.log.info(&format!(
            "Saved {} items to {}. (Mode: Overwrite)",
            count,
            self.path.display()
        ));
        Ok(())
    }

    async fn load_roster(&self) -> Result<Vec<UserRecord>, StoreError> {
        let users: Vec<UserRecord> = read_from_json(&self.path)?;
        self.log.debug(&format!(
            "Read {} items from {}.",
            users.len(),
            self.path.display()
        ));
        Ok(users)
    }
}

/// Non-secret part of a stored credential
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    domain: String,
    username: Username,
    #[serde(default)]
    groups: GroupSet,
}

impl CredentialRecord {
    fn profile(&self) -> CredentialProfile {
        CredentialProfile::for_account(&self.domain, self.username.as_str())
    }
}

/// Credential list in a JSON file with secrets held by a [`SecretVault`]
pub struct JsonCredentialStore {
    path: PathBuf,
    vault: Arc<dyn SecretVault>,
    log: Arc<dyn LogSink>,
}

impl JsonCredentialStore {
    pub fn new(path: impl Into<PathBuf>, vault: Arc<dyn SecretVault>, log: Arc<dyn LogSink>) -> Self {
        JsonCredentialStore {
            path: path.into(),
            vault,
            log,
        }
    }

    fn read_records(&self) -> Result<Vec<CredentialRecord>, CredentialError> {
        read_from_json(&self.path).map_err(|e| CredentialError::Storage(e.to_string()))
    }
}

#[async_trait::async_trait]
impl CredentialStore for JsonCredentialStore {
    async fn load(&self) -> Result<Vec<Credential>, CredentialError> {
        let records = self.read_records()?;
        let mut credentials = Vec::with_capacity(records.len());

        for record in records {
            let profile = record.profile();
            let secret = match self.vault.retrieve(&profile)? {
                Some(secret) => secret,
                None => {
                    self.log.warn(&format!(
                        "No stored password for '{}' in domain '{}'.",
                        record.username, record.domain
                    ));
                    SecureString::new(String::new())
                }
            };
            credentials.push(Credential::new(
                record.domain,
                record.username,
                secret,
                record.groups,
            ));
        }

        self.log
            .info(&format!("Loaded {} credentials.", credentials.len()));
        Ok(credentials)
    }

    async fn save(&self, credentials: &[Credential]) -> Result<(), CredentialError> {
        let previous = self.read_records()?;

        let records: Vec<CredentialRecord> = credentials
            .iter()
            .map(|c| CredentialRecord {
                domain: c.domain().to_string(),
                username: c.username().clone(),
                groups: c.groups().clone(),
            })
            .collect();

        for credential in credentials {
            self.vault
                .store(&credential.profile(), credential.username().as_str(), credential.secret())?;
        }
        save_to_json(&records, &self.path, true)
            .map_err(|e| CredentialError::Storage(e.to_string()))?;

        let kept: HashSet<CredentialProfile> = records.iter().map(|r| r.profile()).collect();
        for stale in previous.iter().map(|r| r.profile()).filter(|p| !kept.contains(p)) {
            self.vault.delete(&stale)?;
        }

        self.log
            .info(&format!("Saved {} credentials.", credentials.len()));
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        for record in self.read_records()? {
            self.vault.delete(&record.profile())?;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CredentialError::Storage(io_error(&self.path, e).to_string())),
        }
        self.log.info("All saved credentials have been cleared.");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultEntry {
    username: String,
    secret: String,
}

/// Portable vault: base64 secrets in a JSON map, owner-only on Unix
///
/// This is obfuscation, not encryption. Prefer the Windows Credential
/// Manager vault where it is available.
pub struct FileSecretVault {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretVault {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSecretVault {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> Result<BTreeMap<String, VaultEntry>, CredentialError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(CredentialError::Storage(io_error(&self.path, e).to_string())),
        };
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&data).map_err(|_| CredentialError::InvalidFormat)
    }

    fn write_map(&self, map: &BTreeMap<String, VaultEntry>) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(map)
            .map_err(|e| CredentialError::Storage(json_error(&self.path, e).to_string()))?;
        write_atomic(&self.path, &json).map_err(|e| CredentialError::Storage(e.to_string()))
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SecretVault for FileSecretVault {
    fn store(
        &self,
        profile: &CredentialProfile,
        username: &str,
        secret: &SecureString,
    ) -> Result<(), CredentialError> {
        let _guard = self.guard();
        let mut map = self.read_map()?;
        map.insert(
            profile.as_str().to_string(),
            VaultEntry {
                username: username.to_string(),
                secret: BASE64.encode(secret.as_str()),
            },
        );
        self.write_map(&map)
    }

    fn retrieve(&self, profile: &CredentialProfile) -> Result<Option<SecureString>, CredentialError> {
        let _guard = self.guard();
        let map = self.read_map()?;
        let Some(entry) = map.get(profile.as_str()) else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(&entry.secret)
            .map_err(|_| CredentialError::InvalidFormat)?;
        let secret = String::from_utf8(bytes).map_err(|_| CredentialError::InvalidFormat)?;
        Ok(Some(SecureString::new(secret)))
    }

    fn delete(&self, profile: &CredentialProfile) -> Result<(), CredentialError> {
        let _guard = self.guard();
        let mut map = self.read_map()?;
        if map.remove(profile.as_str()).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}
