//! Secret vault backed by Windows Credential Manager
//!
//! This module contains all unsafe Windows API code for secret storage.
//! Secrets are written as generic credentials named after their
//! [`CredentialProfile`], so they are encrypted at rest by DPAPI and scoped
//! to the signed-in Windows user.

use crate::core::SecretVault;
use crate::models::{CredentialProfile, SecureString};
use crate::utils::CredentialError;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::FILETIME;
use windows::Win32::Security::Credentials::{
    CredDeleteW, CredFree, CredReadW, CredWriteW, CREDENTIALW, CRED_FLAGS,
    CRED_PERSIST_LOCAL_MACHINE, CRED_TYPE_GENERIC,
};

/// HRESULT of ERROR_NOT_FOUND
const HRESULT_NOT_FOUND: i32 = 0x80070490u32 as i32;

/// Null-terminated UTF-16 copy of `value`
fn wide(value: &str) -> Vec<u16> {
    OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Frees a credential returned by `CredReadW` on every exit path
struct CredentialBuffer(*mut CREDENTIALW);

impl Drop for CredentialBuffer {
    fn drop(&mut self) {
        // SAFETY: the pointer came from a successful CredReadW and is freed once
        unsafe { CredFree(self.0 as *const _) };
    }
}

/// Windows Credential Manager vault
///
/// # Security
/// - Secrets encrypted at rest using DPAPI
/// - Keys tied to user account
/// - Secrets never logged or exposed
#[derive(Debug, Default)]
pub struct WindowsCredentialManager;

impl WindowsCredentialManager {
    pub fn new() -> Self {
        WindowsCredentialManager
    }
}

impl SecretVault for WindowsCredentialManager {
    fn store(
        &self,
        profile: &CredentialProfile,
        username: &str,
        secret: &SecureString,
    ) -> Result<(), CredentialError> {
        // Blob is the UTF-16LE secret without terminator
        let mut blob: Vec<u8> = secret
            .as_str()
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let target_name = wide(profile.as_str());
        let username_wide = wide(username);

        // SAFETY: every pointer refers to a buffer that outlives the CredWriteW call
        let result = unsafe {
            let cred = CREDENTIALW {
                Flags: CRED_FLAGS(0),
                Type: CRED_TYPE_GENERIC,
                TargetName: PWSTR(target_name.as_ptr() as *mut u16),
                Comment: PWSTR::null(),
                LastWritten: FILETIME::default(),
                CredentialBlobSize: blob.len() as u32,
                CredentialBlob: blob.as_mut_ptr(),
                Persist: CRED_PERSIST_LOCAL_MACHINE,
                AttributeCount: 0,
                Attributes: std::ptr::null_mut(),
                TargetAlias: PWSTR::null(),
                UserName: PWSTR(username_wide.as_ptr() as *mut u16),
            };
            CredWriteW(&cred, 0)
        };

        // Scrub our copy of the secret
        for byte in blob.iter_mut() {
            // SAFETY: byte is a valid, exclusively borrowed u8
            unsafe { std::ptr::write_volatile(byte, 0) };
        }

        result.map_err(|e| {
            CredentialError::Platform(format!(
                "Failed to save secret for profile '{}': {:?}",
                profile, e
            ))
        })
    }

    fn retrieve(&self, profile: &CredentialProfile) -> Result<Option<SecureString>, CredentialError> {
        let target_name = wide(profile.as_str());
        let mut pcred: *mut CREDENTIALW = std::ptr::null_mut();

        // SAFETY: target_name is null-terminated and pcred is a valid out pointer
        let read = unsafe {
            CredReadW(
                PCWSTR::from_raw(target_name.as_ptr()),
                CRED_TYPE_GENERIC,
                0,
                &mut pcred,
            )
        };
        if read.is_err() {
            // Missing profile is not an error
            return Ok(None);
        }
        let buffer = CredentialBuffer(pcred);

        // SAFETY: buffer.0 points to a CREDENTIALW owned by the buffer guard,
        // whose blob is CredentialBlobSize bytes long
        let units: Vec<u16> = unsafe {
            let cred = &*buffer.0;
            if cred.CredentialBlob.is_null() {
                return Ok(Some(SecureString::new(String::new())));
            }
            std::slice::from_raw_parts(cred.CredentialBlob, cred.CredentialBlobSize as usize)
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect()
        };

        let secret = String::from_utf16(&units).map_err(|e| {
            CredentialError::Platform(format!(
                "Failed to decode secret for profile '{}': {:?}",
                profile, e
            ))
        })?;
        Ok(Some(SecureString::new(secret.trim_end_matches('\0'))))
    }

    fn delete(&self, profile: &CredentialProfile) -> Result<(), CredentialError> {
        let target_name = wide(profile.as_str());

        // SAFETY: target_name is null-terminated
        let result =
            unsafe { CredDeleteW(PCWSTR::from_raw(target_name.as_ptr()), CRED_TYPE_GENERIC, 0) };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code().0 == HRESULT_NOT_FOUND => Ok(()),
            Err(e) => Err(CredentialError::Platform(format!(
                "Failed to delete secret for profile '{}': {:?}",
                profile, e
            ))),
        }
    }
}
