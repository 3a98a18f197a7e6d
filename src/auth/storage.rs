//! Encrypted-at-rest persistence for workspace credentials.
//!
//! Cookies land in `~/.config/notepilot/credentials.enc` (or under
//! `$XDG_CONFIG_HOME`). The payload is XChaCha20-Poly1305 with a master key
//! held in the system keychain; `NOTEPILOT_MASTER_KEY` overrides the
//! keychain for headless environments.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::cookies::SessionCookie;

const CREDENTIAL_FILE_NAME: &str = "credentials.enc";
const KEYRING_SERVICE: &str = "notepilot";
const KEYRING_ENTRY_NAME: &str = "credential-master-key-v1";
const MAGIC: &[u8; 4] = b"NPC1";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;
const MASTER_KEY_ENV: &str = "NOTEPILOT_MASTER_KEY";

/// Errors for persisted credential operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No suitable user config directory is available.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,
    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Could not access keychain and no env fallback key was provided.
    #[error(
        "unable to access system keychain for the credential encryption key; set NOTEPILOT_MASTER_KEY or configure keychain access"
    )]
    KeychainUnavailable,
    /// Stored encrypted payload is malformed.
    #[error("persisted credential payload is invalid")]
    InvalidPayload,
    /// Encryption failed.
    #[error("failed to encrypt persisted credentials")]
    EncryptionFailed,
    /// Decryption failed.
    #[error("failed to decrypt persisted credentials")]
    DecryptionFailed,
}

/// Encrypted credential file plus its key source.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Opens the store at the default config-dir location.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConfigDirUnavailable`] when no usable config
    /// directory can be resolved.
    pub fn open_default() -> Result<Self, StorageError> {
        Ok(Self {
            path: default_config_dir()?.join(CREDENTIAL_FILE_NAME),
        })
    }

    /// Opens the store at an explicit path (tests, alternate profiles).
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the on-disk path of the encrypted file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypts and stores `cookies`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when key retrieval, encryption, or writing
    /// fails.
    pub fn store(&self, cookies: &[SessionCookie]) -> Result<(), StorageError> {
        let key = load_or_create_key()?;
        self.store_with_key(cookies, &key)
    }

    /// Loads and decrypts persisted cookies; `Ok(None)` when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when key retrieval, decryption, or parsing
    /// fails.
    pub fn load(&self) -> Result<Option<Vec<SessionCookie>>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let key = load_or_create_key()?;
        self.load_with_key(&key).map(Some)
    }

    /// Removes the credential file and best-effort clears the keychain key.
    ///
    /// Returns `true` when a file existed and was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when file removal fails.
    pub fn clear(&self) -> Result<bool, StorageError> {
        let removed = if self.path.exists() {
            fs::remove_file(&self.path)?;
            true
        } else {
            false
        };
        if env::var_os(MASTER_KEY_ENV).is_none() {
            let _ = delete_keychain_key();
        }
        Ok(removed)
    }

    /// Store with an explicit key (exposed for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when encryption or the write fails.
    pub fn store_with_key(
        &self,
        cookies: &[SessionCookie],
        key_material: &str,
    ) -> Result<(), StorageError> {
        let plaintext = serde_json::to_vec(cookies)?;
        let encrypted = encrypt_bytes(&plaintext, key_material)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, encrypted)?;
        set_owner_only_permissions(&self.path)?;
        Ok(())
    }

    /// Load with an explicit key (exposed for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when decryption or parsing fails.
    pub fn load_with_key(&self, key_material: &str) -> Result<Vec<SessionCookie>, StorageError> {
        let bytes = fs::read(&self.path)?;
        let plaintext = decrypt_bytes(&bytes, key_material)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn default_config_dir() -> Result<PathBuf, StorageError> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("APPDATA")),
    )
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, StorageError> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join("notepilot"));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join("notepilot"));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data.join("notepilot"));
    }
    Err(StorageError::ConfigDirUnavailable)
}

fn load_or_create_key() -> Result<String, StorageError> {
    if let Some(from_env) = env::var_os(MASTER_KEY_ENV) {
        let key = from_env.to_string_lossy().trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let entry = safe_keyring_entry()?;
    match safe_keyring_get_password(&entry) {
        Ok(existing) if !existing.trim().is_empty() => Ok(existing),
        _ => {
            let generated = generate_key_material();
            safe_keyring_set_password(&entry, &generated)?;
            Ok(generated)
        }
    }
}

fn delete_keychain_key() -> Result<(), StorageError> {
    let entry = safe_keyring_entry()?;
    let _ = safe_keyring_delete_credential(&entry);
    Ok(())
}

// The keyring backends can panic on unusual platform state; treat any panic
// as "keychain unavailable" rather than aborting a batch run.
fn safe_keyring_entry() -> Result<keyring::Entry, StorageError> {
    catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY_NAME))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_get_password(entry: &keyring::Entry) -> Result<String, StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_set_password(entry: &keyring::Entry, password: &str) -> Result<(), StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.set_password(password)))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn safe_keyring_delete_credential(entry: &keyring::Entry) -> Result<(), StorageError> {
    catch_unwind(AssertUnwindSafe(|| entry.delete_credential()))
        .map_err(|_| StorageError::KeychainUnavailable)?
        .map_err(|_| StorageError::KeychainUnavailable)
}

fn generate_key_material() -> String {
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

fn derive_key_bytes(key_material: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(key_material.as_bytes());
    let mut key = [0_u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

fn encrypt_bytes(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));

    let mut nonce = [0_u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let nonce_ref = XNonce::from_slice(&nonce);

    let ciphertext = cipher
        .encrypt(nonce_ref, plaintext)
        .map_err(|_| StorageError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    output.extend_from_slice(MAGIC);
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn decrypt_bytes(payload: &[u8], key_material: &str) -> Result<Vec<u8>, StorageError> {
    if payload.len() < MAGIC.len() + NONCE_LEN || &payload[..MAGIC.len()] != MAGIC {
        return Err(StorageError::InvalidPayload);
    }

    let key_bytes = derive_key_bytes(key_material);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let nonce_start = MAGIC.len();
    let nonce_end = nonce_start + NONCE_LEN;
    let nonce = XNonce::from_slice(&payload[nonce_start..nonce_end]);

    cipher
        .decrypt(nonce, &payload[nonce_end..])
        .map_err(|_| StorageError::DecryptionFailed)
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}
