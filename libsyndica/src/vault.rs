//! Credential vault: authenticated encryption of platform secrets
//!
//! Secrets are sealed with AES-256-GCM under a key derived from the master
//! key via Argon2id. Every encryption draws a fresh salt and nonce, so the
//! same plaintext never produces the same blob twice. Decryption is
//! fail-closed: any tampering, truncation, or wrong key surfaces as
//! [`CredentialError::DecryptionFailed`], which is distinct from a missing
//! credential row.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Version};
pub use argon2::Params;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result};
use crate::store::Store;
use crate::types::Credential;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
/// GCM appends a 16-byte authentication tag to the ciphertext.
const TAG_LEN: usize = 16;

/// Credential rows with this user id serve as the system-wide fallback when
/// a user has no override of their own.
pub const DEFAULT_CREDENTIAL_USER: &str = "default";

pub struct Vault {
    master_key: Zeroizing<String>,
    kdf_params: Params,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the master key.
        f.debug_struct("Vault")
            .field("kdf_params", &self.kdf_params)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Vault with production KDF parameters (19 MiB, 2 iterations).
    pub fn new(master_key: impl Into<String>) -> Result<Self> {
        let params = Params::new(19_456, 2, 1, Some(KEY_LEN))
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        Self::with_params(master_key, params)
    }

    /// Vault with caller-supplied KDF parameters. Tests use cheap parameters
    /// so the derivation does not dominate the suite.
    pub fn with_params(master_key: impl Into<String>, kdf_params: Params) -> Result<Self> {
        let master_key = Zeroizing::new(master_key.into());
        if master_key.len() < 8 {
            return Err(CredentialError::WeakMasterKey.into());
        }
        Ok(Self {
            master_key,
            kdf_params,
        })
    }

    fn derive_key(&self, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.kdf_params.clone());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(self.master_key.as_bytes(), salt, key.as_mut())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        Ok(key)
    }

    /// Seal a plaintext secret into a base64 blob: `salt || nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(blob))
    }

    /// Open a blob produced by [`Vault::encrypt`]. Fail-closed: every malformed
    /// or unauthentic input maps to the same error.
    pub fn decrypt(&self, blob: &str) -> Result<Zeroizing<String>> {
        let bytes = BASE64
            .decode(blob)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        if bytes.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(CredentialError::DecryptionFailed.into());
        }

        let (salt, rest) = bytes.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| CredentialError::DecryptionFailed.into())
    }

    /// Fetch and decrypt the credential for a publish attempt. A row owned by
    /// the user wins over the system-wide `default` row. Stamps the row's
    /// `last_used_at` on success.
    pub async fn get_credentials(
        &self,
        store: &Store,
        user_id: &str,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        let row = match store.active_credential(user_id, platform).await? {
            Some(row) => row,
            None => store
                .active_credential(DEFAULT_CREDENTIAL_USER, platform)
                .await?
                .ok_or_else(|| {
                    CredentialError::NotFound(format!("{}/{}", user_id, platform))
                })?,
        };

        let secret = self.decrypt(&row.encrypted_secret)?;
        let refresh_token = row
            .encrypted_refresh_token
            .as_deref()
            .map(|blob| self.decrypt(blob))
            .transpose()?;

        store
            .touch_credential_last_used(&row.user_id, platform, now)
            .await?;

        Ok(Credential {
            user_id: row.user_id,
            platform: row.platform,
            secret: SecretString::from(secret.to_string()),
            refresh_token: refresh_token.map(|t| SecretString::from(t.to_string())),
            expires_at: row.expires_at,
        })
    }
}
