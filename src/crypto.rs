//! Credential vault: AES-256-GCM encryption of stored mailbox passwords.
//!
//! Tokens are `base64(nonce || ciphertext)`. The bot front-end encrypts
//! passwords with the same shared key before they ever reach the API, so the
//! core only sees ciphertext until a session or probe needs the plaintext.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context as _, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore as _;

const NONCE_LEN: usize = 12;

/// Symmetric encryptor/decryptor for mailbox credentials.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"[REDACTED]").finish()
    }
}

impl Vault {
    /// Build a vault from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> crate::error::Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("crypto key is not valid base64")?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|_| anyhow!("crypto key must decode to exactly 32 bytes"))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> crate::error::Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("credential encryption failed"))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(token))
    }

    pub fn decrypt(&self, token: &str) -> crate::error::Result<String> {
        let raw = BASE64
            .decode(token.trim())
            .context("credential token is not valid base64")?;
        if raw.len() <= NONCE_LEN {
            return Err(anyhow!("credential token is too short").into());
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow!("credential decryption failed"))?;

        String::from_utf8(plaintext).context("decrypted credential is not UTF-8").map_err(Into::into)
    }
}

/// Generate a fresh random vault key, base64-encoded. Used by operators when
/// provisioning a new deployment.
pub fn generate_key() -> String {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::{Vault, generate_key};

    #[test]
    fn round_trips_credentials() {
        let vault = Vault::new(&generate_key()).unwrap();
        for secret in ["hunter2", "p@ss wörd 密码", ""] {
            let token = vault.encrypt(secret).unwrap();
            assert_eq!(vault.decrypt(&token).unwrap(), secret);
        }
    }

    #[test]
    fn encrypt_uses_fresh_nonces() {
        let vault = Vault::new(&generate_key()).unwrap();
        let first = vault.encrypt("same secret").unwrap();
        let second = vault.encrypt("same secret").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rejects_wrong_key() {
        let vault = Vault::new(&generate_key()).unwrap();
        let other = Vault::new(&generate_key()).unwrap();
        let token = vault.encrypt("secret").unwrap();
        assert!(other.decrypt(&token).is_err());
    }

    #[test]
    fn rejects_tampered_token() {
        let vault = Vault::new(&generate_key()).unwrap();
        let token = vault.encrypt("secret").unwrap();
        let mut tampered = token.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(vault.decrypt(&tampered).is_err());
    }

    #[test]
    fn rejects_short_key() {
        assert!(Vault::new("dG9vLXNob3J0").is_err());
    }
}
