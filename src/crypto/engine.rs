use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    Key(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid state parameter")]
    InvalidState,
}

fn new_hmac(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::Key(format!("HMAC init failed: {e}")))
}

/// AES-256-GCM sealing of tokens at rest, HMAC-SHA256 signing of the OAuth
/// `state` round-trip.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    hmac_key: Vec<u8>,
}

impl CryptoEngine {
    /// Build an engine from the base64 `MASTER_KEY` (32 bytes) and `HMAC_SECRET`.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, CryptoError> {
        let master_key = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64)
            .map_err(|e| CryptoError::Key(format!("MASTER_KEY is not base64: {e}")))?;

        if master_key.len() != 32 {
            return Err(CryptoError::Key(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                master_key.len()
            )));
        }

        let hmac_key = base64::engine::general_purpose::STANDARD
            .decode(hmac_secret_b64)
            .map_err(|e| CryptoError::Key(format!("HMAC_SECRET is not base64: {e}")))?;

        if hmac_key.is_empty() {
            return Err(CryptoError::Key("HMAC_SECRET must not be empty".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| CryptoError::Key(format!("AES init failed: {e}")))?;

        Ok(Self { cipher, hmac_key })
    }

    /// Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&sealed))
    }

    pub fn decrypt(&self, sealed_b64: &str) -> Result<String, CryptoError> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(sealed_b64)
            .map_err(|e| CryptoError::Decrypt(format!("invalid base64: {e}")))?;

        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Decrypt("ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Decrypt(format!("invalid UTF-8: {e}")))
    }

    /// Returns url-safe base64(hmac || payload).
    pub fn sign_state(&self, payload: &str) -> Result<String, CryptoError> {
        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut signed = signature.to_vec();
        signed.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&signed))
    }

    /// Check the signature and hand back the payload.
    pub fn verify_state(&self, signed: &str) -> Result<String, CryptoError> {
        let signed = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| CryptoError::InvalidState)?;

        if signed.len() < MAC_LEN {
            return Err(CryptoError::InvalidState);
        }

        let (signature, payload) = signed.split_at(MAC_LEN);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| CryptoError::InvalidState)?;

        String::from_utf8(payload.to_vec()).map_err(|_| CryptoError::InvalidState)
    }
}
