//! 保管庫ファイルの認証付き暗号化
//!
//! 形式: `URL_SAFE_NO_PAD( version(1) || issued_at(8, BE) || nonce(12) || ciphertext+tag )`
//!
//! 先頭9バイトのヘッダは AES-256-GCM の関連データとして認証されるため、
//! 発行時刻の改ざんも復号失敗として検出される。

use std::time::Duration;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng, Payload},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use time::OffsetDateTime;

use crate::services::key_derivation::VaultKey;

const FORMAT_VERSION: u8 = 0x01;
const HEADER_LEN: usize = 1 + 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// 有効期限検査時に許容する未来方向の時刻ずれ（秒）
const MAX_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed blob: {0}")]
    Malformed(&'static str),

    #[error("unsupported blob version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("blob authentication failed")]
    Authentication,

    #[error("blob is older than the configured maximum age")]
    Expired,

    #[error("encryption failed")]
    Encryption,
}

/// シークレット表の暗号化・復号
#[derive(Clone)]
pub struct StoreCodec {
    cipher: Aes256Gcm,
}

impl StoreCodec {
    pub fn new(key: &VaultKey) -> Result<Self, CodecError> {
        let cipher = Aes256Gcm::new_from_slice(key.expose()).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            CodecError::Encryption
        })?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CodecError> {
        self.encrypt_at(plaintext, OffsetDateTime::now_utc())
    }

    /// `max_age` を指定した場合、発行時刻が古すぎる blob は `Expired` になる
    pub fn decrypt(&self, blob: &str, max_age: Option<Duration>) -> Result<Vec<u8>, CodecError> {
        self.decrypt_at(blob, max_age, OffsetDateTime::now_utc())
    }

    pub(crate) fn encrypt_at(
        &self,
        plaintext: &[u8],
        now: OffsetDateTime,
    ) -> Result<String, CodecError> {
        let mut header = [0u8; HEADER_LEN];
        header[0] = FORMAT_VERSION;
        header[1..].copy_from_slice(&now.unix_timestamp().to_be_bytes());

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|e| {
                tracing::error!(error = ?e, "保管庫の暗号化エラー");
                CodecError::Encryption
            })?;

        let mut blob = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&header);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    pub(crate) fn decrypt_at(
        &self,
        blob: &str,
        max_age: Option<Duration>,
        now: OffsetDateTime,
    ) -> Result<Vec<u8>, CodecError> {
        let raw = URL_SAFE_NO_PAD
            .decode(blob.trim())
            .map_err(|_| CodecError::Malformed("invalid base64"))?;

        if raw.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(CodecError::Malformed("truncated"));
        }
        if raw[0] != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(raw[0]));
        }

        let (header, rest) = raw.split_at(HEADER_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| CodecError::Authentication)?;

        if let Some(max_age) = max_age {
            let mut issued_at = [0u8; 8];
            issued_at.copy_from_slice(&header[1..]);
            let issued_at = i64::from_be_bytes(issued_at);
            let now = now.unix_timestamp();
            let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);

            if issued_at.saturating_add(max_age) < now
                || issued_at > now.saturating_add(MAX_CLOCK_SKEW_SECS)
            {
                return Err(CodecError::Expired);
            }
        }

        Ok(plaintext)
    }
}
