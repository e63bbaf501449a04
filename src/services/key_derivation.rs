use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha256;

use crate::error::VaultError;
use crate::repositories::atomic_file::atomic_write;

/// PBKDF2-HMAC-SHA256 の反復回数
pub const PBKDF2_ITERATIONS: u32 = 390_000;
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

pub const SALT_FILE: &str = "totp_secrets.salt";
pub const KEY_FILE: &str = "totp_secrets.key";

/// 鍵の出所
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// パスフレーズ + 永続化されたソルトから導出
    Passphrase,
    /// 永続化されたランダム鍵ファイル（開発用フォールバック）
    KeyFile,
}

/// 保管庫の対称鍵（32バイト、drop時にゼロ化）
pub struct VaultKey {
    bytes: SecretBox<[u8; KEY_LEN]>,
    source: KeySource,
}

impl VaultKey {
    pub fn from_bytes(mut bytes: [u8; KEY_LEN], source: KeySource) -> Self {
        let key = Self {
            bytes: SecretBox::init_with_mut(|k: &mut [u8; KEY_LEN]| k.copy_from_slice(&bytes)),
            source,
        };
        bytes.zeroize();
        key
    }

    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.bytes.expose_secret()
    }

    pub fn source(&self) -> KeySource {
        self.source
    }

    pub fn is_development_fallback(&self) -> bool {
        self.source == KeySource::KeyFile
    }

    /// URL-safe base64（鍵ファイルの保存形式）
    pub fn to_url_safe(&self) -> String {
        URL_SAFE.encode(self.expose())
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("bytes", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// パスフレーズとソルトから鍵を導出
///
/// 同じパスフレーズ・ソルトからは常に同じ鍵が得られる
pub fn derive_key(passphrase: &str, salt: &[u8]) -> VaultKey {
    VaultKey {
        bytes: SecretBox::init_with_mut(|k: &mut [u8; KEY_LEN]| {
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, k)
        }),
        source: KeySource::Passphrase,
    }
}

/// 設定から保管庫の鍵を用意する
///
/// パスフレーズがあればソルトファイルを読み込み（なければ生成）して導出する。
/// なければ鍵ファイルを読み込み（なければ生成）する。既存ファイルが壊れている
/// 場合は再生成せずにエラーを返す（既存の暗号化ファイルが復号不能になるため）。
pub fn resolve_vault_key(vault_dir: &Path, passphrase: Option<&str>) -> Result<VaultKey, VaultError> {
    match passphrase {
        Some(passphrase) => {
            let salt = load_or_create_salt(&vault_dir.join(SALT_FILE))?;
            tracing::info!(iterations = PBKDF2_ITERATIONS, "パスフレーズから保管庫の鍵を導出");
            Ok(derive_key(passphrase, &salt))
        }
        None => {
            let key = load_or_create_key_file(&vault_dir.join(KEY_FILE))?;
            tracing::warn!(
                key_file = %vault_dir.join(KEY_FILE).display(),
                "パスフレーズ未設定: 開発用の鍵ファイルを使用（本番環境では非推奨）"
            );
            Ok(key)
        }
    }
}

fn load_or_create_salt(path: &Path) -> Result<Vec<u8>, VaultError> {
    match fs::read(path) {
        Ok(salt) if salt.len() == SALT_LEN => Ok(salt),
        Ok(salt) => Err(VaultError::key_material(
            path,
            format!("salt must be {} bytes, found {}", SALT_LEN, salt.len()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut salt = vec![0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            atomic_write(path, &salt)
                .map_err(|e| VaultError::key_material(path, e.to_string()))?;
            tracing::info!(path = %path.display(), "ソルトファイルを生成");
            Ok(salt)
        }
        Err(e) => Err(VaultError::key_material(path, e.to_string())),
    }
}

fn load_or_create_key_file(path: &Path) -> Result<VaultKey, VaultError> {
    match fs::read_to_string(path) {
        Ok(encoded) => {
            let mut raw = URL_SAFE
                .decode(encoded.trim())
                .map_err(|_| VaultError::key_material(path, "invalid base64 key"))?;

            if raw.len() != KEY_LEN {
                let len = raw.len();
                raw.zeroize();
                return Err(VaultError::key_material(
                    path,
                    format!("key must be {} bytes, found {}", KEY_LEN, len),
                ));
            }

            let mut bytes = [0u8; KEY_LEN];
            bytes.copy_from_slice(&raw);
            raw.zeroize();
            Ok(VaultKey::from_bytes(bytes, KeySource::KeyFile))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut bytes = [0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut bytes);
            let key = VaultKey::from_bytes(bytes, KeySource::KeyFile);
            bytes.zeroize();

            atomic_write(path, key.to_url_safe().as_bytes())
                .map_err(|e| VaultError::key_material(path, e.to_string()))?;
            tracing::info!(path = %path.display(), "開発用の鍵ファイルを生成");
            Ok(key)
        }
        Err(e) => Err(VaultError::key_material(path, e.to_string())),
    }
}
