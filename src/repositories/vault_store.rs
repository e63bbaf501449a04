use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::VaultError;
use crate::models::VaultDocument;
use crate::repositories::atomic_file::atomic_write;
use crate::services::codec::StoreCodec;
use crate::services::key_derivation::VaultKey;

pub const BLOB_FILE: &str = "totp_secrets.enc";

/// 読み込み結果
///
/// 呼び出し側には `load()` で `Corrupt` を空として見せる
#[derive(Debug)]
pub enum LoadOutcome {
    /// ファイルなし
    Empty,
    Loaded(VaultDocument),
    /// 読み込み・復号・パースのいずれかに失敗
    Corrupt(String),
}

impl LoadOutcome {
    pub fn into_document(self) -> VaultDocument {
        match self {
            Self::Loaded(document) => document,
            Self::Empty | Self::Corrupt(_) => VaultDocument::default(),
        }
    }
}

/// 暗号化されたシークレット表の永続化
///
/// 表全体を1つの blob として読み書きする
#[derive(Clone)]
pub struct VaultStore {
    path: PathBuf,
    codec: Arc<StoreCodec>,
    max_age: Option<Duration>,
}

impl VaultStore {
    pub fn new(vault_dir: &Path, key: &VaultKey) -> Result<Self, VaultError> {
        Ok(Self {
            path: vault_dir.join(BLOB_FILE),
            codec: Arc::new(StoreCodec::new(key)?),
            max_age: None,
        })
    }

    /// 暗号化ファイルの最大経過時間を設定
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// シークレット表を読み込む（失敗しない）
    pub fn load(&self) -> VaultDocument {
        let outcome = self.load_outcome();
        if let LoadOutcome::Corrupt(reason) = &outcome {
            tracing::warn!(
                path = %self.path.display(),
                reason = %reason,
                "保管庫ファイルを読み込めないため空として扱う"
            );
        }
        outcome.into_document()
    }

    pub fn load_outcome(&self) -> LoadOutcome {
        let blob = match fs::read_to_string(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Empty,
            Err(e) => return LoadOutcome::Corrupt(format!("read failed: {}", e)),
        };

        let plaintext = match self.codec.decrypt(&blob, self.max_age) {
            Ok(plaintext) => plaintext,
            Err(e) => return LoadOutcome::Corrupt(e.to_string()),
        };

        match serde_json::from_slice::<VaultDocument>(&plaintext) {
            Ok(document) => LoadOutcome::Loaded(document),
            Err(e) => LoadOutcome::Corrupt(format!("invalid document: {}", e)),
        }
    }

    /// シークレット表をアトミックに保存
    pub fn save(&self, document: &VaultDocument) -> Result<(), VaultError> {
        let json = serde_json::to_vec(document)?;
        let blob = self.codec.encrypt(&json)?;
        atomic_write(&self.path, blob.as_bytes())?;

        tracing::debug!(users = document.users.len(), "保管庫を保存");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryStatus, SecretEntry};
    use crate::services::key_derivation::KeySource;
    use tempfile::tempdir;

    fn key(fill: u8) -> VaultKey {
        VaultKey::from_bytes([fill; 32], KeySource::KeyFile)
    }

    fn document() -> VaultDocument {
        let mut document = VaultDocument::default();
        document.users.insert(
            "alice".to_string(),
            SecretEntry {
                secret: "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string(),
                status: EntryStatus::Active,
                version: 2,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                updated_at: "2026-01-01T00:00:30Z".to_string(),
                last_verified_at: Some("2026-01-01T00:00:30Z".to_string()),
                issuer: "Oxvault".to_string(),
                previous_secret: None,
                previous_secret_valid_until: None,
            },
        );
        document
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = VaultStore::new(dir.path(), &key(1)).unwrap();

        assert!(matches!(store.load_outcome(), LoadOutcome::Empty));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = VaultStore::new(dir.path(), &key(1)).unwrap();

        store.save(&document()).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("alice"));
        assert!(!raw.contains("JBSWY3DP"));

        let loaded = store.load();
        let alice = &loaded.users["alice"];
        assert_eq!(alice.version, 2);
        assert_eq!(alice.status, EntryStatus::Active);
        assert_eq!(alice.secret, "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP");
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = VaultStore::new(dir.path(), &key(1)).unwrap();
        fs::write(store.path(), b"\xff\xfe garbage").unwrap();

        assert!(matches!(store.load_outcome(), LoadOutcome::Corrupt(_)));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_tampered_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = VaultStore::new(dir.path(), &key(1)).unwrap();
        store.save(&document()).unwrap();

        let mut raw = fs::read(store.path()).unwrap();
        let middle = raw.len() / 2;
        raw[middle] ^= 0x01;
        fs::write(store.path(), raw).unwrap();

        assert!(matches!(store.load_outcome(), LoadOutcome::Corrupt(_)));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_wrong_key_is_corrupt() {
        let dir = tempdir().unwrap();
        VaultStore::new(dir.path(), &key(1))
            .unwrap()
            .save(&document())
            .unwrap();

        let other = VaultStore::new(dir.path(), &key(2)).unwrap();
        assert!(matches!(other.load_outcome(), LoadOutcome::Corrupt(_)));
    }

    #[test]
    fn test_undecodable_document_is_corrupt() {
        let dir = tempdir().unwrap();
        let k = key(1);
        let store = VaultStore::new(dir.path(), &k).unwrap();

        let blob = StoreCodec::new(&k).unwrap().encrypt(b"not json").unwrap();
        fs::write(store.path(), blob).unwrap();

        assert!(matches!(store.load_outcome(), LoadOutcome::Corrupt(_)));
    }

    #[test]
    fn test_stale_file_is_corrupt_when_max_age_set() {
        let dir = tempdir().unwrap();
        let k = key(1);
        let store = VaultStore::new(dir.path(), &k)
            .unwrap()
            .with_max_age(Some(Duration::from_secs(60)));

        let codec = StoreCodec::new(&k).unwrap();
        let issued = time::OffsetDateTime::now_utc() - time::Duration::hours(2);
        let blob = codec
            .encrypt_at(&serde_json::to_vec(&document()).unwrap(), issued)
            .unwrap();
        fs::write(store.path(), blob).unwrap();

        assert!(matches!(store.load_outcome(), LoadOutcome::Corrupt(_)));

        let unlimited = VaultStore::new(dir.path(), &k).unwrap();
        assert!(matches!(unlimited.load_outcome(), LoadOutcome::Loaded(_)));
    }
}
