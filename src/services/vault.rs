use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::{Duration, OffsetDateTime};

use crate::config::Config;
use crate::error::VaultError;
use crate::models::totp_entry::format_timestamp;
use crate::models::{Enrollment, EntryStatus, SecretEntry, TotpStatus};
use crate::repositories::VaultStore;
use crate::services::key_derivation::resolve_vault_key;
use crate::services::totp;

/// 保管庫の振る舞いに関する設定
#[derive(Debug, Clone)]
pub struct VaultSettings {
    /// 登録時に発行者名が指定されなかった場合の既定値
    pub default_issuer: String,
    /// シークレット更新後に旧シークレットを受け付ける期間
    pub grace_period: Duration,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            default_issuer: "Oxvault".to_string(),
            grace_period: Duration::minutes(5),
        }
    }
}

impl VaultSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_issuer: config.default_issuer.clone(),
            grace_period: Duration::seconds(config.grace_period_secs.max(0)),
        }
    }
}

/// TOTPシークレット保管庫
///
/// 変更操作はすべて「表全体を読み込み → 1エントリを変更 → 表全体を保存」で行い、
/// プロセス内の Mutex で直列化する。Clone したインスタンス同士は同じロックを共有する。
///
/// # Security
/// - シークレット・コードはログに出力しない
/// - 検証・有効化の失敗理由（ユーザー不在、未確認など）は戻り値で区別しない
#[derive(Clone)]
pub struct TotpVault {
    store: VaultStore,
    settings: Arc<VaultSettings>,
    write_lock: Arc<Mutex<()>>,
}

impl TotpVault {
    pub fn new(store: VaultStore, settings: VaultSettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 設定から鍵素材を用意して保管庫を構築
    ///
    /// 鍵素材が得られない場合のみエラー（起動を中断すべき）
    pub fn from_config(config: &Config) -> Result<Self, VaultError> {
        let key = resolve_vault_key(&config.vault_dir, config.passphrase())?;
        let store = VaultStore::new(&config.vault_dir, &key)?
            .with_max_age(config.max_age_secs.map(std::time::Duration::from_secs));

        tracing::info!(
            path = %store.path().display(),
            key_source = ?key.source(),
            "TOTP保管庫を初期化"
        );

        Ok(Self::new(store, VaultSettings::from_config(config)))
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    /// 登録を開始（新しいシークレットを発行して pending で保存）
    ///
    /// 有効なエントリがあれば、そのシークレットを猶予期間付きで旧シークレットとして残す
    pub fn start_enrollment(
        &self,
        username: &str,
        issuer: Option<&str>,
    ) -> Result<Enrollment, VaultError> {
        self.start_enrollment_at(username, issuer, OffsetDateTime::now_utc())
    }

    /// 初回コードを検証して有効化し、バージョンを返す
    pub fn verify_and_activate(&self, username: &str, code: &str) -> Option<u64> {
        self.verify_and_activate_at(username, code, OffsetDateTime::now_utc())
    }

    /// ログイン時のコード検証（有効なエントリのみ）
    pub fn validate(&self, username: &str, code: &str) -> bool {
        self.validate_at(username, code, OffsetDateTime::now_utc())
    }

    /// エントリを完全に削除
    pub fn disable(&self, username: &str) -> bool {
        let _guard = self.lock();
        let mut document = self.store.load();

        if document.users.remove(username).is_none() {
            return false;
        }

        match self.store.save(&document) {
            Ok(()) => {
                tracing::info!(username = %username, "2FA無効化完了");
                true
            }
            Err(e) => {
                tracing::error!(error = ?e, username = %username, "2FA無効化の保存に失敗");
                false
            }
        }
    }

    /// 状態照会（変更しない）
    pub fn status(&self, username: &str) -> TotpStatus {
        TotpStatus::from(self.store.load().users.get(username))
    }

    pub(crate) fn start_enrollment_at(
        &self,
        username: &str,
        issuer: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<Enrollment, VaultError> {
        validate_label("username", username)?;
        let issuer = issuer.unwrap_or(&self.settings.default_issuer);
        validate_label("issuer", issuer)?;

        let secret = totp::generate_secret();
        let provisioning_uri = totp::provisioning_uri(&secret, username, issuer)?;
        let qr_code = totp::qr_code_data_url(&secret, username, issuer)?;

        let _guard = self.lock();
        let mut document = self.store.load();

        let existing = document.users.get(username);
        let version = existing.map_or(1, |e| e.version + 1);

        // 有効なシークレットのみ猶予を与える（pending → pending は猶予なし）
        let (previous_secret, previous_secret_valid_until) = match existing {
            Some(e) if e.status == EntryStatus::Active => (
                Some(e.secret.clone()),
                Some(format_timestamp(now + self.settings.grace_period)),
            ),
            _ => (None, None),
        };
        let rotated = previous_secret.is_some();

        let stamp = format_timestamp(now);
        document.users.insert(
            username.to_string(),
            SecretEntry {
                secret: secret.clone(),
                status: EntryStatus::Pending,
                version,
                created_at: stamp.clone(),
                updated_at: stamp,
                last_verified_at: None,
                issuer: issuer.to_string(),
                previous_secret,
                previous_secret_valid_until,
            },
        );

        self.store.save(&document)?;

        tracing::info!(username = %username, version, rotated, "2FA設定開始");

        Ok(Enrollment {
            secret,
            version,
            provisioning_uri,
            qr_code,
        })
    }

    pub(crate) fn verify_and_activate_at(
        &self,
        username: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> Option<u64> {
        let code = totp::normalize_code(code)?;

        let _guard = self.lock();
        let mut document = self.store.load();
        let entry = document.users.get_mut(username)?;

        if !code_matches(entry, &code, now) {
            tracing::info!(username = %username, "2FA有効化失敗: コード不一致");
            return None;
        }

        let stamp = format_timestamp(now);
        entry.status = EntryStatus::Active;
        entry.updated_at = stamp.clone();
        entry.last_verified_at = Some(stamp);
        entry.clear_previous_secret();
        let version = entry.version;

        if let Err(e) = self.store.save(&document) {
            tracing::error!(error = ?e, username = %username, "2FA有効化の保存に失敗");
            return None;
        }

        tracing::info!(username = %username, version, "2FA有効化完了");
        Some(version)
    }

    pub(crate) fn validate_at(&self, username: &str, code: &str, now: OffsetDateTime) -> bool {
        let Some(code) = totp::normalize_code(code) else {
            return false;
        };

        let _guard = self.lock();
        let mut document = self.store.load();
        let Some(entry) = document.users.get_mut(username) else {
            return false;
        };

        if entry.status != EntryStatus::Active || !code_matches(entry, &code, now) {
            tracing::info!(username = %username, "2FA検証失敗");
            return false;
        }

        entry.last_verified_at = Some(format_timestamp(now));

        // コード自体は正しいので、記録の保存に失敗しても検証は成功とする
        if let Err(e) = self.store.save(&document) {
            tracing::warn!(error = ?e, username = %username, "最終検証時刻の保存に失敗");
        }

        tracing::debug!(username = %username, "2FA検証成功");
        true
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// 現在のシークレット（前後1ステップ）、次に猶予期間内の旧シークレット（現在ステップのみ）で照合
fn code_matches(entry: &SecretEntry, code: &str, now: OffsetDateTime) -> bool {
    let unix_time = u64::try_from(now.unix_timestamp()).unwrap_or(0);

    if totp::verify_code(&entry.secret, code, unix_time) {
        return true;
    }

    match entry.previous_secret_in_grace(now) {
        Some(previous) => {
            let matched = totp::verify_code_exact(previous, code, unix_time);
            if matched {
                tracing::debug!(version = entry.version, "旧シークレットで照合（猶予期間内）");
            }
            matched
        }
        None => false,
    }
}

/// プロビジョニングURIのラベルに使う値の検証
fn validate_label(field: &str, value: &str) -> Result<(), VaultError> {
    if value.trim().is_empty() {
        return Err(VaultError::InvalidInput(format!("{} is required", field)));
    }
    if value.contains(':') {
        return Err(VaultError::InvalidInput(format!(
            "{} must not contain ':'",
            field
        )));
    }
    Ok(())
}
