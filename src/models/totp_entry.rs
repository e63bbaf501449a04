use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// エントリの状態
///
/// `Disabled` はエントリが存在しないことを表し、保存されることはない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Disabled,
    Pending,
    Active,
}

/// ユーザーごとのTOTPシークレット
///
/// 平文シークレットを含むため Debug では伏せ字にする
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    pub secret: String,
    pub status: EntryStatus,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub last_verified_at: Option<String>,
    pub issuer: String,
    #[serde(default)]
    pub previous_secret: Option<String>,
    #[serde(default)]
    pub previous_secret_valid_until: Option<String>,
}

impl SecretEntry {
    /// 猶予期間内であれば旧シークレットを返す
    ///
    /// 期限がパースできない場合は猶予切れとみなす
    pub fn previous_secret_in_grace(&self, now: OffsetDateTime) -> Option<&str> {
        let secret = self.previous_secret.as_deref()?;
        let deadline = self
            .previous_secret_valid_until
            .as_deref()
            .and_then(parse_timestamp)?;

        (now <= deadline).then_some(secret)
    }

    pub fn clear_previous_secret(&mut self) {
        self.previous_secret = None;
        self.previous_secret_valid_until = None;
    }
}

impl fmt::Debug for SecretEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEntry")
            .field("secret", &"[REDACTED]")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("last_verified_at", &self.last_verified_at)
            .field("issuer", &self.issuer)
            .field(
                "previous_secret",
                &self.previous_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "previous_secret_valid_until",
                &self.previous_secret_valid_until,
            )
            .finish()
    }
}

/// 暗号化ファイルに保存されるシークレット表全体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultDocument {
    #[serde(default)]
    pub users: BTreeMap<String, SecretEntry>,
}

impl VaultDocument {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// 状態照会の結果（読み取り専用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotpStatus {
    pub enabled: bool,
    pub pending: bool,
    pub version: u64,
    pub last_verified_at: Option<String>,
    pub created_at: Option<String>,
    pub issuer: Option<String>,
}

impl TotpStatus {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            pending: false,
            version: 0,
            last_verified_at: None,
            created_at: None,
            issuer: None,
        }
    }
}

impl From<Option<&SecretEntry>> for TotpStatus {
    fn from(entry: Option<&SecretEntry>) -> Self {
        match entry {
            Some(entry) => Self {
                enabled: entry.status == EntryStatus::Active,
                pending: entry.status == EntryStatus::Pending,
                version: entry.version,
                last_verified_at: entry.last_verified_at.clone(),
                created_at: Some(entry.created_at.clone()),
                issuer: Some(entry.issuer.clone()),
            },
            None => Self::disabled(),
        }
    }
}

/// 登録開始の結果
///
/// シークレット平文を含むため、呼び出し側でログ出力しないこと
#[derive(Clone, Serialize)]
pub struct Enrollment {
    pub secret: String,
    pub version: u64,
    pub provisioning_uri: String,
    /// `data:image/png;base64,...` 形式のQRコード
    pub qr_code: String,
}

impl fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrollment")
            .field("secret", &"[REDACTED]")
            .field("version", &self.version)
            .field("provisioning_uri", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// UTC・秒精度のRFC 3339文字列
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let at = at
        .to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .unwrap_or(at);
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}
