use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;

/// 環境変数のプレフィックス
pub const ENV_PREFIX: &str = "OXVAULT_";

#[derive(Debug, Deserialize)]
pub struct Config {
    /// 暗号化ファイル・ソルト・鍵ファイルを置くディレクトリ
    #[serde(default = "default_vault_dir")]
    pub vault_dir: PathBuf,

    /// 鍵導出用パスフレーズ（未設定時は開発用の鍵ファイルにフォールバック）
    #[serde(default)]
    pub passphrase: Option<SecretBox<String>>,

    /// TOTP発行者名（認証アプリに表示される）
    #[serde(default = "default_issuer")]
    pub default_issuer: String,

    /// シークレット更新後、旧シークレットを受け付ける猶予（秒）
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: i64,

    /// 暗号化ファイルの最大経過時間（秒）。未設定なら検査しない
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

const DEFAULT_VAULT_DIR: &str = "data/totp";
const DEFAULT_ISSUER: &str = "Oxvault";
const DEFAULT_GRACE_PERIOD_SECS: i64 = 300;

fn default_vault_dir() -> PathBuf {
    PathBuf::from(DEFAULT_VAULT_DIR)
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_grace_period_secs() -> i64 {
    DEFAULT_GRACE_PERIOD_SECS
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env()
    }

    /// 空文字列のパスフレーズは未設定として扱う
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .filter(|p| !p.is_empty())
    }
}
