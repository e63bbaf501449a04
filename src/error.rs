use std::path::PathBuf;

/// 保管庫エラー
///
/// 検証・有効化の失敗はエラーではなく `bool` / `Option` で返す。
/// ここに現れるのは起動時の鍵素材エラー、入力不正、永続化失敗のみ。
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("鍵素材エラー ({path}): {reason}")]
    KeyMaterial { path: PathBuf, reason: String },

    #[error("入力エラー: {0}")]
    InvalidInput(String),

    #[error("ファイルI/Oエラー")]
    Io(#[from] std::io::Error),

    #[error("シリアライズエラー")]
    Serialization(#[from] serde_json::Error),

    #[error("暗号化エラー")]
    Crypto(#[from] crate::services::codec::CodecError),

    #[error("TOTPエラー: {0}")]
    Totp(String),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

impl VaultError {
    pub(crate) fn key_material(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::KeyMaterial {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 起動を中断すべきエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KeyMaterial { .. })
    }
}
