use data_encoding::BASE32;
use rand::RngCore;
use totp_rs::{Algorithm, TOTP};

use crate::error::VaultError;

/// コード桁数
pub const DIGITS: usize = 6;
/// タイムステップ（秒）
pub const STEP: u64 = 30;
/// 通常検証で許容する前後のステップ数
pub const SKEW: u8 = 1;
/// シークレットのバイト数（160ビット）
pub const SECRET_BYTES: usize = 20;

const MIN_CODE_LEN: usize = 5;
const MAX_CODE_LEN: usize = 8;

/// 20バイトのランダムシークレットを生成し、Base32でエンコード
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32.encode(&bytes)
}

/// 入力コードを正規化
///
/// 前後の空白と途中のスペースを除去し、5〜8桁の数字のみ受け付ける。
/// それ以外は暗号的な比較に進む前に `None` を返す。
pub fn normalize_code(code: &str) -> Option<String> {
    let normalized: String = code.trim().chars().filter(|c| *c != ' ').collect();

    let valid_len = (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&normalized.len());
    (valid_len && normalized.chars().all(|c| c.is_ascii_digit())).then_some(normalized)
}

/// プロビジョニングURI（`otpauth://totp/...`）を生成
///
/// # Arguments
/// * `secret` - Base32エンコードされたシークレット
/// * `account` - アカウント名（ユーザー名）
/// * `issuer` - 発行者名
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> Result<String, VaultError> {
    Ok(create_totp(secret, SKEW, Some(issuer), account)?.get_url())
}

/// QRコードを生成（PNG形式、`data:` URL）
pub fn qr_code_data_url(secret: &str, account: &str, issuer: &str) -> Result<String, VaultError> {
    let totp = create_totp(secret, SKEW, Some(issuer), account)?;

    let qr_code = totp.get_qr_base64().map_err(|e| {
        tracing::error!(error = %e, "QRコード生成エラー");
        VaultError::Totp("qr code generation error".to_string())
    })?;

    Ok(format!("data:image/png;base64,{}", qr_code))
}

/// 指定時刻のコードを生成
pub fn generate_code(secret: &str, unix_time: u64) -> Result<String, VaultError> {
    Ok(create_totp(secret, 0, None, "")?.generate(unix_time))
}

/// TOTPコードを検証（前後1ステップを許容）
///
/// 保存済みシークレットが壊れている場合は不一致として扱う
pub fn verify_code(secret: &str, code: &str, unix_time: u64) -> bool {
    check(secret, SKEW, code, unix_time)
}

/// TOTPコードを検証（現在のステップのみ）
pub fn verify_code_exact(secret: &str, code: &str, unix_time: u64) -> bool {
    check(secret, 0, code, unix_time)
}

fn check(secret: &str, skew: u8, code: &str, unix_time: u64) -> bool {
    match create_totp(secret, skew, None, "") {
        // check は定数時間比較
        Ok(totp) => totp.check(code, unix_time),
        Err(_) => false,
    }
}

fn create_totp(
    secret: &str,
    skew: u8,
    issuer: Option<&str>,
    account: &str,
) -> Result<TOTP, VaultError> {
    let secret_bytes = BASE32.decode(secret.as_bytes()).map_err(|e| {
        tracing::error!(error = ?e, "シークレットのBase32デコードエラー");
        VaultError::Totp("invalid base32 secret".to_string())
    })?;

    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        skew,
        STEP,
        secret_bytes,
        issuer.map(str::to_string),
        account.to_string(),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "TOTP作成エラー");
        VaultError::Totp(format!("totp creation error: {}", e))
    })
}
