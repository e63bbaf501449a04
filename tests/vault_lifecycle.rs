use std::fs;
use std::path::Path;

use oxvault::config::Config;
use oxvault::repositories::vault_store::BLOB_FILE;
use oxvault::services::key_derivation::{KEY_FILE, SALT_FILE};
use oxvault::services::totp;
use oxvault::{TotpVault, VaultError};
use secrecy::SecretBox;
use tempfile::tempdir;

fn config(dir: &Path, passphrase: Option<&str>) -> Config {
    Config {
        vault_dir: dir.to_path_buf(),
        passphrase: passphrase.map(|p| SecretBox::new(Box::new(p.to_string()))),
        default_issuer: "Oxvault".to_string(),
        grace_period_secs: 300,
        max_age_secs: None,
    }
}

fn current_code(secret: &str) -> String {
    let now = time::OffsetDateTime::now_utc().unix_timestamp() as u64;
    totp::generate_code(secret, now).unwrap()
}

#[test]
fn enrollment_survives_restart_with_passphrase() {
    let dir = tempdir().unwrap();

    let vault = TotpVault::from_config(&config(dir.path(), Some("s3cret passphrase"))).unwrap();
    let enrollment = vault.start_enrollment("alice", None).unwrap();
    assert_eq!(
        vault.verify_and_activate("alice", &current_code(&enrollment.secret)),
        Some(enrollment.version)
    );
    drop(vault);

    assert!(dir.path().join(SALT_FILE).exists());
    assert!(!dir.path().join(KEY_FILE).exists());

    let restarted = TotpVault::from_config(&config(dir.path(), Some("s3cret passphrase"))).unwrap();
    let status = restarted.status("alice");
    assert!(status.enabled);
    assert_eq!(status.version, 1);
    assert!(restarted.validate("alice", &current_code(&enrollment.secret)));
}

#[test]
fn wrong_passphrase_sees_empty_vault() {
    let dir = tempdir().unwrap();

    let vault = TotpVault::from_config(&config(dir.path(), Some("right"))).unwrap();
    vault.start_enrollment("alice", None).unwrap();

    let other = TotpVault::from_config(&config(dir.path(), Some("wrong"))).unwrap();
    assert!(!other.status("alice").pending);
    assert_eq!(other.status("alice").version, 0);
}

#[test]
fn development_key_file_fallback() {
    let dir = tempdir().unwrap();

    let vault = TotpVault::from_config(&config(dir.path(), None)).unwrap();
    vault.start_enrollment("alice", None).unwrap();
    assert!(dir.path().join(KEY_FILE).exists());

    let restarted = TotpVault::from_config(&config(dir.path(), None)).unwrap();
    assert!(restarted.status("alice").pending);
}

#[test]
fn corrupt_key_file_aborts_startup() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(KEY_FILE), "definitely not a key").unwrap();

    match TotpVault::from_config(&config(dir.path(), None)) {
        Err(e @ VaultError::KeyMaterial { .. }) => assert!(e.is_fatal()),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("startup should fail"),
    }
}

#[test]
fn tampered_blob_is_treated_as_empty() {
    let dir = tempdir().unwrap();
    let vault = TotpVault::from_config(&config(dir.path(), None)).unwrap();
    let enrollment = vault.start_enrollment("alice", None).unwrap();
    vault
        .verify_and_activate("alice", &current_code(&enrollment.secret))
        .unwrap();

    let blob_path = dir.path().join(BLOB_FILE);
    let mut blob = fs::read(&blob_path).unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    fs::write(&blob_path, blob).unwrap();

    assert!(!vault.status("alice").enabled);
    assert!(!vault.validate("alice", &current_code(&enrollment.secret)));

    // 次の保存で正常なファイルに置き換わる
    vault.start_enrollment("bob", None).unwrap();
    assert!(vault.status("bob").pending);
}

#[test]
fn disable_removes_entry() {
    let dir = tempdir().unwrap();
    let vault = TotpVault::from_config(&config(dir.path(), None)).unwrap();
    let enrollment = vault.start_enrollment("alice", None).unwrap();
    let code = current_code(&enrollment.secret);
    vault.verify_and_activate("alice", &code).unwrap();

    assert!(vault.disable("alice"));
    assert!(!vault.validate("alice", &code));

    let status = vault.status("alice");
    assert!(!status.enabled);
    assert!(!status.pending);
    assert_eq!(status.version, 0);
    assert!(status.created_at.is_none());
}

#[test]
fn clones_share_one_vault() {
    let dir = tempdir().unwrap();
    let vault = TotpVault::from_config(&config(dir.path(), None)).unwrap();
    let handle = vault.clone();

    handle.start_enrollment("alice", Some("Acme")).unwrap();
    let status = vault.status("alice");
    assert!(status.pending);
    assert_eq!(status.issuer.as_deref(), Some("Acme"));
}
