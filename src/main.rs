use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use oxvault::{TotpVault, config::Config};

/// TOTPシークレット保管庫の運用CLI
#[derive(Parser)]
#[command(name = "oxvault", version, about = "TOTP secret vault")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 新しいシークレットを発行（既存なら更新）
    Enroll {
        username: String,
        #[arg(long)]
        issuer: Option<String>,
    },
    /// 初回コードを検証して有効化
    Activate { username: String, code: String },
    /// ログイン時のコード検証
    Validate { username: String, code: String },
    /// 2FAを無効化（エントリ削除）
    Disable { username: String },
    /// 状態照会
    Status { username: String },
}

#[derive(Serialize)]
struct ActivateOutput {
    activated: bool,
    version: Option<u64>,
}

#[derive(Serialize)]
struct ValidateOutput {
    valid: bool,
}

#[derive(Serialize)]
struct DisableOutput {
    disabled: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    // ログ初期化（JSON形式、標準エラー出力）
    init_tracing();

    let cli = Cli::parse();

    // 設定読み込み
    let config = Config::load().map_err(|e| {
        tracing::error!(error = ?e, "設定の読み込みに失敗");
        anyhow::anyhow!("Failed to load config: {}", e)
    })?;

    tracing::debug!(vault_dir = %config.vault_dir.display(), "設定読み込み完了");

    // 鍵素材が用意できない場合はここで終了
    let vault = TotpVault::from_config(&config).map_err(|e| {
        tracing::error!(error = ?e, "保管庫の初期化に失敗");
        anyhow::anyhow!("Failed to initialize vault: {}", e)
    })?;

    run(&vault, cli.command)
}

fn run(vault: &TotpVault, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Enroll { username, issuer } => {
            let enrollment = vault.start_enrollment(&username, issuer.as_deref())?;
            print_json(&enrollment)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Activate { username, code } => {
            let version = vault.verify_and_activate(&username, &code);
            print_json(&ActivateOutput {
                activated: version.is_some(),
                version,
            })?;
            Ok(exit_code(version.is_some()))
        }
        Command::Validate { username, code } => {
            let valid = vault.validate(&username, &code);
            print_json(&ValidateOutput { valid })?;
            Ok(exit_code(valid))
        }
        Command::Disable { username } => {
            let disabled = vault.disable(&username);
            print_json(&DisableOutput { disabled })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { username } => {
            print_json(&vault.status(&username))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// tracing の初期化（JSON形式）
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,oxvault=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();
}
