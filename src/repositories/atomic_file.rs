//! クラッシュ安全なファイル書き込み
//!
//! 同じディレクトリの一時ファイルに書き込み、`sync_all()` してから
//! 最終パスへ rename する。クラッシュ後のファイルは旧内容か新内容の
//! どちらかで、書きかけの状態は観測されない。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// 対象と同じディレクトリに一時ファイルのパスを作る
fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let parent = parent_dir(path)?;
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("file");

    Ok(parent.join(format!(".{}.tmp.{}", file_name, Uuid::new_v4())))
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent directory: {}", path.display()),
        )
    })
}

/// 所有者のみ読み書き可能なファイルを新規作成
fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// データをアトミックに書き込む
///
/// 既存ファイルは rename で置き換える。失敗時は一時ファイルを削除する。
pub fn atomic_write(path: impl AsRef<Path>, data: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)?;

    let temp = temp_path(path)?;

    let result = (|| -> io::Result<()> {
        let mut file = create_private(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, path)?;
        fsync_dir(parent)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }

    result
}
