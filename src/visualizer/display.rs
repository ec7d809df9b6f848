use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use std::process::Command;

/// 保存済みの図をOS標準のビューアで開き、終了するまで待つ
///
/// ビューアを閉じるまでパイプラインを止める必要があるため、開いて即座に戻る
/// opener系クレートではなく `Command::status()` で子プロセスの終了を待つ。
pub fn show_figure(path: &Path) -> Result<()> {
    info!("[Viz] 図を表示します（ビューアを閉じると続行）: {}", path.display());

    let status = viewer_command(path)
        .status()
        .with_context(|| format!("ビューアを起動できません: {}", path.display()))?;

    if !status.success() {
        warn!("[Viz] ビューアが異常終了しました: {}", status);
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn viewer_command(path: &Path) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg("-W").arg(path);
    cmd
}

#[cfg(target_os = "windows")]
fn viewer_command(path: &Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "start", "/WAIT", ""]).arg(path);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn viewer_command(path: &Path) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(path);
    cmd
}
