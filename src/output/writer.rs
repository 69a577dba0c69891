//! # 规则文件写入
//!
//! 负责规则文件的路径计算和原子写入。
//!
//! 写入流程：在目标目录下创建临时文件 → 写入并 fsync → rename 覆盖目标。
//! 任一步失败时临时文件随 `NamedTempFile` 析构被删除，目标文件保持原样。
//! 新文件权限为 0644，覆盖已有文件时沿用其原权限。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::rule::Formatter;

/// 已写入（或 dry-run 下将写入）的文件
#[derive(Debug, Clone, Serialize)]
pub struct WrittenFile {
    pub path: PathBuf,
    /// 内容是否与原文件不同
    pub changed: bool,
}

/// 规则文件写入器
pub struct RuleFileWriter {
    dry_run: bool,
}

impl RuleFileWriter {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// 获取指定分类和格式的规则文件路径
    pub fn rule_file_path(dir: &Path, category: &str, formatter: &dyn Formatter) -> PathBuf {
        dir.join(format!("{}.{}", category, formatter.file_extension()))
    }

    /// 写入文件；内容未变化时跳过写入
    pub fn write(&self, path: &Path, content: &str) -> Result<WrittenFile> {
        let changed = match fs::read(path) {
            Ok(existing) => existing != content.as_bytes(),
            Err(_) => true,
        };

        if !changed {
            debug!(path = %path.display(), "unchanged");
        } else if self.dry_run {
            info!(path = %path.display(), "would write (dry run)");
        } else {
            write_atomic(path, content.as_bytes())?;
            info!(path = %path.display(), bytes = content.len(), "wrote rule file");
        }

        Ok(WrittenFile {
            path: path.to_path_buf(),
            changed,
        })
    }
}

/// 原子写入
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(content)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;

    // 临时文件默认 0600，rename 前换成目标文件原有的权限
    if let Some(permissions) = target_permissions(path) {
        tmp.as_file()
            .set_permissions(permissions)
            .with_context(|| format!("Failed to set permissions for {}", path.display()))?;
    }
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

/// 目标已存在时沿用其权限，否则使用 0644
fn target_permissions(path: &Path) -> Option<fs::Permissions> {
    match fs::metadata(path) {
        Ok(meta) => Some(meta.permissions()),
        Err(_) => default_permissions(),
    }
}

#[cfg(unix)]
fn default_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<fs::Permissions> {
    None
}
