//! # 上游来源
//!
//! 把配置里的 location 字符串解析为远程 URL 或本地文件。

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::rule::SourceKind;

/// 来源位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// http:// 或 https://
    Remote(String),
    /// 本地文件
    Local(PathBuf),
}

impl SourceLocation {
    /// 解析 location，相对路径基于 `base`
    pub fn parse(raw: &str, base: &Path) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return SourceLocation::Remote(raw.to_string());
        }

        let path = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
        if path.is_absolute() {
            SourceLocation::Local(path.to_path_buf())
        } else {
            SourceLocation::Local(base.join(path))
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Remote(url) => write!(f, "{}", url),
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// 一个待拉取的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub location: SourceLocation,
    pub kind: SourceKind,
}

impl Source {
    pub fn from_config(config: &SourceConfig, base: &Path) -> Self {
        Self {
            location: SourceLocation::parse(&config.location, base),
            kind: config.kind,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.location.fmt(f)
    }
}
