//! # 配置结构
//!
//! 对应 `proxy-rules.toml`。所有字段都有默认值，缺省时复现默认的
//! direct / proxy / reject 三个分类。
//!
//! ```toml
//! custom_dir = "custom"
//!
//! [output]
//! shadowrocket_dir = "shadowrocket"
//! mihomo_dir = "mihomo"
//! mihomo_layout = "text"
//! ip_no_resolve = true
//!
//! [[category]]
//! name = "direct"
//!
//! [[category.sources]]
//! location = "https://example.com/direct.module"
//! kind = "module"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::rule::{Dialect, MihomoLayout, RenderOptions, SourceKind};

/// 默认上游：GMOogway 的 Shadowrocket 规则模块
const DEFAULT_UPSTREAM: &str =
    "https://raw.githubusercontent.com/GMOogway/shadowrocket-rules/master";

/// 默认分类名
const DEFAULT_CATEGORIES: [&str; 3] = ["direct", "proxy", "reject"];

// ========================================
// 根配置
// ========================================

/// 根配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// 自定义列表目录（追加 / 额外 URL / 排除）
    pub custom_dir: PathBuf,
    pub output: OutputConfig,
    pub fetch: FetchConfig,
    pub processing: ProcessingConfig,
    #[serde(rename = "category")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            custom_dir: PathBuf::from("custom"),
            output: OutputConfig::default(),
            fetch: FetchConfig::default(),
            processing: ProcessingConfig::default(),
            categories: DEFAULT_CATEGORIES
                .iter()
                .map(|name| CategoryConfig {
                    name: name.to_string(),
                    sources: vec![SourceConfig {
                        location: format!("{}/sr_{}_list.module", DEFAULT_UPSTREAM, name),
                        kind: SourceKind::Module,
                    }],
                })
                .collect(),
        }
    }
}

impl Config {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        ensure!(self.fetch.timeout_secs > 0, "fetch.timeout_secs must be positive");
        ensure!(self.fetch.parallelism > 0, "fetch.parallelism must be positive");
        ensure!(!self.categories.is_empty(), "at least one [[category]] is required");

        let mut seen = std::collections::HashSet::new();
        for category in &self.categories {
            let name = category.name.as_str();
            if name.is_empty()
                || name.starts_with('.')
                || name.contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
            {
                bail!("invalid category name `{}`", name);
            }
            if !seen.insert(name) {
                bail!("duplicate category `{}`", name);
            }
            for source in &category.sources {
                ensure!(
                    !source.location.trim().is_empty(),
                    "category `{}` has a source with an empty location",
                    name
                );
            }
        }
        Ok(())
    }

    /// 把相对路径解析到根目录下
    pub fn resolve_paths(&mut self, root: &Path) {
        for dir in [
            &mut self.custom_dir,
            &mut self.output.shadowrocket_dir,
            &mut self.output.mihomo_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
    }

    /// 分类名列表
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }
}

// ========================================
// 子配置
// ========================================

/// 输出配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub shadowrocket_dir: PathBuf,
    pub mihomo_dir: PathBuf,
    pub mihomo_layout: MihomoLayout,
    /// IP 类规则统一追加 no-resolve
    pub ip_no_resolve: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            shadowrocket_dir: PathBuf::from("shadowrocket"),
            mihomo_dir: PathBuf::from("mihomo"),
            mihomo_layout: MihomoLayout::Text,
            ip_no_resolve: true,
        }
    }
}

impl OutputConfig {
    /// 方言对应的输出目录
    pub fn dir_for(&self, dialect: Dialect) -> &Path {
        match dialect {
            Dialect::Shadowrocket => &self.shadowrocket_dir,
            Dialect::Mihomo => &self.mihomo_dir,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            ip_no_resolve: self.ip_no_resolve,
            mihomo_layout: self.mihomo_layout,
        }
    }
}

/// 拉取配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 同一分类内并发拉取的上限
    pub parallelism: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            parallelism: 4,
            user_agent: format!("proxy-rules/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// 规则处理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// 去掉被 DOMAIN-SUFFIX 覆盖的 DOMAIN 规则
    pub prune_covered_domains: bool,
    /// 输出前排序，保证提交的 diff 稳定
    pub sort: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            prune_covered_domains: true,
            sort: true,
        }
    }
}

/// 单个分类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    /// 分类名，同时也是输出文件名
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl CategoryConfig {
    /// 追加规则：`<custom_dir>/<name>.list`
    pub fn append_list(&self, custom_dir: &Path) -> PathBuf {
        custom_dir.join(format!("{}.list", self.name))
    }

    /// 额外上游 URL：`<custom_dir>/<name>-url.list`
    pub fn url_list(&self, custom_dir: &Path) -> PathBuf {
        custom_dir.join(format!("{}-url.list", self.name))
    }

    /// 排除规则：`<custom_dir>/<name>_excludes.list`
    pub fn exclude_list(&self, custom_dir: &Path) -> PathBuf {
        custom_dir.join(format!("{}_excludes.list", self.name))
    }
}

/// 单个上游来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// HTTP(S) URL、file:// URL 或本地路径（相对根目录）
    pub location: String,
    #[serde(default)]
    pub kind: SourceKind,
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.category_names(), vec!["direct", "proxy", "reject"]);
        assert_eq!(
            config.categories[1].sources[0].location,
            "https://raw.githubusercontent.com/GMOogway/shadowrocket-rules/master/sr_proxy_list.module"
        );
        assert_eq!(config.categories[1].sources[0].kind, SourceKind::Module);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_paths() {
        let category = CategoryConfig {
            name: "reject".to_string(),
            sources: Vec::new(),
        };
        let dir = Path::new("custom");
        assert_eq!(category.append_list(dir), Path::new("custom/reject.list"));
        assert_eq!(category.url_list(dir), Path::new("custom/reject-url.list"));
        assert_eq!(
            category.exclude_list(dir),
            Path::new("custom/reject_excludes.list")
        );
    }

    #[test]
    fn test_validate_rejects_bad_categories() {
        let mut config = Config::default();
        config.categories[2].name = "direct".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.categories[0].name = "../escape".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.parallelism = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_paths_keeps_absolute() {
        let mut config = Config::default();
        config.output.mihomo_dir = PathBuf::from("/srv/mihomo");
        config.resolve_paths(Path::new("/repo"));
        assert_eq!(config.custom_dir, Path::new("/repo/custom"));
        assert_eq!(config.output.shadowrocket_dir, Path::new("/repo/shadowrocket"));
        assert_eq!(config.output.mihomo_dir, Path::new("/srv/mihomo"));
    }
}
