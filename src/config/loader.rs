//! # 配置加载
//!
//! 优先级：命令行指定的文件 > 根目录下的 `proxy-rules.toml` > 内置默认值。

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::types::Config;

/// 默认配置文件名
pub const CONFIG_FILE_NAME: &str = "proxy-rules.toml";

/// 加载配置并把相对路径解析到 `root` 下
pub fn load_config(explicit: Option<&Path>, root: &Path) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => parse_config_file(path)?,
        None => {
            let path = root.join(CONFIG_FILE_NAME);
            if path.is_file() {
                parse_config_file(&path)?
            } else {
                info!(root = %root.display(), "no {} found, using defaults", CONFIG_FILE_NAME);
                Config::default()
            }
        }
    };

    config.validate()?;
    config.resolve_paths(root);
    Ok(config)
}

/// 读取并解析单个配置文件
pub fn parse_config_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    info!(
        path = %path.display(),
        categories = config.categories.len(),
        "loaded configuration"
    );
    Ok(config)
}

/// 默认配置的 TOML 文本（用于 init 命令）
pub fn render_default_config() -> Result<String> {
    let body = toml::to_string_pretty(&Config::default())
        .context("Failed to serialize default config")?;
    Ok(format!(
        "# proxy-rules configuration\n# Relative paths are resolved against the repository root.\n\n{}",
        body
    ))
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{MihomoLayout, SourceKind};

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(None, dir.path()).unwrap();
        assert_eq!(config.categories.len(), 3);
        assert_eq!(config.output.shadowrocket_dir, dir.path().join("shadowrocket"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[output]
mihomo_layout = "yaml"

[[category]]
name = "ads"

[[category.sources]]
location = "upstream/ads.txt"
"#,
        )
        .unwrap();

        let config = load_config(None, dir.path()).unwrap();
        assert_eq!(config.output.mihomo_layout, MihomoLayout::Yaml);
        assert!(config.output.ip_no_resolve);
        assert_eq!(config.fetch.timeout_secs, 60);
        assert_eq!(config.category_names(), vec!["ads"]);
        assert_eq!(config.categories[0].sources[0].kind, SourceKind::List);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml")), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[output]\nshadowrocket = \"x\"\n").unwrap();
        assert!(load_config(Some(&path), dir.path()).is_err());
    }

    #[test]
    fn test_default_config_round_trips() {
        let text = render_default_config().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
