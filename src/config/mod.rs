//! # 配置模块
//!
//! 负责 `proxy-rules.toml` 的结构定义、加载和默认值。

pub mod loader;
pub mod types;

// 重新导出常用类型
pub use loader::{load_config, render_default_config, CONFIG_FILE_NAME};
pub use types::{CategoryConfig, Config, FetchConfig, SourceConfig};
