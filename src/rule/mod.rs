//! # 规则处理模块
//!
//! 此模块负责：
//! 1. 把上游规则文本解析为统一的规则模型
//! 2. 去重、合并、裁剪规则集合
//! 3. 按 Shadowrocket / Mihomo 两种方言输出规则文件

pub mod formatter;
pub mod model;
pub mod parser;

pub use formatter::{create_formatter, Dialect, Formatter, MihomoLayout, RenderOptions};
pub use model::RuleSet;
pub use parser::{parse_source, SourceKind};
