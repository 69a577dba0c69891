//! # 拉取模块
//!
//! 从 HTTP(S) 或本地文件读取上游规则文本。

pub mod client;
pub mod source;

// 重新导出常用类型
pub use client::Fetcher;
pub use source::{Source, SourceLocation};
