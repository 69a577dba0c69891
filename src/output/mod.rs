//! # 输出模块
//!
//! 负责把渲染好的规则文件写入输出目录。

mod writer;

pub use writer::{write_atomic, RuleFileWriter, WrittenFile};
