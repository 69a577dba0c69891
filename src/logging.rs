//! # 日志初始化
//!
//! 日志输出到 stderr，stdout 只留给 `--json` 报告和 convert / guide 的结果。
//! `RUST_LOG` 优先；`--debug` 打开本程序的 debug 日志。

use tracing_subscriber::EnvFilter;

/// 初始化全局日志
pub fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("info,proxy_rules=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
