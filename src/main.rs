//! # proxy-rules
//!
//! 从上游规则列表生成 Shadowrocket 与 Mihomo 规则集的 CLI 工具。
//!
//! ## 功能
//! - 拉取上游规则（HTTP / 本地文件），单个来源失败不影响其他来源
//! - 解析、规范化、去重，支持自定义追加与排除列表
//! - 为每个分类输出两种方言的规则文件，原子写入
//!
//! ## 使用
//! ```bash
//! # 生成默认配置和自定义列表
//! proxy-rules init
//!
//! # 按配置生成全部规则文件（通常由定时任务调用）
//! proxy-rules generate
//!
//! # 只计算不写入，并输出 JSON 报告
//! proxy-rules generate --dry-run --json
//!
//! # 转换单个文件到 Mihomo 格式
//! proxy-rules convert my.list --dialect mihomo
//!
//! # 打印客户端引用配置
//! proxy-rules guide --dialect mihomo --base https://example.com/rules/mihomo
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

// 导入我们的模块
mod config;
mod fetch;
mod logging;
mod output;
mod pipeline;
mod rule;
#[cfg(test)]
mod testing;

use rule::{create_formatter, Dialect, MihomoLayout, RenderOptions, RuleSet, SourceKind};

// ========================================
// CLI 参数定义
// ========================================

/// Shadowrocket / Mihomo 规则集生成工具
#[derive(Parser)]
#[command(name = "proxy-rules")]
#[command(version)]
#[command(about = "Generate Shadowrocket and Mihomo rule sets from upstream rule lists")]
struct Cli {
    /// 显示调试日志
    #[arg(long, global = true)]
    debug: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 支持的子命令
#[derive(Subcommand)]
enum Commands {
    /// 拉取上游并生成全部规则文件
    Generate {
        /// 配置文件路径 (默认: <root>/proxy-rules.toml)
        #[arg(long, short = 'c', value_name = "PATH")]
        config: Option<PathBuf>,

        /// 仓库根目录，相对路径都基于它
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// 只计算不写入
        #[arg(long)]
        dry_run: bool,

        /// JSON 格式输出运行报告
        #[arg(long)]
        json: bool,
    },
    /// 转换单个本地规则文件
    Convert {
        /// 输入文件
        file: PathBuf,

        /// 目标方言
        #[arg(long, short = 'd', value_enum)]
        dialect: Dialect,

        /// 输入文件类型
        #[arg(long, value_enum, default_value_t = SourceKind::List)]
        kind: SourceKind,

        /// Mihomo 文件布局
        #[arg(long, value_enum, default_value_t = MihomoLayout::Text)]
        layout: MihomoLayout,

        /// 文件头中的名称 (默认: 输入文件名)
        #[arg(long)]
        name: Option<String>,

        /// 输出前排序
        #[arg(long)]
        sort: bool,

        /// IP 类规则不自动追加 no-resolve
        #[arg(long)]
        keep_resolve: bool,

        /// 写入文件而不是 stdout
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// 打印客户端引用配置
    Guide {
        /// 目标方言
        #[arg(long, short = 'd', value_enum)]
        dialect: Dialect,

        /// 规则文件所在的 URL 或目录
        #[arg(long)]
        base: String,

        /// 配置文件路径 (默认: <root>/proxy-rules.toml)
        #[arg(long, short = 'c', value_name = "PATH")]
        config: Option<PathBuf>,

        /// 仓库根目录
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// 生成默认配置和空的自定义列表
    Init {
        /// 仓库根目录
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// 覆盖已存在的配置文件
        #[arg(long)]
        force: bool,
    },
}

// ========================================
// 主函数
// ========================================

fn main() {
    // 解析命令行参数
    let cli = Cli::parse();
    logging::init_logging(cli.debug);

    // 执行对应的子命令
    let result = match cli.command {
        Commands::Generate {
            config,
            root,
            dry_run,
            json,
        } => run_generate(config.as_deref(), &root, dry_run, json),
        Commands::Convert {
            file,
            dialect,
            kind,
            layout,
            name,
            sort,
            keep_resolve,
            output: dest,
        } => {
            let options = RenderOptions {
                ip_no_resolve: !keep_resolve,
                mihomo_layout: layout,
            };
            run_convert(&file, dialect, kind, options, name, sort, dest.as_deref())
        }
        Commands::Guide {
            dialect,
            base,
            config,
            root,
        } => run_guide(dialect, &base, config.as_deref(), &root),
        Commands::Init { root, force } => run_init(&root, force),
    };

    // 处理错误
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

// ========================================
// 子命令实现
// ========================================

/// 执行生成流程
fn run_generate(config_path: Option<&Path>, root: &Path, dry_run: bool, json: bool) -> Result<()> {
    let config = config::load_config(config_path, root)?;

    info!(
        root = %root.display(),
        categories = config.categories.len(),
        dry_run,
        "starting rule generation"
    );

    let report = pipeline::Pipeline::new(&config, root, dry_run)?.run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{:<16}\t{:<14}\t{:>8}\t{:>8}\t{:>8}",
            "CATEGORY", "STATUS", "RULES", "FAILED", "CHANGED"
        );
        for category in &report.categories {
            let status = match category.status {
                pipeline::CategoryStatus::Written => "written",
                pipeline::CategoryStatus::FetchFailed => "fetch-failed",
                pipeline::CategoryStatus::WriteFailed => "write-failed",
            };
            println!(
                "{:<16}\t{:<14}\t{:>8}\t{:>8}\t{:>8}",
                category.name,
                status,
                category.rules,
                category.sources_failed.len(),
                category.files.iter().filter(|f| f.changed).count()
            );
        }
        println!("\nTotal: {} files changed", report.changed_files());
    }

    if !report.is_success() {
        let failed = report.failed_categories();
        error!(categories = ?failed, "rule generation finished with errors");
        bail!("{} categories failed: {}", failed.len(), failed.join(", "));
    }

    info!("rule generation finished successfully");
    Ok(())
}

/// 转换单个文件
fn run_convert(
    file: &Path,
    dialect: Dialect,
    kind: SourceKind,
    options: RenderOptions,
    name: Option<String>,
    sort: bool,
    dest: Option<&Path>,
) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let label = file.display().to_string();

    let parsed = rule::parse_source(&text, kind, &label);
    let mut rules: RuleSet = parsed.rules.into_iter().collect();
    if sort {
        rules.sort();
    }

    let name = name.unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "rules".to_string())
    });
    let content = create_formatter(dialect, options).generate_file_content(&name, &rules);

    match dest {
        Some(path) => {
            output::write_atomic(path, content.as_bytes())?;
            info!(path = %path.display(), rules = rules.len(), "converted");
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// 打印引用配置
fn run_guide(dialect: Dialect, base: &str, config_path: Option<&Path>, root: &Path) -> Result<()> {
    let config = config::load_config(config_path, root)?;
    let formatter = create_formatter(dialect, config.output.render_options());
    print!("{}", formatter.generate_guide(&config.category_names(), base));
    Ok(())
}

/// 初始化配置和自定义列表
fn run_init(root: &Path, force: bool) -> Result<()> {
    let config_path = root.join(config::CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        println!("Config already exists: {}", config_path.display());
        println!("Use --force to overwrite.");
    } else {
        output::write_atomic(&config_path, config::render_default_config()?.as_bytes())?;
        println!("Created config: {}", config_path.display());
    }

    let config = config::load_config(Some(&config_path), root)?;

    for category in &config.categories {
        let lists = [
            (category.append_list(&config.custom_dir), "rules appended after deduplication"),
            (category.url_list(&config.custom_dir), "extra upstream URLs, one per line"),
            (category.exclude_list(&config.custom_dir), "rules removed from the final output"),
        ];
        for (path, purpose) in lists {
            // 如果文件不存在，创建只含注释的文件
            if path.exists() {
                println!("Custom list already exists: {}", path.display());
                continue;
            }
            let content = format!("# {}: {}\n", category.name, purpose);
            output::write_atomic(&path, content.as_bytes())?;
            println!("Created custom list: {}", path.display());
        }
    }

    println!("\nRun `proxy-rules generate` to build the rule files.");
    Ok(())
}
