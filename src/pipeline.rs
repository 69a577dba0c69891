//! # 生成流程编排
//!
//! 这个模块是核心业务逻辑所在，按分类依次执行：
//! 1. 收集来源：配置中的来源 + `<custom>/<name>-url.list` 中的额外 URL
//! 2. 拉取：单个来源失败只跳过；全部失败时该分类不写任何文件
//! 3. 解析并去重为一个新的 RuleSet（每个分类、每次运行独立）
//! 4. 可选：去掉被 DOMAIN-SUFFIX 覆盖的 DOMAIN 规则
//! 5. 追加 `<custom>/<name>.list`，移除 `<custom>/<name>_excludes.list`
//! 6. 可选：排序
//! 7. 按每种方言渲染并原子写入
//!
//! 任一分类失败时整次运行视为失败（由调用方转换为非零退出码）。

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{CategoryConfig, Config};
use crate::fetch::{Fetcher, Source, SourceLocation};
use crate::output::{RuleFileWriter, WrittenFile};
use crate::rule::parser::is_comment;
use crate::rule::{create_formatter, parse_source, Dialect, Formatter, RuleSet, SourceKind};

// ========================================
// 运行报告
// ========================================

/// 分类处理结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    /// 已写入（或 dry-run 下已计算）
    Written,
    /// 所有来源都拉取失败，未写入
    FetchFailed,
    /// 写入失败
    WriteFailed,
}

/// 单个分类的处理报告
#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub name: String,
    pub status: CategoryStatus,
    pub sources_total: usize,
    /// 拉取失败的来源
    pub sources_failed: Vec<String>,
    /// 被丢弃的无效行数
    pub invalid_lines: usize,
    /// 被覆盖而移除的 DOMAIN 规则数
    pub pruned: usize,
    /// 自定义列表新增的规则数
    pub custom_added: usize,
    /// 被排除列表移除的规则数
    pub excluded: usize,
    /// 最终规则数
    pub rules: usize,
    pub files: Vec<WrittenFile>,
}

impl CategoryReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CategoryStatus::Written,
            sources_total: 0,
            sources_failed: Vec::new(),
            invalid_lines: 0,
            pruned: 0,
            custom_added: 0,
            excluded: 0,
            rules: 0,
            files: Vec::new(),
        }
    }
}

/// 整次运行的报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub categories: Vec<CategoryReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.categories
            .iter()
            .all(|c| c.status == CategoryStatus::Written)
    }

    /// 失败的分类名
    pub fn failed_categories(&self) -> Vec<&str> {
        self.categories
            .iter()
            .filter(|c| c.status != CategoryStatus::Written)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// 内容发生变化的文件数
    pub fn changed_files(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.files)
            .filter(|f| f.changed)
            .count()
    }
}

// ========================================
// 生成流程
// ========================================

/// 生成流程
pub struct Pipeline<'a> {
    config: &'a Config,
    /// 相对来源路径的基准目录
    root: &'a Path,
    fetcher: Fetcher,
    writer: RuleFileWriter,
    formatters: Vec<Box<dyn Formatter>>,
    dry_run: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, root: &'a Path, dry_run: bool) -> Result<Self> {
        let options = config.output.render_options();
        Ok(Self {
            config,
            root,
            fetcher: Fetcher::new(&config.fetch)?,
            writer: RuleFileWriter::new(dry_run),
            formatters: Dialect::ALL
                .into_iter()
                .map(|d| create_formatter(d, options))
                .collect(),
            dry_run,
        })
    }

    /// 依次处理所有分类
    pub fn run(&self) -> Result<RunReport> {
        let mut categories = Vec::with_capacity(self.config.categories.len());
        for category in &self.config.categories {
            info!(category = %category.name, "processing category");
            categories.push(self.process_category(category)?);
        }

        Ok(RunReport {
            dry_run: self.dry_run,
            categories,
        })
    }

    /// 处理单个分类
    fn process_category(&self, category: &CategoryConfig) -> Result<CategoryReport> {
        let mut report = CategoryReport::new(&category.name);
        let custom_dir = &self.config.custom_dir;

        // 1. 收集来源
        let mut sources: Vec<Source> = category
            .sources
            .iter()
            .map(|s| Source::from_config(s, self.root))
            .collect();
        sources.extend(self.read_extra_sources(&category.url_list(custom_dir))?);
        report.sources_total = sources.len();

        // 2. 拉取
        let fetched = self.fetcher.fetch_all(&sources);
        let mut texts = Vec::new();
        for (source, result) in fetched {
            match result {
                Ok(text) => texts.push((source, text)),
                Err(_) => report.sources_failed.push(source.to_string()),
            }
        }

        if !sources.is_empty() && texts.is_empty() {
            error!(
                category = %category.name,
                sources = sources.len(),
                "all sources failed, leaving existing output untouched"
            );
            report.status = CategoryStatus::FetchFailed;
            return Ok(report);
        }

        // 3. 解析 + 去重
        let mut rules = RuleSet::new();
        for (source, text) in &texts {
            let label = source.to_string();
            let parsed = parse_source(text, source.kind, &label);
            report.invalid_lines += parsed.invalid;
            let added = rules.extend(parsed.rules);
            info!(source = %label, added, "merged source");
        }

        // 4. 覆盖裁剪
        if self.config.processing.prune_covered_domains {
            report.pruned = rules.prune_covered_domains();
        }

        // 5. 自定义追加 / 排除
        if let Some(text) = read_optional(&category.append_list(custom_dir))? {
            let parsed = parse_source(&text, SourceKind::List, "custom append list");
            report.invalid_lines += parsed.invalid;
            report.custom_added = rules.extend(parsed.rules);
        }
        if let Some(text) = read_optional(&category.exclude_list(custom_dir))? {
            let parsed = parse_source(&text, SourceKind::List, "custom exclude list");
            report.excluded = rules.remove_matching(&parsed.rules);
        }

        // 6. 排序
        if self.config.processing.sort {
            rules.sort();
        }
        report.rules = rules.len();

        // 7. 渲染并写入
        for formatter in &self.formatters {
            let dir = self.config.output.dir_for(formatter.dialect());
            let path = RuleFileWriter::rule_file_path(dir, &category.name, formatter.as_ref());
            let content = formatter.generate_file_content(&category.name, &rules);

            match self.writer.write(&path, &content) {
                Ok(file) => report.files.push(file),
                Err(e) => {
                    let reason = format!("{:#}", e);
                    error!(path = %path.display(), error = %reason, "write failed");
                    report.status = CategoryStatus::WriteFailed;
                }
            }
        }

        info!(
            category = %category.name,
            rules = report.rules,
            failed_sources = report.sources_failed.len(),
            "category done"
        );
        Ok(report)
    }

    /// 读取额外 URL 列表（每行一个来源，按普通列表解析）
    fn read_extra_sources(&self, path: &Path) -> Result<Vec<Source>> {
        let Some(text) = read_optional(path)? else {
            return Ok(Vec::new());
        };

        let sources: Vec<Source> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !is_comment(l))
            .map(|l| Source {
                location: SourceLocation::parse(l, self.root),
                kind: SourceKind::List,
            })
            .collect();

        info!(path = %path.display(), count = sources.len(), "loaded extra sources");
        Ok(sources)
    }
}

/// 读取可选文件，不存在时返回 None
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "optional list not found");
            Ok(None)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read list");
            Err(e).with_context(|| format!("Failed to read {}", path.display()))
        }
    }
}
