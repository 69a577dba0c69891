//! # 规则拉取
//!
//! 同步阻塞 HTTP 客户端 + 有界线程池。单个来源失败只记录日志，
//! 由调用方决定是否跳过；运行内不重试，下一次定时运行即是重试。

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use super::source::{Source, SourceLocation};
use crate::config::FetchConfig;

/// 单个来源的拉取失败原因
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 单个来源的拉取结果
pub type FetchResult = std::result::Result<String, FetchError>;

/// 规则拉取器
pub struct Fetcher {
    client: reqwest::blocking::Client,
    /// 有界线程池，线程数即并发上限
    pool: rayon::ThreadPool,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|i| format!("fetch-{}", i))
            .build()
            .context("Failed to build fetch thread pool")?;

        Ok(Self { client, pool })
    }

    /// 拉取单个来源
    pub fn fetch(&self, location: &SourceLocation) -> FetchResult {
        match location {
            SourceLocation::Remote(url) => {
                let response = self.client.get(url).send()?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status(status));
                }
                Ok(response.text()?)
            }
            SourceLocation::Local(path) => fs::read_to_string(path).map_err(|source| {
                FetchError::Io {
                    path: path.clone(),
                    source,
                }
            }),
        }
    }

    /// 并发拉取多个来源，结果顺序与输入一致
    pub fn fetch_all<'a>(&self, sources: &'a [Source]) -> Vec<(&'a Source, FetchResult)> {
        self.pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    let result = self.fetch(&source.location);
                    match &result {
                        Ok(text) => info!(source = %source, bytes = text.len(), "fetched source"),
                        Err(e) => warn!(source = %source, error = %e, "skipping failed source"),
                    }
                    (source, result)
                })
                .collect()
        })
    }
}
