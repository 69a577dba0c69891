//! # 规则解析器
//!
//! 把上游规则文本逐行解析为 [`Rule`]。
//!
//! ## 支持的输入
//! - 普通规则列表：`TYPE,VALUE[,POLICY][,no-resolve]`，每行一条
//! - Shadowrocket 模块：只读取 `[Rule]` 段，去掉内置策略
//! - 纯域名 / IP 列表：自动推断为 DOMAIN / DOMAIN-SUFFIX / IP-CIDR / IP-CIDR6
//! - Mihomo payload：`payload:` 下的 `- TYPE,VALUE` 条目
//!
//! 注释行（`#`、`;`、`//`、`!` 开头）和空行直接跳过；无法识别的行记录
//! warn 日志后丢弃，不会中断解析。

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::model::{MatcherType, Rule, NO_RESOLVE};

/// 注释前缀
const COMMENT_PREFIXES: [&str; 4] = ["#", ";", "//", "!"];

/// 模块文件中由分类文件本身表达的内置策略
const BUILTIN_POLICIES: [&str; 7] = [
    "DIRECT",
    "PROXY",
    "REJECT",
    "REJECT-DROP",
    "REJECT-TINYGIF",
    "REJECT-DICT",
    "REJECT-ARRAY",
];

/// 正则元字符；含有这些字符的尾字段不会被当作策略
const REGEX_META: &[char] = &[
    '\\', '^', '$', '.', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}',
];

// ========================================
// 错误与输入类型
// ========================================

/// 单行解析失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown matcher type `{0}`")]
    UnknownMatcher(String),
    #[error("missing value for {0}")]
    MissingValue(MatcherType),
    #[error("invalid IP range `{0}`")]
    InvalidCidr(String),
    #[error("unrecognized entry `{0}`")]
    Unrecognized(String),
}

/// 上游文件类型
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// 普通规则列表
    #[default]
    List,
    /// Shadowrocket 模块（只取 [Rule] 段）
    Module,
}

/// 单个来源的解析结果
#[derive(Debug, Default)]
pub struct ParsedSource {
    /// 解析成功的规则（保持原始顺序）
    pub rules: Vec<Rule>,
    /// 被丢弃的行数
    pub invalid: usize,
}

// ========================================
// 文本级解析
// ========================================

/// 解析整个来源文本
///
/// `label` 只用于日志定位。
pub fn parse_source(text: &str, kind: SourceKind, label: &str) -> ParsedSource {
    let mut parsed = ParsedSource::default();
    let mut in_rule_section = kind == SourceKind::List;

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();

        // 段落标记：模块只认 [Rule]，列表里的段落头直接忽略
        if let Some(section) = section_name(line) {
            if kind == SourceKind::Module {
                in_rule_section = section.eq_ignore_ascii_case("Rule");
            }
            continue;
        }
        if !in_rule_section {
            continue;
        }

        let Some(result) = parse_line(line) else {
            continue;
        };

        match result {
            Ok(mut rule) => {
                if kind == SourceKind::Module && rule.matcher != MatcherType::Final {
                    strip_builtin_policy(&mut rule);
                }
                parsed.rules.push(rule);
            }
            Err(e) => {
                warn!(source = label, line = i + 1, error = %e, "dropping rule line");
                parsed.invalid += 1;
            }
        }
    }

    debug!(
        source = label,
        rules = parsed.rules.len(),
        invalid = parsed.invalid,
        "parsed source"
    );
    parsed
}

/// 解析单行
///
/// 空行、注释行和 payload 头返回 `None`。
pub fn parse_line(line: &str) -> Option<Result<Rule, ParseError>> {
    let line = line.trim();
    if line.is_empty() || is_comment(line) || line == "payload:" {
        return None;
    }

    // Mihomo payload 条目: "  - 'DOMAIN,example.com'"
    let line = match line.strip_prefix("- ") {
        Some(item) => unquote(item.trim()),
        None => line,
    };
    if line.is_empty() {
        return None;
    }

    Some(parse_rule(line))
}

fn parse_rule(line: &str) -> Result<Rule, ParseError> {
    let Some((type_str, body)) = line.split_once(',') else {
        return infer_bare(line);
    };

    let matcher: MatcherType = type_str.parse()?;

    if matcher.is_regex() {
        return parse_regex_rule(matcher, body);
    }

    let mut no_resolve = false;
    let mut rest = Vec::new();
    for field in body.split(',').map(str::trim) {
        if field.eq_ignore_ascii_case(NO_RESOLVE) {
            no_resolve = true;
        } else if !field.is_empty() {
            rest.push(field);
        }
    }

    if matcher == MatcherType::Final {
        // FINAL,<policy>
        let rule = Rule::new(MatcherType::Final, "");
        return Ok(match rest.first() {
            Some(policy) => rule.with_policy(*policy),
            None => rule,
        });
    }

    let mut rest = rest.into_iter();
    let value = rest.next().ok_or(ParseError::MissingValue(matcher))?;
    let (matcher, value) = normalize_value(matcher, value)?;

    let mut rule = Rule::new(matcher, value).with_no_resolve(no_resolve);
    if let Some(policy) = rest.next() {
        rule = rule.with_policy(policy);
    }

    let extra: Vec<&str> = rest.collect();
    if !extra.is_empty() {
        debug!(rule = %rule, ignored = ?extra, "ignoring extra rule fields");
    }
    Ok(rule)
}

/// 正则规则的值可能包含逗号，因此从右往左剥离 no-resolve 和策略
fn parse_regex_rule(matcher: MatcherType, body: &str) -> Result<Rule, ParseError> {
    let mut body = body.trim();
    let mut no_resolve = false;
    let mut policy = None;

    if let Some((head, last)) = body.rsplit_once(',') {
        if last.trim().eq_ignore_ascii_case(NO_RESOLVE) {
            no_resolve = true;
            body = head.trim_end();
        }
    }
    if let Some((head, last)) = body.rsplit_once(',') {
        let last = last.trim();
        if !last.is_empty() && !last.contains(REGEX_META) {
            policy = Some(last.to_string());
            body = head.trim_end();
        }
    }

    if body.is_empty() {
        return Err(ParseError::MissingValue(matcher));
    }

    let rule = Rule::new(matcher, body).with_no_resolve(no_resolve);
    Ok(match policy {
        Some(policy) => rule.with_policy(policy),
        None => rule,
    })
}

/// 推断没有类型前缀的条目
fn infer_bare(entry: &str) -> Result<Rule, ParseError> {
    let addr = entry.split_once('/').map_or(entry, |(addr, _)| addr);
    if let Ok(ip) = addr.parse::<IpAddr>() {
        let matcher = if ip.is_ipv4() {
            MatcherType::IpCidr
        } else {
            MatcherType::IpCidr6
        };
        let (matcher, value) = normalize_value(matcher, entry)?;
        return Ok(Rule::new(matcher, value));
    }

    if entry.contains(char::is_whitespace) {
        return Err(ParseError::Unrecognized(entry.to_string()));
    }

    // "+.example.com" / ".example.com" 表示后缀
    if let Some(suffix) = entry.strip_prefix("+.").or_else(|| entry.strip_prefix('.')) {
        let (matcher, value) = normalize_value(MatcherType::DomainSuffix, suffix)?;
        return Ok(Rule::new(matcher, value));
    }

    if entry.contains('.') {
        let (matcher, value) = normalize_value(MatcherType::Domain, entry)?;
        return Ok(Rule::new(matcher, value));
    }

    Err(ParseError::Unrecognized(entry.to_string()))
}

/// 规范化规则值
///
/// IP 版本与类型不一致时按实际地址重新归类。
fn normalize_value(matcher: MatcherType, value: &str) -> Result<(MatcherType, String), ParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::MissingValue(matcher));
    }

    let normalized = match matcher {
        MatcherType::Domain | MatcherType::DomainKeyword => value.to_ascii_lowercase(),
        MatcherType::DomainSuffix => value
            .strip_prefix("+.")
            .unwrap_or(value)
            .trim_start_matches('.')
            .to_ascii_lowercase(),
        MatcherType::IpCidr | MatcherType::IpCidr6 => return normalize_cidr(value),
        MatcherType::GeoIp => value.to_ascii_uppercase(),
        MatcherType::IpAsn => match value.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("AS") => value[2..].to_string(),
            _ => value.to_string(),
        },
        MatcherType::DomainRegex
        | MatcherType::UrlRegex
        | MatcherType::UserAgent
        | MatcherType::Final => value.to_string(),
    };

    if normalized.is_empty() {
        return Err(ParseError::MissingValue(matcher));
    }
    Ok((matcher, normalized))
}

/// 规范化 IP 段：缺省前缀补 /32 或 /128
fn normalize_cidr(value: &str) -> Result<(MatcherType, String), ParseError> {
    let invalid = || ParseError::InvalidCidr(value.to_string());

    let (addr, prefix) = match value.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (value, None),
    };
    let ip: IpAddr = addr.trim().parse().map_err(|_| invalid())?;

    let (matcher, max_prefix) = match ip {
        IpAddr::V4(_) => (MatcherType::IpCidr, 32u8),
        IpAddr::V6(_) => (MatcherType::IpCidr6, 128u8),
    };
    let prefix = match prefix {
        Some(p) => p
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= max_prefix)
            .ok_or_else(invalid)?,
        None => max_prefix,
    };

    Ok((matcher, format!("{}/{}", ip, prefix)))
}

fn strip_builtin_policy(rule: &mut Rule) {
    let builtin = rule
        .policy
        .as_deref()
        .is_some_and(|p| BUILTIN_POLICIES.iter().any(|b| b.eq_ignore_ascii_case(p)));
    if builtin {
        rule.policy = None;
    }
}

pub(crate) fn is_comment(line: &str) -> bool {
    COMMENT_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// `[Rule]` -> `Some("Rule")`
fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    s
}
