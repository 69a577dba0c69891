//! # 规则数据模型
//!
//! 定义匹配类型、单条规则和去重后的规则集合。
//!
//! ## 去重约定
//! - `(匹配类型, 值, 策略)` 完全相同的规则只保留一条
//! - 同一 `(匹配类型, 值)` 出现不同策略时，先到者生效，后到者丢弃
//! - `FINAL` 至多一条，且总是排在最后

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::warn;

use super::parser::ParseError;

/// `no-resolve` 参数
pub const NO_RESOLVE: &str = "no-resolve";

// ========================================
// 匹配类型
// ========================================

/// 规则匹配类型
///
/// 声明顺序即排序时的分组顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum MatcherType {
    /// 精确域名
    Domain,
    /// 域名后缀
    DomainSuffix,
    /// 域名关键字
    DomainKeyword,
    /// 域名正则
    DomainRegex,
    /// URL 正则
    UrlRegex,
    /// User-Agent 匹配
    UserAgent,
    /// IPv4 网段
    IpCidr,
    /// IPv6 网段
    IpCidr6,
    /// 自治系统号
    IpAsn,
    /// GeoIP 国家代码
    #[serde(rename = "GEOIP")]
    GeoIp,
    /// 兜底规则
    Final,
}

impl MatcherType {
    /// 全部匹配类型
    pub const ALL: [MatcherType; 11] = [
        MatcherType::Domain,
        MatcherType::DomainSuffix,
        MatcherType::DomainKeyword,
        MatcherType::DomainRegex,
        MatcherType::UrlRegex,
        MatcherType::UserAgent,
        MatcherType::IpCidr,
        MatcherType::IpCidr6,
        MatcherType::IpAsn,
        MatcherType::GeoIp,
        MatcherType::Final,
    ];

    /// 规范名称
    pub fn as_str(self) -> &'static str {
        match self {
            MatcherType::Domain => "DOMAIN",
            MatcherType::DomainSuffix => "DOMAIN-SUFFIX",
            MatcherType::DomainKeyword => "DOMAIN-KEYWORD",
            MatcherType::DomainRegex => "DOMAIN-REGEX",
            MatcherType::UrlRegex => "URL-REGEX",
            MatcherType::UserAgent => "USER-AGENT",
            MatcherType::IpCidr => "IP-CIDR",
            MatcherType::IpCidr6 => "IP-CIDR6",
            MatcherType::IpAsn => "IP-ASN",
            MatcherType::GeoIp => "GEOIP",
            MatcherType::Final => "FINAL",
        }
    }

    /// IP 类规则（可附带 no-resolve）
    pub fn is_ip(self) -> bool {
        matches!(
            self,
            MatcherType::IpCidr | MatcherType::IpCidr6 | MatcherType::IpAsn
        )
    }

    /// 值是正则表达式，可能包含逗号
    pub fn is_regex(self) -> bool {
        matches!(self, MatcherType::DomainRegex | MatcherType::UrlRegex)
    }
}

impl fmt::Display for MatcherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatcherType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        MatcherType::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            // Mihomo 中的 MATCH 等价于 FINAL
            .or_else(|| (upper == "MATCH").then_some(MatcherType::Final))
            .ok_or(ParseError::UnknownMatcher(upper))
    }
}

// ========================================
// 单条规则
// ========================================

/// 单条分流规则
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Rule {
    /// 匹配类型
    pub matcher: MatcherType,
    /// 规则值（FINAL 为空）
    pub value: String,
    /// 策略（代理组名称）
    pub policy: Option<String>,
    /// 是否带 no-resolve
    pub no_resolve: bool,
}

impl Rule {
    pub fn new(matcher: MatcherType, value: impl Into<String>) -> Self {
        Self {
            matcher,
            value: value.into(),
            policy: None,
            no_resolve: false,
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_no_resolve(mut self, no_resolve: bool) -> Self {
        self.no_resolve = no_resolve;
        self
    }

    fn key(&self) -> (MatcherType, String) {
        (self.matcher, self.value.clone())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.matcher)?;
        if self.matcher != MatcherType::Final {
            write!(f, ",{}", self.value)?;
        }
        if let Some(policy) = &self.policy {
            write!(f, ",{}", policy)?;
        }
        if self.no_resolve {
            write!(f, ",{}", NO_RESOLVE)?;
        }
        Ok(())
    }
}

// ========================================
// 规则集合
// ========================================

/// 插入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 新规则
    Inserted,
    /// 完全重复，已合并
    Duplicate,
    /// 同一匹配项已有不同策略，保留先到者
    Conflict { kept: Option<String> },
}

/// 去重后的有序规则集合
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    /// (匹配类型, 值) -> rules 下标
    index: HashMap<(MatcherType, String), usize>,
    final_rule: Option<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入单条规则
    pub fn insert(&mut self, rule: Rule) -> InsertOutcome {
        if rule.matcher == MatcherType::Final {
            return match &self.final_rule {
                Some(existing) if existing.policy == rule.policy => InsertOutcome::Duplicate,
                Some(existing) => InsertOutcome::Conflict {
                    kept: existing.policy.clone(),
                },
                None => {
                    self.final_rule = Some(rule);
                    InsertOutcome::Inserted
                }
            };
        }

        if let Some(&i) = self.index.get(&rule.key()) {
            let existing = &mut self.rules[i];
            if existing.policy != rule.policy {
                return InsertOutcome::Conflict {
                    kept: existing.policy.clone(),
                };
            }
            existing.no_resolve |= rule.no_resolve;
            return InsertOutcome::Duplicate;
        }

        self.index.insert(rule.key(), self.rules.len());
        self.rules.push(rule);
        InsertOutcome::Inserted
    }

    /// 批量插入，返回新增条数
    ///
    /// 策略冲突会记录 warn 日志。
    pub fn extend<I: IntoIterator<Item = Rule>>(&mut self, rules: I) -> usize {
        let mut inserted = 0;
        for rule in rules {
            match self.insert(rule.clone()) {
                InsertOutcome::Inserted => inserted += 1,
                InsertOutcome::Duplicate => {}
                InsertOutcome::Conflict { kept } => {
                    warn!(
                        rule = %rule,
                        kept_policy = kept.as_deref().unwrap_or("-"),
                        "conflicting policy, keeping the first one"
                    );
                }
            }
        }
        inserted
    }

    /// 移除与排除列表匹配的规则（只比较匹配类型和值）
    pub fn remove_matching(&mut self, excludes: &[Rule]) -> usize {
        let keys: HashSet<(MatcherType, String)> = excludes.iter().map(Rule::key).collect();
        let before = self.len();

        self.rules.retain(|r| !keys.contains(&r.key()));
        if excludes.iter().any(|r| r.matcher == MatcherType::Final) {
            self.final_rule = None;
        }
        self.rebuild_index();

        before - self.len()
    }

    /// 移除已被 DOMAIN-SUFFIX 覆盖的 DOMAIN 规则
    ///
    /// 只有策略相同的后缀才算覆盖，例如 `DOMAIN-SUFFIX,a.com` 覆盖
    /// `DOMAIN,a.com` 和 `DOMAIN,b.a.com`。
    pub fn prune_covered_domains(&mut self) -> usize {
        let suffixes: HashSet<(String, Option<String>)> = self
            .rules
            .iter()
            .filter(|r| r.matcher == MatcherType::DomainSuffix)
            .map(|r| (r.value.clone(), r.policy.clone()))
            .collect();
        if suffixes.is_empty() {
            return 0;
        }

        let before = self.rules.len();
        self.rules.retain(|r| {
            r.matcher != MatcherType::Domain || !is_covered(&r.value, &r.policy, &suffixes)
        });
        self.rebuild_index();

        before - self.rules.len()
    }

    /// 按匹配类型分组、组内按值排序（稳定排序）
    pub fn sort(&mut self) {
        self.rules.sort_by(|a, b| {
            a.matcher
                .cmp(&b.matcher)
                .then_with(|| a.value.cmp(&b.value))
                .then_with(|| a.policy.cmp(&b.policy))
        });
        self.rebuild_index();
    }

    /// 按输出顺序遍历（FINAL 在最后）
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().chain(self.final_rule.iter())
    }

    pub fn len(&self) -> usize {
        self.rules.len() + usize::from(self.final_rule.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key(), i))
            .collect();
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        let mut set = RuleSet::new();
        set.extend(iter);
        set
    }
}

/// 检查域名本身或其任一父域名是否在后缀集合中
fn is_covered(
    domain: &str,
    policy: &Option<String>,
    suffixes: &HashSet<(String, Option<String>)>,
) -> bool {
    let mut rest = domain;
    loop {
        if suffixes.contains(&(rest.to_string(), policy.clone())) {
            return true;
        }
        match rest.find('.') {
            Some(i) => rest = &rest[i + 1..],
            None => return false,
        }
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;

    fn lines(set: &RuleSet) -> Vec<String> {
        set.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_matcher_from_str() {
        assert_eq!("domain-suffix".parse::<MatcherType>(), Ok(MatcherType::DomainSuffix));
        assert_eq!("GEOIP".parse::<MatcherType>(), Ok(MatcherType::GeoIp));
        assert_eq!("MATCH".parse::<MatcherType>(), Ok(MatcherType::Final));
        assert_eq!(
            "PROCESS-NAME".parse::<MatcherType>(),
            Err(ParseError::UnknownMatcher("PROCESS-NAME".to_string()))
        );
    }

    #[test]
    fn test_rule_display() {
        let rule = Rule::new(MatcherType::IpCidr, "10.0.0.0/8")
            .with_policy("DIRECT")
            .with_no_resolve(true);
        assert_eq!(rule.to_string(), "IP-CIDR,10.0.0.0/8,DIRECT,no-resolve");

        let fin = Rule::new(MatcherType::Final, "").with_policy("Proxy");
        assert_eq!(fin.to_string(), "FINAL,Proxy");
    }

    #[test]
    fn test_duplicate_collapses() {
        let mut set = RuleSet::new();
        let rule = Rule::new(MatcherType::DomainSuffix, "example.com").with_policy("Proxy");
        assert_eq!(set.insert(rule.clone()), InsertOutcome::Inserted);
        assert_eq!(set.insert(rule), InsertOutcome::Duplicate);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_conflicting_policy_first_wins() {
        let mut set = RuleSet::new();
        set.insert(Rule::new(MatcherType::Domain, "a.com").with_policy("Proxy"));
        let outcome = set.insert(Rule::new(MatcherType::Domain, "a.com").with_policy("DIRECT"));
        assert_eq!(
            outcome,
            InsertOutcome::Conflict {
                kept: Some("Proxy".to_string())
            }
        );
        assert_eq!(lines(&set), vec!["DOMAIN,a.com,Proxy"]);
    }

    #[test]
    fn test_duplicate_merges_no_resolve() {
        let mut set = RuleSet::new();
        set.insert(Rule::new(MatcherType::IpCidr, "1.1.1.0/24"));
        set.insert(Rule::new(MatcherType::IpCidr, "1.1.1.0/24").with_no_resolve(true));
        assert_eq!(lines(&set), vec!["IP-CIDR,1.1.1.0/24,no-resolve"]);
    }

    #[test]
    fn test_final_is_last_and_unique() {
        let mut set = RuleSet::new();
        set.insert(Rule::new(MatcherType::Final, "").with_policy("Proxy"));
        set.insert(Rule::new(MatcherType::Domain, "a.com"));
        set.insert(Rule::new(MatcherType::Final, "").with_policy("DIRECT"));
        assert_eq!(lines(&set), vec!["DOMAIN,a.com", "FINAL,Proxy"]);
    }

    #[test]
    fn test_prune_covered_domains() {
        let mut set: RuleSet = vec![
            Rule::new(MatcherType::Domain, "a.com"),
            Rule::new(MatcherType::Domain, "www.b.a.com"),
            Rule::new(MatcherType::Domain, "other.com"),
            Rule::new(MatcherType::Domain, "x.a.com").with_policy("REJECT"),
            Rule::new(MatcherType::DomainSuffix, "a.com"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.prune_covered_domains(), 2);
        assert_eq!(
            lines(&set),
            vec!["DOMAIN,other.com", "DOMAIN,x.a.com,REJECT", "DOMAIN-SUFFIX,a.com"]
        );
    }

    #[test]
    fn test_remove_matching_ignores_policy() {
        let mut set: RuleSet = vec![
            Rule::new(MatcherType::Domain, "a.com").with_policy("Proxy"),
            Rule::new(MatcherType::Domain, "b.com"),
        ]
        .into_iter()
        .collect();

        let removed = set.remove_matching(&[Rule::new(MatcherType::Domain, "a.com")]);
        assert_eq!(removed, 1);
        assert_eq!(lines(&set), vec!["DOMAIN,b.com"]);

        // 删除后仍可重新插入
        assert_eq!(
            set.insert(Rule::new(MatcherType::Domain, "a.com")),
            InsertOutcome::Inserted
        );
    }

    #[test]
    fn test_sort_groups_by_matcher() {
        let mut set: RuleSet = vec![
            Rule::new(MatcherType::IpCidr, "10.0.0.0/8"),
            Rule::new(MatcherType::Final, "").with_policy("Proxy"),
            Rule::new(MatcherType::DomainSuffix, "b.com"),
            Rule::new(MatcherType::Domain, "z.com"),
            Rule::new(MatcherType::DomainSuffix, "a.com"),
        ]
        .into_iter()
        .collect();

        set.sort();
        assert_eq!(
            lines(&set),
            vec![
                "DOMAIN,z.com",
                "DOMAIN-SUFFIX,a.com",
                "DOMAIN-SUFFIX,b.com",
                "IP-CIDR,10.0.0.0/8",
                "FINAL,Proxy",
            ]
        );
    }
}
