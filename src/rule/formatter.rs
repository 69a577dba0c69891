//! # 规则格式化器
//!
//! 把规则集合渲染为各客户端的规则文件。
//!
//! | 规则类型     | Shadowrocket | Mihomo       |
//! |--------------|--------------|--------------|
//! | URL-REGEX    | URL-REGEX    | DOMAIN-REGEX |
//! | DOMAIN-REGEX | URL-REGEX    | DOMAIN-REGEX |
//! | USER-AGENT   | USER-AGENT   | 不支持，跳过 |
//! | FINAL        | FINAL        | MATCH        |
//!
//! 其余类型两边同名。同一条规则在同一方言下总是得到同一行输出。

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{MatcherType, Rule, RuleSet, NO_RESOLVE};

/// 目标方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Shadowrocket
    Shadowrocket,
    /// Mihomo (Clash Meta)
    Mihomo,
}

impl Dialect {
    pub const ALL: [Dialect; 2] = [Dialect::Shadowrocket, Dialect::Mihomo];
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Shadowrocket => write!(f, "shadowrocket"),
            Dialect::Mihomo => write!(f, "mihomo"),
        }
    }
}

/// Mihomo 规则集文件布局
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum MihomoLayout {
    /// 纯文本 (format: text)
    #[default]
    Text,
    /// YAML payload (format: yaml)
    Yaml,
}

/// 渲染选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// IP 类规则统一追加 no-resolve
    pub ip_no_resolve: bool,
    pub mihomo_layout: MihomoLayout,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            ip_no_resolve: true,
            mihomo_layout: MihomoLayout::Text,
        }
    }
}

/// 规则格式化 trait
pub trait Formatter {
    fn dialect(&self) -> Dialect;

    /// 格式化单条规则，不支持的规则返回 None
    fn format_rule(&self, rule: &Rule) -> Option<String>;

    /// 格式化多条规则
    fn format_rules(&self, rules: &RuleSet) -> Vec<String> {
        rules
            .iter()
            .filter_map(|r| {
                let line = self.format_rule(r);
                if line.is_none() {
                    debug!(dialect = %self.dialect(), rule = %r, "rule not supported, skipped");
                }
                line
            })
            .collect()
    }

    /// 获取规则文件扩展名
    fn file_extension(&self) -> &'static str;

    /// 生成规则文件内容（包含必要的文件头）
    fn generate_file_content(&self, category: &str, rules: &RuleSet) -> String;

    /// 生成客户端引用配置（用于 guide 命令）
    ///
    /// `base` 为规则文件所在的 URL 或目录。
    fn generate_guide(&self, categories: &[String], base: &str) -> String;
}

/// 拼接 `TYPE[,VALUE][,POLICY][,no-resolve]`
fn render_line(type_str: &str, rule: &Rule, ip_no_resolve: bool) -> String {
    let mut line = String::from(type_str);
    if rule.matcher != MatcherType::Final {
        line.push(',');
        line.push_str(&rule.value);
    }
    if let Some(policy) = &rule.policy {
        line.push(',');
        line.push_str(policy);
    }
    if rule.no_resolve || (ip_no_resolve && rule.matcher.is_ip()) {
        line.push(',');
        line.push_str(NO_RESOLVE);
    }
    line
}

/// 规则文件头
fn file_header(category: &str, total: usize) -> String {
    format!(
        "# NAME: {}\n# GENERATED BY: proxy-rules\n# TOTAL: {}\n",
        category, total
    )
}

/// 规则集中约定的策略名：分类名大写
fn category_policy(category: &str) -> String {
    category.to_ascii_uppercase()
}

fn join_base(base: &str, file: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file)
}

// ========================================
// Shadowrocket 格式化器
// ========================================

pub struct ShadowrocketFormatter {
    pub ip_no_resolve: bool,
}

impl Formatter for ShadowrocketFormatter {
    fn dialect(&self) -> Dialect {
        Dialect::Shadowrocket
    }

    fn format_rule(&self, rule: &Rule) -> Option<String> {
        let type_str = match rule.matcher {
            // Shadowrocket 没有 DOMAIN-REGEX
            MatcherType::DomainRegex => "URL-REGEX",
            other => other.as_str(),
        };
        Some(render_line(type_str, rule, self.ip_no_resolve))
    }

    fn file_extension(&self) -> &'static str {
        "list"
    }

    fn generate_file_content(&self, category: &str, rules: &RuleSet) -> String {
        let lines = self.format_rules(rules);
        let mut content = file_header(category, lines.len());
        for line in lines {
            content.push_str(&line);
            content.push('\n');
        }
        content
    }

    fn generate_guide(&self, categories: &[String], base: &str) -> String {
        let mut guide = String::from(
            r#"# ============================================================
# Shadowrocket 配置指南
# ============================================================
# 请将以下内容添加到配置文件的 [Rule] 段：

[Rule]
"#,
        );
        for category in categories {
            let url = join_base(base, &format!("{}.{}", category, self.file_extension()));
            guide.push_str(&format!("RULE-SET,{},{}\n", url, category_policy(category)));
        }
        guide.push_str(
            r#"FINAL,PROXY

# ============================================================
# 注意: 请将 'PROXY' 替换为您配置中实际的代理策略组名称。
# ============================================================
"#,
        );
        guide
    }
}

// ========================================
// Mihomo 格式化器
// ========================================

pub struct MihomoFormatter {
    pub ip_no_resolve: bool,
    pub layout: MihomoLayout,
}

impl Formatter for MihomoFormatter {
    fn dialect(&self) -> Dialect {
        Dialect::Mihomo
    }

    fn format_rule(&self, rule: &Rule) -> Option<String> {
        let type_str = match rule.matcher {
            MatcherType::UrlRegex | MatcherType::DomainRegex => "DOMAIN-REGEX",
            MatcherType::Final => "MATCH",
            // Mihomo 不支持 User-Agent 规则
            MatcherType::UserAgent => return None,
            other => other.as_str(),
        };
        Some(render_line(type_str, rule, self.ip_no_resolve))
    }

    fn file_extension(&self) -> &'static str {
        match self.layout {
            MihomoLayout::Text => "list",
            MihomoLayout::Yaml => "yaml",
        }
    }

    fn generate_file_content(&self, category: &str, rules: &RuleSet) -> String {
        let lines = self.format_rules(rules);
        let mut content = file_header(category, lines.len());

        match self.layout {
            MihomoLayout::Text => {
                for line in lines {
                    content.push_str(&line);
                    content.push('\n');
                }
            }
            MihomoLayout::Yaml if lines.is_empty() => content.push_str("payload: []\n"),
            MihomoLayout::Yaml => {
                content.push_str("payload:\n");
                for line in lines {
                    content.push_str("  - ");
                    content.push_str(&yaml_scalar(&line));
                    content.push('\n');
                }
            }
        }
        content
    }

    fn generate_guide(&self, categories: &[String], base: &str) -> String {
        let remote = base.starts_with("http://") || base.starts_with("https://");
        let format = match self.layout {
            MihomoLayout::Text => "text",
            MihomoLayout::Yaml => "yaml",
        };

        let mut guide = String::from(
            r#"# ============================================================
# Mihomo 配置指南
# ============================================================
# 请将以下内容添加到您的 Mihomo 配置文件中：

# 1. 在 rule-providers 段添加：
rule-providers:
"#,
        );
        for category in categories {
            let location = join_base(base, &format!("{}.{}", category, self.file_extension()));
            guide.push_str(&format!("  {}:\n", category));
            if remote {
                guide.push_str("    type: http\n");
                guide.push_str(&format!("    url: \"{}\"\n", location));
                guide.push_str(&format!("    path: ./rules/{}.{}\n", category, self.file_extension()));
                guide.push_str("    interval: 86400\n");
            } else {
                guide.push_str("    type: file\n");
                guide.push_str(&format!("    path: \"{}\"\n", location));
            }
            guide.push_str("    behavior: classical\n");
            guide.push_str(&format!("    format: {}\n", format));
        }

        guide.push_str("\n# 2. 在 rules 段添加（放在其他规则之前）：\nrules:\n");
        for category in categories {
            guide.push_str(&format!(
                "  - RULE-SET,{},{}\n",
                category,
                category_policy(category)
            ));
        }
        guide.push_str(
            r#"  - MATCH,PROXY

# ============================================================
# 注意: 请将 'PROXY' 替换为您配置中实际的代理策略组名称。
# ============================================================
"#,
        );
        guide
    }
}

/// YAML 列表项：含有特殊字符时使用单引号
fn yaml_scalar(s: &str) -> String {
    let needs_quotes = s.contains(": ")
        || s.contains(":\t")
        || s.ends_with(':')
        || s.contains(" #")
        || s.contains("\t#")
        || s.starts_with(|c: char| "!&*'\"%@`{[|>?-#".contains(c))
        || s.starts_with(char::is_whitespace)
        || s.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("'{}'", s.replace('\'', "''"))
    } else {
        s.to_string()
    }
}

/// 根据方言创建格式化器
pub fn create_formatter(dialect: Dialect, options: RenderOptions) -> Box<dyn Formatter> {
    match dialect {
        Dialect::Shadowrocket => Box::new(ShadowrocketFormatter {
            ip_no_resolve: options.ip_no_resolve,
        }),
        Dialect::Mihomo => Box::new(MihomoFormatter {
            ip_no_resolve: options.ip_no_resolve,
            layout: options.mihomo_layout,
        }),
    }
}

// ========================================
// 测试模块
// ========================================
#[cfg(test)]
mod tests {
    use super::*;

    fn shadowrocket() -> Box<dyn Formatter> {
        create_formatter(Dialect::Shadowrocket, RenderOptions::default())
    }

    fn mihomo(layout: MihomoLayout) -> Box<dyn Formatter> {
        create_formatter(
            Dialect::Mihomo,
            RenderOptions {
                ip_no_resolve: true,
                mihomo_layout: layout,
            },
        )
    }

    #[test]
    fn test_domain_suffix_example() {
        let rule = Rule::new(MatcherType::DomainSuffix, "example.com").with_policy("Proxy");
        assert_eq!(
            shadowrocket().format_rule(&rule).as_deref(),
            Some("DOMAIN-SUFFIX,example.com,Proxy")
        );
        assert_eq!(
            mihomo(MihomoLayout::Text).format_rule(&rule).as_deref(),
            Some("DOMAIN-SUFFIX,example.com,Proxy")
        );
    }

    #[test]
    fn test_dialect_specific_names() {
        let regex = Rule::new(MatcherType::UrlRegex, "^https?://ad\\.");
        let fin = Rule::new(MatcherType::Final, "").with_policy("Proxy");
        let ua = Rule::new(MatcherType::UserAgent, "Telegram*");

        let sr = shadowrocket();
        assert_eq!(sr.format_rule(&regex).as_deref(), Some("URL-REGEX,^https?://ad\\."));
        assert_eq!(sr.format_rule(&fin).as_deref(), Some("FINAL,Proxy"));
        assert_eq!(sr.format_rule(&ua).as_deref(), Some("USER-AGENT,Telegram*"));

        let mh = mihomo(MihomoLayout::Text);
        assert_eq!(mh.format_rule(&regex).as_deref(), Some("DOMAIN-REGEX,^https?://ad\\."));
        assert_eq!(mh.format_rule(&fin).as_deref(), Some("MATCH,Proxy"));
        assert_eq!(mh.format_rule(&ua), None);
    }

    #[test]
    fn test_ip_rules_get_no_resolve() {
        let rule = Rule::new(MatcherType::IpCidr, "10.0.0.0/8");
        assert_eq!(
            shadowrocket().format_rule(&rule).as_deref(),
            Some("IP-CIDR,10.0.0.0/8,no-resolve")
        );

        let plain = create_formatter(
            Dialect::Shadowrocket,
            RenderOptions {
                ip_no_resolve: false,
                mihomo_layout: MihomoLayout::Text,
            },
        );
        assert_eq!(plain.format_rule(&rule).as_deref(), Some("IP-CIDR,10.0.0.0/8"));
    }

    #[test]
    fn test_text_file_content() {
        let set: RuleSet = vec![
            Rule::new(MatcherType::Domain, "a.com"),
            Rule::new(MatcherType::UserAgent, "curl*"),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            shadowrocket().generate_file_content("direct", &set),
            "# NAME: direct\n# GENERATED BY: proxy-rules\n# TOTAL: 2\nDOMAIN,a.com\nUSER-AGENT,curl*\n"
        );
        // Mihomo 跳过 USER-AGENT，TOTAL 只计实际输出的行
        assert_eq!(
            mihomo(MihomoLayout::Text).generate_file_content("direct", &set),
            "# NAME: direct\n# GENERATED BY: proxy-rules\n# TOTAL: 1\nDOMAIN,a.com\n"
        );
    }

    #[test]
    fn test_yaml_file_content() {
        let formatter = mihomo(MihomoLayout::Yaml);
        assert_eq!(formatter.file_extension(), "yaml");
        assert!(formatter
            .generate_file_content("reject", &RuleSet::new())
            .ends_with("payload: []\n"));

        let set: RuleSet = vec![Rule::new(MatcherType::DomainSuffix, "ads.example")]
            .into_iter()
            .collect();
        assert!(formatter
            .generate_file_content("reject", &set)
            .ends_with("payload:\n  - DOMAIN-SUFFIX,ads.example\n"));
    }

    #[test]
    fn test_yaml_scalar_quoting() {
        assert_eq!(yaml_scalar("DOMAIN,a.com"), "DOMAIN,a.com");
        assert_eq!(yaml_scalar("DOMAIN-REGEX,a #b"), "'DOMAIN-REGEX,a #b'");
        assert_eq!(yaml_scalar("x: 'y'"), "'x: ''y'''");
        assert_eq!(yaml_scalar("DOMAIN-REGEX,^a\\.com:"), "'DOMAIN-REGEX,^a\\.com:'");
        assert_eq!(yaml_scalar("DOMAIN-REGEX,a\t#b"), "'DOMAIN-REGEX,a\t#b'");
        assert_eq!(yaml_scalar("DOMAIN-REGEX,a:\tb"), "'DOMAIN-REGEX,a:\tb'");
        // 冒号后不跟空白时无需引号
        assert_eq!(yaml_scalar("IP-CIDR6,2001:db8::/32"), "IP-CIDR6,2001:db8::/32");
    }

    #[test]
    fn test_yaml_payload_keeps_trailing_colon_rule_as_string() {
        let set: RuleSet = vec![Rule::new(MatcherType::DomainRegex, "^a\\.com:")]
            .into_iter()
            .collect();
        let formatter = create_formatter(
            Dialect::Mihomo,
            RenderOptions {
                ip_no_resolve: true,
                mihomo_layout: MihomoLayout::Yaml,
            },
        );
        let content = formatter.generate_file_content("reject", &set);
        assert!(content.contains("  - 'DOMAIN-REGEX,^a\\.com:'\n"));
    }

    #[test]
    fn test_formatting_is_deterministic() {
        let set: RuleSet = vec![
            Rule::new(MatcherType::GeoIp, "CN").with_policy("DIRECT"),
            Rule::new(MatcherType::IpCidr6, "2001:db8::/32"),
        ]
        .into_iter()
        .collect();
        for dialect in Dialect::ALL {
            let formatter = create_formatter(dialect, RenderOptions::default());
            assert_eq!(
                formatter.generate_file_content("proxy", &set),
                formatter.generate_file_content("proxy", &set)
            );
        }
    }

    #[test]
    fn test_guides_reference_every_category() {
        let categories = vec!["direct".to_string(), "reject".to_string()];

        let sr = shadowrocket().generate_guide(&categories, "https://example.com/shadowrocket/");
        assert!(sr.contains("RULE-SET,https://example.com/shadowrocket/direct.list,DIRECT"));
        assert!(sr.contains("RULE-SET,https://example.com/shadowrocket/reject.list,REJECT"));

        let mh = mihomo(MihomoLayout::Yaml).generate_guide(&categories, "/etc/mihomo/rules");
        assert!(mh.contains("    type: file\n    path: \"/etc/mihomo/rules/direct.yaml\""));
        assert!(mh.contains("  - RULE-SET,reject,REJECT"));
        assert!(mh.contains("    format: yaml"));
    }
}
