//! 术语策略
//!
//! 译文定稿后按目录处理领域术语，两种策略每次运行只能选一种：
//! - 保留模式：原文含有某术语时，把译文中的标准译名换回原文术语；
//! - 混合模式：把译文中的近义译法和残留原文统一为标准译名，其余措辞不动。

use regex::{NoExpand, Regex, RegexBuilder};

use crate::catalog::IdentifierCatalog;
use crate::config::TermPolicy;
use crate::constants::variations_for;

/// 术语映射，条目按原文长度从长到短排列
#[derive(Debug, Clone, Default)]
pub struct TermMapper {
    pairs: Vec<(String, String)>,
}

impl TermMapper {
    pub fn new(mut pairs: Vec<(String, String)>) -> Self {
        pairs.retain(|(term, translation)| !term.is_empty() && !translation.is_empty());
        pairs.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
        Self { pairs }
    }

    /// 使用目录中已翻译的术语
    pub fn from_catalog(catalog: &IdentifierCatalog) -> Self {
        Self::new(catalog.translation_pairs())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// 按策略处理一条译文
    pub fn apply(&self, policy: TermPolicy, original: &str, translated: &str) -> String {
        match policy {
            TermPolicy::None => translated.to_string(),
            TermPolicy::Preserve => self.preserve(original, translated),
            TermPolicy::Hybrid => self.standardize(original, translated),
        }
    }

    /// 保留模式
    pub fn preserve(&self, original: &str, translated: &str) -> String {
        let mut result = translated.to_string();
        for (term, translation) in &self.pairs {
            if original.contains(term.as_str()) && result.contains(translation.as_str()) {
                result = replace_word(&result, translation, term, false);
            }
        }
        result
    }

    /// 混合模式
    pub fn standardize(&self, original: &str, translated: &str) -> String {
        let mut result = translated.to_string();
        for (term, translation) in &self.pairs {
            if !original.contains(term.as_str()) {
                continue;
            }

            let mut variants: Vec<&str> = variations_for(term)
                .iter()
                .copied()
                .filter(|v| *v != translation.as_str())
                .collect();
            variants.sort_by_key(|v| std::cmp::Reverse(v.len()));
            for variant in variants {
                result = replace_word(&result, variant, translation, true);
            }

            if result.contains(term.as_str()) {
                result = result.replace(term.as_str(), translation);
            }
        }
        result
    }

    /// 只替换原文中的术语，没有人工译文时使用
    pub fn replace_terms(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (term, translation) in &self.pairs {
            if result.contains(term.as_str()) {
                result = result.replace(term.as_str(), translation);
            }
        }
        result
    }
}

/// 按词边界替换；两端是ASCII单词字符时才加边界
fn replace_word(text: &str, needle: &str, replacement: &str, case_insensitive: bool) -> String {
    if needle.is_empty() {
        return text.to_string();
    }

    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let mut pattern = String::new();
    if is_word(needle.chars().next()) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(needle));
    if is_word(needle.chars().last()) {
        pattern.push_str(r"\b");
    }

    let built: Result<Regex, _> = RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build();
    match built {
        Ok(re) => re.replace_all(text, NoExpand(replacement)).into_owned(),
        Err(_) => text.replace(needle, replacement),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> TermMapper {
        TermMapper::new(vec![
            ("攻击力".to_string(), "Attack Damage".to_string()),
            ("攻击速度".to_string(), "Attack Speed".to_string()),
            ("力量".to_string(), "STR".to_string()),
        ])
    }

    #[test]
    fn test_preserve_restores_original_term() {
        let m = mapper();
        let out = m.preserve("攻击力提升10点", "Attack Damage increased by 10");
        assert_eq!(out, "攻击力 increased by 10");

        // 原文没有该术语时不动
        let untouched = m.preserve("提升10点", "Attack Damage increased by 10");
        assert_eq!(untouched, "Attack Damage increased by 10");
    }

    #[test]
    fn test_preserve_handles_multiple_occurrences() {
        let m = mapper();
        let out = m.preserve("力量和力量", "STR and STR, not STRONG");
        assert_eq!(out, "力量 and 力量, not STRONG");
    }

    #[test]
    fn test_standardize_variants() {
        let m = mapper();
        let out = m.standardize("攻击力和攻击速度", "ATK and attack rate up");
        assert_eq!(out, "Attack Damage and Attack Speed up");
    }

    #[test]
    fn test_standardize_replaces_leftover_terms() {
        let m = mapper();
        assert_eq!(m.standardize("力量+5", "力量 +5"), "STR +5");
        assert_eq!(m.standardize("无术语", "ATK"), "ATK");
    }

    #[test]
    fn test_replace_terms_longest_first() {
        let m = TermMapper::new(vec![
            ("攻击".to_string(), "Attack".to_string()),
            ("攻击速度".to_string(), "Attack Speed".to_string()),
        ]);
        assert_eq!(m.replace_terms("攻击速度+10%"), "Attack Speed+10%");
    }

    #[test]
    fn test_apply_policy_none_is_identity() {
        let m = mapper();
        assert_eq!(m.apply(TermPolicy::None, "攻击力", "Attack Damage"), "Attack Damage");
        assert_eq!(m.apply(TermPolicy::Preserve, "攻击力", "Attack Damage"), "攻击力");
    }
}
