//! 系统标识符目录
//!
//! 系统标识符是脚本逻辑里会被比较、哈希或当作存储键的中文术语，例如属性名。
//! 目录由启动表初始化，再用一组正则检测器扫描脚本补充；每个术语第一次出现时分配
//! 序号，序号终身不变，是机器产物与人工编辑文件之间的连接键。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::Context as _;
use regex::bytes::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::CodecResolver;
use crate::constants::identifier_config::{
    ASSET_EXTENSIONS, DETECTION_PATTERNS, DETECTION_REPORT_FILE, DICTIONARY_FILE,
    DICTIONARY_JSON_FILE, PATH_PATTERNS, TEMPLATE_FILE, TERM_LIST_FILE,
};
use crate::error::Result;
use crate::utils::{han_count, read_text_file};

/// 目录中的一个术语
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentifier {
    /// 原文术语
    pub term: String,
    /// 标准译名，未翻译时与原文相同
    pub translation: String,
    /// 在脚本中出现的字节偏移
    pub occurrences: Vec<usize>,
    /// 稳定序号（从1开始）
    pub ordinal: usize,
    /// 命中的检测器名称
    pub pattern_types: Vec<String>,
}

impl SystemIdentifier {
    /// 是否已有不同于原文的译名
    pub fn is_translated(&self) -> bool {
        !self.translation.is_empty() && self.translation != self.term
    }
}

/// 词典文件中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub ordinal: usize,
    pub term: String,
    pub translation: String,
}

/// 一次检测的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionSummary {
    /// 正则命中总数
    pub matches: usize,
    /// 被当作资源路径跳过
    pub skipped_paths: usize,
    /// 解码失败或不满足术语条件
    pub skipped_invalid: usize,
    /// 新加入目录的术语
    pub new_terms: usize,
}

/// 标识符检测器：一组带类型名的正则和路径判断规则
#[derive(Debug, Clone)]
pub struct IdentifierDetector {
    patterns: Vec<(Regex, &'static str)>,
    path_patterns: Vec<Regex>,
}

impl IdentifierDetector {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| crate::engine_error!(config, pattern, e))
        };

        let patterns = DETECTION_PATTERNS
            .iter()
            .map(|(pattern, kind)| Ok((compile(pattern)?, *kind)))
            .collect::<Result<Vec<_>>>()?;
        let path_patterns = PATH_PATTERNS
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            path_patterns,
        })
    }

    /// 字面量是否像资源文件路径
    pub fn is_path_like(&self, raw: &[u8]) -> bool {
        if raw.len() < 3 {
            return false;
        }

        let trimmed = raw.strip_prefix(b"\"").unwrap_or(raw);
        let trimmed = trimmed.strip_suffix(b"\"").unwrap_or(trimmed);

        if self.path_patterns.iter().any(|re| re.is_match(trimmed)) {
            return true;
        }

        let has_separator = trimmed.contains(&b'\\') || trimmed.contains(&b'/');
        if has_separator {
            let lower = trimmed.to_ascii_lowercase();
            return ASSET_EXTENSIONS
                .iter()
                .any(|ext| crate::utils::contains_bytes(&lower, ext.as_bytes()));
        }

        false
    }

    /// 找出所有命中：(字面量起始偏移, 原始字节, 检测器名称)
    pub fn find_candidates<'a>(&self, data: &'a [u8]) -> Vec<(usize, &'a [u8], &'static str)> {
        let mut found = Vec::new();
        for (re, kind) in &self.patterns {
            for caps in re.captures_iter(data) {
                if let (Some(whole), Some(literal)) = (caps.get(0), caps.get(1)) {
                    found.push((whole.start(), literal.as_bytes(), *kind));
                }
            }
        }
        found
    }
}

/// 标识符目录
///
/// 每次运行构造一次并以引用传递；只有显式的文件重载会改动已有译名。
#[derive(Debug, Clone, Default)]
pub struct IdentifierCatalog {
    entries: Vec<SystemIdentifier>,
    index: HashMap<String, usize>,
    bootstrap: HashSet<String>,
    denylist: HashSet<String>,
    next_ordinal: usize,
}

impl IdentifierCatalog {
    /// 用启动表创建目录，序号按表中顺序分配
    pub fn bootstrap(table: &[(String, String)]) -> Self {
        let mut catalog = Self {
            next_ordinal: 1,
            ..Self::default()
        };
        for (term, translation) in table {
            catalog.bootstrap.insert(term.clone());
            catalog.insert(term, translation, None);
        }
        catalog
    }

    /// 由词典文件的条目重建目录，保留文件中的序号
    pub fn from_entries(entries: Vec<DictionaryEntry>) -> Self {
        let mut catalog = Self {
            next_ordinal: 1,
            ..Self::default()
        };
        for entry in entries {
            if catalog.index.contains_key(&entry.term) {
                warn!("⚠️  词典中重复的术语已忽略: {}", entry.term);
                continue;
            }
            catalog.bootstrap.insert(entry.term.clone());
            catalog.insert(&entry.term, &entry.translation, Some(entry.ordinal));
        }
        catalog
    }

    /// 设置黑名单
    pub fn with_denylist<I, S>(mut self, denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denylist = denylist.into_iter().map(Into::into).collect();
        self
    }

    fn insert(&mut self, term: &str, translation: &str, ordinal: Option<usize>) -> usize {
        if let Some(&idx) = self.index.get(term) {
            return idx;
        }

        let ordinal = ordinal.unwrap_or(self.next_ordinal);
        self.next_ordinal = self.next_ordinal.max(ordinal + 1);

        let translation = if translation.is_empty() { term } else { translation };
        self.entries.push(SystemIdentifier {
            term: term.to_string(),
            translation: translation.to_string(),
            occurrences: Vec::new(),
            ordinal,
            pattern_types: Vec::new(),
        });
        let idx = self.entries.len() - 1;
        self.index.insert(term.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按序号排列的全部条目
    pub fn entries(&self) -> &[SystemIdentifier] {
        &self.entries
    }

    pub fn get(&self, term: &str) -> Option<&SystemIdentifier> {
        self.index.get(term).map(|&idx| &self.entries[idx])
    }

    pub fn contains(&self, term: &str) -> bool {
        self.index.contains_key(term)
    }

    /// 检测中实际命中过的条目
    pub fn detected(&self) -> impl Iterator<Item = &SystemIdentifier> {
        self.entries.iter().filter(|e| !e.occurrences.is_empty())
    }

    /// 术语 → 译名 对照表（只含已翻译的条目）
    pub fn translation_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|e| e.is_translated())
            .map(|e| (e.term.clone(), e.translation.clone()))
            .collect()
    }

    /// 文本中包含的目录术语，长的在前
    pub fn terms_in(&self, text: &str) -> Vec<&str> {
        let mut terms: Vec<&str> = self
            .entries
            .iter()
            .map(|e| e.term.as_str())
            .filter(|term| text.contains(term))
            .collect();
        terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        terms
    }

    /// 候选文本能否作为术语
    ///
    /// 至少两个字符且含有汉字；只有一个汉字时必须是启动表里的术语。黑名单一律拒绝。
    pub fn is_valid_term(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < 2 {
            return false;
        }
        if self.denylist.contains(trimmed) {
            return false;
        }
        match han_count(trimmed) {
            0 => false,
            1 => self.bootstrap.contains(trimmed),
            _ => true,
        }
    }

    /// 扫描脚本字节，把检测到的术语并入目录
    pub fn detect(
        &mut self,
        data: &[u8],
        detector: &IdentifierDetector,
        resolver: &CodecResolver,
    ) -> DetectionSummary {
        let mut summary = DetectionSummary::default();

        for (offset, raw, kind) in detector.find_candidates(data) {
            summary.matches += 1;

            if detector.is_path_like(raw) {
                summary.skipped_paths += 1;
                continue;
            }

            let text = match resolver.resolve(raw) {
                Some(decoded) => decoded.text,
                None => {
                    summary.skipped_invalid += 1;
                    continue;
                }
            };

            if !self.is_valid_term(&text) {
                debug!("跳过不符合条件的候选: {}", text);
                summary.skipped_invalid += 1;
                continue;
            }

            if !self.contains(&text) {
                summary.new_terms += 1;
            }
            let idx = self.insert(&text, "", None);
            let entry = &mut self.entries[idx];
            entry.occurrences.push(offset);
            if !entry.pattern_types.iter().any(|k| k == kind) {
                entry.pattern_types.push(kind.to_string());
            }
        }

        info!(
            "🔍 标识符检测: 命中 {} 处, 新增 {} 个术语, 跳过路径 {} 处, 跳过无效 {} 处",
            summary.matches, summary.new_terms, summary.skipped_paths, summary.skipped_invalid
        );
        summary
    }

    /// 按序号合并人工编辑的译文模板，返回 (更新数, 仍缺失数)
    pub fn reconcile(&mut self, template: &BTreeMap<usize, String>) -> (usize, usize) {
        let mut updated = 0;
        let mut missing = 0;

        for entry in &mut self.entries {
            match template.get(&entry.ordinal).map(|t| t.trim()) {
                Some(translation) if !translation.is_empty() => {
                    if translation != entry.translation {
                        entry.translation = translation.to_string();
                        updated += 1;
                    }
                }
                _ => missing += 1,
            }
        }

        info!("📥 词典模板合并: 更新 {} 条, 缺失 {} 条", updated, missing);
        (updated, missing)
    }

    /// 把全部目录术语替换为译名（UTF-8字节，长的在前），返回替换次数
    pub fn replace_in_bytes(&self, data: &[u8]) -> (Vec<u8>, usize) {
        let mut pairs = self.translation_pairs();
        pairs.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

        let mut content = data.to_vec();
        let mut total = 0;
        for (term, translation) in &pairs {
            let (replaced, count) =
                crate::utils::replace_bytes(&content, term.as_bytes(), translation.as_bytes());
            if count > 0 {
                debug!("术语替换: {} -> {} ({} 处)", term, translation, count);
                content = replaced;
                total += count;
            }
        }
        (content, total)
    }

    /// 写出全部词典文件：术语列表、可编辑词典、译文模板、JSON词典和检测报告
    pub fn write_files(&self, dir: &Path, source: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("创建词典目录失败: {}", dir.display()))?;

        let mut term_list = String::new();
        let mut dictionary = String::from(
            "# 系统标识符词典\n# 格式: 序号. 原文 -> 译文\n# 只修改箭头右侧的译文，序号不要改动\n\n",
        );
        let mut template = String::from(
            "# 系统标识符译文模板\n# 格式: 序号. 译文\n# 序号与 identifier_dictionary.txt 对应\n\n",
        );
        for entry in &self.entries {
            term_list.push_str(&format!("{}. {}\n", entry.ordinal, entry.term));
            dictionary.push_str(&format!(
                "{}. {} -> {}\n",
                entry.ordinal, entry.term, entry.translation
            ));
            template.push_str(&format!("{}. {}\n", entry.ordinal, entry.translation));
        }

        write_file(&dir.join(TERM_LIST_FILE), &term_list)?;
        write_file(&dir.join(DICTIONARY_FILE), &dictionary)?;
        write_file(&dir.join(TEMPLATE_FILE), &template)?;
        write_file(
            &dir.join(DICTIONARY_JSON_FILE),
            &serde_json::to_string_pretty(&self.to_json(source))?,
        )?;
        write_file(&dir.join(DETECTION_REPORT_FILE), &self.detection_report(source))?;

        info!("💾 已写出 {} 个标识符的词典文件: {}", self.len(), dir.display());
        Ok(())
    }

    fn to_json(&self, source: &Path) -> DictionaryJson {
        DictionaryJson {
            extraction_date: chrono::Local::now().to_rfc3339(),
            source_file: source.display().to_string(),
            total_identifiers: self.len(),
            identifiers: self
                .entries
                .iter()
                .map(|e| DictionaryJsonEntry {
                    index: e.ordinal,
                    chinese: e.term.clone(),
                    english: e.translation.clone(),
                    occurrences: e.occurrences.len(),
                    patterns: e.pattern_types.clone(),
                })
                .collect(),
        }
    }

    fn detection_report(&self, source: &Path) -> String {
        let mut report = String::new();
        report.push_str("系统标识符检测报告\n");
        report.push_str(&"=".repeat(60));
        report.push('\n');
        report.push_str(&format!("源文件: {}\n", source.display()));
        report.push_str(&format!(
            "生成时间: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        report.push_str(&format!("目录条目: {}\n\n", self.len()));

        for entry in self.detected() {
            report.push_str(&format!("{}. {} -> {}\n", entry.ordinal, entry.term, entry.translation));
            report.push_str(&format!("   出现次数: {}\n", entry.occurrences.len()));
            report.push_str(&format!("   检测类型: {}\n", entry.pattern_types.join(", ")));
            let preview: Vec<String> = entry
                .occurrences
                .iter()
                .take(5)
                .map(|o| o.to_string())
                .collect();
            report.push_str(&format!("   偏移: {}\n\n", preview.join(", ")));
        }
        report
    }

    /// 读取可编辑词典 `序号. 原文 -> 译文`；文件不存在时返回空表
    pub fn load_dictionary(dir: &Path) -> Result<Vec<DictionaryEntry>> {
        let path = dir.join(DICTIONARY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = read_text_file(&path)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            let Some((ordinal, body)) = split_ordinal(line) else {
                continue;
            };
            let Some((term, translation)) = body.split_once("->") else {
                debug!("词典行缺少箭头，已忽略: {}", line);
                continue;
            };
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            entries.push(DictionaryEntry {
                ordinal,
                term: term.to_string(),
                translation: translation.trim().to_string(),
            });
        }

        debug!("从词典读取 {} 条", entries.len());
        Ok(entries)
    }

    /// 读取译文模板 `序号. 译文`；文件不存在时返回空表
    pub fn load_template(dir: &Path) -> Result<BTreeMap<usize, String>> {
        let path = dir.join(TEMPLATE_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = read_text_file(&path)?;
        Ok(content
            .lines()
            .filter_map(split_ordinal)
            .map(|(ordinal, text)| (ordinal, text.trim().to_string()))
            .collect())
    }

    /// 从词典目录重载目录：词典为主，模板中的译文按序号覆盖
    pub fn reload_from_dir(dir: &Path) -> Result<Self> {
        let entries = Self::load_dictionary(dir)?;
        if entries.is_empty() {
            return Err(crate::engine_error!(missing, dir.join(DICTIONARY_FILE).display()));
        }

        let mut catalog = Self::from_entries(entries);
        let template = Self::load_template(dir)?;
        if !template.is_empty() {
            catalog.reconcile(&template);
        }
        Ok(catalog)
    }
}

/// 拆出行首的 `序号.`，注释行和空行返回None
fn split_ordinal(line: &str) -> Option<(usize, &str)> {
    let line = line.trim_start();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (number, rest) = line.split_once('.')?;
    let ordinal = number.trim().parse::<usize>().ok()?;
    Some((ordinal, rest.strip_prefix(' ').unwrap_or(rest)))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("写入文件失败: {}", path.display()))?;
    Ok(())
}

#[derive(Serialize)]
struct DictionaryJson {
    extraction_date: String,
    source_file: String,
    total_identifiers: usize,
    identifiers: Vec<DictionaryJsonEntry>,
}

#[derive(Serialize)]
struct DictionaryJsonEntry {
    index: usize,
    chinese: String,
    english: String,
    occurrences: usize,
    patterns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<(String, String)> {
        vec![
            ("力量".to_string(), "STR".to_string()),
            ("攻击力".to_string(), "Attack Damage".to_string()),
            ("+金".to_string(), "+Gold".to_string()),
        ]
    }

    fn resolver() -> CodecResolver {
        CodecResolver::new().without_detector()
    }

    fn gbk(text: &str) -> Vec<u8> {
        encoding_rs::GBK.encode(text).0.into_owned()
    }

    #[test]
    fn test_bootstrap_assigns_ordinals_in_order() {
        let catalog = IdentifierCatalog::bootstrap(&table());
        let ordinals: Vec<usize> = catalog.entries().iter().map(|e| e.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(catalog.get("攻击力").unwrap().translation, "Attack Damage");
    }

    #[test]
    fn test_valid_term_rules() {
        let catalog = IdentifierCatalog::bootstrap(&table()).with_denylist(["测试"]);
        assert!(catalog.is_valid_term("护甲值"));
        assert!(!catalog.is_valid_term("a"));
        assert!(!catalog.is_valid_term("Hello"));
        assert!(!catalog.is_valid_term("测试"));
        // 单个汉字只接受启动表中的术语
        assert!(!catalog.is_valid_term("银x"));
        assert!(catalog.is_valid_term(" +金"));
        assert!(!catalog.is_valid_term("金"));
    }

    #[test]
    fn test_detect_adds_new_terms_with_next_ordinal() {
        let mut catalog = IdentifierCatalog::bootstrap(&table());
        let detector = IdentifierDetector::new().unwrap();
        let script = "call SaveStr(ht, 0, 1, \"护甲穿透\")\n\
                      if LoadStr(ht, 0, 1) == \"护甲穿透\" then\n\
                      set s = \"力量\"\n";

        let summary = catalog.detect(&gbk(script), &detector, &resolver());
        assert_eq!(summary.new_terms, 1);

        let added = catalog.get("护甲穿透").unwrap();
        assert_eq!(added.ordinal, 4);
        assert_eq!(added.translation, "护甲穿透");
        assert!(added.occurrences.len() >= 2);
        assert!(added.pattern_types.iter().any(|k| k == "savestr_value"));
        assert!(added.pattern_types.iter().any(|k| k == "string_comparison"));

        let existing = catalog.get("力量").unwrap();
        assert_eq!(existing.ordinal, 1);
        assert!(existing.pattern_types.iter().any(|k| k == "variable_assign"));
    }

    #[test]
    fn test_paths_are_skipped() {
        let detector = IdentifierDetector::new().unwrap();
        assert!(detector.is_path_like(b"war3mapImported\\\xc4\xa3\xd0\xcd.mdx"));
        assert!(detector.is_path_like(b"C:\\Maps\\test"));
        assert!(detector.is_path_like(b"ReplaceableTextures\\CommandButtons\\BTN.blp"));
        assert!(!detector.is_path_like("攻击力".as_bytes()));

        let mut catalog = IdentifierCatalog::bootstrap(&table());
        let script = "set m = \"Models\\\\英雄.mdx\"\n";
        let summary = catalog.detect(&gbk(script), &detector, &resolver());
        assert_eq!(summary.skipped_paths, 1);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_terms_in_longest_first() {
        let catalog = IdentifierCatalog::bootstrap(&vec![
            ("攻击".to_string(), "Attack".to_string()),
            ("攻击速度".to_string(), "Attack Speed".to_string()),
        ]);
        assert_eq!(catalog.terms_in("提升攻击速度"), vec!["攻击速度", "攻击"]);
        assert!(catalog.terms_in("没有术语").is_empty());
    }

    #[test]
    fn test_dictionary_round_trip_and_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = IdentifierCatalog::bootstrap(&table());
        let detector = IdentifierDetector::new().unwrap();
        catalog.detect(
            &gbk("call StringHash(\"暴击伤害\")\n"),
            &detector,
            &resolver(),
        );
        catalog.write_files(dir.path(), Path::new("war3map.j")).unwrap();

        // 人工编辑模板：只翻译新术语
        fs::write(
            dir.path().join(TEMPLATE_FILE),
            "# 注释\n4. Critical Damage\n2. Attack Damage\n",
        )
        .unwrap();

        let entries = IdentifierCatalog::load_dictionary(dir.path()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].term, "暴击伤害");

        let mut reloaded = IdentifierCatalog::from_entries(entries);
        let template = IdentifierCatalog::load_template(dir.path()).unwrap();
        let (updated, missing) = reloaded.reconcile(&template);
        assert_eq!(updated, 1);
        assert_eq!(missing, 2);
        assert_eq!(reloaded.get("暴击伤害").unwrap().translation, "Critical Damage");
        assert_eq!(reloaded.get("暴击伤害").unwrap().ordinal, 4);

        let via_dir = IdentifierCatalog::reload_from_dir(dir.path()).unwrap();
        assert_eq!(via_dir.get("暴击伤害").unwrap().translation, "Critical Damage");
    }

    #[test]
    fn test_reload_without_dictionary_is_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = IdentifierCatalog::reload_from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::MissingInputFile { .. }));
    }

    #[test]
    fn test_replace_in_bytes() {
        let catalog = IdentifierCatalog::bootstrap(&table());
        let (out, count) = catalog.replace_in_bytes("力量+10 攻击力+5".as_bytes());
        assert_eq!(String::from_utf8(out).unwrap(), "STR+10 Attack Damage+5");
        assert_eq!(count, 2);
    }
}
