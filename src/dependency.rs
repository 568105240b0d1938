//! 依赖同步
//!
//! 脚本里参与比较、哈希或作为存储键的字符串，如果同时出现在物编文本的字段值里，
//! 两边必须使用完全相同的译文，否则脚本中的逻辑判断会失效。
//! 这里先建立两边都出现的共享字符串，再以脚本译文为准同步到物编文本。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::codec::{Codec, CodecResolver};
use crate::constants::jass_config::{
    COLOR_CODE_PREFIX, CRITICAL_PATTERNS, FUNCTION_DECL_PATTERN, FUNCTION_LOOKBACK,
};
use crate::data_file::{parse_records, read_data_file};
use crate::error::Result;
use crate::extraction::{load_records, ScriptArtifacts, TokenRecord};
use crate::numbered::load_numbered;
use crate::utils::{base_name, contains_cjk, generate_output_path, replace_bytes, write_atomic};

/// 脚本和物编文本都用到的字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedString {
    pub original: String,
    /// 权威译文，来自脚本的编号译文文件
    pub translation: String,
    pub found_in_code: bool,
    pub found_in_data: bool,
    /// 所在函数名
    pub code_contexts: Vec<String>,
    /// (文件名, 键)
    pub data_contexts: Vec<(String, String)>,
    pub is_color_coded: bool,
    /// 脚本中出现过的原始字节及其编码
    code_forms: Vec<(Vec<u8>, Codec)>,
}

impl SharedString {
    pub fn has_translation(&self) -> bool {
        !self.translation.is_empty()
    }
}

/// 脚本一侧的命中
#[derive(Debug, Clone, Default)]
pub struct CodeSighting {
    pub functions: Vec<String>,
    pub pattern_types: Vec<&'static str>,
    forms: Vec<(Vec<u8>, Codec)>,
}

/// 逻辑相关字符串的检测器
pub struct CriticalDetector {
    patterns: Vec<(BytesRegex, &'static str)>,
    function_decl: BytesRegex,
}

impl CriticalDetector {
    pub fn new() -> Result<Self> {
        let compile =
            |p: &str| BytesRegex::new(p).map_err(|e| crate::engine_error!(config, p, e));
        let patterns = CRITICAL_PATTERNS
            .iter()
            .map(|(p, kind)| Ok((compile(p)?, *kind)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            function_decl: compile(FUNCTION_DECL_PATTERN)?,
        })
    }

    /// 扫描脚本，返回 原文 → 命中信息
    pub fn scan(&self, data: &[u8], resolver: &CodecResolver) -> BTreeMap<String, CodeSighting> {
        let mut found: BTreeMap<String, CodeSighting> = BTreeMap::new();

        for (pattern, kind) in &self.patterns {
            for caps in pattern.captures_iter(data) {
                let (Some(whole), Some(literal)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let Some(decoded) = resolver.resolve(literal.as_bytes()) else {
                    continue;
                };
                if !contains_cjk(&decoded.text) {
                    continue;
                }

                let sighting = found.entry(decoded.text).or_default();
                if let Some(name) = self.enclosing_function(data, whole.start()) {
                    if !sighting.functions.contains(&name) {
                        sighting.functions.push(name);
                    }
                }
                if !sighting.pattern_types.contains(kind) {
                    sighting.pattern_types.push(kind);
                }
                let form = (literal.as_bytes().to_vec(), decoded.codec);
                if !sighting.forms.contains(&form) {
                    sighting.forms.push(form);
                }
            }
        }

        debug!("脚本中逻辑相关的中文字符串: {} 个", found.len());
        found
    }

    /// 偏移之前最近的函数声明
    pub fn enclosing_function(&self, data: &[u8], offset: usize) -> Option<String> {
        let offset = offset.min(data.len());
        let window = &data[offset.saturating_sub(FUNCTION_LOOKBACK)..offset];
        self.function_decl
            .captures_iter(window)
            .last()
            .and_then(|caps| caps.get(1))
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
    }
}

/// 共享字符串图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, SharedString>,
}

impl DependencyGraph {
    /// 由脚本命中和物编文件建立共享字符串，只保留两边都出现的
    pub fn build(code: &BTreeMap<String, CodeSighting>, data_files: &[PathBuf]) -> Result<Self> {
        let mut nodes: BTreeMap<String, SharedString> = BTreeMap::new();

        for file in data_files {
            if !file.exists() {
                debug!("跳过不存在的物编文件: {}", file.display());
                continue;
            }
            let content = read_data_file(file)?;
            let file_name = base_name(file);

            for record in parse_records(&content, false)? {
                for (literal, sighting) in code {
                    if !record.value.contains(literal.as_str()) {
                        continue;
                    }
                    let node = nodes.entry(literal.clone()).or_insert_with(|| SharedString {
                        original: literal.clone(),
                        translation: String::new(),
                        found_in_code: true,
                        found_in_data: true,
                        code_contexts: sighting.functions.clone(),
                        data_contexts: Vec::new(),
                        is_color_coded: false,
                        code_forms: sighting.forms.clone(),
                    });
                    if color_wrapper(literal).is_some_and(|re| re.is_match(&record.value)) {
                        node.is_color_coded = true;
                    }
                    node.data_contexts.push((file_name.clone(), record.key.clone()));
                }
            }
        }

        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, original: &str) -> Option<&SharedString> {
        self.nodes.get(original)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SharedString> {
        self.nodes.values()
    }

    /// 从脚本提取记录和编号译文中取权威译文，返回 (已同步, 缺少译文)
    pub fn resolve_translations(
        &mut self,
        records: &[TokenRecord],
        translations: &BTreeMap<usize, String>,
    ) -> (usize, usize) {
        for record in records {
            let Some(node) = self.nodes.get_mut(&record.original) else {
                continue;
            };
            let Some(text) = translations.get(&record.index) else {
                continue;
            };
            let text = single_line(text);
            if text.is_empty() || text == record.original {
                continue;
            }
            if node.has_translation() {
                if node.translation != text {
                    warn!(
                        "⚠️  \"{}\" 有多个不同译文，使用第一个: {}",
                        node.original, node.translation
                    );
                }
                continue;
            }
            node.translation = text;
        }

        let synced = self.nodes.values().filter(|n| n.has_translation()).count();
        (synced, self.nodes.len() - synced)
    }

    /// 按原文长度从长到短排列的已翻译节点
    fn translated_longest_first(&self) -> Vec<&SharedString> {
        let mut nodes: Vec<&SharedString> =
            self.nodes.values().filter(|n| n.has_translation()).collect();
        nodes.sort_by_key(|n| std::cmp::Reverse(n.original.len()));
        nodes
    }

    /// 在脚本字节中把 `"原文"` 换成 `"译文"`，编码与原字面量一致
    pub fn apply_to_code(&self, data: &[u8]) -> (Vec<u8>, usize) {
        let mut output = data.to_vec();
        let mut total = 0;

        for node in self.translated_longest_first() {
            for (raw, codec) in &node.code_forms {
                let (encoded, dropped) = codec.encode_lossy(&node.translation);
                if !dropped.is_empty() {
                    warn!("⚠️  译文中有 {} 无法表示的字符: {:?}", codec, dropped);
                }
                let from = quoted(raw);
                let to = quoted(&encoded);
                let (replaced, count) = replace_bytes(&output, &from, &to);
                output = replaced;
                total += count;
            }
        }

        (output, total)
    }

    /// 在物编文本的字段值中同步译文；颜色代码包裹的先按包裹替换
    pub fn apply_to_data(&self, content: &str) -> (String, usize) {
        let mut total = 0;
        let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();

        for line in lines.iter_mut() {
            if line.trim_start().starts_with('[') {
                continue;
            }
            let Some(eq) = line.find('=') else {
                continue;
            };
            let (key, value) = line.split_at(eq);
            let mut value = value.to_string();

            for node in self.translated_longest_first() {
                if !value.contains(node.original.as_str()) {
                    continue;
                }
                if node.is_color_coded {
                    if let Some(re) = color_wrapper(&node.original) {
                        let count = re.find_iter(&value).count();
                        if count > 0 {
                            let replacement = format!("${{1}}{}${{2}}", escape_dollars(&node.translation));
                            value = re.replace_all(&value, replacement.as_str()).into_owned();
                            total += count;
                        }
                    }
                }
                let count = value.matches(node.original.as_str()).count();
                if count > 0 {
                    value = value.replace(node.original.as_str(), &node.translation);
                    total += count;
                }
            }

            *line = format!("{}{}", key, value);
        }

        (lines.join("\n"), total)
    }
}

/// 一次依赖同步的结果
#[derive(Debug, Clone, Default)]
pub struct DepsyncOutcome {
    pub shared: usize,
    pub synced: usize,
    pub missing: usize,
    pub code_replacements: usize,
    pub data_replacements: usize,
    pub outputs: Vec<PathBuf>,
}

/// 依赖同步：脚本译文为准，同步写出脚本和物编文本
pub fn depsync(
    script: &Path,
    data_files: &[PathBuf],
    tokens_dir: &Path,
    out_dir: &Path,
    resolver: &CodecResolver,
    mut backup: Option<&mut BackupManager>,
) -> Result<DepsyncOutcome> {
    if !script.exists() {
        return Err(crate::engine_error!(missing, script.display()));
    }
    let data = std::fs::read(script)
        .map_err(|e| crate::engine_error!(file_op, script.display(), "读取", e))?;

    info!("🔍 扫描脚本中的字符串依赖...");
    let detector = CriticalDetector::new()?;
    let code = detector.scan(&data, resolver);
    if code.is_empty() {
        info!("✓ 没有发现逻辑相关的字符串");
        return Ok(DepsyncOutcome::default());
    }

    let mut graph = DependencyGraph::build(&code, data_files)?;
    let mut outcome = DepsyncOutcome {
        shared: graph.len(),
        ..Default::default()
    };
    if graph.is_empty() {
        info!("✓ 逻辑相关的字符串没有出现在物编文本中，无需同步");
        return Ok(outcome);
    }

    let artifacts = ScriptArtifacts::new(script, tokens_dir);
    let records = load_records(&artifacts.records)?;
    let translations = load_numbered(&artifacts.translations)?;
    let (synced, missing) = graph.resolve_translations(&records, &translations);
    outcome.synced = synced;
    outcome.missing = missing;

    for node in graph.nodes() {
        if node.has_translation() {
            info!("  ✓ {} → {}", node.original, node.translation);
        } else {
            warn!("  ⚠️  {} 没有译文", node.original);
        }
    }
    if synced == 0 {
        warn!("⚠️  没有可同步的译文");
        return Ok(outcome);
    }

    let (code_output, code_replacements) = graph.apply_to_code(&data);
    outcome.code_replacements = code_replacements;
    if let Some(manager) = backup.as_deref_mut() {
        manager.backup_file(script)?;
    }
    let script_out = generate_output_path(script, out_dir);
    write_atomic(&script_out, &code_output)?;
    outcome.outputs.push(script_out);

    for file in data_files.iter().filter(|f| f.exists()) {
        let content = read_data_file(file)?;
        let (rewritten, count) = graph.apply_to_data(&content);
        if count == 0 {
            debug!("{} 无需修改", base_name(file));
            continue;
        }
        if let Some(manager) = backup.as_deref_mut() {
            manager.backup_file(file)?;
        }
        let out = generate_output_path(file, out_dir);
        write_atomic(&out, rewritten.as_bytes())?;
        info!("  ✓ {}: 同步 {} 处", base_name(file), count);
        outcome.data_replacements += count;
        outcome.outputs.push(out);
    }

    info!(
        "✅ 同步 {} 个共享字符串, 脚本替换 {} 处, 物编替换 {} 处",
        outcome.synced, outcome.code_replacements, outcome.data_replacements
    );
    Ok(outcome)
}

/// 共享译文必须能同时放进脚本字面量和物编的一行
fn single_line(text: &str) -> String {
    text.trim().replace("\r\n", " ").replace(|c: char| c == '\r' || c == '\n', " ").replace('"', "'")
}

fn quoted(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    out.push(b'"');
    out.extend_from_slice(bytes);
    out.push(b'"');
    out
}

/// `|cAARRGGBB原文|r`
fn color_wrapper(literal: &str) -> Option<Regex> {
    Regex::new(&format!(r"({}){}(\|r)", COLOR_CODE_PREFIX, regex::escape(literal))).ok()
}

fn escape_dollars(text: &str) -> String {
    text.replace('$', "$$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IdentifierCatalog;
    use crate::config::{EngineConfig, SuspiciousPolicy};
    use crate::extraction::extract_script;
    use crate::numbered::write_numbered;
    use crate::tokenizer::Tokenizer;
    use std::fs;

    fn gbk(text: &str) -> Vec<u8> {
        encoding_rs::GBK.encode(text).0.into_owned()
    }

    fn resolver() -> CodecResolver {
        CodecResolver::new().without_detector()
    }

    const SCRIPT: &str = "function Trig_Blade_Conditions takes nothing returns boolean\n\
    if GetItemName(GetManipulatedItem()) == \"奥达奇战刃\" then\n\
        return true\n\
    endif\n\
    return false\n\
endfunction\n";

    const ITEMS: &str = "[I000]\nName=|c6fff0011奥达奇战刃|r\nUbertip=装备奥达奇战刃后攻击+10\n";

    #[test]
    fn test_scan_records_function_and_pattern() {
        let detector = CriticalDetector::new().unwrap();
        let found = detector.scan(&gbk(SCRIPT), &resolver());
        let sighting = &found["奥达奇战刃"];
        assert_eq!(sighting.functions, vec!["Trig_Blade_Conditions"]);
        assert_eq!(sighting.pattern_types, vec!["string_comparison"]);
    }

    #[test]
    fn test_enclosing_function_is_nearest() {
        let detector = CriticalDetector::new().unwrap();
        let data = b"function A takes nothing returns nothing\nendfunction\nfunction B takes nothing returns nothing\n x";
        let offset = data.len() - 1;
        assert_eq!(detector.enclosing_function(data, offset).as_deref(), Some("B"));
        assert_eq!(detector.enclosing_function(b"set x = 1", 5), None);
    }

    #[test]
    fn test_graph_requires_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let items = dir.path().join("Itemstrings.txt");
        fs::write(&items, ITEMS).unwrap();

        let detector = CriticalDetector::new().unwrap();
        let mut script = SCRIPT.to_string();
        script.push_str("function X takes nothing returns nothing\n    set s = \"只在脚本里\"\nendfunction\n");
        let code = detector.scan(&gbk(&script), &resolver());
        assert_eq!(code.len(), 2);

        let graph = DependencyGraph::build(&code, &[items]).unwrap();
        assert_eq!(graph.len(), 1);
        let node = graph.get("奥达奇战刃").unwrap();
        assert!(node.is_color_coded);
        assert_eq!(
            node.data_contexts,
            vec![
                ("Itemstrings.txt".to_string(), "Name".to_string()),
                ("Itemstrings.txt".to_string(), "Ubertip".to_string()),
            ]
        );
    }

    #[test]
    fn test_depsync_keeps_code_and_data_identical() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("war3map.j");
        let items = dir.path().join("Itemstrings.txt");
        let tokens = dir.path().join("tokens");
        let out = dir.path().join("synced");
        fs::write(&script, gbk(SCRIPT)).unwrap();
        fs::write(&items, ITEMS).unwrap();

        let config = EngineConfig::new()
            .with_detect_identifiers(false)
            .with_suspicious_policy(SuspiciousPolicy::Keep);
        let tokenizer = Tokenizer::with_defaults().unwrap().with_resolver(resolver());
        let mut catalog = IdentifierCatalog::default();
        extract_script(&script, &tokens, &config, &tokenizer, &mut catalog).unwrap();

        let artifacts = ScriptArtifacts::new(&script, &tokens);
        let records = load_records(&artifacts.records).unwrap();
        let texts: Vec<String> = records
            .iter()
            .map(|r| {
                if r.original == "奥达奇战刃" {
                    "Odachi Blade".to_string()
                } else {
                    r.original.clone()
                }
            })
            .collect();
        write_numbered(&artifacts.translations, &texts).unwrap();

        let mut backups = BackupManager::in_dir(dir.path().join("backups")).unwrap();
        let outcome = depsync(
            &script,
            &[items.clone()],
            &tokens,
            &out,
            &resolver(),
            Some(&mut backups),
        )
        .unwrap();
        assert_eq!(outcome.shared, 1);
        assert_eq!(outcome.synced, 1);
        assert_eq!(outcome.code_replacements, 1);
        assert_eq!(outcome.data_replacements, 2);
        assert_eq!(backups.created().len(), 2);

        let code = fs::read(out.join("war3map.j")).unwrap();
        assert_eq!(code, gbk(&SCRIPT.replace("奥达奇战刃", "Odachi Blade")));

        let data = fs::read_to_string(out.join("Itemstrings.txt")).unwrap();
        assert_eq!(
            data,
            "[I000]\nName=|c6fff0011Odachi Blade|r\nUbertip=装备Odachi Blade后攻击+10\n"
        );
    }

    #[test]
    fn test_single_line_translation() {
        assert_eq!(single_line(" a\r\nb\n\"c\" "), "a b 'c'");
    }
}
