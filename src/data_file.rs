//! 物编文本文件处理
//!
//! 文件由可选的 `[Section]` 节头和 `key=value` 或 `key = "value"` 记录组成。
//! 提取时把含中文的记录写成JSON和编号译文文件；回填时只改写这些记录所在的行，
//! 其余行连同行尾原样保留。

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::CodecResolver;
use crate::config::TermPolicy;
use crate::constants::data_config::CUSTOM_BOX_KEYS;
use crate::error::Result;
use crate::numbered::{load_numbered, ordered_translations, parse_numbered, write_numbered};
use crate::terms::TermMapper;
use crate::utils::{base_name, contains_cjk, generate_output_path, read_text_file, write_atomic};

/// 记录的书写格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// `key = "value"`
    Quoted,
    /// `key=value`
    Unquoted,
}

/// 一条键值记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    /// 行号（从1开始）
    pub line: usize,
    pub section: Option<String>,
    pub key: String,
    /// 记录值（不含引号）
    #[serde(rename = "original")]
    pub value: String,
    pub format: RecordFormat,
    /// 自定义框字段，回填时需要保持引号
    #[serde(default)]
    pub custom_box: bool,
}

/// 一个文件的回填结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataRewriteOutcome {
    pub output: PathBuf,
    /// 改写的记录数
    pub rewritten: usize,
    /// 补上引号的自定义框字段数
    pub custom_box_quoted: usize,
    /// 行内没找到原记录、整行重写的记录数
    pub fallback_lines: usize,
}

/// 记录行解析器
pub struct RecordParser {
    section: Regex,
    unquoted: Regex,
    quoted: Regex,
}

impl RecordParser {
    pub fn new() -> Result<Self> {
        let compile =
            |p: &str| Regex::new(p).map_err(|e| crate::engine_error!(config, p, e));
        Ok(Self {
            section: compile(r"^\[(\w+)\]$")?,
            unquoted: compile(r"^(\w+)=(.*)$")?,
            quoted: compile(r#"(\w+)\s*=\s*"([^"]*)""#)?,
        })
    }

    /// 解析全部记录
    pub fn parse(&self, content: &str, preserve_custom_boxes: bool) -> Vec<DataRecord> {
        let mut records = Vec::new();
        let mut section: Option<String> = None;

        for (idx, line) in content.split('\n').enumerate() {
            let line_no = idx + 1;
            let line = line.strip_suffix('\r').unwrap_or(line);
            let stripped = line.trim();
            if stripped.is_empty() {
                continue;
            }

            if let Some(caps) = self.section.captures(stripped) {
                section = Some(caps[1].to_string());
                continue;
            }

            let custom_box =
                |key: &str| preserve_custom_boxes && CUSTOM_BOX_KEYS.contains(&key);

            if let Some(caps) = self.unquoted.captures(stripped) {
                records.push(DataRecord {
                    line: line_no,
                    section: section.clone(),
                    key: caps[1].to_string(),
                    value: caps[2].to_string(),
                    format: RecordFormat::Unquoted,
                    custom_box: custom_box(&caps[1]),
                });
                continue;
            }

            for caps in self.quoted.captures_iter(line) {
                records.push(DataRecord {
                    line: line_no,
                    section: section.clone(),
                    key: caps[1].to_string(),
                    value: caps[2].to_string(),
                    format: RecordFormat::Quoted,
                    custom_box: custom_box(&caps[1]),
                });
            }
        }

        records
    }
}

/// 解析全部记录
pub fn parse_records(content: &str, preserve_custom_boxes: bool) -> Result<Vec<DataRecord>> {
    Ok(RecordParser::new()?.parse(content, preserve_custom_boxes))
}

/// 读取物编文本：优先按UTF-8，失败时交给编码识别
pub fn read_data_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(crate::engine_error!(missing, path.display()));
    }
    if let Ok(text) = read_text_file(path) {
        return Ok(text);
    }

    let bytes = std::fs::read(path)
        .map_err(|e| crate::engine_error!(file_op, path.display(), "读取", e))?;
    match CodecResolver::new().resolve(&bytes) {
        Some(decoded) => {
            warn!("⚠️  {} 不是UTF-8，按 {} 读取", path.display(), decoded.codec);
            Ok(decoded.text)
        }
        None => Err(crate::engine_error!(
            input_validation,
            path.display(),
            "无法识别文件编码"
        )),
    }
}

/// 提取产物路径：(`<文件名>.json`, `<文件名>_chinese.txt`)
pub fn artifact_paths(file: &Path, tokens_dir: &Path) -> (PathBuf, PathBuf) {
    let base = base_name(file);
    (
        tokens_dir.join(format!("{}.json", base)),
        tokens_dir.join(format!("{}_chinese.txt", base)),
    )
}

/// 提取一个物编文件中的中文记录，返回提取条数
pub fn extract_file(file: &Path, tokens_dir: &Path, preserve_custom_boxes: bool) -> Result<usize> {
    let content = read_data_file(file)?;
    let records: Vec<DataRecord> = parse_records(&content, preserve_custom_boxes)?
        .into_iter()
        .filter(|r| contains_cjk(&r.value))
        .collect();

    if records.is_empty() {
        warn!("⚠️  {} 中没有中文文本", file.display());
        return Ok(0);
    }

    let (json_path, text_path) = artifact_paths(file, tokens_dir);
    write_atomic(&json_path, serde_json::to_string_pretty(&records)?.as_bytes())?;
    let texts: Vec<String> = records.iter().map(|r| r.value.clone()).collect();
    write_numbered(&text_path, &texts)?;

    let custom_boxes = records.iter().filter(|r| r.custom_box).count();
    info!("✅ {}: 提取 {} 条", base_name(file), records.len());
    if custom_boxes > 0 {
        info!("   其中自定义框字段 {} 个", custom_boxes);
    }
    Ok(records.len())
}

/// 读取提取时保存的记录
pub fn load_records(json_path: &Path) -> Result<Vec<DataRecord>> {
    if !json_path.exists() {
        return Err(crate::engine_error!(missing, json_path.display()));
    }
    let content = read_text_file(json_path)?;
    Ok(serde_json::from_str(&content)?)
}

/// 回填译文：序号缺失时中止，空译文沿用原文，续行换成空格，再按术语策略处理
pub fn reinsert_file(
    file: &Path,
    tokens_dir: &Path,
    out_dir: &Path,
    policy: TermPolicy,
    mapper: &TermMapper,
) -> Result<DataRewriteOutcome> {
    let (json_path, text_path) = artifact_paths(file, tokens_dir);
    let records = load_records(&json_path)?;
    let entries = load_numbered(&text_path)?;
    let translations = ordered_translations(&entries, records.len())?;

    let finals: Vec<String> = records
        .iter()
        .zip(translations)
        .map(|(record, translation)| {
            if translation.trim().is_empty() {
                return record.value.clone();
            }
            let flat = translation.replace('\n', " ");
            mapper.apply(policy, &record.value, &flat)
        })
        .collect();

    rewrite_file(file, &records, &finals, out_dir)
}

/// 术语统一：有人工译文时统一其中的术语，没有时只替换原文中的术语
pub fn sync_file(
    file: &Path,
    tokens_dir: &Path,
    out_dir: &Path,
    mapper: &TermMapper,
) -> Result<DataRewriteOutcome> {
    let (json_path, text_path) = artifact_paths(file, tokens_dir);
    let records = load_records(&json_path)?;

    let entries = if text_path.exists() {
        parse_numbered(&read_text_file(&text_path)?)?
    } else {
        info!("ℹ️  {} 没有人工译文，只替换术语", base_name(file));
        Default::default()
    };

    let mut hybrid = 0;
    let finals: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| match entries.get(&(idx + 1)) {
            Some(manual) if !manual.trim().is_empty() => {
                let manual = manual.replace('\n', " ");
                let standardized = mapper.standardize(&record.value, &manual);
                if standardized != manual {
                    hybrid += 1;
                }
                standardized
            }
            _ => mapper.replace_terms(&record.value),
        })
        .collect();

    let outcome = rewrite_file(file, &records, &finals, out_dir)?;
    info!("   {} 个字段使用了混合译文", hybrid);
    Ok(outcome)
}

/// 按记录倒序改写行并整体写出
pub fn rewrite_file(
    file: &Path,
    records: &[DataRecord],
    finals: &[String],
    out_dir: &Path,
) -> Result<DataRewriteOutcome> {
    let content = read_data_file(file)?;
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let mut outcome = DataRewriteOutcome {
        output: generate_output_path(file, out_dir),
        ..Default::default()
    };

    for (record, translation) in records.iter().zip(finals).rev() {
        let Some(line) = lines.get_mut(record.line.wrapping_sub(1)) else {
            warn!("⚠️  第 {} 行超出文件范围，跳过", record.line);
            continue;
        };

        let (body, eol) = match line.strip_suffix('\r') {
            Some(body) => (body.to_string(), "\r"),
            None => (line.clone(), ""),
        };
        let rewritten = rewrite_line(&body, record, translation);
        if rewritten.fallback {
            outcome.fallback_lines += 1;
            warn!("⚠️  第 {} 行未匹配到原记录，整行重写", record.line);
        }
        if rewritten.quoted_custom_box {
            outcome.custom_box_quoted += 1;
        }
        *line = format!("{}{}", rewritten.text, eol);
        outcome.rewritten += 1;
    }

    write_atomic(&outcome.output, lines.join("\n").as_bytes())?;
    info!(
        "✅ {}: 改写 {} 条记录 → {}",
        base_name(file),
        outcome.rewritten,
        outcome.output.display()
    );
    Ok(outcome)
}

struct RewrittenLine {
    text: String,
    fallback: bool,
    quoted_custom_box: bool,
}

/// 改写一行中的一条记录
fn rewrite_line(line: &str, record: &DataRecord, translation: &str) -> RewrittenLine {
    let key = &record.key;
    let wants_quotes =
        record.custom_box && !translation.is_empty() && !translation.starts_with('"');

    match record.format {
        RecordFormat::Unquoted => {
            let indent_len = line.len() - line.trim_start().len();
            let indent = &line[..indent_len];
            let matched = line.trim_start().starts_with(&format!("{}=", key));
            let text = if wants_quotes {
                format!("{}{}=\"{}\"", indent, key, translation)
            } else {
                format!("{}{}={}", indent, key, translation)
            };
            RewrittenLine {
                text,
                fallback: !matched,
                quoted_custom_box: wants_quotes,
            }
        }
        RecordFormat::Quoted => {
            let safe = translation.replace('"', "'");
            let pattern = format!(r#"\b{}(\s*=\s*")([^"]*)""#, regex::escape(key));
            let found = Regex::new(&pattern).ok().and_then(|re| {
                re.captures_iter(line)
                    .find(|caps| &caps[2] == record.value)
                    .and_then(|caps| caps.get(2).map(|m| m.range()))
            });

            match found {
                Some(range) => {
                    let mut text = line.to_string();
                    text.replace_range(range, &safe);
                    RewrittenLine {
                        text,
                        fallback: false,
                        quoted_custom_box: false,
                    }
                }
                None => RewrittenLine {
                    text: format!("{}=\"{}\"", key, safe),
                    fallback: true,
                    quoted_custom_box: false,
                },
            }
        }
    }
}
