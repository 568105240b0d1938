//! 脚本提取
//!
//! 扫描脚本，把通过过滤的字符串连同字节区间、编码和原始字节一起持久化，
//! 并写出供翻译填写的编号文件。提取时的内容哈希用于回填前校验脚本是否被改动。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{IdentifierCatalog, IdentifierDetector};
use crate::config::{EngineConfig, SuspiciousPolicy};
use crate::error::Result;
use crate::numbered::write_numbered;
use crate::tokenizer::{Context, ExtractedString, RejectCounts, Tokenizer, TokenizerOptions};
use crate::utils::{base_name, content_hash, hex_encode, read_text_file, write_atomic};

/// 元数据格式版本
pub const METADATA_VERSION: &str = "8.0";

/// 持久化的提取记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// 序号（从1开始）
    pub index: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    pub encoding: String,
    pub original: String,
    pub raw_hex: String,
    pub length: usize,
    pub context: Context,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains_identifiers: Vec<String>,
}

impl TokenRecord {
    fn from_extracted(index: usize, found: &ExtractedString, identifiers: Vec<String>) -> Self {
        Self {
            index,
            byte_start: found.byte_start,
            byte_end: found.byte_end,
            encoding: found.codec.label().to_string(),
            original: found.text.clone(),
            raw_hex: hex_encode(&found.raw),
            length: found.raw.len(),
            context: found.context,
            contains_identifiers: identifiers,
        }
    }
}

/// 提取时的元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub file_hash: String,
    pub file_size: usize,
    pub string_count: usize,
    pub restrict_ui: bool,
    /// 提取时保留了可疑上下文的字符串
    #[serde(default)]
    pub keep_suspicious: bool,
    pub extraction_date: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    METADATA_VERSION.to_string()
}

impl ExtractionMetadata {
    /// 回填时重新扫描要使用的选项
    pub fn tokenizer_options(&self) -> TokenizerOptions {
        let policy = if self.keep_suspicious {
            SuspiciousPolicy::Keep
        } else {
            SuspiciousPolicy::Drop
        };
        TokenizerOptions::new(self.restrict_ui, policy)
    }
}

/// 一个脚本对应的提取产物路径
#[derive(Debug, Clone)]
pub struct ScriptArtifacts {
    pub records: PathBuf,
    pub metadata: PathBuf,
    pub translations: PathBuf,
    pub identifiers: PathBuf,
}

impl ScriptArtifacts {
    pub fn new(script: &Path, tokens_dir: &Path) -> Self {
        let base = base_name(script);
        Self {
            records: tokens_dir.join(format!("{}.json", base)),
            metadata: tokens_dir.join(format!("{}_metadata.json", base)),
            translations: tokens_dir.join(format!("{}_chinese.txt", base)),
            identifiers: tokens_dir.join(format!("{}_identifiers.txt", base)),
        }
    }
}

/// 一次脚本提取的结果
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub string_count: usize,
    pub rejected: RejectCounts,
    pub functions: usize,
    /// 上下文分布
    pub contexts: BTreeMap<Context, usize>,
    /// 编码分布
    pub codecs: BTreeMap<String, usize>,
    /// 含有目录术语的字符串数
    pub with_identifiers: usize,
    /// 新检测到的术语数
    pub new_identifiers: usize,
}

/// 提取脚本中的字符串
///
/// `catalog` 在检测开启时会并入新发现的术语，并把词典文件写到 `tokens_dir`。
pub fn extract_script(
    script: &Path,
    tokens_dir: &Path,
    config: &EngineConfig,
    tokenizer: &Tokenizer,
    catalog: &mut IdentifierCatalog,
) -> Result<ExtractionOutcome> {
    if !script.exists() {
        return Err(crate::engine_error!(missing, script.display()));
    }
    let data = std::fs::read(script)
        .map_err(|e| crate::engine_error!(file_op, script.display(), "读取", e))?;

    let file_hash = content_hash(&data);
    info!("📄 {}: {} 字节, SHA256 {}...", base_name(script), data.len(), &file_hash[..16]);

    let mut outcome = ExtractionOutcome::default();

    if config.detect_identifiers() {
        let detector = IdentifierDetector::new()?;
        let summary = catalog.detect(&data, &detector, tokenizer.resolver());
        outcome.new_identifiers = summary.new_terms;
        catalog.write_files(tokens_dir, script)?;
    }

    let options = TokenizerOptions::new(config.restrict_ui(), config.suspicious_policy());
    let report = tokenizer.scan_report(&data, options);
    outcome.rejected = report.rejected.clone();
    outcome.functions = report.functions;

    if report.strings.is_empty() {
        warn!("⚠️  {} 中没有找到中文字符串", script.display());
    }

    let mut records = Vec::with_capacity(report.strings.len());
    let mut identifier_lines = Vec::new();
    for (idx, found) in report.strings.iter().enumerate() {
        let ordinal = idx + 1;
        let terms: Vec<String> = catalog
            .terms_in(&found.text)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !terms.is_empty() {
            identifier_lines.push(format!("{}. {}", ordinal, terms.join(", ")));
        }

        *outcome.contexts.entry(found.context).or_default() += 1;
        *outcome
            .codecs
            .entry(found.codec.label().to_string())
            .or_default() += 1;

        records.push(TokenRecord::from_extracted(ordinal, found, terms));
    }
    outcome.string_count = records.len();
    outcome.with_identifiers = identifier_lines.len();

    let metadata = ExtractionMetadata {
        file_hash,
        file_size: data.len(),
        string_count: records.len(),
        restrict_ui: config.restrict_ui(),
        keep_suspicious: config.suspicious_policy() == SuspiciousPolicy::Keep,
        extraction_date: chrono::Local::now().to_rfc3339(),
        version: default_version(),
    };

    let artifacts = ScriptArtifacts::new(script, tokens_dir);
    write_atomic(&artifacts.records, serde_json::to_string_pretty(&records)?.as_bytes())?;
    write_atomic(&artifacts.metadata, serde_json::to_string_pretty(&metadata)?.as_bytes())?;
    let texts: Vec<String> = records
        .iter()
        .map(|r| r.original.replace('\r', "\\r").replace('\n', "\\n"))
        .collect();
    write_numbered(&artifacts.translations, &texts)?;

    if !identifier_lines.is_empty() {
        let mut content = String::from("# 含有系统标识符的字符串（序号. 术语）\n");
        for line in &identifier_lines {
            content.push_str(line);
            content.push('\n');
        }
        write_atomic(&artifacts.identifiers, content.as_bytes())?;
    }

    info!(
        "✅ 提取 {} 个中文字符串, 过滤 {} 个, 其中 {} 个含系统标识符",
        outcome.string_count,
        outcome.rejected.total(),
        outcome.with_identifiers
    );
    Ok(outcome)
}

/// 读取提取记录
pub fn load_records(path: &Path) -> Result<Vec<TokenRecord>> {
    if !path.exists() {
        return Err(crate::engine_error!(missing, path.display()));
    }
    let content = read_text_file(path)?;
    let records: Vec<TokenRecord> = serde_json::from_str(&content)?;
    Ok(records)
}

/// 读取提取元数据，文件不存在时返回None
pub fn load_metadata(path: &Path) -> Result<Option<ExtractionMetadata>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = read_text_file(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}
