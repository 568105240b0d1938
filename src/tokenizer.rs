//! 脚本字符串扫描模块
//!
//! 单遍状态机扫描整段脚本字节，找出字符串字面量的边界并判断它是否是给玩家看的文本。
//! 策略是宁缺毋滥：漏掉一条可翻译文本可以接受，把代码当成文本改掉不可以。
//!
//! 状态：代码、行注释、块注释、字符串内；另有正交的 `globals` 块标记和函数嵌套计数。

use std::fmt;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::{Codec, CodecResolver};
use crate::config::{ScanRules, SuspiciousPolicy};
use crate::constants::jass_config::{
    ASSIGNMENT_LOOKBACK, FOURCC_PATTERN, IDENTIFIER_PATTERNS, JASS_ESCAPES, SUSPICIOUS_LOOKBACK,
    SUSPICIOUS_TOKENS, UI_LOOKBACK,
};
use crate::error::Result;
use crate::utils::contains_bytes;

/// 字符串所处的上下文分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// UI输出函数的参数
    Ui,
    /// 看起来像代码逻辑的一部分
    Suspicious,
    /// 其他
    General,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Ui => "ui",
            Context::Suspicious => "suspicious",
            Context::General => "general",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条提取出的字符串
///
/// `byte_start..byte_end` 是引号之间内容的半开区间。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedString {
    pub byte_start: usize,
    pub byte_end: usize,
    /// 未解码的原始字节
    pub raw: Vec<u8>,
    /// 解码并修复后的文本
    pub text: String,
    pub codec: Codec,
    pub context: Context,
}

/// 扫描选项，提取和回填时必须一致
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenizerOptions {
    pub restrict_ui: bool,
    pub suspicious_policy: SuspiciousPolicy,
}

impl TokenizerOptions {
    pub fn new(restrict_ui: bool, suspicious_policy: SuspiciousPolicy) -> Self {
        Self {
            restrict_ui,
            suspicious_policy,
        }
    }
}

/// 各类过滤原因的计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectCounts {
    pub too_short: usize,
    pub code_token: usize,
    pub identifier_shape: usize,
    pub not_ui: usize,
    pub suspicious: usize,
    pub undecodable: usize,
    pub blacklisted: usize,
}

impl RejectCounts {
    pub fn total(&self) -> usize {
        self.too_short
            + self.code_token
            + self.identifier_shape
            + self.not_ui
            + self.suspicious
            + self.undecodable
            + self.blacklisted
    }
}

/// 一次扫描的结果
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub strings: Vec<ExtractedString>,
    pub rejected: RejectCounts,
    /// 进入过的函数体数量
    pub functions: usize,
    /// 文件末尾有未闭合的字符串
    pub unterminated_string: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    LineComment,
    BlockComment,
    InString { start: usize },
}

/// 字面量过滤的结论
enum Verdict {
    Accept(ExtractedString),
    Reject(fn(&mut RejectCounts)),
}

/// 字符串扫描器
#[derive(Debug, Clone)]
pub struct Tokenizer {
    ui_funcs: Vec<Vec<u8>>,
    code_tokens: Vec<Vec<u8>>,
    identifier_patterns: Vec<Regex>,
    fourcc: Regex,
    rules: ScanRules,
    resolver: CodecResolver,
}

impl Tokenizer {
    /// 使用给定规则创建扫描器
    pub fn new(rules: &ScanRules) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| crate::engine_error!(config, pattern, e))
        };

        let identifier_patterns = IDENTIFIER_PATTERNS
            .iter()
            .map(|p| compile(*p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ui_funcs: rules.ui_funcs.iter().map(|s| s.as_bytes().to_vec()).collect(),
            code_tokens: rules.code_tokens.iter().map(|s| s.as_bytes().to_vec()).collect(),
            identifier_patterns,
            fourcc: compile(FOURCC_PATTERN)?,
            rules: rules.clone(),
            resolver: CodecResolver::new(),
        })
    }

    /// 使用内置规则创建扫描器
    pub fn with_defaults() -> Result<Self> {
        Self::new(&ScanRules::default())
    }

    /// 替换编码识别器
    pub fn with_resolver(mut self, resolver: CodecResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver(&self) -> &CodecResolver {
        &self.resolver
    }

    /// 扫描并只返回通过过滤的字符串
    pub fn scan(&self, data: &[u8], options: TokenizerOptions) -> Vec<ExtractedString> {
        self.scan_report(data, options).strings
    }

    /// 扫描整段脚本
    ///
    /// 输出按 `byte_start` 严格递增且互不重叠。未闭合的字符串和注释在文件末尾直接放弃。
    pub fn scan_report(&self, data: &[u8], options: TokenizerOptions) -> ScanReport {
        let mut report = ScanReport::default();
        let mut state = ScanState::Code;
        let mut in_globals = false;
        let mut function_depth: usize = 0;
        let n = data.len();
        let mut i = 0;

        while i < n {
            let b0 = data[i];
            let b1 = data.get(i + 1).copied();

            match state {
                ScanState::LineComment => {
                    if b0 == b'\n' {
                        state = ScanState::Code;
                    }
                    i += 1;
                }
                ScanState::BlockComment => {
                    if b0 == b'*' && b1 == Some(b'/') {
                        state = ScanState::Code;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                ScanState::InString { start } => {
                    if b0 == b'\\' {
                        // 已知转义占两个字节，其他反斜杠只吃掉自己
                        i += match b1 {
                            Some(next) if JASS_ESCAPES.contains(&next) => 2,
                            _ => 1,
                        };
                    } else if b0 == b'"' {
                        match self.judge(data, start, i, options) {
                            Verdict::Accept(found) => report.strings.push(found),
                            Verdict::Reject(count) => count(&mut report.rejected),
                        }
                        state = ScanState::Code;
                        i += 1;
                    } else {
                        i += 1;
                    }
                }
                ScanState::Code => {
                    if b0 == b'/' && b1 == Some(b'/') {
                        state = ScanState::LineComment;
                        i += 2;
                    } else if b0 == b'/' && b1 == Some(b'*') {
                        state = ScanState::BlockComment;
                        i += 2;
                    } else if !in_globals && is_word_at(data, i, b"globals") {
                        in_globals = true;
                        i += 7;
                    } else if in_globals && is_word_at(data, i, b"endglobals") {
                        in_globals = false;
                        i += 10;
                    } else if is_word_at(data, i, b"function") {
                        function_depth += 1;
                        report.functions += 1;
                        i += 8;
                    } else if is_word_at(data, i, b"endfunction") {
                        function_depth = function_depth.saturating_sub(1);
                        i += 11;
                    } else if b0 == b'"' {
                        // globals块中的默认值不是界面文本
                        if !in_globals {
                            state = ScanState::InString { start: i + 1 };
                        }
                        i += 1;
                    } else {
                        i += 1;
                    }
                }
            }
        }

        if matches!(state, ScanState::InString { .. }) {
            report.unterminated_string = true;
            debug!("文件末尾存在未闭合的字符串，已放弃");
        }
        if function_depth > 0 {
            trace!("文件末尾仍有 {} 层未闭合的函数", function_depth);
        }

        report
    }

    /// 对一个闭合的字面量依次做过滤、分类和解码
    fn judge(&self, data: &[u8], start: usize, end: usize, options: TokenizerOptions) -> Verdict {
        let raw = &data[start..end];

        if raw.len() < 2 {
            return Verdict::Reject(|c| c.too_short += 1);
        }

        if self.code_tokens.iter().any(|tok| contains_bytes(raw, tok)) {
            return Verdict::Reject(|c| c.code_token += 1);
        }

        if self.looks_like_code_identifier(raw) {
            return Verdict::Reject(|c| c.identifier_shape += 1);
        }

        let context = self.classify_context(data, start);

        if options.restrict_ui && context != Context::Ui {
            return Verdict::Reject(|c| c.not_ui += 1);
        }

        if context == Context::Suspicious && options.suspicious_policy == SuspiciousPolicy::Drop {
            return Verdict::Reject(|c| c.suspicious += 1);
        }

        match self.resolver.resolve(raw) {
            Some(decoded) if self.rules.is_blacklisted(&decoded.text) => {
                trace!("黑名单字符串: {}", decoded.text);
                Verdict::Reject(|c| c.blacklisted += 1)
            }
            Some(decoded) => Verdict::Accept(ExtractedString {
                byte_start: start,
                byte_end: end,
                raw: raw.to_vec(),
                text: decoded.text,
                codec: decoded.codec,
                context,
            }),
            None => {
                trace!("字节 {}..{} 无法解码为中文，跳过", start, end);
                Verdict::Reject(|c| c.undecodable += 1)
            }
        }
    }

    /// 字面量内容是否像代码标识符
    pub fn looks_like_code_identifier(&self, raw: &[u8]) -> bool {
        if self.identifier_patterns.iter().any(|re| re.is_match(raw)) {
            return true;
        }
        if self.fourcc.is_match(raw) {
            return true;
        }
        if raw.len() <= 3 && !raw.contains(&b' ') {
            return true;
        }
        is_upper_ascii(raw) && raw.contains(&b'_')
    }

    /// 根据字面量前方的代码判断上下文
    pub fn classify_context(&self, data: &[u8], start: usize) -> Context {
        let before = &data[start.saturating_sub(UI_LOOKBACK)..start];

        if self.ui_funcs.iter().any(|f| contains_bytes(before, f)) {
            return Context::Ui;
        }

        let near = tail(before, SUSPICIOUS_LOOKBACK);
        if SUSPICIOUS_TOKENS
            .iter()
            .any(|tok| contains_bytes(near, tok.as_bytes()))
        {
            return Context::Suspicious;
        }

        if tail(before, ASSIGNMENT_LOOKBACK).contains(&b'=') && contains_bytes(near, b"set ") {
            return Context::Suspicious;
        }

        Context::General
    }
}

fn tail(data: &[u8], len: usize) -> &[u8] {
    &data[data.len().saturating_sub(len)..]
}

/// 关键字是否在词边界上出现（不区分大小写）
pub fn is_word_at(data: &[u8], idx: usize, word: &[u8]) -> bool {
    let end = idx + word.len();
    if end > data.len() || !data[idx..end].eq_ignore_ascii_case(word) {
        return false;
    }
    let is_word_byte = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    if idx > 0 && is_word_byte(data[idx - 1]) {
        return false;
    }
    if end < data.len() && is_word_byte(data[end]) {
        return false;
    }
    true
}

/// 至少有一个大写字母且没有小写字母
fn is_upper_ascii(raw: &[u8]) -> bool {
    raw.iter().any(|b| b.is_ascii_uppercase()) && !raw.iter().any(|b| b.is_ascii_lowercase())
}
