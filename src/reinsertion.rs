//! 脚本回填
//!
//! 对一份脚本和一组编号译文依次执行：
//! `Load → Verify → Normalize → ValidateCount → Encode → Write → Report`。
//! `Write` 之前的任何致命问题都会中止，磁盘上不会留下部分结果。

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::codec::Codec;
use crate::config::EngineConfig;
use crate::constants::codec_config::LEGACY_PUNCTUATION;
use crate::error::{EngineError, Result};
use crate::extraction::{load_metadata, load_records, ScriptArtifacts, TokenRecord};
use crate::numbered::{load_numbered, ordered_translations};
use crate::report::{write_change_report, ChangeRecord};
use crate::terms::TermMapper;
use crate::tokenizer::{Tokenizer, TokenizerOptions};
use crate::utils::{
    base_name, content_hash, context_around, count_newlines, generate_output_path,
    line_number_at, write_atomic,
};

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// 报告中前后文的字节窗口
const REPORT_CONTEXT_BYTES: usize = 100;

/// 回填阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Verify,
    Normalize,
    ValidateCount,
    Encode,
    Write,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "LOAD",
            Stage::Verify => "VERIFY",
            Stage::Normalize => "NORMALIZE",
            Stage::ValidateCount => "VALIDATE_COUNT",
            Stage::Encode => "ENCODE",
            Stage::Write => "WRITE",
            Stage::Report => "REPORT",
        };
        f.write_str(name)
    }
}

/// 自动修复：换行转义、引号转义、去掉控制字符
///
/// 返回修复后的文本和每一类修复的说明。
pub fn auto_fix(text: &str) -> (String, Vec<String>) {
    let mut fixes = Vec::new();

    let crlf = text.matches("\r\n").count();
    let line_breaks = text.chars().filter(|c| *c == '\n' || *c == '\r').count() - crlf;
    let mut result = text
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
        .replace('\r', "\\n");
    if line_breaks > 0 {
        fixes.push(format!("转换换行 {} 处", line_breaks));
    }

    let mut quotes = 0;
    let mut escaped = String::with_capacity(result.len());
    let mut prev: Option<char> = None;
    for c in result.chars() {
        if c == '"' && prev != Some('\\') {
            escaped.push('\\');
            quotes += 1;
        }
        escaped.push(c);
        prev = Some(c);
    }
    result = escaped;
    if quotes > 0 {
        fixes.push(format!("转义引号 {} 处", quotes));
    }

    let before = result.chars().count();
    result.retain(|c| c >= ' ' || c == '\t');
    let removed = before - result.chars().count();
    if removed > 0 {
        fixes.push(format!("移除控制字符 {} 个", removed));
    }

    (result, fixes)
}

/// 把目标编码无法表示的Unicode标点换成ASCII近似，返回替换次数
pub fn sanitize_for_codec(text: &str, codec: Codec) -> (String, usize) {
    if codec.is_utf8() {
        return (text.to_string(), 0);
    }

    let mut out = String::with_capacity(text.len());
    let mut replaced = 0;
    for c in text.chars() {
        match LEGACY_PUNCTUATION.iter().find(|(from, _)| *from == c) {
            Some((_, to)) if !codec.can_encode(c) => {
                out.push_str(to);
                replaced += 1;
            }
            _ => out.push(c),
        }
    }
    (out, replaced)
}

/// 换行以转义形式出现时的文本，与编号文件的写法一致
fn escape_line_breaks(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

/// 规范化之后的一条译文
#[derive(Debug, Clone)]
struct Normalized {
    /// 术语处理之后、自动修复之前
    candidate: String,
    /// 最终文本
    text: String,
    fixes: Vec<String>,
}

/// 重建后的脚本内容
#[derive(Debug, Clone, Default)]
pub struct Rebuilt {
    pub output: Vec<u8>,
    pub changes: Vec<ChangeRecord>,
    /// 原样写回的字符串数
    pub identity: usize,
    /// 译文为空、沿用原文的序号
    pub empty_fallbacks: Vec<usize>,
    /// 有损编码的序号
    pub lossy: Vec<usize>,
    /// 做过自动修复的字符串数
    pub auto_fixed: usize,
}

/// 一次回填的结果
#[derive(Debug, Clone)]
pub struct ReinsertOutcome {
    pub output: PathBuf,
    pub replaced: usize,
    pub identity: usize,
    pub empty_fallbacks: Vec<usize>,
    pub lossy: Vec<usize>,
    pub auto_fixed: usize,
    pub hash_mismatch: bool,
    /// 换行数量不一致时为 (输入, 输出)
    pub newline_delta: Option<(usize, usize)>,
    pub report: Option<PathBuf>,
}

impl ReinsertOutcome {
    /// 警告总数
    pub fn warning_count(&self) -> usize {
        self.empty_fallbacks.len()
            + self.lossy.len()
            + usize::from(self.hash_mismatch)
            + usize::from(self.newline_delta.is_some())
    }
}

/// 回填引擎
pub struct Reinserter<'a> {
    config: &'a EngineConfig,
    tokenizer: &'a Tokenizer,
    mapper: &'a TermMapper,
}

impl<'a> Reinserter<'a> {
    pub fn new(config: &'a EngineConfig, tokenizer: &'a Tokenizer, mapper: &'a TermMapper) -> Self {
        Self {
            config,
            tokenizer,
            mapper,
        }
    }

    /// 回填一个脚本文件
    ///
    /// 输出写到 `out_dir` 下的同名文件；给出备份管理器时，写入前先备份源文件和已存在的输出文件。
    pub fn reinsert_file(
        &self,
        script: &Path,
        tokens_dir: &Path,
        out_dir: &Path,
        backup: Option<&mut BackupManager>,
    ) -> Result<ReinsertOutcome> {
        debug!("阶段: {}", Stage::Load);
        if !script.exists() {
            return Err(crate::engine_error!(missing, script.display()));
        }
        let artifacts = ScriptArtifacts::new(script, tokens_dir);
        let records = load_records(&artifacts.records)?;
        let metadata = load_metadata(&artifacts.metadata)?;
        let entries = load_numbered(&artifacts.translations)?;
        let translations = ordered_translations(&entries, records.len())?;
        let data = std::fs::read(script)
            .map_err(|e| crate::engine_error!(file_op, script.display(), "读取", e))?;

        debug!("阶段: {}", Stage::Verify);
        let mut hash_mismatch = false;
        let options = match &metadata {
            Some(metadata) => {
                let actual = content_hash(&data);
                if actual != metadata.file_hash {
                    if !self.config.allow_hash_mismatch() {
                        return Err(EngineError::HashMismatch {
                            expected: metadata.file_hash.clone(),
                            actual,
                        });
                    }
                    warn!("⚠️  {} 在提取后被修改过，按要求继续回填", script.display());
                    hash_mismatch = true;
                }
                metadata.tokenizer_options()
            }
            None => {
                warn!("⚠️  缺少提取元数据，跳过哈希校验: {}", artifacts.metadata.display());
                TokenizerOptions::new(self.config.restrict_ui(), self.config.suspicious_policy())
            }
        };

        let rebuilt = self.rebuild(&data, &records, &translations, options)?;

        debug!("阶段: {}", Stage::Write);
        let output = generate_output_path(script, out_dir);
        if let Some(manager) = backup {
            manager.backup_file(script)?;
            if output != script && output.exists() {
                manager.backup_file(&output)?;
            }
        }
        write_atomic(&output, &rebuilt.output)?;
        info!("✅ 已写出: {}", output.display());

        let mut newline_delta = None;
        if self.config.auto_fix() {
            let before = count_newlines(&data);
            let after = count_newlines(&rebuilt.output);
            if before != after {
                warn!("⚠️  换行数量不一致: 输入 {} 行, 输出 {} 行", before, after);
                newline_delta = Some((before, after));
            }
        }

        debug!("阶段: {}", Stage::Report);
        let report = if self.config.generate_report() && !rebuilt.changes.is_empty() {
            let path = out_dir.join(format!("{}_changes.txt", base_name(script)));
            write_change_report(&rebuilt.changes, &path)?;
            Some(path)
        } else {
            None
        };

        Ok(ReinsertOutcome {
            output,
            replaced: rebuilt.changes.len(),
            identity: rebuilt.identity,
            empty_fallbacks: rebuilt.empty_fallbacks,
            lossy: rebuilt.lossy,
            auto_fixed: rebuilt.auto_fixed,
            hash_mismatch,
            newline_delta,
            report,
        })
    }

    /// 在内存中重建脚本，不触碰磁盘
    ///
    /// `translations[i]` 对应第 i+1 个字符串；`records` 提供提取时的原文和编码。
    pub fn rebuild(
        &self,
        data: &[u8],
        records: &[TokenRecord],
        translations: &[String],
        options: TokenizerOptions,
    ) -> Result<Rebuilt> {
        let mut rebuilt = Rebuilt::default();

        debug!("阶段: {}", Stage::Normalize);
        let normalized: Vec<Normalized> = translations
            .iter()
            .enumerate()
            .map(|(idx, translation)| {
                let original = records.get(idx).map(|r| r.original.as_str()).unwrap_or("");
                self.normalize(idx + 1, original, translation, &mut rebuilt)
            })
            .collect();

        debug!("阶段: {}", Stage::ValidateCount);
        let spans = self.tokenizer.scan(data, options);
        if spans.len() != normalized.len() {
            return Err(EngineError::CountMismatch {
                expected: spans.len(),
                found: normalized.len(),
            });
        }

        debug!("阶段: {}", Stage::Encode);
        let mut output = Vec::with_capacity(data.len() + data.len() / 4);
        if self.config.write_utf8() && !data.starts_with(UTF8_BOM) {
            output.extend_from_slice(UTF8_BOM);
        }

        let mut cursor = 0;
        for (idx, (span, item)) in spans.iter().zip(normalized).enumerate() {
            let ordinal = idx + 1;
            output.extend_from_slice(&data[cursor..span.byte_start]);
            cursor = span.byte_end;

            let unchanged = item.candidate == span.text
                || item.candidate == escape_line_breaks(&span.text);
            if unchanged && !self.config.write_utf8() {
                output.extend_from_slice(&span.raw);
                rebuilt.identity += 1;
                continue;
            }

            let codec = self.target_codec(records.get(idx));
            let (text, punctuation) = sanitize_for_codec(&item.text, codec);
            let mut fixes = item.fixes;
            if punctuation > 0 {
                fixes.push(format!("替换标点 {} 处", punctuation));
            }

            let bytes = match codec.encode_strict(&text) {
                Some(bytes) => bytes,
                None => {
                    let (bytes, dropped) = codec.encode_lossy(&text);
                    warn!(
                        "⚠️  字符串 #{} 有 {} 无法表示的字符，已丢弃: {:?}",
                        ordinal, codec, dropped
                    );
                    rebuilt.lossy.push(ordinal);
                    bytes
                }
            };
            output.extend_from_slice(&bytes);

            if !fixes.is_empty() {
                rebuilt.auto_fixed += 1;
            }
            if unchanged {
                rebuilt.identity += 1;
                continue;
            }

            let (context_before, _) = context_around(data, span.byte_start, REPORT_CONTEXT_BYTES);
            let (_, context_after) = context_around(data, span.byte_end, REPORT_CONTEXT_BYTES);
            rebuilt.changes.push(ChangeRecord {
                ordinal,
                byte_start: span.byte_start,
                byte_end: span.byte_end,
                line_number: line_number_at(data, span.byte_start),
                original: span.text.clone(),
                translation: text,
                context_before,
                context_after,
                auto_fixed: !fixes.is_empty(),
                fixes_applied: fixes,
            });
        }
        output.extend_from_slice(&data[cursor..]);
        rebuilt.output = output;

        info!(
            "🔄 替换 {} 个字符串, 原样保留 {} 个",
            rebuilt.changes.len(),
            rebuilt.identity
        );
        if !rebuilt.empty_fallbacks.is_empty() {
            warn!("⚠️  {} 条译文为空，已沿用原文", rebuilt.empty_fallbacks.len());
        }
        Ok(rebuilt)
    }

    fn normalize(
        &self,
        ordinal: usize,
        original: &str,
        translation: &str,
        rebuilt: &mut Rebuilt,
    ) -> Normalized {
        let translation = if translation.trim().is_empty() {
            rebuilt.empty_fallbacks.push(ordinal);
            original
        } else {
            translation
        };

        let candidate = self
            .mapper
            .apply(self.config.term_policy(), original, translation);

        let (text, fixes) = if self.config.auto_fix() {
            auto_fix(&candidate)
        } else {
            (candidate.clone(), Vec::new())
        };

        Normalized {
            candidate,
            text,
            fixes,
        }
    }

    /// UTF-8输出优先，其次是提取时记录的编码，最后是默认旧式编码
    fn target_codec(&self, record: Option<&TokenRecord>) -> Codec {
        if self.config.write_utf8() {
            return Codec::utf8();
        }
        record
            .and_then(|r| Codec::from_label(&r.encoding))
            .unwrap_or_else(Codec::default_legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IdentifierCatalog;
    use crate::codec::CodecResolver;
    use crate::config::TermPolicy;
    use crate::extraction::extract_script;
    use crate::numbered::write_numbered;
    use std::fs;

    fn gbk(text: &str) -> Vec<u8> {
        encoding_rs::GBK.encode(text).0.into_owned()
    }

    fn tokenizer() -> Tokenizer {
        Tokenizer::with_defaults()
            .unwrap()
            .with_resolver(CodecResolver::new().without_detector())
    }

    const SCRIPT: &str = "function Init takes nothing returns nothing\n\
    call DisplayTextToPlayer(p, 0, 0, \"你的力量提升了\")\n\
    call BJDebugMsg(\"第一行\\n第二行\")\n\
    call DisplayTimedTextToPlayer(p, 0, 0, 5, \"任务完成\")\n\
endfunction\n";

    struct Fixture {
        dir: tempfile::TempDir,
        script: PathBuf,
        tokens: PathBuf,
        out: PathBuf,
    }

    fn extracted(source: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("war3map.j");
        fs::write(&script, gbk(source)).unwrap();
        let tokens = dir.path().join("tokens");
        let config = EngineConfig::new().with_detect_identifiers(false);
        let mut catalog = IdentifierCatalog::default();
        extract_script(&script, &tokens, &config, &tokenizer(), &mut catalog).unwrap();
        let out = dir.path().join("out");
        Fixture {
            dir,
            script,
            tokens,
            out,
        }
    }

    fn translations_path(f: &Fixture) -> PathBuf {
        ScriptArtifacts::new(&f.script, &f.tokens).translations
    }

    #[test]
    fn test_auto_fix() {
        let (text, fixes) = auto_fix("a\r\nb\nc \"q\" \\\"ok\\\" \u{7}end");
        assert_eq!(text, "a\\nb\\nc \\\"q\\\" \\\"ok\\\" end");
        assert_eq!(
            fixes,
            vec!["转换换行 2 处", "转义引号 2 处", "移除控制字符 1 个"]
        );

        let (clean, none) = auto_fix("plain\ttext");
        assert_eq!(clean, "plain\ttext");
        assert!(none.is_empty());
    }

    #[test]
    fn test_sanitize_only_unencodable() {
        let cp1252 = Codec::from_label("windows-1252").unwrap();
        let (text, count) = sanitize_for_codec("a\u{2192}b\u{2026}", cp1252);
        assert_eq!(text, "a->b\u{2026}");
        assert_eq!(count, 1);

        let (same, zero) = sanitize_for_codec("a\u{2192}b", Codec::utf8());
        assert_eq!(same, "a\u{2192}b");
        assert_eq!(zero, 0);
    }

    #[test]
    fn test_identity_round_trip_is_byte_identical() {
        let f = extracted(SCRIPT);
        let config = EngineConfig::new();
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let outcome = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap();

        assert_eq!(fs::read(&outcome.output).unwrap(), fs::read(&f.script).unwrap());
        assert_eq!(outcome.replaced, 0);
        assert_eq!(outcome.identity, 3);
        assert!(outcome.report.is_none());
        assert!(outcome.newline_delta.is_none());
    }

    #[test]
    fn test_surrounding_whitespace_survives_round_trip() {
        let source = "function Init takes nothing returns nothing\n    \
call DisplayTextToPlayer(p, 0, 0, \"  你好勇士\")\n    \
call BJDebugMsg(\"\t任务完成  \")\n\
endfunction\n";
        let f = extracted(source);
        let config = EngineConfig::new();
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let outcome = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap();

        assert_eq!(fs::read(&outcome.output).unwrap(), gbk(source));
        assert_eq!(outcome.identity, 2);
        assert_eq!(outcome.replaced, 0);
        assert!(outcome.empty_fallbacks.is_empty());
    }

    #[test]
    fn test_short_translation_file_aborts() {
        let f = extracted(SCRIPT);
        write_numbered(
            &translations_path(&f),
            &["Your power increased".to_string(), "line one".to_string()],
        )
        .unwrap();

        let config = EngineConfig::new();
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let err = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CountMismatch { expected: 3, found: 2 }
        ));
        assert!(!f.out.join("war3map.j").exists());
        assert!(!f.out.join("war3map.j.partial").exists());
    }

    #[test]
    fn test_newline_count_change_is_reported() {
        let source = "function Init takes nothing returns nothing\n    \
call BJDebugMsg(\"第一行\n第二行\")\n\
endfunction\n";
        let f = extracted(source);
        fs::write(translations_path(&f), "1. Line one and line two\n").unwrap();

        let config = EngineConfig::new();
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let outcome = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap();

        assert!(outcome.output.exists());
        assert_eq!(outcome.replaced, 1);
        assert_eq!(outcome.newline_delta, Some((4, 3)));
        assert!(outcome.warning_count() >= 1);
        let written = fs::read(&outcome.output).unwrap();
        assert_eq!(
            written,
            gbk(&source.replace("第一行\n第二行", "Line one and line two"))
        );
    }

    #[test]
    fn test_translated_strings_are_replaced() {
        let f = extracted(SCRIPT);
        write_numbered(
            &translations_path(&f),
            &[
                "Your power increased".to_string(),
                "line one\nline two".to_string(),
                String::new(),
            ],
        )
        .unwrap();

        let config = EngineConfig::new();
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let mut backups = BackupManager::in_dir(f.dir.path().join("backups")).unwrap();
        let outcome = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, Some(&mut backups))
            .unwrap();

        let written = fs::read(&outcome.output).unwrap();
        let expected = SCRIPT
            .replace("你的力量提升了", "Your power increased")
            .replace("第一行\\n第二行", "line one\\nline two");
        assert_eq!(written, gbk(&expected));
        assert_eq!(outcome.replaced, 2);
        assert_eq!(outcome.empty_fallbacks, vec![3]);
        assert_eq!(outcome.auto_fixed, 1);
        assert!(outcome.newline_delta.is_none());
        assert!(outcome.report.as_ref().unwrap().exists());
        assert_eq!(backups.created().len(), 1);
    }

    #[test]
    fn test_preserve_policy_restores_terms() {
        let f = extracted(SCRIPT);
        write_numbered(
            &translations_path(&f),
            &[
                "Your STR increased".to_string(),
                "第一行\\n第二行".to_string(),
                "任务完成".to_string(),
            ],
        )
        .unwrap();

        let config = EngineConfig::new().with_term_policy(TermPolicy::Preserve);
        let tok = tokenizer();
        let mapper = TermMapper::new(vec![("力量".to_string(), "STR".to_string())]);
        let outcome = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap();

        let written = fs::read(&outcome.output).unwrap();
        assert_eq!(written, gbk(&SCRIPT.replace("你的力量提升了", "Your 力量 increased")));
    }

    #[test]
    fn test_count_mismatch_writes_nothing() {
        let f = extracted(SCRIPT);
        let changed = SCRIPT.replace(
            "endfunction",
            "    call BJDebugMsg(\"新增的一行\")\nendfunction",
        );
        fs::write(&f.script, gbk(&changed)).unwrap();

        let tok = tokenizer();
        let mapper = TermMapper::default();

        let strict = EngineConfig::new();
        let err = Reinserter::new(&strict, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::HashMismatch { .. }));

        let forced = EngineConfig::new().with_allow_hash_mismatch(true);
        let err = Reinserter::new(&forced, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap_err();
        match err {
            EngineError::CountMismatch { expected, found } => {
                assert_eq!(expected, 4);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!f.out.join("war3map.j").exists());
        assert!(!f.out.join("war3map.j.partial").exists());
    }

    #[test]
    fn test_missing_translation_file() {
        let f = extracted(SCRIPT);
        fs::remove_file(translations_path(&f)).unwrap();
        let config = EngineConfig::new();
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let err = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingInputFile { .. }));
    }

    #[test]
    fn test_lossy_encoding_is_a_warning() {
        let tok = tokenizer();
        let data = gbk("call BJDebugMsg(\"你好世界\")\n");
        let spans = tok.scan(&data, TokenizerOptions::default());
        assert_eq!(spans.len(), 1);

        let record = TokenRecord {
            index: 1,
            byte_start: spans[0].byte_start,
            byte_end: spans[0].byte_end,
            encoding: "gbk".to_string(),
            original: spans[0].text.clone(),
            raw_hex: String::new(),
            length: spans[0].raw.len(),
            context: spans[0].context,
            contains_identifiers: Vec::new(),
        };

        let config = EngineConfig::new();
        let mapper = TermMapper::default();
        let rebuilt = Reinserter::new(&config, &tok, &mapper)
            .rebuild(
                &data,
                &[record],
                &["Hi \u{1f600}".to_string()],
                TokenizerOptions::default(),
            )
            .unwrap();
        assert_eq!(rebuilt.output, b"call BJDebugMsg(\"Hi \")\n");
        assert_eq!(rebuilt.lossy, vec![1]);
    }

    #[test]
    fn test_utf8_output_gets_bom() {
        let f = extracted(SCRIPT);
        let config = EngineConfig::new().with_write_utf8(true);
        let tok = tokenizer();
        let mapper = TermMapper::default();
        let outcome = Reinserter::new(&config, &tok, &mapper)
            .reinsert_file(&f.script, &f.tokens, &f.out, None)
            .unwrap();

        let written = fs::read(&outcome.output).unwrap();
        assert!(written.starts_with(UTF8_BOM));
        assert_eq!(&written[3..], SCRIPT.as_bytes());
    }
}
