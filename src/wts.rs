//! 触发器字符串文件（.wts）
//!
//! 格式为重复的块：
//!
//! ```text
//! STRING 12
//! // 可选注释
//! {
//! 文本，可以多行
//! }
//! ```

use std::path::Path;

use regex::Regex;
use tracing::{info, warn};

use crate::error::Result;
use crate::translator::{translate_all, BatchOptions, RetryPolicy, Translator};
use crate::utils::write_atomic;

/// 一个字符串块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WtsEntry {
    pub id: u32,
    pub text: String,
}

/// 解析文件内容，按出现顺序返回
pub fn parse_wts(content: &str) -> Result<Vec<WtsEntry>> {
    let block = Regex::new(r"(?s)STRING\s+(\d+)[ \t]*\r?\n(?:[ \t]*//[^\n]*\n)*\s*\{[ \t]*\r?\n(.*?)\r?\n\s*\}")
        .map_err(|e| crate::engine_error!(config, "wts_block", e))?;

    let mut entries = Vec::new();
    for caps in block.captures_iter(content) {
        let id = caps[1].parse::<u32>().map_err(|e| {
            crate::engine_error!(input_validation, &caps[1], format!("字符串编号无法解析: {}", e))
        })?;
        entries.push(WtsEntry {
            id,
            text: caps[2].trim().to_string(),
        });
    }
    Ok(entries)
}

/// 按编号排序写出
pub fn render_wts(entries: &[WtsEntry]) -> String {
    let mut sorted: Vec<&WtsEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.id);

    let mut out = String::new();
    for entry in sorted {
        out.push_str(&format!("STRING {}\n{{\n{}\n}}\n\n", entry.id, entry.text));
    }
    out
}

/// 读取文件；不是合法UTF-8时按有损方式读取
pub fn read_wts(path: &Path) -> Result<Vec<WtsEntry>> {
    if !path.exists() {
        return Err(crate::engine_error!(missing, path.display()));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| crate::engine_error!(file_op, path.display(), "读取", e))?;
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(&bytes);
    let content = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!("⚠️  {} 不是有效的UTF-8，按有损方式读取", path.display());
            String::from_utf8_lossy(bytes).into_owned()
        }
    };
    parse_wts(&content)
}

/// 翻译一个触发器字符串文件，返回翻译的字符串数
pub async fn translate_wts_file(
    path: &Path,
    output: &Path,
    translator: &dyn Translator,
    options: &BatchOptions,
    retry: &RetryPolicy,
) -> Result<usize> {
    let mut entries = read_wts(path)?;
    if entries.is_empty() {
        warn!("⚠️  {} 中没有字符串", path.display());
        return Ok(0);
    }
    info!("🔤 {}: {} 个字符串", path.display(), entries.len());

    let pending: Vec<usize> = (0..entries.len())
        .filter(|&idx| !entries[idx].text.trim().is_empty())
        .collect();
    let sources: Vec<String> = pending.iter().map(|&idx| entries[idx].text.clone()).collect();
    let translated = translate_all(translator, &sources, options, retry).await;
    for (idx, text) in pending.iter().zip(translated) {
        entries[*idx].text = text;
    }

    write_atomic(output, render_wts(&entries).as_bytes())?;
    info!("💾 已保存: {}", output.display());
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}STRING 2\r\n{\r\n第二章\r\n}\r\n\r\nSTRING 1\r\n// 地图名称\r\n{\r\n|cffffcc00第一章|r\r\n多行文本\r\n}\r\n";

    #[test]
    fn test_parse_wts() {
        let entries = parse_wts(SAMPLE.trim_start_matches('\u{feff}')).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], WtsEntry { id: 2, text: "第二章".to_string() });
        assert_eq!(entries[1].id, 1);
        assert_eq!(entries[1].text, "|cffffcc00第一章|r\r\n多行文本");
    }

    #[test]
    fn test_render_sorted() {
        let entries = vec![
            WtsEntry { id: 9, text: "b".to_string() },
            WtsEntry { id: 3, text: "a".to_string() },
        ];
        assert_eq!(render_wts(&entries), "STRING 3\n{\na\n}\n\nSTRING 9\n{\nb\n}\n\n");
        assert_eq!(parse_wts(&render_wts(&entries)).unwrap().len(), 2);
    }

    #[test]
    fn test_read_wts_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("war3map.wts");
        std::fs::write(&path, SAMPLE).unwrap();
        let entries = read_wts(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(read_wts(&dir.path().join("none.wts")).is_err());
    }
}
