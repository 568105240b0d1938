//! 编号译文文件
//!
//! 格式为重复的 `序号. 文本` 块，文本可以跨多个物理行，直到下一个以数字序号开头的行。
//! 序号是与提取记录之间的连接键，回填前必须按序号校验完整性。

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::utils::{read_text_file, write_atomic};

/// 解析编号译文文本，续行以换行符拼接
///
/// 序号后只吃掉一个分隔空格，首行文本的前后空白原样保留。
pub fn parse_numbered(content: &str) -> Result<BTreeMap<usize, String>> {
    let line_re = Regex::new(r"^(\d+)\. ?(.*)$")
        .map_err(|e| crate::engine_error!(config, "numbered_line_pattern", e))?;

    let mut entries = BTreeMap::new();
    let mut current: Option<(usize, Vec<String>)> = None;

    for line in content.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(caps) = line_re.captures(line) {
            let ordinal = caps[1].parse::<usize>().map_err(|e| {
                crate::engine_error!(input_validation, &caps[1], format!("序号无法解析: {}", e))
            })?;
            if let Some((number, parts)) = current.take() {
                insert_entry(&mut entries, number, parts);
            }
            current = Some((ordinal, vec![caps[2].to_string()]));
        } else if let Some((_, parts)) = current.as_mut() {
            if !line.trim().is_empty() {
                parts.push(line.trim_end().to_string());
            }
        }
    }

    if let Some((number, parts)) = current {
        insert_entry(&mut entries, number, parts);
    }

    Ok(entries)
}

fn insert_entry(entries: &mut BTreeMap<usize, String>, ordinal: usize, parts: Vec<String>) {
    if entries.insert(ordinal, parts.join("\n")).is_some() {
        warn!("⚠️  译文文件中序号 {} 重复，使用最后一条", ordinal);
    }
}

/// 读取编号译文文件，文件不存在时报缺少输入
pub fn load_numbered(path: &Path) -> Result<BTreeMap<usize, String>> {
    if !path.exists() {
        return Err(crate::engine_error!(missing, path.display()));
    }
    let content = read_text_file(path)?;
    let entries = parse_numbered(&content)?;
    debug!("读取编号译文 {} 条: {}", entries.len(), path.display());
    Ok(entries)
}

/// 写出编号文本，序号从1开始
pub fn write_numbered(path: &Path, texts: &[String]) -> Result<()> {
    let mut content = String::new();
    for (idx, text) in texts.iter().enumerate() {
        content.push_str(&format!("{}. {}\n", idx + 1, text));
    }
    write_atomic(path, content.as_bytes())?;
    Ok(())
}

/// 按序号 1..=expected 排出译文
///
/// 超出范围的序号视为输入错误；任何一个序号缺失都按数量不一致中止，不写任何文件。
/// 出现但为空的条目不算缺失，由回填阶段沿用原文。
pub fn ordered_translations(
    entries: &BTreeMap<usize, String>,
    expected: usize,
) -> Result<Vec<String>> {
    if let Some(&unknown) = entries.keys().find(|&&k| k == 0 || k > expected) {
        return Err(crate::engine_error!(
            input_validation,
            format!("序号 {}", unknown),
            format!("提取记录只有 {} 条", expected)
        ));
    }

    let missing: Vec<usize> = (1..=expected)
        .filter(|ordinal| !entries.contains_key(ordinal))
        .collect();
    if !missing.is_empty() {
        warn!("⚠️  缺少 {} 条译文: {:?}", missing.len(), preview(&missing));
        return Err(EngineError::CountMismatch {
            expected,
            found: entries.len(),
        });
    }

    Ok((1..=expected)
        .filter_map(|ordinal| entries.get(&ordinal).cloned())
        .collect())
}

fn preview(ordinals: &[usize]) -> &[usize] {
    &ordinals[..ordinals.len().min(10)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiline_blocks() {
        let content = "1. 第一行\r\n2. Line one\ncontinued here  \n\n3. \n";
        let entries = parse_numbered(content).unwrap();
        assert_eq!(entries[&1], "第一行");
        assert_eq!(entries[&2], "Line one\ncontinued here");
        assert_eq!(entries[&3], "");
    }

    #[test]
    fn test_leading_and_trailing_whitespace_is_kept() {
        let entries = parse_numbered("1.   你好勇士\n2. \t任务完成  \n3.紧贴序号\n").unwrap();
        assert_eq!(entries[&1], "  你好勇士");
        assert_eq!(entries[&2], "\t任务完成  ");
        assert_eq!(entries[&3], "紧贴序号");
    }

    #[test]
    fn test_text_before_first_ordinal_is_ignored() {
        let entries = parse_numbered("header\n1. text\n").unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_missing_ordinal_is_a_count_mismatch() {
        let entries = parse_numbered("1. a\n3. c\n").unwrap();
        let err = ordered_translations(&entries, 3).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CountMismatch { expected: 3, found: 2 }
        ));

        let blank = parse_numbered("1. a\n2. \n3. c\n").unwrap();
        assert_eq!(ordered_translations(&blank, 3).unwrap(), vec!["a", "", "c"]);
    }

    #[test]
    fn test_unknown_ordinal_is_rejected() {
        let entries = parse_numbered("1. a\n5. e\n").unwrap();
        let err = ordered_translations(&entries, 2).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::InputValidation { .. }));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("war3map.j_chinese.txt");
        write_numbered(&path, &["你好".to_string(), "再见".to_string()]).unwrap();
        let entries = load_numbered(&path).unwrap();
        assert_eq!(entries[&2], "再见");

        let missing = load_numbered(&dir.path().join("none.txt")).unwrap_err();
        assert!(matches!(missing, crate::error::EngineError::MissingInputFile { .. }));
    }
}
