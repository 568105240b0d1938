use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::warn;

/// 初始化日志系统
pub fn init_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// 验证输入文件
pub fn validate_input_file(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("输入文件不存在: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("输入路径不是文件: {}", path.display());
    }

    if let Some(ext) = path.extension() {
        if ext != "j" && ext != "txt" && ext != "wts" {
            warn!("⚠️  文件扩展名不常见: {}", ext.to_string_lossy());
        }
    }

    Ok(())
}

/// 生成输出文件路径: 输出目录 + 输入文件名
pub fn generate_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let name = input.file_name().unwrap_or_default();
    output_dir.join(name)
}

/// 取文件名（不含目录），用作提取产物的前缀
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 计算内容的SHA-256摘要（小写十六进制）
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex_encode(&digest)
}

/// 十六进制编码
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// 十六进制解码，非法输入返回None
pub fn hex_decode(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

/// 统计换行字节数量
pub fn count_newlines(data: &[u8]) -> usize {
    data.iter().filter(|&&b| b == b'\n').count()
}

/// 字节偏移转行号（从1开始）
pub fn line_number_at(data: &[u8], offset: usize) -> usize {
    let end = offset.min(data.len());
    count_newlines(&data[..end]) + 1
}

/// 取偏移前后的上下文文本，换行以转义形式显示
pub fn context_around(data: &[u8], offset: usize, context_size: usize) -> (String, String) {
    let offset = offset.min(data.len());
    let start = offset.saturating_sub(context_size);
    let end = (offset + context_size).min(data.len());

    let render = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .replace('\n', "\\n")
            .replace('\r', "\\r")
    };

    let before = render(&data[start..offset]);
    let after = render(&data[offset..end]);

    let before_chars: Vec<char> = before.chars().collect();
    let before_tail: String = before_chars[before_chars.len().saturating_sub(60)..]
        .iter()
        .collect();
    let after_head: String = after.chars().take(60).collect();

    (before_tail, after_head)
}

/// 字节串中查找子串，返回首次出现的位置
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// 字节串是否包含子串
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    find_bytes(haystack, needle).is_some()
}

/// 字节串中的非重叠替换，返回新内容和替换次数
pub fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> (Vec<u8>, usize) {
    if from.is_empty() {
        return (haystack.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut count = 0;
    let mut cursor = 0;
    while let Some(pos) = find_bytes(&haystack[cursor..], from) {
        out.extend_from_slice(&haystack[cursor..cursor + pos]);
        out.extend_from_slice(to);
        cursor += pos + from.len();
        count += 1;
    }
    out.extend_from_slice(&haystack[cursor..]);
    (out, count)
}

/// 是否为目标文字（CJK统一表意文字、扩展A、兼容表意文字）
pub fn is_cjk_char(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{f900}'..='\u{faff}')
}

/// 文本是否包含目标文字
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

/// 基本汉字区（U+4E00..U+9FFF）字符计数
pub fn han_count(text: &str) -> usize {
    text.chars()
        .filter(|c| matches!(c, '\u{4e00}'..='\u{9fff}'))
        .count()
}

/// 读取UTF-8文本文件，去掉BOM
pub fn read_text_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("读取文件失败: {}", path.display()))?;
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(&bytes);
    String::from_utf8(bytes.to_vec())
        .with_context(|| format!("文件不是有效的UTF-8: {}", path.display()))
}

/// 整体写入文件：先写临时文件再改名，失败时目标文件保持原样
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建输出目录失败: {}", parent.display()))?;
        }
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".partial");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, content)
        .with_context(|| format!("写入临时文件失败: {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!("替换输出文件失败: {} -> {}", temp_path.display(), path.display())
    })?;

    Ok(())
}
