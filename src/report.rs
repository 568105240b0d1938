//! 修改报告
//!
//! 回填时每一处替换都记录下来，写成便于人工核对的文本报告。

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::utils::write_atomic;

/// 一处替换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// 字符串序号（从1开始）
    pub ordinal: usize,
    pub byte_start: usize,
    pub byte_end: usize,
    pub line_number: usize,
    pub original: String,
    pub translation: String,
    pub context_before: String,
    pub context_after: String,
    pub auto_fixed: bool,
    pub fixes_applied: Vec<String>,
}

/// 生成报告文本
pub fn render_change_report(changes: &[ChangeRecord]) -> String {
    let rule = "=".repeat(80);
    let thin = "─".repeat(80);
    let auto_fixed = changes.iter().filter(|c| c.auto_fixed).count();
    let mut out = String::new();

    out.push_str(&format!("{}\n", rule));
    out.push_str("魔兽争霸III地图翻译修改报告\n");
    out.push_str(&format!("{}\n\n", rule));
    out.push_str(&format!("生成时间: {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&format!("修改总数: {}\n", changes.len()));
    if auto_fixed > 0 {
        out.push_str(&format!("自动修复: {}\n", auto_fixed));
    }
    out.push_str(&format!("\n{}\n\n", rule));

    for change in changes {
        out.push_str(&format!("字符串 #{}\n", change.ordinal));
        out.push_str(&format!("{}\n", thin));
        out.push_str(&format!("行号: {}\n", change.line_number));
        out.push_str(&format!("字节范围: {} - {}\n", change.byte_start, change.byte_end));
        if change.auto_fixed && !change.fixes_applied.is_empty() {
            out.push_str(&format!("✓ 自动修复: {}\n", change.fixes_applied.join(", ")));
        }
        out.push('\n');
        out.push_str(&format!("前文: ...{}\n", change.context_before));
        out.push_str(&format!("后文: {}...\n\n", change.context_after));
        out.push_str(&format!("原文:\n  {}\n\n", change.original));
        out.push_str(&format!("译文:\n  {}\n\n", change.translation));

        let orig_len = change.original.len() as i64;
        let trans_len = change.translation.len() as i64;
        out.push_str(&format!(
            "大小: {} → {} 字节 ({:+})\n",
            orig_len,
            trans_len,
            trans_len - orig_len
        ));
        out.push_str(&format!("\n{}\n\n", rule));
    }

    let total_orig: usize = changes.iter().map(|c| c.original.len()).sum();
    let total_trans: usize = changes.iter().map(|c| c.translation.len()).sum();
    out.push_str("汇总\n");
    out.push_str(&format!("{}\n", rule));
    out.push_str(&format!("修改字符串: {}\n", changes.len()));
    if auto_fixed > 0 {
        out.push_str(&format!("自动修复: {}\n", auto_fixed));
    }
    out.push_str(&format!("原文总大小: {} 字节\n", total_orig));
    out.push_str(&format!("译文总大小: {} 字节\n", total_trans));
    out.push_str(&format!("大小变化: {:+} 字节\n", total_trans as i64 - total_orig as i64));

    let lines: BTreeSet<usize> = changes.iter().map(|c| c.line_number).collect();
    out.push_str(&format!("\n涉及行数: {}\n", lines.len()));
    if lines.len() <= 20 {
        let list: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        out.push_str(&format!("行号: {}\n", list.join(", ")));
    } else if let (Some(first), Some(last)) = (lines.first(), lines.last()) {
        out.push_str(&format!("行号范围: {} - {}\n", first, last));
    }

    out
}

/// 写出报告
pub fn write_change_report(changes: &[ChangeRecord], path: &Path) -> Result<()> {
    write_atomic(path, render_change_report(changes).as_bytes())?;
    info!("📝 修改报告: {}", path.display());
    Ok(())
}
