use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// 一次运行的统计
#[derive(Debug, Default)]
pub struct RunStats {
    /// 各阶段耗时，按记录顺序
    pub stages: Vec<(String, Duration)>,
    pub files_processed: usize,
    pub files_failed: usize,
    pub input_size: usize,
    pub output_size: usize,
    pub strings_found: usize,
    pub strings_replaced: usize,
    pub warnings: usize,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个阶段的耗时
    pub fn record_stage(&mut self, name: &str, started: Instant) {
        self.stages.push((name.to_string(), started.elapsed()));
    }

    /// 执行一个阶段并记录耗时
    pub fn time<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let result = f();
        self.record_stage(name, started);
        result
    }
}

/// 打印运行统计
pub fn print_run_stats(stats: &RunStats, total_duration: Duration) {
    println!("\n📊 运行统计报告:");
    println!("═══════════════════════════════════════");

    // 时间分解
    println!("⏱️  时间分解:");
    for (name, duration) in &stats.stages {
        println!("   {}: {}", name, format_duration(*duration));
    }
    println!("   总耗时: {}", format_duration(total_duration));

    println!("\n📁 文件统计:");
    println!("   处理文件: {} 个", stats.files_processed);
    if stats.files_failed > 0 {
        println!("   失败文件: {} 个", stats.files_failed);
    }
    if stats.input_size > 0 {
        println!(
            "   输入大小: {} 字节 ({:.1} KB)",
            stats.input_size,
            stats.input_size as f64 / 1024.0
        );
        println!(
            "   输出大小: {} 字节 ({:.1} KB)",
            stats.output_size,
            stats.output_size as f64 / 1024.0
        );
    }

    println!("\n🔤 字符串统计:");
    println!("   发现字符串: {} 个", stats.strings_found);
    println!("   替换字符串: {} 个", stats.strings_replaced);
    println!("   警告: {} 条", stats.warnings);

    if stats.input_size > 0 && total_duration.as_secs_f64() > 0.0 {
        println!("\n🚀 性能指标:");
        println!(
            "   处理速度: {:.1} KB/s",
            stats.input_size as f64 / 1024.0 / total_duration.as_secs_f64()
        );
    }
    println!("═══════════════════════════════════════");
}

/// 打印分布（上下文、编码等）
pub fn print_distribution<K: std::fmt::Display>(title: &str, counts: &BTreeMap<K, usize>) {
    if counts.is_empty() {
        return;
    }
    let total: usize = counts.values().sum();
    println!("\n📈 {}:", title);
    for (key, count) in counts {
        println!(
            "   {}: {} ({:.1}%)",
            key,
            count,
            *count as f64 / total as f64 * 100.0
        );
    }
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }

    #[test]
    fn test_time_records_stage() {
        let mut stats = RunStats::new();
        let value = stats.time("扫描", || 42);
        assert_eq!(value, 42);
        assert_eq!(stats.stages.len(), 1);
        assert_eq!(stats.stages[0].0, "扫描");
    }
}
