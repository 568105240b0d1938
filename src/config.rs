//! 配置管理模块
//!
//! 提供CLI参数解析、引擎配置以及外部规则文件（`data/`目录）的加载

// 标准库导入
use std::path::{Path, PathBuf};

// 第三方crate导入
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{debug, warn};

// 本地模块导入
use crate::constants::{data_config, identifier_config, jass_config, service_config};
use crate::error::Result;
use crate::utils::read_text_file;

/// 术语处理策略，每次运行只能选一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TermPolicy {
    /// 不处理术语
    #[default]
    None,
    /// 保留模式：把译文中的标准译名换回原文术语
    Preserve,
    /// 混合模式：把原文术语和近义译法统一为标准译名
    Hybrid,
}

/// 可疑上下文中的字面量如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SuspiciousPolicy {
    /// 丢弃（默认，宁可漏提也不误改代码）
    #[default]
    Drop,
    /// 保留并标记为suspicious
    Keep,
}

/// 提取/回填引擎配置
///
/// 支持Builder模式进行链式配置。
///
/// # Examples
///
/// ```rust
/// use jass_translator::config::{EngineConfig, TermPolicy};
///
/// let config = EngineConfig::new()
///     .with_restrict_ui(true)
///     .with_write_utf8(true)
///     .with_term_policy(TermPolicy::Preserve);
/// assert!(config.restrict_ui());
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 只提取UI调用中的字符串
    restrict_ui: bool,
    /// 回填前自动修复换行、引号和控制字符
    auto_fix: bool,
    /// 以UTF-8（带BOM）写出脚本
    write_utf8: bool,
    /// 生成修改报告
    generate_report: bool,
    /// 术语策略
    term_policy: TermPolicy,
    /// 可疑上下文策略
    suspicious_policy: SuspiciousPolicy,
    /// 提取时检测系统标识符
    detect_identifiers: bool,
    /// 保留自定义框字段的引号
    preserve_custom_boxes: bool,
    /// 允许在文件哈希不一致时继续回填
    allow_hash_mismatch: bool,
    /// 源语言代码
    source_lang: String,
    /// 目标语言代码
    target_lang: String,
}

impl EngineConfig {
    /// 创建新的配置实例
    ///
    /// 默认值：全部字符串、自动修复开启、旧式编码输出、生成报告、不处理术语、
    /// 丢弃可疑字符串、检测标识符、保留自定义框、哈希不一致时中止。
    pub fn new() -> Self {
        Self {
            restrict_ui: false,
            auto_fix: true,
            write_utf8: false,
            generate_report: true,
            term_policy: TermPolicy::None,
            suspicious_policy: SuspiciousPolicy::Drop,
            detect_identifiers: true,
            preserve_custom_boxes: true,
            allow_hash_mismatch: false,
            source_lang: service_config::DEFAULT_SOURCE_LANG.to_string(),
            target_lang: service_config::DEFAULT_TARGET_LANG.to_string(),
        }
    }

    pub fn restrict_ui(&self) -> bool {
        self.restrict_ui
    }

    pub fn auto_fix(&self) -> bool {
        self.auto_fix
    }

    pub fn write_utf8(&self) -> bool {
        self.write_utf8
    }

    pub fn generate_report(&self) -> bool {
        self.generate_report
    }

    pub fn term_policy(&self) -> TermPolicy {
        self.term_policy
    }

    pub fn suspicious_policy(&self) -> SuspiciousPolicy {
        self.suspicious_policy
    }

    pub fn detect_identifiers(&self) -> bool {
        self.detect_identifiers
    }

    pub fn preserve_custom_boxes(&self) -> bool {
        self.preserve_custom_boxes
    }

    pub fn allow_hash_mismatch(&self) -> bool {
        self.allow_hash_mismatch
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    pub fn with_restrict_ui(mut self, restrict: bool) -> Self {
        self.restrict_ui = restrict;
        self
    }

    pub fn with_auto_fix(mut self, enable: bool) -> Self {
        self.auto_fix = enable;
        self
    }

    pub fn with_write_utf8(mut self, enable: bool) -> Self {
        self.write_utf8 = enable;
        self
    }

    pub fn with_generate_report(mut self, enable: bool) -> Self {
        self.generate_report = enable;
        self
    }

    pub fn with_term_policy(mut self, policy: TermPolicy) -> Self {
        self.term_policy = policy;
        self
    }

    pub fn with_suspicious_policy(mut self, policy: SuspiciousPolicy) -> Self {
        self.suspicious_policy = policy;
        self
    }

    pub fn with_detect_identifiers(mut self, enable: bool) -> Self {
        self.detect_identifiers = enable;
        self
    }

    pub fn with_preserve_custom_boxes(mut self, enable: bool) -> Self {
        self.preserve_custom_boxes = enable;
        self
    }

    pub fn with_allow_hash_mismatch(mut self, allow: bool) -> Self {
        self.allow_hash_mismatch = allow;
        self
    }

    pub fn with_languages(mut self, source: &str, target: &str) -> Self {
        self.source_lang = source.to_string();
        self.target_lang = target.to_string();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 扫描规则：UI函数、代码记号和黑名单
///
/// 默认取内置常量，`data/jass_patterns.json` 中出现的字段会覆盖对应默认值。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanRules {
    pub ui_funcs: Vec<String>,
    pub code_tokens: Vec<String>,
    pub blacklisted_strings: Vec<String>,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self {
            ui_funcs: jass_config::UI_FUNCS.iter().map(|s| s.to_string()).collect(),
            code_tokens: jass_config::CODE_TOKENS.iter().map(|s| s.to_string()).collect(),
            blacklisted_strings: Vec::new(),
        }
    }
}

impl ScanRules {
    /// 外部规则文件名
    pub const FILE_NAME: &'static str = "jass_patterns.json";

    /// 从规则目录加载；文件不存在时使用默认规则，文件损坏时报错
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(Self::FILE_NAME);
        if !path.exists() {
            debug!("未找到扫描规则文件，使用内置规则: {}", path.display());
            return Ok(Self::default());
        }

        let content = read_text_file(&path)?;
        let rules: ScanRules = serde_json::from_str(&content).map_err(|e| {
            crate::engine_error!(config, path.display(), format!("扫描规则解析失败: {}", e))
        })?;
        debug!(
            "已加载扫描规则: {} 个UI函数, {} 个代码记号, {} 个黑名单条目",
            rules.ui_funcs.len(),
            rules.code_tokens.len(),
            rules.blacklisted_strings.len()
        );
        Ok(rules)
    }

    /// 字符串是否在黑名单中
    pub fn is_blacklisted(&self, text: &str) -> bool {
        self.blacklisted_strings.iter().any(|s| s == text)
    }
}

/// 加载启动标识符表（术语 → 标准译名），保持文件中的顺序
///
/// 读取 `data/system_identifiers.json`，文件缺失、损坏或为空时回退到内置表。
pub fn load_bootstrap_identifiers(data_dir: &Path) -> Vec<(String, String)> {
    let builtin = || {
        identifier_config::DEFAULT_IDENTIFIERS
            .iter()
            .map(|(term, translation)| (term.to_string(), translation.to_string()))
            .collect::<Vec<_>>()
    };

    let path = data_dir.join("system_identifiers.json");
    if !path.exists() {
        return builtin();
    }

    let parsed = read_text_file(&path)
        .map_err(|e| e.to_string())
        .and_then(|content| {
            serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&content)
                .map_err(|e| e.to_string())
        });

    match parsed {
        Ok(map) => {
            let table: Vec<(String, String)> = map
                .into_iter()
                .filter_map(|(term, value)| value.as_str().map(|t| (term, t.to_string())))
                .collect();
            if table.is_empty() {
                builtin()
            } else {
                table
            }
        }
        Err(e) => {
            warn!("⚠️  加载系统标识符失败，使用内置表: {}", e);
            builtin()
        }
    }
}

/// CLI参数结构
#[derive(Parser)]
#[command(author, version, about = "魔兽争霸III地图文本提取与回填工具 - 字节级往返一致", long_about = None)]
pub struct Cli {
    /// 详细输出模式
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 静默模式 (仅输出错误)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// 显示运行统计
    #[arg(long, global = true)]
    pub stats: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// 子命令
#[derive(Subcommand)]
pub enum Command {
    /// 从脚本和物编文本中提取中文
    Extract(ExtractArgs),
    /// 把译文回填到脚本和物编文本
    Reinsert(ReinsertArgs),
    /// 只检测系统标识符并生成词典文件
    Identifiers(IdentifierArgs),
    /// 统一术语：脚本中替换标识符，物编文本使用混合译文
    SyncTerms(SyncArgs),
    /// 依赖同步：逻辑比较用到的字符串在脚本和物编中保持同一译文
    Depsync(SyncArgs),
    /// 调用翻译服务填写编号译文文件
    AutoTranslate(AutoTranslateArgs),
    /// 翻译战役文件（解包、翻译触发器字符串、重新打包）
    Campaign(CampaignArgs),
}

/// 输入文件参数
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// 脚本文件路径
    #[arg(long, default_value = data_config::DEFAULT_SCRIPT_FILE)]
    pub script: PathBuf,

    /// 物编文本文件（默认处理六个常用文件）
    #[arg(long = "data-file", value_name = "FILE")]
    pub data_files: Vec<PathBuf>,

    /// 外部规则目录
    #[arg(long, default_value = data_config::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// 备份目录
    #[arg(long, default_value = data_config::DEFAULT_BACKUP_DIR)]
    pub backup_dir: PathBuf,
}

impl InputArgs {
    /// 实际要处理的物编文本文件列表
    pub fn data_files(&self) -> Vec<PathBuf> {
        if self.data_files.is_empty() {
            data_config::DEFAULT_DATA_FILES.iter().map(PathBuf::from).collect()
        } else {
            self.data_files.clone()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// 提取产物输出目录
    #[arg(short, long, default_value = "chinese_tokens_folder")]
    pub out_dir: PathBuf,

    /// 只提取UI调用中的字符串
    #[arg(long)]
    pub restrict_ui: bool,

    /// 不检测系统标识符
    #[arg(long)]
    pub no_identifiers: bool,

    /// 不保留自定义框字段的引号
    #[arg(long)]
    pub no_custom_boxes: bool,

    /// 可疑上下文字符串的处理方式
    #[arg(long, value_enum, default_value_t = SuspiciousPolicy::Drop)]
    pub suspicious: SuspiciousPolicy,
}

#[derive(Args, Debug, Clone)]
pub struct ReinsertArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// 提取产物目录
    #[arg(short, long, default_value = "chinese_tokens_folder")]
    pub tokens_dir: PathBuf,

    /// 输出目录
    #[arg(short, long, default_value = "translated_files")]
    pub out_dir: PathBuf,

    /// 以UTF-8（带BOM）写出脚本
    #[arg(long)]
    pub utf8: bool,

    /// 关闭自动修复
    #[arg(long)]
    pub no_auto_fix: bool,

    /// 不生成修改报告
    #[arg(long)]
    pub no_report: bool,

    /// 术语处理策略
    #[arg(long, value_enum, default_value_t = TermPolicy::Preserve)]
    pub term_policy: TermPolicy,

    /// 可疑上下文字符串的处理方式（须与提取时一致）
    #[arg(long, value_enum, default_value_t = SuspiciousPolicy::Drop)]
    pub suspicious: SuspiciousPolicy,

    /// 文件哈希不一致时仍然继续
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IdentifierArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// 词典输出目录
    #[arg(short, long, default_value = "chinese_tokens_folder")]
    pub out_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// 提取产物目录
    #[arg(short, long, default_value = "chinese_tokens_folder")]
    pub tokens_dir: PathBuf,

    /// 输出目录
    #[arg(short, long, default_value = "synchronized_files")]
    pub out_dir: PathBuf,
}

/// 翻译服务参数
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// 翻译API地址
    #[arg(short, long, default_value = service_config::LOCAL_API_URL)]
    pub api: String,

    /// 源语言代码
    #[arg(long, default_value = service_config::DEFAULT_SOURCE_LANG)]
    pub source_lang: String,

    /// 目标语言代码
    #[arg(long, default_value = service_config::DEFAULT_TARGET_LANG)]
    pub target_lang: String,

    /// 批处理大小
    #[arg(long, default_value_t = service_config::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// 并发批次数量
    #[arg(long, default_value_t = service_config::DEFAULT_CONCURRENT_BATCHES)]
    pub concurrent_batches: usize,

    /// 最大尝试次数
    #[arg(long, default_value_t = service_config::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
}

#[derive(Args, Debug, Clone)]
pub struct AutoTranslateArgs {
    /// 编号译文文件（原地填写）
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    #[command(flatten)]
    pub service: ServiceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CampaignArgs {
    /// 战役文件路径 (.w3n)
    #[arg(short, long, value_name = "FILE")]
    pub campaign: PathBuf,

    /// 外部打包工具路径
    #[arg(long, default_value = "mpqcli")]
    pub archiver: PathBuf,

    /// 打包工具使用的文件列表
    #[arg(long)]
    pub listfile: Option<PathBuf>,

    /// 译后战役输出目录
    #[arg(short, long, default_value = "translated_campaigns")]
    pub out_dir: PathBuf,

    /// 备份目录
    #[arg(long, default_value = data_config::DEFAULT_BACKUP_DIR)]
    pub backup_dir: PathBuf,

    #[command(flatten)]
    pub service: ServiceArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_restrict_ui(true)
            .with_auto_fix(false)
            .with_term_policy(TermPolicy::Hybrid)
            .with_languages("zh", "ko");

        assert!(config.restrict_ui());
        assert!(!config.auto_fix());
        assert_eq!(config.term_policy(), TermPolicy::Hybrid);
        assert_eq!(config.suspicious_policy(), SuspiciousPolicy::Drop);
        assert_eq!(config.target_lang(), "ko");
        assert!(!config.allow_hash_mismatch());
    }

    #[test]
    fn test_scan_rules_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ScanRules::load(dir.path()).unwrap();
        assert!(rules.ui_funcs.iter().any(|f| f == "DisplayTextToPlayer"));
        assert!(rules.blacklisted_strings.is_empty());
    }

    #[test]
    fn test_scan_rules_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(ScanRules::FILE_NAME),
            r#"{"blacklisted_strings": ["测试用"]}"#,
        )
        .unwrap();

        let rules = ScanRules::load(dir.path()).unwrap();
        assert!(rules.is_blacklisted("测试用"));
        assert_eq!(rules.code_tokens.len(), jass_config::CODE_TOKENS.len());
    }

    #[test]
    fn test_bootstrap_identifiers_keep_file_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("system_identifiers.json"),
            r#"{"智力": "INT", "力量": "STR"}"#,
        )
        .unwrap();

        let table = load_bootstrap_identifiers(dir.path());
        assert_eq!(table[0], ("智力".to_string(), "INT".to_string()));
        assert_eq!(table[1], ("力量".to_string(), "STR".to_string()));
    }

    #[test]
    fn test_bootstrap_identifiers_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let table = load_bootstrap_identifiers(dir.path());
        assert_eq!(table.len(), identifier_config::DEFAULT_IDENTIFIERS.len());
        assert_eq!(table[0].0, "全属性");
    }

    #[test]
    fn test_cli_parses_reinsert() {
        let cli = Cli::parse_from([
            "jass-translator",
            "reinsert",
            "--utf8",
            "--force",
            "--term-policy",
            "hybrid",
        ]);
        match cli.command {
            Command::Reinsert(args) => {
                assert!(args.utf8);
                assert!(args.force);
                assert_eq!(args.term_policy, TermPolicy::Hybrid);
                assert_eq!(args.input.data_files().len(), 6);
            }
            _ => panic!("Wrong command"),
        }
    }
}
