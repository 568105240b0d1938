use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

use jass_translator::archiver::ExternalArchiver;
use jass_translator::backup::BackupManager;
use jass_translator::campaign::translate_campaign;
use jass_translator::catalog::{IdentifierCatalog, IdentifierDetector};
use jass_translator::codec::CodecResolver;
use jass_translator::config::{
    load_bootstrap_identifiers, AutoTranslateArgs, CampaignArgs, Cli, Command, EngineConfig,
    ExtractArgs, IdentifierArgs, InputArgs, ReinsertArgs, ScanRules, ServiceArgs, SyncArgs,
};
use jass_translator::data_file;
use jass_translator::dependency::depsync;
use jass_translator::error::EngineError;
use jass_translator::extraction::extract_script;
use jass_translator::reinsertion::Reinserter;
use jass_translator::stats::{format_duration, print_distribution, print_run_stats, RunStats};
use jass_translator::terms::TermMapper;
use jass_translator::tokenizer::Tokenizer;
use jass_translator::translator::{
    auto_translate_file, BatchOptions, HttpTranslator, RetryPolicy,
};
use jass_translator::utils::{generate_output_path, init_logging, validate_input_file, write_atomic};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志系统
    init_logging(cli.verbose, cli.quiet);

    let total_start = Instant::now();
    let mut stats = RunStats::new();

    let result = match &cli.command {
        Command::Extract(args) => run_extract(args, &mut stats, cli.stats || cli.verbose),
        Command::Reinsert(args) => run_reinsert(args, &mut stats),
        Command::Identifiers(args) => run_identifiers(args, &mut stats),
        Command::SyncTerms(args) => run_sync_terms(args, &mut stats),
        Command::Depsync(args) => run_depsync(args, &mut stats),
        Command::AutoTranslate(args) => run_auto_translate(args, &mut stats).await,
        Command::Campaign(args) => run_campaign(args, &mut stats).await,
    };

    match result {
        Ok(()) => {
            let total_duration = total_start.elapsed();
            if !cli.quiet {
                info!("✅ 完成！总耗时: {}", format_duration(total_duration));
            }
            if cli.stats || cli.verbose {
                print_run_stats(&stats, total_duration);
            }
        }
        Err(e) => {
            error!("❌ 执行失败: {:#}", e);
            if let Some(EngineError::HashMismatch { .. }) = e.downcast_ref::<EngineError>() {
                error!("   源文件在提取后被修改；确认无误后使用 --force 继续");
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

/// 加载扫描规则并创建扫描器
fn build_tokenizer(input: &InputArgs) -> Result<Tokenizer> {
    let rules = ScanRules::load(&input.data_dir)?;
    Ok(Tokenizer::new(&rules)?)
}

/// 词典目录中有词典时重载，否则使用启动表
fn load_catalog(tokens_dir: &Path, data_dir: &Path) -> IdentifierCatalog {
    match IdentifierCatalog::reload_from_dir(tokens_dir) {
        Ok(catalog) => {
            info!("📚 已加载词典: {} 个术语", catalog.len());
            catalog
        }
        Err(e) => {
            warn!("⚠️  {}，使用内置标识符表", e);
            IdentifierCatalog::bootstrap(&load_bootstrap_identifiers(data_dir))
        }
    }
}

fn run_extract(args: &ExtractArgs, stats: &mut RunStats, show_distribution: bool) -> Result<()> {
    let script = &args.input.script;
    validate_input_file(script)?;
    info!("🚀 开始提取: {}", script.display());
    info!("📂 输出目录: {}", args.out_dir.display());

    let started = Instant::now();
    let config = EngineConfig::new()
        .with_restrict_ui(args.restrict_ui)
        .with_suspicious_policy(args.suspicious)
        .with_detect_identifiers(!args.no_identifiers)
        .with_preserve_custom_boxes(!args.no_custom_boxes);
    let tokenizer = build_tokenizer(&args.input)?;
    let mut catalog =
        IdentifierCatalog::bootstrap(&load_bootstrap_identifiers(&args.input.data_dir));
    stats.record_stage("配置加载", started);

    let started = Instant::now();
    let outcome = extract_script(script, &args.out_dir, &config, &tokenizer, &mut catalog)?;
    stats.record_stage("脚本提取", started);
    stats.files_processed += 1;
    stats.input_size += std::fs::metadata(script).map(|m| m.len() as usize).unwrap_or(0);
    stats.strings_found += outcome.string_count;

    let started = Instant::now();
    for file in args.input.data_files() {
        if !file.exists() {
            info!("ℹ️  跳过不存在的物编文件: {}", file.display());
            continue;
        }
        match data_file::extract_file(&file, &args.out_dir, config.preserve_custom_boxes()) {
            Ok(count) => {
                stats.files_processed += 1;
                stats.strings_found += count;
            }
            Err(e) => {
                error!("❌ {} 提取失败: {}", file.display(), e);
                stats.files_failed += 1;
            }
        }
    }
    stats.record_stage("物编提取", started);

    if show_distribution {
        print_distribution("上下文分布", &outcome.contexts);
        print_distribution("编码分布", &outcome.codecs);
    }
    Ok(())
}

fn run_reinsert(args: &ReinsertArgs, stats: &mut RunStats) -> Result<()> {
    let script = &args.input.script;
    info!("🚀 开始回填: {}", script.display());
    info!("📂 输出目录: {}", args.out_dir.display());

    let started = Instant::now();
    let config = EngineConfig::new()
        .with_auto_fix(!args.no_auto_fix)
        .with_write_utf8(args.utf8)
        .with_generate_report(!args.no_report)
        .with_term_policy(args.term_policy)
        .with_suspicious_policy(args.suspicious)
        .with_allow_hash_mismatch(args.force);
    let tokenizer = build_tokenizer(&args.input)?;
    let catalog = load_catalog(&args.tokens_dir, &args.input.data_dir);
    let mapper = TermMapper::from_catalog(&catalog);
    let mut backup = BackupManager::in_dir(&args.input.backup_dir)?;
    stats.record_stage("配置加载", started);

    let started = Instant::now();
    let reinserter = Reinserter::new(&config, &tokenizer, &mapper);
    let outcome =
        reinserter.reinsert_file(script, &args.tokens_dir, &args.out_dir, Some(&mut backup))?;
    stats.record_stage("脚本回填", started);
    stats.files_processed += 1;
    stats.input_size += std::fs::metadata(script).map(|m| m.len() as usize).unwrap_or(0);
    stats.output_size += std::fs::metadata(&outcome.output)
        .map(|m| m.len() as usize)
        .unwrap_or(0);
    stats.strings_found += outcome.replaced + outcome.identity;
    stats.strings_replaced += outcome.replaced;
    stats.warnings += outcome.warning_count();

    info!(
        "   替换 {} 个, 原样 {} 个, 自动修复 {} 个, 警告 {} 条",
        outcome.replaced,
        outcome.identity,
        outcome.auto_fixed,
        outcome.warning_count()
    );
    if let Some(report) = &outcome.report {
        info!("📝 修改报告: {}", report.display());
    }

    let started = Instant::now();
    for file in args.input.data_files() {
        let (json_path, _) = data_file::artifact_paths(&file, &args.tokens_dir);
        if !file.exists() || !json_path.exists() {
            continue;
        }
        let output = generate_output_path(&file, &args.out_dir);
        if output.exists() {
            backup.backup_file(&output)?;
        }
        match data_file::reinsert_file(
            &file,
            &args.tokens_dir,
            &args.out_dir,
            config.term_policy(),
            &mapper,
        ) {
            Ok(result) => {
                info!("✅ {}: 改写 {} 条", file.display(), result.rewritten);
                stats.files_processed += 1;
                stats.strings_replaced += result.rewritten;
                stats.warnings += result.fallback_lines;
            }
            // 单个物编文件缺少产物时继续处理其余文件
            Err(EngineError::MissingInputFile { path }) => {
                warn!("⚠️  缺少 {}，跳过 {}", path, file.display());
                stats.files_failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    stats.record_stage("物编回填", started);
    Ok(())
}

fn run_identifiers(args: &IdentifierArgs, stats: &mut RunStats) -> Result<()> {
    let script = &args.input.script;
    validate_input_file(script)?;

    let started = Instant::now();
    let data = std::fs::read(script)
        .with_context(|| format!("读取脚本失败: {}", script.display()))?;
    let detector = IdentifierDetector::new()?;
    let mut catalog =
        IdentifierCatalog::bootstrap(&load_bootstrap_identifiers(&args.input.data_dir));
    let summary = catalog.detect(&data, &detector, &CodecResolver::new());
    catalog.write_files(&args.out_dir, script)?;
    stats.record_stage("标识符检测", started);

    stats.files_processed += 1;
    stats.input_size += data.len();
    stats.strings_found += summary.new_terms;
    info!("📚 目录共 {} 个术语, 新检测 {} 个", catalog.len(), summary.new_terms);
    Ok(())
}

fn run_sync_terms(args: &SyncArgs, stats: &mut RunStats) -> Result<()> {
    let started = Instant::now();
    let catalog = IdentifierCatalog::reload_from_dir(&args.tokens_dir)?;
    let mapper = TermMapper::from_catalog(&catalog);
    let mut backup = BackupManager::in_dir(&args.input.backup_dir)?;
    stats.record_stage("词典加载", started);

    let started = Instant::now();
    let script = &args.input.script;
    if script.exists() {
        let data = std::fs::read(script)
            .with_context(|| format!("读取脚本失败: {}", script.display()))?;
        let (content, count) = catalog.replace_in_bytes(&data);
        let output = generate_output_path(script, &args.out_dir);
        if output.exists() {
            backup.backup_file(&output)?;
        }
        write_atomic(&output, &content)?;
        info!("✅ {}: 替换术语 {} 处", output.display(), count);
        stats.files_processed += 1;
        stats.input_size += data.len();
        stats.output_size += content.len();
        stats.strings_replaced += count;
    } else {
        warn!("⚠️  脚本不存在，跳过: {}", script.display());
    }
    stats.record_stage("脚本术语替换", started);

    let started = Instant::now();
    for file in args.input.data_files() {
        let (json_path, _) = data_file::artifact_paths(&file, &args.tokens_dir);
        if !file.exists() || !json_path.exists() {
            continue;
        }
        let output = generate_output_path(&file, &args.out_dir);
        if output.exists() {
            backup.backup_file(&output)?;
        }
        let result = data_file::sync_file(&file, &args.tokens_dir, &args.out_dir, &mapper)?;
        info!("✅ {}: 改写 {} 条", result.output.display(), result.rewritten);
        stats.files_processed += 1;
        stats.strings_replaced += result.rewritten;
    }
    stats.record_stage("物编术语统一", started);
    Ok(())
}

fn run_depsync(args: &SyncArgs, stats: &mut RunStats) -> Result<()> {
    let started = Instant::now();
    let tokenizer = build_tokenizer(&args.input)?;
    let mut backup = BackupManager::in_dir(&args.input.backup_dir)?;
    let data_files: Vec<_> = args
        .input
        .data_files()
        .into_iter()
        .filter(|f| f.exists())
        .collect();

    let outcome = depsync(
        &args.input.script,
        &data_files,
        &args.tokens_dir,
        &args.out_dir,
        tokenizer.resolver(),
        Some(&mut backup),
    )?;
    stats.record_stage("依赖同步", started);

    stats.files_processed += outcome.outputs.len();
    stats.strings_found += outcome.shared;
    stats.strings_replaced += outcome.code_replacements + outcome.data_replacements;
    stats.warnings += outcome.missing;
    info!(
        "🔗 共享字符串 {} 个, 同步 {} 个, 缺少译文 {} 个",
        outcome.shared, outcome.synced, outcome.missing
    );
    Ok(())
}

/// 由命令行参数构造翻译服务、批处理选项和重试策略
fn build_service(service: &ServiceArgs) -> Result<(HttpTranslator, BatchOptions, RetryPolicy)> {
    let translator = HttpTranslator::new(&service.api)?;
    let options = BatchOptions {
        source_lang: service.source_lang.clone(),
        target_lang: service.target_lang.clone(),
        batch_size: service.batch_size,
        concurrent_batches: service.concurrent_batches,
        ..Default::default()
    };
    let retry = RetryPolicy {
        max_attempts: service.max_attempts,
        ..Default::default()
    };
    info!("🌐 翻译服务: {}", service.api);
    Ok((translator, options, retry))
}

async fn run_auto_translate(args: &AutoTranslateArgs, stats: &mut RunStats) -> Result<()> {
    validate_input_file(&args.file)?;

    let started = Instant::now();
    let (translator, options, retry) = build_service(&args.service)?;
    stats.record_stage("翻译器初始化", started);

    let started = Instant::now();
    let outcome = auto_translate_file(&args.file, &translator, &options, &retry).await?;
    stats.record_stage("翻译执行", started);

    stats.files_processed += 1;
    stats.strings_found += outcome.total;
    stats.strings_replaced += outcome.changed;
    stats.warnings += outcome.submitted - outcome.changed;
    Ok(())
}

async fn run_campaign(args: &CampaignArgs, stats: &mut RunStats) -> Result<()> {
    let started = Instant::now();
    let (translator, options, retry) = build_service(&args.service)?;
    let archiver = ExternalArchiver::new(&args.archiver).with_listfile(args.listfile.clone());
    let mut backup = BackupManager::in_dir(&args.backup_dir)?;
    stats.record_stage("初始化", started);

    let started = Instant::now();
    let outcome = translate_campaign(
        &args.campaign,
        &archiver,
        &translator,
        &options,
        &retry,
        &mut backup,
        &args.out_dir,
    )
    .await?;
    stats.record_stage("战役翻译", started);

    stats.files_processed += 1 + outcome.maps_processed;
    stats.files_failed += outcome.maps_failed.len();
    stats.strings_found += outcome.campaign_strings + outcome.map_strings;
    info!(
        "🏁 战役字符串 {} 个, 地图 {} 张 ({} 个字符串), 失败 {} 张",
        outcome.campaign_strings,
        outcome.maps_processed,
        outcome.map_strings,
        outcome.maps_failed.len()
    );
    info!("📦 输出: {}", outcome.output.display());
    Ok(())
}
