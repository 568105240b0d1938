//! 战役包翻译流程
//!
//! 解包战役 → 翻译 war3campaign.wts → 逐个解包内嵌地图并翻译 war3map.wts →
//! 重新打包地图 → 重新打包战役。单张地图失败只记录，不中断整个战役。

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::archiver::Archiver;
use crate::backup::BackupManager;
use crate::error::Result;
use crate::translator::{BatchOptions, RetryPolicy, Translator};
use crate::wts::translate_wts_file;

const CAMPAIGN_STRINGS_FILE: &str = "war3campaign.wts";
const MAP_STRINGS_FILE: &str = "war3map.wts";
const MAP_EXTENSIONS: &[&str] = &["w3x", "w3m"];
const CAMPAIGN_CONTEXT: &str = "Warcraft III Campaign Text";

/// 战役处理结果
#[derive(Debug, Clone, Default)]
pub struct CampaignOutcome {
    /// 重新打包后的战役文件
    pub output: PathBuf,
    pub campaign_strings: usize,
    pub maps_processed: usize,
    pub maps_failed: Vec<String>,
    pub map_strings: usize,
}

/// 翻译整个战役包
#[allow(clippy::too_many_arguments)]
pub async fn translate_campaign(
    campaign: &Path,
    archiver: &dyn Archiver,
    translator: &dyn Translator,
    options: &BatchOptions,
    retry: &RetryPolicy,
    backup: &mut BackupManager,
    out_dir: &Path,
) -> Result<CampaignOutcome> {
    if !campaign.exists() {
        return Err(crate::engine_error!(missing, campaign.display()));
    }
    let file_name = campaign
        .file_name()
        .ok_or_else(|| crate::engine_error!(input_validation, campaign.display(), "不是文件路径"))?;

    if let Some(path) = backup.backup_file(campaign)? {
        info!("💾 已备份战役: {}", path.display());
    }

    let stem = campaign
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "campaign".to_string());
    let work_dir = out_dir.join(format!("temp_{}_{}", stem, Local::now().format("%Y%m%d_%H%M%S")));
    let campaign_dir = work_dir.join("campaign");

    let options = BatchOptions {
        context: CAMPAIGN_CONTEXT.to_string(),
        ..options.clone()
    };

    let result = run_pipeline(
        campaign,
        &campaign_dir,
        &work_dir,
        &out_dir.join(file_name),
        archiver,
        translator,
        &options,
        retry,
    )
    .await;

    if let Err(e) = std::fs::remove_dir_all(&work_dir) {
        warn!("⚠️  清理工作目录失败 {}: {}", work_dir.display(), e);
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    campaign: &Path,
    campaign_dir: &Path,
    work_dir: &Path,
    output: &Path,
    archiver: &dyn Archiver,
    translator: &dyn Translator,
    options: &BatchOptions,
    retry: &RetryPolicy,
) -> Result<CampaignOutcome> {
    let mut outcome = CampaignOutcome {
        output: output.to_path_buf(),
        ..Default::default()
    };

    info!("📂 [1/4] 解包战役: {}", campaign.display());
    archiver.extract(campaign, campaign_dir).await?;

    info!("🔤 [2/4] 翻译战役字符串");
    let strings = campaign_dir.join(CAMPAIGN_STRINGS_FILE);
    if strings.exists() {
        outcome.campaign_strings =
            translate_wts_file(&strings, &strings, translator, options, retry).await?;
    } else {
        warn!("⚠️  战役中没有 {}", CAMPAIGN_STRINGS_FILE);
    }

    let maps = find_maps(campaign_dir);
    info!("🗺️  [3/4] 处理 {} 张地图", maps.len());
    for (idx, map) in maps.iter().enumerate() {
        let map_name = map
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let map_dir = work_dir.join(format!("map_{}", idx + 1));
        match translate_map(map, &map_dir, archiver, translator, options, retry).await {
            Ok(count) => {
                outcome.maps_processed += 1;
                outcome.map_strings += count;
                info!("✅ {}: {} 个字符串", map_name, count);
            }
            Err(e) => {
                error!("❌ 地图处理失败 {}: {}", map_name, e);
                outcome.maps_failed.push(map_name);
            }
        }
    }

    info!("📦 [4/4] 重新打包战役: {}", output.display());
    archiver.create(campaign_dir, output).await?;
    Ok(outcome)
}

/// 解包一张地图，翻译后打回原位置
async fn translate_map(
    map: &Path,
    map_dir: &Path,
    archiver: &dyn Archiver,
    translator: &dyn Translator,
    options: &BatchOptions,
    retry: &RetryPolicy,
) -> Result<usize> {
    archiver.extract(map, map_dir).await?;

    let strings = map_dir.join(MAP_STRINGS_FILE);
    if !strings.exists() {
        warn!("⚠️  {} 中没有 {}", map.display(), MAP_STRINGS_FILE);
        return Ok(0);
    }
    let count = translate_wts_file(&strings, &strings, translator, options, retry).await?;
    archiver.create(map_dir, map).await?;
    Ok(count)
}

/// 战役根目录下的地图文件
fn find_maps(dir: &Path) -> Vec<PathBuf> {
    let mut maps: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| MAP_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
                .unwrap_or(false)
        })
        .collect();
    maps.sort();
    maps
}
