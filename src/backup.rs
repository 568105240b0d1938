//! 备份管理模块
//!
//! 此模块负责：
//! - 在修改任何文件之前复制一份带时间戳的备份
//! - 列出某个文件的历史备份
//! - 从备份恢复文件

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::data_config::DEFAULT_BACKUP_DIR;

/// 备份管理器配置
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// 备份根目录
    pub backup_dir: PathBuf,
    /// 时间戳格式
    pub timestamp_format: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            timestamp_format: "%Y%m%d_%H%M%S".to_string(),
        }
    }
}

/// 备份管理器
pub struct BackupManager {
    config: BackupConfig,
    /// 本次运行创建的备份
    created: Vec<PathBuf>,
}

impl BackupManager {
    /// 创建备份管理器，备份目录不存在时自动创建
    pub fn new(config: BackupConfig) -> Result<Self> {
        let manager = Self {
            config,
            created: Vec::new(),
        };
        manager.ensure_backup_dir_exists()?;
        Ok(manager)
    }

    /// 使用指定目录创建备份管理器
    pub fn in_dir<P: AsRef<Path>>(backup_dir: P) -> Result<Self> {
        Self::new(BackupConfig {
            backup_dir: backup_dir.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup_dir
    }

    /// 备份文件；源文件不存在时返回None
    pub fn backup_file<P: AsRef<Path>>(&mut self, source: P) -> Result<Option<PathBuf>> {
        let source = source.as_ref();
        if !source.exists() {
            debug!("跳过备份，文件不存在: {}", source.display());
            return Ok(None);
        }

        let target = self.next_backup_path(source);
        fs::copy(source, &target).with_context(|| {
            format!("备份文件失败: {} -> {}", source.display(), target.display())
        })?;

        info!("💾 已备份: {} -> {}", source.display(), target.display());
        self.created.push(target.clone());
        Ok(Some(target))
    }

    /// 批量备份，单个失败只记警告
    pub fn backup_all<P: AsRef<Path>>(&mut self, sources: &[P]) -> Vec<PathBuf> {
        let mut created = Vec::new();
        for source in sources {
            match self.backup_file(source) {
                Ok(Some(path)) => created.push(path),
                Ok(None) => {}
                Err(e) => warn!("⚠️  备份失败: {}", e),
            }
        }
        created
    }

    /// 本次运行创建的备份
    pub fn created(&self) -> &[PathBuf] {
        &self.created
    }

    /// 列出某个文件的全部备份（按文件名排序，即按时间先后）
    pub fn list_backups<P: AsRef<Path>>(&self, original: P) -> Result<Vec<PathBuf>> {
        let (stem, ext) = split_name(original.as_ref());
        let prefix = format!("{}_", stem);

        let mut found = Vec::new();
        let entries = fs::read_dir(&self.config.backup_dir).with_context(|| {
            format!("读取备份目录失败: {}", self.config.backup_dir.display())
        })?;
        for entry in entries {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.starts_with(&prefix) && name.ends_with(&ext) && path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// 最近一次备份
    pub fn latest_backup<P: AsRef<Path>>(&self, original: P) -> Result<Option<PathBuf>> {
        Ok(self.list_backups(original)?.pop())
    }

    /// 用备份覆盖目标文件
    pub fn restore<P: AsRef<Path>, Q: AsRef<Path>>(&self, backup: P, target: Q) -> Result<()> {
        let (backup, target) = (backup.as_ref(), target.as_ref());
        if !backup.exists() {
            anyhow::bail!("备份文件不存在: {}", backup.display());
        }
        fs::copy(backup, target).with_context(|| {
            format!("恢复文件失败: {} -> {}", backup.display(), target.display())
        })?;
        info!("♻️  已从备份恢复: {}", target.display());
        Ok(())
    }

    /// `<stem>_<时间戳>[_n]<ext>`，同一秒内重复备份时追加序号
    fn next_backup_path(&self, source: &Path) -> PathBuf {
        let (stem, ext) = split_name(source);
        let stamp = chrono::Local::now()
            .format(&self.config.timestamp_format)
            .to_string();

        let mut candidate = self
            .config
            .backup_dir
            .join(format!("{}_{}{}", stem, stamp, ext));
        let mut n = 1;
        while candidate.exists() {
            candidate = self
                .config
                .backup_dir
                .join(format!("{}_{}_{}{}", stem, stamp, n, ext));
            n += 1;
        }
        candidate
    }

    fn ensure_backup_dir_exists(&self) -> Result<()> {
        if !self.config.backup_dir.exists() {
            fs::create_dir_all(&self.config.backup_dir).with_context(|| {
                format!("创建备份目录失败: {}", self.config.backup_dir.display())
            })?;
            debug!("创建备份目录: {}", self.config.backup_dir.display());
        }
        Ok(())
    }
}

/// 拆成 (文件名主干, 带点的扩展名)
fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_config_default() {
        let config = BackupConfig::default();
        assert_eq!(config.backup_dir, PathBuf::from("backups"));
        assert_eq!(config.timestamp_format, "%Y%m%d_%H%M%S");
    }

    #[test]
    fn test_backup_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("war3map.j");
        fs::write(&source, b"original").unwrap();

        let mut manager = BackupManager::in_dir(dir.path().join("backups")).unwrap();
        let backup = manager.backup_file(&source).unwrap().unwrap();
        assert!(backup.exists());
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("war3map_"));
        assert!(name.ends_with(".j"));

        fs::write(&source, b"modified").unwrap();
        manager.restore(&backup, &source).unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"original");
    }

    #[test]
    fn test_repeated_backups_get_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Itemstrings.txt");
        fs::write(&source, b"a").unwrap();

        let mut manager = BackupManager::in_dir(dir.path().join("backups")).unwrap();
        let first = manager.backup_file(&source).unwrap().unwrap();
        let second = manager.backup_file(&source).unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.created().len(), 2);

        let listed = manager.list_backups(&source).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(manager.latest_backup(&source).unwrap().is_some());
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = BackupManager::in_dir(dir.path()).unwrap();
        assert!(manager.backup_file(dir.path().join("none.j")).unwrap().is_none());
        assert!(manager.restore(dir.path().join("none.j"), dir.path().join("x")).is_err());
    }
}
