//! 外部打包工具
//!
//! 引擎从不解析归档内部结构，只处理打包工具已经解到磁盘上的文件。

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::constants::service_config::ARCHIVER_TIMEOUT_SECONDS;
use crate::error::Result;

/// 归档解包/打包
#[async_trait]
pub trait Archiver: Send + Sync {
    /// 把归档解到目录
    async fn extract(&self, archive: &Path, output_dir: &Path) -> Result<()>;

    /// 把目录打成归档
    async fn create(&self, source_dir: &Path, archive: &Path) -> Result<()>;

    fn name(&self) -> &str;
}

/// 调用命令行打包工具
///
/// `<exe> extract <archive> -o <dir> [-f listfile]`，
/// `<exe> create <archive> <dir> [-f listfile]`。
#[derive(Debug, Clone)]
pub struct ExternalArchiver {
    executable: PathBuf,
    listfile: Option<PathBuf>,
    timeout: Duration,
}

impl ExternalArchiver {
    pub fn new<P: AsRef<Path>>(executable: P) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            listfile: None,
            timeout: Duration::from_secs(ARCHIVER_TIMEOUT_SECONDS),
        }
    }

    /// 文件列表不存在时忽略
    pub fn with_listfile(mut self, listfile: Option<PathBuf>) -> Self {
        self.listfile = listfile.filter(|p| p.exists());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn extract_args(&self, archive: &Path, output_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "extract".into(),
            archive.as_os_str().to_os_string(),
            "-o".into(),
            output_dir.as_os_str().to_os_string(),
        ];
        self.push_listfile(&mut args);
        args
    }

    pub fn create_args(&self, source_dir: &Path, archive: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "create".into(),
            archive.as_os_str().to_os_string(),
            source_dir.as_os_str().to_os_string(),
        ];
        self.push_listfile(&mut args);
        args
    }

    fn push_listfile(&self, args: &mut Vec<OsString>) {
        if let Some(listfile) = &self.listfile {
            args.push("-f".into());
            args.push(listfile.as_os_str().to_os_string());
        }
    }

    fn command_line(&self, args: &[OsString]) -> String {
        std::iter::once(self.executable.as_os_str())
            .chain(args.iter().map(|a| a.as_os_str()))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 执行并收集输出，非零退出码或超时都算失败
    async fn run(&self, args: Vec<OsString>) -> Result<String> {
        let command_line = self.command_line(&args);
        debug!("🔧 执行: {}", command_line);

        let child = Command::new(&self.executable)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(crate::engine_error!(archiver, command_line, e)),
            Err(_) => {
                return Err(crate::engine_error!(
                    archiver,
                    command_line,
                    format!("超时 ({:?})", self.timeout)
                ))
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        if !output.status.success() {
            return Err(crate::engine_error!(
                archiver,
                command_line,
                format!("退出码 {:?}: {}", output.status.code(), text)
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl Archiver for ExternalArchiver {
    async fn extract(&self, archive: &Path, output_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| crate::engine_error!(file_op, output_dir.display(), "创建目录", e))?;
        self.run(self.extract_args(archive, output_dir)).await?;
        info!("📂 已解包: {}", archive.display());
        Ok(())
    }

    async fn create(&self, source_dir: &Path, archive: &Path) -> Result<()> {
        if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| crate::engine_error!(file_op, parent.display(), "创建目录", e))?;
        }
        self.run(self.create_args(source_dir, archive)).await?;
        info!("📦 已打包: {}", archive.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "external"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_command_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let listfile = dir.path().join("listfile.txt");
        std::fs::write(&listfile, "war3map.wts\n").unwrap();

        let archiver = ExternalArchiver::new("mpqcli").with_listfile(Some(listfile.clone()));
        let args = archiver.extract_args(Path::new("a.w3n"), Path::new("out"));
        assert_eq!(
            args,
            vec![
                OsString::from("extract"),
                OsString::from("a.w3n"),
                OsString::from("-o"),
                OsString::from("out"),
                OsString::from("-f"),
                listfile.clone().into_os_string(),
            ]
        );

        let no_list = ExternalArchiver::new("mpqcli")
            .with_listfile(Some(dir.path().join("missing.txt")));
        let args = no_list.create_args(Path::new("src"), Path::new("b.w3x"));
        assert_eq!(
            args,
            vec![
                OsString::from("create"),
                OsString::from("b.w3x"),
                OsString::from("src"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_executable_is_archiver_error() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = ExternalArchiver::new(dir.path().join("no-such-tool"));
        let err = archiver
            .extract(Path::new("a.w3n"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Archiver { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_archiver_error() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = ExternalArchiver::new("false");
        let err = archiver
            .create(dir.path(), &dir.path().join("x.w3x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Archiver { .. }));
    }
}
