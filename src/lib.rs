//! JASS Translator - 魔兽争霸III地图文本提取与回填工具库
//!
//! 这个库提供了脚本字符串扫描、编码识别、系统标识符目录、译文回填、
//! 物编文本处理、依赖同步、翻译服务调用和战役打包等核心功能。

pub mod archiver;
pub mod backup;
pub mod campaign;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod constants;
pub mod data_file;
pub mod dependency;
pub mod error;
pub mod extraction;
pub mod numbered;
pub mod reinsertion;
pub mod report;
pub mod stats;
pub mod terms;
pub mod tokenizer;
pub mod translator;
pub mod utils;
pub mod wts;

pub use error::{EngineError, Result};
