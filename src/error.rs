//! 统一错误处理模块
//!
//! 提供提取/回填引擎的统一错误类型定义。逐字符串的问题（解码失败、编码降级、
//! 空译文）不属于错误，只在结果结构中计为警告；整文件级的结构问题才会返回错误。

// 标准库导入
use std::fmt;

// 第三方crate导入
use anyhow::Error as AnyhowError;

/// 引擎统一错误类型
#[derive(Debug)]
pub enum EngineError {
    /// 提取后源文件内容发生变化，需要显式确认才能继续
    HashMismatch {
        /// 提取时记录的哈希
        expected: String,
        /// 当前文件的哈希
        actual: String,
    },

    /// 译文数量与当前扫描出的字符串数量不一致，写入前中止
    CountMismatch {
        /// 当前扫描得到的字符串数量
        expected: usize,
        /// 提供的译文数量
        found: usize,
    },

    /// 必需的输入文件或提取产物不存在
    MissingInputFile {
        /// 文件路径
        path: String,
    },

    /// 文件操作相关错误
    FileOperation {
        /// 文件路径
        path: String,
        /// 操作类型（读取、写入、创建等）
        operation: String,
        /// 底层错误信息
        source: String,
    },

    /// 输入验证错误
    InputValidation {
        /// 输入值
        input: String,
        /// 验证失败原因
        reason: String,
    },

    /// 配置相关错误
    Configuration {
        /// 配置项名称
        field: String,
        /// 错误原因
        reason: String,
    },

    /// 外部打包工具执行失败
    Archiver {
        /// 执行的命令
        command: String,
        /// 工具输出
        output: String,
    },

    /// 翻译API相关错误
    TranslationApi {
        /// API响应状态码
        status_code: u16,
        /// 错误消息
        message: String,
        /// API地址
        api_url: String,
    },

    /// 内部处理错误（包装anyhow::Error）
    Internal {
        /// 包装的错误
        source: AnyhowError,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::HashMismatch { expected, actual } => {
                write!(
                    f,
                    "文件哈希不一致: 提取时 {}..., 当前 {}...",
                    short_hash(expected),
                    short_hash(actual)
                )
            }
            EngineError::CountMismatch { expected, found } => {
                write!(
                    f,
                    "字符串数量不一致: 当前扫描 {} 个, 提供译文 {} 个 (差值 {:+})",
                    expected,
                    found,
                    *found as i64 - *expected as i64
                )
            }
            EngineError::MissingInputFile { path } => {
                write!(f, "缺少输入文件: {}", path)
            }
            EngineError::FileOperation { path, operation, source } => {
                write!(f, "文件{}操作失败 [{}]: {}", operation, path, source)
            }
            EngineError::InputValidation { input, reason } => {
                write!(f, "输入验证失败 [{}]: {}", input, reason)
            }
            EngineError::Configuration { field, reason } => {
                write!(f, "配置错误 [{}]: {}", field, reason)
            }
            EngineError::Archiver { command, output } => {
                write!(f, "打包工具执行失败 [{}]: {}", command, output)
            }
            EngineError::TranslationApi { status_code, message, api_url } => {
                write!(f, "翻译API错误 [{}] {}: {}", status_code, api_url, message)
            }
            EngineError::Internal { source } => {
                write!(f, "内部处理错误: {}", source)
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Internal { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl EngineError {
    /// 该错误是否可以通过操作员显式确认后重试
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::HashMismatch { .. })
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

/// 引擎结果类型别名
pub type Result<T> = std::result::Result<T, EngineError>;

/// 便捷的错误创建宏
#[macro_export]
macro_rules! engine_error {
    (missing, $path:expr) => {
        $crate::error::EngineError::MissingInputFile {
            path: $path.to_string(),
        }
    };
    (file_op, $path:expr, $op:expr, $source:expr) => {
        $crate::error::EngineError::FileOperation {
            path: $path.to_string(),
            operation: $op.to_string(),
            source: $source.to_string(),
        }
    };
    (input_validation, $input:expr, $reason:expr) => {
        $crate::error::EngineError::InputValidation {
            input: $input.to_string(),
            reason: $reason.to_string(),
        }
    };
    (config, $field:expr, $reason:expr) => {
        $crate::error::EngineError::Configuration {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
    (archiver, $command:expr, $output:expr) => {
        $crate::error::EngineError::Archiver {
            command: $command.to_string(),
            output: $output.to_string(),
        }
    };
    (translation_api, $code:expr, $msg:expr, $url:expr) => {
        $crate::error::EngineError::TranslationApi {
            status_code: $code,
            message: $msg.to_string(),
            api_url: $url.to_string(),
        }
    };
}

/// 从anyhow::Error转换为EngineError
impl From<AnyhowError> for EngineError {
    fn from(error: AnyhowError) -> Self {
        EngineError::Internal { source: error }
    }
}

/// 从std::io::Error转换为EngineError
impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::FileOperation {
            path: "unknown".to_string(),
            operation: "io".to_string(),
            source: error.to_string(),
        }
    }
}

/// 从serde_json::Error转换为EngineError
impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::InputValidation {
            input: "json".to_string(),
            reason: error.to_string(),
        }
    }
}

/// 从reqwest::Error转换为EngineError
impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        let status_code = error.status().map(|s| s.as_u16()).unwrap_or(0);
        let api_url = error.url().map(|u| u.to_string()).unwrap_or_default();
        EngineError::TranslationApi {
            status_code,
            message: error.to_string(),
            api_url,
        }
    }
}
