//! 翻译服务
//!
//! 引擎只把翻译看作 `(文本, 源语言, 目标语言) → 文本` 的函数。
//! 这里提供HTTP翻译服务的实现、带超时和指数退避的重试，以及按批并发填写编号译文文件。

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::constants::is_valid_api_url;
use crate::constants::service_config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENT_BATCHES, DEFAULT_MAX_ATTEMPTS, DEFAULT_SOURCE_LANG,
    DEFAULT_TARGET_LANG, REQUEST_TIMEOUT_SECONDS, RETRY_DELAY_BASE_MS,
};
use crate::error::Result;
use crate::numbered::load_numbered;
use crate::utils::{contains_cjk, write_atomic};

/// 翻译服务
#[async_trait]
pub trait Translator: Send + Sync {
    /// 翻译单条文本
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;

    /// 批量翻译，输出与输入等长且顺序一致
    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        _context: &str,
    ) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text, source_lang, target_lang).await?);
        }
        Ok(out)
    }

    fn provider_name(&self) -> &str;
}

/// 原样返回，用于只想走一遍流程的场合
#[derive(Debug, Clone, Default)]
pub struct IdentityTranslator;

#[async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn provider_name(&self) -> &str {
        "identity"
    }
}

/// HTTP翻译服务
///
/// 单条请求体为 `{"text", "source_lang", "target_lang"}`，有上下文说明时附带 `context`；
/// 批量时把文本写成 `[序号] 文本` 的多行形式一次发送，再按序号取回。
pub struct HttpTranslator {
    client: Client,
    api_url: String,
    index_line: Regex,
}

impl HttpTranslator {
    pub fn new(api_url: &str) -> Result<Self> {
        if !is_valid_api_url(api_url) {
            return Err(crate::engine_error!(config, "api", format!("无效的API地址: {}", api_url)));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;
        let index_line = Regex::new(r"^\[(\d+)\]\s*(.*)$")
            .map_err(|e| crate::engine_error!(config, "index_line", e))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            index_line,
        })
    }

    async fn post(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        context: &str,
    ) -> Result<String> {
        let mut body = json!({
            "text": text,
            "source_lang": source_lang,
            "target_lang": target_lang
        });
        if !context.is_empty() {
            body["context"] = json!(context);
        }
        let response = self.client.post(&self.api_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::engine_error!(
                translation_api,
                status.as_u16(),
                body,
                self.api_url
            ));
        }

        let body = response.text().await?;
        Ok(response_text(&body))
    }

    /// 解析 `[序号] 译文` 行，缺失的位置为None
    pub fn parse_indexed(&self, text: &str, count: usize) -> Vec<Option<String>> {
        let mut out = vec![None; count];
        for line in text.lines() {
            let Some(caps) = self.index_line.captures(line.trim()) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<usize>() else {
                continue;
            };
            let translated = caps[2].trim();
            if index < count && !translated.is_empty() {
                out[index] = Some(translated.to_string());
            }
        }
        out
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        self.post(text, source_lang, target_lang, "").await
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
        context: &str,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let indexed = texts
            .iter()
            .enumerate()
            .map(|(i, text)| format!("[{}] {}", i, text.replace('\n', " ").trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let response = self.post(&indexed, source_lang, target_lang, context).await?;
        let parsed = self.parse_indexed(&response, texts.len());
        let missing = parsed.iter().filter(|p| p.is_none()).count();
        if missing > 0 {
            warn!("⚠️  批量结果缺少 {} 条，沿用原文", missing);
        }

        Ok(parsed
            .into_iter()
            .zip(texts)
            .map(|(translated, source)| translated.unwrap_or_else(|| source.clone()))
            .collect())
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}

/// 响应体可能是JSON（`data`/`text`/`result`字段）也可能是纯文本
fn response_text(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("data")
            .or_else(|| value.get("text"))
            .or_else(|| value.get("result"))
            .and_then(|v| v.as_str())
            .unwrap_or(body)
            .to_string(),
        Err(_) => body.to_string(),
    }
}

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 单次调用的时间预算
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_DELAY_BASE_MS),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECONDS),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败后的等待时间（attempt 从0开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// 翻译一批文本；用尽尝试次数后返回原文
    pub async fn translate_batch(
        &self,
        translator: &dyn Translator,
        texts: &[String],
        options: &BatchOptions,
    ) -> Vec<String> {
        let attempts = self.max_attempts.max(1);
        for attempt in 0..attempts {
            let call = translator.translate_batch(
                texts,
                &options.source_lang,
                &options.target_lang,
                &options.context,
            );
            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(translated)) if translated.len() == texts.len() => return translated,
                Ok(Ok(translated)) => warn!(
                    "⚠️  {} 返回 {} 条，期望 {} 条",
                    translator.provider_name(),
                    translated.len(),
                    texts.len()
                ),
                Ok(Err(e)) => warn!("❌ 翻译失败 (尝试 {}/{}): {}", attempt + 1, attempts, e),
                Err(_) => warn!(
                    "❌ 翻译超时 (尝试 {}/{}), 超过 {:?}",
                    attempt + 1,
                    attempts,
                    self.timeout
                ),
            }

            if attempt + 1 < attempts {
                let delay = self.delay_for(attempt);
                debug!("⏳ 等待 {:?} 后重试", delay);
                tokio::time::sleep(delay).await;
            }
        }

        warn!("⚠️  {} 条文本翻译失败，保留原文", texts.len());
        texts.to_vec()
    }
}

/// 批量翻译选项
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub batch_size: usize,
    pub concurrent_batches: usize,
    /// 附带给翻译服务的上下文说明
    pub context: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            source_lang: DEFAULT_SOURCE_LANG.to_string(),
            target_lang: DEFAULT_TARGET_LANG.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent_batches: DEFAULT_CONCURRENT_BATCHES,
            context: String::new(),
        }
    }
}

/// 分批并发翻译，结果顺序与输入一致
pub async fn translate_all(
    translator: &dyn Translator,
    texts: &[String],
    options: &BatchOptions,
    retry: &RetryPolicy,
) -> Vec<String> {
    if texts.is_empty() {
        return Vec::new();
    }

    let batch_size = options.batch_size.max(1);
    let batches: Vec<&[String]> = texts.chunks(batch_size).collect();
    info!(
        "🚀 {}: {} 条文本分成 {} 批, 并发 {}",
        translator.provider_name(),
        texts.len(),
        batches.len(),
        options.concurrent_batches.max(1)
    );

    let results: Vec<Vec<String>> = stream::iter(batches.into_iter().enumerate())
        .map(|(idx, batch)| async move {
            debug!("处理批次 {}: {} 条", idx + 1, batch.len());
            retry.translate_batch(translator, batch, options).await
        })
        .buffered(options.concurrent_batches.max(1))
        .collect()
        .await;

    results.into_iter().flatten().collect()
}

/// 自动翻译的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoTranslateOutcome {
    pub total: usize,
    /// 送去翻译的条数
    pub submitted: usize,
    /// 译文与原文不同的条数
    pub changed: usize,
}

/// 原地填写编号译文文件：含中文的条目送去翻译，其余保持不变
pub async fn auto_translate_file(
    path: &Path,
    translator: &dyn Translator,
    options: &BatchOptions,
    retry: &RetryPolicy,
) -> Result<AutoTranslateOutcome> {
    let mut entries = load_numbered(path)?;
    let pending: Vec<(usize, String)> = entries
        .iter()
        .filter(|(_, text)| contains_cjk(text))
        .map(|(ordinal, text)| (*ordinal, text.clone()))
        .collect();

    let mut outcome = AutoTranslateOutcome {
        total: entries.len(),
        submitted: pending.len(),
        changed: 0,
    };
    if pending.is_empty() {
        info!("ℹ️  {} 中没有需要翻译的条目", path.display());
        return Ok(outcome);
    }

    let sources: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
    let translated = translate_all(translator, &sources, options, retry).await;

    for ((ordinal, source), text) in pending.into_iter().zip(translated) {
        if text != source {
            outcome.changed += 1;
        }
        entries.insert(ordinal, text);
    }

    write_entries(path, &entries)?;
    info!(
        "✅ {}: 翻译 {}/{} 条",
        path.display(),
        outcome.changed,
        outcome.submitted
    );
    Ok(outcome)
}

/// 按原序号写回
fn write_entries(path: &Path, entries: &BTreeMap<usize, String>) -> Result<()> {
    let mut content = String::new();
    for (ordinal, text) in entries {
        content.push_str(&format!("{}. {}\n", ordinal, text));
    }
    write_atomic(path, content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 在文本前加上目标语言前缀
    struct PrefixTranslator;

    #[async_trait]
    impl Translator for PrefixTranslator {
        async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String> {
            Ok(format!("{}:{}", target, text))
        }

        fn provider_name(&self) -> &str {
            "prefix"
        }
    }

    /// 前几次调用失败
    struct FlakyTranslator {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Translator for FlakyTranslator {
        async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(crate::engine_error!(translation_api, 503, "busy", "mock"));
            }
            Ok(text.to_uppercase())
        }

        fn provider_name(&self) -> &str {
            "flaky"
        }
    }

    /// 永远不返回
    struct StalledTranslator;

    #[async_trait]
    impl Translator for StalledTranslator {
        async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(text.to_string())
        }

        fn provider_name(&self) -> &str {
            "stalled"
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_response_text() {
        assert_eq!(response_text(r#"{"data": "[0] Hello"}"#), "[0] Hello");
        assert_eq!(response_text(r#"{"result": "ok"}"#), "ok");
        assert_eq!(response_text("plain"), "plain");
    }

    #[test]
    fn test_parse_indexed() {
        let http = HttpTranslator::new("http://localhost:1188/translate").unwrap();
        let parsed = http.parse_indexed("[1] World\n[0] Hello\n[7] stray\n[2]  ", 3);
        assert_eq!(
            parsed,
            vec![Some("Hello".to_string()), Some("World".to_string()), None]
        );
        assert!(HttpTranslator::new("ftp://example.com").is_err());
    }

    #[tokio::test]
    async fn test_translate_all_preserves_order() {
        let options = BatchOptions {
            batch_size: 2,
            concurrent_batches: 3,
            ..Default::default()
        };
        let input = texts(&["一", "二", "三", "四", "五"]);
        let out = translate_all(&PrefixTranslator, &input, &options, &fast_retry(1)).await;
        assert_eq!(out, texts(&["en:一", "en:二", "en:三", "en:四", "en:五"]));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let flaky = FlakyTranslator {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let out = fast_retry(3)
            .translate_batch(&flaky, &texts(&["abc"]), &BatchOptions::default())
            .await;
        assert_eq!(out, texts(&["ABC"]));
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_source() {
        let flaky = FlakyTranslator {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let out = fast_retry(2)
            .translate_batch(&flaky, &texts(&["abc"]), &BatchOptions::default())
            .await;
        assert_eq!(out, texts(&["abc"]));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_returns_source() {
        let out = fast_retry(1)
            .translate_batch(&StalledTranslator, &texts(&["你好"]), &BatchOptions::default())
            .await;
        assert_eq!(out, texts(&["你好"]));
    }

    #[tokio::test]
    async fn test_auto_translate_file_skips_translated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("war3map.j_chinese.txt");
        std::fs::write(&path, "1. 你好\n2. Already done\n3. 再见\n").unwrap();

        let outcome = auto_translate_file(
            &path,
            &PrefixTranslator,
            &BatchOptions::default(),
            &fast_retry(1),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            AutoTranslateOutcome {
                total: 3,
                submitted: 2,
                changed: 2
            }
        );
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "1. en:你好\n2. Already done\n3. en:再见\n");
    }

    #[tokio::test]
    async fn test_identity_translator() {
        let out = IdentityTranslator
            .translate_batch(&texts(&["a", "b"]), "zh", "en", "")
            .await
            .unwrap();
        assert_eq!(out, texts(&["a", "b"]));
    }
}
