//! 编码识别模块
//!
//! 把一段原始字节解码为文本，并给出成功的编码名称：
//! 1. 统计检测器给出高置信度结果时，先用该编码严格解码；
//! 2. 否则按固定优先级依次尝试候选编码，取第一个严格解码成功且含有目标文字的结果；
//! 3. 在目标文字检查之前做一次乱码修复。
//!
//! 候选顺序是兼容性约定，不同实现必须保持同样的列表和顺序。

use std::fmt;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use tracing::trace;

use crate::constants::codec_config::{CANDIDATE_CODECS, DEFAULT_LEGACY_CODEC, MOJIBAKE_REPAIRS};
use crate::utils::contains_cjk;

/// 一种字符编码及其稳定名称
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    label: &'static str,
    encoding: &'static Encoding,
}

impl Codec {
    /// 按名称查找编码，候选表中的名称保持原样，其他名称交给WHATWG标签表
    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim().to_ascii_lowercase();
        let wanted = match wanted.as_str() {
            "shift-jis" | "sjis" => "shift_jis".to_string(),
            "utf8" => "utf-8".to_string(),
            _ => wanted,
        };

        if let Some(known) = CANDIDATE_CODECS.iter().find(|c| **c == wanted) {
            let encoding = Encoding::for_label(known.as_bytes())?;
            return Some(Self { label: known, encoding });
        }

        let encoding = Encoding::for_label(wanted.as_bytes())?;
        Some(Self::from_encoding(encoding))
    }

    /// 由encoding_rs的编码对象得到Codec，优先复用候选表中的名称
    pub fn from_encoding(encoding: &'static Encoding) -> Self {
        let label = CANDIDATE_CODECS
            .iter()
            .find(|c| Encoding::for_label(c.as_bytes()) == Some(encoding))
            .copied()
            .unwrap_or_else(|| encoding.name());
        Self { label, encoding }
    }

    /// UTF-8
    pub fn utf8() -> Self {
        Self {
            label: "utf-8",
            encoding: encoding_rs::UTF_8,
        }
    }

    /// 默认旧式编码
    pub fn default_legacy() -> Self {
        Self::from_label(DEFAULT_LEGACY_CODEC).unwrap_or_else(|| Self {
            label: "gbk",
            encoding: encoding_rs::GBK,
        })
    }

    /// 编码名称
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// 是否为UTF-8
    pub fn is_utf8(&self) -> bool {
        self.encoding == encoding_rs::UTF_8
    }

    /// 严格解码，遇到非法序列返回None
    pub fn decode_strict(&self, bytes: &[u8]) -> Option<String> {
        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
    }

    /// 严格编码，有无法表示的字符时返回None
    pub fn encode_strict(&self, text: &str) -> Option<Vec<u8>> {
        let (bytes, _, had_unmappable) = self.encoding.encode(text);
        if had_unmappable {
            None
        } else {
            Some(bytes.into_owned())
        }
    }

    /// 有损编码：丢弃无法表示的字符，返回编码结果和被丢弃的字符
    pub fn encode_lossy(&self, text: &str) -> (Vec<u8>, Vec<char>) {
        let mut out = Vec::with_capacity(text.len());
        let mut dropped = Vec::new();
        let mut buf = [0u8; 4];

        for c in text.chars() {
            let (bytes, _, had_unmappable) = self.encoding.encode(c.encode_utf8(&mut buf));
            if had_unmappable {
                if !dropped.contains(&c) {
                    dropped.push(c);
                }
            } else {
                out.extend_from_slice(&bytes);
            }
        }

        (out, dropped)
    }

    /// 单个字符能否用该编码表示
    pub fn can_encode(&self, c: char) -> bool {
        let mut buf = [0u8; 4];
        let (_, _, had_unmappable) = self.encoding.encode(c.encode_utf8(&mut buf));
        !had_unmappable
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Codec({})", self.label)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// 修复后的文本
    pub text: String,
    /// 解码成功的编码
    pub codec: Codec,
}

/// 编码识别器
///
/// 纯函数式：同样的字节总是得到同样的结果。
#[derive(Debug, Clone)]
pub struct CodecResolver {
    candidates: Vec<Codec>,
    use_detector: bool,
}

impl Default for CodecResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecResolver {
    /// 使用内置候选顺序创建识别器
    pub fn new() -> Self {
        let candidates = CANDIDATE_CODECS
            .iter()
            .filter_map(|label| Codec::from_label(label))
            .collect();
        Self {
            candidates,
            use_detector: true,
        }
    }

    /// 关闭统计检测，只走候选列表
    pub fn without_detector(mut self) -> Self {
        self.use_detector = false;
        self
    }

    /// 候选编码
    pub fn candidates(&self) -> &[Codec] {
        &self.candidates
    }

    /// 解码一段字节；没有任何编码能得到含目标文字的文本时返回None
    pub fn resolve(&self, bytes: &[u8]) -> Option<Decoded> {
        if bytes.is_empty() {
            return None;
        }

        if self.use_detector {
            if let Some(decoded) = self.resolve_with_detector(bytes) {
                return Some(decoded);
            }
        }

        for codec in &self.candidates {
            if let Some(text) = codec.decode_strict(bytes) {
                let repaired = repair_text(&text);
                if contains_cjk(&repaired) {
                    return Some(Decoded {
                        text: repaired,
                        codec: *codec,
                    });
                }
            }
        }

        trace!("无法解码的字节段: {} 字节", bytes.len());
        None
    }

    /// 统计检测：只接受高置信度且严格解码成功、含目标文字的结果
    fn resolve_with_detector(&self, bytes: &[u8]) -> Option<Decoded> {
        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        // guess_assess的布尔值表示该猜测明显优于其他候选
        let (encoding, confident) = detector.guess_assess(None, true);
        accept_detected(bytes, encoding, confident)
    }
}

/// 检测结果不可信、严格解码失败或不含目标文字时返回None，交给候选列表
fn accept_detected(bytes: &[u8], encoding: &'static Encoding, confident: bool) -> Option<Decoded> {
    if !confident {
        trace!("检测结果 {} 不够可信，改用候选列表", encoding.name());
        return None;
    }

    let codec = Codec::from_encoding(encoding);
    let text = codec.decode_strict(bytes)?;
    let repaired = repair_text(&text);
    if contains_cjk(&repaired) {
        Some(Decoded {
            text: repaired,
            codec,
        })
    } else {
        None
    }
}

/// 文本修复：去掉零宽BOM，修正常见的标点乱码
pub fn repair_text(text: &str) -> String {
    let mut repaired = text.replace('\u{feff}', "");
    for (broken, fixed) in MOJIBAKE_REPAIRS {
        if repaired.contains(broken) {
            repaired = repaired.replace(broken, fixed);
        }
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbk_bytes(text: &str) -> Vec<u8> {
        encoding_rs::GBK.encode(text).0.into_owned()
    }

    #[test]
    fn test_codec_labels() {
        assert_eq!(Codec::from_label("GB18030").unwrap().label(), "gb18030");
        assert_eq!(Codec::from_label("shift-jis").unwrap().label(), "shift_jis");
        assert_eq!(Codec::from_label("utf8").unwrap().label(), "utf-8");
        assert!(Codec::from_label("not-a-codec").is_none());
        assert_eq!(Codec::from_encoding(encoding_rs::GBK).label(), "gbk");
    }

    #[test]
    fn test_resolve_utf8_text() {
        let resolver = CodecResolver::new();
        let decoded = resolver.resolve("你好，勇士".as_bytes()).unwrap();
        assert_eq!(decoded.text, "你好，勇士");
    }

    #[test]
    fn test_resolve_gbk_text() {
        let resolver = CodecResolver::new();
        let text = "攻击力提升了百分之十，持续五秒。";
        let bytes = gbk_bytes(text);
        let decoded = resolver.resolve(&bytes).unwrap();
        assert_eq!(decoded.text, text);
        assert_ne!(decoded.codec.label(), "utf-8");
    }

    #[test]
    fn test_resolve_rejects_non_cjk() {
        let resolver = CodecResolver::new();
        assert!(resolver.resolve(b"Hello world").is_none());
        assert!(resolver.resolve(b"").is_none());
    }

    #[test]
    fn test_candidate_fallback_is_deterministic() {
        // gb18030/gbk/gb2312都能解码这组字节，必须总是选排在最前的gb18030
        let resolver = CodecResolver::new().without_detector();
        let bytes = gbk_bytes("中文");

        let first = resolver.resolve(&bytes).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&bytes).unwrap(), first);
        }
        assert_eq!(first.codec.label(), "gb18030");
    }

    #[test]
    fn test_detector_path_is_stable_across_resolvers() {
        let bytes = gbk_bytes("我们的英雄已经到达了北方的要塞，请立即派遣援军支援前线。");
        let first = CodecResolver::new().resolve(&bytes).unwrap();
        for _ in 0..10 {
            assert_eq!(CodecResolver::new().resolve(&bytes).unwrap(), first);
        }
        assert_eq!(first.text, "我们的英雄已经到达了北方的要塞，请立即派遣援军支援前线。");
    }

    #[test]
    fn test_unconfident_guess_falls_through_to_candidates() {
        let bytes = gbk_bytes("中文");
        assert!(accept_detected(&bytes, encoding_rs::GBK, false).is_none());
        assert!(accept_detected(&bytes, encoding_rs::UTF_8, true).is_none());
        assert_eq!(
            accept_detected(&bytes, encoding_rs::GBK, true).unwrap().text,
            "中文"
        );

        // 检测器放弃时，结果必须与只走候选列表完全一致
        let mut detector = EncodingDetector::new();
        detector.feed(&bytes, true);
        let (encoding, confident) = detector.guess_assess(None, true);
        if accept_detected(&bytes, encoding, confident).is_none() {
            let with_detector = CodecResolver::new().resolve(&bytes).unwrap();
            let candidates_only = CodecResolver::new().without_detector().resolve(&bytes).unwrap();
            assert_eq!(with_detector, candidates_only);
            assert_eq!(with_detector.codec.label(), "gb18030");
        }
    }

    #[test]
    fn test_encode_lossy_drops_unmappable() {
        let gbk = Codec::from_label("gbk").unwrap();
        assert!(gbk.encode_strict("攻击😀").is_none());
        let (bytes, dropped) = gbk.encode_lossy("攻击😀");
        assert_eq!(bytes, gbk_bytes("攻击"));
        assert_eq!(dropped, vec!['😀']);
    }

    #[test]
    fn test_repair_text() {
        assert_eq!(repair_text("\u{feff}说明"), "说明");
        assert_eq!(repair_text("â€œ测试â€\u{9d}"), "\u{201c}测试\u{201d}");
    }
}
