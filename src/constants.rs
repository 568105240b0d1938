/// 常量配置
///
/// 该文件集中定义扫描、编码、标识符和翻译服务相关的固定表，方便统一管理和维护

/// JASS脚本扫描配置
pub mod jass_config {
    /// 界面输出函数，字符串出现在这些调用之后视为UI文本
    pub const UI_FUNCS: &[&str] = &[
        "DisplayTextToPlayer",
        "DisplayTimedTextToPlayer",
        "DisplayTextToForce",
        "DisplayTimedTextToForce",
        "BJDebugMsg",
        "CreateTextTag",
        "CreateTextTagUnitBJ",
        "CreateTextTagLocBJ",
        "TransmissionFromUnit",
        "TransmissionFromUnitWithNameBJ",
        "DialogSetMessage",
        "DialogAddButton",
        "TimerDialogSetTitle",
    ];

    /// 出现在字面量内部即判定为代码片段的记号
    pub const CODE_TOKENS: &[&str] = &[
        "GetHandleId", "GetTriggeringTrigger", "GetTriggerUnit", "GetEnumUnit",
        "GetManipulatingUnit", "GetTriggerPlayer", "GetOwningPlayer",
        "LoadReal", "LoadInteger", "LoadBoolean", "LoadStr", "LoadUnit",
        "SaveReal", "SaveInteger", "SaveBoolean", "SaveStr",
        "GetSpell", "GetAbility", "CreateUnit", "RemoveUnit", "KillUnit",
        "function ", "endfunction", "local ", "set ", "call ",
        "if ", "then", "endif", "elseif", "else",
        "loop", "endloop", "exitwhen", "return",
        "native ", "constant ", "array ", "takes ", "returns ",
        "globals", "endglobals", "type ", "extends",
        "integer ", "real ", "boolean ", "string ", "unit ",
        "trigger ", "timer ", "location ", "group ", "player ",
        "force ", "effect ", "sound ", "handle ",
        "hashtable", "InitHashtable",
        "udg_", "gg_", "Trig_", "Unit_",
        "==", "!=", "<=", ">=", "and ", "or ", "not ",
    ];

    /// 字面量前方100字节内出现即视为可疑上下文的记号
    pub const SUSPICIOUS_TOKENS: &[&str] = &[
        "function ", "local ", "set ", "call ",
        "hashtable", "array", "takes", "returns",
    ];

    /// 代码标识符形状的正则（字节级，ASCII语义）
    pub const IDENTIFIER_PATTERNS: &[&str] = &[
        r"(?-u)^[a-zA-Z_][a-zA-Z0-9_]*$",
        r"(?-u)^udg_",
        r"(?-u)^gg_",
        r"(?-u)^Trig_",
        r"(?-u)^\w+_\w+$",
    ];

    /// 四字符对象编码（如 A000、h001）
    pub const FOURCC_PATTERN: &str = r"(?-u)^[A-Za-z0-9]{4}$";

    /// 反斜杠后可组成双字节转义的字符
    pub const JASS_ESCAPES: &[u8] = b"\\\"nrtbfva0";

    /// UI调用记号的回看窗口（字节）
    pub const UI_LOOKBACK: usize = 200;

    /// 可疑记号的回看窗口（字节）
    pub const SUSPICIOUS_LOOKBACK: usize = 100;

    /// 赋值模式中 `=` 的回看窗口（字节）
    pub const ASSIGNMENT_LOOKBACK: usize = 50;

    /// 查找所在函数名的回看窗口（字节）
    pub const FUNCTION_LOOKBACK: usize = 500;

    /// 逻辑相关字符串的检测规则（字符串参与比较、哈希或作为存储键）
    pub const CRITICAL_PATTERNS: &[(&str, &str)] = &[
        (r#"(?i-u)if\s+.*==\s*"(.+?)""#, "string_comparison"),
        (r#"(?i-u)StringHash\s*\(\s*"(.+?)"\s*\)"#, "stringhash"),
        (r#"(?i-u)SubString\s*\([^,]+,\s*\d+,\s*\d+\)\s*==\s*"(.+?)""#, "substring_match"),
        (r#"(?i-u)SaveStr\s*\([^,]+,\s*\d+,\s*\d+,\s*"(.+?)"\)"#, "hashtable_key"),
        (r#"(?i-u)set\s+\w+\s*=\s*"([^"]+)""#, "variable_key"),
    ];

    /// 函数声明
    pub const FUNCTION_DECL_PATTERN: &str = r"(?-u)\bfunction\s+([A-Za-z_]\w*)";

    /// 颜色代码包裹：|cAARRGGBB 文本 |r
    pub const COLOR_CODE_PREFIX: &str = r"\|c[0-9a-fA-F]{8}";
}

/// 编码识别配置
pub mod codec_config {
    /// 候选编码，按优先级排列（不是字母顺序，顺序本身就是兼容性约定）
    pub const CANDIDATE_CODECS: &[&str] = &[
        "gb18030", "gbk", "gb2312", "big5", "utf-8", "shift_jis", "euc-kr",
    ];

    /// 既没有记录编码也未要求UTF-8时使用的默认编码
    pub const DEFAULT_LEGACY_CODEC: &str = "gbk";

    /// 旧式编码无法表示的Unicode标点及其ASCII替代
    pub const LEGACY_PUNCTUATION: &[(char, &str)] = &[
        ('\u{201c}', "\""), ('\u{201d}', "\""), ('\u{2018}', "'"), ('\u{2019}', "'"),
        ('\u{201e}', "\""), ('\u{201f}', "\""), ('\u{2032}', "'"), ('\u{2033}', "\""),
        ('\u{2013}', "-"), ('\u{2014}', "--"), ('\u{2015}', "--"), ('\u{2212}', "-"),
        ('\u{2026}', "..."), ('\u{22ef}', "..."),
        ('\u{00a0}', " "), ('\u{202f}', " "), ('\u{2000}', " "), ('\u{2001}', " "),
        ('\u{2002}', " "), ('\u{2003}', " "), ('\u{2004}', " "), ('\u{2005}', " "),
        ('\u{2022}', "*"), ('\u{2023}', "*"), ('\u{25e6}', "*"), ('\u{2043}', "*"),
        ('\u{00b7}', "*"), ('\u{30fb}', "*"),
        ('\u{00d7}', "x"), ('\u{00f7}', "/"), ('\u{2260}', "!="),
        ('\u{2192}', "->"), ('\u{2190}', "<-"),
    ];

    /// 常见的UTF-8被按Windows-1252误解码后的乱码序列
    pub const MOJIBAKE_REPAIRS: &[(&str, &str)] = &[
        ("\u{e2}\u{20ac}\u{153}", "\u{201c}"),
        ("\u{e2}\u{20ac}\u{9d}", "\u{201d}"),
        ("\u{e2}\u{20ac}\u{2122}", "\u{2019}"),
        ("\u{e2}\u{20ac}\u{2dc}", "\u{2018}"),
        ("\u{e2}\u{20ac}\u{201d}", "\u{2014}"),
        ("\u{e2}\u{20ac}\u{201c}", "\u{2013}"),
        ("\u{e2}\u{20ac}\u{a6}", "\u{2026}"),
        ("\u{c2}\u{a0}", "\u{a0}"),
    ];
}

/// 系统标识符配置
pub mod identifier_config {
    /// 内置的标识符表，配置文件缺失时使用
    pub const DEFAULT_IDENTIFIERS: &[(&str, &str)] = &[
        ("全属性", "All Stats"),
        ("力量", "STR"),
        ("敏捷", "AGI"),
        ("智力", "INT"),
        ("生命值", "HP"),
        ("魔法值", "MP"),
        ("生命回复", "HP Regen"),
        ("魔法回复", "MP Regen"),
        ("护甲", "Armor"),
        ("法术抗性", "Magic Resist"),
        ("攻击力", "Attack Damage"),
        ("法强", "Spell Power"),
        ("攻击速度", "Attack Speed"),
        ("攻击间隔", "Attack Interval"),
    ];

    /// 术语的常见近义译法，混合模式下统一为标准译法
    pub const COMPOUND_VARIATIONS: &[(&str, &[&str])] = &[
        ("攻击力", &["Attack Power", "ATK Power", "Atk Power", "ATK", "Atk"]),
        ("攻击速度", &["Attack Rate", "Attack SPD", "ATK Speed", "ATK SPD", "Atk SPD", "ASPD"]),
        ("法强", &["Spell Power", "Magic Power", "AP", "Spell Damage", "Magic Damage"]),
        ("专精", &["Specialty", "Expertise", "Proficiency"]),
        ("护甲", &["Defence", "Defense", "ARM"]),
        ("法术抗性", &["Magic Resistance", "MR", "Spell Resistance", "Spell Resist"]),
        ("全属性", &["All Attributes", "Omnistats"]),
        ("物理吸血", &["Physical Lifesteal", "Life Steal", "Lifesteal", "Physical Life Steal"]),
        ("法术吸血", &["Spell Lifesteal", "Magic Vamp", "Spell Life Steal"]),
        ("冷却缩减", &["CD Reduction", "Cooldown Reduction"]),
        ("物理暴击", &["Physical Critical", "Phys Crit"]),
        ("法术暴击", &["Spell Critical", "Magic Crit"]),
        ("暴击", &["Critical", "Critical Strike", "Crit Strike"]),
        ("穿透", &["Pierce", "Pen"]),
        ("物理穿透", &["Physical Pierce", "Phys Pen"]),
        ("法术穿透", &["Spell Pierce", "Magic Pen"]),
    ];

    /// 标识符检测规则及其类型名
    pub const DETECTION_PATTERNS: &[(&str, &str)] = &[
        (r#"(?-u)(?:LoadStr|GetStr)\s*\([^)]+\)\s*==\s*"([^"]+)""#, "string_comparison"),
        (r#"(?-u)StringHash\s*\(\s*"([^"]+)"\s*\)"#, "stringhash"),
        (r#"(?-u)LoadStr\s*\([^)]+\s*,\s*"([^"]+)"\s*\)"#, "loadstr_param"),
        (r#"(?-u)SaveStr\s*\([^,]+,\s*[^,]+,\s*[^,]+,\s*"([^"]+)"\s*\)"#, "savestr_value"),
        (r#"(?i-u)Save\w+\s*\([^,]+,\s*[^,]+,\s*"([^"]+)"\s*,"#, "hashtable_key"),
        (r#"(?-u)set\s+\w+\s*=\s*"([^"]+)""#, "variable_assign"),
        (
            r#"(?-u)(?:DisplayTextToPlayer|BJDebugMsg|DialogSetMessage)\s*\([^,]+,\s*"([^"]+)"\s*\)"#,
            "ui_direct",
        ),
        (r#"(?-u)"[^"]*"\s*\+\s*"([^"]+)""#, "concat_part"),
    ];

    /// 路径特征，命中即跳过
    pub const PATH_PATTERNS: &[&str] = &[
        r"(?i-u)^[A-Za-z]:[\\/]",
        r"(?-u)^[\\/][\\/]",
        r"(?i-u)ReplaceableTextures[\\/]",
        r"(?i-u)Sounds?[\\/]",
        r"(?i-u)Models?[\\/]",
        r"(?i-u)Textures?[\\/]",
        r"(?i-u)\.(blp|mdl|mdx|tga|mp3|wav|w3m|w3x|slk|txt|ai|j)$",
    ];

    /// 带分隔符时也视为资源路径的扩展名
    pub const ASSET_EXTENSIONS: &[&str] = &[".blp", ".mdl", ".mdx", ".mp3"];

    /// 可编辑词典文件名
    pub const DICTIONARY_FILE: &str = "identifier_dictionary.txt";
    /// 仅译文模板文件名
    pub const TEMPLATE_FILE: &str = "identifier_translations.txt";
    /// 术语列表文件名
    pub const TERM_LIST_FILE: &str = "identifier_chinese.txt";
    /// 机器可读词典文件名
    pub const DICTIONARY_JSON_FILE: &str = "identifier_dictionary.json";
    /// 检测报告文件名
    pub const DETECTION_REPORT_FILE: &str = "system_identifiers_detected.txt";
}

/// 数据文件配置
pub mod data_config {
    /// 默认处理的物编文本文件
    pub const DEFAULT_DATA_FILES: &[&str] = &[
        "CampaignAbilityStrings.txt",
        "CampaignUnitStrings.txt",
        "Itemstrings.txt",
        "CommonAbilityStrings.txt",
        "CampaignUpgradeStrings.txt",
        "ItemAbilityStrings.txt",
    ];

    /// 默认脚本文件
    pub const DEFAULT_SCRIPT_FILE: &str = "war3map.j";

    /// 需要保持引号包裹的自定义框字段
    pub const CUSTOM_BOX_KEYS: &[&str] = &["Ubertip", "Tip", "Description", "Hotkey"];

    /// 外部规则目录
    pub const DEFAULT_DATA_DIR: &str = "data";

    /// 默认备份目录
    pub const DEFAULT_BACKUP_DIR: &str = "backups";
}

/// 翻译服务配置
pub mod service_config {
    /// 本地翻译API地址
    pub const LOCAL_API_URL: &str = "http://localhost:1188/translate";

    /// 默认源语言
    pub const DEFAULT_SOURCE_LANG: &str = "zh";

    /// 默认目标语言
    pub const DEFAULT_TARGET_LANG: &str = "en";

    /// 默认批处理大小
    pub const DEFAULT_BATCH_SIZE: usize = 20;

    /// 默认并发批次数量
    pub const DEFAULT_CONCURRENT_BATCHES: usize = 5;

    /// 默认最大尝试次数
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// 重试退避基数（毫秒）
    pub const RETRY_DELAY_BASE_MS: u64 = 1000;

    /// 单次请求超时时间（秒）
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// 外部打包工具超时时间（秒）
    pub const ARCHIVER_TIMEOUT_SECONDS: u64 = 300;
}

/// 实用工具函数
/// 验证API URL是否有效
pub fn is_valid_api_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.scheme() == "http" || parsed.scheme() == "https",
        Err(_) => false,
    }
}

/// 查找术语的近义译法表
pub fn variations_for(term: &str) -> &'static [&'static str] {
    identifier_config::COMPOUND_VARIATIONS
        .iter()
        .find(|(chinese, _)| *chinese == term)
        .map(|(_, variants)| *variants)
        .unwrap_or(&[])
}
