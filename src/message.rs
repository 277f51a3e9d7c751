use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// 消息类型 (封闭集合，新增类型时由编译器检查所有 match 分支)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Voice,
    File,
    /// 链接 / 卡片分享 / 小程序
    Sharing,
    /// 名片
    Card,
    /// 拍一拍
    Pat,
    System,
    Join,
    Leave,
    Revoke,
    Other,
}

impl MessageKind {
    /// 大写类型名，用于日志与通知
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Text => "TEXT",
            MessageKind::Image => "IMAGE",
            MessageKind::Video => "VIDEO",
            MessageKind::Voice => "VOICE",
            MessageKind::File => "FILE",
            MessageKind::Sharing => "SHARING",
            MessageKind::Card => "CARD",
            MessageKind::Pat => "PATPAT",
            MessageKind::System => "SYSTEM",
            MessageKind::Join => "JOIN_GROUP",
            MessageKind::Leave => "EXIT_GROUP",
            MessageKind::Revoke => "REVOKE",
            MessageKind::Other => "OTHER",
        }
    }

    /// 中文名称
    pub fn label(self) -> &'static str {
        match self {
            MessageKind::Text => "文本",
            MessageKind::Image => "图片",
            MessageKind::Video => "视频",
            MessageKind::Voice => "语音",
            MessageKind::File => "文件",
            MessageKind::Sharing => "链接/卡片",
            MessageKind::Card => "名片",
            MessageKind::Pat => "拍一拍",
            MessageKind::System => "系统消息",
            MessageKind::Join => "入群通知",
            MessageKind::Leave => "退群通知",
            MessageKind::Revoke => "撤回通知",
            MessageKind::Other => "未知类型",
        }
    }

    /// 需要落地本地文件才能重放的媒体类型
    pub fn is_media(self) -> bool {
        matches!(
            self,
            MessageKind::Image | MessageKind::Video | MessageKind::Voice | MessageKind::File
        )
    }
}

/// 入站消息 (由适配器从协议载荷构造)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 主消息 ID
    pub msg_id: String,
    /// 协议上报的另一个内部 ID (与主 ID 指向同一条消息)
    #[serde(default)]
    pub secondary_id: Option<String>,
    pub kind: MessageKind,
    /// 文本内容；媒体消息为本地路径或原始 XML
    #[serde(default)]
    pub content: String,
    /// 会话 ID (群聊 ID 或好友 ID)
    pub from_user_id: String,
    #[serde(default)]
    pub to_user_id: String,
    /// 群聊中的实际发送者
    #[serde(default)]
    pub actual_user_id: Option<String>,
    #[serde(default)]
    pub actual_user_nickname: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    /// Unix 秒；缺失或无法识别时为 None
    #[serde(default)]
    pub create_time: Option<i64>,
    /// 媒体下载地址
    #[serde(default)]
    pub url: Option<String>,
    /// 框架直接提供的被撤回消息 ID
    #[serde(default)]
    pub revoked_msg_id: Option<String>,
}

impl ChatMessage {
    pub fn new(msg_id: impl Into<String>, kind: MessageKind, from_user_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            secondary_id: None,
            kind,
            content: String::new(),
            from_user_id: from_user_id.into(),
            to_user_id: String::new(),
            actual_user_id: None,
            actual_user_nickname: None,
            is_group: false,
            create_time: None,
            url: None,
            revoked_msg_id: None,
        }
    }

    /// 发送者 ID：群聊取实际发送者，私聊取会话对象
    pub fn sender_id(&self) -> Option<&str> {
        if self.is_group {
            self.actual_user_id.as_deref().filter(|s| !s.is_empty())
        } else {
            Some(self.from_user_id.as_str()).filter(|s| !s.is_empty())
        }
    }

    /// 发送者显示名称 (昵称 → ID → "未知成员")
    pub fn sender_name(&self) -> &str {
        self.actual_user_nickname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.sender_id())
            .unwrap_or(UNKNOWN_MEMBER)
    }

    /// 消息创建时间 (本地时区)
    pub fn created_at(&self) -> Option<DateTime<Local>> {
        self.create_time
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.with_timezone(&Local))
    }

    /// 将消息渲染为单行可读标签，用于聊天记录与控制台日志
    pub fn render_tag(&self) -> String {
        match self.kind {
            MessageKind::Text => render_text(&self.content),
            MessageKind::Image => "[图片]".to_string(),
            MessageKind::Video => "[视频]".to_string(),
            MessageKind::Voice => "[语音]".to_string(),
            MessageKind::File => {
                let name = Path::new(&self.content)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "未知文件".to_string());
                format!("[文件: {}]", name)
            }
            MessageKind::Sharing => {
                let title = capture(title_regex(), &self.content)
                    .unwrap_or_else(|| "未知链接".to_string());
                format!("[链接/卡片: {}]", title)
            }
            MessageKind::Card => {
                let name = capture(card_nickname_regex(), &self.content)
                    .unwrap_or_else(|| "未知用户".to_string());
                format!("[名片: {}]", name)
            }
            MessageKind::Pat => "[拍了拍]".to_string(),
            MessageKind::Join => format!("[入群通知: {}]", self.sender_name()),
            MessageKind::Leave => format!("[退群通知: {}]", self.sender_name()),
            MessageKind::System => {
                let snippet: String = self
                    .content
                    .trim()
                    .replace('\n', " ")
                    .chars()
                    .take(50)
                    .collect();
                if snippet.is_empty() {
                    "[系统消息]".to_string()
                } else {
                    format!("[系统消息: {}...]", snippet)
                }
            }
            MessageKind::Revoke => "[撤回了一条消息]".to_string(),
            MessageKind::Other => format!("[未知类型: {}]", self.kind.name()),
        }
    }
}

pub const UNKNOWN_MEMBER: &str = "未知成员";

static QUOTE_REGEX: OnceLock<Regex> = OnceLock::new();
static TITLE_REGEX: OnceLock<Regex> = OnceLock::new();
static CARD_NICKNAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn quote_regex() -> &'static Regex {
    QUOTE_REGEX.get_or_init(|| {
        Regex::new(r"(?s)^「(.+?)\s*:\s*<msg>.*?</msg>\s*」\s*[-—][-— ]*\s*(.*)$").expect("Invalid Regex")
    })
}

fn title_regex() -> &'static Regex {
    TITLE_REGEX.get_or_init(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("Invalid Regex"))
}

fn card_nickname_regex() -> &'static Regex {
    CARD_NICKNAME_REGEX
        .get_or_init(|| Regex::new(r#"nickname="([^"]*)""#).expect("Invalid Regex"))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 文本消息：引用回复改写为 [引用消息 「发送者」] 回复内容，换行压成空格
fn render_text(content: &str) -> String {
    if let Some(caps) = quote_regex().captures(content) {
        let quoted_sender = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let reply = caps
            .get(2)
            .map(|m| m.as_str().trim().replace('\n', " "))
            .unwrap_or_default();
        return format!("[引用消息 「{}」] {}", quoted_sender, reply);
    }
    content.replace('\n', " ")
}
