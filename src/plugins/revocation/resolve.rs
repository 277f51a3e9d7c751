use super::cache::{CachedMessage, MessageCache};
use crate::message::ChatMessage;
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// 撤回通知
#[derive(Debug, Clone)]
pub struct RevokeNotice {
    /// 协议内嵌的原始标记文本 (XML)
    pub raw_markup: String,
    /// 框架直接给出的被撤回消息 ID
    pub declared_id: Option<String>,
    pub conversation_id: String,
    pub is_group: bool,
}

impl RevokeNotice {
    pub fn from_message(msg: &ChatMessage) -> Self {
        Self {
            raw_markup: msg.content.clone(),
            declared_id: msg.revoked_msg_id.clone(),
            conversation_id: msg.from_user_id.clone(),
            is_group: msg.is_group,
        }
    }
}

static NEW_MSGID_REGEX: OnceLock<Regex> = OnceLock::new();
static MSGID_REGEX: OnceLock<Regex> = OnceLock::new();
static REVOKER_HINT_REGEX: OnceLock<Regex> = OnceLock::new();

fn new_msgid_regex() -> &'static Regex {
    NEW_MSGID_REGEX
        .get_or_init(|| Regex::new(r"(?s)<newmsgid>\s*(.*?)\s*</newmsgid>").expect("Invalid Regex"))
}

fn msgid_regex() -> &'static Regex {
    MSGID_REGEX.get_or_init(|| Regex::new(r"(?s)<msgid>\s*(.*?)\s*</msgid>").expect("Invalid Regex"))
}

fn revoker_hint_regex() -> &'static Regex {
    REVOKER_HINT_REGEX.get_or_init(|| {
        Regex::new(r#"["“]([^"“”<>]+?)["”]\s*(?:撤回了一条消息|(?:has )?(?:revoked|recalled) a message)"#)
            .expect("Invalid Regex")
    })
}

fn tag_value(re: &Regex, markup: &str) -> Option<String> {
    re.captures(markup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 候选 ID 列表，按可信度从高到低：声明 ID → `<newmsgid>` → `<msgid>`，去重
pub fn candidates(notice: &RevokeNotice) -> Vec<String> {
    let ordered = [
        notice
            .declared_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        tag_value(new_msgid_regex(), &notice.raw_markup),
        tag_value(msgid_regex(), &notice.raw_markup),
    ];

    let mut out: Vec<String> = Vec::with_capacity(3);
    for id in ordered.into_iter().flatten() {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// 依次探测缓存，返回第一个命中的 (ID, 条目)
pub async fn resolve(
    cache: &MessageCache,
    notice: &RevokeNotice,
    now: i64,
) -> Option<(String, Arc<CachedMessage>)> {
    for id in candidates(notice) {
        if let Some(entry) = cache.lookup(&id, now).await {
            return Some((id, entry));
        }
    }
    None
}

/// 从撤回提示文本中解析撤回者昵称，如 `"Alice" 撤回了一条消息`
pub fn revoker_hint(markup: &str) -> Option<String> {
    tag_value(revoker_hint_regex(), markup)
}
