use chrono::{DateTime, Local};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

static HOSTILE_CHARS: OnceLock<Regex> = OnceLock::new();
static SEPARATOR_RUNS: OnceLock<Regex> = OnceLock::new();

/// 8 位随机十六进制串
pub fn short_token() -> String {
    format!("{:08x}", rand::rng().random::<u32>())
}

/// 将任意标识转换为安全的文件名；结果为空时返回随机名称
pub fn sanitize_filename(name: &str) -> String {
    let hostile = HOSTILE_CHARS.get_or_init(|| Regex::new(r#"[\\/*?:"<>|]+"#).expect("Invalid Regex"));
    let runs = SEPARATOR_RUNS.get_or_init(|| Regex::new(r"[\s_]+").expect("Invalid Regex"));

    let replaced = hostile.replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    let collapsed = runs.replace_all(trimmed, "_");

    if collapsed.is_empty() {
        format!("unknown_{}", short_token())
    } else {
        collapsed.into_owned()
    }
}

/// 聊天记录使用的分钟级时间格式
pub fn format_minute(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}
