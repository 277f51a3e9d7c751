// lib.rs
//
// ================================================================================
// revoke-relay - 防撤回与群聊记录
//
// 架构：协议适配器 | 插件流水线 | 限时消息缓存 | 定时清理
// ================================================================================

#[macro_use]
pub mod log;

pub mod adapters;
pub mod api;
pub mod config;
pub mod event;
pub mod message;
pub mod plugins;
pub mod scheduler;

pub use config::AppConfig;
pub use event::{BotStatus, Context, EventType};
pub use message::{ChatMessage, MessageKind};
