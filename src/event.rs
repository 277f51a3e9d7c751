use crate::api::{SendPacket, WeChatApi};
use crate::config::AppConfig;
use crate::message::ChatMessage;
use crate::plugins::PluginSet;
use crate::scheduler::Scheduler;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct BotStatus {
    /// 适配器名称 (gewechat / console)
    pub adapter: String,
    /// 当前登录账号的 wxid
    pub self_id: Option<String>,
}

/// 统一的上下文，包含事件数据、配置、出站客户端与插件集合
/// 注意：event 字段直接持有 EventType，插件链中按值移交所有权。
#[derive(Clone)]
pub struct Context {
    pub event: EventType,
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<Scheduler>,
    pub api: Arc<dyn WeChatApi>,
    pub plugins: PluginSet,
    pub bot: BotStatus,
}

impl Context {
    /// 以相同的运行环境包装一个新事件
    pub fn with_event(&self, event: EventType) -> Context {
        Context {
            event,
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            api: self.api.clone(),
            plugins: self.plugins.clone(),
            bot: self.bot.clone(),
        }
    }

    /// 当前事件携带的消息 (接收阶段或处理阶段)
    pub fn as_message(&self) -> Option<&ChatMessage> {
        match &self.event {
            EventType::Receive(msg) | EventType::Handle(msg) => Some(msg),
            _ => None,
        }
    }
}

/// 事件类型
#[derive(Debug, Clone)]
pub enum EventType {
    /// 收到消息 (所有消息，包括撤回通知)
    Receive(ChatMessage),
    /// 消息已就绪，可作为指令处理
    Handle(ChatMessage),
    /// 插件准备发送消息前的拦截事件
    BeforeSend(SendPacket),
    /// 系统初始化事件
    Init,
}
