use crate::event::{Context, EventType};
use crate::plugins::{self, PluginError};
use futures_util::future::BoxFuture;
use serde::Deserialize;

pub type ApiError = Box<dyn std::error::Error + Send + Sync>;

/// 出站消息包，发送前会先经过插件流水线 (BeforeSend)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendPacket {
    Text { to: String, content: String },
    Image { to: String, url: String },
    File { to: String, url: String, name: String },
}

impl SendPacket {
    pub fn target(&self) -> &str {
        match self {
            SendPacket::Text { to, .. }
            | SendPacket::Image { to, .. }
            | SendPacket::File { to, .. } => to,
        }
    }

    /// 人类可读的摘要，用于日志
    pub fn summary(&self) -> String {
        match self {
            SendPacket::Text { content, .. } => content.replace('\n', " "),
            SendPacket::Image { url, .. } => format!("[图片] {}", url),
            SendPacket::File { name, url, .. } => format!("[文件: {}] {}", name, url),
        }
    }
}

/// 联系人简要信息
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactInfo {
    #[serde(rename = "userName", default)]
    pub user_name: String,
    #[serde(rename = "nickName", default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl ContactInfo {
    /// 备注优先，其次昵称
    pub fn display_name(&self) -> Option<&str> {
        self.remark
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.nick_name.as_deref().filter(|s| !s.is_empty()))
    }
}

/// 群聊信息
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatroomInfo {
    #[serde(rename = "chatroomId", default)]
    pub chatroom_id: String,
    #[serde(rename = "nickName", default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl ChatroomInfo {
    /// 群名优先，其次备注
    pub fn display_name(&self) -> Option<&str> {
        self.nick_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.remark.as_deref().filter(|s| !s.is_empty()))
    }
}

/// 协议客户端：发送消息与查询名称
pub trait WeChatApi: Send + Sync {
    fn send<'a>(&'a self, packet: &'a SendPacket) -> BoxFuture<'a, Result<(), ApiError>>;

    fn contact_info<'a>(
        &'a self,
        wxid: &'a str,
    ) -> BoxFuture<'a, Result<Option<ContactInfo>, ApiError>>;

    fn chatroom_info<'a>(
        &'a self,
        chatroom_id: &'a str,
    ) -> BoxFuture<'a, Result<ChatroomInfo, ApiError>>;
}

/// 发送文本消息 (经过插件流水线)
pub async fn send_text(
    ctx: &Context,
    to: &str,
    content: impl Into<String>,
) -> Result<(), PluginError> {
    send_packet(
        ctx,
        SendPacket::Text {
            to: to.to_string(),
            content: content.into(),
        },
    )
    .await
}

/// 发送图片，url 需可被协议服务端拉取
pub async fn send_image(ctx: &Context, to: &str, url: &str) -> Result<(), PluginError> {
    send_packet(
        ctx,
        SendPacket::Image {
            to: to.to_string(),
            url: url.to_string(),
        },
    )
    .await
}

pub async fn send_file(ctx: &Context, to: &str, url: &str, name: &str) -> Result<(), PluginError> {
    send_packet(
        ctx,
        SendPacket::File {
            to: to.to_string(),
            url: url.to_string(),
            name: name.to_string(),
        },
    )
    .await
}

pub async fn send_packet(ctx: &Context, packet: SendPacket) -> Result<(), PluginError> {
    if packet.target().is_empty() {
        return Err("发送目标为空".into());
    }
    plugins::run(ctx.with_event(EventType::BeforeSend(packet))).await?;
    Ok(())
}
