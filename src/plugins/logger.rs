use crate::api::SendPacket;
use crate::config::{AppConfig, build_config};
use crate::event::{Context, EventType};
use crate::message::MessageKind;
use crate::plugins::{Plugin, PluginError};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use toml::Value;

pub const NAME: &str = "logger";

#[derive(Serialize, Deserialize)]
struct LoggerConfig {
    enabled: bool,
    #[serde(default)]
    debug: bool,
}

pub fn default_config() -> Value {
    build_config(LoggerConfig {
        enabled: true,
        debug: false,
    })
}

/// 控制台聊天日志：打印收发的每条消息
pub struct Logger {
    debug: bool,
}

impl Logger {
    pub fn new(config: &AppConfig) -> Self {
        let cfg: LoggerConfig = config.plugin(NAME).unwrap_or(LoggerConfig {
            enabled: true,
            debug: false,
        });
        Self { debug: cfg.debug }
    }
}

impl Plugin for Logger {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handle(&self, ctx: Context) -> BoxFuture<'_, Result<Option<Context>, PluginError>> {
        Box::pin(async move {
            match &ctx.event {
                EventType::Receive(msg) => {
                    if self.debug {
                        debug!(target: "Logger", "msg: {:?}", msg);
                    }

                    if msg.kind == MessageKind::Revoke {
                        info!(
                            target: "Chat",
                            "撤回 <- [{}] {}",
                            msg.from_user_id, msg.msg_id
                        );
                    } else if msg.is_group {
                        // 格式: 接收 <- 群聊 [Group] [Sender(ID)] Content
                        info!(
                            target: "Chat",
                            "接收 <- 群聊 [{}] [{}({})] {}",
                            msg.from_user_id,
                            msg.sender_name(),
                            msg.sender_id().unwrap_or("?"),
                            msg.render_tag()
                        );
                    } else {
                        info!(
                            target: "Chat",
                            "接收 <- 私聊 [{}] {}",
                            msg.from_user_id,
                            msg.render_tag()
                        );
                    }
                }
                EventType::BeforeSend(packet) => {
                    if self.debug {
                        debug!(target: "Logger", "packet: {:?}", packet);
                    }
                    let scope = if packet.target().ends_with("@chatroom") {
                        "群聊"
                    } else {
                        "私聊"
                    };
                    match packet {
                        SendPacket::Text { .. } => info!(
                            target: "Chat",
                            "发送 -> {} [{}] {}",
                            scope,
                            packet.target(),
                            packet.summary()
                        ),
                        SendPacket::Image { .. } | SendPacket::File { .. } => info!(
                            target: "Chat",
                            "发送 -> {} [{}] (媒体) {}",
                            scope,
                            packet.target(),
                            packet.summary()
                        ),
                    }
                }
                EventType::Handle(_) | EventType::Init => {}
            }

            Ok(Some(ctx))
        })
    }
}
