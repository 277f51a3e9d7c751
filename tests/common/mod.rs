#![allow(dead_code)]

use futures_util::future::BoxFuture;
use revoke_relay::api::{ApiError, ChatroomInfo, ContactInfo, SendPacket, WeChatApi};
use revoke_relay::config::{AppConfig, build_config};
use revoke_relay::event::{BotStatus, Context, EventType};
use revoke_relay::message::{ChatMessage, MessageKind};
use revoke_relay::plugins::revocation::{self, Revocation, RevocationConfig};
use revoke_relay::plugins::{Plugin, PluginSet};
use revoke_relay::scheduler::Scheduler;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const RECEIVER: &str = "wxid_receiver";

/// 记录所有出站包的协议客户端
#[derive(Default)]
pub struct RecordingApi {
    pub sent: Mutex<Vec<SendPacket>>,
    pub group_names: HashMap<String, String>,
    /// 媒体发送一律失败
    pub fail_media: bool,
}

impl RecordingApi {
    pub fn sent(&self) -> Vec<SendPacket> {
        self.sent.lock().unwrap().clone()
    }
}

impl WeChatApi for RecordingApi {
    fn send<'a>(&'a self, packet: &'a SendPacket) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            if self.fail_media && !matches!(packet, SendPacket::Text { .. }) {
                return Err("upload failed".into());
            }
            self.sent.lock().unwrap().push(packet.clone());
            Ok(())
        })
    }

    fn contact_info<'a>(
        &'a self,
        _wxid: &'a str,
    ) -> BoxFuture<'a, Result<Option<ContactInfo>, ApiError>> {
        Box::pin(async { Ok(None) })
    }

    fn chatroom_info<'a>(
        &'a self,
        chatroom_id: &'a str,
    ) -> BoxFuture<'a, Result<ChatroomInfo, ApiError>> {
        Box::pin(async move {
            match self.group_names.get(chatroom_id) {
                Some(name) => Ok(ChatroomInfo {
                    chatroom_id: chatroom_id.to_string(),
                    nick_name: Some(name.clone()),
                    remark: None,
                }),
                None => Err("offline".into()),
            }
        })
    }
}

pub struct Harness {
    pub plugin: Arc<Revocation>,
    pub ctx: Context,
    pub api: Arc<RecordingApi>,
}

/// 以临时数据目录构建只含防撤回插件的流水线
pub async fn harness(data_dir: &Path, callback_url: &str, api: RecordingApi) -> Harness {
    let mut config = AppConfig {
        data_dir: data_dir.to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    config.gewechat.callback_url = callback_url.to_string();
    config.plugins.insert(
        revocation::NAME.to_string(),
        build_config(RevocationConfig {
            receiver: RECEIVER.to_string(),
            ..RevocationConfig::default()
        }),
    );

    let scheduler = Arc::new(Scheduler::new());
    let plugin = Arc::new(Revocation::new(&config, &scheduler).await.unwrap());
    let plugins: PluginSet = Arc::new(vec![plugin.clone() as Arc<dyn Plugin>]);
    let api = Arc::new(api);

    let ctx = Context {
        event: EventType::Init,
        config: Arc::new(config),
        scheduler,
        api: api.clone(),
        plugins,
        bot: BotStatus::default(),
    };

    Harness { plugin, ctx, api }
}

pub fn group_message(id: &str, kind: MessageKind, content: &str, created_at: i64) -> ChatMessage {
    let mut msg = ChatMessage::new(id, kind, "g1");
    msg.content = content.to_string();
    msg.is_group = true;
    msg.actual_user_id = Some("u1".to_string());
    msg.actual_user_nickname = Some("Alice".to_string());
    msg.create_time = Some(created_at);
    msg
}

pub fn revoke_notice(id: &str, markup: &str) -> ChatMessage {
    let mut msg = ChatMessage::new(id, MessageKind::Revoke, "g1");
    msg.content = markup.to_string();
    msg.is_group = true;
    msg
}
