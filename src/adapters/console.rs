use crate::api::{ApiError, ChatroomInfo, ContactInfo, SendPacket, WeChatApi};
use crate::config::AppConfig;
use crate::event::{BotStatus, Context, EventType};
use crate::message::{ChatMessage, MessageKind};
use crate::plugins::{self, PluginSet};
use crate::scheduler::Scheduler;
use chrono::Local;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};

pub const CONSOLE_USER: &str = "console_user";
pub const CONSOLE_GROUP: &str = "console@chatroom";

/// 控制台出站客户端：把发送内容打印到终端
pub struct ConsoleApi;

impl WeChatApi for ConsoleApi {
    fn send<'a>(&'a self, packet: &'a SendPacket) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            println!(
                "\x1b[36m[Bot -> {}] > \x1b[0m{}",
                packet.target(),
                packet.summary()
            );
            Ok(())
        })
    }

    fn contact_info<'a>(
        &'a self,
        wxid: &'a str,
    ) -> BoxFuture<'a, Result<Option<ContactInfo>, ApiError>> {
        Box::pin(async move {
            Ok((wxid == CONSOLE_USER).then(|| ContactInfo {
                user_name: wxid.to_string(),
                nick_name: Some("ConsoleUser".to_string()),
                remark: None,
            }))
        })
    }

    fn chatroom_info<'a>(
        &'a self,
        chatroom_id: &'a str,
    ) -> BoxFuture<'a, Result<ChatroomInfo, ApiError>> {
        Box::pin(async move {
            Ok(ChatroomInfo {
                chatroom_id: chatroom_id.to_string(),
                nick_name: Some("控制台群聊".to_string()),
                remark: None,
            })
        })
    }
}

/// 把一行输入转换为入站消息
///
/// - 以 `{` 开头：按 JSON 解析为完整的 ChatMessage
/// - `/group 内容`：模拟群聊文本
/// - `/revoke ID`：模拟撤回通知
/// - 其他：私聊文本
pub fn parse_line(line: &str, seq: u64) -> Result<ChatMessage, ApiError> {
    if line.starts_with('{') {
        let mut bytes = line.as_bytes().to_vec();
        let msg: ChatMessage = simd_json::serde::from_slice(&mut bytes)?;
        return Ok(msg);
    }

    let now = Local::now().timestamp();
    let id = format!("console-{}", seq);

    let (kind, is_group, content) = if let Some(rest) = line.strip_prefix("/group ") {
        (MessageKind::Text, true, rest.to_string())
    } else if let Some(rest) = line.strip_prefix("/revoke ") {
        (
            MessageKind::Revoke,
            false,
            format!(
                "<sysmsg type=\"revokemsg\"><revokemsg><msgid>{}</msgid><replacemsg><![CDATA[\"ConsoleUser\" 撤回了一条消息]]></replacemsg></revokemsg></sysmsg>",
                rest.trim()
            ),
        )
    } else {
        (MessageKind::Text, false, line.to_string())
    };

    let conversation = if is_group { CONSOLE_GROUP } else { CONSOLE_USER };
    let mut msg = ChatMessage::new(id, kind, conversation);
    msg.content = content;
    msg.is_group = is_group;
    msg.create_time = Some(now);
    msg.to_user_id = "console_bot".to_string();
    if is_group {
        msg.actual_user_id = Some(CONSOLE_USER.to_string());
        msg.actual_user_nickname = Some("ConsoleUser".to_string());
    }
    Ok(msg)
}

/// 控制台适配器入口
pub fn entry(
    config: Arc<AppConfig>,
    scheduler: Arc<Scheduler>,
    plugins: PluginSet,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        info!(target: "Console", "已启动控制台模式。输入文本模拟私聊，/group 文本 模拟群聊，/revoke ID 模拟撤回");

        let base = Context {
            event: EventType::Init,
            config,
            scheduler,
            api: Arc::new(ConsoleApi),
            plugins,
            bot: BotStatus {
                adapter: "console".to_string(),
                self_id: Some("console_bot".to_string()),
            },
        };

        let seq = AtomicU64::new(1);
        let mut reader = BufReader::new(tokio::io::stdin()).lines();

        // 循环读取标准输入
        while let Ok(Some(line)) = reader.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let msg = match parse_line(line, seq.fetch_add(1, Ordering::SeqCst)) {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "Console", "无法解析输入: {}", e);
                    continue;
                }
            };

            if let Err(e) = plugins::dispatch_message(&base, msg).await {
                warn!(target: "Console", "处理消息时出错: {}", e);
            }
        }
    })
}
