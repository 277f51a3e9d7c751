use crate::adapters::AdapterError;
use crate::config::AppConfig;
use crate::event::{BotStatus, Context, EventType};
use crate::message::{ChatMessage, MessageKind};
use crate::plugins::revocation::{self, temp_store::TempStore};
use crate::plugins::{self, PluginSet};
use crate::scheduler::Scheduler;
use futures_util::future::BoxFuture;
use regex::Regex;
use simd_json::OwnedValue;
use simd_json::base::ValueAsScalar;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub mod api;
pub mod server;

use api::GewechatClient;

const QUEUE_SIZE: usize = 1024;

/// 回调解析结果
#[derive(Debug)]
pub struct Incoming {
    pub msg: ChatMessage,
    /// 媒体消息的原始 XML，用于向协议端换取下载地址
    pub media_xml: Option<String>,
    /// 当前登录账号
    pub self_wxid: Option<String>,
}

/// GeWeChat 适配器入口
pub fn entry(
    config: Arc<AppConfig>,
    scheduler: Arc<Scheduler>,
    plugins: PluginSet,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Err(e) = run(config, scheduler, plugins).await {
            error!(target: "Gewechat", "适配器启动失败: {}", e);
        }
    })
}

async fn run(
    config: Arc<AppConfig>,
    scheduler: Arc<Scheduler>,
    plugins: PluginSet,
) -> Result<(), AdapterError> {
    let client = Arc::new(GewechatClient::new(&config.gewechat)?);
    if client.app_id().is_empty() {
        warn!(target: "Gewechat", "gewechat.app_id 未配置，发送消息将失败");
    }
    if config.gewechat.callback_url.trim().is_empty() {
        warn!(target: "Gewechat", "gewechat.callback_url 未配置，撤回的媒体文件无法回传");
    }

    let store = TempStore::new(revocation::temp_dir(&config))
        .await
        .map_err(|e| format!("{:#}", e))?;
    let listener = TcpListener::bind(&config.gewechat.listen).await?;
    info!(target: "Gewechat", "回调服务已监听 {}", config.gewechat.listen);

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(QUEUE_SIZE);
    tokio::spawn(server::serve(listener, tx, store));

    let mut base = Context {
        event: EventType::Init,
        config,
        scheduler,
        api: client.clone(),
        plugins,
        bot: BotStatus {
            adapter: "gewechat".to_string(),
            self_id: None,
        },
    };

    // 事件按到达顺序逐条处理
    while let Some(mut body) = rx.recv().await {
        match parse_callback(&mut body) {
            Ok(Some(incoming)) => process(&mut base, &client, incoming).await,
            Ok(None) => {}
            Err(e) => warn!(target: "Gewechat", "回调解析失败: {}", e),
        }
    }
    Ok(())
}

async fn process(base: &mut Context, client: &GewechatClient, incoming: Incoming) {
    if let Some(self_id) = incoming.self_wxid
        && base.bot.self_id.as_deref() != Some(self_id.as_str())
    {
        info!(target: "Gewechat", "当前登录账号: {}", self_id);
        base.bot.self_id = Some(self_id);
    }

    let mut msg = incoming.msg;
    if let Some(xml) = incoming.media_xml {
        let raw_id = msg.secondary_id.clone().unwrap_or_else(|| msg.msg_id.clone());
        match client.media_url(msg.kind, &xml, &raw_id).await {
            Ok(url) => msg.url = Some(url),
            Err(e) => warn!(
                target: "Gewechat",
                "获取{}下载地址失败 ({}): {}",
                msg.kind.label(),
                msg.msg_id,
                e
            ),
        }
    }

    if let Err(e) = plugins::dispatch_message(base, msg).await {
        error!(target: "Gewechat", "事件处理出错: {}", e);
    }
}

static APPMSG_TYPE_REGEX: OnceLock<Regex> = OnceLock::new();
static TITLE_REGEX: OnceLock<Regex> = OnceLock::new();
static REFER_REGEX: OnceLock<Regex> = OnceLock::new();

fn appmsg_type_regex() -> &'static Regex {
    APPMSG_TYPE_REGEX.get_or_init(|| Regex::new(r"<type>\s*(\d+)\s*</type>").expect("Invalid Regex"))
}

fn title_regex() -> &'static Regex {
    TITLE_REGEX.get_or_init(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("Invalid Regex"))
}

fn refer_regex() -> &'static Regex {
    REFER_REGEX.get_or_init(|| {
        Regex::new(r"(?s)<refermsg>.*?<displayname>(.*?)</displayname>.*?<content>(.*?)</content>")
            .expect("Invalid Regex")
    })
}

fn nested_str(v: &OwnedValue, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|inner| inner.get_str("string").or_else(|| inner.as_str()))
        .map(str::to_string)
}

fn id_string(v: &OwnedValue, key: &str) -> Option<String> {
    v.get_u64(key)
        .map(|n| n.to_string())
        .or_else(|| v.get_i64(key).map(|n| n.to_string()))
        .or_else(|| v.get_str(key).map(str::to_string))
        .filter(|s| !s.is_empty() && s != "0")
}

/// 群消息内容以 `wxid:\n` 开头，拆出发送者
fn split_sender(content: &str) -> Option<(&str, &str)> {
    let (head, rest) = content.split_once(":\n")?;
    let head = head.trim();
    if head.is_empty() || head.contains(['<', ' ', '\n']) {
        return None;
    }
    Some((head, rest))
}

/// 解析一条回调；非消息回调 (测试、联系人变更等) 返回 None
pub fn parse_callback(body: &mut [u8]) -> Result<Option<Incoming>, AdapterError> {
    let value = simd_json::to_owned_value(body)?;

    if value.get("testMsg").is_some() {
        debug!(target: "Gewechat", "收到回调测试消息");
        return Ok(None);
    }
    let type_name = value.get_str("TypeName").unwrap_or("");
    if type_name != "AddMsg" {
        debug!(target: "Gewechat", "忽略回调类型: {}", type_name);
        return Ok(None);
    }

    let self_wxid = value.get_str("Wxid").map(str::to_string);
    let data = value.get("Data").ok_or("回调缺少 Data 字段")?;

    let raw_id = id_string(data, "MsgId");
    let new_id = id_string(data, "NewMsgId");
    let msg_id = new_id.clone().or_else(|| raw_id.clone()).ok_or("回调缺少消息 ID")?;
    let secondary_id = raw_id.filter(|id| *id != msg_id);

    let from = nested_str(data, "FromUserName").unwrap_or_default();
    let to = nested_str(data, "ToUserName").unwrap_or_default();
    let raw_content = nested_str(data, "Content").unwrap_or_default();
    let push = data.get_str("PushContent").unwrap_or("");
    let msg_type = data
        .get_i64("MsgType")
        .or_else(|| data.get_u64("MsgType").map(|v| v as i64))
        .unwrap_or(0);

    // 状态同步类消息
    if msg_type == 51 {
        return Ok(None);
    }

    let is_group = from.ends_with("@chatroom") || to.ends_with("@chatroom");
    let conversation = if is_group {
        if from.ends_with("@chatroom") { from.clone() } else { to.clone() }
    } else if self_wxid.as_deref() == Some(from.as_str()) {
        to.clone()
    } else {
        from.clone()
    };

    let (sender, mut content) = match split_sender(&raw_content) {
        Some((sender, rest)) if is_group => (Some(sender.to_string()), rest.to_string()),
        _ if is_group => (
            if from.ends_with("@chatroom") { None } else { Some(from.clone()) },
            raw_content.clone(),
        ),
        _ => (Some(from.clone()), raw_content.clone()),
    };

    let nickname = push
        .split_once(" : ")
        .map(|(name, _)| name.trim().to_string())
        .filter(|n| !n.is_empty());

    let mut media_xml = None;
    let kind = match msg_type {
        1 => MessageKind::Text,
        3 => {
            media_xml = Some(content.clone());
            MessageKind::Image
        }
        34 => {
            media_xml = Some(content.clone());
            MessageKind::Voice
        }
        43 => {
            media_xml = Some(content.clone());
            MessageKind::Video
        }
        42 => MessageKind::Card,
        48 => MessageKind::Sharing,
        49 => {
            let app_type = appmsg_type_regex()
                .captures(&content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let title = title_regex()
                .captures(&content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();

            match app_type.as_str() {
                "6" => {
                    media_xml = Some(content.clone());
                    content = title;
                    MessageKind::File
                }
                "57" => {
                    content = match refer_regex().captures(&content) {
                        Some(c) => format!(
                            "「{}: <msg>{}</msg>」\n- - - - - - - - - - - - - - -\n{}",
                            c.get(1).map(|m| m.as_str().trim()).unwrap_or(""),
                            c.get(2).map(|m| m.as_str().trim()).unwrap_or(""),
                            title
                        ),
                        None => title,
                    };
                    MessageKind::Text
                }
                _ => MessageKind::Sharing,
            }
        }
        10000 => {
            if content.contains("加入了群聊") || content.contains("加入群聊") {
                MessageKind::Join
            } else if content.contains("移出了群聊") || content.contains("退出了群聊") {
                MessageKind::Leave
            } else {
                MessageKind::System
            }
        }
        10002 => {
            if content.contains(r#"type="revokemsg""#) {
                MessageKind::Revoke
            } else if content.contains(r#"type="pat""#) {
                MessageKind::Pat
            } else {
                MessageKind::System
            }
        }
        _ => MessageKind::Other,
    };

    let mut msg = ChatMessage::new(msg_id, kind, conversation);
    msg.secondary_id = secondary_id;
    msg.content = content;
    msg.to_user_id = to;
    msg.is_group = is_group;
    msg.create_time = data
        .get_i64("CreateTime")
        .or_else(|| data.get_u64("CreateTime").map(|v| v as i64))
        .filter(|t| *t > 0);
    msg.actual_user_id = sender;
    msg.actual_user_nickname = nickname;

    Ok(Some(Incoming {
        msg,
        media_xml,
        self_wxid,
    }))
}
