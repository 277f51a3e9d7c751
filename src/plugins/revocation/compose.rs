use super::cache::CachedMessage;
use super::directory::Directory;
use super::resolve::{RevokeNotice, revoker_hint};
use super::temp_store::{PUBLIC_PREFIX, TempStore};
use crate::api::{WeChatApi, send_file, send_image, send_text};
use crate::event::Context;
use crate::message::{MessageKind, UNKNOWN_MEMBER};
use std::path::Path;
use tokio::fs;
use url::Url;

/// 通知前缀所需的名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    /// 撤回者
    pub actor: String,
    /// 群名或好友名
    pub location: String,
    pub is_group: bool,
}

/// 解析撤回者与会话名称
///
/// 撤回者：缓存昵称 → 用户查询 → 撤回提示文本 → `用户{id}` → 未知成员。
/// 会话：群名查询 → `群聊({id})`；私聊为好友名称查询，失败时沿用撤回者名称。
pub async fn resolve_labels(
    entry: &CachedMessage,
    notice: &RevokeNotice,
    directory: &Directory,
    api: &dyn WeChatApi,
    now: i64,
) -> Labels {
    let mut actor = entry.sender_nickname.clone();
    if actor.is_none()
        && let Some(sender) = entry.sender_id.as_deref()
    {
        actor = directory.user_name(api, sender).await;
    }
    let actor = actor
        .or_else(|| revoker_hint(&notice.raw_markup))
        .unwrap_or_else(|| match entry.sender_id.as_deref() {
            Some(id) => format!("用户{}", id),
            None => UNKNOWN_MEMBER.to_string(),
        });

    let location = if entry.is_group {
        directory
            .group_name(api, &entry.conversation_id, now)
            .await
            .unwrap_or_else(|| format!("群聊({})", entry.conversation_id))
    } else {
        directory
            .user_name(api, &entry.conversation_id)
            .await
            .unwrap_or_else(|| actor.clone())
    };

    Labels {
        actor,
        location,
        is_group: entry.is_group,
    }
}

pub fn prefix(labels: &Labels) -> String {
    if labels.is_group {
        format!("群「{}」的成员「{}」", labels.location, labels.actor)
    } else {
        format!("好友「{}」", labels.location)
    }
}

/// 媒体回传方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upload {
    /// 协议服务端可拉取的地址
    Url(String),
    /// 未配置回调地址
    NotConfigured,
}

/// 待发送的撤回通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Text(String),
    Media {
        intro: String,
        kind: MessageKind,
        file_name: String,
        upload: Upload,
    },
    Generic(String),
}

/// 根据缓存条目构造通知
///
/// `callback_url` 为对外可访问的回调根地址，空串视为未配置。
pub async fn compose(
    entry: &CachedMessage,
    labels: &Labels,
    store: &TempStore,
    callback_url: &str,
) -> Notification {
    let prefix = prefix(labels);

    match entry.kind {
        MessageKind::Text => Notification::Text(format!("{} 撤回了一条消息:\n---\n{}", prefix, entry.content)),
        MessageKind::Image | MessageKind::Video | MessageKind::Voice | MessageKind::File => {
            let present = match &entry.temp_file {
                Some(path) => fs::try_exists(path).await.unwrap_or(false).then_some(path),
                None => None,
            };
            let Some(path) = present else {
                return generic(&prefix, entry.kind);
            };

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rel = store
                .public_path(path)
                .unwrap_or_else(|| format!("{}{}", PUBLIC_PREFIX, file_name));
            let upload = match upload_url(callback_url, &rel) {
                Some(url) => Upload::Url(url),
                None => Upload::NotConfigured,
            };

            Notification::Media {
                intro: format!("{} 撤回了一个{}👇", prefix, entry.kind.label()),
                kind: entry.kind,
                file_name,
                upload,
            }
        }
        MessageKind::Sharing
        | MessageKind::Card
        | MessageKind::Pat
        | MessageKind::System
        | MessageKind::Join
        | MessageKind::Leave
        | MessageKind::Revoke
        | MessageKind::Other => generic(&prefix, entry.kind),
    }
}

/// 回调根地址附加 `file` 查询参数；地址为空或无法解析时返回 None
pub fn upload_url(callback_url: &str, rel: &str) -> Option<String> {
    let callback = callback_url.trim().trim_end_matches('/');
    if callback.is_empty() {
        return None;
    }
    let mut url = match Url::parse(callback) {
        Ok(url) => url,
        Err(e) => {
            warn!(target: "Revoke", "回调地址无效 '{}': {}", callback, e);
            return None;
        }
    };
    url.query_pairs_mut().append_pair("file", rel);
    Some(url.into())
}

fn generic(prefix: &str, kind: MessageKind) -> Notification {
    Notification::Generic(format!("{} 撤回了一条 {} 类型的消息。", prefix, kind.name()))
}

/// 尽力发送通知，任何失败只记录日志
pub async fn deliver(ctx: &Context, receiver: &str, notification: Notification) {
    match notification {
        Notification::Text(text) | Notification::Generic(text) => {
            match send_text(ctx, receiver, text).await {
                Ok(()) => info!(target: "Revoke", "已向 {} 发送撤回通知", receiver),
                Err(e) => error!(target: "Revoke", "发送撤回通知失败: {}", e),
            }
        }
        Notification::Media {
            intro,
            kind,
            file_name,
            upload,
        } => {
            if let Err(e) = send_text(ctx, receiver, intro).await {
                error!(target: "Revoke", "发送撤回提示失败: {}", e);
            }

            let label = kind.label();
            let apology = match upload {
                Upload::NotConfigured => {
                    error!(target: "Revoke", "回调地址 (gewechat.callback_url) 未配置，无法回传撤回的{}", label);
                    format!("（无法发送被撤回的{}文件，回调URL未配置）", label)
                }
                Upload::Url(url) => {
                    info!(target: "Revoke", "准备回传撤回的文件: {}", url);
                    let sent = if kind == MessageKind::Image {
                        send_image(ctx, receiver, &url).await
                    } else {
                        send_file(ctx, receiver, &url, &file_name).await
                    };
                    match sent {
                        Ok(()) => {
                            info!(target: "Revoke", "已向 {} 回传撤回的{}", receiver, label);
                            return;
                        }
                        Err(e) => {
                            error!(target: "Revoke", "通过回调地址发送撤回文件失败: {}", e);
                            format!("（无法发送被撤回的{}文件，请检查回调配置或临时文件）", label)
                        }
                    }
                }
            };

            if let Err(e) = send_text(ctx, receiver, apology).await {
                warn!(target: "Revoke", "发送失败说明也失败了: {}", e);
            }
        }
    }
}

/// 路径所指文件名，用于日志
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
