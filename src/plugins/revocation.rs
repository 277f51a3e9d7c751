use crate::api::send_text;
use crate::config::{AppConfig, build_config};
use crate::event::{Context, EventType};
use crate::message::{ChatMessage, MessageKind, UNKNOWN_MEMBER};
use crate::plugins::{Plugin, PluginError};
use crate::scheduler::Scheduler;
use chrono::Local;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use toml::Value;

pub mod cache;
pub mod chat_log;
pub mod compose;
pub mod directory;
pub mod fetch;
pub mod last_spoken;
pub mod resolve;
pub mod temp_store;
pub mod utils;

use cache::{CachedMessage, MessageCache, SkipReason, StoreOutcome};
use chat_log::ChatLog;
use directory::Directory;
use fetch::MediaFetcher;
use last_spoken::LastSpoken;
use resolve::RevokeNotice;
use temp_store::TempStore;

pub const NAME: &str = "revocation";

const DEFAULT_COMMAND: &str = "最后信息";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    pub enabled: bool,
    /// 撤回通知接收者 wxid
    #[serde(default = "default_receiver")]
    pub receiver: String,
    /// 缓存时长 (秒)
    #[serde(default = "default_expire")]
    pub message_expire_time: i64,
    /// 清理周期 (秒)
    #[serde(default = "default_cleanup")]
    pub cleanup_interval: u64,
    /// 聊天记录目录，相对路径基于 data_dir
    #[serde(default = "default_chat_log_dir")]
    pub chat_log_dir: String,
    #[serde(default = "default_command")]
    pub last_spoken_command: String,
    #[serde(default = "default_group_cache_expiry")]
    pub group_cache_expiry: i64,
    /// 媒体下载超时 (秒)
    #[serde(default = "default_download_timeout")]
    pub download_timeout: u64,
    #[serde(default = "default_help_command")]
    pub help_command: String,
}

fn default_receiver() -> String {
    "filehelper".to_string()
}
fn default_expire() -> i64 {
    120
}
fn default_cleanup() -> u64 {
    60
}
fn default_chat_log_dir() -> String {
    "chat_logs".to_string()
}
fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}
fn default_group_cache_expiry() -> i64 {
    3600
}
fn default_download_timeout() -> u64 {
    20
}
fn default_help_command() -> String {
    "防撤回帮助".to_string()
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            receiver: default_receiver(),
            message_expire_time: default_expire(),
            cleanup_interval: default_cleanup(),
            chat_log_dir: default_chat_log_dir(),
            last_spoken_command: default_command(),
            group_cache_expiry: default_group_cache_expiry(),
            download_timeout: default_download_timeout(),
            help_command: default_help_command(),
        }
    }
}

pub fn default_config() -> Value {
    build_config(RevocationConfig::default())
}

/// 临时目录位置，回调服务据此对外提供文件
pub fn temp_dir(config: &AppConfig) -> PathBuf {
    config.data_dir().join("tmp")
}

fn resolve_dir(config: &AppConfig, dir: &str) -> PathBuf {
    let p = Path::new(dir);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        config.data_dir().join(p)
    }
}

/// 防撤回与群聊记录
///
/// 缓存近期消息，收到撤回通知时把原内容转发给接收者；
/// 同时按群记录聊天内容与成员最后发言时间。
pub struct Revocation {
    cfg: RevocationConfig,
    callback_url: String,
    cache: Arc<MessageCache>,
    store: TempStore,
    fetcher: MediaFetcher,
    directory: Directory,
    chat_log: ChatLog,
    last_spoken: LastSpoken,
    scheduler: Arc<Scheduler>,
    sweep_task: u64,
}

impl Revocation {
    pub async fn new(config: &AppConfig, scheduler: &Arc<Scheduler>) -> Result<Self, PluginError> {
        let mut cfg: RevocationConfig = config.plugin(NAME).unwrap_or_default();

        if cfg.last_spoken_command.trim().is_empty() {
            warn!(target: "Revoke", "last_spoken_command 为空，使用默认值 '{}'", DEFAULT_COMMAND);
            cfg.last_spoken_command = default_command();
        }
        cfg.last_spoken_command = cfg.last_spoken_command.trim().to_string();
        if cfg.receiver.trim().is_empty() {
            warn!(target: "Revoke", "未配置撤回通知接收者 (receiver)，撤回通知将无法发送");
        }

        let store = TempStore::new(temp_dir(config))
            .await
            .map_err(|e| format!("{:#}", e))?;
        let fetcher = MediaFetcher::new(
            config.data_dir().join("downloads"),
            Duration::from_secs(cfg.download_timeout.max(1)),
        )
        .await
        .map_err(|e| format!("{:#}", e))?;

        let log_dir = resolve_dir(config, &cfg.chat_log_dir);
        let chat_log = ChatLog::new(&log_dir).await.map_err(|e| format!("{:#}", e))?;
        let last_spoken = LastSpoken::new(log_dir.join("last_spoken"))
            .await
            .map_err(|e| format!("{:#}", e))?;

        let cache = Arc::new(MessageCache::new(cfg.message_expire_time));
        let period = Duration::from_secs(cfg.cleanup_interval);
        let sweep_task = {
            let cache = cache.clone();
            let store = store.clone();
            scheduler.add_interval("revocation-sweep", period, period, move || {
                let cache = cache.clone();
                let store = store.clone();
                async move {
                    cache.sweep(Local::now().timestamp(), &store).await;
                }
            })
        };

        info!(
            target: "Revoke",
            "防撤回已启动: 接收者 {}, 缓存 {} 秒, 清理周期 {} 秒, 聊天记录 {}",
            cfg.receiver,
            cfg.message_expire_time,
            cfg.cleanup_interval,
            chat_log.dir().display()
        );

        Ok(Self {
            directory: Directory::new(cfg.group_cache_expiry),
            callback_url: config.gewechat.callback_url.clone(),
            cfg,
            cache,
            store,
            fetcher,
            chat_log,
            last_spoken,
            scheduler: scheduler.clone(),
            sweep_task,
        })
    }

    pub fn config(&self) -> &RevocationConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn temp_store(&self) -> &TempStore {
        &self.store
    }

    pub fn last_spoken(&self) -> &LastSpoken {
        &self.last_spoken
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    /// 以指定时间执行一次清理
    pub async fn sweep(&self, now: i64) -> usize {
        self.cache.sweep(now, &self.store).await
    }

    /// 缓存一条消息；媒体消息先落地到本地再复制进临时目录
    pub async fn ingest(&self, msg: &ChatMessage, now: i64) -> StoreOutcome {
        let created_at = match self.cache.admission(msg, now) {
            Ok(t) => t,
            Err(reason) => {
                match reason {
                    SkipReason::BadTimestamp => warn!(
                        target: "Cache",
                        "消息 {} 的时间戳无效 ({:?})，不缓存",
                        msg.msg_id, msg.create_time
                    ),
                    _ => debug!(target: "Cache", "跳过消息 {}: {:?}", msg.msg_id, reason),
                }
                return StoreOutcome::Skipped(reason);
            }
        };

        let temp_file = if msg.kind.is_media() {
            match self.materialize(msg).await {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(
                        target: "Cache",
                        "{} 消息 {} 无法落地，不缓存: {:#}",
                        msg.kind.label(),
                        msg.msg_id,
                        e
                    );
                    return StoreOutcome::Skipped(SkipReason::MediaUnavailable);
                }
            }
        } else {
            None
        };

        if let Some(path) = &temp_file {
            debug!(target: "Cache", "已保存临时副本: {}", compose::display_name(path));
        }
        let outcome = self
            .cache
            .insert(CachedMessage::snapshot(msg, created_at, temp_file), &self.store)
            .await;
        debug!(
            target: "Cache",
            "已缓存 {} 消息 {} ({:?})",
            msg.kind.name(),
            msg.msg_id,
            outcome
        );
        outcome
    }

    async fn materialize(&self, msg: &ChatMessage) -> anyhow::Result<PathBuf> {
        let fetched = self.fetcher.fetch(msg).await?;
        let copied = self.store.copy_in(&fetched.path).await;
        if fetched.downloaded
            && let Err(e) = fs::remove_file(&fetched.path).await
        {
            debug!(target: "Cache", "删除下载文件失败 {}: {}", fetched.path.display(), e);
        }
        copied
    }

    /// 处理撤回通知：查找原消息并转发给接收者
    async fn on_revoke(&self, ctx: &Context, msg: &ChatMessage, now: i64) {
        let notice = RevokeNotice::from_message(msg);
        info!(target: "Revoke", "处理撤回消息 (群聊: {})", notice.is_group);

        let Some((id, entry)) = resolve::resolve(&self.cache, &notice, now).await else {
            warn!(
                target: "Revoke",
                "缓存中未找到被撤回的消息: {:?}",
                resolve::candidates(&notice)
            );
            return;
        };
        debug!(target: "Revoke", "命中缓存: {} ({})", id, entry.kind.name());

        let labels =
            compose::resolve_labels(&entry, &notice, &self.directory, ctx.api.as_ref(), now).await;
        let notification = compose::compose(&entry, &labels, &self.store, &self.callback_url).await;
        compose::deliver(ctx, &self.cfg.receiver, notification).await;
    }

    /// 写入群聊记录与最后发言时间
    async fn record(&self, ctx: &Context, msg: &ChatMessage, now: i64) {
        let group_id = msg.from_user_id.as_str();
        if group_id.is_empty() {
            return;
        }
        let at = msg.created_at().unwrap_or_else(Local::now);
        let nickname = msg.sender_name();
        let group_name = self.directory.group_name(ctx.api.as_ref(), group_id, now).await;

        if let Err(e) = self
            .chat_log
            .append(group_id, group_name.as_deref(), &at, nickname, &msg.render_tag())
            .await
        {
            error!(target: "ChatLog", "记录群聊消息失败 ({}): {:#}", group_id, e);
        }

        if !is_speech(msg.kind) || nickname == UNKNOWN_MEMBER {
            return;
        }
        match self
            .last_spoken
            .update(group_id, nickname, &utils::format_minute(&at))
            .await
        {
            Ok(true) => debug!(target: "ChatLog", "更新最后发言: [{}] {}", group_id, nickname),
            Ok(false) => {}
            Err(e) => error!(target: "ChatLog", "更新最后发言时间失败: {:#}", e),
        }
    }

    async fn last_spoken_reply(&self, group_id: &str) -> String {
        match self.last_spoken.read(group_id).await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(Some(_)) => {
                info!(target: "ChatLog", "最后发言文件为空: {}", group_id);
                "最后发言记录文件为空。".to_string()
            }
            Ok(None) => {
                warn!(target: "ChatLog", "未找到最后发言文件: {}", group_id);
                format!("当前群聊({})还没有生成最后发言记录文件。", group_id)
            }
            Err(e) => {
                error!(target: "ChatLog", "读取最后发言文件失败: {:#}", e);
                "读取最后发言记录文件时出错，请检查日志。".to_string()
            }
        }
    }

    fn help_text(&self) -> String {
        format!(
            "防撤回与群聊记录 说明:\n\
             1. 自动缓存最近 {} 秒内的消息，检测到撤回时转发给指定接收者。\n\
             2. 群聊消息按 群聊ID.txt 保存在 '{}' 目录。\n\
             3. 记录每个群成员的最后发言时间 (位于 last_spoken 子目录)。\n\
             4. 在群聊中发送 '{}' 可获取本群成员最后发言时间。\n\
             5. 图片、视频、语音、文件的回传需要配置 gewechat.callback_url。",
            self.cfg.message_expire_time,
            self.chat_log.dir().display(),
            self.cfg.last_spoken_command
        )
    }
}

/// 计入最后发言时间的消息类型
fn is_speech(kind: MessageKind) -> bool {
    match kind {
        MessageKind::Text
        | MessageKind::Image
        | MessageKind::Video
        | MessageKind::Voice
        | MessageKind::File
        | MessageKind::Sharing
        | MessageKind::Card => true,
        MessageKind::Pat
        | MessageKind::System
        | MessageKind::Join
        | MessageKind::Leave
        | MessageKind::Revoke
        | MessageKind::Other => false,
    }
}

impl Plugin for Revocation {
    fn name(&self) -> &'static str {
        NAME
    }

    fn handle(&self, ctx: Context) -> BoxFuture<'_, Result<Option<Context>, PluginError>> {
        Box::pin(async move {
            match &ctx.event {
                EventType::Receive(msg) => {
                    let now = Local::now().timestamp();
                    if msg.kind == MessageKind::Revoke {
                        self.on_revoke(&ctx, msg, now).await;
                    } else {
                        if msg.is_group {
                            self.record(&ctx, msg, now).await;
                        }
                        self.ingest(msg, now).await;
                    }
                }
                EventType::Handle(msg) if msg.kind == MessageKind::Text => {
                    let content = msg.content.trim();

                    if msg.is_group && content == self.cfg.last_spoken_command {
                        info!(
                            target: "ChatLog",
                            "收到命令 '{}' 来自群聊 {}",
                            content, msg.from_user_id
                        );
                        let reply = self.last_spoken_reply(&msg.from_user_id).await;
                        if let Err(e) = send_text(&ctx, &msg.from_user_id, reply).await {
                            error!(target: "ChatLog", "发送最后发言记录失败: {}", e);
                        }
                        return Ok(None);
                    }

                    if !self.cfg.help_command.is_empty() && content == self.cfg.help_command {
                        if let Err(e) = send_text(&ctx, &msg.from_user_id, self.help_text()).await {
                            error!(target: "Revoke", "发送帮助失败: {}", e);
                        }
                        return Ok(None);
                    }
                }
                EventType::Handle(_) | EventType::BeforeSend(_) | EventType::Init => {}
            }

            Ok(Some(ctx))
        })
    }

    fn shutdown(&self) {
        self.scheduler.remove(self.sweep_task);
        debug!(target: "Revoke", "已停止缓存清理任务");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_missing_keys() {
        let cfg: RevocationConfig = toml::from_str("enabled = true\nreceiver = \"wxid_me\"").unwrap();
        assert_eq!(cfg.receiver, "wxid_me");
        assert_eq!(cfg.message_expire_time, 120);
        assert_eq!(cfg.cleanup_interval, 60);
        assert_eq!(cfg.chat_log_dir, "chat_logs");
        assert_eq!(cfg.last_spoken_command, "最后信息");
        assert_eq!(cfg.group_cache_expiry, 3600);
        assert_eq!(cfg.download_timeout, 20);
    }

    #[test]
    fn speech_kinds() {
        assert!(is_speech(MessageKind::Text));
        assert!(is_speech(MessageKind::Card));
        assert!(!is_speech(MessageKind::Join));
        assert!(!is_speech(MessageKind::Pat));
    }

    #[test]
    fn relative_log_dir_is_under_data_dir() {
        let config = AppConfig {
            data_dir: "/srv/relay".into(),
            ..AppConfig::default()
        };
        assert_eq!(resolve_dir(&config, "chat_logs"), PathBuf::from("/srv/relay/chat_logs"));
        assert_eq!(resolve_dir(&config, "/var/logs"), PathBuf::from("/var/logs"));
        assert_eq!(temp_dir(&config), PathBuf::from("/srv/relay/tmp"));
    }
}
