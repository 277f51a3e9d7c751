use crate::config::AppConfig;
use crate::event::{Context, EventType};
use crate::message::ChatMessage;
use crate::scheduler::Scheduler;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use toml::Value;

pub mod logger;
pub mod revocation;

pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// 插件接口
///
/// `handle` 返回 `Some(ctx)` 表示继续交给下一个插件，返回 `None` 表示事件已被消费。
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, ctx: Context) -> BoxFuture<'_, Result<Option<Context>, PluginError>>;

    /// 进程退出前调用 (停止后台任务等)
    fn shutdown(&self) {}
}

/// 已启用插件的有序集合
pub type PluginSet = Arc<Vec<Arc<dyn Plugin>>>;

/// 各插件的默认配置表，用于生成 config.toml
pub fn default_configs() -> Vec<(&'static str, Value)> {
    vec![
        (logger::NAME, logger::default_config()),
        (revocation::NAME, revocation::default_config()),
    ]
}

/// 按注册顺序构建已启用的插件
pub async fn load(config: &AppConfig, scheduler: &Arc<Scheduler>) -> PluginSet {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    let total = default_configs().len();

    if config.plugin_enabled(logger::NAME) {
        plugins.push(Arc::new(logger::Logger::new(config)));
    }

    if config.plugin_enabled(revocation::NAME) {
        match revocation::Revocation::new(config, scheduler).await {
            Ok(p) => plugins.push(Arc::new(p)),
            Err(e) => error!(target: "Plugin", "❌ [{}] 初始化失败: {}", revocation::NAME, e),
        }
    }

    info!(
        target: "System",
        "插件系统已加载 (已启用 {}/{})",
        plugins.len(),
        total
    );
    for p in &plugins {
        info!(target: "Plugin", "✅ [{}] 就绪", p.name());
    }

    Arc::new(plugins)
}

/// 运行插件流水线
///
/// 返回 `Some(ctx)` 表示事件走完了全部插件；出站包在流水线末尾交给协议客户端发送。
pub async fn run(mut ctx: Context) -> Result<Option<Context>, PluginError> {
    let plugins = ctx.plugins.clone();

    for plugin in plugins.iter() {
        match plugin.handle(ctx).await? {
            Some(next_ctx) => ctx = next_ctx,
            None => return Ok(None),
        }
    }

    if let EventType::BeforeSend(packet) = &ctx.event {
        ctx.api.send(packet).await?;
    }

    Ok(Some(ctx))
}

/// 分发一条入站消息：先走接收阶段，未被拦截时再走处理阶段
pub async fn dispatch_message(base: &Context, msg: ChatMessage) -> Result<(), PluginError> {
    let received = match run(base.with_event(EventType::Receive(msg))).await? {
        Some(ctx) => ctx,
        None => return Ok(()),
    };

    if let EventType::Receive(msg) = received.event {
        run(base.with_event(EventType::Handle(msg))).await?;
    }
    Ok(())
}

pub fn shutdown(plugins: &PluginSet) {
    for p in plugins.iter() {
        p.shutdown();
    }
}
