use revoke_relay::config::AppConfig;
use revoke_relay::log::{self, Level};
use revoke_relay::scheduler::Scheduler;
use revoke_relay::{adapters, error, info, plugins, warn};
use std::sync::Arc;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    println!("╔═══════════════════════════════════════════════════╗");
    println!("║                                                   ║");
    println!("║     revoke-relay - 防撤回与群聊记录               ║");
    println!("║                                                   ║");
    println!("╚═══════════════════════════════════════════════════╝");
    println!();

    // 1. 加载配置 (缺失时写入默认配置)
    let config = AppConfig::load_or_init(CONFIG_PATH, &plugins::default_configs()).await?;
    match Level::parse(&config.log_level) {
        Some(level) => log::set_level(level),
        None => warn!(target: "System", "无法识别的日志等级 '{}'，使用 info", config.log_level),
    }
    tokio::fs::create_dir_all(config.data_dir()).await?;
    info!(target: "System", "数据目录: {}", config.data_dir().display());

    let config = Arc::new(config);
    let scheduler = Arc::new(Scheduler::new());

    // 2. 构建插件
    let plugin_set = plugins::load(&config, &scheduler).await;

    // 3. 启动适配器
    let mut started = 0;
    for adapter in adapters::get_adapters() {
        if !(adapter.enabled)(&config) {
            continue;
        }
        info!(target: "System", "启动适配器: {}", adapter.protocol);
        tokio::spawn((adapter.handler)(
            config.clone(),
            scheduler.clone(),
            plugin_set.clone(),
        ));
        started += 1;
    }
    if started == 0 {
        error!(target: "System", "没有启用任何适配器，请检查 {}", CONFIG_PATH);
    }

    // 4. 等待退出信号
    tokio::signal::ctrl_c().await?;
    info!(target: "System", "收到退出信号，正在关闭...");
    plugins::shutdown(&plugin_set);
    scheduler.shutdown();
    Ok(())
}
