use crate::config::AppConfig;
use crate::plugins::PluginSet;
use crate::scheduler::Scheduler;
use futures_util::future::BoxFuture;
use std::sync::{Arc, OnceLock};

pub mod console;
pub mod gewechat;

pub type AdapterError = Box<dyn std::error::Error + Send + Sync>;

/// 适配器处理函数签名
pub type AdapterHandler = fn(Arc<AppConfig>, Arc<Scheduler>, PluginSet) -> BoxFuture<'static, ()>;

/// 适配器定义
pub struct Adapter {
    /// 协议名称，与配置文件中的表名一致
    pub protocol: &'static str,
    /// 是否在配置中启用
    pub enabled: fn(&AppConfig) -> bool,
    /// 启动处理函数
    pub handler: AdapterHandler,
}

static ADAPTERS: OnceLock<Vec<Adapter>> = OnceLock::new();

/// 获取所有注册的适配器
pub fn get_adapters() -> &'static [Adapter] {
    ADAPTERS.get_or_init(|| {
        vec![
            Adapter {
                protocol: "gewechat",
                enabled: |c| c.gewechat.enabled,
                handler: gewechat::entry,
            },
            // 控制台适配器 (本地调试)
            Adapter {
                protocol: "console",
                enabled: |c| c.console.enabled,
                handler: console::entry,
            },
        ]
    })
}

/// 根据协议名称查找适配器
pub fn find_adapter(protocol: &str) -> Option<&'static Adapter> {
    get_adapters().iter().find(|a| a.protocol == protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_follows_config_switches() {
        let mut config = AppConfig::default();
        config.gewechat.enabled = true;
        config.console.enabled = false;

        let gewe = find_adapter("gewechat").unwrap();
        assert!((gewe.enabled)(&config));
        assert!(!(find_adapter("console").unwrap().enabled)(&config));
        assert!(find_adapter("onebot").is_none());
    }
}
