use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use toml::Value;

pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 日志等级: debug / info / warn / error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // 运行数据根目录 (临时文件、下载缓存、聊天记录均位于其下)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    // GeWeChat 协议配置
    #[serde(default)]
    pub gewechat: GewechatConfig,

    // 控制台适配器 (本地调试)
    #[serde(default)]
    pub console: ConsoleConfig,

    // 插件配置
    #[serde(flatten)]
    pub plugins: HashMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GewechatConfig {
    #[serde(default)]
    pub enabled: bool,

    /// GeWeChat API 根地址，如 http://127.0.0.1:2531/v2/api
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// 媒体下载服务地址，API 返回的 fileUrl 相对它拼接
    #[serde(default = "default_download_url")]
    pub download_url: String,

    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub app_id: String,

    /// 对外可访问的回调地址；为空时无法回传媒体文件
    #[serde(default)]
    pub callback_url: String,

    /// 回调监听地址
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for GewechatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_base_url(),
            download_url: default_download_url(),
            token: String::new(),
            app_id: String::new(),
            callback_url: String::new(),
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// 读取配置文件；不存在时写入默认配置 (含各插件默认表)
    pub async fn load_or_init(
        path: impl AsRef<Path>,
        plugin_defaults: &[(&str, Value)],
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let existed = fs::try_exists(path).await?;
        let mut config = if existed {
            let raw = fs::read_to_string(path).await?;
            toml::from_str::<AppConfig>(&raw)
                .map_err(|e| format!("配置文件 {} 解析失败: {}", path.display(), e))?
        } else {
            AppConfig::default()
        };

        let mut changed = !existed;
        for (name, default) in plugin_defaults {
            if !config.plugins.contains_key(*name) {
                config.plugins.insert(name.to_string(), default.clone());
                changed = true;
            }
        }

        if changed {
            config.save(path).await?;
        }
        Ok(config)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).await?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// 插件是否启用 (缺省表或缺省 enabled 视为关闭)
    pub fn plugin_enabled(&self, name: &str) -> bool {
        self.plugins
            .get(name)
            .and_then(|v| v.get("enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// 按插件名读取并反序列化其配置表
    pub fn plugin<T>(&self, name: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.plugins
            .get(name)
            .and_then(|v| T::deserialize(v.clone()).ok())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            gewechat: GewechatConfig::default(),
            console: ConsoleConfig::default(),
            plugins: HashMap::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:2531/v2/api".to_string()
}

fn default_download_url() -> String {
    "http://127.0.0.1:2532/download".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:1145".to_string()
}

fn default_true() -> bool {
    true
}

/// 辅助函数：构建默认配置 Value，并确保包含 enabled 字段
pub fn build_config<T: Serialize>(data: T) -> Value {
    let mut val = Value::try_from(data).unwrap_or(Value::Table(Default::default()));
    if let Value::Table(ref mut map) = val
        && !map.contains_key("enabled")
    {
        map.insert("enabled".to_string(), Value::Boolean(true));
    }
    val
}
