use crate::api::WeChatApi;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// 查询失败时的短缓存时长 (秒)
pub const FAILURE_TTL_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct GroupInfoEntry {
    /// None 表示查询失败或群名为空
    display_name: Option<String>,
    expires_at: i64,
}

/// 群名 / 联系人名称查询，群名带缓存以限制 API 调用次数
pub struct Directory {
    groups: Mutex<HashMap<String, GroupInfoEntry>>,
    success_ttl: i64,
}

impl Directory {
    pub fn new(success_ttl: i64) -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            success_ttl,
        }
    }

    /// 群显示名称；查询失败返回 None (失败结果缓存 60 秒)
    pub async fn group_name(&self, api: &dyn WeChatApi, group_id: &str, now: i64) -> Option<String> {
        if let Some(entry) = self.groups.lock().await.get(group_id)
            && now < entry.expires_at
        {
            return entry.display_name.clone();
        }

        let entry = match api.chatroom_info(group_id).await {
            Ok(info) => {
                let name = info.display_name().map(str::to_string);
                debug!(target: "Revoke", "群信息 {} -> {:?}", group_id, name);
                GroupInfoEntry {
                    display_name: name,
                    expires_at: now + self.success_ttl,
                }
            }
            Err(e) => {
                warn!(target: "Revoke", "获取群信息失败 ({}): {}", group_id, e);
                GroupInfoEntry {
                    display_name: None,
                    expires_at: now + FAILURE_TTL_SECS,
                }
            }
        };

        let name = entry.display_name.clone();
        let mut groups = self.groups.lock().await;
        groups.retain(|_, cached| now < cached.expires_at);
        groups.insert(group_id.to_string(), entry);
        name
    }

    pub async fn cached_groups(&self) -> usize {
        self.groups.lock().await.len()
    }

    /// 联系人显示名称 (备注优先)；失败返回 None
    pub async fn user_name(&self, api: &dyn WeChatApi, wxid: &str) -> Option<String> {
        match api.contact_info(wxid).await {
            Ok(info) => info.and_then(|i| i.display_name().map(str::to_string)),
            Err(e) => {
                warn!(target: "Revoke", "获取用户信息失败 ({}): {}", wxid, e);
                None
            }
        }
    }
}
