use super::temp_store::TempStore;
use crate::message::{ChatMessage, MessageKind};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 缓存中的消息快照，与入站消息对象完全解耦
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub id: String,
    pub secondary_id: Option<String>,
    pub kind: MessageKind,
    /// 文本内容；媒体消息为临时副本路径
    pub content: String,
    pub sender_id: Option<String>,
    pub sender_nickname: Option<String>,
    pub conversation_id: String,
    pub is_group: bool,
    /// Unix 秒
    pub created_at: i64,
    /// 本条目独占的临时副本，随条目一起淘汰
    pub temp_file: Option<PathBuf>,
}

impl CachedMessage {
    /// 从入站消息构造快照；媒体消息传入临时副本路径
    pub fn snapshot(msg: &ChatMessage, created_at: i64, temp_file: Option<PathBuf>) -> Self {
        let content = match &temp_file {
            Some(path) => path.to_string_lossy().into_owned(),
            None => msg.content.clone(),
        };
        Self {
            id: msg.msg_id.clone(),
            secondary_id: msg
                .secondary_id
                .clone()
                .filter(|s| !s.is_empty() && *s != msg.msg_id),
            kind: msg.kind,
            content,
            sender_id: msg.sender_id().map(str::to_string),
            sender_nickname: msg
                .actual_user_nickname
                .clone()
                .filter(|s| !s.is_empty()),
            conversation_id: msg.from_user_id.clone(),
            is_group: msg.is_group,
            created_at,
            temp_file,
        }
    }

    pub fn is_expired(&self, now: i64, expire_secs: i64) -> bool {
        now - self.created_at > expire_secs
    }
}

/// 未被缓存的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 撤回通知本身不入缓存
    Revoke,
    /// 到达时已超出缓存时长
    Stale,
    /// 时间戳缺失或无法识别
    BadTimestamp,
    /// 系统类消息，用户无法撤回
    NotRevocable,
    /// 媒体文件无法落地到本地
    MediaUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted { aliased: bool },
    Skipped(SkipReason),
}

/// 按消息 ID 索引的限时缓存
///
/// 同一条目可能挂在多个键下 (主 ID 与内部 ID)，它们共享同一个 `Arc`。
/// 临时文件只在所有指向该条目的键都被移除后删除一次。
pub struct MessageCache {
    entries: Mutex<HashMap<String, Arc<CachedMessage>>>,
    expire_secs: i64,
}

impl MessageCache {
    pub fn new(expire_secs: i64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            expire_secs,
        }
    }

    pub fn expire_secs(&self) -> i64 {
        self.expire_secs
    }

    /// 是否应在到达时直接跳过 (撤回、过期、坏时间戳、系统类)
    pub fn admission(&self, msg: &ChatMessage, now: i64) -> Result<i64, SkipReason> {
        match msg.kind {
            MessageKind::Revoke => return Err(SkipReason::Revoke),
            MessageKind::System | MessageKind::Join | MessageKind::Leave | MessageKind::Other => {
                return Err(SkipReason::NotRevocable);
            }
            MessageKind::Text
            | MessageKind::Image
            | MessageKind::Video
            | MessageKind::Voice
            | MessageKind::File
            | MessageKind::Sharing
            | MessageKind::Card
            | MessageKind::Pat => {}
        }

        let created_at = match msg.created_at() {
            Some(dt) => dt.timestamp(),
            None => return Err(SkipReason::BadTimestamp),
        };
        if now - created_at > self.expire_secs {
            return Err(SkipReason::Stale);
        }
        Ok(created_at)
    }

    /// 插入快照：主键覆盖写入，别名键仅在不存在时写入
    ///
    /// 被覆盖的旧条目若已没有任何键指向它，其临时文件随即删除。
    pub async fn insert(&self, entry: CachedMessage, store: &TempStore) -> StoreOutcome {
        let entry = Arc::new(entry);
        let mut aliased = false;

        let orphaned = {
            let mut map = self.entries.lock().await;
            let replaced = map.insert(entry.id.clone(), entry.clone());

            if let Some(alias) = entry.secondary_id.as_deref()
                && alias != entry.id
                && !map.contains_key(alias)
            {
                map.insert(alias.to_string(), entry.clone());
                aliased = true;
            }

            replaced.filter(|old| !map.values().any(|live| Arc::ptr_eq(live, old)))
        };

        if let Some(path) = orphaned.as_ref().and_then(|old| old.temp_file.as_ref())
            && entry.temp_file.as_ref() != Some(path)
        {
            match store.remove(path).await {
                Ok(()) => debug!(target: "Cache", "消息 {} 被重复投递，已删除旧临时文件", entry.id),
                Err(e) => error!(target: "Cache", "删除被覆盖的临时文件失败: {:#}", e),
            }
        }
        StoreOutcome::Inserted { aliased }
    }

    /// 查询未过期的条目
    pub async fn lookup(&self, id: &str, now: i64) -> Option<Arc<CachedMessage>> {
        let map = self.entries.lock().await;
        map.get(id)
            .filter(|e| !e.is_expired(now, self.expire_secs))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 淘汰所有过期条目，返回被淘汰的条目数 (别名不重复计数)
    ///
    /// 键在锁内一次性移除；临时文件在锁外删除，此时条目已不可达。
    pub async fn sweep(&self, now: i64, store: &TempStore) -> usize {
        let evicted: Vec<Arc<CachedMessage>> = {
            let mut map = self.entries.lock().await;
            let expired_keys: Vec<String> = map
                .iter()
                .filter(|(_, e)| e.is_expired(now, self.expire_secs))
                .map(|(k, _)| k.clone())
                .collect();

            let mut removed: Vec<Arc<CachedMessage>> = Vec::new();
            for key in expired_keys {
                if let Some(entry) = map.remove(&key)
                    && !removed.iter().any(|r| Arc::ptr_eq(r, &entry))
                {
                    removed.push(entry);
                }
            }

            // 仍有别名存活的条目不删除文件
            removed.retain(|entry| !map.values().any(|live| Arc::ptr_eq(live, entry)));
            removed
        };

        for entry in &evicted {
            if let Some(path) = &entry.temp_file {
                match store.remove(path).await {
                    Ok(()) => debug!(target: "Cache", "已删除过期临时文件: {}", path.display()),
                    Err(e) => error!(target: "Cache", "删除过期临时文件失败: {:#}", e),
                }
            }
        }

        if !evicted.is_empty() {
            debug!(target: "Cache", "清理了 {} 条过期消息缓存", evicted.len());
        }
        evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    fn text(id: &str, created_at: i64) -> ChatMessage {
        let mut m = ChatMessage::new(id, MessageKind::Text, "g1@chatroom");
        m.content = "hello".into();
        m.is_group = true;
        m.actual_user_id = Some("u1".into());
        m.actual_user_nickname = Some("Alice".into());
        m.create_time = Some(created_at);
        m
    }

    fn image(id: &str, created_at: i64) -> ChatMessage {
        let mut m = text(id, created_at);
        m.kind = MessageKind::Image;
        m
    }

    /// 临时目录 + 一个可反复复制的源文件
    async fn scratch() -> (TempDir, TempStore, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let store = TempStore::new(root.path().join("tmp")).await.unwrap();
        let src = root.path().join("p.jpg");
        fs::write(&src, b"img").await.unwrap();
        (root, store, src)
    }

    #[tokio::test]
    async fn lookup_hits_until_expiry() {
        let (_root, store, _) = scratch().await;
        let cache = MessageCache::new(120);
        let msg = text("m1", 1_000);
        let created = cache.admission(&msg, 1_000).unwrap();
        cache.insert(CachedMessage::snapshot(&msg, created, None), &store).await;

        let hit = cache.lookup("m1", 1_100).await.unwrap();
        assert_eq!(hit.content, "hello");
        assert_eq!(hit.sender_nickname.as_deref(), Some("Alice"));
        assert!(cache.lookup("m1", 1_120).await.is_some());
        assert!(cache.lookup("m1", 1_121).await.is_none());
    }

    #[test]
    fn admission_rules() {
        let cache = MessageCache::new(120);
        let mut revoke = text("r", 1_000);
        revoke.kind = MessageKind::Revoke;
        assert_eq!(cache.admission(&revoke, 1_000), Err(SkipReason::Revoke));

        assert_eq!(cache.admission(&text("old", 0), 1_000), Err(SkipReason::Stale));

        let mut no_time = text("n", 0);
        no_time.create_time = None;
        assert_eq!(cache.admission(&no_time, 1_000), Err(SkipReason::BadTimestamp));

        let mut bogus = text("b", 0);
        bogus.create_time = Some(i64::MAX);
        assert_eq!(cache.admission(&bogus, 1_000), Err(SkipReason::BadTimestamp));

        let mut sys = text("s", 1_000);
        sys.kind = MessageKind::System;
        assert_eq!(cache.admission(&sys, 1_000), Err(SkipReason::NotRevocable));
    }

    #[tokio::test]
    async fn alias_shares_entry_and_never_overwrites() {
        let (_root, store, _) = scratch().await;
        let cache = MessageCache::new(120);
        let mut first = text("A", 1_000);
        first.secondary_id = Some("B".into());
        let outcome = cache.insert(CachedMessage::snapshot(&first, 1_000, None), &store).await;
        assert_eq!(outcome, StoreOutcome::Inserted { aliased: true });

        let a = cache.lookup("A", 1_000).await.unwrap();
        let b = cache.lookup("B", 1_000).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // 另一条消息的别名恰好是已存在的键：不覆盖
        let mut second = text("C", 1_001);
        second.secondary_id = Some("B".into());
        second.content = "other".into();
        let outcome = cache.insert(CachedMessage::snapshot(&second, 1_001, None), &store).await;
        assert_eq!(outcome, StoreOutcome::Inserted { aliased: false });
        assert_eq!(cache.lookup("B", 1_001).await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn sweep_evicts_aliases_and_deletes_file_once() {
        let (_root, store, src) = scratch().await;
        let copy = store.copy_in(&src).await.unwrap();

        let cache = MessageCache::new(120);
        let mut msg = image("A", 1_000);
        msg.secondary_id = Some("B".into());
        cache
            .insert(CachedMessage::snapshot(&msg, 1_000, Some(copy.clone())), &store)
            .await;
        let fresh = text("F", 1_100);
        cache.insert(CachedMessage::snapshot(&fresh, 1_100, None), &store).await;

        assert_eq!(cache.sweep(1_100, &store).await, 0);
        assert!(copy.exists());

        assert_eq!(cache.sweep(1_121, &store).await, 1);
        assert!(!copy.exists());
        assert!(cache.lookup("A", 1_121).await.is_none());
        assert!(cache.lookup("B", 1_121).await.is_none());
        assert!(cache.lookup("F", 1_121).await.is_some());
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.sweep(1_500, &store).await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn redelivered_media_does_not_leak_the_first_copy() {
        let (_root, store, src) = scratch().await;
        let cache = MessageCache::new(120);
        let msg = image("dup", 1_000);

        let first = store.copy_in(&src).await.unwrap();
        cache
            .insert(CachedMessage::snapshot(&msg, 1_000, Some(first.clone())), &store)
            .await;
        let second = store.copy_in(&src).await.unwrap();
        cache
            .insert(CachedMessage::snapshot(&msg, 1_000, Some(second.clone())), &store)
            .await;

        assert!(!first.exists());
        assert!(second.exists());
        assert_eq!(cache.lookup("dup", 1_000).await.unwrap().temp_file, Some(second.clone()));

        assert_eq!(cache.sweep(10_000, &store).await, 1);
        assert!(cache.is_empty().await);
        let mut left = fs::read_dir(store.dir()).await.unwrap();
        assert!(left.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwritten_primary_keeps_file_while_alias_lives() {
        let (_root, store, src) = scratch().await;
        let cache = MessageCache::new(120);
        let mut msg = image("A", 1_000);
        msg.secondary_id = Some("B".into());

        let first = store.copy_in(&src).await.unwrap();
        cache
            .insert(CachedMessage::snapshot(&msg, 1_000, Some(first.clone())), &store)
            .await;
        let second = store.copy_in(&src).await.unwrap();
        cache
            .insert(CachedMessage::snapshot(&msg, 1_010, Some(second.clone())), &store)
            .await;

        // B 仍指向第一份副本
        assert!(first.exists());
        assert_eq!(cache.lookup("B", 1_010).await.unwrap().temp_file, Some(first.clone()));

        assert_eq!(cache.sweep(1_125, &store).await, 1);
        assert!(!first.exists());
        assert!(second.exists());
        assert_eq!(cache.sweep(1_200, &store).await, 1);
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn failed_deletion_does_not_stop_the_sweep() {
        let (root, store, src) = scratch().await;
        let cache = MessageCache::new(120);

        // 指向非空目录的路径无法按文件删除
        let stubborn = root.path().join("tmp").join("stubborn");
        fs::create_dir_all(stubborn.join("inner")).await.unwrap();
        cache
            .insert(CachedMessage::snapshot(&image("bad", 1_000), 1_000, Some(stubborn.clone())), &store)
            .await;

        let mut copies = Vec::new();
        for i in 0..3 {
            let copy = store.copy_in(&src).await.unwrap();
            let msg = image(&format!("ok{}", i), 1_000);
            cache
                .insert(CachedMessage::snapshot(&msg, 1_000, Some(copy.clone())), &store)
                .await;
            copies.push(copy);
        }

        assert_eq!(cache.sweep(2_000, &store).await, 4);
        assert!(cache.is_empty().await);
        assert!(stubborn.exists());
        assert!(copies.iter().all(|c| !c.exists()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sweep_never_hides_live_entries() {
        let (_root, store, src) = scratch().await;
        let cache = Arc::new(MessageCache::new(120));

        let mut expired = Vec::new();
        for i in 0..50 {
            let copy = store.copy_in(&src).await.unwrap();
            let msg = image(&format!("old{}", i), 900);
            cache
                .insert(CachedMessage::snapshot(&msg, 900, Some(copy.clone())), &store)
                .await;
            expired.push(copy);
        }

        let sweeper = {
            let cache = cache.clone();
            let store = store.clone();
            tokio::spawn(async move {
                let mut total = 0;
                for _ in 0..200 {
                    total += cache.sweep(1_100, &store).await;
                    tokio::task::yield_now().await;
                }
                total
            })
        };

        let writer = {
            let cache = cache.clone();
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let copy = store.copy_in(&src).await.unwrap();
                    let mut msg = image(&format!("live{}", i), 1_050);
                    msg.secondary_id = Some(format!("alias{}", i));
                    cache
                        .insert(CachedMessage::snapshot(&msg, 1_050, Some(copy)), &store)
                        .await;

                    let by_id = cache.lookup(&format!("live{}", i), 1_100).await.unwrap();
                    let by_alias = cache.lookup(&format!("alias{}", i), 1_100).await.unwrap();
                    assert!(Arc::ptr_eq(&by_id, &by_alias));
                    assert!(by_id.temp_file.as_ref().unwrap().exists());
                }
            })
        };

        writer.await.unwrap();
        assert_eq!(sweeper.await.unwrap(), 50);
        assert!(expired.iter().all(|p| !p.exists()));
        assert_eq!(cache.len().await, 400);
        for i in 0..200 {
            let entry = cache.lookup(&format!("live{}", i), 1_100).await.unwrap();
            assert!(entry.temp_file.as_ref().unwrap().exists());
        }
    }

    #[test]
    fn snapshot_is_decoupled_from_live_message() {
        let mut live = text("m", 1_000);
        let snap = CachedMessage::snapshot(&live, 1_000, None);
        live.content = "mutated".into();
        live.actual_user_nickname = None;
        assert_eq!(snap.content, "hello");
        assert_eq!(snap.sender_nickname.as_deref(), Some("Alice"));
    }
}
