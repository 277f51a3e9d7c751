use super::utils::sanitize_filename;
use anyhow::{Context as _, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// 群成员最后发言时间表：`{dir}/{群ID}-last-spoken.txt`，每人一行 `【昵称】时间`
pub struct LastSpoken {
    dir: PathBuf,
    // 读改写期间串行化
    write_lock: Mutex<()>,
}

impl LastSpoken {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建最后发言目录失败: {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, group_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}-last-spoken.txt", sanitize_filename(group_id)))
    }

    /// 更新某成员的最后发言时间，返回文件内容是否发生变化
    ///
    /// 已有的行原地替换，其他成员的行及顺序保持不变；时间相同则不写文件。
    pub async fn update(&self, group_id: &str, nickname: &str, timestamp: &str) -> Result<bool> {
        let path = self.path_for(group_id);
        let _guard = self.write_lock.lock().await;

        let existing = match fs::read_to_string(&path).await {
            Ok(s) => Some(s),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("读取最后发言文件失败: {}", path.display()));
            }
        };

        let key = format!("【{}】", nickname);
        let new_line = format!("{}{}", key, timestamp);

        let mut changed = existing.is_none();
        let mut found = false;
        let mut lines: Vec<String> = Vec::new();

        for line in existing.as_deref().unwrap_or("").lines() {
            if !found && line.starts_with(&key) {
                found = true;
                if line.trim_end() != new_line {
                    changed = true;
                    lines.push(new_line.clone());
                    continue;
                }
            }
            lines.push(line.to_string());
        }

        if !found {
            lines.push(new_line);
            changed = true;
        }

        if changed {
            let mut out = lines.join("\n");
            out.push('\n');
            fs::write(&path, out)
                .await
                .with_context(|| format!("写入最后发言文件失败: {}", path.display()))?;
        }
        Ok(changed)
    }

    /// 读取整个记录文件；文件不存在返回 None
    pub async fn read(&self, group_id: &str) -> Result<Option<String>> {
        let path = self.path_for(group_id);
        match fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("读取最后发言文件失败: {}", path.display())),
        }
    }
}
