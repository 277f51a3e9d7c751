use super::utils::{format_minute, sanitize_filename};
use anyhow::{Context as _, Result};
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// 按群聊分文件的聊天记录：`{dir}/{群ID}.txt`
pub struct ChatLog {
    dir: PathBuf,
}

impl ChatLog {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建聊天记录目录失败: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, group_id: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", sanitize_filename(group_id)))
    }

    /// 追加一行记录；文件首次创建时写入表头
    pub async fn append(
        &self,
        group_id: &str,
        group_name: Option<&str>,
        at: &DateTime<Local>,
        nickname: &str,
        rendered: &str,
    ) -> Result<()> {
        let path = self.path_for(group_id);

        // create_new 保证表头只写一次
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                let header = format!(
                    "# 群聊名称: {}\n# 群聊 ID: {}\n# 文件创建时间: {}\n---\n",
                    group_name.unwrap_or("未能获取"),
                    group_id,
                    Local::now().format("%Y-%m-%d %H:%M:%S")
                );
                file.write_all(header.as_bytes())
                    .await
                    .with_context(|| format!("写入聊天记录表头失败: {}", path.display()))?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e).with_context(|| format!("创建聊天记录文件失败: {}", path.display()));
            }
        }

        let line = format!("{} 【{}】{}\n", format_minute(at), nickname, rendered);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("打开聊天记录文件失败: {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("写入聊天记录失败: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn header_written_once_then_lines_appended() {
        let root = tempfile::tempdir().unwrap();
        let log = ChatLog::new(root.path().join("logs")).await.unwrap();
        let at = Local.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();

        log.append("123@chatroom", Some("Book Club"), &at, "Alice", "hello")
            .await
            .unwrap();
        log.append("123@chatroom", Some("Renamed"), &at, "Bob", "[图片]")
            .await
            .unwrap();

        let text = fs::read_to_string(log.path_for("123@chatroom")).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# 群聊名称: Book Club");
        assert_eq!(lines[1], "# 群聊 ID: 123@chatroom");
        assert!(lines[2].starts_with("# 文件创建时间: "));
        assert_eq!(lines[3], "---");
        assert_eq!(lines[4], "2025-03-01 09:05 【Alice】hello");
        assert_eq!(lines[5], "2025-03-01 09:05 【Bob】[图片]");
        assert_eq!(text.matches("# 群聊名称").count(), 1);
    }

    #[tokio::test]
    async fn unknown_group_name_uses_placeholder() {
        let root = tempfile::tempdir().unwrap();
        let log = ChatLog::new(root.path()).await.unwrap();
        let at = Local.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();

        log.append("g9", None, &at, "Alice", "hi").await.unwrap();
        let text = fs::read_to_string(log.path_for("g9")).await.unwrap();
        assert!(text.starts_with("# 群聊名称: 未能获取\n# 群聊 ID: g9\n"));
    }

    #[tokio::test]
    async fn hostile_group_ids_are_sanitized() {
        let root = tempfile::tempdir().unwrap();
        let log = ChatLog::new(root.path()).await.unwrap();
        assert_eq!(log.path_for("a/b:c"), root.path().join("a_b_c.txt"));
    }
}
