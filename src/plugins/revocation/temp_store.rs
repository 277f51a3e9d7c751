use super::utils::{sanitize_filename, short_token};
use anyhow::{Context as _, Result, bail};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 对外暴露临时文件时使用的相对路径前缀
pub const PUBLIC_PREFIX: &str = "tmp/";

const MAX_NAME_ATTEMPTS: usize = 8;

/// 隔离的临时目录：缓存中的媒体消息各自持有一份私有副本
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
}

impl TempStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建临时目录失败: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 复制文件到临时目录，文件名形如 `{原名}_{8位随机}{扩展名}`
    pub async fn copy_in(&self, src: &Path) -> Result<PathBuf> {
        let meta = fs::metadata(src)
            .await
            .with_context(|| format!("源文件不存在: {}", src.display()))?;
        if !meta.is_file() {
            bail!("不是普通文件: {}", src.display());
        }

        let stem = src
            .file_stem()
            .map(|s| sanitize_filename(&s.to_string_lossy()))
            .unwrap_or_else(|| "file".to_string());
        let ext = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let target = self.dir.join(format!("{}_{}{}", stem, short_token(), ext));

            // create_new 保证同名文件不会被覆盖
            let mut out = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("创建临时文件失败: {}", target.display()));
                }
            };

            let copied = async {
                let mut input = fs::File::open(src).await?;
                tokio::io::copy(&mut input, &mut out).await?;
                out.sync_all().await
            }
            .await;

            if let Err(e) = copied {
                let _ = fs::remove_file(&target).await;
                return Err(e).with_context(|| format!("复制到临时目录失败: {}", src.display()));
            }
            return Ok(target);
        }

        bail!("无法为 {} 生成不冲突的临时文件名", src.display())
    }

    /// 删除临时文件；文件已不存在视为成功
    pub async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("删除临时文件失败: {}", path.display())),
        }
    }

    /// 临时文件对外的相对路径，如 `tmp/photo_1a2b3c4d.jpg`
    pub fn public_path(&self, path: &Path) -> Option<String> {
        if path.parent() != Some(self.dir.as_path()) {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        Some(format!("{}{}", PUBLIC_PREFIX, name))
    }

    /// 将对外相对路径还原为本地路径；仅接受 `tmp/` 下的普通文件名
    pub fn resolve_public(&self, rel: &str) -> Option<PathBuf> {
        let name = rel.strip_prefix(PUBLIC_PREFIX)?;
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.starts_with('.')
        {
            return None;
        }
        Some(self.dir.join(name))
    }
}
