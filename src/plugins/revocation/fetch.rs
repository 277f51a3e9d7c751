use super::utils::{sanitize_filename, short_token};
use crate::message::ChatMessage;
use anyhow::{Context as _, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 获取到的本地媒体文件
#[derive(Debug)]
pub struct Fetched {
    pub path: PathBuf,
    /// 是否由本模块下载 (下载件在复制进临时目录后可删除)
    pub downloaded: bool,
}

/// 媒体下载器：优先使用已存在的本地路径，否则按 URL 下载
pub struct MediaFetcher {
    client: reqwest::Client,
    dir: PathBuf,
}

impl MediaFetcher {
    pub async fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建下载目录失败: {}", dir.display()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("构建 HTTP 客户端失败")?;
        Ok(Self { client, dir })
    }

    pub async fn fetch(&self, msg: &ChatMessage) -> Result<Fetched> {
        let content = msg.content.trim();
        if !content.is_empty() && !content.starts_with('<') {
            let local = Path::new(content);
            if fs::try_exists(local).await.unwrap_or(false) {
                return Ok(Fetched {
                    path: local.to_path_buf(),
                    downloaded: false,
                });
            }
        }

        let Some(url) = msg.url.as_deref().filter(|u| !u.is_empty()) else {
            bail!("消息 {} 既没有本地文件也没有下载地址", msg.msg_id);
        };

        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("下载失败: {}", url))?
            .bytes()
            .await
            .with_context(|| format!("读取下载内容失败: {}", url))?;

        let target = self.target_path(url, content).await;
        fs::write(&target, &bytes)
            .await
            .with_context(|| format!("保存下载文件失败: {}", target.display()))?;

        Ok(Fetched {
            path: target,
            downloaded: true,
        })
    }

    /// 文件名优先取原路径的文件名，其次随机；扩展名取 URL，其次原路径，最后 .dat
    async fn target_path(&self, url: &str, original: &str) -> PathBuf {
        let url_path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        let ext = extension_of(&url_path)
            .or_else(|| extension_of(original))
            .unwrap_or_else(|| "dat".to_string());

        let original_name = (!original.starts_with('<'))
            .then(|| Path::new(original).file_name())
            .flatten()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty());

        let name = sanitize_filename(
            &original_name.unwrap_or_else(|| format!("dl_{}.{}", short_token(), ext)),
        );

        let base = self.dir.join(&name);
        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.clone());
        let suffix = Path::new(&name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut target = base;
        let mut counter = 0;
        while fs::try_exists(&target).await.unwrap_or(false) {
            counter += 1;
            target = self.dir.join(format!("{}_{}{}", stem, counter, suffix));
        }
        target
    }
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| !e.is_empty() && e.len() <= 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn media(content: &str, url: Option<String>) -> ChatMessage {
        let mut m = ChatMessage::new("m1", MessageKind::Image, "wxid_peer");
        m.content = content.to_string();
        m.url = url;
        m
    }

    #[tokio::test]
    async fn existing_local_path_is_used_as_is() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(root.path().join("dl"), Duration::from_secs(5))
            .await
            .unwrap();
        let local = root.path().join("pic.png");
        fs::write(&local, b"png").await.unwrap();

        let got = fetcher
            .fetch(&media(local.to_str().unwrap(), None))
            .await
            .unwrap();
        assert_eq!(got.path, local);
        assert!(!got.downloaded);
    }

    #[tokio::test]
    async fn downloads_from_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/abc.jpg")
            .with_status(200)
            .with_body("image-bytes")
            .expect(2)
            .create_async()
            .await;

        let root = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(root.path().join("dl"), Duration::from_secs(5))
            .await
            .unwrap();
        let url = format!("{}/files/abc.jpg", server.url());

        let first = fetcher.fetch(&media("<msg><img/></msg>", Some(url.clone()))).await.unwrap();
        assert!(first.downloaded);
        assert_eq!(first.path.extension().unwrap(), "jpg");
        assert_eq!(fs::read(&first.path).await.unwrap(), b"image-bytes");

        let second = fetcher
            .fetch(&media("/nowhere/abc.jpg", Some(url)))
            .await
            .unwrap();
        assert_ne!(first.path, second.path);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_fails_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let root = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(root.path().join("dl"), Duration::from_secs(5))
            .await
            .unwrap();
        let url = format!("{}/gone.png", server.url());
        assert!(fetcher.fetch(&media("", Some(url))).await.is_err());
    }

    #[tokio::test]
    async fn nothing_to_fetch_fails() {
        let root = tempfile::tempdir().unwrap();
        let fetcher = MediaFetcher::new(root.path().join("dl"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(fetcher.fetch(&media("", None)).await.is_err());
    }
}
