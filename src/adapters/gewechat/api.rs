use crate::api::{ApiError, ChatroomInfo, ContactInfo, SendPacket, WeChatApi};
use crate::config::GewechatConfig;
use crate::message::MessageKind;
use futures_util::future::BoxFuture;
use serde::Serialize;
use simd_json::OwnedValue;
use simd_json::base::ValueAsArray;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::time::Duration;

const TOKEN_HEADER: &str = "X-GEWE-TOKEN";

/// GeWeChat HTTP API 客户端
pub struct GewechatClient {
    http: reqwest::Client,
    base_url: String,
    download_url: String,
    token: String,
    app_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostTextParams<'a> {
    app_id: &'a str,
    to_wxid: &'a str,
    content: &'a str,
    ats: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostImageParams<'a> {
    app_id: &'a str,
    to_wxid: &'a str,
    img_url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostFileParams<'a> {
    app_id: &'a str,
    to_wxid: &'a str,
    file_url: &'a str,
    file_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BriefInfoParams<'a> {
    app_id: &'a str,
    wxids: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatroomInfoParams<'a> {
    app_id: &'a str,
    chatroom_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadParams<'a> {
    app_id: &'a str,
    xml: &'a str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg_id: Option<&'a str>,
}

impl GewechatClient {
    pub fn new(config: &GewechatConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            download_url: config.download_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            app_id: config.app_id.clone(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// 通用 API 调用
    /// 响应格式: { ret, msg, data }，ret 为 200 表示成功
    pub async fn call<P>(&self, path: &str, params: &P) -> Result<OwnedValue, ApiError>
    where
        P: Serialize,
    {
        let body = simd_json::to_vec(params)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .http
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let mut bytes = resp.bytes().await?.to_vec();
        let value = simd_json::to_owned_value(&mut bytes)?;

        let ret = value
            .get_i64("ret")
            .or_else(|| value.get_u64("ret").map(|v| v as i64))
            .unwrap_or(-1);
        if ret != 200 {
            let msg = value.get_str("msg").unwrap_or("Unknown Error");
            return Err(format!("API 调用失败 {} (ret={}): {}", path, ret, msg).into());
        }

        Ok(value.get("data").cloned().unwrap_or(OwnedValue::from(())))
    }

    /// 获取媒体文件的下载地址
    pub async fn media_url(
        &self,
        kind: MessageKind,
        xml: &str,
        msg_id: &str,
    ) -> Result<String, ApiError> {
        let (path, params) = match kind {
            MessageKind::Image => (
                "/message/downloadImage",
                DownloadParams {
                    app_id: &self.app_id,
                    xml,
                    kind: Some(2),
                    msg_id: None,
                },
            ),
            MessageKind::Video => (
                "/message/downloadVideo",
                DownloadParams {
                    app_id: &self.app_id,
                    xml,
                    kind: None,
                    msg_id: None,
                },
            ),
            MessageKind::Voice => (
                "/message/downloadVoice",
                DownloadParams {
                    app_id: &self.app_id,
                    xml,
                    kind: None,
                    msg_id: Some(msg_id),
                },
            ),
            MessageKind::File => (
                "/message/downloadFile",
                DownloadParams {
                    app_id: &self.app_id,
                    xml,
                    kind: None,
                    msg_id: None,
                },
            ),
            other => return Err(format!("{} 消息没有可下载的文件", other.name()).into()),
        };

        let data = self.call(path, &params).await?;
        let file_url = data
            .get_str("fileUrl")
            .filter(|s| !s.is_empty())
            .ok_or("响应中缺少 fileUrl")?;
        Ok(self.absolute_download_url(file_url))
    }

    fn absolute_download_url(&self, file_url: &str) -> String {
        if file_url.starts_with("http://") || file_url.starts_with("https://") {
            file_url.to_string()
        } else {
            format!("{}/{}", self.download_url, file_url.trim_start_matches('/'))
        }
    }
}

impl WeChatApi for GewechatClient {
    fn send<'a>(&'a self, packet: &'a SendPacket) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            match packet {
                SendPacket::Text { to, content } => {
                    let params = PostTextParams {
                        app_id: &self.app_id,
                        to_wxid: to,
                        content,
                        ats: "",
                    };
                    self.call("/message/postText", &params).await?;
                }
                SendPacket::Image { to, url } => {
                    let params = PostImageParams {
                        app_id: &self.app_id,
                        to_wxid: to,
                        img_url: url,
                    };
                    self.call("/message/postImage", &params).await?;
                }
                SendPacket::File { to, url, name } => {
                    let params = PostFileParams {
                        app_id: &self.app_id,
                        to_wxid: to,
                        file_url: url,
                        file_name: name,
                    };
                    self.call("/message/postFile", &params).await?;
                }
            }
            Ok(())
        })
    }

    fn contact_info<'a>(
        &'a self,
        wxid: &'a str,
    ) -> BoxFuture<'a, Result<Option<ContactInfo>, ApiError>> {
        Box::pin(async move {
            let params = BriefInfoParams {
                app_id: &self.app_id,
                wxids: [wxid],
            };
            let data = self.call("/contacts/getBriefInfo", &params).await?;
            match data.as_array().and_then(|items| items.first()).cloned() {
                Some(v) => Ok(Some(simd_json::serde::from_owned_value(v)?)),
                None => Ok(None),
            }
        })
    }

    fn chatroom_info<'a>(
        &'a self,
        chatroom_id: &'a str,
    ) -> BoxFuture<'a, Result<ChatroomInfo, ApiError>> {
        Box::pin(async move {
            let params = ChatroomInfoParams {
                app_id: &self.app_id,
                chatroom_id,
            };
            let data = self.call("/group/getChatroomInfo", &params).await?;
            Ok(simd_json::serde::from_owned_value(data)?)
        })
    }
}
