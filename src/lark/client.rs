//! 飞书 Open API 客户端：tenant_access_token、发送文本、下载消息资源

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::LarkSection;
use crate::core::{BotError, Result};
use crate::lark::event::ResourceKind;

/// 单条文本消息的最大字符数，超出后分段发送
pub const MAX_TEXT_CHARS: usize = 4000;
/// token 提前刷新的秒数
const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;
/// 接口未返回 expire 时的默认有效期
const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;
/// token 失效类业务码（过期 / 非法）
const INVALID_TOKEN_CODES: [i64; 3] = [99991661, 99991663, 99991668];

/// 下载得到的消息资源
#[derive(Debug, Clone, Default)]
pub struct Resource {
    pub data: Vec<u8>,
    /// 来自 Content-Disposition
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// 飞书接口抽象，便于测试替换
#[async_trait]
pub trait LarkApi: Send + Sync {
    /// 向群聊 / 单聊发送文本（超长自动分段）
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;

    /// 下载消息中的图片或文件
    async fn get_message_resource(
        &self,
        message_id: &str,
        key: &str,
        kind: ResourceKind,
    ) -> Result<Resource>;
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    receive_id: &'a str,
    msg_type: &'a str,
    content: String,
}

/// 通用响应体（只关心 code / msg）
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// 基于 reqwest 的飞书客户端
pub struct LarkClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    download_timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl LarkClient {
    pub fn new(cfg: &LarkSection) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            app_id: cfg.app_id.clone(),
            app_secret: cfg.app_secret.clone(),
            download_timeout: Duration::from_secs(cfg.download_timeout_secs),
            token: Mutex::new(None),
        })
    }

    /// 获取 tenant_access_token（进程内缓存，过期前 60 秒刷新）
    pub async fn tenant_access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.base_url
        );
        let resp = self
            .http
            .post(&url)
            .json(&TokenRequest {
                app_id: &self.app_id,
                app_secret: &self.app_secret,
            })
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let body: TokenResponse = resp.json().await?;
        if body.code != 0 {
            return Err(BotError::LarkCode {
                code: body.code,
                msg: body.msg,
            });
        }
        let value = body
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BotError::LarkCode {
                code: body.code,
                msg: "tenant_access_token missing".into(),
            })?;

        let ttl = body.expire.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let refresh_at =
            Instant::now() + Duration::from_secs(ttl.saturating_sub(TOKEN_REFRESH_MARGIN_SECS));
        tracing::debug!(ttl, "tenant_access_token refreshed");
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at,
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// 认证失败时清掉缓存，下次调用重新取 token
    async fn check_token_error(&self, err: &BotError) {
        let invalid = match err {
            BotError::LarkStatus { status, .. } => *status == 401,
            BotError::LarkCode { code, .. } => INVALID_TOKEN_CODES.contains(code),
            _ => false,
        };
        if invalid {
            tracing::warn!(error = %err, "Lark token rejected, clearing cache");
            self.invalidate_token().await;
        }
    }

    async fn send_chunk(&self, chat_id: &str, chunk: &str) -> Result<()> {
        let token = self.tenant_access_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages?receive_id_type=chat_id",
            self.base_url
        );
        let req = SendMessageRequest {
            receive_id: chat_id,
            msg_type: "text",
            content: serde_json::json!({ "text": chunk }).to_string(),
        };
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&req)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let body: ApiResponse = resp.json().await?;
        if body.code != 0 {
            return Err(BotError::LarkCode {
                code: body.code,
                msg: body.msg,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LarkApi for LarkClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let chunks = split_chunks(text, MAX_TEXT_CHARS);
        if chunks.is_empty() {
            tracing::debug!(chat_id, "empty text, nothing to send");
            return Ok(());
        }
        for chunk in &chunks {
            if let Err(e) = self.send_chunk(chat_id, chunk).await {
                self.check_token_error(&e).await;
                return Err(e);
            }
        }
        tracing::info!(chat_id, chunks = chunks.len(), "Lark message sent");
        Ok(())
    }

    async fn get_message_resource(
        &self,
        message_id: &str,
        key: &str,
        kind: ResourceKind,
    ) -> Result<Resource> {
        let token = self.tenant_access_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages/{}/resources/{}",
            self.base_url, message_id, key
        );
        let resp = self
            .http
            .get(&url)
            .query(&[("type", kind.as_str())])
            .bearer_auth(&token)
            .timeout(self.download_timeout)
            .send()
            .await?;
        let resp = match ensure_success(resp).await {
            Ok(resp) => resp,
            Err(e) => {
                self.check_token_error(&e).await;
                return Err(e);
            }
        };

        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let filename = header(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|d| filename_from_disposition(&d));
        let data = resp.bytes().await?.to_vec();

        tracing::info!(
            message_id,
            key,
            kind = kind.as_str(),
            size = data.len(),
            filename = filename.as_deref().unwrap_or("-"),
            content_type = content_type.as_deref().unwrap_or("-"),
            "fetched message resource"
        );
        Ok(Resource {
            data,
            filename,
            content_type,
        })
    }
}

/// 非 2xx 转为 LarkStatus 错误（带响应体）
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BotError::LarkStatus {
        status: status.as_u16(),
        body,
    })
}

/// 按字符切分；空文本返回空列表
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    text.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

/// `attachment; filename="a.pdf"` -> `a.pdf`
pub fn filename_from_disposition(disposition: &str) -> Option<String> {
    let (_, rest) = disposition.split_once("filename=")?;
    let name = rest
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches('"')
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}
