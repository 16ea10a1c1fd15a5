use reqwest::{StatusCode, Url, header};
use serde::Serialize;
use serde_json::Value;

use crate::{
    extract::{UpstreamBody, extract_api_error, extract_response_text},
    prompt::{Prompts, build_prompts},
    provider::{
        Transport, resolve_chat_completions_endpoint, resolve_proxy_endpoint, safe_origin,
    },
    settings::Settings,
    types::FormPayload,
};

pub const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to fetch: {0}")]
    Transport(String),

    #[error("请求失败（{status}）且返回非 JSON 数据。")]
    NonJsonStatus { status: u16 },

    #[error("AI 返回非 JSON 格式，无法解析。")]
    NonJson,

    #[error("请求失败（{status}）：{message}")]
    Status { status: u16, message: String },

    #[error("代理返回为空。")]
    EmptyProxyOutput,

    #[error("AI 返回为空。")]
    EmptyOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// OpenAI-style chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u64,
    pub temperature: f32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, prompts: Prompts, max_tokens: u64) -> Self {
        Self {
            model: model.into(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompts.system,
                },
                ChatMessage {
                    role: "user",
                    content: prompts.user,
                },
            ],
            max_tokens,
            temperature: TEMPERATURE,
            stream: false,
        }
    }
}

/// Upstream status plus its body; `body` is `None` when the body is not JSON.
/// An empty body reads as `{}`.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Option<Value>,
}

/// POSTs `body` as JSON with bearer auth and reads the reply leniently.
pub async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    user_agent: Option<&str>,
    body: &T,
) -> Result<UpstreamReply, reqwest::Error> {
    let mut request = client
        .post(endpoint)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
        .json(body);
    if let Some(user_agent) = user_agent.filter(|ua| !ua.is_empty()) {
        request = request.header(header::USER_AGENT, user_agent);
    }

    let response = request.send().await?;
    let status = response.status();
    let raw = response.text().await?;
    let body = if raw.trim().is_empty() {
        Some(Value::Object(Default::default()))
    } else {
        serde_json::from_str(&raw).ok()
    };

    Ok(UpstreamReply { status, body })
}

/// Send failure text with its cause chain. The request URL is left out so
/// digits in a host, port or path never read as a status code.
pub fn describe_transport_error(error: reqwest::Error) -> String {
    let error = error.without_url();
    let mut message = error.to_string();
    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message = format!("{message}: {cause_text}");
        }
        source = cause.source();
    }
    message
}

/// `output` (or legacy `result`) string of a relay response.
pub fn extract_proxy_output(data: &Value) -> String {
    ["output", "result"]
        .iter()
        .find_map(|key| data.get(key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// User-facing explanation of a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub raw_message: String,
    pub user_message: String,
}

/// Classifies a raw error message by substring; the first match wins.
pub fn explain_request_error(raw_message: &str, endpoint: &str) -> Diagnostics {
    let origin = safe_origin(endpoint);

    if raw_message.contains("401") || raw_message.contains("Unauthorized") {
        return Diagnostics {
            raw_message: raw_message.to_string(),
            user_message: "认证失败（401）。请检查你在 AI 设置中填写的 GLM API Key（通常为 id.secret）是否正确且仍有效。".to_string(),
        };
    }

    if raw_message.contains("403") {
        return Diagnostics {
            raw_message: raw_message.to_string(),
            user_message: format!(
                "访问被拒绝（403）。若使用代理，请检查代理的环境变量与账号权限；若直连，请确认 {origin} 的跨域策略。"
            ),
        };
    }

    if raw_message.contains("Failed to fetch") {
        return Diagnostics {
            raw_message: format!("{raw_message}（可能是 CORS 拦截）"),
            user_message: format!(
                "AI 请求被拦截或无法连接。请确认 {origin} 可访问并放开当前站点跨域，或改用支持 CORS 的 Base URL。"
            ),
        };
    }

    Diagnostics {
        raw_message: raw_message.to_string(),
        user_message: format!("AI 请求失败：{raw_message}"),
    }
}

/// Sends generation requests through the relay or straight to the provider,
/// depending on the configured base URL.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    proxy_origin: Url,
}

impl Dispatcher {
    pub fn new(proxy_origin: Url) -> Self {
        Self::with_client(reqwest::Client::new(), proxy_origin)
    }

    pub fn with_client(client: reqwest::Client, proxy_origin: Url) -> Self {
        Self {
            client,
            proxy_origin,
        }
    }

    pub fn transport(&self, settings: &Settings) -> Transport {
        Transport::for_base_url(&settings.base_url, &self.proxy_origin)
    }

    pub fn endpoint(&self, settings: &Settings) -> String {
        match self.transport(settings) {
            Transport::Proxy => resolve_proxy_endpoint(&settings.base_url, &self.proxy_origin),
            Transport::Direct => resolve_chat_completions_endpoint(&settings.base_url),
        }
    }

    /// Raw reply text for `payload`. The relay builds its own prompts, so
    /// `skill_context` is only used on the direct route.
    pub async fn request(
        &self,
        payload: &FormPayload,
        settings: &Settings,
        skill_context: &str,
    ) -> Result<String, DispatchError> {
        let transport = self.transport(settings);
        let endpoint = self.endpoint(settings);
        tracing::info!(transport = transport.name(), %endpoint, "dispatching generation request");

        match transport {
            Transport::Proxy => self.request_via_proxy(&endpoint, payload, settings).await,
            Transport::Direct => {
                let prompts = build_prompts(skill_context, payload);
                let body = ChatCompletionRequest::new(
                    settings.model_id.clone(),
                    prompts,
                    settings.max_output_tokens,
                );
                self.request_direct(&endpoint, &body, settings).await
            }
        }
    }

    async fn request_via_proxy(
        &self,
        endpoint: &str,
        payload: &FormPayload,
        settings: &Settings,
    ) -> Result<String, DispatchError> {
        let data = self.send(endpoint, payload, settings).await?;
        let output = extract_proxy_output(&data);
        if output.is_empty() {
            return Err(DispatchError::EmptyProxyOutput);
        }
        Ok(output)
    }

    async fn request_direct(
        &self,
        endpoint: &str,
        body: &ChatCompletionRequest,
        settings: &Settings,
    ) -> Result<String, DispatchError> {
        let data = self.send(endpoint, body, settings).await?;
        tracing::debug!(shape = UpstreamBody::classify(&data).kind(), "upstream reply");
        let output = extract_response_text(&data);
        if output.is_empty() {
            return Err(DispatchError::EmptyOutput);
        }
        Ok(output)
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
        settings: &Settings,
    ) -> Result<Value, DispatchError> {
        let reply = post_json(
            &self.client,
            endpoint,
            &settings.api_key,
            Some(&settings.user_agent),
            body,
        )
        .await
        .map_err(|e| DispatchError::Transport(describe_transport_error(e)))?;

        let status = reply.status;
        match reply.body {
            None if !status.is_success() => Err(DispatchError::NonJsonStatus {
                status: status.as_u16(),
            }),
            None => Err(DispatchError::NonJson),
            Some(data) if !status.is_success() => Err(DispatchError::Status {
                status: status.as_u16(),
                message: extract_api_error(Some(&data)),
            }),
            Some(data) => Ok(data),
        }
    }
}
