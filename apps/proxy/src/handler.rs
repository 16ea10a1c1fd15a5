use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
};
use prompt_master_core::{
    ChatCompletionRequest, FormPayload, SkillContextLoader, ValidationError, build_prompts,
    describe_transport_error, ensure_complete_output, extract_api_error, extract_response_text,
    normalize_generated_output, post_json, provider::resolve_chat_completions_endpoint,
    value::field_string,
};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

pub const GENERATE_PATH: &str = "/api/generate";
pub const MAX_TOKENS: u64 = 4096;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub model: String,
}

impl UpstreamConfig {
    pub fn endpoint(&self) -> String {
        resolve_chat_completions_endpoint(&self.base_url)
    }
}

pub struct ProxyState {
    pub upstream: UpstreamConfig,
    pub client: reqwest::Client,
    pub skills: Arc<SkillContextLoader>,
}

pub type SharedState = Arc<ProxyState>;

#[derive(Debug, Serialize)]
pub struct GenerateReply {
    pub output: String,
    pub model: String,
    pub provider: &'static str,
    pub mode: &'static str,
}

/// Error response, rendered as `{ "error": "<message>" }`.
#[derive(Debug)]
pub struct ProxyError {
    status: StatusCode,
    message: String,
}

impl ProxyError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ValidationError> for ProxyError {
    fn from(err: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(GENERATE_PATH, any(generate))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn generate(
    State(state): State<SharedState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match method {
        Method::OPTIONS => StatusCode::NO_CONTENT.into_response(),
        Method::POST => match handle_generate(&state, &headers, &body).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => {
                tracing::warn!(status = %e.status, error = %e.message, "generation rejected");
                e.into_response()
            }
        },
        _ => ProxyError::new(StatusCode::METHOD_NOT_ALLOWED, "仅支持 POST 请求。").into_response(),
    }
}

/// Unparseable or empty bodies read as an empty object.
fn parse_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Default::default());
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Default::default()))
}

/// `Authorization: Bearer <key>` (scheme matched case-insensitively), else the
/// raw header, else the body's `apiKey`.
fn resolve_api_key(headers: &HeaderMap, body: &Value) -> String {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if raw.is_empty() {
        return field_string(body, "apiKey").trim().to_string();
    }

    raw.get(..7)
        .filter(|scheme| scheme.eq_ignore_ascii_case("bearer "))
        .map(|_| raw[7..].trim())
        .filter(|key| !key.is_empty())
        .unwrap_or(raw)
        .to_string()
}

async fn handle_generate(
    state: &ProxyState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<GenerateReply, ProxyError> {
    let body = parse_body(body);
    let payload = FormPayload::from_value(&body)
        .ok_or(ValidationError::EmptyBody)?
        .trimmed();
    payload.validate_required()?;

    let api_key = resolve_api_key(headers, &body);
    if api_key.is_empty() {
        return Err(ProxyError::new(
            StatusCode::UNAUTHORIZED,
            "缺少 API Key。请在页面 AI 设置中填写后再生成。",
        ));
    }

    let endpoint = state.upstream.endpoint();
    let model = state.upstream.model.clone();
    let skill_context = state.skills.load().await;
    let request = ChatCompletionRequest::new(
        model.clone(),
        build_prompts(skill_context, &payload),
        MAX_TOKENS,
    );

    tracing::info!(%endpoint, %model, title = %payload.prompt_title, "forwarding generation");
    let reply = post_json(&state.client, &endpoint, &api_key, None, &request)
        .await
        .map_err(|e| {
            ProxyError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("代理请求失败：{}", describe_transport_error(e)),
            )
        })?;

    let status = StatusCode::from_u16(reply.status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let data = match reply.body {
        None if !status.is_success() => {
            return Err(ProxyError::new(
                status,
                format!("上游返回非 JSON（{}）。", status.as_u16()),
            ));
        }
        None => {
            return Err(ProxyError::new(
                StatusCode::BAD_GATEWAY,
                "上游返回非 JSON，无法解析。",
            ));
        }
        Some(data) if !status.is_success() => {
            return Err(ProxyError::new(status, extract_api_error(Some(&data))));
        }
        Some(data) => data,
    };

    let output = ensure_complete_output(
        &normalize_generated_output(&extract_response_text(&data)),
        &payload,
    );
    if output.is_empty() {
        return Err(ProxyError::new(
            StatusCode::BAD_GATEWAY,
            "上游返回为空内容。",
        ));
    }

    Ok(GenerateReply {
        output,
        model,
        provider: "glm",
        mode: "vercel-proxy-byok",
    })
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::Mutex,
        time::Duration,
    };

    use super::*;
    use axum::{body::Body, http::Request, routing::post};
    use prompt_master_core::SkillRoot;
    use tower::ServiceExt;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    /// Fake upstream. The reply depends on the requested model name.
    async fn upstream() -> (SocketAddr, Seen) {
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        let app = Router::new().route(
            "/v4/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let model = body["model"].as_str().unwrap_or_default().to_string();
                    sink.lock().unwrap().push((auth, body));
                    match model.as_str() {
                        "denied" => (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({"error": {"message": "令牌已过期"}})),
                        )
                            .into_response(),
                        "html" => (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response(),
                        "html-ok" => "<html>ok</html>".into_response(),
                        "empty" => Json(json!({"choices": [{"message": {"content": ""}}]})).into_response(),
                        _ => Json(json!({"choices": [{"message": {"content": "**0-3秒画面：航拍海面**\n其他说明"}}]}))
                            .into_response(),
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (addr, seen)
    }

    fn app(base_url: String, model: &str) -> Router {
        let skills = SkillContextLoader::new(SkillRoot::Dir("/nonexistent/skills".into()))
            .with_timeout(Duration::from_millis(500));
        router(Arc::new(ProxyState {
            upstream: UpstreamConfig {
                base_url,
                model: model.to_string(),
            },
            client: reqwest::Client::new(),
            skills: Arc::new(skills),
        }))
    }

    fn form() -> Value {
        json!({
            "promptTitle": "海边日出",
            "theme": "治愈系短片",
            "videoType": "风景",
            "videoDuration": "4-6秒",
            "coreContent": "少女奔跑",
            "stylePreference": "清新",
            "cameraStyle": "推镜头,跟随镜头"
        })
    }

    fn post_request(body: String, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(GENERATE_PATH)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn assert_cors(headers: &HeaderMap) {
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn preflight_and_method_guard() {
        let app = app("http://127.0.0.1:9/v4".into(), "glm-4.7");

        let options = Request::builder()
            .method(Method::OPTIONS)
            .uri(GENERATE_PATH)
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app.clone(), options).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_cors(&headers);
        assert_eq!(body, Value::Null);

        let get = Request::builder()
            .method(Method::GET)
            .uri(GENERATE_PATH)
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app, get).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_cors(&headers);
        assert_eq!(body, json!({"error": "仅支持 POST 请求。"}));
    }

    #[tokio::test]
    async fn validation_names_first_missing_field() {
        let (addr, seen) = upstream().await;
        let app = app(format!("http://{addr}/v4"), "glm-4.7");

        let mut body = form();
        body["theme"] = json!("  ");
        let (status, headers, reply) =
            send(app.clone(), post_request(body.to_string(), Some("Bearer k"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_cors(&headers);
        assert_eq!(reply, json!({"error": "请填写主题。"}));

        let (status, _, reply) = send(app.clone(), post_request("{oops".into(), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["error"], "请填写提示词标题。");

        let (status, _, reply) = send(app, post_request("null".into(), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["error"], "请求体为空。");

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_unauthorized() {
        let (addr, seen) = upstream().await;
        let app = app(format!("http://{addr}/v4"), "glm-4.7");

        let (status, _, reply) = send(app, post_request(form().to_string(), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            reply["error"],
            "缺少 API Key。请在页面 AI 设置中填写后再生成。"
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forwards_and_completes_output() {
        let (addr, seen) = upstream().await;
        let app = app(format!("http://{addr}/v4/"), "glm-4.7");

        let (status, headers, reply) =
            send(app, post_request(form().to_string(), Some("bearer  id.secret "))).await;
        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert_eq!(reply["model"], "glm-4.7");
        assert_eq!(reply["provider"], "glm");
        assert_eq!(reply["mode"], "vercel-proxy-byok");
        assert_eq!(
            reply["output"],
            "0-3秒画面：航拍海面\n\n3-6秒画面：跟随镜头 + 主体动作「少女奔跑」 + 场景围绕「治愈系短片」展开 + 氛围风格「清新」"
        );

        let seen = seen.lock().unwrap();
        let (auth, body) = &seen[0];
        assert_eq!(auth, "Bearer id.secret");
        assert_eq!(body["max_tokens"], MAX_TOKENS);
        assert_eq!(body["stream"], false);
        assert!(
            body["messages"][1]["content"]
                .as_str()
                .unwrap()
                .contains("- 必须输出 2 段分镜")
        );
    }

    #[tokio::test]
    async fn body_api_key_is_accepted() {
        let (addr, seen) = upstream().await;
        let app = app(format!("http://{addr}/v4"), "glm-4.7");

        let mut body = form();
        body["apiKey"] = json!(" from-body ");
        let (status, _, _) = send(app, post_request(body.to_string(), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(seen.lock().unwrap()[0].0, "Bearer from-body");
    }

    #[tokio::test]
    async fn upstream_errors_map_to_statuses() {
        let (addr, _) = upstream().await;
        let base = format!("http://{addr}/v4");

        let cases = [
            ("denied", StatusCode::UNAUTHORIZED, "令牌已过期"),
            ("html", StatusCode::BAD_GATEWAY, "上游返回非 JSON（502）。"),
            ("html-ok", StatusCode::BAD_GATEWAY, "上游返回非 JSON，无法解析。"),
        ];
        for (model, expected_status, expected_error) in cases {
            let (status, headers, reply) = send(
                app(base.clone(), model),
                post_request(form().to_string(), Some("Bearer k")),
            )
            .await;
            assert_eq!(status, expected_status, "model={model}");
            assert_cors(&headers);
            assert_eq!(reply["error"], expected_error, "model={model}");
        }
    }

    #[tokio::test]
    async fn empty_model_text_is_completed_from_template() {
        let (addr, _) = upstream().await;

        let (status, _, reply) = send(
            app(format!("http://{addr}/v4"), "empty"),
            post_request(form().to_string(), Some("Bearer k")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            reply["output"],
            "0-3秒画面：推镜头 + 主体动作「少女奔跑」 + 场景围绕「治愈系短片」展开 + 氛围风格「清新」\n\n\
             3-6秒画面：跟随镜头 + 主体动作「少女奔跑」 + 场景围绕「治愈系短片」展开 + 氛围风格「清新」"
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_is_internal_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (status, _, reply) = send(
            app(format!("http://{addr}/v4"), "glm-4.7"),
            post_request(form().to_string(), Some("Bearer k")),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = reply["error"].as_str().unwrap();
        assert!(error.starts_with("代理请求失败："));
        assert!(!error.contains(&addr.to_string()));
    }

    #[test]
    fn api_key_resolution() {
        let mut headers = HeaderMap::new();
        let body = json!({"apiKey": "body-key"});
        assert_eq!(resolve_api_key(&headers, &body), "body-key");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("BEARER abc"));
        assert_eq!(resolve_api_key(&headers, &body), "abc");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("raw-token"));
        assert_eq!(resolve_api_key(&headers, &body), "raw-token");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(resolve_api_key(&headers, &body), "Bearer");
    }
}
