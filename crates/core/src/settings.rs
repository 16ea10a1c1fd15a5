//! User configuration and its persistence.
//!
//! Settings live in durable storage with the API key blanked out; the key
//! itself is kept in session storage only (or supplied through
//! `PROMPT_MASTER_API_KEY`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::Result,
    provider::{DEFAULT_MODEL, DEFAULT_PROXY_PATH, LEGACY_DIRECT_BASE_URLS},
    storage::{SESSION_API_KEY, SETTINGS_KEY, SharedStorage, read_json_or_none},
    value::{coerce_string, is_truthy, to_positive_int},
};

pub const API_KEY_ENV_VAR: &str = "PROMPT_MASTER_API_KEY";

const LEGACY_MODEL_ID: &str = "glm-4.7-flash";
const LEGACY_MODEL_NAME: &str = "GLM-4.7-Flash";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub mode: String,
    pub provider: String,
    pub base_url: String,
    pub api_type: String,
    pub model_id: String,
    pub model_name: String,
    pub reasoning: bool,
    pub input: Vec<String>,
    pub context_window: u64,
    pub max_tokens: u64,
    pub user_agent: String,
    pub max_output_tokens: u64,
    pub api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: "merge".to_string(),
            provider: "vercel-proxy".to_string(),
            base_url: DEFAULT_PROXY_PATH.to_string(),
            api_type: "proxy-or-openai-chat-completions".to_string(),
            model_id: DEFAULT_MODEL.to_string(),
            model_name: "GLM-4.7".to_string(),
            reasoning: false,
            input: vec!["text".to_string(), "image".to_string()],
            context_window: 200_000,
            max_tokens: 8192,
            user_agent: "CodexCLI/2026.1".to_string(),
            max_output_tokens: 4096,
            api_key: String::new(),
        }
    }
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Copy that is safe to write to durable storage.
    pub fn without_api_key(&self) -> Self {
        Self {
            api_key: String::new(),
            ..self.clone()
        }
    }

    /// API key with everything but the last four characters masked.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.is_empty() {
            return String::new();
        }
        let visible = chars.len().min(4);
        let hidden = chars.len() - visible;
        let tail: String = chars[hidden..].iter().collect();
        format!("{}{}", "*".repeat(hidden.min(12)), tail)
    }
}

fn string_or(raw: &Value, key: &str, fallback: &str) -> String {
    let value = raw.get(key).map(coerce_string).unwrap_or_default();
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Coerces an arbitrary JSON value into well-formed settings.
pub fn normalize_settings(raw: &Value) -> Settings {
    let defaults = Settings::default();

    let reasoning = match raw.get("reasoning") {
        None | Some(Value::Null) => defaults.reasoning,
        Some(value) => is_truthy(value),
    };

    let input = match raw.get("input") {
        Some(Value::Array(items)) if !items.is_empty() => {
            items.iter().map(coerce_string).collect()
        }
        _ => defaults.input.clone(),
    };

    Settings {
        mode: string_or(raw, "mode", &defaults.mode),
        provider: string_or(raw, "provider", &defaults.provider),
        base_url: string_or(raw, "baseUrl", &defaults.base_url),
        api_type: string_or(raw, "apiType", &defaults.api_type),
        model_id: string_or(raw, "modelId", &defaults.model_id),
        model_name: string_or(raw, "modelName", &defaults.model_name),
        reasoning,
        input,
        context_window: to_positive_int(raw.get("contextWindow"), defaults.context_window),
        max_tokens: to_positive_int(raw.get("maxTokens"), defaults.max_tokens),
        user_agent: string_or(raw, "userAgent", &defaults.user_agent),
        max_output_tokens: to_positive_int(
            raw.get("maxOutputTokens"),
            defaults.max_output_tokens,
        ),
        api_key: string_or(raw, "apiKey", &defaults.api_key),
    }
}

/// Normalizes stored settings and migrates values written by older builds.
/// Any API key found in durable storage is discarded.
pub fn sanitize_stored_settings(raw: &Value) -> Settings {
    let mut obj = match raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let stored_base_url = obj.get("baseUrl").map(coerce_string).unwrap_or_default();
    if LEGACY_DIRECT_BASE_URLS.contains(&stored_base_url.trim()) {
        obj.insert("baseUrl".into(), Value::String(DEFAULT_PROXY_PATH.into()));
    }

    let stored_model_id = obj.get("modelId").map(coerce_string).unwrap_or_default();
    if stored_model_id.trim() == LEGACY_MODEL_ID {
        obj.insert("modelId".into(), Value::String(DEFAULT_MODEL.into()));
    }

    let stored_model_name = obj.get("modelName").map(coerce_string).unwrap_or_default();
    if stored_model_name.trim() == LEGACY_MODEL_NAME {
        obj.insert("modelName".into(), Value::String("GLM-4.7".into()));
    }

    obj.insert("apiKey".into(), Value::String(String::new()));
    normalize_settings(&Value::Object(obj))
}

/// Durable settings plus the session-scoped API key.
pub struct SettingsStore {
    durable: SharedStorage,
    session: SharedStorage,
}

impl SettingsStore {
    pub fn new(durable: SharedStorage, session: SharedStorage) -> Self {
        Self { durable, session }
    }

    pub async fn load(&self) -> Settings {
        let raw = read_json_or_none(self.durable.as_ref(), SETTINGS_KEY)
            .await
            .unwrap_or(Value::Null);
        let mut settings = sanitize_stored_settings(&raw);
        settings.api_key = self.read_session_api_key().await;
        settings
    }

    pub async fn save(&self, settings: &Settings) -> Result<()> {
        let value = serde_json::to_value(settings.without_api_key())?;
        self.durable.set(SETTINGS_KEY, &value).await?;
        self.write_session_api_key(&settings.api_key).await
    }

    pub async fn reset(&self) -> Result<Settings> {
        let settings = Settings::default();
        self.save(&settings).await?;
        Ok(settings)
    }

    /// Session key, falling back to the environment.
    pub async fn read_session_api_key(&self) -> String {
        let stored = read_json_or_none(self.session.as_ref(), SESSION_API_KEY)
            .await
            .map(|v| coerce_string(&v).trim().to_string())
            .unwrap_or_default();
        if !stored.is_empty() {
            return stored;
        }
        std::env::var(API_KEY_ENV_VAR)
            .map(|key| key.trim().to_string())
            .unwrap_or_default()
    }

    async fn write_session_api_key(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return self.session.remove(SESSION_API_KEY).await;
        }
        self.session
            .set(SESSION_API_KEY, &Value::String(api_key.to_string()))
            .await
    }
}
