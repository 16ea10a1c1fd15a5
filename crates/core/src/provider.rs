use reqwest::Url;

pub const DEFAULT_PROXY_PATH: &str = "/api/generate";
pub const DEFAULT_DIRECT_BASE_URL: &str = "https://open.bigmodel.cn/api/coding/paas/v4";
pub const DEFAULT_PROXY_ORIGIN: &str = "http://127.0.0.1:3000";
pub const DEFAULT_MODEL: &str = "glm-4.7";

/// Upstream base URLs that older builds stored for direct calls. They are
/// migrated to the proxy on load.
pub const LEGACY_DIRECT_BASE_URLS: [&str; 2] = [
    "https://open.bigmodel.cn/api/paas/v4",
    "https://open.bigmodel.cn/api/coding/paas/v4",
];

/// How a generation request leaves the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Same-origin relay that builds prompts server-side.
    Proxy,
    /// OpenAI-style chat completion call straight to the provider.
    Direct,
}

impl Transport {
    pub fn for_base_url(base_url: &str, origin: &Url) -> Self {
        if is_proxy_endpoint(base_url, origin) {
            Transport::Proxy
        } else {
            Transport::Direct
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Proxy => "proxy",
            Transport::Direct => "direct",
        }
    }
}

/// Whether `base_url` points at the relay rather than an external host.
pub fn is_proxy_endpoint(base_url: &str, origin: &Url) -> bool {
    let clean = base_url.trim();
    if clean.is_empty() || clean.contains(DEFAULT_PROXY_PATH) || clean.starts_with("/api/") {
        return true;
    }
    let parsed = Url::parse(clean).or_else(|_| origin.join(clean));
    match parsed {
        Ok(url) => url.path().starts_with("/api/"),
        Err(_) => false,
    }
}

/// Relay URL. Relative paths are resolved against `origin`.
pub fn resolve_proxy_endpoint(base_url: &str, origin: &Url) -> String {
    let clean = base_url.trim();
    let clean = if clean.is_empty() {
        DEFAULT_PROXY_PATH
    } else {
        clean
    };
    match Url::parse(clean) {
        Ok(url) => url.to_string(),
        Err(_) => origin
            .join(clean)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| clean.to_string()),
    }
}

/// `{base}/chat/completions`, unless the base already ends there.
pub fn resolve_chat_completions_endpoint(base_url: &str) -> String {
    let clean = base_url.trim().trim_end_matches('/');
    let clean = if clean.is_empty() {
        DEFAULT_DIRECT_BASE_URL
    } else {
        clean
    };
    if clean.ends_with("/chat/completions") {
        clean.to_string()
    } else {
        format!("{clean}/chat/completions")
    }
}

/// Scheme://host[:port] of an endpoint, or the endpoint itself when it does
/// not parse.
pub fn safe_origin(endpoint: &str) -> String {
    match Url::parse(endpoint) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => endpoint.to_string(),
    }
}
