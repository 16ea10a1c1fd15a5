//! Reference documents that steer the model's output format.
//!
//! The documents are fetched once per loader (concurrently, with a per-file
//! timeout) and merged. Any failure switches to a built-in rule text; there
//! is no retry.

use std::{path::PathBuf, time::Duration};

use futures_util::future::try_join_all;
use reqwest::Url;
use tokio::sync::{OnceCell, watch};

pub const SKILL_FILES: [&str; 3] = [
    "jimeng-video/SKILL.md",
    "jimeng-video/references/jimeng_video_guide.md",
    "jimeng-video/references/prompt_templates.md",
];

pub const SKILL_FETCH_TIMEOUT: Duration = Duration::from_secs(8);

pub static FALLBACK_SKILL_CONTEXT: &str = "你是即梦 Seedance 2.0 视频分镜提示词专家，请遵循以下规则：
1) 只输出分镜提示词正文，不输出任何标题、说明、建议或附加解释。
2) 分段时长规范：4-6秒=1-2段；7-10秒=2-3段；11-15秒=3-5段。
3) 每段结构：[运镜方式] + [主体] + [动作] + [场景] + [氛围/音效]。
4) 主体、动作、场景必须具体，不可模糊。
5) 输出格式固定为：X-Y秒画面：运镜 + 主体 + 动作 + 场景 + 氛围/音效";

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("{name} 读取失败：{reason}")]
    ReadFailed { name: String, reason: String },

    #[error("{name} 读取失败（{status}）")]
    BadStatus { name: String, status: u16 },

    #[error("{name} 读取超时（>{timeout_ms}ms）")]
    Timeout { name: String, timeout_ms: u128 },

    #[error("技能文档为空")]
    Empty,
}

/// Where the reference documents live.
#[derive(Debug, Clone)]
pub enum SkillRoot {
    Dir(PathBuf),
    Http(Url),
}

impl SkillRoot {
    /// `http(s)://` roots are fetched over the network, anything else is a
    /// directory on disk.
    pub fn parse(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let url = if url.path().ends_with('/') {
                    url
                } else {
                    // join() would otherwise replace the last path segment
                    Url::parse(&format!("{url}/")).unwrap_or(url)
                };
                SkillRoot::Http(url)
            }
            _ => SkillRoot::Dir(PathBuf::from(raw)),
        }
    }
}

/// Loader status, for a front-end indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillStatus {
    Idle,
    Loading,
    Loaded,
    Fallback(String),
}

impl SkillStatus {
    pub fn message(&self) -> String {
        match self {
            SkillStatus::Idle => "技能规则尚未加载。".to_string(),
            SkillStatus::Loading => "正在加载 jimeng-video skills 规则...".to_string(),
            SkillStatus::Loaded => "jimeng-video skills 已加载，将按技能规则生成。".to_string(),
            SkillStatus::Fallback(_) => "技能文件读取失败，已切换为内置规则。".to_string(),
        }
    }
}

pub struct SkillContextLoader {
    root: SkillRoot,
    client: reqwest::Client,
    timeout: Duration,
    cache: OnceCell<String>,
    status: watch::Sender<SkillStatus>,
}

impl SkillContextLoader {
    pub fn new(root: SkillRoot) -> Self {
        Self::with_client(root, reqwest::Client::new())
    }

    pub fn with_client(root: SkillRoot, client: reqwest::Client) -> Self {
        let (status, _) = watch::channel(SkillStatus::Idle);
        Self {
            root,
            client,
            timeout: SKILL_FETCH_TIMEOUT,
            cache: OnceCell::new(),
            status,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SkillStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SkillStatus {
        self.status.borrow().clone()
    }

    /// Merged skill context, loaded on first call and cached afterwards.
    pub async fn load(&self) -> &str {
        self.cache
            .get_or_init(|| async {
                self.status.send_replace(SkillStatus::Loading);
                match self.fetch_all().await {
                    Ok(context) => {
                        tracing::info!(chars = context.chars().count(), "skill context loaded");
                        self.status.send_replace(SkillStatus::Loaded);
                        context
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skill context unavailable, using built-in rules");
                        self.status.send_replace(SkillStatus::Fallback(e.to_string()));
                        FALLBACK_SKILL_CONTEXT.trim().to_string()
                    }
                }
            })
            .await
    }

    async fn fetch_all(&self) -> Result<String, SkillError> {
        let docs = try_join_all(SKILL_FILES.into_iter().map(|name| self.fetch_one(name))).await?;

        let merged = docs
            .into_iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(name, text)| format!("### {name}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");

        if merged.trim().is_empty() {
            return Err(SkillError::Empty);
        }
        Ok(merged)
    }

    async fn fetch_one(&self, name: &'static str) -> Result<(&'static str, String), SkillError> {
        let read = self.read_text(name);
        match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(text)) => Ok((name, text.trim().to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SkillError::Timeout {
                name: name.to_string(),
                timeout_ms: self.timeout.as_millis(),
            }),
        }
    }

    async fn read_text(&self, name: &str) -> Result<String, SkillError> {
        let read_failed = |reason: String| SkillError::ReadFailed {
            name: name.to_string(),
            reason,
        };

        match &self.root {
            SkillRoot::Dir(dir) => tokio::fs::read_to_string(dir.join(name))
                .await
                .map_err(|e| read_failed(e.to_string())),
            SkillRoot::Http(base) => {
                let url = base.join(name).map_err(|e| read_failed(e.to_string()))?;
                let response = self
                    .client
                    .get(url)
                    .header("Cache-Control", "no-cache")
                    .send()
                    .await
                    .map_err(|e| read_failed(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(SkillError::BadStatus {
                        name: name.to_string(),
                        status: response.status().as_u16(),
                    });
                }
                response.text().await.map_err(|e| read_failed(e.to_string()))
            }
        }
    }
}
