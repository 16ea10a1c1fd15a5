//! Front-end controller: view navigation, the generation state machine and
//! record/settings actions.
//!
//! All mutable front-end state lives in one [`AppState`] owned by the
//! [`AppController`]. Front-ends call the command methods and render the
//! returned outcome or a [`AppController::state`] snapshot.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::{
    dispatch::{Diagnostics, Dispatcher, explain_request_error},
    error::{PromptMasterError, Result},
    normalize::{build_fallback_prompt, ensure_complete_output, normalize_generated_output},
    records::{Record, RecordSource, RecordStore, filter_records, prepend, remove_record},
    settings::{Settings, SettingsStore, normalize_settings},
    skill::{SkillContextLoader, SkillStatus},
    storage::{ACTIVE_VIEW_KEY, LAST_OUTPUT_KEY, SharedStorage, read_json_or_none},
    types::{FormPayload, ValidationError},
    value::coerce_string,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Generator,
    Records,
    Settings,
}

impl View {
    pub const ALL: [View; 3] = [View::Generator, View::Records, View::Settings];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Generator => "generator",
            View::Records => "records",
            View::Settings => "settings",
        }
    }

    /// Parses a location fragment such as `#records`. Unknown names yield `None`.
    pub fn from_fragment(fragment: &str) -> Option<Self> {
        let name = fragment.trim().trim_start_matches('#').trim();
        View::ALL.into_iter().find(|view| view.as_str() == name)
    }

    pub fn title(&self) -> &'static str {
        match self {
            View::Generator => "提示词生成",
            View::Records => "生成记录",
            View::Settings => "AI 设置",
        }
    }

    pub fn subtitle(&self) -> &'static str {
        match self {
            View::Generator => "基于 jimeng-video skills 生成可直接粘贴到即梦的分镜提示词",
            View::Records => "本地保存每次参数与生成结果，支持回填复用",
            View::Settings => "BYOK 模式：每位成员填写自己的 API Key，经代理调用",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub level: StatusLevel,
}

impl Status {
    pub fn new(message: impl Into<String>, level: StatusLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub active_view: View,
    pub settings: Settings,
    pub records: Vec<Record>,
    pub output: String,
    pub generation_status: Option<Status>,
    pub settings_status: Option<Status>,
    pub generating: bool,
}

/// Where a clipboard copy was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySource {
    Output,
    Record,
}

/// What the settings form submits. Everything else resets to defaults.
#[derive(Debug, Clone, Default)]
pub struct SettingsForm {
    pub api_key: String,
    pub base_url: String,
    pub model_id: Option<String>,
    pub max_output_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    /// Form validation failed; nothing was sent.
    Rejected(ValidationError),
    /// No API key configured; the settings view is now active.
    NeedsApiKey,
    Generated(Record),
    /// The request failed and a templated storyboard was saved instead.
    Fallback {
        record: Record,
        diagnostics: Diagnostics,
    },
}

/// Clears the generating flag when a generation settles, however it ends.
struct GeneratingGuard<'a>(&'a AtomicBool);

impl Drop for GeneratingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AppController {
    state: Mutex<AppState>,
    generating: AtomicBool,
    durable: SharedStorage,
    session: SharedStorage,
    settings_store: SettingsStore,
    record_store: RecordStore,
    skills: Arc<SkillContextLoader>,
    dispatcher: Dispatcher,
}

impl AppController {
    /// Restores settings, records and the last active view from storage.
    pub async fn open(
        durable: SharedStorage,
        session: SharedStorage,
        skills: Arc<SkillContextLoader>,
        dispatcher: Dispatcher,
    ) -> Self {
        let settings_store = SettingsStore::new(durable.clone(), session.clone());
        let record_store = RecordStore::new(durable.clone());

        let active_view = read_json_or_none(durable.as_ref(), ACTIVE_VIEW_KEY)
            .await
            .and_then(|v| View::from_fragment(&coerce_string(&v)))
            .unwrap_or_default();

        let output = read_json_or_none(session.as_ref(), LAST_OUTPUT_KEY)
            .await
            .map(|v| coerce_string(&v))
            .unwrap_or_default();

        let state = AppState {
            active_view,
            settings: settings_store.load().await,
            records: record_store.load().await,
            output,
            ..AppState::default()
        };
        tracing::debug!(
            view = active_view.as_str(),
            records = state.records.len(),
            "front-end state restored"
        );

        Self {
            state: Mutex::new(state),
            generating: AtomicBool::new(false),
            durable,
            session,
            settings_store,
            record_store,
            skills,
            dispatcher,
        }
    }

    pub async fn state(&self) -> AppState {
        let mut state = self.state.lock().await.clone();
        state.generating = self.generating.load(Ordering::Acquire);
        state
    }

    pub fn skill_status(&self) -> SkillStatus {
        self.skills.status()
    }

    pub async fn load_skills(&self) -> SkillStatus {
        self.skills.load().await;
        self.skills.status()
    }

    pub async fn set_active_view(&self, view: View) -> Result<()> {
        self.state.lock().await.active_view = view;
        self.durable
            .set(ACTIVE_VIEW_KEY, &Value::String(view.as_str().to_string()))
            .await
    }

    /// Switches to the view named by `fragment`, ignoring unknown names.
    pub async fn navigate(&self, fragment: &str) -> Result<Option<View>> {
        let Some(view) = View::from_fragment(fragment) else {
            return Ok(None);
        };
        self.set_active_view(view).await?;
        Ok(Some(view))
    }

    /// Start-up hint about the API key.
    pub async fn api_hint(&self) -> Status {
        let mut state = self.state.lock().await;
        if !state.settings.has_api_key() {
            let status = Status::new(
                "尚未配置 API Key（BYOK），请先到“AI 设置”完成配置。",
                StatusLevel::Warning,
            );
            state.generation_status = Some(status.clone());
            return status;
        }

        let stale = state
            .generation_status
            .as_ref()
            .is_none_or(|s| s.message.contains("API Key") || s.message.contains("未检测到"));
        if stale {
            state.generation_status = Some(Status::new(
                "API 已配置，填写参数后即可生成。",
                StatusLevel::Info,
            ));
        }
        state
            .generation_status
            .clone()
            .unwrap_or_else(|| Status::new("", StatusLevel::Info))
    }

    async fn set_generation_status(&self, message: impl Into<String>, level: StatusLevel) {
        self.state.lock().await.generation_status = Some(Status::new(message, level));
    }

    async fn set_settings_status(&self, message: impl Into<String>, level: StatusLevel) {
        self.state.lock().await.settings_status = Some(Status::new(message, level));
    }

    /// Runs one generation. A second call while one is in flight fails with
    /// [`PromptMasterError::Busy`].
    pub async fn generate(&self, payload: FormPayload) -> Result<GenerateOutcome> {
        if self
            .generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PromptMasterError::Busy);
        }
        let _guard = GeneratingGuard(&self.generating);

        let payload = payload.trimmed();
        if let Err(e) = payload.validate() {
            self.set_generation_status(e.to_string(), StatusLevel::Error)
                .await;
            return Ok(GenerateOutcome::Rejected(e));
        }

        let settings = self.state.lock().await.settings.clone();
        if !settings.has_api_key() {
            self.set_generation_status(
                PromptMasterError::MissingApiKey.to_string(),
                StatusLevel::Warning,
            )
            .await;
            self.set_active_view(View::Settings).await?;
            self.set_settings_status("请先填写 API Key 并保存。", StatusLevel::Warning)
                .await;
            return Ok(GenerateOutcome::NeedsApiKey);
        }

        self.set_generation_status("正在调用 AI 生成，请稍候...", StatusLevel::Info)
            .await;
        let endpoint = self.dispatcher.endpoint(&settings);
        let skill_context = self.skills.load().await;

        let outcome = match self
            .dispatcher
            .request(&payload, &settings, skill_context)
            .await
        {
            Ok(raw) => {
                let output = ensure_complete_output(&normalize_generated_output(&raw), &payload);
                let record = Record::new(payload, output, RecordSource::Ai);
                self.settle(&record, "生成成功，已保存到本地记录。", StatusLevel::Success)
                    .await;
                tracing::info!(id = %record.id, "generation succeeded");
                GenerateOutcome::Generated(record)
            }
            Err(e) => {
                let diagnostics = explain_request_error(&e.to_string(), &endpoint);
                tracing::warn!(
                    %endpoint,
                    error = %diagnostics.raw_message,
                    "generation failed, saving templated storyboard"
                );
                let output = build_fallback_prompt(&payload);
                let record = Record::new(payload, output, RecordSource::Fallback);
                self.settle(&record, diagnostics.user_message.clone(), StatusLevel::Warning)
                    .await;
                GenerateOutcome::Fallback {
                    record,
                    diagnostics,
                }
            }
        };

        Ok(outcome)
    }

    /// Shows and stores a finished generation. Storage failures are logged
    /// and surfaced as a warning status; the outcome is still returned.
    async fn settle(&self, record: &Record, message: impl Into<String>, level: StatusLevel) {
        let mut state = self.state.lock().await;
        state.output = record.output.trim().to_string();
        prepend(&mut state.records, record.clone());
        state.generation_status = Some(Status::new(message, level));

        if let Err(e) = self.record_store.persist(&state.records).await {
            tracing::warn!(id = %record.id, error = %e, "record kept in memory only");
            state.generation_status = Some(Status::new(
                format!("生成结果未能写入本地记录（{e}），请及时复制。"),
                StatusLevel::Warning,
            ));
        }
        self.store_output(&state.output).await;
    }

    async fn store_output(&self, output: &str) {
        if let Err(e) = self
            .session
            .set(LAST_OUTPUT_KEY, &Value::String(output.to_string()))
            .await
        {
            tracing::warn!(error = %e, "last output not kept for this session");
        }
    }

    pub async fn search(&self, keyword: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        filter_records(&state.records, keyword)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn find_record(&self, id: &str) -> Result<Record> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| PromptMasterError::RecordNotFound { id: id.to_string() })
    }

    /// Loads a record back into the generator so it can be re-run.
    pub async fn fill_record(&self, id: &str) -> Result<Record> {
        let record = self.find_record(id).await?;
        let output = record.output.trim().to_string();
        self.store_output(&output).await;
        {
            let mut state = self.state.lock().await;
            state.output = output;
            state.generation_status = Some(Status::new(
                "已回填记录参数，可直接二次生成。",
                StatusLevel::Success,
            ));
        }
        self.set_active_view(View::Generator).await?;
        Ok(record)
    }

    /// Text the output pane's copy action takes; `None` while it is empty.
    pub async fn output_text(&self) -> Option<String> {
        let state = self.state.lock().await;
        let text = state.output.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Reports a clipboard copy in the generation status.
    pub async fn note_copy(&self, source: CopySource, copied: bool) -> Status {
        let status = match (source, copied) {
            (CopySource::Output, true) => Status::new("已复制生成结果。", StatusLevel::Success),
            (CopySource::Record, true) => Status::new("已复制记录内容。", StatusLevel::Success),
            (_, false) => Status::new("复制失败，请手动复制。", StatusLevel::Warning),
        };
        self.state.lock().await.generation_status = Some(status.clone());
        status
    }

    /// Removes one record. Storage is written first, so a failed write
    /// leaves the list untouched.
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut records = state.records.clone();
        if !remove_record(&mut records, id) {
            return Err(PromptMasterError::RecordNotFound { id: id.to_string() });
        }
        self.record_store.persist(&records).await?;
        state.records = records;
        Ok(())
    }

    /// Drops every record. Does nothing unless `confirmed`; returns whether
    /// anything was cleared.
    pub async fn clear_records(&self, confirmed: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.records.is_empty() || !confirmed {
            return Ok(false);
        }
        self.record_store.persist(&[]).await?;
        state.records.clear();
        Ok(true)
    }

    /// Saves the settings form. Returns `false` (with a warning status) when
    /// no API key was given.
    pub async fn save_settings(&self, form: SettingsForm) -> Result<bool> {
        let defaults = Settings::default();
        let base_url = match form.base_url.trim() {
            "" => defaults.base_url.clone(),
            url => url.to_string(),
        };

        let mut raw = serde_json::to_value(&defaults)?;
        raw["apiKey"] = json!(form.api_key.trim());
        raw["baseUrl"] = json!(base_url);
        if let Some(model_id) = form.model_id {
            raw["modelId"] = json!(model_id);
        }
        if let Some(max_output_tokens) = form.max_output_tokens {
            raw["maxOutputTokens"] = json!(max_output_tokens);
        }
        let next = normalize_settings(&raw);

        if !next.has_api_key() {
            self.set_settings_status("BYOK 模式下必须填写 API Key。", StatusLevel::Warning)
                .await;
            return Ok(false);
        }

        self.settings_store.save(&next).await?;
        {
            let mut state = self.state.lock().await;
            state.settings = next;
            state.settings_status = Some(Status::new(
                "设置已保存。API Key 仅保存在当前会话。",
                StatusLevel::Success,
            ));
        }
        self.api_hint().await;
        Ok(true)
    }

    pub async fn reset_settings(&self) -> Result<()> {
        let settings = self.settings_store.reset().await?;
        {
            let mut state = self.state.lock().await;
            state.settings = settings;
            state.settings_status = Some(Status::new(
                "已恢复默认配置，请重新填写 API Key。",
                StatusLevel::Warning,
            ));
        }
        self.api_hint().await;
        Ok(())
    }
}
