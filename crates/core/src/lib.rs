pub mod app;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod format;
pub mod normalize;
pub mod prompt;
pub mod provider;
pub mod records;
pub mod settings;
pub mod skill;
pub mod storage;
pub mod types;
pub mod value;

pub use app::{
    AppController, AppState, CopySource, GenerateOutcome, SettingsForm, Status, StatusLevel, View,
};
pub use dispatch::{
    ChatCompletionRequest, Diagnostics, DispatchError, Dispatcher, UpstreamReply,
    describe_transport_error, explain_request_error, post_json,
};
pub use error::{PromptMasterError, Result};
pub use extract::{extract_api_error, extract_response_text};
pub use format::{format_date, format_record_line, format_record_readable, format_settings};
pub use normalize::{build_fallback_prompt, ensure_complete_output, normalize_generated_output};
pub use prompt::{Prompts, build_prompts};
pub use provider::{DEFAULT_DIRECT_BASE_URL, DEFAULT_MODEL, DEFAULT_PROXY_ORIGIN, Transport};
pub use records::{Record, RecordSource, RecordStore};
pub use settings::{Settings, SettingsStore};
pub use skill::{SkillContextLoader, SkillRoot, SkillStatus};
pub use storage::{
    FileStorage, MemoryStorage, SharedStorage, Storage, get_root_data_dir, get_session_dir,
};
pub use types::{FormPayload, ValidationError, slot_plan};
