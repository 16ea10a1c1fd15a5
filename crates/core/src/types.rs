use serde::{Deserialize, Serialize};

pub const TITLE_MAX_CHARS: usize = 100;
pub const THEME_MAX_CHARS: usize = 300;

/// Duration buckets offered by the form.
pub const DURATION_SHORT: &str = "4-6秒";
pub const DURATION_MEDIUM: &str = "7-10秒";
pub const DURATION_LONG: &str = "11-15秒";

/// Storyboard form as submitted by the user.
///
/// Every field is a plain string so that records written by older builds
/// (or by hand) deserialize without loss; missing fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormPayload {
    pub prompt_title: String,
    pub theme: String,
    pub video_type: String,
    pub video_duration: String,
    pub core_content: String,
    pub style_preference: String,
    pub camera_style: String,
    pub reference_images: String,
    pub reference_videos: String,
    pub reference_audios: String,
    pub special_requirement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("请求体为空。")]
    EmptyBody,
    #[error("请填写提示词标题。")]
    MissingTitle,
    #[error("提示词标题不能超过 100 字。")]
    TitleTooLong,
    #[error("请填写主题。")]
    MissingTheme,
    #[error("主题不能超过 300 字。")]
    ThemeTooLong,
    #[error("请选择视频类型。")]
    MissingVideoType,
    #[error("请选择视频时长。")]
    MissingVideoDuration,
    #[error("请填写核心内容。")]
    MissingCoreContent,
    #[error("请填写风格偏好。")]
    MissingStylePreference,
}

impl ValidationError {
    /// Wire name of the offending field, `None` for a missing body.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::EmptyBody => None,
            ValidationError::MissingTitle | ValidationError::TitleTooLong => Some("promptTitle"),
            ValidationError::MissingTheme | ValidationError::ThemeTooLong => Some("theme"),
            ValidationError::MissingVideoType => Some("videoType"),
            ValidationError::MissingVideoDuration => Some("videoDuration"),
            ValidationError::MissingCoreContent => Some("coreContent"),
            ValidationError::MissingStylePreference => Some("stylePreference"),
        }
    }
}

impl FormPayload {
    /// Copy with every field trimmed, the way a form submission is captured.
    pub fn trimmed(&self) -> Self {
        Self {
            prompt_title: self.prompt_title.trim().to_string(),
            theme: self.theme.trim().to_string(),
            video_type: self.video_type.trim().to_string(),
            video_duration: self.video_duration.trim().to_string(),
            core_content: self.core_content.trim().to_string(),
            style_preference: self.style_preference.trim().to_string(),
            camera_style: self.camera_style.trim().to_string(),
            reference_images: self.reference_images.trim().to_string(),
            reference_videos: self.reference_videos.trim().to_string(),
            reference_audios: self.reference_audios.trim().to_string(),
            special_requirement: self.special_requirement.trim().to_string(),
        }
    }

    /// Presence check on the six required fields, first failure wins.
    pub fn validate_required(&self) -> Result<(), ValidationError> {
        let required = [
            (&self.prompt_title, ValidationError::MissingTitle),
            (&self.theme, ValidationError::MissingTheme),
            (&self.video_type, ValidationError::MissingVideoType),
            (&self.video_duration, ValidationError::MissingVideoDuration),
            (&self.core_content, ValidationError::MissingCoreContent),
            (&self.style_preference, ValidationError::MissingStylePreference),
        ];

        for (value, err) in required {
            if value.trim().is_empty() {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Full form validation: required fields plus the title/theme length caps.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let title = self.prompt_title.trim();
        let theme = self.theme.trim();

        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        if title.chars().count() > TITLE_MAX_CHARS {
            return Err(ValidationError::TitleTooLong);
        }
        if theme.is_empty() {
            return Err(ValidationError::MissingTheme);
        }
        if theme.chars().count() > THEME_MAX_CHARS {
            return Err(ValidationError::ThemeTooLong);
        }
        self.validate_required()
    }

    pub fn slots(&self) -> &'static [&'static str] {
        slot_plan(&self.video_duration)
    }
}

/// Time-range labels a storyboard of the given duration must cover.
pub fn slot_plan(video_duration: &str) -> &'static [&'static str] {
    match video_duration {
        DURATION_SHORT => &["0-3秒", "3-6秒"],
        DURATION_MEDIUM => &["0-3秒", "3-7秒", "7-10秒"],
        _ => &["0-3秒", "3-6秒", "6-9秒", "9-12秒", "12-15秒"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> FormPayload {
        FormPayload {
            prompt_title: "海边日出".into(),
            theme: "治愈系短片".into(),
            video_type: "风景".into(),
            video_duration: DURATION_SHORT.into(),
            core_content: "少女奔跑".into(),
            style_preference: "清新".into(),
            ..Default::default()
        }
    }

    #[test]
    fn slot_plan_depends_only_on_duration() {
        assert_eq!(slot_plan("4-6秒"), ["0-3秒", "3-6秒"]);
        assert_eq!(slot_plan("7-10秒"), ["0-3秒", "3-7秒", "7-10秒"]);
        assert_eq!(slot_plan("11-15秒").len(), 5);
        assert_eq!(slot_plan("").len(), 5);
        assert_eq!(slot_plan("whatever")[4], "12-15秒");
    }

    #[test]
    fn missing_theme_is_reported_by_name() {
        let mut form = payload();
        form.theme = "   ".into();

        let err = form.validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingTheme);
        assert_eq!(err.field(), Some("theme"));
        assert_eq!(err.to_string(), "请填写主题。");
        assert_eq!(form.validate_required(), Err(ValidationError::MissingTheme));
    }

    #[test]
    fn length_caps_count_characters_not_bytes() {
        let mut form = payload();
        form.prompt_title = "日".repeat(TITLE_MAX_CHARS);
        assert!(form.validate().is_ok());

        form.prompt_title.push('出');
        assert_eq!(form.validate(), Err(ValidationError::TitleTooLong));
        // the proxy only checks presence
        assert!(form.validate_required().is_ok());

        let mut form = payload();
        form.theme = "a".repeat(THEME_MAX_CHARS + 1);
        assert_eq!(form.validate(), Err(ValidationError::ThemeTooLong));
    }

    #[test]
    fn first_missing_field_wins() {
        let form = FormPayload {
            prompt_title: "t".into(),
            theme: "t".into(),
            ..Default::default()
        };
        assert_eq!(form.validate(), Err(ValidationError::MissingVideoType));
        assert_eq!(FormPayload::default().validate(), Err(ValidationError::MissingTitle));
    }

    #[test]
    fn deserializes_camel_case_with_missing_fields() {
        let form: FormPayload =
            serde_json::from_str(r#"{"promptTitle":" 标题 ","videoDuration":"7-10秒"}"#).unwrap();
        assert_eq!(form.prompt_title, " 标题 ");
        assert_eq!(form.trimmed().prompt_title, "标题");
        assert_eq!(form.slots().len(), 3);
        assert!(form.camera_style.is_empty());
    }
}
