use chrono::{DateTime, Local};

use crate::{records::Record, settings::Settings};

/// Renders an RFC 3339 timestamp as local `YYYY/MM/DD HH:MM`. Unparseable
/// input is returned unchanged.
pub fn format_date(created_at: &str) -> String {
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(date) => date
            .with_timezone(&Local)
            .format("%Y/%m/%d %H:%M")
            .to_string(),
        Err(_) => created_at.to_string(),
    }
}

/// One-line summary used in record lists.
pub fn format_record_line(record: &Record) -> String {
    format!(
        "{} · {} · {}",
        format_date(&record.created_at),
        record.input.video_duration,
        record.source
    )
}

pub fn format_record_readable(record: &Record) -> String {
    let input = &record.input;
    let mut output = String::new();
    output.push_str(&format!("# {}\n\n", input.prompt_title));
    output.push_str(&format!("{}\n", format_record_line(record)));
    output.push_str(&format!("主题：{}\n", input.theme));
    output.push_str(&format!(
        "视频类型：{} | 风格偏好：{}\n",
        input.video_type, input.style_preference
    ));
    if !input.camera_style.is_empty() {
        output.push_str(&format!("运镜偏好：{}\n", input.camera_style));
    }
    output.push('\n');
    output.push_str(&record.output);
    output.push('\n');
    output
}

pub fn format_settings(settings: &Settings) -> String {
    let api_key = if settings.has_api_key() {
        settings.masked_api_key()
    } else {
        "(未设置)".to_string()
    };

    [
        format!("Base URL:          {}", settings.base_url),
        format!("Model ID:          {}", settings.model_id),
        format!("Model Name:        {}", settings.model_name),
        format!("Max Output Tokens: {}", settings.max_output_tokens),
        format!("Context Window:    {}", settings.context_window),
        format!("Max Tokens:        {}", settings.max_tokens),
        format!("User Agent:        {}", settings.user_agent),
        format!("Provider / Mode:   {} / {}", settings.provider, settings.mode),
        format!("API Key:           {api_key}"),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{records::RecordSource, types::FormPayload};

    #[test]
    fn invalid_dates_pass_through() {
        assert_eq!(format_date("yesterday"), "yesterday");
        let rendered = format_date("2026-03-01T08:30:00Z");
        assert_eq!(rendered.len(), "2026/03/01 08:30".len());
        assert!(rendered.starts_with("2026/0"));
    }

    #[test]
    fn record_rendering_includes_output() {
        let record = Record::new(
            FormPayload {
                prompt_title: "夜市".into(),
                theme: "城市烟火".into(),
                video_duration: "4-6秒".into(),
                ..Default::default()
            },
            "0-3秒画面：推镜头",
            RecordSource::Fallback,
        );
        let text = format_record_readable(&record);
        assert!(text.starts_with("# 夜市\n\n"));
        assert!(text.contains("4-6秒 · Fallback"));
        assert!(text.ends_with("0-3秒画面：推镜头\n"));
        assert!(!text.contains("运镜偏好"));
    }

    #[test]
    fn settings_mask_the_key() {
        let settings = Settings {
            api_key: "abcdef.123456".into(),
            ..Settings::default()
        };
        let text = format_settings(&settings);
        assert!(text.contains("API Key:           *********3456"));
        assert!(!text.contains("abcdef"));
        assert!(format_settings(&Settings::default()).contains("(未设置)"));
    }
}
