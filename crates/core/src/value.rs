//! Loose coercions over `serde_json::Value`.
//!
//! Stored settings, stored records and proxy request bodies come from
//! outside the process and are read field by field rather than through a
//! strict `Deserialize`, so a single odd field never discards the rest.

use serde_json::Value;

use crate::types::FormPayload;

/// Truthiness as browsers evaluate it.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `String(value || "")`: falsy values become empty, the rest their text form.
pub fn coerce_string(value: &Value) -> String {
    if !is_truthy(value) {
        return String::new();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

pub fn field_string(value: &Value, key: &str) -> String {
    value.get(key).map(coerce_string).unwrap_or_default()
}

/// Positive integer coercion with a fallback for anything non-finite,
/// non-numeric, zero or negative. Fractions are floored; a fraction below
/// one falls back as well.
pub fn to_positive_int(value: Option<&Value>, fallback: u64) -> u64 {
    let number = match value {
        None | Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Some(_) => f64::NAN,
    };

    if !number.is_finite() || number <= 0.0 {
        return fallback;
    }
    match number.floor() as u64 {
        0 => fallback,
        n => n,
    }
}

impl FormPayload {
    /// Reads a payload out of an arbitrary JSON body. Returns `None` when the
    /// body is not an object at all.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        Some(Self {
            prompt_title: field_string(value, "promptTitle"),
            theme: field_string(value, "theme"),
            video_type: field_string(value, "videoType"),
            video_duration: field_string(value, "videoDuration"),
            core_content: field_string(value, "coreContent"),
            style_preference: field_string(value, "stylePreference"),
            camera_style: field_string(value, "cameraStyle"),
            reference_images: field_string(value, "referenceImages"),
            reference_videos: field_string(value, "referenceVideos"),
            reference_audios: field_string(value, "referenceAudios"),
            special_requirement: field_string(value, "specialRequirement"),
        })
    }
}
