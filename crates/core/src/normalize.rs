use std::sync::LazyLock;

use regex::Regex;

use crate::{extract::collapse_blank_lines, types::FormPayload};

pub const DEFAULT_CAMERAS: [&str; 5] = ["推镜头", "跟随镜头", "环绕镜头", "拉镜头", "一镜到底"];

static HEADING_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:#{1,6}[ \t]*)+").expect("heading pattern"));

static BOLD_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern"));

static SEGMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\n)\s*(?:[-*]\s*)?([0-9]+-[0-9]+秒画面：[^\n]+)").expect("segment pattern")
});

fn normalize_pass(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = HEADING_MARKERS.replace_all(&text, "");
    let text = BOLD_MARKERS.replace_all(&text, "${1}");
    collapse_blank_lines(&text).trim().to_string()
}

/// Strips markdown headings and bold markers, normalizes line endings and
/// collapses blank-line runs.
///
/// Each pass only ever removes characters, so repeating until nothing
/// changes terminates and makes the function idempotent even when removing
/// one marker exposes another.
pub fn normalize_generated_output(text: &str) -> String {
    let mut current = normalize_pass(text);
    loop {
        let next = normalize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Segment lines (`X-Y秒画面：...`) found in `text`, in order of appearance.
pub fn find_segment_lines(text: &str) -> Vec<String> {
    SEGMENT_LINE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Camera moves from the user's preference, split on commas, full stops,
/// semicolons and newlines. Falls back to [`DEFAULT_CAMERAS`].
pub fn camera_moves(camera_style: &str) -> Vec<String> {
    let moves: Vec<String> = camera_style
        .split(['，', ',', '。', '；', ';', '\n'])
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();

    if moves.is_empty() {
        DEFAULT_CAMERAS.iter().map(|m| m.to_string()).collect()
    } else {
        moves
    }
}

/// One templated segment per slot of the payload's duration.
pub fn build_segments(payload: &FormPayload) -> Vec<String> {
    let cameras = camera_moves(&payload.camera_style);

    payload
        .slots()
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            let camera = cameras
                .get(index)
                .or_else(|| cameras.last())
                .map(String::as_str)
                .unwrap_or("跟随镜头");
            format!(
                "{slot}画面：{camera} + 主体动作「{}」 + 场景围绕「{}」展开 + 氛围风格「{}」",
                payload.core_content, payload.theme, payload.style_preference
            )
        })
        .collect()
}

/// Fully templated storyboard used when the model call fails.
pub fn build_fallback_prompt(payload: &FormPayload) -> String {
    build_segments(payload).join("\n\n")
}

/// Guarantees exactly one segment per slot: the i-th segment line found in
/// `text` is used for slot i, missing ones are synthesized.
pub fn ensure_complete_output(text: &str, payload: &FormPayload) -> String {
    let mut found = find_segment_lines(text).into_iter();

    build_segments(payload)
        .into_iter()
        .map(|fallback| found.next().unwrap_or(fallback))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DURATION_MEDIUM, DURATION_SHORT};

    fn payload(duration: &str, camera: &str) -> FormPayload {
        FormPayload {
            prompt_title: "海边日出".into(),
            theme: "治愈系短片".into(),
            video_type: "风景".into(),
            video_duration: duration.into(),
            core_content: "少女奔跑".into(),
            style_preference: "清新".into(),
            camera_style: camera.into(),
            ..Default::default()
        }
    }

    #[test]
    fn reply_without_segments_is_fully_synthesized() {
        let form = payload(DURATION_SHORT, "推镜头,跟随镜头");
        let output = ensure_complete_output("抱歉，我无法完成。", &form);
        assert_eq!(
            output,
            "0-3秒画面：推镜头 + 主体动作「少女奔跑」 + 场景围绕「治愈系短片」展开 + 氛围风格「清新」\n\n\
             3-6秒画面：跟随镜头 + 主体动作「少女奔跑」 + 场景围绕「治愈系短片」展开 + 氛围风格「清新」"
        );
    }

    #[test]
    fn always_yields_slot_count_segments() {
        let lines: Vec<String> = (0..8)
            .map(|i| format!("  - {}-{}秒画面：镜头{}", i, i + 1, i))
            .collect();
        for duration in [DURATION_SHORT, DURATION_MEDIUM, "11-15秒", ""] {
            let form = payload(duration, "");
            let n = form.slots().len();
            for available in 0..lines.len() {
                let text = format!("前言\n{}\n\n结语", lines[..available].join("\n\n\n"));
                let output = ensure_complete_output(&text, &form);
                let segments = find_segment_lines(&output);
                assert_eq!(segments.len(), n, "duration={duration} available={available}");
                assert_eq!(output.split("\n\n").count(), n);
            }
        }
    }

    #[test]
    fn model_segments_fill_slots_in_order() {
        let form = payload(DURATION_MEDIUM, "");
        let text = "## 分镜\n* 0-3秒画面：航拍海面\n3-7秒画面：特写少女";
        let output = ensure_complete_output(text, &form);
        let segments: Vec<&str> = output.split("\n\n").collect();
        assert_eq!(segments[0], "0-3秒画面：航拍海面");
        assert_eq!(segments[1], "3-7秒画面：特写少女");
        assert!(segments[2].starts_with("7-10秒画面：环绕镜头 + "));
    }

    #[test]
    fn synthesized_segments_are_deterministic_and_well_formed() {
        let form = payload("11-15秒", "推镜头；拉镜头");
        let a = build_fallback_prompt(&form);
        let b = build_fallback_prompt(&form);
        assert_eq!(a, b);

        let segments = find_segment_lines(&a);
        assert_eq!(segments.len(), 5);
        assert!(segments[0].starts_with("0-3秒画面：推镜头"));
        // past the end of the preference list the last entry repeats
        assert!(segments[4].starts_with("12-15秒画面：拉镜头"));
    }

    #[test]
    fn default_cameras_apply_without_preference() {
        assert_eq!(camera_moves(" ， ;\n"), DEFAULT_CAMERAS.to_vec());
        assert_eq!(camera_moves("推镜头，\n跟随镜头。"), vec!["推镜头", "跟随镜头"]);
    }

    #[test]
    fn separator_only_preference_templates_with_defaults() {
        let form = payload(DURATION_MEDIUM, "，");
        let segments: Vec<String> = build_fallback_prompt(&form)
            .split("\n\n")
            .map(str::to_string)
            .collect();
        assert!(segments[0].starts_with("0-3秒画面：推镜头 + "));
        assert!(segments[1].starts_with("3-7秒画面：跟随镜头 + "));
        assert!(segments[2].starts_with("7-10秒画面：环绕镜头 + "));
    }

    #[test]
    fn normalize_strips_markdown() {
        let raw = "# 标题\r\n\r\n\r\n\r\n**0-3秒画面**：推镜头\n###   3-6秒画面：拉镜头  ";
        assert_eq!(
            normalize_generated_output(raw),
            "标题\n\n0-3秒画面：推镜头\n3-6秒画面：拉镜头"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "",
            "plain",
            "# # nested heading",
            "**#**x",
            "*****a**",
            "\n\n  ## a\r\n\r\n\r\nb **c** ****\n\n\n",
            "0-3秒画面：推镜头\n\n3-6秒画面：拉镜头",
        ];
        for sample in samples {
            let once = normalize_generated_output(sample);
            assert_eq!(normalize_generated_output(&once), once, "sample={sample:?}");
        }
    }
}
