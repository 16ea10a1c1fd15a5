use crate::types::FormPayload;

/// Skill context beyond this many characters is cut from the system prompt.
pub const SKILL_CONTEXT_LIMIT: usize = 16_000;

static SYSTEM_PROMPT_RULES: &str = "你是提示词大师中的即梦 Seedance 2.0 视频分镜提示词专家。
目标：输出可直接粘贴到即梦的分镜提示词正文。
硬性规则：
1) 严格遵循用户指定时长段落，按时间顺序输出。
2) 每段必须使用结构：运镜 + 主体 + 动作 + 场景 + 氛围/音效。
3) 主体、动作、场景要具体，禁止模糊词（如“一个人”“某个地方”）。
4) 仅输出分镜段落正文，禁止输出任何标题、说明、素材引用、优化建议、总结。
5) 不要输出 Markdown 标题符号（#）和加粗符号（**）。
6) 严禁输出与分镜段落无关内容。

输出模板（只允许这种行结构）：
X-Y秒画面：运镜 + 主体 + 动作 + 场景 + 氛围/音效
X-Y秒画面：运镜 + 主体 + 动作 + 场景 + 氛围/音效

以下为必须遵循的技能规则摘录：";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub user: String,
}

pub fn build_prompts(skill_context: &str, payload: &FormPayload) -> Prompts {
    Prompts {
        system: build_system_prompt(skill_context),
        user: build_user_prompt(payload),
    }
}

pub fn build_system_prompt(skill_context: &str) -> String {
    let snippet: String = skill_context.chars().take(SKILL_CONTEXT_LIMIT).collect();
    format!("{SYSTEM_PROMPT_RULES}\n{snippet}")
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let value = value.trim();
    if value.is_empty() { fallback } else { value }
}

pub fn build_user_prompt(payload: &FormPayload) -> String {
    let slots = payload.slots();
    let mut lines = vec![
        "请根据以下需求生成即梦 Seedance 2.0 分镜提示词：".to_string(),
        format!("提示词标题：{}", payload.prompt_title.trim()),
        format!("主题：{}", payload.theme.trim()),
        format!("视频类型：{}", payload.video_type.trim()),
        format!("视频时长：{}", payload.video_duration.trim()),
        format!("核心内容：{}", payload.core_content.trim()),
        format!("风格偏好：{}", payload.style_preference.trim()),
        format!(
            "运镜偏好：{}",
            or_default(&payload.camera_style, "无额外偏好，请按主题设计")
        ),
        format!("参考图片：{}", or_default(&payload.reference_images, "无")),
        format!("参考视频：{}", or_default(&payload.reference_videos, "无")),
        format!("参考音频：{}", or_default(&payload.reference_audios, "无")),
        format!("特殊要求：{}", or_default(&payload.special_requirement, "无")),
        String::new(),
        "段落时间规划（必须逐条对应输出）：".to_string(),
    ];

    lines.extend(slots.iter().map(|slot| format!("- {slot}画面")));
    lines.push(String::new());
    lines.push("额外要求：".to_string());
    lines.push(format!(
        "- 必须输出 {} 段分镜，不能多也不能少。",
        slots.len()
    ));
    lines.push("- 每段都写成可直接用于生成的视频画面描述，不要写占位符。".to_string());
    lines.push("- 除分镜段落正文外，不要输出任何其他字段。".to_string());
    lines.push("- 语言使用简体中文。".to_string());

    lines.join("\n")
}
