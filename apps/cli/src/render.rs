use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use prompt_master_core::{
    AppState, FormPayload, Record, SkillStatus, Status, StatusLevel, View, format_record_line,
    format_record_readable, format_settings,
};

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let spinner_style = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(spinner_style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn rule() {
    println!("{}", style("─".repeat(60)).dim());
}

pub fn header(view: View) {
    println!(
        "\n{}  {}\n{}\n",
        style("prompt-master").cyan().bold(),
        style(view.title()).bold(),
        style(view.subtitle()).dim()
    );
}

pub fn status_line(status: &Status) -> String {
    let mark = match status.level {
        StatusLevel::Info => style("•").cyan().bold(),
        StatusLevel::Success => style("✓").green().bold(),
        StatusLevel::Warning => style("!").yellow().bold(),
        StatusLevel::Error => style("✗").red().bold(),
    };
    format!("{mark} {}", status.message)
}

pub fn print_status(status: Option<&Status>) {
    if let Some(status) = status.filter(|s| !s.message.is_empty()) {
        println!("{}", status_line(status));
    }
}

pub fn skill_line(status: &SkillStatus) -> String {
    match status {
        SkillStatus::Loaded => format!("{} {}", style("✓").green(), status.message()),
        SkillStatus::Fallback(reason) => format!(
            "{} {} {}",
            style("!").yellow(),
            status.message(),
            style(format!("({reason})")).dim()
        ),
        SkillStatus::Idle | SkillStatus::Loading => {
            format!("{} {}", style("•").dim(), status.message())
        }
    }
}

pub fn print_records(records: &[Record]) {
    if records.is_empty() {
        println!("{}", style("暂无记录。").dim());
        return;
    }
    for record in records {
        println!(
            "{}  {}  {}",
            style(record.id.chars().take(8).collect::<String>()).yellow(),
            style(&record.input.prompt_title).bold(),
            style(format_record_line(record)).dim()
        );
    }
}

pub fn print_record(record: &Record) {
    println!("{}", style(format!("id: {}", record.id)).dim());
    println!("{}", format_record_readable(record));
}

pub fn print_form(form: &FormPayload) {
    let fields = [
        ("提示词标题", &form.prompt_title),
        ("主题", &form.theme),
        ("视频类型", &form.video_type),
        ("视频时长", &form.video_duration),
        ("核心内容", &form.core_content),
        ("风格偏好", &form.style_preference),
        ("运镜偏好", &form.camera_style),
        ("参考图片", &form.reference_images),
        ("参考视频", &form.reference_videos),
        ("参考音频", &form.reference_audios),
        ("特殊要求", &form.special_requirement),
    ];
    for (label, value) in fields.iter().filter(|(_, v)| !v.is_empty()) {
        println!("{} {}", style(format!("{label}：")).dim(), value);
    }
}

/// Prints the active view the way the page would show it.
pub fn print_view(state: &AppState, skill: &SkillStatus) {
    header(state.active_view);
    match state.active_view {
        View::Generator => {
            println!("{}", skill_line(skill));
            print_status(state.generation_status.as_ref());
            if !state.output.is_empty() {
                rule();
                println!("{}", state.output);
            }
        }
        View::Records => print_records(&state.records),
        View::Settings => {
            println!("{}", format_settings(&state.settings));
            print_status(state.settings_status.as_ref());
        }
    }
    println!();
}
