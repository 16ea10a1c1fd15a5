use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use console::{Term, style};
use prompt_master_core::{
    AppController, CopySource, DEFAULT_PROXY_ORIGIN, Dispatcher, FileStorage, FormPayload,
    GenerateOutcome, SettingsForm, SkillContextLoader, SkillRoot, View, format_settings,
    get_root_data_dir, get_session_dir,
};
use reqwest::Url;
use tracing_subscriber::EnvFilter;

mod clipboard;
mod render;

use crate::render::{
    create_spinner, format_duration, header, print_form, print_record, print_records,
    print_status, print_view, rule, skill_line,
};

#[derive(Parser)]
#[command(name = "prompt-master")]
#[command(about = "Generate Seedance 2.0 storyboard prompts with your own GLM API key")]
struct Cli {
    /// Directory for settings and records
    #[arg(long, env = "PROMPT_MASTER_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Directory or http(s) URL holding the jimeng-video skill documents
    #[arg(long, env = "SKILL_ROOT", default_value = ".", global = true)]
    skill_root: String,

    /// Origin that relative proxy base URLs are resolved against
    #[arg(long, env = "PROMPT_MASTER_PROXY_ORIGIN", default_value = DEFAULT_PROXY_ORIGIN, global = true)]
    proxy_origin: String,

    /// Log request details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a storyboard prompt and save it as a record
    Generate(GenerateArgs),

    /// List, inspect, refill or delete saved records
    Records {
        #[command(subcommand)]
        action: Option<RecordsAction>,
    },

    /// Show, save or reset the AI settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Print the last generated or filled output
    Output {
        /// Copy it to the system clipboard instead of printing it
        #[arg(short, long)]
        copy: bool,
    },

    /// Show or switch the active view (generator, records, settings)
    View { name: Option<String> },
}

#[derive(Args)]
struct GenerateArgs {
    /// Start from a saved record's parameters (id or unique id prefix)
    #[arg(long)]
    from: Option<String>,

    /// Prompt title (max 100 characters)
    #[arg(short, long)]
    title: Option<String>,

    /// Theme (max 300 characters)
    #[arg(long)]
    theme: Option<String>,

    /// Video type, e.g. 风景, 剧情, 产品
    #[arg(long)]
    video_type: Option<String>,

    /// Video duration: 4-6秒, 7-10秒 or 11-15秒
    #[arg(short, long)]
    duration: Option<String>,

    /// Core content of the shot
    #[arg(short, long)]
    content: Option<String>,

    /// Style preference
    #[arg(short, long)]
    style: Option<String>,

    /// Camera moves, separated by commas
    #[arg(long)]
    camera: Option<String>,

    #[arg(long)]
    reference_images: Option<String>,

    #[arg(long)]
    reference_videos: Option<String>,

    #[arg(long)]
    reference_audios: Option<String>,

    /// Special requirements
    #[arg(long)]
    special: Option<String>,
}

impl GenerateArgs {
    /// Applies the given flags over `base`.
    fn into_payload(self, base: FormPayload) -> FormPayload {
        let pick = |flag: Option<String>, current: String| flag.unwrap_or(current);
        FormPayload {
            prompt_title: pick(self.title, base.prompt_title),
            theme: pick(self.theme, base.theme),
            video_type: pick(self.video_type, base.video_type),
            video_duration: pick(self.duration, base.video_duration),
            core_content: pick(self.content, base.core_content),
            style_preference: pick(self.style, base.style_preference),
            camera_style: pick(self.camera, base.camera_style),
            reference_images: pick(self.reference_images, base.reference_images),
            reference_videos: pick(self.reference_videos, base.reference_videos),
            reference_audios: pick(self.reference_audios, base.reference_audios),
            special_requirement: pick(self.special, base.special_requirement),
        }
    }
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List records, newest first
    List {
        /// Case-insensitive filter on title and theme
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Print one record in full
    Show { id: String },
    /// Load a record's parameters back into the generator
    Fill { id: String },
    /// Copy a record's output to the system clipboard
    Copy { id: String },
    /// Delete one record
    Delete { id: String },
    /// Delete every record
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    /// Save the API key and endpoint; other fields reset to defaults
    Save {
        #[arg(long, env = "PROMPT_MASTER_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Proxy path (/api/generate) or an OpenAI-compatible base URL
        #[arg(long, default_value = "")]
        base_url: String,

        #[arg(long)]
        model_id: Option<String>,

        #[arg(long)]
        max_output_tokens: Option<u64>,
    },
    /// Restore defaults and forget the API key
    Reset,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "prompt_master=debug,prompt_master_core=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let proxy_origin = Url::parse(&cli.proxy_origin)
        .with_context(|| format!("invalid proxy origin: {}", cli.proxy_origin))?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(get_root_data_dir);
    tracing::debug!(data_dir = %data_dir.display(), "opening storage");

    let durable = Arc::new(FileStorage::new(data_dir));
    let session = Arc::new(FileStorage::new(get_session_dir()));
    let skills = Arc::new(SkillContextLoader::new(SkillRoot::parse(&cli.skill_root)));
    let controller = AppController::open(durable, session, skills, Dispatcher::new(proxy_origin)).await;

    match cli.command {
        None => {
            controller.api_hint().await;
            let skill = controller.load_skills().await;
            print_view(&controller.state().await, &skill);
        }
        Some(Command::Generate(args)) => generate(&controller, args).await?,
        Some(Command::Records { action }) => records(&controller, action).await?,
        Some(Command::Settings { action }) => settings(&controller, action).await?,
        Some(Command::Output { copy }) => output(&controller, copy).await,
        Some(Command::View { name }) => {
            if let Some(name) = name {
                if controller.navigate(&name).await?.is_none() {
                    bail!("unknown view `{name}` (expected generator, records or settings)");
                }
            }
            controller.api_hint().await;
            let skill = controller.load_skills().await;
            print_view(&controller.state().await, &skill);
        }
    }

    Ok(())
}

/// Resolves a full id or a unique prefix of one.
async fn resolve_id(controller: &AppController, id: &str) -> Result<String> {
    let matches: Vec<String> = controller
        .state()
        .await
        .records
        .into_iter()
        .map(|r| r.id)
        .filter(|candidate| candidate.starts_with(id))
        .collect();

    match matches.as_slice() {
        [] => bail!("no record with id `{id}`"),
        [single] => Ok(single.clone()),
        _ if matches.iter().any(|m| m == id) => Ok(id.to_string()),
        _ => bail!("id prefix `{id}` matches {} records", matches.len()),
    }
}

async fn generate(controller: &AppController, args: GenerateArgs) -> Result<()> {
    let base = match &args.from {
        Some(id) => {
            let id = resolve_id(controller, id).await?;
            controller.fill_record(&id).await?.input
        }
        None => FormPayload::default(),
    };
    let payload = args.into_payload(base);

    controller.set_active_view(View::Generator).await?;
    header(View::Generator);

    let start = Instant::now();
    let spinner = create_spinner("正在调用 AI 生成，请稍候...");
    let outcome = controller.generate(payload).await?;
    spinner.finish_and_clear();
    println!("{}", skill_line(&controller.skill_status()));

    let state = controller.state().await;
    match outcome {
        GenerateOutcome::Rejected(_) => {
            print_status(state.generation_status.as_ref());
            std::process::exit(2);
        }
        GenerateOutcome::NeedsApiKey => {
            print_status(state.generation_status.as_ref());
            print_status(state.settings_status.as_ref());
            println!(
                "{} prompt-master settings save --api-key <id.secret>",
                style("→").dim()
            );
            std::process::exit(1);
        }
        GenerateOutcome::Generated(record) | GenerateOutcome::Fallback { record, .. } => {
            print_status(state.generation_status.as_ref());
            println!(
                "{} {}",
                style(format!("[{}]", format_duration(start.elapsed()))).dim(),
                style(format!("id: {}", record.id)).dim()
            );
            rule();
            println!("{}", record.output);
            rule();
        }
    }

    Ok(())
}

async fn records(controller: &AppController, action: Option<RecordsAction>) -> Result<()> {
    controller.set_active_view(View::Records).await?;

    match action.unwrap_or(RecordsAction::List { search: None }) {
        RecordsAction::List { search } => {
            header(View::Records);
            let found = controller.search(search.as_deref().unwrap_or("")).await;
            print_records(&found);
        }
        RecordsAction::Show { id } => {
            let id = resolve_id(controller, &id).await?;
            print_record(&controller.find_record(&id).await?);
        }
        RecordsAction::Fill { id } => {
            let id = resolve_id(controller, &id).await?;
            let record = controller.fill_record(&id).await?;
            header(View::Generator);
            print_status(controller.state().await.generation_status.as_ref());
            print_form(&record.input);
            println!(
                "\n{} prompt-master generate --from {}",
                style("→").dim(),
                &record.id
            );
        }
        RecordsAction::Copy { id } => {
            let id = resolve_id(controller, &id).await?;
            let record = controller.find_record(&id).await?;
            copy_or_print(controller, CopySource::Record, &record.output).await;
        }
        RecordsAction::Delete { id } => {
            let id = resolve_id(controller, &id).await?;
            controller.delete_record(&id).await?;
            println!("{} 已删除记录 {id}", style("✓").green().bold());
        }
        RecordsAction::Clear { yes } => {
            if controller.search("").await.is_empty() {
                println!("{}", style("暂无记录。").dim());
                return Ok(());
            }
            let confirmed = yes || confirm("确定清空全部生成记录吗？该操作不可撤销。")?;
            if controller.clear_records(confirmed).await? {
                println!("{} 已清空全部记录。", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

async fn settings(controller: &AppController, action: Option<SettingsAction>) -> Result<()> {
    controller.set_active_view(View::Settings).await?;
    header(View::Settings);

    match action.unwrap_or(SettingsAction::Show) {
        SettingsAction::Show => {}
        SettingsAction::Save {
            api_key,
            base_url,
            model_id,
            max_output_tokens,
        } => {
            controller
                .save_settings(SettingsForm {
                    api_key,
                    base_url,
                    model_id,
                    max_output_tokens,
                })
                .await?;
        }
        SettingsAction::Reset => controller.reset_settings().await?,
    }

    let state = controller.state().await;
    println!("{}", format_settings(&state.settings));
    print_status(state.settings_status.as_ref());
    Ok(())
}

async fn output(controller: &AppController, copy: bool) {
    let Some(text) = controller.output_text().await else {
        println!("{}", style("暂无生成结果。").dim());
        return;
    };
    if copy {
        copy_or_print(controller, CopySource::Output, &text).await;
    } else {
        println!("{text}");
    }
}

/// Copies `text`, printing it for a manual copy when no clipboard is reachable.
async fn copy_or_print(controller: &AppController, source: CopySource, text: &str) {
    let copied = clipboard::copy_text(text).await;
    let status = controller.note_copy(source, copied).await;
    print_status(Some(&status));
    if !copied {
        rule();
        println!("{text}");
        rule();
    }
}

fn confirm(question: &str) -> Result<bool> {
    let term = Term::stdout();
    term.write_str(&format!("{question} [y/N] "))?;
    let answer = term.read_line()?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_the_filled_record() {
        let cli = Cli::parse_from([
            "prompt-master",
            "generate",
            "--from",
            "abc",
            "--theme",
            "新主题",
            "-d",
            "7-10秒",
        ]);
        let Some(Command::Generate(args)) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.from.as_deref(), Some("abc"));

        let base = FormPayload {
            prompt_title: "旧标题".into(),
            theme: "旧主题".into(),
            video_duration: "4-6秒".into(),
            ..Default::default()
        };
        let payload = args.into_payload(base);
        assert_eq!(payload.prompt_title, "旧标题");
        assert_eq!(payload.theme, "新主题");
        assert_eq!(payload.video_duration, "7-10秒");
    }

    #[test]
    fn copy_commands_parse() {
        let cli = Cli::parse_from(["prompt-master", "records", "copy", "3f2a"]);
        assert!(matches!(
            cli.command,
            Some(Command::Records {
                action: Some(RecordsAction::Copy { ref id })
            }) if id == "3f2a"
        ));

        let cli = Cli::parse_from(["prompt-master", "output", "--copy"]);
        assert!(matches!(cli.command, Some(Command::Output { copy: true })));
    }

    #[test]
    fn durations_render_compactly() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
