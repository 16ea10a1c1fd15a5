use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use prompt_master_core::{DEFAULT_DIRECT_BASE_URL, DEFAULT_MODEL, SkillContextLoader, SkillRoot};
use tracing_subscriber::EnvFilter;

use crate::handler::{GENERATE_PATH, ProxyState, UpstreamConfig, router};

mod handler;

#[derive(Parser)]
#[command(name = "prompt-master-proxy")]
#[command(about = "BYOK relay for storyboard prompt generation")]
struct Config {
    /// Address to listen on
    #[arg(long, env = "PROXY_ADDR", default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// OpenAI-compatible upstream base URL
    #[arg(long, env = "GLM_BASE_URL", default_value = DEFAULT_DIRECT_BASE_URL)]
    base_url: String,

    /// Upstream model id
    #[arg(long, env = "GLM_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Directory or http(s) URL holding the jimeng-video skill documents
    #[arg(long, env = "SKILL_ROOT", default_value = ".")]
    skill_root: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("prompt_master_proxy=info,prompt_master_core=info,tower_http=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::parse();
    let model = match config.model.trim() {
        "" => DEFAULT_MODEL.to_string(),
        model => model.to_string(),
    };
    let upstream = UpstreamConfig {
        base_url: config.base_url,
        model,
    };

    let state = Arc::new(ProxyState {
        client: reqwest::Client::new(),
        skills: Arc::new(SkillContextLoader::new(SkillRoot::parse(&config.skill_root))),
        upstream,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    tracing::info!(
        addr = %config.addr,
        endpoint = %GENERATE_PATH,
        "prompt-master proxy listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
