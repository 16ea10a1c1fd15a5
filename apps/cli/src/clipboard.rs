use std::process::Stdio;

use tokio::{io::AsyncWriteExt, process::Command};

/// Clipboard writers tried in order.
const COPY_COMMANDS: &[(&str, &[&str])] = &[
    ("pbcopy", &[]),
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
    ("clip.exe", &[]),
];

/// Copies `text` to the system clipboard. Returns whether any writer took it.
pub async fn copy_text(text: &str) -> bool {
    for (program, args) in COPY_COMMANDS {
        match pipe_into(program, args, text).await {
            Ok(true) => {
                tracing::debug!(program, "copied to clipboard");
                return true;
            }
            Ok(false) => tracing::debug!(program, "clipboard writer exited with failure"),
            Err(e) => tracing::debug!(program, error = %e, "clipboard writer unavailable"),
        }
    }
    false
}

async fn pipe_into(program: &str, args: &[&str], text: &str) -> std::io::Result<bool> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
    }
    Ok(child.wait().await?.success())
}
