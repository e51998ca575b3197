#![allow(dead_code)]

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::Context as _;

/// Variables the binary reads as overrides; cleared so the host environment cannot leak in.
const OVERRIDE_VARS: &[&str] = &[
    "TARGET_URL",
    "TARGET_TOKEN_URL",
    "TARGET_TOKEN",
    "PHASE_DURATION",
    "PHASE_ARRIVAL",
    "EKO_USERNAME",
    "EKO_PASSWORD",
    "RUST_LOG",
];

pub fn status_code(out: &Output) -> i32 {
    out.status.code().unwrap_or(-1)
}

pub fn write_script(text: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .suffix(".yml")
        .tempfile()
        .context("create temp script")?;
    file.write_all(text.as_bytes()).context("write temp script")?;
    Ok(file)
}

/// Runs `ekoload run <script> <args..>` off the async runtime.
pub async fn run(
    script: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_ekoload");
    tokio::task::spawn_blocking(move || {
        let mut cmd = Command::new(exe);
        for var in OVERRIDE_VARS {
            cmd.env_remove(var);
        }
        cmd.arg("run").arg(&script).args(&args).envs(env).output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run ekoload binary")
}

pub fn describe(out: &Output) -> String {
    format!(
        "exit code {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}
