//! `birdwire`: decode stream control messages from stdin.
//!
//! Reads one JSON payload per line and writes one JSON object per decoded line:
//! `{"message": {...}, "raw_json": "..."}`. `raw_json` is only present when
//! `BIRDWIRE_JSON_STORE_ENABLED` is on. Undecodable lines are logged and skipped.

use anyhow::Context;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use birdwire_core::{
    config::Config, ControlMessage, ControlMessageDecoder, RawJsonRegistry, StreamUser,
    StreamUserResolver,
};

#[derive(Serialize)]
struct DecodedLine<'a> {
    message: &'a ControlMessage<StreamUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_json: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    birdwire_core::logging::init("birdwire")?;

    let cfg = Config::load()?;
    let registry = RawJsonRegistry::with_prune_threshold(cfg.prune_threshold);

    let summary = run(
        &cfg,
        &registry,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
    .context("decoding stdin")?;

    tracing::info!(decoded = summary.decoded, skipped = summary.skipped, "done");
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Summary {
    decoded: u64,
    skipped: u64,
}

/// Decode every line of `input`, writing one JSON object per decoded line.
///
/// Decode failures are logged and counted; I/O failures end the run.
async fn run<R, W>(
    cfg: &Config,
    registry: &RawJsonRegistry,
    input: R,
    mut output: W,
) -> birdwire_core::Result<Summary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut summary = Summary::default();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match decode_line(cfg, registry, &line) {
            Ok(out) => {
                output.write_all(out.as_bytes()).await?;
                output.write_all(b"\n").await?;
                summary.decoded += 1;
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping undecodable line");
                summary.skipped += 1;
            }
        }
    }
    output.flush().await?;
    Ok(summary)
}

/// Decode one line inside its own raw JSON scope; the scope closes on return.
fn decode_line(
    cfg: &Config,
    registry: &RawJsonRegistry,
    line: &str,
) -> birdwire_core::Result<String> {
    let scope = registry.open_scope();
    let message = ControlMessageDecoder::new(&StreamUserResolver)
        .with_raw_json(&scope)
        .with_raw_json_enabled(cfg.json_store_enabled)
        .decode_str(line)?;

    let raw_json = scope
        .raw_json(&message)
        .map(|raw| truncate_with_ellipsis(&raw, cfg.raw_json_preview));
    let out = DecodedLine {
        message: &message,
        raw_json,
    };
    Ok(serde_json::to_string(&out)?)
}

fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if max_chars == 0 || s.chars().count() <= max_chars {
        return s.to_string();
    }
    format!("{}...", s.chars().take(max_chars).collect::<String>())
}
