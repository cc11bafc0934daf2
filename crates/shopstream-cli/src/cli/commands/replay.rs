//! Replay command handler.
//!
//! Runs a recorded `text/event-stream` capture through the same decoder and
//! session loop as a live turn, without a backend.

use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use shopstream_core::config::Config;
use shopstream_core::products;
use shopstream_core::session::{ChatSession, TurnOutcome};
use shopstream_core::sse::FrameStream;
use tokio_util::sync::CancellationToken;

use crate::render::{self, TurnRenderer};

pub async fn run(
    config: &Config,
    file: &Path,
    chunk_size: Option<usize>,
    query: &str,
    json: bool,
) -> Result<()> {
    let capture = std::fs::read(file)
        .with_context(|| format!("read capture {}", file.display()))?;
    let chunks = split_chunks(capture, chunk_size);
    tracing::debug!(chunks = chunks.len(), "replaying capture");

    let byte_stream = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
    let frames = FrameStream::new(byte_stream).boxed();

    let mut session = ChatSession::new("replay", config.steps.clone());
    let turn = session.begin_turn(query);
    let cancel = CancellationToken::new();

    if json {
        session.run_turn(turn, frames, &cancel).await;
        let json = serde_json::to_string_pretty(session.transcript())
            .context("serialize transcript")?;
        println!("{json}");
        return Ok(());
    }

    let mut renderer = TurnRenderer::new();
    let outcome = session
        .run_turn_with(turn, frames, &cancel, |message, state| {
            renderer.handle_message(message, state);
        })
        .await;
    renderer.finish_line();

    if outcome == TurnOutcome::Completed {
        let recommended = products::recommended_products(session.transcript().final_meta());
        render::write_products(&mut std::io::stdout(), &recommended, session.selection())
            .context("write products")?;
    }
    Ok(())
}

/// Splits `capture` into chunks of at most `chunk_size` bytes; `None` keeps
/// it whole.
fn split_chunks(capture: Vec<u8>, chunk_size: Option<usize>) -> Vec<Bytes> {
    let capture = Bytes::from(capture);
    match chunk_size {
        Some(size) if size > 0 && size < capture.len() => {
            let mut chunks = Vec::with_capacity(capture.len().div_ceil(size));
            let mut offset = 0;
            while offset < capture.len() {
                let end = (offset + size).min(capture.len());
                chunks.push(capture.slice(offset..end));
                offset = end;
            }
            chunks
        }
        _ => vec![capture],
    }
}
