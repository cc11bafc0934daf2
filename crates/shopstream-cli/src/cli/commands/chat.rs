//! Chat command handler.

use anyhow::{Context, Result};
use shopstream_core::client::{ChatClient, ChatRequest};
use shopstream_core::config::Config;
use shopstream_core::products;
use shopstream_core::session::{ChatSession, TurnOutcome};
use tokio_util::sync::CancellationToken;

use super::feedback::{self, FeedbackOptions};
use crate::cli::InterruptedError;
use crate::render::{self, TurnRenderer};

pub struct ChatRunOptions<'a> {
    pub config: &'a Config,
    pub query: &'a str,
    pub session_id: Option<&'a str>,
    pub feedback: FeedbackOptions<'a>,
    pub json: bool,
}

pub async fn run(options: ChatRunOptions<'_>) -> Result<()> {
    let config = options.config;
    let session_id = options
        .session_id
        .map_or_else(|| config.effective_session_id(), str::to_string);
    let client = ChatClient::new(&config.backend).context("create backend client")?;
    let mut session = ChatSession::new(session_id, config.steps.clone());

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let turn = session.begin_turn(options.query);
    let request = ChatRequest::new(session.session_id(), options.query);
    let mut renderer = TurnRenderer::new();
    let opened = tokio::select! {
        opened = client.stream_chat(&request) => opened,
        () = cancel.cancelled() => {
            ctrl_c.abort();
            return Err(InterruptedError.into());
        }
    };
    let frames = match opened {
        Ok(frames) => frames,
        Err(e) => {
            ctrl_c.abort();
            let failure = session.fail_turn(turn, &e);
            if options.json {
                print_json(&session)?;
            } else if let Some(message) = failure {
                renderer.handle_message(&message, session.transcript());
            }
            return Err(e).context("open chat stream");
        }
    };

    let outcome = if options.json {
        session.run_turn(turn, frames, &cancel).await
    } else {
        session
            .run_turn_with(turn, frames, &cancel, |message, state| {
                renderer.handle_message(message, state);
            })
            .await
    };
    ctrl_c.abort();
    renderer.finish_line();

    match outcome {
        TurnOutcome::Completed => {}
        TurnOutcome::Cancelled => {
            renderer.status("Interrupted.");
            return Err(InterruptedError.into());
        }
        TurnOutcome::Failed | TurnOutcome::Superseded => {
            if options.json {
                print_json(&session)?;
            }
            anyhow::bail!("chat turn did not complete");
        }
    }

    let recommended = products::recommended_products(session.transcript().final_meta());

    if !options.feedback.codes.is_empty() {
        for code in options.feedback.codes {
            session.selection_mut().toggle(code);
        }
        let request = session
            .feedback_request(options.feedback.rating, options.feedback.notes)
            .context("build feedback")?;
        let codes = request.selected_style_codes.clone();
        feedback::submit(&client, &request).await?;
        session.record_feedback_saved(codes);
        if !options.json {
            renderer.status(&format!(
                "Feedback saved ({} product(s)).",
                request.selected_style_codes.len()
            ));
        }
    }

    if options.json {
        print_json(&session)
    } else {
        render::write_products(&mut std::io::stdout(), &recommended, session.selection())
            .context("write products")
    }
}

fn print_json(session: &ChatSession) -> Result<()> {
    let json = serde_json::to_string_pretty(session.transcript())
        .context("serialize transcript")?;
    println!("{json}");
    Ok(())
}
