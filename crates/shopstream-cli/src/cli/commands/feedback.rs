//! Feedback command handler.

use anyhow::{Context, Result};
use shopstream_core::client::{ChatClient, FeedbackRequest};
use shopstream_core::config::Config;
use shopstream_core::selection::SelectionSet;

/// Products and rating to submit.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackOptions<'a> {
    pub codes: &'a [String],
    pub rating: Option<u8>,
    pub notes: Option<&'a str>,
}

pub async fn run(
    config: &Config,
    session_id: Option<&str>,
    message_id: &str,
    options: FeedbackOptions<'_>,
) -> Result<()> {
    let session_id = session_id.map_or_else(|| config.effective_session_id(), str::to_string);

    let mut selection = SelectionSet::new();
    for code in options.codes {
        selection.toggle(code);
    }
    let request = selection
        .feedback_request(&session_id, Some(message_id), options.rating, options.notes)
        .context("build feedback")?;

    let client = ChatClient::new(&config.backend).context("create backend client")?;
    submit(&client, &request).await?;
    println!(
        "Feedback saved for {} ({} product(s)).",
        request.message_id,
        request.selected_style_codes.len()
    );
    Ok(())
}

/// Sends feedback and fails unless the backend acknowledges it.
pub async fn submit(client: &ChatClient, request: &FeedbackRequest) -> Result<()> {
    let ack = client
        .send_feedback(request)
        .await
        .context("send feedback")?;
    if !ack.ok {
        anyhow::bail!("backend rejected feedback for {}", request.message_id);
    }
    Ok(())
}
