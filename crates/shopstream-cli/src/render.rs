//! Streamed stdout/stderr rendering of a turn.
//!
//! Answer text goes to stdout as it arrives; stage progress, errors and
//! status lines go to stderr.

use std::io::{Stderr, Stdout, Write, stderr, stdout};

use shopstream_core::message::Message;
use shopstream_core::products::Product;
use shopstream_core::selection::{SelectionSet, SelectionStatus};
use shopstream_core::transcript::{Stage, TranscriptState};

pub struct TurnRenderer {
    stdout: Stdout,
    stderr: Stderr,
    /// Whether answer text was printed without a trailing newline.
    needs_final_newline: bool,
    /// Steps of the open entry already printed.
    shown_steps: usize,
    last_stage: Option<Stage>,
}

impl Default for TurnRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnRenderer {
    pub fn new() -> Self {
        Self {
            stdout: stdout(),
            stderr: stderr(),
            needs_final_newline: false,
            shown_steps: 0,
            last_stage: None,
        }
    }

    /// Renders the effect of `message` on `state`.
    pub fn handle_message(&mut self, message: &Message, state: &TranscriptState) {
        match message {
            Message::State { .. } => self.render_progress(state),
            Message::Token { delta } => {
                if !delta.is_empty() {
                    let _ = write!(self.stdout, "{delta}");
                    let _ = self.stdout.flush();
                    self.needs_final_newline = true;
                }
            }
            Message::Error { .. } => {
                self.finish_line();
                if let Some(entry) = state.entries().last() {
                    let _ = writeln!(self.stderr, "{}", entry.text());
                }
            }
            Message::Final(_) | Message::Done => self.finish_line(),
            Message::Start { .. } | Message::Unknown { .. } => {}
        }
    }

    /// Ends the answer line if text is pending.
    pub fn finish_line(&mut self) {
        if self.needs_final_newline {
            let _ = writeln!(self.stdout);
            let _ = self.stdout.flush();
            self.needs_final_newline = false;
        }
    }

    pub fn status(&mut self, line: &str) {
        self.finish_line();
        let _ = writeln!(self.stderr, "{line}");
    }

    fn render_progress(&mut self, state: &TranscriptState) {
        let Some(entry) = state.open_entry() else {
            return;
        };

        if entry.current_stage() != self.last_stage
            && let Some(stage) = entry.current_stage()
        {
            self.finish_line();
            let _ = writeln!(self.stderr, "▸ {stage}");
            self.last_stage = Some(stage);
        }

        for step in entry.steps().iter().skip(self.shown_steps) {
            let _ = writeln!(self.stderr, "    {}", step.label);
        }
        self.shown_steps = entry.steps().len();
    }
}

/// Writes the recommended products, one per line, with selection markers.
pub fn write_products<W: Write>(
    out: &mut W,
    products: &[Product],
    selection: &SelectionSet,
) -> std::io::Result<()> {
    if products.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "Recommended products:")?;
    for product in products {
        let code = product.style_code.as_deref().unwrap_or("-");
        let marker = match selection.status(code) {
            SelectionStatus::Selected => "[x]",
            SelectionStatus::Saved => "[saved]",
            SelectionStatus::Available => "[ ]",
        };
        let mut line = format!("{marker} {code}");
        if let Some(name) = &product.name {
            line.push_str(&format!("  {name}"));
        }
        if let Some(brand) = &product.brand {
            line.push_str(&format!(" ({brand})"));
        }
        if let Some(price) = &product.price {
            line.push_str(&format!("  {price}"));
        }
        writeln!(out, "{line}")?;
        if let Some(url) = &product.url {
            writeln!(out, "      {url}")?;
        }
    }
    Ok(())
}
