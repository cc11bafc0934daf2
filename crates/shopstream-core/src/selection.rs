//! User-toggled product selections and the feedback payloads built from them.
//!
//! `selected` holds codes pending submission, `saved` holds codes already
//! submitted. A code may be in both sets at once.

use std::collections::BTreeSet;
use std::fmt;

use crate::client::FeedbackRequest;

/// How a product code is currently marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStatus {
    Selected,
    Saved,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// No turn has produced a correlation id yet.
    MissingMessageId,
    NothingSelected,
    /// Ratings run from 1 to 5.
    InvalidRating(u8),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::MissingMessageId => {
                write!(f, "no message_id yet; run a chat turn first")
            }
            SelectionError::NothingSelected => write!(f, "no products selected"),
            SelectionError::InvalidRating(rating) => {
                write!(f, "rating must be between 1 and 5 (got {rating})")
            }
        }
    }
}

impl std::error::Error for SelectionError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    selected: BTreeSet<String>,
    saved: BTreeSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the pending selection for `code`. Returns true if now selected.
    pub fn toggle(&mut self, code: &str) -> bool {
        if self.selected.remove(code) {
            false
        } else {
            self.selected.insert(code.to_string());
            true
        }
    }

    /// Drops pending selections, keeping saved codes.
    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Forgets everything; used when a new turn starts.
    pub fn reset(&mut self) {
        self.selected.clear();
        self.saved.clear();
    }

    pub fn is_selected(&self, code: &str) -> bool {
        self.selected.contains(code)
    }

    pub fn is_saved(&self, code: &str) -> bool {
        self.saved.contains(code)
    }

    /// A pending selection takes precedence over a saved mark.
    pub fn status(&self, code: &str) -> SelectionStatus {
        if self.is_selected(code) {
            SelectionStatus::Selected
        } else if self.is_saved(code) {
            SelectionStatus::Saved
        } else {
            SelectionStatus::Available
        }
    }

    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(String::as_str)
    }

    pub fn saved(&self) -> impl Iterator<Item = &str> {
        self.saved.iter().map(String::as_str)
    }

    /// Builds the feedback payload for the pending selection.
    pub fn feedback_request(
        &self,
        session_id: &str,
        message_id: Option<&str>,
        rating: Option<u8>,
        notes: Option<&str>,
    ) -> Result<FeedbackRequest, SelectionError> {
        let message_id = message_id.ok_or(SelectionError::MissingMessageId)?;
        if self.selected.is_empty() {
            return Err(SelectionError::NothingSelected);
        }
        if let Some(rating) = rating
            && !(1..=5).contains(&rating)
        {
            return Err(SelectionError::InvalidRating(rating));
        }

        Ok(FeedbackRequest {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            rating,
            selected_style_codes: self.selected.iter().cloned().collect(),
            notes: notes.map(str::to_string),
        })
    }

    /// Records a successful submission: codes become saved and the pending
    /// selection is cleared.
    pub fn mark_saved<I, S>(&mut self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.saved.extend(codes.into_iter().map(Into::into));
        self.selected.clear();
    }
}
