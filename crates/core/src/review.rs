//! Review/edit state machine.
//!
//! ```text
//! capturing ──begin_analysis──▶ analyzing ──complete──▶ reviewing ──mark_saved──▶ saved
//!     ▲                            │  ▲                    │
//!     └──────── failure ───────────┘  └──begin_reestimate──┘
//!
//! any phase ──discard──▶ discarded
//! ```
//!
//! Every call into a provider is represented by a [`Ticket`]. A ticket is
//! tied to the generation it was issued in, so a result that arrives after
//! a discard or a newer request is rejected instead of overwriting the
//! draft. Discarding also cancels the ticket's [`CancellationToken`].

use crate::error::{AnalysisErrorKind, AppError, Result};
use crate::history::{ItemDetails, ListingItem, now_millis};
use crate::prompt::reestimate_context;
use crate::providers::{AnalysisResult, ItemField, is_missing_value};
use crate::providers::schema::mentions_unknown;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Longest auto-generated description, in characters.
pub const AUTO_DESCRIPTION_MAX_CHARS: usize = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewPhase {
    Capturing,
    Analyzing,
    Reviewing,
    Saved,
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketPurpose {
    Analyze,
    Reestimate,
}

/// Handle for one in-flight analysis.
#[derive(Debug, Clone)]
pub struct Ticket {
    generation: u64,
    purpose: TicketPurpose,
    images: Vec<String>,
    context: Option<String>,
    cancel: CancellationToken,
}

impl Ticket {
    pub fn purpose(&self) -> TicketPurpose {
        self.purpose
    }

    /// Photos to send, as data URLs.
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Free-text context to fold into the prompt.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A failure shown next to the action that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewError {
    pub kind: Option<AnalysisErrorKind>,
    pub message: String,
    pub retryable: bool,
}

impl From<&AppError> for ReviewError {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.analysis_kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// `brand type color "str. size"`, skipping unknown parts.
pub fn auto_description(fields: &AnalysisResult) -> String {
    let size = (!is_missing_value(&fields.size)).then(|| format!("str. {}", fields.size.trim()));
    [
        Some(fields.brand.trim().to_string()),
        Some(fields.item_type.trim().to_string()),
        Some(fields.color.trim().to_string()),
        size,
    ]
    .into_iter()
    .flatten()
    .filter(|part| !is_missing_value(part))
    .collect::<Vec<_>>()
    .join(" ")
    .chars()
    .take(AUTO_DESCRIPTION_MAX_CHARS)
    .collect()
}

/// Working copy of a listing under review.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftItem {
    pub id: Option<String>,
    pub timestamp: Option<i64>,
    pub photos: Vec<String>,
    pub currency: String,
    pub fields: AnalysisResult,
    description_locked: bool,
}

impl DraftItem {
    pub fn from_result(result: AnalysisResult, photos: Vec<String>, currency: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: None,
            photos,
            currency: currency.into(),
            fields: result,
            description_locked: false,
        }
    }

    pub fn from_item(item: &ListingItem) -> Self {
        Self {
            id: Some(item.id.clone()),
            timestamp: Some(item.timestamp),
            photos: item.photos.clone(),
            currency: item.currency.clone(),
            fields: item.to_result(),
            description_locked: false,
        }
    }

    pub fn description_locked(&self) -> bool {
        self.description_locked
    }

    /// Sets a detail field. The description follows unless it was typed by
    /// hand or no longer matches the auto-generated text.
    pub fn set_field(&mut self, field: ItemField, value: impl Into<String>) {
        let previous_auto = auto_description(&self.fields);
        let value = value.into();
        match field {
            ItemField::Brand => self.fields.brand = value,
            ItemField::Type => self.fields.item_type = value,
            ItemField::Color => self.fields.color = value,
            ItemField::Size => self.fields.size = value,
            ItemField::Material => self.fields.material = value,
            ItemField::Condition => self.fields.condition = value,
            ItemField::Style => self.fields.style = value,
        }

        let current = self.fields.description.trim();
        let follows_auto = current.is_empty()
            || mentions_unknown(current)
            || current == previous_auto;
        if !self.description_locked && follows_auto {
            self.fields.description = auto_description(&self.fields);
        }
    }

    /// Manual description edit; stops auto-regeneration.
    pub fn set_description(&mut self, value: impl Into<String>) {
        self.fields.description = value.into();
        self.description_locked = true;
    }

    /// Replaces the description with the auto-generated one and resumes
    /// auto-regeneration.
    pub fn regenerate_description(&mut self) {
        self.fields.description = auto_description(&self.fields);
        self.description_locked = false;
    }

    pub fn set_price(&mut self, price: f64) {
        self.fields.price = price;
    }

    pub fn set_price_new(&mut self, price_new: Option<f64>) {
        self.fields.price_new = price_new;
    }

    pub fn missing_fields(&self) -> Vec<ItemField> {
        self.fields.missing_fields()
    }

    /// Folds a re-estimate into the draft: price, new price, description
    /// (unless hand-edited) and links. Details are left alone.
    pub fn apply_reestimate(&mut self, result: AnalysisResult) {
        self.fields.price = result.price;
        if result.price_new.is_some() {
            self.fields.price_new = result.price_new;
        }
        if !self.description_locked {
            self.fields.description = result.description;
        }
        if !result.similar_links.is_empty() {
            self.fields.similar_links = result.similar_links;
        }
    }

    /// The persisted form. New drafts get a fresh id and the current time.
    pub fn to_listing(&self) -> ListingItem {
        ListingItem {
            id: self.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            photos: self.photos.clone(),
            description: self.fields.description.trim().to_string(),
            price: self.fields.price,
            price_new: self.fields.price_new,
            currency: self.currency.clone(),
            details: ItemDetails::from_result(&self.fields),
            similar_links: self.fields.similar_links.clone(),
        }
    }
}

/// One capture → analyze → review → save pass.
#[derive(Debug)]
pub struct ReviewSession {
    phase: ReviewPhase,
    currency: String,
    photos: Vec<String>,
    draft: Option<DraftItem>,
    generation: u64,
    in_flight: Option<(u64, CancellationToken)>,
    error: Option<ReviewError>,
}

impl ReviewSession {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            phase: ReviewPhase::Capturing,
            currency: currency.into(),
            photos: Vec::new(),
            draft: None,
            generation: 0,
            in_flight: None,
            error: None,
        }
    }

    /// Re-opens a saved item for editing; saving it again is an upsert.
    pub fn edit_existing(item: &ListingItem) -> Self {
        let draft = DraftItem::from_item(item);
        Self {
            phase: ReviewPhase::Reviewing,
            currency: item.currency.clone(),
            photos: draft.photos.clone(),
            draft: Some(draft),
            generation: 0,
            in_flight: None,
            error: None,
        }
    }

    pub fn phase(&self) -> ReviewPhase {
        self.phase
    }

    pub fn photos(&self) -> &[String] {
        &self.photos
    }

    pub fn draft(&self) -> Option<&DraftItem> {
        self.draft.as_ref()
    }

    /// Mutable draft, available only while reviewing.
    pub fn draft_mut(&mut self) -> Result<&mut DraftItem> {
        if self.phase != ReviewPhase::Reviewing {
            return Err(AppError::invalid_state("There is no draft to edit right now"));
        }
        self.draft
            .as_mut()
            .ok_or_else(|| AppError::invalid_state("There is no draft to edit right now"))
    }

    pub fn error(&self) -> Option<&ReviewError> {
        self.error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn add_photo(&mut self, data_url: String) -> Result<()> {
        self.expect_phase(ReviewPhase::Capturing, "add photos")?;
        self.photos.push(data_url);
        Ok(())
    }

    pub fn remove_photo(&mut self, index: usize) -> Result<String> {
        self.expect_phase(ReviewPhase::Capturing, "remove photos")?;
        if index >= self.photos.len() {
            return Err(AppError::invalid_state(format!("No photo at position {}", index + 1)));
        }
        Ok(self.photos.remove(index))
    }

    /// Replaces a captured photo, e.g. after cropping or rotating it.
    pub fn replace_photo(&mut self, index: usize, data_url: String) -> Result<()> {
        self.expect_phase(ReviewPhase::Capturing, "edit photos")?;
        let slot = self
            .photos
            .get_mut(index)
            .ok_or_else(|| AppError::invalid_state(format!("No photo at position {}", index + 1)))?;
        *slot = data_url;
        Ok(())
    }

    /// Moves to `analyzing` and issues a ticket for the captured photos.
    pub fn begin_analysis(&mut self, context: Option<String>) -> Result<Ticket> {
        self.expect_phase(ReviewPhase::Capturing, "start an analysis")?;
        if self.photos.is_empty() {
            return Err(AppError::format("No images found to analyse"));
        }
        let context = context.filter(|c| !c.trim().is_empty());
        Ok(self.issue(TicketPurpose::Analyze, context))
    }

    /// Moves back to `analyzing` with the reviewed fields as context.
    pub fn begin_reestimate(&mut self) -> Result<Ticket> {
        self.expect_phase(ReviewPhase::Reviewing, "re-estimate")?;
        let draft = self
            .draft
            .as_ref()
            .ok_or_else(|| AppError::invalid_state("There is no draft to re-estimate"))?;
        let context = reestimate_context(&draft.fields);
        Ok(self.issue(TicketPurpose::Reestimate, Some(context)))
    }

    /// Applies the outcome of `ticket`.
    ///
    /// A failed outcome is recorded as [`ReviewError`] and the session
    /// returns to where it was, keeping photos and draft.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidState`] when the ticket is stale; the outcome is
    /// dropped.
    pub fn complete(&mut self, ticket: &Ticket, outcome: Result<AnalysisResult>) -> Result<()> {
        match &self.in_flight {
            Some((generation, _)) if *generation == ticket.generation => {}
            _ => {
                debug!(generation = ticket.generation, current = self.generation, "stale analysis result dropped");
                return Err(AppError::invalid_state("The analysis result is no longer current"));
            }
        }
        self.in_flight = None;

        let fallback = match ticket.purpose {
            TicketPurpose::Analyze => ReviewPhase::Capturing,
            TicketPurpose::Reestimate => ReviewPhase::Reviewing,
        };
        match outcome {
            Err(err) => {
                self.error = Some(ReviewError::from(&err));
                self.phase = fallback;
            }
            Ok(result) => {
                let reestimate = ticket.purpose == TicketPurpose::Reestimate;
                if let (true, Some(draft)) = (reestimate, self.draft.as_mut()) {
                    draft.apply_reestimate(result);
                } else {
                    self.draft = Some(DraftItem::from_result(result, self.photos.clone(), self.currency.clone()));
                }
                self.phase = ReviewPhase::Reviewing;
            }
        }
        Ok(())
    }

    /// Builds the record to persist. The session stays in `reviewing` until
    /// [`mark_saved`](Self::mark_saved), so a failed write loses nothing.
    pub fn to_listing(&self) -> Result<ListingItem> {
        self.expect_phase(ReviewPhase::Reviewing, "save")?;
        self.draft
            .as_ref()
            .map(DraftItem::to_listing)
            .ok_or_else(|| AppError::invalid_state("There is no draft to save"))
    }

    /// Records that `item` was persisted and remembers its identity on the
    /// draft.
    pub fn mark_saved(&mut self, item: &ListingItem) -> Result<()> {
        self.expect_phase(ReviewPhase::Reviewing, "save")?;
        if let Some(draft) = self.draft.as_mut() {
            draft.id = Some(item.id.clone());
            draft.timestamp = Some(item.timestamp);
        }
        self.phase = ReviewPhase::Saved;
        self.error = None;
        Ok(())
    }

    /// Records a failure that did not come from a ticket, such as a save.
    pub fn record_error(&mut self, err: &AppError) {
        self.error = Some(ReviewError::from(err));
    }

    /// Abandons the session, cancelling any in-flight call.
    pub fn discard(&mut self) {
        if let Some((_, cancel)) = self.in_flight.take() {
            cancel.cancel();
        }
        self.generation += 1;
        self.draft = None;
        self.error = None;
        self.phase = ReviewPhase::Discarded;
    }

    /// Starts over in `capturing` with no photos.
    pub fn restart(&mut self) {
        self.discard();
        self.photos.clear();
        self.phase = ReviewPhase::Capturing;
    }

    fn issue(&mut self, purpose: TicketPurpose, context: Option<String>) -> Ticket {
        self.generation += 1;
        self.error = None;
        self.phase = ReviewPhase::Analyzing;
        let cancel = CancellationToken::new();
        self.in_flight = Some((self.generation, cancel.clone()));
        Ticket {
            generation: self.generation,
            purpose,
            images: self.photos.clone(),
            context,
            cancel,
        }
    }

    fn expect_phase(&self, phase: ReviewPhase, action: &str) -> Result<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(AppError::invalid_state(format!(
                "Cannot {} while {:?}",
                action, self.phase
            )))
        }
    }
}
