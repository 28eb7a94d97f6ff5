//! Contracts between the pipeline and whatever presents its results.
//!
//! The batch pipeline never draws anything itself. It reports through three
//! narrow traits so the same orchestration runs behind a terminal, a test
//! harness, or any other front end:
//!
//! ```text
//! ┌──────────────┐   render / processing / failed   ┌──────────────┐
//! │ Orchestrator │ ───────────────────────────────▶ │ CardRenderer │
//! │   Session    │ ─── mapping failed / no new ───▶ │   Notifier   │
//! │              │ ◀── API key or cancel ────────── │ Credential…  │
//! └──────────────┘                                  └──────────────┘
//! ```
//!
//! Terminal and in-memory implementations live in [`crate::render`].

use async_trait::async_trait;

use novel_lens_core::models::{Assessment, Card};

// ═══════════════════════════════════════════════════════════════════════
// CardRenderer
// ═══════════════════════════════════════════════════════════════════════

/// Presents per-card state.
///
/// Indicator calls for one card always come in the order
/// `show_processing` → (`render` | `show_failed`)? → `clear_indicator`,
/// except that a failed label is cleared by a timer some seconds later.
pub trait CardRenderer: Send + Sync {
    /// Show an assessment for a card, or nothing when `assessment` is `None`.
    fn render(&self, card: &Card, assessment: Option<&Assessment>);

    /// Show a transient "processing" indicator.
    fn show_processing(&self, card: &Card);

    /// Replace the card's indicator with a failure label.
    fn show_failed(&self, card: &Card, label: &str);

    /// Remove whatever indicator the card currently has.
    fn clear_indicator(&self, card: &Card);
}

// ═══════════════════════════════════════════════════════════════════════
// Notifier
// ═══════════════════════════════════════════════════════════════════════

/// Page-level messages that are not tied to a single card.
pub trait Notifier: Send + Sync {
    /// The identifier map could not be built or proved unreliable. The
    /// mapper de-duplicates calls; implementations show every one they get.
    fn mapping_failed(&self);

    /// A user-triggered run found nothing left to analyze.
    fn no_new_items(&self);
}

// ═══════════════════════════════════════════════════════════════════════
// CredentialPrompt
// ═══════════════════════════════════════════════════════════════════════

/// Captures an API key from the user when none is configured.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Ask for a key. `None` means the user cancelled.
    async fn request_api_key(&self) -> Option<String>;
}
