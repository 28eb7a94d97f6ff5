//! Terminal and in-memory implementations of the presentation contracts.
//!
//! Command output goes to **stdout**: either human-readable blocks or one
//! JSON object per line (`--json`) so scripts can consume it. Logs stay on
//! stderr via `tracing`.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use novel_lens_core::models::{Assessment, Card};

use crate::traits::{CardRenderer, CredentialPrompt, Notifier};

/// Output mode for the CLI: human text or JSON lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderMode {
    Human,
    Json,
}

impl RenderMode {
    pub fn from_flag(json: bool) -> Self {
        if json {
            RenderMode::Json
        } else {
            RenderMode::Human
        }
    }

    pub fn renderer(&self) -> Arc<dyn CardRenderer> {
        match self {
            RenderMode::Human => Arc::new(HumanRenderer),
            RenderMode::Json => Arc::new(JsonRenderer),
        }
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::new(TerminalNotifier { mode: *self })
    }
}

fn emit(line: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", line);
    let _ = out.flush();
}

// ═══════════════════════════════════════════════════════════════════════
// Human
// ═══════════════════════════════════════════════════════════════════════

/// Human-friendly card output.
pub struct HumanRenderer;

impl CardRenderer for HumanRenderer {
    fn render(&self, card: &Card, assessment: Option<&Assessment>) {
        let Some(a) = assessment else {
            emit(&format!("{}  (not analyzed)", card.label()));
            return;
        };
        let mut text = format!(
            "{}  [{}]\n  {}\n  Novel: {}\n  Reviews: {}\n",
            card.label(),
            a.assessment.as_str(),
            a.summary,
            a.novel_summary,
            a.review_summary
        );
        for (name, rating) in a.categories() {
            text.push_str(&format!("  {:<22} {}\n", name, rating.as_str()));
        }
        if !a.available_usernames.is_empty() {
            text.push_str(&format!("  Reviewers: {}\n", a.available_usernames.join(", ")));
        }
        emit(text.trim_end());
    }

    fn show_processing(&self, card: &Card) {
        emit(&format!("{}  analyzing...", card.label()));
    }

    fn show_failed(&self, card: &Card, label: &str) {
        emit(&format!("{}  {}", card.label(), label));
    }

    fn clear_indicator(&self, _card: &Card) {}
}

// ═══════════════════════════════════════════════════════════════════════
// JSON lines
// ═══════════════════════════════════════════════════════════════════════

/// Machine-readable card output: one JSON object per line.
pub struct JsonRenderer;

impl CardRenderer for JsonRenderer {
    fn render(&self, card: &Card, assessment: Option<&Assessment>) {
        let obj = json!({
            "event": "render",
            "rawId": card.raw_id,
            "title": card.title,
            "assessment": assessment,
        });
        emit(&obj.to_string());
    }

    fn show_processing(&self, card: &Card) {
        emit(&json!({ "event": "processing", "rawId": card.raw_id }).to_string());
    }

    fn show_failed(&self, card: &Card, label: &str) {
        emit(&json!({ "event": "failed", "rawId": card.raw_id, "label": label }).to_string());
    }

    fn clear_indicator(&self, card: &Card) {
        emit(&json!({ "event": "cleared", "rawId": card.raw_id }).to_string());
    }
}

/// Page-level messages in the selected output mode.
pub struct TerminalNotifier {
    mode: RenderMode,
}

impl Notifier for TerminalNotifier {
    fn mapping_failed(&self) {
        match self.mode {
            RenderMode::Human => emit(
                "Serie ID mapping failed: unable to map novel IDs correctly. \
                 Reload the page to retry.",
            ),
            RenderMode::Json => emit(&json!({ "event": "mapping_failed" }).to_string()),
        }
    }

    fn no_new_items(&self) {
        match self.mode {
            RenderMode::Human => emit("No new novels to analyze."),
            RenderMode::Json => emit(&json!({ "event": "no_new_items" }).to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Credentials
// ═══════════════════════════════════════════════════════════════════════

/// Reads an API key from stdin. An empty line or EOF cancels.
///
/// When stdin is not a terminal the prompt cancels immediately instead of
/// blocking a script.
pub struct StdinCredentialPrompt;

#[async_trait]
impl CredentialPrompt for StdinCredentialPrompt {
    async fn request_api_key(&self) -> Option<String> {
        if !atty::is(atty::Stream::Stdin) {
            return None;
        }
        let line = tokio::task::spawn_blocking(|| {
            eprint!("Gemini API key (empty to cancel): ");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok()?;
            Some(line)
        })
        .await
        .ok()
        .flatten()?;
        Some(line.trim().to_string()).filter(|k| !k.is_empty())
    }
}

/// Answers every prompt with the same value.
pub struct FixedCredential(pub Option<String>);

#[async_trait]
impl CredentialPrompt for FixedCredential {
    async fn request_api_key(&self) -> Option<String> {
        self.0.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Recording (embedding and tests)
// ═══════════════════════════════════════════════════════════════════════

/// One call received by a [`RecordingRenderer`] or [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Rendered { raw_id: Option<String>, assessment: Option<Assessment> },
    Processing { raw_id: Option<String> },
    Failed { raw_id: Option<String>, label: String },
    Cleared { raw_id: Option<String> },
    MappingFailed,
    NoNewItems,
}

/// Collects every call in order.
#[derive(Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Raw ids whose indicator is still showing (processing or failed).
    pub fn active_indicators(&self) -> Vec<String> {
        let mut active: Vec<String> = Vec::new();
        for event in self.events() {
            match event {
                UiEvent::Processing { raw_id: Some(id) } | UiEvent::Failed { raw_id: Some(id), .. } => {
                    if !active.contains(&id) {
                        active.push(id);
                    }
                }
                UiEvent::Cleared { raw_id: Some(id) } => active.retain(|a| a != &id),
                _ => {}
            }
        }
        active
    }

    fn push(&self, event: UiEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl CardRenderer for RecordingRenderer {
    fn render(&self, card: &Card, assessment: Option<&Assessment>) {
        self.push(UiEvent::Rendered {
            raw_id: card.raw_id.clone(),
            assessment: assessment.cloned(),
        });
    }

    fn show_processing(&self, card: &Card) {
        self.push(UiEvent::Processing { raw_id: card.raw_id.clone() });
    }

    fn show_failed(&self, card: &Card, label: &str) {
        self.push(UiEvent::Failed {
            raw_id: card.raw_id.clone(),
            label: label.to_string(),
        });
    }

    fn clear_indicator(&self, card: &Card) {
        self.push(UiEvent::Cleared { raw_id: card.raw_id.clone() });
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn mapping_failures(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == UiEvent::MappingFailed)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn mapping_failed(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.push(UiEvent::MappingFailed);
        }
    }

    fn no_new_items(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.push(UiEvent::NoNewItems);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(raw: &str) -> Card {
        Card {
            raw_id: Some(raw.into()),
            title: raw.to_uppercase(),
            ..Default::default()
        }
    }

    #[test]
    fn test_active_indicators_follow_clear_calls() {
        let r = RecordingRenderer::new();
        r.show_processing(&card("a"));
        r.show_processing(&card("b"));
        r.clear_indicator(&card("a"));
        r.show_failed(&card("b"), "Processing Failed");
        assert_eq!(r.active_indicators(), vec!["b".to_string()]);
        r.clear_indicator(&card("b"));
        assert!(r.active_indicators().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_credential() {
        assert_eq!(FixedCredential(None).request_api_key().await, None);
        assert_eq!(
            FixedCredential(Some("k".into())).request_api_key().await.as_deref(),
            Some("k")
        );
    }
}
