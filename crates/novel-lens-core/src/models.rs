//! Core data models used throughout Novel Lens.
//!
//! These types represent the listing cards, community reviews, analysis
//! snapshots, and assessment records that flow through the batch pipeline.
//! Wire names follow the host site and the generative endpoint (camelCase
//! for everything that is serialized into a prompt or the cache).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::reviews::{comment_bearing, distinct_usernames, format_reviews_text};

/// A listing card as scraped from the page markup.
///
/// `raw_id` is the host-assigned per-card identifier (`data-novel-id`); it is
/// not usable for review or detail API calls until it has been resolved to a
/// canonical id through the identifier map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Card {
    pub raw_id: Option<String>,
    pub href: Option<String>,
    pub title: String,
    pub total_views: u64,
    pub total_readers: u64,
    pub rating: f64,
    pub genres: Vec<String>,
    pub description: String,
}

impl Card {
    /// Short human label used in logs and terminal output.
    pub fn label(&self) -> String {
        match &self.raw_id {
            Some(raw) => format!("{} [{}]", self.title, raw),
            None => self.title.clone(),
        }
    }
}

/// A single community review as returned by the review endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(default)]
    pub username: Option<String>,
    /// Star rating, 0–5.
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Per-novel input bundle sent to the analysis endpoint.
///
/// Built once per uncached card per batch attempt and discarded once the
/// response has been applied or the attempt has failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NovelSnapshot {
    pub serie_id: String,
    pub title: String,
    pub total_views: u64,
    pub total_readers: u64,
    pub rating: f64,
    pub genres: Vec<String>,
    pub description: String,
    pub reviews_text: String,
    pub available_usernames: Vec<String>,
}

impl NovelSnapshot {
    /// Assemble a snapshot from a scraped card and its fetched reviews.
    ///
    /// Only reviews with a non-empty comment contribute to the review text
    /// and to the list of usernames eligible for highlighting.
    pub fn assemble(canonical_id: &str, card: &Card, reviews: &[ReviewRecord]) -> Self {
        let with_comments = comment_bearing(reviews);
        Self {
            serie_id: canonical_id.to_string(),
            title: card.title.clone(),
            total_views: card.total_views,
            total_readers: card.total_readers,
            rating: card.rating,
            genres: card.genres.clone(),
            description: card.description.clone(),
            reviews_text: format_reviews_text(&with_comments),
            available_usernames: distinct_usernames(&with_comments),
        }
    }
}

/// Overall verdict for a novel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Verdict {
    Good,
    Mixed,
    Bad,
}

/// Rating within one assessment category.
///
/// `Unknown` means the available data was insufficient to judge that aspect;
/// it is a legal value inside a category, not a category of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum CategoryRating {
    Good,
    Mixed,
    Bad,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Good => "Good",
            Verdict::Mixed => "Mixed",
            Verdict::Bad => "Bad",
        }
    }
}

impl CategoryRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryRating::Good => "Good",
            CategoryRating::Mixed => "Mixed",
            CategoryRating::Bad => "Bad",
            CategoryRating::Unknown => "Unknown",
        }
    }
}

/// Structured assessment of one novel, as produced by the analysis endpoint.
///
/// The field set doubles as the output schema sent with every analysis
/// request (see [`crate::schema::response_schema`]); `available_usernames`
/// is filled in locally and is not part of that schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    /// A concise 2-3 sentence summary of what the novel is about.
    pub novel_summary: String,
    /// A balanced summary of user feedback with proper username attribution.
    pub review_summary: String,
    pub assessment: Verdict,
    /// A brief 2-3 sentence summary explaining the overall assessment.
    pub summary: String,
    pub character_development: CategoryRating,
    pub plot_structure: CategoryRating,
    pub world_building: CategoryRating,
    pub themes_and_messages: CategoryRating,
    pub writing_style: CategoryRating,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(skip)]
    pub available_usernames: Vec<String>,
}

impl Assessment {
    /// The five category ratings in display order.
    pub fn categories(&self) -> [(&'static str, CategoryRating); 5] {
        [
            ("Character Development", self.character_development),
            ("Plot Structure", self.plot_structure),
            ("World-Building", self.world_building),
            ("Themes & Messages", self.themes_and_messages),
            ("Writing Style", self.writing_style),
        ]
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn assessment(verdict: Verdict) -> Assessment {
        Assessment {
            novel_summary: "A cultivator climbs a mountain.".into(),
            review_summary: "According to Reader1, the pacing is brisk.".into(),
            assessment: verdict,
            summary: "Solid execution overall.".into(),
            character_development: CategoryRating::Good,
            plot_structure: CategoryRating::Mixed,
            world_building: CategoryRating::Unknown,
            themes_and_messages: CategoryRating::Bad,
            writing_style: CategoryRating::Good,
            available_usernames: Vec::new(),
        }
    }

    pub fn review(username: Option<&str>, rate: f64, comment: Option<&str>) -> ReviewRecord {
        ReviewRecord {
            username: username.map(str::to_string),
            rate,
            comment: comment.map(str::to_string),
        }
    }
}
