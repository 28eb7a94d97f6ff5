//! Natural-language instruction for a batch analysis request.
//!
//! The prompt embeds the full serialized snapshot list together with the
//! category definitions. The response shape itself is enforced separately
//! through [`crate::schema::response_schema`].

use crate::models::NovelSnapshot;

const INSTRUCTIONS: &str = r#"Analyze the following list of novels. For each novel, use its title, view count, reader count, rating, genres, description, and user reviews to provide a comprehensive assessment across multiple categories.
Return a single JSON array. Each object in the array must correspond to a novel in the input list, maintaining the original order.

For each novel, provide:
1. A novel summary: A concise 2-3 sentence summary of what the novel is about, based primarily on the title, description, genres, and user reviews.
2. A review summary: A balanced summary of user feedback from the reviews, including positive and negative points, with proper attribution to usernames (e.g., "According to [User], ..."). Use EXACT usernames from the availableUsernames list when making attributions.

Then provide detailed assessments in the following categories:
- Overall assessment (Good/Mixed/Bad)
- Character Development (Good/Mixed/Bad/Unknown)
- Plot Structure (Good/Mixed/Bad/Unknown)
- World-Building (Good/Mixed/Bad/Unknown)
- Themes & Messages (Good/Mixed/Bad/Unknown)
- Writing Style (Good/Mixed/Bad/Unknown)

For each category, include specific criteria:
- Character Development: character depth, growth, consistency, dialogue authenticity, relationship dynamics
- Plot Structure: pacing, narrative flow, story coherence, conflict resolution, foreshadowing
- World-Building: setting details, consistency, immersion, cultural depth, originality
- Themes & Messages: clarity, relevance, integration, thought provocation, balance
- Writing Style: prose quality, descriptive language, dialogue naturalness, grammar, technical execution

CRITICAL: Each category can be rated as "Unknown" when:
- Character Development: No character development information found in available data
- Plot Structure: No plot structure information found in available data
- World-Building: No world-building details found in available data
- Themes & Messages: No theme or message information found in available data
- Writing Style: No writing style information found in available data

Important distinctions:
- "Unknown" means: insufficient data to make a reliable assessment for that specific aspect
- "Bad" means: poor quality or problematic implementation of that aspect
- Use "Unknown" when data is genuinely missing or insufficient, NOT when quality is poor"#;

/// Build the instruction text for a batch of snapshots.
pub fn build_prompt(snapshots: &[NovelSnapshot]) -> Result<String, serde_json::Error> {
    let list = serde_json::to_string_pretty(snapshots)?;
    Ok(format!("{}\n\nNovels List:\n{}\n", INSTRUCTIONS, list))
}
