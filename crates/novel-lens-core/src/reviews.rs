//! Review page wire shape and the helpers that turn reviews into prompt input.
//!
//! The review endpoint answers `{ success, data: [{ username, rate, comment }] }`.
//! Only reviews carrying a non-empty comment count as signal: they drive the
//! early-stop decision in the fetcher and are the only ones formatted into
//! the prompt.

use serde::Deserialize;

use crate::models::ReviewRecord;

/// One page of the review endpoint's response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewPage {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<ReviewRecord>,
}

impl ReviewPage {
    /// A page that can extend the result: successful and non-empty.
    pub fn has_items(&self) -> bool {
        self.success && !self.data.is_empty()
    }
}

pub fn has_comment(review: &ReviewRecord) -> bool {
    review.comment.as_deref().is_some_and(|c| !c.is_empty())
}

pub fn comment_bearing(reviews: &[ReviewRecord]) -> Vec<ReviewRecord> {
    reviews.iter().filter(|r| has_comment(r)).cloned().collect()
}

pub fn count_with_comments(reviews: &[ReviewRecord]) -> usize {
    reviews.iter().filter(|r| has_comment(r)).count()
}

/// Render reviews as the prompt's review block.
///
/// ```rust
/// use novel_lens_core::models::ReviewRecord;
/// use novel_lens_core::reviews::format_reviews_text;
///
/// let text = format_reviews_text(&[ReviewRecord {
///     username: None,
///     rate: 4.5,
///     comment: Some("Fun read".into()),
/// }]);
/// assert_eq!(text, "- User: Unknown\n- Rating: 4.5/5\n- Comment: Fun read");
/// ```
pub fn format_reviews_text(reviews: &[ReviewRecord]) -> String {
    reviews
        .iter()
        .map(|r| {
            format!(
                "- User: {}\n- Rating: {}/5\n- Comment: {}",
                r.username.as_deref().filter(|u| !u.is_empty()).unwrap_or("Unknown"),
                r.rate,
                r.comment.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct usernames in first-seen order.
///
/// Names are trimmed; blanks and the literal strings `null` / `undefined`
/// (which the host emits for deleted accounts) are dropped.
pub fn distinct_usernames(reviews: &[ReviewRecord]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for review in reviews {
        let Some(name) = review.username.as_deref().map(str::trim) else {
            continue;
        };
        if name.is_empty() || name == "null" || name == "undefined" {
            continue;
        }
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::review;

    #[test]
    fn test_page_parses_host_shape() {
        let page: ReviewPage = serde_json::from_str(
            r#"{"success": true, "data": [{"username": "a", "rate": 5, "comment": "x"}]}"#,
        )
        .unwrap();
        assert!(page.has_items());
        assert_eq!(page.data[0].username.as_deref(), Some("a"));
    }

    #[test]
    fn test_empty_success_page_has_no_items() {
        let page: ReviewPage = serde_json::from_str(r#"{"success": true, "data": []}"#).unwrap();
        assert!(!page.has_items());

        let page: ReviewPage = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!page.has_items());
    }

    #[test]
    fn test_count_with_comments_ignores_empty() {
        let reviews = vec![
            review(Some("a"), 5.0, Some("good")),
            review(Some("b"), 4.0, Some("")),
            review(Some("c"), 3.0, None),
        ];
        assert_eq!(count_with_comments(&reviews), 1);
    }

    #[test]
    fn test_distinct_usernames_dedups_and_filters() {
        let reviews = vec![
            review(Some(" alice "), 5.0, Some("a")),
            review(Some("alice"), 4.0, Some("b")),
            review(Some("null"), 4.0, Some("c")),
            review(None, 4.0, Some("d")),
            review(Some("bob"), 2.0, Some("e")),
        ];
        assert_eq!(distinct_usernames(&reviews), vec!["alice", "bob"]);
    }

    #[test]
    fn test_format_joins_with_blank_line() {
        let reviews = vec![
            review(Some("a"), 5.0, Some("one")),
            review(Some("b"), 2.0, Some("two")),
        ];
        let text = format_reviews_text(&reviews);
        assert_eq!(
            text,
            "- User: a\n- Rating: 5/5\n- Comment: one\n\n- User: b\n- Rating: 2/5\n- Comment: two"
        );
    }
}
