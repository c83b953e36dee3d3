//! SEO scoring: aggregates per-page signals from a crawl into a numeric
//! score and an issue list.

use crate::crawler::Page;
use crate::models::Issue;

const PENALTY_MISSING_TITLE: i64 = 20;
const PENALTY_SHORT_TITLE: i64 = 10;
const PENALTY_MISSING_META: i64 = 20;
const PENALTY_SHORT_META: i64 = 10;
const PENALTY_THIN_CONTENT: i64 = 15;

const MIN_TITLE_LEN: usize = 30;
const MIN_META_LEN: usize = 70;
const MIN_WORD_COUNT: i64 = 300;

/// Score and issue list for one completed crawl.
pub struct AnalysisResult {
    pub score: f64,
    pub issues: Vec<Issue>,
}

/// Scores each page independently, then averages for the audit-level score.
pub fn analyze(pages: &[Page]) -> AnalysisResult {
    if pages.is_empty() {
        return AnalysisResult { score: 0.0, issues: Vec::new() };
    }

    let mut issues = Vec::new();
    let mut total = 0i64;

    for page in pages {
        let (page_score, mut page_issues) = score_page(page);
        total += page_score;
        issues.append(&mut page_issues);
    }

    let score = total as f64 / pages.len() as f64;
    AnalysisResult { score, issues }
}

fn score_page(page: &Page) -> (i64, Vec<Issue>) {
    let mut score = 100i64;
    let mut issues = Vec::new();

    // Two independent checks, not an if/else: a missing title (treated as
    // an empty string) also fails the minimum-length check, so both
    // penalties apply together.
    let title = page.title.as_deref().unwrap_or("").trim();
    if title.is_empty() {
        score -= PENALTY_MISSING_TITLE;
        issues.push(Issue {
            kind: "missing_title".to_string(),
            severity: "high".to_string(),
            penalty: PENALTY_MISSING_TITLE,
            message: "Missing title".to_string(),
            page_url: page.url.clone(),
        });
    }
    if title.chars().count() < MIN_TITLE_LEN {
        score -= PENALTY_SHORT_TITLE;
        issues.push(Issue {
            kind: "short_title".to_string(),
            severity: "medium".to_string(),
            penalty: PENALTY_SHORT_TITLE,
            message: format!("Title too short (recommended {MIN_TITLE_LEN}+ characters)"),
            page_url: page.url.clone(),
        });
    }

    let meta = page.meta_description.as_deref().unwrap_or("").trim();
    if meta.is_empty() {
        score -= PENALTY_MISSING_META;
        issues.push(Issue {
            kind: "missing_meta_description".to_string(),
            severity: "high".to_string(),
            penalty: PENALTY_MISSING_META,
            message: "Missing meta description".to_string(),
            page_url: page.url.clone(),
        });
    } else if meta.chars().count() < MIN_META_LEN {
        score -= PENALTY_SHORT_META;
        issues.push(Issue {
            kind: "short_meta_description".to_string(),
            severity: "medium".to_string(),
            penalty: PENALTY_SHORT_META,
            message: format!("Meta description too short (recommended {MIN_META_LEN}+ characters)"),
            page_url: page.url.clone(),
        });
    }

    if page.word_count < MIN_WORD_COUNT {
        score -= PENALTY_THIN_CONTENT;
        issues.push(Issue {
            kind: "thin_content".to_string(),
            severity: "medium".to_string(),
            penalty: PENALTY_THIN_CONTENT,
            message: format!("Word count below recommended {MIN_WORD_COUNT}"),
            page_url: page.url.clone(),
        });
    }

    (score.clamp(0, 100), issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_page(url: &str) -> Page {
        Page {
            url: url.to_string(),
            title: None,
            meta_description: None,
            h1: vec![],
            h2: vec![],
            images: vec![],
            links: vec![],
            word_count: 0,
            load_time_ms: 0,
            status_code: 200,
        }
    }

    #[test]
    fn empty_title_and_thin_content_scores_55() {
        let mut page = blank_page("https://e.test");
        page.title = Some(String::new());
        page.meta_description = Some("D".repeat(80));
        page.word_count = 120;
        let result = analyze(&[page]);
        assert_eq!(result.score, 55.0);
        assert_eq!(result.issues.len(), 3);
    }

    #[test]
    fn score_never_drops_below_zero() {
        let page = blank_page("https://e.test");
        let result = analyze(&[page]);
        assert!(result.score >= 0.0);
    }

    #[test]
    fn multi_page_audit_averages_scores() {
        let mut good = blank_page("https://e.test/a");
        good.title = Some("A".repeat(40));
        good.meta_description = Some("B".repeat(80));
        good.word_count = 500;

        let bad = blank_page("https://e.test/b");

        let result = analyze(&[good, bad]);
        assert_eq!(result.score, 67.5);
    }

    #[test]
    fn empty_page_list_scores_zero() {
        let result = analyze(&[]);
        assert_eq!(result.score, 0.0);
        assert!(result.issues.is_empty());
    }
}
