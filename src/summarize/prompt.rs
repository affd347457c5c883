//! The one prompt/response contract shared by every provider.

use crate::ingest::types::CandidateItem;
use crate::summarize::Category;

/// Per-article content cap inside a batch prompt (chars).
pub const MAX_CONTENT_CHARS: usize = 12_000;
pub const MAX_TITLE_KO_CHARS: usize = 100;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes developer content in Korean. \
You always answer with a single valid JSON array and nothing else.";

/// A rendered request: system instruction, user message, and the batch urls in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub urls: Vec<String>,
}

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the batch prompt. Articles are numbered from 1 and must come back in the same order.
pub fn build_batch_prompt(items: &[CandidateItem]) -> Prompt {
    let mut articles = String::new();
    for (i, item) in items.iter().enumerate() {
        let content: String = item.raw_body.chars().take(MAX_CONTENT_CHARS).collect();
        let tags = item
            .source_tags
            .iter()
            .take(10)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        articles.push_str(&format!(
            "Article {n}:\nTitle: {title}\nURL: {url}\nSource: {source}\nTags: {tags}\nContent: {content}\n\n",
            n = i + 1,
            title = item.raw_title,
            url = item.url,
            source = item.source,
        ));
    }

    let user = format!(
        r#"Summarize and categorize these {count} developer articles in Korean.

{articles}For EACH article return a JSON object with:
1. "url": the article URL exactly as given (used to match results back)
2. "is_technical": true if a developer building software would find it useful or interesting
   (tutorials, architecture, tools, frameworks, tech opinions, dev-tool startups, career advice);
   false for pure politics, non-tech business, consumer gadgets or drama without technical merit
3. "title_ko": a concise Korean title (max {title_max} characters)
4. "summary_ko": a comprehensive Korean summary in Markdown that covers the whole article,
   keeps the original section order and headings, and includes key technical details
5. "category": exactly one of: {categories}
6. "tags": 3-5 short lowercase tags, no spaces (use hyphens)

Return a JSON array with {count} objects in the SAME ORDER as the articles above.
Escape newlines inside strings as \n and quotes as \". Return ONLY the JSON array."#,
        count = items.len(),
        articles = articles,
        title_max = MAX_TITLE_KO_CHARS,
        categories = category_list(),
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
        urls: items.iter().map(|i| i.url.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Source;
    use chrono::Utc;

    fn item(url: &str, body: &str) -> CandidateItem {
        CandidateItem {
            source: Source::Devto,
            external_id: url.into(),
            url: url.into(),
            raw_title: format!("Title for {url}"),
            raw_body: body.into(),
            published_at: Utc::now(),
            engagement_count: 1,
            comment_count: 0,
            source_tags: vec!["rust".into()],
        }
    }

    #[test]
    fn prompt_lists_articles_in_order_with_all_categories() {
        let p = build_batch_prompt(&[item("https://a.dev/1", "one"), item("https://a.dev/2", "two")]);
        let first = p.user.find("https://a.dev/1").unwrap();
        let second = p.user.find("https://a.dev/2").unwrap();
        assert!(first < second);
        assert!(p.user.contains("these 2 developer articles"));
        for c in Category::ALL {
            assert!(p.user.contains(c.as_str()));
        }
        assert_eq!(p.urls, vec!["https://a.dev/1", "https://a.dev/2"]);
        assert_eq!(p.system, SYSTEM_PROMPT);
    }

    #[test]
    fn long_content_is_capped() {
        let body = "x".repeat(MAX_CONTENT_CHARS + 500);
        let p = build_batch_prompt(&[item("https://a.dev/1", &body)]);
        assert!(!p.user.contains(&"x".repeat(MAX_CONTENT_CHARS + 1)));
    }
}
