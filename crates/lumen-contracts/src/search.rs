use serde::{Deserialize, Serialize};

pub const SUMMARY_TITLE: &str = "AI Summary";
pub const SUMMARY_SOURCE: &str = "Google Gemini";
pub const WEB_FALLBACK_TITLE: &str = "Web Result";
pub const WEB_CONTENT: &str = "Source found via Google Search";
pub const NAVIGATION_MARKER: &str = "NAVIGATE:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchKind {
    Web,
    #[serde(rename = "INTERNAL")]
    InternalSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub kind: SearchKind,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl SearchResultItem {
    fn diagnostic(title: &str, content: &str) -> Self {
        Self {
            kind: SearchKind::Web,
            title: title.to_string(),
            content: content.to_string(),
            url: None,
            source: None,
        }
    }
}

/// Web source attached to a grounding chunk. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundingChunk {
    /// `None` for non-web chunks (e.g. retrieved context); those are skipped.
    pub web: Option<WebSource>,
}

/// Grounded answer as returned by the provider, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundedResponse {
    pub text: Option<String>,
    pub chunks: Vec<GroundingChunk>,
}

pub fn missing_credential_results() -> Vec<SearchResultItem> {
    vec![SearchResultItem::diagnostic(
        "API Key Missing",
        "Please add your Gemini API Key in Settings to use AI Search.",
    )]
}

pub fn search_error_results() -> Vec<SearchResultItem> {
    vec![SearchResultItem::diagnostic(
        "Search Error",
        "Could not perform search. Please check your network or API limits.",
    )]
}

/// Request text sent to the model. Navigation-looking queries are answered with a marker.
pub fn search_prompt(query: &str) -> String {
    format!(
        "Search query: \"{}\".\n\
         If this is a navigation request within the app (e.g. \"go to settings\"), \
         ignore search and return a text saying \"{NAVIGATION_MARKER} [View Name]\".\n\
         Otherwise, provide a summary of the search results.",
        query.trim()
    )
}

/// Summary first (if any), then one web item per web chunk in provider order.
pub fn normalize(response: GroundedResponse) -> Vec<SearchResultItem> {
    let mut results = Vec::with_capacity(response.chunks.len() + 1);

    if let Some(text) = response.text.filter(|text| !text.trim().is_empty()) {
        results.push(SearchResultItem {
            kind: SearchKind::InternalSummary,
            title: SUMMARY_TITLE.to_string(),
            content: text,
            url: None,
            source: Some(SUMMARY_SOURCE.to_string()),
        });
    }

    for web in response.chunks.into_iter().filter_map(|chunk| chunk.web) {
        let title = web
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string);
        results.push(SearchResultItem {
            kind: SearchKind::Web,
            title: title.clone().unwrap_or_else(|| WEB_FALLBACK_TITLE.to_string()),
            content: WEB_CONTENT.to_string(),
            url: web.uri.filter(|uri| !uri.trim().is_empty()),
            source: title,
        });
    }

    results
}
