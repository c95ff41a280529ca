//! Building the Maker prompt from web search results.
//!
//! Result pages are fetched one by one until one fits the Maker session's
//! token ceiling. The accepted page text is wrapped in `<context>` tags
//! ahead of the product query.

mod fetch;
mod search;

pub use fetch::{FetchedPage, HttpFetcher, PageFetcher, collapse_blank_lines, html_to_text};
pub use search::{GoogleSearch, SearchItem, SearchProvider};

use crate::config::SearchConfig;
use crate::error::{Result, SpecGenieError};
use crate::llm::ChatBackend;
use std::time::Duration;
use tracing::{debug, info};

/// Results requested per search page.
pub const PAGE_SIZE: usize = 10;

/// Gathers search context for product queries.
pub struct ContextGatherer {
    search: Box<dyn SearchProvider>,
    fetcher: Box<dyn PageFetcher>,
    max_pages: usize,
}

impl ContextGatherer {
    pub fn new(search: Box<dyn SearchProvider>, fetcher: Box<dyn PageFetcher>, max_pages: usize) -> Self {
        Self {
            search,
            fetcher,
            max_pages,
        }
    }

    /// Gatherer using Google Custom Search and plain HTTP fetches.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        Ok(Self::new(
            Box::new(GoogleSearch::new(config)?),
            Box::new(HttpFetcher::new(Duration::from_secs(config.fetch_timeout_secs))?),
            config.max_pages,
        ))
    }

    /// Prompt for `query`: the query itself, or search context followed by it.
    ///
    /// With search enabled, may clear `backend`'s history so the returned
    /// prompt fits under its token ceiling.
    pub async fn gather_context(
        &self,
        query: &str,
        backend: &mut dyn ChatBackend,
        use_search: bool,
    ) -> Result<String> {
        if !use_search {
            return Ok(query.to_string());
        }

        for page in 0..self.max_pages {
            let start = 1 + page * PAGE_SIZE;
            let items = self.search.search(query, start, PAGE_SIZE).await?;
            if items.is_empty() {
                debug!(query, start, "Search returned no more results");
                return Err(SpecGenieError::ContextExhausted {
                    query: query.to_string(),
                    pages: page + 1,
                });
            }

            for item in items {
                if let Some(prompt) = self.try_candidate(query, &item, backend).await {
                    return Ok(prompt);
                }
            }
        }

        Err(SpecGenieError::ContextExhausted {
            query: query.to_string(),
            pages: self.max_pages,
        })
    }

    async fn try_candidate(
        &self,
        query: &str,
        item: &SearchItem,
        backend: &mut dyn ChatBackend,
    ) -> Option<String> {
        let page = match self.fetcher.fetch(&item.link).await {
            Ok(page) => page,
            Err(e) => {
                debug!(link = %item.link, error = %e, "Skipping result");
                return None;
            }
        };
        if page.status != 200 {
            debug!(link = %item.link, status = page.status, "Skipping result");
            return None;
        }

        let prompt = format!("<context>{}</context>\n{}", html_to_text(&page.body), query);
        let tokens = backend.count_tokens(&prompt).await;
        let max_tokens = backend.session().max_tokens();
        if tokens >= max_tokens {
            debug!(link = %item.link, tokens, max_tokens, "Context too large");
            return None;
        }

        if tokens + backend.session().tokens() >= max_tokens {
            info!(
                tokens,
                session_tokens = backend.session().tokens(),
                max_tokens,
                "Clearing session history to fit context"
            );
            backend.clear_history().await;
        }

        debug!(link = %item.link, tokens, "Using search context");
        Some(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::llm::{BackendKind, ChatSession, Reply};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed result pages; records the start offsets requested.
    struct FakeSearch {
        pages: Vec<Vec<&'static str>>,
        starts: Mutex<Vec<usize>>,
    }

    impl FakeSearch {
        fn new(pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                pages,
                starts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, _query: &str, start: usize, num: usize) -> Result<Vec<SearchItem>> {
            assert_eq!(num, PAGE_SIZE);
            self.starts.lock().unwrap().push(start);
            let page = (start - 1) / PAGE_SIZE;
            Ok(self
                .pages
                .get(page)
                .map(|links| {
                    links
                        .iter()
                        .map(|l| SearchItem {
                            link: l.to_string(),
                            title: String::new(),
                            snippet: String::new(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    struct FakeFetcher {
        pages: HashMap<&'static str, (u16, &'static str)>,
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            match self.pages.get(url) {
                Some((status, body)) => Ok(FetchedPage {
                    status: *status,
                    body: body.to_string(),
                }),
                None => Err(SpecGenieError::Http(format!("timeout fetching {}", url))),
            }
        }
    }

    /// Counts one token per character; records history clears.
    struct FakeBackend {
        session: ChatSession,
        clears: usize,
        fixed_count: Option<usize>,
    }

    impl FakeBackend {
        fn new(max_tokens: usize) -> Self {
            let config = SessionConfig {
                max_tokens,
                tokens_per_minute: 30_000,
            };
            let mut session = ChatSession::new(BackendKind::Gpt, &config);
            session.reset("system");
            Self {
                session,
                clears: 0,
                fixed_count: None,
            }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        fn session(&self) -> &ChatSession {
            &self.session
        }

        async fn start_session(&mut self, system_prompt: &str) -> Reply {
            self.session.reset(system_prompt);
            Reply::Message(String::new())
        }

        async fn send_message(&mut self, text: &str) -> Reply {
            Reply::Message(text.to_string())
        }

        async fn count_tokens(&self, text: &str) -> usize {
            self.fixed_count.unwrap_or(text.len())
        }

        async fn clear_history(&mut self) {
            self.clears += 1;
            self.session.reset("system");
        }
    }

    fn gatherer(
        pages: Vec<Vec<&'static str>>,
        fetched: Vec<(&'static str, (u16, &'static str))>,
        max_pages: usize,
    ) -> ContextGatherer {
        ContextGatherer::new(
            Box::new(FakeSearch::new(pages)),
            Box::new(FakeFetcher {
                pages: fetched.into_iter().collect(),
            }),
            max_pages,
        )
    }

    #[tokio::test]
    async fn test_without_search_returns_query() {
        let gatherer = gatherer(vec![], vec![], 5);
        let mut backend = FakeBackend::new(100);

        let prompt = gatherer.gather_context("Acme 42", &mut backend, false).await.unwrap();

        assert_eq!(prompt, "Acme 42");
    }

    #[tokio::test]
    async fn test_skips_failed_and_non_200_results() {
        let gatherer = gatherer(
            vec![vec!["https://down", "https://missing", "https://ok"]],
            vec![
                ("https://missing", (404, "<p>gone</p>")),
                ("https://ok", (200, "<p>Voltage: 5V</p>")),
            ],
            5,
        );
        let mut backend = FakeBackend::new(10_000);

        let prompt = gatherer.gather_context("Acme 42", &mut backend, true).await.unwrap();

        assert_eq!(prompt, "<context>Voltage: 5V</context>\nAcme 42");
        assert_eq!(backend.clears, 0);
    }

    #[tokio::test]
    async fn test_skips_oversized_pages_and_pages_forward() {
        let search = FakeSearch::new(vec![vec!["https://huge"], vec!["https://small"]]);
        let gatherer = ContextGatherer::new(
            Box::new(search),
            Box::new(FakeFetcher {
                pages: [
                    ("https://huge", (200, "<p>aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa</p>")),
                    ("https://small", (200, "<p>5V</p>")),
                ]
                .into_iter()
                .collect(),
            }),
            5,
        );
        let mut backend = FakeBackend::new(60);

        let prompt = gatherer.gather_context("Acme 42", &mut backend, true).await.unwrap();

        assert_eq!(prompt, "<context>5V</context>\nAcme 42");
    }

    #[tokio::test]
    async fn test_clears_history_when_budget_would_overflow() {
        let gatherer = gatherer(
            vec![vec!["https://ok"]],
            vec![("https://ok", (200, "<p>Voltage: 5V</p>"))],
            5,
        );
        let mut backend = FakeBackend::new(100);
        backend.fixed_count = Some(10);
        backend.session.add_tokens(95);

        let prompt = gatherer.gather_context("Acme 42", &mut backend, true).await;

        assert!(prompt.is_ok());
        assert_eq!(backend.clears, 1);
        assert_eq!(backend.session.tokens(), 0);
    }

    #[tokio::test]
    async fn test_keeps_history_when_budget_fits() {
        let gatherer = gatherer(
            vec![vec!["https://ok"]],
            vec![("https://ok", (200, "<p>Voltage: 5V</p>"))],
            5,
        );
        let mut backend = FakeBackend::new(100);
        backend.fixed_count = Some(10);
        backend.session.add_tokens(89);

        gatherer.gather_context("Acme 42", &mut backend, true).await.unwrap();

        assert_eq!(backend.clears, 0);
    }

    #[tokio::test]
    async fn test_empty_page_ends_search() {
        let gatherer = gatherer(vec![vec!["https://down"]], vec![], 5);
        let mut backend = FakeBackend::new(100);

        let err = gatherer
            .gather_context("Acme 42", &mut backend, true)
            .await
            .unwrap_err();

        assert!(matches!(err, SpecGenieError::ContextExhausted { pages: 2, .. }));
    }

    #[tokio::test]
    async fn test_page_limit_ends_search() {
        let search = FakeSearch::new(vec![vec!["https://a"]; 10]);
        let gatherer = ContextGatherer::new(
            Box::new(search),
            Box::new(FakeFetcher {
                pages: HashMap::new(),
            }),
            3,
        );
        let mut backend = FakeBackend::new(100);

        let err = gatherer
            .gather_context("Acme 42", &mut backend, true)
            .await
            .unwrap_err();

        assert!(matches!(err, SpecGenieError::ContextExhausted { pages: 3, .. }));
    }
}
