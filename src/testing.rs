//! Scripted backends and a small catalog shared by the unit tests.

use crate::config::SessionConfig;
use crate::context::{ContextGatherer, FetchedPage, PageFetcher, SearchItem, SearchProvider};
use crate::error::{Result, SpecGenieError};
use crate::llm::{BackendFactory, BackendKind, ChatBackend, ChatSession, Reply};
use crate::pipeline::Pipeline;
use crate::store::CatalogStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const CATALOG: &str = r#"
categories:
  - id: 1
    name: Widgets
prompts:
  - {category: 1, role: Maker, number: 4, version: 2, content: "maker prompt"}
  - {category: 1, role: Judge, number: 1, version: 1, content: "judge prompt"}
  - {category: 1, role: Copywriter, number: 1, version: 1, content: "copy prompt"}
products:
  - category: 1
    name: WidgetX
    brand: Acme
    part_number: "42"
    attributes:
      voltage: 5V
  - category: 1
    name: WidgetY
    brand: Acme
    part_number: "43"
    attributes:
      voltage: 12V
"#;

/// Replies popped from a shared queue; `{}` once the queue runs dry.
pub struct ScriptedBackend {
    session: ChatSession,
    replies: Arc<Mutex<VecDeque<Reply>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn session(&self) -> &ChatSession {
        &self.session
    }

    async fn start_session(&mut self, system_prompt: &str) -> Reply {
        self.session.reset(system_prompt);
        Reply::Message(String::new())
    }

    async fn send_message(&mut self, text: &str) -> Reply {
        self.sent.lock().unwrap().push(text.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Message("{}".to_string()))
    }

    async fn count_tokens(&self, text: &str) -> usize {
        text.len()
    }

    async fn clear_history(&mut self) {}
}

/// Reply queue and message log shared by every backend built from it.
#[derive(Default)]
pub struct Script {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Script {
    pub fn push(&self, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Message(reply.to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

/// Gemini backends follow the `maker` script, GPT backends the `helper`
/// script (judge and copywriter share it, in call order).
#[derive(Default)]
pub struct ScriptedFactory {
    pub maker: Script,
    pub helper: Script,
}

impl BackendFactory for ScriptedFactory {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn ChatBackend>> {
        let script = match kind {
            BackendKind::Gemini => &self.maker,
            BackendKind::Gpt => &self.helper,
        };
        Ok(Box::new(ScriptedBackend {
            session: ChatSession::new(kind, &SessionConfig::default()),
            replies: script.replies.clone(),
            sent: script.sent.clone(),
        }))
    }
}

/// Search that never finds anything.
pub struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn search(&self, _query: &str, _start: usize, _num: usize) -> Result<Vec<SearchItem>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl PageFetcher for NoSearch {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        Err(SpecGenieError::Http(format!("unexpected fetch of {}", url)))
    }
}

/// Pipeline over [`CATALOG`] with scripted backends and no search results.
pub fn pipeline(factory: Arc<ScriptedFactory>) -> Pipeline {
    let store = CatalogStore::from_yaml(CATALOG).unwrap();
    let gatherer = ContextGatherer::new(Box::new(NoSearch), Box::new(NoSearch), 1);
    Pipeline::new(Arc::new(store), factory, Arc::new(gatherer))
}
