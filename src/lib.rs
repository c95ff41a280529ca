//! specgenie - generate product spec sheets with LLMs and score them.
//!
//! A Maker model writes a JSON spec sheet for a product (optionally from
//! web search context), a Copywriter model adds a marketing description,
//! and the result is scored against curated ground truth twice: by fuzzy
//! string similarity over shared attributes, and by a Judge model.
//!
//! # Quick Start
//!
//! ```no_run
//! use specgenie::{
//!     config::Config,
//!     context::ContextGatherer,
//!     llm::{BackendKind, HttpBackendFactory},
//!     pipeline::{Pipeline, TestRun},
//!     store::{CatalogStore, PromptLang},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let store = CatalogStore::load(&config.catalog)?;
//!     let gatherer = ContextGatherer::from_config(&config.search)?;
//!     let pipeline = Pipeline::new(
//!         Arc::new(store),
//!         Arc::new(HttpBackendFactory::new(config.clone())),
//!         Arc::new(gatherer),
//!     );
//!
//!     let run = TestRun {
//!         llm: BackendKind::Gpt,
//!         judge: BackendKind::Gemini,
//!         copywriter: BackendKind::Gpt,
//!         category: 1,
//!         google_search: false,
//!         lang: PromptLang::En,
//!         number: 4,
//!         version: 2,
//!     };
//!
//!     for record in pipeline.run_test(&run).await? {
//!         println!("{:?}", record.similarity_score);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **llm**: `ChatBackend` sessions over Gemini and OpenAI, with retries
//!   and token budgets
//! - **context**: web search context gathering
//! - **parse**: JSON extraction from model replies
//! - **evaluate**: fuzzy similarity and judge verdicts
//! - **pipeline**: test runs and sheet generation
//! - **store**: categories, prompts and ground truth
//! - **server**: HTTP routes

pub mod config;
pub mod context;
pub mod error;
pub mod evaluate;
pub mod llm;
pub mod parse;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, SpecGenieError};
pub use evaluate::Evaluator;
pub use llm::{BackendKind, ChatBackend, Reply};
pub use pipeline::{Pipeline, SheetsRun, TestRun};
pub use record::{EvaluationRecord, SheetOutput};
pub use store::{CatalogStore, SpecStore};
