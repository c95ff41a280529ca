//! End-to-end generation and evaluation runs.
//!
//! Each run creates its own Maker, Copywriter and (for test runs) Judge
//! sessions and processes products strictly one after another:
//! gather context → generate → parse → describe → evaluate.

use crate::context::ContextGatherer;
use crate::error::{Result, SpecGenieError};
use crate::evaluate::Evaluator;
use crate::llm::{BackendFactory, BackendKind, ChatBackend};
use crate::parse::{extract_json, parse_sheet};
use crate::record::{EvaluationRecord, SheetOutput};
use crate::store::{PromptLang, PromptRole, SpecStore};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

fn default_number() -> u32 {
    4
}

fn default_version() -> u32 {
    2
}

/// Parameters of a scored test run over a category's ground truth.
#[derive(Debug, Clone, Deserialize)]
pub struct TestRun {
    /// Maker backend
    pub llm: BackendKind,
    pub judge: BackendKind,
    pub copywriter: BackendKind,
    pub category: u32,
    #[serde(default = "default_true")]
    pub google_search: bool,
    /// Copywriter prompt language
    #[serde(default)]
    pub lang: PromptLang,
    /// Maker prompt number
    #[serde(default = "default_number")]
    pub number: u32,
    /// Maker prompt version
    #[serde(default = "default_version")]
    pub version: u32,
}

/// Parameters of an unscored sheet generation run.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetsRun {
    pub products: Vec<String>,
    pub llm: BackendKind,
    pub copywriter: BackendKind,
    pub category: u32,
    #[serde(default = "default_true")]
    pub google_search: bool,
    #[serde(default)]
    pub lang: PromptLang,
    #[serde(default = "default_number")]
    pub number: u32,
    #[serde(default = "default_version")]
    pub version: u32,
}

/// Drives Maker, Copywriter and Judge sessions over a list of products.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn SpecStore>,
    backends: Arc<dyn BackendFactory>,
    gatherer: Arc<ContextGatherer>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn SpecStore>,
        backends: Arc<dyn BackendFactory>,
        gatherer: Arc<ContextGatherer>,
    ) -> Self {
        Self {
            store,
            backends,
            gatherer,
        }
    }

    pub fn store(&self) -> &dyn SpecStore {
        self.store.as_ref()
    }

    /// Generate, describe and score a sheet for every product in the category.
    ///
    /// Records come back in product order. Unparseable or unscorable output
    /// becomes a row with null verdicts rather than an error.
    pub async fn run_test(&self, run: &TestRun) -> Result<Vec<EvaluationRecord>> {
        let maker_prompt = self.store.get_prompt(
            PromptRole::Maker,
            run.category,
            run.number,
            run.version,
            PromptLang::En,
        )?;
        let judge_prompt = self
            .store
            .get_prompt(PromptRole::Judge, run.category, 1, 1, PromptLang::En)?;
        let copywriter_prompt = self
            .store
            .get_prompt(PromptRole::Copywriter, run.category, 1, 1, run.lang)?;
        let products = self.store.get_ground_truth(run.category)?;

        let mut maker = self.open(run.llm, PromptRole::Maker, &maker_prompt).await?;
        let mut judge = self.open(run.judge, PromptRole::Judge, &judge_prompt).await?;
        let mut copywriter = self
            .open(run.copywriter, PromptRole::Copywriter, &copywriter_prompt)
            .await?;

        let mut records = Vec::with_capacity(products.len());
        for (index, (query, truth)) in products.iter().enumerate() {
            info!(product = %query, index, total = products.len(), "Evaluating product");

            let prompt = self
                .prompt_for(query, maker.as_mut(), run.google_search)
                .await;
            let output = generate(maker.as_mut(), copywriter.as_mut(), &prompt).await;

            let record = match output {
                SheetOutput::Sheet(sheet) => {
                    match Evaluator::new(judge.as_mut()).evaluate(sheet.clone(), truth).await {
                        Ok(record) => record,
                        Err(e @ SpecGenieError::NoSharedAttributes(_)) => {
                            warn!(product = %query, error = %e, "Sheet cannot be scored");
                            EvaluationRecord::degraded(SheetOutput::Sheet(sheet), truth)
                        }
                        Err(e) => return Err(e),
                    }
                }
                raw @ SheetOutput::Raw(_) => {
                    warn!(product = %query, "Maker reply is not a JSON sheet");
                    EvaluationRecord::degraded(raw, truth)
                }
            };
            records.push(record);
        }

        info!(category = run.category, rows = records.len(), "Test run finished");
        Ok(records)
    }

    /// Generate a described sheet for each named product, without scoring.
    pub async fn generate_sheets(&self, run: &SheetsRun) -> Result<Vec<SheetOutput>> {
        let maker_prompt = self.store.get_prompt(
            PromptRole::Maker,
            run.category,
            run.number,
            run.version,
            PromptLang::En,
        )?;
        let copywriter_prompt = self
            .store
            .get_prompt(PromptRole::Copywriter, run.category, 1, 1, run.lang)?;

        let mut maker = self.open(run.llm, PromptRole::Maker, &maker_prompt).await?;
        let mut copywriter = self
            .open(run.copywriter, PromptRole::Copywriter, &copywriter_prompt)
            .await?;

        let mut sheets = Vec::with_capacity(run.products.len());
        for product in &run.products {
            info!(product = %product, "Generating sheet");
            let prompt = self
                .prompt_for(product, maker.as_mut(), run.google_search)
                .await;
            sheets.push(generate(maker.as_mut(), copywriter.as_mut(), &prompt).await);
        }
        Ok(sheets)
    }

    async fn open(
        &self,
        kind: BackendKind,
        role: PromptRole,
        system_prompt: &str,
    ) -> Result<Box<dyn ChatBackend>> {
        let mut backend = self.backends.create(kind)?;
        let reply = backend.start_session(system_prompt).await;
        if reply.is_failed() {
            warn!(%role, backend = %kind, reply = reply.text(), "Session start failed");
        }
        Ok(backend)
    }

    /// Search context for the query, or the bare query when none is usable.
    async fn prompt_for(&self, query: &str, maker: &mut dyn ChatBackend, use_search: bool) -> String {
        match self.gatherer.gather_context(query, maker, use_search).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(product = %query, error = %e, "No search context, using the bare query");
                query.to_string()
            }
        }
    }
}

/// Ask the Maker for a sheet and the Copywriter for its description.
async fn generate(
    maker: &mut dyn ChatBackend,
    copywriter: &mut dyn ChatBackend,
    prompt: &str,
) -> SheetOutput {
    let reply = maker.send_message(prompt).await;
    if reply.is_failed() {
        return SheetOutput::Raw(reply);
    }

    let mut sheet = match parse_sheet(reply.text()) {
        Ok(sheet) => sheet,
        Err(_) => return SheetOutput::Raw(reply),
    };

    let description = copywriter.send_message(extract_json(reply.text())).await;
    if description.is_failed() {
        warn!(reply = description.text(), "Copywriter failed");
    }
    sheet.insert(
        "description".to_string(),
        Value::String(description.into_text()),
    );
    SheetOutput::Sheet(sheet)
}
