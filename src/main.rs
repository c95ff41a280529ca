//! specgenie CLI
//!
//! Generates product spec sheets with LLMs and scores them against ground truth.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use specgenie::{
    config::Config,
    context::ContextGatherer,
    llm::{BackendKind, HttpBackendFactory, create_backend},
    pipeline::{Pipeline, SheetsRun, TestRun},
    server::run_server,
    store::{CatalogStore, PromptLang, PromptRole, SpecStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// specgenie - LLM spec sheet generation and evaluation
#[derive(Parser)]
#[command(name = "specgenie")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Catalog file (overrides config and SPECGENIE_CATALOG)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Generate and score sheets for every product in a category
    Test {
        /// Maker backend (gemini or gpt)
        #[arg(long)]
        llm: BackendKind,

        /// Judge backend
        #[arg(long)]
        judge: BackendKind,

        /// Copywriter backend
        #[arg(long)]
        copywriter: BackendKind,

        /// Category id
        #[arg(long)]
        category: u32,

        /// Skip web search and send bare product names
        #[arg(long)]
        no_search: bool,

        /// Copywriter language (en or es)
        #[arg(long, default_value = "en")]
        lang: PromptLang,

        /// Maker prompt number
        #[arg(long, default_value_t = 4)]
        number: u32,

        /// Maker prompt version
        #[arg(long, default_value_t = 2)]
        prompt_version: u32,

        /// Save results to JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate sheets for the named products without scoring
    Sheets {
        /// Product names (brand + part number)
        #[arg(required = true)]
        products: Vec<String>,

        #[arg(long)]
        llm: BackendKind,

        #[arg(long)]
        copywriter: BackendKind,

        #[arg(long)]
        category: u32,

        #[arg(long)]
        no_search: bool,

        #[arg(long, default_value = "en")]
        lang: PromptLang,

        #[arg(long, default_value_t = 4)]
        number: u32,

        #[arg(long, default_value_t = 2)]
        prompt_version: u32,
    },

    /// List categories
    Categories,

    /// List prompts for a role (Maker, Judge or Copywriter)
    Prompts {
        #[arg(long)]
        role: PromptRole,
    },

    /// Test backend connection
    Check {
        #[arg(long)]
        llm: BackendKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "specgenie=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(catalog) = cli.catalog {
        config.catalog = catalog;
    }
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.addr.clone());
            let pipeline = build_pipeline(&config)?;
            run_server(pipeline, &addr).await
        }
        Commands::Test {
            llm,
            judge,
            copywriter,
            category,
            no_search,
            lang,
            number,
            prompt_version,
            output,
        } => {
            let run = TestRun {
                llm,
                judge,
                copywriter,
                category,
                google_search: !no_search,
                lang,
                number,
                version: prompt_version,
            };
            cmd_test(&config, run, output).await
        }
        Commands::Sheets {
            products,
            llm,
            copywriter,
            category,
            no_search,
            lang,
            number,
            prompt_version,
        } => {
            let run = SheetsRun {
                products,
                llm,
                copywriter,
                category,
                google_search: !no_search,
                lang,
                number,
                version: prompt_version,
            };
            cmd_sheets(&config, run).await
        }
        Commands::Categories => cmd_categories(&config),
        Commands::Prompts { role } => cmd_prompts(&config, role),
        Commands::Check { llm } => cmd_check(&config, llm).await,
    }
}

fn load_store(config: &Config) -> Result<CatalogStore> {
    CatalogStore::load(&config.catalog)
        .with_context(|| format!("Failed to load catalog from {}", config.catalog.display()))
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let store = load_store(config)?;
    let gatherer =
        ContextGatherer::from_config(&config.search).context("Failed to set up web search")?;
    Ok(Pipeline::new(
        Arc::new(store),
        Arc::new(HttpBackendFactory::new(config.clone())),
        Arc::new(gatherer),
    ))
}

async fn cmd_test(config: &Config, run: TestRun, output: Option<PathBuf>) -> Result<()> {
    if run.google_search {
        config.validate_search()?;
    }
    let pipeline = build_pipeline(config)?;

    let start = Instant::now();
    let records = pipeline.run_test(&run).await.context("Test run failed")?;

    println!("Results:");
    println!("{}", "─".repeat(60));
    for (i, record) in records.iter().enumerate() {
        let name = record
            .ground_truth
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let verdict = record
            .similarity_score
            .verdict
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unscored".to_string());
        let score = record
            .similarity_score
            .score
            .map(|s| format!("{:.1}", s))
            .unwrap_or_else(|| "-".to_string());
        let judge = record.llm_evaluation.verdict.as_deref().unwrap_or("-");
        println!("{:>2}. {:<30} {:<22} {:>6}  judge: {}", i, name, verdict, score, judge);
    }
    println!("{}", "─".repeat(60));
    println!("Evaluated {} products in {:.2?}", records.len(), start.elapsed());

    if let Some(path) = output {
        let rows: std::collections::BTreeMap<usize, _> = records.iter().enumerate().collect();
        let json = serde_json::to_string_pretty(&rows)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Results saved to: {}", path.display());
    }

    Ok(())
}

async fn cmd_sheets(config: &Config, run: SheetsRun) -> Result<()> {
    if run.google_search {
        config.validate_search()?;
    }
    let pipeline = build_pipeline(config)?;
    let sheets = pipeline
        .generate_sheets(&run)
        .await
        .context("Sheet generation failed")?;
    println!("{}", serde_json::to_string_pretty(&sheets)?);
    Ok(())
}

fn cmd_categories(config: &Config) -> Result<()> {
    let store = load_store(config)?;
    for category in store.list_categories() {
        println!("{:>4}  {}", category.id, category.name);
    }
    Ok(())
}

fn cmd_prompts(config: &Config, role: PromptRole) -> Result<()> {
    let store = load_store(config)?;
    let prompts = store.list_prompts(role);
    if prompts.is_empty() {
        println!("No {} prompts.", role);
        return Ok(());
    }
    for prompt in prompts {
        println!(
            "{} [{}] #{} v{}",
            prompt.category, prompt.lang, prompt.number, prompt.version
        );
        println!("    {}", prompt.content.lines().next().unwrap_or_default());
    }
    Ok(())
}

async fn cmd_check(config: &Config, kind: BackendKind) -> Result<()> {
    println!("Testing {} connection...\n", kind.display_name());
    let provider = config.provider(kind);
    println!("  API Base:  {}", provider.api_base);
    println!("  Model:     {}", provider.model);
    println!();

    let mut backend = create_backend(kind, config).context("Invalid configuration")?;
    backend.start_session("Reply with the single word 'hello'.").await;
    let reply = backend.send_message("Say hello.").await;

    if reply.is_failed() {
        println!("Connection failed: {}", reply.text());
    } else {
        println!("Connection successful! Reply: {}", reply.text().trim());
    }
    Ok(())
}
