//! `ragloom ask`: answer one question and print the cited result.

use async_trait::async_trait;
use clap::Args;
use std::io::Write;

use ragloom_config::AppConfig;
use ragloom_core::error::RunError;
use ragloom_core::query::{Query, QueryOptions};
use ragloom_core::retrieval::{Locator, Target};
use ragloom_orchestrator::{
    OrchestratorSettings, QueryOrchestrator, ResultStream, SinkClosed, Strategy, SynthesisResult,
};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to answer
    pub question: String,

    /// Search the web (default when no collection is given)
    #[arg(long, conflicts_with = "collection")]
    pub web: bool,

    /// Answer from this document collection
    #[arg(short, long)]
    pub collection: Option<String>,

    /// Break the question into sub-queries first
    #[arg(short, long)]
    pub decompose: bool,

    /// Explore first, then decompose with the preliminary answer in hand
    #[arg(short, long)]
    pub informed: bool,

    /// Fetch full pages for the top web results
    #[arg(long)]
    pub deep: bool,

    /// Evidence items per sub-query (1-10)
    #[arg(short = 'n', long)]
    pub max_results: Option<usize>,

    /// Model override, as `model` or `provider/model`
    #[arg(short, long)]
    pub model: Option<String>,

    /// Print the answer only once it is complete
    #[arg(long)]
    pub no_stream: bool,
}

impl AskArgs {
    fn query(&self, default_max_results: usize) -> Result<Query, RunError> {
        let target = match &self.collection {
            Some(id) if !self.web => Target::collection(id.clone()),
            _ => Target::Web,
        };
        let options = QueryOptions {
            max_results: self.max_results.unwrap_or(default_max_results),
            decompose: self.decompose || self.informed,
            informed: self.informed,
            deep_scrape: self.deep,
        };
        Query::new(self.question.as_str(), target, options)
    }
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate()?;

    // Check for API key early, give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    RAGLOOM_API_KEY     (generic)");
        eprintln!("    OPENAI_API_KEY      (OpenAI or compatible)");
        eprintln!("    ANTHROPIC_API_KEY   (Anthropic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let providers = ragloom_providers::build_from_config(&config);
    let (provider, model) = providers
        .resolve(args.model.as_deref())
        .ok_or("No provider configured for the requested model")?;
    let retrieval = ragloom_retrieval::build_from_config(&config, Some(provider.clone()));

    let orchestrator = QueryOrchestrator::new(provider, model, retrieval)
        .with_settings(OrchestratorSettings::from_config(&config));

    let query = args.query(config.orchestrator.max_results)?;

    let result = if args.no_stream {
        let result = orchestrator.answer(&query, None).await?;
        println!("{}", result.answer);
        result
    } else {
        let mut sink = ConsoleStream::new(std::io::stdout());
        let result = orchestrator.run(&query, None, &mut sink).await?;
        println!();
        result
    };

    print!("{}", render_footer(&result));
    Ok(())
}

/// Writes answer text to `out` as it arrives; progress goes to stderr.
pub struct ConsoleStream<W> {
    out: W,
}

impl<W: Write + Send> ConsoleStream<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> ResultStream for ConsoleStream<W> {
    async fn open(&mut self, _query: &Query, strategy: Strategy) -> Result<(), SinkClosed> {
        eprintln!("  [{strategy}]");
        Ok(())
    }

    async fn sub_queries(&mut self, sub_queries: &[String]) -> Result<(), SinkClosed> {
        for (i, sq) in sub_queries.iter().enumerate() {
            eprintln!("  ({}) {sq}", i + 1);
        }
        Ok(())
    }

    async fn emit(&mut self, chunk: &str) -> Result<(), SinkClosed> {
        self.out
            .write_all(chunk.as_bytes())
            .and_then(|_| self.out.flush())
            .map_err(|_| SinkClosed)
    }

    async fn close(&mut self, _result: &SynthesisResult) -> Result<(), SinkClosed> {
        Ok(())
    }

    async fn fail(&mut self, _error: &RunError) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Sub-queries, cited sources and any degradations, below the answer.
pub fn render_footer(result: &SynthesisResult) -> String {
    let mut out = String::new();

    if !result.sub_queries.is_empty() {
        out.push_str("\nSub-queries:\n");
        for (i, sq) in result.sub_queries.iter().enumerate() {
            out.push_str(&format!("  {}. {sq}\n", i + 1));
        }
    }

    if !result.sources.is_empty() {
        out.push_str("\nSources:\n");
        for item in &result.sources {
            let evidence = &item.evidence;
            let locator = match &evidence.locator {
                Locator::Url(url) => format!(" <{url}>"),
                Locator::Page(page) => format!(", page {page}"),
                Locator::None => String::new(),
            };
            out.push_str(&format!(
                "  [{}] {}{locator} ({:.2})\n",
                item.label, evidence.title, evidence.score
            ));
        }
    }

    if !result.metadata.degradations.is_empty() {
        out.push_str("\nNotes:\n");
        for degradation in &result.metadata.degradations {
            out.push_str(&format!("  - {degradation}\n"));
        }
    }

    out
}
