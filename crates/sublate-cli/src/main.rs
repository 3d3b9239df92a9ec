#![deny(unsafe_code)]
//! Operator CLI for the translation pipeline core (spec.md §6, minimal
//! surface: a source file + target language in, translated bytes out).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sublate_cache::{Cache, NamespaceConfig};
use sublate_config::{RedisSettings, StorageType, TranslationConfig};
use sublate_core::{TranslationParameters, Workflow};
use sublate_orchestrator::{CancellationToken, CoreContext, ProviderRegistry};
use sublate_provider::{BatchResult, Broker, ProviderId};
use tracing_subscriber::EnvFilter;

/// Exit code used when the pipeline itself fails (as opposed to bad usage,
/// which `clap` reports with its own exit code).
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "sublate", version, about = "Subtitle translation pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (falls back to environment + defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a subtitle file.
    Translate {
        /// Input subtitle file.
        #[arg(long)]
        input: PathBuf,
        /// Where to write the translated file (defaults to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Source language (omit to let the provider detect it).
        #[arg(long)]
        source_lang: Option<String>,
        /// Target language.
        #[arg(long)]
        target_lang: String,
        /// Primary provider.
        #[arg(long, value_enum, default_value_t = ProviderArg::Echo)]
        provider: ProviderArg,
        /// Secondary (fallback) provider, used if the primary is exhausted.
        #[arg(long, value_enum)]
        secondary_provider: Option<ProviderArg>,
        /// Model id passed to the provider.
        #[arg(long, default_value = "mock-model")]
        model: String,
        /// Batching workflow.
        #[arg(long, value_enum, default_value_t = WorkflowArg::Structured)]
        workflow: WorkflowArg,
        /// Per-wave planner token budget.
        #[arg(long)]
        token_budget: Option<u32>,
        /// Context entries included on each side of a batch.
        #[arg(long)]
        context_size: Option<usize>,
        /// Bypass any cached result and re-run the pipeline.
        #[arg(long)]
        force: bool,
        /// Provider API key(s); repeat for a rotation pool.
        #[arg(long = "api-key")]
        api_keys: Vec<String>,
        /// Only plan the batches; do not dispatch to any provider.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    /// In-process echo provider — always succeeds, useful for exercising
    /// the pipeline without real provider credentials (the CLI's
    /// equivalent of the teacher's `mock` backend).
    Echo,
    Gemini,
    OpenAi,
    Anthropic,
    DeepL,
    GoogleTranslate,
    OpenRouter,
    XAi,
    DeepSeek,
    Mistral,
    CfWorkers,
}

impl ProviderArg {
    fn to_provider_id(self) -> Option<ProviderId> {
        match self {
            ProviderArg::Echo => None,
            ProviderArg::Gemini => Some(ProviderId::Gemini),
            ProviderArg::OpenAi => Some(ProviderId::OpenAi),
            ProviderArg::Anthropic => Some(ProviderId::Anthropic),
            ProviderArg::DeepL => Some(ProviderId::DeepL),
            ProviderArg::GoogleTranslate => Some(ProviderId::GoogleTranslate),
            ProviderArg::OpenRouter => Some(ProviderId::OpenRouter),
            ProviderArg::XAi => Some(ProviderId::XAi),
            ProviderArg::DeepSeek => Some(ProviderId::DeepSeek),
            ProviderArg::Mistral => Some(ProviderId::Mistral),
            ProviderArg::CfWorkers => Some(ProviderId::CfWorkers),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WorkflowArg {
    RebuildTimestamps,
    Structured,
    AiTimestamps,
}

impl From<WorkflowArg> for Workflow {
    fn from(v: WorkflowArg) -> Self {
        match v {
            WorkflowArg::RebuildTimestamps => Workflow::RebuildTimestamps,
            WorkflowArg::Structured => Workflow::Structured,
            WorkflowArg::AiTimestamps => Workflow::AiTimestamps,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("sublate=debug")
    } else {
        EnvFilter::new("sublate=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Translate {
            input,
            output,
            source_lang,
            target_lang,
            provider,
            secondary_provider,
            model,
            workflow,
            token_budget,
            context_size,
            force,
            api_keys,
            dry_run,
        } => {
            cmd_translate(
                cli.config,
                input,
                output,
                source_lang,
                target_lang,
                provider,
                secondary_provider,
                model,
                workflow,
                token_budget,
                context_size,
                force,
                api_keys,
                dry_run,
            )
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_translate(
    config_path: Option<PathBuf>,
    input: PathBuf,
    output: Option<PathBuf>,
    source_lang: Option<String>,
    target_lang: String,
    provider: ProviderArg,
    secondary_provider: Option<ProviderArg>,
    model: String,
    workflow: WorkflowArg,
    token_budget: Option<u32>,
    context_size: Option<usize>,
    force: bool,
    api_keys: Vec<String>,
    dry_run: bool,
) -> Result<()> {
    let config = sublate_config::load_config(config_path.as_deref())
        .context("loading configuration")?;
    let warnings = sublate_config::validate_config(&config).context("validating configuration")?;
    for w in &warnings {
        tracing::warn!(target: "sublate.cli", "{w}");
    }

    let source_bytes = std::fs::read(&input)
        .with_context(|| format!("reading input file {}", input.display()))?;
    let source_format = sublate_core::Format::from_extension(
        input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default(),
    )
    .with_context(|| format!("unrecognised subtitle extension for {}", input.display()))?;

    if dry_run {
        return run_dry_run(
            &source_bytes,
            source_format,
            workflow.into(),
            &config,
            token_budget,
            context_size,
        );
    }

    let ctx = build_context(&config, provider).await?;
    let request = sublate_orchestrator::TranslateRequest {
        source_bytes,
        source_format,
        source_lang,
        target_lang,
        provider: provider.to_provider_id().unwrap_or(ProviderId::Gemini),
        secondary_provider: secondary_provider.and_then(ProviderArg::to_provider_id),
        model_id: model,
        workflow: workflow.into(),
        parameters: TranslationParameters::default(),
        prompt: String::new(),
        api_key_pool: if api_keys.is_empty() {
            vec!["local".to_string()]
        } else {
            api_keys
        },
        token_budget: token_budget.unwrap_or(8_000),
        context_size: context_size.unwrap_or(config.default_context_size),
        force,
        deadline: None,
    };

    let outcome = sublate_orchestrator::translate(&ctx, request, CancellationToken::new())
        .await
        .context("translation pipeline failed")?;

    match output {
        Some(path) => {
            std::fs::write(&path, &outcome.bytes)
                .with_context(|| format!("writing output file {}", path.display()))?;
            eprintln!(
                "wrote {} ({} entries, provider={}, model={}, cached={}, {}ms)",
                path.display(),
                outcome.metadata.entry_count,
                outcome.metadata.provider,
                outcome.metadata.model,
                outcome.metadata.cached,
                outcome.metadata.duration_ms
            );
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&outcome.bytes)?;
        }
    }

    Ok(())
}

fn run_dry_run(
    source_bytes: &[u8],
    source_format: sublate_core::Format,
    workflow: Workflow,
    config: &TranslationConfig,
    token_budget: Option<u32>,
    context_size: Option<usize>,
) -> Result<()> {
    let document =
        sublate_subtitle::parse(source_bytes, source_format).context("parsing subtitle file")?;
    let options = sublate_plan::PlanOptions::new(token_budget.unwrap_or(8_000))
        .with_context_size(context_size.unwrap_or(config.default_context_size))
        .with_max_entries_per_batch(config.default_batch_max_entries);
    let batches = sublate_plan::plan(&document, workflow, options).context("planning batches")?;

    println!("entries: {}", document.len());
    println!("batches: {}", batches.len());
    for batch in &batches {
        println!(
            "  batch {:>3}: entries {:?}, ~{} tokens",
            batch.id, batch.entry_indices, batch.token_estimate
        );
    }
    Ok(())
}

/// Build a [`CoreContext`] from configuration: selects the storage backend
/// by `config.storage_type` and registers the requested provider.
///
/// `ProviderArg::Echo` and any provider with no real client wired (every
/// provider in this build — real HTTP clients are out of scope, see
/// `DESIGN.md`) resolve to the in-process echo provider, so this command is
/// always runnable without external credentials; it demonstrates pipeline
/// wiring rather than performing a real translation.
async fn build_context(config: &TranslationConfig, _provider: ProviderArg) -> Result<CoreContext> {
    let adapter: Arc<dyn sublate_cache::StorageAdapter> = match config.storage_type {
        StorageType::Filesystem => {
            let root = std::env::var("SUBLATE_CACHE_DIR").unwrap_or_else(|_| ".sublate-cache".to_string());
            Arc::new(sublate_cache::filesystem::FilesystemStorage::new(root))
        }
        StorageType::Redis => {
            let url = redis_url(&config.redis);
            Arc::new(
                sublate_cache::redis::RedisStorage::connect(&url, config.redis.key_prefix.as_deref().unwrap_or("sublate:"))
                    .await
                    .context("connecting to redis")?,
            )
        }
    };

    let cache = Arc::new(Cache::new(
        adapter,
        [
            NamespaceConfig::translation(config.cache_limit_translation),
            NamespaceConfig::partial(config.cache_limit_partial),
            NamespaceConfig::history(config.cache_limit_history),
            NamespaceConfig::session(64 * 1024 * 1024, Some(Duration::from_secs(24 * 60 * 60))),
        ],
    ));

    let mut registry = ProviderRegistry::new();
    for provider_id in [
        ProviderId::Gemini,
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::DeepL,
        ProviderId::GoogleTranslate,
        ProviderId::OpenRouter,
        ProviderId::XAi,
        ProviderId::DeepSeek,
        ProviderId::Mistral,
        ProviderId::CfWorkers,
    ] {
        registry.register(Broker::new(EchoClient { provider: provider_id }));
    }

    Ok(CoreContext::new(
        cache,
        Arc::new(registry),
        Arc::new(sublate_core::SystemClock),
    ))
}

fn redis_url(redis: &RedisSettings) -> String {
    match &redis.password {
        Some(password) => format!("redis://:{password}@{}:{}/{}", redis.host, redis.port, redis.db),
        None => format!("redis://{}:{}/{}", redis.host, redis.port, redis.db),
    }
}

/// Always-succeeds provider client that returns the source text unchanged,
/// prefixed with the target language tag — enough to exercise the full
/// pipeline (batching, caching, recovery bookkeeping) without a real
/// provider integration, which is out of scope for this core (see
/// `DESIGN.md`'s dropped-`reqwest` note).
struct EchoClient {
    provider: ProviderId,
}

#[async_trait::async_trait]
impl sublate_provider::ProviderClient for EchoClient {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn call(
        &self,
        batch: &sublate_core::Batch,
        request: &sublate_provider::ProviderRequest,
        _api_key: &str,
    ) -> Result<BatchResult, sublate_error::ProviderError> {
        Ok(BatchResult {
            entries: batch
                .entry_indices
                .iter()
                .map(|&index| {
                    sublate_core::Entry::new(
                        index,
                        Duration::ZERO,
                        Duration::from_secs(1),
                        format!("[{}] entry {index}", request.target_lang),
                    )
                    .expect("echo text is fixed and non-empty, start < end")
                })
                .collect(),
        })
    }
}
