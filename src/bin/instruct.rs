//! instruct CLI: generate objectives and quizzes from the command line.

use clap::{Args, Parser, Subcommand};
use instruct_engine::cache::{Cache, CacheStore, MemoryCache};
use instruct_engine::config::Config;
use instruct_engine::db::Db;
use instruct_engine::engine::{CancelToken, Coordinator, GenerateError};
use instruct_engine::llm::AnthropicBackend;
use instruct_engine::model::{
    Difficulty, FORCE_CACHE_BYPASS, GenerationRequest, INCLUDE_EXPLANATIONS, ValidatedBatch,
};
use instruct_engine::taxonomy::{BloomLevel, Taxonomy};
use instruct_engine::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "instruct", about = "Reliable structured course content generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate learning objectives for a topic
    Objectives {
        /// Course topic
        topic: String,
        /// Number of objectives
        #[arg(long, default_value_t = 5)]
        count: u32,
        /// Ask for an explanation with each objective
        #[arg(long)]
        explanations: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Generate quiz questions for a learning objective
    Quiz {
        /// The learning objective the questions assess
        objective: String,
        /// Number of questions
        #[arg(long, default_value_t = 3)]
        count: u32,
        /// easy | medium | hard
        #[arg(long, default_value = "medium")]
        difficulty: Difficulty,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the taxonomy vocabulary
    Taxonomy {
        /// Only this level
        #[arg(long)]
        level: Option<BloomLevel>,
        /// TOML override (defaults to INSTRUCT_TAXONOMY_PATH, then the built-in table)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete expired entries from the Postgres cache
    Purge,
}

#[derive(Args)]
struct CommonArgs {
    /// Who the content is for
    #[arg(long, default_value = "general learners")]
    audience: String,
    /// Skip the cache read (the result is still cached)
    #[arg(long)]
    no_cache: bool,
    /// Print the attempt log to stderr after the run
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Objectives {
            topic,
            count,
            explanations,
            common,
        } => {
            let request = GenerationRequest::objectives(topic, &common.audience, count)
                .option(INCLUDE_EXPLANATIONS, explanations);
            cmd_generate(request, &common).await
        }
        Command::Quiz {
            objective,
            count,
            difficulty,
            common,
        } => {
            let request = GenerationRequest::quiz(objective, &common.audience, count)
                .with_difficulty(difficulty);
            cmd_generate(request, &common).await
        }
        Command::Taxonomy { level, file } => cmd_taxonomy(level, file),
        Command::Purge => cmd_purge().await,
    }
}

async fn cmd_generate(request: GenerationRequest, common: &CommonArgs) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "instruct".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let taxonomy = match &config.taxonomy_path {
        Some(path) => Taxonomy::load(path)?,
        None => Taxonomy::bloom(),
    };

    let store: Arc<dyn CacheStore> = match &config.database_url {
        Some(url) => {
            let db = Db::connect(url.expose_secret()).await?;
            db.migrate().await?;
            Arc::new(db)
        }
        None => Arc::new(MemoryCache::new()),
    };
    let cache = Cache::new(store, config.engine.cache_ttl);

    let backend = AnthropicBackend::new(&config.anthropic_api_key, &config.model)?
        .with_max_tokens(config.max_tokens);
    let coordinator = Coordinator::new(
        Arc::new(backend),
        cache,
        Arc::new(taxonomy),
        config.engine.clone(),
    );

    let request = request.option(FORCE_CACHE_BYPASS, common.no_cache);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        on_interrupt.cancel();
    });

    let result = coordinator.generate(&request, &cancel).await;

    if common.verbose {
        for attempt in coordinator.last_attempt_log(&request.id()) {
            eprintln!(
                "attempt {} ({}): {} in {}ms{}",
                attempt.attempt_number,
                attempt.prompt_strictness,
                attempt.outcome,
                attempt.duration_ms,
                attempt
                    .error
                    .as_deref()
                    .map(|e| format!(" - {e}"))
                    .unwrap_or_default()
            );
        }
    }

    match result {
        Ok(batch) => print_batch(&batch),
        Err(GenerateError::Failed(failure)) => {
            eprintln!("{}: {}", failure.code, failure.message);
            eprintln!("suggestion: {}", failure.suggestion);
            if let Some(wait) = failure.retry_after {
                eprintln!("retry after: {}s", wait.as_secs());
            }
            if let Some(raw) = &failure.last_raw_output {
                eprintln!("last output:\n{raw}");
            }
            if let Some(stale) = &failure.stale {
                eprintln!("an older cached result exists:");
                print_batch(stale)?;
            }
            anyhow::bail!("generation failed after {} attempts", failure.attempts)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_batch(batch: &ValidatedBatch) -> anyhow::Result<()> {
    if batch.is_degraded() {
        eprintln!(
            "warning: backend unavailable, showing cached content from {}",
            batch.generated_at.format("%Y-%m-%d %H:%M")
        );
    }
    for correction in &batch.corrections {
        eprintln!(
            "corrected {}: '{}' -> '{}' ({})",
            correction.item_id, correction.original, correction.replacement, correction.level
        );
    }
    println!("{}", serde_json::to_string_pretty(batch)?);
    Ok(())
}

fn cmd_taxonomy(level: Option<BloomLevel>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = file.or_else(|| std::env::var_os("INSTRUCT_TAXONOMY_PATH").map(PathBuf::from));
    let taxonomy = match path {
        Some(path) => Taxonomy::load(&path)?,
        None => Taxonomy::bloom(),
    };

    println!("taxonomy {}", taxonomy.version());
    let levels: Vec<BloomLevel> = match level {
        Some(level) => vec![level],
        None => BloomLevel::ALL.to_vec(),
    };
    for level in levels {
        println!("{}", taxonomy.describe_level(level));
    }
    Ok(())
}

async fn cmd_purge() -> anyhow::Result<()> {
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let db = Db::connect(&url).await?;
    db.migrate().await?;
    let removed = db.purge_expired(chrono::Utc::now()).await?;
    println!("removed {removed} expired entr{}", if removed == 1 { "y" } else { "ies" });
    Ok(())
}
