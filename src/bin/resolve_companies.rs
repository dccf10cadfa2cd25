//! Company id resolution CLI
//!
//! Reads newline-delimited JSON requests, resolves them in batches within one
//! run, and writes one JSON result per line.
//!
//! Usage:
//!   COMPANY_RESOLVER_SALT=... cargo run --features cli --bin resolve_companies -- \
//!     --overrides config/overrides.yaml \
//!     --input rows.jsonl \
//!     --batch-size 500
//!
//! Without `DATABASE_URL` the cache lives in memory for the duration of the run.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use company_id_resolver::config::ResolverConfig;
use company_id_resolver::{
    CacheRepository, InMemoryCacheRepository, ResolutionRequest, Resolver, RunContext,
};

#[derive(Parser, Debug)]
#[command(name = "resolve_companies")]
#[command(about = "Resolve company identifiers for newline-delimited JSON rows")]
struct Args {
    /// Override YAML (falls back to COMPANY_RESOLVER_OVERRIDES); required
    #[arg(long, short = 'o')]
    overrides: Option<PathBuf>,

    /// Input file; stdin when omitted
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,

    /// Rows per resolve_batch call
    #[arg(long, default_value_t = 500)]
    batch_size: usize,

    /// Override the configured external call budget for this run
    #[arg(long)]
    budget: Option<u32>,

    /// Create the cache table before resolving
    #[arg(long)]
    ensure_schema: bool,

    /// Print run statistics as JSON to stderr
    #[arg(long)]
    stats_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ResolverConfig::from_env().context("Invalid resolver configuration")?;
    if let Some(path) = args.overrides.clone() {
        config.overrides_path = Some(path);
    }
    if let Some(budget) = args.budget {
        config.external.budget = budget;
    }

    let overrides = config
        .load_overrides()
        .context("Failed to load static overrides")?;

    let cache = open_cache(&config, args.ensure_schema).await?;
    let resolver = Resolver::from_config(&config, Arc::new(overrides), cache)?;
    let run = RunContext::with_budget(config.external.run_budget());

    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let mut out = BufWriter::new(std::io::stdout().lock());

    let batch_size = args.batch_size.max(1);
    let mut batch: Vec<ResolutionRequest> = Vec::with_capacity(batch_size);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let request: ResolutionRequest = serde_json::from_str(&line)
            .with_context(|| format!("Invalid request on line {}", line_no + 1))?;
        batch.push(request);
        if batch.len() >= batch_size {
            write_batch(&resolver, &run, &mut batch, &mut out).await?;
        }
    }
    write_batch(&resolver, &run, &mut batch, &mut out).await?;
    out.flush()?;

    let stats = run.statistics();
    stats.log_summary();
    if args.stats_json {
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

async fn write_batch(
    resolver: &Resolver,
    run: &RunContext,
    batch: &mut Vec<ResolutionRequest>,
    out: &mut impl Write,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    for result in resolver.resolve_batch(batch.as_slice(), run).await {
        serde_json::to_writer(&mut *out, &result)?;
        out.write_all(b"\n")?;
    }
    batch.clear();
    Ok(())
}

#[cfg(feature = "database")]
async fn open_cache(config: &ResolverConfig, ensure_schema: bool) -> Result<Arc<dyn CacheRepository>> {
    use company_id_resolver::PgCacheRepository;

    let Some(url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory cache");
        return Ok(Arc::new(InMemoryCacheRepository::new()));
    };
    let pool = sqlx::PgPool::connect(url.expose())
        .await
        .context("Failed to connect to cache database")?;
    let repo = PgCacheRepository::new(pool, &config.cache_table)?;
    if ensure_schema {
        repo.ensure_schema().await?;
    }
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "database"))]
async fn open_cache(_config: &ResolverConfig, _ensure_schema: bool) -> Result<Arc<dyn CacheRepository>> {
    tracing::warn!("Built without the database feature, using in-memory cache");
    Ok(Arc::new(InMemoryCacheRepository::new()))
}
