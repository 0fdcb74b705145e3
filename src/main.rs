use anyhow::Context;
use ares_research::{
    cli::{
        init::{self, InitConfig, InitResult},
        output::Output,
        status_lookup, Cli, Commands,
    },
    llm::LLMClient,
    memory::{FileStore, InMemoryStore, MemoryStore},
    research::Orchestrator,
    tools::{DuckDuckGoSearch, SearchProvider},
    utils::toml_config::{MemoryBackend, ResearchConfig},
};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    // A broken research.toml must not block `init --force`
    if let Commands::Init {
        path,
        force,
        provider,
    } = &cli.command
    {
        let init_config = InitConfig {
            path: path.clone(),
            force: *force,
            provider: provider.clone(),
        };
        return match init::run(init_config, &output) {
            InitResult::Success | InitResult::AlreadyExists => Ok(()),
            InitResult::Error(e) => Err(anyhow::anyhow!("init failed: {}", e)),
        };
    }

    let config = ResearchConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    init_tracing(&config, cli.verbose, cli.log_json);

    match &cli.command {
        // runs before the config is loaded
        Commands::Init { .. } => Ok(()),
        Commands::Config { validate } => show_config(&cli, &config, *validate, &output),
        Commands::Status { target } => {
            let orchestrator = build_orchestrator(&config).await?;
            let status = orchestrator.status(status_lookup(target)).await?;
            output.status(&status);
            output.history(&orchestrator.history(status.query_id).await?);
            Ok(())
        }
        Commands::Research { json, .. } => {
            let request = cli
                .command
                .research_request()
                .context("research command without a request")?;

            config.validate()?;
            let orchestrator = build_orchestrator(&config).await?;

            if !json {
                output.banner();
                output.info(&format!("Researching: {}", request.query));
            }

            match orchestrator.run(request).await {
                Ok(outcome) if *json => {
                    println!("{}", serde_json::to_string_pretty(&outcome.report)?);
                    Ok(())
                }
                Ok(outcome) => {
                    output.outcome(&outcome);
                    output.complete("Research complete");
                    output.hint("Check a run later with:");
                    output.command(&format!("ares-research status {}", outcome.query_id));
                    Ok(())
                }
                Err(e) => {
                    output.error(&e.to_string());
                    Err(e.into())
                }
            }
        }
    }
}

/// `RUST_LOG` wins over the configured level; `--verbose` raises the default to debug.
fn init_tracing(config: &ResearchConfig, verbose: bool, json: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn build_orchestrator(config: &ResearchConfig) -> anyhow::Result<Orchestrator> {
    let provider = config.provider()?;
    let llm: Arc<dyn LLMClient> = Arc::from(
        provider
            .create_client()
            .await
            .with_context(|| format!("failed to create {} client", provider.name()))?,
    );

    let search: Arc<dyn SearchProvider> = Arc::new(DuckDuckGoSearch::new());

    let memory: Arc<dyn MemoryStore> = match config.memory.backend {
        MemoryBackend::Memory => Arc::new(InMemoryStore::new()),
        MemoryBackend::File => Arc::new(
            FileStore::open(&config.memory.path)
                .await
                .with_context(|| format!("failed to open {}", config.memory.path.display()))?,
        ),
    };

    Ok(Orchestrator::new(llm, search, memory, config.limits()))
}

fn show_config(
    cli: &Cli,
    config: &ResearchConfig,
    validate: bool,
    output: &Output,
) -> anyhow::Result<()> {
    output.header("Configuration");
    output.kv("file", &cli.config.display().to_string());
    if !cli.config.exists() {
        output.warning("Config file not found; showing built-in defaults");
    }

    output.subheader("LLM");
    output.kv("provider", &format!("{:?}", config.llm.provider));
    output.kv("base url", &config.llm.base_url());
    output.kv("model", &config.llm.model());
    output.kv("temperature", &config.llm.temperature.to_string());

    output.subheader("Research Loop");
    let research = &config.research;
    output.kv("max iterations", &research.max_iterations.to_string());
    output.kv("max subagents", &research.max_subagents.to_string());
    output.kv("research timeout", &format!("{}s", research.research_timeout_secs));
    output.kv("worker timeout", &format!("{}s", research.worker_timeout_secs));
    output.kv(
        "completeness threshold",
        &research.completeness_threshold.to_string(),
    );

    output.subheader("Search & Memory");
    output.kv("max results", &config.search.max_results.to_string());
    output.kv("search retries", &config.search.max_retries.to_string());
    output.kv("memory backend", &format!("{:?}", config.memory.backend));
    output.kv("memory path", &config.memory.path.display().to_string());
    output.kv("citation style", &format!("{:?}", config.citation.style));

    if validate {
        match config.validate() {
            Ok(()) => output.success("Configuration is valid"),
            Err(e) => {
                output.error(&e.to_string());
                return Err(e.into());
            }
        }
    }

    Ok(())
}
