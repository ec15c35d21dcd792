//! aeon CLI - Batch labeling of tabular rows with a hosted LLM.

use aeon::{
    Config, LabelSettings, Labeler, PromptRegistry, PromptRequestBuilder, RetryPolicy,
    create_provider, recover,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "aeon")]
#[command(version)]
#[command(about = "Batch labeling of tabular rows with a hosted LLM")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Label every row of an input file with a prompt
    Label {
        /// Prompt name from the prompts directory
        #[arg(short, long)]
        prompt: String,

        /// Path to input rows JSONL file
        #[arg(short, long)]
        input: PathBuf,

        /// Number of rows processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Keep per-row checkpoints after a completed run
        #[arg(long)]
        no_cleanup: bool,

        /// Option override, e.g. `--set model=gpt-4.1-mini --set temperature=0.2`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Parent directory for job directories
        #[arg(long)]
        parent_dir: Option<PathBuf>,
    },

    /// List available prompts and their variables
    Prompts,

    /// Rebuild the output of an interrupted job from its checkpoints
    Recover {
        /// Job directory containing `batches/`
        job_dir: PathBuf,
    },

    /// Validate configuration file and prompts
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# aeon configuration file

[labeling]
parent_dir = "data/labels"
prompts_dir = "prompts"
max_workers = 15
cleanup = true

[retry]
max_attempts = 3
wait_chain_secs = [6.0, 60.0]
attempt_timeout_secs = 180

# Models containing "gpt" use the openai provider, everything else openrouter.
[providers.openai]
base_url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 180

[providers.openrouter]
base_url = "https://openrouter.ai/api/v1"
# api_key = "${OPENROUTER_API_KEY}"
timeout_secs = 180
"#;
    println!("{example}");
}

/// First interrupt cancels the job gracefully. Returns true when a second
/// interrupt arrives, meaning the caller should exit immediately.
async fn watch_interrupts<S, F>(cancel: CancellationToken, mut interrupt: S) -> bool
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    cancel.cancel();
    info!("Interrupt received, finishing in-flight rows. Press Ctrl-C again to exit now.");

    interrupt().await.is_ok()
}

/// Load the config file, or built-in defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Parse `key=value` overrides; values that parse as JSON keep their type.
fn parse_overrides(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut overrides = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid override {pair:?}, expected KEY=VALUE");
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        overrides.insert(key.trim().to_string(), value);
    }
    Ok(overrides)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            let registry = PromptRegistry::load(&config.labeling.prompts_dir)
                .context("Failed to load prompts")?;

            let mut invalid = 0;
            for name in registry.names() {
                let definition = registry.get(name)?;
                match PromptRequestBuilder::new(name, definition, &Map::new()) {
                    Ok(builder) => info!(
                        "  {name}: model {} via {} ({:?}, {} option(s))",
                        builder.model(),
                        aeon::client::infer_provider(builder.model()),
                        builder.options().family,
                        builder.options().options.len()
                    ),
                    Err(e) => {
                        warn!("  {name}: {e}");
                        invalid += 1;
                    }
                }
            }
            if invalid > 0 {
                bail!("{invalid} prompt(s) have invalid options");
            }

            info!("Configuration is valid");
            info!("  Prompts:     {}", registry.len());
            info!("  Workers:     {}", config.labeling.max_workers);
            info!("  Retries:     {} attempts", config.retry.max_attempts);
            info!("  Parent dir:  {}", config.labeling.parent_dir.display());
            return Ok(());
        }

        Commands::Prompts => {
            let config = load_config(&cli.config)?;
            let registry = PromptRegistry::load(&config.labeling.prompts_dir)
                .context("Failed to load prompts")?;
            for name in registry.names() {
                let definition = registry.get(name)?;
                let variables: Vec<String> = definition
                    .template()
                    .variables()
                    .iter()
                    .map(|v| format!("${v}"))
                    .collect();
                println!("{name:<32} {}", variables.join(" "));
            }
        }

        Commands::Recover { job_dir } => {
            let recovered = recover(&job_dir)
                .with_context(|| format!("Failed to recover job at {job_dir:?}"))?;

            println!("\n=== Recovery Complete ===");
            println!("Rows:        {}", recovered.table.len());
            println!("Errors:      {}", recovered.n_errors);
            println!("Unreadable:  {}", recovered.unreadable.len());
            println!("Output:      {:?}", recovered.output_path);
        }

        Commands::Label {
            prompt,
            input,
            workers,
            no_cleanup,
            overrides,
            parent_dir,
        } => {
            let config = load_config(&cli.config)?;
            let registry = PromptRegistry::load(&config.labeling.prompts_dir)
                .context("Failed to load prompts")?;
            let definition = registry.get(&prompt)?;
            let overrides = parse_overrides(&overrides)?;

            let builder = Arc::new(PromptRequestBuilder::new(&prompt, definition, &overrides)?);
            let provider = create_provider(&config, builder.model())
                .context("Failed to create provider")?;

            let mut settings = LabelSettings::from(&config);
            if let Some(workers) = workers {
                settings.max_workers = workers;
            }
            if no_cleanup {
                settings.cleanup = false;
            }
            if let Some(parent_dir) = parent_dir {
                settings.parent_dir = parent_dir;
            }

            let rows = Labeler::load_rows(&input)
                .with_context(|| format!("Failed to load rows from {input:?}"))?;
            let model = builder.model().to_string();

            let labeler = Labeler::new(
                builder,
                provider,
                RetryPolicy::from(&config.retry),
                settings,
            );
            info!(
                prompt = %prompt,
                model = %model,
                rows = rows.len(),
                workers = labeler.settings().max_workers,
                cleanup = labeler.settings().cleanup,
                "Starting labeling job"
            );

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if watch_interrupts(on_signal, tokio::signal::ctrl_c).await {
                    warn!("Second interrupt, exiting without waiting for in-flight rows");
                    std::process::exit(130);
                }
            });

            let result = labeler.label(rows, cancel).await?;

            println!("\n=== Labeling Complete ===");
            println!("Completed:   {}", result.completed);
            println!("Rows:        {}", result.table.len());
            println!("Errors:      {}", result.n_errors);
            println!("Skipped:     {}", result.n_skipped);
            println!("Runtime:     {:.1}s", result.duration_seconds);
            println!("Output:      {:?}", result.output_path);
        }
    }

    Ok(())
}
