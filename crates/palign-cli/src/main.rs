//! palign CLI - prompt-only dataset preparation for alignment training.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use palign_core::{PromptOnlyConfig, SecretString};
use palign_data::{
    detect_template_from_model, ChatTemplate, ChatTemplateType, DataLoaderConfig,
    PromptOnlyDataLoader, PromptOnlyDataset, TemplateRegistry, Tokenizer,
};
use serde::{Deserialize, Serialize};

/// Environment variables checked for a HuggingFace token.
const TOKEN_ENV_VARS: [&str; 2] = ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];

/// Combined configuration for a prompt-only pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Dataset configuration.
    pub dataset: PromptOnlyConfig,

    /// Tokenizer file, model directory, or Hub model id.
    pub tokenizer: String,

    /// Batching configuration.
    #[serde(default)]
    pub loader: DataLoaderConfig,
}

impl PipelineConfig {
    fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}

#[derive(Parser)]
#[command(name = "palign")]
#[command(
    author,
    version,
    about = "Prompt-only datasets for alignment training",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, deduplicate, tokenize and batch a dataset, then print statistics
    Inspect {
        /// Path to a YAML pipeline configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset file, directory, or Hub dataset id
        #[arg(short, long)]
        dataset: Option<String>,

        /// Prompt template name (e.g. "PKUSafeRLHF", "Alpaca")
        #[arg(short, long)]
        template: Option<String>,

        /// Tokenizer file, model directory, or Hub model id
        #[arg(long)]
        tokenizer: Option<String>,

        /// Chat format (detected from the tokenizer name when unset)
        #[arg(long)]
        chat_format: Option<String>,

        /// Dataset configuration name
        #[arg(long)]
        name: Option<String>,

        /// Dataset split
        #[arg(long)]
        split: Option<String>,

        /// Keep only the first N unique prompts
        #[arg(long)]
        size: Option<usize>,

        /// Maximum tokenized length
        #[arg(long)]
        max_length: Option<usize>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Shuffle before batching
        #[arg(long)]
        shuffle: bool,

        /// Render raw prompts without the chat template
        #[arg(long)]
        no_chat_template: bool,

        /// Number of decoded samples to print
        #[arg(long, default_value = "3")]
        show: usize,
    },

    /// Download a dataset split or a tokenizer from HuggingFace Hub
    Download {
        /// Dataset id, or model id with --tokenizer
        repo_id: String,

        /// Download the tokenizer of a model instead of a dataset
        #[arg(long)]
        tokenizer: bool,

        /// Dataset configuration name
        #[arg(long)]
        name: Option<String>,

        /// Dataset split
        #[arg(long, default_value = "train")]
        split: String,

        /// Specific revision/branch
        #[arg(long)]
        revision: Option<String>,
    },

    /// Manage the download cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List prompt templates and chat formats
    Templates,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cache location and size
    Size,
    /// Delete the cache
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let token = SecretString::from_env(&TOKEN_ENV_VARS);

    match cli.command {
        Commands::Inspect {
            config,
            dataset,
            template,
            tokenizer,
            chat_format,
            name,
            split,
            size,
            max_length,
            batch_size,
            shuffle,
            no_chat_template,
            show,
        } => {
            let mut pipeline = match config {
                Some(path) => PipelineConfig::from_yaml_file(&path)?,
                None => PipelineConfig {
                    dataset: PromptOnlyConfig::new(
                        dataset.clone().unwrap_or_default(),
                        template.clone().unwrap_or_else(|| "Prompt".to_string()),
                    ),
                    tokenizer: tokenizer
                        .clone()
                        .context("--tokenizer is required without --config")?,
                    loader: DataLoaderConfig::default(),
                },
            };

            // Flags override the file.
            let ds = &mut pipeline.dataset;
            if let Some(path) = dataset {
                ds.path = path;
            }
            if let Some(template) = template {
                ds.template = template;
            }
            if let Some(tokenizer) = tokenizer {
                pipeline.tokenizer = tokenizer;
            }
            ds.chat_format = chat_format.or(ds.chat_format.take());
            ds.name = name.or(ds.name.take());
            ds.split = split.or(ds.split.take());
            ds.size = size.or(ds.size);
            ds.max_length = max_length.or(ds.max_length);
            if no_chat_template {
                ds.apply_chat_template = false;
            }
            if let Some(batch_size) = batch_size {
                pipeline.loader.batch_size = batch_size;
            }
            if shuffle {
                pipeline.loader.shuffle = true;
            }

            run_inspect(pipeline, token.as_ref(), show).await?;
        }

        Commands::Download {
            repo_id,
            tokenizer,
            name,
            split,
            revision,
        } => {
            if tokenizer {
                let dir =
                    palign_hub::download_tokenizer(&repo_id, revision.as_deref(), token.as_ref())
                        .await?;
                println!("Tokenizer downloaded to {}", dir.display());
            } else {
                let files = palign_hub::download_dataset_files(
                    &repo_id,
                    name.as_deref(),
                    &split,
                    revision.as_deref(),
                    token.as_ref(),
                )
                .await?;
                println!("Downloaded {} file(s) for {}[{}]:", files.len(), repo_id, split);
                for file in files {
                    println!("  {}", file.display());
                }
            }
        }

        Commands::Cache { action } => match action {
            CacheAction::Size => {
                let size = palign_hub::cache_size()?;
                println!(
                    "{}: {:.2} MB",
                    palign_hub::cache_dir().display(),
                    size as f64 / (1024.0 * 1024.0)
                );
            }
            CacheAction::Clear => {
                palign_hub::clear_cache()?;
                println!("Cache cleared");
            }
        },

        Commands::Templates => {
            println!("Prompt templates:");
            for name in TemplateRegistry::with_builtins(ChatTemplate::default()).names() {
                println!("  {}", name);
            }
            println!("Chat formats:");
            for format in ChatTemplateType::ALL {
                println!("  {:<10} eos={}", format.name(), format.eos_token());
            }
        }
    }

    Ok(())
}

/// Point the dataset config at local files, downloading from the Hub when
/// `path` is not on disk.
async fn resolve_dataset(
    config: &mut PromptOnlyConfig,
    token: Option<&SecretString>,
) -> anyhow::Result<()> {
    if !config.data_files.is_empty() || Path::new(&config.path).exists() {
        return Ok(());
    }

    let split = config.split.clone().unwrap_or_else(|| "train".to_string());
    tracing::info!("'{}' is not a local path, fetching it from the Hub", config.path);
    let files = palign_hub::download_dataset_files(
        &config.path,
        config.name.as_deref(),
        &split,
        config.revision.as_deref(),
        token,
    )
    .await
    .with_context(|| format!("Failed to resolve dataset '{}'", config.path))?;

    config.data_files = files
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    Ok(())
}

async fn resolve_tokenizer(
    source: &str,
    token: Option<&SecretString>,
) -> anyhow::Result<Tokenizer> {
    let path = Path::new(source);
    if path.exists() {
        return Ok(Tokenizer::from_path(path)?);
    }

    tracing::info!("Downloading tokenizer for {}", source);
    let dir = palign_hub::download_tokenizer(source, None, token).await?;
    Ok(Tokenizer::from_dir(dir)?)
}

async fn run_inspect(
    mut pipeline: PipelineConfig,
    token: Option<&SecretString>,
    show: usize,
) -> anyhow::Result<()> {
    pipeline.dataset.validate()?;
    resolve_dataset(&mut pipeline.dataset, token).await?;
    let tokenizer = Arc::new(resolve_tokenizer(&pipeline.tokenizer, token).await?);

    if pipeline.dataset.chat_format.is_none() {
        let detected = detect_template_from_model(&pipeline.tokenizer).template_type;
        tracing::info!("Using {} chat format for {}", detected.name(), pipeline.tokenizer);
        pipeline.dataset.chat_format = Some(detected.name().to_string());
    }

    let dataset = PromptOnlyDataset::new(&pipeline.dataset, tokenizer.clone())?;
    let limit = pipeline
        .dataset
        .max_length
        .or_else(|| tokenizer.model_max_length());

    let pb = ProgressBar::new(dataset.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let mut lengths = Vec::with_capacity(dataset.len());
    let mut truncated = 0usize;
    for (index, sample) in dataset.iter().enumerate() {
        let len = sample?.len();
        if limit.is_some_and(|limit| len >= limit) && dataset.untruncated_len(index)? > len {
            truncated += 1;
        }
        lengths.push(len);
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("Dataset:    {}", pipeline.dataset.path);
    println!("Template:   {}", dataset.template().name());
    println!("Prompts:    {}", dataset.len());
    if let (Some(min), Some(max)) = (lengths.iter().min(), lengths.iter().max()) {
        let mean = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
        println!("Tokens:     min {} / mean {:.1} / max {}", min, mean, max);
    }
    if let Some(limit) = limit {
        println!("Truncated:  {} (max length {})", truncated, limit);
    }

    for index in 0..show.min(dataset.len()) {
        let sample = dataset.get(index)?;
        println!("\n--- sample {} ({} tokens) ---", index, sample.len());
        println!("{}", tokenizer.decode(&sample.input_ids, false)?);
    }

    let mut loader = PromptOnlyDataLoader::new(dataset, pipeline.loader)?;
    println!("\nBatches:    {}", loader.num_batches());
    if let Some(batch) = loader.next_batch() {
        let batch = batch?;
        println!(
            "First batch: {} x {} on {}",
            batch.batch_size(),
            batch.seq_len(),
            batch.device
        );
        println!("input_ids:\n{}", batch.input_ids);
        println!("attention_mask:\n{}", batch.attention_mask.mapv(u8::from));
    }

    Ok(())
}
