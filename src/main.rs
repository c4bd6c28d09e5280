//! HellaSwag data CLI.
//!
//! Usage:
//!   hellaswag fetch --split val
//!   hellaswag fetch --all
//!   hellaswag render --split val --limit 10
//!   hellaswag render --split val --json > val.jsonl

use std::path::PathBuf;

use burn::config::Config;
use clap::{Parser, Subcommand};
use hellaswag::{Corpus, Gpt2Tokenizer, HellaSwagConfig, Split};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hellaswag", about = "Fetch and render the HellaSwag benchmark")]
struct Args {
    /// JSON config file (see `HellaSwagConfig`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value = "false")]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a split unless it is already cached
    Fetch {
        #[arg(long, value_enum, default_value = "val")]
        split: Split,

        /// Fetch train, val and test
        #[arg(long, default_value = "false")]
        all: bool,
    },
    /// Tokenize and pack the records of a split
    Render {
        #[arg(long, value_enum, default_value = "val")]
        split: Split,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,

        /// Print one JSON object per rendered record
        #[arg(long, default_value = "false")]
        json: bool,

        /// Hub identifier or tokenizer.json path, overriding the config
        #[arg(long)]
        tokenizer: Option<String>,
    },
}

fn load_config(args: &Args) -> Result<HellaSwagConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => HellaSwagConfig::load(path)?,
        None => HellaSwagConfig::new(),
    };
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if args.no_progress {
        config.show_progress = false;
    }
    Ok(config)
}

fn fetch(corpus: &Corpus, splits: &[Split]) -> Result<(), Box<dyn std::error::Error>> {
    for &split in splits {
        let path = corpus.fetcher().ensure_local(split)?;
        println!("{split}: {}", path.display());
    }
    Ok(())
}

fn render(
    corpus: &Corpus,
    config: &HellaSwagConfig,
    split: Split,
    limit: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Loading tokenizer {}", config.tokenizer);
    let tokenizer = Gpt2Tokenizer::load(&config.tokenizer)?;

    let mut count = 0;
    let mut widest = 0;
    for example in corpus
        .render_split(split, &tokenizer)?
        .take(limit.unwrap_or(usize::MAX))
    {
        let example = example?;
        widest = widest.max(example.max_len());

        if json {
            println!("{}", serde_json::to_string(&example)?);
        } else {
            let endings: Vec<usize> = example.ending_tokens().iter().map(Vec::len).collect();
            println!(
                "#{count}: label={} context={} endings={endings:?} max_len={}",
                example.label(),
                example.context_tokens().len(),
                example.max_len()
            );
        }
        count += 1;
    }

    tracing::info!("Rendered {count} {split} examples, widest row {widest} tokens");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = load_config(&args)?;

    match args.command {
        Command::Fetch { split, all } => {
            let corpus = Corpus::from_config(&config);
            let splits = if all { Split::ALL.to_vec() } else { vec![split] };
            fetch(&corpus, &splits)
        }
        Command::Render {
            split,
            limit,
            json,
            tokenizer,
        } => {
            if let Some(tokenizer) = tokenizer {
                config.tokenizer = tokenizer;
            }
            let corpus = Corpus::from_config(&config);
            render(&corpus, &config, split, limit, json)
        }
    }
}
