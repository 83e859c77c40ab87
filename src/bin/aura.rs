//! AURA CLI binary.
//!
//! Hybrid compression for AI chat messages.
//!
//! # Commands
//!
//! - `compress` - Compress a message to a base64 container
//! - `decompress` - Decode a base64 container back to text
//! - `classify` - Read method and metadata without decoding the payload
//! - `replay` - Run a conversation file through a sender/receiver pair
//! - `discover` - Mine a corpus for template candidates
//! - `templates` - Inspect and edit the template store

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use aura::{
    classify,
    codec::detect_method,
    discovery::TemplateDiscovery,
    Config, Conversation, ConversationCache, HybridSelector, PlatformCache, TemplateStore,
    TracingAuditSink, VERSION,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aura")]
#[command(version = VERSION)]
#[command(about = "AURA - Hybrid compression for AI chat messages", long_about = None)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Template store file (JSON), loaded on top of the built-ins
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a message
    Compress {
        /// Message text (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show compression statistics
        #[arg(long)]
        stats: bool,
    },

    /// Decompress a base64 container
    Decompress {
        /// Base64 container (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Classify a base64 container without decoding it
    Classify {
        /// Base64 container (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Compress and decode a conversation, one message per line
    Replay {
        /// Conversation file
        file: PathBuf,
    },

    /// Mine a corpus for template candidates
    Discover {
        /// Corpus file: one message per line, or a JSON array of strings
        corpus: PathBuf,

        /// Minimum matching messages
        #[arg(long)]
        min_occurrences: Option<usize>,

        /// Minimum estimated compression ratio
        #[arg(long)]
        min_ratio: Option<f64>,

        /// Minimum confidence (0.0 - 1.0)
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Promote the best N candidates into the store
        #[arg(long, default_value = "0")]
        promote: usize,

        /// Write the store here after promotion
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Inspect and edit the template store
    Templates {
        #[command(subcommand)]
        action: TemplatesAction,
    },
}

#[derive(Subcommand)]
enum TemplatesAction {
    /// List templates
    List {
        /// Filter by category
        #[arg(short = 'C', long)]
        category: Option<String>,
    },

    /// Register a template
    Register {
        /// Template ID
        id: u32,

        /// Pattern with {0}, {1}, ... slots
        pattern: String,

        /// Category (default: inferred from the pattern)
        #[arg(short = 'C', long)]
        category: Option<String>,

        /// Write the store here afterwards
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Remove a non-built-in template
    Demote {
        /// Template ID
        id: u32,

        /// Write the store here afterwards
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Save the store as JSON
    Save {
        /// Output path
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    let store = Arc::new(load_store(&config, cli.store.as_deref())?);

    match cli.command {
        Commands::Compress {
            input,
            file,
            output,
            stats,
        } => cmd_compress(&config, &store, input, file, output, stats),

        Commands::Decompress {
            input,
            file,
            output,
        } => cmd_decompress(&config, &store, input, file, output),

        Commands::Classify { input, file } => cmd_classify(&store, input, file),

        Commands::Replay { file } => cmd_replay(&config, &store, &file),

        Commands::Discover {
            corpus,
            min_occurrences,
            min_ratio,
            min_confidence,
            promote,
            save,
        } => {
            let mut discovery = config.discovery.clone();
            if let Some(v) = min_occurrences {
                discovery.min_occurrences = v;
            }
            if let Some(v) = min_ratio {
                discovery.min_ratio = v;
            }
            if let Some(v) = min_confidence {
                discovery.min_confidence = v;
            }
            let engine = TemplateDiscovery::new(discovery)?;
            cmd_discover(&engine, &store, &corpus, promote, save.as_deref())
        },

        Commands::Templates { action } => cmd_templates(&store, action),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_store(config: &Config, override_path: Option<&Path>) -> anyhow::Result<TemplateStore> {
    let store = TemplateStore::new();
    let path = override_path.or(config.templates.store_path.as_deref());
    if let Some(path) = path {
        store
            .load_from_file(path)
            .with_context(|| format!("Failed to load template store {}", path.display()))?;
    }
    Ok(store)
}

fn cmd_compress(
    config: &Config,
    store: &Arc<TemplateStore>,
    input: Option<String>,
    file: Option<PathBuf>,
    output: Option<PathBuf>,
    stats: bool,
) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let text = content.strip_suffix('\n').unwrap_or(&content);

    let mut conversation = Conversation::from_config(config, store.clone());
    let result = conversation.compress(text);
    write_output(output, &BASE64.encode(&result.data))?;

    if stats {
        eprintln!();
        eprintln!("Compression Statistics:");
        eprintln!("  Method:       {}", result.method);
        if let Some(id) = result.template_id {
            eprintln!("  Template:     {id}");
        }
        eprintln!("  Original:     {} bytes", result.original_bytes);
        eprintln!("  Compressed:   {} bytes", result.compressed_bytes);
        eprintln!("  Ratio:        {:.2}x", result.byte_ratio());
    }
    Ok(())
}

fn cmd_decompress(
    config: &Config,
    store: &Arc<TemplateStore>,
    input: Option<String>,
    file: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bytes = read_container(input, file)?;
    let mut conversation = Conversation::from_config(config, store.clone());
    let decoded = conversation.decompress(&bytes)?;
    write_output(output, &decoded.text)
}

fn cmd_classify(
    store: &Arc<TemplateStore>,
    input: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bytes = read_container(input, file)?;
    let class = classify(&bytes, Some(&store.snapshot()))?;
    println!("{}", serde_json::to_string_pretty(&class)?);
    Ok(())
}

fn cmd_replay(config: &Config, store: &Arc<TemplateStore>, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let selector = Arc::new(HybridSelector::new(config));
    let platform = PlatformCache::from_config(&config.cache);
    let mut cache = ConversationCache::from_config(&config.cache);
    if let Some(platform) = &platform {
        cache = cache.with_platform(platform.clone());
    }
    let mut sender = Conversation::new(selector.clone(), store.clone(), cache);
    let mut receiver = Conversation::new(
        selector.clone(),
        store.clone(),
        ConversationCache::from_config(&config.cache),
    )
    .with_id(sender.id())
    .with_audit(Arc::new(TracingAuditSink));

    for (line_no, line) in content.lines().enumerate() {
        let result = sender.compress(line);
        let decoded = receiver
            .decompress(&result.data)
            .with_context(|| format!("Line {} failed to decode", line_no + 1))?;
        anyhow::ensure!(
            decoded.text == line,
            "Line {} did not round-trip",
            line_no + 1
        );
        println!(
            "{:>4}  {:<10} {:>5} -> {:>5} bytes{}",
            line_no + 1,
            result.method,
            result.original_bytes,
            result.compressed_bytes,
            if result.cache_hit { "  (cached)" } else { "" }
        );
    }

    let stats = sender.stats();
    eprintln!();
    eprintln!("Conversation {}", stats.conversation_id);
    eprintln!("  Messages:     {}", stats.messages_sent);
    eprintln!("  Ratio:        {:.2}x", stats.compression_ratio());
    eprintln!("  Saved:        {:.1}%", stats.savings_percent());
    eprintln!("  Cache hits:   {}", stats.cache_hits);
    eprintln!(
        "  Selector:     {}",
        serde_json::to_string(&selector.stats())?
    );
    if let Some(platform) = &platform {
        let merged = sender.merge_into(platform);
        eprintln!("  Platform:     {} merged, {} entries", merged, platform.len());
    }
    Ok(())
}

fn cmd_discover(
    engine: &TemplateDiscovery,
    store: &TemplateStore,
    corpus_path: &Path,
    promote: usize,
    save: Option<&Path>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(corpus_path)
        .with_context(|| format!("Failed to read {}", corpus_path.display()))?;
    let corpus: Vec<String> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content).context("Corpus is not a JSON array of strings")?
    } else {
        content.lines().map(str::to_string).collect()
    };

    let candidates = engine.discover(&corpus, Some(&store.snapshot()))?;
    println!("{}", serde_json::to_string_pretty(&candidates)?);

    if promote > 0 {
        let mut records = Vec::new();
        for candidate in candidates.iter().take(promote) {
            match store.promote(candidate) {
                Ok(record) => records.push(record),
                Err(e) => eprintln!("Skipping {:?}: {e}", candidate.pattern),
            }
        }
        eprintln!("{}", serde_json::to_string_pretty(&records)?);
    }
    if let Some(path) = save {
        store.save_to_file(path)?;
    }
    Ok(())
}

fn cmd_templates(store: &TemplateStore, action: TemplatesAction) -> anyhow::Result<()> {
    match action {
        TemplatesAction::List { category } => {
            let snapshot = store.snapshot();
            println!("Template store version {}", snapshot.version());
            println!();
            println!("{:<6} {:<16} {:>6}  Pattern", "ID", "Category", "Uses");
            println!("{}", "-".repeat(72));
            for template in snapshot.iter() {
                if category.as_deref().is_some_and(|c| c != template.category()) {
                    continue;
                }
                println!(
                    "{:<6} {:<16} {:>6}  {:?}",
                    template.id(),
                    template.category(),
                    template.stats().uses(),
                    template.pattern()
                );
            }
        },

        TemplatesAction::Register {
            id,
            pattern,
            category,
            save,
        } => {
            let category =
                category.unwrap_or_else(|| aura::template::categorize(&pattern).to_string());
            let version = store.register(id, &pattern, &category)?;
            eprintln!("Registered template {id} (store version {version})");
            if let Some(path) = save {
                store.save_to_file(path)?;
            }
        },

        TemplatesAction::Demote { id, save } => {
            let version = store.demote(id)?;
            eprintln!("Demoted template {id} (store version {version})");
            if let Some(path) = save {
                store.save_to_file(path)?;
            }
        },

        TemplatesAction::Save { path } => {
            store.save_to_file(&path)?;
            eprintln!("Saved {} templates to {}", store.snapshot().len(), path.display());
        },
    }
    Ok(())
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input.filter(|s| s != "-") {
        Ok(s)
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}

fn read_container(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Vec<u8>> {
    let content = read_input(input, file)?;
    let bytes = BASE64
        .decode(content.trim())
        .context("Input is not base64")?;
    if detect_method(&bytes).is_none() {
        eprintln!("Warning: Input does not start with a known method tag");
    }
    Ok(bytes)
}

fn write_output(output: Option<PathBuf>, content: &str) -> anyhow::Result<()> {
    if let Some(path) = output {
        std::fs::write(path, content)?;
    } else {
        println!("{content}");
    }
    Ok(())
}
