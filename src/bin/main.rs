use clap::Parser;
use crossterm::style::Stylize;
use std::path::PathBuf;
use std::process::ExitCode;
use trie_core::compiler::{default_sources, SourceReport, DEFAULT_DICT_ROOT, DEFAULT_PROGRESS_INTERVAL};
use trie_core::core::estimator::format_size;
use trie_core::{compile, CompileConfig, CompileReport, DictionarySource};

/// Compiles frequency-annotated word lists into a precompiled trie artifact.
#[derive(Parser, Debug)]
#[clap(name = "trie_precompile", version)]
struct Cli {
    /// Directory that receives precompiled_trie.bin and its metadata files.
    output_dir: PathBuf,

    /// Directory holding chars.dict.yaml and base.dict.yaml.
    #[clap(long, default_value = DEFAULT_DICT_ROOT)]
    dict_root: PathBuf,

    /// Dictionary source as TYPE=PATH, processed in the order given.
    /// Replaces the default chars/base list. Later sources win on duplicate words.
    #[clap(long = "source", value_name = "TYPE=PATH", value_parser = parse_source)]
    sources: Vec<DictionarySource>,

    /// Log progress every N loaded entries (0 disables).
    #[clap(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: u64,
}

fn parse_source(s: &str) -> Result<DictionarySource, String> {
    match s.split_once('=') {
        Some((dict_type, path)) if !dict_type.is_empty() && !path.is_empty() => {
            Ok(DictionarySource::new(dict_type, path))
        }
        _ => Err(format!("expected TYPE=PATH, got '{s}'")),
    }
}

fn main() -> ExitCode {
    // Parse before anything else so a usage error has no side effects.
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trie_core=info,trie_precompile=info")),
        )
        .init();

    let sources = if cli.sources.is_empty() {
        default_sources(&cli.dict_root)
    } else {
        cli.sources
    };
    let mut config = CompileConfig::new(sources, cli.output_dir);
    config.progress_interval = cli.progress_interval;

    match compile(&config) {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to build precompiled trie");
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// One row per dictionary type. The label is padded before styling so the
/// escape codes do not swallow the column width.
fn summary_line(source: &SourceReport) -> String {
    let stats = &source.stats;
    format!(
        "  {} {:>10} entries  {:>10}  {}  ({} skipped, {} defaulted, {} lossy, {} ms)",
        format!("{:<8}", stats.dict_type).cyan(),
        stats.loaded_count,
        format_size(stats.estimated_memory_bytes),
        stats.version_token,
        source.skipped_lines,
        source.defaulted_frequencies,
        source.lossy_lines,
        source.elapsed_ms,
    )
}

fn print_summary(report: &CompileReport) {
    println!("{}", "Precompiled trie".bold());
    for source in &report.sources {
        println!("{}", summary_line(source));
    }
    println!(
        "  {} {} entries, {} words, {} nodes",
        "total".green().bold(),
        report.total_entries,
        report.word_count,
        report.node_count
    );
    println!("  saved to {}", report.paths.trie.display());
}
