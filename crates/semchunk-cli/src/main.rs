//! semchunk - 语义代码分块与差异检测工具
//!
//! 基于 Tree-sitter 的代码分块工具，沿函数和类边界切分源码树，
//! 并能在 Git 修订版之间检测语义级别的代码变更。

mod cli;

use cli::{ChunkArgs, ChunkFormatArg, Cli, Commands, DiffArgs, DiffFormatArg};
use semchunk_core::{
    ChangeKind, Chunk, ChunkPipeline, GixRepository, Result, SemanticDiffDetector,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {e}");
        std::process::exit(2);
    }

    let result = match &cli.command {
        Commands::Chunk(args) => run_chunk(args),
        Commands::Diff(args) => run_diff(args),
    };

    if let Err(e) = result {
        error!("Application error: {e}");
        std::process::exit(1);
    }
}

/// 初始化日志记录；日志写到标准错误，不污染结果输出
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => Ok(Box::new(BufWriter::new(File::create(path)?))),
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// chunk 子命令：切分目录树并流式输出块
fn run_chunk(args: &ChunkArgs) -> Result<()> {
    let pipeline = ChunkPipeline::new(args.pipeline_config())?;
    let mut stream = pipeline.process_directory(&args.root)?;
    let mut output = open_output(args.output_file.as_deref())?;

    match args.format {
        ChunkFormatArg::Text => {
            for chunk in stream.by_ref() {
                write_chunk_text(&mut output, &chunk)?;
            }
        }
        ChunkFormatArg::Jsonl => {
            for chunk in stream.by_ref() {
                serde_json::to_writer(&mut output, &chunk)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                writeln!(output)?;
            }
        }
        ChunkFormatArg::Json => {
            let chunks: Vec<Chunk> = stream.by_ref().collect();
            serde_json::to_writer_pretty(&mut output, &chunks)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            writeln!(output)?;
        }
    }
    output.flush()?;

    let report = stream.into_report();
    info!(
        "Chunked {} files into {} chunks in {:?}",
        report.files_total, report.chunks_emitted, report.duration
    );
    if args.stats {
        eprintln!(
            "files: {}  chunks: {}  bytes: {}  failures: {}  elapsed: {:.2?}",
            report.files_total,
            report.chunks_emitted,
            report.bytes_emitted,
            report.files_failed,
            report.duration
        );
        for failure in &report.failures {
            eprintln!("  failed {}: {}", failure.path.display(), failure.reason);
        }
    }
    Ok(())
}

fn write_chunk_text(output: &mut dyn Write, chunk: &Chunk) -> Result<()> {
    writeln!(
        output,
        "==== {}:{}-{} ({} bytes{}) ====",
        chunk.file_path.display(),
        chunk.start_line,
        chunk.end_line,
        chunk.size_bytes,
        if chunk.is_complete_unit { "" } else { ", partial" }
    )?;
    if let Some(context) = &chunk.class_context {
        writeln!(output, "context: {context}")?;
    }
    if !chunk.contained_units.is_empty() {
        let units: Vec<&str> = chunk
            .contained_units
            .iter()
            .map(|unit| unit.qualified_name.as_str())
            .collect();
        writeln!(output, "units: {}", units.join(", "))?;
    }
    output.write_all(chunk.content.as_bytes())?;
    if !chunk.content.ends_with('\n') {
        writeln!(output)?;
    }
    writeln!(output)?;
    Ok(())
}

/// diff 子命令：检测两个修订版之间的语义变更
fn run_diff(args: &DiffArgs) -> Result<()> {
    let store = GixRepository::open(args.repo_path.clone())?;
    let detector = SemanticDiffDetector::new(&store);
    let report = detector.detect(&args.old, args.new.as_deref())?;
    let mut output = open_output(args.output_file.as_deref())?;

    match args.format {
        DiffFormatArg::Json => {
            serde_json::to_writer_pretty(&mut output, &report)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            writeln!(output)?;
        }
        DiffFormatArg::Text => {
            for change in &report.changes {
                let marker = match change.change_type {
                    ChangeKind::Added => "+",
                    ChangeKind::Removed => "-",
                    ChangeKind::Modified => "~",
                };
                let signature = change
                    .new_signature
                    .as_deref()
                    .or(change.old_signature.as_deref())
                    .unwrap_or("");
                write!(
                    output,
                    "{marker} {} {} [{}] {signature}",
                    change.file_path.display(),
                    change.qualified_name,
                    change.element_kind.as_str(),
                )?;
                if let Some(old_path) = &change.renamed_from {
                    write!(output, " (renamed from {})", old_path.display())?;
                }
                writeln!(output)?;
            }
            writeln!(
                output,
                "{} changes across {} files ({} failures)",
                report.changes.len(),
                report.files_compared,
                report.failure_count()
            )?;
        }
    }
    output.flush()?;

    for failure in &report.failures {
        error!("failed to compare {}: {}", failure.path.display(), failure.reason);
    }
    Ok(())
}
