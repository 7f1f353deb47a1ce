use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codecells::config::{discover, load_from_path, Config};
use codecells::{AnnotationDeclarer, Declaration, Declarer, FileTracker, PatchKind, Scope};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "codecells")]
#[command(about = "Inspect and maintain output blocks of runnable cells in source files", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: nearest codecells.toml above the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the cells declared in files or directories
    List {
        /// Files or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write an output block after the cell that starts at a line
    Patch {
        file: PathBuf,

        /// 1-based line where the cell starts
        #[arg(short, long)]
        line: usize,

        /// Rendered text to put in the block
        #[arg(short, long)]
        text: String,

        /// Show what would change without modifying the file
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Remove every output block from a file
    Strip {
        file: PathBuf,

        /// Report how many blocks would be removed without modifying the file
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Re-declare cells whenever the files change, until Ctrl-C
    Watch {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => tracing::Level::DEBUG,
        (Commands::Watch { .. }, false) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List { paths, json } => cmd_list(&config, &paths, json),
        Commands::Patch {
            file,
            line,
            text,
            dry_run,
            diff,
        } => cmd_patch(&config, &file, line, &text, dry_run, diff),
        Commands::Strip { file, dry_run } => cmd_strip(&config, &file, dry_run),
        Commands::Watch { files } => cmd_watch(&config, &files).await,
    }
}

fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(load_from_path(path)?);
    }
    let cwd = env::current_dir().context("cannot determine current directory")?;
    let (config, found) = discover(&cwd)?;
    if let Some(path) = found {
        tracing::debug!(path = %path.display(), "loaded config");
    }
    Ok(config)
}

fn declarer(config: &Config) -> AnnotationDeclarer {
    AnnotationDeclarer::new(config.declare.leaders.iter().cloned(), config.markers())
}

/// Files under `paths`, skipping hidden entries and asset directories.
fn collect_files(config: &Config, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in paths {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with('.') || name == config.assets_dir)
        });
        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[derive(serde::Serialize)]
struct FileCells {
    file: PathBuf,
    cells: Vec<Declaration>,
}

fn cmd_list(config: &Config, paths: &[PathBuf], json: bool) -> Result<()> {
    let declarer = declarer(config);
    let mut listed = Vec::new();
    let mut failures = 0;

    for file in collect_files(config, paths)? {
        // Binary and non-UTF-8 files cannot hold cells.
        let Ok(content) = fs::read_to_string(&file) else {
            continue;
        };
        match declarer.declare(&file, &content) {
            Ok(cells) if cells.is_empty() => {}
            Ok(cells) => listed.push(FileCells { file, cells }),
            Err(e) => {
                eprintln!("{} {}", "✗".red(), e);
                failures += 1;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
    } else {
        for entry in &listed {
            println!("{}", entry.file.display().to_string().bold());
            for cell in &entry.cells {
                println!("  {:>5}  {}", cell.line.to_string().dimmed(), cell.name.cyan());
            }
        }
        let total: usize = listed.iter().map(|entry| entry.cells.len()).sum();
        println!(
            "\n{} cell(s) in {} file(s)",
            total.to_string().green(),
            listed.len()
        );
    }

    if failures > 0 {
        anyhow::bail!("{failures} file(s) have invalid cell annotations");
    }
    Ok(())
}

fn cmd_patch(
    config: &Config,
    file: &Path,
    line: usize,
    text: &str,
    dry_run: bool,
    diff: bool,
) -> Result<()> {
    let patcher = config.patcher();

    if dry_run || diff {
        let original = fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let modified = patcher.preview(file, line, text)?;
        if diff {
            display_diff(file, &original, &modified);
        }
        if dry_run {
            if original == modified {
                println!("{} {}: already up to date", "✓".green(), file.display());
            } else {
                println!("{}", "  [DRY RUN - file not modified]".cyan());
            }
            return Ok(());
        }
    }

    let outcome = patcher.patch(file, line, text)?;
    match outcome.kind {
        PatchKind::Inserted => println!("{} {}: inserted output block", "✓".green(), file.display()),
        PatchKind::Replaced => println!("{} {}: replaced output block", "✓".green(), file.display()),
        PatchKind::Unchanged => println!("{} {}: already up to date", "⊘".cyan(), file.display()),
    }
    Ok(())
}

fn cmd_strip(config: &Config, file: &Path, dry_run: bool) -> Result<()> {
    let patcher = config.patcher();

    let removed = if dry_run {
        let content = fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let (_, removed) = patcher.markers().strip_blocks(&content)?;
        removed
    } else {
        patcher.strip(file)?
    };

    let verb = if dry_run { "would remove" } else { "removed" };
    println!(
        "{} {}: {} {} output block(s)",
        "✓".green(),
        file.display(),
        verb,
        removed
    );
    Ok(())
}

async fn cmd_watch(config: &Config, files: &[PathBuf]) -> Result<()> {
    let scope = Arc::new(Scope::from_config(config));
    let tracker = FileTracker::new(config.watch.clone());

    for file in files {
        let redeclared = scope.load(file)?;
        tracker.track(file, Arc::clone(&scope))?;
        println!(
            "{} {} ({} cell(s) declared)",
            "watching".bold(),
            file.display(),
            redeclared.declared.len() + redeclared.unbound.len()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    println!("\n{} after {} re-declaration(s)", "stopping".bold(), tracker.redeclarations());
    tracker.shutdown().await;
    Ok(())
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!("\n{}", format!("--- {} (original)", file.display()).dimmed());
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}
