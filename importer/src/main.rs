use anyhow::{bail, Context, Result};
use booksdb::{BookRecord, CatalogMeta, SledCatalog, Catalog};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputBook {
    id: Option<u64>,
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    published: Option<String>,
}

#[derive(Parser)]
#[command(name = "importer")]
#[command(about = "Load book records into the booksdb catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import books from JSON/JSONL files or a directory of them
    Load {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Catalog database path
        #[arg(long)]
        db: String,
        /// Drop existing records before importing
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
    /// Print catalog statistics
    Stats {
        /// Catalog database path
        #[arg(long)]
        db: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Load { input, db, replace } => {
            let catalog = SledCatalog::open(&db)?;
            let imported = load_books(&catalog, Path::new(&input), replace)?;
            tracing::info!(imported, total = catalog.len(), db, "import complete");
            Ok(())
        }
        Commands::Stats { db } => {
            let catalog = SledCatalog::open(&db)?;
            let meta = catalog.load_meta()?;
            tracing::info!(books = catalog.len(), ?meta, "catalog stats");
            Ok(())
        }
    }
}

fn load_books(catalog: &SledCatalog, input: &Path, replace: bool) -> Result<usize> {
    let mut parsed: Vec<InputBook> = Vec::new();
    for file in input_files(input) {
        let books = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file)?
        } else {
            read_json(&file)?
        };
        tracing::debug!(file = %file.display(), count = books.len(), "parsed input file");
        parsed.extend(books);
    }

    let mut explicit = HashSet::new();
    for id in parsed.iter().filter_map(|b| b.id) {
        if !explicit.insert(id) {
            bail!("duplicate book id {id} in input");
        }
    }
    if replace {
        catalog.clear()?;
    }
    // generated ids start above every id already stored or named in the input
    let highest = catalog.list_books()?.iter().map(|b| b.id).chain(explicit.iter().copied()).max();
    let mut next_id = match highest {
        Some(id) => id.checked_add(1),
        None => Some(0),
    };

    let mut books: Vec<BookRecord> = Vec::with_capacity(parsed.len());
    for input in parsed {
        let id = match input.id {
            Some(id) => id,
            None => {
                let Some(id) = next_id else {
                    bail!("no free book id left for {:?}", input.title);
                };
                next_id = id.checked_add(1);
                id
            }
        };
        books.push(BookRecord { id, title: input.title, authors: input.authors, series: input.series, published: input.published });
    }

    catalog.insert_books(&books)?;
    let meta = CatalogMeta {
        num_books: catalog.len() as u64,
        imported_at: time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "".into()),
        version: 1,
    };
    catalog.save_meta(&meta)?;
    Ok(books.len())
}

fn input_files(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

fn read_jsonl(file: &Path) -> Result<Vec<InputBook>> {
    let reader = BufReader::new(File::open(file)?);
    let mut books = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let book = serde_json::from_str(&line).with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
        books.push(book);
    }
    Ok(books)
}

fn read_json(file: &Path) -> Result<Vec<InputBook>> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader).with_context(|| format!("parsing {}", file.display()))?;
    match json {
        serde_json::Value::Array(arr) => arr
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect(),
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(json)?]),
        _ => Ok(Vec::new()),
    }
}
