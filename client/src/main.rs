use anyhow::{anyhow, bail, Context, Result};
use booksdb::{execute, BookRecord, SledCatalog, Store};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing_subscriber::{fmt, EnvFilter};

const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "booksdb-client")]
#[command(about = "Run a booksdb command and print the matching books")]
struct Args {
    /// Path to the catalog database
    db: PathBuf,
    /// Command name, e.g. `title`
    command: String,
    /// Command arguments
    args: Vec<String>,
    /// Print records as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
    /// Ask a running server on this socket instead of opening the database
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let records = match &args.socket {
        Some(socket) => query_socket(socket, &args.command, &args.args).await?,
        None => query_catalog(&args)?,
    };
    tracing::debug!(hits = records.len(), command = %args.command, "command finished");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &records)?;
        writeln!(out)?;
    } else {
        for record in &records {
            writeln!(out, "{}", format_record(record))?;
        }
    }
    Ok(())
}

fn query_catalog(args: &Args) -> Result<Vec<BookRecord>> {
    if !args.db.exists() {
        bail!("cannot access database {}", args.db.display());
    }
    let catalog = SledCatalog::open(&args.db)?;
    let store = Store::new();
    let snapshot = store.refresh(&catalog).with_context(|| format!("error initializing database {}", args.db.display()))?;
    execute(&snapshot, &args.command, &args.args).with_context(|| format!("error running command {:?}", args.command))
}

async fn query_socket(socket: &Path, command: &str, args: &[String]) -> Result<Vec<BookRecord>> {
    let mut stream = UnixStream::connect(socket).await.with_context(|| format!("connecting to {}", socket.display()))?;
    let mut line = std::iter::once(command).chain(args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ");
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;

    let mut reply = String::new();
    tokio::time::timeout(SOCKET_TIMEOUT, BufReader::new(&mut stream).read_line(&mut reply))
        .await
        .context("timed out waiting for server reply")??;

    let value: serde_json::Value = serde_json::from_str(reply.trim_end()).with_context(|| format!("unexpected reply {reply:?}"))?;
    if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
        return Err(anyhow!("server error: {err}"));
    }
    Ok(serde_json::from_value(value)?)
}

fn format_record(record: &BookRecord) -> String {
    let mut line = record.title.clone();
    if !record.authors.is_empty() {
        line.push_str(" by ");
        line.push_str(&record.authors.join(", "));
    }
    if let Some(series) = &record.series {
        line.push_str(&format!(" [{series}]"));
    }
    if let Some(published) = &record.published {
        line.push_str(&format!(" ({published})"));
    }
    line
}
