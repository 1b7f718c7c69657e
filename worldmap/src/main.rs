use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use map_render::OutOfRange;
use snapshot_fetch::HttpTransport;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use world_sqlite::{AggregateScope, Db};
use worldmap_core::{parse_date, today, RunContext, Source, TABLE};

mod config;
mod pipeline;

use config::Settings;
use pipeline::SourceReport;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ScopeArg { All, Latest }

impl From<ScopeArg> for AggregateScope {
    fn from(s: ScopeArg) -> Self {
        match s {
            ScopeArg::All => AggregateScope::AllTime,
            ScopeArg::Latest => AggregateScope::LatestPartition,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "worldmap", version, about = "Daily map dump ingestion into per-server SQLite stores")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./worldmap.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Base directory holding one subdirectory per server
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// List configured servers
    Sources,
    /// Fetch, load, summarize and render every configured server
    Run {
        /// Partition date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<String>,
        /// Only process these servers (repeatable)
        #[arg(long = "source", value_name = "NAME")]
        sources: Vec<String>,
        /// Servers processed at the same time
        #[arg(long)]
        concurrency: Option<usize>,
        /// Per-server deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Output format: text or json (one object per line)
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print statistics from a server's store
    Stats {
        #[arg(long)]
        source: String,
        /// Rows covered: every stored date, or only the latest one
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,
        /// Do not count owner id 0 as an owner
        #[arg(long, default_value_t = false)]
        exclude_unowned: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Render the map of one stored partition
    Render {
        #[arg(long)]
        source: String,
        /// Partition date (YYYY-MM-DD). Defaults to the latest stored date.
        #[arg(long)]
        date: Option<String>,
        /// Output image; the format follows the extension
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Fail instead of skipping points outside the canvas
        #[arg(long, default_value_t = false)]
        reject_out_of_range: bool,
    },
    /// Print a dump with explicit column lists, validating every line
    Rewrite { file: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let loaded_cfg = config::load_config(cli.config.as_deref())?;
    let mut settings = Settings::from_config(loaded_cfg)?;
    if let Some(d) = cli.data_dir { settings.data_dir = d; }

    match cli.command {
        Commands::Version => {
            println!("worldmap {} (core {})", env!("CARGO_PKG_VERSION"), worldmap_core::version());
        }
        Commands::Sources => {
            for s in &settings.sources { println!("{}\t{}", s.name, s.url); }
        }
        Commands::Run { date, sources, concurrency, deadline_ms, format } => {
            if let Some(c) = concurrency { settings.concurrency = c.max(1); }
            if let Some(ms) = deadline_ms { settings.deadline = Duration::from_millis(ms); }
            let date = match date {
                Some(d) => parse_date(&d).with_context(|| format!("invalid --date {d}"))?,
                None => today(),
            };
            let selected = select_sources(&settings.sources, &sources)?;
            let ctx = RunContext::new(date, settings.data_dir.clone());
            let transport = Arc::new(HttpTransport::new(&settings.fetch)?);
            let settings = Arc::new(settings);

            let started = Instant::now();
            let rt = tokio::runtime::Runtime::new()?;
            let results = rt.block_on(pipeline::run_all(&ctx, selected, transport, settings));
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();

            let stdout = std::io::stdout();
            let mut w = BufWriter::new(stdout.lock());
            for (source, res) in &results {
                match (format, res) {
                    (OutputFormat::Text, Ok(r)) => write_text_report(&mut w, r)?,
                    (OutputFormat::Text, Err(e)) => writeln!(w, "{}: FAILED: {}", source.name, e)?,
                    (OutputFormat::Json, Ok(r)) => writeln!(w, "{}", serde_json::to_string(r)?)?,
                    (OutputFormat::Json, Err(e)) => {
                        let obj = serde_json::json!({ "source": source.name, "date": ctx.date_key(), "error": e.to_string() });
                        writeln!(w, "{}", serde_json::to_string(&obj)?)?;
                    }
                }
            }
            w.flush()?;
            tracing::info!(sources = results.len(), failed, duration_ms = started.elapsed().as_millis() as u64, "run finished");
            if failed > 0 {
                bail!("{failed} of {} sources failed", results.len());
            }
        }
        Commands::Stats { source, scope, exclude_unowned, format } => {
            let mut opts = settings.stats;
            if let Some(s) = scope { opts.scope = s.into(); }
            if exclude_unowned { opts.exclude_unowned = true; }
            let db = open_existing(&settings, &source)?;
            let stats = db.statistics(opts)?;
            match format {
                OutputFormat::Text => {
                    println!("{source}:");
                    println!("  population: {}", stats.population.map(|p| p.to_string()).unwrap_or_else(|| "-".into()));
                    println!("  owners: {}", stats.owner_count);
                    println!("  settlements: {}", stats.settlement_count);
                }
                OutputFormat::Json => {
                    let obj = serde_json::json!({ "source": source, "scope": opts.scope, "exclude_unowned": opts.exclude_unowned, "stats": stats });
                    println!("{}", serde_json::to_string(&obj)?);
                }
            }
        }
        Commands::Render { source, date, out, reject_out_of_range } => {
            let db = open_existing(&settings, &source)?;
            let date = match date {
                Some(d) => parse_date(&d).with_context(|| format!("invalid --date {d}"))?,
                None => {
                    let latest = db.latest_partition()?.ok_or_else(|| anyhow!("{source} has no stored partitions"))?;
                    parse_date(&latest).with_context(|| format!("stored partition date {latest:?} is not YYYY-MM-DD"))?
                }
            };
            let points = db.coordinates(date)?;
            drop(db);
            let mut opts = settings.render.clone();
            if reject_out_of_range { opts.out_of_range = OutOfRange::Reject; }
            let ctx = RunContext::new(date, settings.data_dir.clone());
            let path = out.unwrap_or_else(|| ctx.image_path(&Source::new(source.clone(), String::new()), &settings.image_extension));
            let report = map_render::render_to_file(&points, &path, &opts)?;
            println!("{} ({} points plotted, {} skipped)", report.path.display(), report.plotted, report.skipped.len());
        }
        Commands::Rewrite { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let stdout = std::io::stdout();
            let mut w = BufWriter::new(stdout.lock());
            for (idx, line) in text.lines().enumerate() {
                let line = line.trim_start_matches('\u{feff}');
                if line.trim().is_empty() { continue; }
                let stmt = dump_parser::rewrite_line(idx + 1, line).with_context(|| format!("in {}", file.display()))?;
                writeln!(w, "{stmt}")?;
            }
            w.flush()?;
        }
    }
    Ok(())
}

fn select_sources(all: &[Source], wanted: &[String]) -> Result<Vec<Source>> {
    if wanted.is_empty() {
        return Ok(all.to_vec());
    }
    wanted
        .iter()
        .map(|name| {
            all.iter()
                .find(|s| &s.name == name)
                .cloned()
                .ok_or_else(|| anyhow!("unknown source {name}"))
        })
        .collect()
}

fn open_existing(settings: &Settings, source: &str) -> Result<Db> {
    let path = RunContext::db_path_in(&settings.data_dir, source);
    if !path.exists() {
        bail!("no store for {source} at {}", path.display());
    }
    let db = Db::open_or_create(&path)?;
    if !db.table_exists(TABLE)? {
        bail!("{} has no {TABLE} table", path.display());
    }
    Ok(db)
}

fn write_text_report(w: &mut impl Write, r: &SourceReport) -> std::io::Result<()> {
    writeln!(w, "{} ({}):", r.source, r.date)?;
    writeln!(w, "  snapshot: {}", r.fetch)?;
    writeln!(w, "  loaded: {} rows ({} replaced)", r.load.inserted, r.load.removed)?;
    let population = r.stats.population.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
    writeln!(w, "  population: {}", population)?;
    writeln!(w, "  owners: {}", r.stats.owner_count)?;
    writeln!(w, "  settlements: {}", r.stats.settlement_count)?;
    match (&r.image, &r.render_error) {
        (Some(p), _) if r.skipped_points.is_empty() => writeln!(w, "  map: {}", p.display()),
        (Some(p), _) => writeln!(w, "  map: {} ({} points outside the canvas)", p.display(), r.skipped_points.len()),
        (None, Some(e)) => writeln!(w, "  map: not rendered: {e}"),
        (None, None) => writeln!(w, "  map: not rendered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "worldmap", "--data-dir", "/tmp/w", "run", "--date", "2024-01-01", "--source", "ts1.travian.com", "--source", "ts2.travian.com", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/w")));
        match cli.command {
            Commands::Run { date, sources, format, .. } => {
                assert_eq!(date.as_deref(), Some("2024-01-01"));
                assert_eq!(sources, ["ts1.travian.com", "ts2.travian.com"]);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn source_filter_keeps_requested_order_and_rejects_unknown() {
        let all = Source::defaults();
        let picked = select_sources(&all, &["ts3.travian.com".into(), "ts1.travian.com".into()]).unwrap();
        assert_eq!(picked.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), ["ts3.travian.com", "ts1.travian.com"]);
        assert_eq!(select_sources(&all, &[]).unwrap().len(), 8);
        assert!(select_sources(&all, &["nope".into()]).is_err());
    }

    #[test]
    fn scope_flag_maps_to_store_scope() {
        assert_eq!(AggregateScope::from(ScopeArg::Latest), AggregateScope::LatestPartition);
        assert_eq!(AggregateScope::from(ScopeArg::All), AggregateScope::AllTime);
    }
}
