//! Per-source fetch → parse → load → aggregate → render, fanned out across sources.

use crate::config::Settings;
use dump_parser::ParseError;
use map_render::RenderOptions;
use serde::Serialize;
use snapshot_fetch::{ensure_snapshot, FetchError, FetchOutcome, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument, Span};
use world_sqlite::{Db, LoadSummary, Statistics, StatsOptions, StoreError};
use worldmap_core::{RunContext, Source};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("bad dump {}: {source}", .path.display())]
    Parse { path: PathBuf, #[source] source: ParseError },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not {op} {}: {source}", .path.display())]
    Io { op: &'static str, path: PathBuf, #[source] source: std::io::Error },
    #[error("gave up after {0:?}")]
    Deadline(Duration),
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub date: String,
    pub fetch: String,
    pub load: LoadSummary,
    pub stats: Statistics,
    pub image: Option<PathBuf>,
    pub plotted: usize,
    pub skipped_points: Vec<(i64, i64)>,
    /// Set when the map could not be produced; the load itself still stands.
    pub render_error: Option<String>,
}

fn describe(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Cached => "cached".into(),
        FetchOutcome::Inflated { .. } => "inflated from cached archive".into(),
        FetchOutcome::Downloaded { bytes, sha256 } => format!("downloaded {bytes} bytes (sha256 {sha256})"),
    }
}

/// Run every source, at most `settings.concurrency` at a time. Results come
/// back in the order given; a failing source never stops the others.
pub async fn run_all<T: Transport + 'static>(
    ctx: &RunContext,
    sources: Vec<Source>,
    transport: Arc<T>,
    settings: Arc<Settings>,
) -> Vec<(Source, Result<SourceReport, SourceError>)> {
    let sem = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let sem = sem.clone();
        let ctx = ctx.clone();
        let transport = transport.clone();
        let settings = settings.clone();
        let src = source.clone();
        let span = info_span!("source", name = %source.name);
        let h = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await;
                run_source(&ctx, &src, transport.as_ref(), &settings).await
            }
            .instrument(span),
        );
        handles.push((source, h));
    }

    let mut out = Vec::with_capacity(handles.len());
    for (source, h) in handles {
        let res = h.await.unwrap_or_else(|e| Err(SourceError::Task(e)));
        if let Err(e) = &res {
            warn!(source = %source.name, error = %e, "source failed");
        }
        out.push((source, res));
    }
    out
}

/// One source under the configured deadline.
///
/// The fetch is abandoned once the deadline passes. The blocking load is
/// always awaited, so the permit stays held until it ends; it checks the
/// deadline itself and commits nothing once it has passed.
pub async fn run_source<T: Transport>(
    ctx: &RunContext,
    source: &Source,
    transport: &T,
    settings: &Settings,
) -> Result<SourceReport, SourceError> {
    process_source(ctx, source, transport, settings, Instant::now() + settings.deadline).await
}

pub async fn process_source<T: Transport>(
    ctx: &RunContext,
    source: &Source,
    transport: &T,
    settings: &Settings,
    deadline: Instant,
) -> Result<SourceReport, SourceError> {
    let dir = ctx.source_dir(source);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| SourceError::Io { op: "create", path: dir.clone(), source: e })?;

    info!(url = %source.url, "fetching snapshot");
    let compressed_path = ctx.compressed_path(source);
    let text_path = ctx.text_path(source);
    let fetch = ensure_snapshot(transport, &source.url, &compressed_path, &text_path, &settings.fetch);
    let outcome = tokio::time::timeout_at(deadline.into(), fetch)
        .await
        .map_err(|_| SourceError::Deadline(settings.deadline))??;
    let fetch = describe(&outcome);

    let job = LoadJob {
        ctx: ctx.clone(),
        source: source.clone(),
        stats: settings.stats,
        render: settings.render.clone(),
        image_extension: settings.image_extension.clone(),
        deadline,
        budget: settings.deadline,
    };
    let span = Span::current();
    let report = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        job.run(fetch)
    })
    .await??;
    Ok(report)
}

struct LoadJob {
    ctx: RunContext,
    source: Source,
    stats: StatsOptions,
    render: RenderOptions,
    image_extension: String,
    deadline: Instant,
    budget: Duration,
}

impl LoadJob {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    // Each step opens its own connection and drops it when done.
    fn run(self, fetch: String) -> Result<SourceReport, SourceError> {
        let text_path = self.ctx.text_path(&self.source);
        let text = std::fs::read_to_string(&text_path)
            .map_err(|e| SourceError::Io { op: "read", path: text_path.clone(), source: e })?;
        let rows = dump_parser::parse_dump(&text).map_err(|e| SourceError::Parse { path: text_path.clone(), source: e })?;
        info!(rows = rows.len(), "parsed dump");

        if self.expired() {
            return Err(SourceError::Deadline(self.budget));
        }
        let db_path = self.ctx.db_path(&self.source);
        if Db::open_or_create(&db_path)?.ensure_schema()? {
            info!(path = %db_path.display(), "created table");
        }
        let load = Db::open_or_create(&db_path)?.load_partition(self.ctx.date, &rows)?;
        info!(removed = load.removed, inserted = load.inserted, date = %self.ctx.date, "loaded partition");

        let stats = Db::open_or_create(&db_path)?.statistics(self.stats)?;
        info!(population = ?stats.population, owners = stats.owner_count, settlements = stats.settlement_count, "statistics");

        let points = Db::open_or_create(&db_path)?.coordinates(self.ctx.date)?;
        let image_path = self.ctx.image_path(&self.source, &self.image_extension);
        let mut report = SourceReport {
            source: self.source.name.clone(),
            date: self.ctx.date_key(),
            fetch,
            load,
            stats,
            image: None,
            plotted: 0,
            skipped_points: Vec::new(),
            render_error: None,
        };
        // The partition is committed by now, so a late run still reports it.
        if self.expired() {
            warn!("deadline passed after load, map not rendered");
            report.render_error = Some(format!("skipped: deadline of {:?} passed", self.budget));
            return Ok(report);
        }
        match map_render::render_to_file(&points, &image_path, &self.render) {
            Ok(r) => {
                info!(path = %r.path.display(), plotted = r.plotted, skipped = r.skipped.len(), "rendered map");
                report.image = Some(r.path);
                report.plotted = r.plotted;
                report.skipped_points = r.skipped;
            }
            Err(e) => {
                warn!(error = %e, "map render failed");
                report.render_error = Some(e.to_string());
            }
        }
        Ok(report)
    }
}
