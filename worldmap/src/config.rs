use map_render::{OutOfRange, RenderOptions};
use serde::Deserialize;
use snapshot_fetch::FetchOptions;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use world_sqlite::{AggregateScope, StatsOptions};
use worldmap_core::Source;

pub const DEFAULT_CONFIG: &str = "worldmap.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("source {name}: invalid url {url:?}: {reason}")]
    Url { name: String, url: String, reason: String },
    #[error("source name {0:?} is not usable as a directory name")]
    BadName(String),
    #[error("source {0} is listed more than once")]
    Duplicate(String),
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct FetchConfig {
    pub timeout_ms: Option<u64>,
    pub deadline_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct RenderConfig {
    pub size: Option<u32>,
    pub offset: Option<i64>,
    pub extension: Option<String>,
    pub out_of_range: Option<OutOfRange>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct StatsConfig {
    pub scope: Option<AggregateScope>,
    pub exclude_unowned: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub fetch: Option<FetchConfig>,
    pub render: Option<RenderConfig>,
    pub stats: Option<StatsConfig>,
    pub sources: Option<Vec<Source>>,
}

/// Load `path`, or `./worldmap.yaml` when no path is given and the file exists.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
    Ok(Some(serde_yaml::from_str(&s)?))
}

/// Fully resolved settings for a run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub concurrency: usize,
    /// Upper bound on one source's whole pipeline.
    pub deadline: Duration,
    pub fetch: FetchOptions,
    pub render: RenderOptions,
    pub image_extension: String,
    pub stats: StatsOptions,
    pub sources: Vec<Source>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            concurrency: 4,
            deadline: Duration::from_secs(300),
            fetch: FetchOptions::default(),
            render: RenderOptions::default(),
            image_extension: "png".into(),
            stats: StatsOptions::default(),
            sources: Source::defaults(),
        }
    }
}

impl Settings {
    pub fn from_config(cfg: Option<Config>) -> Result<Self, ConfigError> {
        let mut s = Settings::default();
        let Some(cfg) = cfg else { return Ok(s) };
        if let Some(d) = cfg.data_dir { s.data_dir = d; }
        if let Some(c) = cfg.concurrency { s.concurrency = c.max(1); }
        if let Some(f) = cfg.fetch {
            if let Some(v) = f.timeout_ms { s.fetch.timeout_ms = v; }
            if let Some(v) = f.deadline_ms { s.deadline = Duration::from_millis(v); }
            if let Some(v) = f.user_agent { s.fetch.user_agent = v; }
            if let Some(v) = f.retries { s.fetch.retries = v; }
            if let Some(v) = f.retry_delay_ms { s.fetch.retry_delay_ms = v; }
        }
        if let Some(r) = cfg.render {
            if let Some(v) = r.size { s.render.size = v; }
            if let Some(v) = r.offset { s.render.offset = v; }
            if let Some(v) = r.extension { s.image_extension = v.trim_start_matches('.').to_string(); }
            if let Some(v) = r.out_of_range { s.render.out_of_range = v; }
        }
        if let Some(st) = cfg.stats {
            if let Some(v) = st.scope { s.stats.scope = v; }
            if let Some(v) = st.exclude_unowned { s.stats.exclude_unowned = v; }
        }
        if let Some(list) = cfg.sources {
            validate_sources(&list)?;
            s.sources = list;
        }
        Ok(s)
    }
}

fn validate_sources(sources: &[Source]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for src in sources {
        let name = src.name.trim();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ConfigError::BadName(src.name.clone()));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate(src.name.clone()));
        }
        let bad_url = |reason: String| ConfigError::Url { name: src.name.clone(), url: src.url.clone(), reason };
        let parsed = url::Url::parse(&src.url).map_err(|e| bad_url(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(bad_url(format!("unsupported scheme {}", parsed.scheme())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
data_dir: /srv/worldmap
concurrency: 2
fetch:
  timeout_ms: 5000
  deadline_ms: 60000
  retries: 0
render:
  size: 1000
  offset: 500
  extension: .jpg
  out_of_range: reject
stats:
  scope: latest
  exclude_unowned: true
sources:
  - name: ts1.travian.com
    url: http://ts1.travian.com/map.sql.gz
  - name: ts2.travian.de
    url: https://ts2.travian.de/map.sql.gz
"#;

    #[test]
    fn yaml_overrides_defaults() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let s = Settings::from_config(Some(cfg)).unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/srv/worldmap"));
        assert_eq!(s.concurrency, 2);
        assert_eq!(s.deadline, Duration::from_secs(60));
        assert_eq!(s.fetch.timeout_ms, 5000);
        assert_eq!(s.fetch.retries, 0);
        assert_eq!((s.render.size, s.render.offset), (1000, 500));
        assert_eq!(s.render.out_of_range, OutOfRange::Reject);
        assert_eq!(s.image_extension, "jpg");
        assert_eq!(s.stats.scope, AggregateScope::LatestPartition);
        assert!(s.stats.exclude_unowned);
        assert_eq!(s.sources.len(), 2);
        assert_eq!(s.sources[1].name, "ts2.travian.de");
    }

    #[test]
    fn no_config_means_reference_defaults() {
        let s = Settings::from_config(None).unwrap();
        assert_eq!(s.sources.len(), 8);
        assert_eq!((s.render.size, s.render.offset), (800, 400));
        assert_eq!(s.stats, StatsOptions::default());
        assert_eq!(s.image_extension, "png");
    }

    #[test]
    fn bad_sources_are_rejected() {
        let with = |name: &str, url: &str| Config { sources: Some(vec![Source::new(name, url)]), ..Config::default() };
        assert!(matches!(Settings::from_config(Some(with("a", "not a url"))), Err(ConfigError::Url { .. })));
        assert!(matches!(Settings::from_config(Some(with("a", "ftp://a/map.sql.gz"))), Err(ConfigError::Url { .. })));
        assert!(matches!(Settings::from_config(Some(with("../a", "http://a/map.sql.gz"))), Err(ConfigError::BadName(_))));

        let dup = Config {
            sources: Some(vec![Source::new("a", "http://a/x.gz"), Source::new("a", "http://b/x.gz")]),
            ..Config::default()
        };
        assert!(matches!(Settings::from_config(Some(dup)), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/worldmap.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
