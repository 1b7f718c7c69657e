use serde::Deserialize;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// One remote server whose map dump is ingested independently.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Source { name: name.into(), url: url.into() }
    }

    /// The eight international servers the utility has always tracked.
    pub fn defaults() -> Vec<Source> {
        (1..=8)
            .map(|n| {
                let host = format!("ts{n}.travian.com");
                let url = format!("http://{host}/map.sql.gz");
                Source::new(host, url)
            })
            .collect()
    }
}

/// Target date and base directory for one run, handed to every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub date: Date,
    pub base_dir: PathBuf,
}

impl RunContext {
    pub fn new(date: Date, base_dir: impl Into<PathBuf>) -> Self {
        RunContext { date, base_dir: base_dir.into() }
    }

    /// Partition key as stored in the `partition_date` column.
    pub fn date_key(&self) -> String {
        self.date.to_string()
    }

    pub fn source_dir(&self, source: &Source) -> PathBuf {
        self.base_dir.join(&source.name)
    }

    pub fn compressed_path(&self, source: &Source) -> PathBuf {
        self.source_dir(source).join(format!("{}.sql.gz", self.date))
    }

    pub fn text_path(&self, source: &Source) -> PathBuf {
        self.source_dir(source).join(format!("{}.sql", self.date))
    }

    pub fn image_path(&self, source: &Source, extension: &str) -> PathBuf {
        self.source_dir(source).join(format!("{}.{}", self.date, extension.trim_start_matches('.')))
    }

    pub fn db_path(&self, source: &Source) -> PathBuf {
        self.source_dir(source).join(format!("{}.sqlite", source.name))
    }

    /// Store path for a source without needing a date, used by read-only commands.
    pub fn db_path_in(base_dir: &Path, source_name: &str) -> PathBuf {
        base_dir.join(source_name).join(format!("{source_name}.sqlite"))
    }
}

/// Today's calendar date in UTC.
pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Parse a `YYYY-MM-DD` partition date.
pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn artifact_paths_are_named_by_date() {
        let ctx = RunContext::new(date!(2024 - 03 - 09), "/data");
        let src = Source::new("ts1.travian.com", "http://ts1.travian.com/map.sql.gz");
        assert_eq!(ctx.compressed_path(&src), PathBuf::from("/data/ts1.travian.com/2024-03-09.sql.gz"));
        assert_eq!(ctx.text_path(&src), PathBuf::from("/data/ts1.travian.com/2024-03-09.sql"));
        assert_eq!(ctx.image_path(&src, ".png"), PathBuf::from("/data/ts1.travian.com/2024-03-09.png"));
        assert_eq!(ctx.db_path(&src), PathBuf::from("/data/ts1.travian.com/ts1.travian.com.sqlite"));
        assert_eq!(RunContext::db_path_in(Path::new("/data"), "ts1.travian.com"), ctx.db_path(&src));
    }

    #[test]
    fn date_key_round_trips_through_parse() {
        let d = parse_date(" 2023-12-31 ").unwrap();
        assert_eq!(d, date!(2023 - 12 - 31));
        assert_eq!(RunContext::new(d, ".").date_key(), "2023-12-31");
        assert!(parse_date("31/12/2023").is_err());
    }

    #[test]
    fn default_sources_cover_eight_servers() {
        let all = Source::defaults();
        assert_eq!(all.len(), 8);
        assert_eq!(all[7].name, "ts8.travian.com");
        assert_eq!(all[0].url, "http://ts1.travian.com/map.sql.gz");
    }
}
