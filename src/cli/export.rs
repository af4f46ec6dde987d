//! Export subcommand
//!
//! Writes a filtered bundle of the notebook as JSON, optionally gzipped.

use super::parse_kinds;
use crate::config::ExportConfig;
use crate::export::{DateRange, ExportFilterOptions};
use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the export subcommand
#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Output file path (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Force gzip compression (auto-detected from .gz extension otherwise)
    #[arg(long)]
    pub gzip: bool,

    /// Comma-separated list of kinds to export
    ///
    /// Available kinds: goal, project, task, thought, mood, focus_session, person
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub kinds: Option<Vec<String>>,

    /// Only records created at or after this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "WHEN")]
    pub since: Option<String>,

    /// Only records created at or before this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_name = "WHEN")]
    pub until: Option<String>,

    /// Comma-separated status allow-list (kinds without a status are unaffected)
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub status: Option<Vec<String>>,

    /// Leave out completed tasks, projects and goals
    #[arg(long)]
    pub exclude_completed: bool,

    /// Owner recorded in the bundle (overrides config)
    #[arg(long)]
    pub user: Option<String>,
}

impl ExportArgs {
    /// Build filter options, starting from the configured defaults.
    pub fn filter_options(&self, defaults: &ExportConfig) -> Result<ExportFilterOptions> {
        let mut options = ExportFilterOptions::default();
        if let Some(kinds) = &self.kinds {
            options = options.with_kinds(parse_kinds(kinds)?);
        }
        let since = self.since.as_deref().map(|s| parse_when(s, false)).transpose()?;
        let until = self.until.as_deref().map(|s| parse_when(s, true)).transpose()?;
        if since.is_some() || until.is_some() {
            if let (Some(start), Some(end)) = (since, until)
                && start > end
            {
                return Err(anyhow!("--since is after --until"));
            }
            options = options.with_date_range(DateRange::new(since, until));
        }
        if let Some(statuses) = &self.status {
            options = options.with_statuses(statuses.iter().map(|s| s.trim().to_string()));
        }
        if self.exclude_completed || !defaults.include_completed {
            options = options.without_completed();
        }
        Ok(options)
    }

    /// Determine if output should be compressed based on args and filename
    pub fn should_compress(&self, defaults: &ExportConfig) -> bool {
        if self.gzip || defaults.gzip {
            return true;
        }
        self.output
            .as_ref()
            .is_some_and(|path| path.extension().is_some_and(|ext| ext == "gz"))
    }
}

/// Parse an RFC 3339 timestamp or a bare date. A bare date covers the whole
/// day, so `end_of_day` picks its last instant.
fn parse_when(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| anyhow!("invalid date '{}': expected RFC 3339 or YYYY-MM-DD", value))?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("invalid date '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use chrono::TimeZone;

    #[test]
    fn test_parse_when() {
        assert_eq!(
            parse_when("2024-03-01", false).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        let end = parse_when("2024-03-01", true).unwrap();
        assert!(end > Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap());
        assert_eq!(
            parse_when("2024-03-01T12:00:00+02:00", false).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert!(parse_when("yesterday", false).is_err());
    }

    #[test]
    fn test_filter_options() {
        let args = ExportArgs {
            kinds: Some(vec!["tasks".into(), "mood".into()]),
            since: Some("2024-01-01".into()),
            status: Some(vec!["todo".into()]),
            ..Default::default()
        };
        let options = args.filter_options(&ExportConfig::default()).unwrap();
        assert_eq!(
            options.kinds.into_iter().collect::<Vec<_>>(),
            vec![EntityKind::Task, EntityKind::Mood]
        );
        assert!(options.date_range.is_some_and(|r| r.end.is_none()));
        assert!(options.include_completed);
    }

    #[test]
    fn test_config_can_exclude_completed() {
        let defaults = ExportConfig {
            include_completed: false,
            gzip: false,
        };
        let options = ExportArgs::default().filter_options(&defaults).unwrap();
        assert!(!options.include_completed);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let args = ExportArgs {
            since: Some("2024-02-01".into()),
            until: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(args.filter_options(&ExportConfig::default()).is_err());
    }

    #[test]
    fn test_should_compress() {
        let defaults = ExportConfig::default();
        assert!(!ExportArgs::default().should_compress(&defaults));

        let args = ExportArgs {
            output: Some(PathBuf::from("notebook.json.gz")),
            ..Default::default()
        };
        assert!(args.should_compress(&defaults));

        let args = ExportArgs {
            gzip: true,
            ..Default::default()
        };
        assert!(args.should_compress(&defaults));
    }
}
