//! Reason-based record filtering

use crate::config::ConfigError;
use crate::events::ATTR_EVENT_REASON;
use crate::logs::{LogBatch, LogRecord};
use std::collections::HashSet;

/// Wildcard that lets every record through
pub const FILTER_ALLOW_ALL: &str = "*";

/// Separator between reasons in a filter string
pub const FILTER_SEPARATOR: char = '|';

/// Immutable filter built once from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonFilter {
    /// Keep every record
    AllowAll,

    /// Keep records whose reason is one of these (exact, case-sensitive)
    AllowList(HashSet<String>),
}

impl Default for ReasonFilter {
    fn default() -> Self {
        ReasonFilter::AllowAll
    }
}

impl ReasonFilter {
    /// Parse a `|`-delimited reason list, or `*`.
    ///
    /// Segments are trimmed and blank ones skipped. A `*` segment anywhere
    /// turns the filter into [`ReasonFilter::AllowAll`], so `"Created|*"`
    /// keeps every record just like `"*"`.
    pub fn parse(filter: &str) -> Result<Self, ConfigError> {
        let reasons: Vec<&str> = filter
            .split(FILTER_SEPARATOR)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect();

        if reasons.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "some valid fields should be provided in filter ('*', 'Created|Deleted'), provided: '{}'",
                filter
            )));
        }

        if reasons.contains(&FILTER_ALLOW_ALL) {
            return Ok(ReasonFilter::AllowAll);
        }

        Ok(ReasonFilter::AllowList(
            reasons.into_iter().map(String::from).collect(),
        ))
    }

    /// Build an allow-list filter from explicit reasons
    pub fn allow<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReasonFilter::AllowList(reasons.into_iter().map(Into::into).collect())
    }

    pub fn is_allow_all(&self) -> bool {
        matches!(self, ReasonFilter::AllowAll)
    }

    /// Decide whether a record with this reason passes.
    ///
    /// Records that carry no reason at all are always kept.
    pub fn should_keep(&self, reason: Option<&str>) -> bool {
        match (self, reason) {
            (_, None) => true,
            (ReasonFilter::AllowAll, Some(_)) => true,
            (ReasonFilter::AllowList(reasons), Some(reason)) => reasons.contains(reason),
        }
    }

    /// Apply [`should_keep`](Self::should_keep) to a record's reason attribute
    pub fn should_keep_record(&self, record: &LogRecord) -> bool {
        if self.is_allow_all() {
            return true;
        }
        let reason = record
            .attributes
            .get(ATTR_EVENT_REASON)
            .map(|v| v.as_string());
        self.should_keep(reason.as_deref())
    }

    /// Prune a batch in place, removing emptied groups bottom-up.
    /// Returns the number of records dropped.
    pub fn apply(&self, batch: &mut LogBatch) -> usize {
        if self.is_allow_all() {
            return 0;
        }
        batch.retain_records(|record| self.should_keep_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{Attributes, ResourceLogs, ScopeLogs};

    fn record(reason: Option<&str>) -> LogRecord {
        let record = LogRecord::new("body");
        match reason {
            Some(r) => record.with_attr(ATTR_EVENT_REASON, r),
            None => record,
        }
    }

    #[test]
    fn test_wildcard_keeps_everything() {
        let filter = ReasonFilter::parse("*").unwrap();
        assert!(filter.is_allow_all());
        assert!(filter.should_keep(Some("Created")));
        assert!(filter.should_keep(Some("anything at all")));
        assert!(filter.should_keep(None));
    }

    #[test]
    fn test_allow_list() {
        let filter = ReasonFilter::parse("Created|Deleted").unwrap();
        assert!(filter.should_keep(Some("Created")));
        assert!(filter.should_keep(Some("Deleted")));
        assert!(!filter.should_keep(Some("Updated")));
        assert!(!filter.should_keep(Some("created")));
        assert!(filter.should_keep(None));
    }

    #[test]
    fn test_parse_skips_blank_segments() {
        let filter = ReasonFilter::parse("Created||Deleted|").unwrap();
        assert_eq!(filter, ReasonFilter::allow(["Created", "Deleted"]));
    }

    #[test]
    fn test_parse_wildcard_inside_list() {
        let filter = ReasonFilter::parse("Created|*").unwrap();
        assert!(filter.is_allow_all());
        assert!(filter.should_keep(Some("Updated")));
        assert_eq!(filter, ReasonFilter::parse("*").unwrap());
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(ReasonFilter::parse("").is_err());
        assert!(ReasonFilter::parse(" | ").is_err());
    }

    #[test]
    fn test_apply_prunes_groups() {
        let mut batch = LogBatch {
            resource_logs: vec![
                ResourceLogs {
                    resource: Attributes::new(),
                    scope_logs: vec![ScopeLogs {
                        scope: Some("updates".into()),
                        log_records: vec![record(Some("Updated")), record(Some("Updated"))],
                    }],
                },
                ResourceLogs {
                    resource: Attributes::new(),
                    scope_logs: vec![
                        ScopeLogs {
                            scope: Some("mixed".into()),
                            log_records: vec![record(Some("Created")), record(None)],
                        },
                        ScopeLogs {
                            scope: Some("updates".into()),
                            log_records: vec![record(Some("Updated"))],
                        },
                    ],
                },
            ],
        };

        let dropped = ReasonFilter::parse("Created").unwrap().apply(&mut batch);

        assert_eq!(dropped, 3);
        assert_eq!(batch.resource_logs.len(), 1);
        assert_eq!(batch.resource_logs[0].scope_logs.len(), 1);
        assert_eq!(
            batch.resource_logs[0].scope_logs[0].scope.as_deref(),
            Some("mixed")
        );
        assert_eq!(batch.record_count(), 2);
    }
}
