//! Splitting a timeline request into independently schedulable work units.

use std::sync::Arc;

use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveTime, Utc};

use crate::error::{DomainError, DomainResult};
use crate::model::{TimelineRequest, WorkUnit};

/// Configuration for time-range segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationConfig {
    /// Maximum number of calendar days covered by one unit.
    pub max_span_days: u32,
    /// Maximum number of units produced for one request.
    pub max_segments: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            max_span_days: 7,
            max_segments: 10,
        }
    }
}

impl SegmentationConfig {
    /// Sets the maximum span per unit.
    pub fn with_max_span_days(mut self, days: u32) -> Self {
        self.max_span_days = days;
        self
    }

    /// Sets the maximum number of units.
    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }
}

/// Returns true if `[start, end]` covers more calendar days than `max_span_days`.
pub fn needs_segmentation(start: DateTime<Utc>, end: DateTime<Utc>, max_span_days: u32) -> bool {
    let days = (end.date_naive() - start.date_naive()).num_days() + 1;
    days > i64::from(max_span_days)
}

/// Splits the request's range into work units.
///
/// Each unit ends at 23:59:59 of its last calendar day (or at the request end)
/// and the next unit starts one second later. Production stops after
/// `max_segments` units even if the range is not fully covered.
pub fn segment_time_range(
    request: Arc<TimelineRequest>,
    config: &SegmentationConfig,
) -> DomainResult<Vec<WorkUnit>> {
    if config.max_span_days == 0 {
        return Err(DomainError::validation("max_span_days must be greater than 0"));
    }
    if config.max_segments == 0 {
        return Err(DomainError::validation("max_segments must be greater than 0"));
    }
    let (start, end) = (request.start, request.end);
    if start > end {
        return Err(DomainError::validation(format!(
            "start {start} is after end {end}"
        )));
    }

    if start == end {
        return Ok(vec![WorkUnit::new(
            unit_id(0, start, end),
            0,
            start,
            end,
            request,
        )]);
    }

    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)
        .ok_or_else(|| DomainError::other("invalid end-of-day time"))?;
    let mut units = Vec::new();
    let mut current = start;

    while current <= end && units.len() < config.max_segments {
        let last_day = current
            .date_naive()
            .checked_add_days(Days::new(u64::from(config.max_span_days - 1)))
            .ok_or_else(|| DomainError::validation("segment end overflows the calendar"))?;
        let segment_end = last_day.and_time(end_of_day).and_utc().min(end);

        let index = units.len();
        units.push(WorkUnit::new(
            unit_id(index, current, segment_end),
            index,
            current,
            segment_end,
            Arc::clone(&request),
        ));

        current = segment_end + ChronoDuration::seconds(1);
    }

    tracing::debug!(
        name = %request.name,
        units = units.len(),
        max_span_days = config.max_span_days,
        "segmented timeline request"
    );

    Ok(units)
}

fn unit_id(index: usize, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "seg-{index}-{}-{}",
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(start: DateTime<Utc>, end: DateTime<Utc>) -> Arc<TimelineRequest> {
        Arc::new(TimelineRequest::new("Strikes", start, end, "user-1"))
    }

    #[test]
    fn test_short_range_produces_single_unit() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 18, 0, 0).unwrap();

        let units =
            segment_time_range(request(start, end), &SegmentationConfig::default()).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].start, start);
        assert_eq!(units[0].end, end);
        assert_eq!(units[0].id, "seg-0-20240101-20240103");
    }

    #[test]
    fn test_units_are_contiguous_and_bounded_by_span() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap();

        let units =
            segment_time_range(request(start, end), &SegmentationConfig::default()).unwrap();

        assert_eq!(units.len(), 3);
        assert_eq!(
            units[0].end,
            Utc.with_ymd_and_hms(2024, 1, 7, 23, 59, 59).unwrap()
        );
        assert_eq!(
            units[1].start,
            Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
        );
        assert_eq!(units[2].end, end);
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.index, i);
        }
    }

    #[test]
    fn test_segment_count_is_capped() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let config = SegmentationConfig::default().with_max_segments(4);

        let units = segment_time_range(request(start, end), &config).unwrap();

        assert_eq!(units.len(), 4);
    }

    #[test]
    fn test_point_range_produces_one_unit() {
        let at = Utc.with_ymd_and_hms(2024, 5, 5, 5, 5, 5).unwrap();
        let units = segment_time_range(request(at, at), &SegmentationConfig::default()).unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(segment_time_range(request(start, end), &SegmentationConfig::default()).is_err());
    }

    #[test]
    fn test_needs_segmentation_counts_calendar_days() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let seventh = Utc.with_ymd_and_hms(2024, 1, 7, 1, 0, 0).unwrap();
        let eighth = Utc.with_ymd_and_hms(2024, 1, 8, 1, 0, 0).unwrap();
        assert!(!needs_segmentation(start, seventh, 7));
        assert!(needs_segmentation(start, eighth, 7));
    }
}
