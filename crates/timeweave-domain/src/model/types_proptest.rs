//! Property-based tests for model types, fingerprints and segmentation.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use crate::fingerprint::RequestFingerprint;
    use crate::model::TimelineRequest;
    use crate::segmentation::{segment_time_range, SegmentationConfig};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
    }

    /// Strategy producing a valid `[start, end]` range within a few months.
    fn range_strategy() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
        (0i64..365 * 24 * 3600, 0i64..120 * 24 * 3600).prop_map(|(offset, span)| {
            let start = base_time() + Duration::seconds(offset);
            (start, start + Duration::seconds(span))
        })
    }

    proptest! {
        #[test]
        fn test_fingerprint_ignores_scope_order(
            mut scope in prop::collection::vec(-1000i64..1000, 0..8),
            name in "[A-Za-z ]{1,30}",
        ) {
            let request = TimelineRequest::new(name, base_time(), base_time(), "u")
                .with_scope_ids(scope.clone());
            scope.reverse();
            let reversed = request.clone().with_scope_ids(scope);
            prop_assert_eq!(
                RequestFingerprint::of(&request),
                RequestFingerprint::of(&reversed)
            );
        }

        #[test]
        fn test_segments_are_contiguous_and_bounded(
            (start, end) in range_strategy(),
            span in 1u32..15,
            max_segments in 1usize..12,
        ) {
            let request = Arc::new(TimelineRequest::new("Range", start, end, "u"));
            let config = SegmentationConfig::default()
                .with_max_span_days(span)
                .with_max_segments(max_segments);

            let units = segment_time_range(request, &config).unwrap();

            prop_assert!(!units.is_empty());
            prop_assert!(units.len() <= max_segments);
            prop_assert_eq!(units[0].start, start);
            for (i, unit) in units.iter().enumerate() {
                prop_assert_eq!(unit.index, i);
                prop_assert!(unit.start <= unit.end);
                prop_assert!(unit.end <= end);
                let days = (unit.end.date_naive() - unit.start.date_naive()).num_days() + 1;
                prop_assert!(days <= i64::from(span));
            }
            for pair in units.windows(2) {
                prop_assert_eq!(pair[1].start, pair[0].end + Duration::seconds(1));
            }
        }

        #[test]
        fn test_uncapped_segmentation_covers_whole_range(
            (start, end) in range_strategy(),
            span in 1u32..15,
        ) {
            let request = Arc::new(TimelineRequest::new("Range", start, end, "u"));
            let config = SegmentationConfig::default()
                .with_max_span_days(span)
                .with_max_segments(usize::MAX);

            let units = segment_time_range(request, &config).unwrap();

            prop_assert_eq!(units.last().map(|u| u.end), Some(end));
        }
    }
}
