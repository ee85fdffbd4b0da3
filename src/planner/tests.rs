//! Test suite for the single and multi-dimensional planners.

use super::*;
use crate::interner::ResourceType;

fn planner(capacity: u64) -> Planner {
    Planner::new(0, 1000, capacity, "core")
}

mod single {
    use super::*;

    #[test]
    fn new_planner_is_fully_free() {
        let p = planner(4);
        assert_eq!(p.base_time(), 0);
        assert_eq!(p.duration(), 1000);
        assert_eq!(p.capacity(), 4);
        assert_eq!(p.avail_resources_during(0, 1000).unwrap(), 4);
    }

    #[test]
    fn add_span_reduces_availability() {
        let mut p = planner(4);
        p.add_span(10, 20, 3, 1).unwrap();
        assert_eq!(p.avail_resources_during(10, 20).unwrap(), 1);
        assert_eq!(p.avail_resources_during(0, 10).unwrap(), 4);
        assert_eq!(p.avail_resources_during(30, 10).unwrap(), 4);
        // A window straddling the span sees the minimum.
        assert_eq!(p.avail_resources_during(0, 100).unwrap(), 1);
    }

    #[test]
    fn overlapping_spans_stack() {
        let mut p = planner(4);
        p.add_span(0, 100, 2, 1).unwrap();
        p.add_span(50, 100, 2, 2).unwrap();
        assert_eq!(p.avail_resources_during(0, 50).unwrap(), 2);
        assert_eq!(p.avail_resources_during(50, 50).unwrap(), 0);
        assert_eq!(p.avail_resources_during(100, 50).unwrap(), 2);
    }

    #[test]
    fn add_span_rejects_capacity_overflow() {
        let mut p = planner(4);
        p.add_span(0, 100, 3, 1).unwrap();
        assert_eq!(
            p.add_span(50, 10, 2, 2),
            Err(PlannerError::ExceedsCapacity {
                requested: 2,
                available: 1
            })
        );
        // The failed add left no trace.
        assert_eq!(p.avail_resources_during(50, 10).unwrap(), 1);
    }

    #[test]
    fn add_span_rejects_bad_windows() {
        let mut p = planner(4);
        assert!(matches!(
            p.add_span(-5, 10, 1, 1),
            Err(PlannerError::InvalidWindow { .. })
        ));
        assert!(matches!(
            p.add_span(0, 0, 1, 1),
            Err(PlannerError::InvalidWindow { .. })
        ));
        assert!(matches!(
            p.add_span(990, 20, 1, 1),
            Err(PlannerError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn one_span_per_holder() {
        let mut p = planner(4);
        p.add_span(0, 10, 1, 7).unwrap();
        assert_eq!(p.add_span(20, 10, 1, 7), Err(PlannerError::DuplicateHolder(7)));
    }

    #[test]
    fn remove_span_restores_and_is_idempotent() {
        let mut p = planner(4);
        p.add_span(0, 100, 4, 1).unwrap();
        assert_eq!(p.avail_resources_during(0, 100).unwrap(), 0);
        p.remove_span(1);
        assert_eq!(p.avail_resources_during(0, 100).unwrap(), 4);
        p.remove_span(1);
        p.remove_span(99);
        assert_eq!(p.avail_resources_during(0, 100).unwrap(), 4);
        assert!(p.is_empty());
    }

    #[test]
    fn reduce_span_partial_then_full() {
        let mut p = planner(4);
        p.add_span(0, 100, 3, 1).unwrap();
        assert!(!p.reduce_span(1, 1));
        assert_eq!(p.avail_resources_during(0, 100).unwrap(), 2);
        assert_eq!(p.span_of(1).unwrap().qty, 2);
        assert!(p.reduce_span(1, 2));
        assert!(p.span_of(1).is_none());
        assert_eq!(p.avail_resources_during(0, 100).unwrap(), 4);
    }

    #[test]
    fn reduce_absent_holder_reports_full() {
        let mut p = planner(4);
        assert!(p.reduce_span(42, 1));
    }

    #[test]
    fn avail_times_skips_busy_prefix() {
        let mut p = planner(4);
        p.add_span(0, 100, 4, 1).unwrap();
        let times: Vec<_> = p.avail_times(0, 50, 2).unwrap().collect();
        assert_eq!(times[0], 100);
    }

    #[test]
    fn avail_times_finds_gap_between_spans() {
        let mut p = planner(2);
        p.add_span(0, 50, 2, 1).unwrap();
        p.add_span(80, 50, 2, 2).unwrap();
        // A 30-second request fits exactly in [50, 80).
        let first = p.avail_times(0, 30, 1).unwrap().next();
        assert_eq!(first, Some(50));
        // A 40-second request must wait for the second span to end.
        let first = p.avail_times(0, 40, 1).unwrap().next();
        assert_eq!(first, Some(130));
    }

    #[test]
    fn avail_times_exhausts_at_window_end() {
        let mut p = planner(2);
        p.add_span(0, 1000, 2, 1).unwrap();
        assert_eq!(p.avail_times(0, 10, 1).unwrap().next(), None);
    }

    #[test]
    fn avail_times_rejects_impossible_quantity() {
        let p = planner(2);
        assert!(matches!(
            p.avail_times(0, 10, 3),
            Err(PlannerError::ExceedsTotal {
                requested: 3,
                capacity: 2
            })
        ));
    }

    #[test]
    fn occupancy_profile_coalesces_after_removal() {
        let mut p = planner(4);
        p.add_span(10, 10, 1, 1).unwrap();
        p.add_span(20, 10, 1, 2).unwrap();
        p.remove_span(1);
        p.remove_span(2);
        // All that remains is the base event.
        assert_eq!(p.occupancy_at(15), 0);
        assert_eq!(p.occupancy_at(25), 0);
        assert_eq!(p.avail_resources_during(0, 1000).unwrap(), 4);
    }

    #[test]
    fn holders_in_insertion_order() {
        let mut p = planner(4);
        p.add_span(10, 10, 1, 30).unwrap();
        p.add_span(0, 10, 1, 10).unwrap();
        p.add_span(20, 10, 1, 20).unwrap();
        assert_eq!(p.holders(), vec![30, 10, 20]);
    }
}

mod multi {
    use super::*;

    fn multi() -> MultiPlanner {
        MultiPlanner::new(
            0,
            1000,
            &[
                (ResourceType::intern("core"), 4),
                (ResourceType::intern("node"), 2),
            ],
        )
    }

    fn core() -> ResourceType {
        ResourceType::intern("core")
    }

    fn node() -> ResourceType {
        ResourceType::intern("node")
    }

    #[test]
    fn dimensions_report_independently() {
        let mut m = multi();
        m.add_span(0, 100, &[(core(), 2), (node(), 1)], 1).unwrap();
        assert_eq!(m.avail_of(core(), 0, 100).unwrap(), 2);
        assert_eq!(m.avail_of(node(), 0, 100).unwrap(), 1);
        assert_eq!(m.avail_of(core(), 100, 100).unwrap(), 4);
    }

    #[test]
    fn add_span_is_atomic_across_dimensions() {
        let mut m = multi();
        m.add_span(0, 100, &[(core(), 1), (node(), 2)], 1).unwrap();
        // The core dimension could take this, but the node dimension cannot;
        // neither must be mutated.
        let err = m.add_span(0, 100, &[(core(), 1), (node(), 1)], 2);
        assert!(matches!(err, Err(PlannerError::ExceedsCapacity { .. })));
        assert_eq!(m.avail_of(core(), 0, 100).unwrap(), 3);
        assert!(!m.holds(2));
    }

    #[test]
    fn unknown_kind_is_ignored_on_add_but_rejected_on_query() {
        let mut m = multi();
        m.add_span(0, 10, &[(ResourceType::intern("gpu"), 2)], 1)
            .unwrap();
        assert!(!m.holds(1));
        assert!(matches!(
            m.avail_of(ResourceType::intern("gpu"), 0, 10),
            Err(PlannerError::UnknownDimension(_))
        ));
    }

    #[test]
    fn avail_times_requires_all_dimensions() {
        let mut m = multi();
        m.add_span(0, 100, &[(core(), 4)], 1).unwrap();
        m.add_span(0, 200, &[(node(), 2)], 2).unwrap();
        // Cores free at 100, nodes only at 200.
        let t = m
            .avail_times(0, 50, &[(core(), 1), (node(), 1)])
            .unwrap()
            .next();
        assert_eq!(t, Some(200));
    }

    #[test]
    fn avail_times_yields_successive_points() {
        let mut m = multi();
        m.add_span(0, 100, &[(core(), 3)], 1).unwrap();
        let times: Vec<_> = m
            .avail_times(0, 50, &[(core(), 2)])
            .unwrap()
            .take(2)
            .collect();
        assert_eq!(times, vec![100]);
    }

    #[test]
    fn reduce_span_reports_full_removal() {
        let mut m = multi();
        m.add_span(0, 100, &[(core(), 2), (node(), 1)], 1).unwrap();
        assert!(!m.reduce_span(1, &[(core(), 2)]));
        assert!(m.holds(1));
        assert!(m.reduce_span(1, &[(node(), 1)]));
        assert!(!m.holds(1));
    }

    #[test]
    fn add_capacity_grows_dimension_and_keeps_spans() {
        let mut m = multi();
        m.add_span(0, 100, &[(core(), 4)], 1).unwrap();
        m.add_capacity(core(), 2);
        assert_eq!(m.capacity_of(core()), Some(6));
        assert_eq!(m.avail_of(core(), 0, 100).unwrap(), 2);
        assert!(m.holds(1));
    }

    #[test]
    fn add_capacity_creates_missing_dimension() {
        let mut m = multi();
        let gpu = ResourceType::intern("gpu");
        m.add_capacity(gpu, 8);
        assert_eq!(m.capacity_of(gpu), Some(8));
        assert_eq!(m.resource_types().len(), 3);
    }
}
