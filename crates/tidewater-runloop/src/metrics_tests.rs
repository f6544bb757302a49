    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = RunLoopMetrics::new();
        assert!(metrics.is_enabled());
        assert_eq!(metrics.iterations.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_iteration() {
        let metrics = RunLoopMetrics::new();
        metrics.record_iteration();
        metrics.record_iteration();
        assert_eq!(metrics.iterations.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_disabled_metrics_stay_zero() {
        let metrics = RunLoopMetrics::with_enabled(false);
        metrics.record_iteration();
        metrics.record_timer_fired();
        metrics.record_wait_time(500);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.iterations, 0);
        assert_eq!(snapshot.timers_fired, 0);
        assert_eq!(snapshot.wait_time_us, 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = RunLoopMetrics::new();
        metrics.record_iteration();
        metrics.record_timer_fired();
        metrics.record_performer_fired();
        metrics.record_watcher_fired();
        metrics.record_watcher_fired();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.iterations, 1);
        assert_eq!(snapshot.total_fired(), 4);
        assert_eq!(snapshot.watchers_fired, 2);
    }

    #[test]
    fn test_averages() {
        let snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: 10,
            iterations: 100,
            timers_fired: 10,
            performers_fired: 5,
            watchers_fired: 20,
            wakeups: 3,
            poll_failures: 0,
            wait_time_us: 5_000_000,
            process_time_us: 200_000,
        };
        assert!((snapshot.avg_wait_time_ms() - 50.0).abs() < 0.001);
        assert!((snapshot.avg_process_time_ms() - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_averages_without_iterations() {
        let metrics = RunLoopMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.avg_wait_time_ms(), 0.0);
        assert_eq!(snapshot.uptime_secs, 0);
    }
