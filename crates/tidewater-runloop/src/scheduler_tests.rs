    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RunLoopError;
    use crate::poller::{Readiness, ScriptedPoller, WaitLog};
    use crate::watcher::WatchSource;
    use crate::RunLoopRunResult;
    use parking_lot::Mutex;
    use std::thread;

    fn scheduler_with(
        config: RunLoopConfig,
        script: impl FnOnce(&mut ScriptedPoller, Instant),
    ) -> (Scheduler, ManualClock, WaitLog) {
        let clock = ManualClock::new();
        let mut poller = ScriptedPoller::new(clock.clone());
        script(&mut poller, clock.now());
        let waits = poller.wait_log();
        let scheduler = Scheduler::with_parts(config, Box::new(poller), Arc::new(clock.clone()));
        (scheduler, clock, waits)
    }

    fn scheduler() -> (Scheduler, ManualClock, WaitLog) {
        scheduler_with(RunLoopConfig::default(), |_, _| {})
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_idle_run_finishes() {
        let (mut scheduler, _clock, waits) = scheduler();
        assert_eq!(scheduler.run(RunLoopMode::Default).unwrap(), RunLoopRunResult::Finished);
        assert_eq!(
            scheduler.run_once(RunLoopMode::Default, None).unwrap(),
            RunLoopRunResult::Finished
        );
        assert!(waits.is_empty());
        assert_eq!(scheduler.handle().state(), RunLoopState::Stopped);
        assert_eq!(scheduler.current_mode(), None);
    }

    #[test]
    fn test_sys_scheduler_idle_run() {
        let mut scheduler = Scheduler::new(RunLoopConfig::default()).unwrap();
        assert_eq!(scheduler.run(RunLoopMode::Default).unwrap(), RunLoopRunResult::Finished);
    }

    #[test]
    fn test_run_fires_timers_until_idle() {
        let (mut scheduler, clock, _waits) = scheduler();
        let start = clock.now();
        let fired = Arc::new(Mutex::new(Vec::new()));
        for delay in [30, 10, 20] {
            let fired = fired.clone();
            scheduler.add_timer(RunLoopMode::Default, ms(delay), Duration::ZERO, move |cx| {
                fired.lock().push(cx.now());
            });
        }

        assert_eq!(scheduler.run(RunLoopMode::Default).unwrap(), RunLoopRunResult::Finished);
        assert_eq!(
            *fired.lock(),
            vec![start + ms(10), start + ms(20), start + ms(30)]
        );
        let snapshot = scheduler.metrics().snapshot();
        assert_eq!(snapshot.timers_fired, 3);
        assert!(snapshot.iterations >= 4);
    }

    #[test]
    fn test_stop_from_callback_leaves_entries() {
        let (mut scheduler, _clock, _waits) = scheduler();
        scheduler.add_timer(RunLoopMode::Default, ms(5), Duration::ZERO, |cx| cx.stop());
        let remaining = scheduler.add_timer(RunLoopMode::Default, ms(50), Duration::ZERO, |_| {});

        assert_eq!(scheduler.run(RunLoopMode::Default).unwrap(), RunLoopRunResult::Stopped);
        assert_eq!(scheduler.context_state(&RunLoopMode::Default), ContextState::Completed);
        assert_eq!(scheduler.entry_counts(&RunLoopMode::Default).timers, 1);
        assert!(remaining.is_valid());
        assert!(scheduler.has_pending_work(&RunLoopMode::Default));
    }

    #[test]
    fn test_run_until_times_out() {
        let (mut scheduler, clock, _waits) = scheduler();
        let start = clock.now();
        let tick = scheduler.add_timer(RunLoopMode::Default, ms(10), ms(10), |_| {});

        let result = scheduler.run_until(RunLoopMode::Default, start + ms(45)).unwrap();
        assert_eq!(result, RunLoopRunResult::TimedOut);
        assert_eq!(tick.fire_count(), 4);
        assert_eq!(clock.now(), start + ms(45));
    }

    #[test]
    fn test_repeating_timer_with_unrepresentable_interval_expires() {
        let (mut scheduler, _clock, _waits) = scheduler();
        let timer = scheduler.add_timer(RunLoopMode::Default, ms(1), Duration::MAX, |_| {});

        let result = scheduler.run_once(RunLoopMode::Default, None).unwrap();
        assert_eq!(result, RunLoopRunResult::HandledSource);
        assert_eq!(timer.fire_count(), 1);
        assert!(!timer.is_valid());
        assert_eq!(scheduler.entry_counts(&RunLoopMode::Default).timers, 0);
    }

    #[test]
    fn test_far_future_timer_does_not_fire_early() {
        let (mut scheduler, clock, _waits) = scheduler();
        let start = clock.now();
        let timer = scheduler.add_timer(RunLoopMode::Default, Duration::MAX, Duration::ZERO, |_| {});
        assert!(timer.next_fire() > start + Duration::from_secs(365 * 24 * 60 * 60));

        let result = scheduler.run_once(RunLoopMode::Default, Some(start + ms(10))).unwrap();
        assert_eq!(result, RunLoopRunResult::TimedOut);
        assert_eq!(timer.fire_count(), 0);
        assert!(timer.is_valid());
        assert_eq!(scheduler.limit_date(&RunLoopMode::Default), Some(timer.next_fire()));
    }

    #[test]
    fn test_run_once_results() {
        let (mut scheduler, clock, _waits) = scheduler();
        let start = clock.now();
        scheduler.add_timer(RunLoopMode::Default, ms(20), Duration::ZERO, |_| {});

        let result = scheduler.run_once(RunLoopMode::Default, Some(start + ms(5))).unwrap();
        assert_eq!(result, RunLoopRunResult::TimedOut);
        assert_eq!(clock.now(), start + ms(5));

        let result = scheduler.run_once(RunLoopMode::Default, None).unwrap();
        assert_eq!(result, RunLoopRunResult::HandledSource);
        assert_eq!(clock.now(), start + ms(20));
    }

    #[test]
    fn test_limit_date_in_past_does_not_block() {
        let (mut scheduler, clock, waits) = scheduler();
        let start = clock.now();
        scheduler.add_timer(RunLoopMode::Default, ms(100), Duration::ZERO, |_| {});

        let result = scheduler.run_once(RunLoopMode::Default, Some(start)).unwrap();
        assert_eq!(result, RunLoopRunResult::TimedOut);
        assert_eq!(waits.waits(), vec![Some(Duration::ZERO)]);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_performer_runs_in_first_mode_only() {
        let (mut scheduler, _clock, _waits) = scheduler();
        let modes = [RunLoopMode::Default, RunLoopMode::ModalPanel];
        let performer = scheduler.perform_in_modes(&modes, 0, |_| {});
        assert_eq!(scheduler.entry_counts(&RunLoopMode::ModalPanel).performers, 1);

        assert_eq!(
            scheduler.run_once(RunLoopMode::ModalPanel, None).unwrap(),
            RunLoopRunResult::HandledSource
        );
        assert!(performer.has_run());
        assert_eq!(scheduler.entry_counts(&RunLoopMode::Default).performers, 0);
        assert_eq!(
            scheduler.run_once(RunLoopMode::Default, None).unwrap(),
            RunLoopRunResult::Finished
        );
    }

    #[test]
    fn test_registration_from_callback_lands_next_cycle() {
        let (mut scheduler, _clock, _waits) = scheduler();
        let nested = Arc::new(Mutex::new(None));
        let slot = nested.clone();
        scheduler.perform_in_mode(RunLoopMode::Default, 0, move |cx| {
            let handle = cx.perform(RunLoopMode::Default, 0, |_| {});
            *slot.lock() = Some(handle);
        });

        scheduler.run_once(RunLoopMode::Default, None).unwrap();
        let nested = nested.lock().clone().unwrap();
        assert!(!nested.has_run());
        assert_eq!(scheduler.entry_counts(&RunLoopMode::Default).performers, 1);

        scheduler.run_once(RunLoopMode::Default, None).unwrap();
        assert!(nested.has_run());
    }

    #[test]
    fn test_invalidate_and_remove() {
        let (mut scheduler, _clock, _waits) = scheduler();
        let timer = scheduler.add_timer(RunLoopMode::Default, ms(10), Duration::ZERO, |_| {});
        let watcher = scheduler.add_watcher(
            RunLoopMode::EventTracking,
            Watcher::new(WatchSource::Fd(3), crate::Interest::Read, |_, _| {}),
        );
        assert_eq!(scheduler.limit_date(&RunLoopMode::Default), Some(timer.next_fire()));

        scheduler.invalidate_timer(&timer).unwrap();
        assert!(matches!(
            scheduler.invalidate_timer(&timer),
            Err(RunLoopError::InvalidHandle { .. })
        ));
        assert_eq!(scheduler.limit_date(&RunLoopMode::Default), None);
        assert_eq!(scheduler.context_state(&RunLoopMode::Default), ContextState::Idle);

        scheduler.remove_watcher(&watcher).unwrap();
        assert!(scheduler.remove_watcher(&watcher).is_err());
        assert!(!scheduler.has_pending_work(&RunLoopMode::EventTracking));
    }

    #[test]
    fn test_watcher_and_timers_interleave() {
        let (mut scheduler, clock, _waits) = scheduler_with(RunLoopConfig::default(), |poller, now| {
            poller.ready_at(now + Duration::from_millis(30), 9, Readiness::readable());
        });
        let start = clock.now();
        let log = Arc::new(Mutex::new(Vec::new()));

        let entry = |name: &'static str| {
            let log = log.clone();
            move |cx: &mut LoopContext<'_>| log.lock().push((name, cx.now()))
        };
        scheduler.add_timer(RunLoopMode::Default, ms(50), Duration::ZERO, entry("t1"));
        scheduler.add_timer(RunLoopMode::Default, ms(10), Duration::ZERO, entry("t2"));
        let wlog = log.clone();
        let watcher = scheduler.add_watcher(
            RunLoopMode::Default,
            Watcher::new(WatchSource::Fd(9), crate::Interest::Read, move |cx, _| {
                wlog.lock().push(("w", cx.now()))
            }),
        );

        let result = scheduler.run_until(RunLoopMode::Default, start + ms(60)).unwrap();
        assert_eq!(result, RunLoopRunResult::TimedOut);
        assert_eq!(
            *log.lock(),
            vec![("t2", start + ms(10)), ("w", start + ms(30)), ("t1", start + ms(50))]
        );
        assert_eq!(watcher.fire_count(), 1);
    }

    #[test]
    fn test_run_until_woken_times_out_on_idle_mode() {
        let (mut scheduler, clock, waits) = scheduler();
        let start = clock.now();
        assert!(!scheduler.run_until_woken(RunLoopMode::Default, Some(ms(25))).unwrap());
        assert_eq!(clock.now(), start + ms(25));
        assert_eq!(waits.waits(), vec![Some(ms(25))]);
    }

    #[test]
    fn test_run_until_woken_by_other_thread() {
        let mut scheduler = Scheduler::new(RunLoopConfig::default()).unwrap();
        let handle = scheduler.handle();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.wake();
        });

        let woken = scheduler
            .run_until_woken(RunLoopMode::Default, Some(Duration::from_secs(10)))
            .unwrap();
        waker.join().unwrap();
        assert!(woken);
        assert_eq!(scheduler.metrics().snapshot().wakeups, 1);
    }

    #[test]
    fn test_stop_before_run_is_observed() {
        let (mut scheduler, _clock, waits) = scheduler();
        scheduler.add_timer(RunLoopMode::Default, ms(10), Duration::ZERO, |_| {});
        scheduler.stop();
        assert_eq!(scheduler.run(RunLoopMode::Default).unwrap(), RunLoopRunResult::Stopped);
        assert!(waits.is_empty());
        // The request is consumed.
        assert_eq!(scheduler.run(RunLoopMode::Default).unwrap(), RunLoopRunResult::Finished);
    }

    #[test]
    fn test_fatal_poll_failure_ends_run() {
        let (mut scheduler, _clock, _waits) = scheduler_with(RunLoopConfig::default(), |poller, _| {
            poller.fail_next(std::io::ErrorKind::Other);
            poller.fail_next(std::io::ErrorKind::Other);
        });
        let timer = scheduler.add_timer(RunLoopMode::Default, ms(10), Duration::ZERO, |_| {});

        let result = scheduler.run(RunLoopMode::Default);
        assert!(matches!(result, Err(RunLoopError::PollFailure(_))));
        assert!(timer.is_valid());
        assert_eq!(scheduler.handle().state(), RunLoopState::Stopped);
    }

    #[test]
    fn test_drop_releases_entries() {
        let (mut scheduler, _clock, _waits) = scheduler();
        let timer = scheduler.add_timer(RunLoopMode::Default, ms(10), ms(10), |_| {});
        let performer = scheduler.perform_in_mode(RunLoopMode::ModalPanel, 0, |_| {});
        let handle = scheduler.handle();
        drop(scheduler);

        assert!(!timer.is_valid());
        assert!(!performer.is_valid());
        assert!(!performer.has_run());
        assert!(handle.is_closed());
        assert!(matches!(
            handle.perform_in_mode(RunLoopMode::Default, 0, |_| {}),
            Err(RunLoopError::LoopClosed)
        ));
    }
