//! One scheduler per thread.
//!
//! The scheduler for the current thread is created on first use and dropped
//! when the thread exits, which releases every `perform_and_wait` still
//! blocked on it.

use std::cell::RefCell;

use tracing::debug;

use crate::config::RunLoopConfig;
use crate::error::{RunLoopError, RunLoopResult};
use crate::handle::LoopHandle;
use crate::scheduler::Scheduler;

thread_local! {
    static CURRENT: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
    static HANDLE: RefCell<Option<LoopHandle>> = const { RefCell::new(None) };
}

/// Create this thread's scheduler from `config` unless one exists already.
///
/// Returns the handle of whichever scheduler the thread ends up with.
pub fn install(config: RunLoopConfig) -> RunLoopResult<LoopHandle> {
    CURRENT.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| RunLoopError::Reentrant)?;
        match slot.as_ref() {
            Some(scheduler) => Ok(scheduler.handle()),
            None => {
                let scheduler = Scheduler::new(config)?;
                let handle = scheduler.handle();
                *slot = Some(scheduler);
                set_handle(Some(handle.clone()));
                debug!("RunLoop: scheduler installed for {:?}", std::thread::current().id());
                Ok(handle)
            }
        }
    })
}

/// Make `scheduler` this thread's scheduler, returning the one it replaces.
///
/// `scheduler` must have been created on this thread.
pub fn install_with(scheduler: Scheduler) -> RunLoopResult<Option<Scheduler>> {
    let handle = scheduler.handle();
    if !handle.is_owner_thread() {
        return Err(RunLoopError::ConfigError(
            "scheduler was created on another thread".to_string(),
        ));
    }
    CURRENT.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| RunLoopError::Reentrant)?;
        let previous = slot.replace(scheduler);
        set_handle(Some(handle));
        Ok(previous)
    })
}

/// Run `f` against this thread's scheduler, creating it with the default
/// configuration if needed.
///
/// Fails with [`RunLoopError::Reentrant`] when called from inside one of the
/// scheduler's own callbacks; use the callback's
/// [`LoopContext`](crate::LoopContext) there instead.
pub fn with_current<R>(f: impl FnOnce(&mut Scheduler) -> R) -> RunLoopResult<R> {
    if !is_initialized() {
        install(RunLoopConfig::default())?;
    }
    CURRENT.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| RunLoopError::Reentrant)?;
        match slot.as_mut() {
            Some(scheduler) => Ok(f(scheduler)),
            None => Err(RunLoopError::LoopClosed),
        }
    })
}

/// Handle onto this thread's scheduler, creating it if needed.
///
/// Works from inside callbacks too.
pub fn current_handle() -> RunLoopResult<LoopHandle> {
    if let Some(handle) = HANDLE.with(|cell| cell.borrow().clone()) {
        return Ok(handle);
    }
    install(RunLoopConfig::default())
}

/// Whether this thread has a scheduler.
pub fn is_initialized() -> bool {
    HANDLE.with(|cell| cell.borrow().is_some())
}

/// Drop this thread's scheduler now rather than at thread exit.
pub fn teardown() -> RunLoopResult<()> {
    let scheduler = CURRENT.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| RunLoopError::Reentrant)?;
        Ok::<_, RunLoopError>(slot.take())
    })?;
    set_handle(None);
    drop(scheduler);
    Ok(())
}

fn set_handle(handle: Option<LoopHandle>) {
    HANDLE.with(|cell| *cell.borrow_mut() = handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{RunLoopMode, RunLoopRunResult};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lazy_creation_per_thread() {
        thread::spawn(|| {
            assert!(!is_initialized());
            let first = current_handle().unwrap();
            assert!(is_initialized());
            let second = current_handle().unwrap();
            assert!(first.is_owner_thread());
            assert!(second.is_owner_thread());

            let other = thread::spawn(|| current_handle().unwrap()).join().unwrap();
            assert!(!other.is_owner_thread());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_with_current_runs_scheduler() {
        thread::spawn(|| {
            let result = with_current(|scheduler| {
                scheduler.perform_in_mode(RunLoopMode::Default, 0, |_| {});
                scheduler.run(RunLoopMode::Default)
            })
            .unwrap()
            .unwrap();
            assert_eq!(result, RunLoopRunResult::Finished);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_reentrant_access_is_refused() {
        thread::spawn(|| {
            let seen = with_current(|scheduler| {
                let (tx, rx) = mpsc::channel();
                scheduler.perform_in_mode(RunLoopMode::Default, 0, move |_| {
                    let nested = with_current(|_| ());
                    let handle = current_handle();
                    tx.send((nested.is_err(), handle.is_ok())).unwrap();
                });
                scheduler.run(RunLoopMode::Default).unwrap();
                rx.recv().unwrap()
            })
            .unwrap();
            assert_eq!(seen, (true, true));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_teardown_closes_handle() {
        thread::spawn(|| {
            let handle = install(RunLoopConfig::default()).unwrap();
            teardown().unwrap();
            assert!(handle.is_closed());
            assert!(!is_initialized());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_thread_exit_releases_waiter() {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        let owner = thread::spawn(move || {
            handle_tx.send(current_handle().unwrap()).unwrap();
            let _ = exit_rx.recv();
        });
        let handle = handle_rx.recv().unwrap();

        let remote = handle.clone();
        let waiter = thread::spawn(move || {
            remote.perform_and_wait(&[RunLoopMode::Default], |_| {}, Some(Duration::from_secs(30)))
        });
        while !handle.has_pending_work(&RunLoopMode::Default) {
            thread::sleep(Duration::from_millis(1));
        }

        exit_tx.send(()).unwrap();
        owner.join().unwrap();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(RunLoopError::PerformCancelled)
        ));
        assert!(handle.is_closed());
    }
}
