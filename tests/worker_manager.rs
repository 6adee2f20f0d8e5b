#![cfg(unix)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use regex::Regex;
use runpool::engine::{ManagerState, RunOptions, WorkerManager};
use runpool::errors::RunpoolError;
use runpool::report::Hook;
use runpool::stop::{CompareOp, StopCondition};
use runpool::task::{LaunchSpec, TaskSpec, TaskStatus};
use runpool::types::NonzeroExitHandling;
use runpool_test_utils::builders::{exit_task, fast_config, shell_task, sleep_task};
use runpool_test_utils::init_tracing;
use runpool_test_utils::recording::{RecordingObserver, RecordingReporter};
use runpool_test_utils::with_timeout;

const SIGTERM_EXIT: i32 = -15;

fn raise_config(num_workers: usize) -> runpool::engine::WorkerManagerConfig {
    let mut cfg = fast_config(num_workers);
    cfg.nonzero_exit_handling = NonzeroExitHandling::Raise;
    cfg
}

#[tokio::test]
async fn task_count_includes_every_added_task() {
    init_tracing();
    let mut wm = WorkerManager::new(fast_config(2)).unwrap();
    for _ in 0..4 {
        wm.add_task(exit_task(0)).unwrap();
    }
    assert_eq!(wm.task_count(), 4);

    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();

    assert_eq!(wm.task_count(), 4);
    assert_eq!(wm.num_finished_tasks(), 4);
    assert_eq!(wm.num_pending_tasks(), 0);
    assert_eq!(wm.state(), ManagerState::Completed);
    assert!(wm.tasks().iter().all(|t| t.status() == TaskStatus::Finished(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tasks_run_in_parallel_up_to_num_workers() {
    init_tracing();
    let mut wm = WorkerManager::new(fast_config(2)).unwrap();
    for _ in 0..3 {
        wm.add_task(sleep_task(0.1)).unwrap();
    }

    let start = Instant::now();
    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(wm.num_finished_tasks(), 3);
    // Two rounds of 0.1s; running serially would take at least 0.3s.
    assert!(elapsed >= Duration::from_millis(200), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");
}

#[tokio::test]
async fn active_tasks_never_exceed_num_workers() {
    init_tracing();
    let reporter = RecordingReporter::new();
    let mut wm = WorkerManager::new(fast_config(2)).unwrap();
    wm.attach_reporter(reporter.clone()).unwrap();
    for _ in 0..5 {
        wm.add_task(sleep_task(0.05)).unwrap();
    }

    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();

    assert_eq!(reporter.max_active(), 2);
    assert_eq!(reporter.count(Hook::TaskSpawned), 5);
    assert_eq!(reporter.count(Hook::TaskFinished), 5);
    assert_eq!(reporter.count(Hook::AfterAbort), 0);
    assert_eq!(reporter.hooks().first(), Some(&Hook::TaskSpawned));

    let last = reporter.calls().last().copied().unwrap();
    assert_eq!(last.hook, Hook::AfterWork);
    assert!(last.force);
    assert_eq!(last.counters.finished, 5);
    assert_eq!(last.counters.active, 0);
}

#[tokio::test]
async fn tasks_spawn_in_priority_then_uid_order() {
    init_tracing();
    let observer = RecordingObserver::new();
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_observer(observer.clone());

    wm.add_task(exit_task(0).with_uid(0)).unwrap();
    wm.add_task(exit_task(0).with_uid(1).with_priority(5)).unwrap();
    wm.add_task(exit_task(0).with_uid(2).with_priority(-1)).unwrap();
    wm.add_task(exit_task(0).with_uid(3).with_priority(5)).unwrap();

    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();

    assert_eq!(observer.spawn_order(), vec![2, 1, 3, 0]);
    assert_eq!(observer.finished().len(), 4);
}

#[tokio::test]
async fn invalid_and_duplicate_uids_are_rejected() {
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    assert!(matches!(
        wm.add_task(exit_task(0).with_uid(-1)),
        Err(RunpoolError::InvalidUid(-1))
    ));
    wm.add_task(exit_task(0).with_uid(7)).unwrap();
    assert!(matches!(
        wm.add_task(exit_task(0).with_uid(7)),
        Err(RunpoolError::DuplicateUid(7))
    ));
    assert_eq!(wm.task_count(), 1);
}

#[tokio::test]
async fn second_reporter_is_rejected() {
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.attach_reporter(RecordingReporter::new()).unwrap();
    assert!(matches!(
        wm.attach_reporter(RecordingReporter::new()),
        Err(RunpoolError::ReporterAlreadyAttached)
    ));
}

#[tokio::test]
async fn raise_mode_aborts_with_the_task_exit_code() {
    init_tracing();
    let reporter = RecordingReporter::new();
    let mut wm = WorkerManager::new(raise_config(3)).unwrap();
    wm.attach_reporter(reporter.clone()).unwrap();
    wm.add_task(sleep_task(10.0).with_uid(0).with_priority(0))
        .unwrap();
    wm.add_task(sleep_task(10.0).with_uid(1).with_priority(0))
        .unwrap();
    wm.add_task(shell_task("echo failing; exit 7").with_uid(2).with_priority(1))
        .unwrap();

    let err = with_timeout(wm.start_working(RunOptions::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, RunpoolError::TaskFailed { uid: 2, exit_code: 7 }));
    assert_eq!(err.exit_code(), 7);
    assert_eq!(wm.state(), ManagerState::Aborted);
    assert_eq!(wm.task(0).unwrap().signals_received(), 1);
    assert_eq!(wm.task(1).unwrap().signals_received(), 1);
    assert_eq!(wm.task(2).unwrap().signals_received(), 0);

    let last = reporter.calls().last().copied().unwrap();
    assert_eq!(last.hook, Hook::AfterAbort);
    assert!(last.force);
    assert_eq!(reporter.count(Hook::AfterWork), 0);

    with_timeout(wm.shutdown(Duration::from_secs(2))).await.unwrap();
    assert_eq!(wm.num_active_tasks(), 0);
    assert_eq!(wm.task(0).unwrap().exit_code(), Some(SIGTERM_EXIT));
    assert_eq!(wm.task(1).unwrap().exit_code(), Some(SIGTERM_EXIT));
}

#[tokio::test]
async fn warn_mode_keeps_working_after_a_failure() {
    init_tracing();
    let observer = RecordingObserver::new();
    let mut cfg = fast_config(1);
    cfg.nonzero_exit_handling = NonzeroExitHandling::Warn;
    let mut wm = WorkerManager::new(cfg).unwrap();
    wm.add_observer(observer.clone());
    wm.add_task(shell_task("echo line; exit 3").with_uid(0)).unwrap();
    wm.add_task(exit_task(0).with_uid(1)).unwrap();

    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();

    assert_eq!(wm.state(), ManagerState::Completed);
    assert_eq!(observer.finished(), vec![(0, Some(3)), (1, Some(0))]);
    assert_eq!(wm.counters().failed, 1);
}

#[tokio::test]
async fn failure_of_the_last_task_is_not_lost() {
    let mut wm = WorkerManager::new(raise_config(1)).unwrap();
    wm.add_task(exit_task(4)).unwrap();

    let err = with_timeout(wm.start_working(RunOptions::new()))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn total_timeout_aborts_the_run() {
    init_tracing();
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(sleep_task(10.0)).unwrap();
    wm.add_task(sleep_task(10.0)).unwrap();

    let start = Instant::now();
    let err = with_timeout(wm.start_working(RunOptions::new().timeout(Duration::from_millis(50))))
        .await
        .unwrap_err();

    assert!(matches!(err, RunpoolError::TotalTimeout(_)));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(wm.state(), ManagerState::Aborted);
    // Only one worker: the second task never started.
    assert_eq!(wm.num_pending_tasks(), 1);
    assert_eq!(wm.task(0).unwrap().signals_received(), 1);

    with_timeout(wm.shutdown(Duration::from_secs(2))).await.unwrap();
    assert_eq!(wm.task(0).unwrap().exit_code(), Some(SIGTERM_EXIT));
}

#[tokio::test]
async fn zero_timeout_and_detach_are_rejected() {
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(exit_task(0)).unwrap();

    assert!(matches!(
        wm.start_working(RunOptions::new().timeout(Duration::ZERO)).await,
        Err(RunpoolError::InvalidArgument(_))
    ));
    assert!(matches!(
        wm.start_working(RunOptions::new().detach(true)).await,
        Err(RunpoolError::DetachNotSupported)
    ));
    assert_eq!(wm.state(), ManagerState::Idle);
    assert_eq!(wm.num_finished_tasks(), 0);
}

#[tokio::test]
async fn matching_stop_conditions_signal_a_task_once() {
    init_tracing();
    // Raise mode: a task ended by a stop condition is not a failure.
    let mut wm = WorkerManager::new(raise_config(1)).unwrap();
    wm.add_task(sleep_task(10.0)).unwrap();

    let opts = RunOptions::new()
        .stop_condition(StopCondition::new("always", "always true", |_, _| true))
        .stop_condition(StopCondition::new("also", "also always true", |_, _| true));
    with_timeout(wm.start_working(opts)).await.unwrap();

    let task = wm.task(0).unwrap();
    assert_eq!(task.signals_received(), 1);
    assert_eq!(task.exit_code(), Some(SIGTERM_EXIT));
    assert_eq!(task.fulfilled_stop_conditions(), ["always".to_string(), "also".to_string()]);
}

#[tokio::test]
async fn output_and_monitor_conditions_stop_tasks() {
    init_tracing();
    let mut wm = WorkerManager::new(fast_config(2)).unwrap();
    wm.add_task(shell_task("echo READY; exec sleep 10").with_uid(0))
        .unwrap();
    wm.add_task(shell_task("echo '!!map {progress: 0.5, step: 12}'; exec sleep 10").with_uid(1))
        .unwrap();

    let opts = RunOptions::new()
        .stop_condition(StopCondition::output_matches(Regex::new("^READY$").unwrap()))
        .stop_condition(StopCondition::monitor_entry("progress", CompareOp::Ge, 0.5));
    with_timeout(wm.start_working(opts)).await.unwrap();

    let t0 = wm.task(0).unwrap();
    assert_eq!(t0.fulfilled_stop_conditions(), ["output_matches".to_string()]);
    assert_eq!(t0.exit_code(), Some(SIGTERM_EXIT));

    let t1 = wm.task(1).unwrap();
    assert_eq!(t1.fulfilled_stop_conditions(), ["monitor_entry".to_string()]);
    assert_eq!(t1.monitor().progress(), Some(0.5));
    assert_eq!(t1.monitor().number("step"), Some(12.0));
}

#[tokio::test]
async fn wall_time_stop_condition_ends_long_tasks() {
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(sleep_task(10.0)).unwrap();

    let start = Instant::now();
    let opts = RunOptions::new().stop_condition(StopCondition::timeout_wall(Duration::from_millis(50)));
    with_timeout(wm.start_working(opts)).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(wm.task(0).unwrap().exit_code(), Some(SIGTERM_EXIT));
}

#[tokio::test]
async fn foreign_fault_from_another_thread_aborts() {
    init_tracing();
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(sleep_task(10.0)).unwrap();

    let faults = wm.fault_sender();
    let injector = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        faults.send_foreign(anyhow::anyhow!("monitor gave up"))
    });

    let err = with_timeout(wm.start_working(RunOptions::new()))
        .await
        .unwrap_err();
    injector.join().unwrap().unwrap();

    assert!(matches!(err, RunpoolError::Foreign(_)));
    assert!(err.to_string().contains("monitor gave up"));
    assert_eq!(wm.task(0).unwrap().signals_received(), 1);
    with_timeout(wm.shutdown(Duration::from_secs(2))).await.unwrap();
}

#[tokio::test]
async fn post_poll_runs_every_iteration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(sleep_task(0.05)).unwrap();
    let opts = RunOptions::new().post_poll(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    with_timeout(wm.start_working(opts)).await.unwrap();

    assert!(calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn spawn_failure_aborts_the_run() {
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(TaskSpec::new(LaunchSpec::new("/nonexistent/runpool-binary")))
        .unwrap();

    let err = with_timeout(wm.start_working(RunOptions::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, RunpoolError::Spawn { uid: 0, .. }));
    assert_eq!(wm.state(), ManagerState::Aborted);
}

#[tokio::test]
async fn deferred_setup_runs_at_spawn_time() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("logs").join("task.txt");
    let marker = dir.path().join("setup-ran");

    let marker_in_setup = marker.clone();
    let out_in_setup = out.clone();
    let spec = TaskSpec::deferred(move || {
        std::fs::write(&marker_in_setup, b"")?;
        Ok(LaunchSpec::shell("echo out; echo err >&2").save_streams(out_in_setup))
    });

    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_task(spec).unwrap();
    assert!(!marker.exists());

    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();

    assert!(marker.exists());
    let saved = std::fs::read_to_string(&out).unwrap();
    assert!(saved.contains("out"));
    assert!(saved.contains("err"));
}

#[tokio::test]
async fn orphaned_pipes_do_not_hold_up_the_loop() {
    init_tracing();
    let observer = RecordingObserver::new();
    let mut wm = WorkerManager::new(fast_config(1)).unwrap();
    wm.add_observer(observer.clone());
    // The backgrounded sleep keeps stdout open after the shell exits.
    for _ in 0..4 {
        wm.add_task(shell_task("sleep 1 & echo started")).unwrap();
    }

    let start = Instant::now();
    with_timeout(wm.start_working(RunOptions::new())).await.unwrap();
    let elapsed = start.elapsed();

    // Waiting out the drain window task by task would take at least 0.8s.
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    assert_eq!(observer.finished().len(), 4);
    for task in wm.tasks() {
        assert_eq!(task.streams().stdout().collect::<Vec<_>>(), vec!["started"]);
    }
}
