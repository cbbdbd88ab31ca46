use cascade_steps_core::{
    impersonate, FailureHandler, Principal, StepError, StepExecution, StepFailure, SyncPhase,
    SynchronousNonBlockingExecution,
};
use cascade_steps_test_utils::{init_test_logging, test_pool, wait_until, Gate, RecordingStepContext};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_result_is_delivered_once() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-once"), |_| Ok(json!({"ok": true})));

    assert_eq!(execution.start().unwrap(), false);

    let outcome = context.wait_for_outcome(TIMEOUT).unwrap();
    assert_eq!(outcome.unwrap_success(), json!({"ok": true}));
    assert!(wait_until(TIMEOUT, || execution.phase() == SyncPhase::Succeeded));
    assert_eq!(context.outcome_count(), 1);
}

#[test]
fn test_status_and_blocks_restart_follow_the_worker() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let gate = Arc::new(Gate::new());
    let worker_gate = gate.clone();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-status"), move |ctx| {
        worker_gate.pass(ctx)?;
        Ok(Value::Null)
    });

    assert_eq!(execution.status().as_deref(), Some("not yet scheduled"));
    assert!(!execution.blocks_restart());
    assert_eq!(execution.phase(), SyncPhase::NotScheduled);

    execution.start().unwrap();
    assert!(gate.wait_entered(1, TIMEOUT));

    let status = execution.status().unwrap();
    assert!(status.starts_with("running in thread: snb-status [#"), "{}", status);
    assert!(execution.blocks_restart());
    assert_eq!(execution.phase(), SyncPhase::Running);

    gate.open();
    context.wait_for_outcome(TIMEOUT).unwrap().unwrap_success();
    assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));

    // the thread name is kept after completion
    assert_eq!(execution.status(), Some(status));
}

#[test]
fn test_failure_after_stop_is_suppressed_into_stop_cause() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-stop"), move |_| {
        entered_tx.send(()).unwrap();
        // not interruptible: the work only notices the stop when it returns
        release_rx.recv().unwrap();
        Err(StepFailure::msg("exception B"))
    });

    execution.start().unwrap();
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    let cause_a = StepFailure::msg("cause A");
    execution.stop(cause_a.clone()).unwrap();
    release_tx.send(()).unwrap();

    let delivered = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert!(delivered.same_as(&cause_a));

    assert!(wait_until(TIMEOUT, || !cause_a.suppressed().is_empty()));
    let suppressed = cause_a.suppressed();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(suppressed[0].to_string(), "exception B");
    assert_eq!(execution.phase(), SyncPhase::Cancelled);
    assert_eq!(context.outcome_count(), 1);
}

#[test]
fn test_stop_interrupts_sleeping_work() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-sleep"), |ctx| {
        ctx.sleep(Duration::from_secs(60))?;
        Ok(Value::Null)
    });

    execution.start().unwrap();
    assert!(wait_until(TIMEOUT, || execution.blocks_restart()));

    let cause = StepFailure::msg("aborted by user");
    execution.stop(cause.clone()).unwrap();

    assert!(context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure().same_as(&cause));
    assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));
    assert!(matches!(cause.suppressed()[0].error(), StepError::Interrupted));
}

#[test]
fn test_concurrent_stops_racing_completion_resolve_once() {
    init_test_logging();
    let pool = test_pool("snb-race");

    for round in 0..20 {
        let context = RecordingStepContext::new();
        let execution = Arc::new(SynchronousNonBlockingExecution::new(context.clone(), pool.clone(), move |_| {
            Ok(json!(round))
        }));
        execution.start().unwrap();

        let barrier = Arc::new(Barrier::new(4));
        let stoppers: Vec<_> = (0..4)
            .map(|i| {
                let execution = execution.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    execution.stop(StepFailure::msg(format!("stop {}", i))).unwrap();
                })
            })
            .collect();
        for stopper in stoppers {
            stopper.join().unwrap();
        }

        assert!(context.wait_for_outcome(TIMEOUT).is_some());
        assert!(wait_until(TIMEOUT, || execution.phase().is_terminal()));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(context.outcome_count(), 1, "round {}", round);
    }
}

#[test]
fn test_resume_fails_naming_the_step() {
    init_test_logging();
    let context = RecordingStepContext::for_step("slowStep");
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-resume"), |_| Ok(Value::Null));

    execution.on_resume();

    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert!(matches!(failure.error(), StepError::ResumeNotSupported { step } if step == "slowStep"));
    assert!(failure.to_string().starts_with("Step `slowStep` is a non-blocking synchronous step"));
    assert!(failure.to_string().contains("retry(conditions: [nonresumable()], count: 2)"));
}

#[test]
fn test_resume_without_descriptor_uses_generic_message() {
    let context = RecordingStepContext::new();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-anon"), |_| Ok(Value::Null));

    execution.on_resume();

    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert_eq!(
        failure.to_string(),
        "Resume after a restart not supported for non-blocking synchronous steps"
    );
}

#[test]
fn test_work_runs_as_the_starting_principal() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-principal"), |ctx| {
        Ok(json!({
            "current": Principal::current().name(),
            "captured": ctx.principal().name(),
        }))
    });

    {
        let _guard = impersonate(Principal::User("alice".to_string()));
        execution.start().unwrap();
    }

    let value = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_success();
    assert_eq!(value, json!({"current": "alice", "captured": "alice"}));
    assert_eq!(Principal::current(), Principal::System);
}

#[test]
fn test_panicking_work_fails_the_step() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-panic"), |_| -> Result<Value, StepFailure> {
        panic!("worker blew up")
    });

    execution.start().unwrap();

    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert_eq!(failure.to_string(), "Step panicked: worker blew up");
    assert!(wait_until(TIMEOUT, || execution.phase() == SyncPhase::Failed));
}

#[test]
fn test_failure_handler_from_context_is_applied() {
    let context = RecordingStepContext::new();
    context.insert(FailureHandler::new(|_, failure| {
        StepFailure::new(StepError::Abort(format!("wrapped: {}", failure)))
    }));
    let execution = SynchronousNonBlockingExecution::new(context.clone(), test_pool("snb-handler"), |_| {
        Err(StepFailure::msg("disk full"))
    });

    execution.start().unwrap();

    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert_eq!(failure.to_string(), "wrapped: disk full");
}

#[test]
fn test_stop_racing_start_never_runs_work_past_cancellation() {
    init_test_logging();
    let pool = test_pool("snb-start-race");

    for round in 0..20 {
        let context = RecordingStepContext::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let execution = Arc::new(SynchronousNonBlockingExecution::new(context.clone(), pool.clone(), move |ctx| {
            ctx.sleep(Duration::from_secs(60))?;
            flag.store(true, Ordering::SeqCst);
            Ok(Value::Null)
        }));

        let barrier = Arc::new(Barrier::new(2));
        let cause = StepFailure::msg(format!("stop {}", round));
        let stopper = {
            let execution = execution.clone();
            let barrier = barrier.clone();
            let cause = cause.clone();
            std::thread::spawn(move || {
                barrier.wait();
                execution.stop(cause).unwrap();
            })
        };
        barrier.wait();
        execution.start().unwrap();
        stopper.join().unwrap();

        let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
        assert!(failure.same_as(&cause), "round {}", round);
        assert!(wait_until(TIMEOUT, || !execution.blocks_restart()), "round {}", round);
        assert!(wait_until(TIMEOUT, || execution.phase() == SyncPhase::Cancelled));
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(context.outcome_count(), 1);
    }
}
