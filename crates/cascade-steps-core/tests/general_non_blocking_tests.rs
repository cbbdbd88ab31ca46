use cascade_steps_core::{
    GeneralHandle, GeneralNonBlockingExecution, GeneralPhase, GeneralSnapshot, GeneralStep, StepError,
    PoolConfig, StepExecution, StepFailure, StepResult, SynchronousNonBlockingExecution, WorkerPool,
};
use cascade_steps_test_utils::{
    init_test_logging, test_pool, wait_until, BodyScript, Gate, RecordingStepContext,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Setup in the background, then the body, then teardown in the background
struct SlowBlock {
    start_gate: Arc<Gate>,
    end_gate: Arc<Gate>,
    teardown_error: Option<&'static str>,
}

impl SlowBlock {
    fn new() -> Self {
        Self {
            start_gate: Arc::new(Gate::new()),
            end_gate: Arc::new(Gate::new()),
            teardown_error: None,
        }
    }

    fn failing_teardown(message: &'static str) -> Self {
        Self {
            teardown_error: Some(message),
            ..Self::new()
        }
    }

    fn open_all(self) -> Self {
        self.start_gate.open();
        self.end_gate.open();
        self
    }
}

impl GeneralStep for SlowBlock {
    fn start(&self, handle: &GeneralHandle) -> StepResult<()> {
        let start_gate = self.start_gate.clone();
        let end_gate = self.end_gate.clone();
        let teardown_error = self.teardown_error;
        let step = handle.clone();
        handle.run(move |ctx| {
            start_gate.pass(ctx)?;
            let tail = step.tail_call(move |ctx| {
                end_gate.pass(ctx)?;
                match teardown_error {
                    Some(message) => Err(StepFailure::msg(message)),
                    None => Ok(()),
                }
            });
            step.start_body(tail)
        })
    }
}

fn execution(
    context: &Arc<RecordingStepContext>,
    pool: WorkerPool,
    step: SlowBlock,
) -> GeneralNonBlockingExecution<SlowBlock> {
    GeneralNonBlockingExecution::new(context.clone(), pool, step)
}

#[test]
fn test_setup_body_teardown_status() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = execution(&context, test_pool("general-status"), SlowBlock::new());
    let step = execution.step();

    assert_eq!(execution.status().as_deref(), Some("not yet scheduled"));
    assert_eq!(execution.start().unwrap(), false);

    assert!(step.start_gate.wait_entered(1, TIMEOUT));
    let status = execution.status().unwrap();
    assert!(status.starts_with("running in thread: general-status [#"), "{}", status);
    assert!(execution.blocks_restart());
    assert_eq!(execution.phase(), GeneralPhase::BackgroundRunning);

    step.start_gate.open();
    let body = context.bodies().wait_for_body(TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));
    assert_eq!(execution.status().as_deref(), Some("not yet scheduled"));
    assert_eq!(execution.phase(), GeneralPhase::BodyRunning);

    body.succeed(json!("body result"));
    assert!(step.end_gate.wait_entered(1, TIMEOUT));
    assert!(execution.status().unwrap().starts_with("running in thread: general-status [#"));
    assert!(execution.blocks_restart());

    step.end_gate.open();
    let value = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_success();
    assert_eq!(value, json!("body result"));
    assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));
    assert_eq!(execution.status().as_deref(), Some("not yet scheduled"));
    assert_eq!(execution.phase(), GeneralPhase::Terminal);
    assert_eq!(context.outcome_count(), 1);
}

#[test]
fn test_body_failure_wins_over_teardown_failure() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let body_failure = StepFailure::msg("body failed");
    context.bodies().set_script(BodyScript::Fail(body_failure.clone()));
    let execution = execution(
        &context,
        test_pool("general-teardown"),
        SlowBlock::failing_teardown("teardown failed").open_all(),
    );

    execution.start().unwrap();

    let delivered = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert!(delivered.same_as(&body_failure));
    let suppressed = delivered.suppressed();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(suppressed[0].to_string(), "teardown failed");
}

#[test]
fn test_teardown_failure_fails_a_successful_body() {
    init_test_logging();
    let context = RecordingStepContext::new();
    context.bodies().set_script(BodyScript::Succeed(json!(1)));
    let execution = execution(
        &context,
        test_pool("general-teardown-ok"),
        SlowBlock::failing_teardown("cleanup broke").open_all(),
    );

    execution.start().unwrap();

    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert_eq!(failure.to_string(), "cleanup broke");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(context.outcome_count(), 1);
}

#[test]
fn test_stop_during_setup_reports_stop_cause() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = execution(&context, test_pool("general-stop"), SlowBlock::new());

    execution.start().unwrap();
    assert!(execution.step().start_gate.wait_entered(1, TIMEOUT));

    let cause = StepFailure::msg("aborted");
    execution.stop(cause.clone()).unwrap();

    assert!(context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure().same_as(&cause));
    assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));
    assert!(matches!(cause.suppressed()[0].error(), StepError::Interrupted));
    assert_eq!(context.bodies().started_count(), 0);
    assert_eq!(execution.phase(), GeneralPhase::Terminal);
}

#[test]
fn test_stop_while_body_runs_skips_teardown() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let step = SlowBlock::new();
    step.start_gate.open();
    let execution = execution(&context, test_pool("general-stop-body"), step);

    execution.start().unwrap();
    let body = context.bodies().wait_for_body(TIMEOUT).unwrap();

    let cause = StepFailure::msg("aborted");
    execution.stop(cause.clone()).unwrap();
    body.fail(StepFailure::msg("body interrupted"));

    assert!(context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure().same_as(&cause));
    std::thread::sleep(Duration::from_millis(50));
    assert!(!execution.step().end_gate.wait_entered(1, Duration::from_millis(10)));
    assert_eq!(context.outcome_count(), 1);
}

#[test]
fn test_resume_depends_on_background_work() {
    init_test_logging();
    let context = RecordingStepContext::for_step("slowBlock");
    let execution = execution(&context, test_pool("general-resume"), SlowBlock::new());

    execution.start().unwrap();
    assert!(execution.step().start_gate.wait_entered(1, TIMEOUT));
    execution.step().start_gate.open();
    let body = context.bodies().wait_for_body(TIMEOUT).unwrap();
    assert!(wait_until(TIMEOUT, || execution.phase() == GeneralPhase::BodyRunning));

    // a running body has its own resume story
    execution.on_resume();
    assert_eq!(context.outcome_count(), 0);

    body.succeed(json!(null));
    assert!(execution.step().end_gate.wait_entered(1, TIMEOUT));

    execution.on_resume();
    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert!(matches!(failure.error(), StepError::ResumeNotSupported { step } if step == "slowBlock"));

    execution.step().end_gate.open();
    assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));
    assert_eq!(context.outcome_count(), 1);
}

#[test]
fn test_snapshot_carries_running_thread_across_restart() {
    init_test_logging();
    let context = RecordingStepContext::for_step("slowBlock");
    let pool = test_pool("general-snapshot");
    let running = execution(&context, pool.clone(), SlowBlock::new());

    running.start().unwrap();
    assert!(running.step().start_gate.wait_entered(1, TIMEOUT));
    let persisted = serde_json::to_string(&running.snapshot()).unwrap();
    running.step().start_gate.open();

    let snapshot: GeneralSnapshot = serde_json::from_str(&persisted).unwrap();
    assert!(snapshot.thread_name.unwrap().starts_with("general-snapshot [#"));

    let restarted_context = RecordingStepContext::for_step("slowBlock");
    let restored = GeneralNonBlockingExecution::restore(
        restarted_context.clone(),
        pool,
        SlowBlock::new(),
        serde_json::from_str(&persisted).unwrap(),
    );
    assert_eq!(restored.phase(), GeneralPhase::Idle);
    restored.on_resume();

    let failure = restarted_context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert!(matches!(failure.error(), StepError::ResumeNotSupported { .. }));
}

#[test]
fn test_idle_snapshot_is_empty() {
    let context = RecordingStepContext::new();
    let idle = execution(&context, test_pool("general-idle"), SlowBlock::new());

    assert_eq!(idle.snapshot(), GeneralSnapshot::default());
    assert_eq!(serde_json::to_value(idle.snapshot()).unwrap(), json!({}));
}

#[test]
fn test_repeated_blocks_do_not_hang() {
    init_test_logging();
    let pool = test_pool("general-loop");

    for i in 0..50 {
        let context = RecordingStepContext::new();
        context.bodies().set_script(BodyScript::Succeed(json!(i)));
        let execution = execution(&context, pool.clone(), SlowBlock::new().open_all());

        execution.start().unwrap();

        let value = context
            .wait_for_outcome(TIMEOUT)
            .unwrap_or_else(|| panic!("iteration {} hung", i))
            .unwrap_success();
        assert_eq!(value, json!(i));
        assert!(wait_until(TIMEOUT, || !execution.blocks_restart()));
    }
}

#[test]
fn test_closure_steps_report_through_the_handle() {
    init_test_logging();
    let context = RecordingStepContext::new();
    let execution = GeneralNonBlockingExecution::new(context.clone(), test_pool("general-closure"), |handle: &GeneralHandle| {
        let reporter = handle.clone();
        handle.run(move |ctx| {
            reporter.succeed(json!({ "thread": ctx.thread_name() }));
            Ok(())
        })
    });

    execution.start().unwrap();

    let value = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_success();
    assert!(value["thread"].as_str().unwrap().starts_with("general-closure [#"));
}

#[test]
fn test_stop_racing_run_resolves_once_and_cancels_the_work() {
    init_test_logging();
    let pool = test_pool("general-race");

    for round in 0..30 {
        let context = RecordingStepContext::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let execution = Arc::new(GeneralNonBlockingExecution::new(context.clone(), pool.clone(), move |handle: &GeneralHandle| {
            let reporter = handle.clone();
            let flag = flag.clone();
            handle.run(move |ctx| {
                ctx.sleep(Duration::from_secs(60))?;
                flag.store(true, Ordering::SeqCst);
                reporter.succeed(json!("finished"));
                Ok(())
            })
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
        assert!(!finished.load(Ordering::SeqCst), "round {}", round);
        assert_eq!(execution.phase(), GeneralPhase::Terminal);
        assert_eq!(context.outcome_count(), 1, "round {}", round);
    }
}

#[test]
fn test_queued_background_work_does_not_block_resume() {
    init_test_logging();
    let pool = WorkerPool::new(PoolConfig {
        thread_name_prefix: "general-queued".to_string(),
        max_threads: 1,
        ..PoolConfig::default()
    });

    // occupy the only worker thread
    let busy = Arc::new(Gate::new());
    let busy_gate = busy.clone();
    let occupant_context = RecordingStepContext::new();
    let occupant = SynchronousNonBlockingExecution::new(occupant_context.clone(), pool.clone(), move |ctx| {
        busy_gate.pass(ctx)?;
        Ok(json!(null))
    });
    occupant.start().unwrap();
    assert!(busy.wait_entered(1, TIMEOUT));

    let context = RecordingStepContext::for_step("slowBlock");
    let execution = execution(&context, pool, SlowBlock::new());
    execution.start().unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(execution.phase(), GeneralPhase::BackgroundRunning);
    assert_eq!(execution.status().as_deref(), Some("not yet scheduled"));
    assert!(!execution.blocks_restart());
    assert_eq!(execution.snapshot(), GeneralSnapshot::default());

    execution.on_resume();
    assert_eq!(context.outcome_count(), 0);

    busy.open();
    occupant_context.wait_for_outcome(TIMEOUT).unwrap().unwrap_success();
    assert!(execution.step().start_gate.wait_entered(1, TIMEOUT));
    assert!(execution.blocks_restart());

    execution.on_resume();
    let failure = context.wait_for_outcome(TIMEOUT).unwrap().unwrap_failure();
    assert!(matches!(failure.error(), StepError::ResumeNotSupported { step } if step == "slowBlock"));
    execution.step().start_gate.open();
}
