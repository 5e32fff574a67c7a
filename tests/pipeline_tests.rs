use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Map, Value};

use flowcanvas::pipe::{EXECUTE_PIPE, VALIDATE_PIPE};
use flowcanvas::{
    pipe_from_fn, tool_from_fn, ContextSnapshot, EngineConfig, ExecutionContext, ExecutionPipe,
    FlowCanvas, FlowCanvasBuilder, FlowError, FlowResult, FlowRunner, IdGenerator, IterationPath,
    ModelRegistry,
    NodeExecutor, Pipeline, RunOutcome, RunRequest, ToolNode, ToolRegistry, ValidationPipe,
    ValueRef,
};

fn counting_registry(calls: Arc<AtomicU32>) -> ToolRegistry {
    ToolRegistry::new().with(tool_from_fn("count", move |args: Map<String, Value>, _ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FlowError>(args)
        }
    }))
}

fn two_step_canvas() -> flowcanvas::Result<Arc<FlowCanvas>> {
    let mut builder = FlowCanvasBuilder::new();
    builder
        .add_tool_node("first", ToolNode::new("count").with_arg("step", 1))
        .add_tool_node(
            "second",
            ToolNode::new("count").with_arg_ref("after", ValueRef::parse("first.step")?),
        )
        .connect("first", "second");
    Ok(Arc::new(builder.build()?))
}

async fn drain(runner: &FlowRunner, ctx: ExecutionContext) -> Vec<FlowResult> {
    runner.run_context(ctx).collect().await
}

#[tokio::test]
async fn standard_runner_executes_canvas() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = NodeExecutor::new(counting_registry(calls.clone()), ModelRegistry::new());
    let runner = FlowRunner::standard(executor)?;

    let results: Vec<FlowResult> = runner
        .run_stream(two_step_canvas()?, RunRequest::default())
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].payload(), Some(&json!({ "after": 1 })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn run_ids_carry_configured_worker_id() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = NodeExecutor::new(counting_registry(calls), ModelRegistry::new())
        .with_config(EngineConfig::default().with_worker_id(7));
    let runner = FlowRunner::standard(executor)?;

    let ctx = runner.prepare(two_step_canvas()?, RunRequest::default())?;
    let id: u64 = ctx
        .run_id()
        .strip_prefix("run-")
        .expect("run id prefix")
        .parse()?;

    assert_eq!(IdGenerator::decompose(id).1, 7);
    Ok(())
}

#[tokio::test]
async fn failing_pipe_stops_the_chain() -> anyhow::Result<()> {
    let later_runs = Arc::new(AtomicU32::new(0));
    let counter = later_runs.clone();
    let pipeline = Pipeline::new()
        .with_pipe(pipe_from_fn("audit", |ctx: &ExecutionContext| {
            ctx.set_attribute("audited", json!(true));
            Ok(vec![FlowResult::node_success("audit", json!("ok"))])
        }))
        .with_pipe(pipe_from_fn("quota", |_ctx: &ExecutionContext| {
            Err(FlowError::Pipe {
                pipe: "quota".into(),
                message: "quota exhausted".into(),
            })
        }))
        .with_pipe(pipe_from_fn("notify", move |_ctx: &ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![FlowResult::success(json!("sent"))])
        }));
    let runner = FlowRunner::new(Arc::new(pipeline));
    let ctx = runner.prepare(two_step_canvas()?, RunRequest::default())?;

    let results = drain(&runner, ctx.clone()).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_success());
    assert_eq!(results.iter().filter(|r| r.is_failure()).count(), 1);
    assert!(matches!(results[1].cause(), Some(FlowError::Pipe { pipe, .. }) if pipe == "quota"));
    assert_eq!(ctx.attribute("audited"), Some(json!(true)));
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn panicking_pipe_becomes_a_failure() -> anyhow::Result<()> {
    let later_runs = Arc::new(AtomicU32::new(0));
    let counter = later_runs.clone();
    let pipeline = Pipeline::new()
        .with_pipe(pipe_from_fn("audit", |ctx: &ExecutionContext| {
            ctx.set_attribute("audited", json!(true));
            Ok(vec![])
        }))
        .with_pipe(pipe_from_fn("crash", |_ctx: &ExecutionContext| -> flowcanvas::Result<Vec<FlowResult>> {
            panic!("crash pipe blew up")
        }))
        .with_pipe(pipe_from_fn("notify", move |_ctx: &ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }));
    let runner = FlowRunner::new(Arc::new(pipeline));
    let ctx = runner.prepare(two_step_canvas()?, RunRequest::default())?;

    let results = drain(&runner, ctx.clone()).await;

    assert_eq!(results.len(), 1);
    match results[0].cause() {
        Some(FlowError::Pipe { pipe, message }) => {
            assert_eq!(pipe, "crash");
            assert!(message.contains("blew up"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(ctx.has_attribute("audited"));
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn ignored_pipes_neither_emit_nor_touch_context() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = NodeExecutor::new(counting_registry(calls.clone()), ModelRegistry::new());
    let pipeline = Pipeline::new()
        .with_pipe(pipe_from_fn("audit", |ctx: &ExecutionContext| {
            ctx.set_attribute("audited", json!(true));
            Ok(vec![FlowResult::node_success("audit", json!("ok"))])
        }))
        .with_pipe(Arc::new(ExecutionPipe::new(executor)));
    let runner = FlowRunner::new(Arc::new(pipeline));
    let request = RunRequest::default().with_pipes([EXECUTE_PIPE]);
    let ctx = runner.prepare(two_step_canvas()?, request)?;

    let results = drain(&runner, ctx.clone()).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].payload(), Some(&json!({ "after": 1 })));
    assert!(!ctx.has_attribute("audited"));
    assert_eq!(ctx.attribute("executed"), Some(json!(true)));
    Ok(())
}

#[tokio::test]
async fn validation_pipe_rejects_incomplete_payload() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = NodeExecutor::new(counting_registry(calls.clone()), ModelRegistry::new());
    let pipeline = Pipeline::new()
        .with_pipe(Arc::new(ValidationPipe::new(["appId"])))
        .with_pipe(Arc::new(ExecutionPipe::new(executor)));
    let runner = FlowRunner::new(Arc::new(pipeline));
    assert_eq!(runner.pipeline().codes(), vec![VALIDATE_PIPE, EXECUTE_PIPE]);

    let rejected: Vec<FlowResult> = runner
        .run_stream(two_step_canvas()?, RunRequest::default())
        .collect()
        .await;
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].is_failure());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let accepted: Vec<FlowResult> = runner
        .run_stream(
            two_step_canvas()?,
            RunRequest::from_value(json!({ "appId": "X" })),
        )
        .collect()
        .await;
    assert_eq!(accepted.len(), 1);
    assert!(accepted[0].is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn node_failure_is_reported_with_node_id() -> anyhow::Result<()> {
    let executor = NodeExecutor::new(ToolRegistry::new(), ModelRegistry::new());
    let runner = FlowRunner::standard(executor)?;

    let results: Vec<FlowResult> = runner
        .run_stream(two_step_canvas()?, RunRequest::default())
        .collect()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node(), Some("first"));
    assert!(matches!(
        results[0].cause(),
        Some(FlowError::ToolNotRegistered(name)) if name == "count"
    ));
    Ok(())
}

#[tokio::test]
async fn async_mode_delivers_through_handle() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let executor = NodeExecutor::new(counting_registry(calls.clone()), ModelRegistry::new());
    let runner = FlowRunner::standard(executor)?;

    let outcome = runner.run(two_step_canvas()?, RunRequest::default().asynchronous());
    let handle = match outcome {
        RunOutcome::Async(handle) => handle,
        RunOutcome::Sync(_) => panic!("expected an async handle"),
    };
    assert!(handle.run_id().starts_with("run-"));

    let results = handle.collect().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn resumed_run_skips_recorded_nodes() -> anyhow::Result<()> {
    let canvas = two_step_canvas()?;
    let earlier = ExecutionContext::new("run-42", canvas.clone(), RunRequest::default());
    earlier.record("start", &IterationPath::root(), json!({}))?;
    earlier.record("first", &IterationPath::root(), json!({ "step": 7 }))?;
    let snapshot = ContextSnapshot::from_json(&earlier.snapshot().to_json()?)?;

    let calls = Arc::new(AtomicU32::new(0));
    let executor = NodeExecutor::new(counting_registry(calls.clone()), ModelRegistry::new());
    let runner = FlowRunner::standard(executor)?;

    let results: Vec<FlowResult> = runner.resume(canvas, snapshot).collect().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].payload(), Some(&json!({ "after": 7 })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}
