//! The execution façade: the four operations transports build on.
//!
//! An [`Engine`] owns the immutable registries and the shared trace
//! recorder, and manages any number of concurrent executions:
//!
//! - [`start`](Engine::start) returns an execution id immediately and runs
//!   the workflow on a background task;
//! - [`status`](Engine::status) returns an immutable
//!   [`ExecutionSnapshot`];
//! - [`stream`](Engine::stream) subscribes to the execution's events,
//!   backlog first, then live;
//! - [`cancel`](Engine::cancel) requests cooperative cancellation.
//!
//! Terminal executions keep their snapshot; their event stream is
//! garbage-collected once every subscriber has detached.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nodeflow::engine::Engine;
//! use nodeflow::registry::NodeRegistry;
//! use nodeflow::scheduler::RunOptions;
//! use nodeflow::workflow::{NodeSpec, Workflow};
//!
//! # async fn example(registry: NodeRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder().with_registry(registry).build();
//!
//! let workflow = Workflow::builder("hello")
//!     .add_node(NodeSpec::new("greet", "text_input"))
//!     .build();
//! let execution_id = engine.start(workflow, RunOptions::default());
//!
//! let mut events = engine.stream(&execution_id)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! let snapshot = engine.status(&execution_id)?;
//! println!("finished: {}", snapshot.status);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::display::FormatterRegistry;
use crate::event_bus::{EventStream, ExecutionEventHub};
use crate::registry::NodeRegistry;
use crate::router::{DataRouter, RoutingAdvisor};
use crate::scheduler::{ExecutionSnapshot, ExecutionState, RunOptions, Scheduler};
use crate::secrets::{SecretResolver, StaticSecrets};
use crate::trace::{NullTraceSink, TraceRecorder, TraceSink};

/// Façade errors. Execution failures never surface here; they live in
/// snapshots and events.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("unknown execution: {execution_id}")]
    #[diagnostic(code(nodeflow::engine::unknown_execution))]
    UnknownExecution { execution_id: String },

    #[error("event stream for execution {execution_id} was already garbage-collected")]
    #[diagnostic(
        code(nodeflow::engine::stream_collected),
        help("Streams of terminal executions are collected once all subscribers detach; use status() instead.")
    )]
    StreamCollected { execution_id: String },
}

struct ExecutionHandle {
    shared: Arc<Mutex<ExecutionState>>,
    /// `None` once the terminal stream was garbage-collected.
    hub: Option<Arc<ExecutionEventHub>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    registry: Option<NodeRegistry>,
    formatters: FormatterRegistry,
    secrets: Option<Arc<dyn SecretResolver>>,
    advisor: Option<Arc<dyn RoutingAdvisor>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// The node type registry. Required for anything useful to run.
    #[must_use]
    pub fn with_registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    #[must_use]
    pub fn with_secret_resolver(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Enable intelligent routing with the given advisor. Without one the
    /// router stays fully deterministic.
    #[must_use]
    pub fn with_routing_advisor(mut self, advisor: Arc<dyn RoutingAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    #[must_use]
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the engine. Must be called within a Tokio runtime; the
    /// trace recorder spawns its sink worker here.
    #[must_use]
    pub fn build(self) -> Engine {
        let config = self.config;
        let secrets = self.secrets.unwrap_or_else(|| {
            let mut resolver = StaticSecrets::new();
            for (key, value) in &config.default_secrets {
                resolver = resolver.with(key.clone(), value.clone());
            }
            Arc::new(resolver)
        });
        let mut router = DataRouter::new().with_advisor_timeout(config.advisor_timeout);
        if let Some(advisor) = self.advisor {
            router = router.with_advisor(advisor);
        }
        let sink = self
            .trace_sink
            .unwrap_or_else(|| Arc::new(NullTraceSink));
        let recorder = TraceRecorder::spawn(sink, config.trace_queue_capacity);
        Engine {
            registry: Arc::new(self.registry.unwrap_or_default()),
            formatters: Arc::new(self.formatters),
            secrets,
            router: Arc::new(router),
            recorder,
            config,
            executions: Mutex::new(FxHashMap::default()),
        }
    }
}

/// The workflow execution engine.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    formatters: Arc<FormatterRegistry>,
    secrets: Arc<dyn SecretResolver>,
    router: Arc<DataRouter>,
    recorder: Arc<TraceRecorder>,
    config: EngineConfig,
    executions: Mutex<FxHashMap<String, ExecutionHandle>>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Start executing a workflow in the background. Returns immediately
    /// with the new execution id; progress is observed through
    /// [`status`](Self::status) and [`stream`](Self::stream).
    pub fn start(&self, workflow: crate::workflow::Workflow, mut options: RunOptions) -> String {
        if options.max_concurrency.is_none() {
            options.max_concurrency = self.config.max_concurrency;
        }
        let execution_id = Uuid::new_v4().to_string();
        let hub = ExecutionEventHub::new(execution_id.clone(), self.config.event_buffer_capacity);
        let shared = Arc::new(Mutex::new(ExecutionState::new(
            execution_id.clone(),
            workflow.id.clone(),
            options.user_id.clone(),
            workflow.nodes.iter().map(|n| n.id.clone()),
        )));
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(
            Arc::new(workflow),
            Arc::clone(&self.registry),
            Arc::clone(&self.formatters),
            Arc::clone(&self.secrets),
            Arc::clone(&self.router),
            Arc::clone(&self.recorder),
            Arc::clone(&hub),
            Arc::clone(&shared),
            options,
            cancel.clone(),
        );
        let task = tokio::spawn(scheduler.run());
        self.executions.lock().insert(
            execution_id.clone(),
            ExecutionHandle {
                shared,
                hub: Some(hub),
                cancel,
                task,
            },
        );
        execution_id
    }

    /// Immutable snapshot of an execution's progress.
    pub fn status(&self, execution_id: &str) -> Result<ExecutionSnapshot, EngineError> {
        self.collect_terminal_streams();
        let executions = self.executions.lock();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution {
                execution_id: execution_id.to_string(),
            })?;
        Ok(handle.shared.lock().snapshot())
    }

    /// Subscribe to an execution's events: full backlog, then live.
    /// Dropping the stream never affects the execution.
    pub fn stream(&self, execution_id: &str) -> Result<EventStream, EngineError> {
        self.collect_terminal_streams();
        let executions = self.executions.lock();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution {
                execution_id: execution_id.to_string(),
            })?;
        match &handle.hub {
            Some(hub) => Ok(hub.subscribe()),
            None => Err(EngineError::StreamCollected {
                execution_id: execution_id.to_string(),
            }),
        }
    }

    /// Request cooperative cancellation. Idempotent; a no-op once the
    /// execution is terminal.
    pub fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
        let executions = self.executions.lock();
        let handle = executions
            .get(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution {
                execution_id: execution_id.to_string(),
            })?;
        {
            let mut shared = handle.shared.lock();
            if shared.status.is_terminal() {
                return Ok(());
            }
            shared.cancel_requested = true;
        }
        handle.cancel.cancel();
        Ok(())
    }

    /// Ids of all executions the engine still tracks, newest state
    /// included regardless of terminality.
    #[must_use]
    pub fn list_executions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop the event hub of terminal executions nobody is subscribed to.
    /// Snapshots stay available.
    fn collect_terminal_streams(&self) {
        let mut executions = self.executions.lock();
        for handle in executions.values_mut() {
            let Some(hub) = &handle.hub else { continue };
            let terminal = handle.shared.lock().status.is_terminal();
            if terminal
                && handle.task.is_finished()
                && hub.has_been_subscribed()
                && hub.subscriber_count() == 0
            {
                handle.hub = None;
            }
        }
    }
}
