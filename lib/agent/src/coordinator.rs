use crate::collector::Collector;
use crate::forwarder::Forwarder;
use crate::periodic::{run_periodic, PeriodicTask, TickReport};
use anyhow::{bail, Context, Result};
use common::AgentConfig;
use getset::{CopyGetters, Getters};
use metrics::{MetricsSourceRef, SystemMetricsSource};
use network::{HttpTransport, TransportRef};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storage::FileSampleStore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

/// Summary of a completed run, produced after the store has been closed.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ShutdownReport {
    #[getset(get = "pub")]
    tasks: Vec<TickReport>,
    /// Samples still in the store at close, to be forwarded on the next run.
    #[getset(get_copy = "pub")]
    pending: usize,
}

impl ShutdownReport {
    pub fn ticks_of(&self, name: &str) -> Option<u64> {
        self.tasks
            .iter()
            .find(|report| report.name() == name)
            .map(|report| report.ticks())
    }
}

/// Periodic tasks sharing one cancellation token. The join set doubles as
/// the completion barrier: once it is drained, no task can touch the store.
struct Tasks {
    set: JoinSet<TickReport>,
    token: CancellationToken,
    reports: Vec<TickReport>,
    failures: Vec<JoinError>,
}

impl Tasks {
    fn new() -> Self {
        Self {
            set: JoinSet::new(),
            token: CancellationToken::new(),
            reports: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn spawn<T>(&mut self, task: T, period: Duration)
    where
        T: PeriodicTask + 'static,
    {
        self.set.spawn(run_periodic(task, period, self.token.clone()));
    }

    /// Wait for the stop request, or for a task to end on its own. Tasks only
    /// return once cancelled, so the latter means one of them panicked.
    async fn wait_for_shutdown<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping periodic tasks");
            }
            Some(result) = self.set.join_next() => {
                error!("Periodic task stopped unexpectedly, shutting down");
                self.record(result);
            }
        }
    }

    /// Cancel every task and wait until all of them have returned.
    async fn stop(&mut self) {
        self.token.cancel();
        while let Some(result) = self.set.join_next().await {
            self.record(result);
        }
    }

    fn record(&mut self, result: Result<TickReport, JoinError>) {
        match result {
            Ok(report) => self.reports.push(report),
            Err(e) => {
                error!(error = %e, "Periodic task failed");
                self.failures.push(e);
            }
        }
    }
}

/// Owns the store for the lifetime of one run and sequences startup and
/// shutdown around the collector and forwarder tasks.
#[derive(TypedBuilder)]
pub struct Agent {
    config: AgentConfig,
    source: MetricsSourceRef,
    #[builder(default)]
    transport: Option<TransportRef>,
}

impl Agent {
    /// Wire the agent to the host's metrics and, if an endpoint is
    /// configured, an HTTP transport.
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        let config = config.validated().context("Invalid agent configuration")?;
        let transport: Option<TransportRef> = match config.endpoint() {
            Some(endpoint) => Some(Arc::new(
                HttpTransport::new(endpoint.clone(), config.request_timeout())
                    .context("Failed to set up HTTP transport")?,
            )),
            None => {
                warn!("No endpoint configured, samples will be kept locally");
                None
            }
        };

        Ok(Agent::builder()
            .config(config)
            .source(Arc::new(SystemMetricsSource::new()))
            .transport(transport)
            .build())
    }

    /// Run until `shutdown` resolves.
    ///
    /// The store is opened before any task starts and closed only after both
    /// tasks have returned, so no operation can reach a closed store. Failing
    /// to open the store, or a configuration the tasks cannot run with, is
    /// fatal and nothing is spawned. A panicking task
    /// brings the whole agent down: the other task is stopped, the store is
    /// closed, and an error is returned.
    pub async fn run<F>(self, shutdown: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        let config = self
            .config
            .validated()
            .context("Invalid agent configuration")?;
        let db_path = config.db_path();
        let store = Arc::new(
            FileSampleStore::open(db_path)
                .with_context(|| format!("Failed to open sample store at {}", db_path.display()))?,
        );
        info!(
            path = %db_path.display(),
            pending = store.pending_count(),
            "Sample store opened"
        );

        let mut tasks = Tasks::new();
        tasks.spawn(
            Collector::new(self.source.clone(), store.clone()),
            config.collect_interval(),
        );
        tasks.spawn(
            Forwarder::new(store.clone(), self.transport.clone()),
            config.forward_interval(),
        );
        info!(
            destination = self.transport.as_ref().map(|t| t.destination()).unwrap_or("<none>"),
            "Agent running"
        );

        tasks.wait_for_shutdown(shutdown).await;
        tasks.stop().await;

        let pending = store.pending_count();
        store
            .close_shared()
            .context("Failed to close sample store")?;

        if !tasks.failures.is_empty() {
            bail!(
                "{} periodic task(s) terminated abnormally",
                tasks.failures.len()
            );
        }

        let report = ShutdownReport {
            tasks: tasks.reports,
            pending,
        };
        info!(
            pending = report.pending(),
            collected = report.ticks_of("collector").unwrap_or_default(),
            forwarded = report.ticks_of("forwarder").unwrap_or_default(),
            "Agent stopped"
        );
        Ok(report)
    }
}
