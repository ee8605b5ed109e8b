use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use shared::protocol::{location_prefix, POLL_INTERVAL_SECS};
use shared::types::{ServiceAction, ServiceDescriptor, StatusSnapshot, ViewState};
use crate::docker::DockerCli;
use crate::logs::dedup::LogDeduplicator;
use crate::logs::relay::LogSink;
use crate::poller::StatusPoller;
use crate::view::{CommandReply, ViewPublisher};

/// How long shutdown waits for in-flight triggers before abandoning them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// One operator request, alive from receipt until its reply is delivered.
pub struct PendingCommand {
    pub service: ServiceDescriptor,
    pub action: ServiceAction,
    pub reply: Arc<dyn CommandReply>,
}

/// Work items accepted by the reconciler loop
pub enum Trigger {
    Refresh,
    RelayLogs,
    Command(PendingCommand),
}

/// Handle for feeding triggers into a running reconciler
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<Trigger>,
}

impl ReconcilerHandle {
    pub fn new(tx: mpsc::Sender<Trigger>) -> Self {
        Self { tx }
    }

    pub async fn submit(&self, command: PendingCommand) -> Result<()> {
        self.tx
            .send(Trigger::Command(command))
            .await
            .map_err(|_| anyhow::anyhow!("Reconciler is not running"))
    }
}

/// Aligns observed container state, operator commands and the published view.
///
/// Commands are not serialised; two presses on the same button run side by
/// side against idempotent runtime actions. Every trigger ends with a fresh
/// poll, so the latest refresh matches the runtime.
pub struct Reconciler {
    docker: DockerCli,
    poller: StatusPoller,
    dedup: LogDeduplicator,
    publisher: Arc<dyn ViewPublisher>,
    relay: Option<Arc<dyn LogSink>>,
    server_name: String,
    location: String,
    last_snapshot: watch::Sender<StatusSnapshot>,
    /// Commands dispatched but not yet answered, per container name
    in_flight: HashMap<String, AtomicUsize>,
}

impl Reconciler {
    pub fn new(
        docker: DockerCli,
        services: Vec<ServiceDescriptor>,
        publisher: Arc<dyn ViewPublisher>,
        relay: Option<Arc<dyn LogSink>>,
        server_name: &str,
    ) -> Self {
        let (last_snapshot, _) = watch::channel(StatusSnapshot::unknown(&services));
        let in_flight = services
            .iter()
            .map(|s| (s.name.clone(), AtomicUsize::new(0)))
            .collect();

        Self {
            poller: StatusPoller::new(docker.clone(), services),
            docker,
            dedup: LogDeduplicator::new(),
            publisher,
            relay,
            server_name: server_name.to_string(),
            location: location_prefix(server_name),
            last_snapshot,
            in_flight,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.last_snapshot.subscribe()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.last_snapshot.borrow().clone()
    }

    /// True while at least one command for the service awaits its reply.
    pub fn is_transitioning(&self, name: &str) -> bool {
        self.in_flight
            .get(name)
            .map(|n| n.load(Ordering::SeqCst) > 0)
            .unwrap_or(false)
    }

    async fn poll(&self) -> StatusSnapshot {
        let snapshot = self.poller.poll().await;
        self.last_snapshot.send_replace(snapshot.clone());
        snapshot
    }

    /// Poll every service and push the resulting view. Publishing failures
    /// are logged; the next refresh retries.
    pub async fn refresh(&self) -> StatusSnapshot {
        let snapshot = self.poll().await;
        let view = ViewState::render(&snapshot, &self.server_name, &self.location);
        if let Err(e) = self.publisher.publish(&view).await {
            tracing::error!("Failed to refresh view: {:#}", e);
        }
        snapshot
    }

    /// Poll, then fetch and forward new log output for each running service.
    /// Returns how many excerpts were forwarded.
    pub async fn relay_logs(&self) -> usize {
        let Some(relay) = &self.relay else {
            return 0;
        };

        let snapshot = self.poll().await;
        let forwards = snapshot.running().map(|service| async move {
            let text = match self.docker.logs_since(service).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Log fetch for {} failed: {}", service.name, e);
                    return false;
                }
            };
            let Some(excerpt) = self.dedup.check_new(&service.name, &text) else {
                return false;
            };
            match relay.forward(service, &excerpt).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Failed to forward logs for {}: {:#}", service.name, e);
                    false
                }
            }
        });

        join_all(forwards).await.into_iter().filter(|sent| *sent).count()
    }

    /// Run one operator command to completion. Always answers the requester
    /// and always refreshes the view, whatever happens in between.
    pub async fn handle_command(&self, command: PendingCommand) {
        let PendingCommand { service, action, reply } = command;
        tracing::info!("{} {} requested from {}", action, service.name, reply.origin());

        if let Err(e) = reply.acknowledge().await {
            tracing::error!("Failed to acknowledge {} {}: {:#}", action, service.name, e);
        }

        if self.is_transitioning(&service.name) {
            tracing::info!("{} already has a command in flight, dispatching anyway", service.name);
        }
        let counter = self.in_flight.get(&service.name);
        if let Some(n) = counter {
            n.fetch_add(1, Ordering::SeqCst);
        }

        let content = match self.execute(&service, action).await {
            Ok(output) => format!(
                "Command executed successfully for {}:\n```\n{}\n```",
                service.name, output
            ),
            Err(e) => {
                tracing::error!("Error executing {} for {}: {:#}", action, service.name, e);
                format!("Error executing command for {}: {:#}", service.name, e)
            }
        };

        if let Err(e) = reply.finish(&content).await {
            tracing::error!("Failed to deliver reply for {} {}: {:#}", action, service.name, e);
        }
        if let Some(n) = counter {
            n.fetch_sub(1, Ordering::SeqCst);
        }

        self.refresh().await;
    }

    /// Dispatch the lifecycle command, then forward a fresh log excerpt if a
    /// relay is configured. Returns the operator-facing command output.
    async fn execute(&self, service: &ServiceDescriptor, action: ServiceAction) -> Result<String> {
        let output = self.docker.apply(service, action).await?;
        if !output.success() {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            anyhow::bail!("exit status {}: {}", code, output.text());
        }

        if let Some(relay) = &self.relay {
            let text = self
                .docker
                .logs_since(service)
                .await
                .context("command succeeded but fetching logs failed")?;
            if let Some(excerpt) = self.dedup.check_new(&service.name, &text) {
                relay
                    .forward(service, &excerpt)
                    .await
                    .context("command succeeded but forwarding logs failed")?;
            }
        }

        Ok(output.text().to_string())
    }

    async fn handle(&self, trigger: Trigger) {
        match trigger {
            Trigger::Refresh => {
                self.refresh().await;
            }
            Trigger::RelayLogs => {
                let sent = self.relay_logs().await;
                if sent > 0 {
                    tracing::debug!("Forwarded {} log excerpts", sent);
                }
            }
            Trigger::Command(command) => self.handle_command(command).await,
        }
    }
}

/// Answer a command that will never be dispatched.
async fn decline(command: PendingCommand) {
    let PendingCommand { service, action, reply } = command;
    tracing::warn!("Declining {} {} from {}: shutting down", action, service.name, reply.origin());
    let content = format!("Error executing command for {}: shutting down", service.name);
    if let Err(e) = reply.finish(&content).await {
        tracing::error!("Failed to deliver reply for {} {}: {:#}", action, service.name, e);
    }
}

/// Reconciler event loop: two repeating timers plus inbound commands, each
/// trigger handled on its own task so a slow one never holds up the rest.
pub async fn run(
    reconciler: Arc<Reconciler>,
    mut rx: mpsc::Receiver<Trigger>,
    cancel: CancellationToken,
) -> Result<()> {
    let period = Duration::from_secs(POLL_INTERVAL_SECS);
    // startup already published a view, so the first timed pass is one period out
    let mut refresh_interval = interval_at(Instant::now() + period, period);
    let mut relay_interval = interval_at(Instant::now() + period, period);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    relay_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut tasks = JoinSet::new();
    let spawn = |tasks: &mut JoinSet<()>, trigger: Trigger| {
        let reconciler = reconciler.clone();
        tasks.spawn(async move { reconciler.handle(trigger).await });
    };

    loop {
        tokio::select! {
            Some(trigger) = rx.recv() => spawn(&mut tasks, trigger),
            _ = refresh_interval.tick() => spawn(&mut tasks, Trigger::Refresh),
            _ = relay_interval.tick() => spawn(&mut tasks, Trigger::RelayLogs),
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Trigger task failed: {}", e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Reconciler shutting down");
                break;
            }
        }
    }

    // nothing new gets in; whatever is still queued is answered, not run
    rx.close();
    while let Ok(trigger) = rx.try_recv() {
        if let Trigger::Command(command) = trigger {
            decline(command).await;
        }
    }

    if !tasks.is_empty() {
        tracing::info!("Waiting for {} in-flight triggers", tasks.len());
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Abandoning {} triggers after {:?}", tasks.len(), SHUTDOWN_GRACE);
            tasks.shutdown().await;
        }
    }

    Ok(())
}
