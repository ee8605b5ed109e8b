use chrono::Utc;
use futures::future::join_all;
use shared::types::{ServiceDescriptor, ServiceStatus, StatusSnapshot};
use crate::docker::DockerCli;

/// Produces complete snapshots. Lookups run concurrently and fail closed:
/// a service whose query errors reads as stopped, the rest are unaffected.
#[derive(Clone)]
pub struct StatusPoller {
    docker: DockerCli,
    services: Vec<ServiceDescriptor>,
}

impl StatusPoller {
    pub fn new(docker: DockerCli, services: Vec<ServiceDescriptor>) -> Self {
        Self { docker, services }
    }

    pub async fn poll(&self) -> StatusSnapshot {
        let lookups = self.services.iter().map(|service| async move {
            let running = match self.docker.is_running(service).await {
                Ok(running) => running,
                Err(e) => {
                    tracing::warn!("Status query for {} failed, treating as stopped: {}", service.name, e);
                    false
                }
            };
            ServiceStatus { service: service.clone(), running }
        });

        let statuses = join_all(lookups).await;
        tracing::debug!(
            "Polled {} services, {} running",
            statuses.len(),
            statuses.iter().filter(|s| s.running).count()
        );
        StatusSnapshot::new(Utc::now(), statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::config::RuntimeConfig;
    use crate::testing::{descriptor, FakeRunner};

    fn poller(runner: Arc<FakeRunner>) -> StatusPoller {
        StatusPoller::new(
            DockerCli::new(runner, &RuntimeConfig::default()),
            vec![descriptor("midcap"), descriptor("lastcap")],
        )
    }

    #[tokio::test]
    async fn test_snapshot_covers_all_services() {
        let runner = Arc::new(FakeRunner::new(&["hll-geofences-midcap"]));
        let snapshot = poller(runner).poll().await;

        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.is_running("hll-geofences-midcap"), Some(true));
        assert_eq!(snapshot.is_running("hll-geofences-lastcap"), Some(false));
    }

    #[tokio::test]
    async fn test_failed_query_is_fail_closed() {
        let runner = Arc::new(FakeRunner::new(&["hll-geofences-midcap", "hll-geofences-lastcap"]));
        runner.daemon_down("hll-geofences-midcap");
        let snapshot = poller(runner).poll().await;

        assert_eq!(snapshot.is_running("hll-geofences-midcap"), Some(false));
        assert_eq!(snapshot.is_running("hll-geofences-lastcap"), Some(true));
    }

    #[tokio::test]
    async fn test_launch_failure_is_fail_closed() {
        let runner = Arc::new(FakeRunner::new(&["hll-geofences-midcap", "hll-geofences-lastcap"]));
        runner.unreachable("hll-geofences-lastcap");
        let snapshot = poller(runner).poll().await;

        assert_eq!(snapshot.is_running("hll-geofences-midcap"), Some(true));
        assert_eq!(snapshot.is_running("hll-geofences-lastcap"), Some(false));
    }
}
