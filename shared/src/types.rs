use std::fmt;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::protocol::{
    control_id, COLOR_ANY_RUNNING, COLOR_ALL_STOPPED, STATUS_RUNNING, STATUS_STOPPED,
};

/// A controlled worker container.
/// Built once from configuration; the set never changes while the daemon runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Operator-facing short label, e.g. "midcap"
    pub label: String,

    /// Container name as known to the runtime, e.g. "hll-geofences-midcap"
    pub name: String,

    /// How far back a log fetch reaches
    pub log_window: Duration,
}

/// Lifecycle action an operator can request for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of one service at poll time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: ServiceDescriptor,
    pub running: bool,
}

/// Point-in-time running/stopped reading covering every tracked service,
/// in configuration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub captured_at: DateTime<Utc>,
    pub services: Vec<ServiceStatus>,
}

impl StatusSnapshot {
    pub fn new(captured_at: DateTime<Utc>, services: Vec<ServiceStatus>) -> Self {
        Self { captured_at, services }
    }

    /// Snapshot used before the first poll completes: everything reads as stopped.
    pub fn unknown(services: &[ServiceDescriptor]) -> Self {
        Self::new(
            Utc::now(),
            services
                .iter()
                .map(|service| ServiceStatus { service: service.clone(), running: false })
                .collect(),
        )
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.services
            .iter()
            .find(|s| s.service.name == name)
            .map(|s| s.running)
    }

    pub fn any_running(&self) -> bool {
        self.services.iter().any(|s| s.running)
    }

    pub fn running(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter().filter(|s| s.running).map(|s| &s.service)
    }
}

/// A single button in the published view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlView {
    pub custom_id: String,
    pub label: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceView {
    pub label: String,
    pub name: String,
    pub running: bool,
    pub status_text: &'static str,
    pub start: ControlView,
    pub stop: ControlView,
}

/// What operators see: status fields plus controls, derived purely from a
/// snapshot. Start is enabled iff the service is stopped, stop iff running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewState {
    pub server_name: String,
    pub captured_at: DateTime<Utc>,
    pub any_running: bool,
    pub services: Vec<ServiceView>,
}

impl ViewState {
    pub fn render(snapshot: &StatusSnapshot, server_name: &str, location: &str) -> Self {
        let services = snapshot
            .services
            .iter()
            .map(|status| {
                let label = &status.service.label;
                let upper = label.to_uppercase();
                ServiceView {
                    label: label.clone(),
                    name: status.service.name.clone(),
                    running: status.running,
                    status_text: if status.running { STATUS_RUNNING } else { STATUS_STOPPED },
                    start: ControlView {
                        custom_id: control_id(ServiceAction::Start, label, location),
                        label: format!("START {}", upper),
                        enabled: !status.running,
                    },
                    stop: ControlView {
                        custom_id: control_id(ServiceAction::Stop, label, location),
                        label: format!("STOP {}", upper),
                        enabled: status.running,
                    },
                }
            })
            .collect();

        Self {
            server_name: server_name.to_string(),
            captured_at: snapshot.captured_at,
            any_running: snapshot.any_running(),
            services,
        }
    }

    pub fn color(&self) -> u32 {
        if self.any_running {
            COLOR_ANY_RUNNING
        } else {
            COLOR_ALL_STOPPED
        }
    }
}
