use std::path::PathBuf;
use std::sync::Arc;
use shared::protocol::NO_LOGS;
use shared::types::{ServiceAction, ServiceDescriptor};
use crate::config::RuntimeConfig;
use crate::runner::{CommandOutput, ExecutionError, Invocation, ProcessRunner};

/// The four command shapes the daemon sends to the container runtime.
/// Exit codes are advisory; callers act on the text.
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn ProcessRunner>,
    bin: String,
    project_dir: PathBuf,
    project_name: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &RuntimeConfig) -> Self {
        Self {
            runner,
            bin: config.docker_bin.clone(),
            project_dir: config.project_dir.clone(),
            project_name: config.project_name.clone(),
        }
    }

    fn status_query(&self, service: &ServiceDescriptor) -> Invocation {
        // anchored so "midcap" never matches "midcap-old"
        Invocation::new(&self.bin)
            .arg("ps")
            .arg("-q")
            .arg("--filter")
            .arg(format!("name=^{}$", service.name))
    }

    fn lifecycle(&self, service: &ServiceDescriptor, action: ServiceAction) -> Invocation {
        Invocation::new(&self.bin)
            .arg("compose")
            .arg("-p")
            .arg(&self.project_name)
            .arg(action.as_str())
            .arg(&service.name)
            .current_dir(&self.project_dir)
    }

    fn log_fetch(&self, service: &ServiceDescriptor) -> Invocation {
        Invocation::new(&self.bin)
            .arg("logs")
            .arg("--since")
            .arg(format!("{}s", service.log_window.as_secs()))
            .arg(&service.name)
    }

    /// True when a container with exactly this name is up.
    pub async fn is_running(&self, service: &ServiceDescriptor) -> Result<bool, ExecutionError> {
        let invocation = self.status_query(service);
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(ExecutionError::Failed {
                command: invocation.to_string(),
                cause: output.text().to_string(),
            });
        }
        Ok(!output.stdout.trim().is_empty())
    }

    /// `start` ensures running and `stop` ensures stopped; both are safe to
    /// repeat.
    pub async fn apply(
        &self,
        service: &ServiceDescriptor,
        action: ServiceAction,
    ) -> Result<CommandOutput, ExecutionError> {
        self.runner.run(&self.lifecycle(service, action)).await
    }

    /// Log lines emitted within the service's window. Returns the no-logs
    /// sentinel when the window is empty.
    pub async fn logs_since(&self, service: &ServiceDescriptor) -> Result<String, ExecutionError> {
        let invocation = self.log_fetch(service);
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(ExecutionError::Failed {
                command: invocation.to_string(),
                cause: output.text().to_string(),
            });
        }

        // containers write to both streams; docker replays them separately
        let text = match (output.stdout.trim_end(), output.stderr.trim_end()) {
            ("", "") => NO_LOGS.to_string(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        };
        Ok(text)
    }
}
