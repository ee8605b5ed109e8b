//! In-memory stand-ins for docker and the chat platform.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use shared::protocol::LOG_WINDOW_SECS;
use shared::types::{ServiceDescriptor, ViewState};
use crate::config::DiscordConfig;
use crate::discord::client::DiscordClient;
use crate::logs::relay::LogSink;
use crate::runner::{CommandOutput, ExecutionError, Invocation, ProcessRunner};
use crate::view::{CommandReply, ViewPublisher};

pub fn descriptor(label: &str) -> ServiceDescriptor {
    ServiceDescriptor {
        label: label.to_string(),
        name: format!("hll-geofences-{}", label),
        log_window: Duration::from_secs(LOG_WINDOW_SECS),
    }
}

/// Fixed key pair standing in for the application's interaction key
pub fn signing_key() -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&[7u8; 32])
}

pub fn discord_config() -> DiscordConfig {
    DiscordConfig {
        token: "token".into(),
        application_id: "1".into(),
        public_key: hex::encode(signing_key().verifying_key().to_bytes()),
        channel_id: "2".into(),
        channel_id_2: None,
    }
}

pub fn test_client() -> DiscordClient {
    DiscordClient::new(&discord_config()).unwrap()
}

/// Serve `app` on a loopback port and return its base URL.
pub async fn mock_discord(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Shared ordered record of side effects across fakes
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct DockerState {
    running: HashSet<String>,
    logs: HashMap<String, String>,
    /// status queries answer with a daemon error
    daemon_down: HashSet<String>,
    /// every command naming the container fails to launch
    unreachable: HashSet<String>,
    /// lifecycle commands exit non-zero with this stderr
    rejected: HashMap<String, String>,
}

/// Simulates `docker ps`, `docker compose start|stop` and `docker logs`
/// against an in-memory set of running containers.
pub struct FakeRunner {
    state: Mutex<DockerState>,
    journal: Journal,
}

impl FakeRunner {
    pub fn new(running: &[&str]) -> Self {
        let state = DockerState {
            running: running.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Self { state: Mutex::new(state), journal: Journal::default() }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn set_logs(&self, name: &str, text: &str) {
        self.state.lock().unwrap().logs.insert(name.to_string(), text.to_string());
    }

    pub fn daemon_down(&self, name: &str) {
        self.state.lock().unwrap().daemon_down.insert(name.to_string());
    }

    pub fn unreachable(&self, name: &str) {
        self.state.lock().unwrap().unreachable.insert(name.to_string());
    }

    pub fn reject_lifecycle(&self, name: &str, stderr: &str) {
        self.state.lock().unwrap().rejected.insert(name.to_string(), stderr.to_string());
    }

    pub fn lifecycle_calls(&self, action: &str, name: &str) -> usize {
        let wanted = format!("compose {} {}", action, name);
        self.journal.entries().iter().filter(|e| **e == wanted).count()
    }

    fn ok(stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(0),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecutionError> {
        // let concurrent callers interleave the way real subprocesses would
        tokio::task::yield_now().await;

        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        let name = match args.as_slice() {
            ["ps", "-q", "--filter", filter] => filter
                .trim_start_matches("name=^")
                .trim_end_matches('$')
                .to_string(),
            ["compose", "-p", _, _, name] | ["logs", "--since", _, name] => name.to_string(),
            other => panic!("unexpected docker invocation: {:?}", other),
        };

        if self.state.lock().unwrap().unreachable.contains(&name) {
            return Err(ExecutionError::Spawn {
                command: invocation.to_string(),
                error: std::io::Error::new(std::io::ErrorKind::NotFound, "docker: not found"),
            });
        }

        let mut state = self.state.lock().unwrap();
        match args.as_slice() {
            ["ps", ..] => {
                self.journal.push(format!("ps {}", name));
                if state.daemon_down.contains(&name) {
                    return Ok(CommandOutput {
                        stdout: String::new(),
                        stderr: "Cannot connect to the Docker daemon".to_string(),
                        exit_code: Some(1),
                    });
                }
                let id = if state.running.contains(&name) { "3f2a9c1d0b7e\n" } else { "" };
                Ok(Self::ok(id, ""))
            }
            ["compose", "-p", _, action, _] => {
                self.journal.push(format!("compose {} {}", action, name));
                if let Some(stderr) = state.rejected.get(&name) {
                    return Ok(CommandOutput {
                        stdout: String::new(),
                        stderr: stderr.clone(),
                        exit_code: Some(1),
                    });
                }
                let verb = match *action {
                    "start" => {
                        state.running.insert(name.clone());
                        "Started"
                    }
                    _ => {
                        state.running.remove(&name);
                        "Stopped"
                    }
                };
                Ok(Self::ok("", &format!(" Container {}  {}\n", name, verb)))
            }
            _ => {
                self.journal.push(format!("logs {}", name));
                let text = state.logs.get(&name).cloned().unwrap_or_default();
                Ok(Self::ok(&text, ""))
            }
        }
    }
}

/// Keeps every published view
pub struct RecordingPublisher {
    journal: Journal,
    views: Mutex<Vec<ViewState>>,
    fail_next: AtomicBool,
}

impl RecordingPublisher {
    pub fn new(journal: Journal) -> Self {
        Self { journal, views: Mutex::new(Vec::new()), fail_next: AtomicBool::new(false) }
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn last_view(&self) -> Option<ViewState> {
        self.views.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ViewPublisher for RecordingPublisher {
    async fn publish(&self, view: &ViewState) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("channel unavailable");
        }
        self.journal.push("publish");
        self.views.lock().unwrap().push(view.clone());
        Ok(())
    }
}

/// Keeps every forwarded excerpt as (container name, text)
pub struct RecordingSink {
    journal: Journal,
    forwarded: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new(journal: Journal) -> Self {
        Self { journal, forwarded: Mutex::new(Vec::new()) }
    }

    pub fn forwarded(&self) -> Vec<(String, String)> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn forward(&self, service: &ServiceDescriptor, text: &str) -> Result<()> {
        self.journal.push(format!("relay {}", service.name));
        self.forwarded
            .lock()
            .unwrap()
            .push((service.name.clone(), text.to_string()));
        Ok(())
    }
}

pub struct RecordingReply {
    journal: Journal,
    acknowledged: AtomicBool,
    fail_ack: bool,
    content: Mutex<Option<String>>,
}

impl RecordingReply {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            acknowledged: AtomicBool::new(false),
            fail_ack: false,
            content: Mutex::new(None),
        }
    }

    pub fn failing_ack(mut self) -> Self {
        self.fail_ack = true;
        self
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    pub fn content(&self) -> Option<String> {
        self.content.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandReply for RecordingReply {
    async fn acknowledge(&self) -> Result<()> {
        if self.fail_ack {
            anyhow::bail!("interaction expired");
        }
        self.journal.push("ack");
        self.acknowledged.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn finish(&self, content: &str) -> Result<()> {
        self.journal.push("finish");
        *self.content.lock().unwrap() = Some(content.to_string());
        Ok(())
    }

    fn origin(&self) -> &str {
        "test"
    }
}
