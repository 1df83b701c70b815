//! Docker Engine adapter for the monitoring core.

pub mod convert;

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use dockwatch_core::runtime::{EventFeed, EventFeedSender, RuntimeClient};
use dockwatch_core::{short_id, Entity, EntityDetail, RuntimeError};
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT_SECS: u64 = 120;
const EVENT_BUFFER: usize = 64;
const NOT_MODIFIED: u16 = 304;
const NOT_FOUND: u16 = 404;

fn runtime_error(err: BollardError, id: &str) -> RuntimeError {
    match convert::status_code(&err) {
        Some(NOT_FOUND) => RuntimeError::NotFound(id.to_string()),
        _ => RuntimeError::Backend(err.to_string()),
    }
}

/// Starting a running or stopping a stopped container answers 304; the
/// entity is already where the operator wanted it.
fn accept_not_modified(result: Result<(), BollardError>, id: &str) -> Result<(), RuntimeError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if convert::status_code(&err) == Some(NOT_MODIFIED) => {
            debug!(event = "docker_not_modified", entity_id = %short_id(id));
            Ok(())
        }
        Err(err) => Err(runtime_error(err, id)),
    }
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to `host` (`unix://`, `tcp://` or `http://`), or to the local
    /// defaults when no host is given.
    pub fn connect(host: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match host.map(str::trim).filter(|host| !host.is_empty()) {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => {
                return Err(RuntimeError::Backend(format!(
                    "unsupported docker host: {host}"
                )))
            }
        }
        .map_err(|err| RuntimeError::Backend(err.to_string()))?;
        Ok(Self { docker })
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|err| RuntimeError::Backend(err.to_string()))
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn list_entities(&self, include_stopped: bool) -> Result<Vec<Entity>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: include_stopped,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|err| RuntimeError::Backend(err.to_string()))?;
        Ok(summaries
            .into_iter()
            .filter_map(convert::entity_from_summary)
            .collect())
    }

    async fn inspect_entity(&self, id: &str) -> Result<EntityDetail, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|err| runtime_error(err, id))?;
        Ok(convert::detail_from_inspect(id, inspect))
    }

    async fn fetch_recent_log(&self, id: &str, tail_lines: usize) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            timestamps: false,
            tail: tail_lines.to_string(),
            ..Default::default()
        };
        let mut frames = self.docker.logs(id, Some(options));
        let mut raw = Vec::new();
        while let Some(frame) = frames.next().await {
            match frame.map_err(|err| runtime_error(err, id))? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message }
                | LogOutput::StdIn { message } => raw.extend_from_slice(&message),
            }
        }
        Ok(raw)
    }

    async fn start_entity(&self, id: &str) -> Result<(), RuntimeError> {
        let result = self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await;
        accept_not_modified(result, id)
    }

    async fn stop_entity(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        let result = self.docker.stop_container(id, Some(options)).await;
        accept_not_modified(result, id)
    }

    async fn restart_entity(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let options = RestartContainerOptions {
            t: timeout.as_secs() as isize,
        };
        self.docker
            .restart_container(id, Some(options))
            .await
            .map_err(|err| runtime_error(err, id))
    }

    async fn subscribe_events(&self) -> EventFeed {
        let (sender, feed) = EventFeed::channel(EVENT_BUFFER);
        tokio::spawn(pump_events(self.docker.clone(), sender));
        feed
    }
}

/// Forwards engine events until the stream ends or the subscriber goes away.
async fn pump_events(docker: Docker, sender: EventFeedSender) {
    info!(event = "docker_event_stream_open");
    let mut stream = docker.events(Some(EventsOptions::<String>::default()));
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                let Some(event) = convert::lifecycle_event(message) else {
                    continue;
                };
                if sender.events.send(event).await.is_err() {
                    debug!(event = "docker_event_subscriber_gone");
                    return;
                }
            }
            Err(err) => {
                warn!(event = "docker_event_stream_error", error = %err);
                if sender
                    .errors
                    .send(RuntimeError::Stream(err.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
    info!(event = "docker_event_stream_closed");
}
