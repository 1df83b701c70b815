use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, EventMessage,
    EventMessageTypeEnum,
};
use chrono::{DateTime, TimeZone, Utc};
use dockwatch_core::{Entity, EntityDetail, EventKind, EventSubject, LifecycleEvent, Phase};
use std::collections::BTreeMap;
use tracing::warn;

/// Maps an engine state string plus optional exit code onto a phase.
pub fn phase_from_state(state: &str, exit_code: Option<i64>) -> Phase {
    match state.trim().to_ascii_lowercase().as_str() {
        "running" | "restarting" | "paused" => Phase::Running,
        "created" => Phase::Created,
        // exited, dead, removing
        _ => match exit_code {
            Some(code) if code != 0 => Phase::Errored,
            _ => Phase::Stopped,
        },
    }
}

fn state_label(status: ContainerStateStatusEnum) -> &'static str {
    match status {
        ContainerStateStatusEnum::CREATED => "created",
        ContainerStateStatusEnum::RUNNING => "running",
        ContainerStateStatusEnum::PAUSED => "paused",
        ContainerStateStatusEnum::RESTARTING => "restarting",
        ContainerStateStatusEnum::REMOVING => "removing",
        ContainerStateStatusEnum::EXITED => "exited",
        ContainerStateStatusEnum::DEAD => "dead",
        ContainerStateStatusEnum::EMPTY => "",
    }
}

/// Pulls the exit code out of a listing status such as `Exited (137) 5 minutes ago`.
pub fn exit_code_from_status(status: &str) -> Option<i64> {
    let rest = status.trim().strip_prefix("Exited (")?;
    let end = rest.find(')')?;
    rest[..end].trim().parse().ok()
}

pub fn display_name(raw: &str) -> String {
    raw.trim_start_matches('/').to_string()
}

pub fn entity_from_summary(summary: ContainerSummary) -> Option<Entity> {
    let id = summary.id?;
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|name| display_name(name))
        .unwrap_or_else(|| dockwatch_core::short_id(&id).to_string());
    let exit_code = summary.status.as_deref().and_then(exit_code_from_status);
    let phase = phase_from_state(summary.state.as_deref().unwrap_or_default(), exit_code);
    let created = summary
        .created
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);
    Some(Entity {
        id,
        name,
        phase,
        created,
        image: summary.image.unwrap_or_default(),
    })
}

pub fn detail_from_inspect(requested_id: &str, inspect: ContainerInspectResponse) -> EntityDetail {
    let state = inspect.state.unwrap_or_default();
    let exit_code = state.exit_code;
    let phase = if state.running.unwrap_or(false) {
        Phase::Running
    } else {
        phase_from_state(state.status.map(state_label).unwrap_or_default(), exit_code)
    };
    let created = match inspect.created.as_deref() {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(err) => {
                warn!(event = "docker_created_unparseable", raw = %raw, error = %err);
                Utc::now()
            }
        },
        None => Utc::now(),
    };
    EntityDetail {
        id: inspect.id.unwrap_or_else(|| requested_id.to_string()),
        name: inspect.name.as_deref().map(display_name).unwrap_or_default(),
        phase,
        image: inspect
            .config
            .and_then(|config| config.image)
            .unwrap_or_default(),
        created,
        exit_code,
    }
}

pub fn lifecycle_event(message: EventMessage) -> Option<LifecycleEvent> {
    let actor = message.actor?;
    let entity_id = actor.id?;
    let subject = match message.typ {
        Some(EventMessageTypeEnum::CONTAINER) => EventSubject::Entity,
        Some(other) => EventSubject::Other(format!("{other:?}").to_ascii_lowercase()),
        None => EventSubject::Other(String::new()),
    };
    let kind = EventKind::from(message.action.as_deref().unwrap_or_default());
    let attributes: BTreeMap<String, String> =
        actor.attributes.unwrap_or_default().into_iter().collect();
    let timestamp = message
        .time_nano
        .map(|nanos| Utc.timestamp_nanos(nanos))
        .or_else(|| message.time.and_then(|secs| DateTime::from_timestamp(secs, 0)))
        .unwrap_or_else(Utc::now);
    Some(LifecycleEvent {
        entity_id,
        subject,
        kind,
        attributes,
        timestamp,
    })
}

pub fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerConfig, ContainerState, EventActor};
    use std::collections::HashMap;

    #[test]
    fn phase_mapping_covers_engine_states() {
        assert_eq!(phase_from_state("running", None), Phase::Running);
        assert_eq!(phase_from_state("paused", None), Phase::Running);
        assert_eq!(phase_from_state("restarting", None), Phase::Running);
        assert_eq!(phase_from_state("created", None), Phase::Created);
        assert_eq!(phase_from_state("exited", Some(0)), Phase::Stopped);
        assert_eq!(phase_from_state("exited", Some(137)), Phase::Errored);
        assert_eq!(phase_from_state("dead", None), Phase::Stopped);
    }

    #[test]
    fn exit_code_is_read_from_listing_status() {
        assert_eq!(exit_code_from_status("Exited (137) 5 minutes ago"), Some(137));
        assert_eq!(exit_code_from_status("Exited (0) About an hour ago"), Some(0));
        assert_eq!(exit_code_from_status("Up 3 hours"), None);
    }

    #[test]
    fn summary_becomes_entity() {
        let entity = entity_from_summary(ContainerSummary {
            id: Some("0123456789abcdef0123".to_string()),
            names: Some(vec!["/web".to_string()]),
            image: Some("nginx:1.27".to_string()),
            state: Some("exited".to_string()),
            status: Some("Exited (1) 2 minutes ago".to_string()),
            created: Some(1_700_000_000),
            ..Default::default()
        })
        .expect("entity");
        assert_eq!(entity.name, "web");
        assert_eq!(entity.phase, Phase::Errored);
        assert_eq!(entity.short_id(), "0123456789ab");
        assert_eq!(entity.created.timestamp(), 1_700_000_000);

        assert!(entity_from_summary(ContainerSummary::default()).is_none());
    }

    #[test]
    fn inspect_becomes_detail() {
        let detail = detail_from_inspect(
            "abc",
            ContainerInspectResponse {
                id: Some("abc123".to_string()),
                name: Some("/db".to_string()),
                created: Some("2026-01-02T03:04:05.123456789Z".to_string()),
                state: Some(ContainerState {
                    status: Some(ContainerStateStatusEnum::EXITED),
                    running: Some(false),
                    exit_code: Some(2),
                    ..Default::default()
                }),
                config: Some(ContainerConfig {
                    image: Some("postgres:16".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        assert_eq!(detail.id, "abc123");
        assert_eq!(detail.name, "db");
        assert_eq!(detail.phase, Phase::Errored);
        assert_eq!(detail.exit_code, Some(2));
        assert_eq!(detail.image, "postgres:16");
        assert_eq!(
            dockwatch_core::render::format_time(&detail.created),
            "2026-01-02 03:04:05"
        );
    }

    #[test]
    fn unparseable_creation_time_falls_back_to_now() {
        let before = Utc::now();
        let detail = detail_from_inspect(
            "abc",
            ContainerInspectResponse {
                created: Some("yesterday".to_string()),
                ..Default::default()
            },
        );
        assert!(detail.created >= before);
        assert_eq!(detail.id, "abc");
    }

    #[test]
    fn container_events_map_to_entity_subject() {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), "api".to_string());
        attributes.insert("exitCode".to_string(), "1".to_string());
        let event = lifecycle_event(EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            action: Some("oom".to_string()),
            actor: Some(EventActor {
                id: Some("fedcba987654321".to_string()),
                attributes: Some(attributes),
            }),
            time: Some(1_700_000_000),
            ..Default::default()
        })
        .expect("event");
        assert_eq!(event.subject, EventSubject::Entity);
        assert_eq!(event.kind, EventKind::OomKill);
        assert_eq!(event.display_name(), "api");
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);

        let network = lifecycle_event(EventMessage {
            typ: Some(EventMessageTypeEnum::NETWORK),
            action: Some("connect".to_string()),
            actor: Some(EventActor {
                id: Some("net1".to_string()),
                attributes: None,
            }),
            ..Default::default()
        })
        .expect("event");
        assert_eq!(network.subject, EventSubject::Other("network".to_string()));
        assert_eq!(network.kind, EventKind::Other("connect".to_string()));
    }

    #[test]
    fn server_errors_expose_status_code() {
        let err = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert_eq!(status_code(&err), Some(404));
    }
}
