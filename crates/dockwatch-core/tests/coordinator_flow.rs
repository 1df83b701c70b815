use chrono::Utc;
use dockwatch_core::memory::{Delivery, MemoryRuntime, RecordingNotifier, RuntimeCall};
use dockwatch_core::{
    Coordinator, Entity, EventKind, EventSubject, InboundUpdate, LifecycleEvent, MonitorConfig,
    Phase,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const OPERATOR: i64 = 4242;

fn fleet(count: usize) -> Vec<Entity> {
    (0..count)
        .map(|idx| Entity {
            id: format!("{:012x}0123456789", idx + 0xabc),
            name: format!("worker-{idx}"),
            phase: Phase::Running,
            created: Utc::now(),
            image: "worker:1.2".to_string(),
        })
        .collect()
}

fn lifecycle(id: &str, name: &str, kind: &str) -> LifecycleEvent {
    let mut attributes = BTreeMap::new();
    attributes.insert("name".to_string(), name.to_string());
    LifecycleEvent {
        entity_id: id.to_string(),
        subject: EventSubject::Entity,
        kind: EventKind::from(kind),
        attributes,
        timestamp: Utc::now(),
    }
}

fn command(name: &str) -> InboundUpdate {
    InboundUpdate::Command {
        chat_id: OPERATOR,
        name: name.to_string(),
    }
}

fn callback(message_id: i64, data: &str) -> InboundUpdate {
    InboundUpdate::Callback {
        chat_id: OPERATOR,
        message_id,
        interaction_id: format!("cb-{data}"),
        data: data.to_string(),
    }
}

struct Harness {
    runtime: Arc<MemoryRuntime>,
    notifier: Arc<RecordingNotifier>,
    updates: mpsc::Sender<InboundUpdate>,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(runtime: Arc<MemoryRuntime>) -> Self {
        let notifier = Arc::new(RecordingNotifier::new());
        let coordinator = Coordinator::new(
            runtime.clone(),
            notifier.clone(),
            MonitorConfig::for_chat(OPERATOR),
        );
        let (updates, updates_rx) = mpsc::channel(16);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { coordinator.run(updates_rx, shutdown_rx).await });
        Self {
            runtime,
            notifier,
            updates,
            shutdown,
            task,
        }
    }

    async fn send(&self, update: InboundUpdate) {
        self.updates.send(update).await.expect("dispatcher alive");
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("signal shutdown");
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("coordinator stops promptly")
            .expect("coordinator task");
    }
}

#[tokio::test(start_paused = true)]
async fn die_event_is_reported_without_waiting_for_log_scans() {
    let runtime = Arc::new(MemoryRuntime::with_entities(fleet(1)));
    let feed = runtime.script_feed();
    let harness = Harness::start(runtime);

    feed.events
        .send(lifecycle("abc123456789deadbeef", "api", "die"))
        .await
        .expect("send event");
    assert!(harness.notifier.wait_for(1, Duration::from_secs(1)).await);

    let text = harness.notifier.sent_texts().remove(0);
    assert!(text.contains("abc123456789"));
    assert!(text.contains("Status: die"));
    assert!(!harness
        .runtime
        .calls()
        .iter()
        .any(|call| matches!(call, RuntimeCall::FetchLog { .. })));
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn log_errors_are_reported_once_per_new_line() {
    let entities = fleet(2);
    let runtime = Arc::new(MemoryRuntime::with_entities(entities.clone()));
    runtime.set_log(&entities[0].id, "boot\nERROR failed to bind\n");
    runtime.set_log(&entities[1].id, "all quiet\n");
    let harness = Harness::start(runtime.clone());

    assert!(harness.notifier.wait_for(1, Duration::from_secs(61)).await);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.notifier.sent_texts().len(), 1, "unchanged logs stay quiet");

    runtime.append_log(&entities[1].id, "error: queue overflow\n");
    assert!(harness.notifier.wait_for(2, Duration::from_secs(61)).await);
    let texts = harness.notifier.sent_texts();
    assert!(texts[0].contains("failed to bind"));
    assert!(texts[1].contains("<u>worker-1</u>"));
    assert!(texts[1].contains("queue overflow"));
    harness.stop().await;
}

#[tokio::test]
async fn operator_walks_list_detail_and_stop() {
    let entities = fleet(13);
    let runtime = Arc::new(MemoryRuntime::with_entities(entities.clone()));
    let harness = Harness::start(runtime.clone());
    let target = &entities[9];

    harness.send(command("list")).await;
    assert!(harness.notifier.wait_for(1, Duration::from_secs(2)).await);
    harness.send(callback(1, "page:next")).await;
    harness
        .send(callback(1, &format!("sel:{}", target.short_id())))
        .await;
    harness
        .send(callback(1, &format!("act:stop:{}", target.short_id())))
        .await;
    // list + 3 acknowledgements + 3 edits
    assert!(harness.notifier.wait_for(7, Duration::from_secs(2)).await);

    let stops: Vec<RuntimeCall> = runtime
        .calls()
        .into_iter()
        .filter(|call| matches!(call, RuntimeCall::Stop { .. }))
        .collect();
    assert_eq!(
        stops,
        vec![RuntimeCall::Stop {
            id: target.id.clone(),
            timeout: Duration::from_secs(10),
        }]
    );
    let last = harness.notifier.last().expect("detail view");
    assert!(matches!(last, Delivery::Edited { message_id: 1, .. }));
    assert!(last.text().expect("text").contains("Name: worker-9"));
    harness.stop().await;
}

#[tokio::test]
async fn updates_from_other_chats_are_ignored() {
    let runtime = Arc::new(MemoryRuntime::with_entities(fleet(3)));
    let harness = Harness::start(runtime.clone());

    harness
        .send(InboundUpdate::Command {
            chat_id: OPERATOR + 1,
            name: "list".to_string(),
        })
        .await;
    harness.send(command("status")).await;
    assert!(harness.notifier.wait_for(1, Duration::from_secs(2)).await);

    let deliveries = harness.notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(matches!(
        &deliveries[0],
        Delivery::Sent { chat_id: OPERATOR, .. }
    ));
    assert!(deliveries[0].text().expect("status").contains("Containers Status"));
    harness.stop().await;
}

#[tokio::test]
async fn button_presses_from_other_chats_are_acknowledged_then_dropped() {
    let runtime = Arc::new(MemoryRuntime::with_entities(fleet(3)));
    let harness = Harness::start(runtime.clone());

    harness
        .send(InboundUpdate::Callback {
            chat_id: OPERATOR + 7,
            message_id: 55,
            interaction_id: "cb-stranger".to_string(),
            data: "page:next".to_string(),
        })
        .await;
    assert!(harness.notifier.wait_for(1, Duration::from_secs(2)).await);

    assert_eq!(
        harness.notifier.deliveries(),
        vec![Delivery::Acknowledged {
            interaction_id: "cb-stranger".to_string(),
            text: String::new(),
        }]
    );
    assert!(!runtime
        .calls()
        .iter()
        .any(|call| matches!(call, RuntimeCall::List { .. })));
    harness.stop().await;
}
