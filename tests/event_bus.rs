use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use skeinrun::event_bus::{EventBus, EventType, MemoryHandler, RuntimeEvent};

#[tokio::test]
async fn wait_for_times_out_with_none_not_an_error() {
    let bus = EventBus::new(64);

    let started = Instant::now();
    let seen = bus
        .wait_for(
            &EventType::NodeCompleted,
            None,
            Some(Duration::from_millis(100)),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(seen.is_none());
    assert!(elapsed >= Duration::from_millis(90), "waited out the timeout");
    assert!(elapsed < Duration::from_secs(2), "returned promptly");
}

#[tokio::test]
async fn publish_returns_only_after_handlers_ran() {
    let bus = EventBus::new(64);
    let memory = Arc::new(MemoryHandler::new());
    bus.subscribe(
        vec![EventType::NodeCompleted, EventType::NodeError],
        memory.clone(),
        None,
    );

    bus.publish(RuntimeEvent::new(EventType::NodeCompleted).with_data("k", json!(1)))
        .await;

    // No sleeps: publish's return is the ordering guarantee.
    let snapshot = memory.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].data.get("k"), Some(&json!(1)));
}

#[tokio::test]
async fn handlers_only_see_matching_types() {
    let bus = EventBus::new(64);
    let memory = Arc::new(MemoryHandler::new());
    bus.subscribe(vec![EventType::NodeError], memory.clone(), None);

    bus.publish(RuntimeEvent::new(EventType::NodeCompleted)).await;
    bus.publish(RuntimeEvent::new(EventType::NodeError)).await;

    let snapshot = memory.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_type, EventType::NodeError);
}

#[tokio::test]
async fn stream_filter_restricts_delivery() {
    let bus = EventBus::new(64);
    let memory = Arc::new(MemoryHandler::new());
    bus.subscribe(
        vec![EventType::NodeCompleted],
        memory.clone(),
        Some("intake".to_string()),
    );

    bus.publish(RuntimeEvent::new(EventType::NodeCompleted).with_stream("other"))
        .await;
    bus.publish(RuntimeEvent::new(EventType::NodeCompleted).with_stream("intake"))
        .await;

    let snapshot = memory.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].stream_id.as_deref(), Some("intake"));
}

#[tokio::test]
async fn wait_for_observes_a_matching_publish() {
    let bus = Arc::new(EventBus::new(64));

    let waiter = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.wait_for(
                &EventType::ExecutionCompleted,
                Some("intake"),
                Some(Duration::from_secs(5)),
            )
            .await
        })
    };
    // Give the waiter a beat to subscribe before publishing.
    tokio::time::sleep(Duration::from_millis(10)).await;

    bus.publish(RuntimeEvent::new(EventType::ExecutionCompleted).with_stream("other"))
        .await;
    bus.publish(
        RuntimeEvent::new(EventType::ExecutionCompleted)
            .with_stream("intake")
            .with_data("success", json!(true)),
    )
    .await;

    let seen = waiter.await.unwrap().expect("matching event arrives");
    assert_eq!(seen.stream_id.as_deref(), Some("intake"));
    assert_eq!(seen.data.get("success"), Some(&json!(true)));
}

#[tokio::test]
async fn custom_events_round_trip_by_name() {
    let bus = EventBus::new(64);
    let memory = Arc::new(MemoryHandler::new());
    bus.subscribe(
        vec![EventType::Custom("audit".to_string())],
        memory.clone(),
        None,
    );

    bus.publish(RuntimeEvent::custom("audit")).await;
    bus.publish(RuntimeEvent::custom("unrelated")).await;

    assert_eq!(memory.snapshot().len(), 1);
}
