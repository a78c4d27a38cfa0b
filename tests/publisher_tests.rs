mod common;

use common::*;
use vtcbus::command::{STATUS_INVALID_COMMAND, STATUS_RECONFIGURING, STATUS_RESETTING};
use vtcbus::config::{ConfigKey, MemoryConfigStore};
use vtcbus::measurement::MeasurementRecord;
use vtcbus::publisher::*;
use vtcbus::status::StatusReport;

const DATA: &str = "vtc/north/press-1/Data";
const INFO: &str = "vtc/north/press-1/Info";
const COMMAND: &str = "vtc/north/dev-1";

fn store() -> MemoryConfigStore {
    MemoryConfigStore::new(test_document())
}

async fn connected_publisher(
    ctx: std::sync::Arc<vtcbus::SharedContext>,
    store: MemoryConfigStore,
) -> Publisher<ScriptedLink, vtcbus::ManualClock> {
    let mut publisher = test_publisher(ScriptedLink::new(), ctx, store);
    publisher.cycle().await;
    assert_eq!(publisher.state(), LinkState::Connected);
    // First connected cycle sends the connection status report
    publisher.cycle().await;
    publisher
}

#[tokio::test]
async fn test_connect_subscribes_and_announces() {
    let ctx = test_context(40);
    let mut publisher = test_publisher(ScriptedLink::new(), ctx.clone(), store());

    assert_eq!(publisher.state(), LinkState::Disconnected);
    assert!(publisher.cycle().await.is_none());

    assert_eq!(publisher.state(), LinkState::Connected);
    assert_eq!(publisher.link().subscriptions, vec![COMMAND.to_string()]);
    assert!(ctx.ping_requested());

    publisher.cycle().await;

    let info = publisher.link().published_on(INFO);
    assert_eq!(info.len(), 1);
    let report: StatusReport = serde_json::from_str(&info[0]).unwrap();
    assert_eq!(report.client_id, "dev-1");
    assert_eq!(report.voltage_threshold, "125.5");
    assert_eq!(report.version, env!("CARGO_PKG_VERSION"));
    assert!(!ctx.ping_requested());
}

#[tokio::test]
async fn test_records_accumulate_while_disconnected() {
    let ctx = test_context(40);
    let mut publisher = test_publisher(ScriptedLink::failing(2), ctx.clone(), store());

    {
        let mut delivery = ctx.delivery().lock().await;
        for i in 0..5 {
            delivery.push(record(i, 130.0));
        }
    }

    publisher.cycle().await;
    publisher.cycle().await;
    assert_eq!(publisher.state(), LinkState::Disconnected);
    assert_eq!(publisher.stats().connect_failures, 2);

    {
        let mut delivery = ctx.delivery().lock().await;
        for i in 5..8 {
            delivery.push(record(i, 130.0));
        }
    }
    assert_eq!(ctx.delivery().lock().await.count(), 8);

    publisher.cycle().await;
    assert_eq!(publisher.state(), LinkState::Connected);
    assert!(publisher.link().published_on(DATA).is_empty());

    publisher.cycle().await;

    let data = publisher.link().published_on(DATA);
    assert_eq!(data.len(), 8);
    let counters: Vec<u32> = data
        .iter()
        .map(|json| serde_json::from_str::<MeasurementRecord>(json).unwrap().timestamp.counter())
        .collect();
    assert_eq!(counters, (0..8).collect::<Vec<_>>());
    assert!(ctx.delivery().lock().await.is_empty());
    assert_eq!(publisher.link().connect_attempts, 3);
}

#[tokio::test]
async fn test_outage_longer_than_buffer_keeps_newest() {
    let ctx = test_context(4);
    let mut publisher = test_publisher(ScriptedLink::failing(1), ctx.clone(), store());

    publisher.cycle().await;
    {
        let mut delivery = ctx.delivery().lock().await;
        for i in 0..10 {
            delivery.push(record(i, 130.0));
        }
    }
    publisher.cycle().await;
    publisher.cycle().await;

    let counters: Vec<u32> = publisher
        .link()
        .published_on(DATA)
        .iter()
        .map(|json| serde_json::from_str::<MeasurementRecord>(json).unwrap().timestamp.counter())
        .collect();
    assert_eq!(counters, vec![6, 7, 8, 9]);
}

#[tokio::test]
async fn test_contended_buffer_skips_cycle() {
    let ctx = test_context(40);
    let mut publisher = connected_publisher(ctx.clone(), store()).await;
    ctx.delivery().lock().await.push(record(0, 130.0));

    {
        let _held = ctx.delivery().lock().await;
        assert!(publisher.cycle().await.is_none());
    }
    assert!(publisher.link().published_on(DATA).is_empty());
    assert_eq!(publisher.stats().contended_drains, 1);

    publisher.cycle().await;
    assert_eq!(publisher.link().published_on(DATA).len(), 1);
}

#[tokio::test]
async fn test_invalid_command_reports_once() {
    let ctx = test_context(40);
    let store = store();
    let mut publisher = connected_publisher(ctx.clone(), store.clone()).await;
    ctx.delivery().lock().await.push(record(0, 130.0));
    publisher.link_mut().queue_inbound(COMMAND, r#"{"CMD":"XYZ"}"#);

    assert!(publisher.cycle().await.is_none());

    let info = publisher.link().published_on(INFO);
    let invalid = info.iter().filter(|m| *m == STATUS_INVALID_COMMAND).count();
    assert_eq!(invalid, 1);
    assert_eq!(info.len(), 2); // connection report + error
    assert!(!ctx.ping_requested());
    assert_eq!(store.commits(), 0);
    assert_eq!(publisher.state(), LinkState::Connected);
}

#[tokio::test]
async fn test_ping_answered_on_next_cycle() {
    let ctx = test_context(40);
    let mut publisher = connected_publisher(ctx.clone(), store()).await;
    let before = publisher.link().published_on(INFO).len();

    publisher.link_mut().queue_inbound(COMMAND, r#"{"CMD":"PNG"}"#);
    publisher.cycle().await;
    assert!(ctx.ping_requested());
    assert_eq!(publisher.link().published_on(INFO).len(), before);

    publisher.cycle().await;

    let info = publisher.link().published_on(INFO);
    assert_eq!(info.len(), before + 1);
    assert!(serde_json::from_str::<StatusReport>(&info[before]).is_ok());
    assert!(!ctx.ping_requested());
}

#[tokio::test]
async fn test_reset_flushes_and_exits() {
    let ctx = test_context(40);
    let mut publisher = connected_publisher(ctx.clone(), store()).await;
    publisher.link_mut().queue_inbound(COMMAND, r#"{"CMD":"RST"}"#);

    assert_eq!(publisher.cycle().await, Some(DeviceExit::Restart));

    assert!(publisher.link().published_on(INFO).iter().any(|m| m == STATUS_RESETTING));
    assert!(publisher.link().flushed.is_some());
}

#[tokio::test]
async fn test_reconfigure_commits_then_exits() {
    let ctx = test_context(40);
    let store = store();
    let mut publisher = connected_publisher(ctx.clone(), store.clone()).await;
    publisher
        .link_mut()
        .queue_inbound(COMMAND, r#"{"CMD":"CNFG","CNFG":{"SITE":"south"}}"#);

    assert_eq!(publisher.cycle().await, Some(DeviceExit::Restart));

    assert!(publisher.link().published_on(INFO).iter().any(|m| m == STATUS_RECONFIGURING));
    assert_eq!(store.commits(), 1);
    assert_eq!(store.document().get(ConfigKey::Site), Some("south"));
}

#[tokio::test]
async fn test_run_returns_on_restart() {
    let ctx = test_context(40);
    let mut link = ScriptedLink::failing(1);
    link.queue_inbound(COMMAND, r#"{"CMD":"RST"}"#);
    let publisher = test_publisher(link, ctx, store());

    assert_eq!(publisher.run().await, DeviceExit::Restart);
}

#[tokio::test]
async fn test_dropped_connection_reconnects_and_pings() {
    let ctx = test_context(40);
    let mut publisher = connected_publisher(ctx.clone(), store()).await;

    publisher.link_mut().drop_connection();
    publisher.cycle().await;
    assert_eq!(publisher.state(), LinkState::Disconnected);

    // Records produced during the outage wait in the delivery buffer
    ctx.delivery().lock().await.push(record(3, 140.0));

    publisher.cycle().await;
    assert_eq!(publisher.state(), LinkState::Connected);
    assert_eq!(publisher.stats().connects, 2);
    assert!(ctx.ping_requested());

    publisher.cycle().await;
    assert_eq!(publisher.link().published_on(DATA).len(), 1);
    assert_eq!(publisher.link().published_on(INFO).len(), 2);
}

#[tokio::test]
async fn test_messages_on_other_topics_are_ignored() {
    let ctx = test_context(40);
    let store = store();
    let mut publisher = connected_publisher(ctx.clone(), store.clone()).await;
    publisher.link_mut().queue_inbound("vtc/north/other", r#"{"CMD":"RST"}"#);

    assert!(publisher.cycle().await.is_none());
    assert_eq!(publisher.stats().commands, 0);
}

#[test]
fn test_reconnect_delay_with_jitter() {
    let policy = ReconnectPolicy::new(std::time::Duration::from_secs(5), std::time::Duration::from_millis(250));
    for _ in 0..20 {
        let delay = policy.next_delay();
        assert!(delay >= std::time::Duration::from_secs(5));
        assert!(delay <= std::time::Duration::from_millis(5250));
    }
    assert_eq!(ReconnectPolicy::immediate().next_delay(), std::time::Duration::ZERO);
}
