use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use prism_config::HubConfig;
use prism_live::{
    AllowListOriginValidator, ClientHandle, DisconnectReason, HubError, LiveUpdateHub,
    OriginValidator, UpdateKind, UpdateMessage,
};

const WAIT: Duration = Duration::from_secs(5);

fn ip(last: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, last])
}

fn localhost_only() -> Arc<dyn OriginValidator> {
    Arc::new(AllowListOriginValidator::new(Vec::<String>::new(), true))
}

fn connect(hub: &LiveUpdateHub, from: IpAddr) -> ClientHandle {
    let admission = hub.admit(Some("http://localhost:3000"), from).unwrap();
    hub.connect(admission).unwrap()
}

async fn recv_message(client: &mut ClientHandle) -> UpdateMessage {
    let payload = tokio::time::timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("client queue closed");
    serde_json::from_str(payload.as_str()).unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_origin_checks() {
    let hub = LiveUpdateHub::start(HubConfig::default(), localhost_only());

    assert!(matches!(hub.admit(None, ip(1)), Err(HubError::MissingOrigin)));
    assert!(matches!(
        hub.admit(Some("https://evil.example"), ip(1)),
        Err(HubError::OriginNotAllowed(origin)) if origin == "https://evil.example"
    ));
    assert!(hub.admit(Some("http://localhost:5173"), ip(1)).is_ok());

    let stats = hub.stats();
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.accepted, 0);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_connection_caps() {
    let config = HubConfig {
        max_connections: 3,
        max_connections_per_ip: 2,
        ..HubConfig::default()
    };
    let hub = LiveUpdateHub::start(config, localhost_only());

    let _a = connect(&hub, ip(1));
    let _b = connect(&hub, ip(1));
    let err = hub.admit(Some("http://localhost"), ip(1)).unwrap_err();
    assert!(matches!(err, HubError::TooManyConnectionsFromIp { limit: 2, .. }));
    assert_eq!(err.status_code().as_u16(), 429);

    let _c = connect(&hub, ip(2));
    let err = hub.admit(Some("http://localhost"), ip(3)).unwrap_err();
    assert!(matches!(err, HubError::TooManyConnections { limit: 3 }));
    assert_eq!(err.status_code().as_u16(), 503);

    assert_eq!(hub.active_connections(), 3);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let hub = LiveUpdateHub::start(HubConfig::default(), localhost_only());
    let mut clients: Vec<_> = (1..=3).map(|n| connect(&hub, ip(n))).collect();

    hub.broadcast(&UpdateMessage::css_update("app.css")).await.unwrap();

    for client in &mut clients {
        let message = recv_message(client).await;
        assert_eq!(message.kind, UpdateKind::CssUpdate);
        assert_eq!(message.target.as_deref(), Some("app.css"));
    }

    eventually(|| hub.connected_clients().len() == 3).await;
    assert_eq!(hub.stats().broadcasts, 1);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_per_client_order_preserved() {
    let hub = LiveUpdateHub::start(HubConfig::default(), localhost_only());
    let mut client = connect(&hub, ip(1));

    for name in ["A", "B", "C", "D"] {
        hub.broadcast(&UpdateMessage::component_update(name, "")).await.unwrap();
    }

    let mut targets = Vec::new();
    for _ in 0..4 {
        targets.push(recv_message(&mut client).await.target.unwrap());
    }
    assert_eq!(targets, vec!["A", "B", "C", "D"]);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_slow_consumer_is_isolated() {
    let config = HubConfig {
        outbound_queue: 2,
        ..HubConfig::default()
    };
    let hub = LiveUpdateHub::start(config, localhost_only());
    let slow = connect(&hub, ip(1));
    let mut fast = connect(&hub, ip(2));

    for n in 0..10 {
        hub.broadcast(&UpdateMessage::component_update(format!("C{n}"), ""))
            .await
            .unwrap();
        // The fast client drains as it goes; the slow one never reads.
        let message = recv_message(&mut fast).await;
        assert_eq!(message.target, Some(format!("C{n}")));
    }

    assert_eq!(slow.control().reason(), Some(DisconnectReason::SlowConsumer));
    eventually(|| hub.connected_clients().len() == 1).await;
    assert_eq!(hub.connected_clients()[0].id, fast.id());
    assert_eq!(hub.stats().slow_consumer_disconnects, 1);
    // The departed client's slot is free again.
    assert_eq!(hub.active_connections(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_try_broadcast_reports_backlog() {
    let config = HubConfig {
        broadcast_buffer: 1,
        ..HubConfig::default()
    };
    let hub = LiveUpdateHub::start(config, localhost_only());
    let message = UpdateMessage::full_reload();

    // Fill faster than the coordinator can drain in this single-threaded runtime.
    let outcomes: Vec<_> = (0..5).map(|_| hub.try_broadcast(&message)).collect();
    assert!(outcomes[0].is_ok());
    assert!(
        outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(HubError::BroadcastBacklog)))
    );
    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_is_idempotent() {
    let hub = LiveUpdateHub::start(HubConfig::default(), localhost_only());
    let mut client = connect(&hub, ip(1));
    eventually(|| hub.connected_clients().len() == 1).await;

    tokio::time::timeout(WAIT, hub.shutdown()).await.unwrap();
    tokio::time::timeout(WAIT, hub.shutdown()).await.unwrap();

    assert!(hub.is_shutting_down());
    assert_eq!(client.control().reason(), Some(DisconnectReason::Shutdown));
    assert!(tokio::time::timeout(WAIT, client.recv()).await.unwrap().is_none());
    assert!(hub.connected_clients().is_empty());
    assert_eq!(hub.active_connections(), 0);

    assert!(matches!(
        hub.broadcast(&UpdateMessage::full_reload()).await,
        Err(HubError::ShuttingDown)
    ));
    assert!(matches!(
        hub.admit(Some("http://localhost"), ip(1)),
        Err(HubError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_shutdown_without_clients() {
    let hub = LiveUpdateHub::start(HubConfig::default(), localhost_only());
    tokio::time::timeout(WAIT, hub.shutdown()).await.unwrap();
    assert_eq!(hub.stats().accepted, 0);
}
