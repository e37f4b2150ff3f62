mod common;

use std::time::Duration;

use bytes::Bytes;
use lib_channel::error::{ChannelError, ValidationError};
use lib_channel::{ChannelEvent, ChannelState, FallbackPolicy};

use common::*;

fn preferred(index: i32, interval: u64) -> FallbackPolicy {
    FallbackPolicy {
        enabled: true,
        connection_list_index: index,
        detection_interval: interval,
        detection_schedule: String::new(),
    }
}

fn is_fallback_complete(event: &ChannelEvent) -> bool {
    matches!(event, ChannelEvent::FallbackComplete { .. })
}

#[tokio::test(start_paused = true)]
async fn interval_detection_returns_to_preferred_without_going_down() {
    let network = MockNetwork::new(&[SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(0, 30)),
    );

    let startup = until_ready(&mut events).await;
    assert!(matches!(
        &startup[0],
        ChannelEvent::ChannelDownReconnecting { endpoint: next, .. } if next.port == SECONDARY
    ));
    assert_eq!(
        startup.last(),
        Some(&ChannelEvent::ChannelReady {
            endpoint: endpoint(SECONDARY)
        })
    );

    network.set_reachable(PRIMARY, true);
    let fallback = events_until(&mut events, is_fallback_complete).await;
    assert_eq!(
        fallback,
        vec![
            ChannelEvent::FallbackStarting {
                from: endpoint(SECONDARY),
                to: endpoint(PRIMARY),
            },
            ChannelEvent::FallbackComplete {
                endpoint: endpoint(PRIMARY)
            },
        ]
    );

    assert_eq!(channel.state(), ChannelState::Ready);
    let info = channel.info().await.unwrap();
    assert_eq!(info.current_index, 0);
    assert!(!info.fallback_in_progress);
    assert_eq!(
        info.transport.map(|t| t.endpoint),
        Some(endpoint(PRIMARY))
    );
    assert!(network.last_transport(SECONDARY).is_closed());
    assert!(!network.last_transport(PRIMARY).is_closed());

    channel.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn interval_detection_on_preferred_reports_not_performed() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(0, 30)),
    );
    until_ready(&mut events).await;

    for _ in 0..2 {
        assert_eq!(
            next_event(&mut events).await,
            ChannelEvent::FallbackNotPerformed {
                endpoint: endpoint(PRIMARY)
            }
        );
    }
    assert_eq!(network.connects(), vec![PRIMARY]);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn manual_fallback_on_preferred_only_reports_not_performed() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(0, 0)),
    );
    until_ready(&mut events).await;

    channel.fallback_to_preferred_host().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::FallbackNotPerformed {
            endpoint: endpoint(PRIMARY)
        }
    );

    channel.close().await.unwrap();
    assert!(events.recv().await.is_none());
    assert_eq!(network.connects(), vec![PRIMARY]);
}

#[tokio::test]
async fn manual_fallback_is_invalid_when_preferred_host_is_disabled() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let (channel, mut events) = start(&network, config(&[PRIMARY, SECONDARY]));
    until_ready(&mut events).await;

    let err = channel.fallback_to_preferred_host().await.unwrap_err();
    assert!(matches!(err, ChannelError::InvalidUsage(_)));
    channel.close().await.unwrap();
}

#[tokio::test]
async fn manual_fallback_moves_traffic_to_the_preferred_endpoint() {
    let network = MockNetwork::new(&[SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(0, 0)),
    );
    until_ready(&mut events).await;

    network.set_reachable(PRIMARY, true);
    channel.fallback_to_preferred_host().await.unwrap();
    let fallback = events_until(&mut events, is_fallback_complete).await;
    assert_eq!(fallback.len(), 2);
    assert_eq!(
        fallback[1],
        ChannelEvent::FallbackComplete {
            endpoint: endpoint(PRIMARY)
        }
    );

    channel.submit(Bytes::from_static(b"ping")).unwrap();
    assert_eq!(
        network.last_transport(PRIMARY).sent(),
        vec![Bytes::from_static(b"ping")]
    );
    assert!(network.last_transport(SECONDARY).sent().is_empty());
    channel.close().await.unwrap();
}

#[tokio::test]
async fn failed_fallback_leaves_the_live_connection_alone() {
    let network = MockNetwork::new(&[SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(0, 0)),
    );
    until_ready(&mut events).await;
    let live = network.last_transport(SECONDARY);

    channel.fallback_to_preferred_host().await.unwrap();
    let fallback = events_until(&mut events, is_fallback_complete).await;
    assert!(matches!(fallback[0], ChannelEvent::FallbackStarting { .. }));
    assert!(matches!(fallback[1], ChannelEvent::Warning { .. }));
    assert_eq!(
        fallback[2],
        ChannelEvent::FallbackComplete {
            endpoint: endpoint(SECONDARY)
        }
    );
    assert_eq!(fallback.len(), 3);

    assert_eq!(channel.state(), ChannelState::Ready);
    assert!(!live.is_closed());
    channel.submit(Bytes::from_static(b"still here")).unwrap();
    assert_eq!(live.sent().len(), 1);

    let info = channel.info().await.unwrap();
    assert_eq!(info.current_index, 1);
    assert_eq!(info.reconnect_attempts, 0);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn invalid_policy_update_is_rejected_without_changes() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(1, 0)),
    );
    until_ready(&mut events).await;

    let negative = channel.apply_policy(preferred(-2, 0)).unwrap_err();
    assert_eq!(
        negative,
        ChannelError::Validation(ValidationError::NegativePreferredIndex(-2))
    );

    let too_big = channel.apply_policy(preferred(5, 0)).unwrap_err();
    assert_eq!(
        too_big,
        ChannelError::Validation(ValidationError::PreferredIndexOutOfRange { index: 5, len: 2 })
    );
    assert_ne!(negative.to_string(), too_big.to_string());

    let mut bad_schedule = preferred(0, 0);
    bad_schedule.detection_schedule = "every minute".to_string();
    assert!(matches!(
        channel.apply_policy(bad_schedule),
        Err(ChannelError::Validation(ValidationError::InvalidSchedule { .. }))
    ));

    let info = channel.info().await.unwrap();
    assert!(info.preferred_host.enabled);
    assert_eq!(info.preferred_host.connection_list_index, 1);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn policy_update_during_fallback_applies_after_it_completes() {
    let network = MockNetwork::new(&[SECONDARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(preferred(0, 0)),
    );
    until_ready(&mut events).await;

    network.set_reachable(PRIMARY, true);
    network.hold(PRIMARY);
    channel.fallback_to_preferred_host().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::FallbackStarting { .. }
    ));

    channel.apply_policy(preferred(1, 0)).unwrap();
    let during = channel.info().await.unwrap();
    assert!(during.fallback_in_progress);
    assert_eq!(during.preferred_host.connection_list_index, 0);
    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(
        during.transport.map(|t| t.endpoint),
        Some(endpoint(SECONDARY))
    );

    network.release(PRIMARY);
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::FallbackComplete {
            endpoint: endpoint(PRIMARY)
        }
    );

    let after = channel.info().await.unwrap();
    assert!(!after.fallback_in_progress);
    assert_eq!(after.preferred_host.connection_list_index, 1);
    assert_eq!(after.current_index, 0);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn live_loss_during_fallback_rolls_back_then_recovers() {
    let network = MockNetwork::new(&[SECONDARY, TERTIARY]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY, TERTIARY]).with_preferred_host(preferred(0, 0)),
    );
    until_ready(&mut events).await;

    network.set_reachable(PRIMARY, true);
    network.hold(PRIMARY);
    channel.fallback_to_preferred_host().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::FallbackStarting { .. }
    ));

    network.last_transport(SECONDARY).drop_connection();
    let rollback = events_until(&mut events, |e| {
        matches!(e, ChannelEvent::ChannelDownReconnecting { .. })
    })
    .await;
    assert!(matches!(rollback[0], ChannelEvent::Warning { .. }));
    assert_eq!(
        rollback[1],
        ChannelEvent::FallbackComplete {
            endpoint: endpoint(SECONDARY)
        }
    );
    assert_eq!(
        rollback[2],
        ChannelEvent::ChannelDownReconnecting {
            endpoint: endpoint(PRIMARY),
            error: None,
        }
    );

    network.release(PRIMARY);
    let recovered = until_ready(&mut events).await;
    assert_eq!(
        recovered,
        vec![
            ChannelEvent::ChannelUp {
                endpoint: endpoint(PRIMARY)
            },
            ChannelEvent::ChannelReady {
                endpoint: endpoint(PRIMARY)
            },
        ]
    );

    let info = channel.info().await.unwrap();
    assert_eq!(info.current_index, 0);
    assert!(!info.fallback_in_progress);
    assert_eq!(network.transports(PRIMARY).len(), 2);
    assert_eq!(
        network
            .transports(PRIMARY)
            .iter()
            .filter(|t| t.is_closed())
            .count(),
        1
    );
    channel.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_detection_reports_time_to_next_occurrence() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let mut policy = preferred(0, 0);
    policy.detection_schedule = "* * * * *".to_string();
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_preferred_host(policy),
    );
    until_ready(&mut events).await;

    let info = channel.info().await.unwrap();
    assert_eq!(info.preferred_host.detection_schedule, "* * * * *");
    assert!(info.preferred_host.remaining_detection_time <= Duration::from_secs(60));

    channel.apply_policy(preferred(0, 0)).unwrap();
    let info = channel.info().await.unwrap();
    assert_eq!(
        info.preferred_host.remaining_detection_time,
        Duration::ZERO
    );
    channel.close().await.unwrap();
}
