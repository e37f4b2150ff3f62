mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lib_channel::error::{ChannelError, ValidationError};
use lib_channel::{ChannelBuilder, ChannelEvent, ChannelState, Endpoint};

use common::*;

#[tokio::test]
async fn connects_to_the_first_endpoint_and_becomes_ready() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let (channel, mut events) = start(&network, config(&[PRIMARY, SECONDARY]));
    assert_eq!(channel.state(), ChannelState::Initializing);

    assert_eq!(
        until_ready(&mut events).await,
        vec![
            ChannelEvent::ChannelUp {
                endpoint: endpoint(PRIMARY)
            },
            ChannelEvent::ChannelReady {
                endpoint: endpoint(PRIMARY)
            },
        ]
    );
    assert_eq!(channel.state(), ChannelState::Ready);

    let info = channel.info().await.unwrap();
    assert_eq!(info.name, "test");
    assert_eq!(info.current_index, 0);
    assert_eq!(info.preferred_host.remaining_detection_time, Duration::ZERO);
    let transport = info.transport.expect("live transport");
    assert_eq!(transport.peer.map(|p| p.port()), Some(PRIMARY));
    channel.close().await.unwrap();
}

#[tokio::test]
async fn failed_attempts_are_counted_per_endpoint_and_reset_on_up() {
    let network = MockNetwork::new(&[SECONDARY]);
    let (channel, mut events) = start(&network, config(&[PRIMARY, SECONDARY]));

    let startup = until_ready(&mut events).await;
    assert_eq!(startup.len(), 3);
    assert!(matches!(
        &startup[0],
        ChannelEvent::ChannelDownReconnecting { endpoint: next, error: Some(ChannelError::Transport { .. }) }
            if next.port == SECONDARY
    ));

    let info = channel.info().await.unwrap();
    assert_eq!(info.endpoints[0].reconnect_attempts, 1);
    assert_eq!(info.endpoints[1].reconnect_attempts, 0);
    assert_eq!(info.reconnect_attempts, 0);
    assert_eq!(info.current_reconnect_delay, Duration::ZERO);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn lost_connection_reconnects_to_the_next_endpoint() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    let (channel, mut events) = start(&network, config(&[PRIMARY, SECONDARY]));
    until_ready(&mut events).await;

    network.set_reachable(PRIMARY, false);
    network.last_transport(PRIMARY).drop_connection();

    assert_eq!(
        until_ready(&mut events).await,
        vec![
            ChannelEvent::ChannelDownReconnecting {
                endpoint: endpoint(SECONDARY),
                error: None,
            },
            ChannelEvent::ChannelUp {
                endpoint: endpoint(SECONDARY)
            },
            ChannelEvent::ChannelReady {
                endpoint: endpoint(SECONDARY)
            },
        ]
    );
    assert_eq!(network.connects(), vec![PRIMARY, SECONDARY]);
    channel.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempt_limit_shuts_the_channel_down() {
    let network = MockNetwork::new(&[]);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_attempt_limit(3),
    );

    let down = events_until(&mut events, |e| matches!(e, ChannelEvent::ChannelDown { .. })).await;
    assert_eq!(down.len(), 2);
    assert!(matches!(
        down[0],
        ChannelEvent::ChannelDownReconnecting { .. }
    ));
    assert_eq!(
        down[1],
        ChannelEvent::ChannelDown {
            error: ChannelError::AttemptLimitExhausted { limit: 3 }
        }
    );
    assert_eq!(network.connects(), vec![PRIMARY, SECONDARY, PRIMARY]);

    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(
        channel.submit(Bytes::from_static(b"late")),
        Err(ChannelError::Shutdown)
    );
    assert_eq!(channel.info().await.unwrap_err(), ChannelError::Shutdown);
    assert_eq!(
        channel.fallback_to_preferred_host().await,
        Err(ChannelError::Shutdown)
    );
    assert_eq!(channel.close().await, Err(ChannelError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn connect_that_hangs_is_timed_out() {
    let network = MockNetwork::new(&[PRIMARY, SECONDARY]);
    network.hold(PRIMARY);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_init_timeout(Duration::from_secs(5)),
    );

    let startup = until_ready(&mut events).await;
    assert_eq!(
        startup[0],
        ChannelEvent::ChannelDownReconnecting {
            endpoint: endpoint(SECONDARY),
            error: Some(ChannelError::Timeout {
                endpoint: "127.0.0.1:14001".to_string(),
                timeout_ms: 5000,
            }),
        }
    );
    assert_eq!(channel.state(), ChannelState::Ready);
    channel.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_exponentially() {
    let network = MockNetwork::new(&[]);
    let (_channel, mut events) = start(
        &network,
        config(&[PRIMARY, SECONDARY]).with_attempt_limit(5),
    );
    events_until(&mut events, |e| matches!(e, ChannelEvent::ChannelDown { .. })).await;

    let times = network.connect_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        [10, 20, 40, 80].map(Duration::from_millis).to_vec(),
        "backoff doubles from the minimum and stops at the maximum"
    );
    assert_eq!(
        network.connects(),
        vec![PRIMARY, SECONDARY, PRIMARY, SECONDARY, PRIMARY]
    );
}

#[tokio::test(start_paused = true)]
async fn sub_second_init_timeout_allows_a_slower_connect() {
    let network = MockNetwork::new(&[PRIMARY]);
    network.hold(PRIMARY);
    let (channel, mut events) = start(
        &network,
        config(&[PRIMARY]).with_init_timeout(Duration::from_millis(500)),
    );

    let releaser = network.clone();
    tokio::spawn(async move {
        while releaser.connects().is_empty() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        releaser.release(PRIMARY);
    });

    assert_eq!(
        until_ready(&mut events).await,
        vec![
            ChannelEvent::ChannelUp {
                endpoint: endpoint(PRIMARY)
            },
            ChannelEvent::ChannelReady {
                endpoint: endpoint(PRIMARY)
            },
        ]
    );
    assert_eq!(network.connects(), vec![PRIMARY]);
    channel.close().await.unwrap();
}

#[tokio::test]
async fn connect_finishing_after_close_is_closed() {
    let network = MockNetwork::new(&[PRIMARY]);
    network.hold(PRIMARY);
    let (channel, mut events) = start(&network, config(&[PRIMARY]));
    while network.connects().is_empty() {
        tokio::task::yield_now().await;
    }

    channel.close().await.unwrap();
    assert!(events.recv().await.is_none());
    network.release(PRIMARY);

    let mut closed = false;
    for _ in 0..100 {
        if let Some(late) = network.transports(PRIMARY).pop() {
            closed = late.is_closed();
            if closed {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(closed, "transport opened after close was left open");
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let network = MockNetwork::new(&[PRIMARY]);
    let (channel, mut events) = start(&network, config(&[PRIMARY]));
    until_ready(&mut events).await;

    let transport = network.last_transport(PRIMARY);
    transport.push(b"quote:EURUSD=1.0842");
    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Message {
            payload: Bytes::from_static(b"quote:EURUSD=1.0842")
        })
    );

    channel.submit(Bytes::from_static(b"subscribe:GBPUSD")).unwrap();
    assert_eq!(
        transport.sent(),
        vec![Bytes::from_static(b"subscribe:GBPUSD")]
    );
    channel.close().await.unwrap();
}

#[tokio::test]
async fn close_is_terminal() {
    let network = MockNetwork::new(&[PRIMARY]);
    let (channel, mut events) = start(&network, config(&[PRIMARY]));
    until_ready(&mut events).await;
    let transport = network.last_transport(PRIMARY);

    channel.close().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(transport.is_closed());
    assert!(events.recv().await.is_none());

    assert_eq!(channel.close().await, Err(ChannelError::Shutdown));
    assert_eq!(
        channel.submit(Bytes::from_static(b"x")),
        Err(ChannelError::Shutdown)
    );
    assert_eq!(
        channel.apply_policy(Default::default()),
        Err(ChannelError::Shutdown)
    );
}

#[tokio::test]
async fn session_managed_endpoints_are_resolved_through_discovery() {
    let network = MockNetwork::new(&[SECONDARY]);
    let managed = Endpoint::new("127.0.0.1", PRIMARY).with_session_management(true);
    let (channel, mut events) = ChannelBuilder::new(lib_channel::ChannelConfig::new(
        "managed",
        vec![managed.clone()],
    ))
    .connector(network.connector())
    .discovery(Arc::new(FixedDiscovery { port: SECONDARY }))
    .start()
    .unwrap();

    assert_eq!(
        until_ready(&mut events).await[0],
        ChannelEvent::ChannelUp { endpoint: managed }
    );
    assert_eq!(network.connects(), vec![SECONDARY]);
    let info = channel.info().await.unwrap();
    assert_eq!(
        info.transport.and_then(|t| t.peer).map(|p| p.port()),
        Some(SECONDARY)
    );
    channel.close().await.unwrap();
}

#[tokio::test]
async fn session_managed_endpoint_without_discovery_is_rejected() {
    let network = MockNetwork::new(&[PRIMARY]);
    let managed = Endpoint::new("127.0.0.1", PRIMARY).with_session_management(true);
    let result = ChannelBuilder::new(lib_channel::ChannelConfig::new("managed", vec![managed]))
        .connector(network.connector())
        .start();

    match result {
        Err(err) => assert_eq!(
            err,
            ChannelError::Validation(ValidationError::MissingServiceDiscovery(
                "127.0.0.1:14001".to_string()
            ))
        ),
        Ok(_) => panic!("start should fail"),
    }
    assert!(network.connects().is_empty());
}

#[tokio::test]
async fn user_context_is_carried_by_the_channel() {
    let network = MockNetwork::new(&[PRIMARY]);
    let (channel, mut events) = ChannelBuilder::new(config(&[PRIMARY]))
        .connector(network.connector())
        .user_context(Arc::new(7_u32))
        .start()
        .unwrap();
    until_ready(&mut events).await;

    let value = channel.user_context().expect("user context");
    assert_eq!(value.downcast_ref::<u32>(), Some(&7));

    channel.set_user_context(Some(Arc::new(String::from("desk-7"))));
    let value = channel.user_context().expect("user context");
    assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("desk-7"));
    channel.close().await.unwrap();
}
