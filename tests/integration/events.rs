use crate::*;
use keel_core::MessageId;
use keel_services::events::{LogNotification, Payload};
use keel_services::testing::ERROR_REPLY_CODE;
use keel_services::transport::{EventCategory, ProgramLifecycle, RawEvent, RawLog, RawReply};
use keel_services::{EventFilter, ReplyStatus, Signer, TransactionIntent, TransportError};

fn expect_log(n: Notification) -> Result<LogNotification> {
    match n {
        Notification::Log(log) => Ok(log),
        other => bail!("expected a log notification, got {other:?}"),
    }
}

fn minted(id: u32) -> Value {
    Value::variant("Minted", Value::uint(id))
}

#[tokio::test]
async fn test_deploy_is_announced_then_answered() -> Result<()> {
    let h = Harness::new();
    let mut sub = h.client.subscribe(EventFilter::all()).await?;
    let program = h.deploy_nft().await?;

    match next_event(&mut sub).await? {
        Notification::Lifecycle(ev) => {
            assert_eq!(ev.program, program);
            assert_eq!(ev.origin, h.alice.account());
            assert_eq!(ev.change, ProgramLifecycle::Initialized);
        }
        other => bail!("expected lifecycle event, got {other:?}"),
    }

    // The init reply decodes with the init output type, not the handle one.
    let reply = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(reply.source, program);
    assert_eq!(reply.reply.map(|r| r.status), Some(ReplyStatus::Success));
    assert_eq!(
        reply.payload,
        Payload::Decoded {
            type_name: "InitConfig".into(),
            value: init_config(),
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_handle_replies_decode_as_events() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let mut sub = h
        .client
        .subscribe(EventFilter::all().program(program).category(EventCategory::MessageLog))
        .await?;

    let receipt = h.act(program, Value::unit_variant("Mint")).await?;
    let log = expect_log(next_event(&mut sub).await?)?;

    let reply = log.reply.context("reply info")?;
    assert_eq!(reply.to, receipt.message_id);
    assert!(reply.status.is_success());
    assert_eq!(log.destination, h.alice.account());
    assert_eq!(log.payload.value(), Some(&minted(0)));
    Ok(())
}

#[tokio::test]
async fn test_failed_reply_carries_raw_reason() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let mut sub = h.client.subscribe(EventFilter::all().program(program)).await?;
    let stranger = Value::variant(
        "Transfer",
        Value::composite([("from", actor(7)), ("to", actor(8)), ("id", Value::uint(0u32))]),
    );
    let payload = encode(&h.schema, "Action", &stranger)?;
    let intent = TransactionIntent::message(program, payload, h.alice.clone())
        .gas_limit(NFT_GAS)
        .build()?;
    let _ = h.client.submitter().submit(intent).await;

    let log = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(
        log.reply.map(|r| r.status),
        Some(ReplyStatus::Failure(ERROR_REPLY_CODE))
    );
    assert_eq!(log.payload, Payload::Raw(Bytes::from_static(b"not owner")));
    Ok(())
}

#[tokio::test]
async fn test_filter_hides_other_programs() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let other = h.chain.install_program(ProgramBehaviour::accepting());
    let mut sub = h.client.subscribe(EventFilter::all().program(program)).await?;

    h.client
        .send_as(h.alice.clone(), other, &h.schema, "u32", &Value::uint(1u32), 0)
        .await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let log = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(log.source, program);
    assert!(stays_quiet(&mut sub, 50).await);
    Ok(())
}

#[tokio::test]
async fn test_unregistered_program_logs_stay_raw() -> Result<()> {
    let h = Harness::new();
    let other = h.chain.install_program(
        ProgramBehaviour::accepting().handle(|_| Ok(b"pong".to_vec())),
    );
    let mut sub = h.client.subscribe(EventFilter::all()).await?;

    h.client
        .send_as(h.alice.clone(), other, &h.schema, "text", &Value::text("ping"), 0)
        .await?;

    let log = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(log.payload, Payload::Raw(Bytes::from_static(b"pong")));
    Ok(())
}

#[tokio::test]
async fn test_garbage_log_is_undecodable_not_fatal() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let mut sub = h.client.subscribe(EventFilter::all().program(program)).await?;

    h.chain.emit(RawEvent::Log(RawLog {
        id: MessageId::new([0x55; 32]),
        source: program,
        destination: h.alice.account(),
        payload: Bytes::from_static(&[9, 9]),
        value: 0,
        reply: None,
    }));
    h.act(program, Value::unit_variant("Mint")).await?;

    let bad = expect_log(next_event(&mut sub).await?)?;
    assert!(matches!(bad.payload, Payload::Undecodable { .. }));
    assert_eq!(bad.payload.raw().map(|b| b.as_ref()), Some(&[9u8, 9][..]));

    // The stream carries on after a bad payload.
    let good = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(good.payload.value(), Some(&minted(0)));
    Ok(())
}

#[tokio::test]
async fn test_unsolicited_log_uses_handle_output() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let mut sub = h.client.subscribe(EventFilter::all().program(program)).await?;

    let event = encode(&h.schema, "Event", &Value::variant("Burned", Value::uint(3u32)))?;
    h.chain.emit(RawEvent::Log(RawLog {
        id: MessageId::new([0x56; 32]),
        source: program,
        destination: h.alice.account(),
        payload: event.into_bytes(),
        value: 0,
        reply: Some(RawReply {
            to: MessageId::new([0x99; 32]),
            code: 0,
        }),
    }));

    let log = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(log.payload.value(), Some(&Value::variant("Burned", Value::uint(3u32))));
    Ok(())
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_delivery() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let mut sub = h.client.subscribe(EventFilter::all().program(program)).await?;

    h.act(program, Value::unit_variant("Mint")).await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let first = expect_log(next_event(&mut sub).await?)?;
    assert_eq!(first.payload.value(), Some(&minted(0)));

    sub.cancel();
    sub.cancel();
    assert!(sub.next().await.is_none(), "buffered event must not surface after cancel");

    h.act(program, Value::unit_variant("Mint")).await?;
    assert!(sub.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_dropped_subscription_releases_registration() -> Result<()> {
    let h = Harness::new();
    let sub = h.client.subscribe(EventFilter::all()).await?;
    let keep = h.client.subscribe(EventFilter::all()).await?;
    assert_eq!(h.chain.active_subscriptions(), 2);

    drop(sub);
    keep.shutdown().await;

    // The dropped one's pump exits on its next wakeup.
    for _ in 0..50 {
        if h.chain.active_subscriptions() == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("{} registrations still held", h.chain.active_subscriptions())
}

#[tokio::test]
async fn test_slow_consumer_lags_without_stalling_others() -> Result<()> {
    let mut config = KeelConfig::default();
    config.events.buffer_capacity = 2;
    let h = Harness::with_config(config);
    let program = h.deploy_nft().await?;
    let filter = EventFilter::all().program(program).category(EventCategory::MessageLog);

    let mut slow = h.client.subscribe(filter.clone()).await?;
    let mut fast = h.client.subscribe(filter).await?;

    for id in 0..5u32 {
        h.act(program, Value::unit_variant("Mint")).await?;
        let log = expect_log(next_event(&mut fast).await?)?;
        assert_eq!(log.payload.value(), Some(&minted(id)));
    }

    // Only the first two fit the slow consumer's buffer.
    for id in 0..2u32 {
        let log = expect_log(next_event(&mut slow).await?)?;
        assert_eq!(log.payload.value(), Some(&minted(id)));
    }

    h.act(program, Value::unit_variant("Mint")).await?;
    assert_eq!(next_event(&mut slow).await?, Notification::Lagged { missed: 3 });
    let log = expect_log(next_event(&mut slow).await?)?;
    assert_eq!(log.payload.value(), Some(&minted(5)));

    let log = expect_log(next_event(&mut fast).await?)?;
    assert_eq!(log.payload.value(), Some(&minted(5)));
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_ends_the_stream() -> Result<()> {
    let h = Harness::new();
    let mut sub = h.client.subscribe(EventFilter::all()).await?;

    h.chain
        .fail_log(TransportError::Unavailable("node went away".into()));

    match sub.next().await {
        Some(Err(TransportError::Unavailable(_))) => {}
        other => bail!("expected a transport error, got {other:?}"),
    }
    assert!(sub.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_subscribe_while_disconnected_fails() -> Result<()> {
    let h = Harness::new();
    h.chain.disconnect();

    let err = h.client.subscribe(EventFilter::all()).await.err().context("subscribe succeeded")?;
    assert!(matches!(
        err,
        keel_services::ClientError::Subscribe(TransportError::Unavailable(_))
    ));
    Ok(())
}

// ── Multi-threaded runtime ────────────────────────────────────────────────────
//
// The pump runs on another worker here, so it can see an event the moment the
// chain publishes it, while the submitting task is still between awaits.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_init_reply_decodes_while_pump_races_the_deployer() -> Result<()> {
    for round in 0..25 {
        let h = Harness::new();
        let mut sub = h.client.subscribe(EventFilter::all()).await?;
        let program = h.deploy_nft().await?;

        match next_event(&mut sub).await? {
            Notification::Lifecycle(ev) => assert_eq!(ev.program, program),
            other => bail!("round {round}: expected lifecycle event, got {other:?}"),
        }
        let reply = expect_log(next_event(&mut sub).await?)?;
        assert_eq!(
            reply.payload,
            Payload::Decoded {
                type_name: "InitConfig".into(),
                value: init_config(),
            },
            "round {round}"
        );
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replies_stay_ordered_across_workers() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let mut sub = h
        .client
        .subscribe(EventFilter::all().program(program).category(EventCategory::MessageLog))
        .await?;

    for _ in 0..20 {
        h.act(program, Value::unit_variant("Mint")).await?;
    }
    for id in 0..20u32 {
        let log = expect_log(next_event(&mut sub).await?)?;
        assert_eq!(log.payload.value(), Some(&minted(id)));
    }
    assert!(stays_quiet(&mut sub, 50).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_after_k_across_workers() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let mut sub = h.client.subscribe(EventFilter::all().program(program)).await?;

    for _ in 0..10 {
        h.act(program, Value::unit_variant("Mint")).await?;
    }
    for id in 0..3u32 {
        let log = expect_log(next_event(&mut sub).await?)?;
        assert_eq!(log.payload.value(), Some(&minted(id)));
    }

    let handle = sub.cancel_handle();
    tokio::spawn(async move { handle.cancel() }).await?;
    assert!(sub.next().await.is_none());

    h.act(program, Value::unit_variant("Mint")).await?;
    assert!(sub.next().await.is_none());
    sub.shutdown().await;
    assert_eq!(h.chain.active_subscriptions(), 0);
    Ok(())
}
