use crate::*;
use keel_services::gas::GasTarget;
use keel_services::submitter::SubmissionState;
use keel_services::testing::FailingSigner;
use keel_services::{ClientError, EstimationError, Signer, SubmitError, TransactionIntent};

#[tokio::test]
async fn test_deploy_mint_and_read_back() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    assert!(h.chain.has_program(&program));

    h.act(program, Value::unit_variant("Mint")).await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let supply = h
        .client
        .read_state(program, &h.schema, Some(&Value::unit_variant("TotalSupply")))
        .await?;
    assert_eq!(supply, Value::variant("TotalSupply", Value::uint(2u64)));

    let name = h
        .client
        .read_state(program, &h.schema, Some(&Value::unit_variant("Name")))
        .await?;
    assert_eq!(name, Value::variant("Name", Value::text("My NFT Token")));
    Ok(())
}

#[tokio::test]
async fn test_gas_limit_is_estimate_plus_margin() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let sent = h.chain.submitted();
    assert_eq!(sent.len(), 2);
    // default margin is 10%
    assert!(sent.iter().all(|tx| tx.gas_limit == NFT_GAS + NFT_GAS / 10));
    Ok(())
}

#[tokio::test]
async fn test_estimate_on_reverting_payload() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let burn = encode(&h.schema, "Action", &Value::variant("Burn", Value::uint(99u32)))?;

    let err = h
        .client
        .estimator()
        .estimate(h.alice.account(), GasTarget::Handle { program }, &burn, 0, &h.schema)
        .await
        .unwrap_err();
    match err {
        EstimationError::SimulationReverted { reason } => assert!(reason.contains("does not exist")),
        other => bail!("expected a revert, got {other:?}"),
    }
    // a dry run never reaches the submitter
    assert_eq!(h.chain.submitted().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_transfer_by_non_owner_is_rejected() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let stranger = Value::variant(
        "Transfer",
        Value::composite([("from", actor(9)), ("to", actor(2)), ("id", Value::uint(0u32))]),
    );
    let payload = encode(&h.schema, "Action", &stranger)?;

    // Skip estimation so the failure happens on chain, not in the dry run.
    let intent = TransactionIntent::message(program, payload, h.alice.clone())
        .gas_limit(NFT_GAS * 2)
        .build()?;
    let mut states = Vec::new();
    let err = h
        .client
        .submitter()
        .submit_watched(intent, |s| states.push(s))
        .await
        .unwrap_err();

    assert_eq!(
        states,
        vec![
            SubmissionState::Built,
            SubmissionState::Signed,
            SubmissionState::Submitted,
            SubmissionState::Rejected
        ]
    );
    match err {
        SubmitError::Rejected { message_id, reason } => {
            assert!(message_id.is_some());
            assert_eq!(reason, "not owner");
        }
        other => bail!("expected rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_owner_transfer_moves_the_token() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let transfer = Value::variant(
        "Transfer",
        Value::composite([("from", collection()), ("to", actor(2)), ("id", Value::uint(0u32))]),
    );
    h.act(program, transfer).await?;

    let owner = h
        .client
        .read_state(program, &h.schema, Some(&Value::variant("OwnerOf", Value::uint(0u32))))
        .await?;
    assert_eq!(owner, Value::variant("Owner", Value::some(actor(2))));
    Ok(())
}

#[tokio::test]
async fn test_locked_signer_never_submits() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let attempts = h.chain.submit_attempts();

    let err = h
        .client
        .send(Arc::new(FailingSigner), program, &h.schema, Some(&Value::unit_variant("Mint")), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Submit(SubmitError::SigningFailed(_))));
    assert_eq!(h.chain.submit_attempts(), attempts);
    Ok(())
}

#[tokio::test]
async fn test_connection_loss_is_surfaced_not_retried() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    let payload = encode(&h.schema, "Action", &Value::unit_variant("Mint"))?;
    let attempts = h.chain.submit_attempts();

    h.chain.disconnect();
    let intent = TransactionIntent::message(program, payload, h.alice.clone())
        .gas_limit(NFT_GAS * 2)
        .build()?;
    let err = h.client.submitter().submit(intent).await.unwrap_err();
    assert!(matches!(err, SubmitError::TransportUnavailable(_)));
    assert_eq!(h.chain.submit_attempts(), attempts + 1);

    // The caller decides to resubmit once the link is back.
    h.chain.reconnect();
    h.act(program, Value::unit_variant("Mint")).await?;
    Ok(())
}

#[tokio::test]
async fn test_redeploy_with_same_salt_is_rejected() -> Result<()> {
    let h = Harness::new();
    h.deploy_nft().await?;
    let err = h.deploy_nft().await.unwrap_err();

    let err = err.downcast::<ClientError>()?;
    assert!(matches!(err, ClientError::Submit(SubmitError::Rejected { message_id: None, .. })));
    Ok(())
}
