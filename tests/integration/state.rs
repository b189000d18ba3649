use crate::*;
use keel_core::{DecodeError, EncodeError};
use keel_services::{ClientError, StateReadError};

#[tokio::test]
async fn test_unknown_program_is_not_found() -> Result<()> {
    let h = Harness::new();
    let ghost = ProgramId::new([0xEE; 32]);

    let err = h
        .client
        .read_state(ghost, &h.schema, Some(&Value::unit_variant("TotalSupply")))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::StateRead(StateReadError::ProgramNotFound(ghost)));
    Ok(())
}

#[tokio::test]
async fn test_owner_of_missing_token_is_none() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    h.act(program, Value::unit_variant("Mint")).await?;

    let query = |id: u32| Value::variant("OwnerOf", Value::uint(id));
    let owner = h.client.read_state(program, &h.schema, Some(&query(0))).await?;
    assert_eq!(owner, Value::variant("Owner", Value::some(collection())));

    let owner = h.client.read_state(program, &h.schema, Some(&query(1))).await?;
    assert_eq!(owner, Value::variant("Owner", Value::none()));
    Ok(())
}

#[tokio::test]
async fn test_burn_shows_up_in_supply() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    for _ in 0..3 {
        h.act(program, Value::unit_variant("Mint")).await?;
    }
    h.act(program, Value::variant("Burn", Value::uint(1u32))).await?;

    let supply = h
        .client
        .read_state(program, &h.schema, Some(&Value::unit_variant("TotalSupply")))
        .await?;
    assert_eq!(supply.as_variant(), Some(("TotalSupply", Some(&Value::uint(2u64)))));
    Ok(())
}

#[tokio::test]
async fn test_bad_query_never_reaches_the_chain() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;

    let err = h
        .client
        .read_state(program, &h.schema, Some(&Value::unit_variant("BalanceOf")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::StateRead(StateReadError::Encode(EncodeError::UnknownVariant { .. }))
    ));
    assert_eq!(h.chain.queries(), 0);
    Ok(())
}

#[tokio::test]
async fn test_answer_read_as_wrong_type_is_a_decode_error() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;

    // TotalSupply answers tag 1 + u64; read as Action that is Burn(u32)
    // with four bytes left over.
    let err = h
        .client
        .reader()
        .read_state_with_output(
            program,
            &h.schema,
            "StateQuery",
            &Value::unit_variant("TotalSupply"),
            "Action",
        )
        .await
        .unwrap_err();
    assert_eq!(err, StateReadError::Decode(DecodeError::TrailingBytes(4)));
    Ok(())
}

#[tokio::test]
async fn test_reads_fail_while_disconnected() -> Result<()> {
    let h = Harness::new();
    let program = h.deploy_nft().await?;
    h.chain.disconnect();

    let err = h
        .client
        .read_state(program, &h.schema, Some(&Value::unit_variant("Name")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::StateRead(StateReadError::Transport(keel_services::TransportError::Unavailable(_)))
    ));
    Ok(())
}
