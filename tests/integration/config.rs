use crate::*;

fn temp_config(name: &str, body: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("keel-it-{}-{name}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn test_configured_margin_sets_gas_limit() -> Result<()> {
    let path = temp_config("margin", "[gas]\nmargin_percent = 50\n");
    let config = KeelConfig::load_from(path)?;
    assert_eq!(config.gas.margin_percent, 50);

    let h = Harness::with_config(config);
    h.deploy_nft().await?;
    assert_eq!(h.chain.submitted()[0].gas_limit, 3_750);
    Ok(())
}

#[tokio::test]
async fn test_clamp_caps_submitted_gas() -> Result<()> {
    let path = temp_config("clamp", "[gas]\nmargin_percent = 100\nmax_limit = 3000\n");
    let h = Harness::with_config(KeelConfig::load_from(path)?);

    let program = h.deploy_nft().await?;
    h.act(program, Value::unit_variant("Mint")).await?;
    assert!(h.chain.submitted().iter().all(|tx| tx.gas_limit == 3_000));
    Ok(())
}

#[tokio::test]
async fn test_missing_file_falls_back_to_defaults() -> Result<()> {
    let path = std::env::temp_dir().join("keel-it-does-not-exist").join("config.toml");
    let config = KeelConfig::load_from(path)?;
    assert_eq!(config.events.buffer_capacity, 256);
    assert_eq!(config.rpc.endpoint, "ws://127.0.0.1:9944");
    Ok(())
}
