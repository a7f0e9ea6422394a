use style_blocks::{common::*, config::Config, probe};

const CONFIG: &str = r#"{
    model: {
        latent_dim: 32,
        mapping_layers: 4,
        const_resol: 4,
        synthesis_channels: [32, 16, 8],
        discriminator_channels: [8, 16, 32],
    },
    probe: { batch_size: 2, device: "cpu" },
}"#;

#[test]
fn probe_test() -> Result<()> {
    let config: Config = json5::from_str(CONFIG)?;
    config.validate()?;
    let report = probe::run(&config)?;

    assert_eq!(report.latent_w, vec![2, 32]);
    assert_eq!(
        report.generator,
        vec![vec![2, 32, 4, 4], vec![2, 16, 8, 8], vec![2, 8, 16, 16]]
    );
    assert_eq!(
        report.discriminator,
        vec![vec![2, 8, 8, 8], vec![2, 16, 4, 4], vec![2, 32, 2, 2]]
    );
    assert_eq!(report.score, vec![2, 1]);
    assert_eq!(report.num_parameters, 49014);

    Ok(())
}

#[test]
fn probe_odd_resolution_test() -> Result<()> {
    let config: Config = json5::from_str(&CONFIG.replace("const_resol: 4", "const_resol: 3"))?;
    ensure!(probe::run(&config).is_err());
    Ok(())
}

#[test]
fn too_many_discriminator_stages_test() -> Result<()> {
    let channels = vec!["8"; 70].join(", ");
    let config: Config = json5::from_str(&CONFIG.replace(
        "discriminator_channels: [8, 16, 32]",
        &format!("discriminator_channels: [{}]", channels),
    ))?;
    ensure!(probe::run(&config).is_err());
    Ok(())
}
