use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: Model,
    pub probe: Probe,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Model {
            synthesis_channels,
            discriminator_channels,
            ..
        } = &self.model;

        ensure!(
            !synthesis_channels.is_empty(),
            "synthesis_channels must not be empty"
        );
        ensure!(
            !discriminator_channels.is_empty(),
            "discriminator_channels must not be empty"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub latent_dim: NonZeroUsize,
    pub mapping_layers: NonZeroUsize,
    pub const_resol: NonZeroUsize,
    pub synthesis_channels: Vec<NonZeroUsize>,
    pub discriminator_channels: Vec<NonZeroUsize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub batch_size: NonZeroUsize,
    #[serde(with = "tch_serde::serde_device")]
    pub device: Device,
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn load_config_test() -> Result<()> {
        let path = std::env::temp_dir().join(format!("style-blocks-{}.json5", std::process::id()));
        fs::write(&path, CONFIG)?;
        let config = Config::load(&path);
        fs::remove_file(&path)?;
        let config = config?;

        assert_eq!(config.model.latent_dim.get(), 32);
        assert_eq!(config.model.synthesis_channels.len(), 3);
        assert_eq!(config.probe.device, Device::Cpu);

        Ok(())
    }

    #[test]
    fn reject_empty_channels_test() -> Result<()> {
        let mut config: Config = json5::from_str(CONFIG)?;
        config.model.discriminator_channels.clear();
        ensure!(config.validate().is_err());

        let zero = json5::from_str::<Config>(&CONFIG.replace("latent_dim: 32", "latent_dim: 0"));
        ensure!(zero.is_err());

        Ok(())
    }
}
