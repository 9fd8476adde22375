use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::de::DeserializeOwned;

/// Load a settings struct from `.env`, an optional `configuration.*` file and
/// `PREFIX__SECTION__KEY` environment variables, in that order of precedence
/// (later sources win).
pub fn load<T: DeserializeOwned>(prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix(prefix).separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default = "default_name")]
        name: String,
    }

    fn default_name() -> String {
        "sample".to_string()
    }

    #[test]
    fn test_load_falls_back_to_serde_defaults() {
        let sample: Sample = load("SERVICE_CORE_CONFIG_TEST_UNSET").expect("config should load");
        assert_eq!(sample.name, "sample");
    }
}
