use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue("PORT", "must be a valid u16"))?;

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "linkharvest.db".to_string());

        Ok(Config {
            port,
            database_path,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Neither var is required, so from_env always succeeds in a clean env.
        let config = Config::from_env().unwrap();
        assert!(config.port > 0);
        assert!(!config.database_path.is_empty());
    }
}
