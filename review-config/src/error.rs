/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// A required key had no value and no default.
    Missing(String),
    /// A value was present but couldn't be parsed as the expected type.
    Invalid { key: String, value: String, expected: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required config key: {key}"),
            ConfigError::Invalid { key, value, expected } => {
                write!(f, "invalid value for '{key}': '{value}' is not a valid {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
