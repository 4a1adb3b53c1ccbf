use armature_config::{deser::PermissiveBool, GenericConfiguration};
use armature_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use serde_with::serde_as;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn default_log_level() -> LogLevel {
    LevelFilter::INFO.into()
}

const fn default_true() -> bool {
    true
}

/// Logging configuration.
///
/// When loaded from the environment with the `ARMATURE` prefix, the fields map to `ARMATURE_LOG_LEVEL`,
/// `ARMATURE_LOG_FORMAT_JSON`, and `ARMATURE_LOG_TO_CONSOLE`.
#[serde_as]
#[derive(Deserialize)]
pub struct LoggingConfiguration {
    /// Filtering directives, in `EnvFilter` syntax.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to emit JSON instead of the human-readable format.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub log_format_json: bool,

    /// Whether to write logs to standard output.
    ///
    /// Defaults to `true`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default = "default_true")]
    pub log_to_console: bool,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let logging_config = config.as_typed()?;
        Ok(logging_config)
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: false,
            log_to_console: true,
        }
    }
}

/// A log level, or more generally a set of filtering directives.
#[derive(Deserialize)]
#[serde(try_from = "String")]
pub struct LogLevel(EnvFilter);

impl LogLevel {
    /// Returns the directives as an `EnvFilter`.
    pub fn as_env_filter(&self) -> EnvFilter {
        self.0.clone()
    }
}

impl From<LevelFilter> for LogLevel {
    fn from(level: LevelFilter) -> Self {
        Self(EnvFilter::default().add_directive(level.into()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(value)
            .map(Self)
            .error_context("Failed to parse valid log level.")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use armature_config::ConfigurationLoader;

    use super::*;

    #[test]
    fn defaults() {
        let config = LoggingConfiguration::default();
        assert_eq!(config.log_level.as_env_filter().to_string(), "info");
        assert!(!config.log_format_json);
        assert!(config.log_to_console);
    }

    #[test]
    fn from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"log_level: \"armature_core=debug,warn\"\nlog_format_json: \"yes\"\nlog_to_console: 0\n")
            .unwrap();

        let generic = ConfigurationLoader::default().from_yaml(file.path()).unwrap().into_generic();
        let config = LoggingConfiguration::from_configuration(&generic).unwrap();

        let directives = config.log_level.as_env_filter().to_string();
        assert!(directives.contains("armature_core=debug"), "directives: {}", directives);
        assert!(directives.contains("warn"), "directives: {}", directives);
        assert!(config.log_format_json);
        assert!(!config.log_to_console);
    }

    #[test]
    fn invalid_log_level() {
        assert!(LogLevel::try_from(String::new()).is_err());
        assert!(LogLevel::try_from("armature=notalevel".to_string()).is_err());
        assert!(LogLevel::try_from("trace".to_string()).is_ok());
    }
}
