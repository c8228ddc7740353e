use config::ConfigError;
use serde::de::DeserializeOwned;
use std::convert::TryInto;
use std::env;
use std::path::PathBuf;

/// Load settings from `base.yaml`, the environment specific file and `APP_*`
/// variables, in increasing order of precedence.
///
/// Both files are optional: a missing configuration directory yields the
/// defaults of `T` overridden by the environment.
pub fn get_configuration<T: DeserializeOwned + std::fmt::Display>() -> Result<T, ConfigError> {
    let configuration_directory = match env::var("CONFIG_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => env::current_dir()
            .map_err(|e| {
                ConfigError::Message(format!("Failed to determine the current directory: {e}"))
            })?
            .join("configuration"),
    };

    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(false))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        // allow to overwrite configuration explicitly with environment variables
        // APP_LEASE__STATE_DIR=/run/corelease to update lease.state_dir
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings = settings.try_deserialize::<T>()?;

    Ok(settings)
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
    CI,
}

impl Environment {
    /// Convert the enum instance to a static string reference.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
            Environment::CI => "ci",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    /// Case insensitive; only "local", "ci" and "production" are accepted.
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            "ci" => Ok(Self::CI),
            other => Err(format!(
                "{} is not a supported environment. Use either `local`, `ci` or `production`.",
                other
            )),
        }
    }
}
