// Copyright (c) The testwire Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for testwire.
//!
//! Configuration is layered: the embedded default config, then the user's config file, then
//! environment variables of the form `TESTWIRE_RUN__DRAIN_TIMEOUT`.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::Utf8Path;
use config::{
    Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState,
};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize, Serializer};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};
use testwire_metadata::FrameworkKind;

/// Overall testwire configuration.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestwireConfig {
    run: RunConfig,
    #[serde(serialize_with = "serialize_frameworks")]
    frameworks: BTreeMap<FrameworkKind, FrameworkConfig>,
}

impl TestwireConfig {
    /// The default location of the config within a directory: `.config/testwire.toml`.
    pub const CONFIG_PATH: &'static str = ".config/testwire.toml";

    /// Contains the default config as a TOML file.
    ///
    /// User configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Environment configuration uses this prefix, plus a _.
    pub const ENVIRONMENT_PREFIX: &'static str = "TESTWIRE";

    /// Reads the config from the given file, or if not specified from `.config/testwire.toml`
    /// under `dir`. A missing default file is not an error.
    ///
    /// `env` is a set of environment variables to layer on top. Only variables starting with
    /// `TESTWIRE_` and containing `__` are considered.
    ///
    /// `unknown_callback` is called with the config file and the set of keys that were not
    /// recognized.
    pub fn from_sources(
        dir: &Utf8Path,
        config_file: Option<&Utf8Path>,
        env: impl IntoIterator<Item = (String, String)>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (
                file.to_owned(),
                File::new(file.as_str(), FileFormat::Toml),
            ),
            None => {
                let config_file = dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let env_prefix = format!("{}_", Self::ENVIRONMENT_PREFIX);
        let env: config::Map<String, String> = env
            .into_iter()
            .filter_map(|(key, value)| {
                let path = key.strip_prefix(&env_prefix)?;
                // TESTWIRE_RUN__DRAIN_TIMEOUT sets run.drain-timeout.
                path.contains("__").then(|| {
                    let path = path.split("__").map(|segment| segment.replace('_', "-"));
                    (format!("{env_prefix}{}", path.collect::<Vec<_>>().join("__")), value)
                })
            })
            .collect();

        let builder = Self::make_default_config().add_source(source).add_source(
            Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(Some(env)),
        );

        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file.clone(), kind))?;
        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        config
            .into_config()
            .map_err(|kind| ConfigParseError::new(config_file, kind))
    }

    /// Returns the default configuration, without any user config layered on top.
    pub fn default_config() -> Result<Self, ConfigParseError> {
        let (config, _unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .map_err(|kind| ConfigParseError::new("<default config>", kind))?;
        config
            .into_config()
            .map_err(|kind| ConfigParseError::new("<default config>", kind))
    }

    /// Returns the run settings.
    pub fn run(&self) -> &RunConfig {
        &self.run
    }

    /// Returns the settings for a framework kind, if any are configured.
    pub fn framework(&self, kind: FrameworkKind) -> Option<&FrameworkConfig> {
        self.frameworks.get(&kind)
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(TestwireConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: TestwireConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key: drop it in favor of the path.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Settings that apply to every partition of a run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    #[serde(serialize_with = "serialize_encoding")]
    encoding: &'static Encoding,
    #[serde(with = "humantime_serde")]
    drain_timeout: Duration,
    #[serde(with = "humantime_serde")]
    accept_timeout: Duration,
}

impl RunConfig {
    /// The encoding of test process output.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// How long to keep reading output after a cancellation.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// How long to wait for a debug-mode connection.
    pub fn accept_timeout(&self) -> Duration {
        self.accept_timeout
    }

    /// Sets the encoding of test process output.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets how long to keep reading output after a cancellation.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Sets how long to wait for a debug-mode connection.
    pub fn with_accept_timeout(mut self, accept_timeout: Duration) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
            drain_timeout: Duration::from_secs(2),
            accept_timeout: Duration::from_secs(30),
        }
    }
}

/// How to launch the tests of one framework kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct FrameworkConfig {
    /// The program and its arguments. Placeholders are substituted before spawning.
    #[serde(default)]
    pub command: Vec<String>,

    /// Arguments appended to the command in debug mode.
    #[serde(default)]
    pub debug_args: Vec<String>,

    /// Extra environment variables for the test process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TestwireConfigDeserialize {
    run: RunConfigDeserialize,
    #[serde(default)]
    frameworks: BTreeMap<FrameworkKind, FrameworkConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunConfigDeserialize {
    encoding: String,
    #[serde(with = "humantime_serde")]
    drain_timeout: Duration,
    #[serde(with = "humantime_serde")]
    accept_timeout: Duration,
}

impl TestwireConfigDeserialize {
    fn into_config(self) -> Result<TestwireConfig, ConfigParseErrorKind> {
        let RunConfigDeserialize {
            encoding,
            drain_timeout,
            accept_timeout,
        } = self.run;
        let encoding = Encoding::for_label(encoding.trim().as_bytes())
            .ok_or(ConfigParseErrorKind::UnknownEncoding { label: encoding })?;
        Ok(TestwireConfig {
            run: RunConfig {
                encoding,
                drain_timeout,
                accept_timeout,
            },
            frameworks: self.frameworks,
        })
    }
}

fn serialize_encoding<S: Serializer>(
    encoding: &&'static Encoding,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&encoding.name().to_ascii_lowercase())
}

fn serialize_frameworks<S: Serializer>(
    frameworks: &BTreeMap<FrameworkKind, FrameworkConfig>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(
        frameworks
            .iter()
            .map(|(kind, framework)| (kind.as_str(), framework)),
    )
}
