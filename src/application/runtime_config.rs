//! Runtime configuration built from flat filter properties.
//!
//! A [`RuntimeConfiguration`] is produced once per orchestrator by
//! [`RuntimeConfigBuilder::build`], which resolves every processor alias up
//! front. Construction is all-or-nothing: an unknown alias or a malformed
//! number yields a [`ConfigError`] and no configuration exists.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::application::processors::{ProcessorRef, ProcessorRegistry, UnknownProcessor};
use crate::domain::fingerprint::{FingerprintAlgorithm, UnknownAlgorithm};

pub const DEFAULT_ENCODING: &str = "UTF-8";

pub const PROP_ENCODING: &str = "encoding";
pub const PROP_CACHE_UPDATE_PERIOD: &str = "cache-update-period";
pub const PROP_MODEL_UPDATE_PERIOD: &str = "model-update-period";
pub const PROP_MANAGEMENT_ID: &str = "management-id";
pub const PROP_PRE_PROCESSORS: &str = "pre-processors";
pub const PROP_POST_PROCESSORS: &str = "post-processors";
pub const PROP_DEBUG: &str = "debug";
pub const PROP_IGNORE_MISSING_RESOURCES: &str = "ignore-missing-resources";
pub const PROP_FINGERPRINT: &str = "fingerprint";

const KNOWN_PROPERTIES: &[&str] = &[
    PROP_ENCODING,
    PROP_CACHE_UPDATE_PERIOD,
    PROP_MODEL_UPDATE_PERIOD,
    PROP_MANAGEMENT_ID,
    PROP_PRE_PROCESSORS,
    PROP_POST_PROCESSORS,
    PROP_DEBUG,
    PROP_IGNORE_MISSING_RESOURCES,
    PROP_FINGERPRINT,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid `{key}` processor list: {source}")]
    UnknownProcessor {
        key: &'static str,
        #[source]
        source: UnknownProcessor,
    },
    #[error("invalid value `{value}` for `{key}`: expected a non-negative number of seconds")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid value `{value}` for `{key}`: expected true or false")]
    InvalidFlag { key: &'static str, value: String },
    #[error(transparent)]
    UnknownFingerprint(#[from] UnknownAlgorithm),
}

impl ConfigError {
    /// The offending alias, when the failure is an unresolvable processor.
    pub fn unknown_alias(&self) -> Option<&str> {
        match self {
            ConfigError::UnknownProcessor { source, .. } => Some(source.alias.as_str()),
            _ => None,
        }
    }
}

/// Validated, immutable settings for one orchestrator lifetime.
#[derive(Debug, Clone)]
pub struct RuntimeConfiguration {
    encoding: String,
    cache_update_period: u64,
    model_update_period: u64,
    management_id: Option<String>,
    pre_processors: Vec<ProcessorRef>,
    post_processors: Vec<ProcessorRef>,
    debug: bool,
    ignore_missing_resources: bool,
    fingerprint: FingerprintAlgorithm,
}

impl RuntimeConfiguration {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Charset label used for served artifacts. Never empty.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Seconds between cache flushes; `0` disables periodic flushing.
    pub fn cache_update_period(&self) -> u64 {
        self.cache_update_period
    }

    /// Seconds between group model reloads; `0` disables reloading.
    pub fn model_update_period(&self) -> u64 {
        self.model_update_period
    }

    pub fn management_id(&self) -> Option<&str> {
        self.management_id.as_deref()
    }

    pub fn pre_processors(&self) -> &[ProcessorRef] {
        &self.pre_processors
    }

    pub fn post_processors(&self) -> &[ProcessorRef] {
        &self.post_processors
    }

    /// Every configured stage: pre-processors first, then post-processors.
    pub fn processor_chain(&self) -> impl Iterator<Item = &ProcessorRef> {
        self.pre_processors.iter().chain(self.post_processors.iter())
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn ignore_missing_resources(&self) -> bool {
        self.ignore_missing_resources
    }

    pub fn fingerprint(&self) -> FingerprintAlgorithm {
        self.fingerprint
    }
}

/// Collects properties and programmatic overrides, then validates them once.
///
/// Overrides set through the typed setters win over the same-named property.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    properties: HashMap<String, String>,
    // Outer `Some` means "overridden", inner `None` means "explicitly unset".
    encoding: Option<Option<String>>,
    management_id: Option<Option<String>>,
    cache_update_period: Option<u64>,
    model_update_period: Option<u64>,
}

impl RuntimeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the property mapping.
    pub fn properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn encoding(mut self, encoding: Option<impl Into<String>>) -> Self {
        self.encoding = Some(encoding.map(Into::into));
        self
    }

    pub fn management_id(mut self, management_id: Option<impl Into<String>>) -> Self {
        self.management_id = Some(management_id.map(Into::into));
        self
    }

    pub fn cache_update_period(mut self, seconds: u64) -> Self {
        self.cache_update_period = Some(seconds);
        self
    }

    pub fn model_update_period(mut self, seconds: u64) -> Self {
        self.model_update_period = Some(seconds);
        self
    }

    /// Validate everything and produce the configuration.
    pub fn build(&self, registry: &ProcessorRegistry) -> Result<RuntimeConfiguration, ConfigError> {
        for key in self.properties.keys() {
            if !KNOWN_PROPERTIES.contains(&key.as_str()) {
                debug!(
                    target = "fascio::config",
                    key = %key,
                    "ignoring unrecognized filter property"
                );
            }
        }

        let encoding = match &self.encoding {
            Some(value) => value.clone(),
            None => self.property_value(PROP_ENCODING).map(str::to_string),
        }
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

        let management_id = match &self.management_id {
            Some(value) => value.clone(),
            None => self.property_value(PROP_MANAGEMENT_ID).map(str::to_string),
        }
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

        let cache_update_period = match self.cache_update_period {
            Some(seconds) => seconds,
            None => self.seconds(PROP_CACHE_UPDATE_PERIOD)?,
        };
        let model_update_period = match self.model_update_period {
            Some(seconds) => seconds,
            None => self.seconds(PROP_MODEL_UPDATE_PERIOD)?,
        };

        let pre_processors = self.processors(registry, PROP_PRE_PROCESSORS)?;
        let post_processors = self.processors(registry, PROP_POST_PROCESSORS)?;

        let debug = self.flag(PROP_DEBUG, true)?;
        let ignore_missing_resources = self.flag(PROP_IGNORE_MISSING_RESOURCES, true)?;
        let fingerprint = match self.property_value(PROP_FINGERPRINT) {
            Some(value) => value.parse()?,
            None => FingerprintAlgorithm::default(),
        };

        Ok(RuntimeConfiguration {
            encoding,
            cache_update_period,
            model_update_period,
            management_id,
            pre_processors,
            post_processors,
            debug,
            ignore_missing_resources,
            fingerprint,
        })
    }

    /// A property value, treating blank strings as unset.
    fn property_value(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn seconds(&self, key: &'static str) -> Result<u64, ConfigError> {
        match self.property_value(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                key,
                value: value.to_string(),
            }),
            None => Ok(0),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.property_value(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag {
                key,
                value: value.to_string(),
            }),
        }
    }

    fn processors(
        &self,
        registry: &ProcessorRegistry,
        key: &'static str,
    ) -> Result<Vec<ProcessorRef>, ConfigError> {
        match self.property_value(key) {
            Some(list) => registry
                .resolve_list(list)
                .map_err(|source| ConfigError::UnknownProcessor { key, source }),
            None => Ok(Vec::new()),
        }
    }
}
