//! # Configuration
//!
//! Loads `graft.toml` and merges it with command line overrides.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags
//! 2. Config file (`--config`, else `$GRAFT_CONFIG`, else `./graft.toml` when present)
//! 3. Built-in defaults
//!
//! Every file field is optional; the file only needs the values the user wants
//! to set.

use graft_core::{EdgeFlush, ErrorPolicy, ForwardRefs, GraftError, IngestTags, UpsertOptions};
use serde::de::value::StrDeserializer;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GRAFT_CONFIG";

/// Config file picked up from the working directory when nothing else is named.
pub const DEFAULT_CONFIG_FILE: &str = "graft.toml";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8182/gremlin";
pub const DEFAULT_TRAVERSAL_SOURCE: &str = "g";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TRACKER_PATH: &str = "graft.tracker";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// FILE CONFIG (all Option: absence means "not set in file")
// =============================================================================

/// Top-level structure of `graft.toml`.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// `[remote]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteFileConfig>,

    /// `[tags]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagsFileConfig>,

    /// `[run]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunFileConfig>,

    /// `[tracker]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerFileConfig>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteFileConfig {
    pub endpoint: Option<String>,
    pub traversal_source: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// The four provenance tags. All or none.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TagsFileConfig {
    pub source_data_tag: Option<String>,
    pub source_data_url: Option<String>,
    pub source_analysis_tag: Option<String>,
    pub source_analysis_url: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunFileConfig {
    pub error_policy: Option<ErrorPolicy>,
    pub retry_attempts: Option<u32>,
    pub edge_flush: Option<EdgeFlush>,
    pub forward_refs: Option<ForwardRefs>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerFileConfig {
    pub backend: Option<TrackerKind>,
    pub path: Option<PathBuf>,
}

/// Where tracking state lives between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// In memory only; every run starts empty.
    Memory,
    /// Snapshot file rewritten at the end of each run.
    File,
    /// redb database, committed per write.
    #[default]
    Redb,
}

impl TrackerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Redb => "redb",
        }
    }
}

impl FileConfig {
    /// Parse a config document.
    pub fn parse(text: &str) -> Result<Self, GraftError> {
        toml::from_str(text)
            .map_err(|e| GraftError::SerializationError(format!("Invalid config: {}", e)))
    }

    /// Read and parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, GraftError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            GraftError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(GraftError::SerializationError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            GraftError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Load the file `locate` picks, or an empty config when there is none.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), GraftError> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match locate(explicit, env, Path::new(DEFAULT_CONFIG_FILE)) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Ok((Self::load(&path)?, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, GraftError> {
        toml::to_string_pretty(self)
            .map_err(|e| GraftError::SerializationError(format!("Render config: {}", e)))
    }
}

/// Pick the config file to load.
///
/// An explicit or environment-named file is returned even if it does not
/// exist, so that loading it reports the mistake. The working-directory
/// default is only returned when present.
pub fn locate(explicit: Option<&Path>, env: Option<PathBuf>, fallback: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.as_os_str().is_empty()) {
        return Some(path);
    }
    fallback.is_file().then(|| fallback.to_path_buf())
}

// =============================================================================
// OVERRIDES
// =============================================================================

/// Values given on the command line. `None` defers to the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub tracker: Option<TrackerKind>,
    pub tracker_path: Option<PathBuf>,
    pub error_policy: Option<ErrorPolicy>,
    pub retry_attempts: Option<u32>,
    pub edge_flush: Option<EdgeFlush>,
    pub forward_refs: Option<ForwardRefs>,
}

/// Parse a kebab-case policy name the way the config file spells it.
pub fn parse_choice<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, GraftError> {
    let de: StrDeserializer<'_, serde::de::value::Error> = value.into_deserializer();
    T::deserialize(de).map_err(|e| GraftError::InvalidField {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint: String,
    pub traversal_source: String,
    pub timeout: Duration,
    pub tags: Option<IngestTags>,
    pub error_policy: ErrorPolicy,
    pub options: UpsertOptions,
    pub tracker: TrackerKind,
    pub tracker_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            traversal_source: DEFAULT_TRAVERSAL_SOURCE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            tags: None,
            error_policy: ErrorPolicy::default(),
            options: UpsertOptions::default(),
            tracker: TrackerKind::default(),
            tracker_path: PathBuf::from(DEFAULT_TRACKER_PATH),
        }
    }
}

impl Settings {
    /// Merge `file` under `overrides` on top of the defaults.
    pub fn resolve(file: FileConfig, overrides: &ConfigOverrides) -> Result<Self, GraftError> {
        let mut settings = Self::default();

        if let Some(remote) = file.remote {
            if let Some(endpoint) = remote.endpoint {
                settings.endpoint = endpoint;
            }
            if let Some(source) = remote.traversal_source {
                settings.traversal_source = source;
            }
            if let Some(secs) = remote.timeout_secs {
                settings.timeout = Duration::from_secs(secs);
            }
        }
        if let Some(tags) = file.tags {
            settings.tags = resolve_tags(tags)?;
        }
        if let Some(run) = file.run {
            if let Some(policy) = run.error_policy {
                settings.error_policy = policy;
            }
            if let Some(attempts) = run.retry_attempts {
                settings.options.retry.max_attempts = attempts;
            }
            if let Some(flush) = run.edge_flush {
                settings.options.edge_flush = flush;
            }
            if let Some(refs) = run.forward_refs {
                settings.options.forward_refs = refs;
            }
        }
        if let Some(tracker) = file.tracker {
            if let Some(kind) = tracker.backend {
                settings.tracker = kind;
            }
            if let Some(path) = tracker.path {
                settings.tracker_path = path;
            }
        }

        if let Some(endpoint) = &overrides.endpoint {
            settings.endpoint = endpoint.clone();
        }
        if let Some(kind) = overrides.tracker {
            settings.tracker = kind;
        }
        if let Some(path) = &overrides.tracker_path {
            settings.tracker_path = path.clone();
        }
        if let Some(policy) = overrides.error_policy {
            settings.error_policy = policy;
        }
        if let Some(attempts) = overrides.retry_attempts {
            settings.options.retry.max_attempts = attempts;
        }
        if let Some(flush) = overrides.edge_flush {
            settings.options.edge_flush = flush;
        }
        if let Some(refs) = overrides.forward_refs {
            settings.options.forward_refs = refs;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), GraftError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(GraftError::InvalidField {
                field: "remote.endpoint".to_string(),
                reason: format!("'{}' is not an http(s) URL", self.endpoint),
            });
        }
        if self.traversal_source.is_empty()
            || !self
                .traversal_source
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(GraftError::InvalidField {
                field: "remote.traversal_source".to_string(),
                reason: format!("'{}' is not a plain identifier", self.traversal_source),
            });
        }
        if self.timeout.is_zero() {
            return Err(GraftError::InvalidField {
                field: "remote.timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.options.retry.max_attempts == 0 {
            return Err(GraftError::InvalidField {
                field: "run.retry_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The settings written back as a complete config file.
    pub fn to_file_config(&self) -> FileConfig {
        FileConfig {
            remote: Some(RemoteFileConfig {
                endpoint: Some(self.endpoint.clone()),
                traversal_source: Some(self.traversal_source.clone()),
                timeout_secs: Some(self.timeout.as_secs()),
            }),
            tags: self.tags.as_ref().map(|tags| TagsFileConfig {
                source_data_tag: Some(tags.source_data_tag.clone()),
                source_data_url: Some(tags.source_data_url.clone()),
                source_analysis_tag: Some(tags.source_analysis_tag.clone()),
                source_analysis_url: Some(tags.source_analysis_url.clone()),
            }),
            run: Some(RunFileConfig {
                error_policy: Some(self.error_policy),
                retry_attempts: Some(self.options.retry.max_attempts),
                edge_flush: Some(self.options.edge_flush),
                forward_refs: Some(self.options.forward_refs),
            }),
            tracker: Some(TrackerFileConfig {
                backend: Some(self.tracker),
                path: Some(self.tracker_path.clone()),
            }),
        }
    }
}

fn resolve_tags(tags: TagsFileConfig) -> Result<Option<IngestTags>, GraftError> {
    match (
        tags.source_data_tag,
        tags.source_data_url,
        tags.source_analysis_tag,
        tags.source_analysis_url,
    ) {
        (Some(data_tag), Some(data_url), Some(analysis_tag), Some(analysis_url)) => Ok(Some(
            IngestTags::new(data_tag, data_url, analysis_tag, analysis_url),
        )),
        (None, None, None, None) => Ok(None),
        _ => Err(GraftError::InvalidField {
            field: "tags".to_string(),
            reason: "set all four tags or none".to_string(),
        }),
    }
}

// =============================================================================
// TESTS
// =============================================================================
