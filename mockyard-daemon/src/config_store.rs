//! Filesystem-backed store of named JSON configurations.
//!
//! Every configuration is one `<name>.json` file in the configs directory.
//! Uploads are staged in a separate directory and moved into place with
//! no-clobber semantics, so an existing configuration is never overwritten
//! and a failed upload leaves nothing behind.

mod name;

pub use name::{CONFIG_EXTENSION, ConfigName, MAX_NAME_LEN};

use std::fs;
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mockyard_protocol::protocol::{ConfigInfo, MAX_CONFIG_SIZE};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::errors::{DaemonError, Result};

/// Answers "is this configuration backing a live instance", implemented by
/// the instance registry.
pub trait ConfigUsage: Send + Sync {
    fn is_config_in_use(&self, name: &ConfigName) -> bool;

    /// Run `action` while no instance can claim `name`.
    ///
    /// Fails with `ConfigInUse` without running `action` if an instance
    /// already references the configuration.
    fn while_unused(
        &self,
        name: &ConfigName,
        action: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()>;
}

/// Metadata of a stored configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConfig {
    pub name: ConfigName,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub in_use: bool,
}

impl StoredConfig {
    pub fn to_info(&self) -> ConfigInfo {
        ConfigInfo {
            name: self.name.to_string(),
            size: format_file_size(self.size_bytes),
            size_bytes: self.size_bytes,
            modified: self.modified,
            in_use: self.in_use,
        }
    }
}

pub struct ConfigStore {
    configs_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl ConfigStore {
    /// Open the store, creating both directories if needed
    pub fn open(configs_dir: impl Into<PathBuf>, uploads_dir: impl Into<PathBuf>) -> Result<Self> {
        let configs_dir = configs_dir.into();
        let uploads_dir = uploads_dir.into();
        fs::create_dir_all(&configs_dir)?;
        fs::create_dir_all(&uploads_dir)?;
        debug!(
            "Config store at {:?} (uploads staged in {:?})",
            configs_dir, uploads_dir
        );
        Ok(Self {
            configs_dir,
            uploads_dir,
        })
    }

    pub fn configs_dir(&self) -> &Path {
        &self.configs_dir
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn path_of(&self, name: &ConfigName) -> PathBuf {
        self.configs_dir.join(name.as_str())
    }

    /// Look up an existing configuration by its client-supplied name
    pub fn resolve(&self, raw_name: &str) -> Result<(ConfigName, PathBuf)> {
        let name = parse_lookup(raw_name)?;
        let path = self.path_of(&name);
        if !path.is_file() {
            return Err(DaemonError::ConfigNotFound(raw_name.to_string()));
        }
        Ok((name, path))
    }

    /// All stored configurations, sorted by name
    pub fn list(&self, usage: &dyn ConfigUsage) -> Result<Vec<StoredConfig>> {
        let mut configs = Vec::new();

        for entry in fs::read_dir(&self.configs_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(ConfigName::parse) else {
                continue;
            };

            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    // Deleted between read_dir and stat
                    debug!("Skipping {}: {}", name, e);
                    continue;
                }
            };

            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            configs.push(StoredConfig {
                in_use: usage.is_config_in_use(&name),
                name,
                size_bytes: metadata.len(),
                modified,
            });
        }

        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    /// Start an upload.
    ///
    /// The file is accepted when it is declared as `application/json` or its
    /// name ends in `.json`; the name is sanitized here, once.
    pub fn begin_upload(&self, file_name: &str, content_type: Option<&str>) -> Result<StagedUpload> {
        let declared_json = content_type
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
        if !declared_json && !file_name.ends_with(CONFIG_EXTENSION) {
            return Err(DaemonError::InvalidFormat(
                "Only JSON files are allowed".to_string(),
            ));
        }

        let name = ConfigName::sanitize(file_name).ok_or_else(|| {
            DaemonError::InvalidFormat(format!(
                "File name {:?} must end in {}",
                file_name, CONFIG_EXTENSION
            ))
        })?;

        let target = self.path_of(&name);
        if target.exists() {
            return Err(DaemonError::DuplicateName(name));
        }

        let file = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(".part")
            .tempfile_in(&self.uploads_dir)?;

        Ok(StagedUpload {
            name,
            target,
            file,
            written: 0,
        })
    }

    /// Store `content` under `file_name` in one step
    pub fn upload(&self, file_name: &str, content: &[u8]) -> Result<StoredConfig> {
        let mut staged = self.begin_upload(file_name, None)?;
        staged.write_chunk(content)?;
        staged.commit()
    }

    /// Delete a configuration that no instance is using
    pub fn delete(&self, raw_name: &str, usage: &dyn ConfigUsage) -> Result<ConfigName> {
        let (name, path) = self.resolve(raw_name)?;

        usage.while_unused(&name, &mut || {
            fs::remove_file(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DaemonError::ConfigNotFound(raw_name.to_string())
                } else {
                    DaemonError::Io(e)
                }
            })
        })?;

        info!("Deleted configuration {}", name);
        Ok(name)
    }

    /// Read a configuration back as a JSON document
    pub fn download(&self, raw_name: &str) -> Result<serde_json::Value> {
        let (name, path) = self.resolve(raw_name)?;
        let content = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::ConfigNotFound(raw_name.to_string())
            } else {
                DaemonError::Io(e)
            }
        })?;
        serde_json::from_slice(&content).map_err(|e| {
            DaemonError::Internal(format!("Stored configuration {} is not valid JSON: {}", name, e))
        })
    }
}

fn parse_lookup(raw_name: &str) -> Result<ConfigName> {
    ConfigName::parse(raw_name).ok_or_else(|| DaemonError::ConfigNotFound(raw_name.to_string()))
}

/// An upload in progress.
///
/// Bytes land in a temporary file inside the uploads directory. Dropping the
/// value without calling [`StagedUpload::commit`] removes that file.
#[derive(Debug)]
pub struct StagedUpload {
    name: ConfigName,
    target: PathBuf,
    file: NamedTempFile,
    written: u64,
}

impl StagedUpload {
    pub fn name(&self) -> &ConfigName {
        &self.name
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let total = self.written + chunk.len() as u64;
        if total > MAX_CONFIG_SIZE {
            return Err(DaemonError::InvalidFormat(format!(
                "File exceeds the {} limit",
                format_file_size(MAX_CONFIG_SIZE)
            )));
        }
        self.file.write_all(chunk)?;
        self.written = total;
        Ok(())
    }

    /// Validate the staged bytes as JSON and move them into the configs
    /// directory, failing with `DuplicateName` if the name was taken meanwhile.
    pub fn commit(mut self) -> Result<StoredConfig> {
        self.file.flush()?;
        self.file.as_file_mut().seek(SeekFrom::Start(0))?;

        let reader = BufReader::new(self.file.as_file());
        serde_json::from_reader::<_, serde::de::IgnoredAny>(reader)
            .map_err(|e| DaemonError::InvalidFormat(format!("Not valid JSON: {}", e)))?;

        let Self {
            name, target, file, ..
        } = self;

        let stored = match file.persist_noclobber(&target) {
            Ok(stored) => stored,
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                // `e.file` is dropped here, removing the staged copy
                return Err(DaemonError::DuplicateName(name));
            }
            Err(e) => {
                warn!("Failed to move upload into place as {}: {}", name, e.error);
                return Err(DaemonError::Io(e.error));
            }
        };

        let metadata = stored.metadata()?;
        info!("Stored configuration {} ({} bytes)", name, metadata.len());

        Ok(StoredConfig {
            name,
            size_bytes: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            in_use: false,
        })
    }
}

/// Human readable size in base 1024: "0 Bytes", "512 Bytes", "1.5 KB"
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
