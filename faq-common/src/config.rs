//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (handled by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! compiled defaults apply.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Environment variable naming the root folder (highest env priority)
pub const ROOT_FOLDER_ENV: &str = "FAQ_PIPELINE_ROOT_FOLDER";
/// Short alias for [`ROOT_FOLDER_ENV`]
pub const ROOT_ENV: &str = "FAQ_PIPELINE_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "faq_pipeline.db";

/// Compiled defaults used when no other source provides a value
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub bind_address: String,
}

impl CompiledDefaults {
    /// Defaults for the platform the binary was built for
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join("faq-pipeline"))
            .unwrap_or_else(|| PathBuf::from("./faq_pipeline_data"));

        Self {
            root_folder,
            log_level: "info".to_string(),
            bind_address: "127.0.0.1:5740".to_string(),
        }
    }
}

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Routing and calibration tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    pub calibration_samples_required: Option<i64>,
    pub auto_approve_threshold: Option<f64>,
    pub spot_check_threshold: Option<f64>,
    pub duplicate_similarity_threshold: Option<f64>,
    pub adaptive_learning: Option<bool>,
}

/// Base URLs of the external collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServicesSection {
    pub generator_url: Option<String>,
    pub comparison_url: Option<String>,
    pub faq_store_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Contents of `<module>.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub services: ServicesSection,
}

/// Path of the TOML file for a module, if one exists
///
/// Looks in the user config directory first, then `/etc` on Linux.
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", module_name);

    if let Some(user_path) = dirs::config_dir().map(|d| d.join("faq-pipeline").join(&file_name)) {
        if user_path.exists() {
            return Some(user_path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_path = PathBuf::from("/etc/faq-pipeline").join(&file_name);
        if system_path.exists() {
            return Some(system_path);
        }
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the module's TOML file, falling back to defaults on any problem
pub fn load_module_config(module_name: &str, explicit_path: Option<&Path>) -> TomlConfig {
    let path = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => config_file_path(module_name),
    };

    match path {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => {
                debug!("Loaded config file: {}", path.display());
                config
            }
            Err(e) => {
                warn!("{} - using defaults", e);
                TomlConfig::default()
            }
        },
        None => {
            debug!("No config file for {} - using defaults", module_name);
            TomlConfig::default()
        }
    }
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root folder (database location) for a module
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// Resolve without a CLI override
    pub fn resolve(&self) -> PathBuf {
        self.resolve_with(None)
    }

    /// Resolve with an optional CLI override (highest priority)
    pub fn resolve_with(&self, cli_arg: Option<&Path>) -> PathBuf {
        self.resolve_from(cli_arg, &load_module_config(&self.module_name, None))
    }

    /// Resolve against an already loaded TOML config
    pub fn resolve_from(&self, cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return PathBuf::from(value);
                }
            }
        }

        if let Some(root) = &toml.root_folder {
            return root.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Prepares the resolved root folder for use
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
