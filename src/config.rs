use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::Geocode;
use crate::error::TrackerError;
use crate::fetcher::RetryPolicy;
use crate::request::{RequestDescriptor, build_request};

pub const DEFAULT_CONFIG_FILE: &str = "dengue-tracker.json";
pub const DEFAULT_BASE_URL: &str = "https://info.dengue.mat.br/api/alertcity";
pub const DEFAULT_DISEASE: &str = "dengue";
pub const DEFAULT_FORMAT: &str = "csv";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 20;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api: Option<ApiSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub archives: Option<Vec<ArchiveSource>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
}

/// A reference archive and the data-directory folder it unpacks into.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArchiveSource {
    pub name: String,
    pub url: String,
    pub extract_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub disease: String,
    pub format: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn request(&self, geocode: &Geocode, year: i32, week: u32) -> RequestDescriptor {
        build_request(
            &self.base_url,
            geocode,
            &self.disease,
            &self.format,
            year,
            week,
        )
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            disease: DEFAULT_DISEASE.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api: ApiConfig,
    pub retry: RetryPolicy,
    pub data_dir: Utf8PathBuf,
    pub archives: Vec<ArchiveSource>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `dengue-tracker.json` when present, or the defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TrackerError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TrackerError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TrackerError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TrackerError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let api_section = config.api.unwrap_or_default();
        let api = ApiConfig {
            base_url: api_section
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            disease: api_section
                .disease
                .unwrap_or_else(|| DEFAULT_DISEASE.to_string()),
            format: api_section
                .format
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            timeout: Duration::from_secs(api_section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };
        if api.base_url.trim().is_empty() {
            return Err(TrackerError::InvalidConfig(
                "api.base_url must not be empty".to_string(),
            ));
        }

        let retry_section = config.retry.unwrap_or_default();
        let retry = RetryPolicy {
            max_attempts: retry_section.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            retry_delay: Duration::from_secs(
                retry_section
                    .retry_delay_secs
                    .unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
        };
        if retry.max_attempts == 0 {
            return Err(TrackerError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let data_dir = Utf8PathBuf::from(
            config
                .data_dir
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );
        let archives = config.archives.unwrap_or_else(default_archives);

        Ok(ResolvedConfig {
            schema_version,
            api,
            retry,
            data_dir,
            archives,
        })
    }
}

/// IBGE 2022 territorial division table and Minas Gerais municipal mesh.
pub fn default_archives() -> Vec<ArchiveSource> {
    vec![
        ArchiveSource {
            name: "city_geocodes".to_string(),
            url: "https://geoftp.ibge.gov.br/organizacao_do_territorio/estrutura_territorial/divisao_territorial/2022/DTB_2022.zip".to_string(),
            extract_dir: "city_geocodes".to_string(),
        },
        ArchiveSource {
            name: "geodata_city_locations".to_string(),
            url: "https://geoftp.ibge.gov.br/organizacao_do_territorio/malhas_territoriais/malhas_municipais/municipio_2022/UFs/MG/MG_Municipios_2022.zip".to_string(),
            extract_dir: "geodata_city_locations".to_string(),
        },
    ]
}
