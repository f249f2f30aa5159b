use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tempfile::Builder;
use zip::ZipArchive;

use crate::config::ArchiveSource;
use crate::error::TrackerError;
use crate::orchestrator::{ProgressEvent, ProgressSink};
use crate::store::Store;

pub trait ArchiveClient: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<(), TrackerError>;
}

#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
}

impl ArchiveHttpClient {
    pub fn new() -> Result<Self, TrackerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dengue-tracker/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TrackerError::ArchiveHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| TrackerError::ArchiveHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArchiveClient for ArchiveHttpClient {
    fn download(&self, url: &str, destination: &Path) -> Result<(), TrackerError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| TrackerError::ArchiveHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "archive request failed".to_string());
            return Err(TrackerError::ArchiveStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| TrackerError::Filesystem(err.to_string()))?;
        io::copy(&mut response, &mut file)
            .map_err(|err| TrackerError::ArchiveHttp(err.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveOutcome {
    pub name: String,
    pub action: String,
    pub path: String,
}

/// Makes every configured archive available, unpacked, in the data directory.
///
/// Already-extracted archives are left alone. Zips are kept in the user cache
/// so a second project does not download them again.
pub fn prepare_archives<C: ArchiveClient>(
    client: &C,
    store: &Store,
    sources: &[ArchiveSource],
    sink: &dyn ProgressSink,
) -> Result<Vec<ArchiveOutcome>, TrackerError> {
    store.ensure_data_root()?;
    store.ensure_cache_root()?;

    let mut outcomes = Vec::new();
    for source in sources {
        let extract_dir = store.extract_dir(&source.extract_dir);
        if extract_dir.as_std_path().exists() {
            sink.event(ProgressEvent::message(format!(
                "{}: already extracted",
                source.name
            )));
            outcomes.push(ArchiveOutcome {
                name: source.name.clone(),
                action: "present".to_string(),
                path: extract_dir.to_string(),
            });
            continue;
        }

        let cache_path = store.archive_cache_path(&source.name);
        let cached = cache_path.as_std_path().exists() && validate_zip(cache_path.as_std_path()).is_ok();
        if !cached {
            sink.event(ProgressEvent::message(format!("{}: downloading", source.name)));
            tracing::info!(name = %source.name, url = %source.url, "downloading archive");
            let parent = cache_path
                .parent()
                .ok_or_else(|| TrackerError::Filesystem("invalid cache path".to_string()))?;
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
            let temp = Builder::new()
                .prefix("dengue-tracker-archive")
                .tempfile_in(parent.as_std_path())
                .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
            client.download(&source.url, temp.path())?;
            validate_zip(temp.path())?;
            temp.persist(cache_path.as_std_path())
                .map_err(|err| TrackerError::Filesystem(err.error.to_string()))?;
        }

        sink.event(ProgressEvent::message(format!("{}: extracting", source.name)));
        let staging = Builder::new()
            .prefix("dengue-tracker-extract")
            .tempdir_in(store.data_root().as_std_path())
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
        extract_zip(cache_path.as_std_path(), staging.path())?;
        let staged = staging.keep();
        fs::rename(&staged, extract_dir.as_std_path())
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;

        outcomes.push(ArchiveOutcome {
            name: source.name.clone(),
            action: if cached { "cache" } else { "download" }.to_string(),
            path: extract_dir.to_string(),
        });
    }
    Ok(outcomes)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), TrackerError> {
    let file = File::open(zip_path).map_err(|err| {
        TrackerError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| TrackerError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(TrackerError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| TrackerError::Filesystem(err.to_string()))?;
        }
        let mut outfile = File::create(&entry_path)
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Reads every entry to the end so truncated downloads are caught early.
pub fn validate_zip(zip_path: &Path) -> Result<(), TrackerError> {
    let file = File::open(zip_path).map_err(|err| {
        TrackerError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| TrackerError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| TrackerError::Filesystem(err.to_string()))?;
    }
    Ok(())
}
