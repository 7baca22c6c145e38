//! Walking-network dataset preparation for a local OSRM server.
//!
//! Downloads an OpenStreetMap extract from Geofabrik and runs the OSRM
//! toolchain (extract, partition, customize) in Docker with the foot
//! profile. Every step is skipped when its output is already on disk.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::info;

/// Region the pub catalog covers.
pub const DEFAULT_REGION: &str = "europe/united-kingdom/england/bristol";

const OSRM_IMAGE: &str = "osrm/osrm-backend";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeofabrikRegion {
    /// Geofabrik region path, e.g. "europe/united-kingdom/england/bristol".
    pub path: String,
}

impl Default for GeofabrikRegion {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl GeofabrikRegion {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Last path segment, used for directory and file names.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').find(|segment| !segment.is_empty()).unwrap_or("region")
    }

    pub fn url(&self) -> String {
        format!("https://download.geofabrik.de/{}-latest.osm.pbf", self.path.trim_matches('/'))
    }
}

/// Travel profile baked into the prepared graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TravelProfile {
    #[default]
    Foot,
    Bicycle,
}

impl TravelProfile {
    /// Lua profile path inside the OSRM image.
    pub fn lua_path(self) -> &'static str {
        match self {
            Self::Foot => "/opt/foot.lua",
            Self::Bicycle => "/opt/bicycle.lua",
        }
    }

    /// Profile segment for request URLs (see [`crate::osrm::OsrmConfig`]).
    pub fn url_segment(self) -> &'static str {
        match self {
            Self::Foot => "foot",
            Self::Bicycle => "bicycle",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmDatasetConfig {
    pub region: GeofabrikRegion,
    pub data_root: PathBuf,
    pub profile: TravelProfile,
}

impl OsrmDatasetConfig {
    pub fn new(region: GeofabrikRegion, data_root: impl Into<PathBuf>) -> Self {
        Self {
            region,
            data_root: data_root.into(),
            profile: TravelProfile::Foot,
        }
    }

    pub fn with_profile(mut self, profile: TravelProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// Paths of a prepared dataset, ready to be mounted into `osrm-routed`.
#[derive(Debug, Clone)]
pub struct OsrmDataset {
    pub data_dir: PathBuf,
    pub osrm_base: PathBuf,
    pub pbf_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum OsrmDataError {
    #[error("dataset io failed: {0}")]
    Io(#[from] io::Error),

    #[error("extract download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{step} failed: {status}")]
    ProcessFailure { step: &'static str, status: String },
}

/// One stage of the OSRM preprocessing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrepStep {
    Extract,
    Partition,
    Customize,
}

impl PrepStep {
    const PIPELINE: [Self; 3] = [Self::Extract, Self::Partition, Self::Customize];

    fn tool(self) -> &'static str {
        match self {
            Self::Extract => "osrm-extract",
            Self::Partition => "osrm-partition",
            Self::Customize => "osrm-customize",
        }
    }

    /// Files whose presence means this step already ran.
    fn outputs(self) -> &'static [&'static str] {
        match self {
            Self::Extract => &["osrm"],
            Self::Partition => &["osrm.partition", "osrm.cells"],
            Self::Customize => &["osrm.mldgr"],
        }
    }

    fn is_done(self, osrm_base: &Path) -> bool {
        self.outputs()
            .iter()
            .all(|extension| osrm_base.with_extension(extension).exists())
    }

    fn args(self, dataset: &OsrmDataset, profile: TravelProfile) -> Vec<String> {
        let mut args = vec![self.tool().to_string()];
        match self {
            Self::Extract => {
                args.extend(["-p".to_string(), profile.lua_path().to_string()]);
                args.push(container_path(&dataset.pbf_path));
            }
            Self::Partition | Self::Customize => args.push(dataset.container_osrm_path()),
        }
        args
    }
}

impl OsrmDataset {
    /// Makes sure the extract is downloaded and fully preprocessed,
    /// running only the missing steps.
    pub fn ensure(config: &OsrmDatasetConfig) -> Result<Self, OsrmDataError> {
        let region_name = config.region.name();
        let data_root = if config.data_root.is_absolute() {
            config.data_root.clone()
        } else {
            std::env::current_dir()?.join(&config.data_root)
        };
        let data_dir = data_root.join(region_name);
        fs::create_dir_all(&data_dir)?;

        let dataset = Self {
            pbf_path: data_dir.join(format!("{region_name}-latest.osm.pbf")),
            osrm_base: data_dir.join(format!("{region_name}-latest.osrm")),
            data_dir,
        };

        if !dataset.pbf_path.exists() {
            download(&config.region.url(), &dataset.pbf_path)?;
        }
        for step in PrepStep::PIPELINE {
            if step.is_done(&dataset.osrm_base) {
                continue;
            }
            info!(
                step = step.tool(),
                dataset = %dataset.osrm_base.display(),
                "preparing walking network"
            );
            run_in_container(step, &step.args(&dataset, config.profile), &dataset.data_dir)?;
        }
        Ok(dataset)
    }

    /// Dataset path as seen from inside a container mounting `data_dir`
    /// at `/data`.
    pub fn container_osrm_path(&self) -> String {
        container_path(&self.osrm_base)
    }
}

/// Streams `url` to `dest` through a temporary file so an interrupted
/// download is never mistaken for a complete extract.
fn download(url: &str, dest: &Path) -> Result<(), OsrmDataError> {
    info!(%url, "downloading OSM extract");
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;
    let partial = dest.with_extension("part");
    let mut file = BufWriter::new(File::create(&partial)?);
    let written = response.copy_to(&mut file)?;
    file.flush()?;
    drop(file);
    fs::rename(&partial, dest)?;
    info!(bytes = written, "extract saved");
    Ok(())
}

fn run_in_container(step: PrepStep, args: &[String], data_dir: &Path) -> Result<(), OsrmDataError> {
    let volume = format!("{}:/data", data_dir.display());
    let status = Command::new("docker")
        .args(["run", "--rm", "-t", "-v", volume.as_str(), OSRM_IMAGE])
        .args(args)
        .status()?;

    if !status.success() {
        return Err(OsrmDataError::ProcessFailure {
            step: step.tool(),
            status: status.to_string(),
        });
    }
    Ok(())
}

fn container_path(path: &Path) -> String {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    format!("/data/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region_is_bristol() {
        let region = GeofabrikRegion::default();
        assert_eq!(region.name(), "bristol");
        assert_eq!(
            region.url(),
            "https://download.geofabrik.de/europe/united-kingdom/england/bristol-latest.osm.pbf"
        );
    }

    #[test]
    fn test_profiles() {
        let config = OsrmDatasetConfig::new(GeofabrikRegion::default(), "data");
        assert_eq!(config.profile.lua_path(), "/opt/foot.lua");
        assert_eq!(config.profile.url_segment(), "foot");
        let cycling = config.with_profile(TravelProfile::Bicycle);
        assert_eq!(cycling.profile.lua_path(), "/opt/bicycle.lua");
    }

    #[test]
    fn test_extract_uses_profile() {
        let dataset = OsrmDataset {
            data_dir: PathBuf::from("/tmp/bristol"),
            osrm_base: PathBuf::from("/tmp/bristol/bristol-latest.osrm"),
            pbf_path: PathBuf::from("/tmp/bristol/bristol-latest.osm.pbf"),
        };
        assert_eq!(
            PrepStep::Extract.args(&dataset, TravelProfile::Foot),
            vec!["osrm-extract", "-p", "/opt/foot.lua", "/data/bristol-latest.osm.pbf"]
        );
        assert_eq!(
            PrepStep::Customize.args(&dataset, TravelProfile::Foot),
            vec!["osrm-customize", "/data/bristol-latest.osrm"]
        );
    }

    #[test]
    fn test_missing_outputs_mean_step_pending() {
        let base = Path::new("/nonexistent/bristol-latest.osrm");
        assert!(PrepStep::PIPELINE.iter().all(|step| !step.is_done(base)));
    }

    #[test]
    fn test_container_path() {
        assert_eq!(
            container_path(Path::new("/tmp/bristol/bristol-latest.osrm")),
            "/data/bristol-latest.osrm"
        );
    }
}
