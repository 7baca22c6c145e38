//! OSRM container for integration tests.
//!
//! Needs Docker. The Bristol extract is downloaded and preprocessed on
//! first use into `$OSRM_DATA_DIR` (default `osrm-data`) and reused after.

use std::env;
use std::time::{Duration, Instant, UNIX_EPOCH};

use testcontainers::core::{IntoContainerPort, Mount};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, GenericImage, ImageExt, ReuseDirective, TestcontainersError};

use crawl_planner::osrm::{OsrmClient, OsrmConfig};
use crawl_planner::osrm_data::{GeofabrikRegion, OsrmDataset, OsrmDatasetConfig};
use crawl_planner::traits::DistanceProvider;

use super::bristol_pubs::{OLD_CITY, TEMPLE_MEADS};

pub fn osrm_container() -> Result<(Container<GenericImage>, OsrmClient), TestcontainersError> {
    let data_root = env::var("OSRM_DATA_DIR").unwrap_or_else(|_| "osrm-data".to_string());
    let config = OsrmDatasetConfig::new(GeofabrikRegion::default(), data_root);
    let dataset = OsrmDataset::ensure(&config)
        .map_err(|err| TestcontainersError::other(format!("OSRM prep failed: {err}")))?;

    let mtime = std::fs::metadata(dataset.osrm_base.with_extension("osrm.partition"))
        .ok()
        .and_then(|meta| meta.modified().ok())
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    let container_name = format!("osrm-bristol-foot-{mtime}");

    let image = GenericImage::new("osrm/osrm-backend", "latest")
        .with_exposed_port(5000.tcp())
        .with_mount(Mount::bind_mount(dataset.data_dir.to_string_lossy().to_string(), "/data"))
        .with_cmd(vec![
            "osrm-routed".to_string(),
            "--algorithm".to_string(),
            "mld".to_string(),
            dataset.container_osrm_path(),
        ])
        .with_container_name(container_name)
        .with_startup_timeout(Duration::from_secs(30))
        .with_reuse(ReuseDirective::Always);

    let container = image.start()?;
    let port = container.get_host_port_ipv4(5000.tcp())?;

    let osrm = OsrmClient::new(OsrmConfig {
        base_url: format!("http://127.0.0.1:{port}"),
        profile: config.profile.url_segment().to_string(),
        timeout_secs: 30,
        ..OsrmConfig::default()
    })
    .map_err(|err| TestcontainersError::other(format!("OSRM client failed: {err}")))?;

    wait_until_ready(&osrm);
    Ok((container, osrm))
}

/// Polls a tiny table request until the server answers or 15 s pass.
fn wait_until_ready(osrm: &OsrmClient) {
    let probe = [TEMPLE_MEADS.coordinate(), OLD_CITY[0].coordinate()];
    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(15) {
        if osrm.distance_matrix(&probe, &probe).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(500));
    }
    eprintln!("OSRM not ready after {:?}", started.elapsed());
}
