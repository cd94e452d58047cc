use anyhow::{Context, Result};
use gdal::Dataset;
use std::path::Path;

use crate::model::Gcp;

/// Reads the ground control points embedded in a raster GDAL can open.
pub fn read_gcps(path: &Path) -> Result<Vec<Gcp>> {
    let dataset =
        Dataset::open(path).with_context(|| format!("Failed to open dataset {:?}", path))?;

    let gcps: Vec<Gcp> = dataset
        .gcps()
        .iter()
        .map(|gcp| Gcp {
            id: gcp.id(),
            info: gcp.info(),
            pixel: gcp.pixel(),
            line: gcp.line(),
            x: gcp.x(),
            y: gcp.y(),
            z: gcp.z(),
        })
        .collect();

    if let Some(projection) = dataset.gcp_projection() {
        tracing::debug!("GCP projection of {:?}: {}", path, projection);
    }
    tracing::info!("Read {} GCPs from {:?}", gcps.len(), path);

    Ok(gcps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdal::DriverManager;
    use tempfile::TempDir;

    #[test]
    fn test_missing_dataset_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_gcps(&temp_dir.path().join("missing.tif")).is_err());
    }

    #[test]
    fn test_dataset_without_gcps() {
        let Ok(driver) = DriverManager::get_driver_by_name("GTiff") else {
            eprintln!("Skipping test: GTiff driver not available");
            return;
        };
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.tif");
        driver
            .create_with_band_type::<u8, _>(&path, 4, 4, 1)
            .unwrap();

        assert!(read_gcps(&path).unwrap().is_empty());
    }
}
