use crate::common::error::{FaceGateError, Result};
use image::DynamicImage;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Flat-file image store with two namespaces: per-identity reference
/// images at `images/<identity>/<identity>_<n>.jpg` and login probe
/// images at `scratch/live_<n>.jpg`. Saves overwrite silently; reads
/// come back in directory-listing order.
#[derive(Clone)]
pub struct ImageStore {
    images_dir: PathBuf,
    scratch_dir: PathBuf,
    scratch_leases: Arc<AtomicUsize>,
}

/// Counted guard over the scratch namespace. A login session holds
/// one for its duration; the cleaner skips purges while any are held.
pub struct ScratchLease {
    leases: Arc<AtomicUsize>,
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ImageStore {
    pub fn new(images_dir: PathBuf, scratch_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&images_dir)?;
        fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            images_dir,
            scratch_dir,
            scratch_leases: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn identity_dir(&self, identity: &str) -> PathBuf {
        self.images_dir.join(identity)
    }

    pub fn identity_exists(&self, identity: &str) -> bool {
        self.identity_dir(identity).is_dir()
    }

    /// Persist a reference frame for `identity` under the given
    /// ordinal. Overwrites any existing file at that ordinal.
    pub fn save_reference(&self, identity: &str, ordinal: u32, frame: &DynamicImage) -> Result<PathBuf> {
        let dir = self.identity_dir(identity);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_{}.jpg", identity, ordinal));
        frame.save(&path)?;
        Ok(path)
    }

    /// Persist a login probe frame under the given ordinal.
    pub fn save_probe(&self, ordinal: u32, frame: &DynamicImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.scratch_dir)?;
        let path = self.scratch_dir.join(format!("live_{}.jpg", ordinal));
        frame.save(&path)?;
        Ok(path)
    }

    /// All decodable reference images for `identity`, in
    /// directory-listing order. The identity must have a directory.
    pub fn load_reference_images(&self, identity: &str) -> Result<Vec<DynamicImage>> {
        let dir = self.identity_dir(identity);
        if !dir.is_dir() {
            return Err(FaceGateError::NoReferenceImages(identity.to_string()));
        }
        self.load_dir(&dir)
    }

    /// All decodable probe images currently in the scratch namespace,
    /// in directory-listing order.
    pub fn load_probe_images(&self) -> Result<Vec<DynamicImage>> {
        if !self.scratch_dir.is_dir() {
            return Ok(Vec::new());
        }
        self.load_dir(&self.scratch_dir)
    }

    fn load_dir(&self, dir: &std::path::Path) -> Result<Vec<DynamicImage>> {
        let mut images = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jpg") {
                continue;
            }
            match image::open(&path) {
                Ok(img) => images.push(img),
                Err(e) => {
                    tracing::warn!("Skipping undecodable image {:?}: {}", path, e);
                }
            }
        }
        Ok(images)
    }

    /// Delete every file in the scratch namespace. Not session-aware;
    /// callers that must not lose in-flight probes hold a lease and
    /// the cleaner checks it before calling this.
    pub fn purge_scratch(&self) -> Result<usize> {
        if !self.scratch_dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.scratch_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn scratch_lease(&self) -> ScratchLease {
        self.scratch_leases.fetch_add(1, Ordering::SeqCst);
        ScratchLease {
            leases: Arc::clone(&self.scratch_leases),
        }
    }

    pub fn scratch_in_use(&self) -> bool {
        self.scratch_leases.load(Ordering::SeqCst) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn solid_frame(value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([value, value, value])))
    }

    fn temp_store(tag: &str) -> ImageStore {
        let base = std::env::temp_dir().join(format!(
            "facegate-store-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&base);
        ImageStore::new(base.join("images"), base.join("scratch")).unwrap()
    }

    #[test]
    fn reference_files_follow_the_identity_layout() {
        let store = temp_store("layout");
        let path = store.save_reference("ana", 3, &solid_frame(128)).unwrap();
        assert!(path.ends_with("ana/ana_3.jpg"));
        assert!(path.is_file());
        assert!(store.identity_exists("ana"));
        assert!(!store.identity_exists("bruno"));
    }

    #[test]
    fn probe_files_land_in_scratch() {
        let store = temp_store("probe");
        let path = store.save_probe(0, &solid_frame(10)).unwrap();
        assert!(path.ends_with("live_0.jpg"));
        assert_eq!(store.load_probe_images().unwrap().len(), 1);
    }

    #[test]
    fn saving_an_existing_ordinal_overwrites() {
        let store = temp_store("overwrite");
        store.save_probe(0, &solid_frame(10)).unwrap();
        store.save_probe(0, &solid_frame(200)).unwrap();
        let images = store.load_probe_images().unwrap();
        assert_eq!(images.len(), 1);
        // last writer wins
        assert!(images[0].to_luma8().get_pixel(0, 0)[0] > 100);
    }

    #[test]
    fn purge_scratch_removes_everything() {
        let store = temp_store("purge");
        for i in 0..4 {
            store.save_probe(i, &solid_frame(50)).unwrap();
        }
        assert_eq!(store.purge_scratch().unwrap(), 4);
        assert!(store.load_probe_images().unwrap().is_empty());
        assert_eq!(store.purge_scratch().unwrap(), 0);
    }

    #[test]
    fn missing_identity_is_a_no_reference_error() {
        let store = temp_store("missing");
        let err = store.load_reference_images("nobody").unwrap_err();
        assert!(matches!(err, FaceGateError::NoReferenceImages(_)));
    }

    #[test]
    fn lease_counts_nest_and_release() {
        let store = temp_store("lease");
        assert!(!store.scratch_in_use());
        let a = store.scratch_lease();
        let b = store.scratch_lease();
        assert!(store.scratch_in_use());
        drop(a);
        assert!(store.scratch_in_use());
        drop(b);
        assert!(!store.scratch_in_use());
    }
}
