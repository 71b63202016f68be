use crate::common::error::{FaceGateError, Result};
use crate::core::similarity::similarity;
use crate::storage::ImageStore;
use image::DynamicImage;

/// Outcome of one login attempt. Produced once per completed login
/// session; a rejection has no retry logic behind it, the caller runs
/// a whole new capture session instead.
#[derive(Debug, Clone)]
pub struct AuthVerdict {
    pub identity: String,
    pub accepted: bool,
    pub average_similarity: f32,
    pub comparisons: usize,
}

/// Compare the scratch probe set against `identity`'s stored
/// reference set and decide against `threshold` (inclusive).
pub fn authenticate(store: &ImageStore, identity: &str, threshold: f32) -> Result<AuthVerdict> {
    let references = store.load_reference_images(identity)?;
    if references.is_empty() {
        return Err(FaceGateError::NoReferenceImages(identity.to_string()));
    }

    let probes = store.load_probe_images()?;
    if probes.is_empty() {
        return Err(FaceGateError::NoProbeImages);
    }

    let verdict = decide(identity, &references, &probes, threshold);
    tracing::info!(
        "Login decision for {}: {} (average similarity {:.3} over {} comparisons)",
        identity,
        if verdict.accepted { "accepted" } else { "rejected" },
        verdict.average_similarity,
        verdict.comparisons,
    );
    Ok(verdict)
}

/// Unweighted mean over every probe/reference pair. Both sets must be
/// non-empty; the public entry point guarantees that.
pub fn decide(
    identity: &str,
    references: &[DynamicImage],
    probes: &[DynamicImage],
    threshold: f32,
) -> AuthVerdict {
    let mut sum = 0.0f64;
    let mut comparisons = 0usize;
    for probe in probes {
        for reference in references {
            sum += similarity(probe, reference) as f64;
            comparisons += 1;
        }
    }

    let average_similarity = (sum / comparisons as f64) as f32;
    AuthVerdict {
        identity: identity.to_string(),
        accepted: average_similarity >= threshold,
        average_similarity,
        comparisons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma};

    fn solid(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(image::GrayImage::from_pixel(16, 16, Luma([value])))
    }

    fn textured(seed: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(image::GrayImage::from_fn(16, 16, |x, y| {
            Luma([((x * seed + y * 3) % 256) as u8])
        }))
    }

    #[test]
    fn all_pairs_are_compared() {
        let references = vec![textured(5), textured(5), textured(5)];
        let probes = vec![textured(5); 5];
        let verdict = decide("ana", &references, &probes, 0.3);
        assert_eq!(verdict.comparisons, 15);
        assert!(verdict.accepted);
    }

    #[test]
    fn identical_sets_average_to_one() {
        let references = vec![solid(128), solid(128)];
        let probes = vec![solid(128), solid(128), solid(128)];
        let verdict = decide("ana", &references, &probes, 0.3);
        assert!((verdict.average_similarity - 1.0).abs() < 1e-5);
        assert!(verdict.accepted);
    }

    #[test]
    fn average_exactly_at_threshold_accepts() {
        // Half the probes match perfectly (score 1.0), half are solid
        // against solid of a different brightness (score 0.0); the
        // average lands exactly on 0.5.
        let references = vec![solid(128)];
        let probes = vec![solid(128), solid(10)];
        let verdict = decide("ana", &references, &probes, 0.5);
        assert!((verdict.average_similarity - 0.5).abs() < 1e-6);
        assert!(verdict.accepted, "inclusive comparison must accept");
    }

    #[test]
    fn mismatched_probes_reject() {
        let references = vec![solid(128)];
        let probes = vec![solid(10), solid(240)];
        let verdict = decide("ana", &references, &probes, 0.3);
        assert!(!verdict.accepted);
        assert!(verdict.average_similarity < 0.3);
    }
}
