use image::{imageops::FilterType, DynamicImage, GrayImage};

/// Centered sums-of-squares below this are treated as zero variance
/// (a solid-color window).
const VARIANCE_EPS: f64 = 1e-3;

/// Visual similarity of two images, independent of resolution
/// mismatch: both are converted to grayscale, the smaller slides over
/// the larger, and the best zero-mean normalized cross-correlation
/// over all alignment offsets is returned. Range [-1, 1]; positively
/// correlated inputs stay within [0, 1].
pub fn similarity(a: &DynamicImage, b: &DynamicImage) -> f32 {
    best_alignment_score(&a.to_luma8(), &b.to_luma8())
}

pub fn best_alignment_score(a: &GrayImage, b: &GrayImage) -> f32 {
    let (aw, ah) = a.dimensions();
    let (bw, bh) = b.dimensions();
    if aw == 0 || ah == 0 || bw == 0 || bh == 0 {
        return 0.0;
    }

    let (search, template) = if bw <= aw && bh <= ah {
        (a.clone(), b.clone())
    } else if aw <= bw && ah <= bh {
        (b.clone(), a.clone())
    } else {
        // Neither contains the other; shrink the smaller-area image
        // to the common box and slide it over the larger one.
        let tw = aw.min(bw);
        let th = ah.min(bh);
        if (aw as u64 * ah as u64) >= (bw as u64 * bh as u64) {
            (a.clone(), image::imageops::resize(b, tw, th, FilterType::Triangle))
        } else {
            (b.clone(), image::imageops::resize(a, tw, th, FilterType::Triangle))
        }
    };

    let (sw, sh) = search.dimensions();
    let (tw, th) = template.dimensions();
    let n = (tw as f64) * (th as f64);

    let t_pixels = template.as_raw();
    let t_sum: f64 = t_pixels.iter().map(|&p| p as f64).sum();
    let t_mean = t_sum / n;
    let t_css: f64 = t_pixels
        .iter()
        .map(|&p| {
            let d = p as f64 - t_mean;
            d * d
        })
        .sum();

    let mut best = f32::MIN;
    for oy in 0..=(sh - th) {
        for ox in 0..=(sw - tw) {
            let score = zncc_at(&search, &template, ox, oy, t_mean, t_css, n);
            if score > best {
                best = score;
            }
        }
    }
    best
}

fn zncc_at(
    search: &GrayImage,
    template: &GrayImage,
    ox: u32,
    oy: u32,
    t_mean: f64,
    t_css: f64,
    n: f64,
) -> f32 {
    let (tw, th) = template.dimensions();

    let mut w_sum = 0.0f64;
    for y in 0..th {
        for x in 0..tw {
            w_sum += search.get_pixel(ox + x, oy + y)[0] as f64;
        }
    }
    let w_mean = w_sum / n;

    let mut numerator = 0.0f64;
    let mut w_css = 0.0f64;
    for y in 0..th {
        for x in 0..tw {
            let w = search.get_pixel(ox + x, oy + y)[0] as f64 - w_mean;
            let t = template.get_pixel(x, y)[0] as f64 - t_mean;
            numerator += w * t;
            w_css += w * w;
        }
    }

    if t_css < VARIANCE_EPS && w_css < VARIANCE_EPS {
        // Two solid-color patches: correlation is undefined, compare
        // brightness instead.
        return if (w_mean - t_mean).abs() <= 1.0 { 1.0 } else { 0.0 };
    }

    let denominator = (w_css * t_css).sqrt();
    if denominator < VARIANCE_EPS {
        return 0.0;
    }
    (numerator / denominator) as f32
}
