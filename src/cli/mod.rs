pub mod ascii_preview;

pub use ascii_preview::{check_for_escape, clear_screen, AsciiRenderer};

use crate::core::locator::FaceRect;
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Draw hollow boxes around the detected faces, for saved detection
/// snapshots.
pub fn annotate_faces(image: &DynamicImage, faces: &[FaceRect]) -> DynamicImage {
    let mut img = image.to_rgb8();
    let box_color = Rgb([0, 255, 0]);

    for face in faces {
        if face.width <= 0.0 || face.height <= 0.0 {
            continue;
        }

        let x = face.x.max(0.0) as i32;
        let y = face.y.max(0.0) as i32;
        let right = face.right().min(img.width() as f32) as i32;
        let bottom = face.bottom().min(img.height() as f32) as i32;

        let width = (right - x).max(1) as u32;
        let height = (bottom - y).max(1) as u32;

        let rect = Rect::at(x, y).of_size(width, height);
        draw_hollow_rect_mut(&mut img, rect, box_color);

        // Second rectangle one pixel in, for a visible border.
        if width > 2 && height > 2 {
            let inner = Rect::at(x + 1, y + 1).of_size(width - 2, height - 2);
            draw_hollow_rect_mut(&mut img, inner, box_color);
        }
    }

    DynamicImage::ImageRgb8(img)
}
