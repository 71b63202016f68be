use crate::core::locator::FaceRect;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent},
    terminal::{self, ClearType},
};
use image::DynamicImage;
use std::io::{self, Write};

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

/// Terminal renderer for live capture preview. Frames are drawn as a
/// brightness-mapped character grid with the first detected face
/// boxed and a capture progress bar overlaid.
pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Half resolution keeps redraw cheap.
        Self {
            width: width.unwrap_or((term_width / 2).min(DEFAULT_WIDTH / 2)),
            height: height.unwrap_or((term_height.saturating_sub(5) / 2).min(DEFAULT_HEIGHT / 2)),
        }
    }

    pub fn render_frame_with_progress(
        &self,
        image: &DynamicImage,
        faces: &[FaceRect],
        stored: u32,
        target: u32,
    ) -> String {
        let mut grid = self.image_to_ascii(image);

        if let Some(face) = faces.first() {
            let img_width = image.width() as f32;
            let img_height = image.height() as f32;

            let face_x1 = ((face.x / img_width) * self.width as f32) as usize;
            let face_x2 = ((face.right() / img_width) * self.width as f32) as usize;
            let face_y1 = ((face.y / img_height) * self.height as f32) as usize;
            let face_center_x = (face_x1 + face_x2) / 2;

            let msg = if stored < target { "Hold still" } else { "Complete!" };
            let msg_y = face_y1.saturating_sub(2);
            self.overlay_text(&mut grid, msg, face_center_x, msg_y);

            let bar = self.create_progress_bar(stored, target);
            let bar_y = face_y1.saturating_sub(1);
            self.overlay_text(&mut grid, &bar, face_center_x, bar_y);

            self.draw_face_box(&mut grid, face, img_width, img_height);
        }
        // No face: just the plain frame, so brief detection dropouts
        // do not flash messages.

        self.grid_to_string(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();

        for term_y in 0..self.height {
            for term_x in 0..self.width {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0];
                    let char_idx = (brightness as usize * (ASCII_RAMP.len() - 1)) / 255;
                    grid[term_y][term_x] = ASCII_RAMP.chars().nth(char_idx).unwrap_or(' ');
                }
            }
        }

        grid
    }

    fn create_progress_bar(&self, stored: u32, target: u32) -> String {
        let slots = target.min(10) as usize;
        let filled = if target == 0 {
            0
        } else {
            (stored as usize * slots / target as usize).min(slots)
        };
        format!("[{}{}]", "■".repeat(filled), "□".repeat(slots - filled))
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }

        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    fn draw_face_box(&self, grid: &mut [Vec<char>], face: &FaceRect, img_width: f32, img_height: f32) {
        let x1 = ((face.x / img_width) * self.width as f32) as usize;
        let x2 = ((face.right() / img_width) * self.width as f32) as usize;
        let y1 = ((face.y / img_height) * self.height as f32) as usize;
        let y2 = ((face.bottom() / img_height) * self.height as f32) as usize;

        if y1 < self.height && x1 < self.width {
            grid[y1][x1] = '┌';
        }
        if y1 < self.height && x2 < self.width {
            grid[y1][x2.saturating_sub(1)] = '┐';
        }
        if y2 < self.height && x1 < self.width {
            grid[y2.saturating_sub(1)][x1] = '└';
        }
        if y2 < self.height && x2 < self.width {
            grid[y2.saturating_sub(1)][x2.saturating_sub(1)] = '┘';
        }

        for x in (x1 + 1)..(x2.saturating_sub(1)).min(self.width) {
            if y1 < self.height {
                grid[y1][x] = '─';
            }
            if y2.saturating_sub(1) < self.height {
                grid[y2.saturating_sub(1)][x] = '─';
            }
        }

        for y in (y1 + 1)..(y2.saturating_sub(1)).min(self.height) {
            if x1 < self.width {
                grid[y][x1] = '│';
            }
            if x2.saturating_sub(1) < self.width {
                grid[y][x2.saturating_sub(1)] = '│';
            }
        }
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().take(self.width).collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

pub fn clear_screen() -> io::Result<()> {
    crossterm::execute!(
        io::stdout(),
        terminal::Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    io::stdout().flush()
}

/// Non-blocking Esc poll; the foreground loop uses it to cancel the
/// running session.
pub fn check_for_escape() -> io::Result<bool> {
    if event::poll(std::time::Duration::from_millis(0))? {
        if let Event::Key(KeyEvent { code, .. }) = event::read()? {
            return Ok(code == KeyCode::Esc);
        }
    }
    Ok(false)
}
