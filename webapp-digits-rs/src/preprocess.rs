// file: preprocess.rs
// desc: turn a canvas snapshot into the centred 28x28 image the classifier expects

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::canvas::{BACKGROUND, Region, SURFACE_SIZE};
use crate::error::{RecognizerError, Result};

pub const IMAGE_SIDE: usize = 28;

// The glyph's long side fills 24 of the 28 pixels, leaving a 2 pixel margin
const GLYPH_SIDE: u32 = 24;
const INK_DISTANCE: f32 = 40.0;
const INK_ALPHA: u8 = 128;
const PADDING_RATIO: f32 = 0.2;
const NOISE_FLOOR: f32 = 0.05;
const MIN_CONTRAST_PEAK: f32 = 0.1;

/// Row-major 28x28 intensities in [0, 1], single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    values: Vec<f32>,
}

impl NormalizedImage {
    pub fn zeros() -> Self {
        Self {
            values: vec![0.0; IMAGE_SIDE * IMAGE_SIDE],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * IMAGE_SIDE + x]
    }

    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }
}

/// Inclusive bounding box of ink pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InkBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// A pixel counts as ink when it is opaque enough and far enough from the
/// background colour. Anti-aliased stroke edges that are still close to the
/// background fall below the distance threshold.
pub fn is_ink(pixel: &Rgba<u8>) -> bool {
    let [r, g, b, a] = pixel.0;
    let distance = [r, g, b]
        .iter()
        .zip(BACKGROUND.0.iter())
        .map(|(&c, &bg)| (c as f32 - bg as f32).powi(2))
        .sum::<f32>()
        .sqrt();

    distance > INK_DISTANCE && a > INK_ALPHA
}

pub fn find_ink_bounds(image: &RgbaImage) -> Option<InkBounds> {
    let mut bounds: Option<InkBounds> = None;

    for (x, y, pixel) in image.enumerate_pixels() {
        if !is_ink(pixel) {
            continue;
        }
        bounds = Some(match bounds {
            None => InkBounds { min_x: x, min_y: y, max_x: x, max_y: y },
            Some(b) => InkBounds {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        });
    }

    bounds
}

/// Grow the box by 20% of its larger span on every side, clamped to the
/// image. The result is never narrower or shorter than one pixel.
pub fn pad_bounds(bounds: InkBounds, width: u32, height: u32) -> Region {
    let span = (bounds.max_x - bounds.min_x).max(bounds.max_y - bounds.min_y) as f32;
    let pad = span * PADDING_RATIO;

    let x0 = (bounds.min_x as f32 - pad).max(0.0).floor() as u32;
    let y0 = (bounds.min_y as f32 - pad).max(0.0).floor() as u32;
    let x1 = ((bounds.max_x + 1) as f32 + pad).min(width as f32).ceil() as u32;
    let y1 = ((bounds.max_y + 1) as f32 + pad).min(height as f32).ceil() as u32;

    Region {
        x: x0,
        y: y0,
        width: x1.saturating_sub(x0).max(1),
        height: y1.saturating_sub(y0).max(1),
    }
}

/// Binarize `region`, scale it into the 24x24 glyph box keeping its aspect
/// ratio, centre it on a black 28x28 frame and stretch the contrast.
pub fn normalize_region(image: &RgbaImage, region: Region) -> NormalizedImage {
    let binary = GrayImage::from_fn(region.width, region.height, |x, y| {
        if is_ink(image.get_pixel(region.x + x, region.y + y)) {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let scale = (GLYPH_SIDE as f32 / region.width as f32).min(GLYPH_SIDE as f32 / region.height as f32);
    let glyph_width = ((region.width as f32 * scale).round() as u32).clamp(1, GLYPH_SIDE);
    let glyph_height = ((region.height as f32 * scale).round() as u32).clamp(1, GLYPH_SIDE);
    let glyph = imageops::resize(&binary, glyph_width, glyph_height, FilterType::Lanczos3);

    let side = IMAGE_SIDE as u32;
    let mut framed = GrayImage::new(side, side);
    let offset_x = (side - glyph_width) / 2;
    let offset_y = (side - glyph_height) / 2;
    imageops::replace(&mut framed, &glyph, offset_x as i64, offset_y as i64);

    let mut values: Vec<f32> = framed.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
    stretch_contrast(&mut values);

    NormalizedImage { values }
}

/// Full pipeline. An image without ink yields all zeros.
pub fn normalize(image: &RgbaImage) -> NormalizedImage {
    let (width, height) = image.dimensions();
    match find_ink_bounds(image) {
        Some(bounds) => normalize_region(image, pad_bounds(bounds, width, height)),
        None => NormalizedImage::zeros(),
    }
}

/// Validate a surface snapshot and normalize it. `Ok(None)` means nothing
/// was drawn.
pub fn prepare(snapshot: &RgbaImage) -> Result<Option<NormalizedImage>> {
    let (width, height) = snapshot.dimensions();
    if (width, height) != (SURFACE_SIZE, SURFACE_SIZE) {
        return Err(RecognizerError::Preprocess(format!(
            "snapshot is {}x{}, expected {}x{}",
            width, height, SURFACE_SIZE, SURFACE_SIZE
        )));
    }

    Ok(find_ink_bounds(snapshot).map(|bounds| normalize_region(snapshot, pad_bounds(bounds, width, height))))
}

fn stretch_contrast(values: &mut [f32]) {
    let (min, max) = values
        .iter()
        .filter(|&&v| v > NOISE_FLOOR)
        .fold((1.0f32, 0.0f32), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let stretch = max > min && max > MIN_CONTRAST_PEAK;
    let range = max - min;

    for v in values.iter_mut() {
        if *v <= NOISE_FLOOR {
            *v = 0.0;
        } else if stretch {
            *v = ((*v - min) / range).clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawingSurface, INK, Point};

    fn blank() -> RgbaImage {
        RgbaImage::from_pixel(SURFACE_SIZE, SURFACE_SIZE, BACKGROUND)
    }

    fn toward_ink(fraction: f32) -> Rgba<u8> {
        let mut pixel = BACKGROUND;
        for c in 0..3 {
            let bg = BACKGROUND.0[c] as f32;
            pixel.0[c] = (bg + (INK.0[c] as f32 - bg) * fraction).round() as u8;
        }
        pixel
    }

    fn assert_well_formed(image: &NormalizedImage) {
        assert_eq!(image.as_slice().len(), IMAGE_SIDE * IMAGE_SIDE);
        for &v in image.as_slice() {
            assert!(v.is_finite(), "non-finite value {v}");
            assert!((0.0..=1.0).contains(&v), "value {v} out of range");
        }
    }

    fn draw_seven(surface: &mut DrawingSurface) {
        surface.begin_stroke(Point::new(120.0, 100.0));
        surface.extend_stroke(Point::new(280.0, 100.0));
        surface.extend_stroke(Point::new(180.0, 320.0));
        surface.end_stroke();
    }

    #[test]
    fn ink_detection_thresholds() {
        assert!(!is_ink(&BACKGROUND));
        assert!(is_ink(&INK));
        // faint anti-aliasing fringe stays background
        assert!(!is_ink(&toward_ink(0.1)));
        assert!(is_ink(&toward_ink(0.5)));

        let mut translucent = INK;
        translucent.0[3] = 128;
        assert!(!is_ink(&translucent));
    }

    #[test]
    fn empty_canvas_is_all_zero() {
        let image = normalize(&blank());
        assert_eq!(image, NormalizedImage::zeros());
        assert!(image.is_blank());
        assert_eq!(find_ink_bounds(&blank()), None);
        assert_eq!(prepare(&blank()), Ok(None));
    }

    #[test]
    fn normalization_is_deterministic() {
        let mut surface = DrawingSurface::new();
        draw_seven(&mut surface);

        let first = normalize(&surface.snapshot());
        let second = normalize(&surface.snapshot());
        assert_eq!(first, second);
        assert!(!first.is_blank());
    }

    #[test]
    fn single_pixel_dot_is_well_formed() {
        let mut image = blank();
        image.put_pixel(200, 200, INK);

        let bounds = find_ink_bounds(&image).unwrap();
        assert_eq!(bounds, InkBounds { min_x: 200, min_y: 200, max_x: 200, max_y: 200 });
        let region = pad_bounds(bounds, SURFACE_SIZE, SURFACE_SIZE);
        assert!(region.width >= 1 && region.height >= 1);

        let normalized = normalize(&image);
        assert_well_formed(&normalized);
        assert!(normalized.get(14, 14) > 0.0);
    }

    #[test]
    fn full_canvas_diagonal_is_well_formed() {
        let mut surface = DrawingSurface::new();
        surface.begin_stroke(Point::new(0.0, 0.0));
        surface.extend_stroke(Point::new(399.0, 399.0));
        surface.end_stroke();

        let normalized = normalize(&surface.snapshot());
        assert_well_formed(&normalized);
        assert!(!normalized.is_blank());
    }

    #[test]
    fn thin_horizontal_line_is_well_formed() {
        let mut image = blank();
        for x in 50..=350 {
            image.put_pixel(x, 200, INK);
        }

        let region = pad_bounds(find_ink_bounds(&image).unwrap(), SURFACE_SIZE, SURFACE_SIZE);
        assert_eq!((region.x, region.width), (0, SURFACE_SIZE));
        assert_eq!((region.y, region.height), (140, 121));

        let normalized = normalize(&image);
        assert_well_formed(&normalized);
        assert!(!normalized.is_blank());
    }

    #[test]
    fn padding_is_clamped_to_canvas() {
        let bounds = InkBounds { min_x: 5, min_y: 10, max_x: 105, max_y: 390 };
        let region = pad_bounds(bounds, SURFACE_SIZE, SURFACE_SIZE);
        assert_eq!(region.x, 0);
        assert_eq!(region.y, 0);
        assert_eq!(region.x + region.width, 182);
        assert_eq!(region.y + region.height, SURFACE_SIZE);
    }

    #[test]
    fn centred_circle_fills_the_middle() {
        let mut image = blank();
        let radius = 143.0f32;
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let (dx, dy) = (x as f32 + 0.5 - 200.0, y as f32 + 0.5 - 200.0);
            if dx * dx + dy * dy <= radius * radius {
                *pixel = INK;
            }
        }

        let bounds = find_ink_bounds(&image).unwrap();
        assert!(bounds.min_x > 0 && bounds.min_y > 0);
        assert!(bounds.max_x < SURFACE_SIZE - 1 && bounds.max_y < SURFACE_SIZE - 1);

        let normalized = normalize(&image);
        assert_well_formed(&normalized);
        assert_eq!(normalized.get(14, 14), 1.0);
        for i in 0..IMAGE_SIDE {
            for edge in [0, 1, IMAGE_SIDE - 2, IMAGE_SIDE - 1] {
                assert_eq!(normalized.get(i, edge), 0.0);
                assert_eq!(normalized.get(edge, i), 0.0);
            }
        }
    }

    #[test]
    fn cleared_surface_matches_fresh_one() {
        let mut surface = DrawingSurface::new();
        draw_seven(&mut surface);
        surface.clear();

        assert_eq!(normalize(&surface.snapshot()), normalize(&DrawingSurface::new().snapshot()));
        assert!(normalize(&surface.snapshot()).is_blank());
    }

    #[test]
    fn contrast_stretch_ignores_noise_floor() {
        let mut values = vec![0.0, 0.04, 0.2, 0.6];
        stretch_contrast(&mut values);
        assert_eq!(values, vec![0.0, 0.0, 0.0, 1.0]);

        // flat ink is left as is
        let mut flat = vec![0.03, 0.8, 0.8];
        stretch_contrast(&mut flat);
        assert_eq!(flat, vec![0.0, 0.8, 0.8]);
    }

    #[test]
    fn prepare_rejects_wrong_snapshot_size() {
        let small = RgbaImage::from_pixel(100, 100, BACKGROUND);
        assert!(matches!(prepare(&small), Err(RecognizerError::Preprocess(_))));
    }
}
