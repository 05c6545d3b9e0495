// file: canvas.rs
// desc: owned drawing surface and stroke state for freehand digit input

use image::{Rgba, RgbaImage};

// Surface constants. The ink thresholds in preprocess.rs are tuned against
// these, change them together.
pub const SURFACE_SIZE: u32 = 400;
pub const BACKGROUND: Rgba<u8> = Rgba([0x1a, 0x16, 0x25, 0xff]);
pub const INK: Rgba<u8> = Rgba([0xa7, 0x8b, 0xfa, 0xff]);
pub const STROKE_WIDTH: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// On-screen rectangle of the canvas element, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Map a client-space pointer position onto surface pixels. The element
    /// may be displayed larger or smaller than the backing surface.
    pub fn from_client(client_x: f64, client_y: f64, rect: ClientRect, surface_size: u32) -> Self {
        let scale_x = if rect.width > 0.0 { surface_size as f64 / rect.width } else { 1.0 };
        let scale_y = if rect.height > 0.0 { surface_size as f64 / rect.height } else { 1.0 };

        Self {
            x: ((client_x - rect.left) * scale_x) as f32,
            y: ((client_y - rect.top) * scale_y) as f32,
        }
    }
}

/// Axis-aligned pixel rectangle, `x`/`y` inclusive, extent exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrokeState {
    Idle,
    Drawing { last: Point },
}

pub struct DrawingSurface {
    pixels: RgbaImage,
    stroke: StrokeState,
}

impl Default for DrawingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSurface {
    pub fn new() -> Self {
        Self {
            pixels: RgbaImage::from_pixel(SURFACE_SIZE, SURFACE_SIZE, BACKGROUND),
            stroke: StrokeState::Idle,
        }
    }

    pub fn stroke_state(&self) -> StrokeState {
        self.stroke
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.stroke, StrokeState::Drawing { .. })
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Owned copy for the normalization stage, so later strokes cannot
    /// change what a pending prediction sees.
    pub fn snapshot(&self) -> RgbaImage {
        self.pixels.clone()
    }

    /// Start a new stroke at `point`. Nothing is painted until the stroke
    /// is extended.
    pub fn begin_stroke(&mut self, point: Point) {
        self.stroke = StrokeState::Drawing { last: point };
    }

    /// Draw a segment from the last point to `point`. Returns the dirty
    /// region, or `None` if no stroke is active or the segment is off-surface.
    pub fn extend_stroke(&mut self, point: Point) -> Option<Region> {
        let StrokeState::Drawing { last } = self.stroke else {
            return None;
        };

        self.stroke = StrokeState::Drawing { last: point };
        self.stamp_segment(last, point)
    }

    /// Returns whether a stroke was actually active.
    pub fn end_stroke(&mut self) -> bool {
        let was_drawing = self.is_drawing();
        self.stroke = StrokeState::Idle;
        was_drawing
    }

    pub fn clear(&mut self) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = BACKGROUND;
        }
        self.stroke = StrokeState::Idle;
    }

    pub fn full_region(&self) -> Region {
        Region {
            x: 0,
            y: 0,
            width: self.pixels.width(),
            height: self.pixels.height(),
        }
    }

    // Round-capped segment: every pixel within STROKE_WIDTH / 2 of the
    // segment is inked, with one pixel of linear coverage falloff at the edge.
    fn stamp_segment(&mut self, from: Point, to: Point) -> Option<Region> {
        let radius = STROKE_WIDTH / 2.0;
        let reach = radius + 1.0;
        let (width, height) = self.pixels.dimensions();

        let min_x = (from.x.min(to.x) - reach).floor().max(0.0) as u32;
        let min_y = (from.y.min(to.y) - reach).floor().max(0.0) as u32;
        let max_x = ((from.x.max(to.x) + reach).ceil().max(0.0) as u32).min(width);
        let max_y = ((from.y.max(to.y) + reach).ceil().max(0.0) as u32).min(height);

        if min_x >= max_x || min_y >= max_y {
            return None;
        }

        for y in min_y..max_y {
            for x in min_x..max_x {
                let centre = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let coverage = (radius + 0.5 - distance_to_segment(centre, from, to)).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    blend_ink(self.pixels.get_pixel_mut(x, y), coverage);
                }
            }
        }

        Some(Region {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_sq = dx * dx + dy * dy;

    let t = if length_sq > f32::EPSILON {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

fn blend_ink(pixel: &mut Rgba<u8>, coverage: f32) {
    for channel in 0..3 {
        let current = pixel.0[channel] as f32;
        let target = INK.0[channel] as f32;
        pixel.0[channel] = (current + (target - current) * coverage).round() as u8;
    }
    pixel.0[3] = 0xff;
}
