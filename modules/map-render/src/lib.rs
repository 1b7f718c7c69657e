//! Rasterize settlement coordinates into a square world map.

use image::{Rgb, RgbImage};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// What to do with a point that lands outside the canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRange {
    /// Leave it out and list it in the report.
    #[default]
    Skip,
    /// Fail the render without writing anything.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Side length of the canvas in pixels.
    pub size: u32,
    /// Added to both map axes to get a pixel position.
    pub offset: i64,
    pub background: [u8; 3],
    pub marker: [u8; 3],
    pub out_of_range: OutOfRange,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            size: 800,
            offset: 400,
            background: [255, 255, 255],
            marker: [255, 0, 0],
            out_of_range: OutOfRange::Skip,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("canvas size must be positive")]
    EmptyCanvas,
    #[error("{} point(s) outside the {size}x{size} canvas: {}", .points.len(), preview(.points))]
    OutOfRange { size: u32, points: Vec<(i64, i64)> },
    #[error("could not write {}: {source}", .path.display())]
    Write { path: PathBuf, #[source] source: image::ImageError },
}

fn preview(points: &[(i64, i64)]) -> String {
    let mut s = points.iter().take(5).map(|(x, y)| format!("({x}, {y})")).collect::<Vec<_>>().join(", ");
    if points.len() > 5 {
        s.push_str(", ...");
    }
    s
}

pub struct Canvas {
    pub image: RgbImage,
    pub plotted: usize,
    pub skipped: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub path: PathBuf,
    pub plotted: usize,
    pub skipped: Vec<(i64, i64)>,
}

/// Pixel for a map coordinate, or `None` when it falls off the canvas.
pub fn to_canvas(x: i64, y: i64, opts: &RenderOptions) -> Option<(u32, u32)> {
    let size = i64::from(opts.size);
    let cx = x.checked_add(opts.offset)?;
    let cy = y.checked_add(opts.offset)?;
    ((0..size).contains(&cx) && (0..size).contains(&cy)).then(|| (cx as u32, cy as u32))
}

pub fn rasterize(points: &[(i64, i64)], opts: &RenderOptions) -> Result<Canvas, RenderError> {
    if opts.size == 0 {
        return Err(RenderError::EmptyCanvas);
    }
    let mut image = RgbImage::from_pixel(opts.size, opts.size, Rgb(opts.background));
    let mut plotted = 0;
    let mut skipped = Vec::new();
    for &(x, y) in points {
        match to_canvas(x, y, opts) {
            Some((cx, cy)) => {
                image.put_pixel(cx, cy, Rgb(opts.marker));
                plotted += 1;
            }
            None => skipped.push((x, y)),
        }
    }
    if !skipped.is_empty() && opts.out_of_range == OutOfRange::Reject {
        return Err(RenderError::OutOfRange { size: opts.size, points: skipped });
    }
    Ok(Canvas { image, plotted, skipped })
}

/// Rasterize and save; the image format follows the extension of `path`.
pub fn render_to_file(points: &[(i64, i64)], path: &Path, opts: &RenderOptions) -> Result<RenderReport, RenderError> {
    let canvas = rasterize(points, opts)?;
    if !canvas.skipped.is_empty() {
        warn!(count = canvas.skipped.len(), points = %preview(&canvas.skipped), "points outside the canvas were skipped");
    }
    canvas
        .image
        .save(path)
        .map_err(|source| RenderError::Write { path: path.to_path_buf(), source })?;
    Ok(RenderReport { path: path.to_path_buf(), plotted: canvas.plotted, skipped: canvas.skipped })
}
