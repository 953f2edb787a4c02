//! Confusion-matrix grid figures
//!
//! One panel per class, laid out row-major on a fixed grid; slots past the
//! last class stay blank. Each panel is the class name above the 2×2 matrix,
//! drawn as colored cells normalised to that panel's largest count with the
//! count written in each cell, and no color scale. Text uses a 3×5 bitmap
//! font; lowercase letters are drawn as capitals.

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use super::metrics::{ClassNames, ConfusionMatrix};
use crate::error::{Error, Result};

/// Longest panel title kept, in characters
pub const TITLE_CHARS: usize = 20;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([0, 0, 0]);
const LIGHT_INK: Rgb<u8> = Rgb([255, 255, 255]);

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
// glyph width plus one column of spacing
const ADVANCE: u32 = GLYPH_W + 1;

// viridis, sampled at 0, 0.25, 0.5, 0.75, 1
const VIRIDIS: [[f64; 3]; 5] = [
    [68.0, 1.0, 84.0],
    [59.0, 82.0, 139.0],
    [33.0, 145.0, 140.0],
    [94.0, 201.0, 98.0],
    [253.0, 231.0, 37.0],
];

/// Class name cut to [`TITLE_CHARS`] characters
pub fn truncate_title(name: &str) -> String {
    name.chars().take(TITLE_CHARS).collect()
}

/// One class panel
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionPanel {
    /// Truncated class name
    pub title: String,
    /// Matrix drawn in the panel
    pub matrix: ConfusionMatrix,
}

/// Layout of per-class panels on a rows × cols grid
#[derive(Debug, Clone)]
pub struct ConfusionGrid {
    rows: usize,
    cols: usize,
    panels: Vec<ConfusionPanel>,
}

impl ConfusionGrid {
    /// Lay out one panel per class; rows grow when the grid is too small
    pub fn new(
        class_names: &ClassNames,
        matrices: &[ConfusionMatrix],
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        if class_names.len() != matrices.len() {
            return Err(Error::shape_mismatch(format!(
                "{} class names for {} confusion matrices",
                class_names.len(),
                matrices.len()
            )));
        }
        let cols = cols.max(1);
        let rows = rows.max(matrices.len().div_ceil(cols)).max(1);
        let panels = class_names
            .iter()
            .zip(matrices)
            .map(|(name, matrix)| ConfusionPanel {
                title: truncate_title(name),
                matrix: *matrix,
            })
            .collect();
        Ok(Self { rows, cols, panels })
    }

    /// Grid rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Grid columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Class panels in grid order
    pub fn panels(&self) -> &[ConfusionPanel] {
        &self.panels
    }

    /// Slots left blank after the last class
    pub fn blank_slots(&self) -> usize {
        self.rows * self.cols - self.panels.len()
    }

    /// Draw the grid with `cell_px`-sized matrix cells
    pub fn render(&self, cell_px: u32) -> Figure {
        let layout = PanelLayout::new(cell_px);
        let mut image = RgbImage::from_pixel(
            layout.width * self.cols as u32,
            layout.height * self.rows as u32,
            BACKGROUND,
        );

        for (index, entry) in self.panels.iter().enumerate() {
            let panel_x = (index % self.cols) as u32 * layout.width;
            let panel_y = (index / self.cols) as u32 * layout.height;
            draw_text(
                &mut image,
                &entry.title,
                panel_x + layout.pad,
                panel_y + layout.pad,
                layout.title_scale,
                INK,
            );

            let (origin_x, origin_y) = layout.matrix_origin(panel_x, panel_y);
            let cell = layout.cell;
            let counts = entry.matrix.as_array();
            let peak = counts.iter().flatten().copied().max().unwrap_or(0);
            for (row, values) in counts.iter().enumerate() {
                for (col, &value) in values.iter().enumerate() {
                    let level = if peak == 0 { 0.0 } else { value as f64 / peak as f64 };
                    let x = origin_x + col as u32 * cell;
                    let y = origin_y + row as u32 * cell;
                    fill(&mut image, x, y, cell, colormap(level));
                    // dark ink on the bright end of the ramp
                    let ink = if level > 0.5 { INK } else { LIGHT_INK };
                    draw_count(&mut image, value, x, y, cell, ink);
                }
            }
        }

        Figure {
            image,
            panel_titles: self.panels.iter().map(|p| p.title.clone()).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// Pixel geometry of one panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PanelLayout {
    cell: u32,
    pad: u32,
    title_scale: u32,
    title_height: u32,
    width: u32,
    height: u32,
}

impl PanelLayout {
    fn new(cell_px: u32) -> Self {
        let cell = cell_px.max(1);
        let pad = (cell / 2).max(1);
        let title_scale = (cell / 12).max(1);
        let title_height = (GLYPH_H + 2) * title_scale;
        let title_width = TITLE_CHARS as u32 * ADVANCE * title_scale;
        Self {
            cell,
            pad,
            title_scale,
            title_height,
            width: (2 * cell).max(title_width) + 2 * pad,
            height: title_height + 2 * cell + 2 * pad,
        }
    }

    /// Top-left corner of the matrix cells in a panel at `(x, y)`
    fn matrix_origin(&self, x: u32, y: u32) -> (u32, u32) {
        let slack = self.width - 2 * self.pad - 2 * self.cell;
        (x + self.pad + slack / 2, y + self.pad + self.title_height)
    }
}

fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        '0' => [7, 5, 5, 5, 7],
        '1' => [2, 6, 2, 2, 7],
        '2' => [7, 1, 7, 4, 7],
        '3' => [7, 1, 7, 1, 7],
        '4' => [5, 5, 7, 1, 1],
        '5' => [7, 4, 7, 1, 7],
        '6' => [7, 4, 7, 5, 7],
        '7' => [7, 1, 2, 2, 2],
        '8' => [7, 5, 7, 5, 7],
        '9' => [7, 5, 7, 1, 7],
        'A' => [2, 5, 7, 5, 5],
        'B' => [6, 5, 6, 5, 6],
        'C' => [3, 4, 4, 4, 3],
        'D' => [6, 5, 5, 5, 6],
        'E' => [7, 4, 6, 4, 7],
        'F' => [7, 4, 6, 4, 4],
        'G' => [3, 4, 5, 5, 3],
        'H' => [5, 5, 7, 5, 5],
        'I' => [7, 2, 2, 2, 7],
        'J' => [1, 1, 1, 5, 2],
        'K' => [5, 5, 6, 5, 5],
        'L' => [4, 4, 4, 4, 7],
        'M' => [5, 7, 7, 5, 5],
        'N' => [6, 5, 5, 5, 5],
        'O' => [2, 5, 5, 5, 2],
        'P' => [6, 5, 6, 4, 4],
        'Q' => [2, 5, 5, 6, 3],
        'R' => [6, 5, 6, 5, 5],
        'S' => [3, 4, 2, 1, 6],
        'T' => [7, 2, 2, 2, 2],
        'U' => [5, 5, 5, 5, 7],
        'V' => [5, 5, 5, 5, 2],
        'W' => [5, 5, 7, 7, 5],
        'X' => [5, 5, 2, 5, 5],
        'Y' => [5, 5, 2, 2, 2],
        'Z' => [7, 1, 2, 4, 7],
        ' ' => [0, 0, 0, 0, 0],
        '-' => [0, 0, 7, 0, 0],
        '_' => [0, 0, 0, 0, 7],
        '.' => [0, 0, 0, 0, 2],
        ',' => [0, 0, 0, 2, 4],
        '\'' => [2, 2, 0, 0, 0],
        '/' => [1, 1, 2, 4, 4],
        '(' => [1, 2, 2, 2, 1],
        ')' => [4, 2, 2, 2, 4],
        '&' => [2, 5, 2, 5, 3],
        _ => [7, 1, 2, 0, 2],
    }
}

/// Width in pixels of `chars` glyphs at `scale`
fn text_width(chars: usize, scale: u32) -> u32 {
    (chars as u32 * ADVANCE).saturating_sub(1) * scale
}

fn draw_text(image: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    for (i, c) in text.chars().enumerate() {
        let glyph_x = x + i as u32 * ADVANCE * scale;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 1 {
                    fill(image, glyph_x + col * scale, y + row as u32 * scale, scale, color);
                }
            }
        }
    }
}

/// Center `value` in the cell at the largest scale that fits; skipped when
/// even the smallest does not
fn draw_count(image: &mut RgbImage, value: u64, x: u32, y: u32, cell: u32, color: Rgb<u8>) {
    let digits = value.to_string();
    let fits = |scale: u32| text_width(digits.len(), scale) <= cell && GLYPH_H * scale <= cell;
    let Some(scale) = (1..=(cell / 8).max(1)).rev().find(|&s| fits(s)) else {
        return;
    };
    let offset_x = (cell - text_width(digits.len(), scale)) / 2;
    let offset_y = (cell - GLYPH_H * scale) / 2;
    draw_text(image, &digits, x + offset_x, y + offset_y, scale, color);
}

fn fill(image: &mut RgbImage, x0: u32, y0: u32, size: u32, color: Rgb<u8>) {
    for y in y0..y0 + size {
        for x in x0..x0 + size {
            image.put_pixel(x, y, color);
        }
    }
}

fn colormap(level: f64) -> Rgb<u8> {
    let scaled = level.clamp(0.0, 1.0) * (VIRIDIS.len() - 1) as f64;
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let t = scaled - lower as f64;
    let (a, b) = (VIRIDIS[lower], VIRIDIS[lower + 1]);
    let mix = |i: usize| (a[i] + (b[i] - a[i]) * t).round() as u8;
    Rgb([mix(0), mix(1), mix(2)])
}

/// Rendered composite figure
#[derive(Debug, Clone)]
pub struct Figure {
    /// Pixels
    pub image: RgbImage,
    /// Panel titles in grid order
    pub panel_titles: Vec<String>,
    /// Grid rows
    pub rows: usize,
    /// Grid columns
    pub cols: usize,
}

impl Figure {
    /// PNG encoding of the figure
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(self.image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(bytes)
    }
}
