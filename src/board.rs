//! Believed current color of every coordinate on the board.

use std::fmt;

use image::RgbImage;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::palette::{ColorId, Palette};

/// A board coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Read access to canvas colors. `None` means undetermined.
pub trait ColorLookup {
    fn color_at(&self, coord: Coord) -> Option<ColorId>;
}

/// Outcome of applying one snapshot region.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegionReport {
    pub written: usize,
    pub unmatched: usize,
    pub clipped: usize,
    pub first_unmatched: Option<[u8; 3]>,
}

/// Canvas state store.
///
/// Region applications take the write lock for the whole region, so a
/// [`BoardSnapshot`] never sees a half-applied region.
#[derive(Debug)]
pub struct Board {
    width: u32,
    height: u32,
    cells: RwLock<Vec<Option<ColorId>>>,
}

impl Board {
    /// Create a board where every cell holds `background` (or is unknown).
    pub fn new(width: u32, height: u32, background: Option<ColorId>) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            cells: RwLock::new(vec![background; len]),
        }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn contains(&self, coord: Coord) -> bool {
        coord.x < self.width && coord.y < self.height
    }

    fn index(&self, coord: Coord) -> Option<usize> {
        self.contains(coord)
            .then(|| coord.y as usize * self.width as usize + coord.x as usize)
    }

    /// Write a decoded bitmap into the board at `(offset_x, offset_y)`.
    ///
    /// Each pixel is matched exactly against the palette. Pixels without a
    /// palette match mark their cell undetermined; pixels falling outside the
    /// board are counted as clipped. Palette matching happens before the
    /// write lock is taken.
    pub fn apply_region(&self, image: &RgbImage, offset_x: u32, offset_y: u32) -> RegionReport {
        let palette = Palette::global();
        let mut report = RegionReport::default();
        let mut writes = Vec::with_capacity(image.width() as usize * image.height() as usize);

        for (x, y, pixel) in image.enumerate_pixels() {
            let target = offset_x
                .checked_add(x)
                .zip(offset_y.checked_add(y))
                .map(|(x, y)| Coord::new(x, y));
            let Some(index) = target.and_then(|coord| self.index(coord)) else {
                report.clipped += 1;
                continue;
            };
            let color = palette.by_rgb(pixel.0).map(|c| c.id);
            if color.is_none() {
                report.unmatched += 1;
                report.first_unmatched.get_or_insert(pixel.0);
            } else {
                report.written += 1;
            }
            writes.push((index, color));
        }

        let mut cells = self.cells.write();
        for (index, color) in writes {
            cells[index] = color;
        }
        drop(cells);

        if let Some([r, g, b]) = report.first_unmatched {
            tracing::warn!(
                offset_x,
                offset_y,
                unmatched = report.unmatched,
                "region has pixels outside the palette, first #{r:02X}{g:02X}{b:02X}"
            );
        }
        report
    }

    /// Consistent read view for the duration of the returned guard.
    pub fn snapshot(&self) -> BoardSnapshot<'_> {
        BoardSnapshot {
            width: self.width,
            height: self.height,
            cells: self.cells.read(),
        }
    }
}

impl ColorLookup for Board {
    fn color_at(&self, coord: Coord) -> Option<ColorId> {
        let index = self.index(coord)?;
        self.cells.read()[index]
    }
}

/// Read-locked view of the board.
pub struct BoardSnapshot<'a> {
    width: u32,
    height: u32,
    cells: RwLockReadGuard<'a, Vec<Option<ColorId>>>,
}

impl ColorLookup for BoardSnapshot<'_> {
    fn color_at(&self, coord: Coord) -> Option<ColorId> {
        if coord.x >= self.width || coord.y >= self.height {
            return None;
        }
        self.cells[coord.y as usize * self.width as usize + coord.x as usize]
    }
}
