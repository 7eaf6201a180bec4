//! The fixed set of paintable colors.
//!
//! Built once into a static table; both id and RGB lookups go through
//! precomputed maps.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Numeric color index as used on the wire and in template documents.
pub type ColorId = u8;

/// A paintable color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub id: ColorId,
    pub name: &'static str,
    pub rgb: [u8; 3],
}

impl Color {
    /// Canonical `#RRGGBB` form.
    pub fn hex(&self) -> String {
        let [r, g, b] = self.rgb;
        format!("#{r:02X}{g:02X}{b:02X}")
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

const COLORS: [Color; 32] = [
    Color { id: 0, name: "burgundy", rgb: [0x6D, 0x00, 0x1A] },
    Color { id: 1, name: "dark-red", rgb: [0xBE, 0x00, 0x39] },
    Color { id: 2, name: "red", rgb: [0xFF, 0x45, 0x00] },
    Color { id: 3, name: "orange", rgb: [0xFF, 0xA8, 0x00] },
    Color { id: 4, name: "yellow", rgb: [0xFF, 0xD6, 0x35] },
    Color { id: 5, name: "pale-yellow", rgb: [0xFF, 0xF8, 0xB8] },
    Color { id: 6, name: "dark-green", rgb: [0x00, 0xA3, 0x68] },
    Color { id: 7, name: "green", rgb: [0x00, 0xCC, 0x78] },
    Color { id: 8, name: "light-green", rgb: [0x7E, 0xED, 0x56] },
    Color { id: 9, name: "dark-teal", rgb: [0x00, 0x75, 0x6F] },
    Color { id: 10, name: "teal", rgb: [0x00, 0x9E, 0xAA] },
    Color { id: 11, name: "light-teal", rgb: [0x00, 0xCC, 0xC0] },
    Color { id: 12, name: "dark-blue", rgb: [0x24, 0x50, 0xA4] },
    Color { id: 13, name: "blue", rgb: [0x36, 0x90, 0xEA] },
    Color { id: 14, name: "light-blue", rgb: [0x51, 0xE9, 0xF4] },
    Color { id: 15, name: "indigo", rgb: [0x49, 0x3A, 0xC1] },
    Color { id: 16, name: "periwinkle", rgb: [0x6A, 0x5C, 0xFF] },
    Color { id: 17, name: "lavender", rgb: [0x94, 0xB3, 0xFF] },
    Color { id: 18, name: "dark-purple", rgb: [0x81, 0x1E, 0x9F] },
    Color { id: 19, name: "purple", rgb: [0xB4, 0x4A, 0xC0] },
    Color { id: 20, name: "pale-purple", rgb: [0xE4, 0xAB, 0xFF] },
    Color { id: 21, name: "magenta", rgb: [0xDE, 0x10, 0x7F] },
    Color { id: 22, name: "pink", rgb: [0xFF, 0x38, 0x81] },
    Color { id: 23, name: "light-pink", rgb: [0xFF, 0x99, 0xAA] },
    Color { id: 24, name: "dark-brown", rgb: [0x6D, 0x48, 0x2F] },
    Color { id: 25, name: "brown", rgb: [0x9C, 0x69, 0x26] },
    Color { id: 26, name: "beige", rgb: [0xFF, 0xB4, 0x70] },
    Color { id: 27, name: "black", rgb: [0x00, 0x00, 0x00] },
    Color { id: 28, name: "dark-gray", rgb: [0x51, 0x52, 0x52] },
    Color { id: 29, name: "gray", rgb: [0x89, 0x8D, 0x90] },
    Color { id: 30, name: "light-gray", rgb: [0xD4, 0xD7, 0xD9] },
    Color { id: 31, name: "white", rgb: [0xFF, 0xFF, 0xFF] },
];

/// Id of the color a fresh board is assumed to show.
pub const WHITE: ColorId = 31;

/// Immutable palette with O(1) lookup by id and by exact RGB value.
#[derive(Debug)]
pub struct Palette {
    colors: &'static [Color],
    by_id: HashMap<ColorId, usize>,
    by_rgb: HashMap<[u8; 3], usize>,
}

static PALETTE: LazyLock<Palette> = LazyLock::new(|| Palette::build(&COLORS));

impl Palette {
    fn build(colors: &'static [Color]) -> Self {
        let by_id = colors.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        let by_rgb = colors.iter().enumerate().map(|(i, c)| (c.rgb, i)).collect();
        Self {
            colors,
            by_id,
            by_rgb,
        }
    }

    /// The process-wide palette.
    pub fn global() -> &'static Self {
        &PALETTE
    }

    pub fn colors(&self) -> &'static [Color] {
        self.colors
    }

    pub fn by_id(&self, id: ColorId) -> Option<&'static Color> {
        let colors = self.colors;
        self.by_id.get(&id).map(|&i| &colors[i])
    }

    /// Exact match on an RGB value. No nearest-color fallback.
    pub fn by_rgb(&self, rgb: [u8; 3]) -> Option<&'static Color> {
        let colors = self.colors;
        self.by_rgb.get(&rgb).map(|&i| &colors[i])
    }

    pub fn contains(&self, id: ColorId) -> bool {
        self.by_id.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_color_round_trips_by_id_and_rgb() {
        let palette = Palette::global();
        for color in palette.colors() {
            assert_eq!(palette.by_id(color.id), Some(color));
            assert_eq!(palette.by_rgb(color.rgb), Some(color));
        }
    }

    #[test]
    fn ids_and_values_are_unique() {
        let palette = Palette::global();
        assert_eq!(palette.by_id.len(), palette.colors().len());
        assert_eq!(palette.by_rgb.len(), palette.colors().len());
    }

    #[test]
    fn unknown_lookups_return_none() {
        let palette = Palette::global();
        assert!(palette.by_id(32).is_none());
        assert!(palette.by_id(255).is_none());
        assert!(palette.by_rgb([1, 2, 3]).is_none());
        assert!(!palette.contains(200));
    }

    #[test]
    fn white_is_the_background() {
        let white = Palette::global().by_id(WHITE).unwrap();
        assert_eq!(white.rgb, [255, 255, 255]);
        assert_eq!(white.hex(), "#FFFFFF");
    }

    #[test]
    fn display_includes_name_and_id() {
        let red = Palette::global().by_id(2).unwrap();
        assert_eq!(red.to_string(), "red (2)");
    }
}
