//! Virtual background catalog and fills
//!
//! The catalog is a static list loaded from `assets/backgrounds.json` at
//! startup and refreshed periodically; a built-in default list covers the
//! file being absent. Selected backgrounds are turned into frame-sized RGBA
//! fills by [`BackgroundCache`], which falls back to the entry's solid
//! color when the image cannot be loaded. The compositor never sees an
//! unfilled background pixel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Default catalog file, relative to the working directory.
pub const CATALOG_PATH: &str = "assets/backgrounds.json";

/// One catalog entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Background {
    pub id: String,
    pub name: String,
    /// Path to the background image; `None` means solid color only
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    /// Hex color like `"#1d3557"`, used whenever the image is missing or
    /// fails to decode
    pub fallback_color: String,
}

impl Background {
    /// Parse the fallback color; malformed values become mid-gray.
    pub fn fallback_rgb(&self) -> [u8; 3] {
        parse_hex_color(&self.fallback_color).unwrap_or([0x80, 0x80, 0x80])
    }
}

/// Parse `#rrggbb` (leading `#` optional).
fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Load the catalog from `path`, or the built-in defaults when the file is
/// missing or malformed. Startup entry point; periodic refreshes use
/// [`read_catalog`] so a failed re-read keeps the current catalog instead.
pub fn load_catalog(path: &Path) -> Vec<Background> {
    read_catalog(path).unwrap_or_else(default_catalog)
}

/// Read the catalog from `path`. `None` when the file is missing,
/// unparseable or empty.
pub fn read_catalog(path: &Path) -> Option<Vec<Background>> {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Vec<Background>>(&text) {
            Ok(list) if !list.is_empty() => {
                log::info!("Loaded {} backgrounds from {:?}", list.len(), path);
                Some(list)
            }
            Ok(_) => {
                log::warn!("Background catalog {:?} is empty", path);
                None
            }
            Err(e) => {
                log::warn!("Failed to parse background catalog {:?}: {}", path, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Built-in catalog used when no file is present.
pub fn default_catalog() -> Vec<Background> {
    vec![
        Background {
            id: "beach".to_string(),
            name: "Beach".to_string(),
            image_path: Some(PathBuf::from("assets/backgrounds/beach.jpg")),
            fallback_color: "#4a90d9".to_string(),
        },
        Background {
            id: "city".to_string(),
            name: "City Lights".to_string(),
            image_path: Some(PathBuf::from("assets/backgrounds/city.jpg")),
            fallback_color: "#2b2d42".to_string(),
        },
        Background {
            id: "forest".to_string(),
            name: "Forest".to_string(),
            image_path: Some(PathBuf::from("assets/backgrounds/forest.jpg")),
            fallback_color: "#2d6a4f".to_string(),
        },
        Background {
            id: "studio-gray".to_string(),
            name: "Studio Gray".to_string(),
            image_path: None,
            fallback_color: "#6c757d".to_string(),
        },
        Background {
            id: "rose".to_string(),
            name: "Rose".to_string(),
            image_path: None,
            fallback_color: "#e07a9a".to_string(),
        },
    ]
}

/// A background resolved to frame size, ready for the compositor.
pub enum BackgroundFill {
    /// Frame-sized RGBA image
    Image { data: Vec<u8>, width: u32, height: u32 },
    /// Solid color
    Color([u8; 3]),
}

/// Caches resolved fills per (background, frame size). Image decode and
/// resize happen once, not per tick.
#[derive(Default)]
pub struct BackgroundCache {
    fills: HashMap<(String, u32, u32), Arc<BackgroundFill>>,
}

impl BackgroundCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a background to a fill at the given frame size.
    pub fn fill_for(&mut self, background: &Background, width: u32, height: u32) -> Arc<BackgroundFill> {
        let key = (background.id.clone(), width, height);
        if let Some(fill) = self.fills.get(&key) {
            return fill.clone();
        }

        let fill = Arc::new(Self::resolve(background, width, height));
        self.fills.insert(key, fill.clone());
        fill
    }

    fn resolve(background: &Background, width: u32, height: u32) -> BackgroundFill {
        let Some(path) = &background.image_path else {
            return BackgroundFill::Color(background.fallback_rgb());
        };

        match image::open(path) {
            Ok(img) => {
                let resized = image::imageops::resize(
                    &img.to_rgba8(),
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
                BackgroundFill::Image {
                    data: resized.into_raw(),
                    width,
                    height,
                }
            }
            Err(e) => {
                log::warn!(
                    "Background image {:?} failed to load ({}), using fallback color",
                    path,
                    e
                );
                BackgroundFill::Color(background.fallback_rgb())
            }
        }
    }

    /// Drop cached fills (e.g. after a catalog refresh).
    pub fn clear(&mut self) {
        self.fills.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#4a90d9"), Some([0x4a, 0x90, 0xd9]));
        assert_eq!(parse_hex_color("ffffff"), Some([255, 255, 255]));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }

    #[test]
    fn test_fallback_rgb_tolerates_garbage() {
        let bg = Background {
            id: "x".to_string(),
            name: "X".to_string(),
            image_path: None,
            fallback_color: "not-a-color".to_string(),
        };
        assert_eq!(bg.fallback_rgb(), [0x80, 0x80, 0x80]);
    }

    #[test]
    fn test_missing_catalog_yields_defaults() {
        let list = load_catalog(Path::new("/nonexistent/backgrounds.json"));
        assert!(!list.is_empty());
        assert_eq!(list, default_catalog());
    }

    #[test]
    fn test_read_catalog_reports_failure() {
        assert_eq!(read_catalog(Path::new("/nonexistent/backgrounds.json")), None);

        let dir = std::env::temp_dir().join("photobooth-catalog-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(read_catalog(&path), None);

        std::fs::write(&path, "[]").unwrap();
        assert_eq!(read_catalog(&path), None);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_image_falls_back_to_color() {
        let bg = Background {
            id: "ghost".to_string(),
            name: "Ghost".to_string(),
            image_path: Some(PathBuf::from("/nonexistent/ghost.jpg")),
            fallback_color: "#102030".to_string(),
        };
        let mut cache = BackgroundCache::new();
        let fill = cache.fill_for(&bg, 8, 8);
        match fill.as_ref() {
            BackgroundFill::Color(rgb) => assert_eq!(*rgb, [0x10, 0x20, 0x30]),
            BackgroundFill::Image { .. } => panic!("expected color fallback"),
        }
    }

    #[test]
    fn test_cache_returns_same_fill() {
        let bg = &default_catalog()[3];
        let mut cache = BackgroundCache::new();
        let a = cache.fill_for(bg, 4, 4);
        let b = cache.fill_for(bg, 4, 4);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
