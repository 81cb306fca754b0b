//! Device capability profile, loaded from the printer's PPD file.
//!
//! The filter needs only four facts about the printer: its PostScript
//! language level, its manufacturer (for quirk selection), whether it can
//! rasterize embedded TrueType fonts, and the page size the job will print on.
//! Everything else in the PPD is ignored.
//!
//! ## PPD syntax
//!
//! ```text
//! *Manufacturer: "Kyocera"
//! *LanguageLevel: "3"
//! *TTRasterizer: Type42
//! *DefaultPageSize: A4
//! *PaperDimension A4/A4: "595 842"
//! ```
//!
//! Main keywords start with `*`, an optional option keyword and translation
//! string follow, then `:` and the value. `*%` lines are comments.

use crate::error::FilterError;
use crate::pipeline::options::JobOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// PostScript language level of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LanguageLevel {
    Level1,
    Level2,
    Level3,
}

impl LanguageLevel {
    /// Level named by a `*LanguageLevel` value. Levels above 3 are treated as 3.
    fn from_ppd(value: &str) -> Option<Self> {
        match value.trim().parse::<u32>().ok()? {
            0 => None,
            1 => Some(LanguageLevel::Level1),
            2 => Some(LanguageLevel::Level2),
            _ => Some(LanguageLevel::Level3),
        }
    }
}

/// Imageable page size in PostScript points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageGeometry {
    pub name: String,
    pub width: f64,
    pub length: f64,
}

/// The capabilities of the destination printer that shape the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProfile {
    pub language_level: LanguageLevel,
    pub manufacturer: Option<String>,
    /// Page size selected by the job (or the PPD default).
    pub page_size: Option<PageGeometry>,
    /// The printer can rasterize Type 42 (TrueType) fonts. When false, fonts
    /// must not be embedded as TrueType.
    pub truetype_rasterizer: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            // PPDs without *LanguageLevel describe level 2 devices
            language_level: LanguageLevel::Level2,
            manufacturer: None,
            page_size: None,
            truetype_rasterizer: false,
        }
    }
}

static RE_PPD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\*(?P<kw>[^\s:/%]+)(?:\s+(?P<opt>[^/:]+?))?(?:/[^:]*)?\s*:\s*(?P<val>.*)$")
        .unwrap()
});

impl DeviceProfile {
    /// Read and parse a PPD file, selecting the page size the job asks for.
    pub fn load(path: &Path, options: &JobOptions) -> Result<Self, FilterError> {
        let bytes = std::fs::read(path).map_err(|e| FilterError::ProfileUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let profile = Self::from_ppd_str(&String::from_utf8_lossy(&bytes), options);
        debug!(
            "Loaded PPD \"{}\": level={:?} manufacturer={:?} page={:?}",
            path.display(),
            profile.language_level,
            profile.manufacturer,
            profile.page_size.as_ref().map(|p| p.name.as_str())
        );
        Ok(profile)
    }

    /// Parse PPD text.
    ///
    /// The page size is the first of `PageSize`, `PageRegion` or `media` in
    /// the job options that names a `*PaperDimension`, else the PPD's
    /// `*DefaultPageSize`.
    pub fn from_ppd_str(ppd: &str, options: &JobOptions) -> Self {
        let mut profile = DeviceProfile::default();
        let mut dimensions: HashMap<String, (String, f64, f64)> = HashMap::new();
        let mut default_size: Option<String> = None;

        for line in ppd.lines() {
            let Some(caps) = RE_PPD_LINE.captures(line) else {
                continue;
            };
            let value = unquote(&caps["val"]);
            let option = caps.name("opt").map(|m| m.as_str().trim());

            match (&caps["kw"], option) {
                ("LanguageLevel", None) => {
                    if let Some(level) = LanguageLevel::from_ppd(value) {
                        profile.language_level = level;
                    }
                }
                ("Manufacturer", None) => profile.manufacturer = Some(value.to_string()),
                ("TTRasterizer", None) => {
                    profile.truetype_rasterizer = !value.eq_ignore_ascii_case("None");
                }
                ("DefaultPageSize", None) => default_size = Some(value.to_string()),
                ("DefaultPageRegion", None) if default_size.is_none() => {
                    default_size = Some(value.to_string())
                }
                ("PaperDimension", Some(name)) => {
                    let mut nums = value.split_whitespace().filter_map(|n| n.parse::<f64>().ok());
                    if let (Some(w), Some(l)) = (nums.next(), nums.next()) {
                        dimensions.insert(name.to_ascii_lowercase(), (name.to_string(), w, l));
                    }
                }
                _ => {}
            }
        }

        let requested = ["PageSize", "PageRegion", "media"]
            .iter()
            .filter_map(|key| options.get(key))
            .flat_map(|v| v.split(','))
            .chain(default_size.as_deref())
            .find_map(|name| dimensions.get(&name.trim().to_ascii_lowercase()));

        profile.page_size = requested.map(|(name, width, length)| PageGeometry {
            name: name.clone(),
            width: *width,
            length: *length,
        });
        profile
    }
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PPD: &str = r#"*PPD-Adobe: "4.3"
*% Sample printer description
*Manufacturer: "Kyocera"
*ModelName: "Kyocera FS-1020D"
*LanguageLevel: "3"
*TTRasterizer: Type42
*OpenUI *PageSize/Media Size: PickOne
*DefaultPageSize: A4
*PageSize A4/A4: "<</PageSize[595 842]/ImagingBBox null>>setpagedevice"
*PageSize Letter/US Letter: "<</PageSize[612 792]/ImagingBBox null>>setpagedevice"
*CloseUI: *PageSize
*PaperDimension A4/A4: "595 842"
*PaperDimension Letter/US Letter: "612 792"
"#;

    #[test]
    fn parses_identity_and_capabilities() {
        let p = DeviceProfile::from_ppd_str(PPD, &JobOptions::default());
        assert_eq!(p.manufacturer.as_deref(), Some("Kyocera"));
        assert_eq!(p.language_level, LanguageLevel::Level3);
        assert!(p.truetype_rasterizer);
    }

    #[test]
    fn default_page_size_is_selected() {
        let p = DeviceProfile::from_ppd_str(PPD, &JobOptions::default());
        let size = p.page_size.unwrap();
        assert_eq!(size.name, "A4");
        assert_eq!((size.width, size.length), (595.0, 842.0));
    }

    #[test]
    fn job_options_override_default_size() {
        let p = DeviceProfile::from_ppd_str(PPD, &JobOptions::parse("PageSize=Letter"));
        assert_eq!(p.page_size.unwrap().name, "Letter");

        let p = DeviceProfile::from_ppd_str(PPD, &JobOptions::parse("media=tray1,letter"));
        assert_eq!(p.page_size.unwrap().width, 612.0);
    }

    #[test]
    fn unknown_media_falls_back_to_default() {
        let p = DeviceProfile::from_ppd_str(PPD, &JobOptions::parse("media=Tabloid"));
        assert_eq!(p.page_size.unwrap().name, "A4");
    }

    #[test]
    fn minimal_ppd_uses_defaults() {
        let p = DeviceProfile::from_ppd_str("*PPD-Adobe: \"4.3\"\n", &JobOptions::default());
        assert_eq!(p, DeviceProfile::default());
        assert_eq!(p.language_level, LanguageLevel::Level2);
    }

    #[test]
    fn ttrasterizer_none_means_no_rasterizer() {
        let p = DeviceProfile::from_ppd_str("*TTRasterizer: None\n*LanguageLevel: \"1\"\n", &JobOptions::default());
        assert!(!p.truetype_rasterizer);
        assert_eq!(p.language_level, LanguageLevel::Level1);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = DeviceProfile::load(Path::new("/nonexistent/printer.ppd"), &JobOptions::default())
            .unwrap_err();
        assert!(matches!(err, FilterError::ProfileUnreadable { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.ppd");
        std::fs::write(&path, PPD).unwrap();
        let p = DeviceProfile::load(&path, &JobOptions::default()).unwrap();
        assert_eq!(p.manufacturer.as_deref(), Some("Kyocera"));
    }
}
