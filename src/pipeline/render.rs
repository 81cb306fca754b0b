//! Command line of the conversion stage (`pdftops` or Ghostscript).
//!
//! The device profile decides the PostScript language level and font
//! handling; the job options decide page geometry. Without a profile the
//! converter runs with its own defaults and only the input/output arguments.
//!
//! ## Geometry
//!
//! When the job asks to fit the document to the page and the profile has a
//! selected page size, the converter is told the paper size explicitly,
//! turned sideways for quarter-turn orientations. Otherwise `pdftops` keeps
//! each page at its original size so mixed-size documents print correctly.

use crate::config::{FilterConfig, Renderer};
use crate::pipeline::options::JobOptions;
use crate::profile::{DeviceProfile, LanguageLevel, PageGeometry};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Page rotation requested by the job, in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Rotation {
    #[default]
    None,
    /// 90 degrees.
    Quarter,
    /// 180 degrees.
    Half,
    /// 270 degrees (-90).
    ThreeQuarter,
}

impl Rotation {
    /// Map an IPP `orientation-requested` value. 3 = portrait, 4 = landscape,
    /// 5 = reverse landscape, 6 = reverse portrait. Non-numeric values mean
    /// no rotation.
    pub fn from_ipp(value: &str) -> Self {
        let Ok(code) = value.trim().parse::<i64>() else {
            return Rotation::None;
        };
        let mut index = (code - 3).rem_euclid(4);
        if index >= 2 {
            index ^= 1;
        }
        Self::from_index(index)
    }

    fn from_index(index: i64) -> Self {
        match index {
            1 => Rotation::Quarter,
            2 => Rotation::Half,
            3 => Rotation::ThreeQuarter,
            _ => Rotation::None,
        }
    }

    /// Quarter turns, 0 to 3.
    pub fn index(&self) -> u8 {
        match self {
            Rotation::None => 0,
            Rotation::Quarter => 1,
            Rotation::Half => 2,
            Rotation::ThreeQuarter => 3,
        }
    }

    /// Width and height trade places on odd quarter turns.
    pub fn swaps_axes(&self) -> bool {
        self.index() & 1 == 1
    }
}

/// Rotation requested by the job options.
///
/// A `landscape` option wins whenever present: true means a quarter turn,
/// false means none, and `orientation-requested` is not consulted.
pub fn requested_rotation(options: &JobOptions) -> Rotation {
    if let Some(landscape) = options.flag("landscape") {
        return if landscape {
            Rotation::Quarter
        } else {
            Rotation::None
        };
    }
    options
        .get("orientation-requested")
        .map(Rotation::from_ipp)
        .unwrap_or_default()
}

/// The job asks to scale the document to the page. `fitplot` shadows
/// `fit-to-page` whenever it is present.
pub fn fit_requested(options: &JobOptions) -> bool {
    options
        .flag("fitplot")
        .or_else(|| options.flag("fit-to-page"))
        .unwrap_or(false)
}

/// Paper dimensions in whole points, after rotation.
pub fn oriented_dimensions(size: &PageGeometry, rotation: Rotation) -> (String, String) {
    let (w, h) = if rotation.swaps_axes() {
        (size.length, size.width)
    } else {
        (size.width, size.length)
    };
    (format!("{w:.0}"), format!("{h:.0}"))
}

/// Full argument vector of the conversion stage, argv[0] included.
pub fn conversion_args(
    config: &FilterConfig,
    profile: Option<&DeviceProfile>,
    options: &JobOptions,
    input: &Path,
) -> Vec<String> {
    let args = match config.renderer {
        Renderer::Pdftops => pdftops_args(config, profile, options, input),
        Renderer::Ghostscript => ghostscript_args(config, profile, options, input),
    };
    debug!("{} command line: {}", config.renderer.name(), args.join(" "));
    args
}

fn pdftops_args(
    config: &FilterConfig,
    profile: Option<&DeviceProfile>,
    options: &JobOptions,
    input: &Path,
) -> Vec<String> {
    let mut args = vec![Renderer::Pdftops.name().to_string()];

    if let Some(profile) = profile {
        match profile.language_level {
            LanguageLevel::Level1 => args.extend(["-level1", "-noembtt"].map(String::from)),
            LanguageLevel::Level2 => {
                args.push("-level2".into());
                if !profile.truetype_rasterizer {
                    args.push("-noembtt".into());
                }
            }
            // level 3 output from pdftops is rejected by some HP printers
            LanguageLevel::Level3 => args.push("-level2".into()),
        }

        match profile.page_size.as_ref().filter(|_| fit_requested(options)) {
            Some(size) => {
                let (w, h) = oriented_dimensions(size, requested_rotation(options));
                args.extend(["-paperw".into(), w, "-paperh".into(), h, "-expand".into()]);
            }
            None if config.native_page_sizes => args.push("-origpagesizes".into()),
            None => {}
        }
    }

    args.push(input.display().to_string());
    args.push("-".into());
    args
}

fn ghostscript_args(
    config: &FilterConfig,
    profile: Option<&DeviceProfile>,
    options: &JobOptions,
    input: &Path,
) -> Vec<String> {
    let device = if config.ps2write { "ps2write" } else { "pswrite" };
    let mut args: Vec<String> = vec![
        Renderer::Ghostscript.name().into(),
        "-q".into(),
        "-dNOPAUSE".into(),
        "-dBATCH".into(),
        "-dSAFER".into(),
        format!("-sDEVICE={device}"),
        "-sOUTPUTFILE=%stdout".into(),
    ];

    if let Some(profile) = profile {
        let level = match profile.language_level {
            LanguageLevel::Level1 => 1,
            LanguageLevel::Level2 => 2,
            LanguageLevel::Level3 => 3,
        };
        args.push(format!("-dLanguageLevel={level}"));

        if let Some(size) = profile.page_size.as_ref().filter(|_| fit_requested(options)) {
            let (w, h) = oriented_dimensions(size, requested_rotation(options));
            args.push(format!("-dDEVICEWIDTHPOINTS={w}"));
            args.push(format!("-dDEVICEHEIGHTPOINTS={h}"));
        }
    }

    if options.flag("psdebug") == Some(true) {
        debug!("Deactivated compression of pages and fonts in Ghostscript's PostScript output (\"psdebug\" debug mode)");
        args.extend(["-dCompressPages=false", "-dCompressFonts=false"].map(String::from));
    }

    let brother = profile
        .and_then(|p| p.manufacturer.as_deref())
        .and_then(|m| m.get(..7))
        .is_some_and(|m| m.eq_ignore_ascii_case("Brother"));
    if brother {
        // BR-Script cannot decode CCITTFax images
        debug!("Deactivated CCITT encoding for Brother printer");
        args.extend(["-dNoT3CCITT", "-dEncodeMonoImages=false"].map(String::from));
    }

    args.extend(["-c", "save pop", "-f"].map(String::from));
    args.push(input.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a4_profile(level: LanguageLevel) -> DeviceProfile {
        DeviceProfile {
            language_level: level,
            manufacturer: Some("Generic".into()),
            page_size: Some(PageGeometry {
                name: "A4".into(),
                width: 595.0,
                length: 842.0,
            }),
            truetype_rasterizer: false,
        }
    }

    fn args(config: &FilterConfig, profile: Option<&DeviceProfile>, options: &str) -> Vec<String> {
        conversion_args(config, profile, &JobOptions::parse(options), Path::new("/tmp/job.pdf"))
    }

    #[test]
    fn test_orientation_mapping() {
        assert_eq!(Rotation::from_ipp("3").index(), 0);
        assert_eq!(Rotation::from_ipp("4").index(), 1);
        assert_eq!(Rotation::from_ipp("5").index(), 3);
        assert_eq!(Rotation::from_ipp("6").index(), 2);
        assert_eq!(Rotation::from_ipp("portrait"), Rotation::None);
    }

    #[test]
    fn test_swap_only_on_quarter_turns() {
        let size = PageGeometry {
            name: "A4".into(),
            width: 595.0,
            length: 842.0,
        };
        for code in ["3", "4", "5", "6"] {
            let rotation = Rotation::from_ipp(code);
            let (w, _) = oriented_dimensions(&size, rotation);
            assert_eq!(w == "842", rotation.index() % 2 == 1, "code {code}");
        }
    }

    #[test]
    fn test_landscape_shadows_orientation_requested() {
        let opts = JobOptions::parse("nolandscape orientation-requested=4");
        assert_eq!(requested_rotation(&opts), Rotation::None);
        let opts = JobOptions::parse("landscape orientation-requested=6");
        assert_eq!(requested_rotation(&opts), Rotation::Quarter);
    }

    #[test]
    fn test_fit_tri_state() {
        assert!(!fit_requested(&JobOptions::parse("")));
        assert!(fit_requested(&JobOptions::parse("fit-to-page")));
        assert!(!fit_requested(&JobOptions::parse("fit-to-page=OFF")));
        assert!(fit_requested(&JobOptions::parse("fitplot=yes")));
        assert!(!fit_requested(&JobOptions::parse("fitplot=no fit-to-page")));
    }

    #[test]
    fn test_pdftops_levels() {
        let config = FilterConfig::default();
        let l1 = args(&config, Some(&a4_profile(LanguageLevel::Level1)), "");
        assert_eq!(&l1[1..3], ["-level1", "-noembtt"]);

        let mut p2 = a4_profile(LanguageLevel::Level2);
        assert_eq!(&args(&config, Some(&p2), "")[1..3], ["-level2", "-noembtt"]);
        p2.truetype_rasterizer = true;
        assert_eq!(&args(&config, Some(&p2), "")[1..3], ["-level2", "-origpagesizes"]);

        let l3 = args(&config, Some(&a4_profile(LanguageLevel::Level3)), "");
        assert_eq!(l3[1], "-level2");
        assert!(!l3.contains(&"-noembtt".to_string()));
    }

    #[test]
    fn test_pdftops_fit_landscape() {
        let config = FilterConfig::default();
        let a = args(&config, Some(&a4_profile(LanguageLevel::Level3)), "fit-to-page landscape");
        assert_eq!(
            a,
            [
                "pdftops", "-level2", "-paperw", "842", "-paperh", "595", "-expand",
                "/tmp/job.pdf", "-"
            ]
        );
    }

    #[test]
    fn test_pdftops_without_profile() {
        let a = args(&FilterConfig::default(), None, "fit-to-page landscape");
        assert_eq!(a, ["pdftops", "/tmp/job.pdf", "-"]);
    }

    #[test]
    fn test_native_page_sizes_can_be_disabled() {
        let config = FilterConfig::builder().native_page_sizes(false).build().unwrap();
        let a = args(&config, Some(&a4_profile(LanguageLevel::Level3)), "");
        assert_eq!(a, ["pdftops", "-level2", "/tmp/job.pdf", "-"]);
    }

    #[test]
    fn test_fit_without_page_size_keeps_original_sizes() {
        let mut profile = a4_profile(LanguageLevel::Level3);
        profile.page_size = None;
        let a = args(&FilterConfig::default(), Some(&profile), "fitplot");
        assert!(a.contains(&"-origpagesizes".to_string()));
    }

    #[test]
    fn test_ghostscript_args() {
        let config = FilterConfig::builder()
            .renderer(Renderer::Ghostscript)
            .build()
            .unwrap();
        let a = args(
            &config,
            Some(&a4_profile(LanguageLevel::Level3)),
            "fitplot orientation-requested=5 psdebug",
        );
        assert_eq!(
            a,
            [
                "gs",
                "-q",
                "-dNOPAUSE",
                "-dBATCH",
                "-dSAFER",
                "-sDEVICE=ps2write",
                "-sOUTPUTFILE=%stdout",
                "-dLanguageLevel=3",
                "-dDEVICEWIDTHPOINTS=842",
                "-dDEVICEHEIGHTPOINTS=595",
                "-dCompressPages=false",
                "-dCompressFonts=false",
                "-c",
                "save pop",
                "-f",
                "/tmp/job.pdf",
            ]
        );
    }

    #[test]
    fn test_ghostscript_brother_and_pswrite() {
        let config = FilterConfig::builder()
            .renderer(Renderer::Ghostscript)
            .ps2write(false)
            .build()
            .unwrap();
        let mut profile = a4_profile(LanguageLevel::Level2);
        profile.manufacturer = Some("Brother".into());
        let a = args(&config, Some(&profile), "psdebug=false");
        assert!(a.contains(&"-sDEVICE=pswrite".to_string()));
        assert!(a.contains(&"-dNoT3CCITT".to_string()));
        assert!(a.contains(&"-dEncodeMonoImages=false".to_string()));
        assert!(!a.contains(&"-dCompressPages=false".to_string()));
    }
}
