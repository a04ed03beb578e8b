//! Effective display settings for a backend
//!
//! Properties read per module (`module.<name>.*`):
//!
//! | Key              | Default |
//! |------------------|---------|
//! | `xres` / `yres`  | 1024 / 768 |
//! | `minXRes` / `minYRes` | 320 / 200 |
//! | `maxXRes` / `maxYRes` | 4096 / 4096 |
//! | `colorDepth`     | 24 |
//! | `maxColorDepth`  | 32 |

use crate::config::ConfigAccessor;

/// Width used when the client asks for nothing
pub const DEFAULT_WIDTH: u32 = 1024;
/// Height used when the client asks for nothing
pub const DEFAULT_HEIGHT: u32 = 768;
/// Smallest width handed to a backend
pub const DEFAULT_MIN_WIDTH: u32 = 320;
/// Smallest height handed to a backend
pub const DEFAULT_MIN_HEIGHT: u32 = 200;
/// Largest width handed to a backend
pub const DEFAULT_MAX_WIDTH: u32 = 4096;
/// Largest height handed to a backend
pub const DEFAULT_MAX_HEIGHT: u32 = 4096;
/// Depth used when the request is unusable
pub const DEFAULT_COLOR_DEPTH: u32 = 24;
/// Highest depth a module accepts unless configured
pub const DEFAULT_MAX_COLOR_DEPTH: u32 = 32;

/// Colour depths a backend can be asked for
pub const SUPPORTED_COLOR_DEPTHS: [u32; 5] = [8, 15, 16, 24, 32];

/// Resolution limits of one module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ResolutionBounds {
    pub default_width: u32,
    pub default_height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ResolutionBounds {
    fn default() -> Self {
        Self {
            default_width: DEFAULT_WIDTH,
            default_height: DEFAULT_HEIGHT,
            min_width: DEFAULT_MIN_WIDTH,
            min_height: DEFAULT_MIN_HEIGHT,
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

fn module_u32(config: &dyn ConfigAccessor, session_id: u32, module: &str, field: &str, default: u32) -> u32 {
    config
        .get_number(session_id, &format!("module.{}.{}", module, field))
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(default)
}

impl ResolutionBounds {
    /// Read the bounds of `module` for a session
    pub fn for_module(config: &dyn ConfigAccessor, session_id: u32, module: &str) -> Self {
        let get = |field: &str, default: u32| module_u32(config, session_id, module, field, default);

        Self {
            default_width: get("xres", DEFAULT_WIDTH),
            default_height: get("yres", DEFAULT_HEIGHT),
            min_width: get("minXRes", DEFAULT_MIN_WIDTH),
            min_height: get("minYRes", DEFAULT_MIN_HEIGHT),
            max_width: get("maxXRes", DEFAULT_MAX_WIDTH),
            max_height: get("maxYRes", DEFAULT_MAX_HEIGHT),
        }
    }
}

/// Clamp each axis of the requested size into the module bounds.
///
/// Without a request the module default is used as-is.
pub fn negotiate_resolution(requested: Option<(u32, u32)>, bounds: &ResolutionBounds) -> (u32, u32) {
    match requested {
        // max/min instead of clamp: a misconfigured min > max must not panic
        Some((width, height)) => (
            width.max(bounds.min_width).min(bounds.max_width),
            height.max(bounds.min_height).min(bounds.max_height),
        ),
        None => (bounds.default_width, bounds.default_height),
    }
}

/// Requested depth if supported and within the module limit, else the default
pub fn negotiate_color_depth(config: &dyn ConfigAccessor, session_id: u32, module: &str, requested: Option<u32>) -> u32 {
    let default = module_u32(config, session_id, module, "colorDepth", DEFAULT_COLOR_DEPTH);
    let max = module_u32(config, session_id, module, "maxColorDepth", DEFAULT_MAX_COLOR_DEPTH);

    match requested {
        Some(depth) if SUPPORTED_COLOR_DEPTHS.contains(&depth) && depth <= max => depth,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropertyStore, PropertyValue};

    fn bounds_1920() -> ResolutionBounds {
        ResolutionBounds {
            min_width: 320,
            min_height: 200,
            max_width: 1920,
            max_height: 1200,
            ..ResolutionBounds::default()
        }
    }

    #[test]
    fn test_clamps_to_max() {
        assert_eq!(negotiate_resolution(Some((2000, 1500)), &bounds_1920()), (1920, 1200));
    }

    #[test]
    fn test_clamps_to_min() {
        assert_eq!(negotiate_resolution(Some((100, 100)), &bounds_1920()), (320, 200));
    }

    #[test]
    fn test_axes_clamp_independently() {
        assert_eq!(negotiate_resolution(Some((2500, 100)), &bounds_1920()), (1920, 200));
        assert_eq!(negotiate_resolution(Some((1280, 720)), &bounds_1920()), (1280, 720));
    }

    #[test]
    fn test_no_request_uses_default() {
        assert_eq!(negotiate_resolution(None, &bounds_1920()), (1024, 768));
    }

    #[test]
    fn test_bounds_from_properties() {
        let mut props = PropertyStore::new();
        props.set("module.X11.maxXRes", PropertyValue::Number(1920));
        props.set("module.X11.maxYRes", PropertyValue::Number(1200));
        props.set("module.X11.xres", PropertyValue::Number(1280));

        let bounds = ResolutionBounds::for_module(&props, 1, "X11");
        assert_eq!(bounds.max_width, 1920);
        assert_eq!(bounds.max_height, 1200);
        assert_eq!(bounds.default_width, 1280);
        assert_eq!(bounds.min_width, DEFAULT_MIN_WIDTH);

        let other = ResolutionBounds::for_module(&props, 1, "CEF");
        assert_eq!(other, ResolutionBounds::default());
    }

    #[test]
    fn test_color_depth() {
        let mut props = PropertyStore::new();
        props.set("module.X11.maxColorDepth", PropertyValue::Number(16));

        assert_eq!(negotiate_color_depth(&props, 1, "X11", Some(16)), 16);
        assert_eq!(negotiate_color_depth(&props, 1, "X11", Some(32)), 24);
        assert_eq!(negotiate_color_depth(&props, 1, "X11", Some(12)), 24);
        assert_eq!(negotiate_color_depth(&props, 1, "X11", None), 24);
        assert_eq!(negotiate_color_depth(&props, 1, "CEF", Some(32)), 32);
    }
}
