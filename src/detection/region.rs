use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::record::PixelBox;

/// Part of the full frame handed to the face detector.
///
/// Some speakers are filmed with picture-in-picture layouts; detecting only
/// inside the region that holds the speaker avoids picking up other faces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "lowercase")]
pub enum CropRegion {
    /// Absolute pixel bounds.
    Pixels {
        top: u32,
        bottom: u32,
        left: u32,
        right: u32,
    },
    /// Bounds as fractions of the frame size; offsets are truncated to pixels.
    Fraction {
        #[serde(default)]
        top: f64,
        #[serde(default = "one")]
        bottom: f64,
        #[serde(default)]
        left: f64,
        #[serde(default = "one")]
        right: f64,
    },
}

fn one() -> f64 {
    1.0
}

impl CropRegion {
    /// Resolve to pixels for a `width` x `height` frame, clamped to the frame.
    pub fn resolve(&self, width: u32, height: u32) -> PixelBox {
        let b = match *self {
            CropRegion::Pixels {
                top,
                bottom,
                left,
                right,
            } => PixelBox {
                x1: left,
                y1: top,
                x2: right,
                y2: bottom,
            },
            CropRegion::Fraction {
                top,
                bottom,
                left,
                right,
            } => {
                let px = |f: f64, size: u32| (f * size as f64).max(0.0) as u32;
                PixelBox {
                    x1: px(left, width),
                    y1: px(top, height),
                    x2: px(right, width),
                    y2: px(bottom, height),
                }
            }
        };
        b.clamp_to(width, height)
    }
}

/// Named crop regions, typically keyed by speaker.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CropRegions(pub HashMap<String, CropRegion>);

impl CropRegions {
    /// Regions of the published speakers whose videos need a pre-crop.
    pub fn builtin() -> Self {
        let mut regions = HashMap::new();
        regions.insert(
            "chess".to_string(),
            CropRegion::Pixels {
                top: 270,
                bottom: 460,
                left: 770,
                right: 1130,
            },
        );
        let lower_right = CropRegion::Fraction {
            top: 0.75,
            bottom: 1.0,
            left: 0.75,
            right: 1.0,
        };
        regions.insert("dl".to_string(), lower_right.clone());
        regions.insert("eh".to_string(), lower_right);
        Self(regions)
    }

    pub fn get(&self, name: &str) -> Option<&CropRegion> {
        self.0.get(name)
    }
}

/// A face box in pixels of the detector's input image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

/// Relative `(y1, y2, x1, x2)` of `face` in the full frame, given the
/// region it was detected in.
pub fn relative_to_frame(face: &FaceBox, region: &PixelBox, width: u32, height: u32) -> (f64, f64, f64, f64) {
    let w = width as f64;
    let h = height as f64;
    let ox = region.x1 as f64;
    let oy = region.y1 as f64;
    (
        (face.y1 as f64 + oy) / h,
        (face.y2 as f64 + oy) / h,
        (face.x1 as f64 + ox) / w,
        (face.x2 as f64 + ox) / w,
    )
}
