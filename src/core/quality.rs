use crate::common::config::QualityConfig;
use image::DynamicImage;

/// Summed-RGB difference between neighbouring pixels that counts as an edge
pub const DEFAULT_EDGE_THRESHOLD: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameQuality {
    /// Mean of the per-pixel RGB average, 0..=255
    pub brightness: f32,
    /// Fraction of pixels whose right-hand neighbour differs by more than the edge threshold
    pub sharpness: f32,
}

impl FrameQuality {
    pub fn measure(image: &DynamicImage) -> Self {
        Self::measure_with_threshold(image, DEFAULT_EDGE_THRESHOLD)
    }

    pub fn measure_with_threshold(image: &DynamicImage, edge_threshold: u32) -> Self {
        let rgba = image.to_rgba8();
        Self::measure_rgba(rgba.as_raw(), edge_threshold)
    }

    /// Measure a raw RGBA buffer. The edge scan walks the flattened buffer,
    /// so a row's last pixel is compared with the next row's first.
    pub fn measure_rgba(data: &[u8], edge_threshold: u32) -> Self {
        let pixel_count = data.len() / 4;
        if pixel_count == 0 {
            return FrameQuality { brightness: 0.0, sharpness: 0.0 };
        }

        let mut brightness_sum = 0f64;
        for px in data.chunks_exact(4) {
            brightness_sum += (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0;
        }

        let rgb_sum = |i: usize| data[i] as i32 + data[i + 1] as i32 + data[i + 2] as i32;
        let mut edge_count = 0usize;
        for px in 0..pixel_count - 1 {
            let offset = px * 4;
            if (rgb_sum(offset) - rgb_sum(offset + 4)).unsigned_abs() > edge_threshold {
                edge_count += 1;
            }
        }

        FrameQuality {
            brightness: (brightness_sum / pixel_count as f64) as f32,
            sharpness: (edge_count as f64 / pixel_count as f64) as f32,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "Brightness: {:.0} | Sharpness: {:.1}%",
            self.brightness,
            self.sharpness * 100.0
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityVerdict {
    Acceptable,
    TooDark,
    TooBright,
    TooBlurry,
}

impl QualityVerdict {
    pub fn is_acceptable(&self) -> bool {
        matches!(self, QualityVerdict::Acceptable)
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            QualityVerdict::Acceptable => "Image quality acceptable. Processing attendance...",
            QualityVerdict::TooDark => {
                "Image too dark. Please improve lighting or move to a brighter area."
            }
            QualityVerdict::TooBright => {
                "Image too bright. Please reduce lighting or move away from direct light."
            }
            QualityVerdict::TooBlurry => {
                "Image too blurry. Please hold steady and ensure good focus."
            }
        }
    }
}

/// Advisory gate in front of the recognizer upload
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub min_brightness: f32,
    pub max_brightness: f32,
    pub edge_threshold: u32,
    pub enforce_sharpness: bool,
    pub min_sharpness: f32,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

impl QualityGate {
    pub fn from_config(config: &QualityConfig) -> Self {
        Self {
            min_brightness: config.min_brightness,
            max_brightness: config.max_brightness,
            edge_threshold: config.edge_threshold,
            enforce_sharpness: config.enforce_sharpness,
            min_sharpness: config.min_sharpness,
        }
    }

    pub fn measure(&self, image: &DynamicImage) -> FrameQuality {
        FrameQuality::measure_with_threshold(image, self.edge_threshold)
    }

    pub fn check(&self, quality: &FrameQuality) -> QualityVerdict {
        if quality.brightness < self.min_brightness {
            QualityVerdict::TooDark
        } else if quality.brightness > self.max_brightness {
            QualityVerdict::TooBright
        } else if self.enforce_sharpness && quality.sharpness < self.min_sharpness {
            QualityVerdict::TooBlurry
        } else {
            QualityVerdict::Acceptable
        }
    }
}
