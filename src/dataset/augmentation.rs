//! Data augmentation on pixel buffers.
//!
//! Transform parameters are sampled once per batch and the same composition
//! is applied to every item in it. The pipeline itself is stateless; all
//! randomness comes from the caller's RNG.

use rand::Rng;

use super::face::FaceItem;

/// Augmentation ranges.
///
/// Jitter factors are deviations around 1.0, hue is a fraction of the full
/// hue circle, geometric limits are small by design: faces stay upright.
#[derive(Debug, Clone)]
pub struct AugmentationConfig {
    /// Side length of the images fed through the pipeline
    pub image_size: usize,
    /// Probability of a horizontal flip
    pub flip_prob: f64,
    /// Brightness deviation
    pub brightness: f32,
    /// Contrast deviation
    pub contrast: f32,
    /// Saturation deviation
    pub saturation: f32,
    /// Hue shift as a fraction of the hue circle
    pub hue: f32,
    /// Maximum rotation in degrees
    pub max_rotation_deg: f32,
    /// Maximum translation as a fraction of the side length
    pub max_translate: f32,
    /// Maximum shear in degrees
    pub max_shear_deg: f32,
    /// Probability of the nested crop-then-resize step
    pub crop_prob: f64,
    /// Crop side length; skipped when not smaller than the image
    pub crop_size: usize,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            image_size: super::IMAGE_SIZE,
            flip_prob: 0.5,
            brightness: 0.2,
            contrast: 0.15,
            saturation: 0.15,
            hue: 0.05,
            max_rotation_deg: 6.0,
            max_translate: 0.1,
            max_shear_deg: 5.0,
            crop_prob: 0.4,
            crop_size: 200,
        }
    }
}

/// Augmentation pipeline: samples one [`SampledTransform`] per invocation.
#[derive(Debug, Clone)]
pub struct AugmentationPipeline {
    config: AugmentationConfig,
}

impl AugmentationPipeline {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Pipeline for a given image size with default ranges.
    pub fn for_image_size(image_size: usize) -> Self {
        Self::new(AugmentationConfig {
            image_size,
            ..Default::default()
        })
    }

    /// Draw one set of transform parameters.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> SampledTransform {
        let c = &self.config;
        let deg = std::f32::consts::PI / 180.0;

        let crop_origin = if c.crop_size < c.image_size && rng.gen_bool(c.crop_prob) {
            let max = c.image_size - c.crop_size;
            Some((rng.gen_range(0..=max), rng.gen_range(0..=max)))
        } else {
            None
        };

        SampledTransform {
            image_size: c.image_size,
            flip: rng.gen_bool(c.flip_prob),
            brightness: rng.gen_range(1.0 - c.brightness..=1.0 + c.brightness),
            contrast: rng.gen_range(1.0 - c.contrast..=1.0 + c.contrast),
            saturation: rng.gen_range(1.0 - c.saturation..=1.0 + c.saturation),
            hue_shift: rng.gen_range(-c.hue..=c.hue),
            angle_rad: rng.gen_range(-c.max_rotation_deg..=c.max_rotation_deg) * deg,
            translate: (
                rng.gen_range(-c.max_translate..=c.max_translate),
                rng.gen_range(-c.max_translate..=c.max_translate),
            ),
            shear_rad: rng.gen_range(-c.max_shear_deg..=c.max_shear_deg) * deg,
            crop_origin,
            crop_size: c.crop_size,
        }
    }
}

/// A fully determined transform, applicable to any number of items.
#[derive(Debug, Clone)]
pub struct SampledTransform {
    image_size: usize,
    flip: bool,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue_shift: f32,
    angle_rad: f32,
    translate: (f32, f32),
    shear_rad: f32,
    crop_origin: Option<(usize, usize)>,
    crop_size: usize,
}

impl SampledTransform {
    /// The identity transform, useful as a baseline in tests.
    pub fn identity(image_size: usize) -> Self {
        Self {
            image_size,
            flip: false,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            hue_shift: 0.0,
            angle_rad: 0.0,
            translate: (0.0, 0.0),
            shear_rad: 0.0,
            crop_origin: None,
            crop_size: image_size,
        }
    }

    /// Apply the transform, producing a new item with the same label.
    pub fn apply(&self, item: &FaceItem) -> FaceItem {
        let size = self.image_size;
        let mut buffer = item.image.clone();

        if self.flip {
            buffer = flip_horizontal(&buffer, size);
        }

        if self.brightness != 1.0
            || self.contrast != 1.0
            || self.saturation != 1.0
            || self.hue_shift != 0.0
        {
            buffer = color_jitter(
                &buffer,
                size,
                self.brightness,
                self.contrast,
                self.saturation,
                self.hue_shift,
            );
        }

        if self.angle_rad != 0.0 || self.translate != (0.0, 0.0) || self.shear_rad != 0.0 {
            buffer = affine(&buffer, size, self.angle_rad, self.translate, self.shear_rad);
        }

        if let Some(origin) = self.crop_origin {
            buffer = crop_resize(&buffer, size, origin, self.crop_size);
        }

        FaceItem::from_data(buffer, item.label.clone(), item.path.clone())
    }
}

#[inline]
fn idx(channel: usize, y: usize, x: usize, size: usize) -> usize {
    channel * size * size + y * size + x
}

fn flip_horizontal(buffer: &[f32], size: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; buffer.len()];
    for c in 0..3 {
        for y in 0..size {
            for x in 0..size {
                out[idx(c, y, x, size)] = buffer[idx(c, y, size - 1 - x, size)];
            }
        }
    }
    out
}

fn color_jitter(
    buffer: &[f32],
    size: usize,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue_shift: f32,
) -> Vec<f32> {
    // Contrast pivots around the mean luminance of the whole image.
    let mut mean = 0.0f32;
    for y in 0..size {
        for x in 0..size {
            mean += luminance(
                buffer[idx(0, y, x, size)],
                buffer[idx(1, y, x, size)],
                buffer[idx(2, y, x, size)],
            );
        }
    }
    mean /= (size * size) as f32;

    let mut out = vec![0.0f32; buffer.len()];
    for y in 0..size {
        for x in 0..size {
            let mut r = buffer[idx(0, y, x, size)];
            let mut g = buffer[idx(1, y, x, size)];
            let mut b = buffer[idx(2, y, x, size)];

            r *= brightness;
            g *= brightness;
            b *= brightness;

            r = mean + contrast * (r - mean);
            g = mean + contrast * (g - mean);
            b = mean + contrast * (b - mean);

            let gray = luminance(r, g, b);
            r = gray + saturation * (r - gray);
            g = gray + saturation * (g - gray);
            b = gray + saturation * (b - gray);

            if hue_shift != 0.0 {
                let (h, s, v) = rgb_to_hsv(r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0));
                let h = (h + hue_shift).rem_euclid(1.0);
                let (nr, ng, nb) = hsv_to_rgb(h, s, v);
                r = nr;
                g = ng;
                b = nb;
            }

            out[idx(0, y, x, size)] = r.clamp(0.0, 1.0);
            out[idx(1, y, x, size)] = g.clamp(0.0, 1.0);
            out[idx(2, y, x, size)] = b.clamp(0.0, 1.0);
        }
    }
    out
}

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

// Hue in [0, 1), saturation and value in [0, 1].
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        (((g - b) / delta).rem_euclid(6.0)) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h6 = h * 6.0;
    let c = v * s;
    let x = c * (1.0 - (h6.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h6 as usize {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (r + m, g + m, b + m)
}

// Inverse-mapped affine with nearest-neighbor sampling and zero fill.
// Rotation and shear compose about the image center, translation on top.
fn affine(buffer: &[f32], size: usize, angle_rad: f32, translate: (f32, f32), shear_rad: f32) -> Vec<f32> {
    let center = (size as f32 - 1.0) / 2.0;
    let (tx, ty) = (translate.0 * size as f32, translate.1 * size as f32);

    // Forward matrix A = R(angle) * Shear(shear); invert analytically.
    let (sin, cos) = angle_rad.sin_cos();
    let sh = shear_rad.tan();
    let a00 = cos;
    let a01 = cos * sh - sin;
    let a10 = sin;
    let a11 = sin * sh + cos;
    let det = a00 * a11 - a01 * a10;
    let (i00, i01, i10, i11) = (a11 / det, -a01 / det, -a10 / det, a00 / det);

    let mut out = vec![0.0f32; buffer.len()];
    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - center - tx;
            let dy = y as f32 - center - ty;
            let sx = i00 * dx + i01 * dy + center;
            let sy = i10 * dx + i11 * dy + center;

            let sx = sx.round();
            let sy = sy.round();
            if sx < 0.0 || sy < 0.0 || sx >= size as f32 || sy >= size as f32 {
                continue;
            }
            let (sx, sy) = (sx as usize, sy as usize);
            for c in 0..3 {
                out[idx(c, y, x, size)] = buffer[idx(c, sy, sx, size)];
            }
        }
    }
    out
}

// Crop a square region and bilinearly resize it back to the full side length.
fn crop_resize(buffer: &[f32], size: usize, origin: (usize, usize), crop_size: usize) -> Vec<f32> {
    let (ox, oy) = origin;
    let scale = crop_size as f32 / size as f32;

    let mut out = vec![0.0f32; buffer.len()];
    for y in 0..size {
        for x in 0..size {
            let sx = ox as f32 + x as f32 * scale;
            let sy = oy as f32 + y as f32 * scale;

            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(size - 1);
            let y1 = (y0 + 1).min(size - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..3 {
                let top = buffer[idx(c, y0, x0, size)] * (1.0 - fx)
                    + buffer[idx(c, y0, x1, size)] * fx;
                let bottom = buffer[idx(c, y1, x0, size)] * (1.0 - fx)
                    + buffer[idx(c, y1, x1, size)] * fx;
                out[idx(c, y, x, size)] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    out
}
