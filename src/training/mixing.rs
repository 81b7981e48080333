//! Cutmix and mixup on training batches.
//!
//! Both take the raw batch and a shuffled partner batch. The mixing strength
//! comes from a Beta(0.2, 0.2) draw; cutmix re-derives the effective strength
//! from the pasted region's actual area so the label weights stay exact even
//! when the region is clipped at the border.

use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::dataset::{FaceBatch, LabelBatch};

/// Beta shape parameter for the mixing strength distribution.
pub const MIX_ALPHA: f32 = 0.2;

/// Draw a mixing strength from Beta(0.2, 0.2).
pub fn sample_strength<R: Rng>(rng: &mut R) -> f32 {
    let beta = Beta::new(MIX_ALPHA, MIX_ALPHA).expect("Beta(0.2, 0.2) is a valid distribution");
    beta.sample(rng)
}

/// Mixup: convex blend of images and labels by the sampled strength.
pub fn mixup<B: Backend>(
    batch: &FaceBatch<B>,
    partner: &FaceBatch<B>,
    strength: f32,
) -> (Tensor<B, 4>, LabelBatch<B>) {
    let images = batch.images.clone() * strength + partner.images.clone() * (1.0 - strength);
    let labels = batch.labels.clone().blend(partner.labels.clone(), strength);
    (images, labels)
}

/// Cutmix: paste a rectangular region from the partner batch and blend the
/// labels by the exact unmixed-area ratio.
///
/// Returns the mixed images, blended labels and the corrected strength
/// `1 - region_area / total_area`.
pub fn cutmix<B: Backend, R: Rng>(
    batch: &FaceBatch<B>,
    partner: &FaceBatch<B>,
    strength: f32,
    rng: &mut R,
) -> (Tensor<B, 4>, LabelBatch<B>, f32) {
    let [batch_size, channels, height, width] = batch.images.dims();
    let region = Region::sample(height, width, strength, rng);

    let images = if region.is_empty() {
        batch.images.clone()
    } else {
        let patch = partner.images.clone().slice([
            0..batch_size,
            0..channels,
            region.y0..region.y1,
            region.x0..region.x1,
        ]);
        batch.images.clone().slice_assign(
            [
                0..batch_size,
                0..channels,
                region.y0..region.y1,
                region.x0..region.x1,
            ],
            patch,
        )
    };

    let corrected = 1.0 - region.area() as f32 / (height * width) as f32;
    let labels = batch.labels.clone().blend(partner.labels.clone(), corrected);

    (images, labels, corrected)
}

/// A clipped rectangular cut region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
}

impl Region {
    /// Sample a region whose side lengths scale with `sqrt(1 - strength)`,
    /// centered at a uniform point and clipped to the image bounds.
    fn sample<R: Rng>(height: usize, width: usize, strength: f32, rng: &mut R) -> Self {
        let cut = (1.0 - strength).max(0.0).sqrt();
        let cut_h = (height as f32 * cut) as usize;
        let cut_w = (width as f32 * cut) as usize;

        let cy = rng.gen_range(0..height);
        let cx = rng.gen_range(0..width);

        Self {
            y0: cy.saturating_sub(cut_h / 2),
            y1: (cy + cut_h / 2).min(height),
            x0: cx.saturating_sub(cut_w / 2),
            x1: (cx + cut_w / 2).min(width),
        }
    }

    fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    fn area(&self) -> usize {
        (self.x1 - self.x0) * (self.y1 - self.y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    const SIZE: usize = 8;

    fn uniform_batch(value: f32, label: [f32; 2]) -> FaceBatch<TestBackend> {
        let device = Default::default();
        FaceBatch {
            images: Tensor::from_floats(
                TensorData::new(vec![value; 3 * SIZE * SIZE], [1, 3, SIZE, SIZE]),
                &device,
            ),
            labels: LabelBatch::Binary(Tensor::from_floats(
                TensorData::new(label.to_vec(), [1, 2]),
                &device,
            )),
        }
    }

    fn binary_values(labels: LabelBatch<TestBackend>) -> Vec<f32> {
        match labels {
            LabelBatch::Binary(t) => t.into_data().to_vec().unwrap(),
            _ => panic!("expected binary labels"),
        }
    }

    #[test]
    fn test_mixup_pixel_equation() {
        let a = uniform_batch(1.0, [1.0, 0.0]);
        let b = uniform_batch(0.0, [0.0, 1.0]);
        let strength = 0.3;

        let (images, labels) = mixup(&a, &b, strength);

        let pixels: Vec<f32> = images.into_data().to_vec().unwrap();
        assert!(pixels.iter().all(|p| (p - 0.3).abs() < 1e-6));

        let label = binary_values(labels);
        assert!((label[0] - 0.3).abs() < 1e-6);
        assert!((label[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_mixup_uses_the_sampled_strength() {
        // Two different strengths must give two different blends.
        let a = uniform_batch(1.0, [1.0, 0.0]);
        let b = uniform_batch(0.0, [0.0, 1.0]);

        let (_, low) = mixup(&a, &b, 0.2);
        let (_, high) = mixup(&a, &b, 0.9);
        assert!((binary_values(low)[0] - 0.2).abs() < 1e-6);
        assert!((binary_values(high)[0] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_cutmix_strength_matches_area_ratio_exactly() {
        let a = uniform_batch(0.0, [1.0, 0.0]);
        let b = uniform_batch(1.0, [0.0, 1.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let (images, labels, corrected) = cutmix(&a, &b, 0.25, &mut rng);

        // Base batch is all zeros, partner all ones: the pixel sum counts the
        // pasted region area directly.
        let pixels: Vec<f32> = images.into_data().to_vec().unwrap();
        let pasted: f32 = pixels.iter().sum::<f32>() / 3.0;
        let expected = 1.0 - pasted / (SIZE * SIZE) as f32;
        assert!(
            (corrected - expected).abs() < 1e-6,
            "corrected {} vs area ratio {}",
            corrected,
            expected
        );

        let label = binary_values(labels);
        assert!((label[0] - corrected).abs() < 1e-6);
        assert!((label[1] - (1.0 - corrected)).abs() < 1e-6);
    }

    #[test]
    fn test_cutmix_region_pixels_come_from_partner() {
        let a = uniform_batch(0.25, [1.0, 0.0]);
        let b = uniform_batch(0.75, [0.0, 1.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let (images, _, corrected) = cutmix(&a, &b, 0.1, &mut rng);
        let pixels: Vec<f32> = images.into_data().to_vec().unwrap();

        // Every pixel is either untouched or pasted, nothing blended.
        assert!(pixels
            .iter()
            .all(|p| (p - 0.25).abs() < 1e-6 || (p - 0.75).abs() < 1e-6));
        assert!(corrected < 1.0);
    }

    #[test]
    fn test_mixup_composes_on_cutmixed_batch() {
        // When both regularizers run in one step, mixup blends the
        // cutmixed labels, not the raw ones.
        let a = uniform_batch(0.0, [1.0, 0.0]);
        let b = uniform_batch(1.0, [0.0, 1.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let (images, labels, corrected) = cutmix(&a, &b, 0.25, &mut rng);
        let cutmixed = FaceBatch { images, labels };

        let strength = 0.6;
        let (_, final_labels) = mixup(&cutmixed, &b, strength);

        // First class weight: strength * corrected + (1 - strength) * 0.
        let label = binary_values(final_labels);
        assert!((label[0] - strength * corrected).abs() < 1e-6);
        assert!((label[0] + label[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_high_strength_keeps_most_of_the_batch() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let region = Region::sample(64, 64, 0.99, &mut rng);
        // cut side = 64 * sqrt(0.01) ~ 6 pixels
        assert!(region.area() <= 8 * 8);
    }

    #[test]
    fn test_sample_strength_is_in_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            let s = sample_strength(&mut rng);
            assert!((0.0..=1.0).contains(&s));
        }
    }
}
