//! Batching of face items into tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::{FaceItem, Label, NUM_GENDER_CLASSES, NUM_RACE_CLASSES};

/// One-hot label tensors for a batch, mirroring [`Label`] at batch rank.
#[derive(Clone, Debug)]
pub enum LabelBatch<B: Backend> {
    /// [batch, 2] gender one-hots
    Binary(Tensor<B, 2>),
    /// [batch, 7] ethnicity one-hots
    Categorical(Tensor<B, 2>),
    /// Both heads for joint training
    Joint {
        race: Tensor<B, 2>,
        gender: Tensor<B, 2>,
    },
}

impl<B: Backend> LabelBatch<B> {
    /// Convex blend of two label batches: `strength * self + (1 - strength) * other`.
    ///
    /// Both sides always come from the same dataset, so the variants match.
    pub fn blend(self, other: Self, strength: f32) -> Self {
        match (self, other) {
            (LabelBatch::Binary(a), LabelBatch::Binary(b)) => {
                LabelBatch::Binary(a * strength + b * (1.0 - strength))
            }
            (LabelBatch::Categorical(a), LabelBatch::Categorical(b)) => {
                LabelBatch::Categorical(a * strength + b * (1.0 - strength))
            }
            (
                LabelBatch::Joint {
                    race: ra,
                    gender: ga,
                },
                LabelBatch::Joint {
                    race: rb,
                    gender: gb,
                },
            ) => LabelBatch::Joint {
                race: ra * strength + rb * (1.0 - strength),
                gender: ga * strength + gb * (1.0 - strength),
            },
            _ => unreachable!("label variants diverge within one dataset"),
        }
    }
}

/// A batch of face images with their labels.
#[derive(Clone, Debug)]
pub struct FaceBatch<B: Backend> {
    /// Images with shape [batch, 3, height, width]
    pub images: Tensor<B, 4>,
    /// One-hot labels
    pub labels: LabelBatch<B>,
}

/// Batcher turning [`FaceItem`]s into a [`FaceBatch`].
#[derive(Clone, Debug)]
pub struct FaceBatcher {
    image_size: usize,
}

impl FaceBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, FaceItem, FaceBatch<B>> for FaceBatcher {
    fn batch(&self, items: Vec<FaceItem>, device: &B::Device) -> FaceBatch<B> {
        debug_assert!(!items.is_empty(), "cannot batch zero items");

        let batch_size = items.len();
        let channels = 3;
        let height = self.image_size;
        let width = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let labels = match &items[0].label {
            Label::Binary(_) => {
                LabelBatch::Binary(one_hot_tensor::<B>(
                    items.iter().map(|item| match &item.label {
                        Label::Binary(g) => &g[..],
                        _ => unreachable!("label variants diverge within one dataset"),
                    }),
                    batch_size,
                    NUM_GENDER_CLASSES,
                    device,
                ))
            }
            Label::Categorical(_) => {
                LabelBatch::Categorical(one_hot_tensor::<B>(
                    items.iter().map(|item| match &item.label {
                        Label::Categorical(r) => &r[..],
                        _ => unreachable!("label variants diverge within one dataset"),
                    }),
                    batch_size,
                    NUM_RACE_CLASSES,
                    device,
                ))
            }
            Label::Joint { .. } => {
                let race = one_hot_tensor::<B>(
                    items.iter().map(|item| match &item.label {
                        Label::Joint { race, .. } => &race[..],
                        _ => unreachable!("label variants diverge within one dataset"),
                    }),
                    batch_size,
                    NUM_RACE_CLASSES,
                    device,
                );
                let gender = one_hot_tensor::<B>(
                    items.iter().map(|item| match &item.label {
                        Label::Joint { gender, .. } => &gender[..],
                        _ => unreachable!("label variants diverge within one dataset"),
                    }),
                    batch_size,
                    NUM_GENDER_CLASSES,
                    device,
                );
                LabelBatch::Joint { race, gender }
            }
        };

        FaceBatch { images, labels }
    }
}

fn one_hot_tensor<'a, B: Backend>(
    rows: impl Iterator<Item = &'a [f32]>,
    batch_size: usize,
    num_classes: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let data: Vec<f32> = rows.flat_map(|row| row.iter().copied()).collect();
    Tensor::<B, 2>::from_floats(TensorData::new(data, [batch_size, num_classes]), device)
}
