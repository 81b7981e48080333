//! Face items, labels and the dataset around them.
//!
//! Labels are parsed eagerly when the dataset is built, so a mislabeled row
//! fails the run up front instead of polluting a class during training.
//! Images are decoded lazily per item.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::ImageReader;
use serde::{Deserialize, Serialize};

use crate::config::OutputCategory;
use crate::error::{Error, Result};

use super::annotations::AnnotationRecord;
use super::{NUM_GENDER_CLASSES, NUM_RACE_CLASSES, RACE_NAMES};

/// One-hot label for an item, tagged by prediction target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Label {
    /// Gender one-hot: [male, female]
    Binary([f32; NUM_GENDER_CLASSES]),
    /// Ethnicity one-hot in [`RACE_NAMES`] order
    Categorical([f32; NUM_RACE_CLASSES]),
    /// Both targets for joint training
    Joint {
        race: [f32; NUM_RACE_CLASSES],
        gender: [f32; NUM_GENDER_CLASSES],
    },
}

impl Label {
    /// Build the label for a record under the given prediction target.
    pub fn from_record(record: &AnnotationRecord, category: OutputCategory) -> Result<Self> {
        match category {
            OutputCategory::Gender => Ok(Label::Binary(gender_one_hot(record)?)),
            OutputCategory::Race => Ok(Label::Categorical(race_one_hot(record)?)),
            OutputCategory::Combined => Ok(Label::Joint {
                race: race_one_hot(record)?,
                gender: gender_one_hot(record)?,
            }),
        }
    }

    /// Gender component, if this label carries one.
    pub fn gender(&self) -> Option<&[f32; NUM_GENDER_CLASSES]> {
        match self {
            Label::Binary(g) => Some(g),
            Label::Joint { gender, .. } => Some(gender),
            Label::Categorical(_) => None,
        }
    }

    /// Ethnicity component, if this label carries one.
    pub fn race(&self) -> Option<&[f32; NUM_RACE_CLASSES]> {
        match self {
            Label::Categorical(r) => Some(r),
            Label::Joint { race, .. } => Some(race),
            Label::Binary(_) => None,
        }
    }
}

fn gender_one_hot(record: &AnnotationRecord) -> Result<[f32; NUM_GENDER_CLASSES]> {
    let mut one_hot = [0.0; NUM_GENDER_CLASSES];
    let index = match record.gender.as_str() {
        "Male" => 0,
        "Female" => 1,
        other => {
            return Err(Error::Dataset(format!(
                "unknown gender '{}' for {}",
                other, record.file
            )))
        }
    };
    one_hot[index] = 1.0;
    Ok(one_hot)
}

fn race_one_hot(record: &AnnotationRecord) -> Result<[f32; NUM_RACE_CLASSES]> {
    let index = RACE_NAMES
        .iter()
        .position(|name| *name == record.race)
        .ok_or_else(|| {
            Error::Dataset(format!(
                "unknown race '{}' for {}",
                record.race, record.file
            ))
        })?;
    let mut one_hot = [0.0; NUM_RACE_CLASSES];
    one_hot[index] = 1.0;
    Ok(one_hot)
}

/// A single face image ready for batching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaceItem {
    /// Image data as flattened CHW float array [3 * H * W], values in [0, 1]
    pub image: Vec<f32>,
    /// One-hot label
    pub label: Label,
    /// Source path (for logging)
    pub path: String,
}

impl FaceItem {
    /// Load and preprocess an image: decode, resize to a square, convert to
    /// CHW floats in [0, 1].
    pub fn from_path(path: &Path, label: Label, image_size: usize) -> Result<Self> {
        let img = ImageReader::open(path)?
            .decode()?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
            .to_rgb8();

        let (width, height) = (image_size, image_size);
        let mut image = vec![0.0f32; 3 * height * width];

        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x as u32, y as u32);
                image[y * width + x] = pixel[0] as f32 / 255.0;
                image[height * width + y * width + x] = pixel[1] as f32 / 255.0;
                image[2 * height * width + y * width + x] = pixel[2] as f32 / 255.0;
            }
        }

        Ok(Self {
            image,
            label,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Create from pre-loaded image data.
    pub fn from_data(image: Vec<f32>, label: Label, path: String) -> Self {
        Self { image, label, path }
    }
}

/// Dataset over annotated face images.
///
/// Holds (path, label) pairs; labels are validated at construction, images
/// decoded on demand through [`FaceDataset::item`].
#[derive(Debug, Clone)]
pub struct FaceDataset {
    samples: Vec<(PathBuf, Label)>,
    image_size: usize,
    category: OutputCategory,
}

impl FaceDataset {
    /// Build a dataset from annotation rows.
    ///
    /// Fails on the first row whose attributes cannot be mapped to a label.
    pub fn from_annotations(
        records: &[AnnotationRecord],
        image_dir: &Path,
        category: OutputCategory,
        image_size: usize,
    ) -> Result<Self> {
        let samples = records
            .iter()
            .map(|record| {
                let label = Label::from_record(record, category)?;
                Ok((image_dir.join(&record.file), label))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            samples,
            image_size,
            category,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Prediction target this dataset was built for.
    pub fn category(&self) -> OutputCategory {
        self.category
    }

    /// Label of a sample without decoding its image.
    pub fn label(&self, index: usize) -> Option<&Label> {
        self.samples.get(index).map(|(_, label)| label)
    }

    /// Load one item, decoding its image.
    ///
    /// A missing or corrupt image is a hard error; training never silently
    /// skips samples.
    pub fn item(&self, index: usize) -> Result<FaceItem> {
        let (path, label) = self.samples.get(index).ok_or_else(|| {
            Error::Dataset(format!(
                "sample index {} out of bounds (len {})",
                index,
                self.samples.len()
            ))
        })?;

        FaceItem::from_path(path, label.clone(), self.image_size)
    }
}
