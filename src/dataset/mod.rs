//! Dataset adapter: annotation parsing, image loading, batching and augmentation.

pub mod annotations;
pub mod augmentation;
pub mod batcher;
pub mod face;

pub use annotations::{annotation_file, load_annotations, AnnotationRecord, DataSplit};
pub use augmentation::{AugmentationConfig, AugmentationPipeline, SampledTransform};
pub use batcher::{FaceBatch, FaceBatcher, LabelBatch};
pub use face::{FaceDataset, FaceItem, Label};

/// Default side length images are resized to.
pub const IMAGE_SIZE: usize = 256;

/// Number of gender classes.
pub const NUM_GENDER_CLASSES: usize = 2;

/// Number of ethnicity classes.
pub const NUM_RACE_CLASSES: usize = 7;

/// Ethnicity class names in label-index order.
pub const RACE_NAMES: [&str; NUM_RACE_CLASSES] = [
    "Black",
    "East Asian",
    "Indian",
    "Latino_Hispanic",
    "Middle Eastern",
    "Southeast Asian",
    "White",
];
