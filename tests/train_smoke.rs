//! End-to-end smoke test: one epoch of training on a tiny synthetic dataset.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fairface_train::backend::TrainingBackend;
use fairface_train::config::{OutputCategory, RunConfig};
use fairface_train::training::{run_training, BestScore, DatasetBundle, RunSettings};

const GENDERS: [&str; 2] = ["Male", "Female"];
const RACES: [&str; 4] = ["White", "Black", "Indian", "East Asian"];

fn write_image(path: &Path, seed: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = image::RgbImage::from_fn(32, 32, |x, y| {
        image::Rgb([
            ((x * 7 + seed) % 256) as u8,
            ((y * 11 + seed * 3) % 256) as u8,
            ((x + y + seed * 5) % 256) as u8,
        ])
    });
    img.save(path).unwrap();
}

fn write_split(data_dir: &Path, csv_name: &str, subdir: &str, rows: usize) {
    let mut csv = String::from("file,age,gender,race,service_test\n");
    for i in 0..rows {
        let file = format!("{}/{}.png", subdir, i);
        write_image(&data_dir.join(&file), i as u32);
        csv.push_str(&format!(
            "{},20-29,{},{},{}\n",
            file,
            GENDERS[i % GENDERS.len()],
            RACES[i % RACES.len()],
            if i % 2 == 0 { "True" } else { "False" }
        ));
    }
    let mut file = fs::File::create(data_dir.join(csv_name)).unwrap();
    write!(file, "{}", csv).unwrap();
}

fn smoke_config(root: &Path) -> RunConfig {
    RunConfig {
        name: "smoke".to_string(),
        output_category: OutputCategory::Gender,
        use_data_augmentation: true,
        use_mix_up: true,
        p_augment: 1.0,
        batch_size: 2,
        n_epochs: 1,
        start_learningrate: 0.001,
        image_size: 32,
        data_path: root.join("data").to_string_lossy().to_string(),
        output_dir: root.join("output").to_string_lossy().to_string(),
        seed: 7,
        ..RunConfig::default()
    }
}

#[test]
fn test_one_epoch_end_to_end() {
    let root = std::env::temp_dir().join(format!("fairface_smoke_{}", std::process::id()));
    let data_dir = root.join("data");
    write_split(&data_dir, "train.csv", "train", 10);
    write_split(&data_dir, "val.csv", "val", 4);
    write_split(&data_dir, "test.csv", "test", 2);

    let config = smoke_config(&root);
    let data = DatasetBundle::load(&config).unwrap();
    assert_eq!(data.train.len(), 10);
    assert_eq!(data.val.len(), 4);
    assert_eq!(data.test.len(), 2);

    let settings = RunSettings::from_config(&config);
    let mut best = BestScore::new();
    let device = Default::default();

    let outcome =
        run_training::<TrainingBackend>(&config, &settings, &data, &device, &mut best, None)
            .unwrap();

    assert_eq!(outcome.history.len(), 1);
    assert!(outcome.final_val_loss.is_finite());
    assert!(outcome.improved, "first run always improves the best score");
    assert!(outcome.history.get(0, "loss").is_some());
    assert!(outcome.history.get(0, "acc").is_some());
    assert!(outcome.history.get(0, "val_loss").is_some());
    assert!(outcome.history.get(0, "val_acc").is_some());

    let artifacts: Vec<PathBuf> = fs::read_dir(root.join("output"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    let has = |prefix: &str| {
        artifacts.iter().any(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
    };
    assert!(has("loss_graph_smoke_"), "missing loss chart: {:?}", artifacts);
    assert!(has("accuracy_graph_smoke_"), "missing accuracy chart");

    // The charts must actually carry the recorded series, not an empty grid.
    for prefix in ["loss_graph_smoke_", "accuracy_graph_smoke_"] {
        let chart = artifacts
            .iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .unwrap();
        let svg = fs::read_to_string(chart).unwrap();
        assert!(svg.contains("<path"), "{} has no data lines", chart.display());
    }
    assert!(has("test_predictions_smoke_"), "missing prediction dump");
    assert!(has("test_labels_smoke_"), "missing ground truth dump");
    assert!(has("model_smoke_"), "missing checkpoint");
    assert!(has("scalars_smoke_"), "missing scalar log");

    fs::remove_dir_all(&root).ok();
}

#[test]
fn test_balanced_filter_halves_the_splits() {
    let root = std::env::temp_dir().join(format!("fairface_balanced_{}", std::process::id()));
    let data_dir = root.join("data");
    write_split(&data_dir, "train.csv", "train", 10);
    write_split(&data_dir, "val.csv", "val", 4);
    write_split(&data_dir, "test.csv", "test", 2);

    let config = RunConfig {
        use_balanced_dataset: true,
        ..smoke_config(&root)
    };
    let data = DatasetBundle::load(&config).unwrap();
    // Every other synthetic row has service_test set.
    assert_eq!(data.train.len(), 5);
    assert_eq!(data.val.len(), 2);
    assert_eq!(data.test.len(), 1);

    fs::remove_dir_all(&root).ok();
}
