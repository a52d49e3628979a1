mod common;

use lesionscope::classifier::{LesionClass, LesionClassifier, DECISION_THRESHOLD};
use lesionscope::LesionError;
use tempfile::TempDir;

#[test]
fn test_load_and_predict_from_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let classifier = common::load_classifier(temp_dir.path());

    assert_eq!(classifier.artifact_version(), "lesionnet-integration");
    assert_eq!(classifier.network().input_size(), 64);

    let result = classifier.predict(&common::png_bytes(120, 90, 40)).unwrap();
    let malignant = result.probability_of(LesionClass::Malignant);
    let benign = result.probability_of(LesionClass::Benign);

    assert!((malignant + benign - 1.0).abs() < 1e-9);
    assert_eq!(result.is_malignant(), malignant > DECISION_THRESHOLD);
    assert!(result.confidence >= 0.5 && result.confidence <= 1.0);
}

#[test]
fn test_prediction_is_repeatable() {
    let temp_dir = TempDir::new().unwrap();
    let classifier = common::load_classifier(temp_dir.path());
    let image = common::png_bytes(64, 64, 7);

    let first = classifier.predict(&image).unwrap();
    let second = classifier.predict(&image).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_missing_weights_is_model_not_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let (manifest_path, weights_path) = common::write_model_artifact(temp_dir.path());
    std::fs::remove_file(&weights_path).unwrap();

    let err = LesionClassifier::load(&manifest_path, &weights_path).err().unwrap();
    assert!(matches!(err, LesionError::ModelNotLoaded { .. }));
    assert_eq!(err.kind(), "ModelNotLoadedError");
}

#[test]
fn test_corrupt_manifest_is_model_not_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let (manifest_path, weights_path) = common::write_model_artifact(temp_dir.path());
    std::fs::write(&manifest_path, "{ not json").unwrap();

    let err = LesionClassifier::load(&manifest_path, &weights_path).err().unwrap();
    assert!(matches!(err, LesionError::ModelNotLoaded { .. }));
}

#[test]
fn test_undecodable_image_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let classifier = common::load_classifier(temp_dir.path());

    let err = classifier.predict(b"definitely not an image").unwrap_err();
    assert_eq!(err.kind(), "ImageDecodeError");
}
