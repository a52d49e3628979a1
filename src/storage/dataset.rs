//! Content-addressed incremental dataset store
//!
//! Layout under the root directory:
//! - `BENIGN/`, `MALIGNANT/`: one image per distinct content hash
//! - `metadata/{filename}.json`: sidecar record for each stored image
//! - `statistics.json`: per-class counts, regenerated after every save
//!
//! The duplicate check and the write are not atomic together. Two concurrent saves of the
//! same new image can both pass the check and store two copies; this is accepted.

use crate::classifier::{ClassificationResult, LesionClass};
use crate::error::{LesionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const METADATA_DIR: &str = "metadata";
const STATISTICS_FILE: &str = "statistics.json";

/// Sidecar record written next to every stored image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSample {
    pub content_hash: String,
    pub class_label: LesionClass,
    pub confidence_at_capture: f64,
    pub probabilities: BTreeMap<LesionClass, f64>,
    pub stored_path: PathBuf,
    pub filename: String,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

/// Outcome of a save request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl SaveOutcome {
    fn stored(sample: &StoredSample) -> Self {
        Self {
            success: true,
            reason: None,
            error: None,
            stored_path: Some(sample.stored_path.clone()),
            filename: Some(sample.filename.clone()),
            content_hash: Some(sample.content_hash.clone()),
        }
    }

    fn duplicate(hash: String) -> Self {
        Self {
            success: false,
            reason: Some("duplicate".to_string()),
            error: None,
            stored_path: None,
            filename: None,
            content_hash: Some(hash),
        }
    }

    fn failed(error: impl Into<String>, hash: Option<String>) -> Self {
        Self {
            success: false,
            reason: None,
            error: Some(error.into()),
            stored_path: None,
            filename: None,
            content_hash: hash,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.reason.as_deref() == Some("duplicate")
    }
}

/// Per-class sample counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub last_updated: DateTime<Utc>,
    pub classes: BTreeMap<LesionClass, usize>,
    pub total: usize,
}

/// Store overview, including training readiness
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub root_dir: PathBuf,
    pub classes: Vec<LesionClass>,
    pub statistics: DatasetStatistics,
    pub min_samples_for_training: usize,
    pub ready_for_training: bool,
}

/// Counts removed by a reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub images_removed: usize,
    pub metadata_removed: usize,
}

/// Deduplicating store that grows the training set from classified images
pub struct IncrementalStore {
    root: PathBuf,
    min_samples_for_training: usize,
}

impl IncrementalStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new(root: PathBuf, min_samples_for_training: usize) -> Result<Self> {
        for dir in LesionClass::ALL
            .iter()
            .map(|class| root.join(class.as_str()))
            .chain(std::iter::once(root.join(METADATA_DIR)))
        {
            fs::create_dir_all(&dir).map_err(|e| LesionError::Io {
                source: e,
                context: format!("Failed to create dataset directory: {}", dir.display()),
            })?;
        }

        Ok(Self {
            root,
            min_samples_for_training,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an image under its predicted class. Never fails; see `SaveOutcome`.
    pub fn save(
        &self,
        image: &[u8],
        classification: &ClassificationResult,
        source_path: Option<&Path>,
        extension: &str,
    ) -> SaveOutcome {
        self.save_sample(
            image,
            classification.predicted_class,
            classification.confidence,
            classification.probabilities.clone(),
            source_path,
            extension,
        )
    }

    /// Store an image under an explicit label string (e.g. from manual review)
    pub fn save_labeled(
        &self,
        image: &[u8],
        label: &str,
        confidence: f64,
        source_path: Option<&Path>,
        extension: &str,
    ) -> SaveOutcome {
        let class: LesionClass = match label.parse() {
            Ok(class) => class,
            Err(e) => return SaveOutcome::failed(e, None),
        };
        if !(0.0..=1.0).contains(&confidence) {
            return SaveOutcome::failed(
                format!("Confidence must be within [0, 1], got {}", confidence),
                None,
            );
        }

        let mut probabilities = BTreeMap::new();
        probabilities.insert(class, confidence);
        for other in LesionClass::ALL.into_iter().filter(|c| *c != class) {
            probabilities.insert(other, 1.0 - confidence);
        }

        self.save_sample(image, class, confidence, probabilities, source_path, extension)
    }

    fn save_sample(
        &self,
        image: &[u8],
        class: LesionClass,
        confidence: f64,
        probabilities: BTreeMap<LesionClass, f64>,
        source_path: Option<&Path>,
        extension: &str,
    ) -> SaveOutcome {
        let hash = Self::hash_data(image);

        match self.find_by_hash(&hash) {
            Ok(Some(existing)) => {
                tracing::info!("Image already in dataset: {}", existing.filename);
                return SaveOutcome::duplicate(hash);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Dataset duplicate check failed: {}", e);
                return SaveOutcome::failed(e.to_string(), Some(hash));
            }
        }

        match self.write_sample(image, &hash, class, confidence, probabilities, source_path, extension) {
            Ok(sample) => {
                tracing::info!(
                    "Image stored in dataset: {}/{}",
                    class,
                    sample.filename
                );
                if let Err(e) = self.refresh_statistics() {
                    tracing::warn!("Failed to update dataset statistics: {}", e);
                }
                SaveOutcome::stored(&sample)
            }
            Err(e) => {
                tracing::error!("Failed to store image in dataset: {}", e);
                SaveOutcome::failed(e.to_string(), Some(hash))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_sample(
        &self,
        image: &[u8],
        hash: &str,
        class: LesionClass,
        confidence: f64,
        probabilities: BTreeMap<LesionClass, f64>,
        source_path: Option<&Path>,
        extension: &str,
    ) -> Result<StoredSample> {
        let captured_at = Utc::now();
        let filename = Self::sample_filename(class, captured_at, hash, extension);
        let stored_path = self.root.join(class.as_str()).join(&filename);

        Self::atomic_write(&stored_path, image)?;

        let sample = StoredSample {
            content_hash: hash.to_string(),
            class_label: class,
            confidence_at_capture: confidence,
            probabilities,
            stored_path,
            filename,
            captured_at,
            source_path: source_path.map(Path::to_path_buf),
        };

        let written = serde_json::to_vec_pretty(&sample)
            .map_err(|e| LesionError::Json {
                source: e,
                context: "Failed to serialize sample metadata".to_string(),
            })
            .and_then(|sidecar| Self::atomic_write(&self.sidecar_path(&sample.filename), &sidecar));

        // An image without its sidecar is invisible to the duplicate check
        if let Err(e) = written {
            if let Err(cleanup) = Self::remove(&sample.stored_path) {
                tracing::error!("Failed to roll back orphaned image: {}", cleanup);
            }
            return Err(e);
        }

        Ok(sample)
    }

    /// Look up a stored sample by content hash
    pub fn find_by_hash(&self, hash: &str) -> Result<Option<StoredSample>> {
        Ok(self
            .samples()?
            .into_iter()
            .find(|sample| sample.content_hash == hash))
    }

    /// Every sidecar record in the store; unreadable records are skipped with a warning
    pub fn samples(&self) -> Result<Vec<StoredSample>> {
        let mut samples = Vec::new();
        for path in self.sidecar_files()? {
            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<StoredSample>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(sample) => samples.push(sample),
                Err(e) => tracing::warn!("Skipping unreadable sidecar {}: {}", path.display(), e),
            }
        }
        Ok(samples)
    }

    /// Count images per class directory
    pub fn statistics(&self) -> Result<DatasetStatistics> {
        let mut classes = BTreeMap::new();
        for class in LesionClass::ALL {
            classes.insert(class, self.image_files(class)?.len());
        }
        let total = classes.values().sum();

        Ok(DatasetStatistics {
            last_updated: Utc::now(),
            classes,
            total,
        })
    }

    pub fn info(&self) -> Result<DatasetInfo> {
        let statistics = self.statistics()?;
        Ok(DatasetInfo {
            root_dir: self.root.clone(),
            classes: LesionClass::ALL.to_vec(),
            ready_for_training: statistics.total >= self.min_samples_for_training,
            min_samples_for_training: self.min_samples_for_training,
            statistics,
        })
    }

    /// Remove every stored image, sidecar and the statistics file
    pub fn reset(&self) -> Result<ResetSummary> {
        let mut summary = ResetSummary::default();

        for class in LesionClass::ALL {
            for path in self.image_files(class)? {
                Self::remove(&path)?;
                summary.images_removed += 1;
            }
        }
        for path in self.sidecar_files()? {
            Self::remove(&path)?;
            summary.metadata_removed += 1;
        }

        let statistics = self.root.join(STATISTICS_FILE);
        if statistics.exists() {
            Self::remove(&statistics)?;
        }

        tracing::info!(
            "Dataset reset: {} images, {} metadata records removed",
            summary.images_removed,
            summary.metadata_removed
        );
        Ok(summary)
    }

    fn refresh_statistics(&self) -> Result<DatasetStatistics> {
        let statistics = self.statistics()?;
        let content = serde_json::to_vec_pretty(&statistics).map_err(|e| LesionError::Json {
            source: e,
            context: "Failed to serialize dataset statistics".to_string(),
        })?;
        Self::atomic_write(&self.root.join(STATISTICS_FILE), &content)?;
        Ok(statistics)
    }

    /// Hash data using BLAKE3, keeping 32 hex characters (128 bits)
    pub fn hash_data(data: &[u8]) -> String {
        let hash = blake3::hash(data);
        format!("{:.32}", hash.to_hex())
    }

    /// `{CLASS}_{YYYYmmdd_HHMMSS}_{hash[0..8]}.{ext}`
    fn sample_filename(
        class: LesionClass,
        captured_at: DateTime<Utc>,
        hash: &str,
        extension: &str,
    ) -> String {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        let extension = if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            "png".to_string()
        } else {
            extension
        };
        format!(
            "{}_{}_{}.{}",
            class,
            captured_at.format("%Y%m%d_%H%M%S"),
            &hash[..8.min(hash.len())],
            extension
        )
    }

    fn sidecar_path(&self, filename: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{}.json", filename))
    }

    fn image_files(&self, class: LesionClass) -> Result<Vec<PathBuf>> {
        Self::list_files(&self.root.join(class.as_str()), |path| {
            path.extension().and_then(|e| e.to_str()) != Some("tmp")
        })
    }

    fn sidecar_files(&self) -> Result<Vec<PathBuf>> {
        Self::list_files(&self.root.join(METADATA_DIR), |path| {
            path.extension().and_then(|e| e.to_str()) == Some("json")
        })
    }

    fn list_files<F>(dir: &Path, keep: F) -> Result<Vec<PathBuf>>
    where
        F: Fn(&Path) -> bool,
    {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to read dataset directory: {}", dir.display()),
        })? {
            let entry = entry.map_err(|e| LesionError::Io {
                source: e,
                context: "Failed to read dataset directory entry".to_string(),
            })?;
            let path = entry.path();
            if path.is_file() && keep(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Write to a temporary file first, then rename into place
    fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to create temp file: {}", temp_path.display()),
        })?;

        let finished = file
            .write_all(data)
            .map_err(|e| LesionError::Io {
                source: e,
                context: format!("Failed to write temp file: {}", temp_path.display()),
            })
            .and_then(|_| {
                file.sync_all().map_err(|e| LesionError::Io {
                    source: e,
                    context: format!("Failed to sync temp file: {}", temp_path.display()),
                })
            });
        drop(file);

        let result = finished.and_then(|_| {
            fs::rename(&temp_path, path).map_err(|e| LesionError::Io {
                source: e,
                context: format!(
                    "Failed to rename temp file to final location: {} -> {}",
                    temp_path.display(),
                    path.display()
                ),
            })
        });

        // The temp file is ours once created; never leave it behind
        if result.is_err() && temp_path.is_file() {
            if let Err(e) = fs::remove_file(&temp_path) {
                tracing::warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
            }
        }
        result
    }

    fn remove(path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to remove {}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> IncrementalStore {
        IncrementalStore::new(temp_dir.path().join("dataset"), 2).unwrap()
    }

    #[test]
    fn test_hash_is_32_hex_chars() {
        let hash = IncrementalStore::hash_data(b"lesion");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, IncrementalStore::hash_data(b"lesion"));
        assert_ne!(hash, IncrementalStore::hash_data(b"lesion2"));
    }

    #[test]
    fn test_save_writes_image_sidecar_and_statistics() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let classification = ClassificationResult::from_probability(0.92);

        let outcome = store.save(b"image-bytes", &classification, Some(Path::new("/in/a.jpg")), "jpg");
        assert!(outcome.success);

        let filename = outcome.filename.clone().unwrap();
        assert!(filename.starts_with("MALIGNANT_"));
        assert!(filename.ends_with(".jpg"));
        let hash = outcome.content_hash.clone().unwrap();
        assert!(filename.contains(&hash[..8]));

        let stored = outcome.stored_path.clone().unwrap();
        assert_eq!(fs::read(&stored).unwrap(), b"image-bytes");

        let sample = store.find_by_hash(&hash).unwrap().unwrap();
        assert_eq!(sample.class_label, LesionClass::Malignant);
        assert!((sample.confidence_at_capture - 0.92).abs() < 1e-9);
        assert_eq!(sample.source_path, Some(PathBuf::from("/in/a.jpg")));

        let stats: DatasetStatistics = serde_json::from_slice(
            &fs::read(store.root().join("statistics.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.classes[&LesionClass::Malignant], 1);
    }

    #[test]
    fn test_duplicate_is_a_noop() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let classification = ClassificationResult::from_probability(0.92);

        assert!(store.save(b"same", &classification, None, "png").success);
        let second = store.save(b"same", &classification, None, "png");

        assert!(!second.success);
        assert!(second.is_duplicate());
        assert!(second.error.is_none());
        assert_eq!(store.image_files(LesionClass::Malignant).unwrap().len(), 1);
        assert_eq!(store.sidecar_files().unwrap().len(), 1);
    }

    #[test]
    fn test_save_labeled_validates_label() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let outcome = store.save_labeled(b"x", "MALIGNO", 0.9, None, "png");
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("MALIGNO"));

        let outcome = store.save_labeled(b"x", "BENIGN", 0.75, None, "png");
        assert!(outcome.success);
        let sample = store
            .find_by_hash(&outcome.content_hash.unwrap())
            .unwrap()
            .unwrap();
        assert!((sample.probabilities[&LesionClass::Malignant] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_info_and_reset() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        assert!(!store.info().unwrap().ready_for_training);
        store.save(b"a", &ClassificationResult::from_probability(0.1), None, "png");
        store.save(b"b", &ClassificationResult::from_probability(0.9), None, "png");

        let info = store.info().unwrap();
        assert_eq!(info.statistics.total, 2);
        assert!(info.ready_for_training);

        let summary = store.reset().unwrap();
        assert_eq!(
            summary,
            ResetSummary {
                images_removed: 2,
                metadata_removed: 2
            }
        );
        assert_eq!(store.statistics().unwrap().total, 0);
        assert!(!store.root().join("statistics.json").exists());

        // Previously seen images can be stored again after a reset
        assert!(store.save(b"a", &ClassificationResult::from_probability(0.1), None, "png").success);
    }

    #[test]
    fn test_failed_sidecar_write_leaves_no_orphan_image() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let classification = ClassificationResult::from_probability(0.92);
        let image = b"sidecar-will-fail";
        let hash = IncrementalStore::hash_data(image);

        // Occupy the sidecar temp path for every timestamp the save can pick
        let start = Utc::now();
        let blockers: Vec<PathBuf> = (0..5)
            .map(|offset| {
                let at = start + chrono::Duration::seconds(offset);
                let filename = IncrementalStore::sample_filename(LesionClass::Malignant, at, &hash, "png");
                store.sidecar_path(&filename).with_extension("tmp")
            })
            .collect();
        for blocker in &blockers {
            fs::create_dir_all(blocker).unwrap();
        }

        let failed = store.save(image, &classification, None, "png");
        assert!(!failed.success);
        assert!(!failed.is_duplicate());
        assert!(failed.error.is_some());
        assert!(store.image_files(LesionClass::Malignant).unwrap().is_empty());
        assert_eq!(store.statistics().unwrap().total, 0);

        for blocker in &blockers {
            fs::remove_dir(blocker).unwrap();
        }

        let stored = store.save(image, &classification, None, "png");
        assert!(stored.success);
        let again = store.save(image, &classification, None, "png");
        assert!(again.is_duplicate());
        assert_eq!(store.image_files(LesionClass::Malignant).unwrap().len(), 1);
        assert_eq!(store.sidecar_files().unwrap().len(), 1);
    }

    #[test]
    fn test_atomic_write_removes_temp_file_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        // Renaming a file onto a non-empty directory fails after the temp file exists
        let target = temp_dir.path().join("occupied.png");
        fs::create_dir_all(target.join("inner")).unwrap();

        assert!(IncrementalStore::atomic_write(&target, b"data").is_err());
        assert!(!temp_dir.path().join("occupied.tmp").exists());
    }

    #[test]
    fn test_filename_extension_sanitized() {
        let when = Utc::now();
        let name = IncrementalStore::sample_filename(LesionClass::Benign, when, "0123456789abcdef", ".JPEG");
        assert!(name.ends_with("_01234567.jpeg"));

        let name = IncrementalStore::sample_filename(LesionClass::Benign, when, "0123456789abcdef", "../x");
        assert!(name.ends_with(".png"));
    }
}
