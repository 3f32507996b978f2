//! On-disk gesture dataset.
//!
//! A dataset has one directory per gesture label. Samples inside a label directory are numbered
//! with increasing integers: `<n>.jpg` holds the frame and the optional `<n>.json` holds the hand
//! keypoints as a flat `[x0, y0, z0, x1, ...]` array.
//!
//! ```text
//! gestures/
//! ├── hello/
//! │   ├── 1.jpg
//! │   ├── 1.json
//! │   └── 2.jpg
//! └── one/
//!     └── 1.jpg
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};

use crate::{image::Frame, landmark::LandmarkSet};

const JPEG_QUALITY: u8 = 95;

/// Lists the label directories of the dataset at `root`, sorted by name.
///
/// The sorted order is the class index order of a classifier trained on the dataset.
pub fn scan_labels(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut labels = Vec::new();
    for entry in fs::read_dir(root)
        .with_context(|| format!("failed to read dataset directory '{}'", root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            log::warn!("skipping non-UTF-8 label directory {:?}", entry.path());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        labels.push(name);
    }
    labels.sort();
    Ok(labels)
}

/// Appends samples to one label directory of a dataset.
pub struct DatasetWriter {
    dir: PathBuf,
    next_index: u64,
}

impl DatasetWriter {
    /// Opens (creating if needed) the directory of `label` under `root`.
    ///
    /// Numbering continues after the highest existing sample index.
    pub fn open<P: AsRef<Path>>(root: P, label: &str) -> anyhow::Result<Self> {
        if label.is_empty() || label.starts_with('.') || label.contains(['/', '\\']) {
            bail!("invalid gesture label '{}'", label);
        }

        let dir = root.as_ref().join(label);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create '{}'", dir.display()))?;

        let mut last = 0;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if let Some(index) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                last = last.max(index);
            }
        }

        log::debug!("writing samples to {} from #{}", dir.display(), last + 1);
        Ok(Self {
            dir,
            next_index: last + 1,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the index the next sample will be written with.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Writes a sample, returning its index.
    pub fn write(&mut self, frame: &Frame, keypoints: Option<&LandmarkSet>) -> anyhow::Result<u64> {
        let index = self.next_index;

        let jpeg = frame.encode_jpeg(JPEG_QUALITY)?;
        fs::write(self.sample_path(index, "jpg"), jpeg)?;
        if let Some(keypoints) = keypoints {
            let json = serde_json::to_vec(&keypoints.to_flat())?;
            fs::write(self.sample_path(index, "json"), json)?;
        }

        self.next_index += 1;
        Ok(index)
    }

    fn sample_path(&self, index: u64, ext: &str) -> PathBuf {
        self.dir.join(format!("{index}.{ext}"))
    }
}

/// Reads the keypoints written for a sample.
pub fn read_keypoints(path: &Path) -> anyhow::Result<LandmarkSet> {
    let data = fs::read(path)?;
    let flat: Vec<f32> = serde_json::from_slice(&data)
        .with_context(|| format!("invalid keypoint file '{}'", path.display()))?;
    LandmarkSet::from_flat(&flat)
        .with_context(|| format!("keypoint file '{}' is not a list of 3D points", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mudra-dataset-{}", fastrand::u64(..)));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn writes_and_resumes() {
        let root = temp_root();
        let frame = Frame::new(8, 8);
        let hand = LandmarkSet::new(vec![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]);

        let mut writer = DatasetWriter::open(&root, "hello").unwrap();
        assert_eq!(writer.write(&frame, Some(&hand)).unwrap(), 1);
        assert_eq!(writer.write(&frame, None).unwrap(), 2);
        assert!(root.join("hello/1.jpg").is_file());
        assert!(root.join("hello/1.json").is_file());
        assert!(!root.join("hello/2.json").exists());
        assert_eq!(read_keypoints(&root.join("hello/1.json")).unwrap(), hand);

        fs::write(root.join("hello/17.jpg"), b"").unwrap();
        fs::write(root.join("hello/notes.txt"), b"").unwrap();
        let writer = DatasetWriter::open(&root, "hello").unwrap();
        assert_eq!(writer.next_index(), 18);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn labels_are_sorted() {
        let root = temp_root();
        for label in ["welcome", "hello", "one", ".cache"] {
            fs::create_dir_all(root.join(label)).unwrap();
        }
        fs::write(root.join("README"), b"").unwrap();
        assert_eq!(scan_labels(&root).unwrap(), ["hello", "one", "welcome"]);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn invalid_labels() {
        let root = temp_root();
        for label in ["", "..", "a/b", ".hidden"] {
            assert!(DatasetWriter::open(&root, label).is_err(), "{label:?}");
        }
        fs::remove_dir_all(&root).unwrap();
    }
}
