//! Gesture vocabulary and display string translation.
//!
//! The [`Vocabulary`] must list labels in the exact order of the classifier's output dimension.
//! Models trained from a [dataset] directory use the sorted label directory names, which
//! [`Vocabulary::from_dataset`] reproduces.
//!
//! [dataset]: crate::dataset

use std::{collections::HashMap, path::Path};

use anyhow::bail;
use itertools::Itertools;

use crate::error::{Error, Result};

/// The ordered set of gesture labels a classifier can output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Box<[String]>,
}

impl Vocabulary {
    /// Creates a vocabulary from an ordered list of labels.
    ///
    /// Fails if `labels` is empty or contains duplicates.
    pub fn new<I, S>(labels: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels = labels.into_iter().map(Into::into).collect::<Box<[String]>>();
        if labels.is_empty() {
            bail!("gesture vocabulary must contain at least one label");
        }
        if let Some(label) = labels.iter().duplicates().next() {
            bail!("duplicate label '{}' in gesture vocabulary", label);
        }
        Ok(Self { labels })
    }

    /// Derives a vocabulary from the label directories of a dataset.
    pub fn from_dataset<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        Self::new(crate::dataset::scan_labels(root.as_ref())?)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|s| &**s)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.labels.iter().map(|s| &**s)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Maps gesture labels to the text shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationTable {
    map: HashMap<String, String>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the display string of `label`.
    pub fn insert(&mut self, label: impl Into<String>, text: impl Into<String>) {
        self.map.insert(label.into(), text.into());
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.map.get(label).map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Checks that this table fits `vocabulary`.
    ///
    /// Entries for labels the vocabulary doesn't contain are an error (most likely a typo in the
    /// configuration). Vocabulary labels without an entry are allowed; they translate to an empty
    /// string and are logged here once.
    pub fn validate(&self, vocabulary: &Vocabulary) -> anyhow::Result<()> {
        let unknown = self
            .map
            .keys()
            .filter(|label| !vocabulary.contains(label))
            .sorted()
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            bail!(
                "translation table contains labels that are not in the vocabulary: {:?}",
                unknown
            );
        }

        for label in vocabulary.labels() {
            if self.get(label).is_none() {
                log::info!("gesture '{}' has no translation, it will display as ''", label);
            }
        }
        Ok(())
    }
}

impl<L: Into<String>, T: Into<String>> FromIterator<(L, T)> for TranslationTable {
    fn from_iter<I: IntoIterator<Item = (L, T)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(l, t)| (l.into(), t.into()))
                .collect(),
        }
    }
}

/// The built-in gesture set: `hello`, `one` and `welcome` with their Sinhala display strings.
pub fn sinhala() -> (Vocabulary, TranslationTable) {
    const TABLE: &[(&str, &str)] = &[
        ("hello", "ආයුබෝවන්"),
        ("one", "එක"),
        ("welcome", "සාදරයෙන් පිළිගනිමු"),
    ];

    let vocabulary = Vocabulary {
        labels: TABLE.iter().map(|(label, _)| label.to_string()).collect(),
    };
    (vocabulary, TABLE.iter().copied().collect())
}

/// Returns the display string for the class at `label_index`.
///
/// Labels without an entry in `table` translate to an empty string.
///
/// # Errors
///
/// Returns [`Error::LabelIndexOutOfRange`] if `label_index` is not a valid index into
/// `vocabulary`, which means the classifier and vocabulary don't belong together.
pub fn translate(
    label_index: usize,
    vocabulary: &Vocabulary,
    table: &TranslationTable,
) -> Result<String> {
    let label = vocabulary
        .get(label_index)
        .ok_or(Error::LabelIndexOutOfRange {
            index: label_index,
            len: vocabulary.len(),
        })?;
    Ok(table.get(label).unwrap_or_default().to_string())
}
