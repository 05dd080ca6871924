use std::{collections::BTreeSet, fs, path::Path};

use crate::{DataErr, Result, SourceIndex};

/// A single labeled example of an item-mode dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub locator: String,
    pub label: u32,
}

/// The ordered list of examples of an item-mode dataset split.
///
/// The textual form has one `filename,label` pair per line, the line order defines
/// the unshuffled iteration order.
#[derive(Debug, Clone)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    num_classes: usize,
}

impl Manifest {
    /// Creates a new `Manifest` from its entries.
    ///
    /// # Returns
    /// `DataErr::Config` if the distinct labels don't form the dense range `0..num_classes`.
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self> {
        let labels: BTreeSet<u32> = entries.iter().map(|e| e.label).collect();
        let num_classes = labels.len();

        if let Some(&max) = labels.last() {
            if max as usize >= num_classes {
                return Err(DataErr::Config(format!(
                    "labels must be the dense range 0..{num_classes}, found label {max}"
                )));
            }
        }

        Ok(Self {
            entries,
            num_classes,
        })
    }

    /// Parses a manifest from its textual form.
    ///
    /// # Arguments
    /// * `text` - The manifest contents.
    ///
    /// # Returns
    /// The parsed manifest or `DataErr::Config` on any malformed line.
    pub fn parse(text: &str) -> Result<Self> {
        let entries = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
            .map(|(lineno, line)| parse_entry(lineno, line))
            .collect::<Result<Vec<_>>>()?;

        Self::new(entries)
    }

    /// Reads and parses the manifest file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DataErr::Config(format!("cannot read manifest '{}': {e}", path.display()))
        })?;

        Self::parse(&text)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn get(&self, idx: usize) -> Option<&ManifestEntry> {
        self.entries.get(idx)
    }
}

impl SourceIndex for Manifest {
    fn size(&self) -> usize {
        self.entries.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

fn parse_entry(lineno: usize, line: &str) -> Result<ManifestEntry> {
    let Some((locator, label)) = line.rsplit_once(',') else {
        return Err(DataErr::Config(format!(
            "manifest line {lineno}: expected 'filename,label', got '{line}'"
        )));
    };

    let locator = locator.trim();
    if locator.is_empty() {
        return Err(DataErr::Config(format!(
            "manifest line {lineno}: empty filename"
        )));
    }

    let label = label.trim().parse().map_err(|e| {
        DataErr::Config(format!(
            "manifest line {lineno}: invalid label '{}': {e}",
            label.trim()
        ))
    })?;

    Ok(ManifestEntry {
        locator: locator.to_string(),
        label,
    })
}
