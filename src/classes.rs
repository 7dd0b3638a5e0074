//! Land-cover class label set.
//!
//! The set is an ordinary value, never a global: every component that needs
//! class names or ids receives a `&ClassSet`, so tests can run with smaller
//! or reordered sets.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Integer class id, `0..ClassSet::len()`.
pub type ClassId = usize;

/// One entry of the label set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub id: ClassId,
    pub name: String,
    pub abbreviation: String,
}

/// Ordered, closed set of class labels. Ids are the positions in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ClassLabel>", into = "Vec<ClassLabel>")]
pub struct ClassSet {
    labels: Vec<ClassLabel>,
}

impl ClassSet {
    /// Build a set from `(name, abbreviation)` pairs; ids follow list order.
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (S, S)>) -> Self {
        let labels = entries
            .into_iter()
            .enumerate()
            .map(|(id, (name, abbreviation))| ClassLabel {
                id,
                name: name.into(),
                abbreviation: abbreviation.into(),
            })
            .collect();
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[ClassLabel] {
        &self.labels
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassLabel> {
        self.labels.get(id)
    }

    pub fn name(&self, id: ClassId) -> Option<&str> {
        self.get(id).map(|l| l.name.as_str())
    }

    /// Look up a class by full name or abbreviation.
    pub fn id_of(&self, name: &str) -> Result<ClassId> {
        self.labels
            .iter()
            .find(|l| l.name == name || l.abbreviation == name)
            .map(|l| l.id)
            .ok_or_else(|| Error::UnknownClass(name.to_string()))
    }

    /// Check that `id` belongs to the set.
    pub fn check(&self, id: ClassId) -> Result<ClassId> {
        if id < self.len() {
            Ok(id)
        } else {
            Err(Error::UnknownClass(format!("id {id}")))
        }
    }

    /// Translate a priority list of class names into ids.
    pub fn resolve_order<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ClassId>> {
        names.iter().map(|n| self.id_of(n.as_ref())).collect()
    }

    pub fn abbreviations(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.abbreviation.as_str()).collect()
    }
}

impl Default for ClassSet {
    /// The eight reserve land-cover classes.
    fn default() -> Self {
        Self::new([
            ("BE_bare_earth", "BE"),
            ("HL_herbaceous_live", "HL"),
            ("MM_man_made_object", "MM"),
            ("SD_shrub_dead", "SD"),
            ("SL_shrub_live", "SL"),
            ("TD_tree_dead", "TD"),
            ("TL_tree_live", "TL"),
            ("W_water", "W"),
        ])
    }
}

impl TryFrom<Vec<ClassLabel>> for ClassSet {
    type Error = String;

    fn try_from(labels: Vec<ClassLabel>) -> std::result::Result<Self, Self::Error> {
        for (i, l) in labels.iter().enumerate() {
            if l.id != i {
                return Err(format!(
                    "class '{}' has id {} but is listed at position {}",
                    l.name, l.id, i
                ));
            }
        }
        Ok(Self { labels })
    }
}

impl From<ClassSet> for Vec<ClassLabel> {
    fn from(set: ClassSet) -> Self {
        set.labels
    }
}

/// Tiebreak order for the reserve maps, most preferred first.
pub fn default_tiebreak_order() -> Vec<String> {
    [
        "SD_shrub_dead",
        "MM_man_made_object",
        "W_water",
        "HL_herbaceous_live",
        "SL_shrub_live",
        "TD_tree_dead",
        "TL_tree_live",
        "BE_bare_earth",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
