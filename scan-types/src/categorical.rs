use anyhow::{format_err, Error};
use serde::{self, Deserialize, Serialize};

/// Code marking a missing value in a `Categorical`.
pub const MISSING_CODE: i32 = -1;

/// A column of labels drawn from a small set of categories. Each entry is stored as an index
/// into `categories`, or `MISSING_CODE`.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Categorical {
    pub categories: Vec<String>,
    pub codes: Vec<i32>,
}

impl Categorical {
    pub fn new(categories: Vec<String>, codes: Vec<i32>) -> Result<Categorical, Error> {
        let n = categories.len() as i32;
        if let Some(bad) = codes.iter().find(|&&c| c != MISSING_CODE && !(0..n).contains(&c)) {
            return Err(format_err!("code {} out of range for {} categories", bad, n));
        }
        Ok(Categorical { categories, codes })
    }

    /// Build from per-entry labels. Categories are kept in order of first appearance.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Categorical {
        let mut categories: Vec<String> = Vec::new();
        let codes = labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                match categories.iter().position(|c| c == label) {
                    Some(idx) => idx as i32,
                    None => {
                        categories.push(label.to_string());
                        (categories.len() - 1) as i32
                    }
                }
            })
            .collect();
        Categorical { categories, codes }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Label of entry `i`, or None if it is missing.
    pub fn label(&self, i: usize) -> Option<&str> {
        match self.codes[i] {
            MISSING_CODE => None,
            c => Some(self.categories[c as usize].as_str()),
        }
    }

    /// Labels for all entries, with missing values rendered as the empty string.
    pub fn labels(&self) -> Vec<String> {
        (0..self.len())
            .map(|i| self.label(i).unwrap_or_default().to_string())
            .collect()
    }

    /// Get the index of a category. Returns None if the category is not present.
    fn get_category_index(&self, label: &str) -> Option<usize> {
        self.categories.iter().position(|x| x == label)
    }

    /// Returns either the entries carrying the given label or None if the label doesn't exist.
    pub fn get_indices(&self, label: &str) -> Option<Vec<usize>> {
        self.get_category_index(label).map(|idx| {
            self.codes
                .iter()
                .enumerate()
                .filter(|(_, &c)| c == idx as i32)
                .map(|(i, _)| i)
                .collect()
        })
    }

    /// Keep the entries at `indices`, in that order. Categories are left untouched, so a category
    /// may end up unused.
    pub fn select(&self, indices: &[usize]) -> Categorical {
        Categorical {
            categories: self.categories.clone(),
            codes: indices.iter().map(|&i| self.codes[i]).collect(),
        }
    }

    /// Append `other`, remapping its codes onto the union of both category lists.
    pub fn append(&mut self, other: &Categorical) {
        let remap: Vec<i32> = other
            .categories
            .iter()
            .map(|cat| match self.get_category_index(cat) {
                Some(idx) => idx as i32,
                None => {
                    self.categories.push(cat.clone());
                    (self.categories.len() - 1) as i32
                }
            })
            .collect();
        self.codes.extend(other.codes.iter().map(|&c| match c {
            MISSING_CODE => MISSING_CODE,
            c => remap[c as usize],
        }));
    }
}
