use crate::categorical::{Categorical, MISSING_CODE};
use crate::error::PrepError;
use anyhow::Error;

/// One named column of per-cell (obs) or per-gene (var) annotations.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    /// Numeric values; NaN marks a missing value
    Numeric(Vec<f64>),
    /// Labels from a small set of categories
    Categorical(Categorical),
    /// Free text; the empty string marks a missing value
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(c) => c.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Column::Numeric(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&Categorical> {
        match self {
            Column::Categorical(c) => Some(c),
            _ => None,
        }
    }

    /// Render every entry as a string. Missing numeric values become the empty string.
    pub fn to_text(&self) -> Vec<String> {
        match self {
            Column::Numeric(v) => v
                .iter()
                .map(|x| if x.is_nan() { String::new() } else { x.to_string() })
                .collect(),
            Column::Categorical(c) => c.labels(),
            Column::Text(v) => v.clone(),
        }
    }

    /// Keep the entries at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(indices.iter().map(|&i| v[i]).collect()),
            Column::Categorical(c) => Column::Categorical(c.select(indices)),
            Column::Text(v) => Column::Text(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// A column of the same kind holding `n` missing values.
    pub fn missing_like(&self, n: usize) -> Column {
        match self {
            Column::Numeric(_) => Column::Numeric(vec![f64::NAN; n]),
            Column::Categorical(c) => Column::Categorical(Categorical {
                categories: c.categories.clone(),
                codes: vec![MISSING_CODE; n],
            }),
            Column::Text(_) => Column::Text(vec![String::new(); n]),
        }
    }

    /// Append `other` to this column. Columns of different kinds are both rendered as text.
    pub fn append(&mut self, other: &Column) {
        match (&mut *self, other) {
            (Column::Numeric(a), Column::Numeric(b)) => a.extend_from_slice(b),
            (Column::Categorical(a), Column::Categorical(b)) => a.append(b),
            (Column::Text(a), Column::Text(b)) => a.extend(b.iter().cloned()),
            (this, other) => {
                let mut text = this.to_text();
                text.extend(other.to_text());
                *this = Column::Text(text);
            }
        }
    }
}

/// Ordered table of named annotation columns, all of the same length. Row count is tracked
/// separately so an empty table still knows how many rows it annotates.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Annotations {
    n_rows: usize,
    columns: Vec<(String, Column)>,
}

impl Annotations {
    /// An empty table annotating `n_rows` rows.
    pub fn new(n_rows: usize) -> Annotations {
        Annotations {
            n_rows,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, col)| (name.as_str(), col))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Fetch a column or fail with `PrepError::MissingColumn`.
    pub fn column(&self, name: &str) -> Result<&Column, Error> {
        self.get(name)
            .ok_or_else(|| PrepError::MissingColumn(name.to_string()).into())
    }

    /// Fetch a numeric column or fail.
    pub fn numeric(&self, name: &str) -> Result<&[f64], Error> {
        self.column(name)?.as_numeric().ok_or_else(|| {
            PrepError::InvalidArgument(format!("column '{name}' is not numeric")).into()
        })
    }

    /// Add a column, replacing any existing column of the same name in place.
    pub fn insert(&mut self, name: &str, column: Column) -> Result<(), Error> {
        if column.len() != self.n_rows {
            return Err(PrepError::ShapeMismatch {
                expected: self.n_rows,
                actual: column.len(),
            }
            .into());
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = column,
            None => self.columns.push((name.to_string(), column)),
        }
        Ok(())
    }

    /// Keep the rows at `indices`, in that order, across every column.
    pub fn select(&self, indices: &[usize]) -> Annotations {
        Annotations {
            n_rows: indices.len(),
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.select(indices)))
                .collect(),
        }
    }

    /// Append the rows of `other` below this table. Columns missing on either side are padded
    /// with missing values.
    pub fn append(&mut self, other: &Annotations) {
        for (name, col) in &mut self.columns {
            match other.get(name) {
                Some(o) => col.append(o),
                None => {
                    let pad = col.missing_like(other.n_rows);
                    col.append(&pad);
                }
            }
        }
        for (name, col) in &other.columns {
            if !self.contains(name) {
                let mut padded = col.missing_like(self.n_rows);
                padded.append(col);
                self.columns.push((name.clone(), padded));
            }
        }
        self.n_rows += other.n_rows;
    }
}
