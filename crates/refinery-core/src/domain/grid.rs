//! Rectangular integer grids, the value type flowing through every transform.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GridError;

/// A rectangular 2-D matrix of integer cells.
///
/// Every row has the same length. Zero rows (or rows of zero length) form a
/// legal degenerate grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<i64>>", into = "Vec<Vec<i64>>")]
pub struct Grid {
    rows: Vec<Vec<i64>>,
}

impl Grid {
    /// Build a grid, rejecting ragged rows.
    pub fn new(rows: Vec<Vec<i64>>) -> Result<Self, GridError> {
        if let Some(first) = rows.first() {
            let width = first.len();
            for (index, row) in rows.iter().enumerate() {
                if row.len() != width {
                    return Err(GridError::Ragged {
                        row: index,
                        expected: width,
                        found: row.len(),
                    });
                }
            }
        }
        Ok(Self { rows })
    }

    /// A grid with no rows.
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    /// Validate an arbitrary JSON value as a grid.
    ///
    /// Used on sandbox output: anything that is not an array of equally long
    /// arrays of integers is reported, never coerced.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, GridError> {
        let outer = value.as_array().ok_or_else(|| GridError::NotAGrid {
            detail: format!("expected a list of rows, got {}", json_kind(value)),
        })?;

        let mut rows = Vec::with_capacity(outer.len());
        for (r, row) in outer.iter().enumerate() {
            let cells = row.as_array().ok_or_else(|| GridError::NotAGrid {
                detail: format!("row {r} is {}, expected a list of cells", json_kind(row)),
            })?;
            let mut parsed = Vec::with_capacity(cells.len());
            for (c, cell) in cells.iter().enumerate() {
                let v = cell.as_i64().ok_or_else(|| GridError::NonIntegerCell {
                    row: r,
                    col: c,
                    value: cell.to_string(),
                })?;
                parsed.push(v);
            }
            rows.push(parsed);
        }

        Self::new(rows)
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }

    pub fn cell_count(&self) -> usize {
        let (h, w) = self.shape();
        h * w
    }

    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn rows(&self) -> &[Vec<i64>] {
        &self.rows
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!(self.rows)
    }
}

impl TryFrom<Vec<Vec<i64>>> for Grid {
    type Error = GridError;

    fn try_from(rows: Vec<Vec<i64>>) -> Result<Self, Self::Error> {
        Grid::new(rows)
    }
}

impl From<Grid> for Vec<Vec<i64>> {
    fn from(grid: Grid) -> Self {
        grid.rows
    }
}

/// One row per line, cells separated by spaces.
impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return write!(f, "(empty grid)");
        }
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let line: Vec<String> = row.iter().map(i64::to_string).collect();
            write!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_and_cells() {
        let g = Grid::new(vec![vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        assert_eq!(g.shape(), (2, 3));
        assert_eq!(g.cell_count(), 6);
        assert_eq!(g.get(1, 2), Some(6));
        assert_eq!(g.get(2, 0), None);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = Grid::new(vec![vec![1, 2], vec![3]]).unwrap_err();
        match err {
            GridError::Ragged { row, expected, found } => {
                assert_eq!((row, expected, found), (1, 2, 1));
            }
            other => panic!("expected Ragged, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_grids_are_legal() {
        assert!(Grid::empty().is_empty());
        let zero_width = Grid::new(vec![vec![], vec![]]).unwrap();
        assert_eq!(zero_width.shape(), (2, 0));
        assert!(zero_width.is_empty());
    }

    #[test]
    fn test_from_value_rejects_wrong_dimensionality() {
        assert!(matches!(
            Grid::from_value(&json!([1, 2, 3])),
            Err(GridError::NotAGrid { .. })
        ));
        assert!(matches!(
            Grid::from_value(&json!(7)),
            Err(GridError::NotAGrid { .. })
        ));
        assert!(matches!(
            Grid::from_value(&json!([[1, "x"]])),
            Err(GridError::NonIntegerCell { row: 0, col: 1, .. })
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let g: Grid = serde_json::from_str("[[0,1],[1,0]]").unwrap();
        assert_eq!(g.shape(), (2, 2));
        assert!(serde_json::from_str::<Grid>("[[0,1],[1]]").is_err());
    }

    #[test]
    fn test_display() {
        let g = Grid::new(vec![vec![1, 0], vec![0, 1]]).unwrap();
        assert_eq!(g.to_string(), "1 0\n0 1");
        assert_eq!(Grid::empty().to_string(), "(empty grid)");
    }
}
