/// Shared tile grid, one string per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLayout {
    rows: Vec<String>,
    version: u64,
}

impl MapLayout {
    /// Wrap an initial layout.
    pub fn new(rows: Vec<String>) -> Self {
        Self { rows, version: 0 }
    }

    /// Current rows.
    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    /// Number of replacements applied since startup.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Swap in a new layout.
    pub fn replace(&mut self, rows: Vec<String>) {
        self.rows = rows;
        self.version += 1;
    }
}
