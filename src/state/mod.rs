//! Row State Store: the input table with an explicit per-row status column.
//!
//! Column 1 holds the display name, column 2 the source locator. Completion is
//! recorded in a `status` column (`done`); everything else reads as pending.
//! The whole file is rewritten on every [`RowStateStore::persist`].

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Header of the status column
pub const STATUS_HEADER: &str = "status";

/// Completion state of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowState {
    #[default]
    Pending,
    Done,
}

impl RowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowState::Pending => "pending",
            RowState::Done => "done",
        }
    }

    /// Only an explicit `done` counts; blanks and unknown values are pending.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("done") {
            RowState::Done
        } else {
            RowState::Pending
        }
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work read from the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Display name from column 1, used as the suggested title
    pub name: String,

    /// Source locator (video URL) from column 2
    pub locator: String,

    /// Zero-based index of the data row
    pub row_index: usize,
}

impl WorkItem {
    /// Line number of the row in the table file (header is line 1)
    pub fn line_number(&self) -> usize {
        line_number(self.row_index)
    }
}

/// Line number in the table file for a zero-based data row index
pub fn line_number(row_index: usize) -> usize {
    row_index + 2
}

/// Tab for `.tsv` files, comma otherwise
fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

#[derive(Debug, Clone)]
struct TableRow {
    cells: Vec<String>,
    state: RowState,
}

impl TableRow {
    fn cell(&self, column: usize) -> &str {
        self.cells.get(column).map(|c| c.trim()).unwrap_or("")
    }
}

/// Table-backed store of per-row completion state
#[derive(Debug)]
pub struct RowStateStore {
    path: PathBuf,
    headers: Vec<String>,
    status_column: usize,
    rows: Vec<TableRow>,
}

impl RowStateStore {
    /// Load the table from `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_for(&path))
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open table {}", path.display()))?;

        let mut headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read header row of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut records = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.with_context(|| {
                format!("Failed to parse line {} of {}", line_number(index), path.display())
            })?;
            records.push(record.iter().map(str::to_string).collect::<Vec<String>>());
        }

        let status_column = match headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(STATUS_HEADER))
        {
            Some(column) => column,
            None => {
                // Unlabeled trailing cells keep their place; status goes after the widest row.
                let widest = records.iter().map(Vec::len).max().unwrap_or(0);
                let width = headers.len().max(widest).max(2);
                headers.resize(width, String::new());
                headers.push(STATUS_HEADER.to_string());
                headers.len() - 1
            }
        };

        if status_column < 2 {
            anyhow::bail!(
                "Column {} of {} is reserved for the {}, not the status",
                status_column + 1,
                path.display(),
                if status_column == 0 { "display name" } else { "source locator" }
            );
        }

        let rows: Vec<TableRow> = records
            .into_iter()
            .map(|mut cells| {
                if cells.len() < headers.len() {
                    cells.resize(headers.len(), String::new());
                }
                let state = RowState::parse(&cells[status_column]);
                TableRow { cells, state }
            })
            .collect();

        tracing::debug!(
            path = %path.display(),
            rows = rows.len(),
            "Loaded table"
        );

        Ok(Self {
            path,
            headers,
            status_column,
            rows,
        })
    }

    /// Backing file of this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data rows (header excluded)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn state(&self, row_index: usize) -> Option<RowState> {
        self.rows.get(row_index).map(|row| row.state)
    }

    /// True iff the row is marked done
    pub fn is_processed(&self, row_index: usize) -> bool {
        self.state(row_index) == Some(RowState::Done)
    }

    /// Display name of a row, possibly empty
    pub fn display_name(&self, row_index: usize) -> Option<&str> {
        self.rows.get(row_index).map(|row| row.cell(0))
    }

    /// Build the work item for a row when both name and locator are present
    pub fn work_item(&self, row_index: usize) -> Option<WorkItem> {
        let row = self.rows.get(row_index)?;
        let name = row.cell(0);
        let locator = row.cell(1);

        if name.is_empty() || locator.is_empty() {
            return None;
        }

        Some(WorkItem {
            name: name.to_string(),
            locator: locator.to_string(),
            row_index,
        })
    }

    /// Mark a row as done in memory; call [`persist`](Self::persist) right after
    pub fn mark_done(&mut self, row_index: usize) -> Result<()> {
        let status_column = self.status_column;
        let row = self
            .rows
            .get_mut(row_index)
            .with_context(|| format!("Row index {} is out of range", row_index))?;

        row.state = RowState::Done;
        row.cells[status_column] = RowState::Done.to_string();
        Ok(())
    }

    /// Durably rewrite the whole table.
    ///
    /// The table is written to a sibling temporary file, synced, then renamed
    /// over the existing table so a failed write never leaves a truncated table.
    pub fn persist(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter_for(&self.path))
                .flexible(true)
                .from_writer(tmp.as_file_mut());

            writer.write_record(&self.headers)?;
            for row in &self.rows {
                writer.write_record(&row.cells)?;
            }
            writer.flush()?;
        }

        // Keep the table's mode; the temporary file is created owner-only.
        if let Ok(metadata) = fs_err::metadata(&self.path) {
            tmp.as_file()
                .set_permissions(metadata.permissions())
                .context("Failed to copy table permissions")?;
        }

        tmp.as_file()
            .sync_all()
            .context("Failed to sync table to disk")?;

        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to save table {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "Table saved");
        Ok(())
    }
}
