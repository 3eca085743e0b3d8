//! Event-record IO. Event tables are Parquet files; the TTree-style dataset
//! name travels in the Arrow schema metadata under [`TREE_METADATA_KEY`].

use anyhow::{anyhow, bail, Context};
use arrow::array::{Array, ArrayRef, Float64Array, PrimitiveArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type, Int8Type, Schema, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use ndarray::{Array1, Array2, ArrayView1};
use num_traits::ToPrimitive;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub const TREE_METADATA_KEY: &str = "hepviz.tree";

/// Transient in-memory event table: one `f64` column per branch, one row per
/// event. Integer branches are widened on load.
#[derive(Debug, Clone)]
pub struct EventTable {
    names: Vec<String>,
    columns: Vec<Array1<f64>>,
    index: HashMap<String, usize>,
}

impl EventTable {
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> anyhow::Result<Self> {
        if columns.is_empty() {
            bail!("an event table needs at least one branch");
        }
        let n_events = columns[0].1.len();
        let mut names = Vec::with_capacity(columns.len());
        let mut cols = Vec::with_capacity(columns.len());
        let mut index = HashMap::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != n_events {
                bail!(
                    "branch '{}' has {} entries but '{}' has {}",
                    name,
                    values.len(),
                    names[0],
                    n_events
                );
            }
            if index.insert(name.clone(), cols.len()).is_some() {
                bail!("duplicate branch name '{}'", name);
            }
            names.push(name);
            cols.push(Array1::from_vec(values));
        }
        Ok(EventTable {
            names,
            columns: cols,
            index,
        })
    }

    pub fn n_events(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn n_branches(&self) -> usize {
        self.columns.len()
    }

    pub fn branch_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> anyhow::Result<ArrayView1<f64>> {
        self.index
            .get(name)
            .map(|&i| self.columns[i].view())
            .ok_or_else(|| branch_not_found(name, &self.names))
    }

    /// Selected branches as an event x feature matrix, in the given order.
    pub fn to_matrix(&self, branches: &[&str]) -> anyhow::Result<Array2<f64>> {
        if branches.is_empty() {
            bail!("no branches selected");
        }
        let mut out = Array2::zeros((self.n_events(), branches.len()));
        for (j, name) in branches.iter().enumerate() {
            let col = self.column(name)?;
            out.column_mut(j).assign(&col);
        }
        Ok(out)
    }
}

fn branch_not_found(name: &str, available: &[String]) -> anyhow::Error {
    anyhow!("branch '{}' not found; available branches: {:?}", name, available)
}

fn check_tree(schema: &Schema, tree: &str, path: &Path) -> anyhow::Result<()> {
    match schema.metadata().get(TREE_METADATA_KEY) {
        Some(tagged) if tagged == tree => Ok(()),
        Some(tagged) => bail!(
            "tree '{}' not found in {} (file contains '{}')",
            tree,
            path.display(),
            tagged
        ),
        None => {
            log::debug!(
                "{} carries no tree tag, accepting requested tree '{}'",
                path.display(),
                tree
            );
            Ok(())
        }
    }
}

fn decode_primitive<T>(array: &dyn Array) -> Option<Vec<f64>>
where
    T: ArrowPrimitiveType,
    T::Native: ToPrimitive,
{
    array.as_any().downcast_ref::<PrimitiveArray<T>>().map(|a| {
        a.iter()
            .map(|v| v.and_then(|x| x.to_f64()).unwrap_or(f64::NAN))
            .collect()
    })
}

fn numeric_values(array: &ArrayRef) -> Option<Vec<f64>> {
    let array = array.as_ref();
    match array.data_type() {
        DataType::Float64 => decode_primitive::<Float64Type>(array),
        DataType::Float32 => decode_primitive::<Float32Type>(array),
        DataType::Int64 => decode_primitive::<Int64Type>(array),
        DataType::Int32 => decode_primitive::<Int32Type>(array),
        DataType::Int16 => decode_primitive::<Int16Type>(array),
        DataType::Int8 => decode_primitive::<Int8Type>(array),
        DataType::UInt64 => decode_primitive::<UInt64Type>(array),
        DataType::UInt32 => decode_primitive::<UInt32Type>(array),
        DataType::UInt16 => decode_primitive::<UInt16Type>(array),
        DataType::UInt8 => decode_primitive::<UInt8Type>(array),
        _ => None,
    }
}

fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::Int16
            | DataType::Int8
            | DataType::UInt64
            | DataType::UInt32
            | DataType::UInt16
            | DataType::UInt8
    )
}

/// Read every numeric branch of the named tree into an [`EventTable`].
/// Non-numeric branches are skipped.
pub fn read_table(path: impl AsRef<Path>, tree: &str) -> anyhow::Result<EventTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open event file {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("{} is not a readable Parquet file", path.display()))?;
    let schema = builder.schema().clone();
    check_tree(&schema, tree, path)?;

    let mut names = Vec::new();
    for field in schema.fields() {
        if is_numeric(field.data_type()) {
            names.push(field.name().clone());
        } else {
            log::debug!(
                "skipping non-numeric branch '{}' ({:?})",
                field.name(),
                field.data_type()
            );
        }
    }
    if names.is_empty() {
        bail!("no numeric branches in {}", path.display());
    }

    let mut values: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    let reader = builder.build()?;
    for batch in reader {
        let batch = batch?;
        for (i, name) in names.iter().enumerate() {
            let column = batch
                .column_by_name(name)
                .ok_or_else(|| anyhow!("branch '{}' missing from record batch", name))?;
            let decoded = numeric_values(column)
                .ok_or_else(|| anyhow!("branch '{}' could not be decoded", name))?;
            values[i].extend(decoded);
        }
    }

    EventTable::from_columns(names.into_iter().zip(values).collect())
}

/// Write an event table as a Parquet file tagged with the tree name.
pub fn write_table(path: impl AsRef<Path>, tree: &str, table: &EventTable) -> anyhow::Result<()> {
    let path = path.as_ref();
    let fields: Vec<Field> = table
        .branch_names()
        .iter()
        .map(|name| Field::new(name.as_str(), DataType::Float64, false))
        .collect();
    let mut metadata = HashMap::new();
    metadata.insert(TREE_METADATA_KEY.to_string(), tree.to_string());
    let schema = Arc::new(Schema::new_with_metadata(fields, metadata));

    let arrays: Vec<ArrayRef> = table
        .columns
        .iter()
        .map(|c| Arc::new(Float64Array::from(c.to_vec())) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let file = File::create(path)
        .with_context(|| format!("failed to create event file {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    log::info!(
        "wrote {} events x {} branches to {} (tree '{}')",
        table.n_events(),
        table.n_branches(),
        path.display(),
        tree
    );
    Ok(())
}

/// Branch names of the named tree, in schema order.
pub fn list_branches(path: impl AsRef<Path>, tree: &str) -> anyhow::Result<Vec<String>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open event file {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("{} is not a readable Parquet file", path.display()))?;
    check_tree(builder.schema(), tree, path)?;
    Ok(builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect())
}

/// Selected branches of the named tree as an event x feature matrix.
pub fn load_branches(
    path: impl AsRef<Path>,
    tree: &str,
    branches: &[&str],
) -> anyhow::Result<Array2<f64>> {
    let table = read_table(path, tree)?;
    table.to_matrix(branches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use arrow::array::StringArray;
    use tempfile::tempdir;

    fn sample_table() -> EventTable {
        EventTable::from_columns(vec![
            ("px".to_string(), vec![1.0, 2.0, 3.0]),
            ("py".to_string(), vec![4.0, 5.0, 6.0]),
            ("label".to_string(), vec![0.0, 1.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        let table = sample_table();
        write_table(&path, "Events", &table).unwrap();

        let loaded = read_table(&path, "Events").unwrap();
        assert_eq!(loaded.branch_names(), table.branch_names());
        assert_eq!(loaded.n_events(), 3);
        for name in ["px", "py", "label"] {
            let a = table.column(name).unwrap();
            let b = loaded.column(name).unwrap();
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*x, *y);
            }
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.parquet");
        let err = read_table(&path, "Events").unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }

    #[test]
    fn test_tree_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        write_table(&path, "Events", &sample_table()).unwrap();

        let err = read_table(&path, "MissingTree").unwrap_err();
        assert!(err.to_string().contains("tree 'MissingTree' not found"));
    }

    #[test]
    fn test_list_branches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        write_table(&path, "Events", &sample_table()).unwrap();

        let branches = list_branches(&path, "Events").unwrap();
        assert_eq!(branches, vec!["px", "py", "label"]);
    }

    #[test]
    fn test_load_branches_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        write_table(&path, "Events", &sample_table()).unwrap();

        let x = load_branches(&path, "Events", &["px", "py"]).unwrap();
        assert_eq!(x.shape(), &[3, 2]);
        assert_abs_diff_eq!(x[[2, 1]], 6.0);
    }

    #[test]
    fn test_missing_branch() {
        let table = sample_table();
        let err = table.to_matrix(&["px", "pz"]).unwrap_err();
        assert!(err.to_string().contains("branch 'pz' not found"));
    }

    #[test]
    fn test_from_columns_length_mismatch() {
        let err = EventTable::from_columns(vec![
            ("px".to_string(), vec![1.0, 2.0]),
            ("py".to_string(), vec![1.0]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("entries"));
    }

    #[test]
    fn test_from_columns_duplicate_name() {
        let err = EventTable::from_columns(vec![
            ("px".to_string(), vec![1.0]),
            ("px".to_string(), vec![2.0]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate branch"));
    }

    #[test]
    fn test_skips_non_numeric_branches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.parquet");

        let mut metadata = HashMap::new();
        metadata.insert(TREE_METADATA_KEY.to_string(), "Events".to_string());
        let schema = Arc::new(Schema::new_with_metadata(
            vec![
                Field::new("name", DataType::Utf8, false),
                Field::new("e", DataType::Float64, false),
            ],
            metadata,
        ));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef,
                Arc::new(Float64Array::from(vec![1.5, 2.5])) as ArrayRef,
            ],
        )
        .unwrap();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let table = read_table(&path, "Events").unwrap();
        assert_eq!(table.branch_names(), ["e"]);
        assert_eq!(table.n_events(), 2);
    }

    #[test]
    fn test_integer_branches_widen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ints.parquet");

        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(arrow::array::Int32Array::from(vec![1, 2, 3])) as ArrayRef],
        )
        .unwrap();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        // Untagged file: any requested tree name is accepted.
        let table = read_table(&path, "Events").unwrap();
        assert_abs_diff_eq!(table.column("n").unwrap()[2], 3.0);
    }
}
