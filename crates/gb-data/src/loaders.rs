//! Loading of feature and label tables from delimited or Parquet files.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use csv::ReaderBuilder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, info};

use gb_types::{DataError, Dataset, DenseMatrix, FeatureTable, GbResult, InstanceId};

/// On-disk layout of a feature or label table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Comma- or tab-separated text with a header row.
    Delimited,
    Parquet,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") || ext.eq_ignore_ascii_case("pq") => {
                Self::Parquet
            }
            _ => Self::Delimited,
        }
    }
}

/// Reads identifier-keyed numeric tables. The first column holds the
/// instance ids, every other column is a named numeric feature.
#[derive(Debug, Clone, Default)]
pub struct TableLoader {
    delimiter: Option<u8>,
}

impl TableLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed delimiter instead of sniffing it from the header.
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> GbResult<FeatureTable> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DataError::LoadingFailed {
                message: format!("no such file: {}", path.display()),
            }
            .into());
        }
        match TableFormat::from_path(path) {
            TableFormat::Delimited => self.load_delimited(path),
            TableFormat::Parquet => self.load_parquet(path),
        }
    }

    /// Load a CSV/TSV table.
    pub fn load_delimited<P: AsRef<Path>>(&self, path: P) -> GbResult<FeatureTable> {
        let path = path.as_ref();
        let delimiter = match self.delimiter {
            Some(d) => d,
            None => sniff_delimiter(path)?,
        };
        info!(
            "Loading delimited table from: {} (delimiter {:?})",
            path.display(),
            delimiter as char
        );

        let mut rdr = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open {}: {}", path.display(), e),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read header of {}: {}", path.display(), e),
            })?
            .clone();
        if headers.len() < 2 {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "{} needs an id column and at least one value column",
                    path.display()
                ),
            }
            .into());
        }
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        debug!(columns = columns.len(), "table header read");

        let mut ids = Vec::new();
        let mut values = Vec::new();
        for (line_num, result) in rdr.records().enumerate() {
            // Header is line 1.
            let line = line_num + 2;
            let record = result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read record at line {}: {}", line, e),
            })?;
            let mut fields = record.iter();
            let id = fields.next().unwrap_or_default().to_string();
            for (col, field) in columns.iter().zip(fields) {
                values.push(parse_value(field).ok_or_else(|| DataError::ParseError {
                    location: format!("{}:{} column {}", path.display(), line, col),
                    message: format!("not a number: {:?}", field),
                })?);
            }
            ids.push(id);
        }

        let matrix = DenseMatrix::from_row_major(ids.len(), columns.len(), values)?;
        let table = FeatureTable::new(ids, columns, matrix)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            table.n_rows(),
            table.n_columns(),
            path.display()
        );
        Ok(table)
    }

    /// Load a Parquet table: a string (or integer) id column followed by
    /// Float64/Int64 value columns.
    pub fn load_parquet<P: AsRef<Path>>(&self, path: P) -> GbResult<FeatureTable> {
        let path = path.as_ref();
        info!("Loading Parquet table from: {}", path.display());

        let file = File::open(path)?;
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| DataError::LoadingFailed {
                message: format!(
                    "Failed to create Parquet reader for {}: {}",
                    path.display(),
                    e
                ),
            })?;
        let columns: Vec<String> = builder
            .schema()
            .fields()
            .iter()
            .skip(1)
            .map(|f| f.name().clone())
            .collect();
        if columns.is_empty() {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "{} needs an id column and at least one value column",
                    path.display()
                ),
            }
            .into());
        }
        let reader = builder.build().map_err(|e| DataError::LoadingFailed {
            message: format!("Failed to build Parquet reader: {}", e),
        })?;

        let mut ids = Vec::new();
        let mut values = Vec::new();
        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read Parquet batch: {}", e),
            })?;
            append_batch(&batch, &mut ids, &mut values)?;
        }

        let matrix = DenseMatrix::from_row_major(ids.len(), columns.len(), values)?;
        let table = FeatureTable::new(ids, columns, matrix)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            table.n_rows(),
            table.n_columns(),
            path.display()
        );
        Ok(table)
    }
}

/// Tab wins whenever the header contains one.
fn sniff_delimiter(path: &Path) -> GbResult<u8> {
    let file = File::open(path)?;
    let mut header = String::new();
    BufReader::new(file)
        .read_line(&mut header)
        .map_err(|e| DataError::LoadingFailed {
            message: format!("Failed to read header of {}: {}", path.display(), e),
        })?;
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

/// Missing-value markers load as NaN; anything else must be numeric.
fn parse_value(field: &str) -> Option<f64> {
    match field {
        "" | "NA" | "NaN" | "nan" | "null" => Some(f64::NAN),
        other => other.parse::<f64>().ok(),
    }
}

fn append_batch(
    batch: &RecordBatch,
    ids: &mut Vec<InstanceId>,
    values: &mut Vec<f64>,
) -> GbResult<()> {
    let id_column = batch.column(0);
    let batch_ids: Vec<InstanceId> = match id_column.data_type() {
        DataType::Utf8 => {
            let arr = id_column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| DataError::InvalidFormat {
                    message: "Invalid id column in Parquet file".to_string(),
                })?;
            (0..arr.len()).map(|i| arr.value(i).to_string()).collect()
        }
        DataType::Int64 => {
            let arr = id_column
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| DataError::InvalidFormat {
                    message: "Invalid id column in Parquet file".to_string(),
                })?;
            (0..arr.len()).map(|i| arr.value(i).to_string()).collect()
        }
        other => {
            return Err(DataError::InvalidFormat {
                message: format!("Parquet id column must be Utf8 or Int64, found {other}"),
            }
            .into())
        }
    };

    let mut batch_columns: Vec<Vec<f64>> = Vec::with_capacity(batch.num_columns() - 1);
    let schema = batch.schema();
    for (c, field) in schema.fields().iter().enumerate().skip(1) {
        let column = batch.column(c);
        let parsed: Vec<f64> = match column.data_type() {
            DataType::Float64 => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| DataError::InvalidFormat {
                        message: format!("Invalid column {} in Parquet file", field.name()),
                    })?;
                (0..arr.len())
                    .map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) })
                    .collect()
            }
            DataType::Int64 => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| DataError::InvalidFormat {
                        message: format!("Invalid column {} in Parquet file", field.name()),
                    })?;
                (0..arr.len())
                    .map(|i| if arr.is_null(i) { f64::NAN } else { arr.value(i) as f64 })
                    .collect()
            }
            other => {
                return Err(DataError::InvalidFormat {
                    message: format!(
                        "Parquet column {} must be Float64 or Int64, found {other}",
                        field.name()
                    ),
                }
                .into())
            }
        };
        batch_columns.push(parsed);
    }

    for (row, id) in batch_ids.into_iter().enumerate() {
        ids.push(id);
        values.extend(batch_columns.iter().map(|col| col[row]));
    }
    Ok(())
}

/// Read a list with one entry per line, skipping blank lines.
///
/// Used for test-instance ids and feature-subset files.
pub fn read_list<P: AsRef<Path>>(path: P) -> GbResult<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| DataError::LoadingFailed {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Where the inputs of a run live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSources {
    pub features: PathBuf,
    /// Separate label table; when absent the target comes from `features`.
    pub labels: Option<PathBuf>,
    pub target: String,
    /// File listing the feature columns to keep.
    pub feature_subset: Option<PathBuf>,
}

impl DataSources {
    pub fn new(features: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            features: features.into(),
            labels: None,
            target: target.into(),
            feature_subset: None,
        }
    }

    pub fn with_labels(mut self, labels: impl Into<PathBuf>) -> Self {
        self.labels = Some(labels.into());
        self
    }

    pub fn with_feature_subset(mut self, subset: impl Into<PathBuf>) -> Self {
        self.feature_subset = Some(subset.into());
        self
    }

    /// Load and align everything into a [`Dataset`].
    pub fn load(&self) -> GbResult<Dataset> {
        let loader = TableLoader::new();
        let features = loader.load(&self.features)?;
        let labels = self
            .labels
            .as_ref()
            .map(|p| loader.load(p))
            .transpose()?;
        let subset = self.feature_subset.as_ref().map(read_list).transpose()?;
        if let Some(names) = &subset {
            info!("Using subset of {} features", names.len());
        }
        assemble_dataset(features, labels, &self.target, subset.as_deref())
    }
}

/// Resolve the target column and build the aligned dataset.
///
/// With a label table the target is read from it. Otherwise it is taken out
/// of the feature table. Either way the target never stays among the
/// features.
pub fn assemble_dataset(
    mut features: FeatureTable,
    labels: Option<FeatureTable>,
    target: &str,
    feature_subset: Option<&[String]>,
) -> GbResult<Dataset> {
    let from_features = features.take_column(target);
    let target_vector = match labels {
        Some(mut labels) => labels.take_column(target),
        None => from_features,
    }
    .ok_or_else(|| DataError::MissingTargetColumn {
        column: target.to_string(),
    })?;

    if let Some(names) = feature_subset {
        features = features.select_features(names)?;
    }
    let dataset = Dataset::new(features, target_vector)?;
    info!(
        column = target,
        instances = dataset.n_instances(),
        features = dataset.n_features(),
        "dataset assembled"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::ArrayRef;
    use arrow::datatypes::{Field, Schema};
    use gb_types::GbError;
    use parquet::arrow::ArrowWriter;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::{NamedTempFile, TempDir};

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_csv_loading() {
        let file = write_temp(".csv", "ID,a,b,height\nl1,1.0,2.0,10.5\nl2,3.0,NA,11.0\n");
        let table = TableLoader::new().load(file.path()).unwrap();

        assert_eq!(table.ids(), ["l1", "l2"]);
        assert_eq!(table.columns(), ["a", "b", "height"]);
        assert_eq!(table.values().row(0), [1.0, 2.0, 10.5]);
        assert!(table.values().get(1, 1).is_nan());
    }

    #[test]
    fn test_tab_is_sniffed() {
        let file = write_temp(".txt", "ID\ta,x\tb\nl1\t1\t2\n");
        let table = TableLoader::new().load(file.path()).unwrap();
        // The comma belongs to a column name, not a separator.
        assert_eq!(table.columns(), ["a,x", "b"]);
        assert_eq!(table.values().row(0), [1.0, 2.0]);
    }

    #[test]
    fn test_non_numeric_value_is_parse_error() {
        let file = write_temp(".csv", "ID,a\nl1,tall\n");
        let err = TableLoader::new().load(file.path()).unwrap_err();
        assert!(matches!(err, GbError::Data(DataError::ParseError { .. })));
    }

    #[test]
    fn test_ragged_rows_fail() {
        let file = write_temp(".csv", "ID,a,b\nl1,1,2\nl2,3\n");
        let err = TableLoader::new().load(file.path()).unwrap_err();
        assert!(matches!(err, GbError::Data(DataError::LoadingFailed { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = TableLoader::new().load("/nonexistent/table.csv").unwrap_err();
        assert!(matches!(err, GbError::Data(DataError::LoadingFailed { .. })));
    }

    #[test]
    fn test_parquet_loading() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("features.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new("ID", DataType::Utf8, false),
            Field::new("snp_1", DataType::Float64, true),
            Field::new("snp_2", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["l1", "l2", "l3"])) as ArrayRef,
                Arc::new(Float64Array::from(vec![Some(0.5), None, Some(-1.0)])) as ArrayRef,
                Arc::new(Int64Array::from(vec![0, 1, 2])) as ArrayRef,
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let table = TableLoader::new().load(&path).unwrap();
        assert_eq!(table.ids(), ["l1", "l2", "l3"]);
        assert_eq!(table.columns(), ["snp_1", "snp_2"]);
        assert_eq!(table.values().row(2), [-1.0, 2.0]);
        assert!(table.values().get(1, 0).is_nan());
    }

    #[test]
    fn test_read_list_skips_blank_lines() {
        let file = write_temp(".txt", "l3\n\n  l7 \nl9\n\n");
        assert_eq!(read_list(file.path()).unwrap(), vec!["l3", "l7", "l9"]);
    }

    #[test]
    fn test_target_from_feature_table() {
        let file = write_temp(".csv", "ID,a,b,height\nl1,1,2,10\nl2,3,4,11\n");
        let dataset = DataSources::new(file.path(), "height").load().unwrap();
        assert_eq!(dataset.feature_names(), ["a", "b"]);
        assert_eq!(dataset.target(), [10.0, 11.0]);
    }

    #[test]
    fn test_target_from_label_table_is_realigned() {
        let features = write_temp(".csv", "ID,a,height\nl1,1,99\nl2,3,99\n");
        let labels = write_temp(".csv", "ID,height\nl2,11\nl1,10\n");
        let dataset = DataSources::new(features.path(), "height")
            .with_labels(labels.path())
            .load()
            .unwrap();
        // The stale copy in the feature table is dropped.
        assert_eq!(dataset.feature_names(), ["a"]);
        assert_eq!(dataset.target(), [10.0, 11.0]);
    }

    #[test]
    fn test_missing_target_column() {
        let file = write_temp(".csv", "ID,a\nl1,1\n");
        let err = DataSources::new(file.path(), "height").load().unwrap_err();
        assert!(matches!(
            err,
            GbError::Data(DataError::MissingTargetColumn { ref column }) if column == "height"
        ));
    }

    #[test]
    fn test_feature_subset() {
        let file = write_temp(".csv", "ID,a,b,c,y\nl1,1,2,3,0\nl2,4,5,6,1\n");
        let subset = write_temp(".txt", "c\na\n");
        let dataset = DataSources::new(file.path(), "y")
            .with_feature_subset(subset.path())
            .load()
            .unwrap();
        assert_eq!(dataset.feature_names(), ["c", "a"]);
        assert_eq!(dataset.features().row(1), [6.0, 4.0]);

        let bad = write_temp(".txt", "zzz\n");
        let err = DataSources::new(file.path(), "y")
            .with_feature_subset(bad.path())
            .load()
            .unwrap_err();
        assert!(matches!(err, GbError::Data(DataError::MissingFeature { .. })));
    }
}
