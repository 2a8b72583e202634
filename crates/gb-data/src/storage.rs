use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use gb_metrics::{RegressionMetrics, SummaryRow};
use gb_model::GradientBoostingRegressor;
use gb_optimizer::SearchOutcome;
use gb_types::{validation_error, GbError, GbResult};

/// Name of the cumulative results log shared by every run in a directory.
pub const RESULTS_LOG: &str = "RESULTS_gradboost.txt";

fn persistence_error(path: &Path, err: impl std::fmt::Display) -> GbError {
    GbError::ArtifactPersistence {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// A numeric table with labelled rows whose columns are added one at a time,
/// e.g. features x repetitions.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledTable {
    index_name: String,
    row_labels: Vec<String>,
    column_names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl LabeledTable {
    pub fn new(index_name: impl Into<String>, row_labels: Vec<String>) -> Self {
        Self {
            index_name: index_name.into(),
            row_labels,
            column_names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> GbResult<()> {
        let name = name.into();
        if values.len() != self.row_labels.len() {
            return Err(validation_error!(
                "column {} has {} values for {} rows",
                name,
                values.len(),
                self.row_labels.len()
            ));
        }
        self.column_names.push(name);
        self.columns.push(values);
        Ok(())
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        let idx = self.column_names.iter().position(|c| c == name)?;
        Some(&self.columns[idx])
    }

    pub fn n_rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> GbResult<()> {
        let path = path.as_ref();
        let mut wtr = csv::Writer::from_path(path).map_err(|e| persistence_error(path, e))?;

        let header = std::iter::once(self.index_name.as_str())
            .chain(self.column_names.iter().map(String::as_str));
        wtr.write_record(header)
            .map_err(|e| persistence_error(path, e))?;
        for (r, label) in self.row_labels.iter().enumerate() {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(label.clone());
            record.extend(self.columns.iter().map(|c| c[r].to_string()));
            wtr.write_record(&record)
                .map_err(|e| persistence_error(path, e))?;
        }
        wtr.flush().map_err(|e| persistence_error(path, e))?;
        Ok(())
    }
}

/// Writes every artifact of a run under one directory, named
/// `<prefix>_<what>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    prefix: String,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P, prefix: impl Into<String>) -> GbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| persistence_error(&dir, e))?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path_for(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", self.prefix, suffix))
    }

    pub fn model_path(&self, repetition: usize) -> PathBuf {
        self.path_for(&format!("model_rep_{repetition}.json"))
    }

    pub fn results_log_path(&self) -> PathBuf {
        self.dir.join(RESULTS_LOG)
    }

    pub fn save_model(
        &self,
        repetition: usize,
        model: &GradientBoostingRegressor,
    ) -> GbResult<PathBuf> {
        let path = self.model_path(repetition);
        model.save(&path).map_err(|e| persistence_error(&path, e))?;
        debug!(repetition, path = %path.display(), "model saved");
        Ok(path)
    }

    pub fn write_importances(&self, table: &LabeledTable) -> GbResult<PathBuf> {
        let path = self.path_for("imp.csv");
        table.write_csv(&path)?;
        Ok(path)
    }

    pub fn write_predictions(&self, table: &LabeledTable) -> GbResult<PathBuf> {
        let path = self.path_for("preds.csv");
        table.write_csv(&path)?;
        Ok(path)
    }

    /// One row per repetition, columns `<METRIC>_<group>` with group
    /// `val` or `test`.
    pub fn write_metric_rows(
        &self,
        group: &str,
        rows: &[(usize, RegressionMetrics)],
    ) -> GbResult<PathBuf> {
        let file = if group == "val" { "cv" } else { group };
        let path = self.path_for(&format!("{file}_results.csv"));

        let labels = rows.iter().map(|(j, _)| format!("rep_{j}")).collect();
        let mut table = LabeledTable::new("rep", labels);
        for (m, name) in RegressionMetrics::NAMES.iter().enumerate() {
            let values = rows.iter().map(|(_, metrics)| metrics.values()[m]).collect();
            table.push_column(format!("{name}_{group}"), values)?;
        }
        table.write_csv(&path)?;
        Ok(path)
    }

    pub fn write_search(&self, outcome: &SearchOutcome) -> GbResult<PathBuf> {
        let path = self.path_for("trials.json");
        let file = File::create(&path).map_err(|e| persistence_error(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, outcome)
            .map_err(|e| persistence_error(&path, e))?;
        writer.flush().map_err(|e| persistence_error(&path, e))?;
        Ok(path)
    }

    /// Run record keyed by the run id: metadata plus the aggregate.
    pub fn write_run_summary(&self, row: &SummaryRow) -> GbResult<PathBuf> {
        let path = self.path_for("run.json");
        let file = File::create(&path).map_err(|e| persistence_error(&path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, row).map_err(|e| persistence_error(&path, e))?;
        writer.flush().map_err(|e| persistence_error(&path, e))?;
        debug!(run_id = %row.metadata.run_id, path = %path.display(), "run record written");
        Ok(path)
    }

    /// Append one row to the shared results log, writing the header first
    /// when the log does not exist yet.
    pub fn append_summary(&self, row: &SummaryRow) -> GbResult<PathBuf> {
        let path = self.results_log_path();
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| persistence_error(&path, e))?;
        if is_new {
            writeln!(file, "{}", SummaryRow::header_line())
                .map_err(|e| persistence_error(&path, e))?;
        }
        writeln!(file, "{}", row.to_tsv()).map_err(|e| persistence_error(&path, e))?;
        info!(path = %path.display(), "results row appended");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gb_metrics::{aggregate, RunMetadata};
    use gb_model::BoostParams;
    use gb_types::DenseMatrix;
    use tempfile::TempDir;

    fn metrics(r2: f64) -> RegressionMetrics {
        RegressionMetrics::compute(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0 + r2]).unwrap()
    }

    #[test]
    fn test_labeled_table_csv() {
        let dir = TempDir::new().unwrap();
        let mut table = LabeledTable::new("feature", vec!["a".into(), "b".into()]);
        table.push_column("rep_0", vec![0.25, 0.75]).unwrap();
        table.push_column("rep_1", vec![0.5, 0.5]).unwrap();
        assert!(table.push_column("rep_2", vec![1.0]).is_err());

        let path = dir.path().join("t.csv");
        table.write_csv(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "feature,rep_0,rep_1\na,0.25,0.5\nb,0.75,0.5\n");
    }

    #[test]
    fn test_artifact_names() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("out"), "height").unwrap();
        assert!(store.dir().is_dir());
        assert_eq!(
            store.model_path(3).file_name().unwrap(),
            "height_model_rep_3.json"
        );

        let rows = vec![(0, metrics(0.0)), (2, metrics(0.5))];
        let cv = store.write_metric_rows("val", &rows).unwrap();
        let test = store.write_metric_rows("test", &rows).unwrap();
        assert_eq!(cv.file_name().unwrap(), "height_cv_results.csv");
        assert_eq!(test.file_name().unwrap(), "height_test_results.csv");

        let text = fs::read_to_string(cv).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "rep,MSE_val,RMSE_val,EVS_val,R2_val,PCC_val"
        );
        assert!(lines.next().unwrap().starts_with("rep_0,0,0,1,1,"));
        assert!(lines.next().unwrap().starts_with("rep_2,"));
    }

    #[test]
    fn test_model_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), "run").unwrap();
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let x = DenseMatrix::from_rows(&rows).unwrap();
        let y: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let mut model =
            GradientBoostingRegressor::new(BoostParams::default().with_n_estimators(5)).unwrap();
        model.fit(&x, &y, &["a".into(), "b".into()]).unwrap();

        let path = store.save_model(0, &model).unwrap();
        let loaded = GradientBoostingRegressor::load(path).unwrap();
        assert_eq!(loaded.predict(&x).unwrap(), model.predict(&x).unwrap());
    }

    #[test]
    fn test_unfitted_model_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), "run").unwrap();
        let model = GradientBoostingRegressor::new(BoostParams::default()).unwrap();
        let err = store.save_model(0, &model).unwrap_err();
        assert!(matches!(err, GbError::ArtifactPersistence { .. }));
    }

    #[test]
    fn test_results_log_header_written_once() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), "run").unwrap();
        let agg = aggregate(&[(metrics(0.1), metrics(0.2)), (metrics(0.3), metrics(0.4))]).unwrap();
        let row = SummaryRow::new(RunMetadata::new("height", "snp"), agg);

        store.append_summary(&row).unwrap();
        let path = store.append_summary(&row).unwrap();
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Date\tRunTime\tTag\tY"));
        assert_eq!(lines[1].split('\t').count(), 28);
        assert_eq!(lines[1].split('\t').nth(3), Some("height"));
    }

    #[test]
    fn test_run_record_carries_run_id() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path(), "height").unwrap();
        let agg = aggregate(&[(metrics(0.1), metrics(0.2))]).unwrap();
        let row = SummaryRow::new(RunMetadata::new("height", "snp"), agg);

        let path = store.write_run_summary(&row).unwrap();
        assert_eq!(path.file_name().unwrap(), "height_run.json");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(
            value["metadata"]["run_id"],
            row.metadata.run_id.to_string().as_str()
        );
        assert_eq!(value["aggregate"]["n_repetitions"], 1);
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let err = ArtifactStore::new(blocker.join("sub"), "run").unwrap_err();
        assert!(matches!(err, GbError::ArtifactPersistence { .. }));
    }
}
