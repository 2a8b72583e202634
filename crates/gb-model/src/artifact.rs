//! Versioned JSON persistence for fitted ensembles.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use gb_types::{GbResult, ModelError};

use crate::ensemble::{FittedState, GradientBoostingRegressor};
use crate::params::BoostParams;
use crate::tree::RegressionTree;

pub const ARTIFACT_FORMAT: &str = "gb-regressor";
pub const ARTIFACT_VERSION: u32 = 1;

/// Serialized form of a fitted [`GradientBoostingRegressor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format: String,
    pub format_version: u32,
    pub params: BoostParams,
    pub feature_names: Vec<String>,
    pub init_estimate: f64,
    pub trees: Vec<RegressionTree>,
    pub feature_importances: Vec<f64>,
    pub train_loss: Vec<f64>,
}

impl ModelArtifact {
    pub fn from_model(model: &GradientBoostingRegressor) -> GbResult<Self> {
        let state = model.state()?;
        Ok(Self {
            format: ARTIFACT_FORMAT.to_string(),
            format_version: ARTIFACT_VERSION,
            params: model.params().clone(),
            feature_names: state.feature_names.clone(),
            init_estimate: state.init_estimate,
            trees: state.trees.clone(),
            feature_importances: state.feature_importances.clone(),
            train_loss: state.train_loss.clone(),
        })
    }

    /// Validate the artifact and rebuild the model.
    pub fn into_model(self) -> GbResult<GradientBoostingRegressor> {
        let unsupported = |message: String| ModelError::UnsupportedArtifact { message };

        if self.format != ARTIFACT_FORMAT {
            return Err(unsupported(format!("unknown format {:?}", self.format)).into());
        }
        if self.format_version != ARTIFACT_VERSION {
            return Err(unsupported(format!(
                "format version {} (supported: {ARTIFACT_VERSION})",
                self.format_version
            ))
            .into());
        }
        self.params.validate()?;

        let n_features = self.feature_names.len();
        if self.feature_importances.len() != n_features {
            return Err(unsupported(format!(
                "{} importances for {n_features} features",
                self.feature_importances.len()
            ))
            .into());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check(n_features)
                .map_err(|e| unsupported(format!("tree {i}: {e}")))?;
        }

        Ok(GradientBoostingRegressor::from_parts(
            self.params,
            FittedState {
                init_estimate: self.init_estimate,
                trees: self.trees,
                feature_names: self.feature_names,
                feature_importances: self.feature_importances,
                train_loss: self.train_loss,
            },
        ))
    }

    pub fn write_json<W: Write>(&self, writer: W) -> GbResult<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn read_json<R: Read>(reader: R) -> GbResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

impl GradientBoostingRegressor {
    /// Write the fitted model to `path` as a JSON artifact.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GbResult<()> {
        let artifact = ModelArtifact::from_model(self)?;
        let mut writer = BufWriter::new(File::create(path)?);
        artifact.write_json(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> GbResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        ModelArtifact::read_json(reader)?.into_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{LossKind, MaxFeatures};
    use gb_types::{DenseMatrix, GbError};

    fn fitted() -> (GradientBoostingRegressor, DenseMatrix) {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i as f64).sin(), (i as f64 * 0.37).cos(), i as f64 / 7.0])
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| r[0] * 3.0 - r[1] + r[2] * r[2]).collect();
        let x = DenseMatrix::from_rows(&rows).unwrap();
        let params = BoostParams::default()
            .with_loss(LossKind::Huber { alpha: 0.9 })
            .with_learning_rate(0.137)
            .with_n_estimators(25)
            .with_max_features(MaxFeatures::Fraction(0.7))
            .with_random_state(4);
        let mut model = GradientBoostingRegressor::new(params).unwrap();
        model
            .fit(&x, &y, &["s".into(), "c".into(), "q".into()])
            .unwrap();
        (model, x)
    }

    #[test]
    fn reloaded_model_predicts_bit_identically() {
        let (model, x) = fitted();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();

        let loaded = GradientBoostingRegressor::load(&path).unwrap();
        let before = model.predict(&x).unwrap();
        let after = loaded.predict(&x).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(loaded, model);
    }

    #[test]
    fn unknown_version_rejected() {
        let (model, _) = fitted();
        let mut artifact = ModelArtifact::from_model(&model).unwrap();
        artifact.format_version = 99;
        let err = artifact.into_model().unwrap_err();
        assert!(matches!(
            err,
            GbError::Model(ModelError::UnsupportedArtifact { .. })
        ));
    }

    #[test]
    fn unknown_format_rejected() {
        let (model, _) = fitted();
        let mut buf = Vec::new();
        let mut artifact = ModelArtifact::from_model(&model).unwrap();
        artifact.format = "pickle".into();
        artifact.write_json(&mut buf).unwrap();

        let parsed = ModelArtifact::read_json(buf.as_slice()).unwrap();
        assert!(parsed.into_model().is_err());
    }

    #[test]
    fn unfitted_model_cannot_be_saved() {
        let model = GradientBoostingRegressor::new(BoostParams::default()).unwrap();
        assert!(matches!(
            ModelArtifact::from_model(&model),
            Err(GbError::Model(ModelError::NotFitted))
        ));
    }
}
