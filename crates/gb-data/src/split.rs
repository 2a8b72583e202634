//! Train/test partition by a fixed list of held-out instance ids.

use std::collections::HashSet;

use tracing::info;

use gb_types::{DataError, Dataset, GbResult, Subset};

/// The held-out test rows and everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Subset,
    pub test: Subset,
}

impl Split {
    pub fn n_train(&self) -> usize {
        self.train.len()
    }

    pub fn n_test(&self) -> usize {
        self.test.len()
    }
}

/// Partition `dataset` into test rows (those listed in `test_ids`) and train
/// rows (all others). Duplicate test ids count once. Both sides keep the
/// dataset's row order.
pub fn split_dataset(dataset: &Dataset, test_ids: &[String]) -> GbResult<Split> {
    let mut wanted: HashSet<&str> = HashSet::with_capacity(test_ids.len());
    for id in test_ids {
        if !dataset.contains(id) {
            return Err(DataError::MissingIdentifier { id: id.clone() }.into());
        }
        wanted.insert(id.as_str());
    }

    let (test_rows, train_rows): (Vec<usize>, Vec<usize>) =
        (0..dataset.n_instances()).partition(|&r| wanted.contains(dataset.ids()[r].as_str()));

    if test_rows.is_empty() {
        return Err(DataError::InsufficientData {
            message: "test set is empty".to_string(),
        }
        .into());
    }
    if train_rows.is_empty() {
        return Err(DataError::InsufficientData {
            message: "every instance is in the test set, nothing left to train on".to_string(),
        }
        .into());
    }

    let split = Split {
        train: dataset.subset(&train_rows),
        test: dataset.subset(&test_rows),
    };
    info!(
        train = split.n_train(),
        test = split.n_test(),
        features = dataset.n_features(),
        "dataset split"
    );
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gb_types::{DenseMatrix, FeatureTable, GbError, TargetVector};
    use proptest::prelude::*;

    fn dataset(n: usize) -> Dataset {
        let ids: Vec<String> = (0..n).map(|i| format!("line_{i}")).collect();
        let rows: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64, (i * i) as f64]).collect();
        let table = FeatureTable::new(
            ids.clone(),
            vec!["f0".into(), "f1".into()],
            DenseMatrix::from_rows(&rows).unwrap(),
        )
        .unwrap();
        let target = TargetVector::new(ids, (0..n).map(|i| i as f64 * 10.0).collect()).unwrap();
        Dataset::new(table, target).unwrap()
    }

    #[test]
    fn test_basic_split() {
        let ds = dataset(6);
        let split = split_dataset(&ds, &["line_4".into(), "line_1".into()]).unwrap();
        assert_eq!(split.test.ids(), ["line_1", "line_4"]);
        assert_eq!(split.train.ids(), ["line_0", "line_2", "line_3", "line_5"]);
        assert_eq!(split.test.target(), [10.0, 40.0]);
        assert_eq!(split.test.features().row(1), [4.0, 16.0]);
    }

    #[test]
    fn test_unknown_id_rejected() {
        let ds = dataset(4);
        let err = split_dataset(&ds, &["line_1".into(), "line_99".into()]).unwrap_err();
        assert!(matches!(
            err,
            GbError::Data(DataError::MissingIdentifier { ref id }) if id == "line_99"
        ));
    }

    #[test]
    fn test_empty_sides_rejected() {
        let ds = dataset(3);
        assert!(matches!(
            split_dataset(&ds, &[]).unwrap_err(),
            GbError::Data(DataError::InsufficientData { .. })
        ));
        let all: Vec<String> = ds.ids().to_vec();
        assert!(matches!(
            split_dataset(&ds, &all).unwrap_err(),
            GbError::Data(DataError::InsufficientData { .. })
        ));
    }

    proptest! {
        #[test]
        fn split_is_disjoint_covering_and_aligned(
            n in 2usize..60,
            picks in prop::collection::vec(any::<prop::sample::Index>(), 1..40),
        ) {
            let ds = dataset(n);
            // Indices may repeat; the test list is treated as a set.
            let test_ids: Vec<String> = picks.iter().map(|p| ds.ids()[p.index(n)].clone()).collect();
            let unique: HashSet<&String> = test_ids.iter().collect();
            prop_assume!(unique.len() < n);

            let split = split_dataset(&ds, &test_ids).unwrap();
            prop_assert_eq!(split.n_test(), unique.len());
            prop_assert_eq!(split.n_train() + split.n_test(), n);

            let train: HashSet<&String> = split.train.ids().iter().collect();
            let test: HashSet<&String> = split.test.ids().iter().collect();
            prop_assert!(train.is_disjoint(&test));
            prop_assert_eq!(&test, &unique);

            for subset in [&split.train, &split.test] {
                for (i, id) in subset.ids().iter().enumerate() {
                    let row = ds.position(id).unwrap();
                    prop_assert_eq!(subset.target()[i], ds.target()[row]);
                    prop_assert_eq!(subset.features().row(i), ds.features().row(row));
                }
                let positions: Vec<usize> =
                    subset.ids().iter().map(|id| ds.position(id).unwrap()).collect();
                prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
