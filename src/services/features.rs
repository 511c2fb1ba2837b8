//! Feature generation and storage
//!
//! A [`FeatureSet`] holds named generators for one ticker. Generation is
//! gap-driven like tick ingestion: each feature's presence index decides
//! which open dates still need generating, and all features for one date are
//! generated together so they share cached reads. Generated values pass a
//! quality gate before anything is stored — NaN or infinite values abort the
//! run rather than corrupting the presence index.

use crate::db::models::{FeatureColumn, FeatureFrame};
use crate::error::{AppError, Result};
use crate::services::{calendar, reconciler};
use crate::state::AppState;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A feature generator: computes the per-day wide table for one ticker-date.
pub type FeatureGenerator = Box<
    dyn for<'a> Fn(
            &'a AppState,
            &'a str,
            NaiveDate,
        ) -> Pin<Box<dyn Future<Output = Result<FeatureFrame>> + Send + 'a>>
        + Send
        + Sync,
>;

struct FeatureDef {
    name: String,
    description: String,
    generator: FeatureGenerator,
}

/// Registry of named feature generators for one ticker
pub struct FeatureSet {
    symbol: String,
    features: Vec<FeatureDef>,
    bulk: bool,
}

impl FeatureSet {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            features: Vec::new(),
            bulk: false,
        }
    }

    /// A set whose values go to per-day flat files instead of the
    /// relational value table. Presence still lives in the store.
    pub fn bulk(symbol: &str) -> Self {
        Self {
            bulk: true,
            ..Self::new(symbol)
        }
    }

    /// Register a feature. Names are normalized (lowercase, underscores);
    /// registering the same name twice is an error.
    pub fn add(
        &mut self,
        name: &str,
        description: &str,
        generator: FeatureGenerator,
    ) -> Result<()> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(AppError::Validation("A feature needs a name".to_string()));
        }
        if self.features.iter().any(|f| f.name == name) {
            return Err(AppError::Validation(format!(
                "Feature `{}` ({}) has already been registered",
                name, self.symbol
            )));
        }
        self.features.push(FeatureDef {
            name,
            description: description.to_string(),
            generator,
        });
        Ok(())
    }

    /// Generate every registered feature for each open date in the range
    /// that is missing from its presence index. Returns how many dates were
    /// generated.
    pub async fn generate(&self, state: &AppState, from: NaiveDate, to: NaiveDate) -> Result<usize> {
        let exchange = reconciler::exchange_for_ticker(state, &self.symbol).await?;
        let open = calendar::open_dates(state, &exchange, from, to, false)?;

        // Which features are missing on which dates.
        let mut missing: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, feature) in self.features.iter().enumerate() {
            let stored = state.db.feature_stored_dates(&self.symbol, &feature.name)?;
            for date in open.iter() {
                if !stored.contains(date) {
                    missing.entry(*date).or_default().push(i);
                }
            }
        }

        if missing.is_empty() {
            tracing::info!(
                "All day(s) from {} to {} already have the {} registered feature(s) stored",
                from,
                to,
                self.features.len()
            );
            return Ok(0);
        }

        for (date, feature_indices) in &missing {
            tracing::info!(
                "Generating {} feature(s) for {} {}",
                feature_indices.len(),
                self.symbol,
                date
            );

            let mut combined = FeatureFrame::default();
            let mut descriptions: HashMap<String, String> = HashMap::new();

            for &i in feature_indices {
                let feature = &self.features[i];
                let frame = (feature.generator)(state, &self.symbol, *date).await?;
                validate_frame(&self.symbol, &feature.name, *date, &frame)?;
                merge_frame(&mut combined, frame, feature, &mut descriptions, *date)?;
            }

            if self.bulk {
                self.write_bulk(state, *date, &combined)?;
                let columns: Vec<(String, Option<String>)> = combined
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), descriptions.get(&c.name).cloned()))
                    .collect();
                state.db.mark_features_present(&self.symbol, *date, &columns)?;
            } else {
                state
                    .db
                    .write_features(&self.symbol, *date, &combined, &descriptions)?;
            }
        }

        Ok(missing.len())
    }

    /// Write one per-day wide table as a flat CSV under the data directory.
    fn write_bulk(&self, state: &AppState, date: NaiveDate, frame: &FeatureFrame) -> Result<()> {
        let dir = state.config.data_dir.join("features").join(&self.symbol);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.csv", date));

        let mut writer = csv::Writer::from_path(&path)?;
        let mut header = vec!["time".to_string()];
        header.extend(frame.columns.iter().map(|c| c.name.clone()));
        writer.write_record(&header)?;

        for (i, time) in frame.index.iter().enumerate() {
            let mut record = vec![time.format(TIME_FORMAT).to_string()];
            record.extend(frame.columns.iter().map(|c| c.values[i].to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;

        tracing::debug!("Wrote bulk feature file {}", path.display());
        Ok(())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Quality gate on a generated frame. Fatal on failure: corrupt derived
/// data must never reach the presence index.
fn validate_frame(
    symbol: &str,
    feature: &str,
    date: NaiveDate,
    frame: &FeatureFrame,
) -> Result<()> {
    if frame.is_empty() {
        return Err(AppError::DataQuality(format!(
            "Feature `{}` ({}) produced no values for {}",
            feature, symbol, date
        )));
    }

    for column in &frame.columns {
        let bad = column.values.iter().filter(|v| !v.is_finite()).count();
        if bad > 0 {
            return Err(AppError::DataQuality(format!(
                "Feature `{}` ({}) has {} NaN/inf value(s) for {}",
                feature, symbol, bad, date
            )));
        }
    }

    let mut names: Vec<&str> = frame.column_names();
    names.sort_unstable();
    names.dedup();
    if names.len() != frame.columns.len() {
        return Err(AppError::DataQuality(format!(
            "Not all column names for `{}` ({}) are unique",
            feature, symbol
        )));
    }

    Ok(())
}

/// Fold one feature's frame into the combined per-date frame. Single-column
/// frames take the feature's name; multi-column frames get a
/// `feature__column` prefix.
fn merge_frame(
    combined: &mut FeatureFrame,
    frame: FeatureFrame,
    feature: &FeatureDef,
    descriptions: &mut HashMap<String, String>,
    date: NaiveDate,
) -> Result<()> {
    if combined.columns.is_empty() {
        combined.index = frame.index.clone();
    } else if combined.index != frame.index {
        return Err(AppError::DataQuality(format!(
            "Feature `{}` index does not align with the other features for {}",
            feature.name, date
        )));
    }

    let multi = frame.columns.len() > 1;
    for column in frame.columns {
        let name = if multi {
            format!("{}__{}", feature.name, column.name)
        } else {
            feature.name.clone()
        };
        if combined.columns.iter().any(|c| c.name == name) {
            return Err(AppError::DataQuality(format!(
                "Column `{}` is produced by more than one feature",
                name
            )));
        }
        descriptions.insert(name.clone(), feature.description.clone());
        combined.columns.push(FeatureColumn {
            name,
            values: column.values,
        });
    }
    Ok(())
}
