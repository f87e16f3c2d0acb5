//! Catalog of registered models.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::column::ColumnDef;
use super::model::ModelDef;
use crate::error::Error;

/// Thread-safe registry of model definitions.
///
/// Models are immutable once registered; [`Catalog::add_column`] swaps in a
/// new definition rather than mutating the shared one.
#[derive(Default)]
pub struct Catalog {
    models: RwLock<HashMap<String, Arc<ModelDef>>>,
    version: RwLock<u64>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model.
    ///
    /// The model must declare exactly one primary-key column of a key type,
    /// and every foreign key must target itself or an already registered model.
    pub fn register(&self, model: ModelDef) -> Result<(), Error> {
        let pks: Vec<&ColumnDef> = model.columns.iter().filter(|c| c.primary_key).collect();
        match pks.as_slice() {
            [pk] if pk.column_type.is_key_type() => {}
            [pk] => {
                return Err(Error::Configuration(format!(
                    "{}.{} has type {}, which cannot be a primary key",
                    model.name,
                    pk.name,
                    pk.column_type.name()
                )))
            }
            _ => {
                return Err(Error::Configuration(format!(
                    "{} must have exactly one primary-key column named {}",
                    model.name, model.primary_key
                )))
            }
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = model.columns.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(Error::Configuration(format!(
                "{} declares column {} twice",
                model.name, dup.name
            )));
        }
        {
            let models = self.models.read();
            for column in &model.columns {
                match column.references() {
                    Some(target) if target != model.name && !models.contains_key(target) => {
                        return Err(Error::Configuration(format!(
                            "{}.{} references unknown model {}",
                            model.name, column.name, target
                        )))
                    }
                    _ => {}
                }
            }
        }

        debug!(model = %model.name, table = %model.table, "registering model");
        self.models
            .write()
            .insert(model.name.clone(), Arc::new(model));
        *self.version.write() += 1;
        Ok(())
    }

    /// Register several models.
    pub fn with_models(self, models: impl IntoIterator<Item = ModelDef>) -> Result<Self, Error> {
        for model in models {
            self.register(model)?;
        }
        Ok(self)
    }

    /// Look up a model.
    pub fn model(&self, name: &str) -> Result<Arc<ModelDef>, Error> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// Names of all registered models, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of schema changes applied.
    pub fn version(&self) -> u64 {
        *self.version.read()
    }

    /// Add a column to a registered model.
    pub fn add_column(&self, model: &str, column: ColumnDef) -> Result<Arc<ModelDef>, Error> {
        let mut models = self.models.write();
        let current = models
            .get(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))?;
        if current.column(&column.name).is_some() {
            return Err(Error::Configuration(format!(
                "{} already has a column named {}",
                model, column.name
            )));
        }
        if let Some(target) = column.references() {
            if target != model && !models.contains_key(target) {
                return Err(Error::Configuration(format!(
                    "{}.{} references unknown model {}",
                    model, column.name, target
                )));
            }
        }
        let updated = Arc::new(current.as_ref().clone().with_column(column));
        models.insert(model.to_string(), Arc::clone(&updated));
        *self.version.write() += 1;
        Ok(updated)
    }

    /// Primary-key column of the model a foreign-key column references.
    pub fn referenced_key(&self, column: &ColumnDef) -> Result<Option<ColumnDef>, Error> {
        match column.references() {
            Some(target) => {
                let model = self.model(target)?;
                Ok(Some(model.primary_key_column()?.clone()))
            }
            None => Ok(None),
        }
    }

    /// Foreign-key column on `through` that references `target`.
    ///
    /// Columns named in `exclude` are skipped, so a self-referencing
    /// association can still find its other side.
    pub fn foreign_key_to(
        &self,
        through: &str,
        target: &str,
        exclude: &[&str],
    ) -> Result<Option<String>, Error> {
        let model = self.model(through)?;
        Ok(model
            .columns
            .iter()
            .filter(|c| !exclude.contains(&c.name.as_str()))
            .find(|c| c.references() == Some(target))
            .map(|c| c.name.clone()))
    }
}
