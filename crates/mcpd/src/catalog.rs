use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::CatalogError;
use crate::spec::ServerSpec;

/// A validated, ordered mapping from a human name to a `ServerSpec`. Produced
/// by an external config-file loader (out of scope here); the Initializer
/// treats names as opaque log labels and routes purely on `ServerId`.
pub type ServerCatalog = BTreeMap<String, ServerSpec>;

/// The boundary the external config-file loader implements against. This
/// crate ships only `StaticCatalog`, an in-memory implementation for tests
/// and for embedding a catalog assembled by the caller; no on-disk format is
/// parsed here.
pub trait CatalogSource: Send + Sync {
    fn load(&self) -> Result<ServerCatalog, CatalogError>;
}

/// An already-validated, in-memory catalog. The trivial `CatalogSource`.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog(ServerCatalog);

impl StaticCatalog {
    pub fn new(catalog: ServerCatalog) -> Self {
        Self(catalog)
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ServerSpec) -> &mut Self {
        self.0.insert(name.into(), spec);
        self
    }
}

impl CatalogSource for StaticCatalog {
    fn load(&self) -> Result<ServerCatalog, CatalogError> {
        Ok(self.0.clone())
    }
}

/// Outcome of starting a single catalog entry during boot.
#[derive(Clone, Debug)]
pub struct EntryOutcome {
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

#[derive(Clone, Debug)]
pub enum Outcome {
    Started,
    Failed(String),
    TimedOut,
}

/// Produced once per boot by the Initializer; surfaced in logs and in
/// `status` until superseded by a later (re-)initialization.
#[derive(Clone, Debug, Default)]
pub struct InitializationResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub optional_failures: usize,
    pub log: Vec<EntryOutcome>,
}

impl InitializationResult {
    pub fn record(&mut self, name: String, optional: bool, outcome: Outcome, duration: Duration) {
        self.total += 1;
        match &outcome {
            Outcome::Started => self.successful += 1,
            Outcome::Failed(_) | Outcome::TimedOut => {
                self.failed += 1;
                if optional {
                    self.optional_failures += 1;
                }
            }
        }
        self.log.push(EntryOutcome {
            name,
            outcome,
            duration,
        });
    }
}
