//! # portal-sync
//!
//! Reconciliation of remote entity providers into a local catalog.
//!
//! A [`Reconciler`] fetches every record from its [`portal_source::RemoteSource`],
//! validates and maps them into entities, and applies one full mutation
//! scoped to its location key. [`ScheduledProvider`] hands the pass to a
//! [`SchedulingDriver`]; [`pipeline::run`] is the one-shot entrypoint used by
//! `portal sync`.

pub mod catalog;
pub mod diff;
pub mod error;
pub mod history;
pub mod mapper;
pub mod mutation;
pub mod pipeline;
pub mod reconciler;
pub mod schedule;
pub mod status;
pub mod validate;

pub use catalog::{CatalogConnection, FileCatalog, MemoryCatalog};
pub use diff::{diff_entities, diff_provider, DiffProviderResult, EntityDiff};
pub use error::{CatalogError, RecordRejection, ReconcileError, SyncError};
pub use history::ProviderHistory;
pub use mapper::{EntityMapper, TemplateMapper};
pub use mutation::{CatalogState, EntityChange, MutationPlan, MutationSummary};
pub use pipeline::{SyncOutcome, SyncProviderResult, SyncScope};
pub use reconciler::{PassOutcome, PassReport, ReconcileOptions, Reconciler, ReconcilerState};
pub use schedule::{
    ManualDriver, PassObserver, ScheduleError, ScheduledProvider, SchedulingDriver, TaskDefinition,
    TaskFuture,
};
pub use status::ProviderStatus;
pub use validate::RecordSchema;
