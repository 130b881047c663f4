//! Motor de flujos batch sobre registros tipados.
//!
//! Un flow se declara como un DAG de stages (`dag`, `stage`), se valida y
//! planifica contra los esquemas de sus fuentes (`flow::build_flow`) y se
//! ejecuta localmente con `executor::Executor`.

pub mod config;
pub mod dag;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod flow;
pub mod flows;
pub mod report;
pub mod schema;
pub mod stage;
pub mod tfidf;
pub mod wordcount;

mod aggregate;
mod join;
mod operator;
mod plan;

/* --------- Reexports --------- */

pub use config::EngineConfig;
pub use dag::{Dag, DagBuilder};
pub use endpoint::{DelimitedFile, JsonLines, MemorySink, MemorySource, Sink, Source, TextLines};
pub use error::{BuildError, ConfigError, EndpointError, ExecutionError};
pub use executor::{run, Executor};
pub use flow::{build_flow, FlowDescription, FlowGraph, SinkBindings, SourceBindings};
pub use report::{RunId, RunReport};
pub use schema::{Field, FieldType, Record, Schema, Value};
pub use stage::{Aggregator, Direction, JoinType, OutputSelector, SortKey, Stage, StageKind};
