use serde::Serialize;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tracing::debug;

use crate::dag::Dag;
use crate::endpoint::{Sink, Source};
use crate::error::{BuildError, BuildResult};
use crate::plan::{plan_stage, Plan};
use crate::schema::Schema;

/* =========================
   Bindings
   ========================= */

/// Tabla stage -> fuente.
#[derive(Default)]
pub struct SourceBindings {
    entries: Vec<(String, Arc<dyn Source>)>,
}

impl SourceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bind(mut self, stage: impl Into<String>, source: Arc<dyn Source>) -> Self {
        self.entries.push((stage.into(), source));
        self
    }
}

/// Tabla slot -> (stage, sink).
#[derive(Default)]
pub struct SinkBindings {
    entries: Vec<(String, String, Arc<dyn Sink>)>,
}

impl SinkBindings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bind(
        mut self,
        slot: impl Into<String>,
        stage: impl Into<String>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        self.entries.push((slot.into(), stage.into(), sink));
        self
    }
}

/* =========================
   Flow graph validado
   ========================= */

pub(crate) struct PlannedStage {
    pub(crate) name: String,
    pub(crate) kind: &'static str,
    pub(crate) blocking: bool,
    pub(crate) schema: Schema,
    pub(crate) plan: Plan,
    /// Productores en orden de puerto (índices en `FlowGraph::stages`).
    pub(crate) inputs: Vec<usize>,
    /// (stage, puerto) consumidores.
    pub(crate) downstream: Vec<(usize, usize)>,
    /// Índices en `FlowGraph::sinks`.
    pub(crate) sinks: Vec<usize>,
}

pub(crate) struct BoundSource {
    pub(crate) stage: usize,
    pub(crate) source: Arc<dyn Source>,
}

pub(crate) struct BoundSink {
    pub(crate) slot: String,
    pub(crate) stage: usize,
    pub(crate) sink: Arc<dyn Sink>,
}

/// Grafo validado y resuelto, listo para ejecutarse las veces que haga
/// falta. Los stages quedan en orden topológico.
pub struct FlowGraph {
    pub(crate) stages: Vec<PlannedStage>,
    pub(crate) sources: Vec<BoundSource>,
    pub(crate) sinks: Vec<BoundSink>,
}

impl FlowGraph {
    /// Esquema derivado de un stage.
    pub fn schema_of(&self, stage: &str) -> Option<&Schema> {
        self.stages
            .iter()
            .find(|s| s.name == stage)
            .map(|s| &s.schema)
    }

    /// Nombres en orden de ejecución.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn describe(&self) -> FlowDescription {
        FlowDescription {
            stages: self
                .stages
                .iter()
                .map(|s| StageDescription {
                    name: s.name.clone(),
                    kind: s.kind.to_string(),
                    inputs: s.inputs.iter().map(|&i| self.stages[i].name.clone()).collect(),
                    schema: s.schema.to_string(),
                    blocking: s.blocking,
                })
                .collect(),
            sources: self
                .sources
                .iter()
                .map(|b| SourceDescription {
                    stage: self.stages[b.stage].name.clone(),
                    endpoint: b.source.name(),
                    header: b.source.has_header(),
                })
                .collect(),
            sinks: self
                .sinks
                .iter()
                .map(|b| SinkDescription {
                    slot: b.slot.clone(),
                    stage: self.stages[b.stage].name.clone(),
                    endpoint: b.sink.name(),
                    header: b.sink.writes_header(),
                })
                .collect(),
        }
    }
}

/* --------- Descripción serializable --------- */

#[derive(Debug, Clone, Serialize)]
pub struct FlowDescription {
    pub stages: Vec<StageDescription>,
    pub sources: Vec<SourceDescription>,
    pub sinks: Vec<SinkDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageDescription {
    pub name: String,
    pub kind: String,
    pub inputs: Vec<String>,
    pub schema: String,
    pub blocking: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDescription {
    pub stage: String,
    pub endpoint: String,
    pub header: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkDescription {
    pub slot: String,
    pub stage: String,
    pub endpoint: String,
    pub header: bool,
}

/* =========================
   Construcción
   ========================= */

/// Orden topológico (Kahn). Entre stages listos se respeta el orden de
/// declaración, así el resultado es determinista.
fn topological_order(dag: &Dag, index: &HashMap<&str, usize>) -> BuildResult<Vec<usize>> {
    let n = dag.stages.len();
    let mut in_degree = vec![0usize; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (from, to) in &dag.edges {
        let (f, t) = (index[from.as_str()], index[to.as_str()]);
        in_degree[t] += 1;
        children[f].push(t);
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &c in &children[i] {
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.push_back(c);
            }
        }
    }

    if order.len() != n {
        let stuck = (0..n)
            .find(|&i| in_degree[i] > 0)
            .map(|i| dag.stages[i].name().to_string())
            .unwrap_or_default();
        return Err(BuildError::CycleDetected(stuck));
    }
    Ok(order)
}

/// Valida el grafo, las bindings y los esquemas; no lee ningún registro.
pub fn build_flow(dag: Dag, sources: SourceBindings, sinks: SinkBindings) -> BuildResult<FlowGraph> {
    // nombres únicos
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, stage) in dag.stages.iter().enumerate() {
        if index.insert(stage.name(), i).is_some() {
            return Err(BuildError::DuplicateStage(stage.name().to_string()));
        }
    }
    for (from, to) in &dag.edges {
        for end in [from, to] {
            if !index.contains_key(end.as_str()) {
                return Err(BuildError::StageNotFound(end.clone()));
            }
        }
    }

    let order = topological_order(&dag, &index)?;
    // posición de cada stage de la declaración en el orden topológico
    let mut position = vec![0usize; order.len()];
    for (pos, &i) in order.iter().enumerate() {
        position[i] = pos;
    }

    let inputs_of: Vec<Vec<usize>> = order
        .iter()
        .map(|&i| {
            dag.upstream_of(dag.stages[i].name())
                .into_iter()
                .map(|up| position[index[up]])
                .collect()
        })
        .collect();

    // fuentes: exactamente una por stage sin productores
    let mut source_of: Vec<Option<Arc<dyn Source>>> = vec![None; order.len()];
    for (stage, source) in sources.entries {
        let i = *index
            .get(stage.as_str())
            .ok_or_else(|| BuildError::StageNotFound(stage.clone()))?;
        let pos = position[i];
        if !inputs_of[pos].is_empty() {
            return Err(BuildError::InvalidBinding {
                stage,
                reason: "el stage tiene productores; sólo las cabezas se ligan a fuentes".into(),
            });
        }
        if source_of[pos].is_some() {
            return Err(BuildError::InvalidBinding {
                stage,
                reason: "más de una fuente para el mismo stage".into(),
            });
        }
        source_of[pos] = Some(source);
    }
    for (pos, &i) in order.iter().enumerate() {
        if inputs_of[pos].is_empty() && source_of[pos].is_none() {
            return Err(BuildError::UnboundSource(dag.stages[i].name().to_string()));
        }
    }

    // planificación en orden topológico
    let mut planned: Vec<PlannedStage> = Vec::with_capacity(order.len());
    for (pos, &i) in order.iter().enumerate() {
        let stage = &dag.stages[i];
        let input_schemas: Vec<&Schema> = match &source_of[pos] {
            Some(source) => vec![source.schema()],
            None => inputs_of[pos].iter().map(|&p| &planned[p].schema).collect(),
        };
        let (schema, plan) =
            plan_stage(stage.kind(), &input_schemas).map_err(|e| e.in_stage(stage.name()))?;
        debug!(stage = stage.name(), kind = stage.kind().name(), %schema, "stage planificado");

        planned.push(PlannedStage {
            name: stage.name().to_string(),
            kind: stage.kind().name(),
            blocking: stage.kind().is_blocking(),
            schema,
            plan,
            inputs: inputs_of[pos].clone(),
            downstream: Vec::new(),
            sinks: Vec::new(),
        });
    }
    for pos in 0..planned.len() {
        for port in 0..planned[pos].inputs.len() {
            let up = planned[pos].inputs[port];
            planned[up].downstream.push((pos, port));
        }
    }

    // sinks: slots únicos, esquema compatible, todo terminal ligado
    let mut bound_sinks = Vec::with_capacity(sinks.entries.len());
    let mut slots = HashSet::new();
    for (slot, stage, sink) in sinks.entries {
        if !slots.insert(slot.clone()) {
            return Err(BuildError::InvalidBinding {
                stage,
                reason: format!("slot de sink duplicado: '{slot}'"),
            });
        }
        let i = *index
            .get(stage.as_str())
            .ok_or_else(|| BuildError::StageNotFound(stage.clone()))?;
        let pos = position[i];
        if let Some(expected) = sink.schema() {
            expected
                .ensure_same(&planned[pos].schema)
                .map_err(|e| e.in_stage(&stage))?;
        }
        planned[pos].sinks.push(bound_sinks.len());
        bound_sinks.push(BoundSink {
            slot,
            stage: pos,
            sink,
        });
    }
    for stage in &planned {
        if stage.downstream.is_empty() && stage.sinks.is_empty() {
            return Err(BuildError::UnboundSink(stage.name.clone()));
        }
    }

    let bound_sources = source_of
        .into_iter()
        .enumerate()
        .filter_map(|(pos, s)| s.map(|source| BoundSource { stage: pos, source }))
        .collect();

    debug!(stages = planned.len(), sinks = bound_sinks.len(), "flow validado");
    Ok(FlowGraph {
        stages: planned,
        sources: bound_sources,
        sinks: bound_sinks,
    })
}
