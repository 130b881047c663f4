use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::endpoint::RecordWriter;
use crate::error::{ExecResult, ExecutionError};
use crate::flow::FlowGraph;
use crate::operator::{instantiate, Operator};
use crate::report::{RunReport, SinkStats, StageStats};
use crate::schema::Record;

/// Executor local, single-thread y push: cada registro de una fuente se
/// empuja en profundidad por el grafo; un stage bloqueante emite cuando
/// se cierran todas sus entradas.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: EngineConfig,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, flow: &FlowGraph) -> ExecResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, stages = flow.stages.len(), "iniciando run");

        let result = Run::start(flow, &self.config).and_then(|mut run| {
            run.drive()?;
            Ok(run)
        });

        match result {
            Ok(run) => {
                let report = run.into_report(run_id, started_at);
                info!(
                    %run_id,
                    read = report.records_read,
                    written = report.total_written(),
                    ms = report.duration_ms(),
                    "run terminado"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(%run_id, error = %e, "run abortado");
                Err(e)
            }
        }
    }
}

/// Atajo con la configuración por defecto.
pub fn run(flow: &FlowGraph) -> ExecResult<RunReport> {
    Executor::default().run(flow)
}

/// Estado de un run: operadores nuevos, writers abiertos y contadores.
struct Run<'a> {
    flow: &'a FlowGraph,
    operators: Vec<Box<dyn Operator + 'a>>,
    open_ports: Vec<usize>,
    writers: Vec<Box<dyn RecordWriter + 'a>>,
    records_in: Vec<u64>,
    records_out: Vec<u64>,
    written: Vec<u64>,
    read: u64,
}

fn endpoint_error(endpoint: String) -> impl FnOnce(crate::error::EndpointError) -> ExecutionError {
    move |source| ExecutionError::Endpoint { endpoint, source }
}

impl<'a> Run<'a> {
    fn start(flow: &'a FlowGraph, config: &EngineConfig) -> ExecResult<Self> {
        let operators = flow
            .stages
            .iter()
            .map(|s| instantiate(&s.plan, &s.name, &s.schema, config.max_buffered_records))
            .collect();

        // un puerto por productor; las cabezas tienen el de su fuente
        let open_ports = flow.stages.iter().map(|s| s.inputs.len().max(1)).collect();

        let writers = flow
            .sinks
            .iter()
            .map(|b| {
                b.sink
                    .open(&flow.stages[b.stage].schema)
                    .map_err(endpoint_error(b.sink.name()))
            })
            .collect::<ExecResult<Vec<_>>>()?;

        let n = flow.stages.len();
        Ok(Self {
            flow,
            operators,
            open_ports,
            writers,
            records_in: vec![0; n],
            records_out: vec![0; n],
            written: vec![0; flow.sinks.len()],
            read: 0,
        })
    }

    fn drive(&mut self) -> ExecResult<()> {
        let flow = self.flow;
        for bound in &flow.sources {
            let stage = &flow.stages[bound.stage];
            let name = bound.source.name();
            debug!(stage = %stage.name, source = %name, "leyendo fuente");

            let records = bound.source.open().map_err(endpoint_error(name.clone()))?;
            for item in records {
                let record = item.map_err(endpoint_error(name.clone()))?;
                bound
                    .source
                    .schema()
                    .check(&record)
                    .map_err(|e| e.in_stage(&stage.name))?;
                self.read += 1;
                self.deliver(bound.stage, 0, record)?;
            }
            self.close(bound.stage, 0)?;
        }

        for (writer, bound) in self.writers.iter_mut().zip(&flow.sinks) {
            writer.finish().map_err(endpoint_error(bound.sink.name()))?;
        }
        Ok(())
    }

    fn deliver(&mut self, stage: usize, port: usize, record: Record) -> ExecResult<()> {
        self.records_in[stage] += 1;
        let mut out = Vec::new();
        self.operators[stage].push(port, record, &mut out)?;
        self.emit(stage, out)
    }

    /// Reparte lo producido por un stage: sinks ligados y consumidores.
    /// En fan-out se clona para todos menos el último, que recibe el original.
    fn emit(&mut self, stage: usize, records: Vec<Record>) -> ExecResult<()> {
        let flow = self.flow;
        let planned = &flow.stages[stage];
        for record in records {
            self.records_out[stage] += 1;
            for &s in &planned.sinks {
                self.writers[s]
                    .write(&record)
                    .map_err(endpoint_error(flow.sinks[s].sink.name()))?;
                self.written[s] += 1;
            }
            if let Some((&(last, last_port), rest)) = planned.downstream.split_last() {
                for &(next, port) in rest {
                    self.deliver(next, port, record.clone())?;
                }
                self.deliver(last, last_port, record)?;
            }
        }
        Ok(())
    }

    fn close(&mut self, stage: usize, port: usize) -> ExecResult<()> {
        let mut out = Vec::new();
        self.operators[stage].close_port(port, &mut out)?;
        self.emit(stage, out)?;

        self.open_ports[stage] -= 1;
        if self.open_ports[stage] > 0 {
            return Ok(());
        }

        let mut out = Vec::new();
        self.operators[stage].finish(&mut out)?;
        self.emit(stage, out)?;

        let flow = self.flow;
        let planned = &flow.stages[stage];
        debug!(
            stage = %planned.name,
            kind = planned.kind,
            records_in = self.records_in[stage],
            records_out = self.records_out[stage],
            "stage completo"
        );
        for &(next, next_port) in &planned.downstream {
            self.close(next, next_port)?;
        }
        Ok(())
    }

    fn into_report(self, run_id: Uuid, started_at: chrono::DateTime<Utc>) -> RunReport {
        let flow = self.flow;
        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records_read: self.read,
            stages: flow
                .stages
                .iter()
                .enumerate()
                .map(|(i, s)| StageStats {
                    name: s.name.clone(),
                    kind: s.kind.to_string(),
                    records_in: self.records_in[i],
                    records_out: self.records_out[i],
                })
                .collect(),
            sinks: flow
                .sinks
                .iter()
                .enumerate()
                .map(|(i, b)| SinkStats {
                    slot: b.slot.clone(),
                    stage: flow.stages[b.stage].name.clone(),
                    endpoint: b.sink.name(),
                    records_written: self.written[i],
                })
                .collect(),
        }
    }
}
