use std::collections::{BTreeMap, HashSet};

use crate::aggregate::{Acc, AggPlan};
use crate::error::{ExecResult, ExecutionError};
use crate::join::{CoGroupOp, HashJoinOp};
use crate::plan::{Plan, Slot};
use crate::schema::{Record, Schema, Value};
use crate::stage::{Direction, MapFn, Predicate};

/// Operador en ejecución. Cada run instancia operadores nuevos a partir
/// del plan, así que el estado nunca sobrevive entre runs.
///
/// Los registros producidos se dejan en `out`; el executor los reparte.
pub(crate) trait Operator {
    fn push(&mut self, port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()>;

    /// Una entrada se agotó.
    fn close_port(&mut self, _port: usize, _out: &mut Vec<Record>) -> ExecResult<()> {
        Ok(())
    }

    /// Todas las entradas se agotaron: los operadores bloqueantes emiten acá.
    fn finish(&mut self, _out: &mut Vec<Record>) -> ExecResult<()> {
        Ok(())
    }
}

/// Falla si un stage retiene más registros de los permitidos.
pub(crate) fn guard_buffer(stage: &str, held: usize, limit: usize) -> ExecResult<()> {
    if held > limit {
        return Err(ExecutionError::BufferLimitExceeded {
            stage: stage.to_string(),
            limit,
        });
    }
    Ok(())
}

pub(crate) fn instantiate<'a>(
    plan: &'a Plan,
    stage: &'a str,
    schema: &'a Schema,
    limit: usize,
) -> Box<dyn Operator + 'a> {
    let inner: Box<dyn Operator + 'a> = match plan {
        Plan::Pass => Box::new(PassOp),
        Plan::Project { indices } => Box::new(ProjectOp { indices }),
        Plan::Map {
            arguments,
            declared,
            assemble,
            func,
        } => Box::new(MapOp {
            stage,
            arguments,
            declared,
            assemble,
            func,
        }),
        Plan::Filter {
            arguments,
            predicate,
        } => Box::new(FilterOp {
            arguments,
            predicate,
        }),
        Plan::Insert { value } => Box::new(InsertOp { value }),
        Plan::Unique { key } => Box::new(UniqueOp {
            stage,
            key,
            seen: HashSet::new(),
            limit,
        }),
        Plan::Group { key, aggregator } => Box::new(GroupOp {
            stage,
            key,
            aggregator,
            groups: BTreeMap::new(),
            held: 0,
            limit,
        }),
        Plan::CoGroup { keys, fillers } => Box::new(CoGroupOp::new(stage, keys, fillers, limit)),
        Plan::HashJoin {
            left_key,
            right_key,
        } => Box::new(HashJoinOp::new(stage, left_key, right_key, limit)),
        Plan::Sort { keys } => Box::new(SortOp {
            stage,
            keys,
            buffer: Vec::new(),
            limit,
        }),
    };
    Box::new(Checked {
        inner,
        stage,
        schema,
    })
}

/* =========================
   Operadores por registro
   ========================= */

struct PassOp;

impl Operator for PassOp {
    fn push(&mut self, _port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        out.push(record);
        Ok(())
    }
}

/// Discard y Retain: ambos son una proyección por posiciones.
struct ProjectOp<'a> {
    indices: &'a [usize],
}

impl Operator for ProjectOp<'_> {
    fn push(&mut self, _port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        out.push(record.project(self.indices));
        Ok(())
    }
}

struct MapOp<'a> {
    stage: &'a str,
    arguments: &'a [usize],
    declared: &'a Schema,
    assemble: &'a [Slot],
    func: &'a MapFn,
}

impl Operator for MapOp<'_> {
    fn push(&mut self, _port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        let args = record.project(self.arguments);
        let results = (self.func)(&args).map_err(|e| e.in_stage(self.stage))?;

        for result in results {
            self.declared
                .check(&result)
                .map_err(|e| e.in_stage(self.stage))?;
            let values = self
                .assemble
                .iter()
                .map(|slot| match *slot {
                    Slot::Input(i) => record.values()[i].clone(),
                    Slot::Result(j) => result.values()[j].clone(),
                })
                .collect();
            out.push(Record::new(values));
        }
        Ok(())
    }
}

struct FilterOp<'a> {
    arguments: &'a [usize],
    predicate: &'a Predicate,
}

impl Operator for FilterOp<'_> {
    fn push(&mut self, _port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        if (self.predicate)(&record.project(self.arguments)) {
            out.push(record);
        }
        Ok(())
    }
}

struct InsertOp<'a> {
    value: &'a Value,
}

impl Operator for InsertOp<'_> {
    fn push(&mut self, _port: usize, mut record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        record.push(self.value.clone());
        out.push(record);
        Ok(())
    }
}

/// Streaming: emite la primera aparición de cada clave.
struct UniqueOp<'a> {
    stage: &'a str,
    key: &'a [usize],
    seen: HashSet<Record>,
    limit: usize,
}

impl Operator for UniqueOp<'_> {
    fn push(&mut self, _port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        if self.seen.insert(record.project(self.key)) {
            guard_buffer(self.stage, self.seen.len(), self.limit)?;
            out.push(record);
        }
        Ok(())
    }
}

/* =========================
   Operadores bloqueantes
   ========================= */

/// Agrupa por clave y emite en orden ascendente de clave al final.
struct GroupOp<'a> {
    stage: &'a str,
    key: &'a [usize],
    aggregator: &'a AggPlan,
    groups: BTreeMap<Record, Acc>,
    held: usize,
    limit: usize,
}

impl Operator for GroupOp<'_> {
    fn push(&mut self, _port: usize, record: Record, _out: &mut Vec<Record>) -> ExecResult<()> {
        let key = record.project(self.key);
        let aggregator = self.aggregator;
        let acc = self
            .groups
            .entry(key)
            .or_insert_with(|| aggregator.start());
        acc.add(aggregator, &record)
            .map_err(|e| e.in_stage(self.stage))?;

        self.held = if aggregator.retains_records() {
            self.held + 1
        } else {
            self.groups.len()
        };
        guard_buffer(self.stage, self.held, self.limit)
    }

    fn finish(&mut self, out: &mut Vec<Record>) -> ExecResult<()> {
        for (key, acc) in std::mem::take(&mut self.groups) {
            let tail = acc
                .finish(self.aggregator)
                .map_err(|e| e.in_stage(self.stage))?;
            out.push(Record::concat([&key, &tail]));
        }
        Ok(())
    }
}

/// Orden estable por claves compuestas.
struct SortOp<'a> {
    stage: &'a str,
    keys: &'a [(usize, Direction)],
    buffer: Vec<Record>,
    limit: usize,
}

impl Operator for SortOp<'_> {
    fn push(&mut self, _port: usize, record: Record, _out: &mut Vec<Record>) -> ExecResult<()> {
        self.buffer.push(record);
        guard_buffer(self.stage, self.buffer.len(), self.limit)
    }

    fn finish(&mut self, out: &mut Vec<Record>) -> ExecResult<()> {
        let keys = self.keys;
        self.buffer.sort_by(|a, b| {
            keys.iter()
                .map(|&(i, dir)| {
                    let ord = a.values()[i].cmp(&b.values()[i]);
                    match dir {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out.append(&mut self.buffer);
        Ok(())
    }
}

/* =========================
   Verificación de salida
   ========================= */

/// Envuelve un operador y valida cada registro emitido contra el esquema
/// derivado del stage.
struct Checked<'a> {
    inner: Box<dyn Operator + 'a>,
    stage: &'a str,
    schema: &'a Schema,
}

impl Checked<'_> {
    fn verify(&self, out: &[Record], from: usize) -> ExecResult<()> {
        for record in &out[from..] {
            self.schema
                .check(record)
                .map_err(|e| e.in_stage(self.stage))?;
        }
        Ok(())
    }
}

impl Operator for Checked<'_> {
    fn push(&mut self, port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        let from = out.len();
        self.inner.push(port, record, out)?;
        self.verify(out, from)
    }

    fn close_port(&mut self, port: usize, out: &mut Vec<Record>) -> ExecResult<()> {
        let from = out.len();
        self.inner.close_port(port, out)?;
        self.verify(out, from)
    }

    fn finish(&mut self, out: &mut Vec<Record>) -> ExecResult<()> {
        let from = out.len();
        self.inner.finish(out)?;
        self.verify(out, from)
    }
}
