use std::{fmt, sync::Arc};

use crate::error::ExecResult;
use crate::schema::{Field, Record, Schema, Value};

/* =========================
   Funciones de usuario
   ========================= */

/// Función de un Map: recibe los argumentos proyectados y devuelve
/// cero, uno o muchos registros con el esquema declarado.
/// Debe ser pura: el executor puede re-ejecutarla.
pub type MapFn = Arc<dyn Fn(&Record) -> ExecResult<Vec<Record>> + Send + Sync>;

/// Predicado de un Filter sobre los argumentos proyectados.
pub type Predicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Reducción de un agregador propio: recibe la partición completa
/// (argumentos proyectados, en orden de llegada) y devuelve un registro.
pub type ReduceFn = Arc<dyn Fn(&[Record]) -> ExecResult<Record> + Send + Sync>;

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Qué campos salen de un Map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSelector {
    /// Sólo los campos declarados por la función.
    Results,
    /// Entrada completa seguida de los resultados.
    All,
    /// Los argumentos se reemplazan en su posición por los resultados.
    Replace,
    /// Campos elegidos por nombre entre entrada y resultados
    /// (si un nombre existe en ambos, gana el resultado).
    Select(Vec<String>),
}

impl OutputSelector {
    pub fn select<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OutputSelector::Select(strings(names))
    }
}

/* =========================
   Agregadores
   ========================= */

#[derive(Clone)]
pub enum Aggregator {
    /// Cantidad de registros de la partición (int64).
    Count { output: String },
    /// Suma numérica; conserva el tipo del campo.
    Sum { field: String, output: String },
    /// Máximo por orden natural; en empates gana el primero visto.
    MaxValue { field: String, output: String },
    /// Valores del primer registro llegado. Depende del orden de llegada:
    /// sin un Sort previo el resultado no es determinista.
    First { fields: Vec<String> },
    Custom {
        arguments: Vec<String>,
        declared: Schema,
        reduce: ReduceFn,
    },
}

impl Aggregator {
    pub fn count(output: impl Into<String>) -> Self {
        Aggregator::Count {
            output: output.into(),
        }
    }

    pub fn sum(field: impl Into<String>, output: impl Into<String>) -> Self {
        Aggregator::Sum {
            field: field.into(),
            output: output.into(),
        }
    }

    pub fn max_value(field: impl Into<String>, output: impl Into<String>) -> Self {
        Aggregator::MaxValue {
            field: field.into(),
            output: output.into(),
        }
    }

    pub fn first<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Aggregator::First {
            fields: strings(fields),
        }
    }

    pub fn custom<I, S, F>(arguments: I, declared: Schema, reduce: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[Record]) -> ExecResult<Record> + Send + Sync + 'static,
    {
        Aggregator::Custom {
            arguments: strings(arguments),
            declared,
            reduce: Arc::new(reduce),
        }
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Count { output } => write!(f, "Count({output})"),
            Aggregator::Sum { field, output } => write!(f, "Sum({field} -> {output})"),
            Aggregator::MaxValue { field, output } => write!(f, "MaxValue({field} -> {output})"),
            Aggregator::First { fields } => write!(f, "First({fields:?})"),
            Aggregator::Custom {
                arguments, declared, ..
            } => write!(f, "Custom({arguments:?} -> {declared})"),
        }
    }
}

/* =========================
   Joins y orden
   ========================= */

/// Qué entradas de un co-group son obligatorias para emitir una clave.
/// El lado ausente se rellena con el valor cero de cada tipo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    /// La primera entrada es obligatoria.
    Left,
    /// La última entrada es obligatoria.
    Right,
    Outer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

/* =========================
   Stage
   ========================= */

#[derive(Clone)]
pub enum StageKind {
    /// Paso sin transformación: cabeza ligada a una fuente o punto de rama.
    Pipe,
    Discard {
        fields: Vec<String>,
    },
    Retain {
        fields: Vec<String>,
    },
    Rename {
        from: Vec<String>,
        to: Vec<String>,
    },
    Map {
        arguments: Vec<String>,
        declared: Schema,
        output: OutputSelector,
        func: MapFn,
    },
    Filter {
        arguments: Vec<String>,
        predicate: Predicate,
    },
    /// Agrega un campo constante al final.
    Insert {
        field: Field,
        value: Value,
    },
    /// Deja pasar sólo el primer registro de cada combinación de `fields`.
    Unique {
        fields: Vec<String>,
    },
    GroupAggregate {
        keys: Vec<String>,
        aggregator: Aggregator,
    },
    /// Una lista de claves por entrada, en el orden de las aristas.
    CoGroup {
        keys: Vec<Vec<String>>,
        declared: Option<Vec<String>>,
        join: JoinType,
    },
    HashJoin {
        left_keys: Vec<String>,
        right_keys: Vec<String>,
        declared: Option<Vec<String>>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    /// Unión de entradas con esquemas idénticos.
    Merge,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Pipe => "pipe",
            StageKind::Discard { .. } => "discard",
            StageKind::Retain { .. } => "retain",
            StageKind::Rename { .. } => "rename",
            StageKind::Map { .. } => "map",
            StageKind::Filter { .. } => "filter",
            StageKind::Insert { .. } => "insert",
            StageKind::Unique { .. } => "unique",
            StageKind::GroupAggregate { .. } => "group_aggregate",
            StageKind::CoGroup { .. } => "co_group",
            StageKind::HashJoin { .. } => "hash_join",
            StageKind::Sort { .. } => "sort",
            StageKind::Merge => "merge",
        }
    }

    /// Stages que deben drenar su entrada antes de emitir.
    /// En el hash join sólo bloquea el lado derecho.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            StageKind::GroupAggregate { .. }
                | StageKind::CoGroup { .. }
                | StageKind::HashJoin { .. }
                | StageKind::Sort { .. }
        )
    }
}

impl fmt::Debug for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Pipe | StageKind::Merge => f.write_str(self.name()),
            StageKind::Discard { fields } | StageKind::Retain { fields } => {
                write!(f, "{}({fields:?})", self.name())
            }
            StageKind::Rename { from, to } => write!(f, "rename({from:?} -> {to:?})"),
            StageKind::Map {
                arguments,
                declared,
                output,
                ..
            } => write!(f, "map({arguments:?} -> {declared}, {output:?})"),
            StageKind::Filter { arguments, .. } => write!(f, "filter({arguments:?})"),
            StageKind::Insert { field, value } => write!(f, "insert({} = {value})", field.name),
            StageKind::Unique { fields } => write!(f, "unique({fields:?})"),
            StageKind::GroupAggregate { keys, aggregator } => {
                write!(f, "group_aggregate({keys:?}, {aggregator:?})")
            }
            StageKind::CoGroup {
                keys,
                declared,
                join,
            } => write!(f, "co_group({keys:?}, {declared:?}, {join:?})"),
            StageKind::HashJoin {
                left_keys,
                right_keys,
                declared,
            } => write!(f, "hash_join({left_keys:?}, {right_keys:?}, {declared:?})"),
            StageKind::Sort { keys } => write!(f, "sort({keys:?})"),
        }
    }
}

/// Nodo inmutable del grafo: nombre único + operación.
/// Las aristas viven en el `Dag`, no en el stage.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    kind: StageKind,
}

impl Stage {
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn pipe(name: impl Into<String>) -> Self {
        Self::new(name, StageKind::Pipe)
    }

    pub fn discard<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StageKind::Discard {
                fields: strings(fields),
            },
        )
    }

    pub fn retain<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StageKind::Retain {
                fields: strings(fields),
            },
        )
    }

    pub fn rename<I, J, S, T>(name: impl Into<String>, from: I, to: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(
            name,
            StageKind::Rename {
                from: strings(from),
                to: strings(to),
            },
        )
    }

    pub fn map<I, S, F>(
        name: impl Into<String>,
        arguments: I,
        declared: Schema,
        output: OutputSelector,
        func: F,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Record) -> ExecResult<Vec<Record>> + Send + Sync + 'static,
    {
        Self::new(
            name,
            StageKind::Map {
                arguments: strings(arguments),
                declared,
                output,
                func: Arc::new(func),
            },
        )
    }

    pub fn filter<I, S, F>(name: impl Into<String>, arguments: I, predicate: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::new(
            name,
            StageKind::Filter {
                arguments: strings(arguments),
                predicate: Arc::new(predicate),
            },
        )
    }

    pub fn insert(name: impl Into<String>, field: Field, value: impl Into<Value>) -> Self {
        Self::new(
            name,
            StageKind::Insert {
                field,
                value: value.into(),
            },
        )
    }

    pub fn unique<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StageKind::Unique {
                fields: strings(fields),
            },
        )
    }

    pub fn group_aggregate<I, S>(name: impl Into<String>, keys: I, aggregator: Aggregator) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            StageKind::GroupAggregate {
                keys: strings(keys),
                aggregator,
            },
        )
    }

    /// Co-group de dos entradas por sus claves respectivas.
    pub fn co_group<I, J, S, T>(
        name: impl Into<String>,
        left_keys: I,
        right_keys: J,
        declared: Option<Vec<String>>,
        join: JoinType,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::co_group_n(
            name,
            vec![strings(left_keys), strings(right_keys)],
            declared,
            join,
        )
    }

    /// Co-group de N entradas; `keys[i]` corresponde a la i-ésima arista.
    pub fn co_group_n(
        name: impl Into<String>,
        keys: Vec<Vec<String>>,
        declared: Option<Vec<String>>,
        join: JoinType,
    ) -> Self {
        Self::new(
            name,
            StageKind::CoGroup {
                keys,
                declared,
                join,
            },
        )
    }

    pub fn hash_join<I, J, S, T>(
        name: impl Into<String>,
        left_keys: I,
        right_keys: J,
        declared: Option<Vec<String>>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(
            name,
            StageKind::HashJoin {
                left_keys: strings(left_keys),
                right_keys: strings(right_keys),
                declared,
            },
        )
    }

    pub fn sort(name: impl Into<String>, keys: Vec<SortKey>) -> Self {
        Self::new(name, StageKind::Sort { keys })
    }

    pub fn merge(name: impl Into<String>) -> Self {
        Self::new(name, StageKind::Merge)
    }
}

/// Atajo para listas de nombres declarados en joins.
pub fn declared<I, S>(names: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Some(strings(names))
}
