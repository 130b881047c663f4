use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
};

use crate::error::{BuildError, BuildResult, EndpointError, ExecResult, ExecutionError};

/* =========================
   Tipos de campo
   ========================= */

/// Conjunto cerrado de tipos. No hay nulos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int64,
    Float64,
    Boolean,
}

impl FieldType {
    /// Valor "cero" del tipo. Lo usan los joins externos para rellenar
    /// el lado que falta, ya que no existe un valor nulo.
    pub fn zero(self) -> Value {
        match self {
            FieldType::String => Value::String(String::new()),
            FieldType::Int64 => Value::Int64(0),
            FieldType::Float64 => Value::Float64(0.0),
            FieldType::Boolean => Value::Boolean(false),
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Int64 | FieldType::Float64)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Int64 => "int64",
            FieldType::Float64 => "float64",
            FieldType::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int64)
    }

    pub fn float64(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float64)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }
}

/* =========================
   Valores
   ========================= */

#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::String(_) => FieldType::String,
            Value::Int64(_) => FieldType::Int64,
            Value::Float64(_) => FieldType::Float64,
            Value::Boolean(_) => FieldType::Boolean,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Convierte texto (CSV, línea, etc.) al tipo declarado del campo.
    pub fn parse(field: &Field, text: &str) -> Result<Value, EndpointError> {
        let bad = || EndpointError::Parse {
            field: field.name.clone(),
            expected: field.field_type,
            value: text.to_string(),
        };

        match field.field_type {
            FieldType::String => Ok(Value::String(text.to_string())),
            FieldType::Int64 => text.trim().parse::<i64>().map(Value::Int64).map_err(|_| bad()),
            FieldType::Float64 => {
                let v = text.trim().parse::<f64>().map_err(|_| bad())?;
                if v.is_nan() {
                    return Err(bad());
                }
                Ok(Value::Float64(v))
            }
            FieldType::Boolean => match text.trim() {
                "true" | "TRUE" | "True" => Ok(Value::Boolean(true)),
                "false" | "FALSE" | "False" => Ok(Value::Boolean(false)),
                _ => Err(bad()),
            },
        }
    }

    /// Rango de la variante, sólo para ordenar valores de tipos distintos
    /// (no debería pasar con esquemas bien tipados).
    fn rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Int64(_) => 1,
            Value::Float64(_) => 2,
            Value::String(_) => 3,
        }
    }
}

/// -0.0 y 0.0 son el mismo valor para igualdad, orden y hash.
fn normalize_float(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => {
                normalize_float(*a).total_cmp(&normalize_float(*b))
            }
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => normalize_float(*v).to_bits().hash(state),
            Value::Boolean(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/* =========================
   Esquema
   ========================= */

/// Secuencia ordenada de campos con nombres únicos. Inmutable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> BuildResult<Self> {
        let mut seen = HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.as_str()) {
                return Err(BuildError::duplicate_field("", &f.name));
            }
        }
        Ok(Self { fields })
    }

    /// Atajo para declarar esquemas en código: `Schema::of(&[("line", FieldType::String)])`.
    pub fn of(pairs: &[(&str, FieldType)]) -> BuildResult<Self> {
        Self::new(pairs.iter().map(|(n, t)| Field::new(*n, *t)).collect())
    }

    pub fn from_field(field: Field) -> Self {
        Self {
            fields: vec![field],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resuelve nombres a posiciones, en el orden pedido.
    pub fn resolve(&self, names: &[String]) -> BuildResult<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.index_of(n)
                    .ok_or_else(|| BuildError::field_not_found("", n))
            })
            .collect()
    }

    pub(crate) fn select(&self, indices: &[usize]) -> Schema {
        Schema {
            fields: indices.iter().map(|&i| self.fields[i].clone()).collect(),
        }
    }

    /// Sub-esquema con los campos pedidos, en el orden pedido.
    pub fn project(&self, names: &[String]) -> BuildResult<Schema> {
        let indices = self.resolve(names)?;
        Schema::new(indices.iter().map(|&i| self.fields[i].clone()).collect())
    }

    /// Esquema sin los campos indicados; conserva el orden original.
    pub fn discard(&self, names: &[String]) -> BuildResult<Schema> {
        let drop = self.resolve(names)?;
        Ok(Schema {
            fields: self
                .fields
                .iter()
                .enumerate()
                .filter(|(i, _)| !drop.contains(i))
                .map(|(_, f)| f.clone())
                .collect(),
        })
    }

    /// Renombra campos (viejo -> nuevo) conservando posición y tipo.
    pub fn rename(&self, mapping: &[(String, String)]) -> BuildResult<Schema> {
        let mut fields = self.fields.clone();
        for (old, new) in mapping {
            let idx = self
                .index_of(old)
                .ok_or_else(|| BuildError::field_not_found("", old))?;
            fields[idx].name = new.clone();
        }
        Schema::new(fields)
    }

    /// Concatena dos esquemas; un nombre repetido es un error.
    pub fn join(&self, other: &Schema) -> BuildResult<Schema> {
        let mut fields = self.fields.clone();
        fields.extend(other.fields.iter().cloned());
        Schema::new(fields)
    }

    /// Reetiqueta todos los campos por posición.
    pub fn relabel(&self, names: &[String]) -> BuildResult<Schema> {
        if names.len() != self.len() {
            return Err(BuildError::arity("", "campos declarados", self.len(), names.len()));
        }
        Schema::new(
            self.fields
                .iter()
                .zip(names)
                .map(|(f, n)| Field::new(n.clone(), f.field_type))
                .collect(),
        )
    }

    /// Exige que `other` sea idéntico (nombres, tipos y orden).
    pub fn ensure_same(&self, other: &Schema) -> BuildResult<()> {
        if self.len() != other.len() {
            return Err(BuildError::arity("", "campos", self.len(), other.len()));
        }
        for (mine, theirs) in self.fields.iter().zip(other.fields.iter()) {
            if mine.name != theirs.name {
                return Err(BuildError::field_not_found("", &mine.name));
            }
            if mine.field_type != theirs.field_type {
                return Err(BuildError::TypeMismatch {
                    stage: String::new(),
                    field: mine.name.clone(),
                    expected: mine.field_type.to_string(),
                    found: theirs.field_type,
                });
            }
        }
        Ok(())
    }

    /// Verifica aridad, tipos y ausencia de NaN de un registro.
    pub fn check(&self, record: &Record) -> ExecResult<()> {
        if record.len() != self.len() {
            return Err(ExecutionError::TypeMismatch {
                stage: String::new(),
                field: format!("<{} campos>", self.len()),
                expected: self.fields.first().map_or(FieldType::String, |f| f.field_type),
                found: format!("registro de {} valores", record.len()),
            });
        }
        for (field, value) in self.fields.iter().zip(record.values()) {
            let ok = value.field_type() == field.field_type
                && !matches!(value, Value::Float64(v) if v.is_nan());
            if !ok {
                return Err(ExecutionError::TypeMismatch {
                    stage: String::new(),
                    field: field.name.clone(),
                    expected: field.field_type,
                    found: describe(value),
                });
            }
        }
        Ok(())
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Float64(v) if v.is_nan() => "NaN".to_string(),
        other => format!("{} ({})", other.field_type(), other),
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field.name, field.field_type)?;
        }
        f.write_str(")")
    }
}

/* =========================
   Registro
   ========================= */

/// Tupla de valores alineada por posición con un esquema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Valor por nombre, usando el esquema del registro.
    pub fn get_by_name<'a>(&'a self, schema: &Schema, name: &str) -> Option<&'a Value> {
        schema.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn value(&self, idx: usize) -> ExecResult<&Value> {
        self.values.get(idx).ok_or_else(|| ExecutionError::TypeMismatch {
            stage: String::new(),
            field: format!("#{idx}"),
            expected: FieldType::String,
            found: "ausente".to_string(),
        })
    }

    pub fn str(&self, idx: usize) -> ExecResult<&str> {
        let v = self.value(idx)?;
        v.as_str().ok_or_else(|| wrong_type(idx, FieldType::String, v))
    }

    pub fn int(&self, idx: usize) -> ExecResult<i64> {
        let v = self.value(idx)?;
        v.as_i64().ok_or_else(|| wrong_type(idx, FieldType::Int64, v))
    }

    pub fn float(&self, idx: usize) -> ExecResult<f64> {
        let v = self.value(idx)?;
        v.as_f64().ok_or_else(|| wrong_type(idx, FieldType::Float64, v))
    }

    pub fn boolean(&self, idx: usize) -> ExecResult<bool> {
        let v = self.value(idx)?;
        v.as_bool().ok_or_else(|| wrong_type(idx, FieldType::Boolean, v))
    }

    /// Extrae las posiciones indicadas, en ese orden.
    pub fn project(&self, indices: &[usize]) -> Record {
        Record {
            values: indices.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }

    /// Proyección por nombre: falla con `FieldNotFound` si falta alguno.
    pub fn project_fields(&self, schema: &Schema, names: &[String]) -> BuildResult<Record> {
        let indices = schema.resolve(names)?;
        Ok(self.project(&indices))
    }

    /// Concatena registros (lado izquierdo primero).
    pub fn concat<'a, I>(parts: I) -> Record
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut values = Vec::new();
        for p in parts {
            values.extend(p.values.iter().cloned());
        }
        Record { values }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.values.push(value);
    }
}

fn wrong_type(idx: usize, expected: FieldType, found: &Value) -> ExecutionError {
    ExecutionError::TypeMismatch {
        stage: String::new(),
        field: format!("#{idx}"),
        expected,
        found: describe(found),
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record::new(values)
    }
}

/// `record!["x", 1_i64, true]` construye un `Record` con `Value::from`.
#[macro_export]
macro_rules! record {
    ($($v:expr),* $(,)?) => {
        $crate::schema::Record::new(vec![$($crate::schema::Value::from($v)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn people() -> Schema {
        Schema::of(&[
            ("id", FieldType::Int64),
            ("name", FieldType::String),
            ("score", FieldType::Float64),
            ("active", FieldType::Boolean),
        ])
        .unwrap()
    }

    #[test]
    fn schema_rechaza_nombres_duplicados() {
        let err = Schema::of(&[("a", FieldType::String), ("a", FieldType::Int64)]).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateField { field, .. } if field == "a"));
    }

    #[test]
    fn project_respeta_el_orden_pedido() {
        let schema = people();
        let rec = record![7_i64, "ana", 1.5, true];

        let out = rec.project_fields(&schema, &names(&["score", "id"])).unwrap();
        assert_eq!(out, record![1.5, 7_i64]);

        let sub = schema.project(&names(&["score", "id"])).unwrap();
        assert_eq!(sub.names(), vec!["score", "id"]);
    }

    #[test]
    fn project_falla_si_falta_un_campo() {
        let schema = people();
        let rec = record![7_i64, "ana", 1.5, true];
        let err = rec.project_fields(&schema, &names(&["nope"])).unwrap_err();
        assert!(matches!(err, BuildError::FieldNotFound { field, .. } if field == "nope"));
    }

    #[test]
    fn rename_conserva_posicion_y_tipo() {
        let schema = people();
        let renamed = schema
            .rename(&[("name".to_string(), "nombre".to_string())])
            .unwrap();
        assert_eq!(renamed.names(), vec!["id", "nombre", "score", "active"]);
        assert_eq!(renamed.fields()[1].field_type, FieldType::String);
    }

    #[test]
    fn rename_que_choca_con_campo_retenido_falla() {
        let schema = people();
        let err = schema
            .rename(&[("name".to_string(), "id".to_string())])
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateField { field, .. } if field == "id"));
    }

    #[test]
    fn rename_permite_intercambiar_nombres() {
        let schema = Schema::of(&[("a", FieldType::String), ("b", FieldType::String)]).unwrap();
        let swapped = schema
            .rename(&[
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "a".to_string()),
            ])
            .unwrap();
        assert_eq!(swapped.names(), vec!["b", "a"]);
    }

    #[test]
    fn join_concatena_y_detecta_colisiones() {
        let left = Schema::of(&[("year", FieldType::String), ("president", FieldType::String)]).unwrap();
        let right = Schema::of(&[("party", FieldType::String)]).unwrap();
        assert_eq!(left.join(&right).unwrap().names(), vec!["year", "president", "party"]);

        let err = left.join(&left).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateField { field, .. } if field == "year"));
    }

    #[test]
    fn relabel_exige_la_misma_aridad() {
        let schema = people();
        let err = schema.relabel(&names(&["a", "b"])).unwrap_err();
        assert!(matches!(err, BuildError::ArityMismatch { expected: 4, found: 2, .. }));
    }

    #[test]
    fn check_detecta_tipos_y_nan() {
        let schema = people();
        assert!(schema.check(&record![1_i64, "x", 0.5, false]).is_ok());

        let err = schema.check(&record!["1", "x", 0.5, false]).unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch { field, .. } if field == "id"));

        let err = schema.check(&record![1_i64, "x", f64::NAN, false]).unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch { found, .. } if found == "NaN"));

        assert!(schema.check(&record![1_i64, "x"]).is_err());
    }

    #[test]
    fn orden_natural_por_tipo() {
        assert!(Value::from("abc") < Value::from("abd"));
        assert!(Value::from("B") < Value::from("a"));
        assert!(Value::from(-3_i64) < Value::from(2_i64));
        assert!(Value::from(0.5) < Value::from(1.0));
        assert_eq!(Value::from(-0.0), Value::from(0.0));
        assert!(Value::from(false) < Value::from(true));
    }

    #[test]
    fn parse_convierte_texto_al_tipo_del_campo() {
        assert_eq!(Value::parse(&Field::int64("n"), " 42 ").unwrap(), Value::Int64(42));
        assert_eq!(Value::parse(&Field::float64("f"), "0.25").unwrap(), Value::Float64(0.25));
        assert_eq!(Value::parse(&Field::boolean("b"), "true").unwrap(), Value::Boolean(true));
        assert_eq!(Value::parse(&Field::string("s"), " x ").unwrap(), Value::from(" x "));
        assert!(Value::parse(&Field::int64("n"), "x").is_err());
        assert!(Value::parse(&Field::float64("f"), "NaN").is_err());
    }

    #[test]
    fn accesores_tipados_reportan_el_tipo_equivocado() {
        let rec = record!["x", 3_i64];
        assert_eq!(rec.str(0).unwrap(), "x");
        assert_eq!(rec.int(1).unwrap(), 3);
        assert!(rec.int(0).is_err());
        assert!(rec.float(5).is_err());
    }

    proptest! {
        // Rename es una biyección sobre los nombres y no toca los valores.
        #[test]
        fn rename_es_biyeccion_y_no_toca_valores(
            values in prop::collection::vec(any::<i64>(), 1..8),
            shift in 0usize..8,
        ) {
            let n = values.len();
            let schema = Schema::new(
                (0..n).map(|i| Field::int64(format!("f{i}"))).collect()
            ).unwrap();
            // permutación circular de los nombres
            let mapping: Vec<(String, String)> = (0..n)
                .map(|i| (format!("f{i}"), format!("f{}", (i + shift) % n)))
                .collect();

            let renamed = schema.rename(&mapping).unwrap();
            prop_assert_eq!(renamed.len(), n);

            let inverse: Vec<(String, String)> =
                mapping.iter().map(|(a, b)| (b.clone(), a.clone())).collect();
            prop_assert_eq!(renamed.rename(&inverse).unwrap(), schema.clone());

            let rec = Record::new(values.iter().copied().map(Value::from).collect());
            prop_assert!(renamed.check(&rec).is_ok());
            prop_assert_eq!(rec.values().len(), n);
        }
    }
}
