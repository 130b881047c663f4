use serde_json::{Map, Number, Value as Json};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::endpoint::{ensure_parent, RecordStream, RecordWriter, Sink, Source};
use crate::error::EndpointError;
use crate::schema::{Field, FieldType, Record, Schema, Value};

/// Un objeto JSON por línea. Las líneas vacías se ignoran y los campos
/// que no están en el esquema también.
#[derive(Debug, Clone)]
pub struct JsonLines {
    path: PathBuf,
    schema: Schema,
}

impl JsonLines {
    pub fn new(path: impl AsRef<Path>, schema: Schema) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema,
        }
    }
}

fn from_json(field: &Field, raw: &Json) -> Result<Value, EndpointError> {
    let bad = || EndpointError::Parse {
        field: field.name.clone(),
        expected: field.field_type,
        value: raw.to_string(),
    };
    match field.field_type {
        FieldType::String => raw.as_str().map(Value::from).ok_or_else(bad),
        FieldType::Int64 => raw.as_i64().map(Value::Int64).ok_or_else(bad),
        // los enteros también valen como float
        FieldType::Float64 => raw.as_f64().map(Value::Float64).ok_or_else(bad),
        FieldType::Boolean => raw.as_bool().map(Value::Boolean).ok_or_else(bad),
    }
}

fn to_json(field: &Field, value: &Value) -> Result<Json, EndpointError> {
    Ok(match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Int64(v) => Json::Number((*v).into()),
        Value::Float64(v) => Number::from_f64(*v)
            .map(Json::Number)
            .ok_or_else(|| EndpointError::Parse {
                field: field.name.clone(),
                expected: FieldType::Float64,
                value: v.to_string(),
            })?,
        Value::Boolean(v) => Json::Bool(*v),
    })
}

fn parse_line(schema: &Schema, line: &str) -> Result<Record, EndpointError> {
    let obj: Json = serde_json::from_str(line)?;
    schema
        .fields()
        .iter()
        .map(|field| {
            let raw = obj
                .get(&field.name)
                .ok_or_else(|| EndpointError::MissingField(field.name.clone()))?;
            from_json(field, raw)
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Record::new)
}

impl Source for JsonLines {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&self) -> Result<RecordStream<'_>, EndpointError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let schema = &self.schema;
        Ok(Box::new(reader.lines().filter_map(move |line| match line {
            Err(e) => Some(Err(e.into())),
            Ok(l) if l.trim().is_empty() => None,
            Ok(l) => Some(parse_line(schema, &l)),
        })))
    }
}

struct JsonLinesWriter<'a> {
    schema: &'a Schema,
    writer: BufWriter<File>,
}

impl RecordWriter for JsonLinesWriter<'_> {
    fn write(&mut self, record: &Record) -> Result<(), EndpointError> {
        let mut obj = Map::new();
        for (field, value) in self.schema.fields().iter().zip(record.values()) {
            obj.insert(field.name.clone(), to_json(field, value)?);
        }
        serde_json::to_writer(&mut self.writer, &obj)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EndpointError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Sink for JsonLines {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn schema(&self) -> Option<&Schema> {
        Some(&self.schema)
    }

    fn open(&self, _schema: &Schema) -> Result<Box<dyn RecordWriter + '_>, EndpointError> {
        ensure_parent(&self.path)?;
        Ok(Box::new(JsonLinesWriter {
            schema: &self.schema,
            writer: BufWriter::new(File::create(&self.path)?),
        }))
    }
}
