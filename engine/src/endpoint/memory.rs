use std::sync::Mutex;

use crate::endpoint::{RecordStream, RecordWriter, Sink, Source};
use crate::error::EndpointError;
use crate::schema::{Record, Schema};

/// Fuente en memoria; útil en tests y para encadenar flows.
#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: Schema,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(schema: Schema, records: Vec<Record>) -> Self {
        Self { schema, records }
    }
}

impl Source for MemorySource {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&self) -> Result<RecordStream<'_>, EndpointError> {
        Ok(Box::new(self.records.iter().cloned().map(Ok)))
    }
}

/// Sink en memoria. Cada run arranca con el contenido vacío.
#[derive(Debug, Default)]
pub struct MemorySink {
    expected: Option<Schema>,
    records: Mutex<Vec<Record>>,
    schema: Mutex<Option<Schema>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink que exige un esquema concreto al construir el flow.
    pub fn with_schema(schema: Schema) -> Self {
        Self {
            expected: Some(schema),
            ..Self::default()
        }
    }

    /// Copia de lo escrito en el último run.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Esquema con el que se abrió en el último run.
    pub fn written_schema(&self) -> Option<Schema> {
        self.schema
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct MemoryWriter<'a> {
    sink: &'a MemorySink,
}

impl RecordWriter for MemoryWriter<'_> {
    fn write(&mut self, record: &Record) -> Result<(), EndpointError> {
        self.sink
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EndpointError> {
        Ok(())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn schema(&self) -> Option<&Schema> {
        self.expected.as_ref()
    }

    fn open(&self, schema: &Schema) -> Result<Box<dyn RecordWriter + '_>, EndpointError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.schema.lock().unwrap_or_else(|e| e.into_inner()) = Some(schema.clone());
        Ok(Box::new(MemoryWriter { sink: self }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::schema::FieldType;

    #[test]
    fn memory_sink_se_vacia_al_reabrir() {
        let schema = Schema::of(&[("x", FieldType::Int64)]).unwrap();
        let sink = MemorySink::new();

        let mut w = sink.open(&schema).unwrap();
        w.write(&record![1_i64]).unwrap();
        w.finish().unwrap();
        drop(w);
        assert_eq!(sink.records(), vec![record![1_i64]]);

        let _w = sink.open(&schema).unwrap();
        assert!(sink.records().is_empty());
        assert_eq!(sink.written_schema(), Some(schema));
    }

    #[test]
    fn memory_source_se_puede_leer_dos_veces() {
        let schema = Schema::of(&[("x", FieldType::Int64)]).unwrap();
        let src = MemorySource::new(schema, vec![record![1_i64], record![2_i64]]);
        let first: Vec<_> = src.open().unwrap().map(|r| r.unwrap()).collect();
        let second: Vec<_> = src.open().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
