//! Endpoints: de dónde salen y a dónde van los registros.
//!
//! Una fuente produce una secuencia finita de registros con un esquema
//! fijo; un sink acepta registros del esquema del stage al que se liga.

use std::{fs, io, path::Path};

use crate::error::EndpointError;
use crate::schema::{Record, Schema, Value};

pub mod delimited;
pub mod jsonl;
pub mod memory;
pub mod text;

pub use delimited::DelimitedFile;
pub use jsonl::JsonLines;
pub use memory::{MemorySink, MemorySource};
pub use text::TextLines;

pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Record, EndpointError>> + 'a>;

pub trait Source: Send + Sync {
    /// Nombre para logs y reportes (ruta, "memory", etc.).
    fn name(&self) -> String;

    fn schema(&self) -> &Schema;

    /// Si la primera línea es un encabezado con los nombres de campo.
    fn has_header(&self) -> bool {
        false
    }

    /// Abre una lectura nueva desde el principio.
    fn open(&self) -> Result<RecordStream<'_>, EndpointError>;
}

pub trait RecordWriter {
    fn write(&mut self, record: &Record) -> Result<(), EndpointError>;

    /// Vacía buffers; se llama una vez al terminar el run.
    fn finish(&mut self) -> Result<(), EndpointError>;
}

pub trait Sink: Send + Sync {
    fn name(&self) -> String;

    /// Esquema esperado, si el sink lo fija. Se compara al construir el flow.
    fn schema(&self) -> Option<&Schema> {
        None
    }

    fn writes_header(&self) -> bool {
        false
    }

    /// Abre el destino para un run; reemplaza lo escrito antes.
    fn open(&self, schema: &Schema) -> Result<Box<dyn RecordWriter + '_>, EndpointError>;
}

/// Crea el directorio padre de `path` si hace falta.
pub(crate) fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Convierte columnas de texto a un registro tipado.
pub(crate) fn parse_row(schema: &Schema, columns: &[&str]) -> Result<Record, EndpointError> {
    if columns.len() != schema.len() {
        return Err(EndpointError::Width {
            expected: schema.len(),
            found: columns.len(),
        });
    }
    schema
        .fields()
        .iter()
        .zip(columns)
        .map(|(field, text)| Value::parse(field, text))
        .collect::<Result<Vec<_>, _>>()
        .map(Record::new)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::{env, fs, path::PathBuf};

    pub(crate) fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("flow_engine_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }
}
