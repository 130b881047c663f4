use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::endpoint::{ensure_parent, RecordStream, RecordWriter, Sink, Source};
use crate::error::EndpointError;
use crate::schema::{Field, Record, Schema, Value};

/// Texto plano: como fuente, cada línea es un registro de un único campo
/// string; como sink, escribe los valores de cada registro separados por
/// tabulador.
#[derive(Debug, Clone)]
pub struct TextLines {
    path: PathBuf,
    schema: Schema,
}

impl TextLines {
    /// Fuente/sink con un campo de texto llamado `field`.
    pub fn new(path: impl AsRef<Path>, field: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema: Schema::from_field(Field::string(field)),
        }
    }
}

impl Source for TextLines {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn open(&self) -> Result<RecordStream<'_>, EndpointError> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(Box::new(reader.lines().map(|line| {
            let line = line?;
            Ok(Record::new(vec![Value::String(line)]))
        })))
    }
}

struct TextWriter {
    writer: BufWriter<File>,
}

impl RecordWriter for TextWriter {
    fn write(&mut self, record: &Record) -> Result<(), EndpointError> {
        let line = record
            .values()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\t");
        writeln!(self.writer, "{line}")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EndpointError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Como sink acepta cualquier esquema.
impl Sink for TextLines {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self, _schema: &Schema) -> Result<Box<dyn RecordWriter + '_>, EndpointError> {
        ensure_parent(&self.path)?;
        Ok(Box::new(TextWriter {
            writer: BufWriter::new(File::create(&self.path)?),
        }))
    }
}
