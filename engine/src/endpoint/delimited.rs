use std::{
    fs::File,
    path::{Path, PathBuf},
};

use crate::config::EngineConfig;
use crate::endpoint::{ensure_parent, parse_row, RecordStream, RecordWriter, Sink, Source};
use crate::error::EndpointError;
use crate::schema::{Record, Schema};

/// Archivo delimitado (CSV, TSV, ...) con encabezado opcional.
/// Sirve como fuente y como sink.
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    path: PathBuf,
    schema: Schema,
    header: bool,
    delimiter: u8,
}

impl DelimitedFile {
    /// Por defecto: coma como separador y con encabezado.
    pub fn new(path: impl AsRef<Path>, schema: Schema) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema,
            header: true,
            delimiter: b',',
        }
    }

    /// Toma separador y encabezado de la configuración.
    pub fn from_config(path: impl AsRef<Path>, schema: Schema, config: &EngineConfig) -> Self {
        Self::new(path, schema)
            .with_header(config.header)
            .with_delimiter(config.delimiter_byte())
    }

    #[must_use]
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn clean_header(h: &str) -> String {
    // BOM de archivos exportados desde Excel/Windows
    h.trim().trim_start_matches('\u{feff}').to_string()
}

impl Source for DelimitedFile {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn has_header(&self) -> bool {
        self.header
    }

    fn open(&self) -> Result<RecordStream<'_>, EndpointError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(self.header)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(&self.path)?;

        if self.header {
            let found: Vec<String> = reader.headers()?.iter().map(clean_header).collect();
            // archivo vacío: cero registros
            if found.is_empty() {
                return Ok(Box::new(std::iter::empty()));
            }
            let expected: Vec<String> = self.schema.names().iter().map(|n| n.to_string()).collect();
            if found != expected {
                return Err(EndpointError::Header { expected, found });
            }
        }

        let schema = &self.schema;
        Ok(Box::new(reader.into_records().map(move |row| {
            let row = row?;
            let columns: Vec<&str> = row.iter().collect();
            parse_row(schema, &columns)
        })))
    }
}

struct DelimitedWriter {
    writer: csv::Writer<File>,
}

impl RecordWriter for DelimitedWriter {
    fn write(&mut self, record: &Record) -> Result<(), EndpointError> {
        self.writer
            .write_record(record.values().iter().map(|v| v.to_string()))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EndpointError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Sink for DelimitedFile {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn schema(&self) -> Option<&Schema> {
        Some(&self.schema)
    }

    fn writes_header(&self) -> bool {
        self.header
    }

    fn open(&self, schema: &Schema) -> Result<Box<dyn RecordWriter + '_>, EndpointError> {
        ensure_parent(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&self.path)?;
        if self.header {
            writer.write_record(schema.names())?;
        }
        Ok(Box::new(DelimitedWriter { writer }))
    }
}
