use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::error::ConfigError;

pub const DEFAULT_MAX_BUFFERED_RECORDS: usize = 10_000_000;

pub const ENV_MAX_BUFFERED_RECORDS: &str = "FLOW_MAX_BUFFERED_RECORDS";
pub const ENV_DELIMITER: &str = "FLOW_DELIMITER";
pub const ENV_HEADER: &str = "FLOW_HEADER";

/// Configuración del motor. Orden de precedencia:
/// defaults < archivo JSON < variables de entorno.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Máximo de registros (o claves) que retiene un stage bloqueante.
    pub max_buffered_records: usize,

    /// Separador de los archivos delimitados. Un solo carácter ASCII.
    pub delimiter: char,

    /// Si los archivos delimitados llevan encabezado.
    pub header: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffered_records: DEFAULT_MAX_BUFFERED_RECORDS,
            delimiter: ',',
            header: true,
        }
    }
}

impl EngineConfig {
    /// Defaults + variables de entorno.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Carga completa: archivo opcional y después el entorno.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_json_file(p)?.with_env_overrides(),
            None => Self::from_env(),
        }
    }

    /// Sólo el archivo JSON; los campos ausentes toman el default.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: EngineConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if !config.delimiter.is_ascii() {
            return Err(ConfigError::Invalid {
                field: "delimiter",
                value: config.delimiter.to_string(),
            });
        }
        Ok(config)
    }

    /// Pisa los campos que tengan variable de entorno definida.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = env::var(ENV_MAX_BUFFERED_RECORDS) {
            self.max_buffered_records = raw.trim().parse::<usize>().map_err(|_| ConfigError::Env {
                var: ENV_MAX_BUFFERED_RECORDS,
                value: raw.clone(),
            })?;
        }

        if let Ok(raw) = env::var(ENV_DELIMITER) {
            self.delimiter = parse_delimiter(&raw).ok_or_else(|| ConfigError::Env {
                var: ENV_DELIMITER,
                value: raw.clone(),
            })?;
        }

        if let Ok(raw) = env::var(ENV_HEADER) {
            self.header = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Env {
                        var: ENV_HEADER,
                        value: raw,
                    })
                }
            };
        }

        Ok(self)
    }

    /// Separador como byte para el lector/escritor CSV.
    pub fn delimiter_byte(&self) -> u8 {
        if self.delimiter.is_ascii() {
            self.delimiter as u8
        } else {
            b','
        }
    }
}

/// Acepta un carácter ASCII o `\t` escrito literalmente.
fn parse_delimiter(raw: &str) -> Option<char> {
    if raw == "\\t" {
        return Some('\t');
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Some(c),
        _ => None,
    }
}
