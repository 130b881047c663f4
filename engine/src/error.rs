use std::io;

use thiserror::Error;

use crate::schema::FieldType;

/* =========================
   Errores de construcción (build time)
   ========================= */

/// Errores detectados al validar el grafo, antes de leer un solo registro.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("campo '{field}' no existe en el esquema de '{stage}'")]
    FieldNotFound { stage: String, field: String },

    #[error("campo '{field}' duplicado en el esquema de '{stage}'")]
    DuplicateField { stage: String, field: String },

    #[error("aridad incorrecta en '{stage}': se esperaban {expected}, llegaron {found} ({what})")]
    ArityMismatch {
        stage: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("tipo incorrecto para '{field}' en '{stage}': se esperaba {expected}, es {found}")]
    TypeMismatch {
        stage: String,
        field: String,
        expected: String,
        found: FieldType,
    },

    #[error("el stage '{0}' no tiene productor y no está ligado a ninguna fuente")]
    UnboundSource(String),

    #[error("el stage terminal '{0}' no está ligado a ningún sink")]
    UnboundSink(String),

    #[error("ciclo detectado en el grafo (stage '{0}')")]
    CycleDetected(String),

    #[error("nombre de stage duplicado: '{0}'")]
    DuplicateStage(String),

    #[error("el stage '{0}' no existe en el grafo")]
    StageNotFound(String),

    #[error("binding inválido para '{stage}': {reason}")]
    InvalidBinding { stage: String, reason: String },
}

impl BuildError {
    pub(crate) fn field_not_found(stage: &str, field: &str) -> Self {
        BuildError::FieldNotFound {
            stage: stage.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn duplicate_field(stage: &str, field: &str) -> Self {
        BuildError::DuplicateField {
            stage: stage.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn arity(stage: &str, what: &'static str, expected: usize, found: usize) -> Self {
        BuildError::ArityMismatch {
            stage: stage.to_string(),
            what,
            expected,
            found,
        }
    }

    /// Los errores de esquema se construyen sin conocer el stage;
    /// el planner lo completa al propagarlos.
    pub(crate) fn in_stage(self, name: &str) -> Self {
        match self {
            BuildError::FieldNotFound { stage, field } if stage.is_empty() => {
                BuildError::FieldNotFound {
                    stage: name.to_string(),
                    field,
                }
            }
            BuildError::DuplicateField { stage, field } if stage.is_empty() => {
                BuildError::DuplicateField {
                    stage: name.to_string(),
                    field,
                }
            }
            BuildError::ArityMismatch {
                stage,
                what,
                expected,
                found,
            } if stage.is_empty() => BuildError::ArityMismatch {
                stage: name.to_string(),
                what,
                expected,
                found,
            },
            BuildError::TypeMismatch {
                stage,
                field,
                expected,
                found,
            } if stage.is_empty() => BuildError::TypeMismatch {
                stage: name.to_string(),
                field,
                expected,
                found,
            },
            other => other,
        }
    }
}

/* =========================
   Errores de endpoints (colaboradores externos)
   ========================= */

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("error de E/S: {0}")]
    Io(#[from] io::Error),

    #[error("error CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("error JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("valor '{value}' no es un {expected} válido (campo '{field}')")]
    Parse {
        field: String,
        expected: FieldType,
        value: String,
    },

    #[error("encabezado inesperado: se esperaba {expected:?}, llegó {found:?}")]
    Header {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("registro con {found} columnas, el esquema tiene {expected}")]
    Width { expected: usize, found: usize },

    #[error("falta el campo '{0}' en el registro")]
    MissingField(String),
}

/* =========================
   Errores de ejecución (run time)
   ========================= */

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("entrada degenerada en '{stage}': {reason}")]
    DegenerateInput { stage: String, reason: String },

    #[error("valor incompatible en '{stage}', campo '{field}': se esperaba {expected}, llegó {found}")]
    TypeMismatch {
        stage: String,
        field: String,
        expected: FieldType,
        found: String,
    },

    #[error("desbordamiento aritmético en '{stage}' (campo '{field}')")]
    ArithmeticOverflow { stage: String, field: String },

    #[error("el stage '{stage}' superó el límite de {limit} registros en memoria")]
    BufferLimitExceeded { stage: String, limit: usize },

    #[error("la función de usuario de '{stage}' falló: {message}")]
    UserFunction { stage: String, message: String },

    #[error("endpoint '{endpoint}': {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: EndpointError,
    },
}

impl ExecutionError {
    /// Error que puede devolver una función de usuario; el executor
    /// le asigna el nombre del stage.
    pub fn degenerate(reason: impl Into<String>) -> Self {
        ExecutionError::DegenerateInput {
            stage: String::new(),
            reason: reason.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        ExecutionError::UserFunction {
            stage: String::new(),
            message: message.into(),
        }
    }

    pub(crate) fn in_stage(self, name: &str) -> Self {
        match self {
            ExecutionError::DegenerateInput { stage, reason } if stage.is_empty() => {
                ExecutionError::DegenerateInput {
                    stage: name.to_string(),
                    reason,
                }
            }
            ExecutionError::UserFunction { stage, message } if stage.is_empty() => {
                ExecutionError::UserFunction {
                    stage: name.to_string(),
                    message,
                }
            }
            ExecutionError::TypeMismatch {
                stage,
                field,
                expected,
                found,
            } if stage.is_empty() => ExecutionError::TypeMismatch {
                stage: name.to_string(),
                field,
                expected,
                found,
            },
            ExecutionError::ArithmeticOverflow { stage, field } if stage.is_empty() => {
                ExecutionError::ArithmeticOverflow {
                    stage: name.to_string(),
                    field,
                }
            }
            other => other,
        }
    }
}

/* =========================
   Errores de configuración
   ========================= */

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no se pudo leer la configuración {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("configuración inválida en {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("valor inválido para {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("valor inválido para '{field}': '{value}'")]
    Invalid { field: &'static str, value: String },
}

pub type BuildResult<T> = Result<T, BuildError>;
pub type ExecResult<T> = Result<T, ExecutionError>;
