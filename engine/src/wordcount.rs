use std::sync::Arc;

use crate::dag::{Dag, DagBuilder};
use crate::endpoint::{Sink, Source};
use crate::error::BuildResult;
use crate::flow::{build_flow, FlowGraph, SinkBindings, SourceBindings};
use crate::schema::{Field, Record, Schema, Value};
use crate::stage::{Aggregator, OutputSelector, Stage};

pub const LINE: &str = "line";
pub const WORD: &str = "word";
pub const COUNT: &str = "count";

/* =========================
   Tokenizador
   ========================= */

/// Normaliza una línea antes de partirla. Las reglas se aplican en orden:
///   1. el literal `a,b,c` pasa a `a b c`
///   2. se borra la marca `v2`
///   3. se borran `/` y `'`
///   4. se borra un `-` precedido por espacio en blanco
///   5. se borra todo lo que no sea `[a-zA-Z -]`
///   6. minúsculas
pub fn normalize(text: &str) -> String {
    let step = text.replace("a,b,c", "a b c").replace("v2", "");
    let step: String = step.chars().filter(|c| *c != '/' && *c != '\'').collect();

    let mut prev: Option<char> = None;
    let mut no_dash = String::with_capacity(step.len());
    for c in step.chars() {
        let after_space = prev.map_or(false, char::is_whitespace);
        if !(c == '-' && after_space) {
            no_dash.push(c);
        }
        prev = Some(c);
    }

    no_dash
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == ' ' || *c == '-')
        .collect::<String>()
        .to_lowercase()
}

/// Palabras de una línea normalizada; nunca devuelve tokens vacíos.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Map que parte el campo `argument` y emite un registro `(word)` por token.
pub fn tokenize_stage(name: &str, argument: &str, output: OutputSelector) -> Stage {
    Stage::map(
        name,
        [argument],
        Schema::from_field(Field::string(WORD)),
        output,
        |args: &Record| {
            let text = args.str(0)?;
            Ok(tokenize(text)
                .into_iter()
                .map(|w| Record::new(vec![Value::String(w)]))
                .collect())
        },
    )
}

/* =========================
   Flow de conteo de palabras
   ========================= */

/// `lines(line) -> tokenize -> count(word, count)`
pub fn word_count_dag() -> Dag {
    DagBuilder::new()
        .stage(Stage::pipe("lines"), &[])
        .stage(tokenize_stage("tokenize", LINE, OutputSelector::Results), &["lines"])
        .stage(
            Stage::group_aggregate("count", [WORD], Aggregator::count(COUNT)),
            &["tokenize"],
        )
        .build()
}

/// La fuente debe tener un campo `line`; el sink recibe `(word, count)`
/// en orden alfabético.
pub fn count_word_occurrences(
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
) -> BuildResult<FlowGraph> {
    build_flow(
        word_count_dag(),
        SourceBindings::new().bind("lines", source),
        SinkBindings::new().bind("wordcount", "count", sink),
    )
}
