use std::sync::Arc;

use crate::dag::{Dag, DagBuilder};
use crate::endpoint::{Sink, Source};
use crate::error::{BuildResult, ExecResult, ExecutionError};
use crate::flow::{build_flow, FlowGraph, SinkBindings, SourceBindings};
use crate::schema::{Field, Record, Schema, Value};
use crate::stage::{Aggregator, JoinType, OutputSelector, SortKey, Stage};
use crate::wordcount::{tokenize_stage, WORD};

/* --------- Campos --------- */

pub const ID: &str = "id";
pub const CONTENT: &str = "content";
pub const DOC_ID: &str = "doc_id";
pub const DOC_ID_TEMP: &str = "doc_id_temp";
pub const WORD_COUNT: &str = "count";
pub const MAX_WORD_COUNT: &str = "max_word_count";
pub const DOC_FREQ_WORD: &str = "doc_freq_word";
pub const WORD_DOC_FREQ: &str = "word_doc_freq";
pub const TEMP_TALLY: &str = "temp_tally";
pub const DOC_COUNT: &str = "doc_count";
pub const JOIN_LEFT: &str = "join_left";
pub const JOIN_RIGHT: &str = "join_right";
pub const TFIDF: &str = "tfidf";

/// Puntajes por debajo de este umbral se descartan.
pub const MIN_SCORE: f64 = 0.1;

/// `tf = wc / max`, `idf = ln(n / df)`, `score = tf * idf`.
pub fn score(word_count: i64, max_word_count: i64, doc_freq: i64, doc_count: i64) -> ExecResult<f64> {
    if max_word_count == 0 {
        return Err(ExecutionError::degenerate("max_word_count es 0"));
    }
    if doc_freq == 0 {
        return Err(ExecutionError::degenerate("frecuencia de documento 0"));
    }
    let tf = word_count as f64 / max_word_count as f64;
    let idf = (doc_count as f64 / doc_freq as f64).ln();
    Ok(tf * idf)
}

fn score_stage() -> Stage {
    Stage::map(
        "score",
        [WORD_COUNT, MAX_WORD_COUNT, WORD_DOC_FREQ, DOC_COUNT],
        Schema::from_field(Field::float64(TFIDF)),
        OutputSelector::select([DOC_ID, TFIDF, WORD]),
        |args: &Record| {
            let s = score(args.int(0)?, args.int(1)?, args.int(2)?, args.int(3)?)?;
            Ok(vec![Record::new(vec![Value::Float64(s)])])
        },
    )
}

/// Grafo completo. La fuente es `(id, content)`; la salida
/// `(doc_id, tfidf, word)` ordenada por doc_id, tfidf y word descendentes.
///
/// Ramas desde `tokens`:
///   - conteo por (doc, palabra) + máximo por documento
///   - cantidad total de documentos
///   - en cuántos documentos aparece cada palabra
pub fn tfidf_dag() -> Dag {
    DagBuilder::new()
        .stage(Stage::pipe("docs"), &[])
        .stage(
            tokenize_stage("tokenize", CONTENT, OutputSelector::select([ID, WORD])),
            &["docs"],
        )
        .stage(Stage::rename("tokens", [ID], [DOC_ID]), &["tokenize"])
        /* ----- conteo por documento y máximo ----- */
        .stage(
            Stage::group_aggregate("word_count", [DOC_ID, WORD], Aggregator::count(WORD_COUNT)),
            &["tokens"],
        )
        .stage(
            Stage::group_aggregate(
                "max_value",
                [DOC_ID],
                Aggregator::max_value(WORD_COUNT, MAX_WORD_COUNT),
            ),
            &["word_count"],
        )
        .stage(
            Stage::rename("max_value_key", [DOC_ID], [DOC_ID_TEMP]),
            &["max_value"],
        )
        .stage(
            Stage::co_group("final_word_count", [DOC_ID], [DOC_ID_TEMP], None, JoinType::Inner),
            &["word_count", "max_value_key"],
        )
        .stage(
            Stage::discard("final_word_count_clean", [DOC_ID_TEMP]),
            &["final_word_count"],
        )
        /* ----- cantidad de documentos ----- */
        .stage(Stage::unique("doc_count_unique", [DOC_ID]), &["tokens"])
        .stage(
            Stage::insert("doc_count_tally", Field::int64(TEMP_TALLY), 1_i64),
            &["doc_count_unique"],
        )
        .stage(
            Stage::group_aggregate(
                "doc_count",
                Vec::<String>::new(),
                Aggregator::sum(TEMP_TALLY, DOC_COUNT),
            ),
            &["doc_count_tally"],
        )
        .stage(
            Stage::insert("doc_count_key", Field::int64(JOIN_RIGHT), 1_i64),
            &["doc_count"],
        )
        /* ----- frecuencia de documento por palabra ----- */
        .stage(Stage::unique("word_doc_unique", [DOC_ID, WORD]), &["tokens"])
        .stage(
            Stage::rename("word_doc_rename", [WORD], [DOC_FREQ_WORD]),
            &["word_doc_unique"],
        )
        .stage(
            Stage::group_aggregate(
                "word_doc_freq",
                [DOC_FREQ_WORD],
                Aggregator::count(WORD_DOC_FREQ),
            ),
            &["word_doc_rename"],
        )
        .stage(
            Stage::insert("word_doc_key", Field::int64(JOIN_LEFT), 1_i64),
            &["word_doc_freq"],
        )
        /* ----- combinación y puntaje ----- */
        .stage(
            Stage::hash_join("idf", [JOIN_LEFT], [JOIN_RIGHT], None),
            &["word_doc_key", "doc_count_key"],
        )
        .stage(
            Stage::co_group("tfidf_join", [WORD], [DOC_FREQ_WORD], None, JoinType::Inner),
            &["final_word_count_clean", "idf"],
        )
        .stage(score_stage(), &["tfidf_join"])
        .stage(
            Stage::filter("relevant", [TFIDF], |args| {
                args.float(0).map_or(false, |s| s >= MIN_SCORE)
            }),
            &["score"],
        )
        .stage(
            Stage::sort(
                "sorted",
                vec![SortKey::desc(DOC_ID), SortKey::desc(TFIDF), SortKey::desc(WORD)],
            ),
            &["relevant"],
        )
        .build()
}

/// La fuente debe ser `(id: string, content: string)`.
pub fn compute_tfidf(source: Arc<dyn Source>, sink: Arc<dyn Sink>) -> BuildResult<FlowGraph> {
    build_flow(
        tfidf_dag(),
        SourceBindings::new().bind("docs", source),
        SinkBindings::new().bind("tfidf", "sorted", sink),
    )
}

/// Esquemas de entrada y salida del flow.
pub fn input_schema() -> Schema {
    Schema::new(vec![Field::string(ID), Field::string(CONTENT)]).unwrap_or_default()
}

pub fn output_schema() -> Schema {
    Schema::new(vec![Field::string(DOC_ID), Field::float64(TFIDF), Field::string(WORD)])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{MemorySink, MemorySource};
    use crate::executor::run;
    use crate::record;

    fn docs(rows: Vec<Record>) -> Arc<dyn Source> {
        Arc::new(MemorySource::new(input_schema(), rows))
    }

    #[test]
    fn score_basico_y_casos_degenerados() {
        let s = score(1, 1, 1, 2).unwrap();
        assert!((s - 2f64.ln()).abs() < 1e-12);
        assert_eq!(score(3, 3, 2, 2).unwrap(), 0.0);

        assert!(matches!(score(1, 0, 1, 2), Err(ExecutionError::DegenerateInput { .. })));
        assert!(matches!(score(1, 1, 0, 2), Err(ExecutionError::DegenerateInput { .. })));
    }

    #[test]
    fn palabra_comun_se_filtra_y_las_propias_quedan() {
        let out = Arc::new(MemorySink::with_schema(output_schema()));
        let flow = compute_tfidf(
            docs(vec![record!["doc1", "the cat"], record!["doc2", "the dog"]]),
            out.clone(),
        )
        .unwrap();
        run(&flow).unwrap();

        let rows = out.records();
        assert_eq!(rows.len(), 2);
        // doc_id descendente
        assert_eq!(rows[0].str(0).unwrap(), "doc2");
        assert_eq!(rows[0].str(2).unwrap(), "dog");
        assert_eq!(rows[1].str(0).unwrap(), "doc1");
        assert_eq!(rows[1].str(2).unwrap(), "cat");
        for r in &rows {
            assert!((r.float(1).unwrap() - 2f64.ln()).abs() < 1e-9);
        }
    }

    #[test]
    fn tf_usa_el_maximo_del_documento() {
        let out = Arc::new(MemorySink::new());
        let flow = compute_tfidf(
            docs(vec![
                record!["a", "fox fox fox hen"],
                record!["b", "cow"],
                record!["c", "cow"],
            ]),
            out.clone(),
        )
        .unwrap();
        run(&flow).unwrap();

        let ln3 = 3f64.ln();
        let ln3_2 = 1.5f64.ln();
        let rows = out.records();
        let find = |doc: &str, word: &str| {
            rows.iter()
                .find(|r| r.str(0).unwrap() == doc && r.str(2).unwrap() == word)
                .map(|r| r.float(1).unwrap())
        };

        // fox: tf 3/3, df 1 de 3 docs; hen: tf 1/3
        assert!((find("a", "fox").unwrap() - ln3).abs() < 1e-9);
        assert!((find("a", "hen").unwrap() - ln3 / 3.0).abs() < 1e-9);
        // cow: tf 1, idf ln(3/2) ≈ 0.405
        assert!((find("c", "cow").unwrap() - ln3_2).abs() < 1e-9);

        // orden: c, b, a; dentro de "a" por tfidf descendente
        let order: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.str(0).unwrap().to_string(), r.str(2).unwrap().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("c".to_string(), "cow".to_string()),
                ("b".to_string(), "cow".to_string()),
                ("a".to_string(), "fox".to_string()),
                ("a".to_string(), "hen".to_string()),
            ]
        );
    }

    #[test]
    fn esquema_de_salida_derivado() {
        let flow = compute_tfidf(docs(vec![]), Arc::new(MemorySink::new())).unwrap();
        assert_eq!(flow.schema_of("sorted"), Some(&output_schema()));
        assert_eq!(
            flow.schema_of("tfidf_join").unwrap().names(),
            vec![
                DOC_ID,
                WORD,
                WORD_COUNT,
                MAX_WORD_COUNT,
                DOC_FREQ_WORD,
                WORD_DOC_FREQ,
                JOIN_LEFT,
                DOC_COUNT,
                JOIN_RIGHT,
            ]
        );
    }

    #[test]
    fn sin_documentos_no_hay_salida() {
        let out = Arc::new(MemorySink::new());
        let flow = compute_tfidf(docs(vec![]), out.clone()).unwrap();
        let report = run(&flow).unwrap();
        assert!(out.records().is_empty());
        assert_eq!(report.records_written("tfidf"), Some(0));
    }
}
