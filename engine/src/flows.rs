//! Flows de referencia: manipulación de esquema y grafos no lineales
//! (múltiples fuentes, fork a varios sinks).

use std::sync::Arc;

use crate::dag::DagBuilder;
use crate::endpoint::{Sink, Source};
use crate::error::BuildResult;
use crate::flow::{build_flow, FlowGraph, SinkBindings, SourceBindings};
use crate::stage::{declared, JoinType, Stage};

/* =========================
   Esquema: discard / retain / rename
   ========================= */

/// `(discardme, line) -> (line)`
pub fn discard_field(source: Arc<dyn Source>, sink: Arc<dyn Sink>) -> BuildResult<FlowGraph> {
    let dag = DagBuilder::new()
        .stage(Stage::discard("discard", ["discardme"]), &[])
        .build();
    build_flow(
        dag,
        SourceBindings::new().bind("discard", source),
        SinkBindings::new().bind("out", "discard", sink),
    )
}

/// `(donotretainme, line) -> (line)`
pub fn retain_field(source: Arc<dyn Source>, sink: Arc<dyn Sink>) -> BuildResult<FlowGraph> {
    let dag = DagBuilder::new()
        .stage(Stage::retain("retain", ["line"]), &[])
        .build();
    build_flow(
        dag,
        SourceBindings::new().bind("retain", source),
        SinkBindings::new().bind("out", "retain", sink),
    )
}

/// `(renameme) -> (line)`
pub fn rename_field(source: Arc<dyn Source>, sink: Arc<dyn Sink>) -> BuildResult<FlowGraph> {
    let dag = DagBuilder::new()
        .stage(Stage::rename("rename", ["renameme"], ["line"]), &[])
        .build();
    build_flow(
        dag,
        SourceBindings::new().bind("rename", source),
        SinkBindings::new().bind("out", "rename", sink),
    )
}

/* =========================
   No lineales
   ========================= */

/// Partido de cada presidente: `(year, president)` y `(year, party)`
/// unidos por año -> `(president, party)`.
pub fn cogroup(
    presidents: Arc<dyn Source>,
    parties: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
) -> BuildResult<FlowGraph> {
    let dag = DagBuilder::new()
        .stage(Stage::pipe("president"), &[])
        .stage(Stage::pipe("party"), &[])
        .stage(
            Stage::co_group(
                "join",
                ["year"],
                ["year"],
                declared(["year1", "president", "year2", "party"]),
                JoinType::Inner,
            ),
            &["president", "party"],
        )
        .stage(Stage::retain("output", ["president", "party"]), &["join"])
        .build();
    build_flow(
        dag,
        SourceBindings::new()
            .bind("president", presidents)
            .bind("party", parties),
        SinkBindings::new().bind("out", "output", sink),
    )
}

pub const PARTIES: [&str; 3] = ["Gaullist", "Republican", "Socialist"];

/// Reparte `(president, party)` en un sink por partido. Un registro sin
/// partido conocido no llega a ningún sink.
pub fn split(
    source: Arc<dyn Source>,
    gaullist: Arc<dyn Sink>,
    republican: Arc<dyn Sink>,
    socialist: Arc<dyn Sink>,
) -> BuildResult<FlowGraph> {
    let mut dag = DagBuilder::new().stage(Stage::pipe("data"), &[]);
    for party in PARTIES {
        let name = party.to_lowercase();
        dag = dag.stage(
            Stage::filter(name, ["party"], move |args| {
                args.str(0).map_or(false, |p| p == party)
            }),
            &["data"],
        );
    }

    build_flow(
        dag.build(),
        SourceBindings::new().bind("data", source),
        SinkBindings::new()
            .bind("gaullist", "gaullist", gaullist)
            .bind("republican", "republican", republican)
            .bind("socialist", "socialist", socialist),
    )
}
