use crate::stage::Stage;

/// Grafo de stages tal como lo declara el usuario.
/// Las aristas van (from, to); el orden de las aristas que llegan a un
/// stage define el orden de sus puertos de entrada.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    pub stages: Vec<Stage>,
    pub edges: Vec<(String, String)>, // (from, to)
}

impl Dag {
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name() == name)
    }

    /// Productores de `name`, en orden de puerto.
    pub fn upstream_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == name)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    pub fn downstream_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == name)
            .map(|(_, to)| to.as_str())
            .collect()
    }
}

/// Builder fluido para armar el `Dag`.
///
/// ```ignore
/// let dag = DagBuilder::new()
///     .stage(Stage::pipe("lines"), &[])
///     .stage(Stage::discard("discard", ["discardme"]), &["lines"])
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct DagBuilder {
    dag: Dag,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un stage conectado a sus productores (en orden de puerto).
    #[must_use]
    pub fn stage(mut self, stage: Stage, upstream: &[&str]) -> Self {
        let name = stage.name().to_string();
        self.dag.stages.push(stage);
        for from in upstream {
            self.dag.edges.push((from.to_string(), name.clone()));
        }
        self
    }

    /// Arista suelta; útil para grafos armados en varios pasos.
    #[must_use]
    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.dag.edges.push((from.to_string(), to.to_string()));
        self
    }

    pub fn build(self) -> Dag {
        self.dag
    }
}
