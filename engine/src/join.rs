use std::collections::{BTreeMap, HashMap};

use crate::error::ExecResult;
use crate::operator::{guard_buffer, Operator};
use crate::schema::Record;

/* =========================
   Co-group
   ========================= */

/// Agrupa N entradas por clave y emite, por clave en orden ascendente,
/// el producto cartesiano de las particiones (primera entrada más externa).
/// Las entradas opcionales sin registros aportan una fila de ceros.
pub(crate) struct CoGroupOp<'a> {
    stage: &'a str,
    keys: &'a [Vec<usize>],
    fillers: &'a [Option<Record>],
    buckets: BTreeMap<Record, Vec<Vec<Record>>>,
    held: usize,
    limit: usize,
}

impl<'a> CoGroupOp<'a> {
    pub(crate) fn new(
        stage: &'a str,
        keys: &'a [Vec<usize>],
        fillers: &'a [Option<Record>],
        limit: usize,
    ) -> Self {
        Self {
            stage,
            keys,
            fillers,
            buckets: BTreeMap::new(),
            held: 0,
            limit,
        }
    }
}

impl Operator for CoGroupOp<'_> {
    fn push(&mut self, port: usize, record: Record, _out: &mut Vec<Record>) -> ExecResult<()> {
        let key = record.project(&self.keys[port]);
        let inputs = self.keys.len();
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| vec![Vec::new(); inputs]);
        bucket[port].push(record);
        self.held += 1;
        guard_buffer(self.stage, self.held, self.limit)
    }

    fn finish(&mut self, out: &mut Vec<Record>) -> ExecResult<()> {
        'keys: for (_, mut sides) in std::mem::take(&mut self.buckets) {
            for (side, filler) in sides.iter_mut().zip(self.fillers) {
                if side.is_empty() {
                    match filler {
                        Some(zeros) => side.push(zeros.clone()),
                        // entrada obligatoria sin registros: la clave no sale
                        None => continue 'keys,
                    }
                }
            }
            cross_product(&sides, out);
        }
        self.held = 0;
        Ok(())
    }
}

/// Producto cartesiano tipo odómetro; la última lista gira más rápido.
fn cross_product(sides: &[Vec<Record>], out: &mut Vec<Record>) {
    let mut idx = vec![0usize; sides.len()];
    loop {
        out.push(Record::concat(
            sides.iter().zip(&idx).map(|(side, &i)| &side[i]),
        ));

        let mut pos = sides.len();
        loop {
            if pos == 0 {
                return;
            }
            pos -= 1;
            idx[pos] += 1;
            if idx[pos] < sides[pos].len() {
                break;
            }
            idx[pos] = 0;
        }
    }
}

/* =========================
   Hash join
   ========================= */

/// Inner join: indexa el lado derecho (puerto 1) por clave y recorre el
/// izquierdo (puerto 0) en streaming. Los registros izquierdos que llegan
/// antes de que cierre el derecho se retienen hasta entonces.
pub(crate) struct HashJoinOp<'a> {
    stage: &'a str,
    left_key: &'a [usize],
    right_key: &'a [usize],
    index: HashMap<Record, Vec<Record>>,
    pending: Vec<Record>,
    right_closed: bool,
    held: usize,
    limit: usize,
}

impl<'a> HashJoinOp<'a> {
    pub(crate) fn new(
        stage: &'a str,
        left_key: &'a [usize],
        right_key: &'a [usize],
        limit: usize,
    ) -> Self {
        Self {
            stage,
            left_key,
            right_key,
            index: HashMap::new(),
            pending: Vec::new(),
            right_closed: false,
            held: 0,
            limit,
        }
    }

    fn probe(&self, left: &Record, out: &mut Vec<Record>) {
        if let Some(matches) = self.index.get(&left.project(self.left_key)) {
            for right in matches {
                out.push(Record::concat([left, right]));
            }
        }
    }
}

impl Operator for HashJoinOp<'_> {
    fn push(&mut self, port: usize, record: Record, out: &mut Vec<Record>) -> ExecResult<()> {
        if port == 1 {
            let key = record.project(self.right_key);
            self.index.entry(key).or_default().push(record);
            self.held += 1;
            return guard_buffer(self.stage, self.held, self.limit);
        }

        if self.right_closed {
            self.probe(&record, out);
            Ok(())
        } else {
            self.pending.push(record);
            self.held += 1;
            guard_buffer(self.stage, self.held, self.limit)
        }
    }

    fn close_port(&mut self, port: usize, out: &mut Vec<Record>) -> ExecResult<()> {
        if port == 1 {
            self.right_closed = true;
            let pending = std::mem::take(&mut self.pending);
            self.held -= pending.len();
            for left in &pending {
                self.probe(left, out);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{plan_stage, Plan};
    use crate::record;
    use crate::schema::{FieldType, Schema};
    use crate::stage::{declared, JoinType, Stage};
    use proptest::prelude::*;

    fn presidents() -> Schema {
        Schema::of(&[("year", FieldType::String), ("president", FieldType::String)]).unwrap()
    }

    fn parties() -> Schema {
        Schema::of(&[("year", FieldType::String), ("party", FieldType::String)]).unwrap()
    }

    fn co_group(join: JoinType, left: Vec<Record>, right: Vec<Record>) -> Vec<Record> {
        let stage = Stage::co_group(
            "join",
            ["year"],
            ["year"],
            declared(["year1", "president", "year2", "party"]),
            join,
        );
        let (_, plan) = plan_stage(stage.kind(), &[&presidents(), &parties()]).unwrap();
        let Plan::CoGroup { keys, fillers } = &plan else {
            panic!("se esperaba un plan de co-group");
        };
        let mut op = CoGroupOp::new("join", keys, fillers, 1_000);
        let mut out = Vec::new();
        for r in left {
            op.push(0, r, &mut out).unwrap();
        }
        for r in right {
            op.push(1, r, &mut out).unwrap();
        }
        op.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn co_group_inner_emite_m_por_n_por_clave() {
        let left = vec![
            record!["1959", "De Gaulle"],
            record!["1959", "De Gaulle bis"],
            record!["1981", "Mitterrand"],
        ];
        let right = vec![
            record!["1959", "Gaullist"],
            record!["1959", "UNR"],
            record!["1959", "RPF"],
            record!["2000", "nadie"],
        ];
        let out = co_group(JoinType::Inner, left, right);

        // 2 x 3 para 1959; 1981 y 2000 no tienen pareja
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], record!["1959", "De Gaulle", "1959", "Gaullist"]);
        assert_eq!(out[1], record!["1959", "De Gaulle", "1959", "UNR"]);
        assert_eq!(out[5], record!["1959", "De Gaulle bis", "1959", "RPF"]);
    }

    #[test]
    fn co_group_outer_rellena_con_ceros() {
        let left = vec![record!["1981", "Mitterrand"]];
        let right = vec![record!["2000", "nadie"]];
        let out = co_group(JoinType::Outer, left, right);
        assert_eq!(
            out,
            vec![
                record!["1981", "Mitterrand", "", ""],
                record!["", "", "2000", "nadie"],
            ]
        );
    }

    #[test]
    fn co_group_left_y_right() {
        let left = vec![record!["1981", "Mitterrand"], record!["1959", "De Gaulle"]];
        let right = vec![record!["1959", "Gaullist"], record!["2000", "nadie"]];

        let out = co_group(JoinType::Left, left.clone(), right.clone());
        assert_eq!(
            out,
            vec![
                record!["1959", "De Gaulle", "1959", "Gaullist"],
                record!["1981", "Mitterrand", "", ""],
            ]
        );

        let out = co_group(JoinType::Right, left, right);
        assert_eq!(
            out,
            vec![
                record!["1959", "De Gaulle", "1959", "Gaullist"],
                record!["", "", "2000", "nadie"],
            ]
        );
    }

    #[test]
    fn co_group_de_tres_entradas_multiplica_las_particiones() {
        let a = Schema::of(&[("ka", FieldType::String), ("x", FieldType::Int64)]).unwrap();
        let b = Schema::of(&[("kb", FieldType::String), ("y", FieldType::Int64)]).unwrap();
        let c = Schema::of(&[("kc", FieldType::String), ("z", FieldType::Int64)]).unwrap();
        let stage = Stage::co_group_n(
            "tres",
            vec![vec!["ka".into()], vec!["kb".into()], vec!["kc".into()]],
            None,
            JoinType::Inner,
        );
        let (schema, plan) = plan_stage(stage.kind(), &[&a, &b, &c]).unwrap();
        assert_eq!(schema.names(), vec!["ka", "x", "kb", "y", "kc", "z"]);
        let Plan::CoGroup { keys, fillers } = &plan else {
            panic!("se esperaba un plan de co-group");
        };

        let mut op = CoGroupOp::new("tres", keys, fillers, 1_000);
        let mut out = Vec::new();
        for (port, rows) in [
            vec![record!["k", 1_i64], record!["k", 2_i64], record!["a", 0_i64], record!["m", 9_i64]],
            vec![
                record!["k", 10_i64],
                record!["k", 20_i64],
                record!["k", 30_i64],
                record!["a", 0_i64],
                record!["m", 9_i64],
            ],
            vec![record!["k", 100_i64], record!["k", 200_i64], record!["a", 0_i64]],
        ]
        .into_iter()
        .enumerate()
        {
            for r in rows {
                op.push(port, r, &mut out).unwrap();
            }
        }
        op.finish(&mut out).unwrap();

        // "a": 1*1*1 primero; "k": 2*3*2; "m" falta en la tercera entrada
        assert_eq!(out.len(), 1 + 12);
        assert_eq!(out[0], record!["a", 0_i64, "a", 0_i64, "a", 0_i64]);
        assert!(out[1..].iter().all(|r| r.str(0).unwrap() == "k"));
        assert_eq!(out[1], record!["k", 1_i64, "k", 10_i64, "k", 100_i64]);
        assert_eq!(out[2], record!["k", 1_i64, "k", 10_i64, "k", 200_i64]);
        assert_eq!(out[12], record!["k", 2_i64, "k", 30_i64, "k", 200_i64]);
        assert!(!out.iter().any(|r| r.str(0).unwrap() == "m"));
    }

    #[test]
    fn hash_join_retiene_el_lado_izquierdo_hasta_que_cierra_el_derecho() {
        let mut op = HashJoinOp::new("hj", &[0], &[0], 1_000);
        let mut out = Vec::new();

        op.push(0, record!["k", 1_i64], &mut out).unwrap();
        op.push(1, record!["k", 10_i64], &mut out).unwrap();
        op.push(1, record!["k", 20_i64], &mut out).unwrap();
        assert!(out.is_empty());

        op.close_port(1, &mut out).unwrap();
        assert_eq!(
            out,
            vec![record!["k", 1_i64, "k", 10_i64], record!["k", 1_i64, "k", 20_i64]]
        );

        // con el derecho cerrado, el izquierdo fluye en streaming
        op.push(0, record!["k", 2_i64], &mut out).unwrap();
        op.push(0, record!["x", 3_i64], &mut out).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[3], record!["k", 2_i64, "k", 20_i64]);
    }

    #[test]
    fn hash_join_respeta_el_limite_del_lado_derecho() {
        let mut op = HashJoinOp::new("hj", &[0], &[0], 2);
        let mut out = Vec::new();
        op.push(1, record!["a"], &mut out).unwrap();
        op.push(1, record!["b"], &mut out).unwrap();
        assert!(op.push(1, record!["c"], &mut out).is_err());
    }

    /// Corre un join de dos entradas: derecha completa, después izquierda.
    fn join_both(stage: Stage, left: &[Record], right: &[Record]) -> Vec<Record> {
        let l = Schema::of(&[("lk", FieldType::String), ("lv", FieldType::Int64)]).unwrap();
        let r = Schema::of(&[("rk", FieldType::String), ("rv", FieldType::Int64)]).unwrap();
        let (_, plan) = plan_stage(stage.kind(), &[&l, &r]).unwrap();
        let mut op: Box<dyn Operator + '_> = match &plan {
            Plan::CoGroup { keys, fillers } => Box::new(CoGroupOp::new("j", keys, fillers, 1_000)),
            Plan::HashJoin {
                left_key,
                right_key,
            } => Box::new(HashJoinOp::new("j", left_key, right_key, 1_000)),
            _ => panic!("se esperaba un plan de join"),
        };
        let mut out = Vec::new();
        for rec in right {
            op.push(1, rec.clone(), &mut out).unwrap();
        }
        op.close_port(1, &mut out).unwrap();
        for rec in left {
            op.push(0, rec.clone(), &mut out).unwrap();
        }
        op.close_port(0, &mut out).unwrap();
        op.finish(&mut out).unwrap();
        out.sort();
        out
    }

    fn side() -> impl Strategy<Value = Vec<Record>> {
        prop::collection::vec(("[abc]", 0i64..4), 0..8)
            .prop_map(|rows| rows.into_iter().map(|(k, v)| record![k, v]).collect())
    }

    proptest! {
        // Mismos registros (con claves repetidas a ambos lados) y mismo
        // orden de campos que el co-group interno equivalente.
        #[test]
        fn hash_join_equivale_al_co_group_interno(left in side(), right in side()) {
            let hashed = join_both(Stage::hash_join("j", ["lk"], ["rk"], None), &left, &right);
            let grouped = join_both(
                Stage::co_group("j", ["lk"], ["rk"], None, JoinType::Inner),
                &left,
                &right,
            );
            prop_assert_eq!(hashed, grouped);
        }
    }
}
