use std::collections::HashSet;

use crate::aggregate::{plan_aggregator, AggPlan};
use crate::error::{BuildError, BuildResult};
use crate::schema::{Field, Record, Schema, Value};
use crate::stage::{Direction, JoinType, MapFn, OutputSelector, Predicate, StageKind};

/// De dónde sale cada valor de la salida de un Map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Input(usize),
    Result(usize),
}

/// Stage resuelto: nombres convertidos a posiciones contra los
/// esquemas de entrada. Es lo que instancia el executor en cada run.
#[derive(Clone)]
pub(crate) enum Plan {
    Pass,
    Project {
        indices: Vec<usize>,
    },
    Map {
        arguments: Vec<usize>,
        declared: Schema,
        assemble: Vec<Slot>,
        func: MapFn,
    },
    Filter {
        arguments: Vec<usize>,
        predicate: Predicate,
    },
    Insert {
        value: Value,
    },
    Unique {
        key: Vec<usize>,
    },
    Group {
        key: Vec<usize>,
        aggregator: AggPlan,
    },
    CoGroup {
        keys: Vec<Vec<usize>>,
        /// `Some(ceros)` si la entrada es opcional para el tipo de join.
        fillers: Vec<Option<Record>>,
    },
    HashJoin {
        left_key: Vec<usize>,
        right_key: Vec<usize>,
    },
    Sort {
        keys: Vec<(usize, Direction)>,
    },
}

fn expect_inputs(inputs: &[&Schema], expected: usize) -> BuildResult<()> {
    if inputs.len() != expected {
        return Err(BuildError::arity("", "entradas", expected, inputs.len()));
    }
    Ok(())
}

fn expect_at_least(inputs: &[&Schema], min: usize) -> BuildResult<()> {
    if inputs.len() < min {
        return Err(BuildError::arity("", "entradas (mínimo)", min, inputs.len()));
    }
    Ok(())
}

/// Deriva el esquema de salida de un stage y su plan resuelto.
/// Los errores salen sin nombre de stage; el llamador lo completa.
pub(crate) fn plan_stage(kind: &StageKind, inputs: &[&Schema]) -> BuildResult<(Schema, Plan)> {
    match kind {
        StageKind::Pipe => {
            expect_inputs(inputs, 1)?;
            Ok((inputs[0].clone(), Plan::Pass))
        }

        StageKind::Discard { fields } => {
            expect_inputs(inputs, 1)?;
            let input = inputs[0];
            let drop = input.resolve(fields)?;
            let indices: Vec<usize> = (0..input.len()).filter(|i| !drop.contains(i)).collect();
            Ok((input.discard(fields)?, Plan::Project { indices }))
        }

        StageKind::Retain { fields } => {
            expect_inputs(inputs, 1)?;
            let input = inputs[0];
            let indices = input.resolve(fields)?;
            Ok((input.project(fields)?, Plan::Project { indices }))
        }

        StageKind::Rename { from, to } => {
            expect_inputs(inputs, 1)?;
            if from.len() != to.len() {
                return Err(BuildError::arity("", "nombres nuevos", from.len(), to.len()));
            }
            let mapping: Vec<(String, String)> =
                from.iter().cloned().zip(to.iter().cloned()).collect();
            Ok((inputs[0].rename(&mapping)?, Plan::Pass))
        }

        StageKind::Map {
            arguments,
            declared,
            output,
            func,
        } => {
            expect_inputs(inputs, 1)?;
            let input = inputs[0];
            let args = input.resolve(arguments)?;
            let (schema, assemble) = map_output(input, &args, declared, output)?;
            Ok((
                schema,
                Plan::Map {
                    arguments: args,
                    declared: declared.clone(),
                    assemble,
                    func: func.clone(),
                },
            ))
        }

        StageKind::Filter {
            arguments,
            predicate,
        } => {
            expect_inputs(inputs, 1)?;
            Ok((
                inputs[0].clone(),
                Plan::Filter {
                    arguments: inputs[0].resolve(arguments)?,
                    predicate: predicate.clone(),
                },
            ))
        }

        StageKind::Insert { field, value } => {
            expect_inputs(inputs, 1)?;
            if value.field_type() != field.field_type {
                return Err(BuildError::TypeMismatch {
                    stage: String::new(),
                    field: field.name.clone(),
                    expected: field.field_type.to_string(),
                    found: value.field_type(),
                });
            }
            let schema = inputs[0].join(&Schema::new(vec![field.clone()])?)?;
            Ok((
                schema,
                Plan::Insert {
                    value: value.clone(),
                },
            ))
        }

        StageKind::Unique { fields } => {
            expect_inputs(inputs, 1)?;
            Ok((
                inputs[0].clone(),
                Plan::Unique {
                    key: inputs[0].resolve(fields)?,
                },
            ))
        }

        StageKind::GroupAggregate { keys, aggregator } => {
            expect_inputs(inputs, 1)?;
            let input = inputs[0];
            let key = input.resolve(keys)?;
            let (agg_schema, agg) = plan_aggregator(aggregator, input, &key)?;
            let schema = input.select(&key).join(&agg_schema)?;
            Ok((
                schema,
                Plan::Group {
                    key,
                    aggregator: agg,
                },
            ))
        }

        StageKind::CoGroup {
            keys,
            declared,
            join,
        } => {
            expect_at_least(inputs, 2)?;
            if keys.len() != inputs.len() {
                return Err(BuildError::arity("", "listas de claves", inputs.len(), keys.len()));
            }
            let resolved = resolve_join_keys(inputs, keys)?;
            let schema = joined_schema(inputs, declared.as_deref())?;

            let last = inputs.len() - 1;
            let fillers = inputs
                .iter()
                .enumerate()
                .map(|(i, input)| {
                    let optional = match join {
                        JoinType::Inner => false,
                        JoinType::Left => i != 0,
                        JoinType::Right => i != last,
                        JoinType::Outer => true,
                    };
                    optional.then(|| zeros(input))
                })
                .collect();

            Ok((
                schema,
                Plan::CoGroup {
                    keys: resolved,
                    fillers,
                },
            ))
        }

        StageKind::HashJoin {
            left_keys,
            right_keys,
            declared,
        } => {
            expect_inputs(inputs, 2)?;
            let mut resolved =
                resolve_join_keys(inputs, &[left_keys.clone(), right_keys.clone()])?;
            let right_key = resolved.pop().unwrap_or_default();
            let left_key = resolved.pop().unwrap_or_default();
            let schema = joined_schema(inputs, declared.as_deref())?;
            Ok((
                schema,
                Plan::HashJoin {
                    left_key,
                    right_key,
                },
            ))
        }

        StageKind::Sort { keys } => {
            expect_inputs(inputs, 1)?;
            let input = inputs[0];
            let resolved = keys
                .iter()
                .map(|k| {
                    input
                        .index_of(&k.field)
                        .map(|i| (i, k.direction))
                        .ok_or_else(|| BuildError::field_not_found("", &k.field))
                })
                .collect::<BuildResult<Vec<_>>>()?;
            Ok((input.clone(), Plan::Sort { keys: resolved }))
        }

        StageKind::Merge => {
            expect_at_least(inputs, 2)?;
            for other in &inputs[1..] {
                inputs[0].ensure_same(other)?;
            }
            Ok((inputs[0].clone(), Plan::Pass))
        }
    }
}

/// Esquema de salida de un Map + de dónde sale cada campo.
fn map_output(
    input: &Schema,
    args: &[usize],
    declared: &Schema,
    output: &OutputSelector,
) -> BuildResult<(Schema, Vec<Slot>)> {
    match output {
        OutputSelector::Results => Ok((
            declared.clone(),
            (0..declared.len()).map(Slot::Result).collect(),
        )),

        OutputSelector::All => {
            let schema = input.join(declared)?;
            let slots = (0..input.len())
                .map(Slot::Input)
                .chain((0..declared.len()).map(Slot::Result))
                .collect();
            Ok((schema, slots))
        }

        OutputSelector::Replace => {
            if args.len() != declared.len() {
                return Err(BuildError::arity(
                    "",
                    "resultados para reemplazar argumentos",
                    args.len(),
                    declared.len(),
                ));
            }
            let mut fields = Vec::with_capacity(input.len());
            let mut slots = Vec::with_capacity(input.len());
            for (i, field) in input.fields().iter().enumerate() {
                match args.iter().position(|&a| a == i) {
                    Some(k) => {
                        fields.push(declared.fields()[k].clone());
                        slots.push(Slot::Result(k));
                    }
                    None => {
                        fields.push(field.clone());
                        slots.push(Slot::Input(i));
                    }
                }
            }
            Ok((Schema::new(fields)?, slots))
        }

        OutputSelector::Select(names) => {
            let mut fields: Vec<Field> = Vec::with_capacity(names.len());
            let mut slots = Vec::with_capacity(names.len());
            for name in names {
                if let Some(j) = declared.index_of(name) {
                    fields.push(declared.fields()[j].clone());
                    slots.push(Slot::Result(j));
                } else if let Some(i) = input.index_of(name) {
                    fields.push(input.fields()[i].clone());
                    slots.push(Slot::Input(i));
                } else {
                    return Err(BuildError::field_not_found("", name));
                }
            }
            Ok((Schema::new(fields)?, slots))
        }
    }
}

/// Resuelve las claves de cada entrada y exige misma aridad y tipos.
fn resolve_join_keys(inputs: &[&Schema], keys: &[Vec<String>]) -> BuildResult<Vec<Vec<usize>>> {
    let resolved = inputs
        .iter()
        .zip(keys)
        .map(|(input, k)| input.resolve(k))
        .collect::<BuildResult<Vec<_>>>()?;

    let first = &resolved[0];
    for (n, other) in resolved.iter().enumerate().skip(1) {
        if other.len() != first.len() {
            return Err(BuildError::arity("", "campos de clave", first.len(), other.len()));
        }
        for (k, (&a, &b)) in first.iter().zip(other).enumerate() {
            let expected = inputs[0].fields()[a].field_type;
            let found = inputs[n].fields()[b].field_type;
            if expected != found {
                return Err(BuildError::TypeMismatch {
                    stage: String::new(),
                    field: keys[n][k].clone(),
                    expected: expected.to_string(),
                    found,
                });
            }
        }
    }
    Ok(resolved)
}

/// Concatenación de entradas; con nombres declarados se reetiqueta por
/// posición, si no los nombres deben ser disjuntos.
fn joined_schema(inputs: &[&Schema], declared: Option<&[String]>) -> BuildResult<Schema> {
    let fields: Vec<Field> = inputs
        .iter()
        .flat_map(|s| s.fields().iter().cloned())
        .collect();

    match declared {
        Some(names) => {
            if names.len() != fields.len() {
                return Err(BuildError::arity("", "campos declarados", fields.len(), names.len()));
            }
            let mut seen = HashSet::new();
            let relabeled = fields
                .into_iter()
                .zip(names)
                .map(|(f, n)| {
                    if !seen.insert(n.as_str()) {
                        return Err(BuildError::duplicate_field("", n));
                    }
                    Ok(Field::new(n.clone(), f.field_type))
                })
                .collect::<BuildResult<Vec<_>>>()?;
            Schema::new(relabeled)
        }
        None => Schema::new(fields),
    }
}

fn zeros(schema: &Schema) -> Record {
    Record::new(schema.fields().iter().map(|f| f.field_type.zero()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::stage::{declared, Aggregator, SortKey, Stage};

    fn s(pairs: &[(&str, FieldType)]) -> Schema {
        Schema::of(pairs).unwrap()
    }

    fn plan(stage: Stage, inputs: &[&Schema]) -> BuildResult<Schema> {
        plan_stage(stage.kind(), inputs).map(|(schema, _)| schema)
    }

    fn lines() -> Schema {
        s(&[("discardme", FieldType::String), ("line", FieldType::String)])
    }

    #[test]
    fn discard_conserva_el_orden_de_los_demas() {
        let out = plan(Stage::discard("d", ["discardme"]), &[&lines()]).unwrap();
        assert_eq!(out.names(), vec!["line"]);
    }

    #[test]
    fn retain_usa_el_orden_pedido() {
        let input = s(&[
            ("a", FieldType::String),
            ("b", FieldType::Int64),
            ("c", FieldType::Boolean),
        ]);
        let out = plan(Stage::retain("r", ["c", "a"]), &[&input]).unwrap();
        assert_eq!(out.names(), vec!["c", "a"]);
    }

    #[test]
    fn campo_inexistente_falla_en_construccion() {
        let err = plan(Stage::discard("d", ["nope"]), &[&lines()]).unwrap_err();
        assert!(matches!(err, BuildError::FieldNotFound { field, .. } if field == "nope"));
    }

    #[test]
    fn rename_exige_listas_de_igual_largo() {
        let err = plan(Stage::rename("r", ["line"], ["a", "b"]), &[&lines()]).unwrap_err();
        assert!(matches!(err, BuildError::ArityMismatch { .. }));
    }

    #[test]
    fn map_select_mezcla_entrada_y_resultados() {
        let input = s(&[("id", FieldType::String), ("content", FieldType::String)]);
        let words = s(&[("word", FieldType::String)]);
        let stage = Stage::map(
            "tokenize",
            ["content"],
            words,
            OutputSelector::select(["id", "word"]),
            |_| Ok(vec![]),
        );
        let (schema, plan) = plan_stage(stage.kind(), &[&input]).unwrap();
        assert_eq!(schema.names(), vec!["id", "word"]);
        match plan {
            Plan::Map { assemble, arguments, .. } => {
                assert_eq!(arguments, vec![1]);
                assert_eq!(assemble, vec![Slot::Input(0), Slot::Result(0)]);
            }
            _ => panic!("se esperaba un plan de map"),
        }
    }

    #[test]
    fn map_replace_exige_misma_aridad() {
        let input = s(&[("a", FieldType::String), ("b", FieldType::String)]);
        let two = s(&[("x", FieldType::Int64), ("y", FieldType::Int64)]);
        let stage = Stage::map("m", ["a"], two, OutputSelector::Replace, |_| Ok(vec![]));
        assert!(matches!(
            plan(stage, &[&input]).unwrap_err(),
            BuildError::ArityMismatch { .. }
        ));

        let one = s(&[("n", FieldType::Int64)]);
        let stage = Stage::map("m", ["a"], one, OutputSelector::Replace, |_| Ok(vec![]));
        let out = plan(stage, &[&input]).unwrap();
        assert_eq!(out.names(), vec!["n", "b"]);
        assert_eq!(out.fields()[0].field_type, FieldType::Int64);
    }

    #[test]
    fn map_all_detecta_colisiones() {
        let input = s(&[("word", FieldType::String)]);
        let stage = Stage::map(
            "m",
            ["word"],
            s(&[("word", FieldType::String)]),
            OutputSelector::All,
            |_| Ok(vec![]),
        );
        assert!(matches!(
            plan(stage, &[&input]).unwrap_err(),
            BuildError::DuplicateField { .. }
        ));
    }

    #[test]
    fn group_aggregate_emite_claves_y_agregado() {
        let input = s(&[("word", FieldType::String), ("n", FieldType::Int64)]);
        let out = plan(
            Stage::group_aggregate("g", ["word"], Aggregator::count("count")),
            &[&input],
        )
        .unwrap();
        assert_eq!(out.names(), vec!["word", "count"]);
        assert_eq!(out.fields()[1].field_type, FieldType::Int64);
    }

    #[test]
    fn co_group_declara_nombres_por_posicion() {
        let presidents = s(&[("year", FieldType::String), ("president", FieldType::String)]);
        let parties = s(&[("year", FieldType::String), ("party", FieldType::String)]);
        let stage = Stage::co_group(
            "join",
            ["year"],
            ["year"],
            declared(["year1", "president", "year2", "party"]),
            JoinType::Inner,
        );
        let out = plan(stage, &[&presidents, &parties]).unwrap();
        assert_eq!(out.names(), vec!["year1", "president", "year2", "party"]);

        // sin declarar, "year" choca
        let stage = Stage::co_group("join", ["year"], ["year"], None, JoinType::Inner);
        assert!(matches!(
            plan(stage, &[&presidents, &parties]).unwrap_err(),
            BuildError::DuplicateField { .. }
        ));
    }

    #[test]
    fn co_group_valida_aridad_y_tipo_de_claves() {
        let left = s(&[("year", FieldType::String), ("x", FieldType::String)]);
        let right = s(&[("y", FieldType::Int64), ("z", FieldType::String)]);

        let stage = Stage::co_group("j", ["year", "x"], ["y"], None, JoinType::Inner);
        assert!(matches!(
            plan(stage, &[&left, &right]).unwrap_err(),
            BuildError::ArityMismatch { .. }
        ));

        let stage = Stage::co_group("j", ["year"], ["y"], None, JoinType::Inner);
        assert!(matches!(
            plan(stage, &[&left, &right]).unwrap_err(),
            BuildError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn co_group_left_rellena_solo_las_entradas_opcionales() {
        let a = s(&[("k", FieldType::String), ("n", FieldType::Int64)]);
        let b = s(&[("k2", FieldType::String), ("f", FieldType::Float64)]);
        let stage = Stage::co_group("j", ["k"], ["k2"], None, JoinType::Left);
        match plan_stage(stage.kind(), &[&a, &b]).unwrap().1 {
            Plan::CoGroup { fillers, .. } => {
                assert!(fillers[0].is_none());
                assert_eq!(fillers[1], Some(crate::record!["", 0.0]));
            }
            _ => panic!("se esperaba un plan de co-group"),
        }
    }

    #[test]
    fn merge_exige_esquemas_identicos() {
        let a = s(&[("x", FieldType::String)]);
        let b = s(&[("x", FieldType::Int64)]);
        assert!(plan(Stage::merge("m"), &[&a, &a]).is_ok());
        assert!(matches!(
            plan(Stage::merge("m"), &[&a, &b]).unwrap_err(),
            BuildError::TypeMismatch { .. }
        ));
        assert!(matches!(
            plan(Stage::merge("m"), &[&a]).unwrap_err(),
            BuildError::ArityMismatch { .. }
        ));
    }

    #[test]
    fn insert_y_sort_validan_campos() {
        let input = s(&[("word", FieldType::String)]);
        let out = plan(
            Stage::insert("i", Field::string("join_key"), "1"),
            &[&input],
        )
        .unwrap();
        assert_eq!(out.names(), vec!["word", "join_key"]);

        let err = plan(
            Stage::insert("i", Field::int64("n"), "no es int"),
            &[&input],
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));

        let err = plan(Stage::sort("s", vec![SortKey::desc("nope")]), &[&input]).unwrap_err();
        assert!(matches!(err, BuildError::FieldNotFound { .. }));
    }

    #[test]
    fn unario_con_dos_entradas_es_error_de_aridad() {
        let a = lines();
        let err = plan(Stage::retain("r", ["line"]), &[&a, &a]).unwrap_err();
        assert!(matches!(err, BuildError::ArityMismatch { expected: 1, found: 2, .. }));
    }
}
