use crate::error::{BuildError, BuildResult, ExecResult, ExecutionError};
use crate::schema::{Field, FieldType, Record, Schema, Value};
use crate::stage::{Aggregator, ReduceFn};

/// Agregador resuelto contra el esquema de entrada.
#[derive(Clone)]
pub(crate) enum AggPlan {
    Count,
    Sum {
        idx: usize,
        field: String,
        field_type: FieldType,
    },
    Max {
        idx: usize,
    },
    First {
        indices: Vec<usize>,
    },
    Custom {
        arguments: Vec<usize>,
        declared: Schema,
        reduce: ReduceFn,
    },
}

/// Resuelve un agregador; devuelve el esquema de sus campos de salida
/// (sin las claves) y el plan.
pub(crate) fn plan_aggregator(
    aggregator: &Aggregator,
    input: &Schema,
    keys: &[usize],
) -> BuildResult<(Schema, AggPlan)> {
    match aggregator {
        Aggregator::Count { output } => Ok((Schema::new(vec![Field::int64(output)])?, AggPlan::Count)),

        Aggregator::Sum { field, output } => {
            let idx = resolve_one(input, field)?;
            let field_type = input.fields()[idx].field_type;
            if !field_type.is_numeric() {
                return Err(BuildError::TypeMismatch {
                    stage: String::new(),
                    field: field.clone(),
                    expected: "int64 | float64".to_string(),
                    found: field_type,
                });
            }
            Ok((
                Schema::new(vec![Field::new(output, field_type)])?,
                AggPlan::Sum {
                    idx,
                    field: field.clone(),
                    field_type,
                },
            ))
        }

        Aggregator::MaxValue { field, output } => {
            let idx = resolve_one(input, field)?;
            let field_type = input.fields()[idx].field_type;
            Ok((
                Schema::new(vec![Field::new(output, field_type)])?,
                AggPlan::Max { idx },
            ))
        }

        Aggregator::First { fields } => {
            // sin campos: todos los que no son clave
            let indices = if fields.is_empty() {
                (0..input.len()).filter(|i| !keys.contains(i)).collect()
            } else {
                input.resolve(fields)?
            };
            Ok((input.select(&indices), AggPlan::First { indices }))
        }

        Aggregator::Custom {
            arguments,
            declared,
            reduce,
        } => Ok((
            declared.clone(),
            AggPlan::Custom {
                arguments: input.resolve(arguments)?,
                declared: declared.clone(),
                reduce: reduce.clone(),
            },
        )),
    }
}

fn resolve_one(input: &Schema, field: &str) -> BuildResult<usize> {
    input
        .index_of(field)
        .ok_or_else(|| BuildError::field_not_found("", field))
}

/* =========================
   Acumuladores
   ========================= */

/// Estado de una partición. Cada run crea estados nuevos.
pub(crate) enum Acc {
    Count(i64),
    SumInt(i64),
    SumFloat(f64),
    Max(Option<Value>),
    First(Option<Record>),
    Custom(Vec<Record>),
}

impl AggPlan {
    pub(crate) fn start(&self) -> Acc {
        match self {
            AggPlan::Count => Acc::Count(0),
            AggPlan::Sum {
                field_type: FieldType::Int64,
                ..
            } => Acc::SumInt(0),
            AggPlan::Sum { .. } => Acc::SumFloat(0.0),
            AggPlan::Max { .. } => Acc::Max(None),
            AggPlan::First { .. } => Acc::First(None),
            AggPlan::Custom { .. } => Acc::Custom(Vec::new()),
        }
    }

    /// Si el acumulador retiene registros (cuentan para el límite de memoria).
    pub(crate) fn retains_records(&self) -> bool {
        matches!(self, AggPlan::Custom { .. })
    }
}

impl Acc {
    pub(crate) fn add(&mut self, plan: &AggPlan, record: &Record) -> ExecResult<()> {
        match (self, plan) {
            (Acc::Count(n), _) => *n += 1,

            (Acc::SumInt(total), AggPlan::Sum { idx, field, .. }) => {
                let v = record.int(*idx)?;
                *total = total
                    .checked_add(v)
                    .ok_or_else(|| ExecutionError::ArithmeticOverflow {
                        stage: String::new(),
                        field: field.clone(),
                    })?;
            }
            (Acc::SumFloat(total), AggPlan::Sum { idx, .. }) => *total += record.float(*idx)?,

            (Acc::Max(best), AggPlan::Max { idx }) => {
                let v = record.value(*idx)?;
                // estricto: en empate se queda el primero
                if best.as_ref().map_or(true, |b| v > b) {
                    *best = Some(v.clone());
                }
            }

            (Acc::First(first), AggPlan::First { indices }) => {
                if first.is_none() {
                    *first = Some(record.project(indices));
                }
            }

            (Acc::Custom(rows), AggPlan::Custom { arguments, .. }) => {
                rows.push(record.project(arguments));
            }

            _ => unreachable!("acumulador y plan desalineados"),
        }
        Ok(())
    }

    pub(crate) fn finish(self, plan: &AggPlan) -> ExecResult<Record> {
        match self {
            Acc::Count(n) => Ok(Record::new(vec![Value::Int64(n)])),
            Acc::SumInt(total) => Ok(Record::new(vec![Value::Int64(total)])),
            Acc::SumFloat(total) => Ok(Record::new(vec![Value::Float64(total)])),
            Acc::Max(best) => Ok(Record::new(best.into_iter().collect())),
            Acc::First(first) => Ok(first.unwrap_or_default()),
            Acc::Custom(rows) => match plan {
                AggPlan::Custom {
                    declared, reduce, ..
                } => {
                    let out = reduce(&rows)?;
                    declared.check(&out)?;
                    Ok(out)
                }
                _ => unreachable!("acumulador y plan desalineados"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use proptest::prelude::*;

    fn input() -> Schema {
        Schema::of(&[
            ("word", FieldType::String),
            ("n", FieldType::Int64),
            ("w", FieldType::Float64),
        ])
        .unwrap()
    }

    fn run(plan: &AggPlan, rows: &[Record]) -> ExecResult<Record> {
        let mut acc = plan.start();
        for r in rows {
            acc.add(plan, r)?;
        }
        acc.finish(plan)
    }

    #[test]
    fn count_cuenta_la_particion() {
        let (schema, plan) = plan_aggregator(&Aggregator::count("count"), &input(), &[0]).unwrap();
        assert_eq!(schema.names(), vec!["count"]);
        let rows = vec![record!["a", 1_i64, 0.5], record!["a", 2_i64, 0.5]];
        assert_eq!(run(&plan, &rows).unwrap(), record![2_i64]);
    }

    #[test]
    fn sum_conserva_el_tipo_y_rechaza_strings() {
        let (schema, plan) = plan_aggregator(&Aggregator::sum("w", "total"), &input(), &[]).unwrap();
        assert_eq!(schema.fields()[0].field_type, FieldType::Float64);
        let rows = vec![record!["a", 1_i64, 0.5], record!["b", 2_i64, 0.25]];
        assert_eq!(run(&plan, &rows).unwrap(), record![0.75]);

        let err = plan_aggregator(&Aggregator::sum("word", "total"), &input(), &[]).err();
        assert!(matches!(err, Some(BuildError::TypeMismatch { field, .. }) if field == "word"));
    }

    #[test]
    fn sum_entera_detecta_desbordamiento() {
        let (_, plan) = plan_aggregator(&Aggregator::sum("n", "total"), &input(), &[]).unwrap();
        let rows = vec![record!["a", i64::MAX, 0.0], record!["a", 1_i64, 0.0]];
        let err = run(&plan, &rows).unwrap_err();
        assert!(matches!(err, ExecutionError::ArithmeticOverflow { field, .. } if field == "n"));
    }

    #[test]
    fn max_value_se_queda_con_el_primero_en_empate() {
        let (_, plan) = plan_aggregator(&Aggregator::max_value("n", "max"), &input(), &[]).unwrap();
        let rows = vec![
            record!["a", 3_i64, 0.0],
            record!["b", 7_i64, 0.0],
            record!["c", 7_i64, 0.0],
        ];
        assert_eq!(run(&plan, &rows).unwrap(), record![7_i64]);
    }

    #[test]
    fn first_sin_campos_toma_los_que_no_son_clave() {
        let (schema, plan) = plan_aggregator(&Aggregator::first(Vec::<String>::new()), &input(), &[0]).unwrap();
        assert_eq!(schema.names(), vec!["n", "w"]);
        let rows = vec![record!["a", 1_i64, 0.5], record!["a", 2_i64, 0.7]];
        assert_eq!(run(&plan, &rows).unwrap(), record![1_i64, 0.5]);
    }

    #[test]
    fn custom_valida_el_esquema_declarado() {
        let declared = Schema::of(&[("joined", FieldType::String)]).unwrap();
        let agg = Aggregator::custom(["word"], declared, |rows: &[Record]| {
            let words: Vec<String> = rows.iter().map(|r| r.values()[0].to_string()).collect();
            Ok(Record::new(vec![Value::from(words.join("+"))]))
        });
        let (_, plan) = plan_aggregator(&agg, &input(), &[]).unwrap();
        let rows = vec![record!["a", 1_i64, 0.0], record!["b", 1_i64, 0.0]];
        assert_eq!(run(&plan, &rows).unwrap(), record!["a+b"]);

        let bad = Aggregator::custom(["word"], Schema::of(&[("x", FieldType::Int64)]).unwrap(), |_: &[Record]| {
            Ok(record!["no es int"])
        });
        let (_, plan) = plan_aggregator(&bad, &input(), &[]).unwrap();
        assert!(matches!(
            run(&plan, &rows).unwrap_err(),
            ExecutionError::TypeMismatch { .. }
        ));
    }

    proptest! {
        // La suma entera no depende del orden de llegada.
        #[test]
        fn sum_entera_es_independiente_del_orden(
            values in prop::collection::vec(-1_000_000i64..1_000_000, 0..50),
            seed in any::<u64>(),
        ) {
            let (_, plan) = plan_aggregator(&Aggregator::sum("n", "total"), &input(), &[]).unwrap();
            let rows: Vec<Record> = values.iter().map(|v| record!["x", *v, 0.0]).collect();

            let mut shuffled = rows.clone();
            // rotación + inversión determinista a partir de la semilla
            if !shuffled.is_empty() {
                let k = (seed as usize) % shuffled.len();
                shuffled.rotate_left(k);
            }
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            prop_assert_eq!(run(&plan, &rows).unwrap(), run(&plan, &shuffled).unwrap());
        }
    }
}
