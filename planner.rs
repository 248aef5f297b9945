//! C5: query planning glue between the AST and a virtual table's
//! `best_index` (spec §4.5). Splits a WHERE clause into top-level
//! conjuncts, resolves which ones reference a given table's columns,
//! decides which side of a binary predicate is "the value", and tracks
//! which WHERE clauses a module fully handles so the VDBE can skip
//! re-evaluating them (handled-node / omit bookkeeping).
//!
//! Grounded on the teacher's vtab constraint-forwarding loop in
//! `translate/main_loop.rs`: literal-vs-vtab-column predicates are always
//! usable, predicates against an already-positioned outer table are
//! usable, and predicates against a not-yet-positioned table are still
//! forwarded with `usable = false`.

use std::collections::HashSet;

use crate::ast::{BinaryOp, Expr, OrderingTerm, SortOrder, UnaryOp};
use crate::schema::Column;
use crate::value::Value;
use crate::vtab::{ColumnRef, ConstraintInfo, ConstraintOp, IndexInfo, OrderByInfo, VTable};

/// One WHERE conjunct that was successfully translated into a
/// `ConstraintInfo`, paired with the expression that produces its value.
#[derive(Debug, Clone)]
pub struct ExtractedConstraint {
    /// Index into the `conjuncts` slice this constraint came from, used to
    /// mark the original WHERE clause as omittable.
    pub conjunct_index: usize,
    pub constraint: ConstraintInfo,
    pub value_expr: Expr,
}

/// The planning decision for one table in the FROM list: the module's
/// `IndexInfo`, the register-ready filter arguments in argv order, and
/// the set of WHERE conjuncts it can skip re-checking.
#[derive(Debug, Clone)]
pub struct VtabPlan {
    pub index_info: IndexInfo,
    /// `(1-based argv index, value expression)`, sorted by argv index.
    pub filter_args: Vec<(usize, Expr)>,
    pub omit_conjuncts: HashSet<usize>,
}

/// Flattens top-level `AND` into its conjuncts; non-`AND` nodes are a
/// single-element result. `OR` and everything else is left whole and must
/// be evaluated as WHERE residue.
pub fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary(lhs, BinaryOp::And, rhs) => {
            let mut out = split_conjuncts(lhs);
            out.extend(split_conjuncts(rhs));
            out
        }
        other => vec![other],
    }
}

fn binary_to_constraint_op(op: BinaryOp) -> Option<ConstraintOp> {
    match op {
        BinaryOp::Eq => Some(ConstraintOp::Eq),
        BinaryOp::Lt => Some(ConstraintOp::Lt),
        BinaryOp::Le => Some(ConstraintOp::Le),
        BinaryOp::Gt => Some(ConstraintOp::Gt),
        BinaryOp::Ge => Some(ConstraintOp::Ge),
        _ => None,
    }
}

/// `lit < col` becomes `col > lit`, and so on; `Eq` is its own flip.
fn flip_op(op: ConstraintOp) -> ConstraintOp {
    match op {
        ConstraintOp::Lt => ConstraintOp::Gt,
        ConstraintOp::Le => ConstraintOp::Ge,
        ConstraintOp::Gt => ConstraintOp::Lt,
        ConstraintOp::Ge => ConstraintOp::Le,
        other => other,
    }
}

fn resolve_target_column(
    e: &Expr,
    target_alias: Option<&str>,
    target_columns: &[Column],
) -> Option<usize> {
    let Expr::Column { table, name } = e else {
        return None;
    };
    if let Some(t) = table {
        if Some(t.as_str()) != target_alias {
            return None;
        }
    }
    target_columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(name))
}

/// Whether the non-column side of a predicate can be evaluated at the
/// point this table is opened: literals always can; a column from a table
/// already positioned earlier in join order can; a column from a
/// not-yet-positioned table cannot (but the constraint is still forwarded,
/// per the module's call to decide).
fn other_side_usable(e: &Expr, positioned_aliases: &HashSet<String>) -> bool {
    match e {
        Expr::Literal(_) | Expr::Parameter(_) => true,
        Expr::Column { table: Some(t), .. } => positioned_aliases.contains(t),
        Expr::Column { table: None, .. } => true,
        _ => false,
    }
}

/// Extracts pushdown-able constraints against `target_columns` from a
/// flattened conjunct list: column-vs-literal/parameter comparisons,
/// `IS [NOT] NULL`, and `BETWEEN` (decomposed into a `>=` and a `<=`
/// constraint on the same column). Cross-table join predicates
/// (`col = other_table.col`) are included too, carrying whichever
/// usability `other_side_usable` computes.
pub fn extract_constraints(
    conjuncts: &[&Expr],
    target_alias: Option<&str>,
    target_columns: &[Column],
    positioned_aliases: &HashSet<String>,
) -> Vec<ExtractedConstraint> {
    let mut out = Vec::new();
    for (conjunct_index, expr) in conjuncts.iter().enumerate() {
        match expr {
            Expr::Binary(lhs, op, rhs) => {
                let Some(cop) = binary_to_constraint_op(*op) else {
                    continue;
                };
                if let Some(col_idx) = resolve_target_column(lhs, target_alias, target_columns) {
                    out.push(ExtractedConstraint {
                        conjunct_index,
                        constraint: ConstraintInfo {
                            column_index: ColumnRef::Column(col_idx),
                            op: cop,
                            usable: other_side_usable(rhs, positioned_aliases),
                        },
                        value_expr: (**rhs).clone(),
                    });
                } else if let Some(col_idx) =
                    resolve_target_column(rhs, target_alias, target_columns)
                {
                    out.push(ExtractedConstraint {
                        conjunct_index,
                        constraint: ConstraintInfo {
                            column_index: ColumnRef::Column(col_idx),
                            op: flip_op(cop),
                            usable: other_side_usable(lhs, positioned_aliases),
                        },
                        value_expr: (**lhs).clone(),
                    });
                }
            }
            Expr::Between {
                expr: col_expr,
                lo,
                hi,
                negated: false,
            } => {
                if let Some(col_idx) = resolve_target_column(col_expr, target_alias, target_columns)
                {
                    out.push(ExtractedConstraint {
                        conjunct_index,
                        constraint: ConstraintInfo {
                            column_index: ColumnRef::Column(col_idx),
                            op: ConstraintOp::Ge,
                            usable: other_side_usable(lo, positioned_aliases),
                        },
                        value_expr: (**lo).clone(),
                    });
                    out.push(ExtractedConstraint {
                        conjunct_index,
                        constraint: ConstraintInfo {
                            column_index: ColumnRef::Column(col_idx),
                            op: ConstraintOp::Le,
                            usable: other_side_usable(hi, positioned_aliases),
                        },
                        value_expr: (**hi).clone(),
                    });
                }
            }
            Expr::Unary(UnaryOp::IsNull, inner) => {
                if let Some(col_idx) = resolve_target_column(inner, target_alias, target_columns) {
                    out.push(ExtractedConstraint {
                        conjunct_index,
                        constraint: ConstraintInfo {
                            column_index: ColumnRef::Column(col_idx),
                            op: ConstraintOp::IsNull,
                            usable: true,
                        },
                        value_expr: Expr::Literal(Value::Null),
                    });
                }
            }
            Expr::Unary(UnaryOp::NotNull, inner) => {
                if let Some(col_idx) = resolve_target_column(inner, target_alias, target_columns) {
                    out.push(ExtractedConstraint {
                        conjunct_index,
                        constraint: ConstraintInfo {
                            column_index: ColumnRef::Column(col_idx),
                            op: ConstraintOp::IsNotNull,
                            usable: true,
                        },
                        value_expr: Expr::Literal(Value::Null),
                    });
                }
            }
            _ => {}
        }
    }
    out
}

/// A column-vs-literal-list `IN (...)` predicate, broken out for the
/// translate layer to drive as a repeated point lookup (one `filter()`
/// call per value) instead of a single pushed-down constraint. Returns
/// `None` if the list contains anything but literals, or the column isn't
/// one of `target_columns`.
pub fn in_list_candidates(
    expr: &Expr,
    target_alias: Option<&str>,
    target_columns: &[Column],
) -> Option<(usize, Vec<Value>)> {
    let Expr::InList {
        expr: col_expr,
        list,
        negated: false,
    } = expr
    else {
        return None;
    };
    let col_idx = resolve_target_column(col_expr, target_alias, target_columns)?;
    let mut values = Vec::with_capacity(list.len());
    for item in list {
        let Expr::Literal(v) = item else {
            return None;
        };
        values.push(v.clone());
    }
    Some((col_idx, values))
}

/// ORDER BY consumption analysis: returns the `OrderByInfo` sequence to
/// offer `best_index` only if every term resolves to one of
/// `target_columns` (a single-table query, or the outermost table of a
/// join whose ORDER BY never references a joined table). Otherwise
/// returns an empty vec, signalling the caller must sort explicitly.
pub fn order_by_for_table(
    order_by: &[OrderingTerm],
    target_alias: Option<&str>,
    target_columns: &[Column],
) -> Vec<OrderByInfo> {
    let mut out = Vec::with_capacity(order_by.len());
    for term in order_by {
        let Some(col_idx) = resolve_target_column(&term.expr, target_alias, target_columns) else {
            return Vec::new();
        };
        out.push(OrderByInfo {
            column_index: col_idx,
            desc: term.order == SortOrder::Desc,
        });
    }
    out
}

/// The 64-bit column usage mask (spec §4.5): bit `i` for column `i`,
/// columns beyond 62 collapsing onto bit 62, bit 63 reserved for rowid.
pub fn column_usage_mask(refs: impl Iterator<Item = ColumnRef>) -> u64 {
    let mut mask = 0u64;
    for r in refs {
        match r {
            ColumnRef::Rowid => mask |= 1 << 63,
            ColumnRef::Column(i) if i < 63 => mask |= 1 << i,
            ColumnRef::Column(_) => mask |= 1 << 62,
        }
    }
    mask
}

/// Runs the full pipeline for one table: extract constraints, ask the
/// module for its plan, and translate `constraint_usages` back into
/// register-ready filter arguments plus the WHERE-omit set.
pub fn plan_scan(
    vtable: &dyn VTable,
    conjuncts: &[&Expr],
    target_alias: Option<&str>,
    target_columns: &[Column],
    positioned_aliases: &HashSet<String>,
    order_by: &[OrderingTerm],
) -> VtabPlan {
    let extracted = extract_constraints(conjuncts, target_alias, target_columns, positioned_aliases);
    let constraint_infos: Vec<ConstraintInfo> = extracted.iter().map(|e| e.constraint).collect();
    let ob = order_by_for_table(order_by, target_alias, target_columns);
    let index_info = vtable.best_index(&constraint_infos, &ob);

    let mut filter_args = Vec::new();
    let mut omit_conjuncts = HashSet::new();
    for (i, usage) in index_info.constraint_usages.iter().enumerate() {
        let Some(argv_index) = usage.argv_index else {
            continue;
        };
        let Some(ext) = extracted.get(i) else { continue };
        filter_args.push((argv_index, ext.value_expr.clone()));
        if ext.constraint.usable && usage.omit {
            omit_conjuncts.insert(ext.conjunct_index);
        }
    }
    filter_args.sort_by_key(|(argv_index, _)| *argv_index);

    VtabPlan {
        index_info,
        filter_args,
        omit_conjuncts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Affinity;

    fn columns() -> Vec<Column> {
        vec![
            Column {
                name: "id".into(),
                affinity: Affinity::Integer,
                not_null: false,
                hidden: false,
            },
            Column {
                name: "name".into(),
                affinity: Affinity::Text,
                not_null: false,
                hidden: false,
            },
        ]
    }

    fn col(name: &str) -> Expr {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    fn lit_int(v: i64) -> Expr {
        Expr::Literal(Value::Integer(v))
    }

    #[test]
    fn split_conjuncts_flattens_and_chain() {
        let expr = Expr::Binary(
            Box::new(Expr::Binary(
                Box::new(col("id")),
                BinaryOp::Eq,
                Box::new(lit_int(1)),
            )),
            BinaryOp::And,
            Box::new(Expr::Binary(
                Box::new(col("name")),
                BinaryOp::Eq,
                Box::new(Expr::Literal(Value::Text("x".into()))),
            )),
        );
        assert_eq!(split_conjuncts(&expr).len(), 2);
    }

    #[test]
    fn literal_rhs_constraint_is_usable() {
        let expr = Expr::Binary(Box::new(col("id")), BinaryOp::Ge, Box::new(lit_int(5)));
        let conjuncts = vec![&expr];
        let cols = columns();
        let out = extract_constraints(&conjuncts, None, &cols, &HashSet::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].constraint.column_index, ColumnRef::Column(0));
        assert_eq!(out[0].constraint.op, ConstraintOp::Ge);
        assert!(out[0].constraint.usable);
    }

    #[test]
    fn literal_lhs_flips_operator() {
        // 5 < id  ==  id > 5
        let expr = Expr::Binary(Box::new(lit_int(5)), BinaryOp::Lt, Box::new(col("id")));
        let conjuncts = vec![&expr];
        let cols = columns();
        let out = extract_constraints(&conjuncts, None, &cols, &HashSet::new());
        assert_eq!(out[0].constraint.op, ConstraintOp::Gt);
    }

    #[test]
    fn later_table_constraint_forwarded_unusable() {
        let expr = Expr::Binary(
            Box::new(col("id")),
            BinaryOp::Eq,
            Box::new(Expr::Column {
                table: Some("later".into()),
                name: "x".into(),
            }),
        );
        let conjuncts = vec![&expr];
        let cols = columns();
        let out = extract_constraints(&conjuncts, None, &cols, &HashSet::new());
        assert_eq!(out.len(), 1);
        assert!(!out[0].constraint.usable);

        let mut positioned = HashSet::new();
        positioned.insert("later".to_string());
        let out2 = extract_constraints(&conjuncts, None, &cols, &positioned);
        assert!(out2[0].constraint.usable);
    }

    #[test]
    fn between_decomposes_into_ge_and_le() {
        let expr = Expr::Between {
            expr: Box::new(col("id")),
            lo: Box::new(lit_int(1)),
            hi: Box::new(lit_int(10)),
            negated: false,
        };
        let conjuncts = vec![&expr];
        let cols = columns();
        let out = extract_constraints(&conjuncts, None, &cols, &HashSet::new());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].constraint.op, ConstraintOp::Ge);
        assert_eq!(out[1].constraint.op, ConstraintOp::Le);
    }

    #[test]
    fn in_list_of_literals_extracted() {
        let expr = Expr::InList {
            expr: Box::new(col("id")),
            list: vec![lit_int(1), lit_int(2), lit_int(3)],
            negated: false,
        };
        let cols = columns();
        let (idx, values) = in_list_candidates(&expr, None, &cols).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn order_by_requires_full_coverage() {
        let cols = columns();
        let ob = vec![OrderingTerm {
            expr: col("id"),
            order: SortOrder::Desc,
        }];
        let out = order_by_for_table(&ob, None, &cols);
        assert_eq!(out.len(), 1);
        assert!(out[0].desc);

        let ob_mixed = vec![
            OrderingTerm {
                expr: col("id"),
                order: SortOrder::Asc,
            },
            OrderingTerm {
                expr: Expr::Column {
                    table: Some("other".into()),
                    name: "y".into(),
                },
                order: SortOrder::Asc,
            },
        ];
        assert!(order_by_for_table(&ob_mixed, None, &cols).is_empty());
    }

    #[test]
    fn column_usage_mask_sets_rowid_and_columns() {
        let mask = column_usage_mask(vec![ColumnRef::Column(0), ColumnRef::Rowid].into_iter());
        assert_eq!(mask, 1 | (1 << 63));
    }
}
