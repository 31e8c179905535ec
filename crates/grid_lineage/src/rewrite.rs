//! Primary-key injection rewrite.
//!
//! Transforms a `SELECT` into an equivalent query that additionally projects
//! `_pk_<alias>_<col>` targets for the primary key of every base table in
//! scope, recursing through CTEs, derived tables and subquery links. When a
//! scope carries a GROUP BY list the same column references are appended to
//! it so the statement stays a legal aggregate. Non-`SELECT` statements and
//! set operations pass through unchanged with an empty injection map.

use std::collections::{BTreeMap, HashSet};

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident, OrderByKind,
    Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};

use crate::ast;
use crate::catalog::Catalog;
use crate::error::Result;

/// Result of a rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Deparsed rewritten SQL (or the input verbatim when no rewrite applied).
    pub sql: String,
    /// Display alias → injected target names, in catalog primary-key order
    /// per alias, accumulated across every rewritten scope.
    pub injected: BTreeMap<String, Vec<String>>,
}

/// One visible alias collected from a FROM clause.
#[derive(Debug, Clone)]
struct FromEntry {
    /// Qualified `schema.table` (defaulting to `public`); `None` marks a
    /// derived relation, which injects inside its own scope instead.
    table: Option<String>,
    /// Whether the alias was written explicitly.
    explicit: bool,
}

/// Parses `sql`, injects primary-key projections at every select scope, and
/// deparses the result.
pub fn rewrite_inject_pks(sql: &str, catalog: &dyn Catalog) -> Result<RewriteOutcome> {
    let mut statements = ast::parse(sql)?;

    let passthrough = || RewriteOutcome {
        sql: sql.to_string(),
        injected: BTreeMap::new(),
    };
    let Some(statement) = statements.first_mut() else {
        return Ok(passthrough());
    };
    let Statement::Query(query) = statement else {
        return Ok(passthrough());
    };
    if !matches!(query.body.as_ref(), SetExpr::Select(_)) {
        // Set operations are not rewritten; the caller sees them unchanged.
        return Ok(passthrough());
    }

    let mut injected = BTreeMap::new();
    inject_query(query, catalog, &mut injected);
    Ok(RewriteOutcome {
        sql: ast::deparse(statement),
        injected,
    })
}

/// Rewrites one query level in place: its CTEs, its select body, and the
/// subquery links reachable from its sort items.
fn inject_query(query: &mut Query, catalog: &dyn Catalog, adds: &mut BTreeMap<String, Vec<String>>) {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            inject_query(&mut cte.query, catalog, adds);
        }
    }

    match query.body.as_mut() {
        SetExpr::Select(select) => inject_select(select, catalog, adds),
        SetExpr::Query(inner) => inject_query(inner, catalog, adds),
        _ => {}
    }

    if let Some(order_by) = &mut query.order_by {
        if let OrderByKind::Expressions(exprs) = &mut order_by.kind {
            for item in exprs {
                rewrite_expr_sublinks(&mut item.expr, catalog, adds);
            }
        }
    }
}

fn inject_select(
    select: &mut Select,
    catalog: &dyn Catalog,
    adds: &mut BTreeMap<String, Vec<String>>,
) {
    let scope = collect_aliases(&mut select.from, catalog, adds);
    if scope.is_empty() {
        // No FROM clause (e.g. SELECT 1): nothing to inject at this scope.
        return;
    }

    for item in &mut select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                rewrite_expr_sublinks(expr, catalog, adds)
            }
            _ => {}
        }
    }
    if let Some(selection) = &mut select.selection {
        rewrite_expr_sublinks(selection, catalog, adds);
    }
    if let Some(having) = &mut select.having {
        rewrite_expr_sublinks(having, catalog, adds);
    }

    let base_count = scope.values().filter(|e| e.table.is_some()).count();

    // Keep aggregates legal: mirror every injected reference into a
    // non-empty GROUP BY list, skipping references already present.
    if let GroupByExpr::Expressions(group_exprs, _) = &mut select.group_by {
        if !group_exprs.is_empty() {
            let existing: HashSet<String> = group_exprs.iter().map(|e| e.to_string()).collect();
            for (alias, entry) in &scope {
                let Some(table) = &entry.table else { continue };
                let Some(pks) = catalog.primary_keys(table) else {
                    continue;
                };
                for pk in &pks {
                    let col_ref = scoped_column_ref(alias, pk, base_count, entry.explicit);
                    if !existing.contains(&col_ref.to_string()) {
                        group_exprs.push(col_ref);
                    }
                }
            }
        }
    }

    // Injected targets follow all user targets; aliases iterate sorted and
    // each alias's primary key keeps catalog order.
    let mut existing: HashSet<String> = HashSet::new();
    for item in &select.projection {
        match item {
            SelectItem::ExprWithAlias { alias, .. } => {
                existing.insert(alias.value.clone());
            }
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                existing.insert(ident.value.clone());
            }
            _ => {}
        }
    }

    for (alias, entry) in &scope {
        let Some(table) = &entry.table else { continue };
        let Some(pks) = catalog.primary_keys(table) else {
            continue;
        };
        if pks.is_empty() {
            continue;
        }
        let display = display_alias(alias, table, entry.explicit);
        for pk in &pks {
            let target = format!("_pk_{display}_{pk}");
            if existing.contains(&target) {
                continue;
            }
            select.projection.push(SelectItem::ExprWithAlias {
                expr: scoped_column_ref(alias, pk, base_count, entry.explicit),
                alias: Ident::new(target.clone()),
            });
            let names = adds.entry(display.clone()).or_default();
            if !names.contains(&target) {
                names.push(target.clone());
            }
            existing.insert(target);
        }
    }
}

/// Collects visible aliases from a FROM clause, recursing into derived
/// tables so their own scopes inject independently.
fn collect_aliases(
    from: &mut [TableWithJoins],
    catalog: &dyn Catalog,
    adds: &mut BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, FromEntry> {
    let mut scope = BTreeMap::new();
    for item in from {
        collect_factor(&mut item.relation, catalog, adds, &mut scope);
        for join in &mut item.joins {
            collect_factor(&mut join.relation, catalog, adds, &mut scope);
        }
    }
    scope
}

fn collect_factor(
    factor: &mut TableFactor,
    catalog: &dyn Catalog,
    adds: &mut BTreeMap<String, Vec<String>>,
    scope: &mut BTreeMap<String, FromEntry>,
) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let parts: Vec<String> = name
                .0
                .iter()
                .map(|p| match p {
                    sqlparser::ast::ObjectNamePart::Identifier(ident) => ident.value.clone(),
                    other => other.to_string(),
                })
                .collect();
            let relname = parts.last().cloned().unwrap_or_default();
            let qualified = if parts.len() > 1 {
                parts.join(".")
            } else {
                format!("public.{relname}")
            };

            let (visible, explicit) = match alias {
                Some(a) if !a.name.value.is_empty() => (a.name.value.clone(), true),
                _ => (relname, false),
            };
            scope.insert(
                visible,
                FromEntry {
                    table: Some(qualified),
                    explicit,
                },
            );
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            let visible = alias
                .as_ref()
                .map(|a| a.name.value.clone())
                .unwrap_or_else(|| "subselect".to_string());
            inject_query(subquery, catalog, adds);
            scope.insert(
                visible,
                FromEntry {
                    table: None,
                    explicit: true,
                },
            );
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_factor(&mut table_with_joins.relation, catalog, adds, scope);
            for join in &mut table_with_joins.joins {
                collect_factor(&mut join.relation, catalog, adds, scope);
            }
        }
        // Other from-items (table functions, …) receive no injection.
        _ => {}
    }
}

/// Recurses into subquery links nested inside an expression so inner select
/// scopes inject their own primary keys.
fn rewrite_expr_sublinks(
    expr: &mut Expr,
    catalog: &dyn Catalog,
    adds: &mut BTreeMap<String, Vec<String>>,
) {
    match expr {
        Expr::Subquery(query) | Expr::Exists {
            subquery: query, ..
        } => inject_query(query, catalog, adds),
        Expr::InSubquery { expr, subquery, .. } => {
            rewrite_expr_sublinks(expr, catalog, adds);
            inject_query(subquery, catalog, adds);
        }
        Expr::BinaryOp { left, right, .. } => {
            rewrite_expr_sublinks(left, catalog, adds);
            rewrite_expr_sublinks(right, catalog, adds);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::Cast { expr, .. }
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr) => rewrite_expr_sublinks(expr, catalog, adds),
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                rewrite_expr_sublinks(operand, catalog, adds);
            }
            for when in conditions {
                rewrite_expr_sublinks(&mut when.condition, catalog, adds);
                rewrite_expr_sublinks(&mut when.result, catalog, adds);
            }
            if let Some(else_result) = else_result {
                rewrite_expr_sublinks(else_result, catalog, adds);
            }
        }
        Expr::Function(func) => match &mut func.args {
            FunctionArguments::List(list) => {
                for arg in &mut list.args {
                    let fa = match arg {
                        FunctionArg::Unnamed(fa) => fa,
                        FunctionArg::Named { arg, .. } => arg,
                        FunctionArg::ExprNamed { arg, .. } => arg,
                    };
                    if let FunctionArgExpr::Expr(inner) = fa {
                        rewrite_expr_sublinks(inner, catalog, adds);
                    }
                }
            }
            FunctionArguments::Subquery(query) => inject_query(query, catalog, adds),
            FunctionArguments::None => {}
        },
        Expr::Tuple(items) => {
            for item in items {
                rewrite_expr_sublinks(item, catalog, adds);
            }
        }
        Expr::InList { expr, list, .. } => {
            rewrite_expr_sublinks(expr, catalog, adds);
            for item in list {
                rewrite_expr_sublinks(item, catalog, adds);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            rewrite_expr_sublinks(expr, catalog, adds);
            rewrite_expr_sublinks(low, catalog, adds);
            rewrite_expr_sublinks(high, catalog, adds);
        }
        _ => {}
    }
}

/// Human-facing alias chunk for `_pk_<alias>_<col>` names: the explicit
/// alias when present, else the bare relation name, dots replaced.
fn display_alias(visible: &str, qualified: &str, explicit: bool) -> String {
    if explicit {
        return visible.replace('.', "_");
    }
    let bare = qualified.rsplit_once('.').map_or(qualified, |(_, t)| t);
    bare.replace('.', "_")
}

/// Column reference for injection: unqualified when the scope holds exactly
/// one base table referenced without an explicit alias, qualified with the
/// visible alias otherwise.
fn scoped_column_ref(visible: &str, column: &str, base_count: usize, explicit: bool) -> Expr {
    if !explicit && base_count == 1 {
        Expr::Identifier(Ident::new(column))
    } else {
        Expr::CompoundIdentifier(vec![Ident::new(visible), Ident::new(column)])
    }
}
