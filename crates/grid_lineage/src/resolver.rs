//! Provenance resolution.
//!
//! Maps every output column of a `SELECT` back to the base-table columns it
//! was computed from, following joins, derived tables, CTEs, star expansions
//! and scalar expressions. Sources are `table.column` strings using the table
//! name as written in the query; unqualified references stay unqualified and
//! are defaulted to `public` only when the consumer needs a fully qualified
//! name.

use std::collections::BTreeMap;

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, Select, SelectItem,
    SelectItemQualifiedWildcardKind, SetExpr, Statement, TableAliasColumnDef, TableFactor,
    TableWithJoins,
};

use crate::ast;
use crate::catalog::Catalog;
use crate::error::{LineageError, Result};

/// Output label → deduplicated, sorted base-table sources.
pub type Provenance = BTreeMap<String, Vec<String>>;

/// Exposed output column of a derived relation (subquery or CTE).
#[derive(Debug, Clone)]
struct DerivedColumn {
    name: String,
    sources: Vec<String>,
}

/// Derived-relation descriptor: ordered exposed columns with their sources.
#[derive(Debug, Clone, Default)]
struct DerivedRel {
    columns: Vec<DerivedColumn>,
}

impl DerivedRel {
    fn get(&self, name: &str) -> Option<&DerivedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

type DerivedMap = BTreeMap<String, DerivedRel>;

/// One visible alias in a select scope.
#[derive(Debug, Clone)]
enum ScopeEntry {
    /// Base-table reference; the string is the table name as written
    /// (schema-qualified only when the query qualified it).
    Base(String),
    /// Subquery or CTE reference with its descriptor.
    Derived(DerivedRel),
}

type Scope = BTreeMap<String, ScopeEntry>;

/// Computes the provenance map for the first statement of `sql`.
///
/// Errors: parse failures, non-`SELECT` statements (including set
/// operations), unknown aliases, and ambiguous unqualified columns.
pub fn resolve_provenance(sql: &str, catalog: &dyn Catalog) -> Result<Provenance> {
    let statements = ast::parse(sql)?;
    let statement = statements.first().ok_or(LineageError::Empty)?;
    let query = match statement {
        Statement::Query(query) => query,
        _ => return Err(LineageError::Unsupported),
    };

    let outputs = project_query(query, &DerivedMap::new(), catalog)?;

    let mut out = Provenance::new();
    for (label, sources) in outputs {
        out.entry(label).or_default().extend(sources);
    }
    for sources in out.values_mut() {
        sources.sort();
        sources.dedup();
    }
    Ok(out)
}

/// Splits a `table.column` source at its last dot. The table part may itself
/// be schema-qualified.
pub fn split_source(source: &str) -> Option<(&str, &str)> {
    source.rsplit_once('.')
}

/// Resolves the projection of one query level to ordered
/// `(label, sources)` pairs, building CTE descriptors first.
fn project_query(
    query: &Query,
    inherited: &DerivedMap,
    catalog: &dyn Catalog,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut ctes = inherited.clone();
    if let Some(with) = &query.with {
        // CTEs may reference earlier CTEs, so descriptors build in order.
        for cte in &with.cte_tables {
            let Ok(outputs) = project_query(&cte.query, &ctes, catalog) else {
                continue;
            };
            let mut rel = descriptor_from_outputs(outputs);
            rename_descriptor(&mut rel, &cte.alias.columns);
            ctes.insert(cte.alias.name.value.clone(), rel);
        }
    }

    match query.body.as_ref() {
        SetExpr::Select(select) => project_select(select, &ctes, catalog),
        SetExpr::Query(inner) => project_query(inner, &ctes, catalog),
        _ => Err(LineageError::Unsupported),
    }
}

fn project_select(
    select: &Select,
    ctes: &DerivedMap,
    catalog: &dyn Catalog,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut scope = Scope::new();
    build_scope(&select.from, ctes, catalog, &mut scope)?;

    let mut out = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => expand_bare_star(&scope, catalog, &mut out),
            SelectItem::QualifiedWildcard(kind, _) => {
                expand_qualified_star(kind, &scope, catalog, &mut out)?
            }
            SelectItem::UnnamedExpr(expr) => {
                project_expr(expr, None, &scope, ctes, catalog, &mut out)?
            }
            SelectItem::ExprWithAlias { expr, alias } => project_expr(
                expr,
                Some(alias.value.clone()),
                &scope,
                ctes,
                catalog,
                &mut out,
            )?,
        }
    }
    Ok(out)
}

fn project_expr(
    expr: &Expr,
    alias: Option<String>,
    scope: &Scope,
    ctes: &DerivedMap,
    catalog: &dyn Catalog,
    out: &mut Vec<(String, Vec<String>)>,
) -> Result<()> {
    if let Some(parts) = column_parts(expr) {
        let label = alias.unwrap_or_else(|| parts.join("."));
        let sources = resolve_column(&parts, scope, catalog)?;
        out.push((label, sources));
        return Ok(());
    }

    // Expressions: gather every column reference in the subtree. Label is the
    // user alias when present, else the rendered expression itself.
    let mut sources = Vec::new();
    collect_expr_sources(expr, scope, ctes, catalog, &mut sources);
    if !sources.is_empty() {
        sources.sort();
        sources.dedup();
        let label = alias.unwrap_or_else(|| expr.to_string());
        out.push((label, sources));
    }
    Ok(())
}

// ---------------------------------------------------------------- scope ----

fn build_scope(
    from: &[TableWithJoins],
    ctes: &DerivedMap,
    catalog: &dyn Catalog,
    scope: &mut Scope,
) -> Result<()> {
    for item in from {
        add_factor(&item.relation, ctes, catalog, scope)?;
        for join in &item.joins {
            add_factor(&join.relation, ctes, catalog, scope)?;
        }
    }
    Ok(())
}

fn add_factor(
    factor: &TableFactor,
    ctes: &DerivedMap,
    catalog: &dyn Catalog,
    scope: &mut Scope,
) -> Result<()> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let parts = object_name_parts(name);
            let table = parts.join(".");
            let visible = alias
                .as_ref()
                .map(|a| a.name.value.clone())
                .unwrap_or_else(|| parts.last().cloned().unwrap_or_default());

            // A single-part name that is not in the catalog but matches a CTE
            // resolves to that CTE's descriptor.
            if parts.len() == 1 && catalog.columns(&table).is_none() {
                if let Some(rel) = ctes.get(&table) {
                    let mut rel = rel.clone();
                    if let Some(a) = alias {
                        rename_descriptor(&mut rel, &a.columns);
                    }
                    scope.insert(visible, ScopeEntry::Derived(rel));
                    return Ok(());
                }
            }
            scope.insert(visible, ScopeEntry::Base(table));
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            let visible = alias
                .as_ref()
                .map(|a| a.name.value.clone())
                .unwrap_or_else(|| "subselect".to_string());
            let mut rel = match project_query(subquery, ctes, catalog) {
                Ok(outputs) => descriptor_from_outputs(outputs),
                Err(_) => DerivedRel::default(),
            };
            if let Some(a) = alias {
                rename_descriptor(&mut rel, &a.columns);
            }
            scope.insert(visible, ScopeEntry::Derived(rel));
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            add_factor(&table_with_joins.relation, ctes, catalog, scope)?;
            for join in &table_with_joins.joins {
                add_factor(&join.relation, ctes, catalog, scope)?;
            }
        }
        // Table functions and other exotic from-items carry no lineage.
        _ => {}
    }
    Ok(())
}

/// Builds a descriptor from projected outputs: labels lose any alias prefix,
/// per-column sources are deduplicated, and a repeated name keeps its first
/// position but takes the latest sources.
fn descriptor_from_outputs(outputs: Vec<(String, Vec<String>)>) -> DerivedRel {
    let mut rel = DerivedRel::default();
    for (label, mut sources) in outputs {
        sources.sort();
        sources.dedup();
        let name = label
            .rsplit_once('.')
            .map(|(_, tail)| tail.to_string())
            .unwrap_or(label);
        if let Some(existing) = rel.columns.iter_mut().find(|c| c.name == name) {
            existing.sources = sources;
        } else {
            rel.columns.push(DerivedColumn { name, sources });
        }
    }
    rel
}

/// Applies an explicit alias column list (`AS t(a, b)`), renaming exposed
/// columns positionally.
fn rename_descriptor(rel: &mut DerivedRel, columns: &[TableAliasColumnDef]) {
    for (idx, def) in columns.iter().enumerate() {
        if let Some(col) = rel.columns.get_mut(idx) {
            col.name = def.name.value.clone();
        }
    }
}

// ----------------------------------------------------------- resolution ----

/// Resolves a (possibly qualified) column reference to its sources.
fn resolve_column(parts: &[String], scope: &Scope, catalog: &dyn Catalog) -> Result<Vec<String>> {
    match parts {
        [col] => {
            // Single derived item in scope: consult its descriptor directly.
            if scope.len() == 1 {
                let (alias, entry) = scope.iter().next().expect("non-empty scope");
                if let ScopeEntry::Derived(rel) = entry {
                    if let Some(dc) = rel.get(col) {
                        return Ok(dc.sources.clone());
                    }
                    return Ok(vec![format!("{alias}.{col}")]);
                }
            }

            // Unique catalog match across the base tables in scope.
            let mut candidates = Vec::new();
            for entry in scope.values() {
                if let ScopeEntry::Base(table) = entry {
                    if catalog.has_column(table, col) {
                        candidates.push(table.clone());
                    }
                }
            }
            if candidates.len() == 1 {
                return Ok(vec![format!("{}.{col}", candidates[0])]);
            }

            // Single base table whose columns the catalog does not know:
            // attribute the column to it rather than failing.
            if scope.len() == 1 {
                if let Some(ScopeEntry::Base(table)) = scope.values().next() {
                    return Ok(vec![format!("{table}.{col}")]);
                }
            }
            Err(LineageError::AmbiguousColumn(col.clone()))
        }
        [qualifier, col] => match scope.get(qualifier) {
            Some(ScopeEntry::Derived(rel)) => {
                if let Some(dc) = rel.get(col) {
                    Ok(dc.sources.clone())
                } else {
                    Ok(vec![format!("{qualifier}.{col}")])
                }
            }
            Some(ScopeEntry::Base(table)) => Ok(vec![format!("{table}.{col}")]),
            None => Err(LineageError::AliasNotFound(qualifier.clone())),
        },
        _ => {
            // Three or more parts: everything but the last is the table path.
            let (col, table) = parts.split_last().expect("non-empty parts");
            Ok(vec![format!("{}.{col}", table.join("."))])
        }
    }
}

// ------------------------------------------------------------------ stars --

fn expand_bare_star(scope: &Scope, catalog: &dyn Catalog, out: &mut Vec<(String, Vec<String>)>) {
    if scope.len() == 1 {
        let (alias, entry) = scope.iter().next().expect("non-empty scope");
        match entry {
            ScopeEntry::Derived(rel) => {
                for col in &rel.columns {
                    out.push((format!("{alias}.{}", col.name), col.sources.clone()));
                }
            }
            // Single base table: bare column-name keys.
            ScopeEntry::Base(table) => {
                if let Some(cols) = catalog.columns(table) {
                    for col in cols {
                        out.push((col.clone(), vec![format!("{table}.{col}")]));
                    }
                }
            }
        }
        return;
    }

    // Multi-item scope: always alias-qualified keys.
    for (alias, entry) in scope {
        match entry {
            ScopeEntry::Derived(rel) => {
                for col in &rel.columns {
                    out.push((format!("{alias}.{}", col.name), col.sources.clone()));
                }
            }
            ScopeEntry::Base(table) => {
                if let Some(cols) = catalog.columns(table) {
                    for col in cols {
                        out.push((format!("{alias}.{col}"), vec![format!("{table}.{col}")]));
                    }
                }
            }
        }
    }
}

fn expand_qualified_star(
    kind: &SelectItemQualifiedWildcardKind,
    scope: &Scope,
    catalog: &dyn Catalog,
    out: &mut Vec<(String, Vec<String>)>,
) -> Result<()> {
    let SelectItemQualifiedWildcardKind::ObjectName(name) = kind else {
        return Ok(());
    };
    let alias = object_name_parts(name).join(".");
    match scope.get(&alias) {
        Some(ScopeEntry::Derived(rel)) => {
            for col in &rel.columns {
                out.push((format!("{alias}.{}", col.name), col.sources.clone()));
            }
            Ok(())
        }
        Some(ScopeEntry::Base(table)) => {
            if let Some(cols) = catalog.columns(table) {
                for col in cols {
                    out.push((format!("{alias}.{col}"), vec![format!("{table}.{col}")]));
                }
            }
            Ok(())
        }
        None => Err(LineageError::AliasNotFound(alias)),
    }
}

// ------------------------------------------------------- expression walk ---

/// Collects base-table sources from an expression subtree. Column references
/// are leaves; every other covered node recurses into its children. Subquery
/// links resolve their inner select and contribute all of its sources.
fn collect_expr_sources(
    expr: &Expr,
    scope: &Scope,
    ctes: &DerivedMap,
    catalog: &dyn Catalog,
    out: &mut Vec<String>,
) {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            if let Some(parts) = column_parts(expr) {
                if let Ok(sources) = resolve_column(&parts, scope, catalog) {
                    out.extend(sources);
                }
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_sources(left, scope, ctes, catalog, out);
            collect_expr_sources(right, scope, ctes, catalog, out);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::Cast { expr, .. }
        | Expr::Collate { expr, .. }
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr) => {
            collect_expr_sources(expr, scope, ctes, catalog, out);
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                collect_expr_sources(operand, scope, ctes, catalog, out);
            }
            for when in conditions {
                collect_expr_sources(&when.condition, scope, ctes, catalog, out);
                collect_expr_sources(&when.result, scope, ctes, catalog, out);
            }
            if let Some(else_result) = else_result {
                collect_expr_sources(else_result, scope, ctes, catalog, out);
            }
        }
        Expr::Function(func) => {
            match &func.args {
                FunctionArguments::List(list) => {
                    for arg in &list.args {
                        let fa = match arg {
                            FunctionArg::Unnamed(fa) => fa,
                            FunctionArg::Named { arg, .. } => arg,
                            FunctionArg::ExprNamed { arg, .. } => arg,
                        };
                        if let FunctionArgExpr::Expr(inner) = fa {
                            collect_expr_sources(inner, scope, ctes, catalog, out);
                        }
                    }
                }
                FunctionArguments::Subquery(query) => {
                    collect_query_sources(query, ctes, catalog, out);
                }
                FunctionArguments::None => {}
            }
            if let Some(filter) = &func.filter {
                collect_expr_sources(filter, scope, ctes, catalog, out);
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                collect_expr_sources(item, scope, ctes, catalog, out);
            }
        }
        Expr::InList { expr, list, .. } => {
            collect_expr_sources(expr, scope, ctes, catalog, out);
            for item in list {
                collect_expr_sources(item, scope, ctes, catalog, out);
            }
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_expr_sources(expr, scope, ctes, catalog, out);
            collect_expr_sources(low, scope, ctes, catalog, out);
            collect_expr_sources(high, scope, ctes, catalog, out);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_expr_sources(expr, scope, ctes, catalog, out);
            collect_expr_sources(pattern, scope, ctes, catalog, out);
        }
        Expr::Subquery(query) | Expr::Exists {
            subquery: query, ..
        } => {
            collect_query_sources(query, ctes, catalog, out);
        }
        Expr::InSubquery { expr, subquery, .. } => {
            collect_expr_sources(expr, scope, ctes, catalog, out);
            collect_query_sources(subquery, ctes, catalog, out);
        }
        // Literals and uncovered node types contribute nothing.
        _ => {}
    }
}

fn collect_query_sources(
    query: &Query,
    ctes: &DerivedMap,
    catalog: &dyn Catalog,
    out: &mut Vec<String>,
) {
    if let Ok(outputs) = project_query(query, ctes, catalog) {
        for (_, sources) in outputs {
            out.extend(sources);
        }
    }
}

// ------------------------------------------------------------------ util ---

fn column_parts(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Identifier(ident) => Some(vec![ident.value.clone()]),
        Expr::CompoundIdentifier(idents) => {
            Some(idents.iter().map(|i| i.value.clone()).collect())
        }
        _ => None,
    }
}

fn object_name_parts(name: &sqlparser::ast::ObjectName) -> Vec<String> {
    name.0
        .iter()
        .map(|part| match part {
            sqlparser::ast::ObjectNamePart::Identifier(ident) => ident.value.clone(),
            other => other.to_string(),
        })
        .collect()
}
