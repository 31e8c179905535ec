//! Provenance resolution against the actor/film demo schema.
//!
//! Covers plain columns, joins, stars (bare, qualified, derived), CTE
//! chains, scalar expressions, subquery links, and the typed failure modes
//! for non-SELECT input, unknown aliases and ambiguous columns.

mod common;

use common::{ambiguous_catalog, demo_catalog, sources};
use grid_lineage::error::LineageError;
use grid_lineage::resolver::resolve_provenance;

#[test]
fn single_table_column() {
    let prov = resolve_provenance("SELECT name FROM actor", &demo_catalog()).unwrap();
    assert_eq!(prov.len(), 1);
    assert_eq!(prov["name"], sources(&["actor.name"]));
}

#[test]
fn join_with_aliases_keeps_dotted_labels() {
    let prov = resolve_provenance(
        "SELECT a.name, f.title FROM actor a JOIN film f ON f.actor_id = a.id",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["a.name"], sources(&["actor.name"]));
    assert_eq!(prov["f.title"], sources(&["film.title"]));
}

#[test]
fn user_alias_becomes_label() {
    let prov = resolve_provenance(
        "SELECT a.name AS actor_name FROM actor a",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["actor_name"], sources(&["actor.name"]));
    assert!(!prov.contains_key("a.name"));
}

#[test]
fn aggregate_expression_key_lists_argument_sources() {
    let prov = resolve_provenance(
        "SELECT a.name, SUM(f.revenue) FROM actor a JOIN film f ON f.actor_id = a.id \
         GROUP BY a.name",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["a.name"], sources(&["actor.name"]));
    assert_eq!(prov["SUM(f.revenue)"], sources(&["film.revenue"]));
}

#[test]
fn concat_expression_collects_both_sides() {
    let prov = resolve_provenance(
        "SELECT a.first_name || a.last_name FROM actor a",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(
        prov["a.first_name || a.last_name"],
        sources(&["actor.first_name", "actor.last_name"])
    );
}

#[test]
fn bare_star_single_table_expands_to_bare_columns() {
    let prov = resolve_provenance("SELECT * FROM actor", &demo_catalog()).unwrap();
    assert_eq!(prov.len(), 4);
    assert_eq!(prov["id"], sources(&["actor.id"]));
    assert_eq!(prov["first_name"], sources(&["actor.first_name"]));
}

#[test]
fn bare_star_multi_table_uses_alias_keys() {
    let prov = resolve_provenance("SELECT * FROM actor a, film f", &demo_catalog()).unwrap();
    assert_eq!(prov["a.name"], sources(&["actor.name"]));
    assert_eq!(prov["f.title"], sources(&["film.title"]));
    assert_eq!(prov.len(), 8);
}

#[test]
fn qualified_stars_expand_per_alias() {
    let prov = resolve_provenance(
        "SELECT a.*, f.* FROM actor a JOIN film f ON f.actor_id = a.id",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["a.last_name"], sources(&["actor.last_name"]));
    assert_eq!(prov["f.revenue"], sources(&["film.revenue"]));
}

#[test]
fn cte_descriptor_feeds_top_level() {
    let prov = resolve_provenance(
        "WITH top_films AS (SELECT id, title FROM film) SELECT id, title FROM top_films",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["id"], sources(&["film.id"]));
    assert_eq!(prov["title"], sources(&["film.title"]));
}

#[test]
fn chained_ctes_resolve_transitively() {
    let prov = resolve_provenance(
        "WITH a1 AS (SELECT id FROM actor), a2 AS (SELECT id FROM a1) SELECT id FROM a2",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["id"], sources(&["actor.id"]));
}

#[test]
fn cte_alias_columns_rename_positionally() {
    let prov = resolve_provenance(
        "WITH t(x) AS (SELECT id FROM actor) SELECT x FROM t",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["x"], sources(&["actor.id"]));
}

#[test]
fn derived_table_column_resolves_through_descriptor() {
    let prov = resolve_provenance(
        "SELECT s.title FROM (SELECT title FROM film) AS s",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["s.title"], sources(&["film.title"]));
}

#[test]
fn derived_expression_column_keeps_all_sources() {
    let prov = resolve_provenance(
        "SELECT s.full_name FROM \
         (SELECT first_name || last_name AS full_name FROM actor) AS s",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(
        prov["s.full_name"],
        sources(&["actor.first_name", "actor.last_name"])
    );
}

#[test]
fn scalar_subquery_contributes_inner_sources() {
    let prov = resolve_provenance(
        "SELECT (SELECT name FROM actor) AS top_actor FROM film",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["top_actor"], sources(&["actor.name"]));
}

#[test]
fn three_part_names_pass_through() {
    let prov = resolve_provenance(
        "SELECT public.actor.name FROM public.actor",
        &demo_catalog(),
    )
    .unwrap();
    assert_eq!(prov["public.actor.name"], sources(&["public.actor.name"]));
}

#[test]
fn schema_qualified_table_keeps_written_form() {
    let prov = resolve_provenance("SELECT title FROM public.film", &demo_catalog()).unwrap();
    assert_eq!(prov["title"], sources(&["public.film.title"]));
}

#[test]
fn select_without_from_yields_empty_map() {
    let prov = resolve_provenance("SELECT 1", &demo_catalog()).unwrap();
    assert!(prov.is_empty());
}

#[test]
fn unqualified_column_unique_across_tables() {
    // `name` exists only in actor, so the cross join still resolves.
    let prov = resolve_provenance("SELECT name FROM actor, film", &demo_catalog()).unwrap();
    assert_eq!(prov["name"], sources(&["actor.name"]));
}

#[test]
fn unqualified_column_ambiguous_across_tables() {
    let err = resolve_provenance("SELECT name FROM actor, film", &ambiguous_catalog())
        .unwrap_err();
    assert_eq!(err, LineageError::AmbiguousColumn("name".to_string()));
    assert_eq!(err.to_string(), "ambiguous column name");
}

#[test]
fn unknown_alias_is_reported() {
    let err = resolve_provenance("SELECT x.name FROM actor", &demo_catalog()).unwrap_err();
    assert_eq!(err.to_string(), "alias x not found");
}

#[test]
fn non_select_statements_are_unsupported() {
    let err = resolve_provenance("INSERT INTO actor (name) VALUES ('x')", &demo_catalog())
        .unwrap_err();
    assert_eq!(err, LineageError::Unsupported);

    let err = resolve_provenance(
        "SELECT id FROM actor UNION SELECT id FROM film",
        &demo_catalog(),
    )
    .unwrap_err();
    assert_eq!(err, LineageError::Unsupported);
}

#[test]
fn parse_failures_are_typed() {
    let err = resolve_provenance("SELEKT broken", &demo_catalog()).unwrap_err();
    assert!(matches!(err, LineageError::Parse(_)));
}
