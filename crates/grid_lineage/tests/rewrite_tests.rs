//! Primary-key injection rewrite against the actor/film demo schema.
//!
//! Deparsed SQL is compared whitespace-normalized. Every case also checks
//! the alias → injected-names map, and the idempotence property: rewriting
//! a rewritten query changes nothing.

mod common;

use std::collections::BTreeMap;

use common::{demo_catalog, normalize_sql};
use grid_lineage::rewrite::rewrite_inject_pks;

fn assert_rewrite(sql: &str, expected_sql: &str, expected_adds: &[(&str, &[&str])]) {
    let cat = demo_catalog();
    let outcome = rewrite_inject_pks(sql, &cat).unwrap();
    assert_eq!(
        normalize_sql(&outcome.sql),
        normalize_sql(expected_sql),
        "rewritten SQL mismatch for {sql}"
    );

    let mut adds = BTreeMap::new();
    for (alias, names) in expected_adds {
        adds.insert(
            (*alias).to_string(),
            names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>(),
        );
    }
    assert_eq!(outcome.injected, adds, "injection map mismatch for {sql}");

    // Idempotence: a second pass must not add columns or change the SQL.
    let again = rewrite_inject_pks(&outcome.sql, &cat).unwrap();
    assert_eq!(
        normalize_sql(&again.sql),
        normalize_sql(&outcome.sql),
        "rewrite is not idempotent for {sql}"
    );
}

#[test]
fn single_table_single_pk() {
    assert_rewrite(
        "SELECT name FROM actor;",
        "SELECT name, id AS _pk_actor_id FROM actor",
        &[("actor", &["_pk_actor_id"])],
    );
}

#[test]
fn join_with_explicit_aliases() {
    assert_rewrite(
        "SELECT a.name, f.title FROM actor a JOIN film f ON f.actor_id = a.id",
        "SELECT a.name, f.title, a.id AS _pk_a_id, f.id AS _pk_f_id \
         FROM actor AS a JOIN film AS f ON f.actor_id = a.id",
        &[("a", &["_pk_a_id"]), ("f", &["_pk_f_id"])],
    );
}

#[test]
fn group_by_gains_injected_references() {
    assert_rewrite(
        "SELECT a.name, SUM(f.revenue) FROM actor a JOIN film f ON f.actor_id = a.id \
         GROUP BY a.name",
        "SELECT a.name, SUM(f.revenue), a.id AS _pk_a_id, f.id AS _pk_f_id \
         FROM actor AS a JOIN film AS f ON f.actor_id = a.id \
         GROUP BY a.name, a.id, f.id",
        &[("a", &["_pk_a_id"]), ("f", &["_pk_f_id"])],
    );
}

#[test]
fn composite_key_keeps_catalog_order() {
    assert_rewrite(
        "SELECT note FROM film_actor",
        "SELECT note, film_id AS _pk_film_actor_film_id, \
         actor_id AS _pk_film_actor_actor_id FROM film_actor",
        &[(
            "film_actor",
            &["_pk_film_actor_film_id", "_pk_film_actor_actor_id"],
        )],
    );
}

#[test]
fn explicit_alias_qualifies_even_for_single_table() {
    assert_rewrite(
        "SELECT fa.note FROM film_actor fa",
        "SELECT fa.note, fa.film_id AS _pk_fa_film_id, fa.actor_id AS _pk_fa_actor_id \
         FROM film_actor AS fa",
        &[("fa", &["_pk_fa_film_id", "_pk_fa_actor_id"])],
    );
}

#[test]
fn schema_qualified_table_uses_bare_display_alias() {
    assert_rewrite(
        "SELECT name FROM public.actor",
        "SELECT name, id AS _pk_actor_id FROM public.actor",
        &[("actor", &["_pk_actor_id"])],
    );
}

#[test]
fn same_table_twice_injects_per_alias() {
    assert_rewrite(
        "SELECT a1.name, a2.name FROM actor a1 JOIN actor a2 ON a1.id = a2.id",
        "SELECT a1.name, a2.name, a1.id AS _pk_a1_id, a2.id AS _pk_a2_id \
         FROM actor AS a1 JOIN actor AS a2 ON a1.id = a2.id",
        &[("a1", &["_pk_a1_id"]), ("a2", &["_pk_a2_id"])],
    );
}

#[test]
fn derived_table_injects_inside_its_own_scope() {
    assert_rewrite(
        "SELECT s.title FROM (SELECT title FROM film) AS s",
        "SELECT s.title FROM (SELECT title, id AS _pk_film_id FROM film) AS s",
        &[("film", &["_pk_film_id"])],
    );
}

#[test]
fn cte_body_is_rewritten() {
    assert_rewrite(
        "WITH top_films AS (SELECT id, title FROM film) SELECT id, title FROM top_films",
        "WITH top_films AS (SELECT id, title, id AS _pk_film_id FROM film) \
         SELECT id, title FROM top_films",
        &[("film", &["_pk_film_id"])],
    );
}

#[test]
fn where_clause_sublink_is_rewritten() {
    assert_rewrite(
        "SELECT name FROM actor WHERE id IN (SELECT actor_id FROM film)",
        "SELECT name, id AS _pk_actor_id FROM actor \
         WHERE id IN (SELECT actor_id, id AS _pk_film_id FROM film)",
        &[("actor", &["_pk_actor_id"]), ("film", &["_pk_film_id"])],
    );
}

#[test]
fn colliding_target_name_is_skipped() {
    assert_rewrite(
        "SELECT name AS _pk_actor_id FROM actor",
        "SELECT name AS _pk_actor_id FROM actor",
        &[],
    );
}

#[test]
fn table_without_primary_key_is_left_alone() {
    assert_rewrite("SELECT msg FROM log", "SELECT msg FROM log", &[]);
}

#[test]
fn select_without_from_is_unchanged() {
    assert_rewrite("SELECT 1", "SELECT 1", &[]);
}

#[test]
fn non_select_passes_through_verbatim() {
    let cat = demo_catalog();
    let sql = "INSERT INTO actor (name)  VALUES ('x')";
    let outcome = rewrite_inject_pks(sql, &cat).unwrap();
    // Verbatim, including the original spacing.
    assert_eq!(outcome.sql, sql);
    assert!(outcome.injected.is_empty());
}

#[test]
fn set_operations_pass_through_verbatim() {
    let cat = demo_catalog();
    let sql = "SELECT id FROM actor UNION SELECT id FROM film";
    let outcome = rewrite_inject_pks(sql, &cat).unwrap();
    assert_eq!(outcome.sql, sql);
    assert!(outcome.injected.is_empty());
}

#[test]
fn parse_errors_surface() {
    let cat = demo_catalog();
    assert!(rewrite_inject_pks("SELEKT broken", &cat).is_err());
}

#[test]
fn rewritten_query_has_exactly_one_projection_per_pk_column() {
    // Property from the join scenario: one `_pk_<alias>_<pk>` per alias/pk.
    let cat = demo_catalog();
    let outcome = rewrite_inject_pks(
        "SELECT a.name, f.title FROM actor a JOIN film f ON f.actor_id = a.id",
        &cat,
    )
    .unwrap();
    for target in ["_pk_a_id", "_pk_f_id"] {
        assert_eq!(
            outcome.sql.matches(target).count(),
            1,
            "expected exactly one {target} projection"
        );
    }
}
