//! Dependency-table derivation for live-query registration.

mod common;

use common::provenance;
use grid_live::session::dependency_tables;

#[test]
fn unqualified_sources_default_to_public() {
    let prov = provenance(&[
        ("a.name", &["actor.name"]),
        ("f.title", &["film.title"]),
    ]);
    let tables: Vec<String> = dependency_tables(&prov).into_iter().collect();
    assert_eq!(tables, vec!["public.actor", "public.film"]);
}

#[test]
fn qualified_sources_keep_their_schema() {
    let prov = provenance(&[("name", &["sales.actor.name"])]);
    let tables: Vec<String> = dependency_tables(&prov).into_iter().collect();
    assert_eq!(tables, vec!["sales.actor"]);
}

#[test]
fn identifiers_fold_to_lower_case() {
    let prov = provenance(&[("name", &["Actor.Name"])]);
    let tables: Vec<String> = dependency_tables(&prov).into_iter().collect();
    // Replication-stream identifiers arrive lower-cased.
    assert_eq!(tables, vec!["public.actor"]);
}

#[test]
fn duplicate_tables_collapse() {
    let prov = provenance(&[
        ("a.first_name", &["actor.first_name"]),
        ("a.last_name", &["actor.last_name"]),
    ]);
    assert_eq!(dependency_tables(&prov).len(), 1);
}

#[test]
fn empty_provenance_yields_no_tables() {
    let prov = provenance(&[]);
    assert!(dependency_tables(&prov).is_empty());
}
