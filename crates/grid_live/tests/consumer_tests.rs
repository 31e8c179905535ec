//! Change-envelope decoding and key selection.

use grid_live::consumer::{parse_envelope, ChangeKind};
use serde_json::json;

const UPDATE_LINE: &str = r#"{"change":[{"schema":"public","table":"actor","kind":"update",
  "oldkeys":{"keynames":["id"],"keyvalues":[7]},
  "newkeys":{"keynames":["id"],"keyvalues":[7]}}]}"#;

#[test]
fn decodes_update_envelope() {
    let envelope = parse_envelope(&UPDATE_LINE.replace('\n', " ")).unwrap();
    assert_eq!(envelope.change.len(), 1);

    let change = &envelope.change[0];
    assert_eq!(change.kind(), ChangeKind::Update);
    assert_eq!(change.qualified_table(), "public.actor");

    let keys = change.key_map();
    assert_eq!(keys["id"], json!(7));
}

#[test]
fn insert_takes_new_keys() {
    let line = r#"{"change":[{"schema":"public","table":"film","kind":"insert",
      "newkeys":{"keynames":["id"],"keyvalues":[42]}}]}"#
        .replace('\n', " ");
    let envelope = parse_envelope(&line).unwrap();
    let change = &envelope.change[0];
    assert_eq!(change.kind(), ChangeKind::Insert);
    assert_eq!(change.key_map()["id"], json!(42));
}

#[test]
fn delete_takes_old_keys() {
    let line = r#"{"change":[{"schema":"public","table":"film","kind":"delete",
      "oldkeys":{"keynames":["id"],"keyvalues":[3]},
      "newkeys":{"keynames":[],"keyvalues":[]}}]}"#
        .replace('\n', " ");
    let envelope = parse_envelope(&line).unwrap();
    let change = &envelope.change[0];
    assert_eq!(change.kind(), ChangeKind::Delete);
    assert_eq!(change.key_map()["id"], json!(3));
}

#[test]
fn composite_keys_zip_names_with_values() {
    let line = r#"{"change":[{"schema":"public","table":"film_actor","kind":"update",
      "oldkeys":{"keynames":["film_id","actor_id"],"keyvalues":[4,9]}}]}"#
        .replace('\n', " ");
    let envelope = parse_envelope(&line).unwrap();
    let keys = envelope.change[0].key_map();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys["film_id"], json!(4));
    assert_eq!(keys["actor_id"], json!(9));
}

#[test]
fn affected_map_is_keyed_by_qualified_table() {
    let envelope = parse_envelope(&UPDATE_LINE.replace('\n', " ")).unwrap();
    let affected = envelope.change[0].affected();
    assert_eq!(affected.len(), 1);
    assert_eq!(affected["public.actor"]["id"], json!(7));
}

#[test]
fn empty_change_array_is_tolerated() {
    let envelope = parse_envelope(r#"{"change":[]}"#).unwrap();
    assert!(envelope.change.is_empty());

    // Envelopes without a `change` member decode to the same shape.
    let envelope = parse_envelope(r#"{"lsn":"0/16B2D80"}"#).unwrap();
    assert!(envelope.change.is_empty());
}

#[test]
fn unknown_kinds_decode_as_other() {
    let line = r#"{"change":[{"schema":"public","table":"actor","kind":"truncate"}]}"#;
    let envelope = parse_envelope(line).unwrap();
    assert_eq!(envelope.change[0].kind(), ChangeKind::Other);
}

#[test]
fn garbage_lines_error() {
    assert!(parse_envelope("not json").is_err());
}
