//! Wire-shape checks for the subscribe protocol frames.

mod common;

use common::pk_map;
use grid_live::protocol::{ClientRequest, ServerFrame, SubscribedData};
use serde_json::json;

#[test]
fn subscribe_request_parses() {
    let request: ClientRequest =
        serde_json::from_str(r#"{"type":"subscribe","sql":"SELECT name FROM actor"}"#).unwrap();
    assert_eq!(
        request,
        ClientRequest::Subscribe {
            sql: "SELECT name FROM actor".to_string()
        }
    );
}

#[test]
fn unsubscribe_request_parses() {
    let request: ClientRequest = serde_json::from_str(r#"{"type":"unsubscribe"}"#).unwrap();
    assert_eq!(request, ClientRequest::Unsubscribe);
}

#[test]
fn edit_request_parses_with_camel_case_handle() {
    let request: ClientRequest = serde_json::from_str(
        r#"{"type":"edit","editHandle":"abc","column":"name","value":"Z"}"#,
    )
    .unwrap();
    assert_eq!(
        request,
        ClientRequest::Edit {
            edit_handle: "abc".to_string(),
            column: "name".to_string(),
            value: json!("Z"),
        }
    );
}

#[test]
fn unknown_request_types_fail_to_parse() {
    assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"ping"}"#).is_err());
}

#[test]
fn subscribed_frame_shape() {
    let frame = ServerFrame::Subscribed(SubscribedData {
        id: "q1".to_string(),
        tables: vec!["public.actor".to_string()],
        pk_cols: pk_map(&[("actor", &["_pk_actor_id"])]),
        rewrote: "SELECT name, id AS _pk_actor_id FROM actor".to_string(),
    });
    let encoded = serde_json::to_value(&frame).unwrap();
    assert_eq!(
        encoded,
        json!({
            "type": "subscribed",
            "data": {
                "id": "q1",
                "tables": ["public.actor"],
                "pkCols": {"actor": ["_pk_actor_id"]},
                "rewrote": "SELECT name, id AS _pk_actor_id FROM actor"
            }
        })
    );
}

#[test]
fn update_frame_carries_row_array() {
    let frame = ServerFrame::Update(Vec::new());
    assert_eq!(
        serde_json::to_value(&frame).unwrap(),
        json!({"type": "update", "data": []})
    );
}

#[test]
fn unsubscribed_and_error_frames() {
    assert_eq!(
        serde_json::to_value(ServerFrame::Unsubscribed("ok".to_string())).unwrap(),
        json!({"type": "unsubscribed", "data": "ok"})
    );
    assert_eq!(
        serde_json::to_value(ServerFrame::error("boom")).unwrap(),
        json!({"type": "error", "data": {"error": "boom"}})
    );
}
