//! End-to-end tests over HTTP/1.1 against a gateway on an ephemeral port.

use std::sync::Arc;

use serde_json::{json, Value};

use strix_client::{connect_url, ClientError, Http1Client};
use strix_jsonrpc::{Params, RequestMessage, TRACEID_HEADER};
use strix_server::{Actor, Gateway, SchemaBuilder};

fn test_actor() -> Actor {
    let actor = Actor::new();
    actor
        .register("echo", |_ctx, params: Vec<Value>| async move {
            Ok(params.first().cloned().unwrap_or(Value::Null))
        })
        .unwrap();
    actor
        .register_typed("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) })
        .unwrap();
    let schema = SchemaBuilder::new()
        .build_value(&json!({"params": ["integer", {"type": "integer"}]}))
        .unwrap();
    actor
        .register_with_schema("add2num", schema, |_ctx, params: Vec<Value>| async move {
            let a = params[0].as_i64().unwrap_or(0);
            let b = params[1].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        })
        .unwrap();
    actor
}

async fn spawn_gateway(actor: Actor) -> (Arc<Gateway>, String) {
    let gateway = Arc::new(Gateway::new(actor));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let g = gateway.clone();
    tokio::spawn(async move {
        let _ = g.serve(listener).await;
    });
    (gateway, format!("http://{addr}"))
}

async fn post_raw(url: &str, body: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_echo_over_http1() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = post_raw(
        &url,
        r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":["hello001"]}"#,
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"], "hello001");
}

#[tokio::test]
async fn test_method_not_found() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = post_raw(&url, r#"{"jsonrpc":"2.0","id":1,"method":"echoxxx"}"#).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_typed_dispatch_and_mismatch() {
    let (_g, url) = spawn_gateway(test_actor()).await;

    let resp = post_raw(
        &url,
        r#"{"jsonrpc":"2.0","id":2,"method":"add","params":["6",4]}"#,
    )
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("got unconvertible type"));

    let resp = post_raw(
        &url,
        r#"{"jsonrpc":"2.0","id":3,"method":"add","params":[6,3]}"#,
    )
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], 9);
}

#[tokio::test]
async fn test_schema_gate() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = post_raw(
        &url,
        r#"{"jsonrpc":"2.0","id":4,"method":"add2num","params":["12","a str"]}"#,
    )
    .await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32633);
    assert_eq!(
        body["error"]["message"],
        "Validation Error: .params[0] data is not integer"
    );
}

#[tokio::test]
async fn test_malformed_json_is_400_parse_error() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = post_raw(&url, "this is not json").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_non_post_is_405() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), 405);
}

#[tokio::test]
async fn test_trace_id_is_mirrored() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "application/json")
        .header(TRACEID_HEADER, "trace-e2e-1")
        .body(r#"{"jsonrpc":"2.0","id":9,"method":"echo","params":[true]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get(TRACEID_HEADER).unwrap(),
        "trace-e2e-1"
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["traceid"], "trace-e2e-1");
}

#[tokio::test]
async fn test_discover_lists_public_methods() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let resp = post_raw(&url, r#"{"jsonrpc":"2.0","id":1,"method":"rpc.discover"}"#).await;
    let body: Value = resp.json().await.unwrap();
    let names: Vec<&str> = body["result"]["methods"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["add", "add2num", "echo"]);
}

#[tokio::test]
async fn test_http1_client_round_trip() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let client = Http1Client::new(url.parse().unwrap()).unwrap();
    let sum: i64 = client
        .unwrap_call(RequestMessage::new(1, "add", vec![json!(40), json!(2)]).unwrap())
        .await
        .unwrap();
    assert_eq!(sum, 42);

    let err = client
        .unwrap_call::<Value>(RequestMessage::new(2, "nope", Params::empty()).unwrap())
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(body) => assert_eq!(body.code, -32601),
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_handle_over_http() {
    let (_g, url) = spawn_gateway(test_actor()).await;
    let handle = connect_url(&url).unwrap();
    let echoed: String = handle
        .unwrap_call(RequestMessage::new(1, "echo", vec![json!("via handle")]).unwrap())
        .await
        .unwrap();
    assert_eq!(echoed, "via handle");
}
