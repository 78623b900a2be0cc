// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use regoserve::storage::{PatchOp, Path, StorageError, Transaction, TxnParams};
use regoserve::*;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

const TEST_MOD: &str = r#"package testmod
p[x] :- q[x], not r[x]
q[x] :- data.x.y[i] = x
r[x] :- data.x.z[i] = x
gt1 :- req1 > 1"#;

struct Fixture {
    router: Router,
    state: AppState,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture::with_store(Arc::new(InMemoryStore::new()))
    }

    fn with_store(store: Arc<dyn Store>) -> Fixture {
        let state = AppState {
            store,
            policies: Arc::new(PolicyManager::new()),
        };
        Fixture {
            router: router(state.clone()),
            state,
        }
    }

    fn for_server(server: &Server) -> Fixture {
        Fixture {
            router: server.router(),
            state: server.state().clone(),
        }
    }

    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, String)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, String::from_utf8(bytes.to_vec())?))
    }

    async fn call(&self, method: &str, uri: &str, body: &str) -> Result<(StatusCode, String)> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))?;
        self.send(request).await
    }

    async fn json(&self, method: &str, uri: &str, body: &str) -> Result<(StatusCode, JsonValue)> {
        let (status, body) = self.call(method, uri, body).await?;
        Ok((status, serde_json::from_str(&body)?))
    }

    async fn expect(&self, method: &str, uri: &str, body: &str, status: StatusCode) -> Result<String> {
        let (got, body) = self.call(method, uri, body).await?;
        assert_eq!(got, status, "{method} {uri}: {body}");
        Ok(body)
    }
}

// Percent-encode a query parameter value.
fn encode(value: &str) -> String {
    let mut out = String::new();
    for b in value.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[tokio::test]
async fn patch_then_read() -> Result<()> {
    let f = Fixture::new();
    f.expect(
        "PATCH",
        "/data/x",
        r#"[{"op": "add", "path": "/", "value": {"a": 1}}]"#,
        StatusCode::NO_CONTENT,
    )
    .await?;
    let body = f.expect("GET", "/data/x/a", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":1}"#);

    f.expect(
        "PATCH",
        "/data",
        r#"[{"op": "add", "path": "/x/b", "value": 2}]"#,
        StatusCode::NO_CONTENT,
    )
    .await?;
    let body = f.expect("GET", "/data/x", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":{"a":1,"b":2}}"#);
    Ok(())
}

#[tokio::test]
async fn partial_set_over_base_data() -> Result<()> {
    let f = Fixture::new();
    f.expect(
        "PUT",
        "/data/x",
        r#"{"y": [1, 2, 3, 4], "z": [3, 4, 5]}"#,
        StatusCode::NO_CONTENT,
    )
    .await?;
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    let body = f.expect("GET", "/data/testmod/p", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":[1,2]}"#);
    Ok(())
}

#[tokio::test]
async fn input_bound_to_data_with_free_variables() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    f.expect("PUT", "/data/testmod/arr", "[1, 2, 3, 4]", StatusCode::NO_CONTENT)
        .await?;

    let uri = format!(
        "/data/testmod/gt1?input={}",
        encode("req1:data.testmod.arr[i]")
    );
    let body = f.expect("GET", &uri, "", StatusCode::OK).await?;
    assert_eq!(
        body,
        r#"{"result":[[true,{"i":1}],[true,{"i":2}],[true,{"i":3}]]}"#
    );

    let uri = format!("/data/testmod/gt1?input={}", encode("req1:5"));
    let body = f.expect("GET", &uri, "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":true}"#);

    f.expect("GET", "/data/testmod/gt1", "", StatusCode::NOT_FOUND)
        .await?;
    Ok(())
}

#[tokio::test]
async fn put_below_a_scalar_is_a_write_conflict() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/data/a/b", "[1, 2, 3, 4]", StatusCode::NO_CONTENT)
        .await?;
    let (status, body) = f.json("PUT", "/data/a/b/c/d", "0").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "resource_conflict");
    assert_eq!(body["message"], "write conflict: /a/b");
    Ok(())
}

#[tokio::test]
async fn parse_errors_are_located() -> Result<()> {
    let f = Fixture::new();
    let (status, body) = f
        .json("PUT", "/policies/test", "\n    package a.b.c\n\n    p ;- true\n    ")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parameter");
    assert_eq!(body["message"], "error(s) occurred while parsing module(s)");
    let error = &body["errors"][0];
    assert_eq!(error["code"], "rego_parse_error");
    assert_eq!(error["location"], json!({"file": "test", "row": 4, "col": 8}));

    // The failed module is not installed.
    f.expect("GET", "/policies/test", "", StatusCode::NOT_FOUND)
        .await?;
    Ok(())
}

#[tokio::test]
async fn malformed_body_input() -> Result<()> {
    let f = Fixture::new();
    let (status, body) = f.json("POST", "/data/deadbeef", r#"{"input": @}"#).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parameter");
    assert_eq!(
        body["message"],
        "body contains malformed input document: invalid character '@' looking for beginning of value"
    );
    Ok(())
}

#[tokio::test]
async fn body_input_is_visible_to_rules() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    let body = f
        .expect("POST", "/data/testmod/gt1", r#"{"input": {"req1": 2}}"#, StatusCode::OK)
        .await?;
    assert_eq!(body, r#"{"result":true}"#);

    let (status, body) = f
        .json(
            "POST",
            &format!("/data/testmod/gt1?input={}", encode("req1:2")),
            r#"{"input": {"req1": 2}}"#,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "query already defines input document");
    Ok(())
}

#[tokio::test]
async fn if_none_match_keeps_existing_documents() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/data/a/b/c", "0", StatusCode::NO_CONTENT)
        .await?;
    let request = Request::builder()
        .method("PUT")
        .uri("/data/a/b/c")
        .header(header::IF_NONE_MATCH, "*")
        .body(Body::from("1"))?;
    let (status, _) = f.send(request).await?;
    assert_eq!(status, StatusCode::NOT_MODIFIED);

    let body = f.expect("GET", "/data/a/b/c", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":0}"#);

    // A missing document is still created.
    let request = Request::builder()
        .method("PUT")
        .uri("/data/a/b/d")
        .header(header::IF_NONE_MATCH, "*")
        .body(Body::from("1"))?;
    let (status, _) = f.send(request).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn array_patches() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/data/x", r#"{"y": [1, 2]}"#, StatusCode::NO_CONTENT)
        .await?;
    f.expect(
        "PATCH",
        "/data/x",
        r#"[{"op": "add", "path": "/y/-", "value": 3},
            {"op": "add", "path": "/y/0", "value": 0}]"#,
        StatusCode::NO_CONTENT,
    )
    .await?;
    let body = f.expect("GET", "/data/x/y", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":[0,1,2,3]}"#);

    f.expect(
        "PATCH",
        "/data/x/y",
        r#"[{"op": "remove", "path": "/1"}, {"op": "replace", "path": "/0", "value": 9}]"#,
        StatusCode::NO_CONTENT,
    )
    .await?;
    let body = f.expect("GET", "/data/x/y", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":[9,2,3]}"#);

    let (status, body) = f
        .json("PATCH", "/data/x", r#"[{"op": "move", "path": "/y"}]"#)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parameter");

    let (status, body) = f
        .json("PATCH", "/data/x", r#"[{"op": "remove", "path": "/y/7"}]"#)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "resource_not_found");
    Ok(())
}

#[tokio::test]
async fn writes_into_virtual_documents_conflict() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    for (method, uri, body) in [
        ("PATCH", "/data/testmod", r#"[{"op": "add", "path": "/p", "value": 1}]"#),
        ("PUT", "/data/testmod/q/x", "1"),
        ("DELETE", "/data/testmod/r", ""),
    ] {
        let (status, body) = f.json(method, uri, body).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["code"], "resource_conflict");
        assert!(body["message"]
            .as_str()
            .unwrap_or_default()
            .starts_with("write conflict: /testmod/"));
    }
    Ok(())
}

#[tokio::test]
async fn put_is_idempotent_and_round_trips() -> Result<()> {
    let f = Fixture::new();
    let doc = r#"{"servers": [{"name": "web", "ports": [80, 443]}], "enabled": true}"#;
    for _ in 0..2 {
        f.expect("PUT", "/data/config", doc, StatusCode::NO_CONTENT)
            .await?;
        let (status, body) = f.json("GET", "/data/config", "").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], serde_json::from_str::<JsonValue>(doc)?);
    }

    f.expect("DELETE", "/data/config", "", StatusCode::NO_CONTENT)
        .await?;
    f.expect("GET", "/data/config", "", StatusCode::NOT_FOUND)
        .await?;
    f.expect("DELETE", "/data/config", "", StatusCode::NOT_FOUND)
        .await?;

    let (status, body) = f.json("PUT", "/data/config", "{oops}").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .starts_with("body contains malformed JSON"));
    Ok(())
}

#[tokio::test]
async fn root_document_composes_base_and_virtual() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/data/x", r#"{"y": [1, 2], "z": [2]}"#, StatusCode::NO_CONTENT)
        .await?;
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    let (status, body) = f.json("GET", "/data", "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["result"],
        json!({
            "x": {"y": [1, 2], "z": [2]},
            "testmod": {"p": [1], "q": [1, 2], "r": [2]}
        })
    );

    let (_, v1) = f.json("GET", "/v1/data", "").await?;
    assert_eq!(v1, body);
    Ok(())
}

#[tokio::test]
async fn failed_puts_leave_policies_untouched() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    f.expect("PUT", "/data/x", r#"{"y": [1], "z": []}"#, StatusCode::NO_CONTENT)
        .await?;

    let (status, body) = f
        .json("PUT", "/policies/broken", "package testmod\nbad :- nope(1)")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "error(s) occurred while compiling module(s)");
    assert_eq!(body["errors"][0]["code"], "rego_type_error");

    let body = f.expect("GET", "/data/testmod/p", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":[1]}"#);
    f.expect("GET", "/policies/broken", "", StatusCode::NOT_FOUND)
        .await?;
    Ok(())
}

#[tokio::test]
async fn policy_lifecycle() -> Result<()> {
    let f = Fixture::new();
    let (status, body) = f.json("PUT", "/policies/testmod", TEST_MOD).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["id"], "testmod");

    let (_, body) = f.json("GET", "/policies", "").await?;
    let ids: Vec<&str> = body["result"]
        .as_array()
        .map(|modules| modules.iter().filter_map(|m| m["id"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(ids, vec!["testmod"]);

    let (status, body) = f.json("GET", "/v1/policies/testmod", "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["id"], "testmod");

    let raw = f
        .expect("GET", "/policies/testmod/raw", "", StatusCode::OK)
        .await?;
    assert_eq!(raw, TEST_MOD);

    f.expect("DELETE", "/policies/testmod", "", StatusCode::NO_CONTENT)
        .await?;
    let (status, body) = f.json("GET", "/policies/testmod", "").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "resource_not_found");
    f.expect("DELETE", "/policies/testmod", "", StatusCode::NOT_FOUND)
        .await?;

    let (status, body) = f.json("PUT", "/policies/empty", "").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parameter");
    Ok(())
}

#[tokio::test]
async fn ad_hoc_queries() -> Result<()> {
    let f = Fixture::new();
    let uri = format!("/query?q={}", encode("a = [1, 2, 3], a[i] = x"));
    let (status, body) = f.json("GET", &uri, "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["result"],
        json!([
            {"a": [1, 2, 3], "i": 0, "x": 1},
            {"a": [1, 2, 3], "i": 1, "x": 2},
            {"a": [1, 2, 3], "i": 2, "x": 3}
        ])
    );

    let uri = format!("/v1/query?q={}", encode("x = 1, x > 2"));
    f.expect("GET", &uri, "", StatusCode::NOT_FOUND).await?;

    let (status, body) = f.json("GET", "/query", "").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "missing parameter 'q'");

    let uri = format!("/query?q={}", encode("x = "));
    let (status, body) = f.json("GET", &uri, "").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "error(s) occurred while parsing query");
    Ok(())
}

#[tokio::test]
async fn explanations() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;

    let uri = format!("/data/testmod/gt1?explain=full&input={}", encode("req1:2"));
    let (status, body) = f.json("GET", &uri, "").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], true);
    let events = body["explanation"].as_array().cloned().unwrap_or_default();
    assert!(!events.is_empty());
    for event in &events {
        for field in ["op", "query_id", "parent_id", "type", "node", "locals"] {
            assert!(event.get(field).is_some(), "missing {field} in {event}");
        }
    }
    assert_eq!(events[0]["op"], "enter");
    assert_eq!(events[events.len() - 1]["op"], "exit");

    // Undefined results still carry the explanation.
    let uri = format!("/data/testmod/gt1?explain=full&input={}", encode("req1:0"));
    let (status, body) = f.json("GET", &uri, "").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let events = body["explanation"].as_array().cloned().unwrap_or_default();
    assert_eq!(events.last().map(|e| e["op"].clone()), Some(json!("fail")));
    assert!(body.get("result").is_none());
    Ok(())
}

#[tokio::test]
async fn pretty_responses() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/data/x", "[1]", StatusCode::NO_CONTENT)
        .await?;
    let body = f
        .expect("GET", "/data/x?pretty=true", "", StatusCode::OK)
        .await?;
    assert_eq!(body, "{\n  \"result\": [\n    1\n  ]\n}\n");
    Ok(())
}

#[tokio::test]
async fn index_page_runs_queries() -> Result<()> {
    let f = Fixture::new();
    let body = f.expect("GET", "/", "", StatusCode::OK).await?;
    assert!(body.contains("<textarea"));
    assert!(!body.contains("Query result"));

    let uri = format!("/?q={}", encode("foo = 1"));
    let body = f.expect("GET", &uri, "", StatusCode::OK).await?;
    assert!(body.contains("Query result"));
    Ok(())
}

#[tokio::test]
async fn policies_persist_across_restarts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let addr: SocketAddr = "127.0.0.1:0".parse()?;

    let server = Server::new(
        Arc::new(InMemoryStore::new()),
        addr,
        Some(dir.path().to_path_buf()),
        true,
    )?;
    let f = Fixture::for_server(&server);
    f.expect("PUT", "/policies/testmod", TEST_MOD, StatusCode::OK)
        .await?;
    f.expect("PUT", "/policies/other", "package other\nq = 1", StatusCode::OK)
        .await?;
    f.expect("DELETE", "/policies/other", "", StatusCode::NO_CONTENT)
        .await?;

    let (status, body) = f
        .json("PUT", "/policies/..%2Fescaped", "package escaped\nq = 1")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parameter");
    let outside = dir.path().parent().map(|p| p.join("escaped.rego"));
    assert!(!outside.map(|p| p.exists()).unwrap_or(false));

    let restarted = Server::new(
        Arc::new(InMemoryStore::new()),
        addr,
        Some(dir.path().to_path_buf()),
        true,
    )?;
    let ids: Vec<String> = restarted
        .state()
        .policies
        .list()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["testmod".to_string()]);

    let f = Fixture::for_server(&restarted);
    let raw = f
        .expect("GET", "/policies/testmod/raw", "", StatusCode::OK)
        .await?;
    assert_eq!(raw, TEST_MOD);
    Ok(())
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    let f = Fixture::new();
    let body = f.expect("GET", "/health", "", StatusCode::OK).await?;
    assert_eq!(body, "{}");
    Ok(())
}

#[tokio::test]
async fn rules_may_not_hide_base_data() -> Result<()> {
    let f = Fixture::new();
    f.expect("PUT", "/data/a/b", "1", StatusCode::NO_CONTENT)
        .await?;

    let (status, body) = f.json("PUT", "/policies/m", "package a\nb = 2").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "error(s) occurred while compiling module(s)");
    let error = &body["errors"][0];
    assert_eq!(error["code"], "rego_compile_error");
    assert_eq!(error["message"], "conflicting rule for data path a/b found");
    assert_eq!(error["location"], json!({"file": "m", "row": 2, "col": 1}));

    // A scalar above the rule hides it as well.
    f.expect("PUT", "/data/x", "1", StatusCode::NO_CONTENT)
        .await?;
    let (status, body) = f.json("PUT", "/policies/n", "package x.y\np = 1").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["errors"][0]["message"],
        "conflicting rule for data path x/y/p found"
    );

    let body = f.expect("GET", "/data/a/b", "", StatusCode::OK).await?;
    assert_eq!(body, r#"{"result":1}"#);
    f.expect("GET", "/policies/m", "", StatusCode::NOT_FOUND)
        .await?;
    f.expect("PUT", "/policies/m", "package a\nc = 2", StatusCode::OK)
        .await?;
    Ok(())
}

#[tokio::test]
async fn data_writes_see_rules_published_while_waiting() -> Result<()> {
    let f = Fixture::new();
    let held = f
        .state
        .store
        .begin(TxnParams::write(Path::new(&["a", "b"])))
        .await?;

    let router = f.router.clone();
    let pending = tokio::spawn(async move {
        let request = Request::builder()
            .method("PUT")
            .uri("/data/a/b")
            .body(Body::from("1"))?;
        let response = router.oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        anyhow::Ok((status, serde_json::from_slice::<JsonValue>(&bytes)?))
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    f.state.policies.put("m", "package a\nb = 1")?;
    f.state.store.abort(held);

    let (status, body) = pending.await??;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "resource_conflict");
    assert_eq!(body["message"], "write conflict: /a/b");
    Ok(())
}

#[tokio::test]
async fn policy_ids_may_not_end_in_raw() -> Result<()> {
    let f = Fixture::new();
    let (status, body) = f.json("PUT", "/policies/foo/raw", "package foo\np = 1").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_parameter");
    assert_eq!(
        body["message"],
        "invalid policy id foo/raw: ids may not end in /raw"
    );
    f.expect("PUT", "/policies/foo/rawr", "package foo\np = 1", StatusCode::OK)
        .await?;
    Ok(())
}

// Delegates to an in-memory store but panics on selected operations.
struct PanickingStore {
    inner: InMemoryStore,
    on_read: bool,
}

#[async_trait::async_trait]
impl Store for PanickingStore {
    async fn begin(&self, params: TxnParams) -> Result<Transaction, StorageError> {
        self.inner.begin(params).await
    }

    fn read(&self, txn: &Transaction, path: &Path) -> Result<Value, StorageError> {
        if self.on_read {
            panic!("secret detail from read");
        }
        self.inner.read(txn, path)
    }

    fn write(
        &self,
        _txn: &mut Transaction,
        _op: PatchOp,
        _path: &Path,
        _value: Value,
    ) -> Result<(), StorageError> {
        panic!("secret detail from write");
    }

    fn make_dir(&self, txn: &mut Transaction, path: &Path) -> Result<(), StorageError> {
        self.inner.make_dir(txn, path)
    }

    fn commit(&self, txn: Transaction) -> Result<(), StorageError> {
        self.inner.commit(txn)
    }

    fn abort(&self, txn: Transaction) {
        self.inner.abort(txn)
    }
}

#[tokio::test]
async fn panics_become_internal_errors() -> Result<()> {
    let f = Fixture::with_store(Arc::new(PanickingStore {
        inner: InMemoryStore::new(),
        on_read: false,
    }));
    let (status, body) = f.call("PUT", "/data/x", "1").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.contains("secret"), "{body}");
    let body: JsonValue = serde_json::from_str(&body)?;
    assert_eq!(body, json!({"code": "internal_error", "message": "internal error"}));

    let f = Fixture::with_store(Arc::new(PanickingStore {
        inner: InMemoryStore::new(),
        on_read: true,
    }));
    let (status, body) = f.call("GET", "/data/x", "").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.contains("secret"), "{body}");
    let body: JsonValue = serde_json::from_str(&body)?;
    assert_eq!(body["code"], "internal_error");
    assert_eq!(body["message"], "internal error during evaluation");
    Ok(())
}
