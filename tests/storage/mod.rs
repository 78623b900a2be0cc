// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use std::time::Duration;

use anyhow::Result;
use regoserve::storage::{PatchOp, Path, StorageError, TxnParams};
use regoserve::*;

fn json(s: &str) -> Value {
    Value::from_json_str(s).unwrap()
}

async fn apply(store: &InMemoryStore, patches: &[(PatchOp, &str, Value)]) -> Result<()> {
    let mut txn = store.begin(TxnParams::write(Path::root())).await?;
    for (op, path, value) in patches {
        store.write(&mut txn, *op, &Path::from_patch(path)?, value.clone())?;
    }
    store.commit(txn)?;
    Ok(())
}

async fn root(store: &InMemoryStore) -> Result<Value> {
    let txn = store.begin(TxnParams::read()).await?;
    let value = store.read(&txn, &Path::root())?;
    store.abort(txn);
    Ok(value)
}

#[tokio::test]
async fn disjoint_patches_commute() -> Result<()> {
    let initial = r#"{"a": {"x": 1}, "b": [1, 2]}"#;
    let p1 = (PatchOp::Replace, "/a/x", Value::from(10u64));
    let p2 = (PatchOp::Add, "/b/-", Value::from(3u64));

    let first = InMemoryStore::from_json_str(initial)?;
    apply(&first, &[p1.clone()]).await?;
    apply(&first, &[p2.clone()]).await?;

    let second = InMemoryStore::from_json_str(initial)?;
    apply(&second, &[p2]).await?;
    apply(&second, &[p1]).await?;

    assert_eq!(root(&first).await?, root(&second).await?);
    assert_eq!(root(&first).await?, json(r#"{"a": {"x": 10}, "b": [1, 2, 3]}"#));
    Ok(())
}

#[tokio::test]
async fn array_patches() -> Result<()> {
    let store = InMemoryStore::from_json_str(r#"{"x": {"y": [{"z": [1, 2, 3]}, {"z": [4, 5, 6]}]}}"#)?;
    apply(&store, &[(PatchOp::Add, "/x/y/1/z/1", Value::from(100u64))]).await?;
    apply(&store, &[(PatchOp::Remove, "/x/y/0/z/0", Value::Null)]).await?;
    apply(&store, &[(PatchOp::Replace, "/x/y/0/z/1", Value::from(30u64))]).await?;
    assert_eq!(
        root(&store).await?,
        json(r#"{"x": {"y": [{"z": [2, 30]}, {"z": [4, 100, 5, 6]}]}}"#)
    );

    let err = apply(&store, &[(PatchOp::Replace, "/x/y/5", Value::Null)])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::NotFound(_))
    ));

    let err = apply(&store, &[(PatchOp::Add, "/x/y/a", Value::Null)])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::InvalidPatch(_))
    ));
    Ok(())
}

#[tokio::test]
async fn failed_patch_set_leaves_no_trace() -> Result<()> {
    let store = InMemoryStore::from_json_str(r#"{"a": 1}"#)?;
    let result = apply(
        &store,
        &[
            (PatchOp::Add, "/b", Value::from(2u64)),
            (PatchOp::Remove, "/missing", Value::Null),
        ],
    )
    .await;
    assert!(result.is_err());
    assert_eq!(root(&store).await?, json(r#"{"a": 1}"#));
    Ok(())
}

#[tokio::test]
async fn readers_see_their_snapshot() -> Result<()> {
    let store = InMemoryStore::from_json_str(r#"{"a": 1}"#)?;
    let reader = store.begin(TxnParams::read()).await?;
    apply(&store, &[(PatchOp::Replace, "/a", Value::from(2u64))]).await?;

    assert_eq!(store.read(&reader, &Path::new(&["a"]))?, Value::from(1u64));
    store.abort(reader);
    assert_eq!(root(&store).await?, json(r#"{"a": 2}"#));
    Ok(())
}

#[tokio::test]
async fn dropped_transactions_release_their_lease() -> Result<()> {
    let store = InMemoryStore::new();
    let path = Path::new(&["a"]);
    {
        let mut txn = store.begin(TxnParams::write(path.clone())).await?;
        store.write(&mut txn, PatchOp::Add, &path, Value::from(1u64))?;
    }

    let txn = tokio::time::timeout(
        Duration::from_secs(5),
        store.begin(TxnParams::write(path.clone())),
    )
    .await??;
    assert!(matches!(
        store.read(&txn, &path),
        Err(StorageError::NotFound(_))
    ));
    store.abort(txn);
    Ok(())
}

#[tokio::test]
async fn make_dir_reports_the_conflicting_prefix() -> Result<()> {
    let store = InMemoryStore::from_json_str(r#"{"a": {"b": [1, 2, 3, 4]}}"#)?;
    let path = Path::new(&["a", "b", "c", "d"]);
    let mut txn = store.begin(TxnParams::write(path.clone())).await?;
    let err = store
        .make_dir(&mut txn, &path.parent().unwrap_or_default())
        .unwrap_err();
    assert_eq!(err, StorageError::WriteConflict(Path::new(&["a", "b"])));
    assert_eq!(err.to_string(), "write conflict: /a/b");
    store.abort(txn);
    Ok(())
}

#[tokio::test]
async fn root_must_stay_an_object() -> Result<()> {
    let store = InMemoryStore::new();
    let err = apply(&store, &[(PatchOp::Replace, "/", json("[1]"))])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("root must be object"));
    assert!(InMemoryStore::from_json_str("[1, 2]").is_err());
    Ok(())
}

#[tokio::test]
async fn non_empty_paths() -> Result<()> {
    let store = InMemoryStore::from_json_str(r#"{"a": {"b": 1, "c": {}}, "s": "x"}"#)?;
    let txn = store.begin(TxnParams::read()).await?;
    let non_empty = |p: &[&str]| store.non_empty(&txn, &Path::new(p));

    assert!(non_empty(&["a", "b"])?);
    assert!(non_empty(&["a", "c"])?);
    // Below a scalar the data would be hidden.
    assert!(non_empty(&["a", "b", "x"])?);
    assert!(non_empty(&["s", "t", "u"])?);
    // Missing keys under objects are free.
    assert!(!non_empty(&["a", "d"])?);
    assert!(!non_empty(&["a", "c", "d", "e"])?);
    assert!(!non_empty(&["z", "y"])?);
    store.abort(txn);
    Ok(())
}
