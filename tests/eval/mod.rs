// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::{anyhow, bail, Result};
use regoserve::storage::TxnParams;
use regoserve::*;
use serde::Deserialize;
use test_generator::test_resources;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TestCase {
    note: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    input: Option<Value>,
    modules: Vec<String>,
    path: String,
    #[serde(default)]
    want_result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

// The document at `path`, encoded the way the data API reports it:
// "#undefined" when no rule or base document produces a value.
fn eval_case(case: &TestCase) -> Result<Value> {
    let store = match &case.data {
        Some(data) => InMemoryStore::from_value(data.clone()),
        None => InMemoryStore::new(),
    };

    let policies = PolicyManager::new();
    for (idx, module) in case.modules.iter().enumerate() {
        policies
            .put(&format!("module_{idx}"), module)
            .map_err(|e| match &e {
                PolicyError::Parse(errors) | PolicyError::Compile(errors) => anyhow!(
                    "{e}: {}",
                    errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
                _ => anyhow!("{e}"),
            })?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let txn = runtime.block_on(store.begin(TxnParams::read()))?;
    let snapshot = policies.snapshot();

    let segments: Vec<&str> = case.path.split('/').filter(|s| !s.is_empty()).collect();
    let query = RootQuery::data(&segments, None)?;
    let results = Evaluator::new(snapshot.compiled(), &store, &txn)
        .with_input(case.input.clone().unwrap_or(Value::Undefined))
        .eval(&query)?;
    store.abort(txn);

    Ok(match results.first() {
        Some(result) => result.value.clone(),
        None => Value::from("#undefined"),
    })
}

fn yaml_test_impl(file: &str) -> Result<()> {
    let yaml_str = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml_str)?;

    println!("running {file}");

    for case in test.cases {
        print!("case {} ", case.note);
        match (&case.want_result, &case.error) {
            (Some(_), None) | (None, Some(_)) => (),
            _ => bail!("either want_result or error must be specified in test case."),
        }

        match (eval_case(&case), &case.want_result, &case.error) {
            (Ok(actual), Some(expected), _) => {
                let actual = serde_json::to_value(&actual)?;
                let expected = serde_json::to_value(expected)?;
                if actual != expected {
                    bail!(
                        "{}: mismatch\nleft  = {}\nright = {}",
                        case.note,
                        serde_json::to_string_pretty(&actual)?,
                        serde_json::to_string_pretty(&expected)?
                    );
                }
            }
            (Ok(actual), None, _) => {
                bail!("{}: eval succeeded with {actual} but an error was expected", case.note)
            }
            (Err(actual), _, Some(expected)) => {
                let actual = actual.to_string();
                if !actual.contains(expected.as_str()) {
                    bail!(
                        "{}: error message\n`{actual}`\ndoes not contain `{expected}`",
                        case.note
                    );
                }
            }
            (Err(actual), _, None) => return Err(actual.context(case.note)),
        }

        println!("passed");
    }

    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // If Err is returned, it doesn't always get printed by cargo test.
            // Therefore, panic with the error.
            panic!("{}", e);
        }
    }
}

#[test_resources("tests/eval/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn cancelled_evaluation_stops() -> Result<()> {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    let store = InMemoryStore::new();
    let policies = PolicyManager::new();
    policies.put("m", "package m\np :- true")?;

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let txn = runtime.block_on(store.begin(TxnParams::read()))?;
    let snapshot = policies.snapshot();
    let query = RootQuery::data(&["m", "p"], None)?;

    let flag = Arc::new(AtomicBool::new(false));
    let results = Evaluator::new(snapshot.compiled(), &store, &txn)
        .with_cancel(flag.clone())
        .eval(&query)?;
    assert_eq!(results.len(), 1);

    flag.store(true, std::sync::atomic::Ordering::Relaxed);
    let err = Evaluator::new(snapshot.compiled(), &store, &txn)
        .with_cancel(flag)
        .eval(&query)
        .err();
    store.abort(txn);

    assert!(matches!(err, Some(EvalError::Cancelled)), "{err:?}");
    Ok(())
}
