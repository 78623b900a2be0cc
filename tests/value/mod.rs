// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::Result;
use regoserve::*;

#[test]
fn non_string_key() -> Result<()> {
    let mut obj = Value::new_object();

    obj.as_object_mut()?.insert(Value::Null, Value::Null);
    obj.as_object_mut()?.insert(Value::Bool(false), Value::Null);
    obj.as_object_mut()?.insert(Value::from(1.5), Value::Null);
    obj.as_object_mut()?.insert(
        Value::from(vec![Value::Bool(true), Value::Null]),
        Value::Null,
    );
    obj.as_object_mut()?
        .insert(Value::from("key"), Value::from(1u64));

    assert_eq!(
        serde_json::to_string(&obj)?,
        r#"{"null":null,"false":null,"1.5":null,"key":1,"[true,null]":null}"#
    );
    Ok(())
}

#[test]
fn sets_serialize_as_sorted_arrays() -> Result<()> {
    let mut set = Value::new_set();
    set.as_set_mut()?.insert(Value::from("b"));
    set.as_set_mut()?.insert(Value::from(2u64));
    set.as_set_mut()?.insert(Value::from("a"));
    set.as_set_mut()?.insert(Value::from(2u64));
    assert_eq!(serde_json::to_string(&set)?, r#"[2,"a","b"]"#);
    Ok(())
}

#[test]
fn serialize_number() -> Result<()> {
    assert_eq!(serde_json::to_string_pretty(&Value::from(1.0))?, "1");
    assert_eq!(serde_json::to_string_pretty(&Value::from(-1.0))?, "-1");
    assert_eq!(serde_json::to_string_pretty(&Value::from(1.1))?, "1.1");
    assert_eq!(serde_json::to_string_pretty(&Value::from(-1.1))?, "-1.1");
    assert_eq!(Value::from(2u64), Value::from(2.0));
    Ok(())
}

#[test]
fn serialize_string() -> Result<()> {
    assert_eq!(
        Value::String("Hello, World\n".into()).to_json_str()?,
        "\"Hello, World\\n\""
    );
    Ok(())
}

#[test]
fn json_round_trip() -> Result<()> {
    let text = r#"{"a":[1,2.5,-3,null,true],"b":{"c":"d"},"e":{}}"#;
    let value = Value::from_json_str(text)?;
    assert_eq!(value.to_json_string(false)?, text);
    assert!(Value::from_json_str("{\"a\": }").is_err());
    Ok(())
}

#[test]
fn ordering_across_types() {
    let mut values = vec![
        Value::new_object(),
        Value::from("s"),
        Value::new_set(),
        Value::new_array(),
        Value::from(1u64),
        Value::Bool(false),
        Value::Null,
    ];
    values.sort();
    let names: Vec<&str> = values.iter().map(|v| v.type_name()).collect();
    assert_eq!(
        names,
        vec!["null", "boolean", "number", "string", "array", "set", "object"]
    );
}

#[test]
fn paths() -> Result<()> {
    let value = Value::from_json_str(r#"{"a": {"b": [10, {"c": 3}]}}"#)?;
    assert_eq!(value.get_path(&["a", "b", "0"]), Some(&Value::from(10u64)));
    assert_eq!(value.get_path(&["a", "b", "1", "c"]), Some(&Value::from(3u64)));
    assert_eq!(value.get_path(&["a", "b", "01"]), None);
    assert_eq!(value.get_path(&["a", "x"]), None);
    assert_eq!(value["a"]["b"][0usize], Value::from(10u64));
    assert_eq!(value["missing"], Value::Undefined);
    Ok(())
}

#[test]
fn merge() -> Result<()> {
    let mut value = Value::from_json_str(r#"{"a": {"b": 1}}"#)?;
    value.merge(Value::from_json_str(r#"{"a": {"c": 2}, "d": 3}"#)?)?;
    assert_eq!(value, Value::from_json_str(r#"{"a": {"b": 1, "c": 2}, "d": 3}"#)?);

    assert!(value.merge(Value::from_json_str(r#"{"d": 4}"#)?).is_err());
    Ok(())
}

#[test]
fn api() -> Result<()> {
    assert!(Value::from_json_str("{}")?.as_object()?.is_empty());
    assert!(Value::from_json_str("{}")?.is_empty_object());
    assert!(Value::Undefined.as_object().is_err());
    assert!(Value::Null.as_set().is_err());
    assert!(Value::from("abc").as_array().is_err());
    assert!(Value::new_object().as_number().is_err());
    assert!(Value::from(5.6).as_bool().is_err());
    assert!(*Value::from(true).as_bool()?);
    Ok(())
}
