// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::{bail, Result};
use regoserve::unstable::*;

const TEST_MOD: &str = r#"package testmod
                p[x] :- q[x], not r[x]
                q[x] :- data.x.y[i] = x
                r[x] :- data.x.z[i] = x"#;

fn parse_error(contents: &str) -> Result<SourceError> {
    match parse_module("test", contents) {
        Ok(m) => bail!("parse should fail, got {} rules", m.rules.len()),
        Err(e) => match e.downcast_ref::<SourceError>() {
            Some(e) => Ok(e.clone()),
            None => bail!("expected a located error, got {e}"),
        },
    }
}

#[test]
fn rules_display_as_written() -> Result<()> {
    let module = parse_module("test", TEST_MOD)?;
    assert_eq!(module.package.path.len(), 1);
    assert_eq!(module.package.path[0].as_ref(), "testmod");

    let rules: Vec<String> = module.rules.iter().map(|r| r.to_string()).collect();
    assert_eq!(
        rules,
        vec![
            "p[x] :- q[x], not r[x]",
            "q[x] :- data.x.y[i] = x",
            "r[x] :- data.x.z[i] = x",
        ]
    );
    for rule in &module.rules {
        assert_eq!(rule.kind(), DocKind::PartialSet);
    }
    Ok(())
}

#[test]
fn rule_kinds() -> Result<()> {
    let module = parse_module(
        "test",
        "package a.b\nallow\nlimit = 10\nport[k] = v :- data.ports[k] = v; deny :- not allow",
    )?;
    let kinds: Vec<(String, DocKind)> = module
        .rules
        .iter()
        .map(|r| (r.name.to_string(), r.kind()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("allow".to_string(), DocKind::Complete),
            ("limit".to_string(), DocKind::Complete),
            ("port".to_string(), DocKind::PartialObject),
            ("deny".to_string(), DocKind::Complete),
        ]
    );
    assert_eq!(module.rules[0].to_string(), "allow = true :- true");
    assert_eq!(module.rules[1].to_string(), "limit = 10 :- true");
    Ok(())
}

#[test]
fn imports() -> Result<()> {
    let module = parse_module(
        "test",
        "package a\nimport data.servers\nimport input.user as u\np :- servers[_].name = u",
    )?;
    let names: Vec<String> = module
        .imports
        .iter()
        .filter_map(|i| i.name())
        .map(|n| n.to_string())
        .collect();
    assert_eq!(names, vec!["servers", "u"]);
    Ok(())
}

#[test]
fn import_must_be_rooted() -> Result<()> {
    let e = parse_error("package a\nimport foo.bar\np")?;
    assert_eq!(e.line, 2);
    assert!(e.message.contains("import path must begin with `data` or `input`"));
    Ok(())
}

#[test]
fn bad_rule_separator_is_located() -> Result<()> {
    let e = parse_error("\n    package a.b.c\n\n    p ;- true\n    ")?;
    assert_eq!(e.file, "test");
    assert_eq!((e.line, e.col), (4, 8));
    Ok(())
}

#[test]
fn empty_module() -> Result<()> {
    let e = parse_error("   \n # nothing here\n")?;
    assert_eq!(e.message, "empty module");
    Ok(())
}

#[test]
fn missing_package() -> Result<()> {
    let e = parse_error("p :- true")?;
    assert_eq!((e.line, e.col), (1, 1));
    assert!(e.message.contains("package"));
    Ok(())
}

#[test]
fn queries() -> Result<()> {
    let query = parse_query("query", "a = [1, 2, 3], a[i] = x")?;
    assert_eq!(query.exprs.len(), 2);
    assert_eq!(query.to_string(), "a = [1, 2, 3], a[i] = x");

    let query = parse_query("query", "count(data.servers, n), n > 1")?;
    assert_eq!(query.to_string(), "count(data.servers, n), n > 1");

    assert!(parse_query("query", "").is_err());
    assert!(parse_query("query", "x = 1 y").is_err());
    Ok(())
}

#[test]
fn standalone_terms() -> Result<()> {
    let term = parse_term("input", r#"{"a": [1, true, null], "b": data.x[i]}"#)?;
    assert_eq!(term.to_string(), r#"{"a": [1, true, null], "b": data.x[i]}"#);
    assert!(parse_term("input", "[1, 2").is_err());
    assert!(parse_term("input", "1 2").is_err());
    Ok(())
}
