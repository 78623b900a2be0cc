// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(test)]

use anyhow::{bail, Result};
use regoserve::unstable::*;

fn tokens(contents: &str) -> Result<Vec<Token>> {
    let source = Source::from_contents("test.rego".to_string(), contents.to_string())?;
    let mut lexer = Lexer::new(&source);
    let mut tokens = vec![];
    loop {
        let tok = lexer.next_token()?;
        let done = tok.0 == TokenKind::Eof;
        tokens.push(tok);
        if done {
            break;
        }
    }
    Ok(tokens)
}

fn texts(tokens: &[Token]) -> Vec<&str> {
    tokens.iter().map(|t| t.1.text()).collect()
}

#[test]
fn rule_tokens() -> Result<()> {
    let toks = tokens("p[x] :- q[x], x >= 1")?;
    assert_eq!(
        texts(&toks),
        vec!["p", "[", "x", "]", ":-", "q", "[", "x", "]", ",", "x", ">=", "1", ""]
    );
    assert_eq!(toks[0].0, TokenKind::Ident);
    assert_eq!(toks[4].0, TokenKind::Symbol);
    assert_eq!(toks[12].0, TokenKind::Number);
    assert_eq!(toks[13].0, TokenKind::Eof);
    Ok(())
}

#[test]
fn token_locations() -> Result<()> {
    let toks = tokens("package a\n\n  p = \"hello\"\n")?;
    let p = &toks[2];
    assert_eq!((p.1.line, p.1.col), (3, 3));
    let s = &toks[4];
    assert_eq!(s.0, TokenKind::String);
    assert_eq!(s.1.text(), "hello");
    assert_eq!((s.1.line, s.1.col), (3, 8));
    Ok(())
}

#[test]
fn comments_and_separators() -> Result<()> {
    let toks = tokens("p :- true; # trailing comment\nq != -1")?;
    assert_eq!(
        texts(&toks),
        vec!["p", ":-", "true", ";", "q", "!=", "-1", ""]
    );
    assert_eq!(toks[6].0, TokenKind::Number);
    Ok(())
}

#[test]
fn rules_split_across_lines() -> Result<()> {
    let toks = tokens("p :-\r\n  q[x],\n  x <= 2; r = {\"k\": [1]}")?;
    assert_eq!(
        texts(&toks),
        vec![
            "p", ":-", "q", "[", "x", "]", ",", "x", "<=", "2", ";", "r", "=", "{", "k", ":",
            "[", "1", "]", "}", ""
        ]
    );
    let le = &toks[8];
    assert_eq!((le.1.line, le.1.col), (3, 5));
    Ok(())
}

#[test]
fn string_escapes() -> Result<()> {
    let toks = tokens(r#"x = "a\"b\u00e9""#)?;
    assert_eq!(toks[2].0, TokenKind::String);
    assert_eq!(toks[2].1.text(), r#"a\"b\u00e9"#);
    assert!(tokens(r#"x = "\q""#).is_err());
    assert!(tokens(r#"x = "\u12g4""#).is_err());
    Ok(())
}

#[test]
fn invalid_character_is_located() -> Result<()> {
    let err = match tokens("p :-\n  q @ r") {
        Ok(_) => bail!("lexing should fail"),
        Err(e) => e,
    };
    let Some(e) = err.downcast_ref::<SourceError>() else {
        bail!("expected a located error, got {err}");
    };
    assert_eq!(e.file, "test.rego");
    assert_eq!((e.line, e.col), (2, 5));
    assert_eq!(e.message, "invalid character");
    assert!(err.to_string().contains("--> test.rego:2:5"));
    Ok(())
}

#[test]
fn numbers() -> Result<()> {
    let toks = tokens("0 -12 3.25 1e3 -2.5E-2")?;
    assert!(toks[..5].iter().all(|t| t.0 == TokenKind::Number));
    assert_eq!(texts(&toks[..5]), vec!["0", "-12", "3.25", "1e3", "-2.5E-2"]);

    assert!(tokens("x = 1x").is_err());
    assert!(tokens("x = 1.5.3").is_err());
    assert!(tokens("x = 01").is_err());
    assert!(tokens("x = 1e").is_err());
    Ok(())
}

#[test]
fn unterminated_strings() {
    assert!(tokens("x = \"abc").is_err());
    assert!(tokens("x = \"a\nbc\"").is_err());
    // Backquoted strings are not part of the language.
    assert!(tokens("x = `abc`").is_err());
}
