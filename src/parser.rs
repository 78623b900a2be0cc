// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::lexer::*;
use crate::number::Number;
use crate::value::Value;

use core::str::FromStr;
use std::collections::BTreeMap;

use anyhow::Result;

const KEYWORDS: [&str; 7] = ["as", "false", "import", "not", "null", "package", "true"];

pub struct Parser<'source> {
    source: Source,
    lexer: Lexer<'source>,
    tok: Token,
    end: u32,
    wildcards: u32,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source Source) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let tok = lexer.next_token()?;
        Ok(Self {
            source: source.clone(),
            lexer,
            tok,
            end: 0,
            wildcards: 0,
        })
    }

    pub fn token_text(&self) -> &str {
        match self.tok.0 {
            TokenKind::Symbol | TokenKind::Number | TokenKind::Ident | TokenKind::Eof => {
                self.tok.1.text()
            }
            TokenKind::String => "",
        }
    }

    fn next_token(&mut self) -> Result<()> {
        self.end = self.tok.1.end;
        self.tok = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, text: &str, context: &str) -> Result<()> {
        if self.token_text() == text {
            self.next_token()
        } else {
            let msg = format!("expecting `{text}` {context}");
            Err(self.source.error(self.tok.1.line, self.tok.1.col, &msg))
        }
    }

    fn unexpected(&self, context: &str) -> anyhow::Error {
        let found = match self.tok.0 {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::String => "string".to_string(),
            _ => format!("`{}`", self.tok.1.text()),
        };
        self.source.error(
            self.tok.1.line,
            self.tok.1.col,
            &format!("unexpected {found} {context}"),
        )
    }

    fn is_keyword(ident: &str) -> bool {
        KEYWORDS.contains(&ident)
    }

    // A `.` or `[` continues a ref only when it directly follows the previous token.
    fn is_adjacent(&self) -> bool {
        self.tok.1.start == self.end
    }

    fn span_from(&self, start: &Span) -> Span {
        let mut span = start.clone();
        span.end = self.end.max(start.end);
        span
    }

    fn parse_var_name(&mut self, context: &str) -> Result<(Span, Var)> {
        let span = self.tok.1.clone();
        if self.tok.0 != TokenKind::Ident || Self::is_keyword(span.text()) {
            return Err(self.unexpected(context));
        }
        self.next_token()?;
        let name = match span.text() {
            "_" => {
                self.wildcards += 1;
                format!("$_{}", self.wildcards).into()
            }
            t => t.into(),
        };
        Ok((span, name))
    }

    fn parse_scalar(&mut self) -> Result<Option<Term>> {
        let span = self.tok.1.clone();
        let value = match (&self.tok.0, span.text()) {
            (TokenKind::Number, text) => match Number::from_str(text) {
                Ok(n) => Value::from(n),
                Err(_) => return Err(span.error("invalid number")),
            },
            (TokenKind::String, _) => {
                let raw = &self.source.contents()[span.start as usize - 1..span.end as usize + 1];
                match serde_json::from_str::<String>(raw) {
                    Ok(s) => Value::from(s),
                    Err(e) => return Err(span.error(&format!("invalid string: {e}"))),
                }
            }
            (TokenKind::Ident, "null") => Value::Null,
            (TokenKind::Ident, "true") => Value::Bool(true),
            (TokenKind::Ident, "false") => Value::Bool(false),
            _ => return Ok(None),
        };
        self.next_token()?;
        Ok(Some(Term::scalar(span, value)))
    }

    fn parse_array(&mut self) -> Result<Term> {
        let start = self.tok.1.clone();
        self.expect("[", "to start array")?;
        let mut items = vec![];
        while self.token_text() != "]" {
            items.push(self.parse_term()?);
            if self.token_text() != "," {
                break;
            }
            self.next_token()?;
        }
        self.expect("]", "to close array")?;
        Ok(Term::Array {
            span: self.span_from(&start),
            items,
        })
    }

    fn parse_object(&mut self) -> Result<Term> {
        let start = self.tok.1.clone();
        self.expect("{", "to start object")?;
        let mut fields = vec![];
        while self.token_text() != "}" {
            let key = self.parse_term()?;
            self.expect(":", "after object key")?;
            let value = self.parse_term()?;
            fields.push((key, value));
            if self.token_text() != "," {
                break;
            }
            self.next_token()?;
        }
        self.expect("}", "to close object")?;
        Ok(Term::Object {
            span: self.span_from(&start),
            fields,
        })
    }

    fn parse_var_or_ref(&mut self) -> Result<Term> {
        let (start, head) = self.parse_var_name("expecting term")?;
        let mut path = vec![];
        loop {
            match self.token_text() {
                "." if self.is_adjacent() => {
                    self.next_token()?;
                    let field = self.tok.1.clone();
                    if self.tok.0 != TokenKind::Ident || !self.is_adjacent() {
                        return Err(self.unexpected("expecting field name after `.`"));
                    }
                    self.next_token()?;
                    path.push(Term::scalar(field.clone(), Value::from(field.text())));
                }
                "[" if self.is_adjacent() => {
                    self.next_token()?;
                    path.push(self.parse_term()?);
                    self.expect("]", "to close reference index")?;
                }
                _ => break,
            }
        }

        let span = self.span_from(&start);
        if path.is_empty() {
            Ok(Term::Var { span, name: head })
        } else {
            Ok(Term::Ref { span, head, path })
        }
    }

    pub fn parse_term(&mut self) -> Result<Term> {
        if let Some(scalar) = self.parse_scalar()? {
            return Ok(scalar);
        }
        match self.token_text() {
            "[" => self.parse_array(),
            "{" => self.parse_object(),
            _ if self.tok.0 == TokenKind::Ident => self.parse_var_or_ref(),
            _ => Err(self.unexpected("expecting term")),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Term>> {
        self.expect("(", "to start call arguments")?;
        let mut args = vec![];
        while self.token_text() != ")" {
            args.push(self.parse_term()?);
            if self.token_text() != "," {
                break;
            }
            self.next_token()?;
        }
        self.expect(")", "to close call arguments")?;
        Ok(args)
    }

    fn parse_literal(&mut self, index: usize) -> Result<Ref<Expr>> {
        let start = self.tok.1.clone();
        let negated = self.token_text() == "not" && self.tok.0 == TokenKind::Ident;
        if negated {
            self.next_token()?;
        }

        let kind = if self.tok.0 == TokenKind::Ident
            && !Self::is_keyword(self.tok.1.text())
            && self.lexer.clone().next_token()?.1.text() == "("
        {
            let (_, op) = self.parse_var_name("expecting function name")?;
            if !self.is_adjacent() {
                return Err(self.unexpected("expecting `(` directly after function name"));
            }
            ExprKind::Call {
                op,
                args: self.parse_call_args()?,
            }
        } else {
            let lhs = self.parse_term()?;
            let op = INFIX_OPS
                .iter()
                .find(|(sym, _)| self.tok.0 == TokenKind::Symbol && *sym == self.token_text())
                .map(|(_, name)| *name);
            match op {
                Some(name) => {
                    self.next_token()?;
                    let rhs = self.parse_term()?;
                    ExprKind::Call {
                        op: name.into(),
                        args: vec![lhs, rhs],
                    }
                }
                None => ExprKind::Term(lhs),
            }
        };

        Ok(Ref::new(Expr {
            span: self.span_from(&start),
            index,
            negated,
            kind,
        }))
    }

    /// Parse comma separated literals.
    pub fn parse_body(&mut self) -> Result<Query> {
        let start = self.tok.1.clone();
        let mut exprs = vec![self.parse_literal(0)?];
        while self.token_text() == "," {
            self.next_token()?;
            exprs.push(self.parse_literal(exprs.len())?);
        }
        Ok(Query {
            span: self.span_from(&start),
            exprs,
        })
    }

    /// Parse a standalone query such as the `q` parameter of an ad-hoc query.
    pub fn parse_query(&mut self) -> Result<Query> {
        if self.tok.0 == TokenKind::Eof {
            return Err(self.unexpected("expecting query"));
        }
        let query = self.parse_body()?;
        while self.token_text() == ";" {
            self.next_token()?;
        }
        if self.tok.0 != TokenKind::Eof {
            return Err(self.unexpected("after query"));
        }
        Ok(query)
    }

    /// Parse a single term that must span the whole source.
    pub fn parse_standalone_term(&mut self) -> Result<Term> {
        let term = self.parse_term()?;
        if self.tok.0 != TokenKind::Eof {
            return Err(self.unexpected("after term"));
        }
        Ok(term)
    }

    fn true_body(span: &Span) -> Query {
        Query {
            span: span.clone(),
            exprs: vec![Ref::new(Expr {
                span: span.clone(),
                index: 0,
                negated: false,
                kind: ExprKind::Term(Term::scalar(span.clone(), Value::Bool(true))),
            })],
        }
    }

    fn parse_rule(&mut self) -> Result<Rule> {
        let (name_span, name) = self.parse_var_name("expecting rule")?;
        if crate::ast::is_generated(&name) {
            return Err(name_span.error("rule name cannot be `_`"));
        }

        let key = match self.token_text() {
            "[" if self.is_adjacent() => {
                self.next_token()?;
                let key = self.parse_term()?;
                self.expect("]", "to close rule key")?;
                Some(key)
            }
            _ => None,
        };

        let value = match self.token_text() {
            "=" => {
                self.next_token()?;
                Some(self.parse_term()?)
            }
            _ if key.is_none() => Some(Term::scalar(name_span.clone(), Value::Bool(true))),
            _ => None,
        };

        let body = match self.token_text() {
            ":-" => {
                self.next_token()?;
                self.parse_body()?
            }
            _ => Self::true_body(&name_span),
        };

        Ok(Rule {
            span: self.span_from(&name_span),
            name,
            key,
            value,
            body,
        })
    }

    fn parse_path(&mut self, context: &str) -> Result<(Span, Vec<Var>)> {
        let start = self.tok.1.clone();
        let mut path = vec![];
        let (_, first) = self.parse_var_name(context)?;
        path.push(first);
        while self.token_text() == "." && self.is_adjacent() {
            self.next_token()?;
            let (_, part) = self.parse_var_name(context)?;
            path.push(part);
        }
        Ok((self.span_from(&start), path))
    }

    fn parse_package(&mut self) -> Result<Package> {
        let start = self.tok.1.clone();
        if self.tok.0 == TokenKind::Eof {
            return Err(start.error("empty module"));
        }
        self.expect("package", "at start of module")?;
        let (_, path) = self.parse_path("expecting package path")?;
        Ok(Package {
            span: self.span_from(&start),
            path,
        })
    }

    fn parse_import(&mut self) -> Result<Import> {
        let start = self.tok.1.clone();
        self.expect("import", "")?;
        let path = self.parse_var_or_ref()?;
        let root = match &path {
            Term::Ref { head, .. } => head.clone(),
            Term::Var { name, .. } => name.clone(),
            _ => return Err(path.span().error("invalid import path")),
        };
        if root.as_ref() != DATA && root.as_ref() != INPUT {
            return Err(path
                .span()
                .error("import path must begin with `data` or `input`"));
        }
        let alias = match self.token_text() {
            "as" => {
                self.next_token()?;
                let (span, alias) = self.parse_var_name("expecting import alias")?;
                if is_generated(&alias) {
                    return Err(span.error("import alias cannot be `_`"));
                }
                Some(alias)
            }
            _ => None,
        };
        Ok(Import {
            span: self.span_from(&start),
            path,
            alias,
        })
    }

    pub fn parse(&mut self) -> Result<Module> {
        let package = self.parse_package()?;

        let mut imports = vec![];
        let mut aliases = BTreeMap::new();
        while self.token_text() == "import" {
            let import = self.parse_import()?;
            if let Some(name) = import.name() {
                if aliases.insert(name.clone(), ()).is_some() {
                    return Err(import
                        .span
                        .error(&format!("import `{name}` shadows a previous import")));
                }
            }
            imports.push(import);
        }

        let mut rules = vec![];
        loop {
            while self.token_text() == ";" {
                self.next_token()?;
            }
            if self.tok.0 == TokenKind::Eof {
                break;
            }
            rules.push(Ref::new(self.parse_rule()?));
        }

        Ok(Module {
            package,
            imports,
            rules,
        })
    }
}

/// Parse a module held in memory. `file` names the module in error locations.
pub fn parse_module(file: &str, contents: &str) -> Result<Module> {
    let source = Source::from_contents(file.to_string(), contents.to_string())?;
    let mut parser = Parser::new(&source)?;
    parser.parse()
}

pub fn parse_query(file: &str, contents: &str) -> Result<Query> {
    let source = Source::from_contents(file.to_string(), contents.to_string())?;
    let mut parser = Parser::new(&source)?;
    parser.parse_query()
}

pub fn parse_term(file: &str, contents: &str) -> Result<Term> {
    let source = Source::from_contents(file.to_string(), contents.to_string())?;
    let mut parser = Parser::new(&source)?;
    parser.parse_standalone_term()
}
