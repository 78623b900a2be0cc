// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::query::run_query;
use super::Params;
use crate::server::types::ResponseV1;
use crate::server::AppState;

use axum::extract::{Query, State};
use axum::response::Html;

const HEADER: &str = r#"<!DOCTYPE html>
<html>
<head><title>regoserve</title></head>
<body>
<h1>regoserve</h1>
<form method="GET" action="/">
<p>Query:</p>
"#;

const FOOTER: &str = r#"<p><select name="explain">
<option value="off">explain: off</option>
<option value="full">explain: full</option>
<option value="truth">explain: truth</option>
</select></p>
<input type="submit" value="Evaluate">
</form>
"#;

/// Escape `text` for use in HTML element content and quoted attributes.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Query form. When `q` is given the query is evaluated and its result
/// rendered below the form.
pub async fn index(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Html<String> {
    let params = Params::from_pairs(pairs);
    let q = params.q.clone().unwrap_or_default();

    let mut page = String::from(HEADER);
    page.push_str(&format!(
        "<textarea name=\"q\" rows=\"4\" cols=\"60\">{}</textarea>\n",
        escape(&q)
    ));
    page.push_str(FOOTER);

    if !q.trim().is_empty() {
        let rendered = match run_query(&state, &q, params.explain).await {
            Ok(evaluation) => {
                let bindings: Vec<_> = evaluation.results.iter().map(|r| &r.bindings).collect();
                serde_json::to_string_pretty(&ResponseV1::result(bindings))
                    .unwrap_or_else(|e| e.to_string())
            }
            Err(e) => serde_json::to_string_pretty(&e.body()).unwrap_or_else(|_| e.to_string()),
        };
        page.push_str("<h2>Query result</h2>\n<pre>");
        page.push_str(&escape(&rendered));
        page.push_str("</pre>\n");
    }

    page.push_str("</body>\n</html>\n");
    Html(page)
}
