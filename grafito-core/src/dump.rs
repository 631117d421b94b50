//! Self-describing `CREATE`-script dump/restore (spec §6).
//!
//! The dump is plain Cypher: every node becomes a `CREATE` carrying its
//! labels and properties plus a synthetic `_dump_id`, every relationship
//! becomes a `MATCH ... CREATE` keyed by the `_dump_id` of its endpoints,
//! and a trailing statement strips `_dump_id` back off. Restoring just runs
//! the script back through [`Session::execute`] one statement per line.

use grafito_model::{PropertyMap, Result, Value};

use crate::session::Session;

const DUMP_ID_KEY: &str = "_dump_id";

pub fn dump_script(session: &Session) -> Result<String> {
    let nodes = session.match_nodes(&[], &[])?;
    let rels = session.match_relationships(None, None, None)?;

    let mut script = String::new();
    for node in &nodes {
        script.push_str("CREATE (n");
        for label in &node.labels {
            script.push(':');
            script.push_str(label);
        }
        script.push_str(" {");
        render_properties(&mut script, &node.properties, node.id.0);
        script.push_str("})\n");
    }

    for rel in &rels {
        script.push_str(&format!(
            "MATCH (a {{{DUMP_ID_KEY}: {}}}), (b {{{DUMP_ID_KEY}: {}}}) CREATE (a)-[:{}{{",
            rel.source.0, rel.target.0, rel.rel_type,
        ));
        render_property_pairs(&mut script, &rel.properties);
        script.push_str("}]->(b)\n");
    }

    script.push_str("MATCH (n) REMOVE n._dump_id\n");
    Ok(script)
}

/// Restores a dump produced by [`dump_script`], one statement per line;
/// blank lines are skipped. When `clear_existing` is set every node (and,
/// transitively via `ON DELETE CASCADE`, every relationship) is deleted
/// before the script runs.
pub fn restore_script(session: &Session, script: &str, clear_existing: bool) -> Result<()> {
    if clear_existing {
        for node in session.match_nodes(&[], &[])? {
            session.delete_node(node.id)?;
        }
    }
    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        session.execute(line, &Default::default())?;
    }
    Ok(())
}

fn render_properties(out: &mut String, properties: &PropertyMap, dump_id: i64) {
    render_property_pairs(out, properties);
    if !properties.is_empty() {
        out.push_str(", ");
    }
    out.push_str(&format!("{DUMP_ID_KEY}: {dump_id}"));
}

fn render_property_pairs(out: &mut String, properties: &PropertyMap) {
    for (i, (key, value)) in properties.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&cypher_literal(value));
    }
}

fn cypher_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => quote_string(s),
        Value::List(items) => {
            let rendered: Vec<String> = items.iter().map(cypher_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Map(m) => {
            let mut inner = String::new();
            render_property_pairs(&mut inner, m);
            format!("{{{inner}}}")
        }
        Value::Date(d) => format!("date({})", quote_string(&d.to_string())),
        Value::Time(t) | Value::LocalTime(t) => format!("time({})", quote_string(&t.to_string())),
        Value::DateTime(dt) => format!("datetime({})", quote_string(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Value::LocalDateTime(dt) => format!("localdatetime({})", quote_string(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Value::Duration(d) => format!(
            "duration({})",
            quote_string(&format!("P{}M{}DT{}.{:09}S", d.months, d.days, d.seconds, d.nanos))
        ),
        Value::Point(p) => match p.z {
            Some(z) => format!("point({{x: {}, y: {}, z: {}}})", p.x, p.y, z),
            None => format!("point({{x: {}, y: {}}})", p.x, p.y),
        },
    }
}

/// The lexer reads string literals verbatim up to the matching quote with
/// no escape handling, so a literal containing `'` must be quoted with `"`
/// and vice versa; a value containing both is not round-trippable and
/// falls back to `"`.
fn quote_string(s: &str) -> String {
    if s.contains('\'') {
        format!("\"{s}\"")
    } else {
        format!("'{s}'")
    }
}
