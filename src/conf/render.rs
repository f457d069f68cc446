//! Serialization to the proxy's native configuration grammar.
//!
//! Output is a pure function of the context's contents and their insertion
//! order: identical build sequences produce byte-identical text.

use std::fmt::Write;

use crate::conf::{ContextBlock, Directive, MapDirective, Upstream, VirtualServer};

const INDENT: &str = "    ";
const HEADER: &str = "# Generated by gatehouse. Manual edits are overwritten.\n";

/// Render a whole context wrapped in its top-level block.
pub fn render_context(ctx: &ContextBlock) -> String {
    let mut out = String::from(HEADER);
    let _ = writeln!(out, "{} {{", ctx.kind().block_name());

    let mut sections: Vec<String> = Vec::new();

    if !ctx.variables().is_empty() {
        let mut section = String::new();
        for directive in ctx.variables() {
            write_directive(&mut section, 1, directive);
        }
        sections.push(section);
    }
    sections.extend(ctx.upstreams().map(render_upstream));
    sections.extend(ctx.maps().map(render_map));
    sections.extend(ctx.servers().iter().map(render_server));

    out.push_str(&sections.join("\n"));
    out.push_str("}\n");
    out
}

fn render_upstream(upstream: &Upstream) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{INDENT}upstream {} {{", upstream.name());
    for directive in upstream.directives() {
        write_directive(&mut out, 2, directive);
    }
    for target in upstream.servers() {
        write_line(&mut out, 2, &format!("server {target};"));
    }
    let _ = writeln!(out, "{INDENT}}}");
    out
}

fn render_map(map: &MapDirective) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{INDENT}map {} {} {{", map.source(), map.variable());
    for (key, value) in map.entries() {
        write_line(&mut out, 2, &format!("{} {};", quote(key), quote(value)));
    }
    if let Some(value) = map.default_value() {
        write_line(&mut out, 2, &format!("default {};", quote(value)));
    }
    let _ = writeln!(out, "{INDENT}}}");
    out
}

fn render_server(server: &VirtualServer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{INDENT}server {{");

    let listen = if server.is_default_server() {
        format!("listen {} default_server;", server.listen_port())
    } else {
        format!("listen {};", server.listen_port())
    };
    write_line(&mut out, 2, &listen);

    if let Some(name) = server.name() {
        write_line(&mut out, 2, &format!("server_name {};", quote(name)));
    }
    for directive in server.directives() {
        write_directive(&mut out, 2, directive);
    }
    for page in server.error_pages() {
        let codes: Vec<String> = page.codes.iter().map(u16::to_string).collect();
        write_line(
            &mut out,
            2,
            &format!("error_page {} {};", codes.join(" "), quote(&page.uri)),
        );
    }

    let _ = writeln!(out, "{INDENT}}}");
    out
}

/// Directive values may hold several tokens (`set $var 1`) and are emitted verbatim.
fn write_directive(out: &mut String, depth: usize, directive: &Directive) {
    if directive.value.is_empty() {
        write_line(out, depth, &format!("{};", directive.name));
    } else {
        write_line(out, depth, &format!("{} {};", directive.name, directive.value));
    }
}

fn write_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(line);
    out.push('\n');
}

/// Quote a token if the grammar would otherwise split or terminate it.
fn quote(token: &str) -> String {
    let needs_quotes = token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '"' | '\'' | '#'));
    if needs_quotes {
        format!("\"{}\"", token.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        token.to_string()
    }
}
