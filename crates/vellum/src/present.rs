//! Error presentation: turning an engine failure into something the host
//! can serve.
//!
//! The decision is a small state machine over `(debug, is_page)`:
//!
//! |        | page                                   | fragment        |
//! |--------|----------------------------------------|-----------------|
//! | debug  | diagnostic page, status 500            | inline fragment |
//! | prod   | host error page, or re-raise unchanged | empty string    |
//!
//! Debug-mode failures are never silent. That trades information exposure
//! for developer feedback and is the documented policy, not an accident —
//! production mode stays quiet and leaves the final fallback to the host.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use minijinja::{context, AutoEscape, Value};
use tracing::warn;

use crate::environment::{Environment, Rendered};
use crate::error::RenderError;

/// The fixed layout behind the debug diagnostic page. Rendered by a
/// throwaway engine so a broken user environment can never recurse into
/// its own error page.
const DIAGNOSTIC_LAYOUT: &str = include_str!("errorpage.jinja");

/// Marker used in place of a template name for inline string renders.
const INLINE_MARKER: &str = "template string:";

/// Decides what an engine failure becomes, per the state machine above.
pub(crate) fn present(
    env: &Environment,
    err: minijinja::Error,
    is_page: bool,
    inline_source: Option<&str>,
) -> Result<Rendered, RenderError> {
    if !env.config.debug {
        if !is_page {
            warn!(error = %err, "template error swallowed in fragment render");
            return Ok(Rendered::empty());
        }
        if let Some(body) = env.host.render_error_page() {
            return Ok(Rendered::ok(body));
        }
        // No error page, or the host could not produce one: re-raise the
        // original failure and let the host's top-level fallback decide.
        return Err(RenderError::Engine(err));
    }

    let title = format!("{:?}", err.kind());
    let line = err.line().unwrap_or(1);
    let template_name = err.name().map(str::to_owned);
    let message = err.to_string();

    let (source, path): (String, Option<PathBuf>) = match inline_source {
        Some(source) => (source.to_string(), None),
        None => {
            let resolved = template_name
                .as_deref()
                .and_then(|name| env.paths.resolve(name));
            let source = resolved
                .as_deref()
                .and_then(|path| fs::read_to_string(path).ok())
                .unwrap_or_default();
            (source, resolved)
        }
    };

    if !is_page {
        let label = if inline_source.is_some() {
            INLINE_MARKER.to_string()
        } else {
            template_name.clone().unwrap_or_default()
        };
        let excerpt = source_excerpt(&source, line, 1, false);
        let mut body = String::new();
        let _ = write!(
            body,
            "<b>Error:</b> {title}, line {line} of {label}\n\
             <pre style=\"margin:0\">{excerpt}</pre>\n\
             &#10132; {message}<br>\n"
        );
        return Ok(Rendered::ok(body));
    }

    let location = path
        .map(|p| p.display().to_string())
        .or(template_name)
        .unwrap_or_else(|| INLINE_MARKER.trim_end_matches(':').to_string());
    let subtitle = format!("Line {line} of {location}");
    let code = source_excerpt(&source, line, 6, true);
    Ok(Rendered {
        body: diagnostic_page(&title, &subtitle, &message, &code),
        status: 500,
    })
}

fn diagnostic_page(title: &str, subtitle: &str, message: &str, code: &str) -> String {
    let mut layout = minijinja::Environment::new();
    layout.set_auto_escape_callback(|_| AutoEscape::Html);
    let ctx = context! {
        title => title,
        subtitle => subtitle,
        message => message,
        code => Value::from_safe_string(code.to_string()),
    };
    layout.render_str(DIAGNOSTIC_LAYOUT, ctx).unwrap_or_else(|err| {
        warn!(error = %err, "diagnostic layout failed to render");
        format!(
            "<h1>{}</h1><p>{}</p><p>{}</p>",
            html_escape(title),
            html_escape(subtitle),
            html_escape(message)
        )
    })
}

/// Extracts an escaped window of source lines around a failing line.
///
/// The window is `[max(1, line - radius), min(last, line + radius)]`, with
/// any line-ending style accepted. Formatted output wraps each line in an
/// element carrying its 1-based `data-line` number, the failing line in
/// `<mark>`, context lines in `<span>`.
pub(crate) fn source_excerpt(source: &str, line: usize, radius: usize, format: bool) -> String {
    if source.is_empty() {
        return String::new();
    }
    let escaped = html_escape(source);
    let lines = split_any_newline(&escaped);
    let line = line.max(1);
    let start = line.saturating_sub(radius).max(1);
    let end = (line + radius).min(lines.len());
    if start > lines.len() {
        return String::new();
    }

    let mut excerpt = Vec::with_capacity(end + 1 - start);
    for number in start..=end {
        let text = lines[number - 1];
        if format {
            if number == line {
                excerpt.push(format!("<mark data-line=\"{number}\">{text}</mark>"));
            } else {
                excerpt.push(format!("<span data-line=\"{number}\">{text}</span>"));
            }
        } else {
            excerpt.push(text.to_string());
        }
    }
    excerpt.join("\n")
}

/// Splits on `\r\n`, `\n` or `\r`.
fn split_any_newline(s: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&s[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&s[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&s[start..]);
    lines
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten";

    // =========================================================================
    // Excerpt extraction
    // =========================================================================

    #[test]
    fn test_excerpt_radius_one_unformatted() {
        let excerpt = source_excerpt(SOURCE, 5, 1, false);
        assert_eq!(excerpt, "four\nfive\nsix");
    }

    #[test]
    fn test_excerpt_clamps_at_start() {
        let excerpt = source_excerpt(SOURCE, 1, 2, false);
        assert_eq!(excerpt, "one\ntwo\nthree");
    }

    #[test]
    fn test_excerpt_clamps_at_end() {
        let excerpt = source_excerpt(SOURCE, 10, 3, false);
        assert_eq!(excerpt, "seven\neight\nnine\nten");
    }

    #[test]
    fn test_excerpt_formatted_marks_failing_line() {
        let excerpt = source_excerpt(SOURCE, 5, 1, true);
        assert_eq!(
            excerpt,
            "<span data-line=\"4\">four</span>\n\
             <mark data-line=\"5\">five</mark>\n\
             <span data-line=\"6\">six</span>"
        );
    }

    #[test]
    fn test_excerpt_escapes_markup() {
        let excerpt = source_excerpt("{{ a }}\n<b>{{ b }}</b>\ndone", 2, 0, false);
        assert_eq!(excerpt, "&lt;b&gt;{{ b }}&lt;/b&gt;");
    }

    #[test]
    fn test_excerpt_handles_mixed_line_endings() {
        let excerpt = source_excerpt("one\r\ntwo\rthree\nfour", 2, 1, false);
        assert_eq!(excerpt, "one\ntwo\nthree");
    }

    #[test]
    fn test_excerpt_empty_source() {
        assert_eq!(source_excerpt("", 5, 2, false), "");
    }

    #[test]
    fn test_excerpt_line_past_end_of_source() {
        assert_eq!(source_excerpt("only", 9, 2, false), "");
    }

    // =========================================================================
    // Diagnostic layout
    // =========================================================================

    #[test]
    fn test_diagnostic_page_escapes_fields_but_not_code() {
        let html = diagnostic_page(
            "SyntaxError",
            "Line 2 of <home>",
            "unexpected `}`",
            "<mark data-line=\"2\">bad</mark>",
        );
        assert!(html.contains("SyntaxError"));
        assert!(html.contains("Line 2 of &lt;home&gt;"));
        assert!(html.contains("<mark data-line=\"2\">bad</mark>"));
    }
}
