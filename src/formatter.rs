//! Permissive content formatter
//!
//! Node content is not necessarily a template, so substitution must never
//! fail: unknown names, positional indices, unknown conversions and
//! unsupported format specs all leave the placeholder in the output
//! untouched, braces included. `{{` and `}}` escape to literal braces.
//!
//! Implemented as a small streaming state machine over the template rather
//! than on top of `format!`, which has no notion of "leave it alone".

use serde_json::Value;

/// Named arguments for substitution.
pub type FormatArgs = serde_json::Map<String, Value>;

/// Format `template` against `args`, preserving unmatched placeholders
/// literally.
#[must_use]
pub fn format_content(template: &str, args: &FormatArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(i) = rest.find(['{', '}']) {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if tail.starts_with('}') {
            // A lone closing brace is not a placeholder.
            out.push('}');
            rest = &tail[1..];
        } else {
            match tail[1..].find(['{', '}']) {
                Some(j) if tail[1..].as_bytes()[j] == b'}' => {
                    let field = &tail[1..=j];
                    out.push_str(&render_field(field, args));
                    rest = &tail[j + 2..];
                }
                _ => {
                    // Unterminated opening brace; emit as-is.
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_field(field: &str, args: &FormatArgs) -> String {
    let (head, spec) = match field.find(':') {
        Some(i) => (&field[..i], Some(&field[i + 1..])),
        None => (field, None),
    };
    let (name, conversion) = match head.find('!') {
        Some(i) => (&head[..i], Some(&head[i + 1..])),
        None => (head, None),
    };

    // Unadorned `{}` and positional `{0}` have no arguments to draw from.
    if name.is_empty() || name.bytes().all(|b| b.is_ascii_digit()) {
        return literal(field);
    }
    let Some(value) = args.get(name) else {
        return literal(field);
    };

    let base = match conversion {
        None | Some("s") => display(value),
        Some("r") => value.to_string(),
        Some(_) => return literal(field),
    };

    match spec {
        None | Some("") => base,
        Some(spec) => apply_spec(value, &base, spec).unwrap_or_else(|| literal(field)),
    }
}

fn literal(field: &str) -> String {
    format!("{{{field}}}")
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply a `[[fill]align][0][width][.precision][type]` format spec.
/// Returns `None` for anything outside the supported subset, which the
/// caller preserves literally.
fn apply_spec(value: &Value, base: &str, spec: &str) -> Option<String> {
    let mut rest = spec;
    let mut fill = ' ';
    let mut align: Option<char> = None;

    let chars: Vec<char> = rest.chars().collect();
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        rest = &rest[fill.len_utf8() + 1..];
    } else if let Some(first) = chars.first() {
        if matches!(first, '<' | '>' | '^') {
            align = Some(*first);
            rest = &rest[1..];
        }
    }

    if let Some(after) = rest.strip_prefix('0') {
        fill = '0';
        align.get_or_insert('>');
        rest = after;
    }

    let width_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    let width: Option<usize> = if width_len > 0 {
        rest[..width_len].parse().ok()
    } else {
        None
    };
    rest = &rest[width_len..];

    let mut precision: Option<usize> = None;
    if let Some(after) = rest.strip_prefix('.') {
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        precision = after[..digits].parse().ok();
        rest = &after[digits..];
    }

    let mut body = match rest {
        "" => match precision {
            Some(precision) if value.is_string() => base.chars().take(precision).collect(),
            Some(_) => return None,
            None => base.to_owned(),
        },
        "s" => {
            if !value.is_string() {
                return None;
            }
            match precision {
                Some(precision) => base.chars().take(precision).collect(),
                None => base.to_owned(),
            }
        }
        "d" => {
            let int = value.as_i64()?;
            if precision.is_some() {
                return None;
            }
            int.to_string()
        }
        "x" => {
            let int = value.as_i64()?;
            if precision.is_some() {
                return None;
            }
            format!("{int:x}")
        }
        "f" => {
            let float = value.as_f64()?;
            let precision = precision.unwrap_or(6);
            format!("{float:.precision$}")
        }
        _ => return None,
    };

    if let Some(width) = width {
        let len = body.chars().count();
        if len < width {
            let pad = width - len;
            let filler: String = std::iter::repeat_n(fill, pad).collect();
            let align = align.unwrap_or(if value.is_string() { '<' } else { '>' });
            body = match align {
                '<' => format!("{body}{filler}"),
                '>' => format!("{filler}{body}"),
                '^' => {
                    let left: String = std::iter::repeat_n(fill, pad / 2).collect();
                    let right: String = std::iter::repeat_n(fill, pad - pad / 2).collect();
                    format!("{left}{body}{right}")
                }
                _ => return None,
            };
        }
    }

    Some(body)
}
