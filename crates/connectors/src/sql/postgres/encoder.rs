use chrono::SecondsFormat;
use model::{core::value::Value, records::row::Row};
use std::fmt::Write;

/// Encodes rows in the text format of `COPY ... FROM STDIN`: tab separated
/// fields, `\N` for null, one row per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgCopyValueEncoder;

impl PgCopyValueEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode_row(&self, row: &Row, out: &mut String) {
        for (idx, value) in row.values.iter().enumerate() {
            if idx > 0 {
                out.push('\t');
            }
            self.encode_value(value, out);
        }
        out.push('\n');
    }

    pub fn encode_value(&self, value: &Value, out: &mut String) {
        match value {
            Value::Null => out.push_str(self.encode_null()),
            Value::Boolean(v) => out.push(if *v { 't' } else { 'f' }),
            Value::SmallInt(v) => push_display(out, v),
            Value::Int(v) => push_display(out, v),
            Value::BigInt(v) => push_display(out, v),
            Value::Real(v) => Self::encode_float(f64::from(*v), out, |v| {
                ryu::Buffer::new().format_finite(v as f32).to_string()
            }),
            Value::Double(v) => {
                Self::encode_float(*v, out, |v| ryu::Buffer::new().format_finite(v).to_string())
            }
            Value::Decimal(v) => out.push_str(&v.to_plain_string()),
            Value::Text(s) | Value::Literal(s) => escape_into(s, out),
            Value::Json(v) => escape_into(&v.to_string(), out),
            Value::Bytes(bytes) => {
                // bytea hex input; the leading backslash is itself escaped for COPY
                out.push_str("\\\\x");
                for b in bytes {
                    let _ = write!(out, "{b:02x}");
                }
            }
            Value::Uuid(v) => push_display(out, v),
            Value::Date(d) => push_display(out, d.format("%Y-%m-%d")),
            Value::Time(t) => push_display(out, t.format("%H:%M:%S%.f")),
            Value::Timestamp(ts) => push_display(out, ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::TimestampTz(ts) => out.push_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }

    pub fn encode_null(&self) -> &'static str {
        "\\N"
    }

    fn encode_float(v: f64, out: &mut String, finite: impl Fn(f64) -> String) {
        if v.is_nan() {
            out.push_str("NaN");
        } else if v.is_infinite() {
            out.push_str(if v > 0.0 { "Infinity" } else { "-Infinity" });
        } else {
            out.push_str(&finite(v));
        }
    }
}

fn push_display(out: &mut String, value: impl std::fmt::Display) {
    let _ = write!(out, "{value}");
}

fn escape_into(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn encode(values: Vec<Value>) -> String {
        let mut out = String::new();
        PgCopyValueEncoder::new().encode_row(&Row::new(values), &mut out);
        out
    }

    #[test]
    fn escapes_copy_control_characters() {
        assert_eq!(
            encode(vec![
                Value::Text("a\tb\\c\nd".into()),
                Value::Null,
                Value::Boolean(true)
            ]),
            "a\\tb\\\\c\\nd\t\\N\tt\n"
        );
    }

    #[test]
    fn encodes_binary_and_temporal_values() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            encode(vec![
                Value::Bytes(vec![0xde, 0xad]),
                Value::Date(day),
                Value::Timestamp(day.and_hms_opt(8, 5, 0).unwrap()),
                Value::TimestampTz(Utc.with_ymd_and_hms(2024, 3, 1, 8, 5, 0).unwrap()),
            ]),
            "\\\\xdead\t2024-03-01\t2024-03-01 08:05:00\t2024-03-01T08:05:00.000000Z\n"
        );
    }

    #[test]
    fn encodes_special_floats() {
        assert_eq!(
            encode(vec![
                Value::Double(f64::NAN),
                Value::Double(f64::NEG_INFINITY),
                Value::Real(1.5),
                Value::Decimal("12.50".parse().unwrap()),
                Value::Literal("NaN".into()),
            ]),
            "NaN\t-Infinity\t1.5\t12.50\tNaN\n"
        );
    }
}
