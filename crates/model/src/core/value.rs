use crate::core::data_type::DataType;
use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};
use uuid::Uuid;

/// A single cell as it travels from the source to the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(BigDecimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    /// Server text representation of a type the driver does not decode natively
    /// (interval, arrays, enums, numeric NaN and infinities, ...). Written back
    /// verbatim and never ordered client-side.
    Literal(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(v) => v.to_f64(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Decimal(v) => Some(v.clone()),
            Value::Real(v) => BigDecimal::from_f32(*v),
            Value::Double(v) => BigDecimal::from_f64(*v),
            other => other.as_i64().map(BigDecimal::from),
        }
    }

    /// Orders two values of the same logical type. Nulls sort first; values of
    /// unrelated types and server literals do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;

        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Literal(_), _) | (_, Literal(_)) => None,
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Decimal(_), _) | (_, Decimal(_)) => {
                self.as_decimal()?.partial_cmp(&other.as_decimal()?)
            }
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (TimestampTz(a), TimestampTz(b)) => Some(a.cmp(b)),
            (Date(a), Timestamp(b)) => a.and_time(NaiveTime::MIN).partial_cmp(b),
            (Timestamp(a), Date(b)) => a.partial_cmp(&b.and_time(NaiveTime::MIN)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }

    /// Parses the text form of a value of `data_type`, e.g. a watermark taken from
    /// configuration.
    pub fn parse(data_type: &DataType, raw: &str) -> Result<Value, String> {
        let raw = raw.trim();
        let invalid = |e: &dyn fmt::Display| format!("invalid {data_type} value '{raw}': {e}");

        let value = match data_type {
            DataType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "yes" | "on" => Value::Boolean(true),
                "f" | "false" | "0" | "no" | "off" => Value::Boolean(false),
                _ => return Err(invalid(&"expected a boolean")),
            },
            DataType::SmallInt => Value::SmallInt(raw.parse().map_err(|e| invalid(&e))?),
            DataType::Int => Value::Int(raw.parse().map_err(|e| invalid(&e))?),
            DataType::BigInt => Value::BigInt(raw.parse().map_err(|e| invalid(&e))?),
            DataType::Real => Value::Real(raw.parse().map_err(|e| invalid(&e))?),
            DataType::Double => Value::Double(raw.parse().map_err(|e| invalid(&e))?),
            DataType::Char | DataType::VarChar | DataType::Text => Value::Text(raw.to_string()),
            DataType::Uuid => Value::Uuid(raw.parse().map_err(|e| invalid(&e))?),
            DataType::Json | DataType::Jsonb => {
                Value::Json(serde_json::from_str(raw).map_err(|e| invalid(&e))?)
            }
            DataType::Date => {
                Value::Date(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| invalid(&e))?)
            }
            DataType::Time => Value::Time(raw.parse().map_err(|e| invalid(&e))?),
            DataType::Timestamp => Value::Timestamp(parse_timestamp(raw).map_err(|e| invalid(&e))?),
            DataType::TimestampTz => {
                let parsed = DateTime::parse_from_rfc3339(raw)
                    .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z"))
                    .map(|dt| dt.with_timezone(&Utc))
                    .or_else(|_| parse_timestamp(raw).map(|naive| naive.and_utc()))
                    .map_err(|e| invalid(&e))?;
                Value::TimestampTz(parsed)
            }
            DataType::Bytea => {
                let hex = raw
                    .strip_prefix("\\x")
                    .ok_or_else(|| invalid(&"expected \\x hex format"))?;
                Value::Bytes(decode_hex(hex).ok_or_else(|| invalid(&"bad hex digits"))?)
            }
            DataType::Numeric => match BigDecimal::from_str(raw) {
                Ok(v) => Value::Decimal(v),
                Err(_) if is_special_numeric(raw) => Value::Literal(raw.to_string()),
                Err(e) => return Err(invalid(&e)),
            },
            DataType::Interval
            | DataType::Xml
            | DataType::Array(_)
            | DataType::Custom(_) => Value::Literal(raw.to_string()),
        };

        Ok(value)
    }
}

/// `NaN` and the infinities, which numeric accepts but a decimal cannot hold.
fn is_special_numeric(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "nan" | "infinity" | "+infinity" | "-infinity" | "inf" | "+inf" | "-inf"
    )
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|e| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| d.and_time(NaiveTime::MIN))
                .map_err(|_| e)
        })
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) => f.write_str(&v.to_plain_string()),
            Value::Text(v) | Value::Literal(v) => f.write_str(v),
            Value::Bytes(bytes) => {
                f.write_str("\\x")?;
                bytes.iter().try_for_each(|b| write!(f, "{b:02x}"))
            }
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Json(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            Value::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::TimestampTz(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f%:z")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watermarks() {
        let ts = Value::parse(&DataType::Timestamp, "2024-03-01 12:30:00").unwrap();
        assert_eq!(ts.to_string(), "2024-03-01 12:30:00");

        let day = Value::parse(&DataType::Timestamp, "2024-03-01").unwrap();
        assert_eq!(day.compare(&ts), Some(Ordering::Less));

        let tz = Value::parse(&DataType::TimestampTz, "2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(tz.to_string(), "2024-03-01 10:30:00+00:00");

        assert!(Value::parse(&DataType::Int, "twelve").is_err());
        let amount = Value::parse(&DataType::Numeric, "10.50").unwrap();
        assert!(matches!(amount, Value::Decimal(_)));
        assert_eq!(amount.to_string(), "10.50");
        assert_eq!(
            Value::parse(&DataType::Numeric, "NaN").unwrap(),
            Value::Literal("NaN".into())
        );
        assert!(Value::parse(&DataType::Numeric, "ten").is_err());
        assert_eq!(
            Value::parse(&DataType::Bytea, "\\x00ff").unwrap(),
            Value::Bytes(vec![0, 255])
        );
    }

    #[test]
    fn compares_across_integer_widths() {
        assert_eq!(
            Value::SmallInt(3).compare(&Value::BigInt(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Int(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.compare(&Value::Int(1)), Some(Ordering::Less));
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn compares_decimals_numerically() {
        let dec = |raw: &str| Value::parse(&DataType::Numeric, raw).unwrap();

        assert_eq!(dec("9.50").compare(&dec("10.00")), Some(Ordering::Less));
        assert_eq!(dec("10.00").compare(&dec("2")), Some(Ordering::Greater));
        assert_eq!(dec("2.0").compare(&dec("2")), Some(Ordering::Equal));
        assert_eq!(dec("-0.5").compare(&Value::Int(0)), Some(Ordering::Less));
        assert_eq!(dec("3.25").compare(&Value::Double(3.5)), Some(Ordering::Less));
        assert_eq!(dec("1").compare(&Value::Literal("NaN".into())), None);
        assert_eq!(
            Value::Literal("2 days".into()).compare(&Value::Literal("10 days".into())),
            None
        );
    }
}
