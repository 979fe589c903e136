use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};

/// Logical column type of a PostgreSQL column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Numeric,
    Char,
    VarChar,
    Text,
    Bytea,
    Uuid,
    Json,
    Jsonb,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Xml,
    /// Array of the named element type.
    Array(String),
    /// Enums, domains, extension types and anything else not listed above.
    Custom(String),
}

impl DataType {
    /// Maps a type name as printed by `format_type` or `information_schema` to a logical type.
    /// Length and precision modifiers are ignored.
    pub fn from_postgres_type(type_name: &str) -> DataType {
        let normalized = Self::normalize_type_name(type_name);

        if let Some(element) = normalized.strip_suffix("[]") {
            return DataType::Array(element.trim().to_string());
        }

        match normalized.as_str() {
            "boolean" | "bool" => DataType::Boolean,
            "smallint" | "int2" => DataType::SmallInt,
            "integer" | "int" | "int4" => DataType::Int,
            "bigint" | "int8" => DataType::BigInt,
            "real" | "float4" => DataType::Real,
            "double precision" | "float8" => DataType::Double,
            "numeric" | "decimal" => DataType::Numeric,
            "character" | "char" | "bpchar" => DataType::Char,
            "character varying" | "varchar" => DataType::VarChar,
            "text" => DataType::Text,
            "bytea" => DataType::Bytea,
            "uuid" => DataType::Uuid,
            "json" => DataType::Json,
            "jsonb" => DataType::Jsonb,
            "date" => DataType::Date,
            "time" | "time without time zone" => DataType::Time,
            "timestamp" | "timestamp without time zone" => DataType::Timestamp,
            "timestamptz" | "timestamp with time zone" => DataType::TimestampTz,
            "interval" => DataType::Interval,
            "xml" => DataType::Xml,
            _ => DataType::Custom(normalized),
        }
    }

    /// Lowercases and strips `(n)` / `(p,s)` modifiers, wherever they appear.
    fn normalize_type_name(type_name: &str) -> String {
        let mut out = String::with_capacity(type_name.len());
        let mut depth = 0usize;
        for ch in type_name.trim().chars() {
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if depth == 0 => out.push(ch.to_ascii_lowercase()),
                _ => {}
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn postgres_name(&self) -> Cow<'_, str> {
        match self {
            DataType::Boolean => Cow::Borrowed("boolean"),
            DataType::SmallInt => Cow::Borrowed("smallint"),
            DataType::Int => Cow::Borrowed("integer"),
            DataType::BigInt => Cow::Borrowed("bigint"),
            DataType::Real => Cow::Borrowed("real"),
            DataType::Double => Cow::Borrowed("double precision"),
            DataType::Numeric => Cow::Borrowed("numeric"),
            DataType::Char => Cow::Borrowed("character"),
            DataType::VarChar => Cow::Borrowed("character varying"),
            DataType::Text => Cow::Borrowed("text"),
            DataType::Bytea => Cow::Borrowed("bytea"),
            DataType::Uuid => Cow::Borrowed("uuid"),
            DataType::Json => Cow::Borrowed("json"),
            DataType::Jsonb => Cow::Borrowed("jsonb"),
            DataType::Date => Cow::Borrowed("date"),
            DataType::Time => Cow::Borrowed("time without time zone"),
            DataType::Timestamp => Cow::Borrowed("timestamp without time zone"),
            DataType::TimestampTz => Cow::Borrowed("timestamp with time zone"),
            DataType::Interval => Cow::Borrowed("interval"),
            DataType::Xml => Cow::Borrowed("xml"),
            DataType::Array(element) => Cow::Owned(format!("{element}[]")),
            DataType::Custom(name) => Cow::Borrowed(name),
        }
    }

    /// Whether the driver decodes this type directly. Everything else travels as its
    /// text representation.
    pub fn is_native(&self) -> bool {
        !matches!(
            self,
            DataType::Numeric
                | DataType::Interval
                | DataType::Xml
                | DataType::Array(_)
                | DataType::Custom(_)
        )
    }

    /// Whether values of this type can take part in a deterministic `ORDER BY`.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, DataType::Json | DataType::Xml | DataType::Custom(_))
    }

    /// Whether extracted values of this type compare the way the server orders them,
    /// which a watermark column needs to track its high-water mark.
    pub fn has_client_order(&self) -> bool {
        self.is_orderable()
            && !matches!(
                self,
                DataType::Jsonb | DataType::Interval | DataType::Array(_)
            )
    }

    /// Whether a target column of type `self` can receive values of type `source`
    /// without loss.
    pub fn accepts(&self, source: &DataType) -> bool {
        use DataType::*;

        if self == source {
            return true;
        }

        matches!(
            (source, self),
            (SmallInt, Int | BigInt | Numeric)
                | (Int, BigInt | Numeric)
                | (BigInt, Numeric)
                | (Real, Double)
                | (Char | VarChar, Text)
                | (Char, VarChar)
                | (Json, Jsonb)
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.postgres_name())
    }
}
