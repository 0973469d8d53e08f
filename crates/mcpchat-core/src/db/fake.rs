//! Fake column values for test data.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::distributions::Alphanumeric;
use rand::Rng;

use super::ColumnInfo;

/// Text length used when the declared type carries no cap.
pub const DEFAULT_TEXT_LENGTH: usize = 25;
const MAX_BLOB_BYTES: usize = 10;

/// The type family a declared column type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Integer,
    Real,
    Bool,
    Blob,
    Date,
    DateTime,
}

impl TypeFamily {
    /// Classify a declared type such as `NVARCHAR(50)` or `BIGINT`.
    pub fn from_declared(sql_type: &str) -> anyhow::Result<Self> {
        let base = sql_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let family = match base.as_str() {
            "varchar" | "nvarchar" | "char" | "nchar" | "text" | "clob" | "string" => Self::Text,
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "mediumint" => Self::Integer,
            "float" | "real" | "double" | "double precision" | "numeric" | "decimal" => Self::Real,
            "bit" | "bool" | "boolean" => Self::Bool,
            "blob" | "binary" | "varbinary" => Self::Blob,
            "date" => Self::Date,
            "datetime" | "timestamp" => Self::DateTime,
            _ => anyhow::bail!("Unsupported type: {}", sql_type),
        };
        Ok(family)
    }
}

/// A generated value, ready to be rendered as a SQL literal.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl FakeValue {
    /// Render as a SQLite literal. Text has embedded `'` doubled.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".into(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Integer(i) => i.to_string(),
            Self::Real(f) => f.to_string(),
            Self::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
            Self::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Generate a value for `column`.
///
/// Nullable columns come out NULL half the time; other columns never do.
pub fn generate<R: Rng>(rng: &mut R, column: &ColumnInfo) -> anyhow::Result<FakeValue> {
    let family = TypeFamily::from_declared(&column.sql_type)?;
    if column.nullable && rng.gen_bool(0.5) {
        return Ok(FakeValue::Null);
    }

    let cap = column
        .max_length
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_TEXT_LENGTH);

    let value = match family {
        TypeFamily::Text => {
            let len = rng.gen_range(1..=cap);
            let text: String = (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect();
            FakeValue::Text(text)
        }
        TypeFamily::Integer => FakeValue::Integer(rng.gen_range(0..10_000)),
        TypeFamily::Real => {
            let raw: f64 = rng.gen_range(-10_000.0..10_000.0);
            FakeValue::Real((raw * 100.0).round() / 100.0)
        }
        TypeFamily::Bool => FakeValue::Integer(i64::from(rng.gen_bool(0.5))),
        TypeFamily::Blob => {
            let len = rng.gen_range(1..=cap.min(MAX_BLOB_BYTES));
            FakeValue::Blob((0..len).map(|_| rng.gen()).collect())
        }
        TypeFamily::Date => FakeValue::Date(random_datetime(rng).date()),
        TypeFamily::DateTime => FakeValue::DateTime(random_datetime(rng)),
    };
    Ok(value)
}

/// A second-resolution timestamp between 1970 and the end of 2029.
fn random_datetime<R: Rng>(rng: &mut R) -> NaiveDateTime {
    const SPAN_SECONDS: i64 = 60 * 365 * 24 * 3600;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    epoch + Duration::seconds(rng.gen_range(0..SPAN_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn column(sql_type: &str, nullable: bool, max_length: Option<usize>) -> ColumnInfo {
        ColumnInfo {
            name: "c".into(),
            sql_type: sql_type.into(),
            nullable,
            max_length,
            primary_key: false,
        }
    }

    #[test]
    fn test_type_families() {
        assert_eq!(TypeFamily::from_declared("NVARCHAR(50)").unwrap(), TypeFamily::Text);
        assert_eq!(TypeFamily::from_declared("bigint").unwrap(), TypeFamily::Integer);
        assert_eq!(TypeFamily::from_declared("DECIMAL(10,2)").unwrap(), TypeFamily::Real);
        assert_eq!(TypeFamily::from_declared("bit").unwrap(), TypeFamily::Bool);
        assert_eq!(TypeFamily::from_declared("DATETIME").unwrap(), TypeFamily::DateTime);
        let err = TypeFamily::from_declared("geometry").unwrap_err();
        assert!(err.to_string().contains("Unsupported type"));
    }

    #[test]
    fn test_text_respects_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            match generate(&mut rng, &column("VARCHAR(4)", false, Some(4))).unwrap() {
                FakeValue::Text(s) => assert!((1..=4).contains(&s.len())),
                other => panic!("expected text, got {other:?}"),
            }
            match generate(&mut rng, &column("TEXT", false, None)).unwrap() {
                FakeValue::Text(s) => assert!(s.len() <= DEFAULT_TEXT_LENGTH),
                other => panic!("expected text, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_nullability() {
        let mut rng = StdRng::seed_from_u64(42);
        let not_null = column("INTEGER", false, None);
        assert!((0..200).all(|_| generate(&mut rng, &not_null).unwrap() != FakeValue::Null));

        let nullable = column("INTEGER", true, None);
        let nulls = (0..400)
            .filter(|_| generate(&mut rng, &nullable).unwrap() == FakeValue::Null)
            .count();
        assert!(nulls > 100 && nulls < 300, "nulls = {nulls}");
    }

    #[test]
    fn test_bool_and_blob() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            match generate(&mut rng, &column("BOOLEAN", false, None)).unwrap() {
                FakeValue::Integer(i) => assert!(i == 0 || i == 1),
                other => panic!("expected 0/1, got {other:?}"),
            }
            match generate(&mut rng, &column("BLOB", false, None)).unwrap() {
                FakeValue::Blob(b) => assert!((1..=MAX_BLOB_BYTES).contains(&b.len())),
                other => panic!("expected blob, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_sql_literals() {
        assert_eq!(FakeValue::Null.to_sql_literal(), "NULL");
        assert_eq!(FakeValue::Text("O'Neil".into()).to_sql_literal(), "'O''Neil'");
        assert_eq!(FakeValue::Blob(vec![0xAB, 0x01]).to_sql_literal(), "X'AB01'");
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(FakeValue::Date(d).to_sql_literal(), "'2024-02-29'");
    }
}
