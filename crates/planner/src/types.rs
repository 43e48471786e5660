//! Row and column types plus the SQL type lattice used by validation.

use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, FieldRef, Fields, TimeUnit};

/// A data type paired with its nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnType {
    pub fn new(data_type: DataType, nullable: bool) -> Self {
        Self {
            data_type,
            nullable,
        }
    }

    pub fn not_null(data_type: DataType) -> Self {
        Self::new(data_type, false)
    }

    pub fn nullable(data_type: DataType) -> Self {
        Self::new(data_type, true)
    }

    pub fn boolean(nullable: bool) -> Self {
        Self::new(DataType::Boolean, nullable)
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.data_type, DataType::Boolean | DataType::Null)
    }

    /// Fields of a struct type.
    pub fn struct_fields(&self) -> Option<&Fields> {
        match &self.data_type {
            DataType::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Element type of a collection type.
    pub fn element_type(&self) -> Option<ColumnType> {
        match &self.data_type {
            DataType::List(f) | DataType::LargeList(f) => Some(ColumnType::new(
                f.data_type().clone(),
                f.is_nullable(),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", sql_type_name(&self.data_type))?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Ordered `(name, type, nullable)` fields produced by a relation.
///
/// Field names are not required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowType {
    fields: Fields,
}

impl Default for RowType {
    fn default() -> Self {
        Self {
            fields: Fields::empty(),
        }
    }
}

impl RowType {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields: Fields::from(fields),
        }
    }

    pub fn from_fields(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn of(columns: Vec<(String, ColumnType)>) -> Self {
        Self::new(
            columns
                .into_iter()
                .map(|(n, t)| Field::new(n, t.data_type, t.nullable))
                .collect(),
        )
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, i: usize) -> &FieldRef {
        &self.fields[i]
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name().clone()).collect()
    }

    pub fn column_type(&self, i: usize) -> ColumnType {
        let f = &self.fields[i];
        ColumnType::new(f.data_type().clone(), f.is_nullable())
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        (0..self.len()).map(|i| self.column_type(i)).collect()
    }

    /// Positions of every field named `name`.
    pub fn positions_of(&self, name: &str, case_sensitive: bool) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| names_match(f.name(), name, case_sensitive))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn index_of(&self, name: &str, case_sensitive: bool) -> Option<usize> {
        self.positions_of(name, case_sensitive).first().copied()
    }

    /// Copy with every field nullable.
    pub fn make_nullable(&self) -> RowType {
        RowType::new(
            self.fields
                .iter()
                .map(|f| f.as_ref().clone().with_nullable(true))
                .collect(),
        )
    }

    /// Copy with fields renamed positionally; types are kept.
    pub fn rename(&self, names: &[String]) -> RowType {
        RowType::new(
            self.fields
                .iter()
                .zip(names)
                .map(|(f, n)| f.as_ref().clone().with_name(n.clone()))
                .collect(),
        )
    }

    pub fn concat(&self, other: &RowType) -> RowType {
        let mut fields: Vec<Field> = self.fields.iter().map(|f| f.as_ref().clone()).collect();
        fields.extend(other.fields.iter().map(|f| f.as_ref().clone()));
        RowType::new(fields)
    }

    /// Sub-row of the given positions, in order.
    pub fn project(&self, positions: &[usize]) -> RowType {
        RowType::new(
            positions
                .iter()
                .map(|&i| self.fields[i].as_ref().clone())
                .collect(),
        )
    }

    pub fn as_struct(&self) -> DataType {
        DataType::Struct(self.fields.clone())
    }

    /// Row type of a struct type, or a single-field row wrapping any other type.
    pub fn from_struct_or_wrap(ty: &ColumnType, wrap_name: &str) -> RowType {
        match &ty.data_type {
            DataType::Struct(fields) => RowType::from_fields(fields.clone()),
            other => RowType::new(vec![Field::new(wrap_name, other.clone(), ty.nullable)]),
        }
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordType(")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let ct = ColumnType::new(field.data_type().clone(), field.is_nullable());
            write!(f, "{ct} {}", field.name())?;
        }
        write!(f, ")")
    }
}

pub fn names_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

pub fn list_of(element: ColumnType) -> DataType {
    DataType::List(Arc::new(Field::new(
        "item",
        element.data_type,
        element.nullable,
    )))
}

// -------------------------
// Type lattice
// -------------------------

pub fn is_numeric(dt: &DataType) -> bool {
    numeric_rank(dt).is_some()
}

pub fn is_character(dt: &DataType) -> bool {
    matches!(dt, DataType::Utf8 | DataType::LargeUtf8)
}

pub fn is_temporal(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _)
    )
}

fn numeric_rank(dt: &DataType) -> Option<u8> {
    Some(match dt {
        DataType::Int8 | DataType::UInt8 => 1,
        DataType::Int16 | DataType::UInt16 => 2,
        DataType::Int32 | DataType::UInt32 => 3,
        DataType::Int64 | DataType::UInt64 => 4,
        DataType::Decimal128(_, _) => 5,
        DataType::Float32 => 6,
        DataType::Float64 => 7,
        _ => return None,
    })
}

pub fn wider_numeric(a: &DataType, b: &DataType) -> Option<DataType> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    match (a, b) {
        (DataType::Decimal128(p1, s1), DataType::Decimal128(p2, s2)) => {
            let s = (*s1).max(*s2);
            let int_digits = (*p1 as i16 - *s1 as i16).max(*p2 as i16 - *s2 as i16);
            let p = (int_digits + s as i16).clamp(1, 38) as u8;
            Some(DataType::Decimal128(p, s))
        }
        _ if ra >= rb => Some(a.clone()),
        _ => Some(b.clone()),
    }
}

/// Most general type every input can be widened to, or `None` when the
/// types do not unify. `NULL`-typed inputs unify with anything.
pub fn least_restrictive(types: &[ColumnType]) -> Option<ColumnType> {
    let mut target: Option<DataType> = None;
    let mut nullable = false;
    for t in types {
        nullable |= t.nullable || t.data_type == DataType::Null;
        if t.data_type == DataType::Null {
            continue;
        }
        target = Some(match target {
            None => t.data_type.clone(),
            Some(cur) => least_restrictive_data_type(&cur, &t.data_type)?,
        });
    }
    if types.is_empty() {
        return None;
    }
    Some(ColumnType::new(target.unwrap_or(DataType::Null), nullable))
}

fn least_restrictive_data_type(a: &DataType, b: &DataType) -> Option<DataType> {
    if a == b {
        return Some(a.clone());
    }
    if is_numeric(a) && is_numeric(b) {
        return wider_numeric(a, b);
    }
    if is_character(a) && is_character(b) {
        return Some(DataType::LargeUtf8);
    }
    match (a, b) {
        (DataType::Struct(fa), DataType::Struct(fb)) if fa.len() == fb.len() => {
            let mut fields = vec![];
            for (x, y) in fa.iter().zip(fb.iter()) {
                let t = least_restrictive(&[
                    ColumnType::new(x.data_type().clone(), x.is_nullable()),
                    ColumnType::new(y.data_type().clone(), y.is_nullable()),
                ])?;
                fields.push(Field::new(x.name(), t.data_type, t.nullable));
            }
            Some(DataType::Struct(Fields::from(fields)))
        }
        (DataType::List(x), DataType::List(y)) => {
            let t = least_restrictive(&[
                ColumnType::new(x.data_type().clone(), x.is_nullable()),
                ColumnType::new(y.data_type().clone(), y.is_nullable()),
            ])?;
            Some(list_of(t))
        }
        (DataType::Timestamp(_, _), DataType::Date32) | (DataType::Date32, DataType::Timestamp(_, _)) => {
            Some(DataType::Timestamp(TimeUnit::Microsecond, None))
        }
        _ => None,
    }
}

/// Row-wise least restrictive merge; names come from the first row.
pub fn least_restrictive_rows(rows: &[RowType]) -> Option<RowType> {
    let first = rows.first()?;
    if rows.iter().any(|r| r.len() != first.len()) {
        return None;
    }
    let mut columns = vec![];
    for i in 0..first.len() {
        let candidates: Vec<ColumnType> = rows.iter().map(|r| r.column_type(i)).collect();
        let t = least_restrictive(&candidates)?;
        columns.push((first.field(i).name().clone(), t));
    }
    Some(RowType::of(columns))
}

/// Whether a value of `source` may be stored into a column of `target`.
pub fn can_assign(target: &DataType, source: &DataType) -> bool {
    if source == &DataType::Null || target == source {
        return true;
    }
    if is_numeric(target) && is_numeric(source) {
        return true;
    }
    if is_character(target) && is_character(source) {
        return true;
    }
    if is_temporal(target) && (is_temporal(source) || is_character(source)) {
        return true;
    }
    match (target, source) {
        (DataType::Struct(t), DataType::Struct(s)) => {
            t.len() == s.len()
                && t
                    .iter()
                    .zip(s.iter())
                    .all(|(a, b)| can_assign(a.data_type(), b.data_type()))
        }
        (DataType::List(t), DataType::List(s)) => can_assign(t.data_type(), s.data_type()),
        _ => false,
    }
}

/// Whether two types can be compared with `=`/`<` and friends.
pub fn comparable(a: &DataType, b: &DataType) -> bool {
    a == &DataType::Null
        || b == &DataType::Null
        || a == b
        || (is_numeric(a) && is_numeric(b))
        || (is_character(a) && is_character(b))
        || (is_temporal(a) && is_temporal(b))
        || least_restrictive_data_type(a, b).is_some()
}

/// SQL spelling of a data type.
pub fn sql_type_name(dt: &DataType) -> String {
    match dt {
        DataType::Null => "NULL".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 | DataType::UInt8 => "TINYINT".to_string(),
        DataType::Int16 | DataType::UInt16 => "SMALLINT".to_string(),
        DataType::Int32 | DataType::UInt32 => "INTEGER".to_string(),
        DataType::Int64 | DataType::UInt64 => "BIGINT".to_string(),
        DataType::Float32 => "REAL".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Decimal128(p, s) => format!("DECIMAL({p}, {s})"),
        DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR".to_string(),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Timestamp(_, _) => "TIMESTAMP".to_string(),
        DataType::Struct(fields) => {
            let inner: Vec<String> = fields
                .iter()
                .map(|f| format!("{} {}", sql_type_name(f.data_type()), f.name()))
                .collect();
            format!("RecordType({})", inner.join(", "))
        }
        DataType::List(f) | DataType::LargeList(f) => {
            format!("{} ARRAY", sql_type_name(f.data_type()))
        }
        other => format!("{other:?}"),
    }
}

/// Parse a built-in SQL type name (`INTEGER`, `VARCHAR(20)`, `DECIMAL(7, 2)`).
pub fn parse_type_name(name: &str) -> Option<DataType> {
    let upper = name.trim().to_ascii_uppercase();
    let (base, args) = match upper.find('(') {
        Some(open) => {
            let close = upper.rfind(')')?;
            let args: Vec<&str> = upper[open + 1..close].split(',').map(str::trim).collect();
            (upper[..open].trim().to_string(), args)
        }
        None => (upper.clone(), vec![]),
    };
    Some(match base.as_str() {
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        "TINYINT" => DataType::Int8,
        "SMALLINT" => DataType::Int16,
        "INT" | "INTEGER" => DataType::Int32,
        "BIGINT" => DataType::Int64,
        "REAL" | "FLOAT" => DataType::Float32,
        "DOUBLE" | "DOUBLE PRECISION" => DataType::Float64,
        "DECIMAL" | "NUMERIC" | "DEC" => {
            let p = args.first().and_then(|a| a.parse::<u8>().ok()).unwrap_or(19);
            let s = args.get(1).and_then(|a| a.parse::<i8>().ok()).unwrap_or(0);
            DataType::Decimal128(p, s)
        }
        "VARCHAR" | "CHAR" | "CHARACTER" | "CHARACTER VARYING" | "TEXT" | "STRING" => {
            DataType::Utf8
        }
        "DATE" => DataType::Date32,
        "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, None),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field};

    use super::{
        can_assign, least_restrictive, least_restrictive_rows, parse_type_name, ColumnType,
        RowType,
    };

    #[test]
    fn least_restrictive_widens_and_absorbs_null() {
        let t = least_restrictive(&[
            ColumnType::not_null(DataType::Int32),
            ColumnType::nullable(DataType::Null),
            ColumnType::not_null(DataType::Float64),
        ])
        .expect("unify");
        assert_eq!(t, ColumnType::nullable(DataType::Float64));
    }

    #[test]
    fn least_restrictive_rejects_mixed_families() {
        assert!(least_restrictive(&[
            ColumnType::not_null(DataType::Int32),
            ColumnType::not_null(DataType::Boolean),
        ])
        .is_none());
    }

    #[test]
    fn rows_with_different_degree_do_not_merge() {
        let a = RowType::new(vec![Field::new("a", DataType::Int32, false)]);
        let b = RowType::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ]);
        assert!(least_restrictive_rows(&[a, b]).is_none());
    }

    #[test]
    fn make_nullable_marks_every_field() {
        let r = RowType::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Utf8, false),
        ])
        .make_nullable();
        assert!(r.fields().iter().all(|f| f.is_nullable()));
    }

    #[test]
    fn assignability() {
        assert!(can_assign(&DataType::Int64, &DataType::Int32));
        assert!(can_assign(&DataType::Int32, &DataType::Null));
        assert!(!can_assign(&DataType::Int32, &DataType::Utf8));
        assert!(!can_assign(&DataType::Boolean, &DataType::Int32));
    }

    #[test]
    fn parse_type_names() {
        assert_eq!(parse_type_name("varchar(20)"), Some(DataType::Utf8));
        assert_eq!(
            parse_type_name("DECIMAL(7, 2)"),
            Some(DataType::Decimal128(7, 2))
        );
        assert_eq!(parse_type_name("blob_of_things"), None);
    }
}
