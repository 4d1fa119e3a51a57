/// Query Engine adapter
///
/// Runs an ad-hoc SQL query against a table by copying it into an in-memory
/// SQLite database under a fixed logical name (`data` by default) and
/// materializing the result set as a new, read-only Table. The database lives
/// only for the duration of the call.
///
/// # Examples
///
/// ```
/// use dbf_commander::{query, CellValue, Column, ColumnType, Schema, Table};
///
/// let schema = Schema::try_new(vec![
///     Column::new("CITY", ColumnType::Text),
///     Column::new("POP", ColumnType::Integer),
/// ]).unwrap();
/// let table = Table::with_rows("cities", schema, vec![
///     vec![CellValue::from("Lisbon"), CellValue::Integer(545_000)],
///     vec![CellValue::from("Porto"), CellValue::Integer(232_000)],
/// ]).unwrap();
///
/// let result = query(&table, "SELECT CITY FROM data WHERE POP > 300000").unwrap();
/// assert_eq!(result.len(), 1);
/// assert_eq!(result.get_value(0, "CITY").unwrap().as_text(), Some("Lisbon"));
/// assert!(result.is_read_only());
/// ```

use crate::column::{format_date, parse_date, CellValue, Column, ColumnType};
use crate::error::QueryError;
use crate::persist::MAX_CHARACTER_LENGTH;
use crate::table::{Row, Schema, Table};
use log::debug;
use regex::Regex;
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::collections::HashSet;

/// Name the table is registered under unless configured otherwise
pub const DEFAULT_TABLE_NAME: &str = "data";

/// Something that can run a query over a table
pub trait QueryBackend {
    fn run(&self, table: &Table, query: &str) -> Result<Table, QueryError>;
}

/// Runs `query_text` with the default SQLite backend
pub fn query(table: &Table, query_text: &str) -> Result<Table, QueryError> {
    SqliteBackend::default().run(table, query_text)
}

/// Rejects blank queries and queries that never mention `table_name`
pub fn validate_query(query: &str, table_name: &str) -> Result<(), QueryError> {
    if query.trim().is_empty() {
        return Err(QueryError::EmptyQuery);
    }
    let referenced = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(table_name)))
        .map(|re| re.is_match(query))
        .unwrap_or_else(|_| query.to_lowercase().contains(&table_name.to_lowercase()));
    if !referenced {
        return Err(QueryError::MissingTableReference(table_name.to_string()));
    }
    Ok(())
}

/// Ephemeral in-memory SQLite backend
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    table_name: String,
}

impl Default for SqliteBackend {
    fn default() -> Self {
        SqliteBackend::new(DEFAULT_TABLE_NAME)
    }
}

impl SqliteBackend {
    pub fn new(table_name: impl Into<String>) -> Self {
        SqliteBackend {
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn populate(&self, conn: &mut Connection, table: &Table) -> Result<(), QueryError> {
        let column_defs: Vec<String> = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_ident(c.name()), sql_type(c.column_type())))
            .collect();
        conn.execute(
            &format!("CREATE TABLE {} ({})", quote_ident(&self.table_name), column_defs.join(", ")),
            [],
        )?;

        let placeholders: Vec<String> = (1..=table.columns().len()).map(|i| format!("?{}", i)).collect();
        let insert = format!(
            "INSERT INTO {} VALUES ({})",
            quote_ident(&self.table_name),
            placeholders.join(", ")
        );

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in table.iter_rows() {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl QueryBackend for SqliteBackend {
    fn run(&self, table: &Table, query: &str) -> Result<Table, QueryError> {
        validate_query(query, &self.table_name)?;

        let mut conn = Connection::open_in_memory()?;
        self.populate(&mut conn, table)?;

        let mut stmt = conn
            .prepare(query)
            .map_err(|e| QueryError::QuerySyntaxError(e.to_string()))?;
        if stmt.column_count() == 0 {
            return Err(QueryError::NoResultSet);
        }

        let result_columns: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(|t| t.to_string())))
            .collect();
        let width = result_columns.len();

        let mut raw_rows: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt
            .query([])
            .map_err(|e| QueryError::QuerySyntaxError(e.to_string()))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| QueryError::QuerySyntaxError(e.to_string()))?
        {
            let values = (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()?;
            raw_rows.push(values);
        }

        let result = materialize(table, &result_columns, raw_rows)?;
        debug!("Query returned {} of {} rows: {}", result.len(), table.len(), query.trim());
        Ok(result)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Text => "TEXT",
        ColumnType::Integer => "INTEGER",
        ColumnType::Decimal => "REAL",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Date => "DATE",
    }
}

fn type_from_decl(decl: &str) -> Option<ColumnType> {
    match decl.to_uppercase().as_str() {
        "TEXT" => Some(ColumnType::Text),
        "INTEGER" => Some(ColumnType::Integer),
        "REAL" => Some(ColumnType::Decimal),
        "BOOLEAN" => Some(ColumnType::Boolean),
        "DATE" => Some(ColumnType::Date),
        _ => None,
    }
}

/// Type of an expression column, judged from the values it produced
fn type_from_values<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;
    for value in values {
        let t = match value {
            Value::Null => continue,
            Value::Integer(_) => ColumnType::Integer,
            Value::Real(_) => ColumnType::Decimal,
            Value::Text(_) | Value::Blob(_) => return ColumnType::Text,
        };
        inferred = Some(match inferred {
            Some(ColumnType::Decimal) => ColumnType::Decimal,
            _ => t,
        });
    }
    inferred.unwrap_or(ColumnType::Text)
}

fn cell_from_sql(value: Value, column_type: ColumnType) -> CellValue {
    match (value, column_type) {
        (Value::Null, _) => CellValue::Missing,
        (Value::Integer(i), ColumnType::Boolean) => CellValue::Boolean(i != 0),
        (Value::Integer(i), ColumnType::Decimal) => CellValue::Decimal(i as f64),
        (Value::Integer(i), ColumnType::Text) => CellValue::Text(i.to_string()),
        (Value::Integer(i), _) => CellValue::Integer(i),
        (Value::Real(f), ColumnType::Text) => CellValue::Text(f.to_string()),
        (Value::Real(f), _) => CellValue::Decimal(f),
        (Value::Text(s), ColumnType::Date) => parse_date(&s).map(CellValue::Date).unwrap_or(CellValue::Text(s)),
        (Value::Text(s), _) => CellValue::Text(s),
        (Value::Blob(b), _) => CellValue::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

/// Builds the result table, borrowing widths from same-named base columns
fn materialize(base: &Table, result_columns: &[(String, Option<String>)], raw_rows: Vec<Vec<Value>>) -> Result<Table, QueryError> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(result_columns.len());

    for (idx, (name, decl)) in result_columns.iter().enumerate() {
        let column_type = decl
            .as_deref()
            .and_then(type_from_decl)
            .unwrap_or_else(|| type_from_values(raw_rows.iter().map(|r| &r[idx])));

        let mut unique = name.clone();
        let mut suffix = 2;
        while !seen.insert(unique.to_uppercase()) {
            unique = format!("{}_{}", name, suffix);
            suffix += 1;
        }

        let base_column = base
            .schema()
            .get_column_index(name)
            .and_then(|i| base.schema().column(i))
            .filter(|c| c.column_type() == column_type);

        let column = match base_column {
            Some(c) => Column::with_width(unique, column_type, c.length(), c.decimals()),
            None if column_type == ColumnType::Text => {
                let observed = raw_rows
                    .iter()
                    .map(|r| match &r[idx] {
                        Value::Text(s) => s.chars().count(),
                        Value::Null => 0,
                        other => format!("{:?}", other).len(),
                    })
                    .max()
                    .unwrap_or(0);
                let length = observed.clamp(1, MAX_CHARACTER_LENGTH as usize) as u8;
                Column::with_width(unique, column_type, length, 0)
            }
            None => Column::new(unique, column_type),
        };
        columns.push(column);
    }

    let types: Vec<ColumnType> = columns.iter().map(|c| c.column_type()).collect();
    let rows: Vec<Row> = raw_rows
        .into_iter()
        .map(|r| r.into_iter().zip(types.iter()).map(|(v, t)| cell_from_sql(v, *t)).collect())
        .collect();

    let schema = Schema::try_new(columns)?;
    let mut result = Table::new(format!("{}_query", base.name()), schema);
    for row in rows {
        result
            .insert_row(Some(row))
            .map_err(|e| QueryError::QuerySyntaxError(e.to_string()))?;
    }
    result.mark_saved();
    result.set_read_only(true);
    Ok(result)
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CellValue::Text(s) => ToSqlOutput::from(s.as_str()),
            CellValue::Integer(i) => ToSqlOutput::from(*i),
            CellValue::Decimal(f) => ToSqlOutput::from(*f),
            CellValue::Boolean(b) => ToSqlOutput::from(*b),
            CellValue::Date(d) => ToSqlOutput::Owned(Value::Text(format_date(*d))),
            CellValue::Missing => ToSqlOutput::Owned(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn people() -> Table {
        let schema = Schema::try_new(vec![
            Column::with_width("NAME", ColumnType::Text, 20, 0),
            Column::with_width("AGE", ColumnType::Integer, 3, 0),
            Column::with_width("SCORE", ColumnType::Decimal, 6, 1),
            Column::new("ACTIVE", ColumnType::Boolean),
            Column::new("JOINED", ColumnType::Date),
        ])
        .unwrap();
        let d = |y, m, day| CellValue::Date(NaiveDate::from_ymd_opt(y, m, day).unwrap());
        Table::with_rows(
            "people",
            schema,
            vec![
                vec![CellValue::from("Ana"), CellValue::Integer(34), CellValue::Decimal(7.5), CellValue::Boolean(true), d(2020, 1, 5)],
                vec![CellValue::from("Bruno"), CellValue::Integer(19), CellValue::Decimal(9.0), CellValue::Boolean(false), d(2021, 6, 1)],
                vec![CellValue::from("Carla"), CellValue::Missing, CellValue::Missing, CellValue::Missing, CellValue::Missing],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_select_preserves_types_and_widths() {
        let result = query(&people(), "SELECT * FROM data WHERE AGE >= 18 ORDER BY AGE").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get_value(0, "NAME").unwrap(), &CellValue::from("Bruno"));
        assert_eq!(result.get_value(0, "ACTIVE").unwrap(), &CellValue::Boolean(false));
        assert_eq!(
            result.get_value(1, "JOINED").unwrap(),
            &CellValue::Date(NaiveDate::from_ymd_opt(2020, 1, 5).unwrap())
        );
        assert_eq!(result.get_value(1, "SCORE").unwrap(), &CellValue::Decimal(7.5));

        let score = &result.columns()[2];
        assert_eq!(score.column_type(), ColumnType::Decimal);
        assert_eq!((score.length(), score.decimals()), (6, 1));
        assert!(result.is_read_only());
        assert!(!result.is_modified());
    }

    #[test]
    fn test_missing_round_trips_as_null() {
        let result = query(&people(), "SELECT NAME, AGE FROM data WHERE AGE IS NULL").unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get_value(0, "AGE").unwrap(), &CellValue::Missing);
    }

    #[test]
    fn test_expression_columns_are_inferred() {
        let result = query(&people(), "SELECT COUNT(*) AS N, AVG(SCORE) AS MEAN, UPPER(NAME) AS U FROM data").unwrap();
        assert_eq!(result.schema().get_column_type("N"), Some(ColumnType::Integer));
        assert_eq!(result.schema().get_column_type("MEAN"), Some(ColumnType::Decimal));
        assert_eq!(result.schema().get_column_type("U"), Some(ColumnType::Text));
        assert_eq!(result.get_value(0, "N").unwrap(), &CellValue::Integer(3));
        assert_eq!(result.get_value(0, "U").unwrap(), &CellValue::from("ANA"));
    }

    #[test]
    fn test_duplicate_result_names_are_renamed() {
        let result = query(&people(), "SELECT NAME, NAME FROM data").unwrap();
        assert_eq!(result.schema().get_column_names(), vec!["NAME", "NAME_2"]);
    }

    #[test]
    fn test_empty_query() {
        assert!(matches!(query(&people(), "   "), Err(QueryError::EmptyQuery)));
    }

    #[test]
    fn test_missing_table_reference() {
        assert!(matches!(
            query(&people(), "SELECT 1"),
            Err(QueryError::MissingTableReference(name)) if name == "data"
        ));
        // "database" is not a reference to "data"
        assert!(matches!(
            query(&people(), "SELECT * FROM database"),
            Err(QueryError::MissingTableReference(_))
        ));
    }

    #[test]
    fn test_syntax_error_wraps_backend_message() {
        match query(&people(), "SELEC * FROM data") {
            Err(QueryError::QuerySyntaxError(msg)) => assert!(msg.contains("syntax error")),
            other => panic!("expected syntax error, got {:?}", other.map(|t| t.len())),
        }
        assert!(matches!(
            query(&people(), "SELECT NOPE FROM data"),
            Err(QueryError::QuerySyntaxError(_))
        ));
    }

    #[test]
    fn test_statement_without_result_set() {
        assert!(matches!(
            query(&people(), "DELETE FROM data"),
            Err(QueryError::NoResultSet)
        ));
    }

    #[test]
    fn test_custom_table_name() {
        let backend = SqliteBackend::new("clients");
        let result = backend.run(&people(), "select name from CLIENTS where active").unwrap();
        assert_eq!(result.len(), 1);
        assert!(matches!(
            backend.run(&people(), "SELECT * FROM data"),
            Err(QueryError::MissingTableReference(_))
        ));
    }

    #[test]
    fn test_base_table_is_untouched() {
        let base = people();
        let result = query(&base, "SELECT NAME FROM data").unwrap();
        assert_ne!(result.id(), base.id());
        assert_eq!(base.len(), 3);
        assert!(!base.is_modified());
    }
}
