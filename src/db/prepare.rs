//! Statement preparation.
//!
//! Turns a structured [`Statements`] value into the query text and ordered
//! argument list the engines execute.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PreparedQuery, QueryParam, Statement, StatementParams, Statements};

/// Converts structured statements into `(query, args)`.
pub trait StatementPreparer: Send + Sync {
    fn prepare(&self, statements: &Statements) -> DbResult<PreparedQuery>;
}

/// Positional placeholder syntax of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (MySQL, SQLite)
    QuestionMark,
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
}

impl PlaceholderStyle {
    pub fn for_database(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::PostgreSQL => PlaceholderStyle::Numbered,
            DatabaseType::MySQL | DatabaseType::SQLite => PlaceholderStyle::QuestionMark,
        }
    }

    fn render(self, position: usize) -> String {
        match self {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::Numbered => format!("${position}"),
        }
    }
}

/// Preparer shipped with the crate.
///
/// Positional statements pass through untouched. Named `:name` placeholders are
/// rewritten to positional ones in order of appearance, skipping quoted text
/// and `::` casts. A sequence is joined with `";\n"`.
///
/// A joined sequence that binds arguments runs as a single prepared statement.
/// PostgreSQL and MySQL reject more than one command there, so such sequences
/// are refused unless [`bound_sequences`](Self::bound_sequences) is enabled, as
/// it is for SQLite.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPreparer {
    style: PlaceholderStyle,
    bound_sequences: bool,
}

impl DefaultPreparer {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            bound_sequences: false,
        }
    }

    pub fn for_database(db_type: DatabaseType) -> Self {
        Self::new(PlaceholderStyle::for_database(db_type))
            .bound_sequences(db_type == DatabaseType::SQLite)
    }

    /// Allow multi-statement sequences with arguments.
    pub fn bound_sequences(mut self, allowed: bool) -> Self {
        self.bound_sequences = allowed;
        self
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    fn prepare_one(&self, statement: &Statement, args: &mut Vec<QueryParam>) -> DbResult<String> {
        match &statement.params {
            StatementParams::Positional(values) => {
                args.extend(values.iter().cloned());
                Ok(statement.sql.clone())
            }
            StatementParams::Named(values) => self.rewrite_named(&statement.sql, values, args),
            StatementParams::Mixed { .. } => Err(DbError::invalid_input(format!(
                "Statement mixes positional and named parameters: {}",
                statement.sql
            ))),
        }
    }

    fn rewrite_named(
        &self,
        sql: &str,
        values: &[(String, QueryParam)],
        args: &mut Vec<QueryParam>,
    ) -> DbResult<String> {
        let mut out = String::with_capacity(sql.len());
        let mut chars = sql.char_indices().peekable();
        let mut quote: Option<char> = None;

        while let Some((i, c)) = chars.next() {
            if let Some(q) = quote {
                out.push(c);
                if c == q {
                    quote = None;
                }
                continue;
            }

            match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                ':' => {
                    if let Some(&(_, ':')) = chars.peek() {
                        // cast, e.g. value::text
                        chars.next();
                        out.push_str("::");
                        continue;
                    }
                    let name_start = i + 1;
                    let mut name_end = name_start;
                    while let Some(&(j, n)) = chars.peek() {
                        let valid = if j == name_start {
                            n.is_ascii_alphabetic() || n == '_'
                        } else {
                            n.is_ascii_alphanumeric() || n == '_'
                        };
                        if !valid {
                            break;
                        }
                        name_end = j + n.len_utf8();
                        chars.next();
                    }

                    if name_end == name_start {
                        out.push(':');
                        continue;
                    }

                    let name = &sql[name_start..name_end];
                    let value = values
                        .iter()
                        .find(|(key, _)| key == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| {
                            DbError::invalid_input(format!("No value bound for parameter :{name}"))
                        })?;
                    args.push(value);
                    out.push_str(&self.style.render(args.len()));
                }
                _ => out.push(c),
            }
        }

        Ok(out)
    }
}

impl StatementPreparer for DefaultPreparer {
    fn prepare(&self, statements: &Statements) -> DbResult<PreparedQuery> {
        let slice = statements.as_slice();
        if slice.is_empty() {
            return Err(DbError::invalid_input("Statement sequence is empty"));
        }

        if slice.len() > 1 && !self.bound_sequences && slice.iter().any(Statement::has_params) {
            return Err(DbError::invalid_input(
                "A statement sequence with bound parameters cannot run as one prepared \
                 statement on this database; execute the statements one at a time",
            ));
        }

        let mut args = Vec::new();
        let mut queries = Vec::with_capacity(slice.len());
        for statement in slice {
            queries.push(self.prepare_one(statement, &mut args)?);
        }

        Ok(PreparedQuery {
            query: queries.join(";\n"),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> DefaultPreparer {
        DefaultPreparer::new(PlaceholderStyle::QuestionMark)
    }

    fn sqlite() -> DefaultPreparer {
        DefaultPreparer::for_database(DatabaseType::SQLite)
    }

    fn numbered() -> DefaultPreparer {
        DefaultPreparer::new(PlaceholderStyle::Numbered)
    }

    #[test]
    fn test_style_for_database() {
        assert_eq!(
            PlaceholderStyle::for_database(DatabaseType::PostgreSQL),
            PlaceholderStyle::Numbered
        );
        assert_eq!(
            PlaceholderStyle::for_database(DatabaseType::MySQL),
            PlaceholderStyle::QuestionMark
        );
        assert_eq!(
            PlaceholderStyle::for_database(DatabaseType::SQLite),
            PlaceholderStyle::QuestionMark
        );
    }

    #[test]
    fn test_positional_passes_through() {
        let statement = Statement::new("SELECT * FROM t WHERE a = ? AND b = ?")
            .bind(1)
            .bind("x");
        let prepared = question().prepare(&statement.into()).unwrap();

        assert_eq!(prepared.query, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(prepared.args, vec![QueryParam::Int(1), QueryParam::from("x")]);
    }

    #[test]
    fn test_named_rewritten_in_order_of_appearance() {
        let statement = Statement::new("UPDATE t SET name = :name WHERE id = :id")
            .bind_named("id", 7)
            .bind_named("name", "bob");

        let prepared = numbered().prepare(&statement.clone().into()).unwrap();
        assert_eq!(prepared.query, "UPDATE t SET name = $1 WHERE id = $2");
        assert_eq!(prepared.args, vec![QueryParam::from("bob"), QueryParam::Int(7)]);

        let prepared = question().prepare(&statement.into()).unwrap();
        assert_eq!(prepared.query, "UPDATE t SET name = ? WHERE id = ?");
    }

    #[test]
    fn test_named_repeated_binds_twice() {
        let statement = Statement::new("SELECT :v AS a, :v AS b").bind_named("v", true);
        let prepared = question().prepare(&statement.into()).unwrap();

        assert_eq!(prepared.query, "SELECT ? AS a, ? AS b");
        assert_eq!(prepared.args.len(), 2);
    }

    #[test]
    fn test_named_skips_quotes_and_casts() {
        let statement = Statement::new("SELECT ':skip', \"a:b\", :id::text, '12:30'")
            .bind_named("id", 1);
        let prepared = numbered().prepare(&statement.into()).unwrap();

        assert_eq!(prepared.query, "SELECT ':skip', \"a:b\", $1::text, '12:30'");
        assert_eq!(prepared.args, vec![QueryParam::Int(1)]);
    }

    #[test]
    fn test_named_unknown_parameter_is_invalid_input() {
        let statement = Statement::new("SELECT :missing").bind_named("other", 1);
        let err = question().prepare(&statement.into()).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_sequence_joined_with_args_concatenated() {
        let statements = Statements::Sequence(vec![
            Statement::new("INSERT INTO t VALUES (?)").bind(1),
            Statement::new("INSERT INTO t VALUES (:v)").bind_named("v", 2),
        ]);
        let prepared = sqlite().prepare(&statements).unwrap();

        assert_eq!(
            prepared.query,
            "INSERT INTO t VALUES (?);\nINSERT INTO t VALUES (?)"
        );
        assert_eq!(prepared.args, vec![QueryParam::Int(1), QueryParam::Int(2)]);
    }

    #[test]
    fn test_bound_sequence_rejected_where_prepared_statements_hold_one_command() {
        let statements = Statements::Sequence(vec![
            Statement::new("SELECT :a").bind_named("a", 1),
            Statement::new("SELECT 2"),
        ]);
        for preparer in [
            DefaultPreparer::for_database(DatabaseType::PostgreSQL),
            DefaultPreparer::for_database(DatabaseType::MySQL),
        ] {
            let err = preparer.prepare(&statements).unwrap_err();
            assert!(matches!(err, DbError::InvalidInput { .. }));
        }
    }

    #[test]
    fn test_unbound_sequence_allowed_everywhere() {
        let statements = Statements::Sequence(vec![
            Statement::new("INSERT INTO t VALUES (1)"),
            Statement::new("INSERT INTO t VALUES (2)"),
        ]);
        let prepared = numbered().prepare(&statements).unwrap();
        assert_eq!(
            prepared.query,
            "INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)"
        );
        assert!(prepared.args.is_empty());
    }

    #[test]
    fn test_numbered_continues_across_bound_sequence() {
        let statements = Statements::Sequence(vec![
            Statement::new("SELECT :a").bind_named("a", 1),
            Statement::new("SELECT :b").bind_named("b", 2),
        ]);
        let prepared = numbered().bound_sequences(true).prepare(&statements).unwrap();
        assert_eq!(prepared.query, "SELECT $1;\nSELECT $2");
    }

    #[test]
    fn test_mixed_binding_is_invalid_input() {
        let statement = Statement::new("SELECT ?, :id").bind(1).bind_named("id", 2);
        let err = question().prepare(&statement.into()).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_empty_sequence_is_invalid_input() {
        let err = question()
            .prepare(&Statements::Sequence(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_lone_colon_kept() {
        let statement = Statement::new("SELECT 'a' || : || 'b'").bind_named("x", 1);
        let prepared = question().prepare(&statement.into()).unwrap();
        assert_eq!(prepared.query, "SELECT 'a' || : || 'b'");
        assert!(prepared.args.is_empty());
    }
}
