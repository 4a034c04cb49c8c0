//! Structured statements handed to a statement preparer.

use super::query::QueryParam;

/// Parameters attached to one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementParams {
    /// Bound in placeholder order.
    Positional(Vec<QueryParam>),
    /// Bound by `:name` placeholders; the preparer turns them into positional ones.
    Named(Vec<(String, QueryParam)>),
    /// Both kinds were bound. Kept so nothing is lost; preparers reject it.
    Mixed {
        positional: Vec<QueryParam>,
        named: Vec<(String, QueryParam)>,
    },
}

impl Default for StatementParams {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

/// One SQL statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: StatementParams,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: StatementParams::default(),
        }
    }

    /// Add a positional parameter.
    ///
    /// On a statement that already has named parameters the binding becomes
    /// [`StatementParams::Mixed`].
    pub fn bind(mut self, value: impl Into<QueryParam>) -> Self {
        let value = value.into();
        self.params = match std::mem::take(&mut self.params) {
            StatementParams::Positional(mut args) => {
                args.push(value);
                StatementParams::Positional(args)
            }
            StatementParams::Named(named) => StatementParams::Mixed {
                positional: vec![value],
                named,
            },
            StatementParams::Mixed {
                mut positional,
                named,
            } => {
                positional.push(value);
                StatementParams::Mixed { positional, named }
            }
        };
        self
    }

    /// Add a named parameter, referenced as `:name` in the SQL text.
    pub fn bind_named(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        let entry = (name.into(), value.into());
        self.params = match std::mem::take(&mut self.params) {
            // Nothing bound yet
            StatementParams::Positional(args) if args.is_empty() => {
                StatementParams::Named(vec![entry])
            }
            StatementParams::Positional(positional) => StatementParams::Mixed {
                positional,
                named: vec![entry],
            },
            StatementParams::Named(mut named) => {
                named.push(entry);
                StatementParams::Named(named)
            }
            StatementParams::Mixed {
                positional,
                mut named,
            } => {
                named.push(entry);
                StatementParams::Mixed { positional, named }
            }
        };
        self
    }

    pub fn has_params(&self) -> bool {
        match &self.params {
            StatementParams::Positional(args) => !args.is_empty(),
            StatementParams::Named(args) => !args.is_empty(),
            StatementParams::Mixed { .. } => true,
        }
    }
}

/// A single statement or an ordered sequence of statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Statements {
    Single(Statement),
    Sequence(Vec<Statement>),
}

impl Statements {
    pub fn as_slice(&self) -> &[Statement] {
        match self {
            Self::Single(stmt) => std::slice::from_ref(stmt),
            Self::Sequence(stmts) => stmts,
        }
    }
}

impl From<Statement> for Statements {
    fn from(stmt: Statement) -> Self {
        Self::Single(stmt)
    }
}

impl From<Vec<Statement>> for Statements {
    fn from(stmts: Vec<Statement>) -> Self {
        Self::Sequence(stmts)
    }
}

/// Query text plus ordered arguments, ready for execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedQuery {
    pub query: String,
    pub args: Vec<QueryParam>,
}
