//! Filter engine
//!
//! A filter is an optional predicate tree plus an optional limit/offset.
//! Every atom can be evaluated two ways that must agree on flushed entities:
//!
//! - `matches`: in memory, against one candidate entity
//! - `to_sql`: as a SQL fragment the library runs against the store
//!
//! ## Combinators
//!
//! A missing ("null") operand is not the same as false:
//!
//! | expression | result |
//! |---|---|
//! | `AND(null, b)` | `b` |
//! | `OR(null, b)` | true |
//! | `NOT(null)` | false |
//! | `block()` | false |
//! | empty filter | matches everything |
//!
//! ## Hints
//!
//! Any sub-tree can carry a `Hint`. `replace_hint` swaps that sub-tree for
//! another filter and `disable_hint` turns it into a null operand, so one
//! facet of a larger query can change without rebuilding the tree.

pub mod node;
pub mod tag;
pub mod wildcard;

use std::fmt;

use rusqlite::types::Value;

use crate::error::{Error, Result};
use crate::models::{Identity, Tag};

pub use node::{NodeAtom, NodeFilter};
pub use tag::{TagAtom, TagFilter};
pub use wildcard::Wildcard;

/// Parameterized SQL boolean expression
///
/// Fragments compose textually; parameters are positional (`?`) and kept
/// in the same order as the text.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    sql: String,
    params: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn constant(value: bool) -> Self {
        Self::new(if value { "1" } else { "0" }, Vec::new())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Wrap an atom so SQL NULL collapses to false
    pub(crate) fn atom(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(format!("IFNULL(({}), 0)", sql.into()), params)
    }

    fn binary(op: &str, a: Fragment, b: Fragment) -> Self {
        let mut params = a.params;
        params.extend(b.params);
        Self::new(format!("({}) {} ({})", a.sql, op, b.sql), params)
    }

    fn negate(a: Fragment) -> Self {
        Self::new(format!("NOT ({})", a.sql), a.params)
    }
}

/// Library state an in-memory match may need
///
/// Some predicates depend on links rather than on the entity alone
/// ("unused", "linked with", "has a tag ..."). `Library` implements this.
pub trait MatchContext {
    /// Tags linked to a flushed node
    fn node_tags(&self, node: &Identity) -> Result<Vec<Tag>>;

    /// Whether any node links the tag
    fn tag_is_used(&self, tag: &Identity) -> Result<bool>;

    /// Whether the node links the tag
    fn is_linked(&self, node: &Identity, tag: &Identity) -> Result<bool>;
}

/// A leaf predicate with dual evaluation
pub trait Atom: Clone + fmt::Debug {
    type Entity;

    fn matches(&self, entity: &Self::Entity, ctx: &dyn MatchContext) -> Result<bool>;

    fn to_sql(&self) -> Fragment;
}

/// Opaque marker on a filter sub-tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hint(String);

impl Hint {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Hint {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Predicate tree; `None` operands are null
#[derive(Debug, Clone)]
pub enum Expr<A> {
    Atom(A),
    And(Option<Box<Expr<A>>>, Option<Box<Expr<A>>>),
    Or(Option<Box<Expr<A>>>, Option<Box<Expr<A>>>),
    Not(Option<Box<Expr<A>>>),
    Block,
    Hinted(Hint, Option<Box<Expr<A>>>),
}

impl<A: Atom> Expr<A> {
    /// `None` means the tree is null (no opinion)
    fn eval(&self, entity: &A::Entity, ctx: &dyn MatchContext) -> Result<Option<bool>> {
        Ok(match self {
            Expr::Atom(atom) => Some(atom.matches(entity, ctx)?),
            Expr::And(a, b) => {
                let left = eval_opt(a, entity, ctx)?;
                if left == Some(false) {
                    return Ok(Some(false));
                }
                match (left, eval_opt(b, entity, ctx)?) {
                    (None, None) => None,
                    (Some(x), None) | (None, Some(x)) => Some(x),
                    (Some(x), Some(y)) => Some(x && y),
                }
            }
            Expr::Or(a, b) => match (a, b) {
                (Some(a), Some(b)) => Some(
                    a.eval(entity, ctx)?.unwrap_or(true) || b.eval(entity, ctx)?.unwrap_or(true),
                ),
                _ => Some(true),
            },
            Expr::Not(a) => match eval_opt(a, entity, ctx)? {
                None => Some(false),
                Some(x) => Some(!x),
            },
            Expr::Block => Some(false),
            Expr::Hinted(_, inner) => eval_opt(inner, entity, ctx)?,
        })
    }

    fn to_sql(&self) -> Option<Fragment> {
        match self {
            Expr::Atom(atom) => Some(atom.to_sql()),
            Expr::And(a, b) => match (sql_opt(a), sql_opt(b)) {
                (None, None) => None,
                (Some(x), None) | (None, Some(x)) => Some(x),
                (Some(x), Some(y)) => Some(Fragment::binary("AND", x, y)),
            },
            Expr::Or(a, b) => match (a, b) {
                (Some(a), Some(b)) => Some(Fragment::binary(
                    "OR",
                    a.to_sql().unwrap_or_else(|| Fragment::constant(true)),
                    b.to_sql().unwrap_or_else(|| Fragment::constant(true)),
                )),
                _ => Some(Fragment::constant(true)),
            },
            Expr::Not(a) => Some(match sql_opt(a) {
                None => Fragment::constant(false),
                Some(x) => Fragment::negate(x),
            }),
            Expr::Block => Some(Fragment::constant(false)),
            Expr::Hinted(_, inner) => sql_opt(inner),
        }
    }

    fn find_hint(&mut self, hint: &Hint) -> Option<&mut Option<Box<Expr<A>>>> {
        if matches!(self, Expr::Hinted(h, _) if h == hint) {
            return match self {
                Expr::Hinted(_, inner) => Some(inner),
                _ => None,
            };
        }
        match self {
            Expr::Hinted(_, inner) | Expr::Not(inner) => {
                inner.as_deref_mut().and_then(|e| e.find_hint(hint))
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                if let Some(found) = a.as_deref_mut().and_then(|e| e.find_hint(hint)) {
                    return Some(found);
                }
                b.as_deref_mut().and_then(|e| e.find_hint(hint))
            }
            Expr::Atom(_) | Expr::Block => None,
        }
    }

    fn collect_hints(&self, out: &mut Vec<Hint>) {
        match self {
            Expr::Hinted(h, inner) => {
                out.push(h.clone());
                if let Some(e) = inner {
                    e.collect_hints(out);
                }
            }
            Expr::Not(inner) => {
                if let Some(e) = inner {
                    e.collect_hints(out);
                }
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                for e in [a, b].into_iter().flatten() {
                    e.collect_hints(out);
                }
            }
            Expr::Atom(_) | Expr::Block => {}
        }
    }
}

fn eval_opt<A: Atom>(
    expr: &Option<Box<Expr<A>>>,
    entity: &A::Entity,
    ctx: &dyn MatchContext,
) -> Result<Option<bool>> {
    match expr {
        Some(e) => e.eval(entity, ctx),
        None => Ok(None),
    }
}

fn sql_opt<A: Atom>(expr: &Option<Box<Expr<A>>>) -> Option<Fragment> {
    expr.as_ref().and_then(|e| e.to_sql())
}

/// Predicate tree plus paging
#[derive(Debug, Clone)]
pub struct Filter<A> {
    expr: Option<Expr<A>>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl<A> Default for Filter<A> {
    fn default() -> Self {
        Self {
            expr: None,
            limit: None,
            offset: None,
        }
    }
}

impl<A: Atom> Filter<A> {
    /// The empty filter: matches everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn atom(atom: A) -> Self {
        Self::from_expr(Expr::Atom(atom))
    }

    pub fn from_expr(expr: Expr<A>) -> Self {
        Self {
            expr: Some(expr),
            limit: None,
            offset: None,
        }
    }

    /// Unconditional failure
    pub fn block() -> Self {
        Self::from_expr(Expr::Block)
    }

    pub fn expr(&self) -> Option<&Expr<A>> {
        self.expr.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    /// Both sides; paging is kept from `self`
    pub fn and(self, other: Filter<A>) -> Self {
        self.combine(other, Expr::And)
    }

    /// Either side; paging is kept from `self`
    pub fn or(self, other: Filter<A>) -> Self {
        self.combine(other, Expr::Or)
    }

    pub fn negate(self) -> Self {
        Self {
            expr: Some(Expr::Not(self.expr.map(Box::new))),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Mark the whole tree with `hint`
    pub fn hinted(self, hint: impl Into<Hint>) -> Self {
        Self {
            expr: Some(Expr::Hinted(hint.into(), self.expr.map(Box::new))),
            limit: self.limit,
            offset: self.offset,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Replace the sub-tree carrying `hint`; false if no such hint
    pub fn replace_hint(&mut self, hint: &Hint, replacement: Filter<A>) -> bool {
        match self.expr.as_mut().and_then(|e| e.find_hint(hint)) {
            Some(slot) => {
                *slot = replacement.expr.map(Box::new);
                true
            }
            None => false,
        }
    }

    /// Turn the sub-tree carrying `hint` into a null operand
    pub fn disable_hint(&mut self, hint: &Hint) -> bool {
        match self.expr.as_mut().and_then(|e| e.find_hint(hint)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn hints(&self) -> Vec<Hint> {
        let mut out = Vec::new();
        if let Some(e) = &self.expr {
            e.collect_hints(&mut out);
        }
        out
    }

    pub fn has_hint(&self, hint: &Hint) -> bool {
        self.hints().contains(hint)
    }

    /// In-memory evaluation (paging does not apply)
    pub fn matches(&self, entity: &A::Entity, ctx: &dyn MatchContext) -> Result<bool> {
        match &self.expr {
            Some(e) => Ok(e.eval(entity, ctx)?.unwrap_or(true)),
            None => Ok(true),
        }
    }

    /// WHERE-clause fragment (paging not included)
    pub fn to_sql(&self) -> Fragment {
        self.expr
            .as_ref()
            .and_then(|e| e.to_sql())
            .unwrap_or_else(|| Fragment::constant(true))
    }

    /// `LIMIT`/`OFFSET` clause, empty when unpaged
    pub fn paging_sql(&self) -> String {
        match (self.limit, self.offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (limit, Some(offset)) => format!(
                " LIMIT {} OFFSET {}",
                limit.map_or(-1, |l| l.min(i64::MAX as u64) as i64),
                offset
            ),
        }
    }

    fn combine(
        self,
        other: Filter<A>,
        make: fn(Option<Box<Expr<A>>>, Option<Box<Expr<A>>>) -> Expr<A>,
    ) -> Self {
        Self {
            expr: Some(make(self.expr.map(Box::new), other.expr.map(Box::new))),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Numeric comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    /// Parse `=`, `!=`/`<>`/`≠`, `>`, `<`, `>=`/`≥`, `<=`/`≤`
    pub fn parse(op: &str) -> Result<Self> {
        match op.trim() {
            "=" | "==" => Ok(CompareOp::Eq),
            "!=" | "<>" | "≠" => Ok(CompareOp::Ne),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" | "≥" => Ok(CompareOp::Ge),
            "<=" | "≤" => Ok(CompareOp::Le),
            other => Err(Error::invalid_filter(format!(
                "unsupported comparison operator '{}'",
                other
            ))),
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }

    pub fn apply<T: PartialOrd>(self, left: &T, right: &T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Gt => left > right,
            CompareOp::Lt => left < right,
            CompareOp::Ge => left >= right,
            CompareOp::Le => left <= right,
        }
    }
}

/// Exact (case-insensitive) or wildcard text match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    Exact(String),
    Pattern(Wildcard),
}

impl TextMatch {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            TextMatch::Exact(expected) => expected.eq_ignore_ascii_case(text),
            TextMatch::Pattern(w) => w.matches(text),
        }
    }

    /// Comparison of `column` against this match
    pub(crate) fn sql(&self, column: &str) -> (String, Value) {
        match self {
            TextMatch::Exact(expected) => (
                format!("{} = ? COLLATE NOCASE", column),
                Value::Text(expected.clone()),
            ),
            TextMatch::Pattern(w) => (
                format!("{} LIKE ? ESCAPE '\\'", column),
                Value::Text(w.to_like()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Atom over plain integers, context unused
    #[derive(Debug, Clone)]
    struct Is(i64);

    impl Atom for Is {
        type Entity = i64;

        fn matches(&self, entity: &i64, _ctx: &dyn MatchContext) -> Result<bool> {
            Ok(*entity == self.0)
        }

        fn to_sql(&self) -> Fragment {
            Fragment::atom("x = ?", vec![Value::Integer(self.0)])
        }
    }

    struct NoContext;

    impl MatchContext for NoContext {
        fn node_tags(&self, _node: &Identity) -> Result<Vec<Tag>> {
            Ok(Vec::new())
        }
        fn tag_is_used(&self, _tag: &Identity) -> Result<bool> {
            Ok(false)
        }
        fn is_linked(&self, _node: &Identity, _tag: &Identity) -> Result<bool> {
            Ok(false)
        }
    }

    fn is(n: i64) -> Filter<Is> {
        Filter::atom(Is(n))
    }

    fn null() -> Filter<Is> {
        Filter::all()
    }

    fn eval(f: &Filter<Is>, x: i64) -> bool {
        f.matches(&x, &NoContext).unwrap()
    }

    /// Evaluate the SQL form against a one-row table holding `x`
    fn eval_sql(f: &Filter<Is>, x: i64) -> bool {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!("CREATE TABLE t (x); INSERT INTO t VALUES ({});", x))
            .unwrap();
        let frag = f.to_sql();
        let sql = format!("SELECT COUNT(*) FROM t WHERE {}", frag.sql());
        let count: i64 = conn
            .query_row(&sql, rusqlite::params_from_iter(frag.params().iter()), |r| {
                r.get(0)
            })
            .unwrap();
        count == 1
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(eval(&null(), 1));
        assert!(eval_sql(&null(), 1));
    }

    #[test]
    fn test_null_semantics() {
        // AND(null, b) == b
        assert!(eval(&null().and(is(1)), 1));
        assert!(!eval(&null().and(is(1)), 2));
        // OR(null, b) == true
        assert!(eval(&null().or(is(1)), 2));
        // NOT(null) == false
        assert!(!eval(&null().negate(), 1));
        // block
        assert!(!eval(&Filter::block(), 1));
        assert!(!eval(&Filter::block().or(is(2)), 1));
    }

    #[test]
    fn test_sql_agrees_with_memory() {
        let filters = vec![
            is(1),
            is(1).negate(),
            is(1).or(is(2)),
            is(1).and(is(2)),
            null().and(is(1)),
            null().or(is(3)),
            null().negate(),
            null().negate().negate(),
            is(1).and(null()).negate(),
            Filter::block(),
            Filter::block().negate().and(is(2)),
            is(1).or(null()).and(is(2)),
        ];
        for f in &filters {
            for x in 0..4 {
                assert_eq!(eval(f, x), eval_sql(f, x), "filter {:?} on {}", f, x);
            }
        }
    }

    #[test]
    fn test_replace_hint() {
        let mut f = is(1).hinted("facet").and(is(1).or(is(2)));
        assert!(eval(&f, 1));
        assert!(f.replace_hint(&Hint::new("facet"), is(2)));
        assert!(!eval(&f, 1));
        assert!(eval(&f, 2));
        assert!(eval_sql(&f, 2));
        assert!(!f.replace_hint(&Hint::new("missing"), is(3)));
    }

    #[test]
    fn test_disable_hint_makes_operand_null() {
        let mut f = is(1).hinted("facet").and(is(2).hinted("other"));
        assert!(!eval(&f, 2));
        assert!(f.disable_hint(&Hint::new("facet")));
        assert!(eval(&f, 2));
        assert!(eval_sql(&f, 2));
        assert!(!eval(&f, 1));
        // The hint survives so it can be re-enabled
        assert!(f.has_hint(&Hint::new("facet")));
        assert!(f.replace_hint(&Hint::new("facet"), is(2)));
        assert!(eval(&f, 2));
    }

    #[test]
    fn test_hints_listed() {
        let f = is(1).hinted("a").or(is(2).hinted("b").negate());
        assert_eq!(f.hints(), vec![Hint::new("a"), Hint::new("b")]);
    }

    #[test]
    fn test_paging_sql() {
        assert_eq!(null().paging_sql(), "");
        assert_eq!(null().with_limit(5).paging_sql(), " LIMIT 5");
        assert_eq!(
            null().with_limit(5).with_offset(10).paging_sql(),
            " LIMIT 5 OFFSET 10"
        );
        assert_eq!(null().with_offset(3).paging_sql(), " LIMIT -1 OFFSET 3");
    }

    #[test]
    fn test_compare_op_parse() {
        assert_eq!(CompareOp::parse("≥").unwrap(), CompareOp::Ge);
        assert_eq!(CompareOp::parse("<>").unwrap(), CompareOp::Ne);
        let err = CompareOp::parse("=~").unwrap_err();
        assert!(matches!(err, Error::InvalidFilterArgument(_)));
    }

    #[test]
    fn test_text_match() {
        assert!(TextMatch::Exact("Lewis".into()).matches("LEWIS"));
        assert!(!TextMatch::Exact("Lewis".into()).matches("Lewis Carrol"));
        assert!(TextMatch::Pattern(Wildcard::new("Lew*")).matches("lewis carrol"));
    }
}
