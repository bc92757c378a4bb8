//! SQL normalization and fingerprinting.
//!
//! A query is parsed with the PostgreSQL dialect, every literal in the tree is masked, the
//! statements are rendered back in canonical form and the masks are numbered `$1, $2, ...` in the
//! order they appear in the output. The fingerprint is a 128-bit xxh3 digest of the normalized
//! token stream, so two queries that differ only in literal values share a fingerprint.

use std::fmt;
use std::ops::ControlFlow;

use serde::{Serialize, Serializer};
use sqlparser::ast::{
    CastKind, Expr, ObjectName, Statement, UnaryOperator, Value, Visit, VisitMut, Visitor, VisitorMut,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::trace;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::NormalizeError;

/// Keywords PostgreSQL never accepts as bare identifiers. sqlparser is lenient about these in
/// relation position, so `SELECT * FROM WHERE` has to be rejected here.
const RESERVED_KEYWORDS: &[&str] = &[
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC", "BOTH", "CASE",
    "CAST", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT", "CREATE", "CURRENT_CATALOG", "CURRENT_DATE",
    "CURRENT_ROLE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DEFAULT", "DEFERRABLE",
    "DESC", "DISTINCT", "DO", "ELSE", "END", "EXCEPT", "FALSE", "FETCH", "FOR", "FOREIGN", "FROM",
    "GRANT", "GROUP", "HAVING", "IN", "INITIALLY", "INTERSECT", "INTO", "LATERAL", "LEADING", "LIMIT",
    "LOCALTIME", "LOCALTIMESTAMP", "NOT", "NULL", "OFFSET", "ON", "ONLY", "OR", "ORDER", "PLACING",
    "PRIMARY", "REFERENCES", "RETURNING", "SELECT", "SESSION_USER", "SOME", "SYMMETRIC",
    "SYSTEM_USER", "TABLE", "THEN", "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER", "USING",
    "VARIADIC", "WHEN", "WHERE", "WINDOW", "WITH",
];

/// Deterministic digest of a query's structural shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    pub fn as_u128(&self) -> u128 { self.0 }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedQuery {
    /// Input text, byte for byte.
    pub original: String,
    pub normalized: String,
    pub fingerprint: Fingerprint,
}

/// Capability interface so the server can be handed any normalizer at construction time.
pub trait QueryNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> Result<NormalizedQuery, NormalizeError>;
}

/// sqlparser-backed normalizer. Stateless; one instance can be shared by every session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlNormalizer;

impl QueryNormalizer for SqlNormalizer {
    fn normalize(&self, raw: &str) -> Result<NormalizedQuery, NormalizeError> {
        normalize(raw)
    }
}

pub fn normalize(raw: &str) -> Result<NormalizedQuery, NormalizeError> {
    if raw.trim().is_empty() {
        return Err(NormalizeError::EmptyQuery);
    }
    let dialect = PostgreSqlDialect {};
    let mut statements = Parser::parse_sql(&dialect, raw)
        .map_err(|e| NormalizeError::SyntaxError(e.to_string()))?;
    if statements.is_empty() {
        // only separators, e.g. ";"
        return Err(NormalizeError::EmptyQuery);
    }
    for stmt in &statements {
        reject_reserved_relations(stmt)?;
    }

    let sentinel = sentinel_for(raw);
    let mut masker = LiteralMasker { sentinel: &sentinel, highest_param: 0 };
    for stmt in statements.iter_mut() {
        if let ControlFlow::Break(e) = stmt.visit(&mut masker) {
            return Err(e);
        }
    }
    let rendered = statements.iter().map(|s| s.to_string()).collect::<Vec<_>>().join("; ");
    let normalized = number_placeholders(&rendered, &sentinel, masker.highest_param)?;
    let fingerprint = fingerprint(&normalized)?;
    trace!(target: "normalize", %fingerprint, normalized = %normalized, "normalized query");

    Ok(NormalizedQuery { original: raw.to_string(), normalized, fingerprint })
}

/// Fingerprint of already-normalized text: whitespace is dropped, unquoted words are case-folded
/// and every placeholder collapses to the same symbol.
pub fn fingerprint(normalized: &str) -> Result<Fingerprint, NormalizeError> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, normalized)
        .tokenize()
        .map_err(|e| NormalizeError::SyntaxError(e.to_string()))?;
    let mut shape = String::with_capacity(normalized.len());
    for token in tokens {
        let piece = match token {
            Token::Whitespace(_) => continue,
            Token::Placeholder(_) => "?".to_string(),
            Token::Word(w) if w.quote_style.is_none() => w.value.to_lowercase(),
            other => other.to_string(),
        };
        if !shape.is_empty() { shape.push(' '); }
        shape.push_str(&piece);
    }
    Ok(Fingerprint(xxh3_128(shape.as_bytes())))
}

/// Replaces literals with a sentinel placeholder and records the highest `$n` already present.
struct LiteralMasker<'a> {
    sentinel: &'a str,
    highest_param: u32,
}

impl LiteralMasker<'_> {
    fn mask(&self) -> Expr {
        Expr::Value(Value::Placeholder(self.sentinel.to_string()))
    }

    fn is_mask(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Value(Value::Placeholder(p)) if p == self.sentinel)
    }
}

impl VisitorMut for LiteralMasker<'_> {
    type Break = NormalizeError;

    // children are visited first, so a negated literal sees its operand already masked
    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        let replacement = match expr {
            Expr::Value(Value::Placeholder(p)) => {
                match parameter_number(p) {
                    Ok(Some(n)) => self.highest_param = self.highest_param.max(n),
                    Ok(None) => {}
                    Err(e) => return ControlFlow::Break(e),
                }
                None
            }
            Expr::Value(_) => Some(self.mask()),
            Expr::TypedString { data_type, .. } => Some(Expr::Cast {
                kind: CastKind::DoubleColon,
                expr: Box::new(self.mask()),
                data_type: data_type.clone(),
                format: None,
            }),
            Expr::UnaryOp { op: UnaryOperator::Minus | UnaryOperator::Plus, expr: operand }
                if self.is_mask(operand) =>
            {
                Some(self.mask())
            }
            _ => None,
        };
        if let Some(new_expr) = replacement {
            *expr = new_expr;
        }
        ControlFlow::Continue(())
    }
}

struct RelationGuard {
    offending: Option<String>,
}

impl Visitor for RelationGuard {
    type Break = ();

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        for ident in &relation.0 {
            if ident.quote_style.is_none() && is_reserved(&ident.value) {
                self.offending = Some(ident.value.clone());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

fn reject_reserved_relations(stmt: &Statement) -> Result<(), NormalizeError> {
    let mut guard = RelationGuard { offending: None };
    let _ = stmt.visit(&mut guard);
    match guard.offending {
        Some(word) => Err(NormalizeError::SyntaxError(format!("syntax error at or near \"{}\"", word))),
        None => Ok(()),
    }
}

fn is_reserved(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    RESERVED_KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

/// Placeholder name that cannot collide with anything rendered from `raw`.
fn sentinel_for(raw: &str) -> String {
    let mut marker = String::from("__pgq_lit");
    while raw.contains(&marker) {
        marker.push('_');
    }
    format!("${}", marker)
}

/// Number of a `$n` bind parameter. PostgreSQL caps parameter numbers at `i32::MAX`.
fn parameter_number(placeholder: &str) -> Result<Option<u32>, NormalizeError> {
    let Some(digits) = placeholder.strip_prefix('$') else { return Ok(None) };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match digits.parse::<i32>() {
        Ok(n) => Ok(Some(n as u32)),
        Err(_) => Err(NormalizeError::SyntaxError(format!("parameter number too large: {}", placeholder))),
    }
}

fn number_placeholders(rendered: &str, sentinel: &str, highest_param: u32) -> Result<String, NormalizeError> {
    let mut out = String::with_capacity(rendered.len());
    let mut next = highest_param;
    for (i, part) in rendered.split(sentinel).enumerate() {
        if i > 0 {
            next = next
                .checked_add(1)
                .filter(|n| *n <= i32::MAX as u32)
                .ok_or_else(|| NormalizeError::SyntaxError("too many parameters".to_string()))?;
            out.push('$');
            out.push_str(&next.to_string());
        }
        out.push_str(part);
    }
    Ok(out)
}
