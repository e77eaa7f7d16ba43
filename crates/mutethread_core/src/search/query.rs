//! Tag-oriented query language.
//!
//! # Responsibility
//! - Parse notmuch-style query strings into an expression tree.
//! - Compile expressions into parameterized SQL predicates over `messages`.
//!
//! The grammar is built on [`chumsky`] combinators.
//!
//! # Invariants
//! - User text only ever reaches SQL through bind values.
//! - Operator precedence is `NOT > AND > OR`; juxtaposition means `AND`.
//! - Operators are recognized case-insensitively and only when unquoted.
//! - A parenthesized group is never merged into the enclosing `AND`.

use chumsky::prelude::*;
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type for query parsing.
pub type QueryResult<T> = Result<T, QueryError>;

/// Malformed query syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Query has no terms.
    Empty,
    /// `(` without `)` or the reverse; position is a byte offset.
    UnbalancedParen { position: usize },
    /// Operator keyword where a term was expected.
    UnexpectedOperator { operator: String, position: usize },
    /// Query ends where a term was expected.
    UnexpectedEnd,
    /// `name:value` with an unsupported `name`.
    UnknownPrefix { prefix: String, position: usize },
    /// `name:` with nothing after it.
    EmptyValue { prefix: String, position: usize },
    /// `"` without its closing partner.
    UnterminatedQuote { position: usize },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "query is empty"),
            Self::UnbalancedParen { position } => {
                write!(f, "unbalanced parenthesis at offset {position}")
            }
            Self::UnexpectedOperator { operator, position } => {
                write!(f, "unexpected operator `{operator}` at offset {position}")
            }
            Self::UnexpectedEnd => write!(f, "query ends where a term was expected"),
            Self::UnknownPrefix { prefix, position } => {
                write!(f, "unknown prefix `{prefix}:` at offset {position}")
            }
            Self::EmptyValue { prefix, position } => {
                write!(f, "empty value for `{prefix}:` at offset {position}")
            }
            Self::UnterminatedQuote { position } => {
                write!(f, "unterminated quote starting at offset {position}")
            }
        }
    }
}

impl Error for QueryError {}

/// Header fields addressable from queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    From,
    To,
    Cc,
    Subject,
}

impl HeaderField {
    pub fn header_name(self) -> &'static str {
        match self {
            Self::From => "From",
            Self::To => "To",
            Self::Cc => "Cc",
            Self::Subject => "Subject",
        }
    }
}

/// One leaf predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// `*`: every message.
    All,
    /// `tag:<name>`: exact tag name.
    Tag(String),
    /// `from:`/`to:`/`cc:`/`subject:` substring match.
    Header { field: HeaderField, value: String },
    /// `id:<message-id>`: exact RFC 5322 Message-ID.
    MessageId(String),
    /// `thread:<id>`: exact store thread id.
    Thread(String),
    /// Bare word: subject substring match.
    Text(String),
}

/// Parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Term(Term),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// A parsed query, ready to be compiled against the store schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    expr: Expr,
    // Top level is a bare `AND` chain rather than a parenthesized group.
    conjunctive: bool,
}

impl Query {
    /// Parses query text.
    ///
    /// # Errors
    /// - Returns [`QueryError`] for any malformed syntax.
    pub fn parse(text: &str) -> QueryResult<Self> {
        if text.trim().is_empty() {
            return Err(QueryError::Empty);
        }
        let node = query().parse(text).into_result().map_err(|errs| {
            let offset = errs.first().map_or(text.len(), |err| err.span().start);
            syntax_error(text, offset)
        })?;
        let conjunctive = matches!(node, Node::And(_));
        Ok(Self {
            expr: lower(node)?,
            conjunctive,
        })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Top-level `AND` operands; a single expression otherwise.
    ///
    /// A parenthesized group stays one operand.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match &self.expr {
            Expr::And(items) if self.conjunctive => items.iter().collect(),
            other => vec![other],
        }
    }
}

/// Compiles `expr` into a boolean SQL predicate over rows of `messages`
/// aliased as `alias`, appending bind values in placeholder order.
pub(crate) fn compile_predicate(expr: &Expr, alias: &str, binds: &mut Vec<Value>) -> String {
    match expr {
        Expr::Term(term) => compile_term(term, alias, binds),
        Expr::Not(inner) => format!("NOT ({})", compile_predicate(inner, alias, binds)),
        Expr::And(items) => join_compiled(items, " AND ", alias, binds),
        Expr::Or(items) => join_compiled(items, " OR ", alias, binds),
    }
}

fn join_compiled(items: &[Expr], separator: &str, alias: &str, binds: &mut Vec<Value>) -> String {
    let parts = items
        .iter()
        .map(|item| format!("({})", compile_predicate(item, alias, binds)))
        .collect::<Vec<_>>();
    parts.join(separator)
}

fn compile_term(term: &Term, alias: &str, binds: &mut Vec<Value>) -> String {
    match term {
        Term::All => "1".to_string(),
        Term::Tag(name) => {
            binds.push(Value::Text(name.clone()));
            format!(
                "EXISTS (
                    SELECT 1
                    FROM message_tags mt
                    INNER JOIN tags t ON t.id = mt.tag_id
                    WHERE mt.message_uuid = {alias}.uuid
                      AND t.name = ?
                )"
            )
        }
        Term::Header { field, value } => header_contains(field.header_name(), value, alias, binds),
        Term::Text(value) => header_contains(HeaderField::Subject.header_name(), value, alias, binds),
        Term::MessageId(value) => {
            binds.push(Value::Text(value.clone()));
            format!("{alias}.message_id = ?")
        }
        Term::Thread(value) => {
            binds.push(Value::Text(value.clone()));
            format!("{alias}.thread_id = ?")
        }
    }
}

fn header_contains(name: &str, value: &str, alias: &str, binds: &mut Vec<Value>) -> String {
    binds.push(Value::Text(name.to_string()));
    binds.push(Value::Text(format!("%{}%", escape_like(value))));
    format!(
        "EXISTS (
            SELECT 1
            FROM message_headers h
            WHERE h.message_uuid = {alias}.uuid
              AND h.name = ?
              AND h.value LIKE ? ESCAPE '\\'
        )"
    )
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

type ParserError<'a> = extra::Err<Rich<'a, char>>;

/// Characters that end an unquoted word.
const SEPARATORS: [char; 7] = [' ', '\t', '\r', '\n', '(', ')', '"'];

/// One chunk of a word's value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Bare(String),
    Quoted {
        text: String,
        position: usize,
        closed: bool,
    },
}

/// `prefix:value` or a bare value, before prefix validation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    prefix: Option<String>,
    pieces: Vec<Piece>,
    position: usize,
}

/// Syntax tree as parsed, with groups and quotes still unchecked.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Word(Word),
    Group {
        inner: Box<Node>,
        position: usize,
        closed: bool,
    },
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

/// Query grammar.
///
/// `not` binds tightest, then `and` (explicit or by juxtaposition), then
/// `or`. Parentheses override precedence.
fn query<'a>() -> impl Parser<'a, &'a str, Node, ParserError<'a>> + Clone {
    recursive(|node| {
        let group = lparen()
            .then(node)
            .then(rparen().or_not())
            .map(|((position, inner), close)| Node::Group {
                inner: Box::new(inner),
                position,
                closed: close.is_some(),
            })
            .labelled("(nested query)");

        let atom = choice((group, word().map(Node::Word))).padded_by(space().repeated());

        let not = keyword("not")
            .repeated()
            .foldr(atom, |_, node| Node::Not(Box::new(node)));

        let and = not
            .clone()
            .then(
                keyword("and")
                    .or_not()
                    .ignore_then(not)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| chain(first, rest, Node::And));

        and.clone()
            .then(keyword("or").ignore_then(and).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| chain(first, rest, Node::Or))
    })
    .then_ignore(end())
}

fn chain(first: Node, rest: Vec<Node>, wrap: fn(Vec<Node>) -> Node) -> Node {
    if rest.is_empty() {
        return first;
    }
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(first);
    items.extend(rest);
    wrap(items)
}

fn keyword<'a>(name: &'static str) -> impl Parser<'a, &'a str, (), ParserError<'a>> + Clone {
    bare()
        .try_map(move |text, span| {
            if text.eq_ignore_ascii_case(name) {
                Ok(())
            } else {
                Err(Rich::custom(span, format!("expected `{name}`")))
            }
        })
        .padded_by(space().repeated())
        .labelled(name)
}

fn word<'a>() -> impl Parser<'a, &'a str, Word, ParserError<'a>> + Clone {
    let prefixed = prefix()
        .then(piece().repeated().collect::<Vec<_>>())
        .map(|(prefix, pieces)| (Some(prefix), pieces));
    let plain = piece()
        .repeated()
        .at_least(1)
        .collect::<Vec<_>>()
        .map(|pieces| (None, pieces));

    choice((prefixed, plain))
        .try_map(|(prefix, pieces), span| {
            if prefix.is_none() {
                if let [Piece::Bare(text)] = pieces.as_slice() {
                    if is_operator(text) {
                        return Err(Rich::custom(span, format!("unexpected `{text}`")));
                    }
                }
            }
            Ok(Word {
                prefix,
                pieces,
                position: span.start,
            })
        })
        .labelled("term")
}

fn prefix<'a>() -> impl Parser<'a, &'a str, String, ParserError<'a>> + Clone {
    any()
        .filter(|ch: &char| ch.is_ascii_alphanumeric() || *ch == '-')
        .repeated()
        .at_least(1)
        .collect::<String>()
        .then_ignore(just(':'))
}

fn piece<'a>() -> impl Parser<'a, &'a str, Piece, ParserError<'a>> + Clone {
    // `""` inside quotes is a literal quote.
    let quoted = dquote()
        .try_map(|_, span| Ok(span.start))
        .then(
            choice((just("\"\"").to('"'), none_of(['"'])))
                .repeated()
                .collect::<String>(),
        )
        .then(dquote().or_not())
        .map(|((position, text), close)| Piece::Quoted {
            text,
            position,
            closed: close.is_some(),
        });

    choice((quoted, bare().map(Piece::Bare)))
}

fn bare<'a>() -> impl Parser<'a, &'a str, String, ParserError<'a>> + Clone {
    none_of(SEPARATORS).repeated().at_least(1).collect()
}

fn space<'a>() -> impl Parser<'a, &'a str, char, ParserError<'a>> + Clone {
    one_of([' ', '\t', '\r', '\n'])
}

fn lparen<'a>() -> impl Parser<'a, &'a str, usize, ParserError<'a>> + Clone {
    just('(')
        .try_map(|_, span: SimpleSpan| Ok(span.start))
        .labelled("opening '('")
}

fn rparen<'a>() -> impl Parser<'a, &'a str, char, ParserError<'a>> + Clone {
    just(')').labelled("closing ')'")
}

fn dquote<'a>() -> impl Parser<'a, &'a str, char, ParserError<'a>> + Clone {
    just('"').labelled("double quote")
}

fn is_operator(text: &str) -> bool {
    ["and", "or", "not"]
        .iter()
        .any(|operator| text.eq_ignore_ascii_case(operator))
}

/// Maps a grammar failure at byte `offset` onto a [`QueryError`].
fn syntax_error(text: &str, offset: usize) -> QueryError {
    let offset = offset.min(text.len());
    let before = text.get(..offset).unwrap_or(text);
    let rest = text.get(offset..).unwrap_or_default();
    let trimmed = rest.trim_start();
    let position = offset + (rest.len() - trimmed.len());

    if trimmed.is_empty() {
        return QueryError::UnexpectedEnd;
    }
    if trimmed.starts_with(')') {
        return QueryError::UnbalancedParen { position };
    }
    let next = first_word(trimmed);
    if is_operator(next) {
        if trimmed[next.len()..].trim().is_empty() {
            return QueryError::UnexpectedEnd;
        }
        return QueryError::UnexpectedOperator {
            operator: next.to_string(),
            position,
        };
    }
    // The failure may sit just past an operator word.
    let word_start = before
        .rfind(|ch: char| SEPARATORS.contains(&ch))
        .map_or(0, |index| index + 1);
    let current = &before[word_start..];
    if is_operator(current) {
        return QueryError::UnexpectedOperator {
            operator: current.to_string(),
            position: word_start,
        };
    }
    QueryError::UnexpectedOperator {
        operator: next.to_string(),
        position,
    }
}

fn first_word(text: &str) -> &str {
    text.split(|ch: char| SEPARATORS.contains(&ch))
        .next()
        .unwrap_or_default()
}

/// Checks groups, quotes and prefixes, producing the final expression.
fn lower(node: Node) -> QueryResult<Expr> {
    match node {
        Node::Word(word) => lower_word(word).map(Expr::Term),
        Node::Group {
            inner,
            position,
            closed,
        } => {
            if !closed {
                return Err(QueryError::UnbalancedParen { position });
            }
            lower(*inner)
        }
        Node::Not(inner) => Ok(Expr::Not(Box::new(lower(*inner)?))),
        Node::And(items) => items
            .into_iter()
            .map(lower)
            .collect::<QueryResult<Vec<_>>>()
            .map(Expr::And),
        Node::Or(items) => items
            .into_iter()
            .map(lower)
            .collect::<QueryResult<Vec<_>>>()
            .map(Expr::Or),
    }
}

fn lower_word(word: Word) -> QueryResult<Term> {
    let mut text = String::new();
    let mut quoted = false;
    for piece in word.pieces {
        match piece {
            Piece::Bare(value) => text.push_str(&value),
            Piece::Quoted {
                text: value,
                position,
                closed,
            } => {
                if !closed {
                    return Err(QueryError::UnterminatedQuote { position });
                }
                quoted = true;
                text.push_str(&value);
            }
        }
    }
    parse_term(text, word.prefix, quoted, word.position)
}

fn parse_term(
    text: String,
    prefix: Option<String>,
    quoted: bool,
    position: usize,
) -> QueryResult<Term> {
    let Some(prefix) = prefix else {
        if text == "*" && !quoted {
            return Ok(Term::All);
        }
        return Ok(Term::Text(text));
    };

    if text.is_empty() {
        return Err(QueryError::EmptyValue { prefix, position });
    }

    let term = match prefix.to_ascii_lowercase().as_str() {
        "tag" => Term::Tag(text),
        "from" => Term::Header {
            field: HeaderField::From,
            value: text,
        },
        "to" => Term::Header {
            field: HeaderField::To,
            value: text,
        },
        "cc" => Term::Header {
            field: HeaderField::Cc,
            value: text,
        },
        "subject" => Term::Header {
            field: HeaderField::Subject,
            value: text,
        },
        "id" | "mid" => Term::MessageId(
            text.trim_start_matches('<')
                .trim_end_matches('>')
                .to_string(),
        ),
        "thread" => Term::Thread(text),
        _ => return Err(QueryError::UnknownPrefix { prefix, position }),
    };
    Ok(term)
}
