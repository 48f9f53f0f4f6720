//! Recursive descent parser: update statement → [`UpdateOperation`].
//!
//! The grammar is the SPARQL 1.1 update subset the engine can turn into a
//! concrete quad diff: data blocks, `DELETE WHERE`, and modify operations
//! whose where-pattern is a basic graph pattern (optionally inside `GRAPH`
//! blocks). Everything else is rejected up front with the offending
//! fragment, before either store is touched.

use std::collections::HashMap;

use crate::error::ParseError;
use crate::quad::{GraphName, Quad};
use crate::term::{RDF_TYPE, Term, XSD_BOOLEAN, XSD_DECIMAL, XSD_DOUBLE, XSD_INTEGER};

use super::lexer::{self, Span, Token, TokenKind};

/// A term or a variable in a template or where-pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternTerm {
    Term(Term),
    Var(String),
}

impl PatternTerm {
    pub fn var(&self) -> Option<&str> {
        match self {
            PatternTerm::Var(name) => Some(name),
            PatternTerm::Term(_) => None,
        }
    }
}

/// The graph a pattern or template quad lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphPattern {
    Default,
    Named(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadPattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
    pub graph: GraphPattern,
}

impl QuadPattern {
    /// Variable names mentioned by this pattern, graph included.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        let graph = match &self.graph {
            GraphPattern::Var(name) => Some(name.as_str()),
            _ => None,
        };
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(PatternTerm::var)
            .chain(graph)
    }
}

/// A parsed update statement.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    InsertData(Vec<Quad>),
    DeleteData(Vec<Quad>),
    /// `DELETE WHERE { .. }`: the pattern doubles as the delete template.
    DeleteWhere(Vec<QuadPattern>),
    /// `[WITH <g>] DELETE {..} INSERT {..} WHERE {..}` and its one-sided
    /// forms. `WITH` is already folded into the graphs of every pattern.
    Modify {
        delete: Vec<QuadPattern>,
        insert: Vec<QuadPattern>,
        pattern: Vec<QuadPattern>,
    },
}

/// Prefix for variables standing in for where-pattern blank nodes.
pub const BLANK_VAR_PREFIX: &str = "_bnode_";

/// Parse a single update operation.
pub fn parse_update(input: &str) -> Result<UpdateOperation, ParseError> {
    let tokens = lexer::tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
        prefixes: HashMap::new(),
        base: None,
    };
    parser.prologue()?;
    let operation = parser.operation()?;
    if parser.eat(|k| matches!(k, TokenKind::Semicolon)) {
        parser.prologue()?;
    }
    if let Some(token) = parser.peek() {
        let offset = token.span.start;
        return Err(parser.unsupported("multiple operations", offset));
    }
    Ok(operation)
}

/// What a block may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockMode {
    /// `INSERT DATA` / `DELETE DATA`: ground quads only.
    Data { allow_blank: bool },
    /// Templates: variables allowed, blank nodes only when inserting.
    Template { allow_blank: bool },
    /// Where-patterns: blank nodes act as variables.
    Pattern,
}

impl BlockMode {
    fn allows_vars(self) -> bool {
        !matches!(self, BlockMode::Data { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Subject,
    Predicate,
    Object,
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    prefixes: HashMap<String, String>,
    base: Option<String>,
}

impl Parser<'_> {
    // -- token plumbing ----------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, pred: impl Fn(&TokenKind) -> bool) -> bool {
        if self.peek().is_some_and(|t| pred(&t.kind)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn end_offset(&self) -> usize {
        self.input.len()
    }

    fn here(&self) -> usize {
        self.peek().map(|t| t.span.start).unwrap_or(self.end_offset())
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected `{keyword}`"), self.here()))
        }
    }

    fn expect(&mut self, pred: impl Fn(&TokenKind) -> bool, what: &str) -> Result<Span, ParseError> {
        match self.peek() {
            Some(token) if pred(&token.kind) => {
                let span = token.span;
                self.pos += 1;
                Ok(span)
            }
            _ => Err(self.syntax(format!("expected {what}"), self.here())),
        }
    }

    fn syntax(&self, message: impl Into<String>, offset: usize) -> ParseError {
        ParseError::Syntax {
            message: message.into(),
            fragment: lexer::fragment_at(self.input, offset),
            offset,
        }
    }

    fn unsupported(&self, construct: &str, offset: usize) -> ParseError {
        ParseError::Unsupported {
            construct: construct.to_string(),
            fragment: lexer::fragment_at(self.input, offset),
            offset,
        }
    }

    // -- prologue and operations -------------------------------------------

    fn prologue(&mut self) -> Result<(), ParseError> {
        loop {
            if self.eat_keyword("PREFIX") {
                let offset = self.here();
                let prefix = match self.next() {
                    Some(Token {
                        kind: TokenKind::PrefixedName { prefix, local },
                        ..
                    }) if local.is_empty() => prefix,
                    _ => return Err(self.syntax("expected `prefix:` after PREFIX", offset)),
                };
                let offset = self.here();
                let iri = match self.next() {
                    Some(Token {
                        kind: TokenKind::Iri(raw),
                        ..
                    }) => self.resolve_iri(&raw),
                    _ => return Err(self.syntax("expected <iri> in PREFIX declaration", offset)),
                };
                self.prefixes.insert(prefix, iri);
            } else if self.eat_keyword("BASE") {
                let offset = self.here();
                match self.next() {
                    Some(Token {
                        kind: TokenKind::Iri(raw),
                        ..
                    }) => self.base = Some(self.resolve_iri(&raw)),
                    _ => return Err(self.syntax("expected <iri> after BASE", offset)),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn operation(&mut self) -> Result<UpdateOperation, ParseError> {
        let offset = self.here();
        for keyword in ["LOAD", "CLEAR", "DROP", "CREATE", "ADD", "MOVE", "COPY"] {
            if self.is_keyword(keyword) {
                return Err(self.unsupported(&format!("{keyword} (graph management)"), offset));
            }
        }

        if self.eat_keyword("INSERT") {
            if self.eat_keyword("DATA") {
                let quads = self.quad_block(BlockMode::Data { allow_blank: true }, &GraphPattern::Default)?;
                return Ok(UpdateOperation::InsertData(ground(quads)));
            }
            return self.modify(GraphPattern::Default, false);
        }
        if self.eat_keyword("DELETE") {
            if self.eat_keyword("DATA") {
                let quads = self.quad_block(BlockMode::Data { allow_blank: false }, &GraphPattern::Default)?;
                return Ok(UpdateOperation::DeleteData(ground(quads)));
            }
            if self.eat_keyword("WHERE") {
                let pattern = self.quad_block(BlockMode::Template { allow_blank: false }, &GraphPattern::Default)?;
                return Ok(UpdateOperation::DeleteWhere(pattern));
            }
            return self.modify(GraphPattern::Default, true);
        }
        if self.eat_keyword("WITH") {
            let graph = self.graph_iri()?;
            let graph = GraphPattern::Named(graph);
            if self.eat_keyword("DELETE") {
                return self.modify(graph, true);
            }
            self.expect_keyword("INSERT")?;
            return self.modify(graph, false);
        }
        Err(self.syntax(
            "expected INSERT, DELETE or WITH",
            offset,
        ))
    }

    /// The rest of a modify operation, after its leading DELETE or INSERT.
    fn modify(&mut self, graph: GraphPattern, has_delete: bool) -> Result<UpdateOperation, ParseError> {
        let mut delete = Vec::new();
        let mut insert = Vec::new();
        if has_delete {
            delete = self.quad_block(BlockMode::Template { allow_blank: false }, &graph)?;
            if self.eat_keyword("INSERT") {
                insert = self.quad_block(BlockMode::Template { allow_blank: true }, &graph)?;
            }
        } else {
            insert = self.quad_block(BlockMode::Template { allow_blank: true }, &graph)?;
        }
        if self.is_keyword("USING") {
            return Err(self.unsupported("USING", self.here()));
        }
        self.expect_keyword("WHERE")?;
        let pattern = self.quad_block(BlockMode::Pattern, &graph)?;
        Ok(UpdateOperation::Modify {
            delete,
            insert,
            pattern,
        })
    }

    fn graph_iri(&mut self) -> Result<String, ParseError> {
        let offset = self.here();
        match self.next() {
            Some(Token {
                kind: TokenKind::Iri(raw),
                ..
            }) => {
                let iri = self.resolve_iri(&raw);
                Term::iri(iri.clone())
                    .validate()
                    .map_err(|source| ParseError::InvalidTerm { offset, source })?;
                Ok(iri)
            }
            Some(Token {
                kind: TokenKind::PrefixedName { prefix, local },
                ..
            }) => {
                let iri = self.expand(&prefix, &local, offset)?;
                Ok(iri)
            }
            _ => Err(self.syntax("expected graph IRI", offset)),
        }
    }

    // -- blocks --------------------------------------------------------------

    /// `{ triples (GRAPH g { triples })* }`
    fn quad_block(&mut self, mode: BlockMode, graph: &GraphPattern) -> Result<Vec<QuadPattern>, ParseError> {
        self.expect(|k| matches!(k, TokenKind::LBrace), "`{`")?;
        let mut out = Vec::new();
        loop {
            let offset = self.here();
            if self.eat(|k| matches!(k, TokenKind::RBrace)) {
                return Ok(out);
            }
            if self.eat_keyword("GRAPH") {
                let inner = self.graph_name(mode)?;
                self.triples(mode, &inner, true, &mut out)?;
                self.eat(|k| matches!(k, TokenKind::Dot));
                continue;
            }
            if mode == BlockMode::Pattern {
                self.reject_pattern_keyword()?;
            }
            match self.peek().map(|t| &t.kind) {
                None => return Err(self.syntax("unterminated block, expected `}`", offset)),
                Some(TokenKind::LBrace) => {
                    return Err(self.unsupported("nested group pattern", offset));
                }
                _ => {}
            }
            self.triples(mode, graph, false, &mut out)?;
        }
    }

    fn graph_name(&mut self, mode: BlockMode) -> Result<GraphPattern, ParseError> {
        let offset = self.here();
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Var(name)) => {
                if !mode.allows_vars() {
                    return Err(self.syntax("variables are not allowed in data blocks", offset));
                }
                self.pos += 1;
                Ok(GraphPattern::Var(name))
            }
            _ => self.graph_iri().map(GraphPattern::Named),
        }
    }

    fn reject_pattern_keyword(&self) -> Result<(), ParseError> {
        const UNSUPPORTED: [&str; 9] = [
            "FILTER", "OPTIONAL", "UNION", "MINUS", "BIND", "VALUES", "SERVICE", "SELECT", "EXISTS",
        ];
        for keyword in UNSUPPORTED {
            if self.is_keyword(keyword) {
                return Err(self.unsupported(keyword, self.here()));
            }
        }
        Ok(())
    }

    /// Triples until the closing brace. With `braced`, the triples sit in
    /// their own `{ .. }` (a GRAPH block) and the braces are consumed.
    fn triples(
        &mut self,
        mode: BlockMode,
        graph: &GraphPattern,
        braced: bool,
        out: &mut Vec<QuadPattern>,
    ) -> Result<(), ParseError> {
        if braced {
            self.expect(|k| matches!(k, TokenKind::LBrace), "`{` after GRAPH name")?;
        }
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::RBrace) => {
                    if braced {
                        self.pos += 1;
                    }
                    return Ok(());
                }
                None => return Err(self.syntax("unterminated block, expected `}`", self.end_offset())),
                _ => {}
            }
            if self.is_keyword("GRAPH") {
                if braced {
                    return Err(self.syntax("GRAPH blocks cannot nest", self.here()));
                }
                return Ok(());
            }
            if mode == BlockMode::Pattern {
                self.reject_pattern_keyword()?;
            }
            self.same_subject(mode, graph, out)?;
            if !self.eat(|k| matches!(k, TokenKind::Dot)) {
                if mode == BlockMode::Pattern {
                    self.reject_pattern_keyword()?;
                }
                // The last triple of a block may omit its dot.
                match self.peek().map(|t| &t.kind) {
                    Some(TokenKind::RBrace) => {}
                    _ if self.is_keyword("GRAPH") && !braced => {}
                    _ => return Err(self.syntax("expected `.` or `}`", self.here())),
                }
            }
        }
    }

    fn same_subject(
        &mut self,
        mode: BlockMode,
        graph: &GraphPattern,
        out: &mut Vec<QuadPattern>,
    ) -> Result<(), ParseError> {
        let subject = self.term(mode, Position::Subject)?;
        loop {
            let predicate = self.verb(mode)?;
            loop {
                let object = self.term(mode, Position::Object)?;
                out.push(QuadPattern {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    object,
                    graph: graph.clone(),
                });
                if !self.eat(|k| matches!(k, TokenKind::Comma)) {
                    break;
                }
            }
            if !self.eat(|k| matches!(k, TokenKind::Semicolon)) {
                return Ok(());
            }
            while self.eat(|k| matches!(k, TokenKind::Semicolon)) {}
            if matches!(
                self.peek().map(|t| &t.kind),
                Some(TokenKind::Dot | TokenKind::RBrace) | None
            ) {
                return Ok(());
            }
        }
    }

    fn verb(&mut self, mode: BlockMode) -> Result<PatternTerm, ParseError> {
        let offset = self.here();
        if matches!(
            self.peek().map(|t| &t.kind),
            Some(TokenKind::Punct(_) | TokenKind::LParen)
        ) {
            return Err(self.unsupported("property path", offset));
        }
        let predicate = if matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w == "a") {
            self.pos += 1;
            PatternTerm::Term(Term::iri(RDF_TYPE))
        } else {
            self.term(mode, Position::Predicate)?
        };
        if let Some(Token {
            kind: TokenKind::Punct('/' | '|' | '*' | '+' | '?'),
            span,
        }) = self.peek()
        {
            return Err(self.unsupported("property path", span.start));
        }
        Ok(predicate)
    }

    // -- terms ---------------------------------------------------------------

    fn term(&mut self, mode: BlockMode, position: Position) -> Result<PatternTerm, ParseError> {
        let offset = self.here();
        let Some(token) = self.next() else {
            return Err(self.syntax("unexpected end of statement", offset));
        };
        let term = match token.kind {
            TokenKind::Var(name) => {
                if !mode.allows_vars() {
                    return Err(self.syntax("variables are not allowed in data blocks", offset));
                }
                return Ok(PatternTerm::Var(name));
            }
            TokenKind::Blank(label) => {
                if position == Position::Predicate {
                    return Err(self.syntax("blank node in predicate position", offset));
                }
                match mode {
                    BlockMode::Pattern => {
                        return Ok(PatternTerm::Var(format!("{BLANK_VAR_PREFIX}{label}")));
                    }
                    BlockMode::Data { allow_blank: false } => {
                        return Err(self.syntax("blank nodes are not allowed in DELETE DATA", offset));
                    }
                    BlockMode::Template { allow_blank: false } => {
                        return Err(self.syntax("blank nodes are not allowed in delete templates", offset));
                    }
                    _ => Term::blank(label),
                }
            }
            TokenKind::Iri(raw) => Term::iri(self.resolve_iri(&raw)),
            TokenKind::PrefixedName { prefix, local } => Term::iri(self.expand(&prefix, &local, offset)?),
            TokenKind::Str(value) => self.literal_suffix(value)?,
            TokenKind::Integer(text) => Term::typed_literal(text, XSD_INTEGER),
            TokenKind::Decimal(text) => Term::typed_literal(text, XSD_DECIMAL),
            TokenKind::Double(text) => Term::typed_literal(text, XSD_DOUBLE),
            TokenKind::Word(w) if w.eq_ignore_ascii_case("true") || w.eq_ignore_ascii_case("false") => {
                Term::typed_literal(w.to_ascii_lowercase(), XSD_BOOLEAN)
            }
            TokenKind::LBracket => return Err(self.unsupported("blank node property list `[ ]`", offset)),
            TokenKind::LParen => return Err(self.unsupported("collection `( )`", offset)),
            TokenKind::Word(w) => {
                return Err(self.syntax(format!("unexpected keyword `{w}`"), offset));
            }
            _ => return Err(self.syntax("expected a term", offset)),
        };
        term.validate()
            .map_err(|source| ParseError::InvalidTerm { offset, source })?;
        match position {
            Position::Subject if term.is_literal() => {
                Err(self.syntax("literal in subject position", offset))
            }
            Position::Predicate if !term.is_iri() => {
                Err(self.syntax("predicate must be an IRI", offset))
            }
            _ => Ok(PatternTerm::Term(term)),
        }
    }

    /// Language tag or datatype following a string.
    fn literal_suffix(&mut self, value: String) -> Result<Term, ParseError> {
        if let Some(Token {
            kind: TokenKind::LangTag(tag),
            ..
        }) = self.peek().cloned()
        {
            self.pos += 1;
            return Ok(Term::lang_literal(value, &tag));
        }
        if self.eat(|k| matches!(k, TokenKind::DoubleCaret)) {
            let offset = self.here();
            let datatype = match self.next() {
                Some(Token {
                    kind: TokenKind::Iri(raw),
                    ..
                }) => self.resolve_iri(&raw),
                Some(Token {
                    kind: TokenKind::PrefixedName { prefix, local },
                    ..
                }) => self.expand(&prefix, &local, offset)?,
                _ => return Err(self.syntax("expected datatype IRI after `^^`", offset)),
            };
            return Ok(Term::typed_literal(value, datatype));
        }
        Ok(Term::literal(value))
    }

    fn expand(&self, prefix: &str, local: &str, offset: usize) -> Result<String, ParseError> {
        match self.prefixes.get(prefix) {
            Some(namespace) => Ok(format!("{namespace}{local}")),
            None => Err(ParseError::UndefinedPrefix {
                prefix: prefix.to_string(),
                offset,
            }),
        }
    }

    /// Resolve a possibly relative IRI against `BASE`.
    fn resolve_iri(&self, raw: &str) -> String {
        let Some(base) = &self.base else {
            return raw.to_string();
        };
        if has_scheme(raw) {
            return raw.to_string();
        }
        if raw.is_empty() || raw.starts_with('#') {
            let stem = base.split('#').next().unwrap_or(base);
            return format!("{stem}{raw}");
        }
        if let Some(rest) = raw.strip_prefix("//") {
            let scheme = base.split(':').next().unwrap_or("http");
            return format!("{scheme}://{rest}");
        }
        if raw.starts_with('/') {
            // scheme://authority of the base
            if let Some((scheme, rest)) = base.split_once("://") {
                let authority = rest.split('/').next().unwrap_or(rest);
                return format!("{scheme}://{authority}{raw}");
            }
            return format!("{base}{raw}");
        }
        match base.rfind('/') {
            Some(i) => format!("{}{raw}", &base[..=i]),
            None => format!("{base}{raw}"),
        }
    }
}

fn has_scheme(iri: &str) -> bool {
    iri.split_once(':').is_some_and(|(scheme, _)| {
        scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// Data blocks hold no variables, so every pattern is a concrete quad.
fn ground(patterns: Vec<QuadPattern>) -> Vec<Quad> {
    patterns
        .into_iter()
        .filter_map(|p| match (p.subject, p.predicate, p.object, p.graph) {
            (PatternTerm::Term(s), PatternTerm::Term(p), PatternTerm::Term(o), GraphPattern::Default) => {
                Some(Quad { subject: s, predicate: p, object: o, graph: GraphName::Default })
            }
            (PatternTerm::Term(s), PatternTerm::Term(p), PatternTerm::Term(o), GraphPattern::Named(g)) => {
                Some(Quad { subject: s, predicate: p, object: o, graph: GraphName::Named(g) })
            }
            _ => None,
        })
        .collect()
}
