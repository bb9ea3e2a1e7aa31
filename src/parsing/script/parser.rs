//! Recursive-descent parser for Paradox-style script.
//!
//! Total: any input yields an AST. Errors become diagnostics on a partial
//! tree and flip `parse_ok` to false; callers never see a panic or an
//! early return.

use super::ast::{AstNode, Operator, ValueType};
use super::lexer::{Token, TokenKind, tokenize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: u32, col: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            col,
            message: message.into(),
        }
    }
}

/// Result of a parse. `parse_ok` is true iff no diagnostics were emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub root: AstNode,
    pub diagnostics: Vec<Diagnostic>,
    pub parse_ok: bool,
}

impl ParseOutcome {
    pub fn node_count(&self) -> u64 {
        self.root.node_count()
    }
}

/// Parse script source into an AST.
pub fn parse_source(source: &str, filename: &str) -> ParseOutcome {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let (tokens, mut diagnostics) = tokenize(source);
    let mut parser = Parser {
        tokens,
        pos: 0,
        diagnostics: Vec::new(),
    };
    let children = parser.parse_top_level();
    diagnostics.extend(parser.diagnostics);
    let parse_ok = diagnostics.is_empty();
    ParseOutcome {
        root: AstNode::Root {
            filename: filename.to_string(),
            children,
        },
        diagnostics,
        parse_ok,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

/// What a braced group turned out to hold.
enum Braced {
    /// At least one `key op value` statement: a named block body.
    Statements(Vec<AstNode>),
    /// Only bare values (or nothing): a list.
    Values(Vec<AstNode>),
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn diagnose(&mut self, line: u32, col: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(line, col, message));
    }

    /// Parse top-level statements until EOF. Block bodies go through
    /// [`Parser::parse_braced`] instead.
    fn parse_top_level(&mut self) -> Vec<AstNode> {
        let mut out = Vec::new();
        while let Some(tok) = self.peek() {
            match &tok.kind {
                TokenKind::RBrace => {
                    let (line, col) = (tok.line, tok.col);
                    self.bump();
                    self.diagnose(line, col, "unexpected '}'");
                }
                TokenKind::Word(_) | TokenKind::Str(_) => {
                    if matches!(self.peek2().map(|t| &t.kind), Some(TokenKind::Op(_))) {
                        if let Some(stmt) = self.parse_keyed_statement() {
                            out.push(stmt);
                        }
                    } else {
                        // Bare value at top level: keep it in the tree,
                        // flag the file.
                        let tok = self.bump().expect("peeked");
                        let (line, col) = (tok.line, tok.col);
                        out.push(self.value_node(tok));
                        self.diagnose(line, col, "bare value outside a list");
                    }
                }
                TokenKind::LBrace => {
                    let (line, col) = (tok.line, tok.col);
                    self.bump();
                    // Anonymous braced group in statement position: keep
                    // the contents as a list, flag the file.
                    let items = match self.parse_braced() {
                        Braced::Statements(items) | Braced::Values(items) => items,
                    };
                    out.push(AstNode::List {
                        line,
                        column: col,
                        items,
                    });
                    self.diagnose(line, col, "braced group without a key");
                }
                TokenKind::Op(_) => {
                    let (line, col) = (tok.line, tok.col);
                    self.bump();
                    self.diagnose(line, col, "operator without a key");
                }
            }
        }
        out
    }

    /// `ident op …` — an assignment or a named block.
    fn parse_keyed_statement(&mut self) -> Option<AstNode> {
        let key_tok = self.bump().expect("caller peeked a word");
        let (line, col) = (key_tok.line, key_tok.col);
        let key = match key_tok.kind {
            TokenKind::Word(w) => w,
            TokenKind::Str(s) => s,
            _ => unreachable!("caller guaranteed a word"),
        };
        let operator = match self.bump() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) => op,
            _ => unreachable!("caller guaranteed an operator"),
        };

        match self.peek() {
            Some(Token {
                kind: TokenKind::LBrace,
                line: b_line,
                col: b_col,
                ..
            }) => {
                let (b_line, b_col) = (*b_line, *b_col);
                self.bump();
                match self.parse_braced() {
                    Braced::Statements(children) => Some(AstNode::Block {
                        name: key,
                        operator,
                        line,
                        column: col,
                        children,
                    }),
                    Braced::Values(items) => Some(AstNode::Assignment {
                        key,
                        operator,
                        line,
                        column: col,
                        value: Box::new(AstNode::List {
                            line: b_line,
                            column: b_col,
                            items,
                        }),
                    }),
                }
            }
            Some(Token {
                kind: TokenKind::Word(_) | TokenKind::Str(_),
                ..
            }) => {
                let tok = self.bump().expect("peeked");
                Some(AstNode::Assignment {
                    key,
                    operator,
                    line,
                    column: col,
                    value: Box::new(self.value_node(tok)),
                })
            }
            Some(other) => {
                let (o_line, o_col) = (other.line, other.col);
                self.diagnose(
                    o_line,
                    o_col,
                    format!("expected a value after '{key} {}'", operator.as_str()),
                );
                None
            }
            None => {
                self.diagnose(
                    line,
                    col,
                    format!("unexpected end of input after '{key} {}'", operator.as_str()),
                );
                None
            }
        }
    }

    /// Parse the body of a braced group; consumes the closing brace.
    fn parse_braced(&mut self) -> Braced {
        let mut items = Vec::new();
        let mut saw_statement = false;
        loop {
            match self.peek() {
                None => {
                    let (line, col) = self
                        .tokens
                        .last()
                        .map(|t| (t.line, t.col))
                        .unwrap_or((1, 1));
                    self.diagnose(line, col, "missing '}' before end of input");
                    break;
                }
                Some(tok) if tok.kind == TokenKind::RBrace => {
                    self.bump();
                    break;
                }
                Some(tok) => match &tok.kind {
                    TokenKind::Word(_) | TokenKind::Str(_) => {
                        if matches!(self.peek2().map(|t| &t.kind), Some(TokenKind::Op(_))) {
                            saw_statement = true;
                            if let Some(stmt) = self.parse_keyed_statement() {
                                items.push(stmt);
                            }
                        } else {
                            let tok = self.bump().expect("peeked");
                            items.push(self.value_node(tok));
                        }
                    }
                    TokenKind::LBrace => {
                        let (line, col) = (tok.line, tok.col);
                        self.bump();
                        let inner = match self.parse_braced() {
                            Braced::Statements(children) | Braced::Values(children) => children,
                        };
                        items.push(AstNode::List {
                            line,
                            column: col,
                            items: inner,
                        });
                    }
                    TokenKind::Op(_) => {
                        let (line, col) = (tok.line, tok.col);
                        self.bump();
                        self.diagnose(line, col, "operator without a key");
                    }
                    TokenKind::RBrace => unreachable!("handled above"),
                },
            }
        }
        if saw_statement {
            Braced::Statements(items)
        } else {
            Braced::Values(items)
        }
    }

    fn value_node(&self, tok: Token) -> AstNode {
        let (line, col) = (tok.line, tok.col);
        match tok.kind {
            TokenKind::Str(s) => AstNode::Value {
                value: s,
                value_type: ValueType::String,
                line,
                column: col,
            },
            TokenKind::Word(w) => {
                let value_type = classify_word(&w);
                AstNode::Value {
                    value: w,
                    value_type,
                    line,
                    column: col,
                }
            }
            _ => unreachable!("value_node only receives words and strings"),
        }
    }
}

fn classify_word(word: &str) -> ValueType {
    if word == "yes" || word == "no" {
        return ValueType::Bool;
    }
    if word.starts_with('@') {
        return ValueType::ScriptedValue;
    }
    if is_number(word) {
        return ValueType::Number;
    }
    ValueType::Ident
}

fn is_number(word: &str) -> bool {
    let body = word.strip_prefix('-').unwrap_or(word);
    if body.is_empty() {
        return false;
    }
    let mut seen_dot = false;
    let mut seen_digit = false;
    for c in body.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}

/// Parse a file with the engine's text-decoding fallback.
pub fn parse_file(path: &std::path::Path) -> std::io::Result<ParseOutcome> {
    let bytes = std::fs::read(path)?;
    let text = crate::store::decode_text(&bytes).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "binary content")
    })?;
    Ok(parse_source(&text, &path.to_string_lossy()))
}
