//! Lexer for Paradox-style script.
//!
//! Total: never fails. Unterminated strings and stray characters become
//! diagnostics and the lexer keeps going.

use super::ast::Operator;
use super::parser::Diagnostic;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare word: identifier, number, bool, or @scripted ref. Classified
    /// by the parser.
    Word(String),
    /// Double-quoted string, escapes resolved.
    Str(String),
    Op(Operator),
    LBrace,
    RBrace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

/// Characters that terminate a bare word.
fn is_word_break(c: char) -> bool {
    c.is_whitespace() || matches!(c, '{' | '}' | '#' | '"' | '=' | '<' | '>' | '!' | '?')
}

pub fn tokenize(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;
    let mut col: u32 = 1;

    macro_rules! bump {
        () => {{
            let c = chars.next();
            if let Some(ch) = c {
                if ch == '\n' {
                    line += 1;
                    col = 1;
                } else {
                    col += 1;
                }
            }
            c
        }};
    }

    while let Some(&c) = chars.peek() {
        let (tok_line, tok_col) = (line, col);
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                bump!();
            }
            '#' => {
                // Line comment.
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    bump!();
                }
            }
            '{' => {
                bump!();
                tokens.push(Token {
                    kind: TokenKind::LBrace,
                    line: tok_line,
                    col: tok_col,
                });
            }
            '}' => {
                bump!();
                tokens.push(Token {
                    kind: TokenKind::RBrace,
                    line: tok_line,
                    col: tok_col,
                });
            }
            '"' => {
                bump!();
                let mut text = String::new();
                let mut terminated = false;
                while let Some(&c) = chars.peek() {
                    if c == '"' {
                        bump!();
                        terminated = true;
                        break;
                    }
                    if c == '\\' {
                        bump!();
                        match chars.peek() {
                            Some('"') => {
                                bump!();
                                text.push('"');
                            }
                            Some('\\') => {
                                bump!();
                                text.push('\\');
                            }
                            Some('n') => {
                                bump!();
                                text.push('\n');
                            }
                            Some(&other) => {
                                bump!();
                                text.push('\\');
                                text.push(other);
                            }
                            None => break,
                        }
                        continue;
                    }
                    text.push(c);
                    bump!();
                }
                if !terminated {
                    diagnostics.push(Diagnostic::new(tok_line, tok_col, "unterminated string"));
                }
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    line: tok_line,
                    col: tok_col,
                });
            }
            '=' => {
                bump!();
                let op = if chars.peek() == Some(&'=') {
                    bump!();
                    Operator::Equals
                } else {
                    Operator::Assign
                };
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    line: tok_line,
                    col: tok_col,
                });
            }
            '<' => {
                bump!();
                let op = if chars.peek() == Some(&'=') {
                    bump!();
                    Operator::LessEq
                } else {
                    Operator::Less
                };
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    line: tok_line,
                    col: tok_col,
                });
            }
            '>' => {
                bump!();
                let op = if chars.peek() == Some(&'=') {
                    bump!();
                    Operator::GreaterEq
                } else {
                    Operator::Greater
                };
                tokens.push(Token {
                    kind: TokenKind::Op(op),
                    line: tok_line,
                    col: tok_col,
                });
            }
            '!' => {
                bump!();
                if chars.peek() == Some(&'=') {
                    bump!();
                    tokens.push(Token {
                        kind: TokenKind::Op(Operator::NotEquals),
                        line: tok_line,
                        col: tok_col,
                    });
                } else {
                    diagnostics.push(Diagnostic::new(tok_line, tok_col, "stray '!'"));
                }
            }
            '?' => {
                bump!();
                if chars.peek() == Some(&'=') {
                    bump!();
                    tokens.push(Token {
                        kind: TokenKind::Op(Operator::MaybeAssign),
                        line: tok_line,
                        col: tok_col,
                    });
                } else {
                    diagnostics.push(Diagnostic::new(tok_line, tok_col, "stray '?'"));
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if is_word_break(c) {
                        break;
                    }
                    word.push(c);
                    bump!();
                }
                if word.is_empty() {
                    // Defensive skip for a character the word rule refused.
                    bump!();
                    continue;
                }
                tokens.push(Token {
                    kind: TokenKind::Word(word),
                    line: tok_line,
                    col: tok_col,
                });
            }
        }
    }

    (tokens, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn words_ops_and_braces() {
        let toks = kinds("trait_brave = { category = personality }");
        assert_eq!(
            toks,
            vec![
                TokenKind::Word("trait_brave".into()),
                TokenKind::Op(Operator::Assign),
                TokenKind::LBrace,
                TokenKind::Word("category".into()),
                TokenKind::Op(Operator::Assign),
                TokenKind::Word("personality".into()),
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let toks = kinds("# header\nvalue = 42 # trailing\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Word("value".into()),
                TokenKind::Op(Operator::Assign),
                TokenKind::Word("42".into()),
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        let toks = kinds("a >= 1 b <= 2 c != 3 d == 4 e ?= 5");
        let ops: Vec<_> = toks
            .iter()
            .filter_map(|t| match t {
                TokenKind::Op(op) => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Operator::GreaterEq,
                Operator::LessEq,
                Operator::NotEquals,
                Operator::Equals,
                Operator::MaybeAssign,
            ]
        );
    }

    #[test]
    fn string_escapes_resolve() {
        let toks = kinds(r#"name = "he said \"hi\"""#);
        assert_eq!(
            toks[2],
            TokenKind::Str("he said \"hi\"".into())
        );
    }

    #[test]
    fn unterminated_string_is_diagnosed_not_fatal() {
        let (toks, diags) = tokenize("name = \"oops");
        assert_eq!(diags.len(), 1);
        assert!(matches!(toks.last().unwrap().kind, TokenKind::Str(_)));
    }

    #[test]
    fn positions_are_one_based() {
        let (toks, _) = tokenize("a = 1\n  b = 2");
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[3].line, toks[3].col), (2, 3));
    }

    #[test]
    fn colon_and_at_stay_inside_words() {
        let toks = kinds("cost = @base_cost scope:target.culture");
        assert_eq!(toks[2], TokenKind::Word("@base_cost".into()));
        assert_eq!(toks[3], TokenKind::Word("scope:target.culture".into()));
    }
}
