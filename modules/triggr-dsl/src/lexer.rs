//! Comment stripping and tokenization, both line-tracked. Every error out
//! of this module carries the 1-based source line it points at.

use triggr_common::{Result, TriggrError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i128),
    Str(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Dot,
    At,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::LBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::LBracket => write!(f, "["),
            Self::RBracket => write!(f, "]"),
            Self::Colon => write!(f, ":"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::At => write!(f, "@"),
            Self::Assign => write!(f, "="),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

/// Replace `//` and `/* */` comments with spaces, preserving newlines so
/// token line numbers still point at the original source. String literals
/// are respected; an unterminated block comment is an error at its opening
/// line.
pub fn strip_comments(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                line += 1;
                out.push('\n');
            }
            '"' | '\'' => {
                let quote = c;
                out.push(c);
                let mut escaped = false;
                for s in chars.by_ref() {
                    if s == '\n' {
                        line += 1;
                    }
                    out.push(s);
                    if escaped {
                        escaped = false;
                    } else if s == '\\' {
                        escaped = true;
                    } else if s == quote {
                        break;
                    }
                }
            }
            '/' => match chars.peek() {
                Some('/') => {
                    chars.next();
                    out.push_str("  ");
                    while let Some(&s) = chars.peek() {
                        if s == '\n' {
                            break;
                        }
                        chars.next();
                        out.push(' ');
                    }
                }
                Some('*') => {
                    let opened_at = line;
                    chars.next();
                    out.push_str("  ");
                    let mut closed = false;
                    while let Some(s) = chars.next() {
                        if s == '\n' {
                            line += 1;
                            out.push('\n');
                        } else if s == '*' && chars.peek() == Some(&'/') {
                            chars.next();
                            out.push_str("  ");
                            closed = true;
                            break;
                        } else {
                            out.push(' ');
                        }
                    }
                    if !closed {
                        return Err(TriggrError::validation_at(
                            "unterminated block comment",
                            opened_at,
                        ));
                    }
                }
                _ => out.push('/'),
            },
            other => out.push(other),
        }
    }

    Ok(out)
}

pub fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '{' => push_simple(&mut tokens, &mut chars, TokenKind::LBrace, line),
            '}' => push_simple(&mut tokens, &mut chars, TokenKind::RBrace, line),
            '(' => push_simple(&mut tokens, &mut chars, TokenKind::LParen, line),
            ')' => push_simple(&mut tokens, &mut chars, TokenKind::RParen, line),
            '[' => push_simple(&mut tokens, &mut chars, TokenKind::LBracket, line),
            ']' => push_simple(&mut tokens, &mut chars, TokenKind::RBracket, line),
            ':' => push_simple(&mut tokens, &mut chars, TokenKind::Colon, line),
            ',' => push_simple(&mut tokens, &mut chars, TokenKind::Comma, line),
            '.' => push_simple(&mut tokens, &mut chars, TokenKind::Dot, line),
            '@' => push_simple(&mut tokens, &mut chars, TokenKind::At, line),
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::EqEq, line });
                } else {
                    tokens.push(Token { kind: TokenKind::Assign, line });
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::NotEq, line });
                } else {
                    return Err(TriggrError::validation_at("unexpected character '!'", line));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::Le, line });
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, line });
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::Ge, line });
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, line });
                }
            }
            '"' | '\'' => {
                let literal = lex_string(&mut chars, &mut line)?;
                tokens.push(Token {
                    kind: TokenKind::Str(literal),
                    line,
                });
            }
            '-' => {
                let start = line;
                chars.next();
                match chars.peek() {
                    Some(d) if d.is_ascii_digit() => {
                        let value = lex_int(&mut chars, start)?;
                        tokens.push(Token {
                            kind: TokenKind::Int(-value),
                            line: start,
                        });
                    }
                    _ => {
                        return Err(TriggrError::validation_at("unexpected character '-'", start))
                    }
                }
            }
            c if c.is_ascii_digit() => {
                let value = lex_int(&mut chars, line)?;
                tokens.push(Token {
                    kind: TokenKind::Int(value),
                    line,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&s) = chars.peek() {
                    if s.is_ascii_alphanumeric() || s == '_' {
                        name.push(s);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(name),
                    line,
                });
            }
            other => {
                return Err(TriggrError::validation_at(
                    format!("unexpected character {other:?}"),
                    line,
                ))
            }
        }
    }

    Ok(tokens)
}

fn push_simple(
    tokens: &mut Vec<Token>,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    kind: TokenKind,
    line: u32,
) {
    chars.next();
    tokens.push(Token { kind, line });
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: &mut u32,
) -> Result<String> {
    let start = *line;
    let quote = chars.next().unwrap_or('"');
    let mut out = String::new();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => break,
            },
            '\n' => {
                return Err(TriggrError::validation_at(
                    "unterminated string literal",
                    start,
                ))
            }
            c if c == quote => return Ok(out),
            other => out.push(other),
        }
    }

    Err(TriggrError::validation_at(
        "unterminated string literal",
        start,
    ))
}

fn lex_int(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: u32,
) -> Result<i128> {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '_' {
            if c != '_' {
                digits.push(c);
            }
            chars.next();
        } else {
            break;
        }
    }
    digits
        .parse()
        .map_err(|_| TriggrError::validation_at(format!("integer literal {digits} out of range"), line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments_preserving_lines() {
        let src = "a // gone\n/* gone\nstill gone */ b";
        let stripped = strip_comments(src).unwrap();
        assert_eq!(stripped.lines().count(), 3);
        let tokens = lex(&stripped).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let stripped = strip_comments(r#"x = "not // a comment""#).unwrap();
        assert!(stripped.contains("not // a comment"));
    }

    #[test]
    fn unterminated_block_comment_reports_opening_line() {
        let err = strip_comments("ok\n/* never closed").unwrap_err();
        match err {
            TriggrError::Validation { line, .. } => assert_eq!(line, Some(2)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn lexes_comparison_operators() {
        let kinds: Vec<TokenKind> = lex("== != < <= > >= =")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Assign,
            ]
        );
    }

    #[test]
    fn lexes_string_escapes_and_both_quotes() {
        let tokens = lex(r#""a\"b" 'c\'d'"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str("a\"b".into()));
        assert_eq!(tokens[1].kind, TokenKind::Str("c'd".into()));
    }

    #[test]
    fn lexes_negative_integers() {
        let tokens = lex("-42").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Int(-42));
    }

    #[test]
    fn rejects_stray_characters_with_line() {
        let err = lex("ok\n  #").unwrap_err();
        match err {
            TriggrError::Validation { line, .. } => assert_eq!(line, Some(2)),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
