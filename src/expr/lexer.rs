//! Tokenizer for condition expressions.

use super::ExprError;
use std::fmt;

/// A lexed token plus the byte position it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Minus,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Bool(b) => write!(f, "{b}"),
            Token::Null => write!(f, "null"),
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            Token::EqEq => write!(f, "'=='"),
            Token::NotEq => write!(f, "'!='"),
            Token::Lt => write!(f, "'<'"),
            Token::Le => write!(f, "'<='"),
            Token::Gt => write!(f, "'>'"),
            Token::Ge => write!(f, "'>='"),
            Token::AndAnd => write!(f, "'&&'"),
            Token::OrOr => write!(f, "'||'"),
            Token::Bang => write!(f, "'!'"),
            Token::Minus => write!(f, "'-'"),
            Token::Dot => write!(f, "'.'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
        }
    }
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let pos = i;
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' => {
                tokens.push(Spanned { token: Token::LParen, pos });
                i += 1;
            }
            ')' => {
                tokens.push(Spanned { token: Token::RParen, pos });
                i += 1;
            }
            '[' => {
                tokens.push(Spanned { token: Token::LBracket, pos });
                i += 1;
            }
            ']' => {
                tokens.push(Spanned { token: Token::RBracket, pos });
                i += 1;
            }
            '.' => {
                tokens.push(Spanned { token: Token::Dot, pos });
                i += 1;
            }
            '-' => {
                tokens.push(Spanned { token: Token::Minus, pos });
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned { token: Token::EqEq, pos });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar { ch, pos });
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned { token: Token::NotEq, pos });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Bang, pos });
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned { token: Token::Le, pos });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Lt, pos });
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Spanned { token: Token::Ge, pos });
                    i += 2;
                } else {
                    tokens.push(Spanned { token: Token::Gt, pos });
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Spanned { token: Token::AndAnd, pos });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar { ch, pos });
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Spanned { token: Token::OrOr, pos });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar { ch, pos });
                }
            }
            '\'' | '"' => {
                let quote = ch;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::UnterminatedString { pos }),
                        Some(&c) if c == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            // Only the quote itself and backslash are escapable.
                            match chars.get(i + 1) {
                                Some(&next) if next == quote || next == '\\' => {
                                    value.push(next);
                                    i += 2;
                                }
                                _ => return Err(ExprError::UnterminatedString { pos }),
                            }
                        }
                        Some(&c) => {
                            value.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Spanned {
                    token: Token::Str(value),
                    pos,
                });
            }
            c if c.is_ascii_digit() => {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_ascii_digit() || chars[end] == '.')
                {
                    end += 1;
                }
                let text: String = chars[i..end].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedChar { ch, pos })?;
                tokens.push(Spanned {
                    token: Token::Number(number),
                    pos,
                });
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();
                let token = match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, pos });
                i = end;
            }
            _ => return Err(ExprError::UnexpectedChar { ch, pos }),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_operators_and_literals() {
        let tokens = lex("value.age >= 18 && value.name == 'bo b'").unwrap();
        let kinds: Vec<&Token> = tokens.iter().map(|s| &s.token).collect();
        assert_eq!(
            kinds,
            vec![
                &Token::Ident("value".into()),
                &Token::Dot,
                &Token::Ident("age".into()),
                &Token::Ge,
                &Token::Number(18.0),
                &Token::AndAnd,
                &Token::Ident("value".into()),
                &Token::Dot,
                &Token::Ident("name".into()),
                &Token::EqEq,
                &Token::Str("bo b".into()),
            ]
        );
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let tokens = lex(r"'it\'s'").unwrap();
        assert_eq!(tokens[0].token, Token::Str("it's".into()));
    }

    #[test]
    fn rejects_single_ampersand() {
        assert!(matches!(
            lex("a & b"),
            Err(ExprError::UnexpectedChar { ch: '&', .. })
        ));
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(
            lex("'open"),
            Err(ExprError::UnterminatedString { .. })
        ));
    }
}
