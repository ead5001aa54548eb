use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split an expression such as `Bmass > 5.6 && (Q2 < 8 || Q2 > 11)` into
/// tokens.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        let two = bytes.get(pos + 1).copied();

        let token = match c {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'<' if two == Some(b'=') => Token::Le,
            b'<' => Token::Lt,
            b'>' if two == Some(b'=') => Token::Ge,
            b'>' => Token::Gt,
            b'=' if two == Some(b'=') => Token::EqEq,
            b'&' if two == Some(b'&') => Token::AndAnd,
            b'|' if two == Some(b'|') => Token::OrOr,
            b'!' => Token::Bang,
            b'0'..=b'9' | b'.' => {
                let (value, end) = lex_number(input, pos)?;
                pos = end;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    offset: start,
                });
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let end = bytes[pos..]
                    .iter()
                    .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                    .map_or(bytes.len(), |n| pos + n);
                tokens.push(Spanned {
                    token: Token::Ident(input[pos..end].to_string()),
                    offset: start,
                });
                pos = end;
                continue;
            }
            _ => {
                let ch = input[pos..].chars().next().unwrap_or('?');
                return Err(PipelineError::parse(pos, format!("unexpected character '{ch}'")));
            }
        };

        pos += match token {
            Token::Le | Token::Ge | Token::EqEq | Token::AndAnd | Token::OrOr => 2,
            _ => 1,
        };
        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

/// Digits with an optional fraction and exponent (`2.5e-3`).
fn lex_number(input: &str, start: usize) -> Result<(f64, usize)> {
    let bytes = input.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        }
    }
    let text = &input[start..end];
    text.parse::<f64>()
        .map(|v| (v, end))
        .map_err(|_| PipelineError::parse(start, format!("'{text}' is not a number")))
}

/// Cursor over a token stream, shared by the arithmetic and predicate parsers.
pub(crate) struct TokenStream {
    tokens: Vec<Spanned>,
    pos: usize,
    end_offset: usize,
}

impl TokenStream {
    pub(crate) fn new(input: &str) -> Result<Self> {
        Ok(TokenStream {
            tokens: tokenize(input)?,
            pos: 0,
            end_offset: input.len(),
        })
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    pub(crate) fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    pub(crate) fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.end_offset, |s| s.offset)
    }

    pub(crate) fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume `expected` if it is next.
    pub(crate) fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(PipelineError::parse(self.offset(), format!("expected {what}")))
        }
    }

    pub(crate) fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(PipelineError::parse(
                self.offset(),
                format!("unexpected trailing {tok:?}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(
            kinds("dr0<0.1 && !(Q2>=8||Q2==11)"),
            vec![
                Token::Ident("dr0".into()),
                Token::Lt,
                Token::Number(0.1),
                Token::AndAnd,
                Token::Bang,
                Token::LParen,
                Token::Ident("Q2".into()),
                Token::Ge,
                Token::Number(8.0),
                Token::OrOr,
                Token::Ident("Q2".into()),
                Token::EqEq,
                Token::Number(11.0),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn exponent_numbers() {
        assert_eq!(kinds("2.5e-3"), vec![Token::Number(2.5e-3)]);
        assert_eq!(kinds("1E2"), vec![Token::Number(100.0)]);
    }

    #[test]
    fn stray_character_reports_offset() {
        let err = tokenize("a < 1 & b").unwrap_err();
        assert!(matches!(err, PipelineError::Parse { offset: 6, .. }));
    }
}
