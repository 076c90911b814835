//! Owned CSS component values.
//!
//! cssparser hands out borrowed tokens tied to the input buffer. Declaration
//! values have to outlive stylesheet parsing (they are interpreted once per
//! pass, per matched element), so the values of every declaration are
//! collected up front into this owned representation, keeping the source
//! position of each token for diagnostics.

use std::fmt;

use cssparser::{Parser, ToCss};

/// One component value with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub value: TokenValue,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Whitespace,
    Ident(String),
    QuotedString(String),
    Number { value: f64, int_value: Option<i64> },
    /// `#name` — reference syntax is preserved by the evaluator.
    Hash(String),
    /// Punctuation: `,`, `|`, `:`, and friends.
    Delim(char),
    Function(String, Vec<Token>),
}

impl Token {
    pub fn is_whitespace(&self) -> bool {
        matches!(self.value, TokenValue::Whitespace)
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whitespace => write!(f, " "),
            Self::Ident(name) => write!(f, "{name}"),
            Self::QuotedString(text) => write!(f, "\"{text}\""),
            Self::Number { value, int_value } => match int_value {
                Some(int) => write!(f, "{int}"),
                None => write!(f, "{value}"),
            },
            Self::Hash(name) => write!(f, "#{name}"),
            Self::Delim(c) => write!(f, "{c}"),
            Self::Function(name, args) => write!(f, "{name}({})", serialize(args)),
        }
    }
}

/// Re-serializes a token run, roughly as it appeared in the stylesheet.
/// Used for log messages and for raw declaration values.
pub fn serialize(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push_str(&token.value.to_string());
    }
    out
}

/// Collects all remaining component values from a cssparser stream,
/// recursing into function argument blocks.
pub fn collect(input: &mut Parser<'_, '_>) -> Vec<Token> {
    let mut out = Vec::new();
    loop {
        let location = input.current_source_location();
        let token = match input.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        let value = match token {
            cssparser::Token::WhiteSpace(_) => TokenValue::Whitespace,
            cssparser::Token::Ident(name) => TokenValue::Ident(name.to_string()),
            cssparser::Token::QuotedString(text) => TokenValue::QuotedString(text.to_string()),
            cssparser::Token::Number {
                value, int_value, ..
            } => TokenValue::Number {
                value: f64::from(value),
                int_value: int_value.map(i64::from),
            },
            cssparser::Token::Hash(name) | cssparser::Token::IDHash(name) => {
                TokenValue::Hash(name.to_string())
            }
            cssparser::Token::Delim(c) => TokenValue::Delim(c),
            cssparser::Token::Comma => TokenValue::Delim(','),
            cssparser::Token::Colon => TokenValue::Delim(':'),
            cssparser::Token::Semicolon => TokenValue::Delim(';'),
            cssparser::Token::Function(name) => {
                let name = name.to_string();
                let args = input
                    .parse_nested_block(|nested| {
                        Ok::<_, cssparser::ParseError<'_, ()>>(collect(nested))
                    })
                    .unwrap_or_default();
                TokenValue::Function(name, args)
            }
            // brace/bracket blocks have no meaning in recipe values; consume
            // and drop them
            cssparser::Token::ParenthesisBlock
            | cssparser::Token::SquareBracketBlock
            | cssparser::Token::CurlyBracketBlock => {
                let _ = input.parse_nested_block(|nested| {
                    Ok::<_, cssparser::ParseError<'_, ()>>(collect(nested))
                });
                continue;
            }
            other => {
                tracing::debug!(
                    "ignoring token {} at {}:{}",
                    other.to_css_string(),
                    location.line,
                    location.column
                );
                continue;
            }
        };
        out.push(Token {
            value,
            line: location.line,
            column: location.column,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cssparser::ParserInput;

    fn collect_str(css: &str) -> Vec<Token> {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        collect(&mut parser)
    }

    #[test]
    fn functions_nest() {
        let tokens = collect_str("\"Chapter \" counter(chap, upper-roman)");
        let kinds: Vec<_> = tokens.iter().map(|t| &t.value).collect();
        assert!(matches!(kinds[0], TokenValue::QuotedString(s) if s == "Chapter "));
        assert!(matches!(kinds[1], TokenValue::Whitespace));
        let TokenValue::Function(name, args) = kinds[2] else {
            panic!("expected function, got {:?}", kinds[2]);
        };
        assert_eq!(name, "counter");
        assert!(args.iter().any(|t| matches!(&t.value, TokenValue::Delim(','))));
    }

    #[test]
    fn hashes_keep_reference_syntax() {
        let tokens = collect_str("#c2");
        assert_eq!(tokens[0].value, TokenValue::Hash("c2".to_owned()));
        assert_eq!(serialize(&tokens), "#c2");
    }
}
