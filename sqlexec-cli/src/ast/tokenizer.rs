//! Lexing for the shell's statement language.
//!
//! Statements are short single lines, so the whole input is lexed up front
//! into owned tokens and the parser works over the vector. Each token keeps
//! its byte offset so parse errors can point at the offending spot.

use logos::Logos;

use crate::ast::token_kind::TokenKind;

/// One lexed token: its kind, the matched text, and where it started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    /// The text with surrounding quotes stripped for quoted-string tokens;
    /// anything else comes back verbatim.
    pub fn unquoted(&self) -> String {
        if self.kind == TokenKind::QuotedString && self.text.len() >= 2 {
            self.text[1..self.text.len() - 1].to_owned()
        } else {
            self.text.clone()
        }
    }
}

/// Lexes one statement into tokens, dropping whitespace and comments (the
/// token definitions skip them). Unrecognized input fails the whole
/// statement with its byte offset.
pub fn tokenize(statement: &str) -> Result<Vec<Token>, String> {
    let mut lexer = TokenKind::lexer(statement);
    let mut tokens = Vec::new();
    while let Some(kind) = lexer.next() {
        match kind {
            Ok(kind) => tokens.push(Token {
                kind,
                text: lexer.slice().to_owned(),
                offset: lexer.span().start,
            }),
            Err(_) => {
                return Err(format!(
                    "unrecognized input at byte {}: '{}'",
                    lexer.span().start,
                    &statement[lexer.span()]
                ))
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keywords_fold_case_and_idents_stay() {
        let tokens = tokenize("scan Users WHERE age >= 21").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::SCAN,
                TokenKind::Ident,
                TokenKind::WHERE,
                TokenKind::Ident,
                TokenKind::Gte,
                TokenKind::LiteralInteger,
            ]
        );
        assert_eq!(tokens[1].text, "Users");
    }

    #[test]
    fn offsets_point_into_the_source() {
        let tokens = tokenize("SCAN t").unwrap();
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].offset, 5);
    }

    #[test]
    fn quoted_strings_unquote() {
        let tokens = tokenize("'Al''s' \"x\" `order`").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].unquoted(), "Al''s");
        assert_eq!(tokens[1].unquoted(), "x");
        assert_eq!(tokens[2].unquoted(), "order");
    }

    #[test]
    fn comments_and_whitespace_vanish() {
        let tokens = tokenize("TABLES -- trailing note").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::TABLES);
    }

    #[test]
    fn garbage_reports_its_offset() {
        let err = tokenize("SCAN t WHERE a = @@@").unwrap_err();
        assert!(err.contains("byte 17"), "{}", err);
    }
}
