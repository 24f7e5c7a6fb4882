use logos::Logos;
pub use self::TokenKind::*;

#[allow(non_camel_case_types)]
#[derive(Logos, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    #[regex(r"[ \t\r\f]+", logos::skip)]
    Whitespace,

    #[regex(r"--[^\t\n\f]*", logos::skip)]
    Comment,

    #[regex(r"[\n]+", logos::skip)]
    Newline,

    #[regex(r#"[_a-zA-Z][_$a-zA-Z0-9]*"#)]
    Ident,

    #[regex(r#"`[^`]*`"#)]
    #[regex(r#""([^"\\]|\\.|"")*""#)]
    #[regex(r#"'([^'\\]|\\.|'')*'"#)]
    QuotedString,

    #[regex(r"[0-9]+")]
    LiteralInteger,

    #[regex(r"([0-9]*\.[0-9]+)|([0-9]+\.[0-9]*)")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    LiteralFloat,

    // Symbols
    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Lte,
    #[token(">=")]
    Gte,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(";")]
    SemiColon,
    #[token("-")]
    Minus,

    // Keywords
    //
    // Steps to add keyword:
    // 1. Add the keyword to token kind variants by alphabetical order.
    // 2. Wire it into statement parsing if it starts a statement.
    #[token("AND", ignore(ascii_case))]
    AND,
    #[token("ASC", ignore(ascii_case))]
    ASC,
    #[token("BEGIN", ignore(ascii_case))]
    BEGIN,
    #[token("BY", ignore(ascii_case))]
    BY,
    #[token("COMMIT", ignore(ascii_case))]
    COMMIT,
    #[token("DELETE", ignore(ascii_case))]
    DELETE,
    #[token("DESC", ignore(ascii_case))]
    DESC,
    #[token("EXIT", ignore(ascii_case))]
    EXIT,
    #[token("FALSE", ignore(ascii_case))]
    FALSE,
    #[token("IN", ignore(ascii_case))]
    IN,
    #[token("INFO", ignore(ascii_case))]
    INFO,
    #[token("INSERT", ignore(ascii_case))]
    INSERT,
    #[token("LIKE", ignore(ascii_case))]
    LIKE,
    #[token("LIMIT", ignore(ascii_case))]
    LIMIT,
    #[token("NULL", ignore(ascii_case))]
    NULL,
    #[token("OFFSET", ignore(ascii_case))]
    OFFSET,
    #[token("ORDER", ignore(ascii_case))]
    ORDER,
    #[token("QUIT", ignore(ascii_case))]
    QUIT,
    #[token("ROLLBACK", ignore(ascii_case))]
    ROLLBACK,
    #[token("SCAN", ignore(ascii_case))]
    SCAN,
    #[token("SCHEMA", ignore(ascii_case))]
    SCHEMA,
    #[token("SET", ignore(ascii_case))]
    SET,
    #[token("SOURCES", ignore(ascii_case))]
    SOURCES,
    #[token("TABLES", ignore(ascii_case))]
    TABLES,
    #[token("TIME", ignore(ascii_case))]
    TIME,
    #[token("TRUE", ignore(ascii_case))]
    TRUE,
    #[token("UPDATE", ignore(ascii_case))]
    UPDATE,
    #[token("VACUUM", ignore(ascii_case))]
    VACUUM,
    #[token("WHERE", ignore(ascii_case))]
    WHERE,
}

impl TokenKind {
    /// True for tokens that can serve as a bare literal value.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            Ident | QuotedString | LiteralInteger | LiteralFloat | NULL | TRUE | FALSE | Minus
        )
    }
}
