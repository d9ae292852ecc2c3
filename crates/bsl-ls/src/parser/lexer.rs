//
// parser/lexer.rs
//
// Tokenizer for BSL source text
//

use std::ops::Range;

use logos::Logos;

/// Raw tokens produced by logos
///
/// Keywords are not separate tokens: they lex as `Identifier` and are
/// classified afterwards, since BSL keywords are case-insensitive and come in
/// Russian and English spellings.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\f\r\n\x{00A0}\x{FEFF}]+")]
#[logos(skip r"//[^\r\n]*")]
pub enum Token {
    #[regex(r"[A-Za-z_А-Яа-яЁё][A-Za-z0-9_А-Яа-яЁё]*")]
    Identifier,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // Doubled quotes escape; strings may span lines
    #[regex(r#""([^"]|"")*""#)]
    String,

    #[regex(r"'[^'\r\n]*'")]
    Date,

    #[regex(r"#[^\r\n]*")]
    Preprocessor,

    #[regex(r"&[A-Za-z_А-Яа-яЁё][A-Za-z0-9_А-Яа-яЁё]*")]
    Annotation,

    #[regex(r"~[A-Za-z_А-Яа-яЁё][A-Za-z0-9_А-Яа-яЁё]*")]
    Label,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,

    #[token("=")]
    Assign,
    #[token("<>")]
    NotEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
}

impl Token {
    pub fn is_binary_operator(&self) -> bool {
        matches!(
            self,
            Token::Assign
                | Token::NotEqual
                | Token::Less
                | Token::LessEqual
                | Token::Greater
                | Token::GreaterEqual
                | Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Slash
                | Token::Percent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Procedure,
    Function,
    EndProcedure,
    EndFunction,
    Var,
    Export,
    Val,
    If,
    Then,
    ElsIf,
    Else,
    EndIf,
    For,
    Each,
    In,
    To,
    Do,
    EndDo,
    While,
    Try,
    Except,
    EndTry,
    Return,
    Break,
    Continue,
    Raise,
    Goto,
    New,
    True,
    False,
    Undefined,
    Null,
    And,
    Or,
    Not,
    Async,
    Await,
    AddHandler,
    RemoveHandler,
}

impl Keyword {
    /// Classify an identifier, ignoring case
    pub fn from_identifier(text: &str) -> Option<Keyword> {
        let lower = text.to_lowercase();
        let keyword = match lower.as_str() {
            "процедура" | "procedure" => Keyword::Procedure,
            "функция" | "function" => Keyword::Function,
            "конецпроцедуры" | "endprocedure" => Keyword::EndProcedure,
            "конецфункции" | "endfunction" => Keyword::EndFunction,
            "перем" | "var" => Keyword::Var,
            "экспорт" | "export" => Keyword::Export,
            "знач" | "val" => Keyword::Val,
            "если" | "if" => Keyword::If,
            "тогда" | "then" => Keyword::Then,
            "иначеесли" | "elsif" => Keyword::ElsIf,
            "иначе" | "else" => Keyword::Else,
            "конецесли" | "endif" => Keyword::EndIf,
            "для" | "for" => Keyword::For,
            "каждого" | "each" => Keyword::Each,
            "из" | "in" => Keyword::In,
            "по" | "to" => Keyword::To,
            "цикл" | "do" => Keyword::Do,
            "конеццикла" | "enddo" => Keyword::EndDo,
            "пока" | "while" => Keyword::While,
            "попытка" | "try" => Keyword::Try,
            "исключение" | "except" => Keyword::Except,
            "конецпопытки" | "endtry" => Keyword::EndTry,
            "возврат" | "return" => Keyword::Return,
            "прервать" | "break" => Keyword::Break,
            "продолжить" | "continue" => Keyword::Continue,
            "вызватьисключение" | "raise" => Keyword::Raise,
            "перейти" | "goto" => Keyword::Goto,
            "новый" | "new" => Keyword::New,
            "истина" | "true" => Keyword::True,
            "ложь" | "false" => Keyword::False,
            "неопределено" | "undefined" => Keyword::Undefined,
            "null" => Keyword::Null,
            "и" | "and" => Keyword::And,
            "или" | "or" => Keyword::Or,
            "не" | "not" => Keyword::Not,
            "асинх" | "async" => Keyword::Async,
            "ждать" | "await" => Keyword::Await,
            "добавитьобработчик" | "addhandler" => Keyword::AddHandler,
            "удалитьобработчик" | "removehandler" => Keyword::RemoveHandler,
            _ => return None,
        };
        Some(keyword)
    }

    /// Keywords that close or split a statement block
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Keyword::EndProcedure
                | Keyword::EndFunction
                | Keyword::EndIf
                | Keyword::ElsIf
                | Keyword::Else
                | Keyword::EndDo
                | Keyword::Except
                | Keyword::EndTry
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexemeKind {
    Token(Token),
    Keyword(Keyword),
    /// Text the lexer could not match
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub kind: LexemeKind,
    pub span: Range<usize>,
}

/// Split `source` into lexemes with byte spans
pub fn tokenize(source: &str) -> Vec<Lexeme> {
    let mut lexer = Token::lexer(source);
    let mut lexemes = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let kind = match result {
            Ok(Token::Identifier) => match Keyword::from_identifier(lexer.slice()) {
                Some(keyword) => LexemeKind::Keyword(keyword),
                None => LexemeKind::Token(Token::Identifier),
            },
            Ok(token) => LexemeKind::Token(token),
            Err(()) => LexemeKind::Unknown,
        };
        lexemes.push(Lexeme { kind, span });
    }
    lexemes
}
