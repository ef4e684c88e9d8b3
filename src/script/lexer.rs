//! Lexer for the sandbox script language
//!
//! Handles tokenization including:
//! - Keywords and identifiers
//! - Number literals (decimal, fractional, exponent, hex)
//! - Quoted strings with escapes
//! - Template literals, whose `${...}` holes are tokenized recursively
//! - Operators and punctuation (longest match)
//!
//! Tokens carry byte offsets only; line and column are computed on demand when
//! a diagnostic is produced.

use super::error::ScriptError;

/// Reserved words recognised by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    In,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    True,
    False,
    Null,
    This,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Keyword> {
        let kw = match ident {
            "var" => Keyword::Var,
            "let" => Keyword::Let,
            "const" => Keyword::Const,
            "function" => Keyword::Function,
            "return" => Keyword::Return,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "throw" => Keyword::Throw,
            "try" => Keyword::Try,
            "catch" => Keyword::Catch,
            "finally" => Keyword::Finally,
            "new" => Keyword::New,
            "typeof" => Keyword::Typeof,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "this" => Keyword::This,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Var => "var",
            Keyword::Let => "let",
            Keyword::Const => "const",
            Keyword::Function => "function",
            Keyword::Return => "return",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Do => "do",
            Keyword::For => "for",
            Keyword::In => "in",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Throw => "throw",
            Keyword::Try => "try",
            Keyword::Catch => "catch",
            Keyword::Finally => "finally",
            Keyword::New => "new",
            Keyword::Typeof => "typeof",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
            Keyword::This => "this",
        }
    }
}

/// Operators and punctuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Ellipsis,
    QuestionDot,
    Question,
    QuestionQuestion,
    Arrow,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    StarStarAssign,
    SlashAssign,
    PercentAssign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
}

// Longest spellings first so that `===` wins over `==` and `=`.
const PUNCTUATION: &[(&str, Punct)] = &[
    ("**=", Punct::StarStarAssign),
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("...", Punct::Ellipsis),
    ("=>", Punct::Arrow),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::LtEq),
    (">=", Punct::GtEq),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("??", Punct::QuestionQuestion),
    ("?.", Punct::QuestionDot),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("**", Punct::StarStar),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (",", Punct::Comma),
    (";", Punct::Semicolon),
    (":", Punct::Colon),
    (".", Punct::Dot),
    ("?", Punct::Question),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("!", Punct::Bang),
    ("=", Punct::Assign),
    ("<", Punct::Lt),
    (">", Punct::Gt),
];

impl Punct {
    pub fn as_str(&self) -> &'static str {
        PUNCTUATION
            .iter()
            .find(|(_, p)| p == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

/// One piece of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    /// Literal text with escapes already resolved
    Text(String),
    /// Tokens of a `${...}` hole, terminated by `Eof`
    Code(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// A line terminator appeared between this token and the previous one
    pub newline_before: bool,
}

/// Compute a 1-based (line, column) pair for a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map(|nl| before[nl + 1..].chars().count())
        .unwrap_or_else(|| before.chars().count())
        + 1;
    (line, column)
}

/// Lexer for sandbox source text.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    brace_depth: usize,
    newline_pending: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::starting_at(source, 0)
    }

    fn starting_at(source: &'a str, pos: usize) -> Self {
        Lexer {
            source,
            pos,
            brace_depth: 0,
            newline_pending: false,
            tokens: Vec::new(),
        }
    }

    /// Tokenize the entire source. The stream always ends with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ScriptError> {
        self.run(false)?;
        Ok(self.tokens)
    }

    // ========================================================================
    // Core character handling
    // ========================================================================

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: &str, offset: usize) -> ScriptError {
        let (line, column) = line_col(self.source, offset);
        ScriptError::syntax(message, line, column)
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            start,
            end: self.pos,
            newline_before: self.newline_pending,
        });
        self.newline_pending = false;
    }

    // ========================================================================
    // Main scanning loop
    // ========================================================================

    /// Scan tokens until end of input, or until the `}` closing a template
    /// hole when `in_template` is set.
    fn run(&mut self, in_template: bool) -> Result<(), ScriptError> {
        loop {
            self.skip_trivia()?;
            let start = self.pos;
            let Some(c) = self.peek() else {
                if in_template {
                    return Err(self.error("Unterminated template literal", start));
                }
                self.push(TokenKind::Eof, start);
                return Ok(());
            };

            if in_template && c == '}' && self.brace_depth == 0 {
                self.advance();
                self.push(TokenKind::Eof, start);
                return Ok(());
            }

            if c.is_ascii_digit() || (c == '.' && self.peek_nth(1).is_some_and(|d| d.is_ascii_digit())) {
                self.scan_number(start)?;
            } else if is_ident_start(c) {
                self.scan_ident(start);
            } else if c == '"' || c == '\'' {
                self.scan_string(c, start)?;
            } else if c == '`' {
                self.scan_template(start)?;
            } else {
                self.scan_punct(start)?;
            }
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ScriptError> {
        while let Some(c) = self.peek() {
            match c {
                '\n' | '\u{2028}' | '\u{2029}' => {
                    self.newline_pending = true;
                    self.advance();
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                '/' if self.peek_nth(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '/' if self.peek_nth(1) == Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    match self.source[self.pos..].find("*/") {
                        Some(end) => {
                            if self.source[self.pos..self.pos + end].contains('\n') {
                                self.newline_pending = true;
                            }
                            self.pos += end + 2;
                        }
                        None => return Err(self.error("Invalid or unexpected token", start)),
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn scan_number(&mut self, start: usize) -> Result<(), ScriptError> {
        let value = if self.peek() == Some('0') && matches!(self.peek_nth(1), Some('x' | 'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits = &self.source[digits_start..self.pos];
            u64::from_str_radix(digits, 16)
                .map(|v| v as f64)
                .map_err(|_| self.error("Invalid or unexpected token", start))?
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            if self.peek() == Some('.') && self.peek_nth(1).map_or(true, |c| !is_ident_start(c)) {
                self.advance();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                let sign_offset = usize::from(matches!(self.peek_nth(1), Some('+' | '-')));
                if self.peek_nth(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1 + sign_offset;
                    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.advance();
                    }
                }
            }
            self.source[start..self.pos]
                .parse::<f64>()
                .map_err(|_| self.error("Invalid or unexpected token", start))?
        };

        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error("Invalid or unexpected token", self.pos));
        }
        self.push(TokenKind::Number(value), start);
        Ok(())
    }

    fn scan_ident(&mut self, start: usize) {
        while self.peek().is_some_and(is_ident_part) {
            self.advance();
        }
        let text = &self.source[start..self.pos];
        let kind = match Keyword::from_ident(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text.to_string()),
        };
        self.push(kind, start);
    }

    fn scan_escape(&mut self, out: &mut String) -> Result<(), ScriptError> {
        let escape_start = self.pos - 1;
        let Some(c) = self.advance() else {
            return Err(self.error("Invalid or unexpected token", escape_start));
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'u' => {
                let hex_start = self.pos;
                let (digits, skip) = if self.peek() == Some('{') {
                    let close = self.source[self.pos..]
                        .find('}')
                        .ok_or_else(|| self.error("Invalid Unicode escape sequence", escape_start))?;
                    (&self.source[self.pos + 1..self.pos + close], close + 1)
                } else {
                    let end = (self.pos + 4).min(self.source.len());
                    (self.source.get(hex_start..end).unwrap_or(""), 4)
                };
                let ch = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("Invalid Unicode escape sequence", escape_start))?;
                out.push(ch);
                self.pos += skip;
            }
            'x' => {
                let digits = self.source.get(self.pos..self.pos + 2).unwrap_or("");
                let ch = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error("Invalid hexadecimal escape sequence", escape_start))?;
                out.push(ch);
                self.pos += 2;
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn scan_string(&mut self, quote: char, start: usize) -> Result<(), ScriptError> {
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err(self.error("Invalid or unexpected token", start)),
                Some(c) if c == quote => break,
                Some('\\') => self.scan_escape(&mut value)?,
                Some(c) => value.push(c),
            }
        }
        self.push(TokenKind::Str(value), start);
        Ok(())
    }

    fn scan_template(&mut self, start: usize) -> Result<(), ScriptError> {
        self.advance();
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("Unterminated template literal", start)),
                Some('`') => break,
                Some('\\') => self.scan_escape(&mut text)?,
                Some('$') if self.peek() == Some('{') => {
                    self.advance();
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    let mut inner = Lexer::starting_at(self.source, self.pos);
                    inner.run(true)?;
                    self.pos = inner.pos;
                    chunks.push(TemplateChunk::Code(inner.tokens));
                }
                Some(c) => text.push(c),
            }
        }
        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        self.push(TokenKind::Template(chunks), start);
        Ok(())
    }

    fn scan_punct(&mut self, start: usize) -> Result<(), ScriptError> {
        let rest = &self.source[self.pos..];
        let found = PUNCTUATION
            .iter()
            .find(|(spelling, _)| rest.starts_with(spelling))
            .copied();

        let Some((spelling, mut punct)) = found else {
            return Err(self.error("Invalid or unexpected token", start));
        };

        // `a?.5:b` is a conditional, not optional chaining
        let mut len = spelling.len();
        if punct == Punct::QuestionDot && rest[2..].starts_with(|c: char| c.is_ascii_digit()) {
            punct = Punct::Question;
            len = 1;
        }

        match punct {
            Punct::LBrace => self.brace_depth += 1,
            Punct::RBrace => self.brace_depth = self.brace_depth.saturating_sub(1),
            _ => {}
        }

        self.pos += len;
        self.push(TokenKind::Punct(punct), start);
        Ok(())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_longest_match_operators() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::EqEqEq),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(Punct::NotEqEq),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 .5 1e3 0xff"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.5),
                TokenKind::Number(0.5),
                TokenKind::Number(1000.0),
                TokenKind::Number(255.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_followed_by_method() {
        // `1.toString` is not valid, but `1.5.toFixed` and `x.y` are
        assert_eq!(
            kinds("a.b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::Dot),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
        assert!(Lexer::new("3in").tokenize().is_err());
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" "A""#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\nb".into()),
                TokenKind::Str("A".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert_eq!(err.message(), "Invalid or unexpected token");
    }

    #[test]
    fn test_template_holes() {
        let tokens = kinds("`a${x + {y:1}.y}b`");
        let TokenKind::Template(chunks) = &tokens[0] else {
            panic!("expected template, got {:?}", tokens[0]);
        };
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], TemplateChunk::Text("a".into()));
        assert!(matches!(&chunks[1], TemplateChunk::Code(inner) if inner.last().unwrap().kind == TokenKind::Eof));
        assert_eq!(chunks[2], TemplateChunk::Text("b".into()));
    }

    #[test]
    fn test_comments_and_newlines() {
        let tokens = Lexer::new("a // note\n/* block */ b").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Ident("b".into()));
        assert!(tokens[1].newline_before);
        assert!(!tokens[0].newline_before);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            kinds("function return"),
            vec![
                TokenKind::Keyword(Keyword::Function),
                TokenKind::Keyword(Keyword::Return),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_col() {
        assert_eq!(line_col("ab\ncd", 4), (2, 2));
        assert_eq!(line_col("ab", 0), (1, 1));
    }

    #[test]
    fn test_invalid_character() {
        let err = Lexer::new("a # b").tokenize().unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { column: 3, .. }));
    }
}
