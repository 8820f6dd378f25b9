use thiserror::Error;

use crate::token::Token;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Incorrect indent at position {position}")]
    IncorrectIndent { position: usize },
    #[error("String parsing error at position {position}")]
    UnterminatedString { position: usize },
    #[error("Unrecognized escape sequence \\{sequence} at position {position}")]
    UnrecognizedEscape { sequence: char, position: usize },
    #[error("Unexpected end of line at position {position}")]
    NewlineInString { position: usize },
    #[error("Invalid integer literal '{literal}' at position {position}")]
    InvalidIntegerLiteral { literal: String, position: usize },
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
}

pub type LexResult<T> = Result<T, LexError>;

/// Character cursor over the source text.
struct CharStream<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> CharStream<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn consume_while<P>(&mut self, keep: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }

    fn current_index(&self) -> usize {
        self.pos
    }
}

/// Tokens of one physical line plus its leading-space count.
struct Line {
    leading_spaces: usize,
    tokens: Vec<Token>,
}

impl Line {
    /// Reads one logical line: skips any run of newlines first, counts the
    /// leading spaces, then scans tokens until a newline or the end of the
    /// stream. A non-empty line that hits the end of the stream gets a
    /// synthesized `Newline` before `Eof`.
    fn read(stream: &mut CharStream<'_>) -> LexResult<Self> {
        stream.consume_while(|c| c == '\n');
        let leading_spaces = stream.consume_while(|c| c == ' ');
        let mut tokens = Vec::new();

        loop {
            match stream.peek_char() {
                Some(' ') => {
                    stream.consume_while(|c| c == ' ');
                }
                Some('#') => {
                    stream.consume_while(|c| c != '\n');
                }
                None => {
                    if !tokens.is_empty() && tokens.last() != Some(&Token::Newline) {
                        tokens.push(Token::Newline);
                    }
                    tokens.push(Token::Eof);
                    break;
                }
                Some('\n') => {
                    stream.consume_char();
                    tokens.push(Token::Newline);
                    break;
                }
                Some(quote @ ('"' | '\'')) => tokens.push(read_string(stream, quote)?),
                Some(c) if c.is_ascii_digit() => tokens.push(read_number(stream)?),
                Some(c) if c.is_alphabetic() || c == '_' => tokens.push(read_identifier(stream)),
                Some(c) => {
                    stream.consume_char();
                    if matches!(c, '!' | '=' | '<' | '>') && stream.peek_char() == Some('=') {
                        stream.consume_char();
                        tokens.push(match c {
                            '!' => Token::NotEq,
                            '=' => Token::Eq,
                            '<' => Token::LessOrEq,
                            _ => Token::GreaterOrEq,
                        });
                    } else {
                        tokens.push(Token::Char(c));
                    }
                }
            }
        }

        Ok(Self {
            leading_spaces,
            tokens,
        })
    }

    fn is_empty(&self) -> bool {
        self.tokens.iter().all(|t| *t == Token::Newline)
    }

    fn is_all_eof(&self) -> bool {
        self.tokens.iter().all(|t| *t == Token::Eof)
    }
}

fn read_string(stream: &mut CharStream<'_>, quote: char) -> LexResult<Token> {
    let start = stream.current_index();
    stream.consume_char();
    let mut value = String::new();

    loop {
        let Some(c) = stream.consume_char() else {
            return Err(LexError::UnterminatedString { position: start });
        };
        if c == quote {
            break;
        }
        match c {
            '\\' => {
                let position = stream.current_index();
                let Some(escaped) = stream.consume_char() else {
                    return Err(LexError::UnterminatedString { position: start });
                };
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    '\\' => value.push('\\'),
                    other => {
                        return Err(LexError::UnrecognizedEscape {
                            sequence: other,
                            position,
                        });
                    }
                }
            }
            '\n' | '\r' => {
                return Err(LexError::NewlineInString {
                    position: stream.current_index(),
                });
            }
            other => value.push(other),
        }
    }

    Ok(Token::String(value))
}

fn read_number(stream: &mut CharStream<'_>) -> LexResult<Token> {
    let start = stream.current_index();
    stream.consume_while(|c| c.is_ascii_digit());
    let literal = &stream.input[start..stream.current_index()];
    let value = literal
        .parse::<i64>()
        .map_err(|_| LexError::InvalidIntegerLiteral {
            literal: literal.to_string(),
            position: start,
        })?;
    Ok(Token::Number(value))
}

fn read_identifier(stream: &mut CharStream<'_>) -> Token {
    let start = stream.current_index();
    stream.consume_while(|c| c.is_alphanumeric() || c == '_');
    match &stream.input[start..stream.current_index()] {
        "class" => Token::Class,
        "return" => Token::Return,
        "if" => Token::If,
        "else" => Token::Else,
        "def" => Token::Def,
        "print" => Token::Print,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "None" => Token::None,
        "True" => Token::True,
        "False" => Token::False,
        ident => Token::Id(ident.to_string()),
    }
}

/// Token stream with indentation bracketing and a cursor.
///
/// Lines are pulled from the source lazily: advancing past the buffered
/// tail tokenizes one more line. Changes in a line's leading-space count
/// (one indent level = two spaces) are emitted as runs of `Indent` or
/// `Dedent` tokens in front of that line's tokens; the stream ends with
/// dedents down to level zero followed by a single `Eof`.
pub struct Lexer<'a> {
    stream: CharStream<'a>,
    tokens: Vec<Token>,
    current: usize,
    indent: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> LexResult<Self> {
        let mut lexer = Self {
            stream: CharStream::new(input),
            tokens: Vec::new(),
            current: 0,
            indent: 0,
        };
        lexer.parse_line()?;
        Ok(lexer)
    }

    /// The token at the cursor. The constructor always produces at least
    /// one token, so the cursor is never out of range.
    pub fn current(&self) -> &Token {
        &self.tokens[self.current]
    }

    /// Advances the cursor, tokenizing one more line when the buffered
    /// tail is reached, and returns the new current token. Once the stream
    /// is exhausted every further call returns `Eof`.
    pub fn next_token(&mut self) -> LexResult<&Token> {
        if self.current + 1 == self.tokens.len() {
            self.parse_line()?;
        } else {
            self.current += 1;
        }
        Ok(self.current())
    }

    pub fn expect(&self, expected: &Token) -> LexResult<()> {
        if self.current() == expected {
            Ok(())
        } else {
            Err(LexError::UnexpectedToken {
                expected: expected.to_string(),
                found: self.current().to_string(),
            })
        }
    }

    pub fn expect_next(&mut self, expected: &Token) -> LexResult<()> {
        self.next_token()?;
        self.expect(expected)
    }

    pub fn expect_identifier(&self) -> LexResult<&str> {
        match self.current() {
            Token::Id(name) => Ok(name),
            other => Err(LexError::UnexpectedToken {
                expected: "Id".to_string(),
                found: other.to_string(),
            }),
        }
    }

    /// Tokenizes lines until one contributes tokens, placing the cursor on
    /// the first token it contributed. Empty and comment-only lines are
    /// skipped without touching the indent state.
    fn parse_line(&mut self) -> LexResult<()> {
        loop {
            let line = Line::read(&mut self.stream)?;
            if line.leading_spaces % 2 != 0 {
                return Err(LexError::IncorrectIndent {
                    position: self.stream.current_index(),
                });
            }

            if line.is_all_eof() {
                self.current = self.tokens.len();
                for _ in 0..self.indent {
                    self.tokens.push(Token::Dedent);
                }
                self.indent = 0;
                self.tokens.push(Token::Eof);
                return Ok(());
            }
            if line.is_empty() {
                continue;
            }

            self.current = self.tokens.len();
            let level = line.leading_spaces / 2;
            if level > self.indent {
                for _ in 0..level - self.indent {
                    self.tokens.push(Token::Indent);
                }
            } else {
                for _ in 0..self.indent - level {
                    self.tokens.push(Token::Dedent);
                }
            }
            self.indent = level;
            // A line that hit the end of the stream carries a trailing Eof;
            // hold it back so the closing dedents can be emitted first. The
            // next pull sees the exhausted stream and closes the indent.
            let mut line_tokens = line.tokens;
            if line_tokens.last() == Some(&Token::Eof) {
                line_tokens.pop();
            }
            self.tokens.extend(line_tokens);
            return Ok(());
        }
    }
}

/// Tokenizes a whole source text, `Eof` included.
pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input)?;
    let mut tokens = vec![lexer.current().clone()];
    while tokens.last() != Some(&Token::Eof) {
        tokens.push(lexer.next_token()?.clone());
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn id(name: &str) -> Token {
        Token::Id(name.to_string())
    }

    #[test]
    fn tokenizes_class_with_method() {
        let input = indoc! {r#"
            class Greeter:
              def hello(self):
                return "hi"
            g = Greeter()
        "#};
        let expected = vec![
            Token::Class,
            id("Greeter"),
            Token::Char(':'),
            Token::Newline,
            Token::Indent,
            Token::Def,
            id("hello"),
            Token::Char('('),
            id("self"),
            Token::Char(')'),
            Token::Char(':'),
            Token::Newline,
            Token::Indent,
            Token::Return,
            Token::String("hi".to_string()),
            Token::Newline,
            Token::Dedent,
            Token::Dedent,
            id("g"),
            Token::Char('='),
            id("Greeter"),
            Token::Char('('),
            Token::Char(')'),
            Token::Newline,
            Token::Eof,
        ];
        assert_eq!(tokenize(input).expect("tokenize should succeed"), expected);
    }

    #[test]
    fn recognizes_keywords_and_comparison_operators() {
        let tokens =
            tokenize("x == y != z <= w >= v < u > t and or not None True False\n").expect("tokenize");
        assert_eq!(
            tokens,
            vec![
                id("x"),
                Token::Eq,
                id("y"),
                Token::NotEq,
                id("z"),
                Token::LessOrEq,
                id("w"),
                Token::GreaterOrEq,
                id("v"),
                Token::Char('<'),
                id("u"),
                Token::Char('>'),
                id("t"),
                Token::And,
                Token::Or,
                Token::Not,
                Token::None,
                Token::True,
                Token::False,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn reads_string_escapes_in_both_quote_styles() {
        let tokens = tokenize("'a\\n\\t\\r' \"q\\\"w\\'e\\\\\"\n").expect("tokenize");
        assert_eq!(
            tokens,
            vec![
                Token::String("a\n\t\r".to_string()),
                Token::String("q\"w'e\\".to_string()),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn errors_on_unrecognized_escape() {
        let err = tokenize("x = \"a\\q\"\n").expect_err("expected escape failure");
        assert!(err.to_string().contains("Unrecognized escape sequence \\q"));
    }

    #[test]
    fn errors_on_newline_inside_string() {
        let err = tokenize("x = 'abc\ndef'\n").expect_err("expected newline failure");
        assert!(err.to_string().contains("Unexpected end of line"));
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("x = \"abc").expect_err("expected unterminated string failure");
        assert!(err.to_string().contains("String parsing error"));
    }

    #[test]
    fn errors_on_integer_overflow() {
        let err = tokenize("n = 99999999999999999999999999\n").expect_err("expected overflow");
        assert!(err.to_string().contains("Invalid integer literal"));
    }

    #[test]
    fn errors_on_odd_indent() {
        let input = indoc! {"
            if True:
               x = 1
        "};
        let err = tokenize(input).expect_err("expected indent failure");
        assert!(matches!(err, LexError::IncorrectIndent { .. }));
    }

    #[test]
    fn skips_comments_and_blank_lines_without_changing_indent() {
        let input = indoc! {"
            if True:
              x = 1

              # a comment with only spaces around it
              y = 2
        "};
        let tokens = tokenize(input).expect("tokenize");
        assert_eq!(
            tokens,
            vec![
                Token::If,
                Token::True,
                Token::Char(':'),
                Token::Newline,
                Token::Indent,
                id("x"),
                Token::Char('='),
                Token::Number(1),
                Token::Newline,
                id("y"),
                Token::Char('='),
                Token::Number(2),
                Token::Newline,
                Token::Dedent,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn strips_trailing_comment_from_a_line() {
        let tokens = tokenize("x = 1 # set x\n").expect("tokenize");
        assert_eq!(
            tokens,
            vec![
                id("x"),
                Token::Char('='),
                Token::Number(1),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn balances_dedents_at_end_of_stream() {
        // No trailing newline on the innermost line; the lexer synthesizes
        // one, then closes both indent levels before Eof.
        let input = "if True:\n  if True:\n    x = 1";
        let tokens = tokenize(input).expect("tokenize");
        assert_eq!(
            tokens,
            vec![
                Token::If,
                Token::True,
                Token::Char(':'),
                Token::Newline,
                Token::Indent,
                Token::If,
                Token::True,
                Token::Char(':'),
                Token::Newline,
                Token::Indent,
                id("x"),
                Token::Char('='),
                Token::Number(1),
                Token::Newline,
                Token::Dedent,
                Token::Dedent,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn emits_multiple_dedents_for_a_deep_drop() {
        let input = indoc! {"
            class A:
              def f(self):
                return 1
            x = 2
        "};
        let tokens = tokenize(input).expect("tokenize");
        let dedents = tokens.iter().filter(|t| **t == Token::Dedent).count();
        let indents = tokens.iter().filter(|t| **t == Token::Indent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&Token::Eof));
        // Both dedents appear before the tokens of the dropped-back line.
        let x_pos = tokens.iter().position(|t| *t == id("x")).expect("x token");
        assert_eq!(&tokens[x_pos - 2..x_pos], &[Token::Dedent, Token::Dedent]);
    }

    #[test]
    fn keeps_returning_eof_after_the_stream_ends() {
        let mut lexer = Lexer::new("x = 1\n").expect("lexer");
        while lexer.current() != &Token::Eof {
            lexer.next_token().expect("next");
        }
        assert_eq!(lexer.next_token().expect("next"), &Token::Eof);
        assert_eq!(lexer.next_token().expect("next"), &Token::Eof);
    }

    #[test]
    fn cursor_expect_checks_current_and_next() {
        let mut lexer = Lexer::new("x = 1\n").expect("lexer");
        assert_eq!(lexer.expect_identifier().expect("identifier"), "x");
        lexer.expect(&id("x")).expect("expect current");
        lexer.expect_next(&Token::Char('=')).expect("expect next");
        let err = lexer.expect(&Token::Newline).expect_err("wrong token");
        assert_eq!(
            err,
            LexError::UnexpectedToken {
                expected: "Newline".to_string(),
                found: "Char{=}".to_string(),
            }
        );
        let err = lexer.expect_identifier().expect_err("not an identifier");
        assert!(matches!(err, LexError::UnexpectedToken { .. }));
    }

    #[test]
    fn empty_source_yields_a_single_eof() {
        assert_eq!(tokenize("").expect("tokenize"), vec![Token::Eof]);
        assert_eq!(tokenize("\n\n\n").expect("tokenize"), vec![Token::Eof]);
        assert_eq!(tokenize("# only a comment\n").expect("tokenize"), vec![Token::Eof]);
    }
}
