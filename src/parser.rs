//! Recursive-descent parser from the lexer's token cursor to the AST.
//!
//! Class declarations are resolved while parsing: the parser keeps a table
//! of the classes seen so far, so parent references and instantiations
//! bind to their class descriptors before execution starts.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::Statement;
use crate::lexer::{LexError, Lexer};
use crate::runtime::{Class, Comparator, Method, Object, ObjectHolder};
use crate::token::Token;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unknown class name {name}")]
    UnknownClass { name: String },
    #[error("First parameter of method '{method}' must be self")]
    MissingSelfParameter { method: String },
    #[error("str() takes exactly one argument")]
    StringifyArity,
    #[error("Cannot assign to this expression")]
    InvalidAssignmentTarget,
    #[error("Field access requires a named receiver")]
    FieldAccessOnExpression,
}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    classes: HashMap<String, Class>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        Self {
            lexer,
            classes: HashMap::new(),
        }
    }

    /// Parses a whole program into a `Compound` of its top-level
    /// statements.
    pub fn parse_program(mut self) -> ParseResult<Statement> {
        let mut statements = Vec::new();
        loop {
            match self.current() {
                Token::Eof => break,
                Token::Newline => self.advance()?,
                _ => statements.push(self.parse_statement()?),
            }
        }
        Ok(Statement::Compound { statements })
    }

    fn current(&self) -> Token {
        self.lexer.current().clone()
    }

    fn advance(&mut self) -> ParseResult<()> {
        self.lexer.next_token()?;
        Ok(())
    }

    fn consume(&mut self, expected: &Token) -> ParseResult<()> {
        self.lexer.expect(expected)?;
        self.advance()
    }

    fn consume_identifier(&mut self) -> ParseResult<String> {
        let name = self.lexer.expect_identifier()?.to_string();
        self.advance()?;
        Ok(name)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.current() {
            Token::Class => self.parse_class_definition(),
            Token::If => self.parse_if(),
            Token::Print => self.parse_print(),
            Token::Return => self.parse_return(),
            _ => self.parse_simple_statement(),
        }
    }

    fn parse_class_definition(&mut self) -> ParseResult<Statement> {
        self.consume(&Token::Class)?;
        let name = self.consume_identifier()?;
        let parent = if self.current() == Token::Char('(') {
            self.advance()?;
            let parent_name = self.consume_identifier()?;
            let parent = self
                .classes
                .get(&parent_name)
                .cloned()
                .ok_or(ParseError::UnknownClass { name: parent_name })?;
            self.consume(&Token::Char(')'))?;
            Some(parent)
        } else {
            None
        };
        self.consume(&Token::Char(':'))?;
        self.consume(&Token::Newline)?;
        self.consume(&Token::Indent)?;

        let mut methods = Vec::new();
        while self.current() != Token::Dedent {
            if self.current() == Token::Newline {
                self.advance()?;
                continue;
            }
            methods.push(self.parse_method()?);
        }
        self.consume(&Token::Dedent)?;

        let class = Class::new(name.clone(), methods, parent);
        self.classes.insert(name, class.clone());
        Ok(Statement::ClassDefinition { class })
    }

    fn parse_method(&mut self) -> ParseResult<Method> {
        self.consume(&Token::Def)?;
        let name = self.consume_identifier()?;
        self.consume(&Token::Char('('))?;
        let mut params = Vec::new();
        if self.current() != Token::Char(')') {
            loop {
                params.push(self.consume_identifier()?);
                if self.current() == Token::Char(',') {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.consume(&Token::Char(')'))?;
        self.consume(&Token::Char(':'))?;

        // `self` is implicit at call time; only the remaining formals count
        // toward a method's arity.
        if params.first().map(String::as_str) != Some("self") {
            return Err(ParseError::MissingSelfParameter { method: name });
        }
        params.remove(0);

        let body = self.parse_suite()?;
        Ok(Method {
            name,
            formal_params: params,
            body: Statement::MethodBody {
                body: Box::new(body),
            },
        })
    }

    /// A colon-introduced block: newline, indent, statements, dedent.
    fn parse_suite(&mut self) -> ParseResult<Statement> {
        self.consume(&Token::Newline)?;
        self.consume(&Token::Indent)?;
        let mut statements = Vec::new();
        while self.current() != Token::Dedent {
            if self.current() == Token::Newline {
                self.advance()?;
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        self.consume(&Token::Dedent)?;
        Ok(Statement::Compound { statements })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        self.consume(&Token::If)?;
        let condition = self.parse_expression()?;
        self.consume(&Token::Char(':'))?;
        let then_body = self.parse_suite()?;
        let else_body = if self.current() == Token::Else {
            self.advance()?;
            self.consume(&Token::Char(':'))?;
            Some(Box::new(self.parse_suite()?))
        } else {
            None
        };
        Ok(Statement::IfElse {
            condition: Box::new(condition),
            then_body: Box::new(then_body),
            else_body,
        })
    }

    fn parse_print(&mut self) -> ParseResult<Statement> {
        self.consume(&Token::Print)?;
        let mut args = Vec::new();
        if self.current() != Token::Newline {
            loop {
                args.push(self.parse_expression()?);
                if self.current() == Token::Char(',') {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.consume(&Token::Newline)?;
        Ok(Statement::Print { args })
    }

    fn parse_return(&mut self) -> ParseResult<Statement> {
        self.consume(&Token::Return)?;
        let value = self.parse_expression()?;
        self.consume(&Token::Newline)?;
        Ok(Statement::Return {
            value: Box::new(value),
        })
    }

    /// Assignment or expression statement. An assignment target must have
    /// parsed as a (possibly dotted) variable.
    fn parse_simple_statement(&mut self) -> ParseResult<Statement> {
        let expression = self.parse_expression()?;
        let statement = if self.current() == Token::Char('=') {
            let Statement::VariableValue { mut dotted_ids } = expression else {
                return Err(ParseError::InvalidAssignmentTarget);
            };
            self.advance()?;
            let value = Box::new(self.parse_expression()?);
            if dotted_ids.len() == 1 {
                Statement::Assignment {
                    name: dotted_ids.remove(0),
                    value,
                }
            } else {
                let field = dotted_ids
                    .pop()
                    .ok_or(ParseError::InvalidAssignmentTarget)?;
                Statement::FieldAssignment {
                    object: Box::new(Statement::VariableValue { dotted_ids }),
                    field,
                    value,
                }
            }
        } else {
            expression
        };
        self.consume(&Token::Newline)?;
        Ok(statement)
    }

    fn parse_expression(&mut self) -> ParseResult<Statement> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Statement> {
        let mut expression = self.parse_and()?;
        while self.current() == Token::Or {
            self.advance()?;
            let rhs = self.parse_and()?;
            expression = Statement::Or {
                lhs: Box::new(expression),
                rhs: Box::new(rhs),
            };
        }
        Ok(expression)
    }

    fn parse_and(&mut self) -> ParseResult<Statement> {
        let mut expression = self.parse_not()?;
        while self.current() == Token::And {
            self.advance()?;
            let rhs = self.parse_not()?;
            expression = Statement::And {
                lhs: Box::new(expression),
                rhs: Box::new(rhs),
            };
        }
        Ok(expression)
    }

    fn parse_not(&mut self) -> ParseResult<Statement> {
        if self.current() == Token::Not {
            self.advance()?;
            let arg = self.parse_not()?;
            return Ok(Statement::Not { arg: Box::new(arg) });
        }
        self.parse_comparison()
    }

    /// A single, non-chaining comparison.
    fn parse_comparison(&mut self) -> ParseResult<Statement> {
        let lhs = self.parse_sum()?;
        let comparator = match self.current() {
            Token::Eq => Comparator::Equal,
            Token::NotEq => Comparator::NotEqual,
            Token::Char('<') => Comparator::Less,
            Token::Char('>') => Comparator::Greater,
            Token::LessOrEq => Comparator::LessOrEqual,
            Token::GreaterOrEq => Comparator::GreaterOrEqual,
            _ => return Ok(lhs),
        };
        self.advance()?;
        let rhs = self.parse_sum()?;
        Ok(Statement::Comparison {
            comparator,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_sum(&mut self) -> ParseResult<Statement> {
        let mut expression = self.parse_term()?;
        loop {
            match self.current() {
                Token::Char('+') => {
                    self.advance()?;
                    let rhs = self.parse_term()?;
                    expression = Statement::Add {
                        lhs: Box::new(expression),
                        rhs: Box::new(rhs),
                    };
                }
                Token::Char('-') => {
                    self.advance()?;
                    let rhs = self.parse_term()?;
                    expression = Statement::Sub {
                        lhs: Box::new(expression),
                        rhs: Box::new(rhs),
                    };
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_term(&mut self) -> ParseResult<Statement> {
        let mut expression = self.parse_primary()?;
        loop {
            match self.current() {
                Token::Char('*') => {
                    self.advance()?;
                    let rhs = self.parse_primary()?;
                    expression = Statement::Mult {
                        lhs: Box::new(expression),
                        rhs: Box::new(rhs),
                    };
                }
                Token::Char('/') => {
                    self.advance()?;
                    let rhs = self.parse_primary()?;
                    expression = Statement::Div {
                        lhs: Box::new(expression),
                        rhs: Box::new(rhs),
                    };
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Statement> {
        let mut expression = match self.current() {
            Token::Number(value) => {
                self.advance()?;
                Statement::Constant {
                    value: ObjectHolder::own(Object::Number(value)),
                }
            }
            Token::String(value) => {
                self.advance()?;
                Statement::Constant {
                    value: ObjectHolder::own(Object::String(value)),
                }
            }
            Token::True => {
                self.advance()?;
                Statement::Constant {
                    value: ObjectHolder::own(Object::Bool(true)),
                }
            }
            Token::False => {
                self.advance()?;
                Statement::Constant {
                    value: ObjectHolder::own(Object::Bool(false)),
                }
            }
            Token::None => {
                self.advance()?;
                Statement::Constant {
                    value: ObjectHolder::none(),
                }
            }
            Token::Char('(') => {
                self.advance()?;
                let inner = self.parse_expression()?;
                self.consume(&Token::Char(')'))?;
                inner
            }
            Token::Id(name) => {
                self.advance()?;
                if self.current() == Token::Char('(') {
                    let mut args = self.parse_call_args()?;
                    if name == "str" {
                        if args.len() != 1 {
                            return Err(ParseError::StringifyArity);
                        }
                        Statement::Stringify {
                            arg: Box::new(args.remove(0)),
                        }
                    } else {
                        // A bare call must instantiate a declared class;
                        // free functions do not exist in the language.
                        let class = self
                            .classes
                            .get(&name)
                            .cloned()
                            .ok_or(ParseError::UnknownClass { name })?;
                        Statement::NewInstance { class, args }
                    }
                } else {
                    Statement::VariableValue {
                        dotted_ids: vec![name],
                    }
                }
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    expected: "an expression".to_string(),
                    found: other.to_string(),
                });
            }
        };

        while self.current() == Token::Char('.') {
            self.advance()?;
            let name = self.consume_identifier()?;
            if self.current() == Token::Char('(') {
                let args = self.parse_call_args()?;
                expression = Statement::MethodCall {
                    object: Box::new(expression),
                    method: name,
                    args,
                };
            } else {
                match expression {
                    Statement::VariableValue { mut dotted_ids } => {
                        dotted_ids.push(name);
                        expression = Statement::VariableValue { dotted_ids };
                    }
                    _ => return Err(ParseError::FieldAccessOnExpression),
                }
            }
        }
        Ok(expression)
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Statement>> {
        self.consume(&Token::Char('('))?;
        let mut args = Vec::new();
        if self.current() != Token::Char(')') {
            loop {
                args.push(self.parse_expression()?);
                if self.current() == Token::Char(',') {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.consume(&Token::Char(')'))?;
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Closure, Context};
    use indoc::indoc;

    fn run_program(source: &str) -> String {
        let lexer = Lexer::new(source).expect("lex");
        let program = Parser::new(lexer).parse_program().expect("parse");
        let mut output = String::new();
        let mut closure = Closure::new();
        let mut context = Context::new(&mut output);
        program
            .execute(&mut closure, &mut context)
            .expect("execute");
        drop(context);
        output
    }

    fn parse_error(source: &str) -> ParseError {
        let lexer = Lexer::new(source).expect("lex");
        Parser::new(lexer)
            .parse_program()
            .map(|_| ())
            .expect_err("expected a parse failure")
    }

    #[test]
    fn parses_assignment_arithmetic_and_print() {
        assert_eq!(run_program("x = 1 + 2\nprint x\n"), "3\n");
        assert_eq!(run_program("print 1 + 2 * 3\n"), "7\n");
        assert_eq!(run_program("print (1 + 2) * 3\n"), "9\n");
        assert_eq!(run_program("print 10 - 2 - 3\n"), "5\n");
        assert_eq!(run_program("print 7 / 2, 7 * 3\n"), "3 21\n");
    }

    #[test]
    fn parses_comparisons_and_logic_with_correct_precedence() {
        assert_eq!(run_program("print 1 < 2 and not 2 < 1\n"), "True\n");
        assert_eq!(run_program("print 1 > 2 or 3 >= 3\n"), "True\n");
        assert_eq!(run_program("print 1 + 1 == 2\n"), "True\n");
        assert_eq!(run_program("print not 1 != 1\n"), "True\n");
        assert_eq!(run_program("print 'a' <= 'b'\n"), "True\n");
    }

    #[test]
    fn parses_if_else_suites() {
        let source = indoc! {r#"
            x = 10
            if x > 5:
              print "big"
            else:
              print "small"
        "#};
        assert_eq!(run_program(source), "big\n");
    }

    #[test]
    fn parses_nested_suites() {
        let source = indoc! {r#"
            x = 4
            if x > 1:
              if x > 3:
                print "deep"
              else:
                print "shallow"
        "#};
        assert_eq!(run_program(source), "deep\n");
    }

    #[test]
    fn parses_classes_methods_and_instantiation() {
        let source = indoc! {r#"
            class Greeter:
              def __init__(self, name):
                self.name = name
              def hello(self):
                return "hello, " + self.name
            g = Greeter("world")
            print g.hello()
        "#};
        assert_eq!(run_program(source), "hello, world\n");
    }

    #[test]
    fn parses_inheritance_and_call_trailers() {
        let source = indoc! {"
            class A:
              def f(self):
                return 1
            class B(A):
              def g(self):
                return self.f() + 10
            print B().g()
        "};
        assert_eq!(run_program(source), "11\n");
    }

    #[test]
    fn parses_stringify_calls() {
        assert_eq!(run_program("print str(42) + \"!\"\n"), "42!\n");
        assert_eq!(run_program("print str(None)\n"), "None\n");
    }

    #[test]
    fn parses_dotted_assignment_targets() {
        let source = indoc! {"
            class Box:
              def __init__(self):
                self.value = 0
            b = Box()
            b.value = 9
            print b.value
        "};
        assert_eq!(run_program(source), "9\n");
    }

    #[test]
    fn rejects_calls_to_undeclared_classes() {
        assert_eq!(
            parse_error("x = Missing()\n"),
            ParseError::UnknownClass {
                name: "Missing".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_parent_classes() {
        let source = indoc! {"
            class B(A):
              def f(self):
                return 1
        "};
        assert_eq!(
            parse_error(source),
            ParseError::UnknownClass {
                name: "A".to_string()
            }
        );
    }

    #[test]
    fn rejects_invalid_assignment_targets() {
        assert_eq!(
            parse_error("1 = 2\n"),
            ParseError::InvalidAssignmentTarget
        );
    }

    #[test]
    fn rejects_methods_without_self() {
        let source = indoc! {"
            class C:
              def f(x):
                return x
        "};
        assert_eq!(
            parse_error(source),
            ParseError::MissingSelfParameter {
                method: "f".to_string()
            }
        );
    }

    #[test]
    fn rejects_str_with_wrong_arity() {
        assert_eq!(parse_error("x = str(1, 2)\n"), ParseError::StringifyArity);
    }

    #[test]
    fn rejects_stray_tokens() {
        assert!(matches!(
            parse_error("x = + 1\n"),
            ParseError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            parse_error("def f(self):\n"),
            ParseError::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn accepts_return_at_the_top_level() {
        // The parser accepts it; rejecting it is the runtime's job.
        let lexer = Lexer::new("return 1\n").expect("lex");
        Parser::new(lexer).parse_program().expect("parse");
    }
}
