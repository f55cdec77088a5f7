//! The program pipeline as one owned object.
//!
//! A [`Lox`] session keeps a single [`Interpreter`] (and with it the globals)
//! alive across calls, so a REPL can define a function on one line and call it
//! on the next.  Each entry point runs
//! `scan → parse → resolve → interpret`, stopping at the first stage that
//! reports anything.

use log::{debug, info};

use crate::ast_printer::AstPrinter;
use crate::error::{ErrorKind, LoxError};
use crate::expr::Expr;
use crate::interpreter::{Interpreter, OutputSink};
use crate::parser::Parser;
use crate::scanner::scan_tokens;
use crate::stmt::Stmt;
use crate::token::Token;
use crate::value::Value;

/// Sink receiving every diagnostic, classified by stage.
pub type ErrorSink = Box<dyn FnMut(ErrorKind, &str)>;

pub type RunResult<T> = std::result::Result<T, Vec<LoxError>>;

pub struct Lox {
    interpreter: Interpreter,
    errors: Option<ErrorSink>,
}

impl Default for Lox {
    fn default() -> Self {
        Self::new()
    }
}

impl Lox {
    /// A session printing to stdout and reporting errors only through return
    /// values.
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(),
            errors: None,
        }
    }

    pub fn with_output(output: OutputSink) -> Self {
        Self {
            interpreter: Interpreter::with_output(output),
            errors: None,
        }
    }

    /// Also push every diagnostic to `sink` as it is produced.
    pub fn on_error(mut self, sink: ErrorSink) -> Self {
        self.errors = Some(sink);
        self
    }

    /// Clear and reseed the globals without rebuilding the session.
    pub fn reset(&mut self) {
        self.interpreter.reset();
    }

    /// Run `source` as a program.
    pub fn run(&mut self, source: &str) -> RunResult<()> {
        let tokens: Vec<Token> = self.scan(source)?;
        let statements: Vec<Stmt> = self.check(Parser::new(&tokens).parse())?;

        self.execute(&statements)
    }

    /// Evaluate `source` as a single expression and return its value.
    pub fn evaluate(&mut self, source: &str) -> RunResult<Value> {
        let tokens: Vec<Token> = self.scan(source)?;

        let expr: Expr = match Parser::new(&tokens).parse_expression() {
            Ok(expr) => expr,
            Err(errors) => return Err(self.report(errors)),
        };

        self.evaluate_parsed(&expr)
    }

    /// REPL entry: run `line` as statements, or, if it only parses as a bare
    /// expression, evaluate it and hand back the value for echoing.
    pub fn run_line(&mut self, line: &str) -> RunResult<Option<Value>> {
        let tokens: Vec<Token> = self.scan(line)?;
        let (statements, parse_errors) = Parser::new(&tokens).parse();

        if parse_errors.is_empty() {
            debug!("AST:\n{}", AstPrinter::print_program(&statements));
            return self.execute(&statements).map(|()| None);
        }

        match Parser::new(&tokens).parse_expression() {
            Ok(expr) => self.evaluate_parsed(&expr).map(Some),
            Err(_) => Err(self.report(parse_errors)),
        }
    }

    // ───────────────────────── stages ─────────────────────────

    fn scan(&mut self, source: &str) -> RunResult<Vec<Token>> {
        let (tokens, errors) = scan_tokens(source);

        if !errors.is_empty() {
            return Err(self.report(errors));
        }

        for token in &tokens {
            debug!("- {}", token);
        }

        Ok(tokens)
    }

    fn check(&mut self, parsed: (Vec<Stmt>, Vec<LoxError>)) -> RunResult<Vec<Stmt>> {
        let (statements, errors) = parsed;

        if !errors.is_empty() {
            return Err(self.report(errors));
        }

        debug!("AST:\n{}", AstPrinter::print_program(&statements));
        Ok(statements)
    }

    fn execute(&mut self, statements: &[Stmt]) -> RunResult<()> {
        let errors: Vec<LoxError> = self.interpreter.resolve(statements);
        if !errors.is_empty() {
            return Err(self.report(errors));
        }

        info!("Executing {} statement(s)", statements.len());

        self.interpreter
            .interpret(statements)
            .map_err(|e| self.report(vec![e]))
    }

    fn evaluate_parsed(&mut self, expr: &Expr) -> RunResult<Value> {
        debug!("AST: {}", AstPrinter::print(expr));

        let errors: Vec<LoxError> = self.interpreter.resolve_expression(expr);
        if !errors.is_empty() {
            return Err(self.report(errors));
        }

        self.interpreter
            .evaluate_expression(expr)
            .map_err(|e| self.report(vec![e]))
    }

    fn report(&mut self, errors: Vec<LoxError>) -> Vec<LoxError> {
        if let Some(sink) = self.errors.as_mut() {
            for error in &errors {
                sink(error.kind(), &error.to_string());
            }
        }

        errors
    }
}
