//! Tree-walking evaluator.
//!
//! Statements execute for effect and report an explicit [`Flow`]: either they
//! ran to completion or a `return` is unwinding towards the nearest call
//! boundary.  Runtime errors travel separately as `Err(LoxError::Runtime)`, so
//! a `return` can never be mistaken for (or reported as) an error.
//!
//! Variable references use the distances recorded by the
//! [`Resolver`](crate::resolver::Resolver); references the resolver left
//! unannotated are globals and are looked up by name.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, info};

use crate::callable::{LoxFunction, NativeFunction};
use crate::class::{LoxClass, LoxInstance, INITIALIZER};
use crate::environment::{EnvRef, Environment};
use crate::error::{LoxError, Result};
use crate::expr::{Expr, ExprId, LiteralValue};
use crate::resolver::Resolver;
use crate::stmt::Stmt;
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Deepest nesting of Lox calls before `Stack overflow.` is raised.
pub const MAX_CALL_DEPTH: usize = 5_000;

/// Grow the host stack when less than this remains at a call boundary.
const RED_ZONE: usize = 128 * 1024;

/// Size of each stack segment `stacker` allocates.
const STACK_GROWTH: usize = 2 * 1024 * 1024;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
}

/// Sink receiving the text of every executed `print`.
pub type OutputSink = Box<dyn FnMut(&str)>;

pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    locals: HashMap<ExprId, usize>,
    output: OutputSink,
    call_depth: usize,
    /// Frames on the chain of every closure or class created, and every
    /// instance created.  These are the only places a reference cycle can
    /// close; [`Drop`] clears them.
    captured_frames: Vec<Weak<RefCell<Environment>>>,
    instances: Vec<Weak<LoxInstance>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates a new Interpreter printing to stdout, with the native globals
    /// (`clock`, `reset`) defined.
    pub fn new() -> Self {
        Self::with_output(Box::new(|text: &str| println!("{}", text)))
    }

    pub fn with_output(output: OutputSink) -> Self {
        info!("Initializing Interpreter");

        let globals: EnvRef = Rc::new(RefCell::new(Environment::new()));

        let mut interpreter = Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            output,
            call_depth: 0,
            captured_frames: Vec::new(),
            instances: Vec::new(),
        };

        interpreter.define_natives();

        interpreter
    }

    /// Clear the global scope and reseed it with the natives.  Local frames
    /// of constructs still executing are untouched, and resolution
    /// annotations stay valid: they never point at the globals frame.
    pub fn reset(&mut self) {
        info!("Resetting global environment");

        self.globals.borrow_mut().clear();
        self.define_natives();
    }

    fn define_natives(&mut self) {
        debug!("Defining native functions 'clock' and 'reset'");

        let mut globals = self.globals.borrow_mut();

        globals.define(
            "clock",
            Value::NativeFunction(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                func: |_interpreter, _args| {
                    let millis: i64 = chrono::Utc::now().timestamp_millis();
                    Ok(Value::Number(millis as f64 / 1000.0))
                },
            })),
        );

        globals.define(
            "reset",
            Value::NativeFunction(Rc::new(NativeFunction {
                name: "reset",
                arity: 0,
                func: |interpreter, _args| {
                    interpreter.reset();
                    Ok(Value::Nil)
                },
            })),
        );
    }

    // ───────────────────────── resolver hooks ─────────────────────────

    /// Run the static resolver over `statements`, recording distances here.
    pub fn resolve(&mut self, statements: &[Stmt]) -> Vec<LoxError> {
        Resolver::new(self).resolve(statements)
    }

    pub fn resolve_expression(&mut self, expr: &Expr) -> Vec<LoxError> {
        Resolver::new(self).resolve_expression(expr)
    }

    /// Called by the resolver for every local variable occurrence.
    pub fn note_local(&mut self, id: ExprId, depth: usize) {
        debug!("Noting local {:?} at depth {}", id, depth);
        self.locals.insert(id, depth);
    }

    /// Lexical distance recorded for `id`, `None` for globals.
    pub fn local_depth(&self, id: ExprId) -> Option<usize> {
        self.locals.get(&id).copied()
    }

    // ───────────────────────── entry points ───────────────────────────

    /// Interprets a list of statements (a "program"), stopping at the first
    /// runtime error.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            self.execute(stmt)?;
        }

        info!("Interpretation completed successfully");
        Ok(())
    }

    /// Evaluate a standalone, already resolved expression.
    pub fn evaluate_expression(&mut self, expr: &Expr) -> Result<Value> {
        self.evaluate(expr)
    }

    // ───────────────────────── statements ─────────────────────────────

    fn execute(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Block(statements) => {
                let env: EnvRef = Environment::child_of(&self.environment);
                self.execute_block(statements, env)
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => {
                debug!("Defining class '{}'", name.lexeme);

                let superclass: Option<Rc<LoxClass>> = match superclass {
                    Some(expr) => match self.evaluate(expr)? {
                        Value::Class(class) => Some(class),
                        _ => {
                            let token: &Token = match expr {
                                Expr::Variable { name, .. } => name,
                                _ => name,
                            };
                            return Err(LoxError::runtime(token, "Superclass must be a class."));
                        }
                    },
                    None => None,
                };

                self.environment
                    .borrow_mut()
                    .define(&name.lexeme, Value::Nil);

                // Methods of a subclass close over an extra frame holding `super`.
                let method_env: EnvRef = match &superclass {
                    Some(class) => {
                        let env: EnvRef = Environment::child_of(&self.environment);
                        env.borrow_mut()
                            .define("super", Value::Class(Rc::clone(class)));
                        env
                    }
                    None => Rc::clone(&self.environment),
                };

                let table: HashMap<String, Rc<LoxFunction>> = methods
                    .iter()
                    .map(|method| {
                        let function = LoxFunction::new(
                            Rc::clone(method),
                            Rc::clone(&method_env),
                            method.name.lexeme == INITIALIZER,
                        );
                        (method.name.lexeme.clone(), Rc::new(function))
                    })
                    .collect();

                let class = Rc::new(LoxClass::new(name.lexeme.clone(), superclass, table));

                self.environment
                    .borrow_mut()
                    .define(&name.lexeme, Value::Class(class));

                // `method_env` is the current frame or its child.
                self.note_captured(&method_env);

                info!("Class '{}' defined", name.lexeme);
                Ok(Flow::Normal)
            }

            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(Flow::Normal)
            }

            Stmt::Function(declaration) => {
                debug!("Defining function '{}'", declaration.name.lexeme);

                let function = LoxFunction::new(
                    Rc::clone(declaration),
                    Rc::clone(&self.environment),
                    false,
                );

                self.environment.borrow_mut().define(
                    &declaration.name.lexeme,
                    Value::Function(Rc::new(function)),
                );

                let env: EnvRef = Rc::clone(&self.environment);
                self.note_captured(&env);

                Ok(Flow::Normal)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::Print(expr) => {
                let value: Value = self.evaluate(expr)?;
                let text: String = value.to_string();

                debug!("Printing: {}", text);
                (self.output)(&text);

                Ok(Flow::Normal)
            }

            Stmt::Return { value, .. } => {
                let value: Value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                debug!("Returning value: {}", value);
                Ok(Flow::Return(value))
            }

            Stmt::Var { name, initializer } => {
                let value: Value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                debug!("Defining variable '{}' = {}", name.lexeme, value);
                self.environment.borrow_mut().define(&name.lexeme, value);

                Ok(Flow::Normal)
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(body)? {
                        return Ok(Flow::Return(value));
                    }
                }

                Ok(Flow::Normal)
            }
        }
    }

    /// Execute `statements` with `env` as the current scope.  The previous
    /// scope is restored on every exit path: completion, `return`, or error.
    pub fn execute_block(&mut self, statements: &[Stmt], env: EnvRef) -> Result<Flow> {
        let previous: EnvRef = std::mem::replace(&mut self.environment, env);

        let mut outcome: Result<Flow> = Ok(Flow::Normal);
        for stmt in statements {
            match self.execute(stmt) {
                Ok(Flow::Normal) => {}
                other => {
                    outcome = other;
                    break;
                }
            }
        }

        self.environment = previous;
        outcome
    }

    // ───────────────────────── expressions ────────────────────────────

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Assign { id, name, value } => {
                let value: Value = self.evaluate(value)?;

                match self.local_depth(*id) {
                    Some(distance) => {
                        Environment::assign_at(&self.environment, distance, name, value.clone())?
                    }
                    None => self.globals.borrow_mut().assign(name, value.clone())?,
                }

                Ok(value)
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left: Value = self.evaluate(left)?;
                let right: Value = self.evaluate(right)?;
                binary(operator, left, right)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee: Value = self.evaluate(callee)?;

                let mut values: Vec<Value> = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    values.push(self.evaluate(argument)?);
                }

                self.call(callee, paren, values)
            }

            Expr::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => LoxInstance::get(&instance, name),
                other => {
                    debug!("Property '{}' read on a {}", name.lexeme, other.type_name());
                    Err(LoxError::runtime(name, "Only instances have properties."))
                }
            },

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::from(s.as_str()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left: Value = self.evaluate(left)?;

                let short_circuit: bool = if operator.token_type == TokenType::OR {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };

                if short_circuit {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let instance: Rc<LoxInstance> = match self.evaluate(object)? {
                    Value::Instance(instance) => instance,
                    other => {
                        debug!("Field '{}' written on a {}", name.lexeme, other.type_name());
                        return Err(LoxError::runtime(name, "Only instances have fields."));
                    }
                };

                let value: Value = self.evaluate(value)?;
                instance.set(name, value.clone());

                Ok(value)
            }

            Expr::Super {
                id,
                keyword,
                method,
            } => self.evaluate_super(*id, keyword, method),

            Expr::This { id, keyword } => self.look_up_variable(keyword, *id),

            Expr::Unary { operator, right } => {
                let right: Value = self.evaluate(right)?;

                match operator.token_type {
                    TokenType::MINUS => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(LoxError::runtime(operator, "Operand must be a number.")),
                    },
                    _ => Ok(Value::Bool(!right.is_truthy())),
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(name, *id),
        }
    }

    /// `super.method`: the superclass sits at the resolved distance, the
    /// receiving instance (`this`) one frame closer.
    fn evaluate_super(&mut self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let distance: usize = self
            .local_depth(id)
            .ok_or_else(|| LoxError::runtime(keyword, "Can't use 'super' outside of a class."))?;

        // `this` lives one frame inside the `super` frame, never at it.
        let this_distance: usize = distance
            .checked_sub(1)
            .ok_or_else(|| LoxError::runtime(keyword, "No receiver bound for 'super'."))?;

        let superclass: Rc<LoxClass> =
            match Environment::get_at(&self.environment, distance, keyword)? {
                Value::Class(class) => class,
                _ => return Err(LoxError::runtime(keyword, "Superclass must be a class.")),
            };

        let this = Token::synthetic("this", keyword.line);
        let instance: Rc<LoxInstance> =
            match Environment::get_at(&self.environment, this_distance, &this)? {
                Value::Instance(instance) => instance,
                _ => return Err(LoxError::runtime(keyword, "Can't use 'super' outside of a class.")),
            };

        match superclass.find_method(&method.lexeme) {
            Some(function) => Ok(Value::Function(Rc::new(function.bind(instance)))),
            None => Err(LoxError::runtime(
                method,
                format!("Undefined property '{}'.", method.lexeme),
            )),
        }
    }

    fn look_up_variable(&self, name: &Token, id: ExprId) -> Result<Value> {
        match self.local_depth(id) {
            Some(distance) => Environment::get_at(&self.environment, distance, name),
            None => self.globals.borrow().get(name),
        }
    }

    /// Invokes a callable (native, user-defined function, or class).
    fn call(&mut self, callee: Value, paren: &Token, arguments: Vec<Value>) -> Result<Value> {
        let target: Callee = match callee {
            Value::NativeFunction(native) => Callee::Native(native),
            Value::Function(function) => Callee::Function(function),
            Value::Class(class) => Callee::Class(class),
            other => {
                debug!("Attempted to call a {}", other.type_name());
                return Err(LoxError::runtime(
                    paren,
                    "Can only call functions and classes.",
                ));
            }
        };

        let arity: usize = target.arity();
        if arguments.len() != arity {
            return Err(LoxError::runtime(
                paren,
                format!("Expected {} arguments but got {}.", arity, arguments.len()),
            ));
        }

        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(LoxError::runtime(paren, "Stack overflow."));
        }

        self.call_depth += 1;
        let result: Result<Value> =
            stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.dispatch(target, paren, arguments));
        self.call_depth -= 1;

        result
    }

    fn dispatch(&mut self, target: Callee, paren: &Token, arguments: Vec<Value>) -> Result<Value> {
        match target {
            Callee::Native(native) => {
                debug!("Calling native function '{}'", native.name);
                (native.func)(self, &arguments).map_err(|message| LoxError::runtime(paren, message))
            }

            Callee::Function(function) => {
                debug!("Calling function '{}'", function.name());
                function.call(self, arguments)
            }

            Callee::Class(class) => self.instantiate(class, arguments),
        }
    }

    fn instantiate(&mut self, class: Rc<LoxClass>, arguments: Vec<Value>) -> Result<Value> {
        debug!("Instantiating class '{}'", class.name);

        let instance: Rc<LoxInstance> = Rc::new(LoxInstance::new(Rc::clone(&class)));
        self.note_instance(&instance);

        if let Some(initializer) = class.find_method(INITIALIZER) {
            initializer
                .bind(Rc::clone(&instance))
                .call(self, arguments)?;
        }

        Ok(Value::Instance(instance))
    }

    // ───────────────────────── cycle bookkeeping ──────────────────────

    /// Record `env` and every enclosing frame below the globals.  A closure
    /// can be stored into any of them, so each one may close a cycle.
    fn note_captured(&mut self, env: &EnvRef) {
        let mut frame: Option<EnvRef> = Some(Rc::clone(env));

        while let Some(current) = frame {
            if Rc::ptr_eq(&current, &self.globals) {
                break;
            }

            if self.captured_frames.len() == self.captured_frames.capacity() {
                // Drop dead frames and repeats of the same live frame.
                self.captured_frames.retain(|frame| frame.strong_count() > 0);
                self.captured_frames.sort_by_key(|frame| frame.as_ptr() as usize);
                self.captured_frames.dedup_by(|a, b| Weak::ptr_eq(a, b));
            }

            self.captured_frames.push(Rc::downgrade(&current));

            let parent: Option<EnvRef> = current.borrow().enclosing();
            frame = parent;
        }
    }

    fn note_instance(&mut self, instance: &Rc<LoxInstance>) {
        if self.instances.len() == self.instances.capacity() {
            self.instances.retain(|instance| instance.strong_count() > 0);
        }

        self.instances.push(Rc::downgrade(instance));
    }
}

/// A value that passed the callable check in [`Interpreter::call`].
enum Callee {
    Native(Rc<NativeFunction>),
    Function(Rc<LoxFunction>),
    Class(Rc<LoxClass>),
}

impl Callee {
    fn arity(&self) -> usize {
        match self {
            Callee::Native(native) => native.arity,
            Callee::Function(function) => function.arity(),
            Callee::Class(class) => class.arity(),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        debug!(
            "Releasing {} captured frame(s) and {} instance(s)",
            self.captured_frames.len(),
            self.instances.len()
        );

        for instance in self.instances.drain(..).filter_map(|weak| weak.upgrade()) {
            instance.clear_fields();
        }

        for frame in self.captured_frames.drain(..).filter_map(|weak| weak.upgrade()) {
            frame.borrow_mut().clear();
        }

        self.globals.borrow_mut().clear();
    }
}

fn number_operands(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(LoxError::runtime(operator, "Operands must be numbers.")),
    }
}

/// Strict binary operators.  Division follows IEEE‑754 (`1/0` is `inf`).
fn binary(operator: &Token, left: Value, right: Value) -> Result<Value> {
    let value: Value = match operator.token_type {
        TokenType::PLUS => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(a), Value::String(b)) => {
                let mut joined: String = String::with_capacity(a.len() + b.len());
                joined.push_str(&a);
                joined.push_str(&b);
                Value::from(joined)
            }
            _ => {
                return Err(LoxError::runtime(
                    operator,
                    "Operands must be two numbers or two strings.",
                ))
            }
        },

        TokenType::MINUS => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Number(a - b)
        }

        TokenType::STAR => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Number(a * b)
        }

        TokenType::SLASH => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Number(a / b)
        }

        TokenType::GREATER => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Bool(a > b)
        }

        TokenType::GREATER_EQUAL => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Bool(a >= b)
        }

        TokenType::LESS => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Bool(a < b)
        }

        TokenType::LESS_EQUAL => {
            let (a, b) = number_operands(operator, &left, &right)?;
            Value::Bool(a <= b)
        }

        TokenType::EQUAL_EQUAL => Value::Bool(left == right),

        TokenType::BANG_EQUAL => Value::Bool(left != right),

        _ => {
            return Err(LoxError::runtime(
                operator,
                format!("Invalid binary operator '{}'.", operator.lexeme),
            ))
        }
    };

    Ok(value)
}
