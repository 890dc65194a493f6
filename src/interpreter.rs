//! Tree-walking evaluator.
//!
//! Execution recurses over the AST with an explicit environment chain.
//! `return` travels through the statement result channel (`ExecResult`);
//! user raises and host errors travel through `InterpreterError`, which is
//! what `try`/`except` intercepts. Program output is collected into a sink
//! so callers decide when to flush it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::mem;
use std::path::PathBuf;
use std::rc::Rc;

use crate::ast::{
    BinaryOperator, Block, ElseBranch, ExceptClause, Expression, Program, Statement, UnaryOperator,
};
use crate::{lexer, parser};

mod builtins;
mod env;
mod error;
mod value;

pub use env::Environment;
pub use error::{InterpreterError, RaisedException, RuntimeError};
pub use value::{Class, Dict, Function, Instance, Module, Value};

use builtins::Builtin;

/// Control-flow marker for statement execution.
enum ExecResult {
    Continue,
    Return(Value),
}

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    modules: HashMap<String, Rc<Module>>,
    loading: HashSet<String>,
    module_root: PathBuf,
    output: Vec<String>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_module_root(PathBuf::from("."))
    }

    /// Imports resolve `<name>.py` against `module_root`; the CLI uses the
    /// process working directory.
    pub fn with_module_root(module_root: impl Into<PathBuf>) -> Self {
        let mut globals = Environment::new();
        builtins::seed_builtins(&mut globals);
        Self {
            globals: Rc::new(RefCell::new(globals)),
            modules: HashMap::new(),
            loading: HashSet::new(),
            module_root: module_root.into(),
            output: Vec::new(),
        }
    }

    /// Execute a program's statements in the global frame. A `return` that
    /// escapes to the top level is reported as a diagnostic line and stops
    /// evaluation, matching the reference behavior.
    pub fn interpret(&mut self, program: &Program) -> Result<(), InterpreterError> {
        let globals = Rc::clone(&self.globals);
        if let ExecResult::Return(value) = self.exec_statements(&program.statements, &globals)? {
            let rendered = value.to_output();
            self.output.push(format!("Top-level return: {rendered}"));
        }
        Ok(())
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        mem::take(&mut self.output).join("\n")
    }

    fn exec_statements(
        &mut self,
        statements: &[Statement],
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        for statement in statements {
            match self.exec_statement(statement, env)? {
                ExecResult::Continue => {}
                ExecResult::Return(value) => return Ok(ExecResult::Return(value)),
            }
        }
        Ok(ExecResult::Continue)
    }

    /// Run a block in a fresh child frame of `env`.
    fn exec_block(
        &mut self,
        block: &Block,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        let frame = Environment::child(env);
        self.exec_statements(&block.statements, &frame)
    }

    fn exec_statement(
        &mut self,
        statement: &Statement,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        match statement {
            Statement::Expr(expr) => {
                self.eval_expression(expr, env)?;
                Ok(ExecResult::Continue)
            }
            Statement::Assign { name, value } => {
                let value = self.eval_expression(value, env)?;
                // First write creates the binding here; later writes rebind
                // the nearest frame that defines the name.
                let assigned = env.borrow_mut().assign(name, value.clone());
                if !assigned {
                    env.borrow_mut().define(name.clone(), value);
                }
                Ok(ExecResult::Continue)
            }
            Statement::AttributeAssign {
                object,
                name,
                value,
            } => {
                let value = self.eval_expression(value, env)?;
                let target = self.eval_expression(object, env)?;
                match target {
                    Value::Instance(instance) => {
                        instance
                            .attributes
                            .borrow_mut()
                            .insert(name.clone(), value);
                        Ok(ExecResult::Continue)
                    }
                    other => Err(RuntimeError::InvalidAttributeTarget {
                        attribute: name.clone(),
                        type_name: other.type_name(),
                    }
                    .into()),
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_expression(condition, env)?.is_truthy() {
                    self.exec_block(then_branch, env)
                } else {
                    match else_branch {
                        Some(ElseBranch::Block(block)) => self.exec_block(block, env),
                        Some(ElseBranch::If(statement)) => self.exec_statement(statement, env),
                        Option::None => Ok(ExecResult::Continue),
                    }
                }
            }
            Statement::While { condition, body } => {
                while self.eval_expression(condition, env)?.is_truthy() {
                    if let ExecResult::Return(value) = self.exec_block(body, env)? {
                        return Ok(ExecResult::Return(value));
                    }
                }
                Ok(ExecResult::Continue)
            }
            Statement::For {
                variable,
                iterable,
                body,
            } => self.exec_for(variable, iterable, body, env),
            Statement::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expression(expr, env)?,
                    Option::None => Value::None,
                };
                Ok(ExecResult::Return(value))
            }
            Statement::FunctionDef { name, params, body } => {
                let function = Function {
                    params: params.clone(),
                    body: Rc::clone(body),
                    closure: Rc::clone(env),
                };
                env.borrow_mut()
                    .define(name.clone(), Value::Function(Rc::new(function)));
                Ok(ExecResult::Continue)
            }
            Statement::ClassDef { name, body } => self.exec_class_def(name, body, env),
            Statement::Import { module, alias } => {
                let loaded = self.load_module(module)?;
                let binding = alias.clone().unwrap_or_else(|| loaded.name.clone());
                env.borrow_mut().define(binding, Value::Module(loaded));
                Ok(ExecResult::Continue)
            }
            Statement::FromImport { module, names } => {
                let loaded = self.load_module(module)?;
                for import in names {
                    let value = loaded.env.borrow().get(&import.name).ok_or_else(|| {
                        InterpreterError::from(RuntimeError::ImportSymbolMissing {
                            name: import.name.clone(),
                            module: loaded.name.clone(),
                        })
                    })?;
                    let binding = import.alias.clone().unwrap_or_else(|| import.name.clone());
                    env.borrow_mut().define(binding, value);
                }
                Ok(ExecResult::Continue)
            }
            Statement::Try { body, handlers } => self.exec_try(body, handlers, env),
        }
    }

    fn exec_for(
        &mut self,
        variable: &str,
        iterable: &Expression,
        body: &Block,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        let iterable = self.eval_expression(iterable, env)?;
        match iterable {
            Value::List(items) => {
                // Indexed progression over the live buffer: growing or
                // shrinking the list inside the body stays well-defined.
                let mut index = 0;
                loop {
                    let Some(item) = items.borrow().get(index).cloned() else {
                        break;
                    };
                    // The loop variable lands in the enclosing frame, so it
                    // persists after the loop; the body runs in a child frame.
                    env.borrow_mut().define(variable.to_string(), item);
                    if let ExecResult::Return(value) = self.exec_block(body, env)? {
                        return Ok(ExecResult::Return(value));
                    }
                    index += 1;
                }
                Ok(ExecResult::Continue)
            }
            Value::Dict(dict) => {
                let keys = dict.borrow().keys();
                for key in keys {
                    env.borrow_mut().define(variable.to_string(), Value::Str(key));
                    if let ExecResult::Return(value) = self.exec_block(body, env)? {
                        return Ok(ExecResult::Return(value));
                    }
                }
                Ok(ExecResult::Continue)
            }
            other => Err(RuntimeError::NotIterable {
                type_name: other.type_name(),
            }
            .into()),
        }
    }

    /// Run the class body in its own frame, then collect every function
    /// binding from that frame as a method.
    fn exec_class_def(
        &mut self,
        name: &str,
        body: &Block,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        let class_frame = Environment::child(env);
        if let ExecResult::Return(value) = self.exec_statements(&body.statements, &class_frame)? {
            return Ok(ExecResult::Return(value));
        }

        let mut methods = HashMap::new();
        for (binding, value) in class_frame.borrow().bindings() {
            if let Value::Function(function) = value {
                methods.insert(binding.clone(), Rc::clone(function));
            }
        }

        let class = Class {
            name: name.to_string(),
            methods,
        };
        env.borrow_mut()
            .define(name.to_string(), Value::Class(Rc::new(class)));
        Ok(ExecResult::Continue)
    }

    fn exec_try(
        &mut self,
        body: &Block,
        handlers: &[ExceptClause],
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        match self.exec_block(body, env) {
            // A `return` unwinding the try body is not catchable.
            Ok(flow) => Ok(flow),
            Err(InterpreterError::Raised(raised)) => {
                for handler in handlers {
                    let matched = handler
                        .type_name
                        .as_deref()
                        .map_or(true, |declared| declared == raised.type_name);
                    if matched {
                        return self.run_handler(handler, raised.value.clone(), env);
                    }
                }
                Err(InterpreterError::Raised(raised))
            }
            Err(InterpreterError::Runtime(error)) => {
                // Host errors are catchable as `RuntimeError` (or bare
                // except); the bound variable receives the message string.
                for handler in handlers {
                    let matched = handler
                        .type_name
                        .as_deref()
                        .map_or(true, |declared| declared == "RuntimeError");
                    if matched {
                        let message = Value::Str(error.to_string());
                        return self.run_handler(handler, message, env);
                    }
                }
                Err(InterpreterError::Runtime(error))
            }
        }
    }

    fn run_handler(
        &mut self,
        handler: &ExceptClause,
        bound: Value,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<ExecResult, InterpreterError> {
        let frame = Environment::child(env);
        if let Some(binding) = &handler.binding {
            frame.borrow_mut().define(binding.clone(), bound);
        }
        self.exec_statements(&handler.body.statements, &frame)
    }

    fn eval_expression(
        &mut self,
        expr: &Expression,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<Value, InterpreterError> {
        match expr {
            Expression::Number(value) => Ok(Value::Number(*value)),
            Expression::Str(value) => Ok(Value::Str(value.clone())),
            Expression::Boolean(value) => Ok(Value::Bool(*value)),
            Expression::None => Ok(Value::None),
            Expression::Identifier(name) => env.borrow().get(name).ok_or_else(|| {
                InterpreterError::from(RuntimeError::UndefinedVariable { name: name.clone() })
            }),
            Expression::List(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expression(element, env)?);
                }
                Ok(Value::list(items))
            }
            Expression::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key_expr, value_expr) in pairs {
                    let key = self.eval_expression(key_expr, env)?;
                    let value = self.eval_expression(value_expr, env)?;
                    let Value::Str(key) = key else {
                        return Err(RuntimeError::DictKeyType.into());
                    };
                    // Later duplicates overwrite earlier ones.
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expression::Index { object, index } => {
                let object = self.eval_expression(object, env)?;
                let index = self.eval_expression(index, env)?;
                eval_index(object, index)
            }
            Expression::Attribute { object, name } => {
                let object = self.eval_expression(object, env)?;
                self.attribute_of(&object, name)
            }
            Expression::Unary { op, operand } => {
                let operand = self.eval_expression(operand, env)?;
                eval_unary(*op, operand)
            }
            Expression::Binary { left, op, right } => {
                // Both operands are always evaluated; `and`/`or` do not
                // short-circuit.
                let left = self.eval_expression(left, env)?;
                let right = self.eval_expression(right, env)?;
                eval_binary(*op, left, right)
            }
            Expression::Call { callee, args } => self.eval_call(callee, args, env),
        }
    }

    fn attribute_of(&self, value: &Value, name: &str) -> Result<Value, InterpreterError> {
        match value {
            Value::Instance(instance) => {
                if let Some(attribute) = instance.attributes.borrow().get(name) {
                    return Ok(attribute.clone());
                }
                if let Some(method) = instance.class.methods.get(name) {
                    return Ok(Value::Function(Rc::clone(method)));
                }
                Err(RuntimeError::UnknownAttribute {
                    attribute: name.to_string(),
                    type_name: instance.class.name.clone(),
                }
                .into())
            }
            Value::Module(module) => module.env.borrow().get(name).ok_or_else(|| {
                InterpreterError::from(RuntimeError::UnknownAttribute {
                    attribute: name.to_string(),
                    type_name: format!("module '{}'", module.name),
                })
            }),
            other => Err(RuntimeError::UnknownAttribute {
                attribute: name.to_string(),
                type_name: other.type_name().to_string(),
            }
            .into()),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expression,
        args: &[Expression],
        env: &Rc<RefCell<Environment>>,
    ) -> Result<Value, InterpreterError> {
        let (target, receiver) = self.resolve_callee(callee, env)?;
        let mut call_args = Vec::with_capacity(args.len() + usize::from(receiver.is_some()));
        if let Some(receiver) = receiver {
            call_args.push(receiver);
        }
        for arg in args {
            call_args.push(self.eval_expression(arg, env)?);
        }
        self.call_value(target, call_args)
    }

    /// A call through `obj.attr(...)` where `obj` evaluates to an instance
    /// and the attribute resolves to a function is a method call: the
    /// receiver is prepended to the arguments before arity checking.
    fn resolve_callee(
        &mut self,
        callee: &Expression,
        env: &Rc<RefCell<Environment>>,
    ) -> Result<(Value, Option<Value>), InterpreterError> {
        if let Expression::Attribute { object, name } = callee {
            let receiver = self.eval_expression(object, env)?;
            let target = self.attribute_of(&receiver, name)?;
            if matches!(&receiver, Value::Instance(_)) && matches!(&target, Value::Function(_)) {
                return Ok((target, Some(receiver)));
            }
            return Ok((target, Option::None));
        }
        Ok((self.eval_expression(callee, env)?, Option::None))
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<Value, InterpreterError> {
        if let Some(builtin) = builtins::as_sentinel(&callee) {
            return self.call_builtin(builtin, args);
        }
        match callee {
            Value::Function(function) => self.call_function(&function, args),
            Value::Class(class) => self.instantiate(class, args),
            other => Err(RuntimeError::NotCallable {
                type_name: other.type_name(),
            }
            .into()),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, InterpreterError> {
        if args.len() != function.params.len() {
            return Err(RuntimeError::ArityMismatch {
                expected: function.params.len(),
                found: args.len(),
            }
            .into());
        }

        // The call frame's parent is the closure, not the caller.
        let frame = Environment::child(&function.closure);
        for (param, value) in function.params.iter().zip(args) {
            frame.borrow_mut().define(param.clone(), value);
        }

        match self.exec_statements(&function.body.statements, &frame)? {
            ExecResult::Continue => Ok(Value::None),
            ExecResult::Return(value) => Ok(value),
        }
    }

    /// Calling a class allocates an instance and runs `__init__` (if the
    /// class has one) with the instance as leading argument, discarding its
    /// result.
    fn instantiate(
        &mut self,
        class: Rc<Class>,
        args: Vec<Value>,
    ) -> Result<Value, InterpreterError> {
        let instance = Rc::new(Instance {
            class: Rc::clone(&class),
            attributes: RefCell::new(HashMap::new()),
        });
        let value = Value::Instance(Rc::clone(&instance));

        if let Some(init) = class.methods.get("__init__") {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(value.clone());
            call_args.extend(args);
            self.call_function(init, call_args)?;
        } else if !args.is_empty() {
            return Err(RuntimeError::ArityMismatch {
                expected: 0,
                found: args.len(),
            }
            .into());
        }

        Ok(value)
    }

    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
    ) -> Result<Value, InterpreterError> {
        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(Value::to_output)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output.push(line);
                Ok(Value::None)
            }
            Builtin::Len => {
                if args.len() != 1 {
                    return Err(RuntimeError::ArityMismatch {
                        expected: 1,
                        found: args.len(),
                    }
                    .into());
                }
                let length = match &args[0] {
                    Value::Str(value) => value.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Dict(dict) => dict.borrow().len(),
                    other => {
                        return Err(RuntimeError::NoLength {
                            type_name: other.type_name(),
                        }
                        .into());
                    }
                };
                Ok(Value::Number(length as f64))
            }
            Builtin::Raise => {
                let mut args = args;
                let raised = match args.len() {
                    0 => RaisedException {
                        type_name: "Exception".to_string(),
                        value: Value::None,
                        message: String::new(),
                    },
                    1 => {
                        let value = args.pop().unwrap_or(Value::None);
                        RaisedException {
                            type_name: "Exception".to_string(),
                            message: value.to_output(),
                            value,
                        }
                    }
                    2 => {
                        let value = args.pop().unwrap_or(Value::None);
                        let type_name = match args.pop() {
                            Some(Value::Str(name)) => name,
                            _ => return Err(RuntimeError::RaiseTypeName.into()),
                        };
                        RaisedException {
                            type_name,
                            message: value.to_output(),
                            value,
                        }
                    }
                    found => return Err(RuntimeError::RaiseArity { found }.into()),
                };
                Err(InterpreterError::Raised(raised))
            }
        }
    }

    /// Load and execute a module, caching it by name. The cache is filled
    /// only after successful execution; a module importing itself while
    /// still executing is rejected instead of re-entered.
    fn load_module(&mut self, name: &str) -> Result<Rc<Module>, InterpreterError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Rc::clone(module));
        }
        if self.loading.contains(name) {
            return Err(RuntimeError::CyclicImport {
                name: name.to_string(),
            }
            .into());
        }

        // Literal `.py` suffix, resolved against the module root.
        let path = self.module_root.join(format!("{name}.py"));
        let source = fs::read_to_string(&path).map_err(|_| RuntimeError::ModuleNotFound {
            name: name.to_string(),
        })?;

        let parsed = parser::parse_tokens(lexer::tokenize(&source));
        for error in &parsed.errors {
            eprintln!("Parse error: {error}");
        }

        let module_env = Environment::child(&self.globals);
        self.loading.insert(name.to_string());
        let outcome = self.exec_statements(&parsed.program.statements, &module_env);
        self.loading.remove(name);
        if let ExecResult::Return(value) = outcome? {
            let rendered = value.to_output();
            self.output.push(format!("Top-level return: {rendered}"));
        }

        let module = Rc::new(Module {
            name: name.to_string(),
            path,
            env: module_env,
        });
        self.modules.insert(name.to_string(), Rc::clone(&module));
        Ok(module)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn eval_binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value, InterpreterError> {
    use BinaryOperator::*;

    let value = match op {
        Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
            (Value::List(a), Value::List(b)) => {
                // Fresh list: copy of the left plus the right's elements.
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Value::list(items)
            }
            _ => return Err(invalid_operands(op)),
        },
        Sub | Mul | Div | Mod | Pow => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(invalid_operands(op));
            };
            let (a, b) = (*a, *b);
            match op {
                Sub => Value::Number(a - b),
                Mul => Value::Number(a * b),
                Div => {
                    if b == 0.0 {
                        return Err(RuntimeError::DivisionByZero.into());
                    }
                    Value::Number(a / b)
                }
                Mod => {
                    if b == 0.0 {
                        return Err(RuntimeError::DivisionByZero.into());
                    }
                    Value::Number(a % b)
                }
                Pow => Value::Number(a.powf(b)),
                _ => unreachable!(),
            }
        }
        Less | LessEqual | Greater | GreaterEqual => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(invalid_operands(op));
            };
            let result = match op {
                Less => a < b,
                LessEqual => a <= b,
                Greater => a > b,
                GreaterEqual => a >= b,
                _ => unreachable!(),
            };
            Value::Bool(result)
        }
        Equal => Value::Bool(left.equals(&right)),
        NotEqual => Value::Bool(!left.equals(&right)),
        // Eager: both sides were already evaluated by the caller.
        And => Value::Bool(left.is_truthy() && right.is_truthy()),
        Or => Value::Bool(left.is_truthy() || right.is_truthy()),
    };
    Ok(value)
}

fn eval_unary(op: UnaryOperator, operand: Value) -> Result<Value, InterpreterError> {
    match op {
        UnaryOperator::Neg => match operand {
            Value::Number(value) => Ok(Value::Number(-value)),
            _ => Err(RuntimeError::InvalidUnaryOperand { op: op.symbol() }.into()),
        },
        UnaryOperator::Not => Ok(Value::Bool(!operand.is_truthy())),
    }
}

fn eval_index(object: Value, index: Value) -> Result<Value, InterpreterError> {
    match object {
        Value::List(items) => {
            let Value::Number(raw) = index else {
                return Err(RuntimeError::ListIndexType.into());
            };
            let items = items.borrow();
            // Truncate toward zero; negative indices count from the end.
            let mut position = raw as i64;
            if position < 0 {
                position += items.len() as i64;
            }
            if position < 0 || position >= items.len() as i64 {
                return Err(RuntimeError::ListIndexOutOfRange.into());
            }
            Ok(items[position as usize].clone())
        }
        Value::Dict(dict) => {
            let Value::Str(key) = index else {
                return Err(RuntimeError::DictKeyType.into());
            };
            let found = dict.borrow().get(&key);
            found.ok_or_else(|| InterpreterError::from(RuntimeError::KeyNotFound { key }))
        }
        other => Err(RuntimeError::NotSubscriptable {
            type_name: other.type_name(),
        }
        .into()),
    }
}

fn invalid_operands(op: BinaryOperator) -> InterpreterError {
    RuntimeError::InvalidBinaryOperands { op: op.symbol() }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn run_source(source: &str) -> String {
        let parsed = parser::parse_tokens(lexer::tokenize(source));
        assert!(
            parsed.errors.is_empty(),
            "unexpected parse errors: {:?}",
            parsed.errors
        );
        let mut interpreter = Interpreter::new();
        interpreter.interpret(&parsed.program).expect("run failed");
        interpreter.take_output()
    }

    fn run_source_err(source: &str) -> InterpreterError {
        let parsed = parser::parse_tokens(lexer::tokenize(source));
        assert!(
            parsed.errors.is_empty(),
            "unexpected parse errors: {:?}",
            parsed.errors
        );
        let mut interpreter = Interpreter::new();
        interpreter
            .interpret(&parsed.program)
            .expect_err("expected runtime failure")
    }

    fn runtime_error(source: &str) -> RuntimeError {
        match run_source_err(source) {
            InterpreterError::Runtime(error) => error,
            InterpreterError::Raised(raised) => panic!("expected host error, got raise {raised}"),
        }
    }

    #[test]
    fn evaluates_arithmetic_and_assignment() {
        let output = run_source(indoc! {"
            x = 10
            y = 20
            print(x + y)
        "});
        assert_eq!(output, "30");
    }

    #[test]
    fn applies_operator_precedence() {
        let output = run_source(indoc! {"
            print(1 + 2 * 3)
            print(10 % 3)
            print(2 ** 3 ** 2)
            print(7 / 2)
            print(-(1 + 2))
        "});
        assert_eq!(output, "7\n1\n512\n3.5\n-3");
    }

    #[test]
    fn closures_capture_their_defining_frame() {
        let output = run_source(indoc! {"
            def make_adder(n):
                def add(x):
                    return x + n
                return add
            add5 = make_adder(5)
            print(add5(3))
        "});
        assert_eq!(output, "8");
    }

    #[test]
    fn recursion_reaches_the_function_through_its_closure() {
        let output = run_source(indoc! {"
            def fib(n):
                if n <= 1:
                    return n
                return fib(n - 1) + fib(n - 2)
            print(fib(10))
        "});
        assert_eq!(output, "55");
    }

    #[test]
    fn class_with_init_and_method() {
        let output = run_source(indoc! {"
            class Point:
                def __init__(self, x, y):
                    self.x = x
                    self.y = y
                def sum(self):
                    return self.x + self.y
            p = Point(3, 4)
            print(p.sum())
        "});
        assert_eq!(output, "7");
    }

    #[test]
    fn methods_mutate_instance_state() {
        let output = run_source(indoc! {"
            class Counter:
                def __init__(self):
                    self.count = 0
                def bump(self):
                    self.count = self.count + 1
            c = Counter()
            c.bump()
            c.bump()
            print(c.count)
        "});
        assert_eq!(output, "2");
    }

    #[test]
    fn class_without_init_starts_with_no_attributes() {
        let output = run_source(indoc! {"
            class Empty:
                def describe(self):
                    return 'empty'
            e = Empty()
            e.tag = 'set later'
            print(e.describe(), e.tag)
        "});
        assert_eq!(output, "empty set later");

        let error = runtime_error(indoc! {"
            class Empty:
                def noop(self):
                    return None
            e = Empty()
            print(e.missing)
        "});
        assert_eq!(
            error,
            RuntimeError::UnknownAttribute {
                attribute: "missing".to_string(),
                type_name: "Empty".to_string(),
            }
        );
    }

    #[test]
    fn instance_display_uses_class_name() {
        let output = run_source(indoc! {"
            class Point:
                def noop(self):
                    return None
            p = Point()
            print(Point)
            print(p)
        "});
        assert_eq!(output, "<class 'Point'>\n<Point object>");
    }

    #[test]
    fn for_loop_sums_list_elements() {
        let output = run_source(indoc! {"
            total = 0
            for n in [1, 2, 3, 4]:
                total = total + n
            print(total)
        "});
        assert_eq!(output, "10");
    }

    #[test]
    fn for_loop_variable_persists_after_the_loop() {
        let output = run_source(indoc! {"
            for n in [1, 2, 3]:
                x = n
            print(n)
        "});
        assert_eq!(output, "3");
    }

    #[test]
    fn for_loop_over_dict_iterates_keys_in_insertion_order() {
        let output = run_source(indoc! {"
            d = {'b': 1, 'a': 2}
            for key in d:
                print(key, d[key])
        "});
        assert_eq!(output, "b 1\na 2");
    }

    #[test]
    fn return_unwinds_out_of_nested_loops() {
        let output = run_source(indoc! {"
            def find(items, wanted):
                for item in items:
                    while item == wanted:
                        return 'found'
                return 'missing'
            print(find([1, 2, 3], 2))
        "});
        assert_eq!(output, "found");
    }

    #[test]
    fn block_locals_do_not_leak_but_rebinding_reaches_outward() {
        let output = run_source(indoc! {"
            x = 0
            if True:
                x = 5
            print(x)
        "});
        assert_eq!(output, "5");

        let error = runtime_error(indoc! {"
            if True:
                y = 1
            print(y)
        "});
        assert_eq!(
            error,
            RuntimeError::UndefinedVariable {
                name: "y".to_string()
            }
        );
    }

    #[test]
    fn elif_chain_selects_the_matching_branch() {
        let output = run_source(indoc! {"
            def grade(n):
                if n >= 90:
                    return 'A'
                elif n >= 80:
                    return 'B'
                elif n >= 70:
                    return 'C'
                else:
                    return 'F'
            print(grade(95), grade(85), grade(75), grade(10))
        "});
        assert_eq!(output, "A B C F");
    }

    #[test]
    fn and_or_return_booleans_and_evaluate_both_sides() {
        let output = run_source(indoc! {"
            class Tracker:
                def __init__(self):
                    self.count = 0
            tracker = Tracker()
            def touch(value):
                tracker.count = tracker.count + 1
                return value
            print(touch(0) and touch(1))
            print(tracker.count)
            print(1 or 0)
            print(not '')
        "});
        // `and` yields a boolean, not an operand, and does not short-circuit.
        assert_eq!(output, "False\n2\nTrue\nTrue");
    }

    #[test]
    fn equality_is_structural_for_scalars_and_identity_for_containers() {
        let output = run_source(indoc! {"
            print(1 == 1.0, 'a' == 'a', None == None, 1 == '1')
            a = [1]
            b = [1]
            c = a
            print(a == b, a == c, a != b)
        "});
        assert_eq!(output, "True True True False\nFalse True True");
    }

    #[test]
    fn string_and_list_concatenation() {
        let output = run_source(indoc! {"
            print('foo' + 'bar')
            a = [1, 2]
            b = [3]
            c = a + b
            print(c)
            print(a)
        "});
        assert_eq!(output, "foobar\n[1, 2, 3]\n[1, 2]");
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let output = run_source(indoc! {"
            items = [10, 20, 30]
            print(items[-1], items[0], items[-3])
        "});
        assert_eq!(output, "30 10 10");

        assert_eq!(
            runtime_error("print([1, 2][-3])\n"),
            RuntimeError::ListIndexOutOfRange
        );
        assert_eq!(
            runtime_error("print([1, 2][2])\n"),
            RuntimeError::ListIndexOutOfRange
        );
    }

    #[test]
    fn index_type_errors() {
        assert_eq!(
            runtime_error("print([1]['a'])\n"),
            RuntimeError::ListIndexType
        );
        assert_eq!(
            runtime_error("print({'a': 1}[0])\n"),
            RuntimeError::DictKeyType
        );
        assert_eq!(
            runtime_error("print(1[0])\n"),
            RuntimeError::NotSubscriptable {
                type_name: "number"
            }
        );
    }

    #[test]
    fn dict_lookup_is_case_sensitive() {
        let output = run_source(indoc! {"
            d = {'Key': 1, 'key': 2}
            print(d['Key'], d['key'])
        "});
        assert_eq!(output, "1 2");

        assert_eq!(
            runtime_error("print({'a': 1}['A'])\n"),
            RuntimeError::KeyNotFound {
                key: "A".to_string()
            }
        );
    }

    #[test]
    fn duplicate_dict_literal_keys_keep_the_last_value() {
        let output = run_source("print({'a': 1, 'a': 2})\n");
        assert_eq!(output, "{'a': 2}");
    }

    #[test]
    fn len_counts_strings_lists_and_dicts() {
        let output = run_source(indoc! {"
            print(len('hello'), len([1, 2]), len({'a': 1}))
            print(len(''), len([]), len({}))
        "});
        assert_eq!(output, "5 2 1\n0 0 0");

        assert_eq!(
            runtime_error("len(42)\n"),
            RuntimeError::NoLength {
                type_name: "number"
            }
        );
        assert_eq!(
            runtime_error("len([1], [2])\n"),
            RuntimeError::ArityMismatch {
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn arity_is_checked_exactly() {
        assert_eq!(
            runtime_error(indoc! {"
                def f(a, b):
                    return a
                f(1)
            "}),
            RuntimeError::ArityMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn division_and_modulo_by_zero_are_host_errors() {
        assert_eq!(runtime_error("print(1 / 0)\n"), RuntimeError::DivisionByZero);
        assert_eq!(runtime_error("print(1 % 0)\n"), RuntimeError::DivisionByZero);
    }

    #[test]
    fn invalid_operand_errors_name_the_operator() {
        assert_eq!(
            runtime_error("print('a' + 1)\n"),
            RuntimeError::InvalidBinaryOperands { op: "+" }
        );
        assert_eq!(
            runtime_error("print('a' < 'b')\n"),
            RuntimeError::InvalidBinaryOperands { op: "<" }
        );
        assert_eq!(
            runtime_error("print(-'a')\n"),
            RuntimeError::InvalidUnaryOperand { op: "-" }
        );
    }

    #[test]
    fn calling_a_non_callable_is_a_host_error() {
        assert_eq!(
            runtime_error("x = 1\nx()\n"),
            RuntimeError::NotCallable {
                type_name: "number"
            }
        );
    }

    #[test]
    fn reading_an_unbound_name_is_a_host_error() {
        assert_eq!(
            runtime_error("print(missing)\n"),
            RuntimeError::UndefinedVariable {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn raise_with_type_is_caught_by_matching_clause() {
        let output = run_source(indoc! {"
            try:
                raise('MyErr', 'boom')
            except MyErr as e:
                print(e)
        "});
        assert_eq!(output, "boom");
    }

    #[test]
    fn except_clauses_match_in_order() {
        let output = run_source(indoc! {"
            try:
                raise('TypeErr', 'mismatch')
            except ValueErr:
                print('wrong clause')
            except TypeErr as error:
                print('caught', error)
            except:
                print('catch-all')
        "});
        assert_eq!(output, "caught mismatch");
    }

    #[test]
    fn bare_except_catches_any_raise() {
        let output = run_source(indoc! {"
            try:
                raise('anything at all')
            except:
                print('caught')
        "});
        assert_eq!(output, "caught");
    }

    #[test]
    fn unmatched_raise_propagates() {
        let error = run_source_err(indoc! {"
            try:
                raise('Inner', 'x')
            except Other:
                print('no')
        "});
        let InterpreterError::Raised(raised) = error else {
            panic!("expected raised exception");
        };
        assert_eq!(raised.type_name, "Inner");
        assert_eq!(raised.message, "x");
    }

    #[test]
    fn nested_try_can_reraise_to_the_outer_handler() {
        let output = run_source(indoc! {"
            try:
                try:
                    raise('InnerError', 'from inner')
                except InnerError:
                    print('inner caught')
                    raise('OuterError', 'escalated')
            except OuterError as e:
                print('outer caught', e)
        "});
        assert_eq!(output, "inner caught\nouter caught escalated");
    }

    #[test]
    fn host_errors_match_runtime_error_clauses() {
        let output = run_source(indoc! {"
            try:
                x = undefined_variable
            except RuntimeError as e:
                print('caught:', e)
        "});
        assert_eq!(output, "caught: Undefined variable 'undefined_variable'");

        let output = run_source(indoc! {"
            try:
                print(10 / 0)
            except:
                print('caught division')
        "});
        assert_eq!(output, "caught division");
    }

    #[test]
    fn host_errors_do_not_match_other_typed_clauses() {
        let error = run_source_err(indoc! {"
            try:
                print(1 / 0)
            except ValueErr:
                print('no')
        "});
        assert_eq!(
            error,
            InterpreterError::Runtime(RuntimeError::DivisionByZero)
        );
    }

    #[test]
    fn return_is_never_caught_by_except() {
        let output = run_source(indoc! {"
            def f():
                try:
                    return 1
                except:
                    return 2
            print(f())
        "});
        assert_eq!(output, "1");
    }

    #[test]
    fn raise_argument_forms() {
        let output = run_source(indoc! {"
            try:
                raise()
            except Exception as e:
                print('bare:', e)
            try:
                raise('only message')
            except Exception as e:
                print('one:', e)
        "});
        assert_eq!(output, "bare: None\none: only message");

        assert_eq!(
            runtime_error("raise(1, 'msg')\n"),
            RuntimeError::RaiseTypeName
        );
        assert_eq!(
            runtime_error("raise('a', 'b', 'c')\n"),
            RuntimeError::RaiseArity { found: 3 }
        );
    }

    #[test]
    fn exception_payload_keeps_its_value_kind() {
        let output = run_source(indoc! {"
            try:
                raise('Typed', [1, 2])
            except Typed as payload:
                print(len(payload))
        "});
        assert_eq!(output, "2");
    }

    #[test]
    fn top_level_return_is_reported_not_raised() {
        let parsed = parser::parse_tokens(lexer::tokenize("return 5\nprint('after')\n"));
        assert!(parsed.errors.is_empty());
        let mut interpreter = Interpreter::new();
        interpreter.interpret(&parsed.program).expect("run failed");
        // Evaluation stops at the escaping return.
        assert_eq!(interpreter.take_output(), "Top-level return: 5");
    }

    #[test]
    fn print_formats_mixed_arguments() {
        let output = run_source(indoc! {"
            def f():
                return None
            print(True, 'hello', f(), 1.0, 2.5)
        "});
        assert_eq!(output, "True hello None 1 2.5");
    }

    #[test]
    fn builtins_are_sentinel_strings_in_globals() {
        let output = run_source(indoc! {"
            p = print
            print(p)
        "});
        assert_eq!(output, "builtin:print");
    }

    #[test]
    fn builtins_can_be_shadowed_by_assignment() {
        assert_eq!(
            runtime_error("print = 1\nprint('x')\n"),
            RuntimeError::NotCallable {
                type_name: "number"
            }
        );
    }

    #[test]
    fn assignment_aliases_containers_instead_of_copying() {
        let output = run_source(indoc! {"
            a = [1, 2]
            b = a
            c = a + []
            print(b == a, c == a)
        "});
        assert_eq!(output, "True False");
    }

    #[test]
    fn while_loop_runs_until_condition_is_falsy() {
        let output = run_source(indoc! {"
            counter = 0
            while counter < 3:
                print('Counter:', counter)
                counter = counter + 1
        "});
        assert_eq!(output, "Counter: 0\nCounter: 1\nCounter: 2");
    }

    #[test]
    fn for_over_non_iterable_is_a_host_error() {
        assert_eq!(
            runtime_error("for x in 5:\n    print(x)\n"),
            RuntimeError::NotIterable {
                type_name: "number"
            }
        );
    }

    #[test]
    fn attribute_assignment_requires_an_instance() {
        assert_eq!(
            runtime_error("x = 1\nx.field = 2\n"),
            RuntimeError::InvalidAttributeTarget {
                attribute: "field".to_string(),
                type_name: "number"
            }
        );
    }

    mod modules {
        use super::*;
        use std::fs;
        use std::path::Path;

        fn write_module(dir: &Path, name: &str, source: &str) {
            fs::write(dir.join(format!("{name}.py")), source).expect("write module");
        }

        fn run_in(dir: &Path, source: &str) -> Result<String, InterpreterError> {
            let parsed = parser::parse_tokens(lexer::tokenize(source));
            assert!(
                parsed.errors.is_empty(),
                "unexpected parse errors: {:?}",
                parsed.errors
            );
            let mut interpreter = Interpreter::with_module_root(dir);
            interpreter.interpret(&parsed.program)?;
            Ok(interpreter.take_output())
        }

        #[test]
        fn from_import_binds_module_symbols() {
            let dir = tempfile::tempdir().expect("tempdir");
            write_module(
                dir.path(),
                "m",
                "def greet():\n    return 'hi'\n",
            );
            let output = run_in(dir.path(), "from m import greet\nprint(greet())\n")
                .expect("run failed");
            assert_eq!(output, "hi");
        }

        #[test]
        fn import_exposes_attributes_and_aliases() {
            let dir = tempfile::tempdir().expect("tempdir");
            write_module(
                dir.path(),
                "math_utils",
                indoc! {"
                    PI = 3.14
                    def add(a, b):
                        return a + b
                "},
            );
            let output = run_in(
                dir.path(),
                indoc! {"
                    import math_utils
                    import math_utils as mu
                    from math_utils import add as plus
                    print(math_utils.PI)
                    print(mu.add(5, 3))
                    print(plus(8, 2))
                    print(math_utils)
                "},
            )
            .expect("run failed");
            assert_eq!(output, "3.14\n8\n10\n<module 'math_utils'>");
        }

        #[test]
        fn importing_twice_returns_the_same_module_without_rerunning() {
            let dir = tempfile::tempdir().expect("tempdir");
            write_module(
                dir.path(),
                "noisy",
                "print('loading')\nvalue = 1\n",
            );
            let output = run_in(
                dir.path(),
                indoc! {"
                    import noisy
                    import noisy as again
                    print(noisy == again)
                "},
            )
            .expect("run failed");
            // One load, and both bindings are the identical module value.
            assert_eq!(output, "loading\nTrue");
        }

        #[test]
        fn missing_module_and_missing_symbol_are_host_errors() {
            let dir = tempfile::tempdir().expect("tempdir");
            write_module(dir.path(), "m", "x = 1\n");

            let error = run_in(dir.path(), "import absent\n").expect_err("expected failure");
            assert_eq!(
                error,
                InterpreterError::Runtime(RuntimeError::ModuleNotFound {
                    name: "absent".to_string()
                })
            );

            let error = run_in(dir.path(), "from m import missing\n").expect_err("expected failure");
            assert_eq!(
                error,
                InterpreterError::Runtime(RuntimeError::ImportSymbolMissing {
                    name: "missing".to_string(),
                    module: "m".to_string()
                })
            );
        }

        #[test]
        fn cyclic_imports_are_rejected() {
            let dir = tempfile::tempdir().expect("tempdir");
            write_module(dir.path(), "a", "import b\n");
            write_module(dir.path(), "b", "import a\n");

            let error = run_in(dir.path(), "import a\n").expect_err("expected failure");
            assert_eq!(
                error,
                InterpreterError::Runtime(RuntimeError::CyclicImport {
                    name: "a".to_string()
                })
            );
        }

        #[test]
        fn module_functions_keep_working_after_load() {
            let dir = tempfile::tempdir().expect("tempdir");
            write_module(
                dir.path(),
                "counting",
                indoc! {"
                    def make_counter():
                        def count(n):
                            return n + 1
                        return count
                "},
            );
            let output = run_in(
                dir.path(),
                indoc! {"
                    from counting import make_counter
                    step = make_counter()
                    print(step(41))
                "},
            )
            .expect("run failed");
            assert_eq!(output, "42");
        }
    }
}
