//! Tree-walking evaluator.
//!
//! Every expression node costs one step of fuel; host functions charge extra
//! for the elements they touch. The deadline is checked every
//! [`DEADLINE_CHECK_INTERVAL`] steps.

use super::ast::{ArrowBody, BinaryOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use super::value::{Closure, Namespace, Object, Value};
use super::{EvalError, Limits};
use std::rc::Rc;
use std::time::Instant;

const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Bytes of string data one step of fuel pays for.
pub const STRING_BYTES_PER_STEP: u64 = 64;

/// Variable bindings. Globals are shared; locals are copied into closures.
#[derive(Clone)]
pub struct Scope {
    globals: Rc<Vec<(&'static str, Value)>>,
    locals: Vec<(Rc<str>, Value)>,
}

impl Scope {
    /// Root scope holding `data`, `table`, and the utility namespaces.
    pub fn root(data: Value) -> Self {
        let globals = vec![
            ("data", data),
            ("table", Value::Namespace(Namespace::Table)),
            ("Math", Value::Namespace(Namespace::Math)),
            ("Date", Value::Namespace(Namespace::Date)),
            ("JSON", Value::Namespace(Namespace::Json)),
            ("Object", Value::Namespace(Namespace::Object)),
            ("Number", Value::Builtin(Rc::from("Number"))),
            ("String", Value::Builtin(Rc::from("String"))),
            ("Boolean", Value::Builtin(Rc::from("Boolean"))),
            ("isNaN", Value::Builtin(Rc::from("isNaN"))),
            ("parseInt", Value::Builtin(Rc::from("parseInt"))),
            ("parseFloat", Value::Builtin(Rc::from("parseFloat"))),
            ("NaN", Value::Number(f64::NAN)),
            ("Infinity", Value::Number(f64::INFINITY)),
        ];
        Self {
            globals: Rc::new(globals),
            locals: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
            .map(|(_, v)| v)
            .or_else(|| self.globals.iter().find(|(n, _)| *n == name).map(|(_, v)| v))
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.locals.push((Rc::from(name), value));
    }
}

enum Flow {
    Normal(Option<Value>),
    Return(Value),
}

pub struct Interpreter {
    steps: u64,
    max_steps: u64,
    deadline: Instant,
    limits: Limits,
}

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        Self {
            steps: 0,
            max_steps: limits.max_steps,
            deadline: Instant::now() + limits.timeout,
            limits,
        }
    }

    /// Steps consumed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Consumes `n` steps of fuel.
    pub fn charge(&mut self, n: u64) -> Result<(), EvalError> {
        let before = self.steps;
        self.steps = self.steps.saturating_add(n);
        if self.steps > self.max_steps {
            return Err(EvalError::StepBudget(self.max_steps));
        }
        if before / DEADLINE_CHECK_INTERVAL != self.steps / DEADLINE_CHECK_INTERVAL
            && Instant::now() >= self.deadline
        {
            return Err(EvalError::Timeout(self.limits.timeout));
        }
        Ok(())
    }

    /// Fails when a string of `len` bytes would pass `max_string_len`.
    pub fn check_string_len(&self, len: usize) -> Result<(), EvalError> {
        if len > self.limits.max_string_len {
            return Err(EvalError::StringLength(self.limits.max_string_len));
        }
        Ok(())
    }

    /// Pays for a string of `len` bytes before it is built.
    pub fn reserve_string(&mut self, len: usize) -> Result<(), EvalError> {
        self.check_string_len(len)?;
        self.charge(len as u64 / STRING_BYTES_PER_STEP)
    }

    /// `String(value)`, bounded like every other string the program builds.
    pub fn display(&mut self, value: &Value) -> Result<Rc<str>, EvalError> {
        if let Value::Str(s) = value {
            return Ok(s.clone());
        }
        let len = value
            .display_len(self.limits.max_string_len)
            .ok_or(EvalError::StringLength(self.limits.max_string_len))?;
        self.reserve_string(len)?;
        Ok(Rc::from(value.to_display()))
    }

    fn concat(&mut self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        let left = self.display(left)?;
        let right = self.display(right)?;
        self.reserve_string(left.len() + right.len())?;
        let mut out = String::with_capacity(left.len() + right.len());
        out.push_str(&left);
        out.push_str(&right);
        Ok(Value::str(&out))
    }

    /// Runs a program; its value is the first `return` or the last
    /// expression statement.
    pub fn run(&mut self, program: &Program, scope: Scope) -> Result<Value, EvalError> {
        let mut scope = scope;
        match self.exec_block(&program.body, &mut scope)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal(last) => Ok(last.unwrap_or(Value::Undefined)),
        }
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &mut Scope) -> Result<Flow, EvalError> {
        let mut last = None;
        for stmt in body {
            self.charge(1)?;
            match stmt {
                Stmt::Let { name, value } => {
                    let value = self.eval(value, scope)?;
                    scope.bind(name, value);
                    last = None;
                }
                Stmt::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    return Ok(Flow::Return(value));
                }
                Stmt::Expr(expr) => last = Some(self.eval(expr, scope)?),
                Stmt::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    let branch = if self.eval(test, scope)?.truthy() {
                        consequent
                    } else {
                        alternate
                    };
                    let depth = scope.locals.len();
                    let flow = self.exec_block(branch, scope)?;
                    scope.locals.truncate(depth);
                    match flow {
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(value) => last = value,
                    }
                }
            }
        }
        Ok(Flow::Normal(last))
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        self.charge(1)?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::runtime(format!("ReferenceError: {name} is not defined"))),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::array(values))
            }
            Expr::Object(entries) => {
                let mut object = Object::new();
                for (key, value) in entries {
                    let value = self.eval(value, scope)?;
                    object.insert(key.clone(), value);
                }
                Ok(Value::object(object))
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.property(&target, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let index = self.eval(index, scope)?;
                self.index(&target, &index)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, scope),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::str(value.type_of()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                match (op, &left, &right) {
                    (BinaryOp::Add, Value::Str(_) | Value::Array(_) | Value::Object(_), _)
                    | (BinaryOp::Add, _, Value::Str(_) | Value::Array(_) | Value::Object(_)) => {
                        self.concat(&left, &right)
                    }
                    _ => Ok(binary(*op, &left, &right)),
                }
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Arrow(arrow) => Ok(Value::Closure(Rc::new(Closure {
                arrow: arrow.clone(),
                captured: scope.clone(),
            }))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: &Scope) -> Result<Value, EvalError> {
        if let Expr::Member {
            object,
            property,
            optional,
        } = callee
        {
            let target = self.eval(object, scope)?;
            if *optional && target.is_nullish() {
                return Ok(Value::Undefined);
            }
            let args = self.eval_args(args, scope)?;
            return self.call_method(&target, property, args);
        }

        let function = self.eval(callee, scope)?;
        let args = self.eval_args(args, scope)?;
        self.call_value(&function, args)
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Scope) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|arg| self.eval(arg, scope)).collect()
    }

    /// Calls a function value with positional arguments.
    pub fn call_value(&mut self, function: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        match function {
            Value::Closure(closure) => self.call_closure(closure, args),
            Value::Builtin(name) => self.call_builtin(name, args),
            other => Err(EvalError::type_error(format!(
                "{} is not a function",
                other.to_display()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut scope = closure.captured.clone();
        let mut args = args.into_iter();
        for param in &closure.arrow.params {
            scope.bind(param, args.next().unwrap_or(Value::Undefined));
        }
        match &closure.arrow.body {
            ArrowBody::Expr(expr) => self.eval(expr, &scope),
            ArrowBody::Block(body) => match self.exec_block(body, &mut scope)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal(_) => Ok(Value::Undefined),
            },
        }
    }

    /// Property read (`a.b`) on any value.
    pub fn property(&mut self, target: &Value, name: &str) -> Result<Value, EvalError> {
        match target {
            Value::Undefined | Value::Null => Err(EvalError::type_error(format!(
                "Cannot read properties of {} (reading '{name}')",
                target.to_display()
            ))),
            Value::Object(object) => Ok(object.get(name).cloned().unwrap_or(Value::Undefined)),
            Value::Array(items) if name == "length" => Ok(Value::Number(items.len() as f64)),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Namespace(ns) => Ok(self.namespace_member(*ns, name)),
            Value::Frame(frame) => Ok(match name {
                "shape" => Value::array(vec![
                    Value::Number(frame.rows.len() as f64),
                    Value::Number(frame.columns.len() as f64),
                ]),
                "columns" => Value::array(frame.columns.iter().map(|c| Value::str(c)).collect()),
                "length" => Value::Number(frame.rows.len() as f64),
                _ => Value::Undefined,
            }),
            Value::Grouped(grouped) if name == "length" => {
                Ok(Value::Number(grouped.groups.len() as f64))
            }
            _ => Ok(Value::Undefined),
        }
    }

    /// Computed read (`a[i]`).
    pub fn index(&mut self, target: &Value, index: &Value) -> Result<Value, EvalError> {
        match (target, index) {
            (Value::Array(items), Value::Number(n)) => Ok(position(*n, items.len())
                .map(|i| items[i].clone())
                .unwrap_or(Value::Undefined)),
            (Value::Str(s), Value::Number(n)) => Ok(position(*n, usize::MAX)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(&c.to_string()))
                .unwrap_or(Value::Undefined)),
            (Value::Frame(frame), Value::Number(n)) => Ok(position(*n, frame.rows.len())
                .map(|i| frame.rows[i].clone())
                .unwrap_or(Value::Undefined)),
            (_, key) => self.property(target, &key.to_display()),
        }
    }
}

fn position(n: f64, len: usize) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && n < len as f64).then_some(n as usize)
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => Value::Number(left.to_number() + right.to_number()),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            Value::Bool(compare(op, left, right))
        }
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::LtEq => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}
