//! Runtime value universe and object model.
//!
//! Values travel as [`ObjectHolder`]s: nullable shared-ownership handles
//! over reference-counted cells. Classes, instances, scopes, the output
//! context, and the comparison semantics all live here; the AST nodes in
//! [`crate::ast`] drive them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use thiserror::Error;

use crate::ast::Statement;

const STR_METHOD: &str = "__str__";
const EQ_METHOD: &str = "__eq__";
const LT_METHOD: &str = "__lt__";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unknown variable {name}")]
    UnknownVariable { name: String },
    #[error("'{name}' is not a class instance")]
    NotAnInstance { name: String },
    #[error("Cannot assign field '{field}': receiver is not a class instance")]
    FieldOnNonInstance { field: String },
    #[error("Error call {method}.")]
    FailedCall { method: String },
    #[error("Addition is not implemented for these operands")]
    AdditionNotSupported,
    #[error("Subtraction is not implemented for these operands")]
    SubtractionNotSupported,
    #[error("Multiplication is not implemented for these operands")]
    MultiplicationNotSupported,
    #[error("Division is not implemented for these operands")]
    DivisionNotSupported,
    #[error("Cannot compare objects for equality")]
    EqualityNotSupported,
    #[error("Cannot compare objects for less")]
    OrderingNotSupported,
    #[error("'{operation}' is not implemented for these operands")]
    LogicalNotSupported { operation: &'static str },
    #[error("Method '{method}' must return True or False")]
    ComparisonNotBool { method: &'static str },
    #[error("return outside of a method body")]
    ReturnOutsideMethod,
    #[error("Failed to write to the output stream")]
    Output(#[from] fmt::Error),
}

/// Out-of-band outcome of evaluating a node: either a diagnostic or the
/// return signal. The two share one propagation channel but only a
/// method-body frame may catch `Return`; every other boundary collapses it
/// into [`RuntimeError::ReturnOutsideMethod`].
#[derive(Debug)]
pub enum Interrupt {
    Return(ObjectHolder),
    Error(RuntimeError),
}

impl Interrupt {
    /// Collapses the signal at a boundary that cannot catch returns.
    pub fn into_runtime_error(self) -> RuntimeError {
        match self {
            Interrupt::Error(error) => error,
            Interrupt::Return(_) => RuntimeError::ReturnOutsideMethod,
        }
    }
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Interrupt::Error(error)
    }
}

impl From<fmt::Error> for Interrupt {
    fn from(error: fmt::Error) -> Self {
        Interrupt::Error(RuntimeError::Output(error))
    }
}

pub type ExecResult = Result<ObjectHolder, Interrupt>;

/// Name scope: identifiers mapped to holders. Serves both as a method
/// invocation frame and as the field bag of a class instance.
pub type Closure = HashMap<String, ObjectHolder>;

/// Shared state threaded through every evaluation; carries the sink that
/// `print` and string conversion write to.
pub struct Context<'a> {
    output: &'a mut dyn fmt::Write,
}

impl<'a> Context<'a> {
    pub fn new(output: &'a mut dyn fmt::Write) -> Self {
        Self { output }
    }

    pub fn output(&mut self) -> &mut dyn fmt::Write {
        &mut *self.output
    }
}

/// The closed universe of runtime values.
pub enum Object {
    Number(i64),
    Bool(bool),
    String(String),
    Class(Class),
    Instance(ClassInstance),
}

/// A method bound to a class: the body sees `self` plus the formal
/// parameters and nothing else.
pub struct Method {
    pub name: String,
    pub formal_params: Vec<String>,
    pub body: Statement,
}

struct ClassData {
    name: String,
    methods: Vec<Method>,
    method_index: HashMap<String, usize>,
    parent: Option<Class>,
}

/// Class descriptor: name, method table, optional parent. Cheap to clone;
/// the method list is immutable after construction.
///
/// The parent edge is shared ownership rather than the borrowed pointer a
/// host with manual lifetimes would use: the edge is acyclic (parents never
/// reference their subclasses), so this cannot leak, and it makes
/// "parents outlive children" hold by construction.
#[derive(Clone)]
pub struct Class(Rc<ClassData>);

impl Class {
    pub fn new(name: String, methods: Vec<Method>, parent: Option<Class>) -> Self {
        let method_index = methods
            .iter()
            .enumerate()
            .map(|(index, method)| (method.name.clone(), index))
            .collect();
        Self(Rc::new(ClassData {
            name,
            methods,
            method_index,
            parent,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Resolves a method by name: own table first, then the parent chain.
    /// First match wins.
    pub fn method(&self, name: &str) -> Option<&Method> {
        match self.0.method_index.get(name) {
            Some(&index) => Some(&self.0.methods[index]),
            None => self.0.parent.as_ref().and_then(|parent| parent.method(name)),
        }
    }
}

/// A runtime object: a reference to its class plus its own field scope.
pub struct ClassInstance {
    class: Class,
    fields: Closure,
}

impl ClassInstance {
    pub fn new(class: Class) -> Self {
        Self {
            class,
            fields: Closure::new(),
        }
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn fields(&self) -> &Closure {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Closure {
        &mut self.fields
    }
}

#[derive(Clone)]
enum Handle {
    Owned(Rc<RefCell<Object>>),
    Shared(Weak<RefCell<Object>>),
}

/// Nullable shared-ownership handle over an [`Object`].
///
/// An owning holder keeps its cell alive together with all owning clones.
/// A shared holder is a non-owning alias (used to bind `self` during a
/// method call); the synthetic scope binding made for every new instance
/// keeps the cell alive during `__init__`. A shared holder can still
/// escape its owner through field assignments, so once every owning
/// holder is dropped the alias reads as the empty holder.
#[derive(Clone, Default)]
pub struct ObjectHolder(Option<Handle>);

impl ObjectHolder {
    /// Wraps a value in a freshly-allocated shared cell.
    pub fn own(object: Object) -> Self {
        Self(Some(Handle::Owned(Rc::new(RefCell::new(object)))))
    }

    /// The empty holder.
    pub fn none() -> Self {
        Self(None)
    }

    /// A non-owning alias of this holder.
    pub fn share(&self) -> Self {
        match &self.0 {
            Some(Handle::Owned(cell)) => Self(Some(Handle::Shared(Rc::downgrade(cell)))),
            Some(Handle::Shared(weak)) => Self(Some(Handle::Shared(weak.clone()))),
            None => Self(None),
        }
    }

    pub fn is_none(&self) -> bool {
        self.cell().is_none()
    }

    fn cell(&self) -> Option<Rc<RefCell<Object>>> {
        match &self.0 {
            Some(Handle::Owned(cell)) => Some(Rc::clone(cell)),
            Some(Handle::Shared(weak)) => weak.upgrade(),
            None => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        let Some(cell) = self.cell() else {
            return "None";
        };
        let name = match &*cell.borrow() {
            Object::Number(_) => "Number",
            Object::Bool(_) => "Bool",
            Object::String(_) => "String",
            Object::Class(_) => "Class",
            Object::Instance(_) => "ClassInstance",
        };
        name
    }

    pub fn as_number(&self) -> Option<i64> {
        self.cell().and_then(|cell| match &*cell.borrow() {
            Object::Number(value) => Some(*value),
            _ => None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.cell().and_then(|cell| match &*cell.borrow() {
            Object::Bool(value) => Some(*value),
            _ => None,
        })
    }

    pub fn as_string(&self) -> Option<String> {
        self.cell().and_then(|cell| match &*cell.borrow() {
            Object::String(value) => Some(value.clone()),
            _ => None,
        })
    }

    pub fn as_class(&self) -> Option<Class> {
        self.cell().and_then(|cell| match &*cell.borrow() {
            Object::Class(class) => Some(class.clone()),
            _ => None,
        })
    }

    /// Runs `f` against the instance behind this holder, if there is one.
    pub fn with_instance<R>(&self, f: impl FnOnce(&ClassInstance) -> R) -> Option<R> {
        self.cell().and_then(|cell| match &*cell.borrow() {
            Object::Instance(instance) => Some(f(instance)),
            _ => None,
        })
    }

    pub fn with_instance_mut<R>(&self, f: impl FnOnce(&mut ClassInstance) -> R) -> Option<R> {
        self.cell().and_then(|cell| match &mut *cell.borrow_mut() {
            Object::Instance(instance) => Some(f(instance)),
            _ => None,
        })
    }

    /// Whether this holder is an instance whose class resolves `method`
    /// with exactly `argument_count` formal parameters.
    pub fn has_method(&self, method: &str, argument_count: usize) -> bool {
        self.with_instance(|instance| {
            instance
                .class()
                .method(method)
                .is_some_and(|m| m.formal_params.len() == argument_count)
        })
        .unwrap_or(false)
    }

    /// Invokes `method` on this instance: resolves it through the class
    /// chain, checks arity, binds `self` as a non-owning alias plus the
    /// formals to the actuals in a fresh scope, and executes the body.
    pub fn call(
        &self,
        method: &str,
        actual_args: &[ObjectHolder],
        context: &mut Context<'_>,
    ) -> ExecResult {
        let class = self
            .with_instance(|instance| instance.class().clone())
            .ok_or_else(|| RuntimeError::FailedCall {
                method: method.to_string(),
            })?;
        let resolved = class
            .method(method)
            .filter(|m| m.formal_params.len() == actual_args.len())
            .ok_or_else(|| RuntimeError::FailedCall {
                method: method.to_string(),
            })?;

        let mut locals = Closure::new();
        locals.insert("self".to_string(), self.share());
        for (param, arg) in resolved.formal_params.iter().zip(actual_args) {
            locals.insert(param.clone(), arg.clone());
        }
        resolved.body.execute(&mut locals, context)
    }

    /// Renders this value into `out`. Instances with a zero-argument
    /// `__str__` print its result; other instances print their identity.
    pub fn print(&self, out: &mut dyn fmt::Write, context: &mut Context<'_>) -> Result<(), Interrupt> {
        if self.has_method(STR_METHOD, 0) {
            let rendered = self.call(STR_METHOD, &[], context)?;
            return rendered.print(out, context);
        }
        let Some(cell) = self.cell() else {
            write!(out, "None")?;
            return Ok(());
        };
        match &*cell.borrow() {
            Object::Number(value) => write!(out, "{value}")?,
            Object::Bool(value) => write!(out, "{}", if *value { "True" } else { "False" })?,
            Object::String(value) => write!(out, "{value}")?,
            Object::Class(class) => write!(out, "Class {}", class.name())?,
            Object::Instance(instance) => write!(
                out,
                "<{} object at {:p}>",
                instance.class().name(),
                Rc::as_ptr(&cell)
            )?,
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHolder({})", self.type_name())
    }
}

/// Truthiness: non-zero numbers, `True`, and non-empty strings are truthy.
/// The empty holder, classes, and class instances are always falsy.
pub fn is_true(object: &ObjectHolder) -> bool {
    let Some(cell) = object.cell() else {
        return false;
    };
    let truthy = match &*cell.borrow() {
        Object::Number(value) => *value != 0,
        Object::Bool(value) => *value,
        Object::String(value) => !value.is_empty(),
        Object::Class(_) | Object::Instance(_) => false,
    };
    truthy
}

pub fn equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut Context<'_>,
) -> Result<bool, Interrupt> {
    if let (Some(left), Some(right)) = (lhs.as_bool(), rhs.as_bool()) {
        return Ok(left == right);
    }
    if let (Some(left), Some(right)) = (lhs.as_number(), rhs.as_number()) {
        return Ok(left == right);
    }
    if let (Some(left), Some(right)) = (lhs.as_string(), rhs.as_string()) {
        return Ok(left == right);
    }
    if lhs.has_method(EQ_METHOD, 1) {
        let result = lhs.call(EQ_METHOD, std::slice::from_ref(rhs), context)?;
        return result
            .as_bool()
            .ok_or_else(|| RuntimeError::ComparisonNotBool { method: EQ_METHOD }.into());
    }
    if lhs.is_none() && rhs.is_none() {
        return Ok(true);
    }
    Err(RuntimeError::EqualityNotSupported.into())
}

pub fn less(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut Context<'_>,
) -> Result<bool, Interrupt> {
    if let (Some(left), Some(right)) = (lhs.as_bool(), rhs.as_bool()) {
        return Ok(!left && right);
    }
    if let (Some(left), Some(right)) = (lhs.as_number(), rhs.as_number()) {
        return Ok(left < right);
    }
    if let (Some(left), Some(right)) = (lhs.as_string(), rhs.as_string()) {
        return Ok(left < right);
    }
    if lhs.has_method(LT_METHOD, 1) {
        let result = lhs.call(LT_METHOD, std::slice::from_ref(rhs), context)?;
        return result
            .as_bool()
            .ok_or_else(|| RuntimeError::ComparisonNotBool { method: LT_METHOD }.into());
    }
    Err(RuntimeError::OrderingNotSupported.into())
}

pub fn not_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut Context<'_>,
) -> Result<bool, Interrupt> {
    Ok(!equal(lhs, rhs, context)?)
}

pub fn greater(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut Context<'_>,
) -> Result<bool, Interrupt> {
    Ok(!less(lhs, rhs, context)? && not_equal(lhs, rhs, context)?)
}

pub fn less_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut Context<'_>,
) -> Result<bool, Interrupt> {
    Ok(!greater(lhs, rhs, context)?)
}

pub fn greater_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut Context<'_>,
) -> Result<bool, Interrupt> {
    Ok(!less(lhs, rhs, context)?)
}

/// Comparison operation selected by the parser, dispatched over the value
/// universe at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Comparator {
    pub fn apply(
        self,
        lhs: &ObjectHolder,
        rhs: &ObjectHolder,
        context: &mut Context<'_>,
    ) -> Result<bool, Interrupt> {
        match self {
            Comparator::Equal => equal(lhs, rhs, context),
            Comparator::NotEqual => not_equal(lhs, rhs, context),
            Comparator::Less => less(lhs, rhs, context),
            Comparator::Greater => greater(lhs, rhs, context),
            Comparator::LessOrEqual => less_or_equal(lhs, rhs, context),
            Comparator::GreaterOrEqual => greater_or_equal(lhs, rhs, context),
        }
    }
}
