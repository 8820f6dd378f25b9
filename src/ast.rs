//! Evaluable syntax-tree nodes.
//!
//! Every node executes against a scope and a context and produces a
//! holder. Statement nodes return the empty holder; expression nodes
//! return their value. `Return` raises the return signal, which travels
//! through the shared error channel until the nearest `MethodBody` frame
//! catches it.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::runtime::{
    is_true, Class, ClassInstance, Closure, Comparator, Context, ExecResult, Interrupt, Object,
    ObjectHolder, RuntimeError,
};

const ADD_METHOD: &str = "__add__";
const INIT_METHOD: &str = "__init__";

pub enum Statement {
    /// Literal value built by the parser: numbers, strings, booleans, and
    /// the `None` literal (an empty holder).
    Constant {
        value: ObjectHolder,
    },
    Assignment {
        name: String,
        value: Box<Statement>,
    },
    /// Variable read, possibly through a dotted chain of instance fields
    /// (`a.b.c`). A single id reads the scope directly.
    VariableValue {
        dotted_ids: Vec<String>,
    },
    FieldAssignment {
        object: Box<Statement>,
        field: String,
        value: Box<Statement>,
    },
    Print {
        args: Vec<Statement>,
    },
    MethodCall {
        object: Box<Statement>,
        method: String,
        args: Vec<Statement>,
    },
    NewInstance {
        class: Class,
        args: Vec<Statement>,
    },
    /// The `str(x)` form: renders the value and wraps the text.
    Stringify {
        arg: Box<Statement>,
    },
    Add {
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Sub {
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Mult {
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Div {
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Or {
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    And {
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Not {
        arg: Box<Statement>,
    },
    Comparison {
        comparator: Comparator,
        lhs: Box<Statement>,
        rhs: Box<Statement>,
    },
    Compound {
        statements: Vec<Statement>,
    },
    /// Frame around a method's statements; the only place the return
    /// signal is caught.
    MethodBody {
        body: Box<Statement>,
    },
    Return {
        value: Box<Statement>,
    },
    ClassDefinition {
        class: Class,
    },
    IfElse {
        condition: Box<Statement>,
        then_body: Box<Statement>,
        else_body: Option<Box<Statement>>,
    },
}

fn next_instance_id() -> usize {
    static NEXT_INSTANCE_ID: AtomicUsize = AtomicUsize::new(0);
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

impl Statement {
    pub fn execute(&self, closure: &mut Closure, context: &mut Context<'_>) -> ExecResult {
        match self {
            Statement::Constant { value } => Ok(value.clone()),

            Statement::Assignment { name, value } => {
                let value = value.execute(closure, context)?;
                closure.insert(name.clone(), value.clone());
                Ok(value)
            }

            Statement::VariableValue { dotted_ids } => {
                let Some((first, rest)) = dotted_ids.split_first() else {
                    return Err(RuntimeError::UnknownVariable {
                        name: String::new(),
                    }
                    .into());
                };
                let mut value =
                    closure
                        .get(first)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UnknownVariable {
                            name: first.clone(),
                        })?;
                let mut owner = first;
                for id in rest {
                    value = value
                        .with_instance(|instance| instance.fields().get(id).cloned())
                        .ok_or_else(|| RuntimeError::NotAnInstance {
                            name: owner.clone(),
                        })?
                        .ok_or_else(|| RuntimeError::UnknownVariable { name: id.clone() })?;
                    owner = id;
                }
                Ok(value)
            }

            Statement::FieldAssignment {
                object,
                field,
                value,
            } => {
                let object = object.execute(closure, context)?;
                let value = value.execute(closure, context)?;
                object
                    .with_instance_mut(|instance| {
                        instance.fields_mut().insert(field.clone(), value.clone());
                    })
                    .ok_or_else(|| RuntimeError::FieldOnNonInstance {
                        field: field.clone(),
                    })?;
                Ok(value)
            }

            Statement::Print { args } => {
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        write!(context.output(), " ")?;
                    }
                    let value = arg.execute(closure, context)?;
                    let mut rendered = String::new();
                    value.print(&mut rendered, context)?;
                    context.output().write_str(&rendered)?;
                }
                writeln!(context.output())?;
                Ok(ObjectHolder::none())
            }

            Statement::MethodCall {
                object,
                method,
                args,
            } => {
                let object = object.execute(closure, context)?;
                if !object.has_method(method, args.len()) {
                    // Missing methods and non-instance receivers yield None
                    // instead of failing.
                    return Ok(ObjectHolder::none());
                }
                let mut actual_args = Vec::with_capacity(args.len());
                for arg in args {
                    actual_args.push(arg.execute(closure, context)?);
                }
                object.call(method, &actual_args, context)
            }

            Statement::NewInstance { class, args } => {
                // The instance is bound under a synthetic key first so the
                // scope co-owns it while `self` is borrowed inside
                // `__init__`. Digits-first keys cannot collide with user
                // identifiers.
                let key = format!("{}_{}", next_instance_id(), class.name());
                let instance =
                    ObjectHolder::own(Object::Instance(ClassInstance::new(class.clone())));
                closure.insert(key, instance.clone());
                if instance.has_method(INIT_METHOD, args.len()) {
                    let mut actual_args = Vec::with_capacity(args.len());
                    for arg in args {
                        actual_args.push(arg.execute(closure, context)?);
                    }
                    instance.call(INIT_METHOD, &actual_args, context)?;
                }
                Ok(instance)
            }

            Statement::Stringify { arg } => {
                let value = arg.execute(closure, context)?;
                let mut rendered = String::new();
                value.print(&mut rendered, context)?;
                Ok(ObjectHolder::own(Object::String(rendered)))
            }

            Statement::Add { lhs, rhs } => {
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                if let (Some(left), Some(right)) = (lhs.as_string(), rhs.as_string()) {
                    return Ok(ObjectHolder::own(Object::String(left + &right)));
                }
                if let (Some(left), Some(right)) = (lhs.as_number(), rhs.as_number()) {
                    return Ok(ObjectHolder::own(Object::Number(left + right)));
                }
                if lhs.has_method(ADD_METHOD, 1) {
                    return lhs.call(ADD_METHOD, std::slice::from_ref(&rhs), context);
                }
                Err(RuntimeError::AdditionNotSupported.into())
            }

            Statement::Sub { lhs, rhs } => {
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                match (lhs.as_number(), rhs.as_number()) {
                    (Some(left), Some(right)) => Ok(ObjectHolder::own(Object::Number(left - right))),
                    _ => Err(RuntimeError::SubtractionNotSupported.into()),
                }
            }

            Statement::Mult { lhs, rhs } => {
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                match (lhs.as_number(), rhs.as_number()) {
                    (Some(left), Some(right)) => Ok(ObjectHolder::own(Object::Number(left * right))),
                    _ => Err(RuntimeError::MultiplicationNotSupported.into()),
                }
            }

            Statement::Div { lhs, rhs } => {
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                match (lhs.as_number(), rhs.as_number()) {
                    (Some(left), Some(right)) if right != 0 => {
                        Ok(ObjectHolder::own(Object::Number(left / right)))
                    }
                    _ => Err(RuntimeError::DivisionNotSupported.into()),
                }
            }

            Statement::Or { lhs, rhs } => {
                // Both sides evaluate; there is no short-circuit.
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                if lhs.is_none() || rhs.is_none() {
                    return Err(RuntimeError::LogicalNotSupported { operation: "Or" }.into());
                }
                Ok(ObjectHolder::own(Object::Bool(
                    is_true(&lhs) || is_true(&rhs),
                )))
            }

            Statement::And { lhs, rhs } => {
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                if lhs.is_none() || rhs.is_none() {
                    return Err(RuntimeError::LogicalNotSupported { operation: "And" }.into());
                }
                Ok(ObjectHolder::own(Object::Bool(
                    is_true(&lhs) && is_true(&rhs),
                )))
            }

            Statement::Not { arg } => {
                let value = arg.execute(closure, context)?;
                if value.is_none() {
                    return Err(RuntimeError::LogicalNotSupported { operation: "Not" }.into());
                }
                Ok(ObjectHolder::own(Object::Bool(!is_true(&value))))
            }

            Statement::Comparison {
                comparator,
                lhs,
                rhs,
            } => {
                let lhs = lhs.execute(closure, context)?;
                let rhs = rhs.execute(closure, context)?;
                Ok(ObjectHolder::own(Object::Bool(
                    comparator.apply(&lhs, &rhs, context)?,
                )))
            }

            Statement::Compound { statements } => {
                for statement in statements {
                    statement.execute(closure, context)?;
                }
                Ok(ObjectHolder::none())
            }

            Statement::MethodBody { body } => match body.execute(closure, context) {
                Ok(_) => Ok(ObjectHolder::none()),
                Err(Interrupt::Return(value)) => Ok(value),
                Err(error) => Err(error),
            },

            Statement::Return { value } => {
                Err(Interrupt::Return(value.execute(closure, context)?))
            }

            Statement::ClassDefinition { class } => {
                let holder = ObjectHolder::own(Object::Class(class.clone()));
                closure.insert(class.name().to_string(), holder.clone());
                Ok(holder)
            }

            Statement::IfElse {
                condition,
                then_body,
                else_body,
            } => {
                let condition = condition.execute(closure, context)?;
                if is_true(&condition) {
                    then_body.execute(closure, context)
                } else if let Some(else_body) = else_body {
                    else_body.execute(closure, context)
                } else {
                    Ok(ObjectHolder::none())
                }
            }
        }
    }
}
