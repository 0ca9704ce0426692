//! Generation context passed from nodes to their children.

use std::collections::BTreeMap;

use crate::regalloc::Reg;

/// Whether failure information should be suppressed at this point: decided
/// at runtime by the rule's silence argument, or known at compile time.
/// Compile-time silence lets the fail call be omitted entirely.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Silence {
    /// Test the silence argument at runtime.
    Runtime,
    /// Known silent: inside a predicate, or a rule that never reports.
    Silent,
    /// Known loud: a start rule invocation.
    Loud,
}

/// One label binding: the expression (usually a register) holding the
/// value, and whether it is a live reference-parameter box.
#[derive(Clone, Debug)]
pub struct Binding {
    pub expr: String,
    pub is_ref: bool,
}

impl Binding {
    pub fn value(expr: String) -> Binding {
        Binding {
            expr,
            is_ref: false,
        }
    }
}

/// The label environment: user-visible labels mapped to the bindings
/// holding their values. Cloned on scope entry so sibling branches don't
/// leak bindings.
pub type LabelEnv = BTreeMap<String, Binding>;

#[derive(Clone)]
pub struct Context {
    /// Register the caller wants the result in; None lets the child
    /// allocate its own.
    pub result_reg: Option<Reg>,
    pub silence: Silence,
    /// The caller only needs success/failure, not the matched value.
    pub discard: bool,
}

impl Context {
    pub fn new(silence: Silence) -> Context {
        Context {
            result_reg: None,
            silence,
            discard: false,
        }
    }

    pub fn silenced(&self) -> Context {
        Context {
            silence: Silence::Silent,
            ..self.clone()
        }
    }

    pub fn with_result(&self, reg: Reg) -> Context {
        Context {
            result_reg: Some(reg),
            ..self.clone()
        }
    }

    /// Children allocate their own result register.
    pub fn without_result(&self) -> Context {
        Context {
            result_reg: None,
            ..self.clone()
        }
    }

    pub fn with_discard(&self, discard: bool) -> Context {
        Context {
            discard,
            ..self.clone()
        }
    }
}
