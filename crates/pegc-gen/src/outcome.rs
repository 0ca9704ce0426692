//! The generator's unit of code synthesis.
//!
//! An [`Outcome`] describes the code for one AST node: a block executed
//! unconditionally, a condition describing the match outcome, statement
//! lists for the success and failure branches, an epilogue, and the
//! expression which denotes the match result. Outcomes are created fresh
//! per node during generation and consumed immediately by the parent node.
//!
//! ```text
//! block
//! if (condition) {
//!   success
//! } else {
//!   failure
//! }
//! epilogue
//! -> expression
//! ```
//!
//! The expression may be reordered with other expressions, so it must not
//! have side effects or depend on the current position. If no explicit
//! condition is set, the expression is compared against the FAILED
//! sentinel. Handlers must keep the result register valid on both the
//! success and the failure path, so the caller may append to either block;
//! the epilogue must never touch the result register.

use crate::regalloc::Reg;
use crate::target::Target;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Cond {
    /// Compare the expression against the FAILED sentinel.
    Default,
    /// Statically known to succeed.
    Always,
    /// Statically known to fail.
    Never,
    /// An explicit boolean test.
    Test(String),
}

pub struct Outcome {
    pub block: Vec<String>,
    pub condition: Cond,
    pub expression: String,
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub epilogue: Vec<String>,
    /// Registers the expression may still depend on, released by whoever
    /// consumes the expression for the last time.
    pub free: Vec<Reg>,
}

fn indent(lines: &[String], out: &mut Vec<String>) {
    for line in lines {
        for part in line.split('\n') {
            if part.is_empty() {
                out.push(String::new());
            } else {
                out.push(format!("  {part}"));
            }
        }
    }
}

impl Outcome {
    pub fn new() -> Outcome {
        Outcome {
            block: Vec::new(),
            condition: Cond::Default,
            expression: String::new(),
            success: Vec::new(),
            failure: Vec::new(),
            epilogue: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn on_success<I: IntoIterator<Item = String>>(&mut self, lines: I) -> &mut Self {
        self.success.extend(lines);
        self
    }

    pub fn on_failure<I: IntoIterator<Item = String>>(&mut self, lines: I) -> &mut Self {
        self.failure.extend(lines);
        self
    }

    /// Fold the conditional parts into the main block, leaving only the
    /// block and expression. Safe to call repeatedly.
    pub fn resolve(&mut self, target: &dyn Target) -> &[String] {
        let success = std::mem::take(&mut self.success);
        let failure = std::mem::take(&mut self.failure);
        let condition = std::mem::replace(&mut self.condition, Cond::Default);

        match condition {
            Cond::Always => self.block.extend(success),
            Cond::Never => self.block.extend(failure),
            _ if !success.is_empty() => {
                let test = match &condition {
                    Cond::Test(test) => test.clone(),
                    _ => target.not_failed(&self.expression),
                };
                self.block.push(format!("if ({test}) {{"));
                indent(&success, &mut self.block);
                if !failure.is_empty() {
                    self.block.push("} else {".to_owned());
                    indent(&failure, &mut self.block);
                }
                self.block.push("}".to_owned());
            }
            _ if !failure.is_empty() => {
                let test = match &condition {
                    Cond::Test(test) => format!("!({test})"),
                    _ => target.is_failed(&self.expression),
                };
                self.block.push(format!("if ({test}) {{"));
                indent(&failure, &mut self.block);
                self.block.push("}".to_owned());
            }
            _ => {}
        }
        self.block.append(&mut self.epilogue);
        &self.block
    }

    /// Chain another outcome after this one: the other block uses this
    /// expression if it needs it, and its conditional part becomes ours.
    pub fn append(&mut self, mut other: Outcome, target: &dyn Target) {
        self.free.append(&mut other.free);
        self.expression = other.expression;
        self.resolve(target);
        self.block.append(&mut other.block);
        self.condition = other.condition;
        self.success = other.success;
        self.failure = other.failure;
        self.epilogue = other.epilogue;
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome::new()
    }
}
