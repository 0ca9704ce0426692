use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar},
    options::CompileOptions,
};

/// Propagate the `pure` rule attribute onto action nodes. The generator may
/// skip re-running pure actions on cache replay.
pub fn mark_pure(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    for handle in grammar.live_handles() {
        let pure = grammar.rules[handle].attribute_bool("pure", options.optimize_pure_actions);
        mark_expr(grammar, grammar.rules[handle].expr, pure);
    }
    Ok(())
}

fn mark_expr(grammar: &mut Grammar, expr: ExprHandle, pure: bool) {
    if let ExprKind::Action { pure: slot, .. } = grammar.kind_mut(expr) {
        *slot = pure;
    }
    for child in grammar.children(expr) {
        mark_expr(grammar, child, pure);
    }
}
