use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar},
    options::CompileOptions,
    span::Span,
};

/// Every rule reference, start rule and stream rule must resolve to a rule.
pub fn report_missing_rules(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    for handle in grammar.live_handles() {
        check_expr(grammar, grammar.rules[handle].expr)?;
    }
    for name in options.entry_rules() {
        grammar.expect_rule(name, Span::empty())?;
    }
    Ok(())
}

fn check_expr(grammar: &Grammar, expr: ExprHandle) -> Result<()> {
    if let ExprKind::RuleRef { name, .. } = grammar.kind(expr) {
        grammar.expect_rule(name, grammar.span_of(expr))?;
    }
    for child in grammar.children(expr) {
        check_expr(grammar, child)?;
    }
    Ok(())
}
