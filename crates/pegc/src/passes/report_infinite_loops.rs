use crate::{
    error::{GrammarError, Result},
    grammar::{matches_empty, ExprHandle, ExprKind, Grammar, NullableMemo},
    options::CompileOptions,
};

/// A repetition whose body can match the empty string never advances, so
/// the generated loop would spin forever. The compile driver drops this
/// pass entirely when `allow_loops` is set.
pub fn report_infinite_loops(grammar: &mut Grammar, _options: &CompileOptions) -> Result<()> {
    let mut memo = NullableMemo::new();
    for handle in grammar.live_handles() {
        check_expr(grammar, grammar.rules[handle].expr, &mut memo)?;
    }
    Ok(())
}

fn check_expr(grammar: &Grammar, expr: ExprHandle, memo: &mut NullableMemo) -> Result<()> {
    if let ExprKind::ZeroOrMore { expr: body } | ExprKind::OneOrMore { expr: body } =
        grammar.kind(expr)
    {
        if matches_empty(grammar, *body, memo) {
            return Err(GrammarError::new(
                "Infinite loop detected",
                grammar.span_of(expr),
            ));
        }
    }
    for child in grammar.children(expr) {
        check_expr(grammar, child, memo)?;
    }
    Ok(())
}
