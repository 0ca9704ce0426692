use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar},
    options::CompileOptions,
};

/// Removes proxy rules, i.e. rules that only delegate to another rule.
/// Every reference to the proxy is retargeted at the delegate; the proxy is
/// deleted unless it must stay addressable as a parse entry point.
pub fn remove_proxy_rules(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    for handle in grammar.live_handles() {
        let rule = &grammar.rules[handle];
        let target = match grammar.kind(rule.expr) {
            ExprKind::RuleRef { name, assignments } if assignments.is_empty() => name.clone(),
            _ => continue,
        };
        let from = rule.name.clone();
        log::debug!("removing proxy rule {from} -> {target}");

        replace_rule_refs(grammar, &from, &target);
        if !options.entry_rules().any(|entry| entry == from) {
            grammar.remove_rule(handle);
        }
    }
    Ok(())
}

fn replace_rule_refs(grammar: &mut Grammar, from: &str, to: &str) {
    for handle in grammar.live_handles() {
        rename_in_expr(grammar, grammar.rules[handle].expr, from, to);
    }
}

fn rename_in_expr(grammar: &mut Grammar, expr: ExprHandle, from: &str, to: &str) {
    if let ExprKind::RuleRef { name, .. } = grammar.kind_mut(expr) {
        if name == from {
            *name = to.to_owned();
        }
    }
    for child in grammar.children(expr) {
        rename_in_expr(grammar, child, from, to);
    }
}
