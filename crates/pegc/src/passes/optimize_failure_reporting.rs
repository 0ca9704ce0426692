use std::collections::VecDeque;

use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar, RuleHandle},
    options::CompileOptions,
};

/// Find rules that never report failures and silence them.
///
/// 1. A start or stream rule always reports failure.
/// 2. A non-entry rule does not report failure if every caller is either
///    a) a named rule, which reports its own failure and suppresses its
///       children's,
///    b) inside an assertion, whose failure is never a parse error, or
///    c) transitively a rule which does not report failure.
///
/// Rules marked non-reporting are generated without a silence argument and
/// without any fail calls.
pub fn optimize_failure_reporting(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    for handle in grammar.live_handles() {
        grammar.rules[handle].reports_failure = false;
    }

    let mut worklist: VecDeque<RuleHandle> = options
        .entry_rules()
        .filter_map(|name| grammar.find_rule(name))
        .collect();

    while let Some(handle) = worklist.pop_front() {
        if grammar.rules[handle].reports_failure {
            continue;
        }
        grammar.rules[handle].reports_failure = true;
        check(grammar, grammar.rules[handle].expr, &mut worklist);
    }
    Ok(())
}

fn check(grammar: &Grammar, expr: ExprHandle, worklist: &mut VecDeque<RuleHandle>) {
    match grammar.kind(expr) {
        // failure reporting is already disabled inside these boundaries
        ExprKind::Named { .. } | ExprKind::SimpleAnd { .. } | ExprKind::SimpleNot { .. } => {}
        ExprKind::RuleRef { name, .. } => {
            if let Some(rule) = grammar.find_rule(name) {
                if !grammar.rules[rule].reports_failure {
                    worklist.push_back(rule);
                }
            }
        }
        _ => {
            for child in grammar.children(expr) {
                check(grammar, child, worklist);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn options() -> CompileOptions {
        CompileOptions {
            allowed_start_rules: vec!["start".into()],
            ..Default::default()
        }
    }

    #[test]
    fn plain_callee_reports() {
        // start = inner; inner = "x"
        let mut g = Grammar::new();
        let r = g.node(ExprKind::rule_ref("inner"));
        g.add_rule("start", r, Span::empty()).unwrap();
        let x = g.node(ExprKind::literal("x"));
        let inner = g.add_rule("inner", x, Span::empty()).unwrap();

        optimize_failure_reporting(&mut g, &options()).unwrap();
        assert!(g.rules[inner].reports_failure);
    }

    #[test]
    fn named_rule_silences_its_children() {
        // start = name; name "pretty" = inner; inner = "x"
        let mut g = Grammar::new();
        let r = g.node(ExprKind::rule_ref("name"));
        g.add_rule("start", r, Span::empty()).unwrap();
        let inner_ref = g.node(ExprKind::rule_ref("inner"));
        let named = g.node(ExprKind::Named {
            name: "pretty".into(),
            expr: inner_ref,
        });
        let name = g.add_rule("name", named, Span::empty()).unwrap();
        let x = g.node(ExprKind::literal("x"));
        let inner = g.add_rule("inner", x, Span::empty()).unwrap();

        optimize_failure_reporting(&mut g, &options()).unwrap();
        assert!(g.rules[name].reports_failure);
        assert!(!g.rules[inner].reports_failure);
    }

    #[test]
    fn assertions_silence_their_subtree() {
        // start = &inner "x"; inner = "y"
        let mut g = Grammar::new();
        let inner_ref = g.node(ExprKind::rule_ref("inner"));
        let guard = g.node(ExprKind::simple_and(inner_ref));
        let x = g.node(ExprKind::literal("x"));
        let seq = g.node(ExprKind::sequence(vec![guard, x]));
        g.add_rule("start", seq, Span::empty()).unwrap();
        let y = g.node(ExprKind::literal("y"));
        let inner = g.add_rule("inner", y, Span::empty()).unwrap();

        optimize_failure_reporting(&mut g, &options()).unwrap();
        assert!(!g.rules[inner].reports_failure);
    }

    #[test]
    fn reachable_through_both_paths_still_reports() {
        // start = &inner "x" inner — silenced in the guard but loud in the
        // sequence body
        let mut g = Grammar::new();
        let inner_ref = g.node(ExprKind::rule_ref("inner"));
        let guard = g.node(ExprKind::simple_and(inner_ref));
        let x = g.node(ExprKind::literal("x"));
        let loud_ref = g.node(ExprKind::rule_ref("inner"));
        let seq = g.node(ExprKind::sequence(vec![guard, x, loud_ref]));
        g.add_rule("start", seq, Span::empty()).unwrap();
        let y = g.node(ExprKind::literal("y"));
        let inner = g.add_rule("inner", y, Span::empty()).unwrap();

        optimize_failure_reporting(&mut g, &options()).unwrap();
        assert!(g.rules[inner].reports_failure);
    }
}
