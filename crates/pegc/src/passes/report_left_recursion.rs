use std::collections::HashMap;

use cranelift_entity::{EntitySet, SecondaryMap};

use crate::{
    error::{GrammarError, Result},
    grammar::{matches_empty, ExprHandle, ExprKind, Grammar, NullableMemo, RuleHandle},
    options::CompileOptions,
    span::Span,
};

/// A rule which can invoke itself before consuming any input loops forever
/// in a recursive-descent parser. Collect, per rule, the set of rules
/// reachable at the start position, then search that graph for cycles.
pub fn report_left_recursion(grammar: &mut Grammar, _options: &CompileOptions) -> Result<()> {
    let mut memo = NullableMemo::new();
    let mut prefix_rules = SecondaryMap::new();

    for handle in grammar.live_handles() {
        let mut set = HashMap::new();
        collect_prefix_rules(grammar, grammar.rules[handle].expr, &mut set, &mut memo);
        prefix_rules[handle] = set;
    }

    let mut visited = EntitySet::new();
    let mut stack = Vec::new();
    for handle in grammar.live_handles() {
        for (&callee, &span) in &prefix_rules[handle] {
            find_prefix_cycles(callee, span, &prefix_rules, &mut visited, &mut stack, grammar)?;
        }
    }
    Ok(())
}

/// Rules referable before the expression has consumed anything. Sequences
/// keep contributing elements while the prefix so far can match empty.
fn collect_prefix_rules(
    grammar: &Grammar,
    expr: ExprHandle,
    rules: &mut HashMap<RuleHandle, Span>,
    memo: &mut NullableMemo,
) {
    match grammar.kind(expr) {
        ExprKind::Sequence { elements, .. } => {
            for &element in elements {
                collect_prefix_rules(grammar, element, rules, memo);
                if !matches_empty(grammar, element, memo) {
                    break;
                }
            }
        }
        ExprKind::Choice { alternatives } => {
            for &alt in alternatives {
                collect_prefix_rules(grammar, alt, rules, memo);
            }
        }
        ExprKind::RuleRef { name, .. } => {
            if let Some(handle) = grammar.find_rule(name) {
                rules.entry(handle).or_insert(grammar.span_of(expr));
            }
        }
        ExprKind::Named { expr, .. }
        | ExprKind::Action { expr, .. }
        | ExprKind::Labeled { expr, .. }
        | ExprKind::Text { expr }
        | ExprKind::SimpleAnd { expr, .. }
        | ExprKind::SimpleNot { expr }
        | ExprKind::Optional { expr }
        | ExprKind::ZeroOrMore { expr }
        | ExprKind::OneOrMore { expr } => {
            collect_prefix_rules(grammar, *expr, rules, memo);
        }
        ExprKind::LabeledParam { .. }
        | ExprKind::SemanticAnd { .. }
        | ExprKind::SemanticNot { .. }
        | ExprKind::ParameterAnd { .. }
        | ExprKind::ParameterNot { .. }
        | ExprKind::Literal { .. }
        | ExprKind::Class { .. }
        | ExprKind::Any => {}
    }
}

fn find_prefix_cycles(
    handle: RuleHandle,
    span: Span,
    prefix_rules: &SecondaryMap<RuleHandle, HashMap<RuleHandle, Span>>,
    visited: &mut EntitySet<RuleHandle>,
    stack: &mut Vec<(RuleHandle, Span)>,
    grammar: &Grammar,
) -> Result<()> {
    if stack.iter().any(|&(rule, _)| rule == handle) {
        return Err(GrammarError::new(
            format!(
                "Left recursion detected for rule \"{}\"",
                grammar.rules[handle].name
            ),
            span,
        ));
    }

    if visited.contains(handle) {
        return Ok(());
    }
    visited.insert(handle);

    stack.push((handle, span));
    for (&callee, &span) in &prefix_rules[handle] {
        find_prefix_cycles(callee, span, prefix_rules, visited, stack, grammar)?;
    }
    stack.pop();
    Ok(())
}
