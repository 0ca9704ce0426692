use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar},
    options::CompileOptions,
};

/// Inline simple rules, like character classes and string constants, whose
/// function-call indirection costs more than it saves. The `inline` rule
/// attribute overrides the global default per rule; the shape requirement
/// always applies.
pub fn inline_simple_rules(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    for handle in grammar.live_handles() {
        let rule = &grammar.rules[handle];
        if !is_simple(grammar, rule.expr) {
            continue;
        }
        if !rule.attribute_bool("inline", !options.no_inlining) {
            continue;
        }
        let from = rule.name.clone();
        let body = rule.expr;
        log::debug!("inlining simple rule {from}");

        let removed_all = inline_refs(grammar, &from, body);
        if removed_all && !options.entry_rules().any(|entry| entry == from) {
            grammar.remove_rule(handle);
        }
    }
    Ok(())
}

fn is_class_or_literal(grammar: &Grammar, expr: ExprHandle) -> bool {
    matches!(
        grammar.kind(expr),
        ExprKind::Class { .. } | ExprKind::Literal { .. }
    )
}

fn is_repeated_class_or_literal(grammar: &Grammar, expr: ExprHandle) -> bool {
    match grammar.kind(expr) {
        ExprKind::ZeroOrMore { expr } | ExprKind::OneOrMore { expr } => {
            is_class_or_literal(grammar, *expr)
        }
        _ => false,
    }
}

fn is_simple(grammar: &Grammar, expr: ExprHandle) -> bool {
    if is_class_or_literal(grammar, expr) || is_repeated_class_or_literal(grammar, expr) {
        return true;
    }
    match grammar.kind(expr) {
        ExprKind::Text { expr } => {
            is_class_or_literal(grammar, *expr) || is_repeated_class_or_literal(grammar, *expr)
        }
        _ => false,
    }
}

/// Replace every zero-argument reference to `from` with a deep copy of the
/// rule body. References passing arguments are left alone (the target has
/// no parameters; such a call is caught by validation, not dropped here)
/// and keep the rule alive.
fn inline_refs(grammar: &mut Grammar, from: &str, body: ExprHandle) -> bool {
    let mut removed_all = true;
    for handle in grammar.live_handles() {
        // the rule body itself contains no references, so visiting the rule
        // being inlined is harmless
        let mut refs = Vec::new();
        collect_refs(grammar, grammar.rules[handle].expr, from, &mut refs);
        for (site, has_args) in refs {
            if has_args {
                removed_all = false;
                continue;
            }
            let copy = grammar.deep_copy(body);
            let kind = grammar.kind(copy).clone();
            grammar.replace(site, kind);
        }
    }
    removed_all
}

fn collect_refs(
    grammar: &Grammar,
    expr: ExprHandle,
    from: &str,
    out: &mut Vec<(ExprHandle, bool)>,
) {
    if let ExprKind::RuleRef { name, assignments } = grammar.kind(expr) {
        if name == from {
            out.push((expr, !assignments.is_empty()));
        }
    }
    for child in grammar.children(expr) {
        collect_refs(grammar, child, from, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        charset::{ClassNode, ClassPart},
        grammar::{Assignment, AssignedValue},
        span::Span,
    };

    fn digit_class(g: &mut Grammar) -> ExprHandle {
        g.node(ExprKind::Class {
            class: ClassNode {
                parts: vec![ClassPart::Range('0' as u32, '9' as u32)],
                inverted: false,
                ignore_case: false,
                sorted: true,
            },
            raw: "[0-9]".into(),
        })
    }

    #[test]
    fn class_rule_is_inlined_and_deleted() {
        // start = digit digit; digit = [0-9]
        let mut g = Grammar::new();
        let a = g.node(ExprKind::rule_ref("digit"));
        let b = g.node(ExprKind::rule_ref("digit"));
        let seq = g.node(ExprKind::sequence(vec![a, b]));
        g.add_rule("start", seq, Span::empty()).unwrap();
        let class = digit_class(&mut g);
        g.add_rule("digit", class, Span::empty()).unwrap();

        let options = CompileOptions {
            allowed_start_rules: vec!["start".into()],
            ..Default::default()
        };
        inline_simple_rules(&mut g, &options).unwrap();

        assert!(g.find_rule("digit").is_none());
        assert!(matches!(g.kind(a), ExprKind::Class { .. }));
        assert!(matches!(g.kind(b), ExprKind::Class { .. }));
    }

    #[test]
    fn reference_with_arguments_is_left_alone() {
        let mut g = Grammar::new();
        let call = g.node(ExprKind::RuleRef {
            name: "digit".into(),
            assignments: vec![Assignment {
                name: "x".into(),
                value: AssignedValue::Boolean(true),
                is_ref: false,
                span: Span::empty(),
            }],
        });
        g.add_rule("start", call, Span::empty()).unwrap();
        let class = digit_class(&mut g);
        g.add_rule("digit", class, Span::empty()).unwrap();

        let options = CompileOptions {
            allowed_start_rules: vec!["start".into()],
            ..Default::default()
        };
        inline_simple_rules(&mut g, &options).unwrap();

        // the call was not rewritten and the rule survives
        assert!(matches!(g.kind(call), ExprKind::RuleRef { .. }));
        assert!(g.find_rule("digit").is_some());
    }

    #[test]
    fn inline_attribute_false_blocks_inlining() {
        let mut g = Grammar::new();
        let a = g.node(ExprKind::rule_ref("digit"));
        g.add_rule("start", a, Span::empty()).unwrap();
        let class = digit_class(&mut g);
        let digit = g.add_rule("digit", class, Span::empty()).unwrap();
        g.rules[digit].attributes.push(crate::grammar::Attribute {
            name: "inline".into(),
            value: crate::grammar::AttributeValue::Boolean(false),
            span: Span::empty(),
        });

        let options = CompileOptions {
            allowed_start_rules: vec!["start".into()],
            ..Default::default()
        };
        inline_simple_rules(&mut g, &options).unwrap();
        assert!(matches!(g.kind(a), ExprKind::RuleRef { .. }));
        assert!(g.find_rule("digit").is_some());
    }

    #[test]
    fn complex_rule_is_not_inlined() {
        // digit = [0-9] [0-9] is not a simple shape
        let mut g = Grammar::new();
        let a = g.node(ExprKind::rule_ref("digit"));
        g.add_rule("start", a, Span::empty()).unwrap();
        let c1 = digit_class(&mut g);
        let c2 = digit_class(&mut g);
        let seq = g.node(ExprKind::sequence(vec![c1, c2]));
        g.add_rule("digit", seq, Span::empty()).unwrap();

        let options = CompileOptions {
            allowed_start_rules: vec!["start".into()],
            ..Default::default()
        };
        inline_simple_rules(&mut g, &options).unwrap();
        assert!(matches!(g.kind(a), ExprKind::RuleRef { .. }));
    }
}
