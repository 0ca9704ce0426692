use crate::{
    charset::{ClassNode, ClassOps, ClassPart},
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar},
    options::CompileOptions,
};

/// Character class algebra on the AST:
///   `[...] / [...]`  collapses to one union class,
///   `![...] [...]`   collapses to a subtraction class.
/// Both turn a backtracking construct into a single allocation-free
/// character test.
pub fn optimize_character_class(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    if options.no_optimize_character_class {
        return Ok(());
    }
    let ops = ClassOps::new(options.caseless_restrict);
    for handle in grammar.live_handles() {
        visit(grammar, grammar.rules[handle].expr, &ops);
    }
    Ok(())
}

fn visit(grammar: &mut Grammar, expr: ExprHandle, ops: &ClassOps) {
    for child in grammar.children(expr) {
        visit(grammar, child, ops);
    }
    match grammar.kind(expr) {
        ExprKind::Choice { .. } => optimize_choice(grammar, expr, ops),
        ExprKind::Sequence { .. } => optimize_sequence(grammar, expr, ops),
        _ => {}
    }
}

/// A construct that consumes exactly one character on success.
fn is_single_char(grammar: &Grammar, expr: ExprHandle) -> bool {
    match grammar.kind(expr) {
        ExprKind::Class { .. } | ExprKind::Any => true,
        ExprKind::Literal { value, .. } => value.chars().count() == 1,
        _ => false,
    }
}

fn to_desc(grammar: &Grammar, expr: ExprHandle) -> String {
    match grammar.kind(expr) {
        ExprKind::Class { raw, .. } => raw.clone(),
        ExprKind::Any => ".".to_owned(),
        ExprKind::Literal { value, .. } => format!("\"{value}\""),
        _ => unreachable!("to_desc on a non-character node"),
    }
}

fn to_list(descs: Vec<String>) -> String {
    match descs.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
        _ => descs.concat(),
    }
}

fn to_charset(grammar: &Grammar, expr: ExprHandle, ops: &ClassOps) -> ClassNode {
    match grammar.kind(expr) {
        ExprKind::Class { class, .. } => ops.sort(class.clone()),
        ExprKind::Any => ClassNode::any(),
        ExprKind::Literal { value, ignore_case } => {
            let c = value.chars().next().expect("single-character literal");
            ops.sort(ClassNode::new(vec![ClassPart::char(c)], false, *ignore_case))
        }
        _ => unreachable!("to_charset on a non-character node"),
    }
}

fn optimize_choice(grammar: &mut Grammar, expr: ExprHandle, ops: &ClassOps) {
    let alternatives = match grammar.kind(expr) {
        ExprKind::Choice { alternatives } => alternatives.clone(),
        _ => unreachable!(),
    };
    if !alternatives
        .iter()
        .all(|alt| is_single_char(grammar, *alt))
    {
        return;
    }
    let mut class = ClassNode::empty();
    for alt in &alternatives {
        class = ops.union(&class, &to_charset(grammar, *alt, ops));
    }
    let raw = to_list(
        alternatives
            .iter()
            .map(|alt| to_desc(grammar, *alt))
            .collect(),
    );
    grammar.replace(expr, ExprKind::Class { class, raw });
}

/// The no-op assertion left behind to preserve element count and positions.
fn is_placeholder(grammar: &Grammar, expr: ExprHandle) -> bool {
    match grammar.kind(expr) {
        ExprKind::SimpleAnd { expr, .. } => match grammar.kind(*expr) {
            ExprKind::Literal { value, .. } => value.is_empty(),
            _ => false,
        },
        _ => false,
    }
}

fn optimize_sequence(grammar: &mut Grammar, expr: ExprHandle, ops: &ClassOps) {
    let (elements, picked) = match grammar.kind(expr) {
        ExprKind::Sequence { elements, picked } => (elements.clone(), *picked),
        _ => unreachable!(),
    };
    if elements.len() < 2 {
        return;
    }

    let mut removed = 0;
    for i in (0..elements.len() - 1).rev() {
        let mut next = i + 1;
        while next < elements.len() && is_placeholder(grammar, elements[next]) {
            next += 1;
        }
        if next >= elements.len() {
            continue;
        }
        let negated = match grammar.kind(elements[i]) {
            ExprKind::SimpleNot { expr } => *expr,
            _ => continue,
        };
        if picked == Some(i as u32)
            || !is_single_char(grammar, negated)
            || !is_single_char(grammar, elements[next])
        {
            continue;
        }

        let class = ops.subtract(
            &to_charset(grammar, elements[next], ops),
            &to_charset(grammar, negated, ops),
        );
        let raw = format!(
            "{} but not {}",
            to_desc(grammar, elements[next]),
            to_desc(grammar, negated)
        );
        // a trivial assertion keeps the same number of elements in the
        // sequence, so a picked index stays valid
        let span = grammar.span_of(elements[i]);
        let empty = grammar.add(ExprKind::literal(""), span);
        grammar.replace(elements[i], ExprKind::simple_and(empty));
        grammar.replace(elements[next], ExprKind::Class { class, raw });
        removed += 1;
    }

    // if only the picked element is left, the whole sequence is just that
    // character class
    let last = *elements.last().unwrap();
    if elements.len() == removed + 1 && picked == Some((elements.len() - 1) as u32) {
        let kind = grammar.kind(last).clone();
        grammar.replace(expr, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn class_node(g: &mut Grammar, start: char, end: char, raw: &str) -> ExprHandle {
        g.node(ExprKind::Class {
            class: ClassNode {
                parts: vec![ClassPart::range(start, end)],
                inverted: false,
                ignore_case: false,
                sorted: true,
            },
            raw: raw.into(),
        })
    }

    fn options() -> CompileOptions {
        CompileOptions::default()
    }

    #[test]
    fn choice_of_single_chars_collapses() {
        // [a-f] / "x" / .  — all single character constructs
        let mut g = Grammar::new();
        let a = class_node(&mut g, 'a', 'f', "[a-f]");
        let x = g.node(ExprKind::literal("x"));
        let any = g.node(ExprKind::Any);
        let choice = g.node(ExprKind::choice(vec![a, x, any]));
        g.add_rule("start", choice, Span::empty()).unwrap();

        optimize_character_class(&mut g, &options()).unwrap();

        match g.kind(choice) {
            ExprKind::Class { class, raw } => {
                assert!(class.is_any());
                assert_eq!(raw, "[a-f], \"x\" or .");
            }
            other => panic!("expected class, got {other:?}"),
        }
    }

    #[test]
    fn mixed_choice_is_untouched() {
        let mut g = Grammar::new();
        let a = class_node(&mut g, 'a', 'f', "[a-f]");
        let word = g.node(ExprKind::literal("word"));
        let choice = g.node(ExprKind::choice(vec![a, word]));
        g.add_rule("start", choice, Span::empty()).unwrap();

        optimize_character_class(&mut g, &options()).unwrap();
        assert!(matches!(g.kind(choice), ExprKind::Choice { .. }));
    }

    #[test]
    fn negative_lookahead_becomes_subtraction() {
        // !"b" [a-c] x
        let mut g = Grammar::new();
        let b = g.node(ExprKind::literal("b"));
        let not_b = g.node(ExprKind::SimpleNot { expr: b });
        let abc = class_node(&mut g, 'a', 'c', "[a-c]");
        let x = g.node(ExprKind::literal("x"));
        let seq = g.node(ExprKind::sequence(vec![not_b, abc, x]));
        g.add_rule("start", seq, Span::empty()).unwrap();

        optimize_character_class(&mut g, &options()).unwrap();

        assert!(is_placeholder(&g, not_b));
        match g.kind(abc) {
            ExprKind::Class { class, raw } => {
                assert_eq!(raw, "[a-c] but not \"b\"");
                assert!(class.contains('a' as u32));
                assert!(!class.contains('b' as u32));
                assert!(class.contains('c' as u32));
            }
            other => panic!("expected class, got {other:?}"),
        }
        // the sequence itself survives since it was not a picked singleton
        assert!(matches!(g.kind(seq), ExprKind::Sequence { .. }));
    }

    #[test]
    fn picked_pair_collapses_to_class() {
        // !"b" [a-c] with the class picked
        let mut g = Grammar::new();
        let b = g.node(ExprKind::literal("b"));
        let not_b = g.node(ExprKind::SimpleNot { expr: b });
        let abc = class_node(&mut g, 'a', 'c', "[a-c]");
        let seq = g.node(ExprKind::Sequence {
            elements: vec![not_b, abc],
            picked: Some(1),
        });
        g.add_rule("start", seq, Span::empty()).unwrap();

        optimize_character_class(&mut g, &options()).unwrap();
        match g.kind(seq) {
            ExprKind::Class { raw, .. } => assert_eq!(raw, "[a-c] but not \"b\""),
            other => panic!("expected collapsed class, got {other:?}"),
        }
    }

    #[test]
    fn disabled_by_option() {
        let mut g = Grammar::new();
        let a = class_node(&mut g, 'a', 'f', "[a-f]");
        let x = g.node(ExprKind::literal("x"));
        let choice = g.node(ExprKind::choice(vec![a, x]));
        g.add_rule("start", choice, Span::empty()).unwrap();

        let options = CompileOptions {
            no_optimize_character_class: true,
            ..Default::default()
        };
        optimize_character_class(&mut g, &options).unwrap();
        assert!(matches!(g.kind(choice), ExprKind::Choice { .. }));
    }
}
