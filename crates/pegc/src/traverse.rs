//! A traversal which walks the grammar like a directed graph, following
//! `rule_ref` edges into the referenced rules. Each rule is entered at most
//! once per traversal instance, which keeps cyclic grammars from recursing
//! forever; the `changed` flag lets callers iterate a monotone analysis to
//! a fixed point.

use cranelift_entity::EntitySet;

use crate::grammar::{ExprHandle, ExprKind, Grammar, RuleHandle};

/// Hooks for the node kinds a call-graph analysis can care about. Everything
/// else descends structurally. The payload is cloned along every edge, so it
/// should stay cheap (names, handles, `Rc`s).
pub trait GraphVisitor {
    type Payload: Clone;

    fn rule(
        &mut self,
        t: &mut Traversal,
        g: &mut Grammar,
        rule: RuleHandle,
        payload: Self::Payload,
    ) {
        t.walk_rule(self, g, rule, payload);
    }

    fn rule_ref(
        &mut self,
        t: &mut Traversal,
        g: &mut Grammar,
        expr: ExprHandle,
        payload: Self::Payload,
    ) {
        t.follow_rule_ref(self, g, expr, payload);
    }

    fn labeled_param(
        &mut self,
        _t: &mut Traversal,
        _g: &mut Grammar,
        _expr: ExprHandle,
        _payload: Self::Payload,
    ) {
    }

    fn parameter_test(
        &mut self,
        _t: &mut Traversal,
        _g: &mut Grammar,
        _expr: ExprHandle,
        _payload: Self::Payload,
    ) {
    }
}

pub struct Traversal {
    visited: EntitySet<RuleHandle>,
    pub changed: bool,
}

impl Traversal {
    pub fn new() -> Traversal {
        Traversal {
            visited: EntitySet::new(),
            changed: false,
        }
    }

    pub fn reset(&mut self) {
        self.visited.clear();
        self.changed = false;
    }

    pub fn traverse_rule<V: GraphVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        g: &mut Grammar,
        rule: RuleHandle,
        payload: V::Payload,
    ) {
        if self.visited.contains(rule) {
            return;
        }
        self.visited.insert(rule);
        visitor.rule(self, g, rule, payload);
    }

    /// Default rule behaviour: descend into the rule body.
    pub fn walk_rule<V: GraphVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        g: &mut Grammar,
        rule: RuleHandle,
        payload: V::Payload,
    ) {
        let expr = g.rules[rule].expr;
        self.traverse_expr(visitor, g, expr, payload);
    }

    /// Default rule_ref behaviour: follow the edge into the referenced rule.
    pub fn follow_rule_ref<V: GraphVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        g: &mut Grammar,
        expr: ExprHandle,
        payload: V::Payload,
    ) {
        let name = match g.kind(expr) {
            ExprKind::RuleRef { name, .. } => name.clone(),
            _ => unreachable!("follow_rule_ref on a non-reference node"),
        };
        if let Some(rule) = g.find_rule(&name) {
            self.traverse_rule(visitor, g, rule, payload);
        }
    }

    pub fn traverse_expr<V: GraphVisitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        g: &mut Grammar,
        expr: ExprHandle,
        payload: V::Payload,
    ) {
        enum Dispatch {
            RuleRef,
            LabeledParam,
            ParameterTest,
            Children(Vec<ExprHandle>),
            Nop,
        }

        let dispatch = match g.kind(expr) {
            ExprKind::RuleRef { .. } => Dispatch::RuleRef,
            ExprKind::LabeledParam { .. } => Dispatch::LabeledParam,
            ExprKind::ParameterAnd { .. } | ExprKind::ParameterNot { .. } => {
                Dispatch::ParameterTest
            }
            ExprKind::Named { .. }
            | ExprKind::Choice { .. }
            | ExprKind::Action { .. }
            | ExprKind::Sequence { .. }
            | ExprKind::Labeled { .. }
            | ExprKind::Text { .. }
            | ExprKind::SimpleAnd { .. }
            | ExprKind::SimpleNot { .. }
            | ExprKind::Optional { .. }
            | ExprKind::ZeroOrMore { .. }
            | ExprKind::OneOrMore { .. } => Dispatch::Children(g.children(expr)),
            ExprKind::SemanticAnd { .. }
            | ExprKind::SemanticNot { .. }
            | ExprKind::Literal { .. }
            | ExprKind::Class { .. }
            | ExprKind::Any => Dispatch::Nop,
        };

        match dispatch {
            Dispatch::RuleRef => visitor.rule_ref(self, g, expr, payload),
            Dispatch::LabeledParam => visitor.labeled_param(self, g, expr, payload),
            Dispatch::ParameterTest => visitor.parameter_test(self, g, expr, payload),
            Dispatch::Children(children) => {
                for child in children {
                    self.traverse_expr(visitor, g, child, payload.clone());
                }
            }
            Dispatch::Nop => {}
        }
    }
}

impl Default for Traversal {
    fn default() -> Self {
        Traversal::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    struct CountRules {
        entered: Vec<RuleHandle>,
    }

    impl GraphVisitor for CountRules {
        type Payload = ();
        fn rule(&mut self, t: &mut Traversal, g: &mut Grammar, rule: RuleHandle, payload: ()) {
            self.entered.push(rule);
            t.walk_rule(self, g, rule, payload);
        }
    }

    #[test]
    fn cyclic_grammar_terminates() {
        // a = b; b = a / "x"
        let mut g = Grammar::new();
        let ref_b = g.node(ExprKind::rule_ref("b"));
        let a = g.add_rule("a", ref_b, Span::empty()).unwrap();
        let ref_a = g.node(ExprKind::rule_ref("a"));
        let x = g.node(ExprKind::literal("x"));
        let choice = g.node(ExprKind::choice(vec![ref_a, x]));
        let b = g.add_rule("b", choice, Span::empty()).unwrap();

        let mut visitor = CountRules { entered: vec![] };
        let mut t = Traversal::new();
        t.traverse_rule(&mut visitor, &mut g, a, ());
        assert_eq!(visitor.entered, vec![a, b]);

        // revisiting within the same traversal instance is a no-op
        t.traverse_rule(&mut visitor, &mut g, a, ());
        assert_eq!(visitor.entered.len(), 2);

        t.reset();
        t.traverse_rule(&mut visitor, &mut g, b, ());
        assert_eq!(visitor.entered.len(), 4);
    }
}
