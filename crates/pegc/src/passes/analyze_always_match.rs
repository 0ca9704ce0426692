use cranelift_entity::SecondaryMap;

use crate::{
    error::{GrammarError, Result},
    grammar::{ExprHandle, ExprKind, Grammar, RuleHandle},
    options::CompileOptions,
};

/// Find expressions that are guaranteed to succeed on any input: optionals,
/// zero-or-more repetitions, empty literals, rule references to such rules,
/// and sequences/choices built from them. The generator uses the per-node
/// facts to skip emitting failure and backtracking paths.
///
/// A choice alternative after an always-matching one is dead; this is a
/// grammar error unless the alternative is a reference to a rule flagged
/// `unreachable`, or `allow_useless_choice` is set.
pub fn analyze_always_match(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    if options.no_always_match {
        return Ok(());
    }
    let mut pass = Pass {
        rule_results: SecondaryMap::new(),
        allow_useless_choice: options.allow_useless_choice,
    };
    for handle in grammar.live_handles() {
        pass.check_rule(grammar, handle)?;
    }
    for handle in grammar.live_handles() {
        grammar.rules[handle].always_match = pass.rule_results[handle].unwrap_or(false);
    }
    Ok(())
}

struct Pass {
    rule_results: SecondaryMap<RuleHandle, Option<bool>>,
    allow_useless_choice: bool,
}

impl Pass {
    fn check_rule(&mut self, grammar: &mut Grammar, handle: RuleHandle) -> Result<bool> {
        if let Some(result) = self.rule_results[handle] {
            return Ok(result);
        }
        // break cycles by conservatively treating the rule as fallible
        // while it is being computed
        self.rule_results[handle] = Some(false);
        let result = self.check(grammar, grammar.rules[handle].expr)?;
        self.rule_results[handle] = Some(result);
        Ok(result)
    }

    fn check(&mut self, grammar: &mut Grammar, expr: ExprHandle) -> Result<bool> {
        let result = match grammar.kind(expr).clone() {
            ExprKind::RuleRef { name, .. } => match grammar.find_rule(&name) {
                Some(rule) => self.check_rule(grammar, rule)?,
                None => false,
            },
            ExprKind::Choice { alternatives } => {
                let mut always_match = false;
                for alt in alternatives {
                    if always_match {
                        if self.is_known_unreachable(grammar, alt) {
                            // flagged as intentionally dead, keep going
                        } else if !self.allow_useless_choice {
                            return Err(GrammarError::new(
                                "Unreachable alternative",
                                grammar.span_of(alt),
                            ));
                        }
                        continue;
                    }
                    always_match = self.check(grammar, alt)?;
                }
                always_match
            }
            ExprKind::Sequence { elements, .. } => {
                let mut always_match = true;
                for element in elements {
                    let sub = self.check(grammar, element)?;
                    grammar.always_match[element] = Some(sub);
                    always_match &= sub;
                }
                grammar.always_match[expr] = Some(always_match);
                always_match
            }
            ExprKind::Action { expr: inner, .. } => {
                let sub = self.check(grammar, inner)?;
                grammar.always_match[expr] = Some(sub);
                sub
            }
            ExprKind::Labeled { expr, .. }
            | ExprKind::Text { expr }
            | ExprKind::SimpleAnd { expr, .. }
            | ExprKind::Named { expr, .. } => self.check(grammar, expr)?,
            ExprKind::Optional { .. } | ExprKind::ZeroOrMore { .. } => true,
            // empty literals always match on any input
            ExprKind::Literal { value, .. } => value.is_empty(),
            // even [^] and . fail at end of input
            ExprKind::Class { .. } | ExprKind::Any => false,
            ExprKind::OneOrMore { expr } => {
                // conservatively fallible, but still analyze the body
                self.check(grammar, expr)?;
                false
            }
            ExprKind::SimpleNot { expr } => {
                self.check(grammar, expr)?;
                false
            }
            ExprKind::SemanticAnd { .. }
            | ExprKind::SemanticNot { .. }
            | ExprKind::ParameterAnd { .. }
            | ExprKind::ParameterNot { .. }
            | ExprKind::LabeledParam { .. } => false,
        };
        Ok(result)
    }

    fn is_known_unreachable(&self, grammar: &Grammar, alt: ExprHandle) -> bool {
        match grammar.kind(alt) {
            ExprKind::RuleRef { name, .. } => grammar
                .find_rule(name)
                .map(|rule| grammar.rules[rule].attribute_bool("unreachable", false))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::{Attribute, AttributeValue},
        span::Span,
    };

    fn options() -> CompileOptions {
        CompileOptions::default()
    }

    #[test]
    fn optional_always_matches() {
        let mut g = Grammar::new();
        let x = g.node(ExprKind::literal("x"));
        let opt = g.node(ExprKind::Optional { expr: x });
        let rule = g.add_rule("start", opt, Span::empty()).unwrap();

        analyze_always_match(&mut g, &options()).unwrap();
        assert!(g.rules[rule].always_match);
    }

    #[test]
    fn sequence_elements_are_annotated() {
        let mut g = Grammar::new();
        let x = g.node(ExprKind::literal("x"));
        let star = g.node(ExprKind::ZeroOrMore { expr: x });
        let y = g.node(ExprKind::literal("y"));
        let seq = g.node(ExprKind::sequence(vec![star, y]));
        let rule = g.add_rule("start", seq, Span::empty()).unwrap();

        analyze_always_match(&mut g, &options()).unwrap();
        assert!(!g.rules[rule].always_match);
        assert_eq!(g.always_match[star], Some(true));
        assert_eq!(g.always_match[y], Some(false));
        assert_eq!(g.always_match[seq], Some(false));
    }

    #[test]
    fn alternative_after_total_one_is_fatal() {
        // start = "x"? / "y"
        let mut g = Grammar::new();
        let x = g.node(ExprKind::literal("x"));
        let opt = g.node(ExprKind::Optional { expr: x });
        let y = g.node(ExprKind::literal("y"));
        let choice = g.node(ExprKind::choice(vec![opt, y]));
        g.add_rule("start", choice, Span::empty()).unwrap();

        assert!(analyze_always_match(&mut g, &options()).is_err());
    }

    #[test]
    fn unreachable_attribute_is_an_escape_hatch() {
        let mut g = Grammar::new();
        let x = g.node(ExprKind::literal("x"));
        let opt = g.node(ExprKind::Optional { expr: x });
        let dead_ref = g.node(ExprKind::rule_ref("dead"));
        let choice = g.node(ExprKind::choice(vec![opt, dead_ref]));
        g.add_rule("start", choice, Span::empty()).unwrap();
        let y = g.node(ExprKind::literal("y"));
        let dead = g.add_rule("dead", y, Span::empty()).unwrap();
        g.rules[dead].attributes.push(Attribute {
            name: "unreachable".into(),
            value: AttributeValue::Boolean(true),
            span: Span::empty(),
        });

        analyze_always_match(&mut g, &options()).unwrap();
    }

    #[test]
    fn cyclic_rules_are_fallible() {
        // a = b; b = a / "x"
        let mut g = Grammar::new();
        let ref_b = g.node(ExprKind::rule_ref("b"));
        let a = g.add_rule("a", ref_b, Span::empty()).unwrap();
        let ref_a = g.node(ExprKind::rule_ref("a"));
        let x = g.node(ExprKind::literal("x"));
        let choice = g.node(ExprKind::choice(vec![ref_a, x]));
        g.add_rule("b", choice, Span::empty()).unwrap();

        analyze_always_match(&mut g, &options()).unwrap();
        assert!(!g.rules[a].always_match);
    }
}
