use crate::{
    charset::{ClassNode, ClassOps, ClassPart},
    error::{GrammarError, Result},
    grammar::{
        matches_empty, rule_matches_empty, AttributeValue, ExprHandle, ExprKind, Grammar,
        NullableMemo, RuleHandle,
    },
    options::{CompileOptions, FirstSetMode},
};

/// Compute, for every rule, whether it can match the empty string and the
/// set of characters a match can begin with. If the next input character is
/// not in FIRST and the rule is not nullable, the rule is guaranteed to
/// fail without consuming input — which lets us guard expensive rule calls
/// with a single-character lookahead.
pub fn analyze_first(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    if options.optimize_first_set == FirstSetMode::None {
        return Ok(());
    }

    let mut pass = Pass {
        ops: ClassOps::new(options.caseless_restrict),
        memo: NullableMemo::new(),
    };

    for handle in grammar.live_handles() {
        grammar.rules[handle].nullable = rule_matches_empty(grammar, handle, &mut pass.memo);
    }
    for handle in grammar.live_handles() {
        pass.rule_first(grammar, handle)?;
    }

    match options.optimize_first_set {
        FirstSetMode::Call => add_prefixes_at_calls(grammar),
        FirstSetMode::Def => add_prefixes_at_defs(grammar),
        FirstSetMode::Analyze | FirstSetMode::None => {}
    }
    Ok(())
}

struct Pass {
    ops: ClassOps,
    memo: NullableMemo,
}

impl Pass {
    fn nullable(&mut self, grammar: &Grammar, expr: ExprHandle) -> bool {
        matches_empty(grammar, expr, &mut self.memo)
    }

    fn rule_first(&mut self, grammar: &mut Grammar, handle: RuleHandle) -> Result<ClassNode> {
        if let Some(first) = &grammar.rules[handle].first_set {
            return Ok(first.clone());
        }
        // To break cycles, give the rule a conservative FIRST of "any"
        // while it is being computed.
        grammar.rules[handle].first_set = Some(ClassNode::any());
        if let Some(attr) = grammar.rules[handle].attribute("empty") {
            if attr.value == AttributeValue::Boolean(false) {
                // manual override: the rule claims to consume input but we
                // cannot say what it starts with
                return Ok(ClassNode::any());
            }
        }
        let first = self.check_first(grammar, grammar.rules[handle].expr)?;
        let rule = &mut grammar.rules[handle];
        rule.first_set = Some(first.clone());
        log::debug!(
            "rule {} nullable={} first={:?}",
            rule.name,
            rule.nullable,
            first
        );
        Ok(first)
    }

    fn check_first(&mut self, grammar: &mut Grammar, expr: ExprHandle) -> Result<ClassNode> {
        let kind = grammar.kind(expr).clone();
        let first = match kind {
            ExprKind::RuleRef { name, .. } => {
                let rule = grammar.expect_rule(&name, grammar.span_of(expr))?;
                self.rule_first(grammar, rule)?
            }
            ExprKind::Choice { alternatives } => {
                if alternatives.is_empty() {
                    return Err(GrammarError::new("No choices", grammar.span_of(expr)));
                }
                let mut first = self.check_first(grammar, alternatives[0])?;
                for &alt in &alternatives[1..] {
                    if first.is_any() {
                        // the first set can't grow more than this
                        break;
                    }
                    let alt_first = self.check_first(grammar, alt)?;
                    first = self.ops.union(&first, &alt_first);
                }
                first
            }
            ExprKind::Sequence { elements, .. } => {
                if elements.is_empty() {
                    return Err(GrammarError::new("No sequence", grammar.span_of(expr)));
                }
                self.sequence_first(grammar, &elements)?
            }
            ExprKind::Named { expr, .. }
            | ExprKind::Labeled { expr, .. }
            | ExprKind::Text { expr }
            | ExprKind::Action { expr, .. }
            | ExprKind::Optional { expr }
            | ExprKind::ZeroOrMore { expr }
            | ExprKind::OneOrMore { expr } => self.check_first(grammar, expr)?,
            ExprKind::SimpleAnd { .. }
            | ExprKind::SimpleNot { .. }
            | ExprKind::SemanticAnd { .. }
            | ExprKind::SemanticNot { .. }
            | ExprKind::ParameterAnd { .. }
            | ExprKind::ParameterNot { .. }
            | ExprKind::LabeledParam { .. } => ClassNode::empty(),
            ExprKind::Any => ClassNode::any(),
            ExprKind::Class { class, .. } => self.ops.sort(class),
            ExprKind::Literal { value, ignore_case } => match value.chars().next() {
                None => ClassNode::empty(),
                Some(c) => self.ops.sort(ClassNode::new(
                    vec![ClassPart::char(c)],
                    false,
                    ignore_case,
                )),
            },
        };
        Ok(first)
    }

    /// Union of element FIRST sets while the prefix stays nullable, with a
    /// refinement: a non-nullable `&guard` assertion makes everything after
    /// it fail at the same position, so the assertion contributes the
    /// *intersection* of its own FIRST set with that of what follows.
    fn sequence_first(
        &mut self,
        grammar: &mut Grammar,
        elements: &[ExprHandle],
    ) -> Result<ClassNode> {
        let mut first = self.check_first(grammar, elements[0])?;
        let mut nullable = self.nullable(grammar, elements[0]);
        let mut fixups: Vec<(ClassNode, ExprHandle)> = Vec::new();

        let mut i = 1;
        while nullable && i < elements.len() {
            if first.is_any() {
                break;
            }
            if let &ExprKind::SimpleAnd { expr: guard, .. } = grammar.kind(elements[i]) {
                if !self.nullable(grammar, guard) && i < elements.len() - 1 {
                    fixups.push((first, guard));
                    first = ClassNode::empty();
                    i += 1;
                    continue;
                }
            }
            let element_first = self.check_first(grammar, elements[i])?;
            first = self.ops.union(&first, &element_first);
            nullable = self.nullable(grammar, elements[i]);
            i += 1;
        }

        while let Some((saved, guard)) = fixups.pop() {
            let guard_first = self.check_first(grammar, guard)?;
            first = self
                .ops
                .union(&saved, &self.ops.intersection(&guard_first, &first));
        }
        Ok(first)
    }
}

fn wants_guard(grammar: &Grammar, handle: RuleHandle) -> bool {
    let rule = &grammar.rules[handle];
    if rule.nullable {
        return false;
    }
    match &rule.first_set {
        Some(first) => !first.is_any(),
        None => false,
    }
}

fn make_guard(grammar: &mut Grammar, handle: RuleHandle, site: ExprHandle) -> ExprHandle {
    let span = grammar.span_of(site);
    let rule = &grammar.rules[handle];
    let first = rule.first_set.clone().expect("first set was just computed");
    let name = rule.name.clone();
    let class = grammar.add(
        ExprKind::Class {
            class: first,
            raw: String::new(),
        },
        span,
    );
    grammar.add(
        ExprKind::SimpleAnd {
            expr: class,
            first_set_of: Some(name),
        },
        span,
    )
}

/// Rewrite every call site of a guarded rule to `(&first rule)`.
fn add_prefixes_at_calls(grammar: &mut Grammar) {
    for handle in grammar.live_handles() {
        let mut sites = Vec::new();
        collect_rule_refs(grammar, grammar.rules[handle].expr, &mut sites);
        for site in sites {
            let (name, assignments) = match grammar.kind(site) {
                ExprKind::RuleRef { name, assignments } => (name.clone(), assignments.clone()),
                _ => unreachable!(),
            };
            let Some(target) = grammar.find_rule(&name) else {
                continue;
            };
            if !wants_guard(grammar, target) {
                continue;
            }
            let span = grammar.span_of(site);
            let guard = make_guard(grammar, target, site);
            let new_ref = grammar.add(ExprKind::RuleRef { name, assignments }, span);
            grammar.replace(
                site,
                ExprKind::Sequence {
                    elements: vec![guard, new_ref],
                    picked: Some(1),
                },
            );
        }
    }
}

/// Prefix guarded rule definitions with `&first` instead.
fn add_prefixes_at_defs(grammar: &mut Grammar) {
    for handle in grammar.live_handles() {
        if !wants_guard(grammar, handle) {
            continue;
        }
        let old = grammar.rules[handle].expr;
        let guard = make_guard(grammar, handle, old);
        let seq = grammar.add(
            ExprKind::Sequence {
                elements: vec![guard, old],
                picked: Some(1),
            },
            grammar.span_of(old),
        );
        grammar.rules[handle].expr = seq;
    }
}

fn collect_rule_refs(grammar: &Grammar, expr: ExprHandle, out: &mut Vec<ExprHandle>) {
    if let ExprKind::RuleRef { .. } = grammar.kind(expr) {
        out.push(expr);
    }
    for child in grammar.children(expr) {
        collect_rule_refs(grammar, child, out);
    }
}
