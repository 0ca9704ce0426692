use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar, ParamType, RuleHandle},
    options::CompileOptions,
    traverse::{GraphVisitor, Traversal},
};

/// Parameter flow analysis.
///
/// For every `rule<param = value>` assignment this pass (a) infers one
/// consistent type per parameter name grammar-wide, (b) marks every rule in
/// the call subtree as having the parameter assigned, (c) tracks, for
/// reference parameters, whether an action may capture the live reference
/// without an intervening reassignment, and (d) computes which parameters
/// must physically be passed to each rule function. A parameter is passed
/// only if it is accessed downstream *and* assigned on the path (or
/// captured); otherwise the generator inlines its statically-known initial
/// value.
pub fn analyze_params(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    for handle in grammar.live_handles() {
        let rule = &mut grammar.rules[handle];
        rule.accessed_params.clear();
        rule.assigned_params.clear();
        rule.passed_params.clear();
        rule.has_bool_params = false;
    }

    // Register assignment types and propagate assignment facts through the
    // call graph.
    let mut scopes = ScopeSets::default();
    let mut ref_params: Vec<String> = Vec::new();
    for handle in grammar.live_handles() {
        let mut sites = Vec::new();
        collect_assigning_refs(grammar, grammar.rules[handle].expr, &mut sites);
        for site in sites {
            let (name, assignments) = match grammar.kind(site) {
                ExprKind::RuleRef { name, assignments } => (name.clone(), assignments.clone()),
                _ => unreachable!(),
            };
            let target = grammar.expect_rule(&name, grammar.span_of(site))?;
            for assignment in &assignments {
                let ty = assignment.value.param_type(assignment.is_ref);
                grammar
                    .params
                    .register(&assignment.name, ty, assignment.span)?;

                let mut assign = AssignVisitor;
                Traversal::new().traverse_rule(
                    &mut assign,
                    grammar,
                    target,
                    assignment.name.clone(),
                );

                if assignment.is_ref {
                    if !ref_params.contains(&assignment.name) {
                        ref_params.push(assignment.name.clone());
                    }
                    let scope = Rc::new(RefScope {
                        capture: Cell::new(false),
                    });
                    let mut visitor = RefScopeVisitor {
                        scopes: &mut scopes,
                    };
                    Traversal::new().traverse_rule(
                        &mut visitor,
                        grammar,
                        target,
                        (assignment.name.clone(), scope),
                    );
                }
            }
        }
    }

    // For every reference parameter, walk the call graph of each entry rule
    // so captures of the initial (never reassigned) value are seen too.
    let entry_rules: Vec<RuleHandle> = options
        .entry_rules()
        .filter_map(|name| grammar.find_rule(name))
        .collect();
    for param in &ref_params {
        for &entry in &entry_rules {
            let scope = Rc::new(RefScope {
                capture: Cell::new(false),
            });
            let mut visitor = RefScopeVisitor {
                scopes: &mut scopes,
            };
            Traversal::new().traverse_rule(&mut visitor, grammar, entry, (param.clone(), scope));
        }
    }

    // Accumulate accessed-parameter sets to a fixed point; cycles in the
    // rule graph mean one walk may see incomplete callee sets.
    let mut access = Traversal::new();
    loop {
        access.reset();
        let mut visitor = AccessVisitor;
        for handle in grammar.live_handles() {
            access.traverse_rule(&mut visitor, grammar, handle, handle);
        }
        if !access.changed {
            break;
        }
    }

    // A parameter needs to be passed as a function argument only if it was
    // accessed and also written on this path (capture counts as a write).
    for handle in grammar.live_handles() {
        let accessed: Vec<String> = grammar.rules[handle]
            .accessed_params
            .iter()
            .cloned()
            .collect();
        for name in accessed {
            let assigned = grammar.rules[handle].assigned_params.contains(&name)
                || scopes.is_captured(handle, &name);
            if assigned {
                if grammar.params.get(&name).and_then(|info| info.ty) == Some(ParamType::Boolean)
                {
                    grammar.rules[handle].has_bool_params = true;
                }
                grammar.rules[handle].passed_params.insert(name);
            }
        }
    }
    Ok(())
}

fn collect_assigning_refs(grammar: &Grammar, expr: ExprHandle, out: &mut Vec<ExprHandle>) {
    if let ExprKind::RuleRef { assignments, .. } = grammar.kind(expr) {
        if !assignments.is_empty() {
            out.push(expr);
        }
    }
    for child in grammar.children(expr) {
        collect_assigning_refs(grammar, child, out);
    }
}

struct RefScope {
    capture: Cell<bool>,
}

#[derive(Default)]
struct ScopeSets {
    by_rule: HashMap<(RuleHandle, String), Vec<Rc<RefScope>>>,
}

impl ScopeSets {
    fn is_captured(&self, rule: RuleHandle, param: &str) -> bool {
        self.by_rule
            .get(&(rule, param.to_owned()))
            .map(|scopes| scopes.iter().any(|scope| scope.capture.get()))
            .unwrap_or(false)
    }
}

/// Marks every rule in the call subtree as having the parameter assigned.
struct AssignVisitor;

impl GraphVisitor for AssignVisitor {
    type Payload = String;

    fn rule(&mut self, t: &mut Traversal, g: &mut Grammar, rule: RuleHandle, param: String) {
        g.rules[rule].assigned_params.insert(param.clone());
        t.walk_rule(self, g, rule, param);
    }
}

/// Records, per rule, the reference scopes whose live value can reach it.
/// Propagation dies at a reference reassignment.
struct RefScopeVisitor<'a> {
    scopes: &'a mut ScopeSets,
}

impl GraphVisitor for RefScopeVisitor<'_> {
    type Payload = (String, Rc<RefScope>);

    fn rule(
        &mut self,
        t: &mut Traversal,
        g: &mut Grammar,
        rule: RuleHandle,
        (param, scope): Self::Payload,
    ) {
        self.scopes
            .by_rule
            .entry((rule, param.clone()))
            .or_default()
            .push(scope.clone());
        t.walk_rule(self, g, rule, (param, scope));
    }

    fn rule_ref(
        &mut self,
        t: &mut Traversal,
        g: &mut Grammar,
        expr: ExprHandle,
        (param, scope): Self::Payload,
    ) {
        if let ExprKind::RuleRef { assignments, .. } = g.kind(expr) {
            let reassigned = assignments
                .iter()
                .any(|assignment| assignment.is_ref && assignment.name == param);
            if reassigned {
                // Kill the scope here; a later reference to the same rule
                // can still propagate it.
                return;
            }
        }
        t.follow_rule_ref(self, g, expr, (param, scope));
    }

    fn labeled_param(
        &mut self,
        _t: &mut Traversal,
        g: &mut Grammar,
        expr: ExprHandle,
        (param, scope): Self::Payload,
    ) {
        if let ExprKind::LabeledParam {
            parameter,
            is_ref: true,
            ..
        } = g.kind(expr)
        {
            if *parameter == param {
                scope.capture.set(true);
            }
        }
    }
}

/// Accumulates the accessed-parameter set of the payload rule. Reading a
/// parameter is a test (`&{param}`) or a labeled capture; a call forwards
/// the callee's accesses minus those whose value it overwrites.
struct AccessVisitor;

impl GraphVisitor for AccessVisitor {
    type Payload = RuleHandle;

    fn rule(&mut self, t: &mut Traversal, g: &mut Grammar, rule: RuleHandle, _acc: RuleHandle) {
        let before = g.rules[rule].accessed_params.len();
        t.walk_rule(self, g, rule, rule);
        if g.rules[rule].accessed_params.len() != before {
            t.changed = true;
        }
    }

    fn rule_ref(
        &mut self,
        t: &mut Traversal,
        g: &mut Grammar,
        expr: ExprHandle,
        acc: RuleHandle,
    ) {
        let (name, assignments) = match g.kind(expr) {
            ExprKind::RuleRef { name, assignments } => (name.clone(), assignments.clone()),
            _ => unreachable!(),
        };
        let Some(callee) = g.find_rule(&name) else {
            return;
        };
        t.traverse_rule(self, g, callee, callee);

        let mut forwarded = g.rules[callee].accessed_params.clone();
        for assignment in &assignments {
            // Assignments (except increments, which read the old value)
            // discard the previous value, so the caller need not know it.
            if !matches!(assignment.value, crate::grammar::AssignedValue::Increment(_)) {
                forwarded.remove(&assignment.name);
            }
        }
        g.rules[acc].accessed_params.extend(forwarded);
    }

    fn parameter_test(
        &mut self,
        _t: &mut Traversal,
        g: &mut Grammar,
        expr: ExprHandle,
        acc: RuleHandle,
    ) {
        let name = match g.kind(expr) {
            ExprKind::ParameterAnd { parameter } | ExprKind::ParameterNot { parameter } => {
                parameter.clone()
            }
            _ => unreachable!(),
        };
        g.params.entry(&name);
        g.rules[acc].accessed_params.insert(name);
    }

    fn labeled_param(
        &mut self,
        _t: &mut Traversal,
        g: &mut Grammar,
        expr: ExprHandle,
        acc: RuleHandle,
    ) {
        let name = match g.kind(expr) {
            ExprKind::LabeledParam { parameter, .. } => parameter.clone(),
            _ => unreachable!(),
        };
        g.params.entry(&name);
        g.rules[acc].accessed_params.insert(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::{AssignedValue, Assignment},
        span::Span,
    };

    fn assignment(name: &str, value: AssignedValue, is_ref: bool) -> Assignment {
        Assignment {
            name: name.into(),
            value,
            is_ref,
            span: Span::empty(),
        }
    }

    fn options() -> CompileOptions {
        CompileOptions {
            allowed_start_rules: vec!["start".into()],
            ..Default::default()
        }
    }

    #[test]
    fn accessed_and_assigned_parameter_is_passed() {
        // start = callee<flag=true>; callee = &{flag} "x"
        let mut g = Grammar::new();
        let call = g.node(ExprKind::RuleRef {
            name: "callee".into(),
            assignments: vec![assignment("flag", AssignedValue::Boolean(true), false)],
        });
        g.add_rule("start", call, Span::empty()).unwrap();
        let test = g.node(ExprKind::ParameterAnd {
            parameter: "flag".into(),
        });
        let x = g.node(ExprKind::literal("x"));
        let seq = g.node(ExprKind::sequence(vec![test, x]));
        let callee = g.add_rule("callee", seq, Span::empty()).unwrap();

        analyze_params(&mut g, &options()).unwrap();

        let rule = &g.rules[callee];
        assert!(rule.accessed_params.contains("flag"));
        assert!(rule.assigned_params.contains("flag"));
        assert!(rule.passed_params.contains("flag"));
        assert!(rule.has_bool_params);
        assert_eq!(
            g.params.get("flag").unwrap().ty,
            Some(ParamType::Boolean)
        );
    }

    #[test]
    fn accessed_but_never_assigned_parameter_is_not_passed() {
        // start = callee; callee = &{flag} "x" — flag is statically its
        // initial value everywhere, so no argument is needed
        let mut g = Grammar::new();
        let call = g.node(ExprKind::rule_ref("callee"));
        g.add_rule("start", call, Span::empty()).unwrap();
        let test = g.node(ExprKind::ParameterAnd {
            parameter: "flag".into(),
        });
        let callee = g.add_rule("callee", test, Span::empty()).unwrap();

        analyze_params(&mut g, &options()).unwrap();

        let rule = &g.rules[callee];
        assert!(rule.accessed_params.contains("flag"));
        assert!(rule.passed_params.is_empty());
        assert!(!rule.has_bool_params);
    }

    #[test]
    fn type_conflict_is_fatal() {
        let mut g = Grammar::new();
        let a = g.node(ExprKind::RuleRef {
            name: "callee".into(),
            assignments: vec![assignment("p", AssignedValue::Boolean(true), false)],
        });
        let b = g.node(ExprKind::RuleRef {
            name: "callee".into(),
            assignments: vec![assignment("p", AssignedValue::Str("s".into()), false)],
        });
        let seq = g.node(ExprKind::sequence(vec![a, b]));
        g.add_rule("start", seq, Span::empty()).unwrap();
        let x = g.node(ExprKind::literal("x"));
        g.add_rule("callee", x, Span::empty()).unwrap();

        assert!(analyze_params(&mut g, &options()).is_err());
    }

    #[test]
    fn more_than_32_boolean_parameters_is_fatal() {
        let mut g = Grammar::new();
        let assignments = (0..33)
            .map(|i| assignment(&format!("b{i}"), AssignedValue::Boolean(true), false))
            .collect();
        let call = g.node(ExprKind::RuleRef {
            name: "callee".into(),
            assignments,
        });
        g.add_rule("start", call, Span::empty()).unwrap();
        let x = g.node(ExprKind::literal("x"));
        g.add_rule("callee", x, Span::empty()).unwrap();

        let err = analyze_params(&mut g, &options()).unwrap_err();
        assert!(err.message.contains("32 boolean parameters"));
    }

    #[test]
    fn increment_keeps_the_previous_value_accessed() {
        // start = callee<n += 1>; callee = lab:<n> "x" — the increment
        // reads n, so the caller still needs to know it
        let mut g = Grammar::new();
        let call = g.node(ExprKind::RuleRef {
            name: "callee".into(),
            assignments: vec![assignment("n", AssignedValue::Increment(1), false)],
        });
        let start = g.add_rule("start", call, Span::empty()).unwrap();
        let lab = g.node(ExprKind::LabeledParam {
            label: "lab".into(),
            parameter: "n".into(),
            is_ref: false,
        });
        let x = g.node(ExprKind::literal("x"));
        let seq = g.node(ExprKind::sequence(vec![lab, x]));
        g.add_rule("callee", seq, Span::empty()).unwrap();

        analyze_params(&mut g, &options()).unwrap();
        assert!(g.rules[start].accessed_params.contains("n"));
    }

    #[test]
    fn reference_capture_forces_passing() {
        // start = callee<r: ref>; callee = lab:<&r> "x" — capturing the
        // live reference counts as a write
        let mut g = Grammar::new();
        let call = g.node(ExprKind::RuleRef {
            name: "callee".into(),
            assignments: vec![assignment("r", AssignedValue::Str("init".into()), true)],
        });
        g.add_rule("start", call, Span::empty()).unwrap();
        let lab = g.node(ExprKind::LabeledParam {
            label: "lab".into(),
            parameter: "r".into(),
            is_ref: true,
        });
        let x = g.node(ExprKind::literal("x"));
        let seq = g.node(ExprKind::sequence(vec![lab, x]));
        let callee = g.add_rule("callee", seq, Span::empty()).unwrap();

        analyze_params(&mut g, &options()).unwrap();

        let rule = &g.rules[callee];
        assert_eq!(g.params.get("r").unwrap().ty, Some(ParamType::Reference));
        assert!(rule.passed_params.contains("r"));
    }
}
