use std::collections::HashMap;

use cranelift_entity::{entity_impl, EntitySet, PrimaryMap, SecondaryMap};

use crate::{
    charset::ClassNode,
    error::{GrammarError, Result},
    span::Span,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleHandle(u32);

entity_impl!(RuleHandle);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ExprHandle(u32);

entity_impl!(ExprHandle);

#[derive(Clone, PartialEq, Debug)]
pub enum AttributeValue {
    Boolean(bool),
    Str(String),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Str(_) => "string",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
    pub span: Span,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ParamType {
    Boolean,
    Integer,
    Str,
    Reference,
}

impl ParamType {
    pub fn name(self) -> &'static str {
        match self {
            ParamType::Boolean => "boolean",
            ParamType::Integer => "integer",
            ParamType::Str => "string",
            ParamType::Reference => "reference",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub name: String,
    /// None until an assignment pins the type; a parameter that is only
    /// ever tested stays typeless, and asking for its initial value is an
    /// internal compiler error.
    pub ty: Option<ParamType>,
    /// Bit position in the packed boolean mask, for boolean parameters.
    pub bool_index: Option<u32>,
}

/// Grammar-wide parameter registry. Every parameter name has exactly one
/// type; boolean parameters share one 32-bit mask.
#[derive(Default)]
pub struct ParamTable {
    infos: HashMap<String, ParamInfo>,
    bool_count: u32,
}

impl ParamTable {
    pub fn register(&mut self, name: &str, ty: ParamType, span: Span) -> Result<()> {
        let info = self.entry(name);
        match info.ty {
            Some(existing) if existing != ty => {
                return Err(GrammarError::new(
                    format!("Type conflict in parameter {name}"),
                    span,
                ));
            }
            Some(_) => return Ok(()),
            None => {}
        }
        let bool_index = match ty {
            ParamType::Boolean => {
                if self.bool_count > 31 {
                    return Err(GrammarError::new(
                        "A maximum of 32 boolean parameters may be defined",
                        span,
                    ));
                }
                let index = self.bool_count;
                self.bool_count += 1;
                Some(index)
            }
            _ => None,
        };
        let info = self.entry(name);
        info.ty = Some(ty);
        info.bool_index = bool_index;
        Ok(())
    }

    /// Record that a parameter exists without pinning its type.
    pub fn entry(&mut self, name: &str) -> &mut ParamInfo {
        self.infos
            .entry(name.to_owned())
            .or_insert_with(|| ParamInfo {
                name: name.to_owned(),
                ty: None,
                bool_index: None,
            })
    }
    pub fn get(&self, name: &str) -> Option<&ParamInfo> {
        self.infos.get(name)
    }
    pub fn expect(&self, name: &str) -> &ParamInfo {
        self.infos
            .get(name)
            .unwrap_or_else(|| panic!("Parameter {name} was never registered"))
    }
}

/// The value on the right-hand side of a `rule<param = value>` assignment.
#[derive(Clone, PartialEq, Debug)]
pub enum AssignedValue {
    Boolean(bool),
    Integer(i64),
    Str(String),
    /// `param += n`, reading the current value of the parameter.
    Increment(i64),
}

impl AssignedValue {
    pub fn param_type(&self, is_ref: bool) -> ParamType {
        if is_ref {
            return ParamType::Reference;
        }
        match self {
            AssignedValue::Boolean(_) => ParamType::Boolean,
            AssignedValue::Integer(_) => ParamType::Integer,
            AssignedValue::Str(_) => ParamType::Str,
            AssignedValue::Increment(_) => ParamType::Integer,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Assignment {
    pub name: String,
    pub value: AssignedValue,
    pub is_ref: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    RuleRef {
        name: String,
        assignments: Vec<Assignment>,
    },
    Named {
        name: String,
        expr: ExprHandle,
    },
    Choice {
        alternatives: Vec<ExprHandle>,
    },
    Action {
        expr: ExprHandle,
        code: String,
        pure: bool,
    },
    Sequence {
        elements: Vec<ExprHandle>,
        /// Index of the element whose value the sequence yields, if any.
        picked: Option<u32>,
    },
    Labeled {
        label: String,
        expr: ExprHandle,
    },
    LabeledParam {
        label: String,
        parameter: String,
        is_ref: bool,
    },
    Text {
        expr: ExprHandle,
    },
    SimpleAnd {
        expr: ExprHandle,
        /// Set when this assertion was synthesised as a FIRST-set guard for
        /// the named rule.
        first_set_of: Option<String>,
    },
    SimpleNot {
        expr: ExprHandle,
    },
    Optional {
        expr: ExprHandle,
    },
    ZeroOrMore {
        expr: ExprHandle,
    },
    OneOrMore {
        expr: ExprHandle,
    },
    SemanticAnd {
        code: String,
    },
    SemanticNot {
        code: String,
    },
    ParameterAnd {
        parameter: String,
    },
    ParameterNot {
        parameter: String,
    },
    Literal {
        value: String,
        ignore_case: bool,
    },
    Class {
        class: ClassNode,
        /// Human readable form for failure expectations, e.g. `[a-z]`.
        raw: String,
    },
    Any,
}

impl ExprKind {
    pub fn simple_and(expr: ExprHandle) -> ExprKind {
        ExprKind::SimpleAnd {
            expr,
            first_set_of: None,
        }
    }
    pub fn literal(value: impl Into<String>) -> ExprKind {
        ExprKind::Literal {
            value: value.into(),
            ignore_case: false,
        }
    }
    pub fn rule_ref(name: impl Into<String>) -> ExprKind {
        ExprKind::RuleRef {
            name: name.into(),
            assignments: Vec::new(),
        }
    }
    pub fn sequence(elements: Vec<ExprHandle>) -> ExprKind {
        ExprKind::Sequence {
            elements,
            picked: None,
        }
    }
    pub fn choice(alternatives: Vec<ExprHandle>) -> ExprKind {
        ExprKind::Choice { alternatives }
    }
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// A grammar rule together with the facts the analysis passes attach to it.
pub struct Rule {
    pub name: String,
    pub span: Span,
    pub expr: ExprHandle,
    pub attributes: Vec<Attribute>,
    /// Tombstone set by proxy removal / inlining instead of shrinking the
    /// arena.
    pub removed: bool,

    // analyze_first
    pub nullable: bool,
    pub first_set: Option<ClassNode>,
    // analyze_always_match
    pub always_match: bool,
    // optimize_failure_reporting; stays true when the pass does not run
    pub reports_failure: bool,
    // analyze_params
    pub accessed_params: std::collections::BTreeSet<String>,
    pub assigned_params: std::collections::BTreeSet<String>,
    pub passed_params: std::collections::BTreeSet<String>,
    pub has_bool_params: bool,
}

impl Rule {
    fn new(name: String, expr: ExprHandle, span: Span) -> Rule {
        Rule {
            name,
            span,
            expr,
            attributes: Vec::new(),
            removed: false,
            nullable: false,
            first_set: None,
            always_match: false,
            reports_failure: true,
            accessed_params: Default::default(),
            assigned_params: Default::default(),
            passed_params: Default::default(),
            has_bool_params: false,
        }
    }
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
    pub fn attribute_bool(&self, name: &str, default: bool) -> bool {
        match self.attribute(name).map(|attr| &attr.value) {
            Some(&AttributeValue::Boolean(value)) => value,
            _ => default,
        }
    }
}

/// The grammar AST. Expressions live in one arena addressed by stable
/// handles; passes rewrite nodes by overwriting their arena slot, so facts
/// cached per handle stay valid across rewrites of unrelated nodes.
pub struct Grammar {
    pub rules: PrimaryMap<RuleHandle, Rule>,
    exprs: PrimaryMap<ExprHandle, Expr>,
    by_name: HashMap<String, RuleHandle>,

    /// Grammar-wide parameter registry, filled by analyze_params.
    pub params: ParamTable,
    /// Per-node always-match facts on sequence elements and actions,
    /// filled by analyze_always_match.
    pub always_match: SecondaryMap<ExprHandle, Option<bool>>,
    /// Top level user code block copied into the generated parser.
    pub initializer: Option<String>,
    /// Output of the generate stage.
    pub code: Option<String>,
}

impl Grammar {
    pub fn new() -> Grammar {
        Grammar {
            rules: PrimaryMap::new(),
            exprs: PrimaryMap::new(),
            by_name: HashMap::new(),
            params: ParamTable::default(),
            always_match: SecondaryMap::new(),
            initializer: None,
            code: None,
        }
    }

    pub fn add(&mut self, kind: ExprKind, span: Span) -> ExprHandle {
        self.exprs.push(Expr { kind, span })
    }

    /// Convenience constructor for programmatically built grammars.
    pub fn node(&mut self, kind: ExprKind) -> ExprHandle {
        self.add(kind, Span::empty())
    }

    pub fn add_rule(
        &mut self,
        name: impl Into<String>,
        expr: ExprHandle,
        span: Span,
    ) -> Result<RuleHandle> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(GrammarError::new(format!("Duplicate rule {name}"), span));
        }
        let handle = self.rules.push(Rule::new(name.clone(), expr, span));
        self.by_name.insert(name, handle);
        Ok(handle)
    }

    pub fn find_rule(&self, name: &str) -> Option<RuleHandle> {
        let handle = *self.by_name.get(name)?;
        if self.rules[handle].removed {
            return None;
        }
        Some(handle)
    }

    pub fn expect_rule(&self, name: &str, span: Span) -> Result<RuleHandle> {
        self.find_rule(name)
            .ok_or_else(|| GrammarError::new(format!("Unknown rule {name}"), span))
    }

    pub fn remove_rule(&mut self, handle: RuleHandle) {
        let rule = &mut self.rules[handle];
        rule.removed = true;
        self.by_name.remove(&rule.name);
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (RuleHandle, &Rule)> {
        self.rules.iter().filter(|(_, rule)| !rule.removed)
    }

    pub fn live_handles(&self) -> Vec<RuleHandle> {
        self.iter_live().map(|(handle, _)| handle).collect()
    }

    pub fn expr(&self, handle: ExprHandle) -> &Expr {
        &self.exprs[handle]
    }

    pub fn kind(&self, handle: ExprHandle) -> &ExprKind {
        &self.exprs[handle].kind
    }

    pub fn kind_mut(&mut self, handle: ExprHandle) -> &mut ExprKind {
        &mut self.exprs[handle].kind
    }

    pub fn span_of(&self, handle: ExprHandle) -> Span {
        self.exprs[handle].span
    }

    /// Overwrite the contents of an arena slot, keeping the handle stable.
    pub fn replace(&mut self, handle: ExprHandle, kind: ExprKind) {
        self.exprs[handle].kind = kind;
    }

    /// Structural children of a node; `rule_ref` edges are not followed.
    pub fn children(&self, handle: ExprHandle) -> Vec<ExprHandle> {
        match self.kind(handle) {
            ExprKind::Choice { alternatives } => alternatives.clone(),
            ExprKind::Sequence { elements, .. } => elements.clone(),
            ExprKind::Named { expr, .. }
            | ExprKind::Action { expr, .. }
            | ExprKind::Labeled { expr, .. }
            | ExprKind::Text { expr }
            | ExprKind::SimpleAnd { expr, .. }
            | ExprKind::SimpleNot { expr }
            | ExprKind::Optional { expr }
            | ExprKind::ZeroOrMore { expr }
            | ExprKind::OneOrMore { expr } => vec![*expr],
            ExprKind::RuleRef { .. }
            | ExprKind::LabeledParam { .. }
            | ExprKind::SemanticAnd { .. }
            | ExprKind::SemanticNot { .. }
            | ExprKind::ParameterAnd { .. }
            | ExprKind::ParameterNot { .. }
            | ExprKind::Literal { .. }
            | ExprKind::Class { .. }
            | ExprKind::Any => vec![],
        }
    }

    /// Preorder walk of one rule body, not following rule references.
    pub fn visit(&self, root: ExprHandle, f: &mut dyn FnMut(&Grammar, ExprHandle)) {
        f(self, root);
        for child in self.children(root) {
            self.visit(child, f);
        }
    }

    /// Recursively copy a subtree into fresh arena slots.
    pub fn deep_copy(&mut self, handle: ExprHandle) -> ExprHandle {
        let expr = self.exprs[handle].clone();
        let kind = match expr.kind {
            ExprKind::Choice { alternatives } => ExprKind::Choice {
                alternatives: alternatives
                    .into_iter()
                    .map(|alt| self.deep_copy(alt))
                    .collect(),
            },
            ExprKind::Sequence { elements, picked } => ExprKind::Sequence {
                elements: elements
                    .into_iter()
                    .map(|el| self.deep_copy(el))
                    .collect(),
                picked,
            },
            ExprKind::Named { name, expr } => ExprKind::Named {
                name,
                expr: self.deep_copy(expr),
            },
            ExprKind::Action { expr, code, pure } => ExprKind::Action {
                expr: self.deep_copy(expr),
                code,
                pure,
            },
            ExprKind::Labeled { label, expr } => ExprKind::Labeled {
                label,
                expr: self.deep_copy(expr),
            },
            ExprKind::Text { expr } => ExprKind::Text {
                expr: self.deep_copy(expr),
            },
            ExprKind::SimpleAnd { expr, first_set_of } => ExprKind::SimpleAnd {
                expr: self.deep_copy(expr),
                first_set_of,
            },
            ExprKind::SimpleNot { expr } => ExprKind::SimpleNot {
                expr: self.deep_copy(expr),
            },
            ExprKind::Optional { expr } => ExprKind::Optional {
                expr: self.deep_copy(expr),
            },
            ExprKind::ZeroOrMore { expr } => ExprKind::ZeroOrMore {
                expr: self.deep_copy(expr),
            },
            ExprKind::OneOrMore { expr } => ExprKind::OneOrMore {
                expr: self.deep_copy(expr),
            },
            leaf @ (ExprKind::RuleRef { .. }
            | ExprKind::LabeledParam { .. }
            | ExprKind::SemanticAnd { .. }
            | ExprKind::SemanticNot { .. }
            | ExprKind::ParameterAnd { .. }
            | ExprKind::ParameterNot { .. }
            | ExprKind::Literal { .. }
            | ExprKind::Class { .. }
            | ExprKind::Any) => leaf,
        };
        self.exprs.push(Expr {
            kind,
            span: expr.span,
        })
    }
}

impl Default for Grammar {
    fn default() -> Self {
        Grammar::new()
    }
}

/// Memo shared between nullability queries. Rules currently being computed
/// conservatively answer "not nullable", which breaks cycles in recursive
/// grammars.
pub struct NullableMemo {
    rules: SecondaryMap<RuleHandle, Option<bool>>,
    in_progress: EntitySet<RuleHandle>,
}

impl NullableMemo {
    pub fn new() -> NullableMemo {
        NullableMemo {
            rules: SecondaryMap::new(),
            in_progress: EntitySet::new(),
        }
    }
    pub fn rule_result(&self, handle: RuleHandle) -> Option<bool> {
        self.rules[handle]
    }
}

impl Default for NullableMemo {
    fn default() -> Self {
        NullableMemo::new()
    }
}

/// Can this expression match while consuming zero input characters?
pub fn matches_empty(grammar: &Grammar, handle: ExprHandle, memo: &mut NullableMemo) -> bool {
    match grammar.kind(handle) {
        ExprKind::RuleRef { name, .. } => {
            let rule = match grammar.find_rule(name) {
                Some(rule) => rule,
                None => return false,
            };
            rule_matches_empty(grammar, rule, memo)
        }
        ExprKind::Choice { alternatives } => alternatives
            .iter()
            .any(|alt| matches_empty(grammar, *alt, memo)),
        ExprKind::Sequence { elements, .. } => elements
            .iter()
            .all(|el| matches_empty(grammar, *el, memo)),
        ExprKind::Named { expr, .. }
        | ExprKind::Action { expr, .. }
        | ExprKind::Labeled { expr, .. }
        | ExprKind::Text { expr }
        | ExprKind::OneOrMore { expr } => matches_empty(grammar, *expr, memo),
        ExprKind::SimpleAnd { .. }
        | ExprKind::SimpleNot { .. }
        | ExprKind::Optional { .. }
        | ExprKind::ZeroOrMore { .. }
        | ExprKind::SemanticAnd { .. }
        | ExprKind::SemanticNot { .. }
        | ExprKind::ParameterAnd { .. }
        | ExprKind::ParameterNot { .. }
        | ExprKind::LabeledParam { .. } => true,
        ExprKind::Literal { value, .. } => value.is_empty(),
        ExprKind::Class { .. } | ExprKind::Any => false,
    }
}

pub fn rule_matches_empty(
    grammar: &Grammar,
    handle: RuleHandle,
    memo: &mut NullableMemo,
) -> bool {
    if let Some(cached) = memo.rules[handle] {
        return cached;
    }
    if memo.in_progress.contains(handle) {
        return false;
    }
    memo.in_progress.insert(handle);
    let result = matches_empty(grammar, grammar.rules[handle].expr, memo);
    memo.rules[handle] = Some(result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar_with(build: impl FnOnce(&mut Grammar) -> ExprHandle) -> (Grammar, RuleHandle) {
        let mut g = Grammar::new();
        let expr = build(&mut g);
        let rule = g.add_rule("start", expr, Span::empty()).unwrap();
        (g, rule)
    }

    #[test]
    fn empty_literal_is_nullable() {
        let (g, rule) = grammar_with(|g| g.node(ExprKind::literal("")));
        let mut memo = NullableMemo::new();
        assert!(rule_matches_empty(&g, rule, &mut memo));
    }

    #[test]
    fn class_is_not_nullable() {
        let (g, rule) = grammar_with(|g| g.node(ExprKind::Any));
        let mut memo = NullableMemo::new();
        assert!(!rule_matches_empty(&g, rule, &mut memo));
    }

    #[test]
    fn cyclic_rules_terminate() {
        // a = b; b = a / "x"
        let mut g = Grammar::new();
        let ref_b = g.node(ExprKind::rule_ref("b"));
        let a = g.add_rule("a", ref_b, Span::empty()).unwrap();
        let ref_a = g.node(ExprKind::rule_ref("a"));
        let x = g.node(ExprKind::literal("x"));
        let choice = g.node(ExprKind::choice(vec![ref_a, x]));
        g.add_rule("b", choice, Span::empty()).unwrap();

        let mut memo = NullableMemo::new();
        assert!(!rule_matches_empty(&g, a, &mut memo));
    }

    #[test]
    fn optional_sequence_is_nullable() {
        let (g, rule) = grammar_with(|g| {
            let lit = g.node(ExprKind::literal("x"));
            let opt = g.node(ExprKind::Optional { expr: lit });
            let star = {
                let lit = g.node(ExprKind::literal("y"));
                g.node(ExprKind::ZeroOrMore { expr: lit })
            };
            g.node(ExprKind::sequence(vec![opt, star]))
        });
        let mut memo = NullableMemo::new();
        assert!(rule_matches_empty(&g, rule, &mut memo));
    }

    #[test]
    fn deep_copy_is_structural() {
        let mut g = Grammar::new();
        let lit = g.node(ExprKind::literal("x"));
        let seq = g.node(ExprKind::sequence(vec![lit]));
        let copy = g.deep_copy(seq);
        assert_ne!(copy, seq);
        match g.kind(copy) {
            ExprKind::Sequence { elements, .. } => {
                assert_eq!(elements.len(), 1);
                assert_ne!(elements[0], lit);
            }
            _ => panic!("expected sequence"),
        }
    }
}
