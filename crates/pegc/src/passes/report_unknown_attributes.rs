use crate::{
    error::{GrammarError, Result},
    grammar::Grammar,
    options::CompileOptions,
};

const KNOWN_ATTRIBUTES: &[(&str, &str)] = &[
    ("name", "string"),
    ("inline", "boolean"),
    ("cache", "boolean"),
    ("empty", "boolean"),
    ("unreachable", "boolean"),
    ("pure", "boolean"),
];

/// Checks that all rule attributes are known. Catches typos.
pub fn report_unknown_attributes(grammar: &mut Grammar, _options: &CompileOptions) -> Result<()> {
    for (_, rule) in grammar.iter_live() {
        for attr in &rule.attributes {
            let Some(&(_, expected)) = KNOWN_ATTRIBUTES
                .iter()
                .find(|(name, _)| *name == attr.name)
            else {
                return Err(GrammarError::new(
                    format!(
                        "Rule \"{}\" contains unknown attribute \"{}\"",
                        rule.name, attr.name
                    ),
                    attr.span,
                ));
            };
            if attr.value.type_name() != expected {
                return Err(GrammarError::new(
                    format!(
                        "Rule \"{}\" attribute \"{}\" has {} value but expected {}",
                        rule.name,
                        attr.name,
                        attr.value.type_name(),
                        expected
                    ),
                    attr.span,
                ));
            }
        }
    }
    Ok(())
}
