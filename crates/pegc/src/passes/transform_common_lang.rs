use crate::{
    error::Result,
    grammar::{ExprHandle, ExprKind, Grammar},
    options::{CompileOptions, Language},
};

/// A few textual rewrites which let one grammar file embed user code in a
/// common subset of the supported target languages. Only used for grammars
/// that are deliberately written that way; off by default.
pub fn transform_common_lang(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    if !options.common_lang {
        return Ok(());
    }

    if let Some(init) = grammar.initializer.take() {
        if !is_excluded(&init, options.language) {
            grammar.initializer = Some(transform(&init, options.language));
        }
    }

    for handle in grammar.live_handles() {
        rewrite(grammar, grammar.rules[handle].expr, options.language);
    }
    Ok(())
}

fn rewrite(grammar: &mut Grammar, expr: ExprHandle, language: Language) {
    match grammar.kind_mut(expr) {
        ExprKind::Action { code, .. }
        | ExprKind::SemanticAnd { code }
        | ExprKind::SemanticNot { code } => {
            *code = transform(code, language);
        }
        _ => {}
    }
    for child in grammar.children(expr) {
        rewrite(grammar, child, language);
    }
}

/// Strip the PHP-isms when emitting JavaScript: `$this->` member access and
/// `$` variable sigils.
fn transform(code: &str, language: Language) -> String {
    if language != Language::Javascript {
        return code.to_owned();
    }
    let code = code.replace("$this->", "");
    let mut result = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    continue;
                }
            }
        }
        result.push(c);
    }
    result
}

/// An initializer starting with a `// PHP` or `// JavaScript` comment is
/// meant for that language only.
fn is_excluded(code: &str, language: Language) -> bool {
    let trimmed = code.trim_start_matches([' ', '\t', '\n']);
    let Some(comment) = trimmed.strip_prefix("//") else {
        return false;
    };
    let tag: String = comment
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match language {
        Language::Javascript => tag == "php",
        Language::Php => tag == "javascript" || tag == "js",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn strips_php_sigils_for_javascript() {
        let mut g = Grammar::new();
        let x = g.node(ExprKind::literal("x"));
        let action = g.node(ExprKind::Action {
            expr: x,
            code: "return $this->count + $value;".into(),
            pure: false,
        });
        g.add_rule("start", action, Span::empty()).unwrap();

        let options = CompileOptions {
            common_lang: true,
            ..Default::default()
        };
        transform_common_lang(&mut g, &options).unwrap();
        match g.kind(action) {
            ExprKind::Action { code, .. } => assert_eq!(code, "return count + value;"),
            _ => panic!("expected action"),
        }
    }

    #[test]
    fn php_only_initializer_is_dropped_for_javascript() {
        let mut g = Grammar::new();
        let x = g.node(ExprKind::literal("x"));
        g.add_rule("start", x, Span::empty()).unwrap();
        g.initializer = Some("// PHP\n$x = 1;".into());

        let options = CompileOptions {
            common_lang: true,
            ..Default::default()
        };
        transform_common_lang(&mut g, &options).unwrap();
        assert!(g.initializer.is_none());
    }
}
