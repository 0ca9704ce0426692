/// Which output language the generator targets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Language {
    Javascript,
    Php,
}

/// Heuristic knob consumed only by the target adapter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Optimize {
    Speed,
    Size,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Output {
    /// Return generated source text.
    Source,
    /// Return an invokable artifact. Only meaningful for a host that can
    /// load the emitted language; rejected by this library.
    Parser,
}

/// Where FIRST-set guards are inserted, if anywhere.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FirstSetMode {
    /// Do not run the analysis at all.
    None,
    /// Annotate rules, do not rewrite.
    Analyze,
    /// Prefix every call site of a non-nullable rule with `&firstSet`.
    Call,
    /// Prefix the rule definitions instead.
    Def,
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Rules usable as parse entry points. Defaults to the first rule.
    pub allowed_start_rules: Vec<String>,
    /// Rules usable for incremental, iterator-style output.
    pub allowed_stream_rules: Vec<String>,
    /// Wrap rule bodies with packrat memoization.
    pub cache: bool,
    /// Wrap every rule call with enter/match/fail event emission.
    pub trace: bool,
    pub optimize: Optimize,
    pub output: Output,
    pub language: Language,
    pub no_inlining: bool,
    pub optimize_first_set: FirstSetMode,
    pub no_optimize_character_class: bool,
    pub no_always_match: bool,
    /// Permit a choice alternative after an always-matching one.
    pub allow_useless_choice: bool,
    /// Suppress the infinite-loop check.
    pub allow_loops: bool,
    /// Treat actions as pure unless a rule says otherwise.
    pub optimize_pure_actions: bool,
    /// Suppress case-insensitive matches between ASCII and non-ASCII
    /// characters, mirroring runtimes whose native matching does the same.
    pub caseless_restrict: bool,
    /// Apply the common-subset-language rewrite to embedded user code.
    pub common_lang: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            allowed_start_rules: Vec::new(),
            allowed_stream_rules: Vec::new(),
            cache: false,
            trace: false,
            optimize: Optimize::Speed,
            output: Output::Source,
            language: Language::Javascript,
            no_inlining: false,
            optimize_first_set: FirstSetMode::Call,
            no_optimize_character_class: false,
            no_always_match: false,
            allow_useless_choice: false,
            allow_loops: false,
            optimize_pure_actions: false,
            caseless_restrict: false,
            common_lang: false,
        }
    }
}

impl CompileOptions {
    /// Start and stream rules together: the roots every whole-graph
    /// analysis starts from.
    pub fn entry_rules(&self) -> impl Iterator<Item = &str> {
        self.allowed_start_rules
            .iter()
            .chain(self.allowed_stream_rules.iter())
            .map(String::as_str)
    }
}
