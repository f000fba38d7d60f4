//! The compilation pipeline: source text in, loadable executable out.

use crate::{
    analyze::analyze,
    bytecode::Executable,
    error::CompileError,
    parse::parse,
    registry::Registry,
};

/// Per-compilation settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Runtime budget decremented on every loop iteration; zero disables the
    /// counter entirely (and statically endless loops become compile errors).
    pub max_loop_counter: u32,
    /// Record source lines in the emitted debug table.
    pub debug_info: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_loop_counter: 10_000,
            debug_info: true,
        }
    }
}

/// Compiles a script: parse, analyze, desugar, emit.
///
/// The registry is an explicit input: one frozen registry serves any number
/// of concurrent compilations. `name` becomes the executable's class name.
pub fn compile(registry: &Registry, name: &str, source: &str, settings: &Settings) -> Result<Executable, CompileError> {
    let script = parse(source, registry)?;
    let analyzed = analyze(registry, settings, &script)?;
    crate::emit::emit(&analyzed, settings, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::catalog::default_registry;

    #[test]
    fn test_compile_produces_a_loadable_unit() {
        let registry = default_registry().unwrap();
        let exe = compile(&registry, "smoke", "return 1 + 2;", &Settings::default()).unwrap();
        assert_eq!(exe.class_name.as_ref(), "Script$smoke");
        assert!(!exe.needs_score);
        let bytes = exe.to_bytes().unwrap();
        assert_eq!(Executable::from_bytes(&bytes).unwrap(), exe);
    }

    #[test]
    fn test_needs_score_marker() {
        let registry = default_registry().unwrap();
        let exe = compile(&registry, "s", "return _score * 2;", &Settings::default()).unwrap();
        assert!(exe.needs_score);
    }

    #[test]
    fn test_lambda_synthetics_are_appended() {
        let registry = default_registry().unwrap();
        let exe = compile(
            &registry,
            "s",
            "List xs = [1, 2, 3]; return xs.stream().mapToInt(x -> x * x).sum();",
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(exe.functions.len(), 1);
        assert!(exe.functions[0].name.starts_with("lambda$"));
    }
}
