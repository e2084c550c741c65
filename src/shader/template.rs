//! Permutation Synthesis
//!
//! A permutation is the stage source with a generated preamble prepended and
//! the body rendered through `minijinja`, using the define set as context.
//! The template syntax keeps WGSL braces untouched:
//!
//! | Construct | Syntax |
//! |-----------|--------|
//! | Block | `{$ if USE_FOG $} ... {$ endif $}` |
//! | Line statement | `$$ if USE_FOG` |
//! | Expression | `{{ MAX_LIGHTS }}` |
//!
//! Undefined names are falsy in conditions but an error when printed.

use std::fmt::Write as _;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};

use super::defines::ShaderDefines;
use crate::errors::Result;

/// Template environment shared by every program of one shader cache.
pub struct ShaderTemplates {
    env: Environment<'static>,
}

impl ShaderTemplates {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        let syntax = SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()?;
        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(UndefinedBehavior::SemiStrict);
        Ok(Self { env })
    }

    /// Produces the full code of one stage permutation.
    pub fn synthesize(&self, source: &str, defines: &ShaderDefines) -> Result<String> {
        let context = defines.to_map();
        let body = self.env.render_str(source, &context)?;
        Ok(format!("{}{body}", preamble(defines)))
    }
}

/// Comment header listing the active defines, one per line.
#[must_use]
pub fn preamble(defines: &ShaderDefines) -> String {
    let mut header = String::from("// --- permutation ---\n");
    for (name, value) in defines.to_map() {
        let _ = writeln!(header, "// #define {name} {value}");
    }
    header.push_str("// -------------------\n");
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
$$ if USE_FOG
let fog = true;
$$ endif
const LIGHTS: u32 = {{ MAX_LIGHTS }}u;
";

    #[test]
    fn test_defines_select_code() {
        let templates = ShaderTemplates::new().unwrap();
        let fog = ShaderDefines::new().with("USE_FOG", "1").with("MAX_LIGHTS", "4");
        let plain = ShaderDefines::new().with("MAX_LIGHTS", "2");

        let with_fog = templates.synthesize(SOURCE, &fog).unwrap();
        let without = templates.synthesize(SOURCE, &plain).unwrap();

        assert!(with_fog.contains("let fog = true;"));
        assert!(with_fog.contains("const LIGHTS: u32 = 4u;"));
        assert!(with_fog.contains("// #define USE_FOG 1"));
        assert!(!without.contains("fog"));
        assert!(without.contains("const LIGHTS: u32 = 2u;"));
    }

    #[test]
    fn test_printing_undefined_is_an_error() {
        let templates = ShaderTemplates::new().unwrap();
        assert!(templates.synthesize(SOURCE, &ShaderDefines::new()).is_err());
    }

    #[test]
    fn test_wgsl_braces_pass_through() {
        let templates = ShaderTemplates::new().unwrap();
        let code = templates
            .synthesize("fn main() { let v = vec2(0.0); }", &ShaderDefines::new())
            .unwrap();
        assert!(code.ends_with("fn main() { let v = vec2(0.0); }"));
    }
}
