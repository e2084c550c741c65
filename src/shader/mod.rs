//! Shader Programs
//!
//! | Module | Contents |
//! |--------|----------|
//! | `program` | Program descriptors, the resident program resource |
//! | `defines` | [`ShaderDefines`], the permutation key |
//! | `template` | Preamble and `minijinja` permutation synthesis |
//! | `cache` | [`ShaderCache`]: variant resolution and hot reload |

mod cache;
mod defines;
mod program;
mod template;

pub use cache::ShaderCache;
pub use defines::ShaderDefines;
pub use program::{
    LoadedStage, ProgramDescriptor, Programs, ShaderProgram, ShaderStage, SourceKind,
    StageSource, Variant,
};
pub use template::{ShaderTemplates, preamble};
