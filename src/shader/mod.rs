//! Shader compilation
//!
//! WGSL source is compiled to SPIR-V through naga. A profile string in the
//! `<stage>_<major>_<minor>` form (`vs_5_0`, `ps_5_0`, `cs_5_0`) selects the
//! stage, and every stage uses the entry point [`ENTRY_POINT`].

mod reflect;

pub use reflect::*;

use crate::backend::ShaderStage;
use crate::error::{RenderError, RenderResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Entry point every compiled stage must declare
pub const ENTRY_POINT: &str = "main";

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Compiled shader stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    pub stage: ShaderStage,
    pub words: Vec<u32>,
}

impl ShaderBytecode {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Reflect the entry point's inputs and resource bindings
    pub fn reflect(&self) -> RenderResult<ShaderReflection> {
        ShaderReflection::from_spirv(&self.words)
    }
}

/// WGSL to SPIR-V compiler
pub struct ShaderCompiler;

impl ShaderCompiler {
    /// Map a profile such as `vs_5_0` to its stage
    pub fn parse_profile(profile: &str) -> RenderResult<ShaderStage> {
        match profile.split('_').next() {
            Some("vs") => Ok(ShaderStage::Vertex),
            Some("ps") => Ok(ShaderStage::Fragment),
            Some("cs") => Ok(ShaderStage::Compute),
            _ => Err(RenderError::ShaderCompile {
                profile: profile.to_string(),
                message: "unknown profile, expected vs_*, ps_* or cs_*".into(),
            }
            .logged()),
        }
    }

    /// Compile WGSL source for the stage named by `profile`
    pub fn compile(source: &str, profile: &str) -> RenderResult<ShaderBytecode> {
        let stage = Self::parse_profile(profile)?;
        let fail = |message: String| {
            log::error!("Shader compile error ({}): {}", profile, message);
            RenderError::ShaderCompile {
                profile: profile.to_string(),
                message,
            }
        };

        let module =
            naga::front::wgsl::parse_str(source).map_err(|e| fail(e.emit_to_string(source)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = validator
            .validate(&module)
            .map_err(|e| fail(format!("validation error: {e}")))?;

        let naga_stage = match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        };

        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == ENTRY_POINT && ep.stage == naga_stage)
        {
            return Err(fail(format!(
                "entry point '{}' not found for stage {:?}",
                ENTRY_POINT, stage
            )));
        }

        // Clip space stays in WebGPU convention; wgpu consumes the module as-is.
        let options = naga::back::spv::Options {
            lang_version: (1, 0),
            flags: naga::back::spv::WriterFlags::empty(),
            ..Default::default()
        };

        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: naga_stage,
            entry_point: ENTRY_POINT.to_string(),
        };

        let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
            .map_err(|e| fail(format!("SPIR-V generation error: {e}")))?;

        Ok(ShaderBytecode { stage, words })
    }

    /// Read WGSL from disk and compile it
    pub fn compile_from_file(
        path: impl AsRef<Path>,
        profile: &str,
    ) -> RenderResult<ShaderBytecode> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| {
            RenderError::Io {
                path: path.display().to_string(),
                source,
            }
            .logged()
        })?;
        Self::compile(&source, profile)
    }

    /// Load precompiled SPIR-V; the stage comes from its entry point
    pub fn read_bytecode(path: impl AsRef<Path>) -> RenderResult<ShaderBytecode> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| {
            RenderError::Io {
                path: path.display().to_string(),
                source,
            }
            .logged()
        })?;
        Self::from_spirv_bytes(&bytes)
    }

    /// Interpret raw bytes as a SPIR-V module
    pub fn from_spirv_bytes(bytes: &[u8]) -> RenderResult<ShaderBytecode> {
        if bytes.len() % 4 != 0 || bytes.len() < 20 {
            return Err(RenderError::Reflection(format!(
                "SPIR-V blob of {} bytes is not a whole number of words",
                bytes.len()
            ))
            .logged());
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        if words[0] != SPIRV_MAGIC {
            return Err(
                RenderError::Reflection(format!("bad SPIR-V magic {:#010x}", words[0])).logged(),
            );
        }
        let stage = ShaderReflection::from_spirv(&words)?.stage;
        Ok(ShaderBytecode { stage, words })
    }
}

/// Compiled shaders keyed by (source path, profile)
#[derive(Default)]
pub struct ShaderLibrary {
    cache: HashMap<(PathBuf, String), ShaderBytecode>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a file once and reuse the bytecode afterwards
    pub fn load(&mut self, path: impl AsRef<Path>, profile: &str) -> RenderResult<ShaderBytecode> {
        let key = (path.as_ref().to_path_buf(), profile.to_string());
        if let Some(bytecode) = self.cache.get(&key) {
            return Ok(bytecode.clone());
        }
        let bytecode = ShaderCompiler::compile_from_file(&key.0, profile)?;
        self.cache.insert(key, bytecode.clone());
        Ok(bytecode)
    }

    /// Compile embedded source registered under a virtual path
    pub fn load_embedded(
        &mut self,
        path: &str,
        source: &str,
        profile: &str,
    ) -> RenderResult<ShaderBytecode> {
        let key = (PathBuf::from(path), profile.to_string());
        if let Some(bytecode) = self.cache.get(&key) {
            return Ok(bytecode.clone());
        }
        let bytecode = ShaderCompiler::compile(source, profile)?;
        log::debug!("Compiled {} ({})", path, profile);
        self.cache.insert(key, bytecode.clone());
        Ok(bytecode)
    }

    pub fn contains(&self, path: impl AsRef<Path>, profile: &str) -> bool {
        self.cache
            .contains_key(&(path.as_ref().to_path_buf(), profile.to_string()))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOLID_PS: &str = r#"
@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 1.0, 1.0);
}
"#;

    #[test]
    fn profiles_map_to_stages() {
        assert_eq!(ShaderCompiler::parse_profile("vs_5_0").unwrap(), ShaderStage::Vertex);
        assert_eq!(ShaderCompiler::parse_profile("ps_5_0").unwrap(), ShaderStage::Fragment);
        assert_eq!(ShaderCompiler::parse_profile("cs_5_0").unwrap(), ShaderStage::Compute);
        assert!(ShaderCompiler::parse_profile("gs_5_0").is_err());
    }

    #[test]
    fn compile_produces_spirv() {
        let bytecode = ShaderCompiler::compile(SOLID_PS, "ps_5_0").unwrap();
        assert_eq!(bytecode.stage, ShaderStage::Fragment);
        assert_eq!(bytecode.words[0], SPIRV_MAGIC);
    }

    #[test]
    fn wrong_stage_is_a_compile_error() {
        let err = ShaderCompiler::compile(SOLID_PS, "vs_5_0").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = ShaderCompiler::compile("fn main( {", "ps_5_0").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
    }

    #[test]
    fn bytecode_round_trips_through_bytes() {
        let bytecode = ShaderCompiler::compile(SOLID_PS, "ps_5_0").unwrap();
        let loaded = ShaderCompiler::from_spirv_bytes(bytecode.as_bytes()).unwrap();
        assert_eq!(loaded, bytecode);
    }

    #[test]
    fn truncated_bytecode_is_rejected() {
        let bytecode = ShaderCompiler::compile(SOLID_PS, "ps_5_0").unwrap();
        let bytes = bytecode.as_bytes();
        assert!(ShaderCompiler::from_spirv_bytes(&bytes[..bytes.len() - 2]).is_err());
        assert!(ShaderCompiler::from_spirv_bytes(&[0u8; 24]).is_err());
    }

    #[test]
    fn library_caches_by_path_and_profile() {
        let mut library = ShaderLibrary::new();
        let a = library.load_embedded("solid.wgsl", SOLID_PS, "ps_5_0").unwrap();
        let b = library.load_embedded("solid.wgsl", "not wgsl", "ps_5_0").unwrap();
        assert_eq!(a, b);
        assert_eq!(library.len(), 1);
        assert!(library.contains("solid.wgsl", "ps_5_0"));
        assert!(!library.contains("solid.wgsl", "ps_4_0"));
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("render-core-{}-{name}", std::process::id()))
    }

    #[test]
    fn compile_from_file_reads_wgsl() {
        let path = scratch_path("solid.wgsl");
        std::fs::write(&path, SOLID_PS).unwrap();

        let bytecode = ShaderCompiler::compile_from_file(&path, "ps_5_0").unwrap();
        assert_eq!(bytecode, ShaderCompiler::compile(SOLID_PS, "ps_5_0").unwrap());

        std::fs::remove_file(&path).unwrap();
        let err = ShaderCompiler::compile_from_file(&path, "ps_5_0").unwrap_err();
        assert!(matches!(err, RenderError::Io { .. }));
    }

    #[test]
    fn read_bytecode_recovers_stage_from_disk() {
        let path = scratch_path("solid.spv");
        let bytecode = ShaderCompiler::compile(SOLID_PS, "ps_5_0").unwrap();
        std::fs::write(&path, bytecode.as_bytes()).unwrap();

        let loaded = ShaderCompiler::read_bytecode(&path).unwrap();
        assert_eq!(loaded.stage, ShaderStage::Fragment);
        assert_eq!(loaded, bytecode);

        std::fs::write(&path, [0u8; 7]).unwrap();
        let err = ShaderCompiler::read_bytecode(&path).unwrap_err();
        assert!(matches!(err, RenderError::Reflection(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn library_load_compiles_a_file_once() {
        let path = scratch_path("library.wgsl");
        std::fs::write(&path, SOLID_PS).unwrap();

        let mut library = ShaderLibrary::new();
        let first = library.load(&path, "ps_5_0").unwrap();
        assert!(library.contains(&path, "ps_5_0"));

        // Served from the cache once the file is gone
        std::fs::remove_file(&path).unwrap();
        let second = library.load(&path, "ps_5_0").unwrap();
        assert_eq!(first, second);
        assert_eq!(library.len(), 1);

        assert!(library.load(&path, "ps_4_0").is_err());
        assert!(!library.contains(&path, "ps_4_0"));
    }
}
