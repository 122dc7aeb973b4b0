#[cfg(feature = "embed-shaders")]
fn main() {
    use std::{env, fs, path::PathBuf};

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let src = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("../../shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (file, kind) in [
        ("triangle.vert", shaderc::ShaderKind::Vertex),
        ("triangle.frag", shaderc::ShaderKind::Fragment),
    ] {
        let path = src.join(file);
        println!("cargo:rerun-if-changed={}", path.display());
        let glsl = fs::read_to_string(&path).unwrap();
        let spv = comp
            .compile_into_spirv(&glsl, kind, file, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{file}.spv")), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rerun-if-changed=build.rs");
}

// SPIR-V is read from `render.shader_dir` at runtime.
#[cfg(not(feature = "embed-shaders"))]
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
}
