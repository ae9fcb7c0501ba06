// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("shaders/particles.comp", "shaders/bin/particles.comp.spv"),
    ("shaders/particles.vert", "shaders/bin/particles.vert.spv"),
    ("shaders/particles.frag", "shaders/bin/particles.frag.spv"),
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    if let Err(e) = std::fs::create_dir_all("shaders/bin") {
        println!("cargo:warning=Cannot create shaders/bin: {}", e);
        return;
    }

    // Compile shaders using glslc (part of Vulkan SDK)
    for (input, output) in SHADERS {
        compile_shader(input, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            // SPIR-V is loaded at runtime, so a missing compiler only matters
            // when the binaries are not shipped alongside the sources.
            println!("cargo:warning=glslc not found ({}), skipping {}", e, input);
            println!("cargo:warning=Compile manually: glslc {} -o {}", input, output);
        }
    }
}
