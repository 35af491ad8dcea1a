use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Must match the pipeline's vertex input and descriptor layout:
    //   - binding 0, location 0: R32G32B32_SFLOAT (pos)
    //   - binding 0, location 1: R32G32B32_SFLOAT (color)
    //   - binding 0, location 2: R32G32_SFLOAT (uv)
    //   - set 0, binding 0: uniform buffer, binding 1: combined image sampler
    let vs_src = r#"
#version 450
layout(set = 0, binding = 0) uniform Transforms {
    mat4 model;
    mat4 view;
    mat4 proj;
} u;

layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec2 inUv;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    gl_Position = u.proj * u.view * u.model * vec4(inPos, 1.0);
    vColor = inColor;
    vUv = inUv;
}
"#;

    let fs_src = r#"
#version 450
layout(set = 0, binding = 1) uniform sampler2D texSampler;

layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0) * texture(texSampler, vUv);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "mesh.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "mesh.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("mesh.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("mesh.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
