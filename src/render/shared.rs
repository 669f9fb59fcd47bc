/// Maximum lights a layer can bind; the main scene uses three, the shadow scene one.
pub(crate) const MAX_LIGHTS: usize = 4;

pub(crate) const SCENE_SHADER: &str = r#"
struct Light {
    // w: 0 directional, 1 point
    position: vec4<f32>,
    // w: intensity
    color: vec4<f32>,
}

struct GlobalUniform {
    view_proj: mat4x4<f32>,
    camera_position: vec4<f32>,
    // x: light count
    params: vec4<f32>,
    lights: array<Light, 4>,
}

struct ObjectConstants {
    model: mat4x4<f32>,
    normal: mat3x4<f32>,
    color: vec4<f32>,
    // w: 0 standard, 1 flame, 2 shadow receiver
    emissive: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> globals: GlobalUniform;

@group(1) @binding(0)
var<uniform> object: ObjectConstants;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = object.model * vec4<f32>(input.position, 1.0);
    out.position = globals.view_proj * world_position;
    out.world_pos = world_position.xyz;

    let world_normal = mat3x3<f32>(
        object.normal[0].xyz,
        object.normal[1].xyz,
        object.normal[2].xyz
    ) * input.normal;

    out.normal = normalize(world_normal);
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let mode = object.emissive.w;
    if (mode > 1.5) {
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }
    if (mode > 0.5) {
        return vec4<f32>(object.emissive.rgb, object.color.a);
    }

    let normal = normalize(input.normal);
    let count = u32(globals.params.x);
    var lit = vec3<f32>(0.0, 0.0, 0.0);
    for (var i: u32 = 0u; i < count; i = i + 1u) {
        let light = globals.lights[i];
        var light_dir = normalize(light.position.xyz);
        var falloff = 1.0;
        if (light.position.w > 0.5) {
            let to_light = light.position.xyz - input.world_pos;
            let distance_sq = max(dot(to_light, to_light), 1.0);
            light_dir = normalize(to_light);
            falloff = 1.0 / distance_sq;
        }
        let diffuse = max(dot(normal, light_dir), 0.0);
        lit = lit + light.color.rgb * light.color.w * diffuse * falloff;
    }

    let ambient = 0.15;
    let color = (ambient + lit) * object.color.rgb + object.emissive.rgb;
    return vec4<f32>(color, object.color.a);
}
"#;

/// Fullscreen composite of the two layer targets with the glitch distortion.
/// Same math as `GlitchCompositor::composite`.
pub(crate) const COMPOSITE_SHADER: &str = r#"
struct GlitchUniform {
    // amount, angle, seed, seed_x
    a: vec4<f32>,
    // seed_y, distortion_x, distortion_y, col_s
    b: vec4<f32>,
    // x: enabled
    flags: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> glitch: GlitchUniform;
@group(0) @binding(1)
var main_layer: texture_2d<f32>;
@group(0) @binding(2)
var shadow_layer: texture_2d<f32>;
@group(0) @binding(3)
var displacement: texture_2d<f32>;
@group(0) @binding(4)
var nearest: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    let x = f32((index << 1u) & 2u);
    let y = f32(index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.uv;
    let overlay = textureSampleLevel(shadow_layer, nearest, uv, 0.0);
    if (glitch.flags.x < 0.5) {
        return textureSampleLevel(main_layer, nearest, uv, 0.0) + overlay;
    }

    let amount = glitch.a.x;
    let angle = glitch.a.y;
    let seed = glitch.a.z;
    let seed_x = glitch.a.w;
    let seed_y = glitch.b.x;
    let distortion_x = glitch.b.y;
    let distortion_y = glitch.b.z;
    let col_s = glitch.b.w;

    var p = uv;
    let disp = textureSampleLevel(displacement, nearest, p * seed * seed, 0.0).r;
    if (p.y < distortion_x + col_s && p.y > distortion_x - col_s * seed) {
        if (seed_x > 0.0) {
            p.y = 1.0 - (p.y + distortion_y);
        } else {
            p.y = distortion_y;
        }
    }
    if (p.x < distortion_y + col_s && p.x > distortion_y - col_s * seed) {
        if (seed_y > 0.0) {
            p.x = distortion_x;
        } else {
            p.x = 1.0 - (p.x + distortion_x);
        }
    }
    p.x = p.x + disp * seed_x * (seed / 5.0);
    p.y = p.y + disp * seed_y * (seed / 5.0);

    let offset = amount * vec2<f32>(cos(angle), sin(angle));
    let red = textureSampleLevel(main_layer, nearest, p + offset, 0.0);
    let green_alpha = textureSampleLevel(main_layer, nearest, p, 0.0);
    let blue = textureSampleLevel(main_layer, nearest, p - offset, 0.0);
    return vec4<f32>(red.r, green_alpha.g, blue.b, green_alpha.a) + overlay;
}
"#;

/// Stand-in for meshes the renderer has no buffers for.
pub(crate) const DEFAULT_CUBE_VERTICES: &[f32] = &[
    // positions        // normals
    -0.5, -0.5, 0.5, 0.0, 0.0, 1.0, 0.5, -0.5, 0.5, 0.0, 0.0, 1.0, 0.5, 0.5, 0.5, 0.0, 0.0, 1.0,
    -0.5, 0.5, 0.5, 0.0, 0.0, 1.0, -0.5, -0.5, -0.5, 0.0, 0.0, -1.0, 0.5, -0.5, -0.5, 0.0, 0.0,
    -1.0, 0.5, 0.5, -0.5, 0.0, 0.0, -1.0, -0.5, 0.5, -0.5, 0.0, 0.0, -1.0, -0.5, -0.5, -0.5, -1.0,
    0.0, 0.0, -0.5, -0.5, 0.5, -1.0, 0.0, 0.0, -0.5, 0.5, 0.5, -1.0, 0.0, 0.0, -0.5, 0.5, -0.5,
    -1.0, 0.0, 0.0, 0.5, -0.5, -0.5, 1.0, 0.0, 0.0, 0.5, -0.5, 0.5, 1.0, 0.0, 0.0, 0.5, 0.5, 0.5,
    1.0, 0.0, 0.0, 0.5, 0.5, -0.5, 1.0, 0.0, 0.0, -0.5, -0.5, -0.5, 0.0, -1.0, 0.0, 0.5, -0.5,
    -0.5, 0.0, -1.0, 0.0, 0.5, -0.5, 0.5, 0.0, -1.0, 0.0, -0.5, -0.5, 0.5, 0.0, -1.0, 0.0, -0.5,
    0.5, -0.5, 0.0, 1.0, 0.0, 0.5, 0.5, -0.5, 0.0, 1.0, 0.0, 0.5, 0.5, 0.5, 0.0, 1.0, 0.0, -0.5,
    0.5, 0.5, 0.0, 1.0, 0.0,
];

pub(crate) const DEFAULT_CUBE_INDICES: &[u32] = &[
    0, 1, 2, 0, 2, 3, // front
    4, 6, 5, 4, 7, 6, // back
    8, 9, 10, 8, 10, 11, // left
    12, 14, 13, 12, 15, 14, // right
    16, 18, 17, 16, 19, 18, // bottom
    20, 21, 22, 20, 22, 23, // top
];
