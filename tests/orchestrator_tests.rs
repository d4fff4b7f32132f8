//! Orchestrator Tests
//!
//! Drives the orchestrator on the headless recording backend.
//!
//! Tests for:
//! - Declaration rules (built-ins, duplicates, lifecycle state)
//! - Initialization failures (undeclared structs, missing compute stage)
//! - Reachable struct layouts and constant array lengths
//! - Frame command order (dispatches, draws, frame copies, read-back copies)
//! - Frame copies whose pass is disabled
//! - Read-back and event listeners, including maps that take several frames
//! - Resize and external frames (targeted bind group rebuilds, retries)
//! - Pass-local external textures and mapped storages
//! - Pass destruction and teardown

use std::cell::RefCell;
use std::rc::Rc;

use weave::backend::{BindResource, GpuBackend, GpuCommand, RecordingBackend};
use weave::errors::WeaveError;
use weave::orchestrator::{BUILTIN_UNIFORMS, Orchestrator, OrchestratorState};
use weave::pass::{Pass, RenderOptions};
use weave::resources::{
    SamplerDecl, SamplerDescriptor, ShaderStage, StorageDecl, TextureDecl, TextureKind, decode_uniforms,
};
use weave::settings::OrchestratorSettings;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

const EMPTY_COMPUTE: &str = "@compute @workgroup_size(1)\nfn main() {}\n";

const PLAIN_FRAGMENT: &str = r"
@fragment
fn main(in: Fragment) -> @location(0) vec4<f32> {
    return in.color;
}
";

const PARTICLE_COMPUTE: &str = r"
struct Particle {
    position: vec2<f32>,
    velocity: vec2<f32>,
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    particles[id.x].position += particles[id.x].velocity * params.delta;
}
";

fn orchestrator() -> Orchestrator<RecordingBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    Orchestrator::new(OrchestratorSettings::default()).unwrap()
}

fn init(orchestrator: &mut Orchestrator<RecordingBackend>) {
    orchestrator.init(RecordingBackend::new(WIDTH, HEIGHT)).unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
}

fn backend(orchestrator: &Orchestrator<RecordingBackend>) -> &RecordingBackend {
    orchestrator.backend().unwrap()
}

fn last_commands(orchestrator: &Orchestrator<RecordingBackend>) -> Vec<GpuCommand> {
    backend(orchestrator).last_submission().unwrap().to_vec()
}

fn floats(bytes: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(bytes)
}

// ============================================================================
// Declarations
// ============================================================================

#[test]
fn builtin_uniforms_come_first() {
    let mut orchestrator = orchestrator();
    orchestrator.add_uniform("speed", 1.0).unwrap();

    let names: Vec<&str> = orchestrator
        .registry()
        .uniforms()
        .iter()
        .map(|u| u.name.as_str())
        .collect();
    let builtins: Vec<&str> = BUILTIN_UNIFORMS.iter().map(|(name, _)| *name).collect();
    assert_eq!(&names[..9], &builtins[..]);
    assert_eq!(names[9], "speed");
}

#[test]
fn builtin_names_cannot_be_redeclared() {
    let mut orchestrator = orchestrator();
    let err = orchestrator.add_uniform("time", 0.0).unwrap_err();
    assert!(matches!(err, WeaveError::DuplicateName { collection: "uniforms", .. }), "{err}");
}

#[test]
fn declarations_require_uninitialized_state() {
    let mut orchestrator = orchestrator();
    orchestrator.add_pass(Pass::compute("noop", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    init(&mut orchestrator);

    let err = orchestrator.add_uniform("late", 1.0).unwrap_err();
    assert!(matches!(
        err,
        WeaveError::InvalidState {
            expected: "Uninitialized",
            actual: "Ready"
        }
    ));
    assert!(orchestrator.add_pass(Pass::compute("late", EMPTY_COMPUTE, [1, 1, 1])).is_err());
}

#[test]
fn set_uniform_checks_value_count() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_uniform_typed("tint", "vec3<f32>", vec![1.0, 1.0, 1.0])
        .unwrap();

    let err = orchestrator.set_uniform("tint", vec![0.5, 0.5]).unwrap_err();
    assert!(
        matches!(err, WeaveError::ValueCountMismatch { expected: 3, actual: 2, .. }),
        "{err}"
    );
    assert!(matches!(
        orchestrator.set_uniform("missing", vec![1.0]),
        Err(WeaveError::UnknownResource(_))
    ));
    orchestrator.set_uniform("tint", vec![0.5, 0.25, 0.0]).unwrap();
}

#[test]
fn local_name_may_not_shadow_global() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::new("grid", "array<f32, 4>"))
        .unwrap();

    let mut pass = Pass::compute("blur", EMPTY_COMPUTE, [1, 1, 1]);
    pass.declare(StorageDecl::new("grid", "array<f32, 4>")).unwrap();
    orchestrator.add_pass(pass).unwrap();

    let err = orchestrator.init(RecordingBackend::new(WIDTH, HEIGHT)).unwrap_err();
    assert!(matches!(err, WeaveError::DuplicateName { collection: "storages", .. }), "{err}");
    assert_eq!(orchestrator.state(), OrchestratorState::Uninitialized);
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn undeclared_struct_aborts_init() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::new("boids", "array<Boid, 8>"))
        .unwrap();
    orchestrator.add_pass(Pass::compute("flock", EMPTY_COMPUTE, [1, 1, 1])).unwrap();

    let err = orchestrator.init(RecordingBackend::new(WIDTH, HEIGHT)).unwrap_err();
    match err {
        WeaveError::UndeclaredStruct { resource, struct_name } => {
            assert_eq!(resource, "boids");
            assert_eq!(struct_name, "Boid");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orchestrator.state(), OrchestratorState::Uninitialized);
    assert!(orchestrator.backend().is_none());
}

#[test]
fn binding_pair_requires_a_compute_pass() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::new("field", TextureKind::BindingPair))
        .unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();

    let err = orchestrator.init(RecordingBackend::new(WIDTH, HEIGHT)).unwrap_err();
    assert!(matches!(err, WeaveError::ComputeShaderRequired(ref name) if name == "field"), "{err}");
}

#[test]
fn storage_buffers_use_resolved_sizes() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::new("particles", "array<Particle, 64>"))
        .unwrap();
    orchestrator.add_storage(StorageDecl::new("counter", "atomic<u32>")).unwrap();
    orchestrator
        .add_storage(StorageDecl::new("grid", "array<vec3<f32>, 3>"))
        .unwrap();
    orchestrator
        .add_pass(Pass::compute("simulate", PARTICLE_COMPUTE, [1, 1, 1]))
        .unwrap();
    init(&mut orchestrator);

    let size = |name: &str| {
        let key = orchestrator.storage_buffer(name).unwrap();
        backend(&orchestrator).buffer(key).unwrap().desc.size
    };
    assert_eq!(size("particles"), 1024);
    assert_eq!(size("counter"), 16);
    assert_eq!(size("grid"), 48);
}

#[test]
fn unreferenced_structs_do_not_block_init() {
    const CELL_COMPUTE: &str = r"
struct Cell {
    alive: bool,
    age: u32,
}

struct Scratch {
    blob: Mystery,
}

@compute @workgroup_size(1)
fn main() {}
";
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::new("cells", "array<Cell, 4>"))
        .unwrap();
    orchestrator.add_pass(Pass::compute("life", CELL_COMPUTE, [1, 1, 1])).unwrap();
    init(&mut orchestrator);

    let layouts = orchestrator.struct_layouts().unwrap();
    assert!(layouts.contains("Cell"));
    assert!(!layouts.contains("Scratch"));
    assert_eq!(layouts.get("Cell").unwrap().field("age").unwrap().offset, 4);
}

#[test]
fn constant_sized_storage_injects_the_constant() {
    const SIZED_COMPUTE: &str = "const COUNT = 4u;\n@compute @workgroup_size(1)\nfn main() {}\n";
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::new("weights", "array<f32, COUNT>"))
        .unwrap();
    orchestrator.add_pass(Pass::compute("sum", SIZED_COMPUTE, [1, 1, 1])).unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    let key = orchestrator.storage_buffer("weights").unwrap();
    assert_eq!(backend(&orchestrator).buffer(key).unwrap().desc.size, 16);

    // 片元阶段没有声明 COUNT, 由注入补上
    let fragment = orchestrator.compiled_shaders(1).unwrap().fragment_text().unwrap();
    assert!(fragment.contains("const COUNT = 4;"));
    assert!(fragment.contains("weights: array<f32, COUNT>;"));
    let compute = orchestrator.compiled_shaders(0).unwrap().compute_text().unwrap();
    assert_eq!(compute.matches("const COUNT").count(), 1);
}

#[test]
fn fragment_bindings_live_in_group_one() {
    let mut orchestrator = orchestrator();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    let compiled = orchestrator.compiled_shaders(0).unwrap();
    assert!(compiled
        .fragment_text()
        .unwrap()
        .contains("@group(1) @binding(0) var<uniform> params: Params;"));
    assert!(compiled
        .vertex_text()
        .unwrap()
        .contains("@group(0) @binding(0) var<uniform> params: Params;"));
}

#[test]
fn internal_passes_share_local_binding_indices() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::new("scene", "array<f32, 4>"))
        .unwrap();

    for label in ["blurX", "blurY"] {
        let mut pass = Pass::render(label, PLAIN_FRAGMENT);
        pass.declare(SamplerDecl::new("feedbackSampler", SamplerDescriptor::nearest_clamped()).stage(ShaderStage::Fragment))
            .unwrap();
        orchestrator.add_pass(pass).unwrap();
    }
    init(&mut orchestrator);

    for index in 0..2 {
        let fragment = orchestrator.compiled_shaders(index).unwrap().fragment_text().unwrap();
        assert!(fragment.contains("@group(1) @binding(1) var feedbackSampler: sampler;"));
        assert!(!fragment.contains("scene"));
    }
}

// ============================================================================
// Frame Commands
// ============================================================================

#[test]
fn dispatches_precede_draws() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_pass(Pass::render("mixed", PLAIN_FRAGMENT).with_compute(EMPTY_COMPUTE, [4, 4, 1]))
        .unwrap();
    orchestrator.add_pass(Pass::compute("later", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    init(&mut orchestrator);
    orchestrator.update().unwrap();

    let commands = last_commands(&orchestrator);
    let order: Vec<(bool, Option<usize>)> = commands
        .iter()
        .map(|c| (matches!(c, GpuCommand::Draw { .. }), c.pass()))
        .collect();
    assert_eq!(order, vec![(false, Some(0)), (false, Some(1)), (true, Some(0))]);

    match &commands[0] {
        GpuCommand::Dispatch { workgroups, .. } => assert_eq!(*workgroups, [4, 4, 1]),
        other => panic!("unexpected command: {other:?}"),
    }
    match &commands[2] {
        GpuCommand::Draw { vertex_count, .. } => assert_eq!(*vertex_count, 6),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn disabled_pass_records_nothing() {
    let mut orchestrator = orchestrator();
    orchestrator.add_pass(Pass::compute("first", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    orchestrator.add_pass(Pass::render("second", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    orchestrator.set_pass_enabled(1, false).unwrap();
    orchestrator.update().unwrap();

    let commands = last_commands(&orchestrator);
    assert_eq!(commands.len(), 1);
    assert!(commands.iter().all(|c| c.pass() != Some(1)));
    for group in commands.iter().flat_map(GpuCommand::bind_groups) {
        let label = &backend(&orchestrator).bind_group(group).unwrap().label;
        assert!(!label.starts_with("second"), "{label}");
    }

    assert!(matches!(
        orchestrator.set_pass_enabled(7, true),
        Err(WeaveError::PassIndexOutOfBounds(7))
    ));
}

#[test]
fn frame_copies_follow_their_pass() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::frame_copy("afterBase", Some(0)).stage(ShaderStage::Fragment))
        .unwrap();
    orchestrator
        .add_texture(TextureDecl::frame_copy("previous", None).stage(ShaderStage::Fragment))
        .unwrap();
    orchestrator.add_pass(Pass::render("base", PLAIN_FRAGMENT)).unwrap();
    orchestrator
        .add_pass(Pass::render("overlay", PLAIN_FRAGMENT).with_render_options(RenderOptions::accumulate()))
        .unwrap();
    init(&mut orchestrator);
    orchestrator.update().unwrap();

    let after_base = orchestrator.texture("afterBase").unwrap();
    let previous = orchestrator.texture("previous").unwrap();
    let commands = last_commands(&orchestrator);
    assert!(matches!(commands[0], GpuCommand::Draw { pass: 0, .. }));
    assert_eq!(commands[1], GpuCommand::CopyFrameToTexture { texture: after_base });
    assert!(matches!(commands[2], GpuCommand::Draw { pass: 1, .. }));
    assert_eq!(commands[3], GpuCommand::CopyFrameToTexture { texture: previous });

    let desc = &backend(&orchestrator).texture(previous).unwrap().desc;
    assert_eq!((desc.width, desc.height), (WIDTH, HEIGHT));
    assert_eq!(desc.format, wgpu::TextureFormat::Bgra8Unorm);
}

#[test]
fn frame_copy_after_disabled_pass_falls_back_to_last_draw() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::frame_copy("afterBase", Some(0)).stage(ShaderStage::Fragment))
        .unwrap();
    orchestrator.add_pass(Pass::render("base", PLAIN_FRAGMENT)).unwrap();
    orchestrator
        .add_pass(Pass::render("overlay", PLAIN_FRAGMENT).with_render_options(RenderOptions::accumulate()))
        .unwrap();
    init(&mut orchestrator);

    orchestrator.set_pass_enabled(0, false).unwrap();
    orchestrator.update().unwrap();

    let after_base = orchestrator.texture("afterBase").unwrap();
    let commands = last_commands(&orchestrator);
    assert_eq!(commands.len(), 2);
    assert!(matches!(commands[0], GpuCommand::Draw { pass: 1, .. }));
    assert_eq!(commands[1], GpuCommand::CopyFrameToTexture { texture: after_base });
}

#[test]
fn accumulating_pass_keeps_color() {
    let settings = OrchestratorSettings {
        clear_color: [0.25, 0.5, 0.75, 1.0],
        ..OrchestratorSettings::default()
    };
    let mut orchestrator = Orchestrator::new(settings).unwrap();
    orchestrator.add_pass(Pass::render("base", PLAIN_FRAGMENT)).unwrap();
    orchestrator
        .add_pass(Pass::render("overlay", PLAIN_FRAGMENT).with_render_options(RenderOptions::accumulate()))
        .unwrap();
    orchestrator.init(RecordingBackend::new(WIDTH, HEIGHT)).unwrap();
    orchestrator.update().unwrap();

    let clears: Vec<(Option<wgpu::Color>, bool)> = last_commands(&orchestrator)
        .iter()
        .filter_map(|c| match c {
            GpuCommand::Draw {
                clear_color,
                clear_depth,
                ..
            } => Some((*clear_color, *clear_depth)),
            _ => None,
        })
        .collect();
    assert_eq!(
        clears,
        vec![
            (
                Some(wgpu::Color {
                    r: 0.25,
                    g: 0.5,
                    b: 0.75,
                    a: 1.0
                }),
                true
            ),
            (None, false),
        ]
    );
}

#[test]
fn params_buffer_holds_frame_state() {
    let mut orchestrator = orchestrator();
    orchestrator.add_uniform("speed", 1.0).unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    orchestrator.set_uniform("speed", vec![2.5]).unwrap();
    orchestrator.frame_state_mut().pointer_moved(5.0, 6.0);
    orchestrator.frame_state_mut().pointer_pressed();
    orchestrator.update().unwrap();

    let decode = |orchestrator: &Orchestrator<RecordingBackend>| {
        let bytes = backend(orchestrator)
            .buffer_data(orchestrator.params_buffer().unwrap())
            .unwrap();
        decode_uniforms(
            bytes,
            orchestrator.params_layout().unwrap(),
            orchestrator.struct_layouts().unwrap(),
        )
        .unwrap()
    };

    let values = decode(&orchestrator);
    assert_eq!(values[3], vec![WIDTH as f32, HEIGHT as f32]);
    assert_eq!(values[4], vec![5.0, 6.0]);
    assert_eq!(values[5], vec![1.0]);
    assert_eq!(values[6], vec![1.0]);
    assert_eq!(values[9], vec![2.5]);
    assert!(values[0][0] >= 0.0);

    // click is a one-frame pulse, the button stays down
    orchestrator.update().unwrap();
    let values = decode(&orchestrator);
    assert_eq!(values[5], vec![0.0]);
    assert_eq!(values[6], vec![1.0]);
}

#[test]
fn lost_surface_skips_the_frame() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::mapped("values", "array<f32, 4>", vec![1.0; 4]).read_back(true))
        .unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    orchestrator.backend_mut().unwrap().lose_surface(1);
    orchestrator.update().unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Ready);
    assert!(backend(&orchestrator).submissions().is_empty());
    assert_eq!(backend(&orchestrator).pending_maps(), 0);

    orchestrator.update().unwrap();
    assert_eq!(backend(&orchestrator).submissions().len(), 1);
    assert_eq!(backend(&orchestrator).pending_maps(), 1);
}

// ============================================================================
// Read-back & Events
// ============================================================================

#[test]
fn mapped_storage_reads_back() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::mapped("values", "array<f32, 4>", vec![1.0, 2.0, 3.0, 4.0]).read_back(true))
        .unwrap();
    orchestrator.add_storage(StorageDecl::new("plain", "array<f32, 4>")).unwrap();
    orchestrator.add_pass(Pass::compute("touch", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    init(&mut orchestrator);

    assert!(matches!(orchestrator.read("values"), Err(WeaveError::Readback(_))));

    orchestrator.update().unwrap();
    let commands = last_commands(&orchestrator);
    assert!(matches!(commands.last(), Some(GpuCommand::CopyBuffer { size: 16, .. })));

    assert_eq!(orchestrator.read("values").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    // the latest values stay readable
    assert_eq!(orchestrator.read("values").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert!(matches!(orchestrator.read("plain"), Err(WeaveError::UnknownResource(_))));
}

#[test]
fn read_back_is_copied_once_per_frame() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::mapped("values", "array<f32, 4>", vec![0.0; 4]).read_back(true))
        .unwrap();
    init(&mut orchestrator);

    orchestrator.update().unwrap();
    assert_eq!(backend(&orchestrator).pending_maps(), 1);

    // collected at the start of the next frame, then copied and mapped again
    orchestrator.update().unwrap();
    let copies = last_commands(&orchestrator)
        .iter()
        .filter(|c| matches!(c, GpuCommand::CopyBuffer { .. }))
        .count();
    assert_eq!(copies, 1);
    assert_eq!(backend(&orchestrator).pending_maps(), 1);
}

#[test]
fn mapped_storage_is_reuploaded_after_change() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::mapped("values", "array<f32, 4>", vec![1.0, 2.0, 3.0, 4.0]))
        .unwrap();
    orchestrator.add_pass(Pass::compute("touch", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    init(&mut orchestrator);

    let key = orchestrator.storage_buffer("values").unwrap();
    assert_eq!(floats(backend(&orchestrator).buffer_data(key).unwrap()), vec![1.0, 2.0, 3.0, 4.0]);

    orchestrator.set_storage_data("values", vec![5.0, 6.0, 7.0, 8.0]).unwrap();
    orchestrator.update().unwrap();
    assert_eq!(floats(backend(&orchestrator).buffer_data(key).unwrap()), vec![5.0, 6.0, 7.0, 8.0]);

    {
        let mut data = orchestrator.storage_data_mut("values").unwrap();
        data[0] = 9.0;
    }
    orchestrator.update().unwrap();
    assert_eq!(floats(backend(&orchestrator).buffer_data(key).unwrap()), vec![9.0, 6.0, 7.0, 8.0]);

    assert!(orchestrator.set_storage_data("missing", vec![]).is_err());
}

const HIT_COMPUTE: &str = r"
@compute @workgroup_size(1)
fn main() {
    hit.updated = 1u;
    hit.data[0] = params.time;
}
";

fn event_orchestrator(fired: Rc<RefCell<Vec<Vec<f32>>>>) -> Orchestrator<RecordingBackend> {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_event_listener("hit", move |payload| fired.borrow_mut().push(payload.to_vec()))
        .unwrap();
    orchestrator.add_pass(Pass::compute("detect", HIT_COMPUTE, [1, 1, 1])).unwrap();
    init(&mut orchestrator);
    orchestrator
}

fn write_event(orchestrator: &mut Orchestrator<RecordingBackend>, flag: u32, payload: [f32; 4]) {
    let key = orchestrator.storage_buffer("hit").unwrap();
    let mut words = vec![flag];
    words.extend(payload.iter().map(|v| v.to_bits()));
    orchestrator
        .backend_mut()
        .unwrap()
        .write_buffer(key, 0, bytemuck::cast_slice(&words));
}

#[test]
fn event_fires_on_the_frame_after_it_is_set() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut orchestrator = event_orchestrator(Rc::clone(&fired));

    let compute = orchestrator.compiled_shaders(0).unwrap().compute_text().unwrap();
    assert!(compute.contains("struct Event {"));
    assert!(compute.contains("var<storage, read_write> hit: Event;"));

    write_event(&mut orchestrator, 1, [1.5, 2.0, 3.0, 4.0]);
    orchestrator.update().unwrap();
    assert!(fired.borrow().is_empty());

    orchestrator.update().unwrap();
    assert_eq!(*fired.borrow(), vec![vec![1.5, 2.0, 3.0, 4.0]]);
}

#[test]
fn slow_maps_still_fire_every_event_in_order() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut orchestrator = event_orchestrator(Rc::clone(&fired));
    orchestrator.backend_mut().unwrap().defer_maps(1);

    write_event(&mut orchestrator, 1, [1.0, 0.0, 0.0, 0.0]);
    orchestrator.update().unwrap();
    write_event(&mut orchestrator, 1, [2.0, 0.0, 0.0, 0.0]);
    orchestrator.update().unwrap();
    // 第一帧的映射尚未完成, 这一帧仍然复制
    assert!(last_commands(&orchestrator)
        .iter()
        .any(|c| matches!(c, GpuCommand::CopyBuffer { .. })));
    assert_eq!(backend(&orchestrator).pending_maps(), 2);
    assert!(fired.borrow().is_empty());

    write_event(&mut orchestrator, 0, [3.0, 0.0, 0.0, 0.0]);
    orchestrator.update().unwrap();
    assert_eq!(*fired.borrow(), vec![vec![1.0, 0.0, 0.0, 0.0]]);

    orchestrator.update().unwrap();
    assert_eq!(
        *fired.borrow(),
        vec![vec![1.0, 0.0, 0.0, 0.0], vec![2.0, 0.0, 0.0, 0.0]]
    );
}

#[test]
fn event_without_flag_stays_silent() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut orchestrator = event_orchestrator(Rc::clone(&fired));

    write_event(&mut orchestrator, 0, [1.0, 1.0, 1.0, 1.0]);
    for _ in 0..3 {
        orchestrator.update().unwrap();
    }
    assert!(fired.borrow().is_empty());
}

// ============================================================================
// Resize & External Frames
// ============================================================================

#[test]
fn resize_rebuilds_only_bind_groups_using_copy_targets() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::frame_copy("previous", None).stage(ShaderStage::Fragment))
        .unwrap();
    orchestrator
        .add_sampler(SamplerDecl::new("linear", SamplerDescriptor::default()))
        .unwrap();
    orchestrator
        .add_storage(StorageDecl::new("particles", "array<Particle, 64>").stage(ShaderStage::Compute))
        .unwrap();
    orchestrator
        .add_pass(Pass::compute("simulate", PARTICLE_COMPUTE, [1, 1, 1]))
        .unwrap();
    orchestrator.add_pass(Pass::render("feedback", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    let old = orchestrator.texture("previous").unwrap();
    orchestrator.resize(640, 480);
    let new = orchestrator.texture("previous").unwrap();
    assert_ne!(old, new);
    assert!(backend(&orchestrator).texture(old).is_none());
    assert_eq!(backend(&orchestrator).resize_count(), 1);
    let desc = &backend(&orchestrator).texture(new).unwrap().desc;
    assert_eq!((desc.width, desc.height), (640, 480));

    orchestrator.update().unwrap();
    let recording = backend(&orchestrator);
    assert_eq!(recording.bind_group_builds("feedback (fragment)"), 2);
    assert_eq!(recording.bind_group_builds("feedback (vertex)"), 1);
    assert_eq!(recording.bind_group_builds("simulate (compute)"), 1);
    assert!(last_commands(&orchestrator).contains(&GpuCommand::CopyFrameToTexture { texture: new }));
}

#[test]
fn zero_sized_resize_is_ignored() {
    let mut orchestrator = orchestrator();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    orchestrator.resize(0, 480);
    assert_eq!(backend(&orchestrator).resize_count(), 0);
}

#[test]
fn external_frame_recreates_texture_on_size_change() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::new("camera", TextureKind::External))
        .unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    let initial = orchestrator.texture("camera").unwrap();
    orchestrator.push_external_frame("camera", 2, 2, vec![255; 16]).unwrap();
    orchestrator.update().unwrap();

    let resized = orchestrator.texture("camera").unwrap();
    assert_ne!(initial, resized);
    let texture = backend(&orchestrator).texture(resized).unwrap();
    assert_eq!((texture.desc.width, texture.desc.height), (2, 2));
    assert_eq!(texture.uploads, vec![1]);
    assert_eq!(backend(&orchestrator).bind_group_builds("show (vertex)"), 2);
    assert_eq!(backend(&orchestrator).bind_group_builds("show (fragment)"), 2);

    // same size: uploaded in place
    orchestrator.push_external_frame("camera", 2, 2, vec![0; 16]).unwrap();
    orchestrator.update().unwrap();
    assert_eq!(orchestrator.texture("camera").unwrap(), resized);
    assert_eq!(backend(&orchestrator).texture(resized).unwrap().uploads, vec![2]);
}

#[test]
fn pass_local_external_frame_is_uploaded() {
    let mut orchestrator = orchestrator();
    let mut pass = Pass::render("show", PLAIN_FRAGMENT);
    pass.declare(TextureDecl::new("camera", TextureKind::External)).unwrap();
    orchestrator.add_pass(pass).unwrap();
    init(&mut orchestrator);

    let initial = orchestrator.local_texture(0, "camera").unwrap();
    assert!(orchestrator.texture("camera").is_none());
    orchestrator.push_external_frame("camera", 2, 2, vec![0; 16]).unwrap();
    orchestrator.update().unwrap();

    let resized = orchestrator.local_texture(0, "camera").unwrap();
    assert_ne!(initial, resized);
    let texture = backend(&orchestrator).texture(resized).unwrap();
    assert_eq!((texture.desc.width, texture.desc.height), (2, 2));
    assert_eq!(texture.uploads, vec![1]);
    assert_eq!(backend(&orchestrator).bind_group_builds("show (fragment)"), 2);
}

#[test]
fn pass_local_mapped_storage_is_reuploaded() {
    let mut orchestrator = orchestrator();
    let mut pass = Pass::compute("touch", EMPTY_COMPUTE, [1, 1, 1]);
    pass.declare(StorageDecl::mapped("weights", "array<f32, 2>", vec![1.0, 2.0]))
        .unwrap();
    orchestrator.add_pass(pass).unwrap();
    init(&mut orchestrator);

    let key = orchestrator.local_storage_buffer(0, "weights").unwrap();
    assert!(orchestrator.storage_buffer("weights").is_none());
    orchestrator.set_storage_data("weights", vec![3.0, 4.0]).unwrap();
    orchestrator.update().unwrap();
    assert_eq!(floats(backend(&orchestrator).buffer_data(key).unwrap()), vec![3.0, 4.0]);
}

#[test]
fn failed_rebind_is_retried_next_frame() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::new("camera", TextureKind::External).stage(ShaderStage::Fragment))
        .unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);

    orchestrator.backend_mut().unwrap().fail_bind_groups(1);
    orchestrator.push_external_frame("camera", 2, 2, vec![0; 16]).unwrap();
    orchestrator.update().unwrap();
    assert!(backend(&orchestrator).submissions().is_empty());
    assert_eq!(backend(&orchestrator).bind_group_builds("show (fragment)"), 1);

    orchestrator.update().unwrap();
    let camera = orchestrator.texture("camera").unwrap();
    let recording = backend(&orchestrator);
    assert_eq!(recording.bind_group_builds("show (fragment)"), 2);
    let draw = last_commands(&orchestrator)
        .into_iter()
        .find(|c| matches!(c, GpuCommand::Draw { .. }))
        .unwrap();
    let uses_camera = draw.bind_groups().iter().any(|group| {
        recording
            .bind_group(*group)
            .unwrap()
            .resources
            .contains(&BindResource::Texture(camera))
    });
    assert!(uses_camera);
}

#[test]
fn external_frame_is_validated() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_texture(TextureDecl::new("camera", TextureKind::External))
        .unwrap();
    orchestrator
        .add_texture(TextureDecl::new("still", TextureKind::Texture2D))
        .unwrap();

    let err = orchestrator.push_external_frame("camera", 2, 2, vec![0; 15]).unwrap_err();
    assert!(matches!(err, WeaveError::ValueCountMismatch { expected: 16, actual: 15, .. }), "{err}");
    assert!(matches!(
        orchestrator.push_external_frame("still", 1, 1, vec![0; 4]),
        Err(WeaveError::UnknownResource(_))
    ));
}

// ============================================================================
// Destruction
// ============================================================================

#[test]
fn destroyed_pass_is_skipped() {
    let mut orchestrator = orchestrator();
    orchestrator.add_pass(Pass::compute("simulate", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);
    assert_eq!(backend(&orchestrator).live_pipelines(), 2);

    orchestrator.destroy_pass(1).unwrap();
    assert_eq!(backend(&orchestrator).live_pipelines(), 1);
    assert!(orchestrator.destroy_pass(1).is_ok());
    assert!(matches!(
        orchestrator.destroy_pass(5),
        Err(WeaveError::PassIndexOutOfBounds(5))
    ));

    orchestrator.update().unwrap();
    let commands = last_commands(&orchestrator);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].pass(), Some(0));
}

#[test]
fn destroy_releases_everything() {
    let mut orchestrator = orchestrator();
    orchestrator
        .add_storage(StorageDecl::mapped("values", "array<f32, 4>", vec![0.0; 4]).read_back(true))
        .unwrap();
    orchestrator
        .add_texture(TextureDecl::frame_copy("previous", None))
        .unwrap();
    orchestrator.add_layers("history", 2).unwrap();
    orchestrator
        .add_sampler(SamplerDecl::new("linear", SamplerDescriptor::default()))
        .unwrap();
    orchestrator.add_pass(Pass::compute("simulate", EMPTY_COMPUTE, [1, 1, 1])).unwrap();
    orchestrator.add_pass(Pass::render("show", PLAIN_FRAGMENT)).unwrap();
    init(&mut orchestrator);
    orchestrator.update().unwrap();

    orchestrator.destroy();
    assert_eq!(orchestrator.state(), OrchestratorState::Destroyed);
    let recording = backend(&orchestrator);
    assert_eq!(recording.live_buffers(), 0);
    assert_eq!(recording.live_textures(), 0);
    assert_eq!(recording.live_bind_groups(), 0);
    assert_eq!(recording.live_pipelines(), 0);

    assert!(matches!(
        orchestrator.update(),
        Err(WeaveError::InvalidState { actual: "Destroyed", .. })
    ));
}
