//! End-to-end scenarios driven entirely through the public API: a command
//! stream goes in, the compatibility transformer and/or the dead-code pass
//! run over it, and the surviving/emitted stream is asserted against.

use replay_compat::command::{Atom, Command, Extra, UniformInfo};
use replay_compat::compat::{CompatibilityTransformer, DeviceDescriptor};
use replay_compat::externs::doubles::{EchoShaderTranslator, FailingDecompressor};
use replay_compat::id::CommandId;
use replay_compat::liveness::DeadCodeEliminator;
use replay_compat::memory::{MemoryRange, Observation, Observations, PoolId};
use replay_compat::mutate::mutate;
use replay_compat::pipeline::{CollectingSink, Pipeline, Sink};
use replay_compat::state::State;

const ARRAY_BUFFER: u32 = 0x8892;

fn desktop_core(version: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        is_es: false,
        version: version.to_string(),
        vendor: "Test".into(),
        extensions: vec![],
        uniform_buffer_alignment: 256,
    }
}

fn transformer(
    desc: DeviceDescriptor,
) -> CompatibilityTransformer<EchoShaderTranslator, FailingDecompressor> {
    CompatibilityTransformer::new(desc, EchoShaderTranslator, FailingDecompressor)
}

fn boot(context: u32, major: u32, minor: u32) -> Vec<(CommandId, Command)> {
    vec![
        (
            CommandId::original(0),
            Command::EglCreateContext {
                context,
                share_context: 0,
            },
        ),
        (
            CommandId::original(1),
            Command::EglMakeCurrent {
                context,
                extras: vec![Extra::StaticContextState { major, minor }],
            },
        ),
    ]
}

/// A GLES2 capture's client-memory vertex array, replayed against a desktop
/// core-profile target that requires a bound array buffer for every
/// attribute pointer, is upgraded into a real buffer object before the draw
/// that reads it.
#[test]
fn client_array_is_upgraded_into_a_buffer_before_the_draw() {
    let transformer = transformer(desktop_core("3.0"));
    let mut pipeline = Pipeline::new().push(Box::new(transformer));
    let mut sink = CollectingSink::new(State::new());

    // 3 vertices * 3 floats, the exact bytes the capture recorded at
    // 0x1000 as a read-observation on the `VertexAttribPointer` call.
    let captured_vertices: Vec<u8> = [-1.0f32, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0]
        .iter()
        .flat_map(|f| f.to_ne_bytes())
        .collect();

    let mut cmds = boot(1, 2, 0);
    cmds.push((CommandId::original(2), Command::EnableVertexAttribArray(0)));
    cmds.push((
        CommandId::original(3),
        Command::VertexAttribPointer {
            location: 0,
            size: 3,
            gl_type: 0x1406, // GL_FLOAT
            normalized: false,
            stride: 12,
            pointer: replay_compat::command::CapturePointer { address: 0x1000 },
        },
    ));
    cmds.push((
        CommandId::original(4),
        Command::DrawArrays {
            mode: 0x0004, // GL_TRIANGLES
            first: 0,
            count: 3,
        },
    ));

    let observed_range = MemoryRange {
        pool: PoolId::Application,
        base: 0x1000,
        size: captured_vertices.len() as u64,
    };
    let observations = Observations {
        reads: vec![Observation {
            range: observed_range,
            bytes: captured_vertices.clone(),
        }],
        writes: vec![],
    };
    let atoms: Vec<Atom> = cmds
        .into_iter()
        .map(|(id, cmd)| {
            if id == CommandId::original(3) {
                Atom::new(id, cmd).with_observations(observations.clone())
            } else {
                Atom::new(id, cmd)
            }
        })
        .collect();
    pipeline.run(atoms, &mut sink);

    // The raw client-pointer VertexAttribPointer never reaches the sink...
    let raw_still_present = sink.emitted.iter().any(|(_, c)| {
        matches!(
            c,
            Command::VertexAttribPointer { pointer, .. } if pointer.address == 0x1000
        )
    });
    assert!(!raw_still_present);

    // ...instead a buffer is synthesized and bound before a rewritten
    // VertexAttribPointer pointing at offset 0 into it, all before the draw.
    let gen_index = sink
        .emitted
        .iter()
        .position(|(_, c)| matches!(c, Command::GenBuffers(_)));
    let bind_index = sink
        .emitted
        .iter()
        .position(|(_, c)| matches!(c, Command::BindBuffer { target, .. } if *target == ARRAY_BUFFER));
    let buffer_data_index = sink
        .emitted
        .iter()
        .position(|(_, c)| matches!(c, Command::BufferData { .. }));
    let rewritten_pointer_index = sink.emitted.iter().position(|(_, c)| {
        matches!(
            c,
            Command::VertexAttribPointer { pointer, .. } if pointer.address == 0
        )
    });
    let draw_index = sink
        .emitted
        .iter()
        .position(|(_, c)| matches!(c, Command::DrawArrays { .. }));

    let (gen, bind, data, pointer, draw) = (
        gen_index.unwrap(),
        bind_index.unwrap(),
        buffer_data_index.unwrap(),
        rewritten_pointer_index.unwrap(),
        draw_index.unwrap(),
    );
    assert!(gen < bind);
    assert!(bind < data);
    assert!(data < pointer);
    assert!(pointer < draw);

    // The uploaded buffer carries the capture's actual vertex bytes, not a
    // zero-filled placeholder: the observation attached to the original
    // `VertexAttribPointer` atom must have reached the simulated memory
    // pool before the compatibility transformer read it back out to
    // populate the scratch upload.
    let scratch_address = match &sink.emitted[data].1 {
        Command::BufferData { data: Some(ptr), .. } => ptr.address,
        other => panic!("expected BufferData with a data pointer, got {:?}", other),
    };
    let scratch_range = MemoryRange {
        pool: PoolId::Temporary,
        base: scratch_address,
        size: captured_vertices.len() as u64,
    };
    let uploaded = sink.state().memory.read(scratch_range).unwrap();
    assert_eq!(uploaded, captured_vertices.as_slice());
}

/// Build `states_before[i]` by replaying `cmds[0..i]` through `mutate` —
/// the snapshot the dead-code pass needs to see the binding points each
/// command reads from.
fn states_before(cmds: &[(CommandId, Command)]) -> Vec<State> {
    let mut state = State::new();
    let mut out = Vec::with_capacity(cmds.len());
    for (_, cmd) in cmds {
        out.push(state.clone());
        let _ = mutate(cmd, &mut state, None);
    }
    out
}

fn uniform4fv(location: i32) -> Command {
    Command::Uniform4fv {
        location,
        count: 1,
        value: vec![[0.0, 0.0, 0.0, 0.0]],
    }
}

/// A uniform location written twice before the one draw that reads it: the
/// earlier write is dead, the later one and the draw survive.
#[test]
fn overwritten_uniform_write_is_eliminated() {
    let mut cmds = boot(1, 3, 0);
    cmds.push((CommandId::original(2), Command::UseProgram(1)));
    let write_a = CommandId::original(3); // location 0, overwritten below
    cmds.push((write_a, uniform4fv(0)));
    let write_b = CommandId::original(4); // location 1, never overwritten
    cmds.push((write_b, uniform4fv(1)));
    let write_c = CommandId::original(5); // location 0 again, the one that sticks
    cmds.push((write_c, uniform4fv(0)));
    let draw = CommandId::original(6);
    cmds.push((
        draw,
        Command::DrawArrays {
            mode: 0x0004,
            first: 0,
            count: 3,
        },
    ));

    let states = states_before(&cmds);
    let (surviving, _) = DeadCodeEliminator::new(vec![draw]).run(&cmds, &states);
    let surviving_ids: Vec<CommandId> = surviving.iter().map(|(id, _)| *id).collect();

    assert!(!surviving_ids.contains(&write_a));
    assert!(surviving_ids.contains(&write_b));
    assert!(surviving_ids.contains(&write_c));
    assert!(surviving_ids.contains(&draw));
}

/// Uniform writes to two different programs never alias: a write overwritten
/// under its own program is dropped, but a write to a different program at
/// the same location is never touched by that program's elimination.
#[test]
fn uniform_elimination_does_not_cross_programs() {
    let mut cmds = boot(1, 3, 0);
    cmds.push((CommandId::original(2), Command::UseProgram(1)));
    let write_x = CommandId::original(3); // program 1, location 0, overwritten
    cmds.push((write_x, uniform4fv(0)));
    cmds.push((CommandId::original(4), Command::UseProgram(2)));
    let write_y = CommandId::original(5); // program 2, location 0, survives
    cmds.push((write_y, uniform4fv(0)));
    let draw_2 = CommandId::original(6);
    cmds.push((
        draw_2,
        Command::DrawArrays {
            mode: 0x0004,
            first: 0,
            count: 3,
        },
    ));
    cmds.push((CommandId::original(7), Command::UseProgram(1)));
    let write_z = CommandId::original(8); // program 1, location 0 again, survives
    cmds.push((write_z, uniform4fv(0)));
    let draw_1 = CommandId::original(9);
    cmds.push((
        draw_1,
        Command::DrawArrays {
            mode: 0x0004,
            first: 0,
            count: 3,
        },
    ));

    let states = states_before(&cmds);
    let (surviving, _) = DeadCodeEliminator::new(vec![draw_1, draw_2]).run(&cmds, &states);
    let surviving_ids: Vec<CommandId> = surviving.iter().map(|(id, _)| *id).collect();

    assert!(!surviving_ids.contains(&write_x));
    assert!(surviving_ids.contains(&write_y));
    assert!(surviving_ids.contains(&write_z));
    assert!(surviving_ids.contains(&draw_1));
    assert!(surviving_ids.contains(&draw_2));
}

/// `LinkProgram`'s `ProgramInfo` extra seeds one `GetUniformLocation` query
/// per array element, end to end through a real pipeline run.
#[test]
fn uniform_array_locations_are_seeded_through_the_pipeline() {
    let transformer = transformer(desktop_core("3.0"));
    let mut pipeline = Pipeline::new().push(Box::new(transformer));
    let mut sink = CollectingSink::new(State::new());

    let mut cmds = boot(1, 2, 0);
    cmds.push((
        CommandId::original(2),
        Command::LinkProgram {
            program: 1,
            extras: vec![Extra::ProgramInfo {
                active_uniforms: vec![UniformInfo {
                    name: "u_matrices".into(),
                    location: 0,
                    array_size: 4,
                    gl_type: 0x8B5C, // GL_FLOAT_MAT4
                }],
                active_attributes: vec![],
            }],
        },
    ));
    pipeline.run(cmds.into_iter().map(Atom::from).collect(), &mut sink);

    let queries = sink
        .emitted
        .iter()
        .filter(|(_, c)| matches!(c, Command::GetUniformLocation { .. }))
        .count();
    assert_eq!(queries, 4);
}
