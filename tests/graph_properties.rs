use std::sync::{mpsc, Arc};
use std::thread;

use parking_lot::Mutex;

use kestrel_visual_script::config::{RuntimeConfig, StaticEventFanOut};
use kestrel_visual_script::graph::GRAPH_VERSION;
use kestrel_visual_script::graph_harness::HarnessHost;
use kestrel_visual_script::native::{NativeModule, NativeTypeBuilder};
use kestrel_visual_script::nodes;
use kestrel_visual_script::objects::ObjectRef;
use kestrel_visual_script::signature::{MethodSignature, ParamSignature};
use kestrel_visual_script::types::BinaryModule;
use kestrel_visual_script::variant::Dictionary;
use kestrel_visual_script::visual::ScriptSource;
use kestrel_visual_script::{
    AssetError, AssetState, EvalErrorKind, GraphData, ScriptMetadata, Variant, VariantKind, VariantType, VisualScript,
};
use uuid::Uuid;

fn void() -> VariantType {
    VariantType::new(VariantKind::Null)
}

fn log_signature() -> MethodSignature {
    MethodSignature::new("Log").as_static().param(ParamSignature::new("message", VariantType::new(VariantKind::String)))
}

fn log_node(id: u32, message: &str) -> kestrel_visual_script::NodeData {
    nodes::invoke_method(id, "Actor", "Log", &log_signature(), vec![Variant::from(message)])
}

fn load(harness: &HarnessHost, id: u128, name: &str, graph: &GraphData) -> Arc<VisualScript> {
    harness
        .module
        .load_script(Uuid::from_u128(id), name, graph, &ScriptMetadata::new("Actor"))
        .expect("script loads")
}

fn spawn(harness: &HarnessHost, script: &VisualScript) -> ObjectRef {
    harness.module.spawn(script).expect("spawn instance")
}

fn loop_graph(start: i32, count: i32) -> GraphData {
    GraphData::new()
        .node(nodes::function(1, "Run", &void(), &[], false))
        .node(nodes::for_loop(2, start, count))
        .node(log_node(3, "body"))
        .node(log_node(4, "done"))
        .connect(1, 0, 2, 0)
        .connect(2, 4, 3, 0)
        .connect(2, 6, 4, 0)
}

#[test]
fn for_loop_with_start_at_count_only_completes() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let script = load(&harness, 1, "Empty", &loop_graph(5, 3));
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["done".to_string()]);

    let script = load(&harness, 2, "Counted", &loop_graph(0, 3));
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["body", "body", "body", "done"]);
    assert!(harness.host.diagnostics.is_empty());
}

#[test]
fn cast_value_passes_matching_values_and_defaults_the_rest() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let int = VariantType::new(VariantKind::Int);
    let graph = GraphData::new()
        .node(nodes::function(1, "Check", &int, &[("value", VariantType::default(), false)], true))
        .node(nodes::cast_value(2, &int))
        .node(nodes::return_value(3, Variant::Null))
        .node(log_node(4, "failed"))
        .node(nodes::return_value(5, Variant::Null))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 1, 1)
        .connect(2, 2, 3, 0)
        .connect(3, 1, 2, 4)
        .connect(2, 3, 4, 0)
        .connect(4, 2, 5, 0)
        .connect(5, 1, 2, 4);
    let script = load(&harness, 3, "Caster", &graph);

    let ok = harness.module.invoke(&script, "Check", None, &[Variant::Int(7)]).expect("static call");
    assert_eq!(ok, Variant::Int(7));
    assert!(harness.take_logs().is_empty());

    let failed = harness.module.invoke(&script, "Check", None, &[Variant::from("seven")]).expect("static call");
    assert_eq!(failed, Variant::Int(0));
    assert_eq!(harness.take_logs(), vec!["failed".to_string()]);

    let null = harness.module.invoke(&script, "Check", None, &[Variant::Null]).expect("static call");
    assert_eq!(null, Variant::Int(0));
}

#[test]
fn default_instance_serializes_empty_against_itself() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .parameter(Uuid::from_u128(1), "Speed", Variant::Float(1.5))
        .parameter(Uuid::from_u128(2), "Name", Variant::from("Bob"));
    let script = load(&harness, 4, "Defaults", &graph);
    let default = harness.module.default_instance(&script).expect("default instance");
    assert!(harness.module.serialize_object(&default, Some(&default)).is_empty());
    assert_eq!(harness.module.serialize_object(&default, None).len(), 2);
}

#[test]
fn concurrent_invocations_keep_separate_stacks() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let value = Uuid::from_u128(0xa1);
    let graph = GraphData::new()
        .parameter(value, "Value", Variant::Int(0))
        .node(nodes::function(1, "Store", &void(), &[("value", VariantType::new(VariantKind::Int), false)], false))
        .node(nodes::set_parameter(2, value, Variant::Int(0)))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 1, 1)
        .node(nodes::function(3, "Spin", &void(), &[], false))
        .node(nodes::math(4, nodes::math::ADD))
        .node(nodes::return_value(5, Variant::Null))
        .connect(4, 0, 4, 2)
        .connect(3, 0, 5, 0)
        .connect(5, 1, 4, 2);
    let script = load(&harness, 5, "Worker", &graph);
    let a = spawn(&harness, &script);
    let b = spawn(&harness, &script);

    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..200 {
                harness.module.call_method(&a, "Store", &[Variant::Int(i)]).expect("store");
            }
        });
        scope.spawn(|| {
            for _ in 0..20 {
                harness.module.call_method(&b, "Spin", &[]).expect("spin");
            }
        });
    });
    assert_eq!(script.parameter(a.id(), "Value"), Some(Variant::Int(199)));
    assert_eq!(script.parameter(b.id(), "Value"), Some(Variant::Int(0)));
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::CallStackOverflow), 20);
}

fn wide_signature(name: &str, params: usize, out_index: usize) -> MethodSignature {
    (0..params).fold(MethodSignature::new(name).as_static(), |signature, i| {
        let ty = VariantType::new(VariantKind::Int);
        signature.param(if i == out_index { ParamSignature::out(format!("p{i}"), ty) } else { ParamSignature::new(format!("p{i}"), ty) })
    })
}

#[test]
fn out_parameter_31_is_routed_and_32_is_rejected_at_load() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let fill = wide_signature("Fill", 32, 31);
    harness.native.register(NativeTypeBuilder::new("Filler").base("ScriptingObject").method(fill.clone(), |_, params| {
        params[31] = Variant::Int(77);
        Ok(Variant::Null)
    }));
    let out_box = nodes::function::PARAMS_BOX + 31;
    let graph = GraphData::new()
        .node(nodes::function(1, "Collect", &VariantType::new(VariantKind::Int), &[], true))
        .node(nodes::invoke_method(2, "Filler", "Fill", &fill, Vec::new()))
        .node(nodes::return_value(3, Variant::Null))
        .connect(1, 0, 2, 0)
        .connect(2, 2, 3, 0)
        .connect(3, 1, 2, out_box);
    let script = load(&harness, 6, "Wide", &graph);
    let returned = harness.module.invoke(&script, "Collect", None, &[]).expect("collect");
    assert_eq!(returned, Variant::Int(77));
    assert!(harness.host.diagnostics.is_empty());

    let too_wide = wide_signature("Fill", 33, 32);
    let graph = GraphData::new()
        .node(nodes::function(1, "Collect", &void(), &[], true))
        .node(nodes::invoke_method(2, "Filler", "Fill", &too_wide, Vec::new()))
        .connect(1, 0, 2, 0);
    let script = load(&harness, 7, "TooWide", &graph);
    assert!(script.is_loaded());
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::TooManyOutParameters), 1);
}

fn pulse_graph(message: &str) -> GraphData {
    GraphData::new()
        .node(nodes::function(1, "Start", &void(), &[], false))
        .node(nodes::bind_event(2, "Actor", "GlobalPulse", "OnPulse"))
        .node(nodes::function(3, "OnPulse", &void(), &[], false))
        .node(log_node(4, message))
        .connect(1, 0, 2, 0)
        .connect(3, 0, 4, 0)
}

fn pulse_logs(fan_out: StaticEventFanOut) -> (Vec<String>, i64) {
    let harness = HarnessHost::new(RuntimeConfig { static_event_fan_out: fan_out, ..RuntimeConfig::default() });
    let first = load(&harness, 8, "First", &pulse_graph("first"));
    let second = load(&harness, 9, "Second", &pulse_graph("second"));
    for script in [&first, &second] {
        let object = spawn(&harness, script);
        harness.module.call_method(&object, "Start", &[]).expect("start");
    }
    harness.host.events.fire(None, "Actor", "GlobalPulse", &mut []);
    (harness.take_logs(), harness.subscriptions("Actor.GlobalPulse"))
}

#[test]
fn static_events_stop_at_the_first_script_unless_configured() {
    let (logs, subscribed) = pulse_logs(StaticEventFanOut::FirstScript);
    assert_eq!(logs, vec!["first".to_string()]);
    assert_eq!(subscribed, 2);

    let (logs, _) = pulse_logs(StaticEventFanOut::AllScripts);
    assert_eq!(logs, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn self_nesting_and_missing_bases_fail_to_load() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let id = Uuid::from_u128(10);
    let meta = ScriptMetadata::new(id.simple().to_string());
    let err = harness.module.load_script(id, "Nested", &GraphData::new(), &meta).unwrap_err();
    assert_eq!(err, AssetError::CircularNesting(id));
    let script = harness.module.find_script(id).expect("asset registered");
    assert!(matches!(script.state(), AssetState::LoadFailed(AssetError::CircularNesting(_))));
    assert!(harness.host.types.find_type(script.type_name()).is_none());

    let err = harness
        .module
        .load_script(Uuid::from_u128(11), "Orphan", &GraphData::new(), &ScriptMetadata::new("Ghost"))
        .unwrap_err();
    assert_eq!(err, AssetError::BaseTypeMissing("Ghost".to_string()));
}

#[test]
fn missing_chunks_fail_with_the_chunk_name() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let source = ScriptSource { graph: None, metadata: Some(ScriptMetadata::new("Actor").encode().expect("meta")) };
    let script = harness.module.create_script(Uuid::from_u128(12), "NoGraph", source);
    assert_eq!(harness.module.load(&script), Err(AssetError::MissingDataChunk("graph")));
    assert_eq!(
        script.wait_for_loaded(std::time::Duration::from_millis(1)),
        Err(AssetError::MissingDataChunk("graph"))
    );
}

#[test]
fn derived_scripts_share_instances_with_their_base_script() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let armor = Uuid::from_u128(0xa7);
    let speed = Uuid::from_u128(0x5b);
    let base = GraphData::new()
        .parameter(armor, "Armor", Variant::Int(3))
        .node(nodes::function(1, "Harden", &void(), &[], false))
        .node(nodes::set_parameter(2, armor, Variant::Int(9)))
        .connect(1, 0, 2, 0);
    let base = load(&harness, 13, "Unit", &base);
    let derived = GraphData::new().parameter(speed, "Speed", Variant::Float(2.0));
    let derived = harness
        .module
        .load_script(Uuid::from_u128(14), "Scout", &derived, &ScriptMetadata::new(base.type_name()))
        .expect("derived loads");
    let object = spawn(&harness, &derived);

    harness.module.call_method(&object, "Harden", &[]).expect("inherited method");
    assert_eq!(base.parameter(object.id(), "Armor"), Some(Variant::Int(9)));
    let data = harness.module.serialize_object(&object, None);
    assert_eq!(data.len(), 2);
    assert!(harness.host.types.is_a_name(object.type_handle(), "Actor"));
}

#[cfg(feature = "editor")]
#[test]
fn deprecated_graphs_are_resaved_after_load() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new().parameter(Uuid::from_u128(1), "Speed", Variant::Float(1.0));
    let source = ScriptSource {
        graph: Some(graph.encode_deprecated().expect("legacy encode")),
        metadata: Some(ScriptMetadata::new("Actor").encode().expect("meta")),
    };
    let script = harness.module.create_script(Uuid::from_u128(15), "Legacy", source);
    harness.module.load(&script).expect("legacy graph loads");
    let bytes = script.source().graph.expect("graph chunk");
    assert_eq!(GraphData::decode(&bytes).expect("decode").version, GRAPH_VERSION);
}

#[test]
fn main_thread_invocation_delivers_the_result_after_a_tick() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .node(nodes::function(1, "Answer", &VariantType::new(VariantKind::Int), &[], false))
        .node(nodes::return_value(2, Variant::Int(42)))
        .connect(1, 0, 2, 0);
    let script = load(&harness, 16, "Oracle", &graph);
    let object = spawn(&harness, &script);

    let rx = harness.module.invoke_on_main_thread(object, "Answer", Vec::new()).expect("queued");
    assert!(rx.try_recv().is_err());
    harness.host.tick(0.0);
    assert_eq!(rx.recv().expect("result"), Ok(Variant::Int(42)));
}

#[test]
fn id_changes_and_deletion_follow_the_instance() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .parameter(Uuid::from_u128(1), "Hits", Variant::Int(0))
        .node(nodes::function(1, "Start", &void(), &[], false))
        .node(nodes::bind_event(2, "Actor", "Clicked", "Start"))
        .connect(1, 0, 2, 0);
    let script = load(&harness, 17, "Tracked", &graph);
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Start", &[]).expect("bind");
    assert_eq!(harness.subscriptions("Actor.Clicked"), 1);

    let old_id = object.id();
    let new_id = Uuid::from_u128(0xbeef);
    harness.host.change_object_id(&object, new_id);
    assert!(script.instance_params(old_id).is_none());
    assert_eq!(script.instance_params(new_id), Some(vec![Variant::Int(0)]));

    let before = script.instance_count();
    harness.host.delete_object(&object);
    assert_eq!(script.instance_count(), before - 1);
    assert_eq!(harness.subscriptions("Actor.Clicked"), 0);
}

#[test]
fn unload_detaches_the_type_but_keeps_the_slot() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let script = load(&harness, 18, "Transient", &GraphData::new());
    let handle = harness.module.script_type(&script).expect("handle");
    assert_eq!(harness.host.types.find_type(script.type_name()), Some(handle.clone()));

    harness.module.unload(&script, false);
    assert_eq!(script.state(), AssetState::Unloaded);
    assert!(harness.host.types.find_type(script.type_name()).is_none());
    assert_eq!(harness.module.detached_names(), vec![script.type_name().to_string()]);
    assert_eq!(handle.info().map(|info| info.name.clone()), Some(script.type_name().to_string()));
}

#[test]
fn repeated_reloads_detach_a_name_once() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let script = load(&harness, 19, "Flicker", &GraphData::new());
    for _ in 0..3 {
        harness.module.reload(&script).expect("reload");
    }
    assert!(script.is_loaded());
    assert_eq!(harness.module.detached_names(), vec![script.type_name().to_string()]);
}

#[test]
fn reload_during_a_native_call_keeps_parameters_aligned() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let (entered_tx, entered_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let (entered_tx, resume_rx) = (Mutex::new(entered_tx), Mutex::new(resume_rx));
    let pause = MethodSignature::new("Pause").as_static();
    harness.native.register(NativeTypeBuilder::new("Hook").base("ScriptingObject").method(pause.clone(), move |_, _| {
        let _ = entered_tx.lock().send(());
        let _ = resume_rx.lock().recv();
        Ok(Variant::Null)
    }));

    let health = Uuid::from_u128(0x4e);
    let mana = Uuid::from_u128(0x3a);
    let graph = |with_mana: bool| {
        let graph = if with_mana {
            GraphData::new().parameter(mana, "Mana", Variant::Float(5.0))
        } else {
            GraphData::new()
        };
        graph
            .parameter(health, "Health", Variant::Float(100.0))
            .node(nodes::function(1, "Run", &void(), &[], false))
            .node(nodes::invoke_method(2, "Hook", "Pause", &pause, Vec::new()))
            .node(nodes::set_parameter(3, health, Variant::Float(7.0)))
            .connect(1, 0, 2, 0)
            .connect(2, 2, 3, 0)
    };
    let script = load(&harness, 50, "Paused", &graph(false));
    let object = spawn(&harness, &script);

    thread::scope(|scope| {
        let run = scope.spawn(|| harness.module.call_method(&object, "Run", &[]));
        entered_rx.recv().expect("native call entered");
        load(&harness, 50, "Paused", &graph(true));
        resume_tx.send(()).expect("resume");
        run.join().expect("evaluation thread").expect("run");
    });
    assert_eq!(script.parameter(object.id(), "Health"), Some(Variant::Float(7.0)));
    assert_eq!(script.parameter(object.id(), "Mana"), Some(Variant::Float(5.0)));
    assert!(harness.host.diagnostics.is_empty());
}

#[test]
fn sequence_continues_after_a_runaway_output() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .node(nodes::function(1, "Run", &void(), &[], false))
        .node(nodes::sequence(2))
        .node(log_node(3, ""))
        .node(nodes::math(4, nodes::math::ADD))
        .node(log_node(5, "after"))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 3, 0)
        .connect(3, nodes::function::PARAMS_BOX, 4, 2)
        .connect(4, 0, 4, 2)
        .connect(2, 2, 5, 0);
    let script = load(&harness, 51, "Runaway", &graph);
    let object = spawn(&harness, &script);

    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["0".to_string(), "after".to_string()]);
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::CallStackOverflow), 1);

    harness.module.call_method(&object, "Run", &[]).expect("second run");
    assert_eq!(harness.take_logs(), vec!["0".to_string(), "after".to_string()]);
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::CallStackOverflow), 2);
}

fn while_graph(with_break: bool) -> GraphData {
    let graph = GraphData::new()
        .node(nodes::function(1, "Run", &void(), &[], false))
        .node(nodes::while_loop(2))
        .node(nodes::invoke_method(3, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(log_node(4, "done"))
        .connect(1, 0, 2, 0)
        .connect(2, 3, 3, 0)
        .connect(3, nodes::function::PARAMS_BOX, 2, 4)
        .connect(2, 5, 4, 0);
    if !with_break {
        return graph
            .node(nodes::math(5, nodes::math::LESS))
            .node(nodes::constant(6, Variant::Int(3)))
            .connect(2, 1, 5, 2)
            .connect(5, 0, 2, 4)
            .connect(5, 1, 6, 0);
    }
    graph
        .node(nodes::constant(5, Variant::Bool(true)))
        .node(nodes::if_node(6))
        .node(nodes::math(7, nodes::math::EQUAL))
        .node(nodes::constant(8, Variant::Int(1)))
        .connect(2, 1, 5, 0)
        .connect(3, 2, 6, 0)
        .connect(6, 1, 7, 2)
        .connect(7, 0, 2, 4)
        .connect(7, 1, 8, 0)
        .connect(6, 2, 2, 2)
}

#[test]
fn while_loops_until_the_condition_fails_or_break_fires() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let script = load(&harness, 20, "Counting", &while_graph(false));
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["0", "1", "2", "done"]);

    let script = load(&harness, 21, "Breaking", &while_graph(true));
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["0", "1", "done"]);
    assert!(harness.host.diagnostics.is_empty());
}

#[test]
fn sequence_fires_outputs_in_box_order() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .node(nodes::function(1, "Run", &void(), &[], false))
        .node(nodes::sequence(2))
        .node(log_node(3, "a"))
        .node(log_node(4, "b"))
        .node(log_node(5, "c"))
        .connect(1, 0, 2, 0)
        .connect(2, 3, 5, 0)
        .connect(2, 1, 3, 0)
        .connect(2, 2, 4, 0);
    let script = load(&harness, 22, "Ordered", &graph);
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["a", "b", "c"]);
}

#[test]
fn branch_on_enum_follows_the_matching_case() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .node(nodes::function(1, "Pick", &void(), &[("mode", VariantType::default(), false)], false))
        .node(nodes::branch_on_enum(2, &[10, 20, 30]))
        .node(log_node(3, "ten"))
        .node(log_node(4, "twenty"))
        .node(log_node(5, "thirty"))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 1, 1)
        .connect(2, 2, 3, 0)
        .connect(2, 3, 4, 0)
        .connect(2, 4, 5, 0);
    let script = load(&harness, 23, "Switch", &graph);
    let object = spawn(&harness, &script);
    let mode = |value: i64| Variant::Enum { type_name: "Mode".to_string(), value };

    harness.module.call_method(&object, "Pick", &[mode(20)]).expect("pick");
    assert_eq!(harness.take_logs(), vec!["twenty"]);
    harness.module.call_method(&object, "Pick", &[mode(99)]).expect("unknown case");
    harness.module.call_method(&object, "Pick", &[Variant::Int(10)]).expect("not an enum");
    assert!(harness.take_logs().is_empty());
}

fn array_loop_graph() -> GraphData {
    GraphData::new()
        .node(nodes::function(1, "Run", &void(), &[("items", VariantType::default(), false)], false))
        .node(nodes::array_for_each(2))
        .node(nodes::invoke_method(3, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(nodes::if_node(4))
        .node(nodes::math(5, nodes::math::EQUAL))
        .node(nodes::constant(6, Variant::from("stop")))
        .node(log_node(7, "done"))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 1, 1)
        .connect(2, 3, 3, 0)
        .connect(3, nodes::function::PARAMS_BOX, 2, 4)
        .connect(3, 2, 4, 0)
        .connect(4, 1, 5, 2)
        .connect(5, 0, 2, 4)
        .connect(5, 1, 6, 0)
        .connect(4, 2, 2, 2)
        .connect(2, 6, 7, 0)
}

#[test]
fn array_for_each_visits_items_until_break() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let script = load(&harness, 24, "Items", &array_loop_graph());
    let object = spawn(&harness, &script);
    let items = Variant::Array(vec![Variant::from("a"), Variant::from("stop"), Variant::from("c")]);

    harness.module.call_method(&object, "Run", &[items]).expect("run");
    assert_eq!(harness.take_logs(), vec!["a", "stop", "done"]);
    harness.module.call_method(&object, "Run", &[Variant::Null]).expect("null array");
    assert_eq!(harness.take_logs(), vec!["done"]);

    harness.module.call_method(&object, "Run", &[Variant::Int(5)]).expect("wrong input");
    assert!(harness.take_logs().is_empty());
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::WrongVariantType), 1);
}

fn dictionary_loop_graph(with_break: bool) -> GraphData {
    let graph = GraphData::new()
        .node(nodes::function(1, "Run", &void(), &[("entries", VariantType::default(), false)], false))
        .node(nodes::dictionary_for_each(2))
        .node(nodes::invoke_method(3, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(nodes::math(4, nodes::math::ADD))
        .node(log_node(5, "done"))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 1, 1)
        .connect(2, 3, 3, 0)
        .connect(3, nodes::function::PARAMS_BOX, 4, 2)
        .connect(4, 0, 2, 4)
        .connect(4, 1, 2, 5)
        .connect(2, 6, 5, 0);
    if with_break {
        graph.connect(3, 2, 2, 2)
    } else {
        graph
    }
}

#[test]
fn dictionary_for_each_exposes_keys_and_values() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let entries: Dictionary =
        [(Variant::from("a"), Variant::Int(1)), (Variant::from("b"), Variant::Int(2))].into_iter().collect();

    let script = load(&harness, 25, "Entries", &dictionary_loop_graph(false));
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[Variant::Dictionary(entries.clone())]).expect("run");
    assert_eq!(harness.take_logs(), vec!["a1", "b2", "done"]);

    harness.module.call_method(&object, "Run", &[Variant::Array(Vec::new())]).expect("wrong input");
    assert!(harness.take_logs().is_empty());
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::WrongVariantType), 1);

    let script = load(&harness, 26, "FirstEntry", &dictionary_loop_graph(true));
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Run", &[Variant::Dictionary(entries)]).expect("run");
    assert_eq!(harness.take_logs(), vec!["a1", "done"]);
}

#[test]
fn reroute_passes_impulses_and_values_through() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let string = VariantType::new(VariantKind::String);
    let graph = GraphData::new()
        .node(nodes::function(1, "Say", &void(), &[("text", string, false)], false))
        .node(nodes::reroute(2))
        .node(nodes::invoke_method(3, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(nodes::reroute(4))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 3, 0)
        .connect(3, nodes::function::PARAMS_BOX, 4, 1)
        .connect(4, 0, 1, 1);
    let script = load(&harness, 27, "Relay", &graph);
    let object = spawn(&harness, &script);
    harness.module.call_method(&object, "Say", &[Variant::from("hello")]).expect("say");
    assert_eq!(harness.take_logs(), vec!["hello"]);
}

#[test]
fn cast_by_type_and_this_instance() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .node(nodes::function(1, "Check", &void(), &[("value", VariantType::default(), false)], true))
        .node(nodes::cast(2, "Actor"))
        .node(log_node(3, "actor"))
        .node(log_node(4, "other"))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 1, 1)
        .connect(2, 2, 3, 0)
        .connect(2, 3, 4, 0)
        .node(nodes::function(10, "Who", &void(), &[], false))
        .node(nodes::cast(11, "Actor"))
        .node(nodes::this_instance(12))
        .node(log_node(13, "self"))
        .node(log_node(14, "nobody"))
        .connect(10, 0, 11, 0)
        .connect(11, 1, 12, 0)
        .connect(11, 2, 13, 0)
        .connect(11, 3, 14, 0)
        .node(nodes::function(20, "WhoStatic", &void(), &[], true))
        .connect(20, 0, 11, 0);
    let script = load(&harness, 28, "Caster", &graph);
    let object = spawn(&harness, &script);

    harness.module.invoke(&script, "Check", None, &[Variant::from(object.clone())]).expect("actor");
    harness.module.invoke(&script, "Check", None, &[Variant::Int(3)]).expect("int");
    harness.module.invoke(&script, "Check", None, &[Variant::Object(None)]).expect("null object");
    let plain = harness.host.types.find_type("ScriptingObject").expect("base type");
    let plain = harness.host.spawn(&plain).expect("plain object");
    harness.module.invoke(&script, "Check", None, &[Variant::from(plain)]).expect("plain");
    assert_eq!(harness.take_logs(), vec!["actor", "other", "other", "other"]);

    harness.module.call_method(&object, "Who", &[]).expect("who");
    harness.module.invoke(&script, "WhoStatic", None, &[]).expect("who static");
    assert_eq!(harness.take_logs(), vec!["self", "nobody"]);
}

fn field_graph(type_name: &str, shield: bool) -> GraphData {
    let float = VariantType::new(VariantKind::Float);
    let int = VariantType::new(VariantKind::Int);
    let graph = if shield {
        GraphData::new().parameter(Uuid::from_u128(0x5d), "Shield", Variant::Int(1))
    } else {
        GraphData::new()
    };
    graph
        .parameter(Uuid::from_u128(0xa7), "Armor", Variant::Int(3))
        .node(nodes::function(1, "Run", &void(), &[], false))
        .node(nodes::set_field(2, "Actor", "Health", &float, false, Variant::Float(42.5)))
        .node(nodes::invoke_method(3, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(nodes::get_field(4, "Actor", "Health", &float, false))
        .node(nodes::set_field(5, type_name, "Armor", &int, false, Variant::Int(9)))
        .node(nodes::invoke_method(6, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(nodes::get_field(7, type_name, "Armor", &int, false))
        .connect(1, 0, 2, 0)
        .connect(2, 3, 3, 0)
        .connect(3, nodes::function::PARAMS_BOX, 4, 1)
        .connect(3, 2, 5, 0)
        .connect(5, 3, 6, 0)
        .connect(6, nodes::function::PARAMS_BOX, 7, 1)
        .node(nodes::function(10, "Peek", &void(), &[], false))
        .node(nodes::invoke_method(11, "Actor", "Log", &log_signature(), vec![Variant::Null]))
        .node(nodes::get_field(12, type_name, "Armor", &int, false))
        .connect(10, 0, 11, 0)
        .connect(11, nodes::function::PARAMS_BOX, 12, 1)
}

#[test]
fn field_nodes_reach_native_fields_and_script_parameters() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let type_name = Uuid::from_u128(29).simple().to_string();
    let script = load(&harness, 29, "Fields", &field_graph(&type_name, false));
    let object = spawn(&harness, &script);

    harness.module.call_method(&object, "Run", &[]).expect("run");
    assert_eq!(harness.take_logs(), vec!["42.5", "9"]);
    assert_eq!(object.native_field("Health"), Some(Variant::Float(42.5)));
    assert_eq!(script.parameter(object.id(), "Armor"), Some(Variant::Int(9)));

    load(&harness, 29, "Fields", &field_graph(&type_name, true));
    assert_eq!(script.parameter(object.id(), "Shield"), Some(Variant::Int(1)));
    harness.module.call_method(&object, "Peek", &[]).expect("peek");
    assert_eq!(harness.take_logs(), vec!["9"]);
    assert!(harness.host.diagnostics.is_empty());
}

#[test]
fn invoke_falls_back_to_managed_classes() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let int = VariantType::new(VariantKind::Int);
    let double = MethodSignature::new("Double").as_static().returns(int.clone()).param(ParamSignature::new("value", int.clone()));
    let managed = NativeModule::managed("Managed");
    managed.register(NativeTypeBuilder::new("MathUtil").method(double.clone(), |_, params| {
        Ok(Variant::Int(params[0].as_i32() * 2))
    }));
    let graph = GraphData::new()
        .node(nodes::function(1, "Calc", &int, &[], true))
        .node(nodes::invoke_method(2, "MathUtil", "Double", &double, vec![Variant::Int(21)]))
        .node(nodes::return_value(3, Variant::Null))
        .connect(1, 0, 3, 0)
        .connect(3, 1, 2, nodes::function::RETURN_BOX);
    let script = load(&harness, 30, "Managed", &graph);

    harness.module.invoke(&script, "Calc", None, &[]).expect("unresolved call");
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::MissingType), 1);

    harness.host.types.set_managed_module(managed.clone());
    let doubled = harness.module.invoke(&script, "Calc", None, &[]).expect("managed call");
    assert_eq!(doubled, Variant::Int(42));
    assert!(harness.host.types.find_type("MathUtil").is_none());
}

#[test]
fn bind_event_reports_missing_events_and_instances() {
    let harness = HarnessHost::new(RuntimeConfig::default());
    let graph = GraphData::new()
        .node(nodes::function(1, "Start", &void(), &[], false))
        .node(nodes::bind_event(2, "Actor", "Vanished", "OnClicked"))
        .node(log_node(3, "bound"))
        .connect(1, 0, 2, 0)
        .connect(2, 1, 3, 0)
        .node(nodes::function(4, "Setup", &void(), &[], true))
        .node(nodes::bind_event(5, "Actor", "Clicked", "OnClicked"))
        .connect(4, 0, 5, 0)
        .connect(5, 1, 3, 0)
        .node(nodes::function(6, "OnClicked", &void(), &[], false));
    let script = load(&harness, 31, "Binder", &graph);
    let object = spawn(&harness, &script);

    harness.module.call_method(&object, "Start", &[]).expect("start");
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::MissingEvent), 1);
    harness.module.invoke(&script, "Setup", None, &[]).expect("setup");
    assert_eq!(harness.host.diagnostics.count(EvalErrorKind::MissingInstance), 1);
    assert!(harness.take_logs().is_empty());
    assert_eq!(harness.subscriptions("Actor.Clicked"), 0);
}
