use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::graph::GraphData;
use crate::native::{NativeModule, NativeTypeBuilder};
use crate::objects::ObjectRef;
use crate::scripting::Scripting;
use crate::signature::{MethodSignature, ParamSignature};
use crate::types::BinaryModule;
use crate::variant::json;
use crate::variant::{Variant, VariantKind, VariantType};
use crate::visual::{ScriptMetadata, VisualScriptingModule};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    pub scripts: Vec<FixtureScript>,
    #[serde(default)]
    pub instances: Vec<FixtureInstance>,
    #[serde(default)]
    pub steps: Vec<FixtureStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureScript {
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_base")]
    pub base: String,
    pub graph: GraphData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureInstance {
    pub label: String,
    pub script: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStep {
    /// Graph method called by name on an instance.
    Call(FixtureCall),
    /// Virtual method of the native base called through the object's dispatch table.
    Virtual(FixtureCall),
    Event(FixtureEvent),
    /// Advances the main-thread queue by this many seconds.
    Tick(f32),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureCall {
    pub instance: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureEvent {
    /// Absent for static events.
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub scripts: Vec<String>,
    pub results: Vec<StepResult>,
    pub instances: Vec<InstanceSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceSummary {
    pub label: String,
    pub script: String,
    pub parameters: Map<String, Value>,
}

/// Scripting host with the built-in `ScriptingObject` → `Actor` type set.
///
/// `Actor` has the virtual `Tick(dt)`, a static `Log(message)` method that appends to
/// [`HarnessHost::take_logs`], the instance event `Actor.Clicked` and the static event
/// `Actor.GlobalPulse`. Subscribe calls are counted per event.
pub struct HarnessHost {
    pub host: Arc<Scripting>,
    pub module: Arc<VisualScriptingModule>,
    pub native: Arc<NativeModule>,
    logs: Arc<Mutex<Vec<String>>>,
    subscriptions: Arc<Mutex<HashMap<String, i64>>>,
}

impl HarnessHost {
    pub fn new(config: RuntimeConfig) -> Self {
        let host = Scripting::new(config);
        let native = NativeModule::new("Engine");
        let logs = Arc::new(Mutex::new(Vec::new()));
        native.register(NativeTypeBuilder::new("ScriptingObject"));
        let sink = logs.clone();
        native.register(
            NativeTypeBuilder::new("Actor")
                .base("ScriptingObject")
                .virtual_method(
                    MethodSignature::new("Tick").param(ParamSignature::new("dt", VariantType::new(VariantKind::Float))),
                    |_, _| Ok(Variant::Null),
                )
                .method(
                    MethodSignature::new("Log")
                        .as_static()
                        .param(ParamSignature::new("message", VariantType::new(VariantKind::String))),
                    move |_, params| {
                        let message = match params.first() {
                            Some(Variant::String(text)) => text.clone(),
                            Some(other) => json::to_json(other).to_string(),
                            None => String::new(),
                        };
                        sink.lock().push(message);
                        Ok(Variant::Null)
                    },
                )
                .field("Health", VariantType::new(VariantKind::Float)),
        );
        host.types.register_module(native.clone());

        let subscriptions = Arc::new(Mutex::new(HashMap::new()));
        for (name, is_static) in [("Clicked", false), ("GlobalPulse", true)] {
            let counts = subscriptions.clone();
            let key = format!("Actor.{name}");
            host.events.register_event("Actor", name, is_static, move |_, subscribe| {
                *counts.lock().entry(key.clone()).or_insert(0) += if subscribe { 1 } else { -1 };
            });
        }
        let module = VisualScriptingModule::install(&host);
        Self { host, module, native, logs, subscriptions }
    }

    /// Current subscribe balance (`subscribe(true)` minus `subscribe(false)`) of an event.
    pub fn subscriptions(&self, event: &str) -> i64 {
        self.subscriptions.lock().get(event).copied().unwrap_or(0)
    }

    pub fn take_logs(&self) -> Vec<String> {
        std::mem::take(&mut *self.logs.lock())
    }
}

/// Best-effort conversion of fixture arguments. Integral numbers become `Int`, other
/// numbers `Float`.
pub fn variant_from_arg(value: &Value) -> Variant {
    match value {
        Value::Null => Variant::Null,
        Value::Bool(flag) => Variant::Bool(*flag),
        Value::Number(number) => match number.as_i64().and_then(|n| i32::try_from(n).ok()) {
            Some(n) => Variant::Int(n),
            None => Variant::Float(number.as_f64().unwrap_or_default() as f32),
        },
        Value::String(text) => Variant::String(text.clone()),
        Value::Array(items) => Variant::Array(items.iter().map(variant_from_arg).collect()),
        Value::Object(_) => Variant::Null,
    }
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    run_fixture_with_config(fixture, RuntimeConfig::default())
}

pub fn run_fixture_with_config(fixture: &HarnessFixture, config: RuntimeConfig) -> Result<HarnessOutput> {
    let harness = HarnessHost::new(config);
    for script in &fixture.scripts {
        harness
            .module
            .load_script(script.id, &script.name, &script.graph, &ScriptMetadata::new(script.base.clone()))
            .with_context(|| format!("loading script '{}'", script.name))?;
    }

    let mut objects: Vec<(String, ObjectRef)> = Vec::with_capacity(fixture.instances.len());
    for instance in &fixture.instances {
        let script = harness
            .module
            .find_script(instance.script)
            .ok_or_else(|| anyhow!("instance '{}' uses unknown script {}", instance.label, instance.script.simple()))?;
        let object = harness.module.spawn(&script).with_context(|| format!("spawning '{}'", instance.label))?;
        objects.push((instance.label.clone(), object));
    }
    let find = |label: &str| -> Result<ObjectRef> {
        objects
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, object)| object.clone())
            .ok_or_else(|| anyhow!("unknown instance '{label}'"))
    };

    let mut results = Vec::with_capacity(fixture.steps.len());
    for (step, entry) in fixture.steps.iter().enumerate() {
        let (kind, returned) = match entry {
            FixtureStep::Call(call) => {
                let object = find(&call.instance)?;
                let args: Vec<Variant> = call.args.iter().map(variant_from_arg).collect();
                let returned = harness
                    .module
                    .call_method(&object, &call.method, &args)
                    .with_context(|| format!("step {step}: calling '{}'", call.method))?;
                ("call", returned_value(&returned))
            }
            FixtureStep::Virtual(call) => {
                let object = find(&call.instance)?;
                let mut args: Vec<Variant> = call.args.iter().map(variant_from_arg).collect();
                let returned = object
                    .call_virtual(&call.method, &mut args)
                    .with_context(|| format!("step {step}: virtual '{}'", call.method))?;
                ("virtual", returned_value(&returned))
            }
            FixtureStep::Event(event) => {
                let object = event.instance.as_deref().map(find).transpose()?;
                let mut args: Vec<Variant> = event.args.iter().map(variant_from_arg).collect();
                harness.host.events.fire(object.as_ref(), &event.event_type, &event.name, &mut args);
                ("event", None)
            }
            FixtureStep::Tick(dt) => {
                harness.host.tick(*dt);
                ("tick", None)
            }
        };
        let diagnostics = harness
            .host
            .diagnostics
            .take()
            .into_iter()
            .map(|diagnostic| format!("node {}: {}", diagnostic.node_id, diagnostic.error))
            .collect();
        results.push(StepResult { step, kind: kind.to_string(), returned, logs: harness.take_logs(), diagnostics });
    }

    let mut instances = Vec::with_capacity(objects.len());
    for (label, object) in &objects {
        let script = harness.module.script_of(object).map(|script| script.name().to_string()).unwrap_or_default();
        let parameters = BinaryModule::serialize_object(harness.module.as_ref(), object, None);
        instances.push(InstanceSummary { label: label.clone(), script, parameters });
    }
    let scripts = fixture.scripts.iter().map(|script| script.name.clone()).collect();
    Ok(HarnessOutput { scripts, results, instances })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

/// Void calls report no value.
fn returned_value(value: &Variant) -> Option<Value> {
    Some(json::to_json(value)).filter(|value| !value.is_null())
}

fn default_base() -> String {
    "Actor".to_string()
}
