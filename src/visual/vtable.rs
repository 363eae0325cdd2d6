use std::sync::{Arc, Weak};

use super::asset::ScriptProgram;
use crate::objects::{DispatchSlot, DispatchTable};
use crate::types::{BinaryModule, MethodId, VirtualMethodInfo};

/// Packs a `(script type index, method index)` pair into the handle exposed to callers.
pub fn method_id(type_index: u32, method: usize) -> MethodId {
    MethodId((u64::from(type_index) << 32) | method as u64)
}

pub fn split_method_id(id: MethodId) -> (u32, usize) {
    ((id.0 >> 32) as u32, (id.0 & u64::from(u32::MAX)) as usize)
}

/// Slot `i` points at the nearest override of `virtuals[i]` along `chain` (most-derived
/// script first), matched by name and parameter count.
pub fn build_dispatch_table(
    module: &Weak<dyn BinaryModule>,
    virtuals: &[VirtualMethodInfo],
    chain: &[(u32, Arc<ScriptProgram>)],
) -> DispatchTable {
    let slots = virtuals
        .iter()
        .map(|virtual_method| {
            let name = &virtual_method.signature.name;
            let count = virtual_method.signature.params.len();
            chain
                .iter()
                .find_map(|(type_index, program)| {
                    program
                        .methods
                        .iter()
                        .position(|m| {
                            m.flags.contains(super::asset::MethodFlags::OVERRIDE)
                                && &m.name == name
                                && m.signature.params.len() == count
                        })
                        .map(|index| DispatchSlot::Override { module: module.clone(), method: method_id(*type_index, index) })
                })
                .unwrap_or(DispatchSlot::Base)
        })
        .collect();
    DispatchTable { slots }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphData};
    use crate::nodes;
    use crate::signature::{MethodSignature, ParamSignature};
    use crate::variant::{Variant, VariantKind, VariantType};
    use crate::visual::meta::ScriptMetadata;

    fn virtual_method(name: &str, params: usize) -> VirtualMethodInfo {
        let mut signature = MethodSignature::new(name);
        for i in 0..params {
            signature = signature.param(ParamSignature::new(format!("p{i}"), VariantType::new(VariantKind::Float)));
        }
        VirtualMethodInfo { signature, base: Arc::new(|_, _| Ok(Variant::Null)) }
    }

    fn program(data: GraphData, virtuals: &[VirtualMethodInfo]) -> Arc<ScriptProgram> {
        let graph = Graph::from_data(data).unwrap();
        Arc::new(ScriptProgram::build("S", "s", graph, ScriptMetadata::new("Actor"), virtuals).0)
    }

    #[test]
    fn method_ids_round_trip() {
        assert_eq!(split_method_id(method_id(7, 3)), (7, 3));
    }

    #[test]
    fn nearest_override_wins() {
        let virtuals = vec![virtual_method("Tick", 1), virtual_method("Start", 0), virtual_method("Stop", 0)];
        let base = program(
            GraphData::new().node(nodes::method_override(1, "Tick", 1)).node(nodes::method_override(2, "Start", 0)),
            &virtuals,
        );
        let derived = program(GraphData::new().node(nodes::method_override(1, "Start", 0)), &virtuals);
        let module: Weak<dyn BinaryModule> = Weak::<crate::native::NativeModule>::new();

        let table = build_dispatch_table(&module, &virtuals, &[(5, derived), (4, base)]);
        let ids: Vec<_> = table
            .slots
            .iter()
            .map(|slot| match slot {
                DispatchSlot::Override { method, .. } => Some(split_method_id(*method)),
                DispatchSlot::Base => None,
            })
            .collect();
        assert_eq!(ids, vec![Some((4, 0)), Some((5, 0)), None]);
        assert_eq!(table.overridden(), 2);
    }
}
