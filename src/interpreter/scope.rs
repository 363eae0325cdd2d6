use crate::variant::Variant;

struct ReturnedValue {
    node_id: u32,
    box_id: u32,
    value: Variant,
}

/// Per-invocation storage: the caller's parameters plus values cached by nodes that
/// compute once and are read from several boxes (casts, loop iterators, call results).
pub(crate) struct Scope<'a> {
    pub parameters: &'a [Variant],
    returned_values: Vec<ReturnedValue>,
    pub function_return: Variant,
}

impl<'a> Scope<'a> {
    pub fn new(parameters: &'a [Variant]) -> Self {
        Self { parameters, returned_values: Vec::new(), function_return: Variant::Null }
    }

    pub fn cached(&self, node_id: u32, box_id: u32) -> Option<&Variant> {
        self.returned_values
            .iter()
            .find(|entry| entry.node_id == node_id && entry.box_id == box_id)
            .map(|entry| &entry.value)
    }

    /// Stores a value, replacing an earlier one for the same box.
    pub fn cache(&mut self, node_id: u32, box_id: u32, value: Variant) {
        match self.returned_values.iter_mut().find(|entry| entry.node_id == node_id && entry.box_id == box_id) {
            Some(entry) => entry.value = value,
            None => self.returned_values.push(ReturnedValue { node_id, box_id, value }),
        }
    }

    pub fn cached_i32(&self, node_id: u32, box_id: u32) -> Option<i32> {
        self.cached(node_id, box_id).map(Variant::as_i32)
    }
}
