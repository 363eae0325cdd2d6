use uuid::Uuid;

/// Script method registered as a handler through a Bind Event node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundMethod {
    /// Script that declares the method.
    pub script: Uuid,
    pub method: String,
    pub param_count: usize,
}

#[derive(Debug, Clone)]
pub struct EventBinding {
    pub event_type: String,
    pub event_name: String,
    pub methods: Vec<BoundMethod>,
}

impl EventBinding {
    fn matches(&self, event_type: &str, event_name: &str) -> bool {
        self.event_type == event_type && self.event_name == event_name
    }
}

/// Adds a handler. Returns true when it is the first handler for the event, i.e. the
/// host event has to be subscribed.
pub fn bind(bindings: &mut Vec<EventBinding>, event_type: &str, event_name: &str, method: BoundMethod) -> bool {
    match bindings.iter_mut().find(|b| b.matches(event_type, event_name)) {
        Some(binding) => {
            binding.methods.push(method);
            binding.methods.len() == 1
        }
        None => {
            bindings.push(EventBinding {
                event_type: event_type.to_string(),
                event_name: event_name.to_string(),
                methods: vec![method],
            });
            true
        }
    }
}

/// Removes one matching handler. Returns true when the event has no handlers left and
/// has to be unsubscribed.
pub fn unbind(bindings: &mut Vec<EventBinding>, event_type: &str, event_name: &str, method: &BoundMethod) -> bool {
    let Some(position) = bindings.iter().position(|b| b.matches(event_type, event_name)) else {
        return false;
    };
    let binding = &mut bindings[position];
    let Some(index) = binding.methods.iter().position(|m| m == method) else {
        return false;
    };
    binding.methods.remove(index);
    if binding.methods.is_empty() {
        bindings.remove(position);
        return true;
    }
    false
}

pub fn bound_methods(bindings: &[EventBinding], event_type: &str, event_name: &str) -> Vec<BoundMethod> {
    bindings
        .iter()
        .filter(|b| b.matches(event_type, event_name))
        .flat_map(|b| b.methods.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(name: &str) -> BoundMethod {
        BoundMethod { script: Uuid::from_u128(1), method: name.to_string(), param_count: 0 }
    }

    #[test]
    fn subscription_follows_first_and_last_handler() {
        let mut bindings = Vec::new();
        assert!(bind(&mut bindings, "Actor", "Clicked", handler("OnClick")));
        assert!(!bind(&mut bindings, "Actor", "Clicked", handler("OnClickAgain")));
        assert!(bind(&mut bindings, "Actor", "Moved", handler("OnMove")));
        assert_eq!(bound_methods(&bindings, "Actor", "Clicked").len(), 2);

        assert!(!unbind(&mut bindings, "Actor", "Clicked", &handler("OnClick")));
        assert!(!unbind(&mut bindings, "Actor", "Clicked", &handler("Missing")));
        assert!(unbind(&mut bindings, "Actor", "Clicked", &handler("OnClickAgain")));
        assert!(bound_methods(&bindings, "Actor", "Clicked").is_empty());
        assert_eq!(bindings.len(), 1);
    }
}
