use serde_json::Value;

/// One `(clientId, clock, state)` triple of an awareness update, with the
/// state already parsed.
///
/// `state` is `None` when the entry is being cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessEntry {
    pub client_id: u64,
    pub clock: u32,
    pub state: Option<Value>,
}

impl AwarenessEntry {
    pub fn new(client_id: u64, clock: u32, state: Option<Value>) -> Self {
        Self {
            client_id,
            clock,
            state,
        }
    }
}
