use std::sync::Arc;

use tracing::debug;

use crate::{format::ParameterMapping, host::FunctionDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    New,
    FormatResolved,
    Authenticated,
    Parsed,
    Dispatched,
    Responded,
    Errored,
}

/// Per-call state, owned by a single dispatcher run.
#[derive(Debug)]
pub struct RequestContext {
    state: RequestState,
    pub format: Option<&'static str>,
    pub function_name: Option<String>,
    pub params: ParameterMapping,
    pub function: Option<Arc<FunctionDescriptor>>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            state: RequestState::New,
            format: None,
            function_name: None,
            params: ParameterMapping::new(),
            function: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn advance(&mut self, next: RequestState) {
        debug!(from = ?self.state, to = ?next, "request state changed");
        self.state = next;
    }
}
