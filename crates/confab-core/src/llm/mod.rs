mod traits;
mod line_buffer;
mod transport;
mod line_json;
mod event_stream;
pub mod native;
pub mod provider;

pub use traits::*;
pub use line_buffer::LineBuffer;
pub use line_json::LineJsonAdapter;
pub use event_stream::EventStreamAdapter;
pub use native::{AnthropicClient, NativeAdapter, NativeClient, NativeEvent, NativeMessageStream};
pub use provider::{ProtocolKind, ProviderDescriptor, ProviderRegistry};

use std::sync::Arc;

/// The three fixed adapters, selected by [`ProtocolKind`].
#[derive(Clone)]
pub struct AdapterTable {
    line_json: Arc<dyn ProtocolAdapter>,
    event_stream: Arc<dyn ProtocolAdapter>,
    native: Arc<dyn ProtocolAdapter>,
}

impl AdapterTable {
    /// HTTP-backed adapters sharing one connection pool.
    pub fn http(client: reqwest::Client) -> Self {
        Self {
            line_json: Arc::new(LineJsonAdapter::new(client.clone())),
            event_stream: Arc::new(EventStreamAdapter::new(client.clone())),
            native: Arc::new(NativeAdapter::new(Arc::new(AnthropicClient::new(client)))),
        }
    }

    /// Route every protocol to the same adapter.
    pub fn uniform(adapter: Arc<dyn ProtocolAdapter>) -> Self {
        Self {
            line_json: adapter.clone(),
            event_stream: adapter.clone(),
            native: adapter,
        }
    }

    pub fn with(mut self, kind: ProtocolKind, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        match kind {
            ProtocolKind::LineJson => self.line_json = adapter,
            ProtocolKind::EventStream => self.event_stream = adapter,
            ProtocolKind::Native => self.native = adapter,
        }
        self
    }

    pub fn for_kind(&self, kind: ProtocolKind) -> Arc<dyn ProtocolAdapter> {
        match kind {
            ProtocolKind::LineJson => self.line_json.clone(),
            ProtocolKind::EventStream => self.event_stream.clone(),
            ProtocolKind::Native => self.native.clone(),
        }
    }
}

impl Default for AdapterTable {
    fn default() -> Self {
        Self::http(reqwest::Client::new())
    }
}
