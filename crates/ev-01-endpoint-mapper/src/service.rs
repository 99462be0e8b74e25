//! # Endpoint Mapper Service
//!
//! One resolution is one short-lived connection: bind to the mapper
//! interface, issue a single `ept_map`, read the TCP port from the first
//! returned tower, close.

use ev_02_rpc_transport::{
    Binding, EndpointResolver, ResolutionError, TransportConnection, TransportError,
};
use shared_types::{SyntaxId, EPM_SYNTAX};

use crate::domain::config::MapperConfig;
use crate::domain::ept_map::{self, EPT_MAP_OPNUM};
use crate::domain::tower::{encode_tower, tcp_port};

/// Resolves interface ports through the endpoint mapper.
#[derive(Debug, Clone, Default)]
pub struct EndpointMapper {
    config: MapperConfig,
}

impl EndpointMapper {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    fn map(&self, host: &str, interface: &SyntaxId) -> Result<u16, ResolutionError> {
        let unreachable = |e: TransportError| ResolutionError::Unreachable {
            host: host.to_string(),
            reason: e.to_string(),
        };
        self.config.validate().map_err(unreachable)?;

        let binding = Binding::new(host, EPM_SYNTAX).with_port(self.config.port);
        let mut conn = TransportConnection::new(binding, self.config.connection_config());
        conn.bind().map_err(unreachable)?;

        let request = ept_map::encode_request(&encode_tower(interface, 0, [0; 4]));
        let stub = conn.call(EPT_MAP_OPNUM, &request);
        conn.close();
        let stub = stub.map_err(unreachable)?;

        let response = ept_map::decode_response(&stub)
            .map_err(|e| ResolutionError::MalformedResponse(e.to_string()))?;
        if response.status != 0 {
            return Err(ResolutionError::MapperStatus(response.status));
        }
        let tower = response
            .towers
            .first()
            .ok_or(ResolutionError::NotRegistered)?;
        tcp_port(tower)
    }
}

impl EndpointResolver for EndpointMapper {
    fn resolve(&self, host: &str, interface: &SyntaxId) -> Result<u16, ResolutionError> {
        match self.map(host, interface) {
            Ok(port) => {
                tracing::debug!(host, interface = %interface.uuid, port, "resolved endpoint");
                Ok(port)
            }
            Err(e) => {
                tracing::debug!(host, interface = %interface.uuid, error = %e, "endpoint resolution failed");
                Err(e)
            }
        }
    }
}
