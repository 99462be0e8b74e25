//! # TCP Channel Adapter
//!
//! Opens NTLM-secured `TransportConnection`s to the even6 interface.
//!
//! The pull connection resolves the port through the endpoint mapper when
//! none is configured. A wait connection reuses the pull connection's port
//! and association group, and runs its own handshake.

use std::sync::Arc;
use std::time::Duration;

use ev_01_endpoint_mapper::{EndpointMapper, MapperConfig};
use ev_02_rpc_transport::{
    AssociationGroup, Binding, EndpointResolver, TransportConnection, TransportError,
};
use ev_03_session_security::{CredentialProvider, NtlmSecurityProvider, StaticCredentials};
use shared_types::EVEN6_SYNTAX;

use crate::domain::config::SessionConfig;
use crate::ports::outbound::{Abort, ChannelFactory, RpcChannel};

/// Asks the endpoint mapper on `host` for the even6 port.
///
/// Failures are logged and reported as `None`.
pub fn lookup_event_log_port(host: &str, mapper: &MapperConfig) -> Option<u16> {
    match EndpointMapper::new(mapper.clone()).resolve(host, &EVEN6_SYNTAX) {
        Ok(port) => Some(port),
        Err(e) => {
            tracing::warn!(host, error = %e, "event log port lookup failed");
            None
        }
    }
}

pub struct TcpChannelFactory {
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,
    resolver: Arc<EndpointMapper>,
}

impl TcpChannelFactory {
    pub fn new(config: SessionConfig) -> Self {
        let credentials = Arc::new(StaticCredentials::new(config.credentials.clone()));
        let resolver = Arc::new(EndpointMapper::new(config.mapper.clone()));
        Self {
            config,
            credentials,
            resolver,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn open(
        &self,
        port: Option<u16>,
        group: Option<AssociationGroup>,
    ) -> Result<Box<dyn RpcChannel>, TransportError> {
        let mut binding = Binding::new(self.config.host.clone(), EVEN6_SYNTAX);
        if let Some(port) = port {
            binding = binding.with_port(port);
        }

        let security = NtlmSecurityProvider::new(Arc::clone(&self.credentials), self.config.auth_level);
        let mut connection = TransportConnection::new(binding, self.config.connection.clone())
            .with_security(Box::new(security))
            .with_resolver(Arc::clone(&self.resolver) as Arc<dyn EndpointResolver>);
        if let Some(group) = group {
            connection = connection.with_association_group(group);
        }
        connection.bind()?;
        Ok(Box::new(TcpChannel { connection }))
    }
}

impl ChannelFactory for TcpChannelFactory {
    fn open_pull(&self) -> Result<Box<dyn RpcChannel>, TransportError> {
        self.open(self.config.port, None)
    }

    fn open_wait(
        &self,
        port: Option<u16>,
        group: Option<AssociationGroup>,
    ) -> Result<Box<dyn RpcChannel>, TransportError> {
        self.open(port.or(self.config.port), group)
    }
}

/// A bound even6 connection.
pub struct TcpChannel {
    connection: TransportConnection,
}

impl RpcChannel for TcpChannel {
    fn call(
        &mut self,
        opnum: u16,
        stub: &[u8],
        read_timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.connection.set_read_timeout(read_timeout)?;
        self.connection.call(opnum, stub)
    }

    fn port(&self) -> Option<u16> {
        self.connection.binding().port()
    }

    fn association_group(&self) -> Option<AssociationGroup> {
        self.connection.association_group()
    }

    fn abort_handle(&self) -> Option<Box<dyn Abort>> {
        self.connection
            .abort_handle()
            .map(|handle| Box::new(handle) as Box<dyn Abort>)
    }

    fn close(&mut self) {
        self.connection.close();
    }
}
