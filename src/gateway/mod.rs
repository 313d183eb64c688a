pub mod client;

pub use client::{
    AuthorizationRequest, AuthorizationResponse, GatewayClient, GatewayError, HeartbeatRequest,
    OfflineSyncRequest, OfflineSyncResponse,
};
