use std::net::SocketAddr;

use certgate_common::{Request, Response, TlsIdentity};
use chrono::{DateTime, Utc};

use crate::access_log::AccessRecord;

/// Body every authenticated request receives
pub const GREETING: &[u8] = b"hello world\n";

/// Turn an authenticated request into its access record and response.
///
/// `identity` must come from a completed handshake.
pub fn handle(
    identity: &TlsIdentity,
    remote_address: SocketAddr,
    request: &Request,
    at: DateTime<Utc>,
) -> (AccessRecord, Response) {
    debug_assert!(identity.verified, "handler invoked for unverified peer");

    let record = AccessRecord {
        timestamp: at,
        remote_address,
        peer_common_name: identity.common_name.clone(),
        method: request.method.clone(),
        path: request.path.clone(),
    };

    (record, Response::ok(GREETING))
}
