//! Stream definitions for the notification pipeline.

use stream_worker::StreamDef;

/// Inbound triggers, consumed by the prepare stage.
pub struct PrepareStream;

impl StreamDef for PrepareStream {
    const STREAM_NAME: &'static str = "notifications:prepare";
    const CONSUMER_GROUP: &'static str = "prepare_workers";
    const DELAYED_SET: &'static str = "notifications:prepare:delayed";
}

/// Routing units, consumed by the route stage.
pub struct RouteStream;

impl StreamDef for RouteStream {
    const STREAM_NAME: &'static str = "notifications:route";
    const CONSUMER_GROUP: &'static str = "route_workers";
    const DELAYED_SET: &'static str = "notifications:route:delayed";
}

/// Delivery-status polls for polling providers.
pub struct StatusStream;

impl StreamDef for StatusStream {
    const STREAM_NAME: &'static str = "notifications:status";
    const CONSUMER_GROUP: &'static str = "status_workers";
    const DELAYED_SET: &'static str = "notifications:status:delayed";
}

/// Audit trail published for downstream consumers.
pub struct AuditStream;

impl StreamDef for AuditStream {
    const STREAM_NAME: &'static str = "notifications:audit";
    const CONSUMER_GROUP: &'static str = "audit_consumers";
    const DELAYED_SET: &'static str = "notifications:audit:delayed";
    const MAX_LENGTH: i64 = 1_000_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(PrepareStream::stream_name(), "notifications:prepare");
        assert_eq!(RouteStream::consumer_group(), "route_workers");
        assert_eq!(StatusStream::delayed_set(), "notifications:status:delayed");
        assert_eq!(RouteStream::MAX_LENGTH, 100_000);
        assert_eq!(AuditStream::MAX_LENGTH, 1_000_000);
    }
}
