//! Processor construction and the limits stamped into it.

use std::sync::{Arc, Mutex};

use http::header::{ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, CONTENT_TYPE};
use http::{Request, Response};

use http11_negotiator::protocol::{DefaultProcessorConfig, OperationalLimits};
use http11_negotiator::upgrade::{UpgradeHandler, UpgradeToken};
use http11_negotiator::{Adapter, HandlerKind, Processor, ProcessorFactory};

mod common;

#[tokio::test]
async fn upload_timeout_applies_only_while_reading_body() {
    let protocol = common::protocol(false);
    protocol.set_disable_upload_timeout(false);
    protocol.set_connection_upload_timeout_ms(300_000);

    let (socket, _peer) = common::socket_pair();
    let Processor::Http11(mut processor) = protocol.create_processor(socket).unwrap() else {
        panic!("expected default processor");
    };

    assert_eq!(processor.effective_read_timeout(), 60_000);
    processor.begin_body_read();
    assert_eq!(processor.effective_read_timeout(), 300_000);
    processor.end_body_read();
    assert_eq!(processor.effective_read_timeout(), 60_000);

    processor.service(&Request::new(()));
    assert_eq!(processor.effective_read_timeout(), 60_000);
}

#[tokio::test]
async fn processor_keeps_limits_it_was_built_with() {
    let protocol = common::protocol(false);
    protocol.set_max_keep_alive_requests(1);

    let (socket, _peer) = common::socket_pair();
    let Processor::Http11(mut processor) = protocol.create_processor(socket).unwrap() else {
        panic!("expected default processor");
    };
    protocol.set_max_keep_alive_requests(100);

    assert_eq!(processor.limits().max_keep_alive_requests, 1);
    let outcome = processor.service(&Request::new(()));
    assert!(!outcome.keep_alive);
    assert_eq!(outcome.response.headers()[CONNECTION], "close");
}

#[tokio::test]
async fn trailer_list_is_shared_live() {
    let protocol = common::protocol(false);
    let (socket, _peer) = common::socket_pair();
    let Processor::Http11(processor) = protocol.create_processor(socket).unwrap() else {
        panic!("expected default processor");
    };

    let mut trailers = http::HeaderMap::new();
    trailers.insert("x-checksum", "1".parse().unwrap());
    assert!(processor.filter_trailers(trailers.clone()).is_empty());

    protocol.add_allowed_trailer_header("X-Checksum");
    assert_eq!(processor.filter_trailers(trailers).len(), 1);
}

#[tokio::test]
async fn compression_decision_runs_on_service() {
    let protocol = common::protocol(false);
    protocol.set_compression("force").unwrap();

    let adapter: Arc<dyn Adapter> = Arc::new(|_: &Request<()>| {
        let mut response = Response::new(());
        response
            .headers_mut()
            .insert(CONTENT_TYPE, "image/png".parse().unwrap());
        response
    });
    let (socket, _peer) = common::socket_pair();
    let Processor::Http11(mut processor) =
        ProcessorFactory::create_default_processor(socket, adapter, protocol.processor_config())
            .unwrap()
    else {
        panic!("expected default processor");
    };

    let request = Request::builder()
        .header(ACCEPT_ENCODING, "gzip")
        .body(())
        .unwrap();
    let outcome = processor.service(&request);
    assert_eq!(outcome.response.headers()[CONTENT_ENCODING], "gzip");
}

#[tokio::test]
async fn adapter_kind_is_a_function_of_handler_kind() {
    let connections = Arc::new(Mutex::new(Vec::new()));
    for i in 0..20 {
        let (socket, _peer) = if i % 3 == 0 {
            common::tls_socket_pair("h2")
        } else {
            common::socket_pair()
        };
        let (expected, handler) = if i % 2 == 0 {
            (
                HandlerKind::Internal,
                UpgradeHandler::Internal(Box::new(common::CountingHandler {
                    events: Arc::default(),
                })),
            )
        } else {
            (
                HandlerKind::External,
                UpgradeHandler::External(Box::new(common::CapturingHandler {
                    connections: Arc::clone(&connections),
                })),
            )
        };

        let token = UpgradeToken::new("any", handler);
        assert_eq!(token.handler_kind(), expected);
        let processor = ProcessorFactory::create_upgrade_processor(socket, token).unwrap();
        match expected {
            HandlerKind::Internal => assert!(matches!(processor, Processor::UpgradeInternal(_))),
            HandlerKind::External => assert!(matches!(processor, Processor::UpgradeExternal(_))),
        }
    }
}

#[tokio::test]
async fn closed_connection_is_a_construction_failure() {
    let (socket, _peer) = common::socket_pair();
    socket.close().await;
    let result = ProcessorFactory::create_default_processor(
        socket,
        common::ok_adapter(),
        DefaultProcessorConfig {
            limits: Arc::new(OperationalLimits::default()),
            ..DefaultProcessorConfig::default()
        },
    );
    assert!(result.is_err());
}

#[test]
fn fresh_limits_defaults() {
    let limits = OperationalLimits::default();
    assert_eq!(limits.max_http_header_size, 8192);
    assert_eq!(limits.max_keep_alive_requests, 100);
    assert_eq!(limits.max_save_post_size, 4096);
    assert_eq!(limits.connection_upload_timeout_ms, 300_000);
    assert!(limits.disable_upload_timeout);
}
