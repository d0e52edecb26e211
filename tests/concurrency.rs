//! Concurrent access to the shared per-endpoint state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use http11_negotiator::net::{TlsHostConfig, TlsIdentityResolver};
use http11_negotiator::protocol::TrailerHeaderPolicy;

mod common;

#[test]
fn bulk_replace_never_drops_shared_name() {
    let policy = Arc::new(TrailerHeaderPolicy::from_list("a,b"));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let policy = Arc::clone(&policy);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut checks = 0u64;
                while !done.load(Ordering::Acquire) {
                    assert!(policy.contains("b"), "shared name vanished mid-replace");
                    assert!(!policy.is_empty());
                    checks += 1;
                }
                checks
            })
        })
        .collect();

    for i in 0..2_000 {
        if i % 2 == 0 {
            policy.bulk_replace("b,c");
        } else {
            policy.bulk_replace("A, B");
        }
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(policy.snapshot(), vec!["a", "b"]);
}

#[test]
fn completed_add_is_visible_to_later_readers() {
    let policy = Arc::new(TrailerHeaderPolicy::new());
    for round in 0..200 {
        let name = format!("x-{round}");
        policy.add(&name);

        let reader = {
            let policy = Arc::clone(&policy);
            let name = name.clone();
            thread::spawn(move || policy.contains(&name))
        };
        assert!(reader.join().unwrap());
        policy.remove(&name);
    }
    assert!(policy.is_empty());
}

#[test]
fn default_identity_resolved_once_under_contention() {
    const THREADS: usize = 16;
    let resolver = TlsIdentityResolver::new("www.example.com");
    let barrier = Barrier::new(THREADS);

    let identities: Vec<Arc<TlsHostConfig>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    Arc::clone(resolver.default_identity())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let first = &identities[0];
    assert!(identities.iter().all(|identity| Arc::ptr_eq(identity, first)));
    assert_eq!(first.host_name(), "www.example.com");
    assert_eq!(resolver.hosts().len(), 1);
    assert!(Arc::ptr_eq(&resolver.hosts()[0], first));
}

#[test]
fn rename_after_resolution_reaches_every_holder() {
    let protocol = common::protocol(true);
    let held = Arc::clone(protocol.default_tls_identity());
    protocol.set_default_host_name("api.example.com");
    assert_eq!(held.host_name(), "api.example.com");
    assert_eq!(protocol.tls_identities().lookup(None).host_name(), "api.example.com");
}

#[test]
fn processor_snapshot_pattern_matches_compiled_form() {
    let protocol = Arc::new(common::protocol(false));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let protocol = Arc::clone(&protocol);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let config = protocol.processor_config();
                    assert_eq!(
                        config.limits.restricted_user_agents.as_deref(),
                        config.restricted_user_agents.as_ref().map(|r| r.as_str()),
                        "pattern and compiled form out of step"
                    );
                }
            })
        })
        .collect();

    for i in 0..2_000 {
        let pattern = if i % 2 == 0 { "^Legacy/" } else { "^OldBot" };
        protocol.set_restricted_user_agents(Some(pattern)).unwrap();
        protocol.set_max_keep_alive_requests(i);
    }
    protocol.set_restricted_user_agents(None).unwrap();
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }
    let config = protocol.processor_config();
    assert!(config.restricted_user_agents.is_none());
    assert_eq!(config.limits.max_keep_alive_requests, 1_999);
}
