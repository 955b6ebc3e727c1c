// Copyright 2020 Joyent, Inc.

use std::ffi::CStr;
use std::sync::{Arc, Mutex};

use slog::{o, Drain, Logger};

use geode_pool::cache::{Cache, CacheOptions};
use geode_pool::engine::{Engine, HandleKind, NativeHandle};
use geode_pool::error::{EngineError, EngineErrorCode, Error};
use geode_pool::pool::PoolState;
use geode_pool::pool_factory::types::{PoolAttributes, PoolConfig};

#[derive(Clone, Debug, PartialEq)]
enum EngineCall {
    CreateCache,
    CreateFactory(NativeHandle),
    AddLocator(NativeHandle, String, u16),
    AddServer(NativeHandle, String, u16),
    SetAttributes(NativeHandle, PoolAttributes),
    CreatePool(NativeHandle, String),
    Release(HandleKind, NativeHandle),
}

type PoolHook = Box<dyn FnOnce() + Send>;

// An engine that records every call and fails create_pool on demand.
#[derive(Default)]
struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    last_handle: Mutex<u64>,
    pool_error: Mutex<Option<EngineError>>,
    pool_hook: Mutex<Option<PoolHook>>,
}

impl FakeEngine {
    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_handle(&self) -> NativeHandle {
        let mut last = self.last_handle.lock().unwrap();
        *last += 1;
        NativeHandle::from(*last)
    }

    fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn fail_create_pool(&self, error: EngineError) {
        *self.pool_error.lock().unwrap() = Some(error);
    }

    // Run `hook` inside the next create_pool call, before it returns.
    fn during_create_pool<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.pool_hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn releases_of(&self, handle: NativeHandle) -> usize {
        self.calls()
            .iter()
            .filter(|c| match c {
                EngineCall::Release(_, h) => *h == handle,
                _ => false,
            })
            .count()
    }

    fn create_pool_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| match c {
                EngineCall::CreatePool(..) => true,
                _ => false,
            })
            .count()
    }
}

impl Engine for FakeEngine {
    fn create_cache(&self) -> Result<NativeHandle, EngineError> {
        self.record(EngineCall::CreateCache);
        Ok(self.next_handle())
    }

    fn create_factory(
        &self,
        cache: NativeHandle,
    ) -> Result<NativeHandle, EngineError> {
        self.record(EngineCall::CreateFactory(cache));
        Ok(self.next_handle())
    }

    fn add_locator(
        &self,
        factory: NativeHandle,
        host: &CStr,
        port: u16,
    ) -> Result<(), EngineError> {
        let host = host.to_string_lossy().into_owned();
        self.record(EngineCall::AddLocator(factory, host, port));
        Ok(())
    }

    fn add_server(
        &self,
        factory: NativeHandle,
        host: &CStr,
        port: u16,
    ) -> Result<(), EngineError> {
        let host = host.to_string_lossy().into_owned();
        self.record(EngineCall::AddServer(factory, host, port));
        Ok(())
    }

    fn set_attributes(
        &self,
        factory: NativeHandle,
        attributes: &PoolAttributes,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::SetAttributes(factory, attributes.clone()));
        Ok(())
    }

    fn create_pool(
        &self,
        factory: NativeHandle,
        name: &CStr,
    ) -> Result<NativeHandle, EngineError> {
        let name = name.to_string_lossy().into_owned();
        self.record(EngineCall::CreatePool(factory, name));
        let hook = self.pool_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        match self.pool_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(self.next_handle()),
        }
    }

    fn release(&self, kind: HandleKind, handle: NativeHandle) {
        self.record(EngineCall::Release(kind, handle));
    }
}

fn test_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    )
}

fn test_cache() -> (Arc<FakeEngine>, Cache<FakeEngine>) {
    let engine = Arc::new(FakeEngine::default());
    let options = CacheOptions {
        log: Some(test_log()),
    };
    let cache = Cache::new(engine.clone(), options).expect("cache");
    (engine, cache)
}

#[test]
fn locators_are_forwarded_in_order() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");

    factory
        .add_locator("host1", 10334)
        .and_then(|f| f.add_locator("host2", 10334))
        .and_then(|f| f.add_locator("host1", 10334))
        .expect("add locators");

    let forwarded: Vec<(String, u16)> = engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::AddLocator(_, host, port) => Some((host, port)),
            _ => None,
        })
        .collect();
    assert_eq!(
        forwarded,
        vec![
            (String::from("host1"), 10334),
            (String::from("host2"), 10334),
            (String::from("host1"), 10334),
        ]
    );
    let names: Vec<&str> =
        factory.locators().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["host1:10334", "host2:10334", "host1:10334"]);
}

#[test]
fn invalid_locators_never_reach_the_engine() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    let before = engine.calls().len();

    for (host, port) in &[("", 10334), ("  ", 10334), ("host1", 0), ("host1", 70000)]
    {
        match factory.add_locator(host, *port) {
            Err(Error::InvalidConfiguration(_)) => (),
            other => panic!("expected InvalidConfiguration, got {:?}", other),
        }
    }

    assert_eq!(engine.calls().len(), before);
    assert!(factory.locators().is_empty());
}

#[test]
fn empty_configuration_is_rejected_locally() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");

    match factory.create_pool("default") {
        Err(Error::InvalidConfiguration(_)) => (),
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
    assert_eq!(engine.create_pool_calls(), 0);
    assert!(cache.pool_names().is_empty());
}

#[test]
fn empty_pool_name_is_rejected() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_locator("host1", 10334).expect("add locator");

    match factory.create_pool("") {
        Err(Error::InvalidConfiguration(_)) => (),
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
    assert_eq!(engine.create_pool_calls(), 0);
}

#[test]
fn locators_and_servers_are_exclusive() {
    let (_engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_server("server1", 40404).expect("add server");

    match factory.add_locator("host1", 10334) {
        Err(Error::InvalidConfiguration(msg)) => {
            assert!(msg.contains("both locators and servers"))
        }
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
    assert_eq!(factory.servers().len(), 1);
    assert!(factory.locators().is_empty());
}

#[test]
fn attributes_are_sent_before_pool_creation() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory
        .add_locator("host1", 10334)
        .and_then(|f| f.set_read_timeout(2500))
        .and_then(|f| f.set_max_connections(Some(20)))
        .and_then(|f| f.set_server_group("east"))
        .expect("configure");

    let _pool = factory.create_pool("default").expect("create pool");

    let calls = engine.calls();
    let n = calls.len();
    match (&calls[n - 2], &calls[n - 1]) {
        (EngineCall::SetAttributes(_, a), EngineCall::CreatePool(_, name)) => {
            assert_eq!(a.read_timeout, 2500);
            assert_eq!(a.max_connections, Some(20));
            assert_eq!(a.server_group, "east");
            assert_eq!(name, "default");
        }
        other => panic!("unexpected engine calls {:?}", other),
    }
}

#[test]
fn invalid_attributes_are_not_kept() {
    let (_engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");

    match factory.set_read_timeout(0) {
        Err(Error::InvalidConfiguration(_)) => (),
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
    match factory.set_min_connections(10).and_then(|f| {
        f.set_max_connections(Some(5))
    }) {
        Err(Error::InvalidConfiguration(_)) => (),
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }

    let attributes = factory.attributes();
    assert_eq!(attributes.read_timeout, PoolAttributes::default().read_timeout);
    assert_eq!(attributes.min_connections, 10);
    assert_eq!(attributes.max_connections, None);
}

#[test]
fn engine_failures_are_classified() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_locator("host1", 10334).expect("add locator");

    engine.fail_create_pool(EngineError::new(
        EngineErrorCode::DiscoveryFailed,
        "no locator answered",
    ));
    match factory.create_pool("default") {
        Err(Error::DiscoveryFailure(e)) => {
            assert_eq!(e.message, "no locator answered")
        }
        other => panic!("expected DiscoveryFailure, got {:?}", other),
    }

    engine.fail_create_pool(EngineError::new(
        EngineErrorCode::PoolExists,
        "Pool default already exists",
    ));
    match factory.create_pool("default") {
        Err(Error::DuplicatePoolName(_)) => (),
        other => panic!("expected DuplicatePoolName, got {:?}", other),
    }

    engine.fail_create_pool(EngineError::new(
        EngineErrorCode::Other(42),
        "out of sockets",
    ));
    match factory.create_pool("default") {
        Err(Error::EngineError(e)) => assert_eq!(e.code, EngineErrorCode::Other(42)),
        other => panic!("expected EngineError, got {:?}", other),
    }

    assert!(cache.pool_names().is_empty());
    let pool = factory.create_pool("default").expect("create pool");
    assert_eq!(pool.state(), PoolState::Active);
}

#[test]
fn pool_is_released_exactly_once() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_locator("host1", 10334).expect("add locator");
    let pool = factory.create_pool("default").expect("create pool");
    let handle = pool.native_handle().expect("native handle");

    assert!(pool.destroy());
    let calls_after_destroy = engine.calls().len();
    assert!(!pool.destroy());
    assert!(!pool.clone().destroy());

    assert_eq!(pool.state(), PoolState::Destroyed);
    assert_eq!(
        pool.native_handle(),
        Err(Error::UseAfterDestroy(HandleKind::Pool))
    );
    assert_eq!(engine.calls().len(), calls_after_destroy);
    assert_eq!(engine.releases_of(handle), 1);
    assert!(cache.find_pool("default").is_none());
}

#[test]
fn destroyed_factory_makes_no_engine_calls() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_locator("host1", 10334).expect("add locator");

    assert!(factory.destroy());
    assert!(!factory.destroy());
    assert!(factory.is_destroyed());
    let calls_after_destroy = engine.calls().len();

    match factory.add_locator("host2", 10334) {
        Err(Error::UseAfterDestroy(HandleKind::PoolFactory)) => (),
        other => panic!("expected UseAfterDestroy, got {:?}", other),
    }
    match factory.set_read_timeout(100) {
        Err(Error::UseAfterDestroy(HandleKind::PoolFactory)) => (),
        other => panic!("expected UseAfterDestroy, got {:?}", other),
    }
    match factory.create_pool("default") {
        Err(Error::UseAfterDestroy(HandleKind::PoolFactory)) => (),
        other => panic!("expected UseAfterDestroy, got {:?}", other),
    }

    drop(factory);
    assert_eq!(engine.calls().len(), calls_after_destroy);
}

#[test]
fn dropping_releases_everything() {
    let engine = Arc::new(FakeEngine::default());
    {
        let cache = Cache::new(engine.clone(), CacheOptions::default())
            .expect("cache");
        let mut factory = cache.get_pool_factory().expect("factory");
        factory.add_locator("host1", 10334).expect("add locator");
        let _pool = factory.create_pool("default").expect("create pool");
    }

    let released: Vec<HandleKind> = engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Release(kind, _) => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(released.len(), 3);
    assert!(released.contains(&HandleKind::Cache));
    assert!(released.contains(&HandleKind::PoolFactory));
    assert!(released.contains(&HandleKind::Pool));
}

#[test]
fn configure_from_json() {
    let (engine, cache) = test_cache();
    let config = PoolConfig::from_json(
        r#"{
            "servers": [{ "host": "server1", "port": 40404 }],
            "attributes": { "ping_interval": 2000, "pr_single_hop_enabled": false }
        }"#,
    )
    .expect("parse config");

    let mut factory = cache.get_pool_factory().expect("factory");
    factory.configure(&config).expect("configure");
    assert_eq!(factory.servers().len(), 1);
    assert_eq!(factory.attributes().ping_interval, 2000);
    assert!(!factory.attributes().pr_single_hop_enabled);
    assert!(engine.calls().iter().any(|c| match c {
        EngineCall::AddServer(_, host, 40404) => host == "server1",
        _ => false,
    }));

    match PoolConfig::from_json(r#"{ "locators": [{ "host": "h" }] }"#) {
        Err(Error::InvalidConfiguration(_)) => (),
        other => panic!("expected InvalidConfiguration, got {:?}", other),
    }
}

#[test]
fn dropping_every_clone_releases_the_pool() {
    let (engine, cache) = test_cache();
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_locator("host1", 10334).expect("add locator");
    let pool = factory.create_pool("default").expect("create pool");
    let handle = pool.native_handle().expect("native handle");
    let clone = cache.find_pool("default").expect("registered pool");

    drop(pool);
    assert_eq!(engine.releases_of(handle), 0);
    assert_eq!(cache.pool_names(), vec!["default"]);

    drop(clone);
    assert_eq!(engine.releases_of(handle), 1);
    assert!(cache.find_pool("default").is_none());
    assert!(cache.pool_names().is_empty());

    // Closing the cache does not release the pool a second time.
    cache.close();
    assert_eq!(engine.releases_of(handle), 1);
}

#[test]
fn cache_closed_during_create_pool() {
    let engine = Arc::new(FakeEngine::default());
    let cache = Arc::new(
        Cache::new(engine.clone(), CacheOptions { log: Some(test_log()) })
            .expect("cache"),
    );
    let mut factory = cache.get_pool_factory().expect("factory");
    factory.add_locator("host1", 10334).expect("add locator");

    let closer = cache.clone();
    engine.during_create_pool(move || closer.close());

    match factory.create_pool("default") {
        Err(Error::UseAfterDestroy(HandleKind::Cache)) => (),
        other => panic!("expected UseAfterDestroy, got {:?}", other),
    }
    assert!(cache.is_closed());
    assert!(cache.pool_names().is_empty());

    let released: Vec<HandleKind> = engine
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::Release(kind, _) => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec![HandleKind::Cache, HandleKind::Pool]);
}
