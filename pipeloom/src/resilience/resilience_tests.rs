//! Tests for decorator chains assembled from call options.

#[cfg(test)]
mod tests {
    use crate::errors::ModuleError;
    use crate::events::{CollectingEventSink, EventSink, NoOpEventSink};
    use crate::graph::{CallOptions, NodeId};
    use crate::module::Module;
    use crate::resilience::{
        CacheBackend, CallInfo, CircuitStatus, InMemoryCacheBackend, JitterStrategy, Registries,
        RetryOptions,
    };
    use crate::testing::{CountingModule, FailingModule, FlakyModule, GaugeModule, SlowModule};
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn info(module: &str) -> CallInfo {
        CallInfo::new(Uuid::new_v4(), NodeId::from("call"), module)
    }

    fn quiet() -> Arc<dyn EventSink> {
        Arc::new(NoOpEventSink)
    }

    fn fast_retry(max_attempts: u32) -> RetryOptions {
        RetryOptions::new(max_attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    #[test]
    fn test_decorator_order() {
        let registries = Registries::new();
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let options = CallOptions::new()
            .with_retry(fast_retry(2))
            .with_timeout(Duration::from_secs(1))
            .with_fallback(Value::Null)
            .with_cache(Duration::from_secs(60))
            .with_throttle(10, Duration::from_secs(1))
            .with_concurrency(4)
            .with_circuit_breaker(5, Duration::from_secs(30));

        let chain = registries.build_chain(
            "Everything",
            Arc::new(CountingModule::new("Everything")),
            &options,
            Some(&cache),
            &quiet(),
        );

        assert_eq!(
            chain.decorator_names(),
            vec![
                "fallback",
                "concurrency",
                "throttle",
                "circuit_breaker",
                "cache",
                "retry",
                "timeout"
            ]
        );
    }

    #[test]
    fn test_unset_options_add_no_layers() {
        let chain = Registries::new().build_chain(
            "Plain",
            Arc::new(CountingModule::new("Plain")),
            &CallOptions::new().with_cache(Duration::from_secs(1)),
            None,
            &quiet(),
        );
        assert!(chain.decorator_names().is_empty());
    }

    #[tokio::test]
    async fn test_retry_ceiling() {
        let module = Arc::new(FailingModule::new("Flaky", "boom"));
        let chain = Registries::new().build_chain(
            "Flaky",
            module.clone(),
            &CallOptions::new().with_retry(fast_retry(3)),
            None,
            &quiet(),
        );

        let err = chain.invoke(&info("Flaky"), Value::Null).await.unwrap_err();

        assert_eq!(module.call_count(), 3);
        assert!(matches!(err, ModuleError::Execution { .. }));
        assert_eq!(err.module(), "Flaky");
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_errors() {
        let module = Arc::new(FailingModule::permanent("Broken", "bad config"));
        let chain = Registries::new().build_chain(
            "Broken",
            module.clone(),
            &CallOptions::new().with_retry(fast_retry(5)),
            None,
            &quiet(),
        );

        chain.invoke(&info("Broken"), Value::Null).await.unwrap_err();
        assert_eq!(module.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_and_emits_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let events: Arc<dyn EventSink> = sink.clone();
        let module = Arc::new(FlakyModule::new("Flaky", 2, Value::from("ok")));
        let chain = Registries::new().build_chain(
            "Flaky",
            module.clone(),
            &CallOptions::new().with_retry(fast_retry(3)),
            None,
            &events,
        );

        let out = chain.invoke(&info("Flaky"), Value::Null).await.unwrap();

        assert_eq!(out, Value::from("ok"));
        assert_eq!(module.call_count(), 3);
        assert_eq!(sink.events_of_type("module.retry").len(), 2);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let module = Arc::new(SlowModule::new(
            "Slow",
            Duration::from_millis(200),
            Value::Null,
        ));
        let chain = Registries::new().build_chain(
            "Slow",
            module.clone(),
            &CallOptions::new()
                .with_retry(fast_retry(2))
                .with_timeout(Duration::from_millis(20)),
            None,
            &quiet(),
        );

        let err = chain.invoke(&info("Slow"), Value::Null).await.unwrap_err();

        assert_eq!(err, ModuleError::timeout("Slow", 20));
        assert_eq!(module.started(), 2);
        assert_eq!(module.completed(), 0);
    }

    #[tokio::test]
    async fn test_fallback_after_exhausted_retries() {
        let sink = Arc::new(CollectingEventSink::new());
        let events: Arc<dyn EventSink> = sink.clone();
        let module = Arc::new(FailingModule::new("Flaky", "boom"));
        let chain = Registries::new().build_chain(
            "Flaky",
            module.clone(),
            &CallOptions::new()
                .with_retry(fast_retry(3))
                .with_fallback(Value::from("default")),
            None,
            &events,
        );

        let out = chain.invoke(&info("Flaky"), Value::Null).await.unwrap();

        assert_eq!(out, Value::from("default"));
        assert_eq!(module.call_count(), 3);
        assert_eq!(sink.events_of_type("module.fallback").len(), 1);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_inputs() {
        let module = Arc::new(CountingModule::new("Counter"));
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let chain = Registries::new().build_chain(
            "Counter",
            module.clone(),
            &CallOptions::new().with_cache(Duration::from_secs(60)),
            Some(&cache),
            &quiet(),
        );
        let input = Value::record([("q", Value::from("loom"))]);

        let first = chain.invoke(&info("Counter"), input.clone()).await.unwrap();
        let second = chain.invoke(&info("Counter"), input).await.unwrap();
        let other = chain
            .invoke(&info("Counter"), Value::record([("q", Value::from("x"))]))
            .await
            .unwrap();

        assert_eq!(first, Value::Int(1));
        assert_eq!(second, Value::Int(1));
        assert_eq!(other, Value::Int(2));
        assert_eq!(module.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let module = Arc::new(FlakyModule::new("Flaky", 1, Value::from("ok")));
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache: Arc<dyn CacheBackend> = backend.clone();
        let chain = Registries::new().build_chain(
            "Flaky",
            module.clone(),
            &CallOptions::new().with_cache(Duration::from_secs(60)),
            Some(&cache),
            &quiet(),
        );
        let input = Value::record([("q", Value::from("loom"))]);

        chain.invoke(&info("Flaky"), input.clone()).await.unwrap_err();
        assert!(backend.is_empty());

        let second = chain.invoke(&info("Flaky"), input.clone()).await.unwrap();
        let third = chain.invoke(&info("Flaky"), input).await.unwrap();

        assert_eq!(second, Value::from("ok"));
        assert_eq!(third, Value::from("ok"));
        assert_eq!(module.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds() {
        let registries = Arc::new(Registries::new());
        let module = Arc::new(GaugeModule::new("Gauge", Duration::from_millis(30)));
        let chain = Arc::new(registries.build_chain(
            "Gauge",
            module.clone(),
            &CallOptions::new().with_concurrency(2),
            None,
            &quiet(),
        ));

        let calls: Vec<_> = (0..6)
            .map(|_| {
                let chain = Arc::clone(&chain);
                tokio::spawn(async move { chain.invoke(&info("Gauge"), Value::Null).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert_eq!(module.max_in_flight(), 2);
        assert_eq!(registries.concurrency.get("Gauge").unwrap().in_use(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_permit_released_on_cancellation() {
        let registries = Registries::new();
        let module = Arc::new(SlowModule::new(
            "Slow",
            Duration::from_secs(10),
            Value::Null,
        ));
        let chain = registries.build_chain(
            "Slow",
            module,
            &CallOptions::new().with_concurrency(1),
            None,
            &quiet(),
        );

        let call_info = info("Slow");
        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            chain.invoke(&call_info, Value::Null),
        )
        .await;
        assert!(attempt.is_err());

        assert_eq!(registries.concurrency.get("Slow").unwrap().in_use(), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_calling_module() {
        let registries = Registries::new();
        let module = Arc::new(FailingModule::new("Flaky", "boom"));
        let chain = registries.build_chain(
            "Flaky",
            module.clone(),
            &CallOptions::new().with_circuit_breaker(2, Duration::from_secs(60)),
            None,
            &quiet(),
        );

        for _ in 0..2 {
            chain.invoke(&info("Flaky"), Value::Null).await.unwrap_err();
        }
        assert_eq!(registries.breakers.status("Flaky"), Some(CircuitStatus::Open));

        let err = chain.invoke(&info("Flaky"), Value::Null).await.unwrap_err();
        assert_eq!(err, ModuleError::circuit_open("Flaky"));
        assert_eq!(module.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fallback_covers_open_circuit() {
        let registries = Registries::new();
        let module = Arc::new(FailingModule::new("Flaky", "boom"));
        let chain = registries.build_chain(
            "Flaky",
            module.clone(),
            &CallOptions::new()
                .with_circuit_breaker(1, Duration::from_secs(60))
                .with_fallback(Value::Int(0)),
            None,
            &quiet(),
        );

        assert_eq!(chain.invoke(&info("Flaky"), Value::Null).await.unwrap(), Value::Int(0));
        assert_eq!(chain.invoke(&info("Flaky"), Value::Null).await.unwrap(), Value::Int(0));
        assert_eq!(module.call_count(), 1);
    }

    #[tokio::test]
    async fn test_breaker_shared_across_chains() {
        let registries = Registries::new();
        let module: Arc<dyn Module> = Arc::new(FailingModule::new("Shared", "down"));
        let options = CallOptions::new().with_circuit_breaker(1, Duration::from_secs(60));

        let first = registries.build_chain("Shared", Arc::clone(&module), &options, None, &quiet());
        let second = registries.build_chain("Shared", module, &options, None, &quiet());

        first.invoke(&info("Shared"), Value::Null).await.unwrap_err();
        let err = second.invoke(&info("Shared"), Value::Null).await.unwrap_err();
        assert!(matches!(err, ModuleError::CircuitOpen { .. }));
    }
}
