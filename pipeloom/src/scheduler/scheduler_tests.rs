//! Scenario tests for running bound pipelines.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::RuntimeConfig;
    use crate::errors::{ErrorClass, ModuleError, PipeloomError};
    use crate::events::{CollectingEventSink, EventSink};
    use crate::graph::{CallOptions, ErrorPolicy, Graph, GraphBuilder, ModuleNode, NodeId};
    use crate::module::{FnModule, ModuleBindings, ModuleDeclaration, RemoteModule};
    use crate::resilience::{CircuitStatus, InMemoryCacheBackend, JitterStrategy, Registries, RetryOptions};
    use crate::scheduler::{Pipeline, RunOptions, RunStatus, Runtime};
    use crate::testing::{
        add_graph, add_module, inputs, uppercase_graph, uppercase_module, CountingModule,
        FailingModule, FlakyModule, GaugeModule, LoopbackTransport, RecordingModule, SlowModule,
    };
    use crate::value::{Type, Value};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::new(), Arc::new(Registries::new()))
    }

    fn bind(runtime: &Runtime, graph: Graph, bindings: &ModuleBindings) -> Pipeline {
        runtime.bind(Arc::new(graph), bindings).unwrap()
    }

    fn fast_retry(max_attempts: u32) -> RetryOptions {
        RetryOptions::new(max_attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    /// `text -> <module> (with options) -> result`
    fn single_node_graph(module: &str, options: CallOptions) -> Graph {
        GraphBuilder::new("single", "1")
            .input("text", Type::String)
            .output("result", Type::Any)
            .module(
                ModuleNode::new("node", module)
                    .input("text", "text")
                    .output("result")
                    .with_options(options),
            )
            .build()
            .unwrap()
    }

    /// `text -> bad (policy) -> mid -> down (down_policy) -> downstream`
    /// plus an independent `text -> upper -> result` branch.
    fn skipping_graph(policy: ErrorPolicy, down_policy: ErrorPolicy) -> Graph {
        GraphBuilder::new("skipping", "1")
            .input("text", Type::String)
            .data("mid", Type::Any)
            .output("downstream", Type::Any)
            .output("result", Type::String)
            .module(
                ModuleNode::new("bad", "Broken")
                    .input("text", "text")
                    .output("mid")
                    .with_options(CallOptions::new().with_on_error(policy)),
            )
            .module(
                ModuleNode::new("down", "Counter")
                    .input("mid", "mid")
                    .output("downstream")
                    .with_options(CallOptions::new().with_on_error(down_policy)),
            )
            .module(
                ModuleNode::new("upper", "Uppercase")
                    .input("text", "text")
                    .output("result"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_uppercase_pipeline() {
        let rt = runtime();
        let pipeline = bind(
            &rt,
            uppercase_graph().unwrap(),
            &ModuleBindings::new().with(uppercase_module()),
        );

        let result = pipeline
            .run(inputs([("text", Value::from("hello"))]))
            .await
            .unwrap();

        assert_eq!(result.status(), RunStatus::Completed);
        assert_eq!(result.output("result"), Some(&Value::from("HELLO")));
        assert!(result.logged_errors.is_empty());
    }

    #[tokio::test]
    async fn test_output_edge_routes_record_field() {
        let rt = runtime();
        let pipeline = bind(&rt, add_graph().unwrap(), &ModuleBindings::new().with(add_module()));

        let result = pipeline
            .run(inputs([("a", Value::Int(2)), ("b", Value::Int(3))]))
            .await
            .unwrap();

        assert_eq!(result.output("sum"), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn test_runs_are_deterministic_without_cache() {
        let rt = runtime();
        let pipeline = bind(&rt, add_graph().unwrap(), &ModuleBindings::new().with(add_module()));

        let first = pipeline
            .run(inputs([("a", Value::Int(20)), ("b", Value::Int(22))]))
            .await
            .unwrap();
        let second = pipeline
            .run(inputs([("a", Value::Int(20)), ("b", Value::Int(22))]))
            .await
            .unwrap();

        assert_eq!(first.outputs(), second.outputs());
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_unknown_names_rejected() {
        let rt = runtime();
        let pipeline = bind(
            &rt,
            uppercase_graph().unwrap(),
            &ModuleBindings::new().with(uppercase_module()),
        );

        let err = pipeline
            .run(inputs([("txt", Value::from("hello"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipeloomError::UnknownInput(name) if name == "txt"));

        let err = pipeline
            .run_with(
                inputs([("text", Value::from("hello"))]),
                RunOptions::new().with_outputs(["nope"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipeloomError::UnknownOutput(name) if name == "nope"));
    }

    #[test]
    fn test_bind_requires_every_module() {
        let err = runtime()
            .bind(Arc::new(add_graph().unwrap()), &ModuleBindings::new())
            .unwrap_err();

        assert!(matches!(
            err,
            PipeloomError::Binding { module, node } if module == "Add" && node == NodeId::from("add")
        ));
    }

    #[tokio::test]
    async fn test_independent_branches_run_in_parallel() {
        let graph = GraphBuilder::new("diamond", "1")
            .input("x", Type::Any)
            .data("l", Type::String)
            .data("r", Type::String)
            .output("out", Type::Any)
            .module(ModuleNode::new("left", "Left").input("x", "x").output("l"))
            .module(ModuleNode::new("right", "Right").input("x", "x").output("r"))
            .module(
                ModuleNode::new("join", "Join")
                    .input("l", "l")
                    .input("r", "r")
                    .output("out"),
            )
            .build()
            .unwrap();
        let left = Arc::new(SlowModule::new("Left", Duration::from_millis(100), Value::from("L")));
        let right = Arc::new(SlowModule::new("Right", Duration::from_millis(100), Value::from("R")));
        let bindings = ModuleBindings::new()
            .with(left.clone())
            .with(right.clone())
            .with(Arc::new(FnModule::new("Join", Ok)));
        let rt = runtime();
        let pipeline = bind(&rt, graph, &bindings);

        let start = Instant::now();
        let result = pipeline.run(inputs([("x", Value::Null)])).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(
            result.output("out"),
            Some(&Value::record([("l", Value::from("L")), ("r", Value::from("R"))]))
        );
        assert!(elapsed < Duration::from_millis(180), "took {elapsed:?}");
        assert_eq!(left.completed() + right.completed(), 2);
    }

    #[tokio::test]
    async fn test_fallback_after_exhausted_retries() {
        let module = Arc::new(FailingModule::new("Flaky", "upstream unavailable"));
        let graph = single_node_graph(
            "Flaky",
            CallOptions::new()
                .with_retry(fast_retry(2))
                .with_fallback(Value::Int(0)),
        );
        let rt = runtime();
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(module.clone()));

        let result = pipeline.run(inputs([("text", Value::from("x"))])).await.unwrap();

        assert!(result.is_completed());
        assert_eq!(result.output("result"), Some(&Value::Int(0)));
        assert_eq!(module.call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_ceiling_then_failure() {
        let module = Arc::new(FailingModule::new("Flaky", "upstream unavailable"));
        let graph = single_node_graph("Flaky", CallOptions::new().with_retry(fast_retry(3)));
        let rt = runtime();
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(module.clone()));

        let result = pipeline.run(inputs([("text", Value::from("x"))])).await.unwrap();

        assert!(result.is_failed());
        let failure = result.failure().unwrap();
        assert_eq!(failure.node, NodeId::from("node"));
        assert_eq!(failure.module, "Flaky");
        assert_eq!(failure.class(), ErrorClass::Execution);
        assert_eq!(module.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let module = Arc::new(FlakyModule::new("Flaky", 1, Value::from("ok")));
        let graph = single_node_graph("Flaky", CallOptions::new().with_retry(fast_retry(3)));
        let rt = runtime();
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(module.clone()));

        let result = pipeline.run(inputs([("text", Value::from("x"))])).await.unwrap();

        assert_eq!(result.output("result"), Some(&Value::from("ok")));
        assert_eq!(module.call_count(), 2);
    }

    #[tokio::test]
    async fn test_declared_options_apply_to_plain_nodes() {
        let module = Arc::new(FlakyModule::new("Flaky", 1, Value::from("ok")));
        let declaration = ModuleDeclaration::new("Flaky", Type::Any, Type::String)
            .with_options(CallOptions::new().with_retry(fast_retry(2)));
        let graph = single_node_graph("Flaky", CallOptions::default());
        let rt = runtime();
        let pipeline = bind(
            &rt,
            graph,
            &ModuleBindings::new().with_declared(declaration, module.clone()),
        );

        let result = pipeline.run(inputs([("text", Value::from("x"))])).await.unwrap();

        assert!(result.is_completed());
        assert_eq!(
            pipeline.decorators_of(&NodeId::from("node")),
            Some(vec!["retry"])
        );
    }

    #[tokio::test]
    async fn test_shared_limits_keyed_by_graph_module_name() {
        let declaration = ModuleDeclaration::new("Search", Type::Any, Type::Any);
        let implementation = Arc::new(FnModule::new("search-impl-v2", Ok));
        let graph = single_node_graph(
            "Search",
            CallOptions::new()
                .with_concurrency(1)
                .with_circuit_breaker(3, Duration::from_secs(60)),
        );
        let rt = runtime();
        let pipeline = bind(
            &rt,
            graph,
            &ModuleBindings::new().with_declared(declaration, implementation),
        );

        let result = pipeline.run(inputs([("text", Value::from("q"))])).await.unwrap();

        assert!(result.is_completed());
        let registries = rt.registries();
        assert!(registries.concurrency.get("Search").is_some());
        assert!(registries.concurrency.get("search-impl-v2").is_none());
        assert_eq!(
            registries.breakers.status("Search"),
            Some(CircuitStatus::Closed)
        );
        assert_eq!(registries.breakers.status("search-impl-v2"), None);
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_invocation() {
        let counter = Arc::new(CountingModule::new("Counter"));
        let graph = single_node_graph(
            "Counter",
            CallOptions::new().with_cache(Duration::from_secs(60)),
        );
        let rt = runtime().with_cache(Arc::new(InMemoryCacheBackend::new()));
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(counter.clone()));

        let first = pipeline.run(inputs([("text", Value::from("same"))])).await.unwrap();
        let second = pipeline.run(inputs([("text", Value::from("same"))])).await.unwrap();
        let other = pipeline.run(inputs([("text", Value::from("other"))])).await.unwrap();

        assert_eq!(first.output("result"), Some(&Value::Int(1)));
        assert_eq!(second.output("result"), Some(&Value::Int(1)));
        assert_eq!(other.output("result"), Some(&Value::Int(2)));
        assert_eq!(counter.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_keeps_infinities_apart() {
        let counter = Arc::new(CountingModule::new("Counter"));
        let graph = GraphBuilder::new("scale", "1")
            .input("x", Type::Float)
            .output("result", Type::Int)
            .module(
                ModuleNode::new("count", "Counter")
                    .input("x", "x")
                    .output("result")
                    .with_options(CallOptions::new().with_cache(Duration::from_secs(60))),
            )
            .build()
            .unwrap();
        let rt = runtime().with_cache(Arc::new(InMemoryCacheBackend::new()));
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(counter.clone()));

        let pos = pipeline
            .run(inputs([("x", Value::Float(f64::INFINITY))]))
            .await
            .unwrap();
        let neg = pipeline
            .run(inputs([("x", Value::Float(f64::NEG_INFINITY))]))
            .await
            .unwrap();
        let pos_again = pipeline
            .run(inputs([("x", Value::Float(f64::INFINITY))]))
            .await
            .unwrap();

        assert_eq!(pos.output("result"), Some(&Value::Int(1)));
        assert_eq!(neg.output("result"), Some(&Value::Int(2)));
        assert_eq!(pos_again.output("result"), Some(&Value::Int(1)));
        assert_eq!(counter.call_count(), 2);
    }

    #[tokio::test]
    async fn test_throttle_delays_runs_without_rejecting() {
        let counter = Arc::new(CountingModule::new("Counter"));
        let graph = single_node_graph(
            "Counter",
            CallOptions::new().with_throttle(2, Duration::from_millis(150)),
        );
        let rt = runtime();
        let pipeline = Arc::new(bind(&rt, graph, &ModuleBindings::new().with(counter.clone())));

        let start = Instant::now();
        let runs = (0..5).map(|i| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                pipeline
                    .run(inputs([("text", Value::from(format!("run {i}")))]))
                    .await
            }
        });
        let results = futures::future::join_all(runs).await;
        let elapsed = start.elapsed();

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.is_completed())));
        assert_eq!(counter.call_count(), 5);
        // Starts land at roughly 0, 0, 150, 150 and 300ms.
        assert!(elapsed >= Duration::from_millis(280), "took {elapsed:?}");
        assert!(rt.registries().throttles.get("Counter").is_some());
    }

    #[tokio::test]
    async fn test_skip_policy_propagates_unreachable() {
        let counter = Arc::new(CountingModule::new("Counter"));
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "bad data")))
            .with(counter.clone())
            .with(uppercase_module());
        let rt = runtime();
        let pipeline = bind(
            &rt,
            skipping_graph(ErrorPolicy::Skip, ErrorPolicy::Skip),
            &bindings,
        );

        let result = pipeline
            .run_with(
                inputs([("text", Value::from("hi"))]),
                RunOptions::new().with_outputs(["result"]),
            )
            .await
            .unwrap();

        assert!(result.is_completed());
        assert_eq!(result.output("result"), Some(&Value::from("HI")));
        assert_eq!(
            result.skipped_nodes,
            vec![NodeId::from("bad"), NodeId::from("down")]
        );
        assert!(result.logged_errors.is_empty());
        assert_eq!(counter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_requested_output_fails_run() {
        let counter = Arc::new(CountingModule::new("Counter"));
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "bad data")))
            .with(counter.clone())
            .with(uppercase_module());
        let rt = runtime();
        let pipeline = bind(
            &rt,
            skipping_graph(ErrorPolicy::Skip, ErrorPolicy::Skip),
            &bindings,
        );

        let result = pipeline.run(inputs([("text", Value::from("hi"))])).await.unwrap();

        let failure = result.failure().unwrap();
        assert_eq!(failure.node, NodeId::from("down"));
        assert_eq!(failure.module, "Counter");
        assert_eq!(failure.class(), ErrorClass::UnreachableInput);
        assert!(matches!(
            &failure.error,
            ModuleError::UnreachableInput { node, .. } if *node == NodeId::from("downstream")
        ));
        assert_eq!(
            result.skipped_nodes,
            vec![NodeId::from("bad"), NodeId::from("down")]
        );
        assert_eq!(counter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_log_policy_records_error() {
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "bad data")))
            .with(Arc::new(CountingModule::new("Counter")))
            .with(uppercase_module());
        let rt = runtime();
        let pipeline = bind(
            &rt,
            skipping_graph(ErrorPolicy::Log, ErrorPolicy::Skip),
            &bindings,
        );

        let result = pipeline
            .run_with(
                inputs([("text", Value::from("hi"))]),
                RunOptions::new().with_outputs(["result"]),
            )
            .await
            .unwrap();

        assert!(result.is_completed());
        assert_eq!(result.logged_errors.len(), 1);
        assert_eq!(result.logged_errors[0].node, NodeId::from("bad"));
        assert_eq!(result.logged_errors[0].class(), ErrorClass::Execution);
    }

    #[tokio::test]
    async fn test_unreachable_input_fails_fail_policy_node() {
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "bad data")))
            .with(Arc::new(CountingModule::new("Counter")))
            .with(uppercase_module());
        let rt = runtime();
        let pipeline = bind(
            &rt,
            skipping_graph(ErrorPolicy::Skip, ErrorPolicy::Fail),
            &bindings,
        );

        let result = pipeline.run(inputs([("text", Value::from("hi"))])).await.unwrap();

        let failure = result.failure().unwrap();
        assert_eq!(failure.node, NodeId::from("down"));
        assert_eq!(failure.class(), ErrorClass::UnreachableInput);
    }

    #[tokio::test]
    async fn test_failure_aborts_outstanding_work() {
        let graph = GraphBuilder::new("race", "1")
            .input("x", Type::Any)
            .output("fast", Type::Any)
            .output("slow", Type::Any)
            .module(ModuleNode::new("fails", "Broken").input("x", "x").output("fast"))
            .module(ModuleNode::new("sleeps", "Sleepy").input("x", "x").output("slow"))
            .build()
            .unwrap();
        let slow = Arc::new(SlowModule::new("Sleepy", Duration::from_millis(500), Value::Null));
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "boom")))
            .with(slow.clone());
        let rt = runtime();
        let pipeline = bind(&rt, graph, &bindings);

        let start = Instant::now();
        let result = pipeline.run(inputs([("x", Value::Null)])).await.unwrap();

        assert!(result.is_failed());
        assert!(start.elapsed() < Duration::from_millis(400));
        assert_eq!(slow.completed(), 0);
    }

    #[tokio::test]
    async fn test_result_field_missing_is_validation_failure() {
        let graph = GraphBuilder::new("fields", "1")
            .input("x", Type::Any)
            .output("sum", Type::Int)
            .module(
                ModuleNode::new("count", "Counter")
                    .input("x", "x")
                    .output_field("sum", "sum"),
            )
            .build()
            .unwrap();
        let rt = runtime();
        let pipeline = bind(
            &rt,
            graph,
            &ModuleBindings::new().with(Arc::new(CountingModule::new("Counter"))),
        );

        let result = pipeline.run(inputs([("x", Value::Null)])).await.unwrap();

        assert_eq!(result.failure().unwrap().class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_lazy_node_runs_only_on_demand() {
        let graph = GraphBuilder::new("lazy", "1")
            .input("text", Type::String)
            .output("result", Type::String)
            .output("audit", Type::Int)
            .module(
                ModuleNode::new("upper", "Uppercase")
                    .input("text", "text")
                    .output("result"),
            )
            .module(
                ModuleNode::new("audit", "Counter")
                    .input("text", "text")
                    .output("audit")
                    .with_options(CallOptions::new().lazy()),
            )
            .build()
            .unwrap();
        let counter = Arc::new(CountingModule::new("Counter"));
        let bindings = ModuleBindings::new()
            .with(uppercase_module())
            .with(counter.clone());
        let rt = runtime();
        let pipeline = bind(&rt, graph, &bindings);

        let result = pipeline
            .run_with(
                inputs([("text", Value::from("a"))]),
                RunOptions::new().with_outputs(["result"]),
            )
            .await
            .unwrap();
        assert!(result.is_completed());
        assert_eq!(result.outputs().unwrap().len(), 1);
        assert_eq!(counter.call_count(), 0);

        let result = pipeline.run(inputs([("text", Value::from("a"))])).await.unwrap();
        assert_eq!(result.output("audit"), Some(&Value::Int(1)));
        assert_eq!(counter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_single_worker_honours_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("priority", "1").input("x", Type::Any);
        let mut bindings = ModuleBindings::new();
        for (name, priority, delay) in [("head", 0, 30), ("low", 1, 1), ("high", 9, 1), ("mid", 5, 1)] {
            builder = builder.output(name, Type::Any).module(
                ModuleNode::new(name, name)
                    .input("x", "x")
                    .output(name)
                    .with_options(CallOptions::new().with_priority(priority)),
            );
            bindings.insert(Arc::new(RecordingModule::new(
                name,
                name,
                Duration::from_millis(delay),
                Arc::clone(&log),
            )));
        }
        let rt = Runtime::new(
            RuntimeConfig::new().with_max_parallelism(1),
            Arc::new(Registries::new()),
        );
        let pipeline = bind(&rt, builder.build().unwrap(), &bindings);

        let result = pipeline.run(inputs([("x", Value::Null)])).await.unwrap();

        assert!(result.is_completed());
        assert_eq!(*log.lock(), vec!["head", "high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_max_parallelism_bounds_in_flight_modules() {
        let gauge = Arc::new(GaugeModule::new("Gauge", Duration::from_millis(20)));
        let mut builder = GraphBuilder::new("fanout", "1").input("x", Type::Any);
        for i in 0..4 {
            let out = format!("out{i}");
            builder = builder
                .output(&out, Type::Any)
                .module(ModuleNode::new(format!("g{i}"), "Gauge").input("x", "x").output(out.as_str()));
        }
        let rt = Runtime::new(
            RuntimeConfig::new().with_max_parallelism(2),
            Arc::new(Registries::new()),
        );
        let pipeline = bind(&rt, builder.build().unwrap(), &ModuleBindings::new().with(gauge.clone()));

        let result = pipeline.run(inputs([("x", Value::Null)])).await.unwrap();

        assert!(result.is_completed());
        assert_eq!(gauge.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_limit_holds_across_runs() {
        let gauge = Arc::new(GaugeModule::new("Gauge", Duration::from_millis(30)));
        let graph = single_node_graph("Gauge", CallOptions::new().with_concurrency(2));
        let rt = runtime();
        let pipeline = Arc::new(bind(&rt, graph, &ModuleBindings::new().with(gauge.clone())));

        let runs = (0..5).map(|i| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                pipeline
                    .run(inputs([("text", Value::from(format!("run {i}")))]))
                    .await
            }
        });
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.is_completed())));
        assert_eq!(gauge.max_in_flight(), 2);
        assert_eq!(gauge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abort_via_cancellation_token() {
        let slow = Arc::new(SlowModule::new("Sleepy", Duration::from_secs(5), Value::Null));
        let graph = single_node_graph("Sleepy", CallOptions::default());
        let rt = runtime();
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(slow.clone()));
        let token = Arc::new(CancellationToken::new());

        let canceller = {
            let token = Arc::clone(&token);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("caller gave up");
            })
        };
        let err = pipeline
            .run_with(
                inputs([("text", Value::from("x"))]),
                RunOptions::new().with_cancel(token),
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, PipeloomError::Aborted(reason) if reason == "caller gave up"));
        assert_eq!(slow.started(), 1);
        assert_eq!(slow.completed(), 0);
    }

    #[tokio::test]
    async fn test_finished_runs_unlink_from_caller_token() {
        let rt = runtime();
        let pipeline = bind(
            &rt,
            uppercase_graph().unwrap(),
            &ModuleBindings::new().with(uppercase_module()),
        );
        let shutdown = Arc::new(CancellationToken::new());

        for i in 0..200 {
            let result = pipeline
                .run_with(
                    inputs([("text", Value::from(format!("req {i}")))]),
                    RunOptions::new().with_cancel(Arc::clone(&shutdown)),
                )
                .await
                .unwrap();
            assert!(result.is_completed());
        }

        assert_eq!(shutdown.callback_count(), 0);
        shutdown.cancel("server stopping");
        let err = pipeline
            .run_with(
                inputs([("text", Value::from("late"))]),
                RunOptions::new().with_cancel(Arc::clone(&shutdown)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipeloomError::Aborted(reason) if reason == "server stopping"));
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_across_runs() {
        let module = Arc::new(FailingModule::new("Unstable", "503"));
        let graph = single_node_graph(
            "Unstable",
            CallOptions::new().with_circuit_breaker(3, Duration::from_secs(60)),
        );
        let rt = runtime();
        let pipeline = bind(&rt, graph, &ModuleBindings::new().with(module.clone()));

        for _ in 0..3 {
            let result = pipeline.run(inputs([("text", Value::from("x"))])).await.unwrap();
            assert_eq!(result.failure().unwrap().class(), ErrorClass::Execution);
        }
        let result = pipeline.run(inputs([("text", Value::from("x"))])).await.unwrap();

        assert_eq!(result.failure().unwrap().class(), ErrorClass::CircuitOpen);
        assert_eq!(module.call_count(), 3);
        assert_eq!(
            rt.registries().breakers.status("Unstable"),
            Some(CircuitStatus::Open)
        );
    }

    #[tokio::test]
    async fn test_remote_module_in_pipeline() {
        let transport = Arc::new(LoopbackTransport::new(uppercase_module()));
        let declaration = ModuleDeclaration::new(
            "Uppercase",
            Type::Record([("text".to_string(), Type::String)].into_iter().collect()),
            Type::String,
        );
        let remote = Arc::new(RemoteModule::new(declaration, transport.clone()));
        let rt = runtime();
        let pipeline = bind(&rt, uppercase_graph().unwrap(), &ModuleBindings::new().with(remote));

        let result = pipeline.run(inputs([("text", Value::from("far"))])).await.unwrap();

        assert_eq!(result.output("result"), Some(&Value::from("FAR")));
        assert_eq!(transport.requests(), vec!["Uppercase".to_string()]);
    }

    #[tokio::test]
    async fn test_lifecycle_events_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let events: Arc<dyn EventSink> = sink.clone();
        let rt = runtime().with_event_sink(events);
        let pipeline = bind(
            &rt,
            uppercase_graph().unwrap(),
            &ModuleBindings::new().with(uppercase_module()),
        );

        pipeline.run(inputs([("text", Value::from("hello"))])).await.unwrap();

        let names: Vec<String> = sink.events().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["run.started", "module.started", "module.completed", "run.completed"]
        );
        let (_, data) = &sink.events_of_type("module.completed")[0];
        assert_eq!(data.as_ref().unwrap()["node"], "upper");
        assert_eq!(data.as_ref().unwrap()["status"], "completed");
    }

    #[tokio::test]
    async fn test_failed_node_emits_module_failed() {
        let sink = Arc::new(CollectingEventSink::new());
        let events: Arc<dyn EventSink> = sink.clone();
        let rt = runtime().with_event_sink(events);
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "bad data")))
            .with(Arc::new(CountingModule::new("Counter")))
            .with(uppercase_module());
        let pipeline = bind(
            &rt,
            skipping_graph(ErrorPolicy::Fail, ErrorPolicy::Fail),
            &bindings,
        );

        let result = pipeline.run(inputs([("text", Value::from("hi"))])).await.unwrap();

        assert!(result.is_failed());
        let failed = sink.events_of_type("module.failed");
        assert_eq!(failed.len(), 1);
        let data = failed[0].1.as_ref().unwrap();
        assert_eq!(data["node"], "bad");
        assert_eq!(data["module"], "Broken");
        assert_eq!(data["status"], "failed");
        assert!(data["duration_ms"].as_f64().is_some_and(|ms| ms >= 0.0));
        assert_eq!(sink.events_of_type("run.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_nodes_emit_duration() {
        let sink = Arc::new(CollectingEventSink::new());
        let events: Arc<dyn EventSink> = sink.clone();
        let rt = runtime().with_event_sink(events);
        let bindings = ModuleBindings::new()
            .with(Arc::new(FailingModule::permanent("Broken", "bad data")))
            .with(Arc::new(CountingModule::new("Counter")))
            .with(uppercase_module());
        let pipeline = bind(
            &rt,
            skipping_graph(ErrorPolicy::Skip, ErrorPolicy::Skip),
            &bindings,
        );

        pipeline
            .run_with(
                inputs([("text", Value::from("hi"))]),
                RunOptions::new().with_outputs(["result"]),
            )
            .await
            .unwrap();

        let skipped = sink.events_of_type("module.skipped");
        assert_eq!(skipped.len(), 2);
        for (_, data) in &skipped {
            let data = data.as_ref().unwrap();
            assert_eq!(data["status"], "skipped");
            assert!(data["duration_ms"].is_number());
        }
    }

    #[tokio::test]
    async fn test_run_result_serializes() {
        let rt = runtime();
        let pipeline = bind(
            &rt,
            uppercase_graph().unwrap(),
            &ModuleBindings::new().with(uppercase_module()),
        );
        let result = pipeline
            .run(inputs([("text", Value::from("hello"))]))
            .await
            .unwrap();

        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["outcome"]["status"], "completed");
    }
}
