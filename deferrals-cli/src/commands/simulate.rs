use anyhow::Result;
use deferrals::prelude::*;
use deferrals::{ConditionStatus, MemoryDirectory, ServiceStatus};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "v1.ext.example.io";

pub struct SimulateOptions {
    pub ready_after: u32,
    pub started: bool,
    pub registrations: usize,
    pub funcs: usize,
    pub fail_at: Option<usize>,
    pub cancel_after: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct JobReport {
    kind: String,
    runs: u64,
    errors: u64,
    unhandled: u64,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    outcome: String,
    completed: bool,
    pending: usize,
    queued_registrations: usize,
    queued_funcs: usize,
    handlers: Vec<String>,
    jobs: Vec<JobReport>,
}

pub async fn run(config: DeferralConfig, options: SimulateOptions) -> Result<()> {
    let poll_interval = config.poll_interval();
    let host = Arc::new(SharedFactory::new(&config));
    let manager = DeferralManager::new(host.clone(), config);
    let registry = DeferredRegistration::new("ext-api");
    let directory = Arc::new(MemoryDirectory::new());
    let probe = ServiceAvailability::new([SERVICE]);
    let ctx = Context::new();

    if options.started {
        host.start(&ctx).await?;
    }

    for i in 0..options.registrations {
        let kind = format!("job-{}", i);
        let fails = options.fail_at == Some(i);
        registry
            .add_registration_labeled(kind.clone(), &ctx, &host, move |ctx, host| {
                let kind = kind.clone();
                async move {
                    if fails {
                        return Err(Error::registration(kind, "simulated failure"));
                    }
                    host.register_handler(&ctx, kind.clone(), move |payload| {
                        let kind = kind.clone();
                        async move {
                            log::info!("{} handled {}", kind, payload);
                            Ok(())
                        }
                    })
                    .await
                }
            })
            .await?;
    }

    for i in 0..options.funcs {
        registry
            .add_func_labeled(format!("func-{}", i), &host, move |_| {
                log::info!("deferred func {} ran", i);
            })
            .await;
    }

    let reported = registry.add_func_with_error(&host, |_| async {
        log::info!("all deferred work settled");
        Ok(())
    });

    let publisher = {
        let directory = directory.clone();
        let delay = poll_interval * options.ready_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            directory
                .set(ServiceStatus::new(SERVICE).with_condition("Available", ConditionStatus::True))
                .await;
            log::info!("service {} is now available", SERVICE);
        })
    };

    if let Some(after) = options.cancel_after {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            log::info!("cancelling readiness loop");
            ctx.cancel();
        });
    }

    let result = manager
        .manage_deferrals(
            &ctx,
            "ext api-service availability",
            &registry,
            |_| {
                let directory = directory.clone();
                let probe = probe.clone();
                async move { probe.check(directory.as_ref()).await }
            },
            |_| async {
                log::info!("ext client setup done");
                Ok(())
            },
        )
        .await;
    publisher.abort();

    let outcome = match &result {
        Ok(outcome) => format!("{:?}", outcome),
        Err(e) => format!("failed: {}", e),
    };

    if matches!(result, Ok(ManageOutcome::Completed)) {
        match tokio::time::timeout(Duration::from_secs(1), reported).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => log::warn!("settled notification failed: {}", e),
            Ok(Err(_)) | Err(_) => log::warn!("settled notification not received"),
        }

        let late = registry
            .add_registration_labeled("late-job", &ctx, &host, |ctx, host| async move {
                host.register_handler(&ctx, "late-job", |_| async { Ok(()) }).await
            })
            .await;
        if let Err(e) = late {
            log::warn!("late registration failed: {}", e);
        }

        if host.pool().is_running().await {
            for kind in host.pool().handlers().await {
                host.pool().enqueue(kind, json!({ "source": "simulation" }))?;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    let mut jobs = Vec::new();
    for kind in host.pool().handlers().await {
        let stats = host.pool().stats(&kind).await.unwrap_or_default();
        jobs.push(JobReport {
            kind,
            runs: stats.runs,
            errors: stats.errors,
            unhandled: stats.unhandled,
        });
    }

    let queued = registry.queued().await;
    let report = SimulationReport {
        outcome,
        completed: registry.is_completed().await,
        pending: registry.pending(),
        queued_registrations: queued.registrations,
        queued_funcs: queued.funcs,
        handlers: host.pool().handlers().await,
        jobs,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if options.started {
        host.stop().await?;
    }
    Ok(())
}
