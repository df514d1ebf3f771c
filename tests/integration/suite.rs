use loopcheck_harness::{cancel_pair, run_suite, CancelToken, ChunkingPolicy, LoopbackJob, SuiteOptions};

use crate::*;

fn options(parallel: bool, fail_fast: bool) -> SuiteOptions {
    SuiteOptions {
        buffer_size: 20_000,
        chunking: ChunkingPolicy::FixedMax,
        retry_limit: 4,
        seed: Some(11),
        parallel,
        fail_fast,
    }
}

/// Endpoints 1..=4, with faults injected on the ones listed.
fn jobs(faulty: &[(u8, FaultPlan)]) -> Vec<LoopbackJob> {
    (1..=4u8)
        .map(|endpoint| {
            let plan = faulty
                .iter()
                .find(|(ep, _)| *ep == endpoint)
                .map(|(_, plan)| plan.clone())
                .unwrap_or_default();
            SimPair::job(endpoint, 512, plan)
        })
        .collect()
}

#[tokio::test]
async fn test_sequential_and_parallel_report_the_same_failures() {
    for parallel in [false, true] {
        let faulty = [
            (2, FaultPlan::new().at(3, Fault::Corrupt)),
            (4, FaultPlan::new().repeat(0, 10, Fault::Timeout)),
        ];
        let report = run_suite(jobs(&faulty), options(parallel, false), CancelToken::never()).await;

        assert_eq!(report.endpoints.len(), 4, "parallel={parallel}");
        assert_eq!(report.failed_endpoints(), vec![2, 4], "parallel={parallel}");
        assert!(!report.all_passed());

        let ep4 = &report.endpoints[3];
        assert!(ep4.failure.as_deref().unwrap().contains("timed out 4 times"));
    }
}

#[tokio::test]
async fn test_clean_device_passes_with_throughput() {
    let opts = SuiteOptions {
        chunking: ChunkingPolicy::RandomizedUpTo,
        ..options(true, false)
    };
    let report = run_suite(jobs(&[]), opts, CancelToken::never()).await;

    assert!(report.all_passed());
    for ep in &report.endpoints {
        assert_eq!(ep.bytes, 20_000);
        assert!(ep.timing.total_ns >= ep.timing.transfer_ns);
    }
}

/// Fail-fast overrides parallel: the suite stops at the first failing pair.
#[tokio::test]
async fn test_fail_fast_skips_remaining_pairs() {
    let faulty = [(2, FaultPlan::new().at(0, Fault::Unplug))];
    let report = run_suite(jobs(&faulty), options(true, true), CancelToken::never()).await;

    assert_eq!(report.endpoints.len(), 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.failed_endpoints(), vec![2]);
    let failure = report.endpoints[1].failure.as_deref().unwrap();
    assert!(failure.contains("disconnected"), "{failure}");
}

#[tokio::test]
async fn test_zlp_suite_sends_one_empty_packet_per_pair() {
    let plans: Vec<(u8, FaultPlan)> = (1..=4).map(|ep| (ep, FaultPlan::new())).collect();
    let opts = SuiteOptions {
        buffer_size: 0,
        ..options(false, false)
    };
    let report = run_suite(jobs(&plans), opts, CancelToken::never()).await;

    assert!(report.all_passed());
    for (_, plan) in &plans {
        assert_eq!(plan.attempts(), 1);
    }
    assert!(report.endpoints.iter().all(|ep| ep.zero_length_chunks == 1));
}

#[tokio::test]
async fn test_cancelled_suite_runs_nothing() {
    let (handle, token) = cancel_pair();
    handle.cancel();
    let report = run_suite(jobs(&[]), options(false, false), token).await;

    assert!(report.endpoints.is_empty());
    assert_eq!(report.skipped, 4);
}
