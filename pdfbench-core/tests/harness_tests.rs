//! Integration tests for the resilient batch harness

use pdfbench::batch::{
    map_reduce, run_all, BatchOptions, BatchProcessor, CancelToken, CustomJob, FailureKind,
    JobResult, UnitIdentity,
};
use pdfbench::BenchError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Succeed(u32),
    Fail,
    Panic,
}

fn behaviour() -> impl Strategy<Value = Behaviour> {
    prop_oneof![
        6 => any::<u32>().prop_map(Behaviour::Succeed),
        1 => Just(Behaviour::Fail),
        1 => Just(Behaviour::Panic),
    ]
}

fn job(index: usize, behaviour: Behaviour) -> CustomJob<u32> {
    CustomJob::new(UnitIdentity::new(format!("doc{index}.pdf")), move |_ctx| {
        match behaviour {
            Behaviour::Succeed(value) => Ok(value),
            Behaviour::Fail => Err(BenchError::Process(format!("unit {index} failed"))),
            Behaviour::Panic => panic!("unit {index} exploded"),
        }
    })
}

/// Status and output of each result, in order
fn outline(results: &[JobResult<u32>]) -> Vec<(String, String, Option<u32>)> {
    results
        .iter()
        .map(|r| {
            (
                r.identity().path.clone(),
                r.status_label(),
                r.output().copied(),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_unit_yields_exactly_one_result(plan in prop::collection::vec(behaviour(), 0..24)) {
        let jobs = plan.iter().enumerate().map(|(i, b)| job(i, *b)).collect();
        let results = run_all(jobs, 4, Some(Duration::from_secs(30)));

        prop_assert_eq!(results.len(), plan.len());
        for (i, (result, planned)) in results.iter().zip(&plan).enumerate() {
            prop_assert_eq!(result.index(), i);
            prop_assert_eq!(&result.identity().path, &format!("doc{i}.pdf"));
            match planned {
                Behaviour::Succeed(value) => prop_assert_eq!(result.output(), Some(value)),
                Behaviour::Fail => {
                    prop_assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::Failed))
                }
                Behaviour::Panic => {
                    prop_assert_eq!(result.error().map(|e| e.kind), Some(FailureKind::Crashed))
                }
            }
        }
    }

    #[test]
    fn serial_and_parallel_runs_agree(plan in prop::collection::vec(behaviour(), 1..16)) {
        let build = || plan.iter().enumerate().map(|(i, b)| job(i, *b)).collect::<Vec<_>>();
        let serial = run_all(build(), 1, None);
        let parallel = run_all(build(), 8, None);
        prop_assert_eq!(outline(&serial), outline(&parallel));
    }
}

#[test]
fn test_timeout_does_not_block_siblings() {
    let started = Instant::now();
    let jobs = vec![
        CustomJob::new(UnitIdentity::new("stuck.pdf"), |_ctx| {
            thread::sleep(Duration::from_secs(20));
            Ok(0u32)
        }),
        CustomJob::new(UnitIdentity::new("quick.pdf"), |_ctx| Ok(7u32)),
    ];

    let results = run_all(jobs, 2, Some(Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(results[0].is_timed_out());
    assert_eq!(results[0].status_label(), "TimedOut");
    assert_eq!(results[1].output(), Some(&7));
}

#[test]
fn test_units_get_private_scratch_space() {
    let jobs: Vec<_> = (0..6)
        .map(|i| {
            CustomJob::new(UnitIdentity::new(format!("doc{i}.pdf")), move |ctx| {
                let marker = ctx.temp_path().join("marker");
                assert!(!marker.exists());
                std::fs::write(&marker, i.to_string())?;
                Ok(ctx.temp_path().to_path_buf())
            })
        })
        .collect();

    let results = run_all(jobs, 3, None);
    let mut dirs: Vec<_> = results.into_iter().filter_map(|r| r.into_output()).collect();
    assert_eq!(dirs.len(), 6);
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 6);
}

#[test]
fn test_scratch_space_removed_on_every_exit_path() {
    let (tx, rx) = mpsc::channel();
    let scratch = |name: &str, tx: mpsc::Sender<PathBuf>, exit: Behaviour, hang: bool| {
        CustomJob::new(UnitIdentity::new(name), move |ctx| {
            std::fs::write(ctx.temp_path().join("partial.pdf"), b"%PDF-1.7")?;
            tx.send(ctx.temp_path().to_path_buf()).unwrap();
            if hang {
                thread::sleep(Duration::from_secs(20));
            }
            match exit {
                Behaviour::Succeed(value) => Ok(value),
                Behaviour::Fail => Err(BenchError::Process("tool exited with 2".to_string())),
                Behaviour::Panic => panic!("renderer aborted"),
            }
        })
    };
    let jobs = vec![
        scratch("ok.pdf", tx.clone(), Behaviour::Succeed(1), false),
        scratch("error.pdf", tx.clone(), Behaviour::Fail, false),
        scratch("panic.pdf", tx.clone(), Behaviour::Panic, false),
        scratch("hung.pdf", tx, Behaviour::Succeed(2), true),
    ];

    let results = run_all(jobs, 4, Some(Duration::from_millis(500)));
    let statuses: Vec<String> = results.iter().map(|r| r.status_label()).collect();
    assert_eq!(statuses, vec!["Success", "Failed", "Crashed", "TimedOut"]);

    let dirs: Vec<_> = rx.iter().take(4).collect();
    assert_eq!(dirs.len(), 4);
    for dir in dirs {
        assert!(!dir.exists(), "{} was left behind", dir.display());
    }
}

#[test]
fn test_cancellation_marks_queued_units() {
    let token = CancelToken::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let options = BatchOptions::default()
        .with_parallelism(1)
        .with_cancel_token(token.clone());

    let mut processor = BatchProcessor::new(options);
    for i in 0..5 {
        let token = token.clone();
        let ran = Arc::clone(&ran);
        processor.add_job(CustomJob::new(UnitIdentity::new(format!("doc{i}.pdf")), move |_ctx| {
            ran.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                token.cancel();
            }
            Ok(i)
        }));
    }

    let summary = processor.execute();
    assert!(summary.cancelled);
    assert_eq!(summary.results.len(), 5);
    assert!(summary.results[0].is_success());
    assert!(summary.results[1..].iter().all(|r| r.is_cancelled()));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_map_reduce_groups_failures_with_successes() {
    let mut map_jobs = Vec::new();
    for doc in ["a.pdf", "b.pdf"] {
        for tool in ["one", "two", "three"] {
            let identity = UnitIdentity::new(doc).with_label("tool", tool);
            map_jobs.push(CustomJob::new(identity, move |_ctx| {
                if tool == "two" && doc == "b.pdf" {
                    Err(BenchError::Process("tool two crashed".to_string()))
                } else {
                    Ok(tool.len())
                }
            }));
        }
    }

    let summary = map_reduce(
        map_jobs,
        |identity| identity.path.clone(),
        |path: String, results: Vec<JobResult<usize>>| {
            CustomJob::new(UnitIdentity::new(path), move |_ctx| {
                let ok: usize = results.iter().filter_map(|r| r.output()).sum();
                Ok((results.len(), ok))
            })
        },
        BatchOptions::default().with_parallelism(3),
    );

    assert_eq!(summary.total_jobs, 2);
    let outputs: Vec<_> = summary
        .results
        .iter()
        .map(|r| (r.identity().path.clone(), *r.output().unwrap()))
        .collect();
    assert_eq!(
        outputs,
        vec![
            ("a.pdf".to_string(), (3, 11)),
            ("b.pdf".to_string(), (3, 8)),
        ]
    );
}
