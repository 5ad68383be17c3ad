/// Batch recalculation CLI
///
/// Recomputes risk scores for a cohort of users without going through
/// the HTTP API. Per-user failures are reported but do not fail the
/// run; only infrastructure errors (config, database, cohort
/// resolution) produce a non-zero exit.
use breakwater::{
    batch::{CancelHandle, Cohort, RecalcOptions},
    config::EngineConfig,
    context::AppContext,
    error::EngineResult,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
breakwater-recalc - batch risk score recalculation

USAGE:
    breakwater-recalc [OPTIONS]

OPTIONS:
    --min-score <SCORE>    Only users whose latest score is at or above SCORE
    --user-ids <IDS>       Comma-separated list of user ids to recompute
    --batch <N>            Users per batch (default: 50)
    --concurrency <N>      Concurrent recomputations within a batch (default: 5)
    --dry-run              Compute and report deltas without persisting anything
    --help                 Print this help
";

#[derive(Debug)]
struct CliArgs {
    cohort: Cohort,
    options: RecalcOptions,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cohort = Cohort::All;
    let mut options = RecalcOptions::default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--min-score" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--min-score requires a value".to_string())?;
                let score: f64 = value
                    .parse()
                    .map_err(|_| format!("invalid --min-score: {}", value))?;
                cohort = Cohort::MinScore(score);
            }
            "--user-ids" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--user-ids requires a value".to_string())?;
                let ids: Vec<String> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if ids.is_empty() {
                    return Err("--user-ids requires at least one id".to_string());
                }
                cohort = Cohort::Users(ids);
            }
            "--batch" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--batch requires a value".to_string())?;
                options.batch_size = value
                    .parse()
                    .map_err(|_| format!("invalid --batch: {}", value))?;
            }
            "--concurrency" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--concurrency requires a value".to_string())?;
                options.concurrency = value
                    .parse()
                    .map_err(|_| format!("invalid --concurrency: {}", value))?;
            }
            "--dry-run" => {
                options.dry_run = true;
            }
            "--help" | "-h" => {
                return Err(String::new());
            }
            other => {
                return Err(format!("unknown argument: {}", other));
            }
        }
    }

    Ok(CliArgs { cohort, options })
}

fn cohort_label(cohort: &Cohort) -> String {
    match cohort {
        Cohort::All => "all".to_string(),
        Cohort::MinScore(score) => format!("min_score>={}", score),
        Cohort::Stale { hours } => format!("stale>{}h", hours),
        Cohort::Users(ids) => format!("{} explicit users", ids.len()),
    }
}

async fn run(args: CliArgs) -> EngineResult<()> {
    let config = EngineConfig::from_env()?;
    let ctx = Arc::new(AppContext::new(config).await?);

    let cancel = CancelHandle::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, finishing current batch");
            cancel_on_signal.cancel();
        }
    });

    println!(
        "Recalculating cohort: {} (batch={}, concurrency={}{})",
        cohort_label(&args.cohort),
        args.options.batch_size,
        args.options.concurrency,
        if args.options.dry_run { ", dry run" } else { "" },
    );

    let dry_run = args.options.dry_run;
    let summary = ctx
        .orchestrator
        .run(args.cohort.clone(), args.options, cancel)
        .await?;

    // Dry runs persist nothing, including their own trail
    if !dry_run {
        ctx.audit
            .record(
                "cli",
                "batch.recalc",
                "batch_run",
                &uuid::Uuid::new_v4().to_string(),
                serde_json::json!({
                    "cohort": cohort_label(&args.cohort),
                    "total": summary.total,
                    "succeeded": summary.succeeded,
                    "failed": summary.failed,
                    "cancelled": summary.cancelled,
                    "elapsed_ms": summary.elapsed_ms,
                }),
            )
            .await?;
    }

    println!();
    println!(
        "Done: {}/{} users in {}ms{}",
        summary.processed,
        summary.total,
        summary.elapsed_ms,
        if summary.cancelled { " (cancelled)" } else { "" },
    );
    println!("  succeeded:      {}", summary.succeeded);
    println!("  failed:         {}", summary.failed);
    println!("  mean |delta|:   {:.2}", summary.mean_abs_delta);

    if !summary.failures.is_empty() {
        println!();
        println!("Failures (showing {}):", summary.failures.len());
        for failure in &summary.failures {
            println!("  {}: {}", failure.user_id, failure.error);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "breakwater=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            if message.is_empty() {
                print!("{}", USAGE);
                return;
            }
            eprintln!("error: {}", message);
            eprintln!();
            eprint!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("recalc failed: {}", e);
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_defaults() {
        let args = parse_args(&[]).unwrap();

        assert!(matches!(args.cohort, Cohort::All));
        assert_eq!(args.options.batch_size, 50);
        assert_eq!(args.options.concurrency, 5);
        assert!(!args.options.dry_run);
    }

    #[test]
    fn test_parse_user_ids() {
        let args = parse_args(&strings(&["--user-ids", "u-1, u-2,u-3"])).unwrap();

        match args.cohort {
            Cohort::Users(ids) => assert_eq!(ids, vec!["u-1", "u-2", "u-3"]),
            other => panic!("unexpected cohort: {:?}", other),
        }
    }

    #[test]
    fn test_parse_min_score_and_tuning() {
        let args = parse_args(&strings(&[
            "--min-score",
            "60",
            "--batch",
            "10",
            "--concurrency",
            "2",
            "--dry-run",
        ]))
        .unwrap();

        assert!(matches!(args.cohort, Cohort::MinScore(s) if s == 60.0));
        assert_eq!(args.options.batch_size, 10);
        assert_eq!(args.options.concurrency, 2);
        assert!(args.options.dry_run);
    }

    #[test]
    fn test_parse_rejects_unknown_flag() {
        let err = parse_args(&strings(&["--cohort", "all"])).unwrap_err();
        assert!(err.contains("unknown argument"));
    }

    #[test]
    fn test_parse_rejects_missing_value() {
        let err = parse_args(&strings(&["--min-score"])).unwrap_err();
        assert!(err.contains("requires a value"));
    }
}
