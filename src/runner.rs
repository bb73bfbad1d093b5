//! Optimization runner
//!
//! Owns the run lifecycle:
//!
//! ```text
//! Idle -> Validating -> Running -> Completed
//!                  \            \-> Cancelled
//!                   \------------\-> Failed
//! ```
//!
//! Each pass a search strategy produces is evaluated on a fixed-size rayon
//! pool. Workers pull assignments one at a time from a shared, locked queue,
//! so the strategy's iterator is consumed lazily and never materialized.
//! Progress updates go through a channel to one reporter thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::data::{DateRangeSpec, HistoricalData};
use crate::enumerator::Assignment;
use crate::error::{ConfigError, EvaluationError, OptimizerError, OptimizerResult};
use crate::evaluator::{BacktestEvaluator, EvaluationContext};
use crate::params::ParameterSpace;
use crate::progress::{self, NoProgress, ProgressSink, ProgressUpdate};
use crate::results::{OptimizationResult, ResultSet};
use crate::search::{
    build_strategy, AssignmentStream, PassExecutor, PassOutcome, RefinementSettings,
};
use crate::types::{Metrics, PerformanceMetric, SearchMethod};

/// Minimum trades a result needs to be reported unless configured otherwise
pub const DEFAULT_MIN_TRADES: u32 = 50;

// =============================================================================
// Settings and request
// =============================================================================

/// Execution settings, independent of what is being optimized
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub workers: usize,
    pub refinement: RefinementSettings,
    /// Fail the run when a single evaluation exceeds this duration
    pub evaluation_timeout: Option<Duration>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        RunnerSettings {
            workers: default_workers(),
            refinement: RefinementSettings::default(),
            evaluation_timeout: None,
        }
    }
}

impl RunnerSettings {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_coarsen_factor(mut self, factor: u64) -> Self {
        self.refinement.coarsen_factor = factor;
        self
    }

    pub fn with_max_iterations(mut self, passes: u32) -> Self {
        self.refinement.max_iterations = passes;
        self
    }

    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "workers",
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.refinement.coarsen_factor < 2 {
            return Err(ConfigError::InvalidSetting {
                field: "coarsen_factor",
                reason: format!("must be at least 2, got {}", self.refinement.coarsen_factor),
            });
        }
        if self.refinement.max_iterations == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_iterations",
                reason: "at least one pass is required".to_string(),
            });
        }
        if self.evaluation_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidSetting {
                field: "evaluation_timeout",
                reason: "timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Number of hardware threads, or 1 when it cannot be determined
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// What to optimize against and how results are filtered and ranked
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub data: HistoricalData,
    pub date_range: DateRangeSpec,
    pub metric: PerformanceMetric,
    pub min_trades: u32,
    pub method: SearchMethod,
}

impl RunRequest {
    pub fn new(data: HistoricalData) -> Self {
        RunRequest {
            data,
            date_range: DateRangeSpec::all_data(),
            metric: PerformanceMetric::default(),
            min_trades: DEFAULT_MIN_TRADES,
            method: SearchMethod::default(),
        }
    }

    pub fn with_date_range(mut self, date_range: DateRangeSpec) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn with_metric(mut self, metric: PerformanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_min_trades(mut self, min_trades: u32) -> Self {
        self.min_trades = min_trades;
        self
    }

    pub fn with_method(mut self, method: SearchMethod) -> Self {
        self.method = method;
        self
    }
}

// =============================================================================
// State and outcome
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Validating | RunState::Running)
    }
}

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub method: SearchMethod,
    pub metric: PerformanceMetric,
    /// Sorted descending by `metric`
    pub results: ResultSet,
    /// Evaluations performed, including those filtered by minimum trades
    pub evaluated: u64,
    pub planned: u64,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Results of a cancelled run cover only part of the search
    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn best(&self) -> Option<&OptimizationResult> {
        self.results.iter().next()
    }

    pub fn into_results(self) -> ResultSet {
        self.results
    }
}

// =============================================================================
// Runner
// =============================================================================

pub struct OptimizationRunner {
    settings: RunnerSettings,
    progress: Arc<dyn ProgressSink>,
    state: Mutex<RunState>,
}

impl OptimizationRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        OptimizationRunner {
            settings,
            progress: Arc::new(NoProgress),
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    /// Run one optimization to completion, cancellation, or failure
    ///
    /// Blocks the calling thread. Returns [`OptimizerError::AlreadyRunning`]
    /// without disturbing the active run if one is in progress.
    pub fn run(
        &self,
        space: &ParameterSpace,
        request: &RunRequest,
        evaluator: Arc<dyn BacktestEvaluator>,
        cancel: &CancellationToken,
    ) -> OptimizerResult<RunOutcome> {
        self.begin()?;

        let result = self.validate(space, request).and_then(|context| {
            self.set_state(RunState::Running);
            self.execute(space, request, evaluator, context, cancel)
        });

        let final_state = match &result {
            Ok(outcome) if outcome.status == RunStatus::Completed => RunState::Completed,
            Ok(_) => RunState::Cancelled,
            Err(err) => {
                warn!("Optimization failed: {}", err);
                RunState::Failed
            }
        };
        self.set_state(final_state);
        result
    }

    fn begin(&self) -> OptimizerResult<()> {
        let mut state = lock(&self.state);
        if state.is_active() {
            return Err(OptimizerError::AlreadyRunning);
        }
        *state = RunState::Validating;
        Ok(())
    }

    fn set_state(&self, next: RunState) {
        let mut state = lock(&self.state);
        debug!("Runner state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn validate(
        &self,
        space: &ParameterSpace,
        request: &RunRequest,
    ) -> OptimizerResult<EvaluationContext> {
        if !request.data.is_reachable() {
            return Err(ConfigError::HistoricalDataMissing {
                path: request.data.path().display().to_string(),
            }
            .into());
        }
        if request.min_trades < 2 {
            return Err(ConfigError::MinTradesTooLow {
                value: request.min_trades,
            }
            .into());
        }
        space.validate().map_err(ConfigError::from)?;
        let window = request.date_range.resolve()?;
        self.settings.validate()?;

        Ok(EvaluationContext {
            data: request.data.clone(),
            window,
        })
    }

    fn execute(
        &self,
        space: &ParameterSpace,
        request: &RunRequest,
        evaluator: Arc<dyn BacktestEvaluator>,
        context: EvaluationContext,
        cancel: &CancellationToken,
    ) -> OptimizerResult<RunOutcome> {
        let started = Instant::now();
        let strategy = build_strategy(request.method, self.settings.refinement);
        let planned = u64::try_from(strategy.planned_evaluations(space)?).unwrap_or(u64::MAX);

        info!(
            "Starting {} optimization: {} planned evaluations, {} workers, ranked by {}, min trades {}",
            request.method, planned, self.settings.workers, request.metric, request.min_trades
        );

        evaluator
            .prepare(&context)
            .map_err(OptimizerError::Preparation)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .thread_name(|i| format!("optimizer-worker-{}", i))
            .build()
            .map_err(|e| OptimizerError::WorkerPool(e.to_string()))?;

        let (updates, reporter_rx) = mpsc::channel();
        let sink = Arc::clone(&self.progress);

        thread::scope(|scope| -> OptimizerResult<RunOutcome> {
            scope.spawn(move || progress::deliver(reporter_rx, sink.as_ref()));

            let mut executor = PoolExecutor {
                pool: &pool,
                workers: self.settings.workers,
                evaluator,
                context: Arc::new(context),
                timeout: self.settings.evaluation_timeout,
                metric: request.metric,
                min_trades: request.min_trades,
                cancel,
                results: Mutex::new(ResultSet::new()),
                completed: AtomicU64::new(0),
                planned,
                started,
                updates,
            };
            executor.report(strategy.method().name());

            let status = strategy.search(space, &mut executor)?;
            let evaluated = executor.completed.load(Ordering::Acquire);

            let final_status = match status {
                RunStatus::Completed => "Completed",
                RunStatus::Cancelled => "Cancelled",
            };
            let total = match status {
                RunStatus::Completed => evaluated,
                RunStatus::Cancelled => planned,
            };
            executor.send(evaluated, total, final_status);

            let mut results = executor.into_results();
            results.sort_by_metric(request.metric);

            let elapsed = started.elapsed();
            info!(
                "Optimization {}: {} evaluated, {} qualifying results in {:.2?}",
                final_status.to_lowercase(),
                evaluated,
                results.len(),
                elapsed
            );

            Ok(RunOutcome {
                status,
                method: request.method,
                metric: request.metric,
                results,
                evaluated,
                planned,
                elapsed,
            })
        })
    }
}

impl Default for OptimizationRunner {
    fn default() -> Self {
        OptimizationRunner::new(RunnerSettings::default())
    }
}

// =============================================================================
// Pool executor
// =============================================================================

/// Evaluates strategy passes on the worker pool
struct PoolExecutor<'a> {
    pool: &'a rayon::ThreadPool,
    workers: usize,
    evaluator: Arc<dyn BacktestEvaluator>,
    context: Arc<EvaluationContext>,
    timeout: Option<Duration>,
    metric: PerformanceMetric,
    min_trades: u32,
    cancel: &'a CancellationToken,
    results: Mutex<ResultSet>,
    completed: AtomicU64,
    planned: u64,
    started: Instant,
    updates: Sender<ProgressUpdate>,
}

/// State shared by the workers of one pass
#[derive(Default)]
struct PassState {
    failed: AtomicBool,
    failure: Mutex<Option<OptimizerError>>,
    best: Mutex<Option<OptimizationResult>>,
}

impl PoolExecutor<'_> {
    fn into_results(self) -> ResultSet {
        self.results
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, completed: u64, total_planned: u64, status: &str) {
        // The reporter only goes away when the run is over
        let _ = self.updates.send(ProgressUpdate {
            completed,
            total_planned,
            status: status.to_string(),
            elapsed: self.started.elapsed(),
        });
    }

    fn report(&self, status: &str) {
        self.send(
            self.completed.load(Ordering::Acquire),
            self.planned,
            status,
        );
    }

    // Workers pull one assignment at a time from a shared lazy stream instead of
    // par_bridge, so nothing is buffered ahead of a cancel or a failure.
    fn work(&self, queue: &Mutex<AssignmentStream<'_>>, pass: &PassState, label: &str) {
        loop {
            if self.cancel.is_cancelled() || pass.failed.load(Ordering::Acquire) {
                return;
            }

            let next = lock(queue).next();
            let Some(assignment) = next else {
                return;
            };

            match self.evaluate(&assignment) {
                Ok(metrics) => self.record(assignment, metrics, pass, label),
                Err(source) => {
                    if !pass.failed.swap(true, Ordering::AcqRel) {
                        warn!("Evaluation failed for [{}]: {}", assignment, source);
                        *lock(&pass.failure) =
                            Some(OptimizerError::Evaluation { assignment, source });
                    }
                    return;
                }
            }
        }
    }

    fn record(&self, assignment: Assignment, metrics: Metrics, pass: &PassState, label: &str) {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;

        if metrics.trades >= self.min_trades {
            let result = OptimizationResult::new(assignment, metrics);
            {
                let mut best = lock(&pass.best);
                let improves = best
                    .as_ref()
                    .map_or(true, |b| result.rank_cmp(b, self.metric).is_lt());
                if improves {
                    *best = Some(result.clone());
                }
            }
            lock(&self.results).push(result);
        }

        self.send(completed, self.planned, label);
    }

    fn evaluate(&self, assignment: &Assignment) -> Result<Metrics, EvaluationError> {
        let Some(limit) = self.timeout else {
            return evaluate_guarded(self.evaluator.as_ref(), assignment, &self.context);
        };

        let (tx, rx) = mpsc::channel();
        let evaluator = Arc::clone(&self.evaluator);
        let context = Arc::clone(&self.context);
        let owned = assignment.clone();
        thread::Builder::new()
            .name("optimizer-eval".to_string())
            .spawn(move || {
                let _ = tx.send(evaluate_guarded(evaluator.as_ref(), &owned, &context));
            })
            .map_err(|e| EvaluationError::Strategy(format!("cannot spawn evaluation: {}", e)))?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Evaluation of [{}] exceeded {:?}", assignment, limit);
                Err(EvaluationError::Timeout(limit))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EvaluationError::Panicked(
                "evaluation thread exited without a result".to_string(),
            )),
        }
    }
}

impl PassExecutor for PoolExecutor<'_> {
    fn metric(&self) -> PerformanceMetric {
        self.metric
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn run_pass(
        &mut self,
        label: &str,
        assignments: AssignmentStream<'_>,
    ) -> OptimizerResult<PassOutcome> {
        debug!("Dispatching pass \"{}\" to {} workers", label, self.workers);
        self.report(label);

        let queue = Mutex::new(assignments);
        let pass = PassState::default();
        let (this, queue_ref, pass_ref) = (&*self, &queue, &pass);

        this.pool.scope(|scope| {
            for _ in 0..this.workers {
                scope.spawn(move |_| this.work(queue_ref, pass_ref, label));
            }
        });

        if let Some(err) = lock(&pass.failure).take() {
            return Err(err);
        }
        // A cancel that lands after the last pull does not undo a finished pass
        if self.cancel.is_cancelled() && lock(&queue).next().is_some() {
            return Ok(PassOutcome::Cancelled);
        }

        let best = lock(&pass.best).take();
        Ok(PassOutcome::Finished { best })
    }
}

fn evaluate_guarded(
    evaluator: &dyn BacktestEvaluator,
    assignment: &Assignment,
    context: &EvaluationContext,
) -> Result<Metrics, EvaluationError> {
    panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(assignment, context)))
        .unwrap_or_else(|payload| Err(EvaluationError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameter;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    fn data_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "runner_{}_{}.csv",
            name,
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "datetime,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-01 00:00:00,1,1,1,1,1").unwrap();
        path
    }

    fn space() -> ParameterSpace {
        ParameterSpace::new(vec![
            Parameter::new("a", 1.0, 4.0, 1.0, 1.0),
            Parameter::new("b", 1.0, 3.0, 1.0, 1.0),
        ])
    }

    fn profit_of_sum(a: &Assignment) -> Result<Metrics, EvaluationError> {
        let sum: f64 = a.values().iter().sum();
        Ok(Metrics {
            net_profit: sum * 10.0,
            profit_factor: sum,
            trades: 10,
            ..Metrics::default()
        })
    }

    fn request(name: &str) -> RunRequest {
        RunRequest::new(HistoricalData::new(data_file(name)))
            .with_metric(PerformanceMetric::NetProfit)
            .with_min_trades(2)
    }

    fn runner(workers: usize) -> OptimizationRunner {
        OptimizationRunner::new(RunnerSettings::default().with_workers(workers))
    }

    #[test]
    fn test_completed_run_is_sorted() {
        let runner = runner(3);
        let outcome = runner
            .run(
                &space(),
                &request("sorted"),
                Arc::new(profit_of_sum),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(runner.state(), RunState::Completed);
        assert_eq!(outcome.evaluated, 12);
        assert_eq!(outcome.results.len(), 12);
        let profits: Vec<f64> = outcome.results.iter().map(|r| r.metrics.net_profit).collect();
        assert!(profits.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(outcome.best().unwrap().assignment.to_string(), "a=4, b=3");
    }

    #[test]
    fn test_missing_data_fails_validation() {
        let runner = runner(1);
        let request = RunRequest::new(HistoricalData::new("/nonexistent/ticks.csv"));
        let err = runner
            .run(&space(), &request, Arc::new(profit_of_sum), &CancellationToken::new())
            .unwrap_err();

        match err {
            OptimizerError::InvalidConfiguration(cfg) => assert_eq!(cfg.field(), "historical_data"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(runner.state(), RunState::Failed);
    }

    #[test]
    fn test_min_trades_below_two_rejected() {
        let runner = runner(1);
        let request = request("min_trades").with_min_trades(1);
        let err = runner
            .run(&space(), &request, Arc::new(profit_of_sum), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::InvalidConfiguration(ConfigError::MinTradesTooLow { value: 1 })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let runner = runner(0);
        let err = runner
            .run(&space(), &request("workers"), Arc::new(profit_of_sum), &CancellationToken::new())
            .unwrap_err();
        match err {
            OptimizerError::InvalidConfiguration(cfg) => assert_eq!(cfg.field(), "workers"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_evaluation_error_discards_results() {
        let runner = runner(2);
        let evaluator = |a: &Assignment| -> Result<Metrics, EvaluationError> {
            if a.get("a") == Some(3.0) && a.get("b") == Some(2.0) {
                Err(EvaluationError::Strategy("boom".to_string()))
            } else {
                profit_of_sum(a)
            }
        };
        let err = runner
            .run(&space(), &request("failure"), Arc::new(evaluator), &CancellationToken::new())
            .unwrap_err();

        match err {
            OptimizerError::Evaluation { assignment, source } => {
                assert_eq!(assignment.to_string(), "a=3, b=2");
                assert_eq!(source, EvaluationError::Strategy("boom".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(runner.state(), RunState::Failed);
    }

    #[test]
    fn test_panicking_evaluator_is_reported() {
        let runner = runner(2);
        let evaluator = |a: &Assignment| -> Result<Metrics, EvaluationError> {
            if a.get("b") == Some(3.0) {
                panic!("indicator overflow");
            }
            profit_of_sum(a)
        };
        let err = runner
            .run(&space(), &request("panic"), Arc::new(evaluator), &CancellationToken::new())
            .unwrap_err();

        match err {
            OptimizerError::Evaluation {
                source: EvaluationError::Panicked(message),
                ..
            } => assert!(message.contains("indicator overflow")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_evaluation_timeout() {
        let runner = OptimizationRunner::new(
            RunnerSettings::default()
                .with_workers(1)
                .with_evaluation_timeout(Duration::from_millis(50)),
        );
        let evaluator = |a: &Assignment| -> Result<Metrics, EvaluationError> {
            if a.get("a") == Some(2.0) {
                thread::sleep(Duration::from_millis(500));
            }
            profit_of_sum(a)
        };
        let err = runner
            .run(&space(), &request("timeout"), Arc::new(evaluator), &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(
            err,
            OptimizerError::Evaluation {
                source: EvaluationError::Timeout(_),
                ..
            }
        ));
    }

    #[test]
    fn test_cancellation_returns_partial_results() {
        let runner = runner(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let evaluator = move |a: &Assignment| -> Result<Metrics, EvaluationError> {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 4 {
                trigger.cancel();
            }
            profit_of_sum(a)
        };

        let outcome = runner
            .run(&space(), &request("cancel"), Arc::new(evaluator), &cancel)
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(outcome.is_partial());
        assert_eq!(outcome.evaluated, 4);
        assert_eq!(outcome.results.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(runner.state(), RunState::Cancelled);
    }

    #[test]
    fn test_cancel_during_last_evaluation_still_completes() {
        let runner = runner(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let single = ParameterSpace::new(vec![Parameter::new("a", 1.0, 3.0, 1.0, 1.0)]);
        let evaluator = move |a: &Assignment| -> Result<Metrics, EvaluationError> {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                trigger.cancel();
            }
            profit_of_sum(a)
        };

        let outcome = runner
            .run(&single, &request("cancel_last"), Arc::new(evaluator), &cancel)
            .unwrap();

        assert_eq!(outcome.evaluated, 3);
        assert_eq!(outcome.planned, 3);
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(!outcome.is_partial());
        assert_eq!(runner.state(), RunState::Completed);
    }

    #[test]
    fn test_second_run_rejected_while_running() {
        let runner = Arc::new(runner(1));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let evaluator = move |a: &Assignment| -> Result<Metrics, EvaluationError> {
            let _ = lock(&release_rx).recv_timeout(Duration::from_secs(5));
            profit_of_sum(a)
        };

        let background = {
            let runner = Arc::clone(&runner);
            let request = request("busy");
            thread::spawn(move || {
                runner.run(&space(), &request, Arc::new(evaluator), &CancellationToken::new())
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.state() != RunState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runner.state(), RunState::Running);

        let err = runner
            .run(&space(), &request("busy2"), Arc::new(profit_of_sum), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, OptimizerError::AlreadyRunning));
        assert_eq!(runner.state(), RunState::Running);

        drop(release_tx);
        let outcome = background.join().unwrap().unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let rerun = runner
            .run(&space(), &request("busy3"), Arc::new(profit_of_sum), &CancellationToken::new())
            .unwrap();
        assert_eq!(rerun.status, RunStatus::Completed);
    }

    #[test]
    fn test_progress_reaches_total() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&updates);
        let sink = move |u: &ProgressUpdate| lock(&seen).push(u.clone());
        let runner = runner(2).with_progress(Arc::new(sink));

        runner
            .run(&space(), &request("progress"), Arc::new(profit_of_sum), &CancellationToken::new())
            .unwrap();

        let updates = lock(&updates);
        let last = updates.last().unwrap();
        assert_eq!(last.completed, 12);
        assert_eq!(last.percent(), 100.0);
        assert!(updates.windows(2).all(|w| w[0].completed <= w[1].completed));
    }

    #[test]
    fn test_divide_and_conquer_through_runner() {
        let runner = runner(4);
        let space = ParameterSpace::new(vec![
            Parameter::new("a", 0.0, 60.0, 1.0, 0.0),
            Parameter::new("b", 0.0, 30.0, 1.0, 0.0),
        ]);
        let evaluator = |a: &Assignment| -> Result<Metrics, EvaluationError> {
            let x = a.get("a").unwrap_or_default();
            let y = a.get("b").unwrap_or_default();
            Ok(Metrics {
                net_profit: 500.0 - (x - 21.0).powi(2) - (y - 9.0).powi(2),
                trades: 5,
                ..Metrics::default()
            })
        };
        let request = request("dnc").with_method(SearchMethod::DivideAndConquer);
        let outcome = runner
            .run(&space, &request, Arc::new(evaluator), &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.evaluated < 61 * 31);
        assert!(outcome.evaluated <= outcome.planned);
        let best = outcome.best().unwrap();
        assert_eq!(best.assignment.get("a"), Some(21.0));
        assert_eq!(best.assignment.get("b"), Some(9.0));
    }
}
