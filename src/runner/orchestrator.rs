use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::graph::resolve::Resolver;
use crate::plan::types::ExecutionPlan;
use crate::registry::UnitRegistry;
use crate::runner::aggregate::Aggregator;
use crate::runner::breaker::CircuitBreaker;
use crate::runner::context::{Fixtures, UnitContext};
use crate::runner::outcome::{OutcomeKind, RunOutcome, RunPhase, StopReason};
use crate::runner::result::UnitOutcome;
use crate::runner::setup::{
    CleanupAction, CleanupStack, CleanupWarning, SetupEnv, SetupStage, SetupStep,
};
use crate::runner::surface::{DetachedSurface, ExecutionSurface};

/// Run policy for the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub breaker: CircuitBreaker,
    /// Stop after the first unit that records a failure.
    pub stop_on_first_failure: bool,
    /// Abort the run when a unit flagged `critical` fails.
    pub critical_mode: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreaker::default(),
            stop_on_first_failure: false,
            critical_mode: true,
        }
    }
}

/// Why the unit loop ended early.
struct Halt {
    kind: OutcomeKind,
    reason: StopReason,
    explanation: String,
}

/// Executes an [`ExecutionPlan`] against a registry: critical setup steps
/// first, then every planned unit in order on one shared surface, then
/// cleanup.
pub struct Orchestrator {
    config: OrchestratorConfig,
    setup: Vec<Box<dyn SetupStep>>,
    cleanup: CleanupStack,
    surface: Box<dyn ExecutionSurface>,
    fixtures: Fixtures,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            setup: Vec::new(),
            cleanup: CleanupStack::new(),
            surface: Box::new(DetachedSurface),
            fixtures: Fixtures::new(),
        }
    }

    /// Add a critical setup step. Steps run grouped by stage, in the order
    /// they were added within a stage.
    pub fn with_setup_step(mut self, step: Box<dyn SetupStep>) -> Self {
        self.setup.push(step);
        self
    }

    /// Register a cleanup action that runs after every run.
    pub fn with_cleanup(mut self, name: impl Into<String>, action: CleanupAction) -> Self {
        self.cleanup.push(name, action);
        self
    }

    pub fn with_surface(mut self, surface: Box<dyn ExecutionSurface>) -> Self {
        self.surface = surface;
        self
    }

    /// Seed fixtures that units can read, e.g. the base URL.
    pub fn with_fixtures(mut self, fixtures: Fixtures) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Run the plan to completion or to the first stop condition.
    ///
    /// Never fails: every stop condition, including critical setup failures,
    /// is reported in the returned [`RunOutcome`]. Cleanup runs exactly once
    /// on every path. The orchestrator is consumed: its cleanup actions and
    /// setup fixtures belong to this one run.
    pub fn run(mut self, registry: &UnitRegistry, plan: &ExecutionPlan) -> RunOutcome {
        let start = Instant::now();
        let mut phases = vec![RunPhase::Init];
        let mut aggregator = Aggregator::new();
        let mut units_run = Vec::new();
        let mut warnings = Vec::new();

        info!(suite = %plan.plan.suite, units = plan.len(), "starting run");

        let halt = self.run_setup(registry, plan, &mut phases).or_else(|| {
            self.run_units(
                registry,
                plan,
                &mut phases,
                &mut aggregator,
                &mut units_run,
                &mut warnings,
            )
        });

        let counters = aggregator.counters();
        let (kind, stop_reason, explanation) = match halt {
            Some(halt) => (halt.kind, halt.reason, Some(halt.explanation)),
            None => {
                phases.push(RunPhase::Summary);
                let kind = if counters.failed == 0 {
                    OutcomeKind::AllPassed
                } else {
                    OutcomeKind::PartialFailure
                };
                (kind, StopReason::Completed, None)
            }
        };

        phases.push(RunPhase::Cleanup);
        warnings.extend(self.cleanup.run_all());
        phases.push(RunPhase::Exit {
            success: kind == OutcomeKind::AllPassed,
            critical: kind == OutcomeKind::CriticalAbort,
        });

        info!(
            outcome = %kind,
            reason = %stop_reason,
            total = counters.total,
            passed = counters.passed,
            failed = counters.failed,
            "run finished"
        );

        RunOutcome {
            kind,
            stop_reason,
            counters,
            checks: aggregator.into_checks(),
            phases,
            units_run,
            cleanup_warnings: warnings,
            explanation,
            duration: start.elapsed(),
        }
    }

    fn run_setup(
        &mut self,
        registry: &UnitRegistry,
        plan: &ExecutionPlan,
        phases: &mut Vec<RunPhase>,
    ) -> Option<Halt> {
        let selected: BTreeSet<String> = plan.units().map(str::to_owned).collect();
        let requirements = match Resolver::new(registry).initialization_requirements(&selected) {
            Ok(req) => req,
            Err(e) => {
                return Some(Halt {
                    kind: OutcomeKind::CriticalAbort,
                    reason: StopReason::CriticalSetup,
                    explanation: format!("cannot determine fixture requirements: {e}"),
                });
            }
        };

        for stage in [
            SetupStage::Build,
            SetupStage::Start,
            SetupStage::HealthCheck,
            SetupStage::FixtureSetup,
        ] {
            phases.push(match stage {
                SetupStage::Build => RunPhase::Build,
                SetupStage::Start => RunPhase::Start,
                SetupStage::HealthCheck => RunPhase::HealthCheck,
                SetupStage::FixtureSetup => RunPhase::FixtureSetup,
            });

            for step in self.setup.iter().filter(|s| s.stage() == stage) {
                if let Some(requirement) = step.provides()
                    && !requirements.includes(requirement)
                {
                    info!(step = %step.name(), %requirement, "fixture not required, skipping");
                    continue;
                }

                info!(stage = %stage, step = %step.name(), "running setup step");
                let mut env = SetupEnv {
                    fixtures: &mut self.fixtures,
                    cleanup: &mut self.cleanup,
                };
                if let Err(e) = step.run(&mut env) {
                    error!(stage = %stage, step = %step.name(), error = %e, "critical setup failed");
                    let mut explanation = e.to_string();
                    if let Some(detail) = &e.detail {
                        explanation.push_str(&format!("\n{detail}"));
                    }
                    explanation.push_str(&format!(
                        "\nno unit can run without a successful {stage} step; aborting"
                    ));
                    return Some(Halt {
                        kind: OutcomeKind::CriticalAbort,
                        reason: StopReason::CriticalSetup,
                        explanation,
                    });
                }
            }
        }
        None
    }

    fn run_units(
        &mut self,
        registry: &UnitRegistry,
        plan: &ExecutionPlan,
        phases: &mut Vec<RunPhase>,
        aggregator: &mut Aggregator,
        units_run: &mut Vec<String>,
        warnings: &mut Vec<CleanupWarning>,
    ) -> Option<Halt> {
        let total = plan.len();

        for step in &plan.steps {
            let id = step.unit.as_str();
            phases.push(RunPhase::Unit(id.to_owned()));
            info!(unit = %id, order = step.order, total, "running unit");

            let Some(unit) = registry.get(id) else {
                aggregator.record_unit_failure(id, &step.name, Duration::ZERO, "unit not registered");
                units_run.push(id.to_owned());
                continue;
            };

            let unit_start = Instant::now();
            let mut ctx = UnitContext::new(id, &mut self.fixtures, self.surface.as_mut());
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.run(&mut ctx)))
                .unwrap_or_else(|payload| {
                    UnitOutcome::Failed(format!(
                        "unit {id} panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                });
            let checks = ctx.into_checks();
            let elapsed = unit_start.elapsed();

            let failed_checks = checks.iter().filter(|c| c.is_failed()).count();
            let passed_checks = checks.len() - failed_checks;
            aggregator.merge(checks);
            if let UnitOutcome::Failed(reason) = &outcome {
                warn!(unit = %id, reason = %reason, "unit failed");
                aggregator.record_unit_failure(id, unit.name(), elapsed, reason);
            }
            units_run.push(id.to_owned());
            let unit_failed = failed_checks > 0 || outcome.is_failed();

            info!(
                unit = %id,
                passed = passed_checks,
                failed = failed_checks,
                elapsed_ms = elapsed.as_millis() as u64,
                "unit finished"
            );

            if let Err(e) = self.surface.reset() {
                warn!(surface = %self.surface.name(), error = %e, "surface reset failed");
                warnings.push(CleanupWarning {
                    action: format!("reset {}", self.surface.name()),
                    message: e.0,
                });
            }

            let counters = aggregator.counters();
            let remaining = total - units_run.len();

            if unit_failed && self.config.critical_mode && unit.spec().critical {
                error!(unit = %id, "critical unit failed, aborting run");
                let diagnostic = unit.spec().diagnostic.clone().unwrap_or_else(|| {
                    format!("units depending on \"{id}\" cannot produce meaningful results")
                });
                return Some(Halt {
                    kind: OutcomeKind::CriticalAbort,
                    reason: StopReason::CriticalUnit,
                    explanation: format!(
                        "critical unit \"{id}\" failed after {} checks ({} failed); {remaining} units not run\n{diagnostic}",
                        counters.total, counters.failed
                    ),
                });
            }

            if unit_failed && self.config.stop_on_first_failure {
                warn!(unit = %id, "stopping on first failure");
                return Some(Halt {
                    kind: OutcomeKind::PartialFailure,
                    reason: StopReason::StoppedOnFailure,
                    explanation: format!(
                        "stopped after \"{id}\" failed: {} checks ({} failed); {remaining} units not run",
                        counters.total, counters.failed
                    ),
                });
            }

            if self.config.breaker.should_trip(&counters) {
                warn!(
                    failed = counters.failed,
                    total = counters.total,
                    threshold = self.config.breaker.max_failure_rate_percent,
                    "failure rate exceeded, exiting early"
                );
                return Some(Halt {
                    kind: OutcomeKind::PartialFailure,
                    reason: StopReason::FailureRateExceeded,
                    explanation: format!(
                        "failure rate {:.1}% exceeded {:.1}% ({} of {} checks failed); {remaining} units not run",
                        counters.failure_rate(),
                        self.config.breaker.max_failure_rate_percent,
                        counters.failed,
                        counters.total
                    ),
                });
            }
        }
        None
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::registry::testing::{FakeUnit, Script};
    use crate::registry::unit::{Requirement, TestUnit, UnitSpec};
    use crate::runner::setup::SetupError;
    use crate::runner::surface::SurfaceError;

    // -- Scripted units --

    type Calls = Rc<RefCell<Vec<String>>>;

    fn fake(spec: UnitSpec, script: Script, calls: &Calls) -> Box<FakeUnit> {
        Box::new(FakeUnit {
            spec,
            script,
            calls: Rc::clone(calls),
        })
    }

    fn ok(passed: usize) -> Script {
        Script::Checks { passed, failed: 0 }
    }

    fn bad(passed: usize, failed: usize) -> Script {
        Script::Checks { passed, failed }
    }

    fn plan_all(reg: &UnitRegistry) -> ExecutionPlan {
        let all: BTreeSet<String> = reg.ids().into_iter().map(str::to_owned).collect();
        Resolver::new(reg).resolve(&all).unwrap()
    }

    // -- Mock setup steps --

    struct FakeStep {
        stage: SetupStage,
        name: &'static str,
        provides: Option<Requirement>,
        fail: bool,
        log: Calls,
    }

    impl FakeStep {
        fn boxed(stage: SetupStage, name: &'static str, log: &Calls) -> Box<Self> {
            Box::new(Self {
                stage,
                name,
                provides: None,
                fail: false,
                log: Rc::clone(log),
            })
        }
    }

    impl SetupStep for FakeStep {
        fn stage(&self) -> SetupStage {
            self.stage
        }

        fn name(&self) -> &str {
            self.name
        }

        fn provides(&self) -> Option<Requirement> {
            self.provides
        }

        fn run(&self, env: &mut SetupEnv<'_>) -> Result<(), SetupError> {
            self.log.borrow_mut().push(self.name.to_owned());
            if self.fail {
                return Err(SetupError::new(self.stage, self.name, "exited with code 1")
                    .with_detail("port 8080 already in use"));
            }
            env.fixtures.insert(self.name, "ready");
            let log = Rc::clone(&self.log);
            let name = self.name;
            env.cleanup.push(
                format!("undo {name}"),
                Box::new(move || {
                    log.borrow_mut().push(format!("undo {name}"));
                    Ok(())
                }),
            );
            Ok(())
        }
    }

    // -- Mock surface --

    struct CountingSurface {
        resets: Rc<Cell<usize>>,
        fail: bool,
    }

    impl ExecutionSurface for CountingSurface {
        fn name(&self) -> &str {
            "browser"
        }

        fn reset(&mut self) -> Result<(), SurfaceError> {
            self.resets.set(self.resets.get() + 1);
            if self.fail {
                Err(SurfaceError("page crashed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn counting_cleanup(orch: Orchestrator, count: &Rc<Cell<usize>>) -> Orchestrator {
        let count = Rc::clone(count);
        orch.with_cleanup(
            "count",
            Box::new(move || {
                count.set(count.get() + 1);
                Ok(())
            }),
        )
    }

    fn stop_on_first() -> OrchestratorConfig {
        OrchestratorConfig {
            stop_on_first_failure: true,
            ..OrchestratorConfig::default()
        }
    }

    #[test]
    fn all_passing_run_visits_every_phase() {
        let reg = crate::registry::testing::content_registry();
        let plan = plan_all(&reg);
        let outcome = Orchestrator::default().run(&reg, &plan);

        assert_eq!(outcome.kind, OutcomeKind::AllPassed);
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert!(outcome.success());
        assert_eq!(outcome.counters.total, 4);
        assert_eq!(outcome.counters.passed, 4);
        assert_eq!(
            outcome.phases,
            vec![
                RunPhase::Init,
                RunPhase::Build,
                RunPhase::Start,
                RunPhase::HealthCheck,
                RunPhase::FixtureSetup,
                RunPhase::Unit("auth".into()),
                RunPhase::Unit("projects".into()),
                RunPhase::Unit("collections".into()),
                RunPhase::Unit("documents".into()),
                RunPhase::Summary,
                RunPhase::Cleanup,
                RunPhase::Exit {
                    success: true,
                    critical: false
                },
            ]
        );
        assert!(outcome.explanation.is_none());
    }

    #[test]
    fn units_run_in_plan_order() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("projects").depends_on(["auth"]), ok(1), &calls))
            .unwrap();
        reg.register(fake(UnitSpec::new("auth"), ok(1), &calls)).unwrap();

        let plan = plan_all(&reg);
        let outcome = Orchestrator::default().run(&reg, &plan);
        assert_eq!(*calls.borrow(), vec!["auth", "projects"]);
        assert_eq!(outcome.units_run, vec!["auth", "projects"]);
    }

    #[test]
    fn failed_checks_give_partial_failure() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("auth"), ok(5), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("projects"), bad(4, 1), &calls))
            .unwrap();

        let outcome = Orchestrator::default().run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::PartialFailure);
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(outcome.counters.total, 10);
        assert_eq!(outcome.counters.failed, 1);
        assert_eq!(outcome.failures().len(), 1);
        assert!(outcome.phases.contains(&RunPhase::Summary));
        assert_eq!(
            outcome.phases.last(),
            Some(&RunPhase::Exit {
                success: false,
                critical: false
            })
        );
    }

    #[test]
    fn breaker_trips_and_skips_remaining_units() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("a"), bad(0, 2), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("b"), bad(1, 1), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("c"), ok(3), &calls)).unwrap();

        let outcome = Orchestrator::default().run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::PartialFailure);
        assert_eq!(outcome.stop_reason, StopReason::FailureRateExceeded);
        assert_eq!(outcome.counters.total, 4);
        assert_eq!(outcome.counters.failed, 3);
        assert_eq!(*calls.borrow(), vec!["a", "b"]);
        assert!(!outcome.phases.contains(&RunPhase::Summary));
        let explanation = outcome.explanation.unwrap();
        assert!(explanation.contains("75.0%"));
        assert!(explanation.contains("1 units not run"));
    }

    #[test]
    fn breaker_waits_for_minimum_sample() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("a"), bad(0, 2), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("b"), ok(6), &calls)).unwrap();

        let outcome = Orchestrator::default().run(&reg, &plan_all(&reg));
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(*calls.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn stop_on_first_failure_stops_after_failing_unit() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("a"), ok(10), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("b"), bad(9, 1), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("c"), ok(1), &calls)).unwrap();

        let outcome = Orchestrator::new(stop_on_first()).run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::PartialFailure);
        assert_eq!(outcome.stop_reason, StopReason::StoppedOnFailure);
        assert_eq!(outcome.units_run, vec!["a", "b"]);
    }

    #[test]
    fn failed_unit_adds_one_check_named_after_it() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(
            UnitSpec::new("projects").named("Project CRUD"),
            Script::Throw("no project fixture".into()),
            &calls,
        ))
        .unwrap();
        reg.register(fake(UnitSpec::new("health"), ok(5), &calls)).unwrap();

        let outcome = Orchestrator::default().run(&reg, &plan_all(&reg));
        assert_eq!(outcome.counters.total, 6);
        assert_eq!(outcome.counters.failed, 1);
        let failure = outcome.failures()[0];
        assert_eq!(failure.unit, "projects");
        assert_eq!(failure.name, "Project CRUD");
        assert_eq!(failure.error.as_deref(), Some("no project fixture"));
        assert_eq!(outcome.units_run, vec!["projects", "health"]);
    }

    #[test]
    fn panicking_unit_is_a_failed_unit() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("flaky"), Script::Panic, &calls))
            .unwrap();
        reg.register(fake(UnitSpec::new("after"), ok(3), &calls)).unwrap();

        let outcome = Orchestrator::default().run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::PartialFailure);
        let failure = outcome.failures()[0];
        assert!(
            failure
                .error
                .as_deref()
                .unwrap()
                .contains("unit flaky panicked: unit flaky blew up")
        );
        assert_eq!(*calls.borrow(), vec!["flaky", "after"]);
    }

    #[test]
    fn critical_unit_failure_aborts() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(
            UnitSpec::new("auth").critical(Some("check the identity provider".into())),
            bad(0, 1),
            &calls,
        ))
        .unwrap();
        reg.register(fake(UnitSpec::new("projects").depends_on(["auth"]), ok(1), &calls))
            .unwrap();

        let outcome = Orchestrator::default().run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::CriticalAbort);
        assert_eq!(outcome.stop_reason, StopReason::CriticalUnit);
        assert_eq!(*calls.borrow(), vec!["auth"]);
        let explanation = outcome.explanation.unwrap();
        assert!(explanation.contains("critical unit \"auth\" failed"));
        assert!(explanation.contains("check the identity provider"));
        assert_eq!(
            outcome.phases.last(),
            Some(&RunPhase::Exit {
                success: false,
                critical: true
            })
        );
    }

    #[test]
    fn critical_mode_off_treats_critical_units_normally() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("auth").critical(None), bad(5, 1), &calls))
            .unwrap();
        reg.register(fake(UnitSpec::new("projects"), ok(5), &calls)).unwrap();

        let config = OrchestratorConfig {
            critical_mode: false,
            ..OrchestratorConfig::default()
        };
        let outcome = Orchestrator::new(config).run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::PartialFailure);
        assert_eq!(outcome.stop_reason, StopReason::Completed);
    }

    #[test]
    fn critical_setup_failure_aborts_before_units() {
        let calls: Calls = Rc::default();
        let log: Calls = Rc::default();
        let reg = crate::registry::testing::content_registry();

        let mut failing = FakeStep::boxed(SetupStage::Start, "server", &log);
        failing.fail = true;
        let orch = Orchestrator::default()
            .with_setup_step(FakeStep::boxed(SetupStage::Build, "build", &log))
            .with_setup_step(failing)
            .with_setup_step(FakeStep::boxed(SetupStage::HealthCheck, "health", &log));

        let outcome = orch.run(&reg, &plan_all(&reg));
        assert_eq!(outcome.kind, OutcomeKind::CriticalAbort);
        assert_eq!(outcome.stop_reason, StopReason::CriticalSetup);
        assert!(outcome.units_run.is_empty());
        assert!(calls.borrow().is_empty());
        assert_eq!(*log.borrow(), vec!["build", "server", "undo build"]);
        assert_eq!(
            outcome.phases,
            vec![
                RunPhase::Init,
                RunPhase::Build,
                RunPhase::Start,
                RunPhase::Cleanup,
                RunPhase::Exit {
                    success: false,
                    critical: true
                },
            ]
        );
        let explanation = outcome.explanation.unwrap();
        assert!(explanation.contains("start step \"server\" failed"));
        assert!(explanation.contains("port 8080 already in use"));
    }

    #[test]
    fn fixture_steps_run_only_when_required() {
        let log: Calls = Rc::default();
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("auth"), ok(1), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("health"), ok(1), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("projects").depends_on(["auth"]), ok(1), &calls))
            .unwrap();

        let build = |log: &Calls| {
            let mut session = FakeStep::boxed(SetupStage::FixtureSetup, "session", log);
            session.provides = Some(Requirement::Session);
            let mut project = FakeStep::boxed(SetupStage::FixtureSetup, "project", log);
            project.provides = Some(Requirement::Project);
            Orchestrator::default()
                .with_setup_step(session)
                .with_setup_step(project)
        };

        let health_only = Resolver::new(&reg)
            .resolve(&BTreeSet::from(["health".to_owned()]))
            .unwrap();
        build(&log).run(&reg, &health_only);
        assert!(log.borrow().is_empty());

        let with_projects = Resolver::new(&reg)
            .resolve(&BTreeSet::from(["projects".to_owned()]))
            .unwrap();
        build(&log).run(&reg, &with_projects);
        assert_eq!(*log.borrow(), vec!["session", "undo session"]);
    }

    #[test]
    fn setup_fixtures_reach_units() {
        struct NeedsToken;
        static SPEC: std::sync::LazyLock<UnitSpec> =
            std::sync::LazyLock::new(|| UnitSpec::new("reader"));
        impl TestUnit for NeedsToken {
            fn spec(&self) -> &UnitSpec {
                &SPEC
            }
            fn run(&self, ctx: &mut UnitContext<'_>) -> UnitOutcome {
                match ctx.fixtures.get("build") {
                    Some("ready") => {
                        ctx.pass("token present", Duration::ZERO);
                        UnitOutcome::Passed
                    }
                    _ => UnitOutcome::failed("no token"),
                }
            }
        }

        let log: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(Box::new(NeedsToken)).unwrap();
        let orch =
            Orchestrator::default().with_setup_step(FakeStep::boxed(SetupStage::Build, "build", &log));
        let outcome = orch.run(&reg, &plan_all(&reg));
        assert!(outcome.success());
    }

    #[test]
    fn cleanup_runs_exactly_once_on_every_path() {
        let calls: Calls = Rc::default();

        // completed
        let count = Rc::new(Cell::new(0));
        let reg = crate::registry::testing::content_registry();
        counting_cleanup(Orchestrator::default(), &count).run(&reg, &plan_all(&reg));
        assert_eq!(count.get(), 1);

        // breaker
        let count = Rc::new(Cell::new(0));
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("a"), bad(0, 3), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("b"), ok(1), &calls)).unwrap();
        let o = counting_cleanup(Orchestrator::default(), &count).run(&reg, &plan_all(&reg));
        assert_eq!(o.stop_reason, StopReason::FailureRateExceeded);
        assert_eq!(count.get(), 1);

        // stop on first failure
        let count = Rc::new(Cell::new(0));
        let o = counting_cleanup(Orchestrator::new(stop_on_first()), &count)
            .run(&reg, &plan_all(&reg));
        assert_eq!(o.stop_reason, StopReason::StoppedOnFailure);
        assert_eq!(count.get(), 1);

        // critical unit
        let count = Rc::new(Cell::new(0));
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("auth").critical(None), Script::Throw("401".into()), &calls))
            .unwrap();
        let o = counting_cleanup(Orchestrator::default(), &count).run(&reg, &plan_all(&reg));
        assert_eq!(o.stop_reason, StopReason::CriticalUnit);
        assert_eq!(count.get(), 1);

        // critical setup
        let count = Rc::new(Cell::new(0));
        let log: Calls = Rc::default();
        let mut failing = FakeStep::boxed(SetupStage::Build, "build", &log);
        failing.fail = true;
        let o = counting_cleanup(Orchestrator::default().with_setup_step(failing), &count)
            .run(&reg, &plan_all(&reg));
        assert_eq!(o.stop_reason, StopReason::CriticalSetup);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn each_run_sets_up_and_cleans_up_its_own_fixtures() {
        let log: Calls = Rc::default();
        let reg = crate::registry::testing::content_registry();
        let build = |log: &Calls| {
            Orchestrator::default()
                .with_setup_step(FakeStep::boxed(SetupStage::Start, "server", log))
        };

        let first = build(&log).run(&reg, &plan_all(&reg));
        let second = build(&log).run(&reg, &plan_all(&reg));
        assert!(first.success() && second.success());
        assert_eq!(
            *log.borrow(),
            vec!["server", "undo server", "server", "undo server"]
        );
    }

    #[test]
    fn cleanup_warnings_do_not_change_outcome() {
        let reg = crate::registry::testing::content_registry();
        let orch = Orchestrator::default()
            .with_cleanup("remove temp dir", Box::new(|| Err("permission denied".into())));
        let outcome = orch.run(&reg, &plan_all(&reg));
        assert!(outcome.success());
        assert_eq!(outcome.cleanup_warnings.len(), 1);
        assert_eq!(outcome.cleanup_warnings[0].action, "remove temp dir");
    }

    #[test]
    fn surface_resets_after_every_unit() {
        let calls: Calls = Rc::default();
        let mut reg = UnitRegistry::new("suite");
        reg.register(fake(UnitSpec::new("a"), ok(1), &calls)).unwrap();
        reg.register(fake(UnitSpec::new("b"), Script::Panic, &calls)).unwrap();
        reg.register(fake(UnitSpec::new("c"), ok(4), &calls)).unwrap();

        let resets = Rc::new(Cell::new(0));
        let orch = Orchestrator::default().with_surface(Box::new(CountingSurface {
            resets: Rc::clone(&resets),
            fail: false,
        }));
        orch.run(&reg, &plan_all(&reg));
        assert_eq!(resets.get(), 3);
    }

    #[test]
    fn surface_reset_failure_is_a_warning() {
        let reg = crate::registry::testing::content_registry();
        let resets = Rc::new(Cell::new(0));
        let orch = Orchestrator::default().with_surface(Box::new(CountingSurface {
            resets: Rc::clone(&resets),
            fail: true,
        }));
        let outcome = orch.run(&reg, &plan_all(&reg));
        assert!(outcome.success());
        assert_eq!(outcome.cleanup_warnings.len(), 4);
        assert_eq!(outcome.cleanup_warnings[0].action, "reset browser");
    }

    #[test]
    fn empty_plan_passes_trivially() {
        let reg = crate::registry::testing::content_registry();
        let plan = Resolver::new(&reg).resolve(&BTreeSet::new()).unwrap();
        let outcome = Orchestrator::default().run(&reg, &plan);
        assert_eq!(outcome.kind, OutcomeKind::AllPassed);
        assert_eq!(outcome.counters.total, 0);
    }
}
