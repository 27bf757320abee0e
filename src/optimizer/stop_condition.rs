use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Why an optimization run ended. Exactly one is reported per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopCondition
{
    MaximumNumberOfIterations,
    FunctionalError,
    UpdateParametersError,
    StepTooSmall,
    ConvergenceCheckerPassed,
    StoppedExternally,
    OtherError,
}

impl StopCondition
{
    /// True for the conditions caused by a failure rather than a normal termination.
    pub fn is_failure(&self) -> bool
    {
        matches!(self, StopCondition::FunctionalError | StopCondition::UpdateParametersError | StopCondition::OtherError)
    }
}

impl std::fmt::Display for StopCondition
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self
        {
            StopCondition::MaximumNumberOfIterations => "maximum number of iterations",
            StopCondition::FunctionalError => "functional error",
            StopCondition::UpdateParametersError => "update parameters error",
            StopCondition::StepTooSmall => "step too small",
            StopCondition::ConvergenceCheckerPassed => "convergence checker passed",
            StopCondition::StoppedExternally => "stopped externally",
            StopCondition::OtherError => "other error",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerState
{
    Initialized,
    Running,
    Terminated(StopCondition),
}

///
/// Cooperative stop flag shared between an optimizer and its callers. The flag is
/// observed once per iteration and cleared when the optimizer is started.
///
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn stop(&self)
    {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool
    {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self)
    {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[test]
fn check_stop_handle_is_shared()
{
    let handle = StopHandle::new();
    let other = handle.clone();
    assert!(!handle.is_stop_requested());
    std::thread::spawn(move || other.stop()).join().unwrap();
    assert!(handle.is_stop_requested());
    handle.reset();
    assert!(!handle.is_stop_requested());
    assert!(StopCondition::FunctionalError.is_failure());
    assert!(!StopCondition::ConvergenceCheckerPassed.is_failure());
}
