//! Ordered, fail-fast stage execution.
//!
//! [`StageSequence`] runs one stage at a time, records how long each took and
//! emits a structured event per transition. Callers chain stages with `?`,
//! so the first failure ends the sequence and later stages never start.

use std::future::Future;

use crate::clock::{elapsed_ms, Clock};
use crate::obs;
use crate::outcome::ErrorCode;

/// A named stage in some sequence.
pub trait StageLabel: Copy + PartialEq {
    /// Stable label used in logs and in stage-tagged failures.
    fn label(&self) -> &'static str;
}

/// Timing of one completed (passed or failed) stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming<S> {
    pub stage: S,
    pub elapsed_ms: u64,
    pub passed: bool,
}

/// Sequential stage runner bound to one clock.
pub struct StageSequence<'c, S> {
    clock: &'c dyn Clock,
    started_at: i64,
    timings: Vec<StageTiming<S>>,
}

impl<'c, S: StageLabel> StageSequence<'c, S> {
    pub fn new(clock: &'c dyn Clock) -> Self {
        Self {
            started_at: clock.now_ms(),
            clock,
            timings: Vec::new(),
        }
    }

    /// Run one stage to completion and record its outcome.
    pub async fn step<T, E, F>(&mut self, stage: S, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: ErrorCode,
    {
        obs::emit_stage_started(stage.label());
        let t0 = self.clock.now_ms();
        let result = work.await;
        let elapsed = elapsed_ms(t0, self.clock.now_ms());

        match &result {
            Ok(_) => obs::emit_stage_passed(stage.label(), elapsed),
            Err(e) => obs::emit_stage_failed(stage.label(), e.code(), elapsed),
        }

        self.timings.push(StageTiming {
            stage,
            elapsed_ms: elapsed,
            passed: result.is_ok(),
        });
        result
    }

    /// Elapsed time of `stage`, or zero if it never ran.
    pub fn elapsed_ms(&self, stage: S) -> u64 {
        self.timings
            .iter()
            .find(|t| t.stage == stage)
            .map(|t| t.elapsed_ms)
            .unwrap_or(0)
    }

    /// Time since the sequence was created.
    pub fn total_ms(&self) -> u64 {
        elapsed_ms(self.started_at, self.clock.now_ms())
    }

    /// Stages in the order they ran.
    pub fn timings(&self) -> &[StageTiming<S>] {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::SteppingClock;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Demo {
        First,
        Second,
        Third,
    }

    impl StageLabel for Demo {
        fn label(&self) -> &'static str {
            match self {
                Demo::First => "first",
                Demo::Second => "second",
                Demo::Third => "third",
            }
        }
    }

    #[derive(Debug, PartialEq)]
    struct Broken;

    impl ErrorCode for Broken {
        fn code(&self) -> &'static str {
            "BROKEN"
        }
    }

    async fn run_demo(seq: &mut StageSequence<'_, Demo>) -> Result<u32, Broken> {
        let a = seq.step(Demo::First, async { Ok::<_, Broken>(1) }).await?;
        let b = seq.step(Demo::Second, async { Err::<u32, _>(Broken) }).await?;
        seq.step(Demo::Third, async { Ok(a + b) }).await
    }

    #[tokio::test]
    async fn test_first_failure_stops_sequence() {
        let clock = SteppingClock::new(1_000, 5);
        let mut seq = StageSequence::new(&clock);

        let result = run_demo(&mut seq).await;

        assert_eq!(result, Err(Broken));
        let ran: Vec<Demo> = seq.timings().iter().map(|t| t.stage).collect();
        assert_eq!(ran, vec![Demo::First, Demo::Second]);
        assert!(seq.timings()[0].passed);
        assert!(!seq.timings()[1].passed);
        assert_eq!(seq.elapsed_ms(Demo::Third), 0);
    }

    #[tokio::test]
    async fn test_elapsed_uses_clock() {
        let clock = SteppingClock::new(0, 10);
        let mut seq = StageSequence::new(&clock);

        seq.step(Demo::First, async { Ok::<_, Broken>(()) })
            .await
            .unwrap();

        assert_eq!(seq.elapsed_ms(Demo::First), 10);
        assert!(seq.total_ms() >= 10);
    }
}
