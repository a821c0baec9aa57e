use log::{info, warn};

use crate::reading::{GroupValue, SensorReading};
use crate::sensor::SensorSource;
use crate::time::Delay;

pub type SensorSourcePointer = Box<dyn SensorSource>;

/// Polls every enabled sensor once per cycle and merges the groups into a
/// single [`SensorReading`].
///
/// A failing source never aborts the cycle: its group is replaced with the
/// error marker and the remaining sources are still read. There are no
/// retries within a cycle. A source whose setup failed is set up again at
/// the start of the next cycle.
pub struct SamplingOrchestrator {
    sources: Vec<SensorSourcePointer>,
    started: Vec<bool>,
}

impl SamplingOrchestrator {
    pub fn from_sources(sources: Vec<SensorSourcePointer>) -> Self {
        let started = vec![false; sources.len()];
        Self { sources, started }
    }

    pub fn push(&mut self, source: SensorSourcePointer) {
        self.sources.push(source);
        self.started.push(false);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Names of the groups each reading will contain, in order.
    pub fn group_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sources.iter().map(|source| source.name())
    }

    /// Sets up all sources. Failures are logged and the source stays
    /// enabled: [`sample`](Self::sample) retries its setup and reports the
    /// error marker until it succeeds.
    ///
    /// Returns the number of sources that failed to start.
    pub fn begin_all(&mut self) -> usize {
        let mut failed = 0;
        for (source, started) in self.sources.iter_mut().zip(&mut self.started) {
            match source.begin() {
                Ok(()) => {
                    info!("{} initialized", source.name());
                    *started = true;
                }
                Err(e) => {
                    warn!("{} initialization failed: {}", source.name(), e);
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Reads every source once, setting up first any source that is not
    /// running yet.
    pub fn sample(&mut self, timestamp: u32, delay: &mut dyn Delay) -> SensorReading {
        let mut reading = SensorReading::new(timestamp);

        for (source, started) in self.sources.iter_mut().zip(&mut self.started) {
            if !*started {
                match source.begin() {
                    Ok(()) => {
                        info!("{} initialized", source.name());
                        *started = true;
                    }
                    Err(e) => {
                        warn!("{} still not initialized: {}", source.name(), e);
                        reading.push_group(source.name(), GroupValue::Error);
                        continue;
                    }
                }
            }

            let value = match source.read(delay) {
                Ok(group) => GroupValue::Valid(group),
                Err(e) => {
                    warn!("Error reading {}: {}", source.name(), e);
                    GroupValue::Error
                }
            };
            reading.push_group(source.name(), value);
        }

        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Group;
    use crate::sensor::SensorReadError;
    use crate::time::testing::ManualClock;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Scripted {
        name: &'static str,
        fail: bool,
        begin_failures: u32,
        begins: u32,
        reads: Rc<Cell<u32>>,
    }

    impl SensorSource for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn begin(&mut self) -> Result<(), SensorReadError> {
            self.begins += 1;
            if self.begins <= self.begin_failures {
                Err(SensorReadError::NotInitialized)
            } else {
                Ok(())
            }
        }

        fn read(&mut self, _delay: &mut dyn Delay) -> Result<Group, SensorReadError> {
            self.reads.set(self.reads.get() + 1);
            if self.fail {
                Err(SensorReadError::Disconnected)
            } else {
                Ok(Group::new().with_float("value", 1.0))
            }
        }
    }

    fn orchestrator(failing: &[bool], reads: &Rc<Cell<u32>>) -> SamplingOrchestrator {
        const NAMES: [&str; 3] = ["a", "b", "c"];
        SamplingOrchestrator::from_sources(
            failing
                .iter()
                .zip(NAMES)
                .map(|(&fail, name)| {
                    Box::new(Scripted {
                        name,
                        fail,
                        begin_failures: u32::from(fail),
                        begins: 0,
                        reads: reads.clone(),
                    }) as SensorSourcePointer
                })
                .collect(),
        )
    }

    #[test]
    fn failure_is_isolated_to_its_group() {
        let reads = Rc::default();
        let mut orchestrator = orchestrator(&[false, true, false], &reads);
        let clock = ManualClock::default();
        orchestrator.begin_all();

        let reading = orchestrator.sample(42, &mut clock.delay());

        assert_eq!(reading.timestamp(), 42);
        assert_eq!(reading.group("b"), Some(&GroupValue::Error));
        assert_eq!(reading.field("a", "value"), Some(1.0));
        assert_eq!(reading.field("c", "value"), Some(1.0));
        // every source read exactly once, no retry of the failing one
        assert_eq!(reads.get(), 3);
    }

    #[test]
    fn every_source_contributes_one_group_in_order() {
        let reads = Rc::default();
        let mut orchestrator = orchestrator(&[true, false, true], &reads);
        let clock = ManualClock::default();

        let reading = orchestrator.sample(0, &mut clock.delay());
        let names: Vec<_> = reading.groups().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(
            orchestrator.group_names().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn begin_all_counts_failures() {
        let reads = Rc::default();
        let mut orchestrator = orchestrator(&[true, false, true], &reads);
        assert_eq!(orchestrator.begin_all(), 2);
    }

    #[test]
    fn source_failing_setup_at_boot_recovers_on_a_later_cycle() {
        let reads = Rc::new(Cell::new(0));
        let mut orchestrator = SamplingOrchestrator::from_sources(vec![Box::new(Scripted {
            name: "late",
            fail: false,
            begin_failures: 2,
            begins: 0,
            reads: reads.clone(),
        })]);
        let clock = ManualClock::default();

        assert_eq!(orchestrator.begin_all(), 1);

        // second setup attempt fails as well, the read is skipped
        let reading = orchestrator.sample(0, &mut clock.delay());
        assert_eq!(reading.group("late"), Some(&GroupValue::Error));
        assert_eq!(reads.get(), 0);

        let errors = (1..100)
            .map(|cycle| orchestrator.sample(cycle, &mut clock.delay()))
            .filter(|reading| reading.group("late") == Some(&GroupValue::Error))
            .count();
        assert_eq!(errors, 0);
        assert_eq!(reads.get(), 99);
    }
}
