use comms::Capabilities;
use worker::Engine;

use crate::error::{BrokerErr, Result};

/// The amount of engines the service can drive.
pub const MAX_ENGINES: usize = 1;

/// Computes the batching constraints every engine can honor.
///
/// The work group size is the least common multiple of every engine's preferred size,
/// the maximum bunch size is the smallest maximum rounded down to a whole amount of
/// work groups.
///
/// # Arguments
/// * `engines` - The configured engines.
///
/// # Errors
/// Fails if no engine or more than `MAX_ENGINES` were given, if an engine isn't
/// initialized or if the maximum bunch size can't hold a single work group.
pub fn negotiate<E: Engine>(engines: &[E]) -> Result<Capabilities> {
    match engines.len() {
        0 => return Err(BrokerErr::NoEngines),
        n if n > MAX_ENGINES => return Err(BrokerErr::TooManyEngines { got: n }),
        _ => {}
    }

    if engines.iter().any(|e| !e.is_initialized()) {
        return Err(BrokerErr::EngineNotInitialized);
    }

    let limits = engines
        .iter()
        .map(|e| (e.work_group_size(), e.max_bunch_size()));

    reduce(limits)
}

/// Folds `(work group size, max bunch size)` pairs into the agreed constraints.
pub fn reduce(limits: impl IntoIterator<Item = (usize, usize)>) -> Result<Capabilities> {
    let mut work_group_size = 1;
    let mut max_bunch_size = usize::MAX;

    for (group, max) in limits {
        work_group_size = lcm(work_group_size, group.max(1));
        max_bunch_size = max_bunch_size.min(max);
    }

    let rounded = max_bunch_size - max_bunch_size % work_group_size;
    if rounded == 0 {
        return Err(BrokerErr::ZeroBunchSize {
            work_group_size,
            max_bunch_size,
        });
    }

    Ok(Capabilities {
        work_group_size,
        max_bunch_size: rounded,
    })
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }

    a
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use worker::loopback::LoopbackEngine;

    #[test]
    fn a_single_engine_keeps_its_limits() {
        let caps = negotiate(&[LoopbackEngine::new(32, 1024)]).unwrap();
        assert_eq!(caps.work_group_size, 32);
        assert_eq!(caps.max_bunch_size, 1024);
    }

    #[test]
    fn the_maximum_is_rounded_down_to_whole_groups() {
        let caps = negotiate(&[LoopbackEngine::new(32, 1000)]).unwrap();
        assert_eq!(caps.max_bunch_size, 992);
    }

    #[test]
    fn several_limits_agree_on_the_lcm_and_the_minimum() {
        let caps = reduce([(4, 1000), (6, 500)]).unwrap();
        assert_eq!(caps.work_group_size, 12);
        assert_eq!(caps.max_bunch_size, 492);
    }

    #[test]
    fn configuration_errors_are_reported() {
        let none: [LoopbackEngine; 0] = [];
        assert!(matches!(negotiate(&none), Err(BrokerErr::NoEngines)));

        let two = [LoopbackEngine::new(1, 1), LoopbackEngine::new(1, 1)];
        assert!(matches!(
            negotiate(&two),
            Err(BrokerErr::TooManyEngines { got: 2 })
        ));

        assert!(matches!(
            negotiate(&[LoopbackEngine::new(64, 32)]),
            Err(BrokerErr::ZeroBunchSize { .. })
        ));
    }
}
